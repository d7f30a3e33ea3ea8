//! Transition hook commands.
//!
//! Runs the configured shell command for each idle/active transition.

use std::process::Stdio;
use std::time::Duration;

use anyhow::Context;
use anyhow::Result;
use tokio::process::Command;
use tracing::debug;
use tracing::info;
use tracing::trace;
use tracing::warn;

use crate::config::Config;
use crate::domain::IdleEvent;

/// Environment variable carrying the event name to hook commands.
pub const EVENT_ENV: &str = "IDLE_TIMER_EVENT";

const ERROR_LOG_RATE_LIMIT: u32 = 10; // Log every Nth failure after initial burst

/// Runs hook commands for transitions.
#[derive(Debug)]
pub struct HookRunner {
    on_idle: Option<String>,
    on_active: Option<String>,
    dry_run: bool,
    timeout: Option<Duration>,
    shell: String,

    /// Count of consecutive failures.
    consecutive_failures: u32,

    /// Total failures, for log rate limiting.
    failure_count: u32,
}

impl HookRunner {
    /// Create a runner from config.
    pub fn from_config(config: &Config) -> Self {
        Self {
            on_idle: config.on_idle.clone(),
            on_active: config.on_active.clone(),
            dry_run: config.dry_run,
            timeout: config.hook_timeout(),
            shell: "sh".to_string(),
            consecutive_failures: 0,
            failure_count: 0,
        }
    }

    /// The command configured for `event`, if any.
    pub fn command_for(&self, event: IdleEvent) -> Option<&str> {
        let command = match event {
            IdleEvent::Idle => self.on_idle.as_deref(),
            IdleEvent::Active => self.on_active.as_deref(),
        };
        command.filter(|cmd| !cmd.trim().is_empty())
    }

    /// Run the hook for `event` and wait for it to finish.
    ///
    /// Failures are counted and logged here; callers only need the result to
    /// decide whether to go on.
    pub async fn run(&mut self, event: IdleEvent) -> Result<()> {
        let Some(command) = self.command_for(event).map(str::to_owned) else {
            trace!("No hook configured for {}", event);
            return Ok(());
        };

        if self.dry_run {
            info!("[DRY RUN] Would execute {} hook: {}", event, command);
            return Ok(());
        }

        debug!("Running {} hook: {}", event, command);

        match self.execute(event, &command).await {
            Ok(()) => {
                trace!("{} hook succeeded", event);
                self.consecutive_failures = 0;
                Ok(())
            }
            Err(e) => {
                self.record_failure(event, &e);
                Err(e)
            }
        }
    }

    /// Spawn the command and wait for it, bounded by the configured timeout.
    ///
    /// The child is killed if this future is dropped or times out.
    async fn execute(&self, event: IdleEvent, command: &str) -> Result<()> {
        let child = Command::new(&self.shell)
            .arg("-c")
            .arg(command)
            .env(EVENT_ENV, event.as_str())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("Failed to spawn {event} hook"))?;

        let output = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, child.wait_with_output())
                .await
                .map_err(|_| anyhow::anyhow!("{event} hook timed out after {limit:?}"))?,
            None => child.wait_with_output().await,
        }
        .with_context(|| format!("Failed to wait for {event} hook"))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!(
                "{} hook exited with code {:?}: {}",
                event,
                output.status.code(),
                stderr.trim()
            );
        }
        Ok(())
    }

    fn record_failure(&mut self, event: IdleEvent, err: &anyhow::Error) {
        self.consecutive_failures += 1;
        self.failure_count += 1;

        // Rate-limit error logging
        let count = self.failure_count;
        if count <= 5 || count % ERROR_LOG_RATE_LIMIT == 0 {
            warn!(
                "{} hook failed ({} consecutive): {:#}",
                event, self.consecutive_failures, err
            );
            if count == 5 {
                warn!(
                    "Rate-limiting hook error logs (showing every {}th error)",
                    ERROR_LOG_RATE_LIMIT
                );
            }
        }
    }

    /// Get count of consecutive failures.
    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }
}

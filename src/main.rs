//! idle-timer - report idle/active transitions from activity signals.
//!
//! Activity signals arrive as lines on a Unix socket and/or stdin. After the
//! configured timeout without signals the user is idle; the next signal makes
//! them active again. Transitions are printed and can run hook commands.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use std::time::SystemTime;
use std::time::UNIX_EPOCH;

use anyhow::Context;
use anyhow::Result;
use clap::Parser;
use idle_timer::ActivityHub;
use idle_timer::IdleEvent;
use idle_timer::IdleMonitor;
use idle_timer::MonitorConfig;
use idle_timer::TokioScheduler;
use idle_timer::activity::stream::SignalSocket;
use idle_timer::activity::stream::read_stdin;
use idle_timer::callback;
use idle_timer::config::Config;
use idle_timer::config::OutputFormat;
use idle_timer::domain::Transition;
use idle_timer::hooks::HookRunner;
use tokio::signal::unix::SignalKind;
use tokio::signal::unix::signal;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::info;
use tracing::trace;
use tracing::warn;
use tracing_subscriber::EnvFilter;

/// Idle detection daemon.
///
/// Reads activity signals (`pointer`, `key`, ...) one per line and reports
/// when the user becomes idle or active.
#[derive(Parser, Debug)]
#[command(name = "idle-timer")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to config file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Idle timeout in milliseconds (overrides config).
    #[arg(short, long)]
    timeout_ms: Option<u64>,

    /// Unix socket to listen on for activity signals (overrides config).
    #[arg(long)]
    socket: Option<PathBuf>,

    /// Don't listen on a Unix socket.
    #[arg(long, conflicts_with = "socket")]
    no_socket: bool,

    /// Read activity signals from stdin.
    #[arg(long)]
    stdin: bool,

    /// Enable dry-run mode (log hook commands instead of running them).
    #[arg(long)]
    dry_run: bool,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Print transitions to stdout.
    #[arg(long)]
    print_events: bool,

    /// Print transitions as JSON (implies --print-events).
    #[arg(long)]
    json: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(&args.log_level)?;

    info!("idle-timer v{} starting", env!("CARGO_PKG_VERSION"));

    let mut config =
        Config::load_or_default(args.config.as_deref()).context("Failed to load configuration")?;
    let socket_path = apply_args(&mut config, &args);
    config.validate().context("Invalid configuration")?;

    info!(
        "Configuration loaded (timeout={}ms, dry_run={})",
        config.timeout_ms, config.dry_run
    );

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to build tokio runtime")?;
    let result = runtime.block_on(run_daemon(config, socket_path));

    // A pending stdin read lives on a blocking thread; don't wait for it.
    runtime.shutdown_timeout(Duration::from_millis(100));
    result
}

/// Initialize logging with the specified level.
fn init_logging(level: &str) -> Result<()> {
    let filter = EnvFilter::try_new(format!("idle_timer={level}"))
        .or_else(|_| EnvFilter::try_new("info"))
        .context("Invalid log level")?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_writer(std::io::stderr)
        .init();

    Ok(())
}

/// Fold command-line overrides into `config` and pick the socket path.
fn apply_args(config: &mut Config, args: &Args) -> Option<PathBuf> {
    if let Some(timeout_ms) = args.timeout_ms {
        config.timeout_ms = timeout_ms;
    }
    if args.stdin {
        config.read_stdin = true;
    }
    if args.dry_run {
        config.dry_run = true;
    }
    if args.print_events || args.json {
        config.print_events = true;
    }
    if args.json {
        config.output = OutputFormat::Json;
    }
    if let Some(ref socket) = args.socket {
        config.socket_path = Some(socket.clone());
    }

    if args.no_socket {
        None
    } else {
        config.resolved_socket_path()
    }
}

/// Run daemon event loop.
async fn run_daemon(config: Config, socket_path: Option<PathBuf>) -> Result<()> {
    let hub = Arc::new(ActivityHub::new());
    let scheduler = Arc::new(TokioScheduler::new().context("Failed to create scheduler")?);
    let monitor = IdleMonitor::new(
        MonitorConfig::with_timeout(config.timeout()),
        scheduler,
        hub.clone(),
    )
    .context("Failed to create idle monitor")?;

    // Subscribers only forward; printing runs in the loop below, hooks in
    // their own task.
    let (tx, mut transitions) = mpsc::unbounded_channel();
    forward_transitions(&monitor, &tx);
    drop(tx);

    let cancel = CancellationToken::new();
    let mut tasks = Vec::new();

    if let Some(path) = socket_path {
        let socket = SignalSocket::bind(&path).context("Failed to open activity socket")?;
        tasks.push(tokio::spawn(socket.serve(hub.clone(), cancel.clone())));
    }
    if config.read_stdin {
        info!("Reading activity signals from stdin");
        tasks.push(tokio::spawn(read_stdin(hub.clone(), cancel.clone())));
    }
    if tasks.is_empty() {
        anyhow::bail!("No activity source: enable a socket or --stdin");
    }

    let (hook_tx, hook_worker) = spawn_hook_worker(HookRunner::from_config(&config));
    let mut sigterm = signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;

    monitor.start(None);
    info!("Daemon started, waiting for activity...");

    loop {
        tokio::select! {
            Some(transition) = transitions.recv() => {
                debug!("Transition: {}", transition.event);
                if config.print_events {
                    print_transition(&transition, config.output);
                }
                if hook_tx.send(transition.event).is_err() {
                    warn!("Hook worker gone, skipping {} hook", transition.event);
                }
            }
            result = tokio::signal::ctrl_c() => {
                if let Err(e) = result {
                    warn!("Failed to listen for Ctrl-C: {}", e);
                }
                info!("Interrupted, shutting down");
                break;
            }
            _ = sigterm.recv() => {
                info!("Received SIGTERM, shutting down");
                break;
            }
        }
    }

    // Dropping the worker's future kills a hook that is still running.
    hook_worker.abort();
    if let Err(e) = hook_worker.await
        && !e.is_cancelled()
    {
        warn!("Hook worker ended abnormally: {}", e);
    }

    monitor.stop();
    cancel.cancel();
    for task in tasks {
        if let Err(e) = task.await {
            warn!("Activity reader ended abnormally: {}", e);
        }
    }

    Ok(())
}

/// Subscribe callbacks that send each transition, stamped when it happens.
fn forward_transitions(monitor: &IdleMonitor, tx: &mpsc::UnboundedSender<Transition>) {
    for event in [IdleEvent::Idle, IdleEvent::Active] {
        let tx = tx.clone();
        monitor.subscribe(
            event,
            callback(move || {
                if tx.send(Transition::new(event, now_millis())).is_err() {
                    trace!("Transition channel closed, dropping {}", event);
                }
            }),
        );
    }
}

/// Run hooks one at a time, off the daemon loop.
fn spawn_hook_worker(mut hooks: HookRunner) -> (mpsc::UnboundedSender<IdleEvent>, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::unbounded_channel::<IdleEvent>();
    let worker = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            // The runner logs and counts failures itself.
            let _ = hooks.run(event).await;
        }
    });
    (tx, worker)
}

fn format_transition(transition: &Transition, output: OutputFormat) -> Result<String> {
    match output {
        OutputFormat::Text => Ok(format!(
            "[{}] {}",
            transition.event.as_str().to_uppercase(),
            transition.timestamp_ms
        )),
        OutputFormat::Json => {
            serde_json::to_string(transition).context("Failed to serialize transition")
        }
    }
}

fn print_transition(transition: &Transition, output: OutputFormat) {
    match format_transition(transition, output) {
        Ok(line) => println!("{line}"),
        Err(e) => warn!("{:#}", e),
    }
}

/// Milliseconds since the Unix epoch.
fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
}

//! Configuration loading and defaults for the idle-timer daemon.

use std::path::Path;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use anyhow::Result;
use serde::Deserialize;
use serde::Serialize;

/// How transitions are printed when `print_events` is on.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// `[IDLE]` / `[ACTIVE]` lines (default).
    #[default]
    Text,
    /// One JSON object per line.
    Json,
}

/// Main configuration for the idle-timer daemon.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Inactivity period in milliseconds before the user is idle (default: 30000).
    pub timeout_ms: u64,

    /// Unix socket to accept activity signals on.
    /// If unset, `$XDG_RUNTIME_DIR/idle-timer.sock` is used.
    pub socket_path: Option<PathBuf>,

    /// Also read activity signals from stdin.
    pub read_stdin: bool,

    /// Shell command run when the user becomes idle.
    pub on_idle: Option<String>,

    /// Shell command run when the user becomes active again.
    pub on_active: Option<String>,

    /// Kill a hook that runs longer than this many milliseconds.
    /// Unset means hooks may run until they exit (e.g. a screen locker).
    pub hook_timeout_ms: Option<u64>,

    /// Dry run mode: log hook commands instead of executing.
    pub dry_run: bool,

    /// Print transitions to stdout.
    pub print_events: bool,

    /// Format for printed transitions.
    pub output: OutputFormat,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            timeout_ms: 30_000,
            socket_path: None,
            read_stdin: false,
            on_idle: None,
            on_active: None,
            hook_timeout_ms: None,
            dry_run: false,
            print_events: false,
            output: OutputFormat::default(),
        }
    }
}

impl Config {
    /// Load configuration from a file path.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        Ok(config)
    }

    /// Load configuration from the default path, or return defaults if not found.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        if let Some(p) = path {
            return Self::load(p);
        }

        if let Some(config_dir) = dirs::config_dir() {
            let default_path = config_dir.join("idle-timer").join("config.toml");
            if default_path.exists() {
                return Self::load(&default_path);
            }
        }

        Ok(Self::default())
    }

    /// Reject values the monitor cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.timeout_ms == 0 {
            anyhow::bail!("timeout_ms must be greater than zero");
        }
        if self.hook_timeout_ms == Some(0) {
            anyhow::bail!("hook_timeout_ms must be greater than zero");
        }
        Ok(())
    }

    /// Idle timeout as a duration.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Hook time limit, if any.
    pub fn hook_timeout(&self) -> Option<Duration> {
        self.hook_timeout_ms.map(Duration::from_millis)
    }

    /// Socket path to listen on, falling back to the runtime directory.
    pub fn resolved_socket_path(&self) -> Option<PathBuf> {
        self.socket_path
            .clone()
            .or_else(|| dirs::runtime_dir().map(|dir| dir.join("idle-timer.sock")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.timeout_ms, 30_000);
        assert_eq!(config.timeout(), Duration::from_secs(30));
        assert!(config.socket_path.is_none());
        assert!(!config.read_stdin);
        assert!(!config.dry_run);
        assert_eq!(config.output, OutputFormat::Text);
        assert_eq!(config.hook_timeout(), None);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_zero_timeout() {
        let config = Config {
            timeout_ms: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_zero_hook_timeout() {
        let config = Config {
            hook_timeout_ms: Some(0),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_parse_toml() {
        let toml_str = r#"
            timeout_ms = 1500
            socket_path = "/tmp/idle.sock"
            read_stdin = true
            on_idle = "loginctl lock-session"
            on_active = "notify-send back"
            hook_timeout_ms = 5000
            print_events = true
            output = "json"
        "#;

        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.timeout(), Duration::from_millis(1500));
        assert_eq!(config.socket_path, Some(PathBuf::from("/tmp/idle.sock")));
        assert!(config.read_stdin);
        assert_eq!(config.on_idle.as_deref(), Some("loginctl lock-session"));
        assert_eq!(config.on_active.as_deref(), Some("notify-send back"));
        assert_eq!(config.hook_timeout(), Some(Duration::from_secs(5)));
        assert!(config.print_events);
        assert_eq!(config.output, OutputFormat::Json);
        assert!(!config.dry_run);
    }

    #[test]
    fn test_explicit_socket_path_wins() {
        let config = Config {
            socket_path: Some(PathBuf::from("/run/custom.sock")),
            ..Default::default()
        };
        assert_eq!(
            config.resolved_socket_path(),
            Some(PathBuf::from("/run/custom.sock"))
        );
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "timeout_ms = 2000\ndry_run = true\n").unwrap();

        let config = Config::load_or_default(Some(&path)).unwrap();
        assert_eq!(config.timeout_ms, 2000);
        assert!(config.dry_run);
    }

    #[test]
    fn test_load_missing_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let err = Config::load(&dir.path().join("missing.toml")).unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }

    #[test]
    fn test_load_invalid_toml_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "timeout_ms = \"soon\"").unwrap();

        let err = Config::load(&path).unwrap_err();
        assert!(err.to_string().contains("Failed to parse config file"));
    }
}

//! Logging configuration module
//! Structured logging to stderr with an optional rolling JSON file

use serde::{Deserialize, Serialize};
use std::io;
use std::path::PathBuf;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::{non_blocking, rolling};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,              // log level (trace, debug, info, warn, error)
    pub json: bool,                 // JSON lines on the console
    pub file_dir: Option<PathBuf>,  // directory for rolling log files
    pub rotation: LogRotation,      // log rotation policy
}

/// Log rotation policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogRotation {
    Hourly,
    Daily,
    Never,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            file_dir: None,
            rotation: LogRotation::Daily,
        }
    }
}

impl LoggingConfig {
    /// Initialize logging based on configuration.
    ///
    /// Console output goes to stderr so command output on stdout stays clean.
    /// The returned guard must be held until exit or buffered file lines are lost.
    pub fn init(&self) -> Result<Option<WorkerGuard>, Box<dyn std::error::Error + Send + Sync>> {
        // RUST_LOG wins over the configured level
        let env_filter = EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_new(&self.level))?;

        let console_text = (!self.json).then(|| {
            fmt::layer()
                .with_target(true)
                .with_level(true)
                .with_writer(io::stderr)
        });

        let console_json = self.json.then(|| {
            fmt::layer()
                .json()
                .with_target(true)
                .with_writer(io::stderr)
        });

        let (file_layer, guard) = match &self.file_dir {
            Some(dir) => {
                let file_appender = match self.rotation {
                    LogRotation::Hourly => rolling::hourly(dir, "rolesync.log"),
                    LogRotation::Daily => rolling::daily(dir, "rolesync.log"),
                    LogRotation::Never => rolling::never(dir, "rolesync.log"),
                };
                let (writer, guard) = non_blocking(file_appender);

                let layer = fmt::layer()
                    .with_target(true)
                    .with_thread_ids(true)
                    .with_ansi(false)
                    .json()
                    .with_writer(writer);

                (Some(layer), Some(guard))
            }
            None => (None, None),
        };

        tracing_subscriber::registry()
            .with(env_filter)
            .with(console_text)
            .with(console_json)
            .with(file_layer)
            .try_init()?;

        tracing::debug!(level = %self.level, json = self.json, "Logging initialized");

        Ok(guard)
    }
}

/// Log a reconciliation phase transition
#[macro_export]
macro_rules! log_phase {
    ($phase:expr) => {
        tracing::info!(phase = %$phase, "Reconciliation phase")
    };
    ($phase:expr, $($key:ident = $value:expr),+) => {
        tracing::info!(
            phase = %$phase,
            $($key = $value),+,
            "Reconciliation phase"
        )
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = LoggingConfig::default();
        assert_eq!(config.level, "info");
        assert!(!config.json);
        assert!(config.file_dir.is_none());
    }

    #[test]
    fn test_rotation_from_toml() {
        let config: LoggingConfig = toml::from_str("rotation = \"hourly\"\nlevel = \"debug\"").unwrap();
        assert_eq!(config.rotation, LogRotation::Hourly);
        assert_eq!(config.level, "debug");
    }
}

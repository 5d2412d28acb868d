//! Structured logging initialization.

use crate::error::{TelemetryError, TelemetryResult};
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Machine-readable log file written under the log directory.
pub const JSON_LOG_FILE: &str = "daemon.jsonl";
/// Human-readable log file kept for older tooling.
pub const TEXT_LOG_FILE: &str = "daemon.log";

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogConfig {
    /// Default filter directive when `RUST_LOG` is unset.
    #[serde(default = "default_level")]
    pub level: String,
    /// Directory for the log files. Console only when absent.
    #[serde(default)]
    pub log_dir: Option<PathBuf>,
}

fn default_level() -> String {
    "info,hlmd=debug".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            log_dir: None,
        }
    }
}

/// Initialize structured logging.
///
/// Console output is JSON when `RUST_ENV=production` and pretty otherwise.
/// With a log directory, every event is also appended to `daemon.jsonl`
/// (one JSON object per line) and `daemon.log` (plain text).
pub fn init_logging(config: &LogConfig) -> TelemetryResult<()> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    let is_production = std::env::var("RUST_ENV")
        .map(|v| v == "production")
        .unwrap_or(false);

    let json_console = is_production.then(|| {
        fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(true)
    });
    let pretty_console = (!is_production).then(|| {
        fmt::layer()
            .pretty()
            .with_target(true)
            .with_thread_names(true)
    });

    let (json_file, text_file) = match &config.log_dir {
        Some(dir) => {
            fs::create_dir_all(dir).map_err(|source| TelemetryError::LogFile {
                path: dir.clone(),
                source,
            })?;
            let json = open_append(&dir.join(JSON_LOG_FILE))?;
            let text = open_append(&dir.join(TEXT_LOG_FILE))?;
            (
                Some(
                    fmt::layer()
                        .json()
                        .with_ansi(false)
                        .with_writer(Mutex::new(json)),
                ),
                Some(fmt::layer().with_ansi(false).with_writer(Mutex::new(text))),
            )
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(json_console)
        .with(pretty_console)
        .with(json_file)
        .with(text_file)
        .try_init()
        .map_err(|e| TelemetryError::LoggingInit(e.to_string()))
}

fn open_append(path: &Path) -> TelemetryResult<File> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|source| TelemetryError::LogFile {
            path: path.to_path_buf(),
            source,
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = LogConfig::default();
        assert_eq!(config.level, "info,hlmd=debug");
        assert!(config.log_dir.is_none());
    }

    #[test]
    fn test_config_from_partial_toml_fields() {
        let config: LogConfig = serde_json::from_str(r#"{"log_dir": "/tmp/hlmd-logs"}"#).unwrap();
        assert_eq!(config.level, "info,hlmd=debug");
        assert_eq!(config.log_dir, Some(PathBuf::from("/tmp/hlmd-logs")));
    }
}

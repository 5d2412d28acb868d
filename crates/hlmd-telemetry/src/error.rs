//! Telemetry error types.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TelemetryError {
    /// A global subscriber is already installed.
    #[error("Logging already initialized: {0}")]
    LoggingInit(String),

    #[error("Cannot open log file {path}: {source}")]
    LogFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Metrics encoding failed: {0}")]
    Metrics(String),
}

pub type TelemetryResult<T> = Result<T, TelemetryError>;

//! Daemon error types.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DaemonError {
    #[error("Configuration error: {0}")]
    Config(String),

    /// `pid` is `None` when the holder has not written it yet.
    #[error("Daemon already running (pid {})", .pid.map_or_else(|| "unknown".to_string(), |p| p.to_string()))]
    AlreadyRunning { pid: Option<u32> },

    #[error("Artifact error at {path}: {source}")]
    Artifact {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Feed error: {0}")]
    Feed(#[from] hlmd_feed::FeedError),

    #[error("Registry error: {0}")]
    Registry(#[from] hlmd_registry::RegistryError),

    #[error("IPC error: {0}")]
    Ipc(#[from] hlmd_ipc::IpcError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type DaemonResult<T> = Result<T, DaemonError>;

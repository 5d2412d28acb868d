//! IPC error types.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum IpcError {
    #[error("Failed to bind {path}: {source}")]
    Bind {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to remove stale socket {path}: {source}")]
    StaleSocket {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type IpcResult<T> = Result<T, IpcError>;

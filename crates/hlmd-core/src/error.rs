//! Error types for hlmd-core.

use thiserror::Error;

/// Core error types.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("Invalid size: {0}")]
    InvalidSize(String),

    #[error("Invalid side: {0}")]
    InvalidSide(String),
}

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;

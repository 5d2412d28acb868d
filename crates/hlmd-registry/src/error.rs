//! Registry error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("HTTP client error: {0}")]
    HttpClient(String),

    #[error("Unexpected response shape: {0}")]
    UnexpectedShape(String),
}

pub type RegistryResult<T> = Result<T, RegistryError>;

//! RPC error types.
//!
//! Nothing here crosses the socket as a Rust error: every variant becomes the
//! `error` string of a response.

use thiserror::Error;

/// Failure of a decoded request inside the gateway.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RpcError {
    #[error("Rate limit exceeded")]
    RateLimited,

    #[error("Unauthorized")]
    Unauthorized,

    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    NotFound(String),

    #[error("No data available")]
    NoData,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl RpcError {
    /// Metric status label for this outcome.
    pub fn status(&self) -> &'static str {
        match self {
            Self::RateLimited => "rate_limited",
            Self::Unauthorized => "unauthorized",
            _ => "error",
        }
    }
}

/// A line that could not be turned into a request.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("Invalid JSON: {0}")]
    InvalidJson(String),

    #[error("Request must be a JSON object")]
    NotAnObject,

    #[error("Missing or invalid id")]
    InvalidId,

    #[error("Missing method")]
    MissingMethod,

    #[error("Unknown method: {0}")]
    UnknownMethod(String),

    #[error("params must be an object")]
    ParamsNotObject,

    #[error("Request line exceeds {limit} bytes")]
    LineTooLong { limit: usize },
}

pub type RpcResult<T> = Result<T, RpcError>;

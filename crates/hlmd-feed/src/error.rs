//! Feed error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum FeedError {
    #[error("Parse error on {channel}: {reason}")]
    ParseError { channel: String, reason: String },

    #[error("Subscription manager already started")]
    AlreadyStarted,
}

pub type FeedResult<T> = Result<T, FeedError>;

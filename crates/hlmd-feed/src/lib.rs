//! Upstream market-data feed for hlmd.
//!
//! The [`SubscriptionManager`] owns the single upstream WebSocket connection
//! and two metadata polling loops, and writes everything it receives into
//! the shared [`MarketCache`](hlmd_core::MarketCache).

pub mod config;
pub mod error;
pub mod manager;
pub mod parser;

pub use config::FeedConfig;
pub use error::{FeedError, FeedResult};
pub use manager::{MetaKind, SubscriptionManager};
pub use parser::{MarketEvent, MessageParser, ParseStats};

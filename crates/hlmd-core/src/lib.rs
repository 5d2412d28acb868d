//! Core building blocks for the hlmd market-data daemon.
//!
//! This crate provides the pieces every other crate leans on:
//! - `MarketCache`: timestamped store for the five upstream data shapes
//! - `with_backoff`: exponential retry with jitter
//! - `Clock`: injectable wall clock
//! - `OrderRecord`, `OrderSide`: local order book types
//! - `UpstreamProbe`: read-only upstream connectivity seam

pub mod backoff;
pub mod cache;
pub mod clock;
pub mod error;
pub mod order;
pub mod types;

pub use backoff::{with_backoff, BackoffConfig};
pub use cache::{CacheEntry, CacheStatus, MarketCache, ShapeStatus};
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{CoreError, Result};
pub use order::{OrderId, OrderRecord, OrderSide, OrderStatus};
pub use types::{
    AssetCtxTree, MarketShape, Mids, PerpMetas, SpotAssetCtxs, SpotMeta, UpstreamProbe,
};

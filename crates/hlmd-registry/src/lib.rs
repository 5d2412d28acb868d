//! Exchange metadata for hlmd.
//!
//! Slow-changing market metadata (perp universes, spot tokens) comes from the
//! exchange's request/response `info` endpoint rather than the stream.

pub mod client;
pub mod error;

pub use client::{MetaClient, MetaSource};
pub use error::{RegistryError, RegistryResult};

//! Shared data shapes held by the market-data cache.
//!
//! Upstream payloads are stored close to their wire form: prices stay as the
//! exchange's decimal strings and contexts/metadata stay as raw JSON so that
//! clients receive exactly what the exchange published.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Mid prices keyed by coin symbol (e.g. `"BTC" -> "50000.5"`).
pub type Mids = BTreeMap<String, String>;

/// Per-venue asset contexts keyed by DEX name.
///
/// The first-party perp venue uses the empty name `""`.
pub type AssetCtxTree = BTreeMap<String, Vec<serde_json::Value>>;

/// Perpetual market metadata, one entry per venue.
pub type PerpMetas = Vec<serde_json::Value>;

/// Spot market metadata (tokens + universe).
pub type SpotMeta = serde_json::Value;

/// Spot asset contexts.
pub type SpotAssetCtxs = Vec<serde_json::Value>;

/// The five cached market-data shapes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MarketShape {
    Mids,
    AssetCtxs,
    PerpMeta,
    SpotMeta,
    SpotAssetCtxs,
}

impl MarketShape {
    /// All shapes, in reporting order.
    pub const ALL: [MarketShape; 5] = [
        Self::Mids,
        Self::AssetCtxs,
        Self::PerpMeta,
        Self::SpotMeta,
        Self::SpotAssetCtxs,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Mids => "mids",
            Self::AssetCtxs => "assetCtxs",
            Self::PerpMeta => "perpMeta",
            Self::SpotMeta => "spotMeta",
            Self::SpotAssetCtxs => "spotAssetCtxs",
        }
    }
}

impl fmt::Display for MarketShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Read-only view of upstream connectivity.
///
/// Implemented by the subscription manager; consumed by the RPC gateway for
/// status reporting only.
pub trait UpstreamProbe: Send + Sync {
    /// Whether the streaming transport is currently connected.
    fn is_connected(&self) -> bool;
}

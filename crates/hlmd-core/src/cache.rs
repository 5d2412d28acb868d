//! Timestamped in-memory market-data cache.
//!
//! Holds one entry per [`MarketShape`]. Each update replaces the entry
//! wholesale and stamps it with the clock's current time; nothing is merged
//! and nothing is evicted. Staleness is only ever reported as an age.

use crate::clock::{Clock, SystemClock};
use crate::types::{AssetCtxTree, MarketShape, Mids, PerpMetas, SpotAssetCtxs, SpotMeta};
use parking_lot::RwLock;
use serde::Serialize;
use std::sync::Arc;
use tracing::trace;

/// A stored value plus the time of its last replacement.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry<T> {
    pub data: T,
    /// Milliseconds since Unix epoch.
    pub updated_at: u64,
}

/// Freshness of a single shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ShapeStatus {
    pub populated: bool,
    /// `now - updatedAt`, absent when never populated.
    pub age_ms: Option<u64>,
}

impl ShapeStatus {
    const EMPTY: ShapeStatus = ShapeStatus {
        populated: false,
        age_ms: None,
    };
}

/// Per-shape freshness report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStatus {
    pub mids: ShapeStatus,
    pub asset_ctxs: ShapeStatus,
    pub perp_meta: ShapeStatus,
    pub spot_meta: ShapeStatus,
    pub spot_asset_ctxs: ShapeStatus,
}

impl CacheStatus {
    pub fn get(&self, shape: MarketShape) -> ShapeStatus {
        match shape {
            MarketShape::Mids => self.mids,
            MarketShape::AssetCtxs => self.asset_ctxs,
            MarketShape::PerpMeta => self.perp_meta,
            MarketShape::SpotMeta => self.spot_meta,
            MarketShape::SpotAssetCtxs => self.spot_asset_ctxs,
        }
    }
}

struct Slot<T>(RwLock<Option<CacheEntry<T>>>);

impl<T: Clone> Slot<T> {
    fn new() -> Self {
        Self(RwLock::new(None))
    }

    fn set(&self, data: T, now: u64) {
        *self.0.write() = Some(CacheEntry {
            data,
            updated_at: now,
        });
    }

    fn get(&self) -> Option<CacheEntry<T>> {
        self.0.read().clone()
    }

    fn status(&self, now: u64) -> ShapeStatus {
        match self.0.read().as_ref() {
            Some(entry) => ShapeStatus {
                populated: true,
                age_ms: Some(now.saturating_sub(entry.updated_at)),
            },
            None => ShapeStatus::EMPTY,
        }
    }
}

/// Market-data cache shared by the feed (writer) and the gateway (reader).
pub struct MarketCache {
    clock: Arc<dyn Clock>,
    mids: Slot<Mids>,
    asset_ctxs: Slot<AssetCtxTree>,
    perp_meta: Slot<PerpMetas>,
    spot_meta: Slot<SpotMeta>,
    spot_asset_ctxs: Slot<SpotAssetCtxs>,
}

impl MarketCache {
    /// Create a cache on the system clock.
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Create a cache on a custom clock.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            mids: Slot::new(),
            asset_ctxs: Slot::new(),
            perp_meta: Slot::new(),
            spot_meta: Slot::new(),
            spot_asset_ctxs: Slot::new(),
        }
    }

    pub fn set_mids(&self, data: Mids) {
        trace!(coins = data.len(), "Cache mids replaced");
        self.mids.set(data, self.clock.now_ms());
    }

    pub fn mids(&self) -> Option<CacheEntry<Mids>> {
        self.mids.get()
    }

    pub fn set_asset_ctxs(&self, data: AssetCtxTree) {
        trace!(venues = data.len(), "Cache asset ctxs replaced");
        self.asset_ctxs.set(data, self.clock.now_ms());
    }

    pub fn asset_ctxs(&self) -> Option<CacheEntry<AssetCtxTree>> {
        self.asset_ctxs.get()
    }

    pub fn set_perp_meta(&self, data: PerpMetas) {
        trace!(venues = data.len(), "Cache perp meta replaced");
        self.perp_meta.set(data, self.clock.now_ms());
    }

    pub fn perp_meta(&self) -> Option<CacheEntry<PerpMetas>> {
        self.perp_meta.get()
    }

    pub fn set_spot_meta(&self, data: SpotMeta) {
        trace!("Cache spot meta replaced");
        self.spot_meta.set(data, self.clock.now_ms());
    }

    pub fn spot_meta(&self) -> Option<CacheEntry<SpotMeta>> {
        self.spot_meta.get()
    }

    pub fn set_spot_asset_ctxs(&self, data: SpotAssetCtxs) {
        trace!(assets = data.len(), "Cache spot asset ctxs replaced");
        self.spot_asset_ctxs.set(data, self.clock.now_ms());
    }

    pub fn spot_asset_ctxs(&self) -> Option<CacheEntry<SpotAssetCtxs>> {
        self.spot_asset_ctxs.get()
    }

    /// Freshness of every shape, each aged independently against one `now`.
    pub fn status(&self) -> CacheStatus {
        let now = self.clock.now_ms();
        CacheStatus {
            mids: self.mids.status(now),
            asset_ctxs: self.asset_ctxs.status(now),
            perp_meta: self.perp_meta.status(now),
            spot_meta: self.spot_meta.status(now),
            spot_asset_ctxs: self.spot_asset_ctxs.status(now),
        }
    }
}

impl Default for MarketCache {
    fn default() -> Self {
        Self::new()
    }
}

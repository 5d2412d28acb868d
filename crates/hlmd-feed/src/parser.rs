//! Message parsing for market data.
//!
//! Turns upstream channel messages into typed cache updates:
//! - `allMids`: `{"mids": {coin: px}}`
//! - `allDexsAssetCtxs`: `{"ctxs": [[dex, [ctx, ...]], ...]}`
//! - `spotAssetCtxs`: `[ctx, ...]`
//!
//! Other channels are not market data and parse to `None`.

use crate::error::{FeedError, FeedResult};
use hlmd_core::{AssetCtxTree, MarketShape, Mids, SpotAssetCtxs};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::trace;

/// Parser counters.
#[derive(Debug, Default)]
pub struct ParseStats {
    parsed: AtomicU64,
    ignored: AtomicU64,
    failed: AtomicU64,
}

impl ParseStats {
    pub fn parsed(&self) -> u64 {
        self.parsed.load(Ordering::Relaxed)
    }

    pub fn ignored(&self) -> u64 {
        self.ignored.load(Ordering::Relaxed)
    }

    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Deserialize)]
struct AllMidsData {
    mids: Mids,
}

#[derive(Debug, Deserialize)]
struct AllDexsAssetCtxsData {
    ctxs: Vec<(String, Vec<serde_json::Value>)>,
}

/// Parsed market data event. Each one replaces a cache entry wholesale.
#[derive(Debug, Clone, PartialEq)]
pub enum MarketEvent {
    Mids(Mids),
    AssetCtxs(AssetCtxTree),
    SpotAssetCtxs(SpotAssetCtxs),
}

impl MarketEvent {
    pub fn shape(&self) -> MarketShape {
        match self {
            Self::Mids(_) => MarketShape::Mids,
            Self::AssetCtxs(_) => MarketShape::AssetCtxs,
            Self::SpotAssetCtxs(_) => MarketShape::SpotAssetCtxs,
        }
    }
}

/// Message parser.
#[derive(Debug, Default)]
pub struct MessageParser {
    stats: ParseStats,
}

impl MessageParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stats(&self) -> &ParseStats {
        &self.stats
    }

    /// Parse channel message into market event.
    pub fn parse_channel_message(
        &self,
        channel: &str,
        data: &serde_json::Value,
    ) -> FeedResult<Option<MarketEvent>> {
        let result = match channel {
            "allMids" => parse_as::<AllMidsData>(channel, data)
                .map(|d| Some(MarketEvent::Mids(d.mids))),
            "allDexsAssetCtxs" => parse_as::<AllDexsAssetCtxsData>(channel, data)
                .map(|d| Some(MarketEvent::AssetCtxs(d.ctxs.into_iter().collect()))),
            "spotAssetCtxs" => parse_as::<SpotAssetCtxs>(channel, data)
                .map(|d| Some(MarketEvent::SpotAssetCtxs(d))),
            _ => {
                trace!(channel, "Ignoring non-market channel");
                self.stats.ignored.fetch_add(1, Ordering::Relaxed);
                return Ok(None);
            }
        };

        match &result {
            Ok(_) => self.stats.parsed.fetch_add(1, Ordering::Relaxed),
            Err(_) => self.stats.failed.fetch_add(1, Ordering::Relaxed),
        };
        result
    }
}

fn parse_as<T: DeserializeOwned>(channel: &str, data: &serde_json::Value) -> FeedResult<T> {
    T::deserialize(data).map_err(|e| FeedError::ParseError {
        channel: channel.to_string(),
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_all_mids() {
        let parser = MessageParser::new();
        let event = parser
            .parse_channel_message(
                "allMids",
                &json!({"mids": {"BTC": "50000.5", "xyz:GOLD": "2400"}}),
            )
            .unwrap()
            .unwrap();

        match event {
            MarketEvent::Mids(mids) => {
                assert_eq!(mids["BTC"], "50000.5");
                assert_eq!(mids["xyz:GOLD"], "2400");
            }
            other => panic!("unexpected event: {other:?}"),
        }
        assert_eq!(parser.stats().parsed(), 1);
    }

    #[test]
    fn test_parse_all_dexs_asset_ctxs() {
        let parser = MessageParser::new();
        let data = json!({
            "ctxs": [
                ["", [{"markPx": "50000"}, {"markPx": "3000"}]],
                ["xyz", [{"markPx": "2400"}]]
            ]
        });
        let event = parser
            .parse_channel_message("allDexsAssetCtxs", &data)
            .unwrap()
            .unwrap();

        assert_eq!(event.shape(), MarketShape::AssetCtxs);
        match event {
            MarketEvent::AssetCtxs(tree) => {
                assert_eq!(tree.len(), 2);
                assert_eq!(tree[""].len(), 2);
                assert_eq!(tree["xyz"][0]["markPx"], "2400");
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn test_parse_spot_asset_ctxs() {
        let parser = MessageParser::new();
        let event = parser
            .parse_channel_message("spotAssetCtxs", &json!([{"coin": "PURR/USDC"}]))
            .unwrap()
            .unwrap();
        assert_eq!(
            event,
            MarketEvent::SpotAssetCtxs(vec![json!({"coin": "PURR/USDC"})])
        );
    }

    #[test]
    fn test_unknown_channel_is_ignored() {
        let parser = MessageParser::new();
        let event = parser
            .parse_channel_message("trades", &json!([]))
            .unwrap();
        assert!(event.is_none());
        assert_eq!(parser.stats().ignored(), 1);
        assert_eq!(parser.stats().parsed(), 0);
    }

    #[test]
    fn test_malformed_data_is_an_error() {
        let parser = MessageParser::new();
        let err = parser
            .parse_channel_message("allMids", &json!({"mids": [1, 2]}))
            .unwrap_err();
        assert!(err.to_string().contains("allMids"));
        assert_eq!(parser.stats().failed(), 1);
    }
}

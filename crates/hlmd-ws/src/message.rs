//! WebSocket message types.

use serde::{Deserialize, Serialize};

// ============================================================================
// Subscriptions
// ============================================================================

/// Upstream stream subscriptions used by the daemon.
///
/// Serializes to the exchange's subscription object, e.g.
/// `{"type":"allMids","dex":"ALL_DEXS"}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Subscription {
    /// Mid prices. `dex` selects a venue; `ALL_DEXS` combines every venue.
    AllMids {
        #[serde(skip_serializing_if = "Option::is_none")]
        dex: Option<String>,
    },
    /// Asset contexts of every perp venue.
    AllDexsAssetCtxs,
    /// Spot asset contexts.
    SpotAssetCtxs,
}

/// Venue selector combining all perp venues.
pub const ALL_DEXS: &str = "ALL_DEXS";

impl Subscription {
    /// Combined mid-price stream across all venues.
    pub fn all_mids() -> Self {
        Self::AllMids {
            dex: Some(ALL_DEXS.to_string()),
        }
    }

    /// Channel name the exchange uses for this subscription's data.
    pub fn channel(&self) -> &'static str {
        match self {
            Self::AllMids { .. } => "allMids",
            Self::AllDexsAssetCtxs => "allDexsAssetCtxs",
            Self::SpotAssetCtxs => "spotAssetCtxs",
        }
    }

    /// Subscription object as JSON.
    pub(crate) fn to_json(&self) -> serde_json::Value {
        // Serializing a plain tagged enum cannot fail.
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

// ============================================================================
// Subscription Response Helpers
// ============================================================================

/// Extract subscription type from subscriptionResponse data.
///
/// Handles both formats:
/// - Official: `data.subscription.type`
/// - Fallback: `data.type`
pub fn extract_subscription_type(data: &serde_json::Value) -> Option<&str> {
    data.get("subscription")
        .and_then(|s| s.get("type"))
        .and_then(|v| v.as_str())
        .or_else(|| data.get("type").and_then(|v| v.as_str()))
}

// ============================================================================
// Core WebSocket Messages
// ============================================================================

/// Incoming WebSocket message wrapper.
///
/// All messages from the Hyperliquid WebSocket use channel-based format.
/// The `channel` field determines the message type:
/// - "pong": Heartbeat response
/// - "allMids", "allDexsAssetCtxs", "spotAssetCtxs": Market data feeds
/// - "subscriptionResponse": Subscription confirmation
/// - "error": Exchange-side error report
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WsMessage {
    /// Pong response (no data field, just channel: "pong").
    Pong(PongMessage),
    /// Channel-based message (all other messages with data field).
    Channel(ChannelMessage),
}

/// Channel-based message carrying a data payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelMessage {
    /// Channel identifier (e.g., "allMids", "subscriptionResponse").
    pub channel: String,
    /// Message data (flexible JSON).
    pub data: serde_json::Value,
}

/// Pong response message (Hyperliquid format: {"channel": "pong"}).
/// Uses deny_unknown_fields to distinguish from ChannelMessage in untagged enum.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PongMessage {
    pub channel: String,
}

impl PongMessage {
    pub fn is_pong(&self) -> bool {
        self.channel == "pong"
    }
}

/// Outgoing request to WebSocket.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WsRequest {
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subscription: Option<serde_json::Value>,
}

impl WsRequest {
    /// Create a ping request.
    pub fn ping() -> Self {
        Self {
            method: "ping".to_string(),
            subscription: None,
        }
    }

    /// Create a subscribe request.
    pub fn subscribe(subscription: &Subscription) -> Self {
        Self {
            method: "subscribe".to_string(),
            subscription: Some(subscription.to_json()),
        }
    }

    /// Create an unsubscribe request.
    pub fn unsubscribe(subscription: &Subscription) -> Self {
        Self {
            method: "unsubscribe".to_string(),
            subscription: Some(subscription.to_json()),
        }
    }
}

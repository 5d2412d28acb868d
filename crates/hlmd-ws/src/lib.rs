//! Upstream WebSocket client for the Hyperliquid market-data feed.
//!
//! Provides robust WebSocket connectivity with:
//! - Automatic reconnection with exponential backoff
//! - Subscription registry, re-sent after every reconnect
//! - Heartbeat monitoring (application-level ping, pong timeout detection)
//! - Channel-based message routing

pub mod connection;
pub mod error;
pub mod heartbeat;
pub mod message;
pub mod subscription;

pub use connection::{ConnectionConfig, ConnectionManager, ConnectionState};
pub use error::{WsError, WsResult};
pub use message::{
    extract_subscription_type, ChannelMessage, PongMessage, Subscription, WsMessage, WsRequest,
    ALL_DEXS,
};
pub use subscription::{ChannelState, SubscriptionRegistry};

use std::sync::Once;

static INIT_CRYPTO: Once = Once::new();

/// Initialize the TLS crypto provider.
/// Must be called before any WebSocket connections are made.
pub fn init_crypto() {
    INIT_CRYPTO.call_once(|| {
        let _ = rustls::crypto::ring::default_provider().install_default();
    });
}

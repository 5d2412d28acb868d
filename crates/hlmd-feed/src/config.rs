//! Feed configuration.

use hlmd_core::BackoffConfig;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Subscription manager settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedConfig {
    /// Period of each metadata polling loop.
    #[serde(default = "default_meta_poll_interval_ms")]
    pub meta_poll_interval_ms: u64,
    /// How long `start()` waits for the upstream before subscribing anyway.
    #[serde(default = "default_ready_timeout_ms")]
    pub ready_timeout_ms: u64,
    /// Retry policy for each metadata fetch.
    #[serde(default)]
    pub backoff: BackoffConfig,
}

fn default_meta_poll_interval_ms() -> u64 {
    60_000
}

fn default_ready_timeout_ms() -> u64 {
    10_000
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            meta_poll_interval_ms: default_meta_poll_interval_ms(),
            ready_timeout_ms: default_ready_timeout_ms(),
            backoff: BackoffConfig::default(),
        }
    }
}

impl FeedConfig {
    pub fn meta_poll_interval(&self) -> Duration {
        Duration::from_millis(self.meta_poll_interval_ms.max(1))
    }

    pub fn ready_timeout(&self) -> Duration {
        Duration::from_millis(self.ready_timeout_ms)
    }
}

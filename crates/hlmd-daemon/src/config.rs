//! Daemon configuration.
//!
//! Loaded from TOML. Every field has a default so an empty file, or no file
//! at all, yields a working mainnet configuration.

use crate::artifacts::DaemonPaths;
use crate::error::{DaemonError, DaemonResult};
use hlmd_feed::FeedConfig;
use hlmd_rpc::GatewayConfig;
use hlmd_telemetry::LogConfig;
use hlmd_ws::ConnectionConfig;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// Directory under `$HOME` used when `home_dir` is not set.
pub const DEFAULT_HOME_DIR_NAME: &str = ".hlmd";

/// Exchange environment.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    #[default]
    Mainnet,
    Testnet,
}

impl Network {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Mainnet => "mainnet",
            Self::Testnet => "testnet",
        }
    }

    pub fn ws_url(&self) -> &'static str {
        match self {
            Self::Mainnet => "wss://api.hyperliquid.xyz/ws",
            Self::Testnet => "wss://api.hyperliquid-testnet.xyz/ws",
        }
    }

    pub fn info_url(&self) -> &'static str {
        match self {
            Self::Mainnet => "https://api.hyperliquid.xyz/info",
            Self::Testnet => "https://api.hyperliquid-testnet.xyz/info",
        }
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// WebSocket configuration subset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WsConfig {
    /// Maximum reconnection attempts (0 = infinite).
    pub max_reconnect_attempts: u32,
    /// Base delay for reconnection backoff (ms).
    pub reconnect_base_delay_ms: u64,
    /// Cap on the reconnection delay (ms).
    pub reconnect_max_delay_ms: u64,
    /// Quiet period before a ping is sent (ms).
    pub heartbeat_interval_ms: u64,
    /// Time allowed for the pong (ms).
    pub heartbeat_timeout_ms: u64,
}

impl Default for WsConfig {
    fn default() -> Self {
        let defaults = ConnectionConfig::default();
        Self {
            max_reconnect_attempts: defaults.max_reconnect_attempts,
            reconnect_base_delay_ms: defaults.reconnect_base_delay_ms,
            reconnect_max_delay_ms: defaults.reconnect_max_delay_ms,
            heartbeat_interval_ms: defaults.heartbeat_interval_ms,
            heartbeat_timeout_ms: defaults.heartbeat_timeout_ms,
        }
    }
}

/// Telemetry configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Log level, overridden by `RUST_LOG`.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_log_level() -> String {
    LogConfig::default().level
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

/// Top-level daemon configuration.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DaemonConfig {
    #[serde(default)]
    pub network: Network,
    /// Overrides the network's WebSocket URL.
    #[serde(default)]
    pub ws_url: Option<String>,
    /// Overrides the network's info URL.
    #[serde(default)]
    pub info_url: Option<String>,
    /// Private directory for the socket, PID file and logs.
    #[serde(default)]
    pub home_dir: Option<PathBuf>,
    #[serde(default)]
    pub rpc: GatewayConfig,
    #[serde(default)]
    pub feed: FeedConfig,
    #[serde(default)]
    pub websocket: WsConfig,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

impl DaemonConfig {
    /// Load from `path` if it exists, otherwise use defaults.
    pub fn load(path: &Path) -> DaemonResult<Self> {
        if path.exists() {
            Self::from_file(path)
        } else {
            tracing::warn!(path = %path.display(), "Config file not found, using defaults");
            Ok(Self::default())
        }
    }

    /// Load from a specific file.
    pub fn from_file(path: &Path) -> DaemonResult<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| DaemonError::Config(format!("Failed to read config: {e}")))?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> DaemonResult<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| DaemonError::Config(format!("Failed to parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the runtime cannot work with.
    pub fn validate(&self) -> DaemonResult<()> {
        let jitter = self.feed.backoff.jitter_ratio;
        if !(0.0..=1.0).contains(&jitter) {
            return Err(DaemonError::Config(format!(
                "feed.backoff.jitter_ratio must be between 0 and 1, got {jitter}"
            )));
        }
        if self.websocket.heartbeat_interval_ms == 0 {
            return Err(DaemonError::Config(
                "websocket.heartbeat_interval_ms must be greater than 0".to_string(),
            ));
        }
        if self.websocket.heartbeat_timeout_ms == 0 {
            return Err(DaemonError::Config(
                "websocket.heartbeat_timeout_ms must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }

    pub fn ws_url(&self) -> String {
        self.ws_url
            .clone()
            .unwrap_or_else(|| self.network.ws_url().to_string())
    }

    pub fn info_url(&self) -> String {
        self.info_url
            .clone()
            .unwrap_or_else(|| self.network.info_url().to_string())
    }

    /// Configured home directory, else `~/.hlmd`.
    pub fn home_dir(&self) -> PathBuf {
        self.home_dir.clone().unwrap_or_else(|| {
            dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(DEFAULT_HOME_DIR_NAME)
        })
    }

    pub fn paths(&self) -> DaemonPaths {
        DaemonPaths::new(self.home_dir())
    }

    pub fn log_config(&self) -> LogConfig {
        LogConfig {
            level: self.telemetry.log_level.clone(),
            log_dir: Some(self.paths().log_dir),
        }
    }

    pub fn connection_config(&self) -> ConnectionConfig {
        ConnectionConfig {
            url: self.ws_url(),
            max_reconnect_attempts: self.websocket.max_reconnect_attempts,
            reconnect_base_delay_ms: self.websocket.reconnect_base_delay_ms,
            reconnect_max_delay_ms: self.websocket.reconnect_max_delay_ms,
            heartbeat_interval_ms: self.websocket.heartbeat_interval_ms,
            heartbeat_timeout_ms: self.websocket.heartbeat_timeout_ms,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = DaemonConfig::from_toml("").unwrap();
        assert_eq!(config, DaemonConfig::default());
        assert_eq!(config.network, Network::Mainnet);
        assert_eq!(config.ws_url(), "wss://api.hyperliquid.xyz/ws");
        assert_eq!(config.rpc.rate_limit, 100);
        assert_eq!(config.rpc.rate_window_ms, 1_000);
        assert_eq!(config.rpc.shutdown_delay_ms, 100);
        assert_eq!(config.feed.meta_poll_interval_ms, 60_000);
        assert!(config.home_dir().ends_with(DEFAULT_HOME_DIR_NAME));
    }

    #[test]
    fn test_partial_sections() {
        let config = DaemonConfig::from_toml(
            r#"
            network = "testnet"
            home_dir = "/tmp/hlmd-test"

            [rpc]
            rate_limit = 5

            [feed]
            meta_poll_interval_ms = 30000

            [feed.backoff]
            max_attempts = 5

            [websocket]
            heartbeat_interval_ms = 20000
            "#,
        )
        .unwrap();

        assert_eq!(config.network, Network::Testnet);
        assert_eq!(config.info_url(), "https://api.hyperliquid-testnet.xyz/info");
        assert_eq!(config.rpc.rate_limit, 5);
        assert_eq!(config.rpc.rate_window_ms, 1_000);
        assert_eq!(config.feed.meta_poll_interval_ms, 30_000);
        assert_eq!(config.feed.backoff.max_attempts, 5);

        let ws = config.connection_config();
        assert_eq!(ws.url, "wss://api.hyperliquid-testnet.xyz/ws");
        assert_eq!(ws.heartbeat_interval_ms, 20_000);
        assert_eq!(ws.reconnect_base_delay_ms, 1_000);

        let paths = config.paths();
        assert_eq!(paths.socket, PathBuf::from("/tmp/hlmd-test/daemon.sock"));
        assert_eq!(config.log_config().log_dir, Some(PathBuf::from("/tmp/hlmd-test/logs")));
    }

    #[test]
    fn test_url_overrides() {
        let config = DaemonConfig::from_toml(
            r#"
            ws_url = "ws://127.0.0.1:9000"
            info_url = "http://127.0.0.1:9001/info"
            "#,
        )
        .unwrap();
        assert_eq!(config.ws_url(), "ws://127.0.0.1:9000");
        assert_eq!(config.info_url(), "http://127.0.0.1:9001/info");
    }

    #[test]
    fn test_invalid_network_is_rejected() {
        let err = DaemonConfig::from_toml(r#"network = "devnet""#).unwrap_err();
        assert!(err.to_string().contains("Failed to parse config"));
    }

    #[test]
    fn test_out_of_range_values_are_rejected() {
        for (input, field) in [
            ("[feed.backoff]\njitter_ratio = 1.5", "jitter_ratio"),
            ("[feed.backoff]\njitter_ratio = -0.1", "jitter_ratio"),
            ("[feed.backoff]\njitter_ratio = nan", "jitter_ratio"),
            ("[feed.backoff]\njitter_ratio = inf", "jitter_ratio"),
            ("[websocket]\nheartbeat_interval_ms = 0", "heartbeat_interval_ms"),
            ("[websocket]\nheartbeat_timeout_ms = 0", "heartbeat_timeout_ms"),
        ] {
            let err = DaemonConfig::from_toml(input).unwrap_err();
            assert!(matches!(err, DaemonError::Config(_)), "{input}");
            assert!(err.to_string().contains(field), "{input}: {err}");
        }

        let config = DaemonConfig::from_toml("[feed.backoff]\njitter_ratio = 1.0").unwrap();
        assert_eq!(config.feed.backoff.jitter_ratio, 1.0);
    }
}

//! Local Hyperliquid market-data daemon.
//!
//! Keeps one upstream market-data connection alive, caches what it streams
//! and serves it to local processes over a Unix socket:
//! - [`config`]: TOML configuration
//! - [`artifacts`]: PID lock, runtime config and socket paths
//! - [`app`]: bootstrap and ordered shutdown

pub mod app;
pub mod artifacts;
pub mod config;
pub mod error;

pub use app::Daemon;
pub use artifacts::{DaemonPaths, ProcessArtifacts, RuntimeConfig};
pub use config::{DaemonConfig, Network, TelemetryConfig, WsConfig};
pub use error::{DaemonError, DaemonResult};

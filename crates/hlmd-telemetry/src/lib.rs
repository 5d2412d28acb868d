//! Metrics and structured logging for hlmd.
//!
//! - [`MetricsRegistry`]: request counters and latency totals served by `getMetrics`
//! - Prometheus collectors mirroring upstream and RPC health
//! - Console and file logging via tracing

pub mod error;
pub mod logging;
pub mod metrics;
pub mod registry;

pub use error::{TelemetryError, TelemetryResult};
pub use logging::{init_logging, LogConfig};
pub use metrics::Metrics;
pub use registry::{MetricsRegistry, MetricsSnapshot};

//! Prometheus collectors for hlmd.
//!
//! These mirror the in-process [`MetricsRegistry`](crate::MetricsRegistry) for
//! scraping tools. The registry stays the source of truth for `getMetrics`.
//!
//! # Panics
//!
//! Metric registration uses `unwrap()`. A failure means duplicate metric
//! names, which is a programming error caught at first use during startup.

use crate::error::{TelemetryError, TelemetryResult};
use once_cell::sync::Lazy;
use prometheus::{
    register_counter_vec, register_gauge, register_histogram_vec, CounterVec, Encoder, Gauge,
    HistogramVec, TextEncoder,
};

/// WebSocket connection state (1 = connected, 0 = disconnected).
pub static WS_CONNECTED: Lazy<Gauge> = Lazy::new(|| {
    register_gauge!(
        "hlmd_ws_connected",
        "Upstream WebSocket connection state (1=connected)"
    )
    .unwrap()
});

/// Total WebSocket reconnection attempts.
pub static WS_RECONNECT_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "hlmd_ws_reconnect_total",
        "Total upstream WebSocket reconnection attempts",
        &["reason"]
    )
    .unwrap()
});

/// RPC requests by method and outcome.
/// Labels: method, status (ok/error/rate_limited/unauthorized/invalid)
pub static RPC_REQUESTS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "hlmd_rpc_requests_total",
        "Total RPC requests handled",
        &["method", "status"]
    )
    .unwrap()
});

/// RPC handling latency in milliseconds.
pub static RPC_LATENCY_MS: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "hlmd_rpc_latency_ms",
        "RPC handling latency in milliseconds",
        &["method"],
        vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 25.0, 100.0]
    )
    .unwrap()
});

/// Cache replacements by shape.
pub static CACHE_UPDATES_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "hlmd_cache_updates_total",
        "Total market cache replacements",
        &["shape"]
    )
    .unwrap()
});

/// Metadata poll cycles that failed after all retries.
pub static META_POLL_FAILURES_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "hlmd_meta_poll_failures_total",
        "Total metadata poll cycles that exhausted retries",
        &["kind"]
    )
    .unwrap()
});

/// Metrics facade for easy access.
pub struct Metrics;

impl Metrics {
    /// Record WebSocket connected.
    pub fn ws_connected() {
        WS_CONNECTED.set(1.0);
    }

    /// Record WebSocket disconnected.
    pub fn ws_disconnected() {
        WS_CONNECTED.set(0.0);
    }

    /// Record WebSocket reconnection.
    pub fn ws_reconnect(reason: &str) {
        WS_RECONNECT_TOTAL.with_label_values(&[reason]).inc();
    }

    /// Record one handled RPC request.
    pub fn rpc_request(method: &str, status: &str, latency_ms: f64) {
        RPC_REQUESTS_TOTAL
            .with_label_values(&[method, status])
            .inc();
        RPC_LATENCY_MS
            .with_label_values(&[method])
            .observe(latency_ms);
    }

    /// Record a cache replacement.
    pub fn cache_update(shape: &str) {
        CACHE_UPDATES_TOTAL.with_label_values(&[shape]).inc();
    }

    /// Record a metadata poll cycle that gave up.
    pub fn meta_poll_failure(kind: &str) {
        META_POLL_FAILURES_TOTAL.with_label_values(&[kind]).inc();
    }

    /// Render every registered collector in the Prometheus text format.
    pub fn render() -> TelemetryResult<String> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder
            .encode(&prometheus::gather(), &mut buffer)
            .map_err(|e| TelemetryError::Metrics(e.to_string()))?;
        String::from_utf8(buffer).map_err(|e| TelemetryError::Metrics(e.to_string()))
    }
}

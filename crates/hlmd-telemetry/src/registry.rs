//! In-process request counters and latency totals.
//!
//! Counter keys are a metric name plus its labels rendered in sorted label
//! order, e.g. `rpc_requests_total{method=ping,status=ok}`. Two increments with
//! the same label set always land on the same key regardless of argument order.

use parking_lot::Mutex;
use serde::Serialize;
use std::collections::BTreeMap;

/// Point-in-time copy of every counter and latency total.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
    pub counters: BTreeMap<String, u64>,
    /// Cumulative handling time per method, in milliseconds.
    pub latency_ms: BTreeMap<String, f64>,
}

#[derive(Debug, Default)]
struct Inner {
    counters: BTreeMap<String, u64>,
    latency_ms: BTreeMap<String, f64>,
}

/// Thread-safe metrics registry shared by the gateway and the daemon.
#[derive(Debug, Default)]
pub struct MetricsRegistry {
    inner: Mutex<Inner>,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one to the counter identified by `name` and `labels`.
    pub fn increment(&self, name: &str, labels: &[(&str, &str)]) {
        let key = counter_key(name, labels);
        *self.inner.lock().counters.entry(key).or_insert(0) += 1;
    }

    /// Add `elapsed_ms` to the latency total for `method`.
    pub fn observe_latency(&self, method: &str, elapsed_ms: f64) {
        *self
            .inner
            .lock()
            .latency_ms
            .entry(method.to_string())
            .or_insert(0.0) += elapsed_ms;
    }

    /// Current value of one counter (0 when never incremented).
    pub fn counter(&self, name: &str, labels: &[(&str, &str)]) -> u64 {
        let key = counter_key(name, labels);
        self.inner.lock().counters.get(&key).copied().unwrap_or(0)
    }

    /// Copy of the whole registry. Later updates do not affect it.
    pub fn snapshot(&self) -> MetricsSnapshot {
        let inner = self.inner.lock();
        MetricsSnapshot {
            counters: inner.counters.clone(),
            latency_ms: inner.latency_ms.clone(),
        }
    }
}

fn counter_key(name: &str, labels: &[(&str, &str)]) -> String {
    if labels.is_empty() {
        return name.to_string();
    }
    let mut sorted: Vec<_> = labels.to_vec();
    sorted.sort_by(|a, b| a.0.cmp(b.0));
    let rendered: Vec<String> = sorted.iter().map(|(k, v)| format!("{k}={v}")).collect();
    format!("{name}{{{}}}", rendered.join(","))
}

//! Fixed-window request throttle.
//!
//! Each key (`clientId:method`) gets a window of `window_ms` starting at its
//! first request. Up to `limit` requests are allowed inside the window; the
//! first request at or after `reset_at` opens a fresh window. A client can
//! therefore burst up to `2 * limit` requests around a window boundary.

use dashmap::DashMap;
use tracing::debug;

#[derive(Debug, Clone, Copy)]
struct Window {
    count: u32,
    /// Milliseconds since Unix epoch.
    reset_at: u64,
}

/// Fixed-window rate limiter keyed by arbitrary strings.
#[derive(Debug)]
pub struct FixedWindowLimiter {
    limit: u32,
    window_ms: u64,
    windows: DashMap<String, Window>,
}

impl FixedWindowLimiter {
    pub fn new(limit: u32, window_ms: u64) -> Self {
        Self {
            limit,
            window_ms,
            windows: DashMap::new(),
        }
    }

    /// Count one request for `key` at `now_ms` and report whether it is allowed.
    pub fn allow(&self, key: &str, now_ms: u64) -> bool {
        let mut window = self.windows.entry(key.to_string()).or_insert(Window {
            count: 0,
            reset_at: 0,
        });

        if now_ms >= window.reset_at {
            *window = Window {
                count: 1,
                reset_at: now_ms.saturating_add(self.window_ms),
            };
            return true;
        }

        if window.count < self.limit {
            window.count += 1;
            true
        } else {
            debug!(key, reset_at = window.reset_at, "Rate limit hit");
            false
        }
    }

    /// Drop windows that have already expired.
    pub fn prune(&self, now_ms: u64) -> usize {
        let before = self.windows.len();
        self.windows.retain(|_, window| window.reset_at > now_ms);
        before - self.windows.len()
    }
}

//! Exponential backoff with jitter.
//!
//! `with_backoff` retries any fallible async operation. The delay before retry
//! `n` (1-based) is `min(max_delay, base_delay * 2^(n-1))` plus a random jitter
//! of up to `jitter_ratio` of that value. After `max_attempts` the last error is
//! returned unchanged.
//!
//! The helper holds no shared state, so it is safe to use from any task.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Retry policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackoffConfig {
    /// Total attempts including the first call (0 is treated as 1).
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Delay before the first retry.
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    /// Cap on the un-jittered delay.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Upper bound of the random jitter as a fraction of the delay.
    #[serde(default = "default_jitter_ratio")]
    pub jitter_ratio: f64,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    500
}

fn default_max_delay_ms() -> u64 {
    5_000
}

fn default_jitter_ratio() -> f64 {
    0.2
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            jitter_ratio: default_jitter_ratio(),
        }
    }
}

impl BackoffConfig {
    /// Un-jittered delay before retry `attempt` (1-based).
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(32);
        let delay = self
            .base_delay_ms
            .saturating_mul(1u64 << exponent)
            .min(self.max_delay_ms);
        Duration::from_millis(delay)
    }

    /// `jitter_ratio` clamped to `[0, 1]`; NaN and infinities count as 0.
    pub fn effective_jitter_ratio(&self) -> f64 {
        if self.jitter_ratio.is_finite() {
            self.jitter_ratio.clamp(0.0, 1.0)
        } else {
            0.0
        }
    }

    /// Delay before retry `attempt` including random jitter.
    pub fn jittered_delay(&self, attempt: u32) -> Duration {
        let base = self.base_delay(attempt);
        let ratio = self.effective_jitter_ratio();
        if ratio == 0.0 || base.is_zero() {
            return base;
        }
        let factor = rand::thread_rng().gen_range(0.0..=ratio);
        base.saturating_add(base.mul_f64(factor))
    }
}

/// Run `operation`, retrying on error according to `config`.
pub async fn with_backoff<T, E, F, Fut>(config: &BackoffConfig, mut operation: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    let max_attempts = config.max_attempts.max(1);
    let mut attempt = 1u32;

    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(e) if attempt >= max_attempts => return Err(e),
            Err(e) => {
                let delay = config.jittered_delay(attempt);
                warn!(
                    attempt,
                    max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Operation failed, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use tokio::time::Instant;

    fn no_jitter(max_attempts: u32, base: u64, max: u64) -> BackoffConfig {
        BackoffConfig {
            max_attempts,
            base_delay_ms: base,
            max_delay_ms: max,
            jitter_ratio: 0.0,
        }
    }

    #[test]
    fn test_base_delay_doubles_and_caps() {
        let config = no_jitter(10, 100, 1_000);
        assert_eq!(config.base_delay(1), Duration::from_millis(100));
        assert_eq!(config.base_delay(2), Duration::from_millis(200));
        assert_eq!(config.base_delay(3), Duration::from_millis(400));
        assert_eq!(config.base_delay(4), Duration::from_millis(800));
        assert_eq!(config.base_delay(5), Duration::from_millis(1_000));
        assert_eq!(config.base_delay(60), Duration::from_millis(1_000));
    }

    #[test]
    fn test_jitter_stays_within_ratio() {
        let config = BackoffConfig {
            jitter_ratio: 0.5,
            ..no_jitter(3, 200, 10_000)
        };
        for _ in 0..100 {
            let delay = config.jittered_delay(2);
            assert!(delay >= Duration::from_millis(400));
            assert!(delay <= Duration::from_millis(600));
        }
    }

    #[test]
    fn test_out_of_range_jitter_is_clamped() {
        for ratio in [f64::NAN, f64::INFINITY, f64::NEG_INFINITY, -0.5] {
            let config = BackoffConfig {
                jitter_ratio: ratio,
                ..no_jitter(3, 200, 10_000)
            };
            assert_eq!(config.effective_jitter_ratio(), 0.0);
            assert_eq!(config.jittered_delay(1), Duration::from_millis(200));
        }

        let config = BackoffConfig {
            jitter_ratio: 7.0,
            ..no_jitter(3, 200, 10_000)
        };
        assert_eq!(config.effective_jitter_ratio(), 1.0);
        for _ in 0..100 {
            assert!(config.jittered_delay(1) <= Duration::from_millis(400));
        }
    }

    #[test]
    fn test_huge_delays_do_not_overflow() {
        let config = BackoffConfig {
            jitter_ratio: 1.0,
            ..no_jitter(100, u64::MAX, u64::MAX)
        };
        let delay = config.jittered_delay(64);
        assert!(delay >= Duration::from_millis(u64::MAX));
    }

    #[tokio::test(start_paused = true)]
    async fn test_succeeds_without_retry() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result: Result<u32, String> = with_backoff(&no_jitter(3, 100, 1_000), move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(7)
        })
        .await;

        assert_eq!(result, Ok(7));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_until_success() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let result: Result<&str, String> = with_backoff(&no_jitter(5, 100, 1_000), move || {
            let counter = counter.clone();
            async move {
                if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err("transient".to_string())
                } else {
                    Ok("done")
                }
            }
        })
        .await;

        assert_eq!(result, Ok("done"));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_persistent_failure_exhausts_attempts() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let start = Instant::now();

        let result: Result<(), String> = with_backoff(&no_jitter(4, 100, 300), move || async move {
            let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
            Err(format!("failure #{n}"))
        })
        .await;

        // Last error propagates unchanged.
        assert_eq!(result, Err("failure #4".to_string()));
        assert_eq!(calls.load(Ordering::SeqCst), 4);

        // 100 + 200 + min(400, 300)
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(600), "{elapsed:?}");
        assert!(elapsed < Duration::from_millis(650), "{elapsed:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_attempts_runs_once() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result: Result<(), &str> = with_backoff(&no_jitter(0, 100, 1_000), move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Err("nope")
        })
        .await;

        assert_eq!(result, Err("nope"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}

//! Heartbeat tracking for the upstream connection.
//!
//! The exchange closes idle sockets, so the connection sends an
//! application-level ping whenever nothing has arrived for `interval`, and
//! treats a pong missing for longer than `timeout` as a dead connection.

use parking_lot::Mutex;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// Shortest pause between heartbeat checks.
const MIN_CHECK_PERIOD: Duration = Duration::from_millis(10);

#[derive(Debug)]
struct State {
    last_message: Instant,
    ping_sent_at: Option<Instant>,
}

/// Heartbeat manager for one connection at a time.
#[derive(Debug)]
pub struct HeartbeatManager {
    interval: Duration,
    timeout: Duration,
    state: Mutex<State>,
}

impl HeartbeatManager {
    pub fn new(interval_ms: u64, timeout_ms: u64) -> Self {
        Self {
            interval: Duration::from_millis(interval_ms),
            timeout: Duration::from_millis(timeout_ms),
            state: Mutex::new(State {
                last_message: Instant::now(),
                ping_sent_at: None,
            }),
        }
    }

    /// Reset on every new connection.
    pub fn reset(&self) {
        let mut state = self.state.lock();
        state.last_message = Instant::now();
        state.ping_sent_at = None;
    }

    pub fn record_ping(&self) {
        self.state.lock().ping_sent_at = Some(Instant::now());
    }

    pub fn record_pong(&self) {
        let mut state = self.state.lock();
        if let Some(sent) = state.ping_sent_at.take() {
            debug!(rtt_ms = sent.elapsed().as_millis() as u64, "Received pong");
        }
        state.last_message = Instant::now();
    }

    /// Any inbound frame counts as liveness.
    pub fn record_message(&self) {
        self.state.lock().last_message = Instant::now();
    }

    /// A ping is outstanding for longer than the timeout.
    pub fn is_timed_out(&self) -> bool {
        self.state
            .lock()
            .ping_sent_at
            .is_some_and(|sent| sent.elapsed() > self.timeout)
    }

    /// Quiet for a full interval and no ping outstanding.
    pub fn should_send_heartbeat(&self) -> bool {
        let state = self.state.lock();
        state.ping_sent_at.is_none() && state.last_message.elapsed() >= self.interval
    }

    /// Half the interval, never below [`MIN_CHECK_PERIOD`].
    pub fn check_period(&self) -> Duration {
        (self.interval / 2).max(MIN_CHECK_PERIOD)
    }

    /// Wait for the next heartbeat check.
    pub async fn wait_for_check(&self) {
        tokio::time::sleep(self.check_period()).await;
    }
}

//! WebSocket connection manager.
//!
//! Handles connection lifecycle, automatic reconnection with exponential backoff,
//! and subscription restoration after reconnection.

use crate::error::{WsError, WsResult};
use crate::heartbeat::HeartbeatManager;
use crate::message::{extract_subscription_type, Subscription, WsMessage, WsRequest};
use crate::subscription::SubscriptionRegistry;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use hlmd_core::BackoffConfig;
use hlmd_telemetry::Metrics;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch, Mutex as TokioMutex};
use tokio::time::Instant;
use tokio_tungstenite::{
    connect_async_tls_with_config, tungstenite::Message, MaybeTlsStream, WebSocketStream,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;
type WsSource = SplitStream<WsStream>;

/// Pause after each subscribe so responses are drained between sends.
const SUBSCRIBE_SPACING_MS: u64 = 100;

/// Connection configuration.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// WebSocket URL.
    pub url: String,
    /// Maximum reconnection attempts (0 = infinite).
    pub max_reconnect_attempts: u32,
    /// Base delay for exponential backoff.
    pub reconnect_base_delay_ms: u64,
    /// Maximum delay for exponential backoff.
    pub reconnect_max_delay_ms: u64,
    /// Heartbeat interval.
    pub heartbeat_interval_ms: u64,
    /// Heartbeat timeout (pong must arrive within this).
    pub heartbeat_timeout_ms: u64,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            max_reconnect_attempts: 0, // Infinite
            reconnect_base_delay_ms: 1000,
            reconnect_max_delay_ms: 60000,
            heartbeat_interval_ms: 45000,
            heartbeat_timeout_ms: 10000,
        }
    }
}

impl ConnectionConfig {
    fn backoff(&self) -> BackoffConfig {
        BackoffConfig {
            max_attempts: self.max_reconnect_attempts,
            base_delay_ms: self.reconnect_base_delay_ms,
            max_delay_ms: self.reconnect_max_delay_ms,
            jitter_ratio: 0.2,
        }
    }
}

/// Connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

/// Work queued for the connection task.
#[derive(Debug)]
enum Outbound {
    /// Send whatever the registry has not yet sent on this connection.
    Sync,
    /// Raw text frame.
    Text(String),
}

/// WebSocket connection manager.
///
/// `connect()` runs the connection for its whole life (including reconnects)
/// and is meant to be spawned on its own task. Every other method may be
/// called concurrently from any task.
pub struct ConnectionManager {
    config: ConnectionConfig,
    state: watch::Sender<ConnectionState>,
    subscriptions: Arc<SubscriptionRegistry>,
    heartbeat: HeartbeatManager,
    message_tx: mpsc::Sender<WsMessage>,
    reconnect_count: AtomicU32,
    /// Incremented on every successful connect.
    generation: AtomicU64,
    outbound_tx: mpsc::Sender<Outbound>,
    outbound_rx: TokioMutex<mpsc::Receiver<Outbound>>,
    shutdown_token: CancellationToken,
}

impl ConnectionManager {
    /// Create a new connection manager. Data messages are forwarded to `message_tx`.
    pub fn new(config: ConnectionConfig, message_tx: mpsc::Sender<WsMessage>) -> Self {
        let (outbound_tx, outbound_rx) = mpsc::channel(100);
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        let heartbeat =
            HeartbeatManager::new(config.heartbeat_interval_ms, config.heartbeat_timeout_ms);
        Self {
            config,
            state,
            subscriptions: Arc::new(SubscriptionRegistry::new()),
            heartbeat,
            message_tx,
            reconnect_count: AtomicU32::new(0),
            generation: AtomicU64::new(0),
            outbound_tx,
            outbound_rx: TokioMutex::new(outbound_rx),
            shutdown_token: CancellationToken::new(),
        }
    }

    /// Get current connection state.
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Consecutive failed connection attempts since the last success.
    pub fn reconnect_count(&self) -> u32 {
        self.reconnect_count.load(Ordering::Relaxed)
    }

    pub fn subscriptions(&self) -> Arc<SubscriptionRegistry> {
        self.subscriptions.clone()
    }

    /// Wait until the transport is connected.
    pub async fn wait_connected(&self, timeout: Duration) -> WsResult<()> {
        let mut rx = self.state.subscribe();
        let connected = tokio::time::timeout(timeout, async {
            rx.wait_for(|state| *state == ConnectionState::Connected)
                .await
                .map(|_| ())
        })
        .await;

        match connected {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => Err(WsError::NotReady("state channel closed".to_string())),
            Err(_) => Err(WsError::NotReady(format!(
                "not connected after {}ms",
                timeout.as_millis()
            ))),
        }
    }

    /// Register a subscription.
    ///
    /// It is sent immediately when connected, otherwise as soon as the next
    /// connection is established, and again after every reconnect.
    pub fn subscribe(&self, subscription: Subscription) {
        info!(channel = subscription.channel(), "Subscribing");
        self.subscriptions.add(subscription);
        // A full queue already holds work that triggers a sync.
        let _ = self.outbound_tx.try_send(Outbound::Sync);
    }

    /// Drop a subscription and tell the exchange.
    ///
    /// The registry entry is removed even when the request cannot be sent.
    pub async fn unsubscribe(&self, channel: &str) -> WsResult<()> {
        let subscription = self
            .subscriptions
            .remove(channel)
            .ok_or_else(|| WsError::NotReady(format!("not subscribed: {channel}")))?;

        if !self.is_connected() {
            return Err(WsError::NotConnected);
        }

        let text = serde_json::to_string(&WsRequest::unsubscribe(&subscription))?;
        self.outbound_tx
            .send(Outbound::Text(text))
            .await
            .map_err(|e| WsError::SendFailed(e.to_string()))?;
        info!(channel, "Unsubscribe queued");
        Ok(())
    }

    /// Signal graceful shutdown.
    ///
    /// Cancels the shutdown token, which will cause both the message loop
    /// and reconnect loop to exit promptly. Queued outbound frames are
    /// flushed before the close frame.
    pub fn shutdown(&self) {
        info!("ConnectionManager shutdown requested");
        self.shutdown_token.cancel();
    }

    /// Check if shutdown has been requested.
    pub fn is_shutdown(&self) -> bool {
        self.shutdown_token.is_cancelled()
    }

    /// Connect to WebSocket and run message loop until shutdown.
    pub async fn connect(&self) -> WsResult<()> {
        let backoff = self.config.backoff();

        loop {
            if self.is_shutdown() {
                info!("Shutdown requested, exiting connect loop");
                self.set_state(ConnectionState::Disconnected);
                return Ok(());
            }

            self.set_state(ConnectionState::Connecting);

            let reason = match self.try_connect().await {
                Ok(()) => {
                    info!("WebSocket connection closed");
                    "stream_end"
                }
                Err(WsError::HeartbeatTimeout) => "heartbeat_timeout",
                Err(WsError::ConnectionClosed { .. }) => "server_close",
                Err(e) => {
                    error!(error = %e, "WebSocket connection error");
                    "error"
                }
            };

            if self.is_shutdown() {
                info!("Shutdown requested after disconnect, not reconnecting");
                self.set_state(ConnectionState::Disconnected);
                return Ok(());
            }

            let attempt = self.reconnect_count.fetch_add(1, Ordering::Relaxed) + 1;
            if backoff.max_attempts > 0 && attempt >= backoff.max_attempts {
                error!(attempt, "Max reconnection attempts reached");
                self.set_state(ConnectionState::Disconnected);
                return Err(WsError::ConnectionFailed(
                    "Max reconnection attempts reached".to_string(),
                ));
            }

            self.set_state(ConnectionState::Reconnecting);
            Metrics::ws_reconnect(reason);

            let delay = backoff.jittered_delay(attempt);
            warn!(attempt, reason, delay_ms = delay.as_millis() as u64, "Reconnecting");

            tokio::select! {
                () = tokio::time::sleep(delay) => {}
                () = self.shutdown_token.cancelled() => {
                    info!("Shutdown requested during backoff, exiting");
                    self.set_state(ConnectionState::Disconnected);
                    return Ok(());
                }
            }
        }
    }

    fn set_state(&self, state: ConnectionState) {
        self.state.send_replace(state);
    }

    async fn try_connect(&self) -> WsResult<()> {
        info!(url = %self.config.url, "Connecting to WebSocket");

        let connecting = connect_async_tls_with_config(&self.config.url, None, true, None);
        let (ws_stream, _response) = tokio::select! {
            result = connecting => result?,
            () = self.shutdown_token.cancelled() => return Ok(()),
        };
        let (mut write, mut read) = ws_stream.split();

        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.reconnect_count.store(0, Ordering::Relaxed);
        self.subscriptions.reset_ready_state();
        self.heartbeat.reset();
        self.set_state(ConnectionState::Connected);
        Metrics::ws_connected();
        info!(generation, "WebSocket connected");

        let mut outbound_rx = self.outbound_rx.lock().await;
        let result = self
            .message_loop(&mut write, &mut read, &mut outbound_rx, generation)
            .await;

        Metrics::ws_disconnected();
        result
    }

    async fn message_loop(
        &self,
        write: &mut WsSink,
        read: &mut WsSource,
        outbound_rx: &mut mpsc::Receiver<Outbound>,
        generation: u64,
    ) -> WsResult<()> {
        // Restore subscriptions
        self.send_pending(write, read, generation).await?;

        loop {
            tokio::select! {
                () = self.shutdown_token.cancelled() => {
                    info!("Shutdown signal received in message loop");
                    self.flush_outbound(write, outbound_rx).await;
                    if let Err(e) = write.send(Message::Close(None)).await {
                        warn!(error = %e, "Failed to send Close frame during shutdown");
                    }
                    self.set_state(ConnectionState::Disconnected);
                    return Ok(());
                }

                msg = read.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            self.handle_text_message(&text).await;
                        }
                        Some(Ok(Message::Ping(data))) => {
                            debug!("Received ping, sending pong");
                            write.send(Message::Pong(data)).await?;
                        }
                        Some(Ok(Message::Pong(_))) => {
                            self.heartbeat.record_pong();
                        }
                        Some(Ok(Message::Close(frame))) => {
                            let (code, reason) = frame
                                .map(|f| (f.code.into(), f.reason.to_string()))
                                .unwrap_or((1000, "Normal close".to_string()));
                            warn!(code, %reason, "WebSocket closed by server");
                            return Err(WsError::ConnectionClosed { code, reason });
                        }
                        Some(Err(e)) => {
                            error!(error = %e, "WebSocket read error");
                            return Err(e.into());
                        }
                        None => {
                            warn!("WebSocket stream ended");
                            return Ok(());
                        }
                        _ => {}
                    }
                }

                outbound = outbound_rx.recv() => {
                    if let Some(Outbound::Text(text)) = outbound {
                        write.send(Message::Text(text)).await?;
                    }
                    self.send_pending(write, read, generation).await?;
                }

                _ = self.heartbeat.wait_for_check() => {
                    if self.heartbeat.is_timed_out() {
                        error!("Heartbeat timeout");
                        return Err(WsError::HeartbeatTimeout);
                    }

                    if self.heartbeat.should_send_heartbeat() {
                        let msg = serde_json::to_string(&WsRequest::ping())?;
                        write.send(Message::Text(msg)).await?;
                        self.heartbeat.record_ping();
                        debug!("Sent heartbeat ping");
                    }
                }
            }
        }
    }

    /// Send registry entries not yet sent on this connection.
    async fn send_pending(
        &self,
        write: &mut WsSink,
        read: &mut WsSource,
        generation: u64,
    ) -> WsResult<()> {
        let pending = self.subscriptions.pending(generation);
        if pending.is_empty() {
            return Ok(());
        }
        info!(count = pending.len(), generation, "Sending subscriptions");

        for subscription in pending {
            let text = serde_json::to_string(&WsRequest::subscribe(&subscription))?;
            write.send(Message::Text(text)).await?;
            self.subscriptions
                .mark_sent(subscription.channel(), generation);
            debug!(channel = subscription.channel(), "Subscribe sent");

            self.drain_and_wait(write, read, SUBSCRIBE_SPACING_MS).await?;
        }

        Ok(())
    }

    /// Write every queued text frame without waiting for more.
    async fn flush_outbound(&self, write: &mut WsSink, outbound_rx: &mut mpsc::Receiver<Outbound>) {
        while let Ok(outbound) = outbound_rx.try_recv() {
            if let Outbound::Text(text) = outbound {
                if let Err(e) = write.send(Message::Text(text)).await {
                    warn!(error = %e, "Failed to flush outbound frame");
                    return;
                }
            }
        }
    }

    async fn handle_text_message(&self, text: &str) {
        self.heartbeat.record_message();

        // The exchange greets new sockets with a plain-text line.
        let msg: WsMessage = match serde_json::from_str(text) {
            Ok(msg) => msg,
            Err(e) => {
                debug!(error = %e, frame = %text, "Ignoring non-JSON frame");
                return;
            }
        };

        match &msg {
            WsMessage::Pong(pong) => {
                if pong.is_pong() {
                    self.heartbeat.record_pong();
                }
                return;
            }
            WsMessage::Channel(channel_msg) => {
                if channel_msg.channel == "subscriptionResponse" {
                    process_subscription_response(&channel_msg.data, &self.subscriptions);
                    return;
                }

                if channel_msg.channel == "error" {
                    warn!(data = %channel_msg.data, "Received error channel message");
                }

                self.subscriptions.handle_message(&channel_msg.channel);
            }
        }

        if self.message_tx.send(msg).await.is_err() {
            warn!("Message receiver dropped");
        }
    }

    /// Drain pending messages and wait for a short duration.
    /// This prevents buffer overflow by reading responses between sends.
    async fn drain_and_wait(
        &self,
        write: &mut WsSink,
        read: &mut WsSource,
        wait_ms: u64,
    ) -> WsResult<()> {
        let drain_timeout = Duration::from_millis(wait_ms);
        let drain_start = Instant::now();

        loop {
            let remaining = drain_timeout.saturating_sub(drain_start.elapsed());
            if remaining.is_zero() {
                break;
            }

            tokio::select! {
                msg = read.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            self.handle_text_message(&text).await;
                        }
                        Some(Ok(Message::Ping(data))) => {
                            write.send(Message::Pong(data)).await?;
                        }
                        Some(Ok(Message::Close(frame))) => {
                            let (code, reason) = frame
                                .map(|f| (f.code.into(), f.reason.to_string()))
                                .unwrap_or((1000, "Close during subscription".to_string()));
                            warn!(code, %reason, "WebSocket closed during subscription");
                            return Err(WsError::ConnectionClosed { code, reason });
                        }
                        Some(Err(e)) => {
                            error!(error = %e, "Error during subscription drain");
                            return Err(e.into());
                        }
                        None => {
                            return Err(WsError::ConnectionClosed {
                                code: 1006,
                                reason: "Stream ended during subscription".to_string(),
                            });
                        }
                        _ => {}
                    }
                }
                _ = tokio::time::sleep(remaining) => break,
                () = self.shutdown_token.cancelled() => break,
            }
        }

        Ok(())
    }
}

/// Mark a subscription acknowledged. Returns `true` for subscribe ACKs.
fn process_subscription_response(
    data: &serde_json::Value,
    subscriptions: &SubscriptionRegistry,
) -> bool {
    let is_subscribe = data
        .get("method")
        .and_then(|v| v.as_str())
        .is_some_and(|m| m == "subscribe");
    if !is_subscribe {
        return false;
    }

    match extract_subscription_type(data) {
        Some(kind) => {
            subscriptions.mark_acked(kind);
            true
        }
        None => false,
    }
}

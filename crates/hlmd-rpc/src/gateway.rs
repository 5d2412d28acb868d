//! Request gateway.
//!
//! Every decoded request passes through the same steps, stopping at the first
//! failure:
//!
//! 1. rate check, keyed by `clientId:method`
//! 2. auth check, for methods that require a session token
//! 3. param validation into a [`MethodCall`]
//! 4. routing to the handler
//!
//! The outcome is then counted, timed, logged and returned with a fresh
//! trace id, whatever it was.

use crate::error::{RpcError, RpcResult};
use crate::orders::OrderBook;
use crate::protocol::{DecodeError, Method, MethodCall, MetricsFormat, RpcRequest, RpcResponse};
use crate::rate_limiter::FixedWindowLimiter;
use crate::session::SessionTable;
use hlmd_core::{Clock, MarketCache, SystemClock, UpstreamProbe};
use hlmd_telemetry::{Metrics, MetricsRegistry};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Counter name for every handled or rejected request.
pub const REQUESTS_COUNTER: &str = "rpc_requests_total";

fn default_rate_limit() -> u32 {
    100
}

fn default_rate_window_ms() -> u64 {
    1_000
}

fn default_shutdown_delay_ms() -> u64 {
    100
}

/// Gateway tunables.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Requests allowed per client and method in one window.
    #[serde(default = "default_rate_limit")]
    pub rate_limit: u32,
    #[serde(default = "default_rate_window_ms")]
    pub rate_window_ms: u64,
    /// Delay between answering `shutdown` and triggering it.
    #[serde(default = "default_shutdown_delay_ms")]
    pub shutdown_delay_ms: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            rate_limit: default_rate_limit(),
            rate_window_ms: default_rate_window_ms(),
            shutdown_delay_ms: default_shutdown_delay_ms(),
        }
    }
}

/// Static facts about the running daemon reported by `getStatus`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DaemonInfo {
    pub pid: u32,
    pub version: String,
    pub network: String,
    /// Milliseconds since Unix epoch.
    pub started_at: u64,
}

/// Per-connection data the gateway needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestContext {
    pub client_id: String,
}

impl RequestContext {
    pub fn new(client_id: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
        }
    }
}

/// A successful handler result.
struct Reply {
    result: Value,
    cached_at: Option<u64>,
}

impl Reply {
    fn new(result: Value) -> Self {
        Self {
            result,
            cached_at: None,
        }
    }

    fn cached(result: Value, cached_at: u64) -> Self {
        Self {
            result,
            cached_at: Some(cached_at),
        }
    }
}

/// Validates, authenticates, throttles and routes RPC requests.
pub struct RpcGateway {
    cache: Arc<MarketCache>,
    upstream: Arc<dyn UpstreamProbe>,
    metrics: Arc<MetricsRegistry>,
    limiter: FixedWindowLimiter,
    sessions: SessionTable,
    orders: OrderBook,
    clock: Arc<dyn Clock>,
    config: GatewayConfig,
    info: DaemonInfo,
    shutdown: CancellationToken,
}

impl RpcGateway {
    /// `shutdown` is cancelled when a client calls the `shutdown` method.
    pub fn new(
        cache: Arc<MarketCache>,
        upstream: Arc<dyn UpstreamProbe>,
        metrics: Arc<MetricsRegistry>,
        config: GatewayConfig,
        info: DaemonInfo,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            cache,
            upstream,
            metrics,
            limiter: FixedWindowLimiter::new(config.rate_limit, config.rate_window_ms),
            sessions: SessionTable::new(),
            orders: OrderBook::new(),
            clock: Arc::new(SystemClock),
            config,
            info,
            shutdown,
        }
    }

    /// Replace the clock used for rate windows, order timestamps and uptime.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn sessions(&self) -> &SessionTable {
        &self.sessions
    }

    pub fn orders(&self) -> &OrderBook {
        &self.orders
    }

    pub fn metrics(&self) -> &MetricsRegistry {
        &self.metrics
    }

    /// Drop expired rate-limit windows.
    pub fn prune_rate_limits(&self) -> usize {
        self.limiter.prune(self.clock.now_ms())
    }

    /// Handle one decoded request.
    pub fn handle(&self, request: &RpcRequest, ctx: &RequestContext) -> RpcResponse {
        let started = Instant::now();
        let trace_id = Uuid::new_v4().to_string();
        let method = request.method;

        let outcome = self.process(request, ctx);
        let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
        let status = match &outcome {
            Ok(_) => "ok",
            Err(e) => e.status(),
        };

        self.metrics.increment(
            REQUESTS_COUNTER,
            &[
                ("method", method.as_str()),
                ("category", method.category().as_str()),
                ("status", status),
            ],
        );
        self.metrics.observe_latency(method.as_str(), elapsed_ms);
        Metrics::rpc_request(method.as_str(), status, elapsed_ms);

        match outcome {
            Ok(reply) => {
                info!(
                    trace_id = %trace_id,
                    client_id = %ctx.client_id,
                    method = %method,
                    status,
                    elapsed_ms,
                    "RPC request handled"
                );
                RpcResponse::success(&request.id, reply.result)
                    .with_cached_at(reply.cached_at)
                    .with_trace_id(trace_id)
            }
            Err(e) => {
                warn!(
                    trace_id = %trace_id,
                    client_id = %ctx.client_id,
                    method = %method,
                    status,
                    elapsed_ms,
                    error = %e,
                    "RPC request failed"
                );
                RpcResponse::failure(&request.id, e.to_string()).with_trace_id(trace_id)
            }
        }
    }

    /// Answer a line the decoder rejected.
    pub fn protocol_error(&self, error: &DecodeError, ctx: &RequestContext) -> RpcResponse {
        let trace_id = Uuid::new_v4().to_string();
        self.metrics.increment(
            REQUESTS_COUNTER,
            &[
                ("method", "invalid"),
                ("category", "protocol"),
                ("status", "invalid"),
            ],
        );
        Metrics::rpc_request("invalid", "invalid", 0.0);
        warn!(
            trace_id = %trace_id,
            client_id = %ctx.client_id,
            id = %error.id,
            error = %error.error,
            "Rejected malformed request"
        );
        RpcResponse::failure(&error.id, error.error.to_string()).with_trace_id(trace_id)
    }

    fn process(&self, request: &RpcRequest, ctx: &RequestContext) -> RpcResult<Reply> {
        let method = request.method;

        let key = format!("{}:{}", ctx.client_id, method.as_str());
        if !self.limiter.allow(&key, self.clock.now_ms()) {
            return Err(RpcError::RateLimited);
        }

        if method.requires_auth() {
            let Some(wallet) = request
                .params
                .get("authToken")
                .and_then(Value::as_str)
                .and_then(|token| self.sessions.wallet_for(token))
            else {
                return Err(RpcError::Unauthorized);
            };
            debug!(client_id = %ctx.client_id, method = %method, wallet = %wallet, "Session authorized");
        }

        let call = MethodCall::parse(method, &request.params).map_err(RpcError::Validation)?;
        self.route(call)
    }

    fn route(&self, call: MethodCall) -> RpcResult<Reply> {
        match call {
            MethodCall::Login { wallet } => {
                let token = self.sessions.login(&wallet);
                Ok(Reply::new(json!({ "token": token, "wallet": wallet })))
            }
            MethodCall::GetDashboard => Ok(self.dashboard()),
            MethodCall::GetPrices { coin } => self.prices(coin),
            MethodCall::GetAssetCtxs => passthrough(self.cache.asset_ctxs()),
            MethodCall::GetPerpMeta => passthrough(self.cache.perp_meta()),
            MethodCall::GetSpotMeta => passthrough(self.cache.spot_meta()),
            MethodCall::GetSpotAssetCtxs => passthrough(self.cache.spot_asset_ctxs()),
            MethodCall::PlaceOrder { coin, side, size } => {
                let order = self
                    .orders
                    .place(coin.to_uppercase(), side, size, self.clock.now_ms())
                    .map_err(|e| RpcError::Validation(e.to_string()))?;
                Ok(Reply::new(json!({
                    "orderId": order.id,
                    "coin": order.coin,
                    "side": order.side,
                    "size": order.size.to_string(),
                    "status": order.status,
                })))
            }
            MethodCall::CancelOrder { order_id } => {
                let order = self
                    .orders
                    .cancel(&order_id)
                    .ok_or_else(|| RpcError::NotFound("Order not found".to_string()))?;
                Ok(Reply::new(json!({
                    "orderId": order.id,
                    "status": order.status,
                })))
            }
            MethodCall::GetStatus => Ok(self.status()),
            MethodCall::GetMetrics { format } => self.metrics_report(format),
            MethodCall::Shutdown => {
                self.schedule_shutdown();
                Ok(Reply::new(json!({ "ok": true })))
            }
        }
    }

    fn dashboard(&self) -> Reply {
        let mids = self.cache.mids();
        let result = json!({
            "cache": self.cache.status(),
            "prices": mids.as_ref().map(|m| json!(m.data)).unwrap_or_else(|| json!({})),
            "connected": self.upstream.is_connected(),
        });
        Reply {
            result,
            cached_at: mids.map(|m| m.updated_at),
        }
    }

    fn prices(&self, coin: Option<String>) -> RpcResult<Reply> {
        let mids = self.cache.mids().ok_or(RpcError::NoData)?;
        match coin {
            None => Ok(Reply::cached(json!(mids.data), mids.updated_at)),
            Some(coin) => {
                let key = coin.to_uppercase();
                let price = mids
                    .data
                    .get(&key)
                    .ok_or_else(|| RpcError::NotFound(format!("Coin not found: {coin}")))?;
                let mut filtered = Map::new();
                filtered.insert(key.clone(), json!(price));
                Ok(Reply::cached(Value::Object(filtered), mids.updated_at))
            }
        }
    }

    fn status(&self) -> Reply {
        let now = self.clock.now_ms();
        Reply::new(json!({
            "alive": true,
            "pid": self.info.pid,
            "version": self.info.version,
            "network": self.info.network,
            "startedAt": self.info.started_at,
            "uptimeMs": now.saturating_sub(self.info.started_at),
            "connected": self.upstream.is_connected(),
            "cache": self.cache.status(),
        }))
    }

    fn metrics_report(&self, format: MetricsFormat) -> RpcResult<Reply> {
        match format {
            MetricsFormat::Json => serde_json::to_value(self.metrics.snapshot())
                .map(Reply::new)
                .map_err(|e| RpcError::Internal(e.to_string())),
            MetricsFormat::Prometheus => Metrics::render()
                .map(|text| Reply::new(json!({ "text": text })))
                .map_err(|e| RpcError::Internal(e.to_string())),
        }
    }

    /// Cancel the shutdown token after the configured delay so the reply
    /// can be written first.
    fn schedule_shutdown(&self) {
        let token = self.shutdown.clone();
        let delay = Duration::from_millis(self.config.shutdown_delay_ms);
        info!(delay_ms = self.config.shutdown_delay_ms, "Shutdown requested");
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    tokio::time::sleep(delay).await;
                    token.cancel();
                });
            }
            Err(_) => token.cancel(),
        }
    }
}

fn passthrough<T: Serialize>(entry: Option<hlmd_core::CacheEntry<T>>) -> RpcResult<Reply> {
    let entry = entry.ok_or(RpcError::NoData)?;
    let result = serde_json::to_value(&entry.data).map_err(|e| RpcError::Internal(e.to_string()))?;
    Ok(Reply::cached(result, entry.updated_at))
}

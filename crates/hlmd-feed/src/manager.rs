//! Subscription manager.
//!
//! Owns the upstream connection task, a router task that applies stream
//! messages to the cache, and one polling task per metadata kind.
//!
//! `stop()` tears these down in order: polls, subscriptions, connection,
//! router. Once it returns nothing writes to the cache any more.

use crate::config::FeedConfig;
use crate::error::{FeedError, FeedResult};
use crate::parser::{MarketEvent, MessageParser};
use hlmd_core::{with_backoff, MarketCache, MarketShape, UpstreamProbe};
use hlmd_registry::{MetaSource, RegistryResult};
use hlmd_telemetry::Metrics;
use hlmd_ws::{ConnectionConfig, ConnectionManager, Subscription, WsMessage, WsResult};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex as TokioMutex};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Buffered upstream messages between the connection and the router.
const MESSAGE_CHANNEL_CAPACITY: usize = 1024;

/// Metadata fetched by polling rather than streaming.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetaKind {
    Perp,
    Spot,
}

impl MetaKind {
    pub const ALL: [MetaKind; 2] = [Self::Perp, Self::Spot];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Perp => "perp",
            Self::Spot => "spot",
        }
    }
}

/// The three streams the daemon keeps subscribed.
fn market_subscriptions() -> [Subscription; 3] {
    [
        Subscription::all_mids(),
        Subscription::AllDexsAssetCtxs,
        Subscription::SpotAssetCtxs,
    ]
}

#[derive(Default)]
struct Tasks {
    connection: Option<JoinHandle<WsResult<()>>>,
    router: Option<JoinHandle<()>>,
    polls: Vec<JoinHandle<()>>,
}

/// Keeps the market cache fed from upstream.
pub struct SubscriptionManager {
    cache: Arc<MarketCache>,
    connection: Arc<ConnectionManager>,
    meta_source: Arc<dyn MetaSource>,
    config: FeedConfig,
    parser: Arc<MessageParser>,
    message_rx: Mutex<Option<mpsc::Receiver<WsMessage>>>,
    poll_token: CancellationToken,
    router_token: CancellationToken,
    tasks: TokioMutex<Tasks>,
}

impl SubscriptionManager {
    pub fn new(
        cache: Arc<MarketCache>,
        ws_config: ConnectionConfig,
        meta_source: Arc<dyn MetaSource>,
        config: FeedConfig,
    ) -> Self {
        let (message_tx, message_rx) = mpsc::channel(MESSAGE_CHANNEL_CAPACITY);
        Self {
            cache,
            connection: Arc::new(ConnectionManager::new(ws_config, message_tx)),
            meta_source,
            config,
            parser: Arc::new(MessageParser::new()),
            message_rx: Mutex::new(Some(message_rx)),
            poll_token: CancellationToken::new(),
            router_token: CancellationToken::new(),
            tasks: TokioMutex::new(Tasks::default()),
        }
    }

    pub fn connection(&self) -> &Arc<ConnectionManager> {
        &self.connection
    }

    pub fn parser(&self) -> &MessageParser {
        &self.parser
    }

    /// Live state of the upstream connection.
    pub fn is_connected(&self) -> bool {
        self.connection.is_connected()
    }

    /// Start the connection, subscribe to the market streams and begin polling.
    ///
    /// Waits up to `ready_timeout` for the upstream. If it is not up by then the
    /// subscriptions are registered anyway and go out once it connects.
    pub async fn start(&self) -> FeedResult<()> {
        let mut tasks = self.tasks.lock().await;
        let message_rx = self
            .message_rx
            .lock()
            .take()
            .ok_or(FeedError::AlreadyStarted)?;

        info!("Starting subscription manager");

        let connection = self.connection.clone();
        tasks.connection = Some(tokio::spawn(async move { connection.connect().await }));
        tasks.router = Some(tokio::spawn(run_router(
            message_rx,
            self.cache.clone(),
            self.parser.clone(),
            self.router_token.clone(),
        )));

        match self.connection.wait_connected(self.config.ready_timeout()).await {
            Ok(()) => info!("Upstream connected"),
            Err(e) => warn!(error = %e, "Upstream not ready, subscribing anyway"),
        }

        for subscription in market_subscriptions() {
            self.connection.subscribe(subscription);
        }

        for kind in MetaKind::ALL {
            tasks.polls.push(tokio::spawn(run_meta_poll(
                kind,
                self.meta_source.clone(),
                self.cache.clone(),
                self.config.clone(),
                self.poll_token.clone(),
            )));
        }

        Ok(())
    }

    /// Stop polling, unsubscribe, close the connection, then stop routing.
    pub async fn stop(&self) {
        info!("Stopping subscription manager");
        let mut tasks = self.tasks.lock().await;

        self.poll_token.cancel();
        for handle in tasks.polls.drain(..) {
            if let Err(e) = handle.await {
                warn!(error = %e, "Metadata poll task failed");
            }
        }

        for subscription in self.connection.subscriptions().active() {
            let channel = subscription.channel();
            if let Err(e) = self.connection.unsubscribe(channel).await {
                debug!(channel, error = %e, "Unsubscribe failed, ignoring");
            }
        }

        self.connection.shutdown();
        if let Some(handle) = tasks.connection.take() {
            match handle.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(error = %e, "Connection task ended with error"),
                Err(e) => warn!(error = %e, "Connection task failed"),
            }
        }

        self.router_token.cancel();
        if let Some(handle) = tasks.router.take() {
            if let Err(e) = handle.await {
                warn!(error = %e, "Router task failed");
            }
        }

        info!("Subscription manager stopped");
    }
}

impl UpstreamProbe for SubscriptionManager {
    fn is_connected(&self) -> bool {
        SubscriptionManager::is_connected(self)
    }
}

/// Parse one channel message and write it to the cache.
pub fn route_message(
    cache: &MarketCache,
    parser: &MessageParser,
    channel: &str,
    data: &serde_json::Value,
) {
    match parser.parse_channel_message(channel, data) {
        Ok(Some(event)) => apply_event(cache, event),
        Ok(None) => {}
        Err(e) => warn!(error = %e, "Dropping malformed market data"),
    }
}

fn apply_event(cache: &MarketCache, event: MarketEvent) {
    let shape = event.shape();
    match event {
        MarketEvent::Mids(mids) => cache.set_mids(mids),
        MarketEvent::AssetCtxs(tree) => cache.set_asset_ctxs(tree),
        MarketEvent::SpotAssetCtxs(ctxs) => cache.set_spot_asset_ctxs(ctxs),
    }
    Metrics::cache_update(shape.as_str());
}

async fn run_router(
    mut message_rx: mpsc::Receiver<WsMessage>,
    cache: Arc<MarketCache>,
    parser: Arc<MessageParser>,
    token: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            () = token.cancelled() => break,
            msg = message_rx.recv() => match msg {
                Some(WsMessage::Channel(channel_msg)) => {
                    route_message(&cache, &parser, &channel_msg.channel, &channel_msg.data);
                }
                Some(WsMessage::Pong(_)) => {}
                None => break,
            },
        }
    }
    debug!("Router stopped");
}

async fn poll_once(
    kind: MetaKind,
    source: &dyn MetaSource,
    cache: &MarketCache,
) -> RegistryResult<()> {
    match kind {
        MetaKind::Perp => {
            let metas = source.fetch_perp_metas().await?;
            debug!(venues = metas.len(), "Perp metadata refreshed");
            cache.set_perp_meta(metas);
            Metrics::cache_update(MarketShape::PerpMeta.as_str());
        }
        MetaKind::Spot => {
            let meta = source.fetch_spot_meta().await?;
            debug!("Spot metadata refreshed");
            cache.set_spot_meta(meta);
            Metrics::cache_update(MarketShape::SpotMeta.as_str());
        }
    }
    Ok(())
}

/// Fetch immediately, then once per interval. Failures are logged only.
async fn run_meta_poll(
    kind: MetaKind,
    source: Arc<dyn MetaSource>,
    cache: Arc<MarketCache>,
    config: FeedConfig,
    token: CancellationToken,
) {
    let mut ticker = tokio::time::interval(config.meta_poll_interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let source: &dyn MetaSource = source.as_ref();
    let cache: &MarketCache = &cache;

    loop {
        tokio::select! {
            () = token.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let result = tokio::select! {
            () = token.cancelled() => break,
            result = with_backoff(&config.backoff, move || poll_once(kind, source, cache)) => result,
        };

        if let Err(e) = result {
            error!(kind = kind.as_str(), error = %e, "Metadata poll failed");
            Metrics::meta_poll_failure(kind.as_str());
        }
    }
    debug!(kind = kind.as_str(), "Metadata poll stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use hlmd_core::{BackoffConfig, PerpMetas, SpotMeta};
    use hlmd_registry::RegistryError;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    /// Metadata source whose perp fetch fails the first `fail_first` calls.
    #[derive(Default)]
    struct FakeMetaSource {
        perp_calls: AtomicU32,
        spot_calls: AtomicU32,
        fail_first: u32,
    }

    #[async_trait]
    impl MetaSource for FakeMetaSource {
        async fn fetch_perp_metas(&self) -> RegistryResult<PerpMetas> {
            let n = self.perp_calls.fetch_add(1, Ordering::SeqCst);
            if n < self.fail_first {
                return Err(RegistryError::HttpClient("connection reset".to_string()));
            }
            Ok(vec![json!({"universe": [{"name": "BTC"}]})])
        }

        async fn fetch_spot_meta(&self) -> RegistryResult<SpotMeta> {
            self.spot_calls.fetch_add(1, Ordering::SeqCst);
            Ok(json!({"tokens": [], "universe": []}))
        }
    }

    fn test_config() -> FeedConfig {
        FeedConfig {
            meta_poll_interval_ms: 60_000,
            ready_timeout_ms: 0,
            backoff: BackoffConfig {
                max_attempts: 2,
                base_delay_ms: 10,
                max_delay_ms: 10,
                jitter_ratio: 0.0,
            },
        }
    }

    #[test]
    fn test_route_message_updates_cache() {
        let cache = MarketCache::new();
        let parser = MessageParser::new();

        route_message(&cache, &parser, "allMids", &json!({"mids": {"BTC": "50000"}}));
        route_message(&cache, &parser, "spotAssetCtxs", &json!([{"coin": "PURR/USDC"}]));
        route_message(&cache, &parser, "allMids", &json!("garbage"));

        assert_eq!(cache.mids().unwrap().data["BTC"], "50000");
        assert_eq!(cache.spot_asset_ctxs().unwrap().data.len(), 1);
        assert!(cache.asset_ctxs().is_none());
        assert_eq!(parser.stats().failed(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_fetches_immediately_then_every_interval() {
        let source = Arc::new(FakeMetaSource::default());
        let cache = Arc::new(MarketCache::new());
        let token = CancellationToken::new();

        let handle = tokio::spawn(run_meta_poll(
            MetaKind::Spot,
            source.clone(),
            cache.clone(),
            test_config(),
            token.clone(),
        ));

        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(source.spot_calls.load(Ordering::SeqCst), 1);
        assert!(cache.spot_meta().is_some());

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(source.spot_calls.load(Ordering::SeqCst), 2);

        token.cancel();
        handle.await.unwrap();

        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(source.spot_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_failure_is_not_fatal() {
        // Both attempts of the first cycle fail; the next cycle succeeds.
        let source = Arc::new(FakeMetaSource {
            fail_first: 2,
            ..FakeMetaSource::default()
        });
        let cache = Arc::new(MarketCache::new());
        let token = CancellationToken::new();

        let handle = tokio::spawn(run_meta_poll(
            MetaKind::Perp,
            source.clone(),
            cache.clone(),
            test_config(),
            token.clone(),
        ));

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(source.perp_calls.load(Ordering::SeqCst), 2);
        assert!(cache.perp_meta().is_none());

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(source.perp_calls.load(Ordering::SeqCst), 3);
        assert_eq!(cache.perp_meta().unwrap().data.len(), 1);

        token.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_start_twice_is_rejected() {
        let manager = SubscriptionManager::new(
            Arc::new(MarketCache::new()),
            ConnectionConfig {
                url: "ws://127.0.0.1:1".to_string(),
                ..ConnectionConfig::default()
            },
            Arc::new(FakeMetaSource::default()),
            test_config(),
        );

        manager.start().await.unwrap();
        assert!(matches!(manager.start().await, Err(FeedError::AlreadyStarted)));
        assert!(!manager.is_connected());

        manager.stop().await;
        assert!(!manager.is_connected());
        assert!(manager.connection().subscriptions().is_empty());
    }
}

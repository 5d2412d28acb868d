//! Daemon orchestration.
//!
//! Bootstrap order: PID lock, cache and gateway, IPC socket, runtime config,
//! upstream subscriptions. Shutdown runs in a fixed order once the shutdown
//! token fires:
//!
//! 1. stop accepting IPC connections
//! 2. stop the subscription manager (unsubscribe, close upstream)
//! 3. remove the socket, runtime config and PID file

use crate::artifacts::{ProcessArtifacts, RuntimeConfig};
use crate::config::DaemonConfig;
use crate::error::DaemonResult;
use hlmd_core::{Clock, MarketCache, SystemClock};
use hlmd_feed::SubscriptionManager;
use hlmd_ipc::{IpcListener, IpcResult};
use hlmd_registry::{MetaClient, MetaSource};
use hlmd_rpc::{DaemonInfo, RpcGateway};
use hlmd_telemetry::MetricsRegistry;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// How often expired rate-limit windows are dropped.
const RATE_LIMIT_PRUNE_INTERVAL: Duration = Duration::from_secs(60);

/// A bootstrapped daemon.
pub struct Daemon {
    config: DaemonConfig,
    artifacts: ProcessArtifacts,
    cache: Arc<MarketCache>,
    feed: Arc<SubscriptionManager>,
    gateway: Arc<RpcGateway>,
    shutdown: CancellationToken,
    listener_token: CancellationToken,
    listener_task: JoinHandle<IpcResult<()>>,
    prune_task: JoinHandle<()>,
}

impl Daemon {
    /// Bootstrap against the exchange's info endpoint.
    pub async fn start(config: DaemonConfig, shutdown: CancellationToken) -> DaemonResult<Self> {
        let meta_source = Arc::new(MetaClient::new(config.info_url())?);
        Self::start_with(config, meta_source, shutdown).await
    }

    /// Bootstrap with an explicit metadata source.
    ///
    /// `shutdown` is cancelled by the `shutdown` RPC; signal handlers and
    /// the panic hook cancel it too.
    pub async fn start_with(
        config: DaemonConfig,
        meta_source: Arc<dyn MetaSource>,
        shutdown: CancellationToken,
    ) -> DaemonResult<Self> {
        let pid = std::process::id();
        let started_at = SystemClock.now_ms();
        let artifacts = ProcessArtifacts::acquire(config.paths(), pid)?;

        info!(
            pid,
            network = %config.network,
            ws_url = %config.ws_url(),
            info_url = %config.info_url(),
            home = %artifacts.paths().home.display(),
            "Starting daemon"
        );

        let cache = Arc::new(MarketCache::new());
        let feed = Arc::new(SubscriptionManager::new(
            cache.clone(),
            config.connection_config(),
            meta_source,
            config.feed.clone(),
        ));
        let gateway = Arc::new(RpcGateway::new(
            cache.clone(),
            feed.clone(),
            Arc::new(MetricsRegistry::new()),
            config.rpc.clone(),
            DaemonInfo {
                pid,
                version: env!("CARGO_PKG_VERSION").to_string(),
                network: config.network.to_string(),
                started_at,
            },
            shutdown.clone(),
        ));

        let listener = IpcListener::bind(&artifacts.paths().socket, gateway.clone())?;
        let listener_token = listener.shutdown_token();

        artifacts.write_runtime_config(&RuntimeConfig {
            network: config.network.to_string(),
            pid,
            started_at,
            socket_path: artifacts.paths().socket.clone(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        })?;

        let listener_task = tokio::spawn(listener.run());
        let prune_task = spawn_rate_limit_pruner(gateway.clone(), listener_token.clone());

        if let Err(e) = feed.start().await {
            listener_token.cancel();
            return Err(e.into());
        }

        info!(socket = %artifacts.paths().socket.display(), "Daemon ready");

        Ok(Self {
            config,
            artifacts,
            cache,
            feed,
            gateway,
            shutdown,
            listener_token,
            listener_task,
            prune_task,
        })
    }

    pub fn config(&self) -> &DaemonConfig {
        &self.config
    }

    pub fn cache(&self) -> &Arc<MarketCache> {
        &self.cache
    }

    pub fn gateway(&self) -> &Arc<RpcGateway> {
        &self.gateway
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Wait for the shutdown token, then shut down in order.
    pub async fn run(self) -> DaemonResult<()> {
        self.shutdown.cancelled().await;
        info!("Shutdown triggered");
        self.stop().await;
        Ok(())
    }

    async fn stop(mut self) {
        self.listener_token.cancel();
        match (&mut self.listener_task).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(error = %e, "IPC listener ended with error"),
            Err(e) => error!(error = %e, "IPC listener task failed"),
        }
        let _ = (&mut self.prune_task).await;
        info!("IPC listener stopped");

        self.feed.stop().await;
        info!("Subscriptions stopped");

        self.artifacts.cleanup();
        info!("Daemon stopped");
    }
}

fn spawn_rate_limit_pruner(gateway: Arc<RpcGateway>, stop: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(RATE_LIMIT_PRUNE_INTERVAL);
        interval.tick().await;
        loop {
            tokio::select! {
                _ = stop.cancelled() => break,
                _ = interval.tick() => {
                    let pruned = gateway.prune_rate_limits();
                    if pruned > 0 {
                        tracing::debug!(pruned, "Pruned rate-limit windows");
                    }
                }
            }
        }
    })
}

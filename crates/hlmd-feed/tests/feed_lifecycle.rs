//! Subscription manager against a local WebSocket server.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use hlmd_core::{BackoffConfig, MarketCache, PerpMetas, SpotMeta};
use hlmd_feed::{FeedConfig, SubscriptionManager};
use hlmd_registry::{MetaSource, RegistryResult};
use hlmd_ws::ConnectionConfig;
use serde_json::{json, Value};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::Message;

struct StaticMeta;

#[async_trait]
impl MetaSource for StaticMeta {
    async fn fetch_perp_metas(&self) -> RegistryResult<PerpMetas> {
        Ok(vec![json!({"universe": [{"name": "BTC"}]})])
    }

    async fn fetch_spot_meta(&self) -> RegistryResult<SpotMeta> {
        Ok(json!({"tokens": [{"name": "USDC"}], "universe": []}))
    }
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not met in time");
}

#[tokio::test]
async fn test_start_populates_cache_and_stop_unsubscribes() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}", listener.local_addr().unwrap());

    // Server: expect three subscribes, push one message per stream, then
    // collect requests until the client closes.
    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
        let mut requests: Vec<Value> = Vec::new();
        let mut pushed = false;

        while let Some(Ok(frame)) = ws.next().await {
            let text = match frame {
                Message::Text(text) => text,
                Message::Close(_) => break,
                _ => continue,
            };
            requests.push(serde_json::from_str(&text).unwrap());

            let subscribes = requests.iter().filter(|r| r["method"] == "subscribe").count();
            if subscribes == 3 && !pushed {
                pushed = true;
                for data in [
                    json!({"channel": "allMids", "data": {"mids": {"BTC": "50000"}}}),
                    json!({"channel": "allDexsAssetCtxs", "data": {"ctxs": [["", [{"markPx": "50000"}]]]}}),
                    json!({"channel": "spotAssetCtxs", "data": [{"coin": "PURR/USDC"}]}),
                ] {
                    ws.send(Message::Text(data.to_string())).await.unwrap();
                }
            }
        }
        requests
    });

    let cache = Arc::new(MarketCache::new());
    let manager = SubscriptionManager::new(
        cache.clone(),
        ConnectionConfig {
            url,
            reconnect_base_delay_ms: 10,
            ..ConnectionConfig::default()
        },
        Arc::new(StaticMeta),
        FeedConfig {
            ready_timeout_ms: 5_000,
            backoff: BackoffConfig::default(),
            ..FeedConfig::default()
        },
    );

    manager.start().await.unwrap();
    assert!(manager.is_connected());

    wait_until(|| {
        let status = cache.status();
        status.mids.populated
            && status.asset_ctxs.populated
            && status.spot_asset_ctxs.populated
            && status.perp_meta.populated
            && status.spot_meta.populated
    })
    .await;

    assert_eq!(cache.mids().unwrap().data["BTC"], "50000");
    assert_eq!(cache.asset_ctxs().unwrap().data[""].len(), 1);

    manager.stop().await;
    assert!(!manager.is_connected());

    let requests = tokio::time::timeout(Duration::from_secs(5), server)
        .await
        .unwrap()
        .unwrap();

    let channels = |method: &str| -> BTreeSet<String> {
        requests
            .iter()
            .filter(|r| r["method"] == method)
            .map(|r| r["subscription"]["type"].as_str().unwrap().to_string())
            .collect()
    };
    let expected: BTreeSet<String> = ["allMids", "allDexsAssetCtxs", "spotAssetCtxs"]
        .into_iter()
        .map(String::from)
        .collect();
    assert_eq!(channels("subscribe"), expected);
    assert_eq!(channels("unsubscribe"), expected);
}

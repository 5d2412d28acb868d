//! Connection manager against a local WebSocket server.

use futures_util::{SinkExt, StreamExt};
use hlmd_ws::{ConnectionConfig, ConnectionManager, ConnectionState, Subscription, WsMessage};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;

async fn next_json<S>(ws: &mut S) -> Value
where
    S: StreamExt<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
{
    loop {
        match ws.next().await.expect("stream open").expect("frame") {
            Message::Text(text) => return serde_json::from_str(&text).expect("json"),
            _ => continue,
        }
    }
}

fn config(url: String) -> ConnectionConfig {
    ConnectionConfig {
        url,
        reconnect_base_delay_ms: 10,
        reconnect_max_delay_ms: 50,
        ..ConnectionConfig::default()
    }
}

#[tokio::test]
async fn test_subscribes_forwards_and_restores_after_reconnect() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}", listener.local_addr().unwrap());

    let (message_tx, mut message_rx) = mpsc::channel(16);
    let manager = Arc::new(ConnectionManager::new(config(url), message_tx));
    manager.subscribe(Subscription::all_mids());

    let task = {
        let manager = manager.clone();
        tokio::spawn(async move { manager.connect().await })
    };

    // First connection: greeting, subscribe, one data frame, then drop.
    let (stream, _) = listener.accept().await.unwrap();
    let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
    ws.send(Message::Text("Websocket connection established.".into()))
        .await
        .unwrap();

    let request = next_json(&mut ws).await;
    assert_eq!(request["method"], "subscribe");
    assert_eq!(request["subscription"], json!({"type": "allMids", "dex": "ALL_DEXS"}));

    ws.send(Message::Text(
        json!({"channel": "allMids", "data": {"mids": {"BTC": "50000"}}}).to_string(),
    ))
    .await
    .unwrap();

    let forwarded = tokio::time::timeout(Duration::from_secs(5), message_rx.recv())
        .await
        .unwrap()
        .unwrap();
    match forwarded {
        WsMessage::Channel(c) => assert_eq!(c.data["mids"]["BTC"], "50000"),
        WsMessage::Pong(_) => panic!("expected data message"),
    }
    assert!(manager
        .subscriptions()
        .channel_state("allMids")
        .unwrap()
        .is_ready());

    drop(ws);

    // Second connection: the subscription is restored without being asked.
    let (stream, _) = tokio::time::timeout(Duration::from_secs(5), listener.accept())
        .await
        .unwrap()
        .unwrap();
    let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
    let request = next_json(&mut ws).await;
    assert_eq!(request["method"], "subscribe");
    assert_eq!(request["subscription"]["type"], "allMids");

    manager
        .wait_connected(Duration::from_secs(5))
        .await
        .unwrap();

    // Unsubscribe is flushed before the close frame on shutdown.
    manager.unsubscribe("allMids").await.unwrap();
    manager.shutdown();

    let request = next_json(&mut ws).await;
    assert_eq!(request["method"], "unsubscribe");

    tokio::time::timeout(Duration::from_secs(5), task)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(manager.state(), ConnectionState::Disconnected);
}

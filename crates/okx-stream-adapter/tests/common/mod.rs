/*
[INPUT]:  Test scenarios needing a live WebSocket peer
[OUTPUT]: In-process mock server, client configs and tracing setup
[POS]:    Test infrastructure - shared across all test modules
[UPDATE]: When adding new test patterns or fixtures
*/

//! Common test utilities for okx-stream-adapter tests

#![allow(dead_code)]

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use okx_stream_adapter::{ConnectionState, Endpoint, StreamConfig, WsClient};
use serde_json::Value;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{WebSocketStream, accept_async};
use tracing_subscriber::EnvFilter;

pub const STEP_TIMEOUT: Duration = Duration::from_secs(5);

/// Install a test subscriber honouring `RUST_LOG`; repeated calls are no-ops.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Config pointing at a local peer with short timers.
pub fn test_config(url: &str, endpoint: Endpoint) -> StreamConfig {
    let mut config = StreamConfig::new(endpoint);
    config.url = Some(url.to_string());
    config.connect_timeout_ms = 1_000;
    config.request_timeout_ms = 2_000;
    config.backoff_initial_ms = 10;
    config.backoff_max_ms = 50;
    config
}

pub async fn wait_for_state(client: &WsClient, state: ConnectionState) {
    let mut rx = client.connection_state();
    tokio::time::timeout(STEP_TIMEOUT, rx.wait_for(|current| *current == state))
        .await
        .expect("state change timed out")
        .expect("state channel closed");
}

/// Local WebSocket server accepting one client connection at a time.
pub struct MockPeer {
    pub url: String,
    listener: TcpListener,
}

impl MockPeer {
    pub async fn bind() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind mock peer");
        let addr = listener.local_addr().expect("local addr");
        Self {
            url: format!("ws://{addr}"),
            listener,
        }
    }

    pub async fn accept(&self) -> PeerConn {
        let (stream, _) = tokio::time::timeout(STEP_TIMEOUT, self.listener.accept())
            .await
            .expect("client did not connect")
            .expect("accept");
        let ws = accept_async(stream).await.expect("websocket handshake");
        PeerConn { ws }
    }

    /// Accept and answer the login handshake with success.
    pub async fn accept_logged_in(&self) -> PeerConn {
        let mut conn = self.accept().await;
        let login = conn.recv_json().await;
        assert_eq!(login["op"], "login");
        conn.send_json(serde_json::json!({"event": "login", "code": "0", "msg": "", "connId": "c1"}))
            .await;
        conn
    }
}

pub struct PeerConn {
    ws: WebSocketStream<TcpStream>,
}

impl PeerConn {
    /// Next text frame, or None once the client closed.
    pub async fn try_recv_text(&mut self) -> Option<String> {
        loop {
            let next = tokio::time::timeout(STEP_TIMEOUT, self.ws.next())
                .await
                .expect("no frame from client");
            match next {
                Some(Ok(Message::Text(text))) => return Some(text.to_string()),
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => return None,
                Some(Ok(_)) => continue,
            }
        }
    }

    pub async fn recv_text(&mut self) -> String {
        self.try_recv_text().await.expect("client closed the connection")
    }

    pub async fn recv_json(&mut self) -> Value {
        let text = self.recv_text().await;
        serde_json::from_str(&text).expect("client sent invalid json")
    }

    pub async fn send_text(&mut self, text: &str) {
        self.ws
            .send(Message::Text(text.to_string().into()))
            .await
            .expect("send to client");
    }

    pub async fn send_json(&mut self, value: Value) {
        self.send_text(&value.to_string()).await;
    }

    /// Answer a subscribe/unsubscribe frame for every arg, echoing its id.
    pub async fn ack(&mut self, request: &Value) {
        let event = request["op"].as_str().expect("op").to_string();
        for arg in request["args"].as_array().expect("args") {
            let mut ack = serde_json::json!({"event": event, "arg": arg, "connId": "c1"});
            if let Some(id) = request.get("id") {
                ack["id"] = id.clone();
            }
            self.send_json(ack).await;
        }
    }

    /// True if the client sends nothing for `quiet`.
    pub async fn stays_silent(&mut self, quiet: Duration) -> bool {
        tokio::time::timeout(quiet, self.ws.next()).await.is_err()
    }

    /// Drop the TCP connection without a close handshake.
    pub fn abort(self) {
        drop(self.ws);
    }
}

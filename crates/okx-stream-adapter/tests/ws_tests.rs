/*
[INPUT]:  WebSocket test scenarios against an in-process peer
[OUTPUT]: Test results for the stream client lifecycle, routing and correlation
[POS]:    Integration tests - WebSocket
[UPDATE]: When WebSocket client changes
*/

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{MockPeer, init_tracing, test_config, wait_for_state};
use okx_stream_adapter::auth::Clock;
use okx_stream_adapter::{
    Channel, ChannelEvent, ConnectionState, Credentials, Endpoint, OkxError, Operation,
    PlaceOrderRequest, Side, SubscriptionArg, TradeMode, WsClient,
};
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::json;
use tokio::sync::mpsc;
use tokio_test::{assert_err, assert_ok};

#[derive(Debug)]
struct FixedClock;

impl Clock for FixedClock {
    fn unix_timestamp(&self) -> i64 {
        1_538_054_050
    }
}

#[derive(Debug, Deserialize)]
struct Ticker {
    #[serde(rename = "instId")]
    inst_id: String,
    last: String,
}

async fn started_public(peer: &MockPeer) -> WsClient {
    let client = WsClient::new(test_config(&peer.url, Endpoint::Public)).unwrap();
    client.start().unwrap();
    client
}

async fn started_private(peer: &MockPeer) -> WsClient {
    let client = WsClient::with_parts(
        test_config(&peer.url, Endpoint::Private),
        Some(Credentials::new("key", "secret", "pass")),
        Arc::new(FixedClock),
    )
    .unwrap();
    client.start().unwrap();
    client
}

fn tickers() -> SubscriptionArg {
    SubscriptionArg::instrument(Channel::Tickers, "BTC-USDT")
}

#[tokio::test]
async fn test_subscribe_and_wait_acknowledged() {
    init_tracing();
    let peer = MockPeer::bind().await;
    let client = started_public(&peer).await;
    let mut conn = peer.accept().await;
    wait_for_state(&client, ConnectionState::Streaming).await;

    let waiter = tokio::spawn({
        let client = client.clone();
        async move { client.subscribe_and_wait(tickers()).await }
    });

    let request = conn.recv_json().await;
    assert_eq!(request["op"], "subscribe");
    assert_eq!(request["id"].as_str().unwrap().len(), 32);
    assert_eq!(request["args"][0], json!({"channel": "tickers", "instId": "BTC-USDT"}));
    conn.ack(&request).await;

    let event = assert_ok!(waiter.await.unwrap());
    assert_eq!(event.arg, Some(tickers()));
    assert_eq!(client.subscriptions(), vec![tickers()]);
    client.close().await;
}

#[tokio::test]
async fn test_subscribe_error_event_drops_intent() {
    init_tracing();
    let peer = MockPeer::bind().await;
    let client = started_public(&peer).await;
    let mut conn = peer.accept().await;
    wait_for_state(&client, ConnectionState::Streaming).await;

    let waiter = tokio::spawn({
        let client = client.clone();
        async move { client.subscribe_and_wait(tickers()).await }
    });
    let request = conn.recv_json().await;
    conn.send_json(json!({
        "id": request["id"],
        "event": "error",
        "code": "60018",
        "msg": "Wrong URL or channel doesn't exist.",
        "connId": "c1"
    }))
    .await;

    let err = assert_err!(waiter.await.unwrap());
    assert!(matches!(err, OkxError::Api { ref code, .. } if code == "60018"));
    assert!(client.subscriptions().is_empty());
    client.close().await;
}

#[tokio::test]
async fn test_error_event_keeps_previously_desired_intent() {
    init_tracing();
    let peer = MockPeer::bind().await;
    let client = started_public(&peer).await;
    let mut conn = peer.accept().await;
    wait_for_state(&client, ConnectionState::Streaming).await;

    client.subscribe(&[tickers()]).await.unwrap();
    let plain = conn.recv_json().await;
    assert!(plain.get("id").is_none());

    let waiter = tokio::spawn({
        let client = client.clone();
        async move { client.subscribe_and_wait(tickers()).await }
    });
    let request = conn.recv_json().await;
    conn.send_json(json!({
        "id": request["id"],
        "event": "error",
        "code": "60012",
        "msg": "Invalid request",
        "connId": "c1"
    }))
    .await;

    assert_err!(waiter.await.unwrap());
    assert_eq!(client.subscriptions(), vec![tickers()]);
    client.close().await;
}

#[tokio::test]
async fn test_waiter_registered_while_connecting_matches_replayed_ack() {
    init_tracing();
    let peer = MockPeer::bind().await;
    let client = started_public(&peer).await;

    // The handshake stalls until the peer accepts, so the waiter is in place
    // before the replay goes out.
    let waiter = tokio::spawn({
        let client = client.clone();
        async move { client.subscribe_and_wait(tickers()).await }
    });
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(client.subscriptions(), vec![tickers()]);

    let mut conn = peer.accept().await;
    let replay = conn.recv_json().await;
    assert!(replay.get("id").is_none());
    conn.ack(&replay).await;

    let ack = assert_ok!(waiter.await.unwrap());
    assert_eq!(ack.arg, Some(tickers()));
    client.close().await;
}

#[tokio::test]
async fn test_disconnect_before_ack_keeps_intent_and_replays() {
    init_tracing();
    let peer = MockPeer::bind().await;
    let client = started_public(&peer).await;
    let mut conn = peer.accept().await;
    wait_for_state(&client, ConnectionState::Streaming).await;

    let waiter = tokio::spawn({
        let client = client.clone();
        async move { client.subscribe_and_wait(tickers()).await }
    });
    let first = conn.recv_json().await;
    assert_eq!(first["op"], "subscribe");
    conn.abort();

    let err = assert_err!(waiter.await.unwrap());
    assert!(matches!(err, OkxError::ConnectionLost));
    assert_eq!(client.subscriptions(), vec![tickers()]);

    let mut conn = peer.accept().await;
    let replay = conn.recv_json().await;
    assert_eq!(replay["op"], "subscribe");
    assert!(replay.get("id").is_none());
    assert_eq!(replay["args"], json!([{"channel": "tickers", "instId": "BTC-USDT"}]));
    client.close().await;
}

#[tokio::test]
async fn test_replay_is_chunked() {
    init_tracing();
    let peer = MockPeer::bind().await;
    let mut config = test_config(&peer.url, Endpoint::Public);
    config.subscribe_batch_size = 2;
    let client = WsClient::new(config).unwrap();
    let args: Vec<SubscriptionArg> = ["BTC-USDT", "ETH-USDT", "SOL-USDT"]
        .into_iter()
        .map(|inst| SubscriptionArg::instrument(Channel::Trades, inst))
        .collect();
    client.subscribe(&args).await.unwrap();
    client.start().unwrap();

    let mut conn = peer.accept().await;
    let first = conn.recv_json().await;
    let second = conn.recv_json().await;
    assert_eq!(first["args"].as_array().unwrap().len(), 2);
    assert_eq!(second["args"].as_array().unwrap().len(), 1);
    client.close().await;
}

#[tokio::test]
async fn test_data_push_reaches_channel_handler() {
    init_tracing();
    let peer = MockPeer::bind().await;
    let client = started_public(&peer).await;
    let (tx, mut rx) = mpsc::unbounded_channel();
    client.on_channel(Channel::Tickers, move |event: ChannelEvent<Ticker>| {
        let _ = tx.send(event);
    });
    let raw_count = Arc::new(std::sync::atomic::AtomicUsize::new(0));
    let counter = raw_count.clone();
    client.on_raw(move |_text| {
        counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
    });

    let mut conn = peer.accept().await;
    wait_for_state(&client, ConnectionState::Streaming).await;
    conn.send_json(json!({
        "arg": {"channel": "tickers", "instId": "BTC-USDT"},
        "data": [{"instId": "BTC-USDT", "last": "9999.99"}]
    }))
    .await;

    let event = tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(event.arg, tickers());
    assert_eq!(event.data[0].inst_id, "BTC-USDT");
    assert_eq!(event.data[0].last, "9999.99");
    assert!(raw_count.load(std::sync::atomic::Ordering::SeqCst) >= 1);
    client.close().await;
}

#[tokio::test]
async fn test_malformed_frame_reported_and_loop_survives() {
    init_tracing();
    let peer = MockPeer::bind().await;
    let client = started_public(&peer).await;
    let (err_tx, mut err_rx) = mpsc::unbounded_channel();
    client.on_error(move |err| {
        let _ = err_tx.send(err.to_string());
    });
    let (tx, mut rx) = mpsc::unbounded_channel();
    client.on_channel(Channel::Tickers, move |event: ChannelEvent<Ticker>| {
        let _ = tx.send(event.data.len());
    });

    let mut conn = peer.accept().await;
    wait_for_state(&client, ConnectionState::Streaming).await;
    conn.send_text("{not json").await;
    conn.send_json(json!({
        "arg": {"channel": "tickers", "instId": "BTC-USDT"},
        "data": [{"instId": "BTC-USDT", "last": "1"}]
    }))
    .await;

    let reported = tokio::time::timeout(Duration::from_secs(2), err_rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert!(reported.contains("Serialization"));
    let delivered = tokio::time::timeout(Duration::from_secs(2), rx.recv()).await.unwrap();
    assert_eq!(delivered, Some(1));
    assert_eq!(client.state(), ConnectionState::Streaming);
    client.close().await;
}

#[tokio::test]
async fn test_unsubscribe_and_wait_removes_after_ack() {
    init_tracing();
    let peer = MockPeer::bind().await;
    let client = started_public(&peer).await;
    client.subscribe(&[tickers()]).await.unwrap();
    let mut conn = peer.accept().await;
    let replay = conn.recv_json().await;
    conn.ack(&replay).await;
    wait_for_state(&client, ConnectionState::Streaming).await;

    let waiter = tokio::spawn({
        let client = client.clone();
        async move { client.unsubscribe_and_wait(tickers()).await }
    });
    let request = conn.recv_json().await;
    assert_eq!(request["op"], "unsubscribe");
    assert_eq!(client.subscriptions(), vec![tickers()]);
    conn.ack(&request).await;

    assert_ok!(waiter.await.unwrap());
    assert!(client.subscriptions().is_empty());
    client.close().await;
}

#[tokio::test]
async fn test_login_handshake_signs_with_clock() {
    init_tracing();
    let peer = MockPeer::bind().await;
    let client = started_private(&peer).await;
    assert!(client.logs_in());

    let mut conn = peer.accept().await;
    let login = conn.recv_json().await;
    assert_eq!(login["op"], "login");
    assert_eq!(login["args"][0]["apiKey"], "key");
    assert_eq!(login["args"][0]["timestamp"], "1538054050");
    assert_eq!(
        login["args"][0]["sign"],
        "Gj2hQIVKFcXbiwCak8SmVOu5mxPCizWDdmUAhbx8Z+s="
    );
    assert_eq!(client.state(), ConnectionState::Authenticating);

    conn.send_json(json!({"event": "login", "code": "0", "msg": "", "connId": "c1"}))
        .await;
    wait_for_state(&client, ConnectionState::Streaming).await;
    client.close().await;
}

#[tokio::test]
async fn test_login_rejection_reconnects() {
    init_tracing();
    let peer = MockPeer::bind().await;
    let client = started_private(&peer).await;
    let (err_tx, mut err_rx) = mpsc::unbounded_channel();
    client.on_error(move |err| {
        let _ = err_tx.send(matches!(err, OkxError::Authentication { .. }));
    });

    let mut conn = peer.accept().await;
    let _login = conn.recv_json().await;
    conn.send_json(json!({"event": "error", "code": "60009", "msg": "Login failed.", "connId": "c1"}))
        .await;

    let was_auth = tokio::time::timeout(Duration::from_secs(2), err_rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert!(was_auth);

    let mut retry = peer.accept().await;
    assert_eq!(retry.recv_json().await["op"], "login");
    client.close().await;
}

#[tokio::test]
async fn test_partial_batch_failure_returns_every_ack() {
    init_tracing();
    let peer = MockPeer::bind().await;
    let client = started_private(&peer).await;
    let mut conn = peer.accept_logged_in().await;
    wait_for_state(&client, ConnectionState::Streaming).await;

    let orders = vec![
        PlaceOrderRequest::limit("BTC-USDT", TradeMode::Cash, Side::Buy, Decimal::ONE, Decimal::new(100, 0)),
        PlaceOrderRequest::limit("BTC-USDT", TradeMode::Cash, Side::Buy, Decimal::ONE, Decimal::new(101, 0)),
    ];
    let waiter = tokio::spawn({
        let client = client.clone();
        async move { client.place_orders(&orders).await }
    });

    let request = conn.recv_json().await;
    assert_eq!(request["op"], "batch-orders");
    assert_eq!(request["args"].as_array().unwrap().len(), 2);
    conn.send_json(json!({
        "id": request["id"],
        "op": "batch-orders",
        "code": "2",
        "msg": "",
        "data": [
            {"clOrdId": "", "ordId": "12345689", "tag": "", "sCode": "0", "sMsg": ""},
            {"clOrdId": "", "ordId": "", "tag": "", "sCode": "51008", "sMsg": "Order failed. Insufficient balance."}
        ],
        "inTime": "1695190491421339",
        "outTime": "1695190491423240"
    }))
    .await;

    match waiter.await.unwrap() {
        Err(OkxError::PartialFailure { failures, reply }) => {
            assert_eq!(failures.len(), 1);
            assert_eq!(failures[0].index, 1);
            assert_eq!(failures[0].code, "51008");
            assert_eq!(reply.data.len(), 2);
            assert_eq!(reply.data[0]["ordId"], "12345689");
        }
        other => panic!("expected partial failure, got {other:?}"),
    }
    client.close().await;
}

#[tokio::test]
async fn test_operation_timeout_discards_late_reply() {
    init_tracing();
    let peer = MockPeer::bind().await;
    let client = started_private(&peer).await;
    let mut conn = peer.accept_logged_in().await;
    wait_for_state(&client, ConnectionState::Streaming).await;

    let args = [json!({"instId": "BTC-USDT", "ordId": "1"})];
    let waiter = tokio::spawn({
        let client = client.clone();
        async move {
            client
                .execute_with_timeout(Operation::CancelOrder, &args, Duration::from_millis(100))
                .await
        }
    });
    let request = conn.recv_json().await;
    let err = assert_err!(waiter.await.unwrap());
    assert!(matches!(err, OkxError::Timeout { .. }));

    conn.send_json(json!({"id": request["id"], "op": "cancel-order", "code": "0", "msg": "", "data": []}))
        .await;

    let waiter = tokio::spawn({
        let client = client.clone();
        async move {
            client
                .execute(Operation::CancelOrder, &[json!({"instId": "BTC-USDT", "ordId": "2"})])
                .await
        }
    });
    let request = conn.recv_json().await;
    conn.send_json(json!({
        "id": request["id"],
        "op": "cancel-order",
        "code": "0",
        "msg": "",
        "data": [{"ordId": "2", "clOrdId": "", "sCode": "0", "sMsg": ""}]
    }))
    .await;
    let reply = assert_ok!(waiter.await.unwrap());
    assert_eq!(reply.id, request["id"].as_str().unwrap());
    client.close().await;
}

#[tokio::test]
async fn test_rejected_operation_carries_reply() {
    init_tracing();
    let peer = MockPeer::bind().await;
    let client = started_private(&peer).await;
    let mut conn = peer.accept_logged_in().await;
    wait_for_state(&client, ConnectionState::Streaming).await;

    let order = PlaceOrderRequest::market("BTC-USDT", TradeMode::Cash, Side::Sell, Decimal::ONE);
    let waiter = tokio::spawn({
        let client = client.clone();
        async move { client.place_order(&order).await }
    });
    let request = conn.recv_json().await;
    assert_eq!(request["op"], "order");
    conn.send_json(json!({
        "id": request["id"],
        "op": "order",
        "code": "1",
        "msg": "",
        "data": [{"ordId": "", "clOrdId": "", "sCode": "51119", "sMsg": "Insufficient balance"}]
    }))
    .await;

    let err = assert_err!(waiter.await.unwrap());
    assert!(matches!(err, OkxError::OperationRejected { ref code, .. } if code == "1"));
    assert_eq!(err.reply().unwrap().data.len(), 1);
    client.close().await;
}

#[tokio::test]
async fn test_reconnect_notice_opens_new_connection() {
    init_tracing();
    let peer = MockPeer::bind().await;
    let client = started_public(&peer).await;
    client.subscribe(&[tickers()]).await.unwrap();

    let mut conn = peer.accept().await;
    let _replay = conn.recv_json().await;
    conn.send_json(json!({
        "event": "notice",
        "code": "64008",
        "msg": "The connection will soon be closed for a service upgrade. Please reconnect.",
        "connId": "c1"
    }))
    .await;
    assert!(conn.try_recv_text().await.is_none());

    let mut next = peer.accept().await;
    let replay = next.recv_json().await;
    assert_eq!(replay["op"], "subscribe");
    client.close().await;
}

#[tokio::test]
async fn test_reconnect_notice_waits_for_backoff() {
    init_tracing();
    let peer = MockPeer::bind().await;
    let mut config = test_config(&peer.url, Endpoint::Public);
    config.backoff_initial_ms = 300;
    config.backoff_max_ms = 600;
    let client = WsClient::new(config).unwrap();
    client.start().unwrap();

    let mut conn = peer.accept().await;
    wait_for_state(&client, ConnectionState::Streaming).await;
    conn.send_json(json!({"event": "notice", "code": "64008", "msg": "upgrade", "connId": "c1"}))
        .await;
    assert!(conn.try_recv_text().await.is_none());

    let started = tokio::time::Instant::now();
    let _next = peer.accept().await;
    assert!(started.elapsed() >= Duration::from_millis(250));
    client.close().await;
}

#[tokio::test]
async fn test_keepalive_ping_and_dead_link() {
    init_tracing();
    let peer = MockPeer::bind().await;
    let mut config = test_config(&peer.url, Endpoint::Public);
    config.ping_interval_ms = 100;
    let client = WsClient::new(config).unwrap();
    client.start().unwrap();

    let mut conn = peer.accept().await;
    assert_eq!(conn.recv_text().await, "ping");
    conn.send_text("pong").await;
    assert_eq!(conn.recv_text().await, "ping");

    // No pong this time: the client gives up and dials again.
    let _next = peer.accept().await;
    client.close().await;
}

#[tokio::test]
async fn test_close_fails_pending_with_shutdown() {
    init_tracing();
    let peer = MockPeer::bind().await;
    let client = started_private(&peer).await;
    let mut conn = peer.accept_logged_in().await;
    wait_for_state(&client, ConnectionState::Streaming).await;

    let waiter = tokio::spawn({
        let client = client.clone();
        async move {
            client
                .execute(Operation::CancelOrder, &[json!({"instId": "BTC-USDT", "ordId": "1"})])
                .await
        }
    });
    let _request = conn.recv_json().await;
    client.close().await;

    let err = assert_err!(waiter.await.unwrap());
    assert!(matches!(err, OkxError::Shutdown));
    assert_eq!(client.state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn test_misuse_rejected_before_io() {
    let peer = MockPeer::bind().await;
    let client = WsClient::new(test_config(&peer.url, Endpoint::Private)).unwrap();

    let orders = SubscriptionArg::new(Channel::Orders);
    assert!(matches!(
        client.subscribe_and_wait(orders).await,
        Err(OkxError::LoginRequired { .. })
    ));

    let order = PlaceOrderRequest::market("BTC-USDT", TradeMode::Cash, Side::Buy, Decimal::ZERO);
    assert!(client.place_order(&order).await.is_err());
    assert!(matches!(
        client.place_orders(&[]).await,
        Err(OkxError::InvalidArgument(_))
    ));

    client.start().unwrap();
    assert!(matches!(client.start(), Err(OkxError::AlreadyStarted)));
    client.close().await;
}

/*
[INPUT]:  Stream configuration, credentials, subscription intents, operation requests
[OUTPUT]: Supervised WebSocket session feeding handlers, books and correlated replies
[POS]:    WebSocket layer - connection supervisor and public client surface
[UPDATE]: When changing connection lifecycle, routing or the public client API
*/

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::net::TcpStream;
use tokio::sync::{Mutex, watch};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::auth::{Clock, Credentials, SystemClock};
use crate::book::{OrderBookSnapshot, OrderBookStore};
use crate::config::StreamConfig;
use crate::error::{OkxError, Result};
use crate::types::{
    AmendOrderRequest, BookAction, BookData, CancelOrderRequest, Channel, Endpoint,
    MassCancelAck, MassCancelRequest, Operation, OrderAck, PlaceOrderRequest, SubscriptionArg,
};
use crate::types::requests::validate_batch_len;
use crate::ws::backoff::Backoff;
use crate::ws::correlator::{PendingOperations, Reply, evaluate_reply};
use crate::ws::dispatch::Dispatcher;
use crate::ws::handler::{BookEvent, ChannelEvent, Handler, HandlerRegistry};
use crate::ws::message::{ControlEvent, DataPush, EventKind, Frame, OperationReply, PING, Request};
use crate::ws::subscription::SubscriptionSet;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, WsMessage>;
type WsSource = SplitStream<WsStream>;

const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);
const MESSAGE_SAMPLE_LIMIT: usize = 3;
const SUBSCRIPTION_LOG_LIMIT: usize = 10;
const OTHER_LOG_LIMIT: usize = 3;
const PARSE_FAIL_LOG_LIMIT: usize = 3;
const UNHANDLED_LOG_LIMIT: usize = 3;
const RAW_LOG_MAX_BYTES: usize = 1024;

static MESSAGE_SAMPLE_COUNT: AtomicUsize = AtomicUsize::new(0);
static SUBSCRIBE_LOG_COUNT: AtomicUsize = AtomicUsize::new(0);
static OTHER_LOG_COUNT: AtomicUsize = AtomicUsize::new(0);
static PARSE_FAIL_LOG_COUNT: AtomicUsize = AtomicUsize::new(0);
static UNHANDLED_LOG_COUNT: AtomicUsize = AtomicUsize::new(0);

/// Published on [`WsClient::connection_state`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Authenticating,
    Subscribing,
    Streaming,
}

/// Why a read loop ended.
#[derive(Debug)]
pub enum ReadOutcome {
    /// Peer closed, stream ended or transport failed
    Closed(Option<OkxError>),
    /// Server announced an upgrade; reconnect after the usual backoff
    ForcedReconnect,
    Cancelled,
}

enum Inbound {
    Text(String),
    Closed,
    Skip,
}

struct Inner {
    config: StreamConfig,
    url: String,
    credentials: Option<Credentials>,
    clock: Arc<dyn Clock>,
    writer: Mutex<Option<WsSink>>,
    subscriptions: SubscriptionSet,
    pending: PendingOperations,
    books: OrderBookStore,
    handlers: HandlerRegistry,
    dispatcher: Dispatcher,
    state_tx: watch::Sender<ConnectionState>,
    shutdown: CancellationToken,
    finished: CancellationToken,
    started: AtomicBool,
}

/// Streaming client for one endpoint.
///
/// Cheap to clone; all clones drive the same connection. The supervisor
/// keeps running until [`WsClient::close`] or the shutdown token fires.
#[derive(Clone)]
pub struct WsClient {
    inner: Arc<Inner>,
}

impl WsClient {
    /// Client using the credentials from `config`, if any
    pub fn new(config: StreamConfig) -> Result<Self> {
        let credentials = config.credentials.as_ref().map(|c| c.to_credentials());
        Self::with_parts(config, credentials, Arc::new(SystemClock))
    }

    pub fn with_credentials(config: StreamConfig, credentials: Credentials) -> Result<Self> {
        Self::with_parts(config, Some(credentials), Arc::new(SystemClock))
    }

    pub fn with_parts(
        config: StreamConfig,
        credentials: Option<Credentials>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        config.validate()?;
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        let inner = Inner {
            url: config.ws_url(),
            books: OrderBookStore::new(config.checksum_depth),
            dispatcher: Dispatcher::new(config.dispatch),
            config,
            credentials,
            clock,
            writer: Mutex::new(None),
            subscriptions: SubscriptionSet::new(),
            pending: PendingOperations::new(),
            handlers: HandlerRegistry::new(),
            state_tx,
            shutdown: CancellationToken::new(),
            finished: CancellationToken::new(),
            started: AtomicBool::new(false),
        };
        Ok(Self {
            inner: Arc::new(inner),
        })
    }

    /// Spawn the supervisor. Must be called inside a tokio runtime.
    pub fn start(&self) -> Result<()> {
        if self.inner.shutdown.is_cancelled() {
            return Err(OkxError::Shutdown);
        }
        if self.inner.started.swap(true, Ordering::SeqCst) {
            return Err(OkxError::AlreadyStarted);
        }
        self.inner.dispatcher.spawn_worker();
        let inner = self.inner.clone();
        tokio::spawn(inner.run());
        Ok(())
    }

    /// Stop the supervisor and wait for it to exit.
    pub async fn close(&self) {
        self.inner.shutdown.cancel();
        self.done().await;
    }

    /// Resolves once the supervisor has exited.
    pub async fn done(&self) {
        if !self.inner.started.load(Ordering::SeqCst) {
            return;
        }
        self.inner.finished.cancelled().await;
    }

    /// Cancelling this token stops the client, same as `close`.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.inner.shutdown.clone()
    }

    pub fn connection_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state_tx.subscribe()
    }

    pub fn state(&self) -> ConnectionState {
        *self.inner.state_tx.borrow()
    }

    pub fn url(&self) -> &str {
        &self.inner.url
    }

    /// Whether each connection performs the login handshake
    pub fn logs_in(&self) -> bool {
        self.inner.logs_in()
    }

    // ==================== Handlers ====================

    /// Every inbound text frame, before classification.
    pub fn on_raw<F>(&self, callback: F)
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.inner.handlers.set_raw(callback);
    }

    /// Asynchronous failures: integrity errors, undecodable frames, unmatched
    /// error events, transport errors that triggered a reconnect.
    pub fn on_error<F>(&self, callback: F)
    where
        F: Fn(&OkxError) + Send + Sync + 'static,
    {
        self.inner.handlers.set_error(callback);
    }

    /// Decode pushes on `channel` into `T`. Replaces any previous handler.
    pub fn on_channel<T, F>(&self, channel: Channel, callback: F)
    where
        T: DeserializeOwned + Send + 'static,
        F: Fn(ChannelEvent<T>) + Send + Sync + 'static,
    {
        self.inner.handlers.register_data(channel, callback);
    }

    /// Validated book snapshots after each push on a book channel.
    pub fn on_book<F>(&self, channel: Channel, callback: F) -> Result<()>
    where
        F: Fn(BookEvent) + Send + Sync + 'static,
    {
        if !channel.is_book() {
            return Err(OkxError::InvalidArgument(format!(
                "{channel} is not an order book channel"
            )));
        }
        self.inner.handlers.register_book(channel, callback);
        Ok(())
    }

    // ==================== Subscriptions ====================

    /// Record intent and send if connected. Already-desired descriptors are skipped.
    pub async fn subscribe(&self, args: &[SubscriptionArg]) -> Result<()> {
        if args.is_empty() {
            return Err(OkxError::InvalidArgument("no subscription args".to_string()));
        }
        for arg in args {
            self.inner.check_channel(arg.channel)?;
        }

        let fresh: Vec<SubscriptionArg> = args
            .iter()
            .filter(|arg| self.inner.subscriptions.insert((*arg).clone()))
            .cloned()
            .collect();
        if fresh.is_empty() || !self.inner.accepts_requests() {
            return Ok(());
        }
        self.inner.send_subscription_frames("subscribe", &fresh).await
    }

    /// Drop intent and send if connected.
    pub async fn unsubscribe(&self, args: &[SubscriptionArg]) -> Result<()> {
        let removed: Vec<SubscriptionArg> = args
            .iter()
            .filter(|arg| self.inner.subscriptions.remove(arg))
            .cloned()
            .collect();
        for arg in &removed {
            self.inner.forget_book(arg);
        }
        if removed.is_empty() || !self.inner.accepts_requests() {
            return Ok(());
        }
        self.inner.send_subscription_frames("unsubscribe", &removed).await
    }

    /// Subscribe and wait for the server's acknowledgement.
    ///
    /// The intent is recorded first. An error event returns [`OkxError::Api`]
    /// and removes the intent if this call added it; timeout or connection
    /// loss keep it, so the next connection replays it.
    pub async fn subscribe_and_wait(&self, arg: SubscriptionArg) -> Result<ControlEvent> {
        self.subscribe_and_wait_with_timeout(arg, self.inner.config.request_timeout())
            .await
    }

    pub async fn subscribe_and_wait_with_timeout(
        &self,
        arg: SubscriptionArg,
        timeout: Duration,
    ) -> Result<ControlEvent> {
        self.inner.check_channel(arg.channel)?;
        if !self.inner.started.load(Ordering::SeqCst) {
            self.inner.subscriptions.insert(arg);
            return Err(OkxError::NotConnected);
        }

        // Slot before intent: a replay may send the descriptor as soon as it
        // is desired, and its id-less ack must find the slot.
        let mut slot = self
            .inner
            .pending
            .register("subscribe", Some(ack_key("subscribe", &arg)));
        let inserted = self.inner.subscriptions.insert(arg.clone());
        // While disconnected the replay sends it and the ack matches by key.
        if self.inner.accepts_requests() {
            let args = [arg.clone()];
            let text = Request::subscribe(Some(slot.id()), &args).to_text()?;
            match self.inner.send_text(text).await {
                Ok(()) | Err(OkxError::NotConnected) => log_subscription_sent("subscribe", &args),
                Err(err) => return Err(err),
            }
        }

        match slot.wait(timeout).await? {
            Reply::Event(event) if event.is_error() => {
                if inserted {
                    self.inner.subscriptions.remove(&arg);
                }
                Err(api_error(&event))
            }
            Reply::Event(event) => Ok(event),
            Reply::Operation(reply) => Err(OkxError::Api {
                code: reply.code,
                message: reply.msg,
            }),
        }
    }

    /// Unsubscribe; the intent is dropped only after the server confirms.
    pub async fn unsubscribe_and_wait(&self, arg: SubscriptionArg) -> Result<ControlEvent> {
        if !self.inner.accepts_requests() {
            return Err(OkxError::NotConnected);
        }
        let args = [arg];
        let args_ref = &args;
        let inner = &self.inner;
        let reply = inner
            .pending
            .round_trip(
                "unsubscribe",
                Some(ack_key("unsubscribe", &args[0])),
                inner.config.request_timeout(),
                |id| async move {
                    let text = Request::unsubscribe(Some(&id), args_ref).to_text()?;
                    inner
                        .send_text(text)
                        .await
                        .map(|()| log_subscription_sent("unsubscribe", args_ref))
                },
            )
            .await?;

        match reply {
            Reply::Event(event) if event.is_error() => Err(api_error(&event)),
            Reply::Event(event) => {
                self.inner.subscriptions.remove(&args[0]);
                self.inner.forget_book(&args[0]);
                Ok(event)
            }
            Reply::Operation(reply) => Err(OkxError::Api {
                code: reply.code,
                message: reply.msg,
            }),
        }
    }

    /// Desired subscriptions, replayed on every connection
    pub fn subscriptions(&self) -> Vec<SubscriptionArg> {
        self.inner.subscriptions.snapshot()
    }

    pub fn order_book(&self, channel: Channel, inst_id: &str) -> Option<OrderBookSnapshot> {
        self.inner.books.snapshot(channel, inst_id)
    }

    // ==================== Operations ====================

    /// Send one correlated operation and map the reply onto success,
    /// partial failure or rejection.
    pub async fn execute<A>(&self, op: Operation, args: &[A]) -> Result<OperationReply>
    where
        A: Serialize + Sync,
    {
        self.execute_with_timeout(op, args, self.inner.config.request_timeout())
            .await
    }

    pub async fn execute_with_timeout<A>(
        &self,
        op: Operation,
        args: &[A],
        timeout: Duration,
    ) -> Result<OperationReply>
    where
        A: Serialize + Sync,
    {
        if !self.inner.logs_in() {
            return Err(OkxError::LoginRequired {
                what: format!("operation {op}"),
            });
        }
        if args.is_empty() {
            return Err(OkxError::InvalidArgument(format!("{op} needs at least one arg")));
        }
        if !self.inner.accepts_requests() {
            return Err(OkxError::NotConnected);
        }

        let inner = &self.inner;
        let reply = inner
            .pending
            .round_trip(op.as_str(), None, timeout, |id| async move {
                let text = Request::new(Some(&id), op.as_str(), args).to_text()?;
                inner.send_text(text).await
            })
            .await?;

        match reply {
            Reply::Operation(reply) => evaluate_reply(reply),
            Reply::Event(event) => Err(api_error(&event)),
        }
    }

    pub async fn place_order(&self, order: &PlaceOrderRequest) -> Result<OrderAck> {
        order.validate()?;
        let reply = self
            .execute(Operation::PlaceOrder, std::slice::from_ref(order))
            .await?;
        first_item(&reply)
    }

    pub async fn place_orders(&self, orders: &[PlaceOrderRequest]) -> Result<Vec<OrderAck>> {
        validate_batch_len(orders.len())?;
        orders.iter().try_for_each(PlaceOrderRequest::validate)?;
        let reply = self.execute(Operation::BatchPlaceOrders, orders).await?;
        Ok(reply.decode()?)
    }

    pub async fn cancel_order(&self, cancel: &CancelOrderRequest) -> Result<OrderAck> {
        cancel.validate()?;
        let reply = self
            .execute(Operation::CancelOrder, std::slice::from_ref(cancel))
            .await?;
        first_item(&reply)
    }

    pub async fn cancel_orders(&self, cancels: &[CancelOrderRequest]) -> Result<Vec<OrderAck>> {
        validate_batch_len(cancels.len())?;
        cancels.iter().try_for_each(CancelOrderRequest::validate)?;
        let reply = self.execute(Operation::BatchCancelOrders, cancels).await?;
        Ok(reply.decode()?)
    }

    pub async fn amend_order(&self, amend: &AmendOrderRequest) -> Result<OrderAck> {
        amend.validate()?;
        let reply = self
            .execute(Operation::AmendOrder, std::slice::from_ref(amend))
            .await?;
        first_item(&reply)
    }

    pub async fn amend_orders(&self, amends: &[AmendOrderRequest]) -> Result<Vec<OrderAck>> {
        validate_batch_len(amends.len())?;
        amends.iter().try_for_each(AmendOrderRequest::validate)?;
        let reply = self.execute(Operation::BatchAmendOrders, amends).await?;
        Ok(reply.decode()?)
    }

    pub async fn mass_cancel(&self, request: &MassCancelRequest) -> Result<MassCancelAck> {
        request.validate()?;
        let reply = self
            .execute(Operation::MassCancel, std::slice::from_ref(request))
            .await?;
        first_item(&reply)
    }
}

impl fmt::Debug for WsClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WsClient")
            .field("url", &self.inner.url)
            .field("state", &self.state())
            .field("subscriptions", &self.inner.subscriptions.len())
            .field("pending", &self.inner.pending.len())
            .finish_non_exhaustive()
    }
}

impl Inner {
    fn logs_in(&self) -> bool {
        self.credentials.is_some() && self.config.endpoint != Endpoint::Public
    }

    fn check_channel(&self, channel: Channel) -> Result<()> {
        if channel.requires_login() && !self.logs_in() {
            return Err(OkxError::LoginRequired {
                what: format!("channel {channel}"),
            });
        }
        Ok(())
    }

    fn accepts_requests(&self) -> bool {
        matches!(
            *self.state_tx.borrow(),
            ConnectionState::Subscribing | ConnectionState::Streaming
        )
    }

    fn set_state(&self, state: ConnectionState) {
        self.state_tx.send_replace(state);
    }

    fn forget_book(&self, arg: &SubscriptionArg) {
        if let (true, Some(inst_id)) = (arg.channel.is_book(), arg.inst_id.as_deref()) {
            self.books.remove(arg.channel, inst_id);
        }
    }

    async fn run(self: Arc<Self>) {
        let _finished = self.finished.clone().drop_guard();
        let mut backoff = Backoff::new(self.config.backoff_initial(), self.config.backoff_max());
        info!(url = %self.url, login = self.logs_in(), "ws supervisor started");

        loop {
            self.set_state(ConnectionState::Connecting);
            let outcome = match self.establish().await {
                Ok(source) => {
                    backoff.reset();
                    self.set_state(ConnectionState::Streaming);
                    info!(url = %self.url, "ws session streaming");
                    self.read_loop(source).await
                }
                Err(OkxError::Shutdown) => ReadOutcome::Cancelled,
                Err(err) => ReadOutcome::Closed(Some(err)),
            };
            self.teardown().await;

            let delay = match outcome {
                ReadOutcome::Cancelled => break,
                ReadOutcome::ForcedReconnect => {
                    let delay = backoff.next_delay();
                    info!(url = %self.url, attempt = backoff.attempts(), ?delay, "server requested reconnect");
                    delay
                }
                ReadOutcome::Closed(Some(err)) => {
                    let delay = backoff.next_delay();
                    warn!(
                        attempt = backoff.attempts(),
                        ?delay,
                        error = %err,
                        "ws session ended; reconnecting with backoff"
                    );
                    self.handlers.report_error(&err);
                    delay
                }
                ReadOutcome::Closed(None) => {
                    let delay = backoff.next_delay();
                    info!(attempt = backoff.attempts(), ?delay, "ws closed by peer; reconnecting");
                    delay
                }
            };
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        self.set_state(ConnectionState::Disconnected);
        info!(url = %self.url, "ws supervisor stopped");
    }

    /// Dial, log in if configured, replay desired subscriptions.
    async fn establish(&self) -> Result<WsSource> {
        let connect_timeout = self.config.connect_timeout();
        let (stream, _response) = tokio::select! {
            _ = self.shutdown.cancelled() => return Err(OkxError::Shutdown),
            res = tokio::time::timeout(connect_timeout, connect_async(self.url.as_str())) => {
                res.map_err(|_| OkxError::timeout(connect_timeout))??
            }
        };
        debug!(url = %self.url, "ws transport connected");

        let (sink, mut source) = stream.split();
        *self.writer.lock().await = Some(sink);

        if self.logs_in() {
            self.set_state(ConnectionState::Authenticating);
            self.login(&mut source).await?;
        }

        self.set_state(ConnectionState::Subscribing);
        self.replay().await?;
        Ok(source)
    }

    async fn login(&self, source: &mut WsSource) -> Result<()> {
        let Some(credentials) = self.credentials.as_ref() else {
            return Err(OkxError::LoginRequired {
                what: "login".to_string(),
            });
        };
        let args = [credentials.login_args(self.clock.as_ref())?];
        self.send_text(Request::login(&args).to_text()?).await?;

        let deadline = self.config.request_timeout();
        tokio::select! {
            _ = self.shutdown.cancelled() => Err(OkxError::Shutdown),
            res = tokio::time::timeout(deadline, self.await_login_ack(source)) => {
                res.map_err(|_| OkxError::timeout(deadline))??;
                info!(url = %self.url, "ws login accepted");
                Ok(())
            }
        }
    }

    async fn await_login_ack(&self, source: &mut WsSource) -> Result<()> {
        while let Some(message) = source.next().await {
            let text = match classify(message?) {
                Inbound::Text(text) => text,
                Inbound::Closed => break,
                Inbound::Skip => continue,
            };
            if let Some(raw) = self.handlers.raw() {
                raw(&text);
            }
            match Frame::parse(&text) {
                Ok(Frame::Control(event)) if event.kind() == EventKind::Login => {
                    return match event.code.as_deref() {
                        None | Some("0") | Some("") => Ok(()),
                        Some(_) => Err(login_error(&event)),
                    };
                }
                Ok(Frame::Control(event)) if event.is_error() => return Err(login_error(&event)),
                _ => debug!("frame ignored while logging in"),
            }
        }
        Err(OkxError::ConnectionLost)
    }

    async fn replay(&self) -> Result<()> {
        let desired = self.subscriptions.snapshot();
        if desired.is_empty() {
            return Ok(());
        }
        self.send_subscription_frames("subscribe", &desired).await?;
        info!(count = desired.len(), "ws subscriptions replayed");
        Ok(())
    }

    async fn send_subscription_frames(&self, op: &'static str, args: &[SubscriptionArg]) -> Result<()> {
        for chunk in args.chunks(self.config.subscribe_batch_size) {
            let text = Request::new(None, op, chunk).to_text()?;
            self.send_text(text).await?;
            log_subscription_sent(op, chunk);
        }
        Ok(())
    }

    async fn send_text(&self, text: String) -> Result<()> {
        let mut writer = self.writer.lock().await;
        let sink = writer.as_mut().ok_or(OkxError::NotConnected)?;
        sink.send(WsMessage::Text(text.into())).await?;
        Ok(())
    }

    async fn read_loop(&self, mut source: WsSource) -> ReadOutcome {
        let interval = self.config.ping_interval();
        let mut awaiting_pong = false;

        loop {
            let next = tokio::select! {
                _ = self.shutdown.cancelled() => return ReadOutcome::Cancelled,
                next = tokio::time::timeout(interval, source.next()) => next,
            };

            let message = match next {
                Err(_) if awaiting_pong => {
                    return ReadOutcome::Closed(Some(OkxError::timeout(interval * 2)));
                }
                Err(_) => {
                    if let Err(err) = self.send_text(PING.to_string()).await {
                        return ReadOutcome::Closed(Some(err));
                    }
                    debug!("ws keepalive ping sent");
                    awaiting_pong = true;
                    continue;
                }
                Ok(None) => return ReadOutcome::Closed(None),
                Ok(Some(Err(err))) => return ReadOutcome::Closed(Some(err.into())),
                Ok(Some(Ok(message))) => message,
            };
            awaiting_pong = false;

            let text = match classify(message) {
                Inbound::Text(text) => text,
                Inbound::Closed => return ReadOutcome::Closed(None),
                Inbound::Skip => continue,
            };
            if let Some(outcome) = self.handle_text(&text).await {
                return outcome;
            }
        }
    }

    async fn handle_text(&self, text: &str) -> Option<ReadOutcome> {
        if let Some(raw) = self.handlers.raw() {
            raw(text);
        }

        let frame = match Frame::parse(text) {
            Ok(frame) => frame,
            Err(err) => {
                log_parse_fail_once(&err, text);
                self.handlers.report_error(&OkxError::Serialization(err));
                return None;
            }
        };

        match frame {
            Frame::Pong => debug!("ws keepalive pong"),
            Frame::Control(event) => return self.handle_control(event),
            Frame::Data(push) => self.handle_data(push).await,
            Frame::Reply(reply) => self.handle_reply(reply),
            Frame::Unrecognized => log_other_message_once(text),
        }
        None
    }

    fn handle_control(&self, event: ControlEvent) -> Option<ReadOutcome> {
        if event.is_reconnect_notice() {
            warn!(
                code = %event.code_or_default(),
                msg = %event.msg_or_default(),
                "ws reconnect notice received"
            );
            return Some(ReadOutcome::ForcedReconnect);
        }

        let kind = event.kind();
        match kind {
            EventKind::Subscribe | EventKind::Unsubscribe | EventKind::Error => {
                if self.resolve_event(&event) {
                    return None;
                }
                if kind == EventKind::Error {
                    warn!(
                        code = %event.code_or_default(),
                        msg = %event.msg_or_default(),
                        "ws error event"
                    );
                    self.handlers.report_error(&api_error(&event));
                } else {
                    debug!(event = %event.event, arg = ?event.arg, "ws subscription ack");
                }
            }
            EventKind::ChannelConnCountError => {
                warn!(code = %event.code_or_default(), msg = %event.msg_or_default(), "ws connection count limit");
                self.handlers.report_error(&api_error(&event));
            }
            EventKind::Notice => {
                info!(code = %event.code_or_default(), msg = %event.msg_or_default(), "ws notice");
            }
            EventKind::Login | EventKind::ChannelConnCount | EventKind::Other(_) => {
                debug!(event = %event.event, "ws control event");
            }
        }
        None
    }

    /// Match by id first, then by descriptor key for acks without one.
    fn resolve_event(&self, event: &ControlEvent) -> bool {
        if let Some(id) = event.id.as_deref().filter(|id| !id.is_empty())
            && self.pending.resolve(id, Reply::Event(event.clone()))
        {
            return true;
        }
        let Some(arg) = event.arg.as_ref() else {
            return false;
        };
        let ops: &[&str] = match event.kind() {
            EventKind::Subscribe => &["subscribe"],
            EventKind::Unsubscribe => &["unsubscribe"],
            _ => &["subscribe", "unsubscribe"],
        };
        ops.iter()
            .any(|op| self.pending.resolve_by_key(&ack_key(op, arg), Reply::Event(event.clone())))
    }

    async fn handle_data(&self, push: DataPush) {
        log_message_sample_once(&push);
        let channel = push.arg.channel;
        let handler = self.handlers.get(channel);

        if channel.is_book() && !self.apply_book_push(&push, handler.as_ref()).await {
            return;
        }

        match handler {
            Some(Handler::Data(handler)) => match handler.prepare(&push) {
                Ok(delivery) => self.dispatcher.dispatch(delivery).await,
                Err(err) => {
                    warn!(channel = %channel, error = %err, "ws push decode failed");
                    self.handlers.report_error(&OkxError::Serialization(err));
                }
            },
            Some(Handler::Book(_)) => {}
            None if !channel.is_book() => log_unhandled_once(channel),
            None => {}
        }
    }

    /// Feed every element into the store. Returns false on integrity failure.
    async fn apply_book_push(&self, push: &DataPush, handler: Option<&Handler>) -> bool {
        let channel = push.arg.channel;
        let items: Vec<BookData> = match push.decode() {
            Ok(items) => items,
            Err(err) => {
                warn!(channel = %channel, error = %err, "ws book push decode failed");
                self.handlers.report_error(&OkxError::Serialization(err));
                return false;
            }
        };
        let action = BookAction::from_wire(push.action.as_deref());

        for data in &items {
            let inst_id = data
                .inst_id
                .as_deref()
                .or(push.arg.inst_id.as_deref())
                .unwrap_or_default();
            match self.books.apply(channel, inst_id, action, data) {
                Ok(book) => {
                    if let Some(Handler::Book(callback)) = handler {
                        let event = BookEvent {
                            arg: push.arg.clone(),
                            book,
                        };
                        self.dispatcher
                            .dispatch(Handler::book_delivery(callback, event))
                            .await;
                    }
                }
                Err(err) => {
                    self.on_integrity_error(&push.arg, inst_id, err).await;
                    return false;
                }
            }
        }
        true
    }

    /// Only the failure that broke the book requests a fresh snapshot; deltas
    /// still in flight behind it are dropped until that snapshot lands.
    async fn on_integrity_error(&self, arg: &SubscriptionArg, inst_id: &str, err: OkxError) {
        self.handlers.report_error(&err);
        if !self.books.begin_recovery(arg.channel, inst_id) {
            debug!(channel = %arg.channel, inst_id, error = %err, "book push dropped while awaiting snapshot");
            return;
        }
        warn!(channel = %arg.channel, inst_id, error = %err, "order book invalidated");

        if !self.config.resubscribe_on_integrity_error || !self.subscriptions.contains(arg) {
            return;
        }
        let args = [arg.clone()];
        let mut result = self.send_subscription_frames("unsubscribe", &args).await;
        if result.is_ok() {
            result = self.send_subscription_frames("subscribe", &args).await;
        }
        match result {
            Ok(()) => info!(channel = %arg.channel, inst_id, "resubscribed for a fresh snapshot"),
            Err(err) => warn!(channel = %arg.channel, inst_id, error = %err, "resubscribe failed"),
        }
    }

    fn handle_reply(&self, reply: OperationReply) {
        let id = reply.id.clone();
        let op = reply.op.clone();
        if id.is_empty() || !self.pending.resolve(&id, Reply::Operation(reply)) {
            debug!(id = %id, op = %op, "reply for unknown or released id discarded");
        }
    }

    async fn teardown(&self) {
        let sink = self.writer.lock().await.take();
        if let Some(mut sink) = sink {
            let _ = tokio::time::timeout(CLOSE_TIMEOUT, sink.close()).await;
        }

        let failed = if self.shutdown.is_cancelled() {
            self.pending.fail_all(|| OkxError::Shutdown)
        } else {
            self.pending.fail_all(|| OkxError::ConnectionLost)
        };
        self.books.invalidate_all();
        self.set_state(ConnectionState::Disconnected);
        if failed > 0 {
            info!(failed, "pending operations failed on teardown");
        }
    }
}

fn classify(message: WsMessage) -> Inbound {
    match message {
        WsMessage::Text(text) => Inbound::Text(text.to_string()),
        WsMessage::Binary(bytes) => match String::from_utf8(bytes.to_vec()) {
            Ok(text) => Inbound::Text(text),
            Err(_) => Inbound::Skip,
        },
        WsMessage::Close(_) => Inbound::Closed,
        _ => Inbound::Skip,
    }
}

fn ack_key(op: &str, arg: &SubscriptionArg) -> String {
    format!("{op}:{}", arg.key())
}

fn api_error(event: &ControlEvent) -> OkxError {
    OkxError::Api {
        code: event.code_or_default(),
        message: event.msg_or_default(),
    }
}

fn login_error(event: &ControlEvent) -> OkxError {
    OkxError::Authentication {
        message: format!("{}: {}", event.code_or_default(), event.msg_or_default()),
    }
}

fn first_item<T: DeserializeOwned>(reply: &OperationReply) -> Result<T> {
    reply
        .decode::<T>()?
        .into_iter()
        .next()
        .ok_or_else(|| OkxError::Api {
            code: reply.code.clone(),
            message: "reply carried no data".to_string(),
        })
}

fn log_subscription_sent(op: &str, args: &[SubscriptionArg]) {
    let count = SUBSCRIBE_LOG_COUNT.fetch_add(1, Ordering::Relaxed);
    if count >= SUBSCRIPTION_LOG_LIMIT {
        return;
    }
    for arg in args {
        info!(
            sample_index = count + 1,
            sample_limit = SUBSCRIPTION_LOG_LIMIT,
            action = op,
            channel = %arg.channel,
            inst_id = arg.inst_id.as_deref().unwrap_or(""),
            "ws subscription sent"
        );
    }
}

fn log_message_sample_once(push: &DataPush) {
    let count = MESSAGE_SAMPLE_COUNT.fetch_add(1, Ordering::Relaxed);
    if count < MESSAGE_SAMPLE_LIMIT {
        info!(
            sample_index = count + 1,
            sample_limit = MESSAGE_SAMPLE_LIMIT,
            channel = %push.arg.channel,
            inst_id = push.arg.inst_id.as_deref().unwrap_or(""),
            items = push.data.len(),
            "ws message sample"
        );
    }
}

fn log_unhandled_once(channel: Channel) {
    let count = UNHANDLED_LOG_COUNT.fetch_add(1, Ordering::Relaxed);
    if count < UNHANDLED_LOG_LIMIT {
        debug!(
            sample_index = count + 1,
            sample_limit = UNHANDLED_LOG_LIMIT,
            channel = %channel,
            "ws push without handler dropped"
        );
    }
}

fn log_other_message_once(raw: &str) {
    let count = OTHER_LOG_COUNT.fetch_add(1, Ordering::Relaxed);
    if count < OTHER_LOG_LIMIT {
        let preview = truncate_for_log(raw, RAW_LOG_MAX_BYTES);
        debug!(
            sample_index = count + 1,
            sample_limit = OTHER_LOG_LIMIT,
            bytes = raw.len(),
            message = %preview,
            "ws message unrecognized"
        );
    }
}

fn log_parse_fail_once(err: &serde_json::Error, raw: &str) {
    let count = PARSE_FAIL_LOG_COUNT.fetch_add(1, Ordering::Relaxed);
    if count < PARSE_FAIL_LOG_LIMIT {
        info!(
            sample_index = count + 1,
            sample_limit = PARSE_FAIL_LOG_LIMIT,
            error = %err,
            bytes = raw.len(),
            "ws message parse failed"
        );
        let preview = truncate_for_log(raw, RAW_LOG_MAX_BYTES);
        debug!(
            sample_index = count + 1,
            sample_limit = PARSE_FAIL_LOG_LIMIT,
            message = %preview,
            "ws message parse failed"
        );
    }
}

fn truncate_for_log(value: &str, max_len: usize) -> String {
    if value.len() <= max_len {
        return value.to_string();
    }
    let mut end = max_len;
    while !value.is_char_boundary(end) {
        end -= 1;
    }
    let mut out = String::with_capacity(end + 3);
    out.push_str(&value[..end]);
    out.push_str("...");
    out
}

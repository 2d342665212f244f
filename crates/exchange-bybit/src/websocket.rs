//! Persistent authenticated streaming connection.
//!
//! One [`StreamConnection`] exists per role. A supervisor task owns the
//! connection state machine:
//!
//! ```text
//! Connecting ─► Authenticating ─► (fill_feed: Subscribing ─►) Active
//!     ▲                                                         │
//!     └──────────────── Closing ◄── read error / max age ───────┘
//!
//! shutdown() from any state ─► Closing ─► Closed
//! ```
//!
//! While `Active`, the supervisor owns exactly one receive task and one
//! keepalive task. Both are aborted and awaited before the next dial, so a
//! reconnect can never leave two keepalive tasks running.

use crate::error::{BybitError, Result};
use crate::messages::{self, Inbound, ORDER_TOPIC};
use crate::signing::RequestSigner;
use async_trait::async_trait;
use chrono::Utc;
use funding_sniper_core::{
    ConnectionConfig, ConnectionHealth, OrderGateway, OrderRequest, StreamEvent,
};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{FutureExt, SinkExt, StreamExt};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch, Notify};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout, Instant};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;
type WsSource = SplitStream<WsStream>;

/// How long the handshake waits for each acknowledgement.
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamRole {
    /// Order entry over the trade stream.
    Order,
    /// Order-update notifications over the private stream.
    FillFeed,
}

impl StreamRole {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Order => "order",
            Self::FillFeed => "fill_feed",
        }
    }

    const fn topics(self) -> &'static [&'static str] {
        match self {
            Self::Order => &[],
            Self::FillFeed => &[ORDER_TOPIC],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Authenticating,
    Subscribing,
    Active,
    Closing,
    Closed,
}

#[derive(Debug, Clone)]
pub struct StreamSettings {
    pub role: StreamRole,
    pub url: String,
    pub ping_interval: Duration,
    /// Connections older than this are recycled by [`StreamConnection::ensure_fresh`].
    pub max_age: Duration,
    pub initial_reconnect_delay: Duration,
    pub max_reconnect_delay: Duration,
    pub channel_buffer_size: usize,
}

impl StreamSettings {
    #[must_use]
    pub fn new(role: StreamRole, url: impl Into<String>, config: &ConnectionConfig) -> Self {
        Self {
            role,
            url: url.into(),
            ping_interval: Duration::from_secs(config.ping_interval_secs),
            max_age: Duration::from_secs(config.max_age_secs),
            initial_reconnect_delay: Duration::from_millis(config.reconnect_delay_ms),
            max_reconnect_delay: Duration::from_millis(config.max_reconnect_delay_ms),
            channel_buffer_size: 1024,
        }
    }
}

/// State shared between the handle, the supervisor, and its per-connection tasks.
struct Shared {
    settings: StreamSettings,
    signer: Arc<RequestSigner>,
    state_tx: watch::Sender<ConnectionState>,
    sink: tokio::sync::Mutex<Option<WsSink>>,
    authenticated: AtomicBool,
    keepalive_tasks: AtomicUsize,
    activations: AtomicU64,
    connected_at: Mutex<Option<Instant>>,
    recycle: Notify,
}

impl Shared {
    fn role(&self) -> &'static str {
        self.settings.role.as_str()
    }

    fn set_state(&self, state: ConnectionState) {
        self.state_tx.send_replace(state);
        debug!(role = self.role(), ?state, "connection state");
    }

    async fn send(&self, message: Message) -> Result<()> {
        let mut guard = self.sink.lock().await;
        let sink = guard
            .as_mut()
            .ok_or_else(|| BybitError::not_connected(self.role()))?;
        sink.send(message).await?;
        Ok(())
    }
}

/// Keeps the live keepalive count accurate even when the task is aborted.
struct KeepaliveGuard(Arc<Shared>);

impl KeepaliveGuard {
    fn new(shared: &Arc<Shared>) -> Self {
        shared.keepalive_tasks.fetch_add(1, Ordering::SeqCst);
        Self(Arc::clone(shared))
    }
}

impl Drop for KeepaliveGuard {
    fn drop(&mut self) {
        self.0.keepalive_tasks.fetch_sub(1, Ordering::SeqCst);
    }
}

enum Exit {
    Shutdown,
    Recycle,
    ReadFailed(String),
}

/// Handle to one supervised streaming connection.
///
/// Cloning the handle shares the same underlying connection.
#[derive(Clone)]
pub struct StreamConnection {
    shared: Arc<Shared>,
    shutdown_tx: Arc<watch::Sender<bool>>,
    supervisor: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl std::fmt::Debug for StreamConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamConnection")
            .field("role", &self.shared.settings.role)
            .field("url", &self.shared.settings.url)
            .field("state", &*self.shared.state_tx.borrow())
            .finish_non_exhaustive()
    }
}

impl StreamConnection {
    /// Starts the supervisor for `settings.role` and returns immediately.
    ///
    /// Dial failures and dropped connections are retried with exponential
    /// backoff for as long as the connection lives; progress is observable through [`Self::state`] and the
    /// returned event channel.
    #[must_use]
    pub fn connect(
        settings: StreamSettings,
        signer: Arc<RequestSigner>,
    ) -> (Self, mpsc::Receiver<StreamEvent>) {
        let (event_tx, event_rx) = mpsc::channel(settings.channel_buffer_size);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (state_tx, _) = watch::channel(ConnectionState::Connecting);

        let shared = Arc::new(Shared {
            settings,
            signer,
            state_tx,
            sink: tokio::sync::Mutex::new(None),
            authenticated: AtomicBool::new(false),
            keepalive_tasks: AtomicUsize::new(0),
            activations: AtomicU64::new(0),
            connected_at: Mutex::new(None),
            recycle: Notify::new(),
        });

        let supervisor = tokio::spawn(supervise(Arc::clone(&shared), event_tx, shutdown_rx));

        (
            Self {
                shared,
                shutdown_tx: Arc::new(shutdown_tx),
                supervisor: Arc::new(Mutex::new(Some(supervisor))),
            },
            event_rx,
        )
    }

    #[must_use]
    pub fn role(&self) -> StreamRole {
        self.shared.settings.role
    }

    /// Subscribes to state transitions.
    #[must_use]
    pub fn state(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state_tx.subscribe()
    }

    #[must_use]
    pub fn current_state(&self) -> ConnectionState {
        *self.shared.state_tx.borrow()
    }

    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.shared.authenticated.load(Ordering::SeqCst)
    }

    /// Number of keepalive tasks currently alive; at most one.
    #[must_use]
    pub fn keepalive_tasks(&self) -> usize {
        self.shared.keepalive_tasks.load(Ordering::SeqCst)
    }

    /// How many times the connection has reached `Active`.
    #[must_use]
    pub fn activations(&self) -> u64 {
        self.shared.activations.load(Ordering::SeqCst)
    }

    /// Waits until the connection is `Active`.
    ///
    /// # Errors
    ///
    /// Returns error if `limit` elapses first or the connection is closed.
    pub async fn wait_until_active(&self, limit: Duration) -> anyhow::Result<()> {
        let mut state = self.state();
        let role = self.shared.role();
        let reached = timeout(
            limit,
            state.wait_for(|s| matches!(s, ConnectionState::Active | ConnectionState::Closed)),
        )
        .await
        .map_err(|_| anyhow::anyhow!("{role} connection not active after {limit:?}"))?
        .map_err(|_| anyhow::anyhow!("{role} connection supervisor stopped"))?;

        if *reached == ConnectionState::Closed {
            anyhow::bail!("{role} connection closed");
        }
        Ok(())
    }

    /// Health check: recycles the connection if it is older than the maximum age.
    ///
    /// Returns true if a recycle was requested.
    pub fn ensure_fresh(&self) -> bool {
        let Some(connected_at) = *self.shared.connected_at.lock() else {
            return false;
        };

        let age = connected_at.elapsed();
        if age > self.shared.settings.max_age {
            info!(
                role = self.shared.role(),
                age_secs = age.as_secs(),
                "connection exceeded max age, recycling"
            );
            self.shared.recycle.notify_one();
            true
        } else {
            false
        }
    }

    /// Writes a text frame on the live connection.
    ///
    /// # Errors
    ///
    /// Returns [`BybitError::NotConnected`] unless the connection is `Active`.
    pub async fn send_text(&self, text: String) -> Result<()> {
        if self.current_state() != ConnectionState::Active {
            return Err(BybitError::not_connected(self.shared.role()));
        }
        self.shared.send(Message::Text(text)).await
    }

    /// Sends one `order.create` frame. Success means it was written, not filled.
    ///
    /// # Errors
    ///
    /// Returns error if the connection is not active or the write fails.
    pub async fn create_order(&self, order: &OrderRequest) -> Result<String> {
        let req_id = uuid::Uuid::new_v4().simple().to_string();
        let frame = messages::order_create_frame(&req_id, Utc::now().timestamp_millis(), order)?;

        info!(
            role = self.shared.role(),
            req_id = %req_id,
            symbol = %order.symbol,
            side = %order.side,
            qty = %order.quantity,
            kind = ?order.kind,
            "placing order"
        );
        self.send_text(frame).await?;
        Ok(req_id)
    }

    /// Stops the supervisor, cancels both tasks, and closes the transport.
    ///
    /// Safe to call more than once.
    pub async fn shutdown(&self) {
        self.shutdown_tx.send_replace(true);

        let handle = self.supervisor.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!(role = self.shared.role(), error = %e, "supervisor ended abnormally");
            }
        }
    }
}

impl ConnectionHealth for StreamConnection {
    fn ensure_fresh(&self) -> bool {
        Self::ensure_fresh(self)
    }
}

#[async_trait]
impl OrderGateway for StreamConnection {
    async fn submit(&self, order: OrderRequest) -> anyhow::Result<()> {
        self.create_order(&order).await?;
        Ok(())
    }
}

/// Supervisor loop: dial, hand off to the per-connection tasks, tear down, repeat.
async fn supervise(
    shared: Arc<Shared>,
    event_tx: mpsc::Sender<StreamEvent>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let settings = &shared.settings;
    let role = shared.role();
    let mut reconnect_delay = settings.initial_reconnect_delay;

    loop {
        if *shutdown_rx.borrow() {
            break;
        }

        shared.set_state(ConnectionState::Connecting);
        info!(role, url = %settings.url, "connecting");

        let handshake = tokio::select! {
            _ = shutdown_rx.changed() => break,
            result = establish(&shared) => result,
        };

        let source = match handshake {
            Ok(source) => source,
            Err(e) => {
                error!(role, error = %e, delay = ?reconnect_delay, "connection attempt failed");
                notify(&event_tx, StreamEvent::Disconnected { reason: e.to_string() });

                tokio::select! {
                    _ = shutdown_rx.changed() => break,
                    () = sleep(reconnect_delay) => {}
                }
                reconnect_delay = (reconnect_delay * 2).min(settings.max_reconnect_delay);
                continue;
            }
        };

        let guard = KeepaliveGuard::new(&shared);
        let keepalive = tokio::spawn(keepalive_loop(Arc::clone(&shared), guard));

        // A recycle requested against an earlier connection must not end this one.
        let _ = shared.recycle.notified().now_or_never();
        let active_since = Instant::now();
        *shared.connected_at.lock() = Some(active_since);
        shared.activations.fetch_add(1, Ordering::SeqCst);
        shared.set_state(ConnectionState::Active);
        info!(role, "connection active");
        notify(&event_tx, StreamEvent::Connected);

        let mut receiver = tokio::spawn(receive_loop(Arc::clone(&shared), source, event_tx.clone()));

        let exit = tokio::select! {
            _ = shutdown_rx.changed() => Exit::Shutdown,
            () = shared.recycle.notified() => Exit::Recycle,
            joined = &mut receiver => Exit::ReadFailed(match joined {
                Ok(reason) => reason,
                Err(e) => format!("receive task failed: {e}"),
            }),
        };
        let lifetime = active_since.elapsed();

        shared.set_state(ConnectionState::Closing);
        keepalive.abort();
        let _ = keepalive.await;
        if !matches!(exit, Exit::ReadFailed(_)) {
            receiver.abort();
            let _ = receiver.await;
        }
        close_sink(&shared).await;

        // Only a connection that stayed up for a full ping interval resets the backoff.
        if lifetime >= settings.ping_interval {
            reconnect_delay = settings.initial_reconnect_delay;
        }

        match exit {
            Exit::Shutdown => break,
            Exit::Recycle => info!(role, "reconnecting after recycle"),
            Exit::ReadFailed(reason) => {
                warn!(
                    role,
                    reason = %reason,
                    lifetime = ?lifetime,
                    delay = ?reconnect_delay,
                    "read failed, reconnecting"
                );
                notify(&event_tx, StreamEvent::Disconnected { reason });

                tokio::select! {
                    _ = shutdown_rx.changed() => break,
                    () = sleep(reconnect_delay) => {}
                }
                reconnect_delay = (reconnect_delay * 2).min(settings.max_reconnect_delay);
            }
        }
    }

    shared.set_state(ConnectionState::Closing);
    close_sink(&shared).await;
    shared.set_state(ConnectionState::Closed);
    info!(role, "connection closed");
}

/// Lifecycle events are best effort so a consumer that never drains its
/// channel cannot stall the supervisor.
fn notify(event_tx: &mpsc::Sender<StreamEvent>, event: StreamEvent) {
    if let Err(e) = event_tx.try_send(event) {
        debug!(error = %e, "stream event dropped");
    }
}

async fn close_sink(shared: &Shared) {
    shared.authenticated.store(false, Ordering::SeqCst);
    *shared.connected_at.lock() = None;

    let sink = shared.sink.lock().await.take();
    if let Some(mut sink) = sink {
        if let Err(e) = sink.close().await {
            debug!(role = shared.role(), error = %e, "error closing transport");
        }
    }
}

/// Dials, authenticates and subscribes. On success the sink is installed in
/// `shared` and the read half is returned for the receive task.
async fn establish(shared: &Shared) -> Result<WsSource> {
    let (ws, _response) = connect_async(shared.settings.url.as_str()).await?;
    let (mut sink, mut source) = ws.split();

    shared.set_state(ConnectionState::Authenticating);
    let auth = shared.signer.ws_auth(Utc::now().timestamp_millis())?;
    sink.send(Message::Text(messages::auth_frame(&auth)?)).await?;

    match await_ack(shared, &mut source, "auth").await? {
        (true, _) => {
            shared.authenticated.store(true, Ordering::SeqCst);
            info!(role = shared.role(), "authenticated");
        }
        (false, message) => {
            error!(role = shared.role(), message = %message, "authentication rejected");
            return Err(BybitError::api(-1, format!("authentication rejected: {message}")));
        }
    }

    let topics = shared.settings.role.topics();
    if !topics.is_empty() {
        shared.set_state(ConnectionState::Subscribing);
        sink.send(Message::Text(messages::subscribe_frame(topics)?)).await?;

        if let (false, message) = await_ack(shared, &mut source, "subscribe").await? {
            error!(role = shared.role(), message = %message, "subscription rejected");
            return Err(BybitError::api(-1, format!("subscription rejected: {message}")));
        }
        info!(role = shared.role(), ?topics, "subscribed");
    }

    *shared.sink.lock().await = Some(sink);
    Ok(source)
}

/// Reads frames until the acknowledgement for `op` arrives.
async fn await_ack(shared: &Shared, source: &mut WsSource, op: &str) -> Result<(bool, String)> {
    let deadline = Instant::now() + HANDSHAKE_TIMEOUT;

    loop {
        let next = tokio::time::timeout_at(deadline, source.next())
            .await
            .map_err(|_| BybitError::Timeout(format!("no {op} acknowledgement")))?;

        let text = match next {
            Some(Ok(Message::Text(text))) => text,
            Some(Ok(Message::Close(frame))) => {
                return Err(BybitError::WebSocket(format!("closed during {op}: {frame:?}")));
            }
            Some(Ok(_)) => continue,
            Some(Err(e)) => return Err(e.into()),
            None => return Err(BybitError::WebSocket(format!("stream ended during {op}"))),
        };

        match messages::parse_inbound(&text) {
            Ok(Inbound::Auth { success, message }) if op == "auth" => return Ok((success, message)),
            Ok(Inbound::Subscribe { success, message }) if op == "subscribe" => {
                return Ok((success, message));
            }
            Ok(other) => debug!(role = shared.role(), frame = ?other, "frame during handshake"),
            Err(e) => warn!(role = shared.role(), error = %e, raw = %text, "unparseable frame"),
        }
    }
}

/// Sends `{"op":"ping"}` every ping interval until aborted.
async fn keepalive_loop(shared: Arc<Shared>, _guard: KeepaliveGuard) {
    let mut ticker = tokio::time::interval(shared.settings.ping_interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    ticker.tick().await;

    loop {
        ticker.tick().await;
        debug!(role = shared.role(), "sending ping");
        if let Err(e) = shared.send(Message::Text(messages::ping_frame())).await {
            // The receive loop observes the broken transport and triggers the reconnect.
            warn!(role = shared.role(), error = %e, "failed to send ping");
        }
    }
}

/// Reads until the transport fails and returns the reason.
async fn receive_loop(
    shared: Arc<Shared>,
    mut source: WsSource,
    event_tx: mpsc::Sender<StreamEvent>,
) -> String {
    loop {
        match source.next().await {
            Some(Ok(Message::Text(text))) => handle_text(&shared, &text, &event_tx).await,
            Some(Ok(Message::Binary(data))) => match String::from_utf8(data) {
                Ok(text) => handle_text(&shared, &text, &event_tx).await,
                Err(e) => warn!(role = shared.role(), error = %e, "non-utf8 binary frame"),
            },
            Some(Ok(Message::Ping(data))) => {
                if let Err(e) = shared.send(Message::Pong(data)).await {
                    warn!(role = shared.role(), error = %e, "failed to answer ping");
                }
            }
            Some(Ok(Message::Pong(_) | Message::Frame(_))) => {}
            Some(Ok(Message::Close(frame))) => {
                return frame.map_or_else(
                    || "connection closed".to_string(),
                    |f| format!("closed by peer: {}", f.reason),
                );
            }
            Some(Err(e)) => return format!("read error: {e}"),
            None => return "stream ended".to_string(),
        }
    }
}

async fn handle_text(shared: &Shared, text: &str, event_tx: &mpsc::Sender<StreamEvent>) {
    let role = shared.role();

    match messages::parse_inbound(text) {
        Ok(Inbound::Pong) => debug!(role, "pong"),
        Ok(Inbound::Auth { success, message }) => {
            shared.authenticated.store(success, Ordering::SeqCst);
            if success {
                info!(role, "authenticated");
            } else {
                error!(role, message = %message, "authentication rejected");
            }
        }
        Ok(Inbound::Subscribe { success, message }) => {
            if success {
                info!(role, "subscription confirmed");
            } else {
                error!(role, message = %message, "subscription rejected");
            }
        }
        Ok(Inbound::OrderAck {
            req_id,
            ret_code,
            ret_msg,
        }) => {
            if ret_code == 0 {
                info!(role, req_id = ?req_id, "order accepted");
            } else {
                warn!(role, req_id = ?req_id, ret_code, ret_msg = %ret_msg, "order rejected");
            }
        }
        Ok(Inbound::OrderUpdates(updates)) => {
            for update in updates {
                debug!(role, symbol = %update.symbol, status = ?update.status, "order update");
                if event_tx.send(StreamEvent::OrderUpdate(update)).await.is_err() {
                    debug!(role, "order update receiver dropped");
                }
            }
        }
        Ok(Inbound::Unknown) => debug!(role, raw = %text, "unhandled frame"),
        Err(e) => warn!(role, error = %e, raw = %text, "unparseable frame"),
    }
}

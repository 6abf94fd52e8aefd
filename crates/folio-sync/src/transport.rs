//! # Push Channel
//!
//! WebSocket client for the catalog's push hub, with automatic reconnection
//! and bounded backoff.
//!
//! ## Connection Lifecycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                     Push Channel States                                 │
//! │                                                                         │
//! │  ┌────────────┐    connect()    ┌────────────┐                         │
//! │  │Disconnected│ ──────────────► │ Connecting │                         │
//! │  └─────┬──────┘                 └─────┬──────┘                         │
//! │        │                    success   │   failure                       │
//! │        │                        ┌─────┴─────┐                          │
//! │        │                        ▼           │                           │
//! │        │              ┌────────────┐        │                           │
//! │        │              │ Connected  │◄────┐  │                           │
//! │        │              └─────┬──────┘     │  │                           │
//! │        │                    │ drop       │ success                      │
//! │        │                    ▼            │  │                           │
//! │        │              ┌────────────┐     │  │                           │
//! │        │              │Reconnecting│ ────┘◄─┘                           │
//! │        │              └─────┬──────┘  (backoff, then retry)             │
//! │        │                    │ retries exhausted / close()               │
//! │        │  close()           ▼                                           │
//! │        └──────────────► ┌────────────┐                                  │
//! │                         │   Closed   │  terminal                        │
//! │                         └────────────┘                                  │
//! │                                                                         │
//! │  BACKOFF STRATEGY (Exponential with Jitter)                            │
//! │  ───────────────────────────────────────────                           │
//! │  Attempt 1: 500ms                                                       │
//! │  Attempt 2: 1s                                                          │
//! │  Attempt 3: 2s                                                          │
//! │  ...                                                                    │
//! │  Max: 30s, at most `max_retries` consecutive failures                   │
//! │                                                                         │
//! │  DELIVERY: at-most-once. Events sent while disconnected are lost;      │
//! │  consumers resynchronize when they see Connected again.                │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use backoff::backoff::Backoff;
use backoff::ExponentialBackoff;
use futures_util::{SinkExt, StreamExt};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::time::{timeout, Instant, MissedTickBehavior};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};

use crate::config::websocket_url;
use crate::error::{SyncError, SyncResult};
use crate::protocol::{
    handshake_request, parse_handshake_response, ping_record, split_records, HubMessage,
    PushEvent,
};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

// =============================================================================
// Channel State
// =============================================================================

/// Connection state of the push channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Never connected.
    Disconnected,
    /// First connection attempt in progress.
    Connecting,
    /// Connected and handshaken.
    Connected,
    /// Connection lost; waiting out backoff or retrying.
    Reconnecting,
    /// Closed for good.
    Closed,
}

impl ConnectionState {
    /// Returns true while the channel owns a live or pending connection.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            ConnectionState::Connecting | ConnectionState::Connected | ConnectionState::Reconnecting
        )
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "disconnected"),
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Connected => write!(f, "connected"),
            ConnectionState::Reconnecting => write!(f, "reconnecting"),
            ConnectionState::Closed => write!(f, "closed"),
        }
    }
}

/// Everything the channel reports, in order.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    /// The hub signalled a remote change.
    Push(PushEvent),
    /// The connection changed state.
    State(ConnectionState),
}

// =============================================================================
// Channel Configuration
// =============================================================================

/// Configuration for the push channel.
#[derive(Debug, Clone)]
pub struct PushChannelConfig {
    /// Invocation target that carries record changes.
    pub event_name: String,

    /// Connect + handshake timeout.
    pub connect_timeout: Duration,

    /// Initial backoff duration.
    pub initial_backoff: Duration,

    /// Maximum backoff duration.
    pub max_backoff: Duration,

    /// Consecutive failures tolerated before closing (must be > 0).
    pub max_retries: u32,

    /// Client keepalive interval.
    pub ping_interval: Duration,

    /// Hub silence tolerated before the connection counts as dropped.
    pub server_timeout: Duration,
}

impl Default for PushChannelConfig {
    fn default() -> Self {
        PushChannelConfig {
            event_name: "ReceiveBook".to_string(),
            connect_timeout: Duration::from_secs(10),
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(30),
            max_retries: 4,
            ping_interval: Duration::from_secs(15),
            server_timeout: Duration::from_secs(30),
        }
    }
}

// =============================================================================
// Push Channel
// =============================================================================

/// One logical connection to the push hub.
///
/// ## Usage
/// ```rust,ignore
/// let (channel, mut events) = PushChannel::new(PushChannelConfig::default());
/// let mut state = channel.connect("http://localhost:5000/hubs/books")?;
///
/// while let Some(event) = events.recv().await {
///     match event {
///         ChannelEvent::Push(push) => println!("changed: {}", push.payload),
///         ChannelEvent::State(s) => println!("hub is {}", s),
///     }
/// }
/// ```
pub struct PushChannel {
    config: PushChannelConfig,
    state_tx: Arc<watch::Sender<ConnectionState>>,
    events_tx: mpsc::Sender<ChannelEvent>,
    shutdown_tx: Mutex<Option<mpsc::Sender<()>>>,
    last_error: Arc<Mutex<Option<String>>>,
}

impl PushChannel {
    /// Creates a disconnected channel and the receiver for its events.
    pub fn new(config: PushChannelConfig) -> (PushChannel, mpsc::Receiver<ChannelEvent>) {
        let (events_tx, events_rx) = mpsc::channel::<ChannelEvent>(100);
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);

        let channel = PushChannel {
            config,
            state_tx: Arc::new(state_tx),
            events_tx,
            shutdown_tx: Mutex::new(None),
            last_error: Arc::new(Mutex::new(None)),
        };

        (channel, events_rx)
    }

    /// Starts connecting to `url`.
    ///
    /// Idempotent: while the channel is connecting, connected or
    /// reconnecting this is a no-op that returns an observer of the existing
    /// connection. Fails with [`SyncError::ChannelClosed`] after `close()`.
    pub fn connect(&self, url: &str) -> SyncResult<watch::Receiver<ConnectionState>> {
        let ws_url = websocket_url(url)?;

        let mut shutdown_slot = lock(&self.shutdown_tx);

        let mut previous = ConnectionState::Disconnected;
        let started = self.state_tx.send_if_modified(|state| {
            previous = *state;
            if *state == ConnectionState::Disconnected {
                *state = ConnectionState::Connecting;
                true
            } else {
                false
            }
        });

        if !started {
            return match previous {
                ConnectionState::Closed => Err(SyncError::ChannelClosed),
                state => {
                    debug!(%state, "connect() on an active channel, reusing connection");
                    Ok(self.state_tx.subscribe())
                }
            };
        }

        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>(1);
        *shutdown_slot = Some(shutdown_tx);
        drop(shutdown_slot);

        let worker = ChannelWorker {
            url: ws_url.to_string(),
            config: self.config.clone(),
            state_tx: self.state_tx.clone(),
            events_tx: self.events_tx.clone(),
            shutdown_rx,
            last_error: self.last_error.clone(),
        };
        tokio::spawn(worker.run());

        Ok(self.state_tx.subscribe())
    }

    /// Returns the current connection state.
    pub fn state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    /// Returns an observer of state changes.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    /// Returns true if currently connected.
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Returns the most recent connection failure, if any.
    pub fn last_error(&self) -> Option<String> {
        lock(&self.last_error).clone()
    }

    /// Closes the channel and stops reconnecting. `Closed` is terminal.
    ///
    /// Returns once the state is `Closed`.
    pub async fn close(&self) {
        let shutdown_tx = {
            let mut slot = lock(&self.shutdown_tx);
            match slot.take() {
                Some(tx) => Some(tx),
                None => {
                    let changed = self.state_tx.send_if_modified(|state| {
                        if *state == ConnectionState::Closed {
                            false
                        } else {
                            *state = ConnectionState::Closed;
                            true
                        }
                    });
                    if changed {
                        info!("Push channel closed before connecting");
                        let _ = self
                            .events_tx
                            .try_send(ChannelEvent::State(ConnectionState::Closed));
                    }
                    None
                }
            }
        };

        if let Some(tx) = shutdown_tx {
            // The worker may already have exited after exhausting retries.
            let _ = tx.send(()).await;
            let mut state_rx = self.state_tx.subscribe();
            let _ = state_rx
                .wait_for(|state| *state == ConnectionState::Closed)
                .await;
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// =============================================================================
// Channel Worker
// =============================================================================

/// Why a connected session ended without an error.
enum SessionEnd {
    /// `close()` was called.
    Shutdown,
    /// Nobody is listening for events anymore.
    ReceiverDropped,
    /// The hub closed the session and asked us not to come back.
    ClosedByHub(Option<String>),
}

/// What a single hub record means for the session.
enum RecordOutcome {
    Continue,
    Deliver(PushEvent),
    Closed {
        error: Option<String>,
        allow_reconnect: bool,
    },
}

/// Background task owning the socket and the reconnect loop.
struct ChannelWorker {
    url: String,
    config: PushChannelConfig,
    state_tx: Arc<watch::Sender<ConnectionState>>,
    events_tx: mpsc::Sender<ChannelEvent>,
    shutdown_rx: mpsc::Receiver<()>,
    last_error: Arc<Mutex<Option<String>>>,
}

impl ChannelWorker {
    /// Main reconnect loop.
    async fn run(mut self) {
        info!(url = %self.url, "Push channel starting");
        let _ = self
            .events_tx
            .send(ChannelEvent::State(ConnectionState::Connecting))
            .await;

        let mut backoff = self.create_backoff();
        let mut failures = 0u32;

        loop {
            let attempt = tokio::select! {
                result = connect_and_handshake(&self.url, &self.config) => result,
                _ = self.shutdown_rx.recv() => {
                    info!("Shutdown while connecting");
                    break;
                }
            };

            match attempt {
                Ok((ws_stream, leftover)) => {
                    info!("Push channel connected");
                    backoff.reset();
                    failures = 0;
                    self.transition(ConnectionState::Connected).await;

                    match self.session(ws_stream, leftover).await {
                        Ok(SessionEnd::Shutdown) => {
                            info!("Push channel shutting down");
                            break;
                        }
                        Ok(SessionEnd::ReceiverDropped) => {
                            warn!("Push event receiver dropped, closing channel");
                            break;
                        }
                        Ok(SessionEnd::ClosedByHub(reason)) => {
                            warn!(?reason, "Hub closed the connection without reconnect");
                            self.record_error(SyncError::Connection(format!(
                                "hub closed the connection: {}",
                                reason.as_deref().unwrap_or("no reason given")
                            )));
                            break;
                        }
                        Err(e) => {
                            warn!(?e, "Push channel dropped");
                            self.record_error(e);
                        }
                    }
                }
                Err(e) => {
                    warn!(?e, "Failed to connect to push hub");
                    self.record_error(e);
                }
            }

            failures += 1;
            if failures > self.config.max_retries {
                error!(
                    max_retries = self.config.max_retries,
                    "Max reconnection attempts reached"
                );
                self.record_error(SyncError::Connection(format!(
                    "gave up after {} reconnection attempts",
                    self.config.max_retries
                )));
                break;
            }

            self.transition(ConnectionState::Reconnecting).await;

            let Some(delay) = backoff.next_backoff() else {
                error!("Backoff exhausted");
                break;
            };
            debug!(?delay, attempt = failures, "Waiting before reconnect");

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = self.shutdown_rx.recv() => {
                    info!("Shutdown during backoff");
                    break;
                }
            }
        }

        self.transition(ConnectionState::Closed).await;
        info!("Push channel stopped");
    }

    /// Runs one connected session until it ends.
    async fn session(
        &mut self,
        ws_stream: WsStream,
        leftover: Vec<String>,
    ) -> SyncResult<SessionEnd> {
        let (mut write, mut read) = ws_stream.split();

        for record in &leftover {
            if let Some(end) = self.handle_record(record).await? {
                return Ok(end);
            }
        }

        let ping_every = self.config.ping_interval;
        let mut ping_interval = tokio::time::interval_at(Instant::now() + ping_every, ping_every);
        ping_interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let server_timeout = self.config.server_timeout;
        let idle = tokio::time::sleep(server_timeout);
        tokio::pin!(idle);

        loop {
            tokio::select! {
                frame = read.next() => {
                    idle.as_mut().reset(Instant::now() + server_timeout);
                    match frame {
                        Some(Ok(WsMessage::Text(text))) => {
                            for record in split_records(text.as_str()) {
                                if let Some(end) = self.handle_record(record).await? {
                                    if matches!(end, SessionEnd::ClosedByHub(_) | SessionEnd::ReceiverDropped) {
                                        let _ = write.send(WsMessage::Close(None)).await;
                                    }
                                    return Ok(end);
                                }
                            }
                        }
                        Some(Ok(WsMessage::Ping(data))) => {
                            write.send(WsMessage::Pong(data)).await?;
                        }
                        Some(Ok(WsMessage::Pong(_))) => {
                            debug!("Received pong");
                        }
                        Some(Ok(WsMessage::Close(frame))) => {
                            info!(?frame, "Received close frame");
                            return Err(SyncError::Disconnected);
                        }
                        Some(Ok(WsMessage::Binary(_))) => {
                            warn!("Received unexpected binary message");
                        }
                        Some(Ok(WsMessage::Frame(_))) => {}
                        Some(Err(e)) => {
                            return Err(SyncError::from(e));
                        }
                        None => {
                            return Err(SyncError::Disconnected);
                        }
                    }
                }

                _ = ping_interval.tick() => {
                    write.send(WsMessage::Text(ping_record().into())).await?;
                    debug!("Sent ping");
                }

                _ = &mut idle => {
                    warn!(timeout = ?server_timeout, "Hub went silent");
                    return Err(SyncError::Timeout(server_timeout.as_secs()));
                }

                _ = self.shutdown_rx.recv() => {
                    let _ = write.send(WsMessage::Close(None)).await;
                    return Ok(SessionEnd::Shutdown);
                }
            }
        }
    }

    /// Applies one hub record; `Some` ends the session.
    async fn handle_record(&self, record: &str) -> SyncResult<Option<SessionEnd>> {
        match self.classify(record) {
            RecordOutcome::Continue => Ok(None),
            RecordOutcome::Deliver(event) => {
                debug!(bytes = event.payload.len(), "Received push event");
                if self.events_tx.send(ChannelEvent::Push(event)).await.is_err() {
                    return Ok(Some(SessionEnd::ReceiverDropped));
                }
                Ok(None)
            }
            RecordOutcome::Closed {
                error,
                allow_reconnect,
            } => {
                info!(?error, allow_reconnect, "Hub sent close");
                if allow_reconnect {
                    Err(SyncError::Disconnected)
                } else {
                    Ok(Some(SessionEnd::ClosedByHub(error)))
                }
            }
        }
    }

    fn classify(&self, record: &str) -> RecordOutcome {
        match HubMessage::parse(record) {
            Ok(HubMessage::Close {
                error,
                allow_reconnect,
            }) => RecordOutcome::Closed {
                error,
                allow_reconnect,
            },
            Ok(message) => {
                let msg_type = message.type_name();
                match message.into_push_event(&self.config.event_name) {
                    Some(event) => RecordOutcome::Deliver(event),
                    None => {
                        debug!(msg_type, "Ignoring hub message");
                        RecordOutcome::Continue
                    }
                }
            }
            Err(e) => {
                warn!(?e, "Ignoring malformed hub record");
                RecordOutcome::Continue
            }
        }
    }

    /// Publishes a state change to observers and the event stream.
    async fn transition(&self, state: ConnectionState) {
        let previous = self.state_tx.send_replace(state);
        if previous != state {
            debug!(from = %previous, to = %state, "Push channel state changed");
            let _ = self.events_tx.send(ChannelEvent::State(state)).await;
        }
    }

    fn record_error(&self, err: SyncError) {
        *lock(&self.last_error) = Some(err.to_string());
    }

    /// Creates the exponential backoff configuration.
    fn create_backoff(&self) -> ExponentialBackoff {
        ExponentialBackoff {
            current_interval: self.config.initial_backoff,
            initial_interval: self.config.initial_backoff,
            max_interval: self.config.max_backoff,
            multiplier: 2.0,
            max_elapsed_time: None, // bounded by max_retries instead
            ..Default::default()
        }
    }
}

/// Opens the socket and completes the hub handshake within the connect timeout.
///
/// Returns any records that arrived in the same frame as the handshake answer.
async fn connect_and_handshake(
    url: &str,
    config: &PushChannelConfig,
) -> SyncResult<(WsStream, Vec<String>)> {
    match timeout(config.connect_timeout, open_session(url)).await {
        Ok(result) => result,
        Err(_) => Err(SyncError::Timeout(config.connect_timeout.as_secs())),
    }
}

async fn open_session(url: &str) -> SyncResult<(WsStream, Vec<String>)> {
    let (mut ws_stream, response) = connect_async(url).await?;
    debug!(status = ?response.status(), "WebSocket upgrade complete");

    ws_stream
        .send(WsMessage::Text(handshake_request()?.into()))
        .await?;

    loop {
        match ws_stream.next().await {
            Some(Ok(WsMessage::Text(text))) => {
                let mut records = split_records(text.as_str());
                let answer = records
                    .next()
                    .ok_or_else(|| SyncError::Protocol("empty handshake response".into()))?;
                parse_handshake_response(answer)?;
                let leftover = records.map(str::to_string).collect();
                return Ok((ws_stream, leftover));
            }
            Some(Ok(WsMessage::Ping(_) | WsMessage::Pong(_) | WsMessage::Frame(_))) => continue,
            Some(Ok(WsMessage::Close(frame))) => {
                return Err(SyncError::Connection(format!(
                    "hub closed during handshake: {:?}",
                    frame
                )));
            }
            Some(Ok(WsMessage::Binary(_))) => {
                return Err(SyncError::Protocol("binary frame during handshake".into()));
            }
            Some(Err(e)) => return Err(SyncError::from(e)),
            None => return Err(SyncError::Disconnected),
        }
    }
}

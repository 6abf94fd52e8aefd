//! # Synchronizer
//!
//! Joins the query path and the push path into one race-free view.
//!
//! ## Architecture
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Synchronizer Architecture                          │
//! │                                                                         │
//! │   UI intent                         PushChannel                         │
//! │   query(req)  create/update/delete  ChannelEvent stream                 │
//! │      │               │                     │                            │
//! │      │               │ Ok(true)            ▼                            │
//! │      │               │            ┌─────────────────┐                   │
//! │      │               ├──────────► │  event router   │ Push / reconnect  │
//! │      │               │  trigger   └────────┬────────┘                   │
//! │      │               ▼                     │ trigger                    │
//! │      │      ┌──────────────────┐           │                            │
//! │      │      │ refresh channel  │ ◄─────────┘   capacity 1: at most      │
//! │      │      │   (mpsc, cap 1)  │               one pending refetch      │
//! │      │      └────────┬─────────┘                                        │
//! │      │               ▼                                                  │
//! │      │      ┌──────────────────┐  wait coalesce window, drain,          │
//! │      │      │  refresh worker  │  reissue the CURRENT request           │
//! │      │      └────────┬─────────┘                                        │
//! │      ▼               ▼                                                  │
//! │   ┌──────────────────────────────┐                                      │
//! │   │ next_epoch ─► fetch_page ─►  │   PageCache (epoch guard)            │
//! │   │ try_replace_with ──────────► │ ─► SubscriberBus (PageChanged)       │
//! │   └──────────────────────────────┘                                      │
//! │                                                                         │
//! │  RULES                                                                  │
//! │  ─────                                                                  │
//! │  • Newer requests win, whatever order responses arrive in              │
//! │  • Push events are refetch signals; payloads are never merged          │
//! │  • Notified epochs never decrease                                      │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::Utc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{broadcast, mpsc, watch, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use folio_core::validation::validate_page_request;
use folio_core::{CatalogRecord, PageRequest, PageResult, RecordId};

use crate::bus::{CatalogEvent, SubscriberBus};
use crate::cache::{CacheEntry, PageCache};
use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::query::{HttpQueryService, QueryService};
use crate::transport::{ChannelEvent, ConnectionState, PushChannel};

// =============================================================================
// Sync Status
// =============================================================================

/// Current synchronizer status for external queries.
#[derive(Debug, Clone)]
pub struct SyncStatus {
    /// Current push channel state.
    pub connection_state: ConnectionState,

    /// Whether the push channel is connected.
    pub is_connected: bool,

    /// Hub the push channel was pointed at (if any).
    pub hub_url: Option<String>,

    /// Epoch of the latest request.
    pub epoch: u64,

    /// Refresh triggers received (push events, reconnects, mutations).
    pub refresh_requests: u64,

    /// Refetches actually performed after coalescing.
    pub refetches: u64,

    /// Last time a page was adopted (RFC 3339).
    pub last_refresh: Option<String>,

    /// Last error message (if any).
    pub last_error: Option<String>,
}

impl Default for SyncStatus {
    fn default() -> Self {
        SyncStatus {
            connection_state: ConnectionState::Disconnected,
            is_connected: false,
            hub_url: None,
            epoch: 0,
            refresh_requests: 0,
            refetches: 0,
            last_refresh: None,
            last_error: None,
        }
    }
}

/// What happened to a query.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryOutcome {
    /// The page was adopted and subscribers were notified.
    Applied(Arc<PageResult>),

    /// A newer request was issued while this one was in flight.
    Superseded,
}

impl QueryOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, QueryOutcome::Applied(_))
    }

    /// The adopted page, if any.
    pub fn page(&self) -> Option<&Arc<PageResult>> {
        match self {
            QueryOutcome::Applied(page) => Some(page),
            QueryOutcome::Superseded => None,
        }
    }
}

// =============================================================================
// Shared State
// =============================================================================

/// State shared by the synchronizer and its background tasks.
struct Shared {
    query: Arc<dyn QueryService>,
    cache: PageCache,
    bus: SubscriberBus,
    status: RwLock<SyncStatus>,
    connection: watch::Sender<ConnectionState>,
    refresh_tx: mpsc::Sender<()>,
    refresh_requests: AtomicU64,
    refetches: AtomicU64,
}

impl Shared {
    /// The query path: validate, take an epoch, fetch, adopt if still latest.
    async fn run_query(&self, request: PageRequest) -> SyncResult<QueryOutcome> {
        validate_page_request(&request)?;

        let epoch = self.cache.next_epoch(request.clone());
        debug!(epoch, %request, "Issuing query");

        let page = match self.query.fetch_page(&request).await {
            Ok(page) => Arc::new(page),
            Err(e) if self.cache.read().request_epoch != epoch => {
                debug!(epoch, ?e, "Superseded query failed, ignoring");
                return Ok(QueryOutcome::Superseded);
            }
            Err(e) => {
                warn!(epoch, ?e, "Query failed");
                self.status.write().await.last_error = Some(e.to_string());
                return Err(e);
            }
        };

        let outcome = self.adopt(epoch, page);
        if outcome.is_applied() {
            let mut status = self.status.write().await;
            status.last_refresh = Some(Utc::now().to_rfc3339());
            status.last_error = None;
        }
        Ok(outcome)
    }

    /// Adopts `page` if `epoch` is still the latest, notifying subscribers
    /// under the cache lock.
    fn adopt(&self, epoch: u64, page: Arc<PageResult>) -> QueryOutcome {
        let accepted = self.cache.try_replace_with(epoch, page.clone(), |adopted| {
            self.bus.publish(CatalogEvent::PageChanged {
                epoch,
                page: adopted.clone(),
            });
        });

        if accepted {
            debug!(
                epoch,
                current_page = page.current_page,
                total_pages = page.total_pages,
                "Adopted page"
            );
            QueryOutcome::Applied(page)
        } else {
            debug!(epoch, "Discarding superseded page");
            QueryOutcome::Superseded
        }
    }

    /// Reissues the current request, if there is one.
    async fn refetch_current(&self) -> SyncResult<Option<QueryOutcome>> {
        let Some((_, request)) = self.cache.current_request() else {
            debug!("No current request, skipping refresh");
            return Ok(None);
        };

        self.refetches.fetch_add(1, Ordering::Relaxed);
        self.run_query(request).await.map(Some)
    }

    /// Asks for a refetch of the current request. Never blocks.
    fn trigger_refresh(&self, reason: &'static str) {
        self.refresh_requests.fetch_add(1, Ordering::Relaxed);
        match self.refresh_tx.try_send(()) {
            Ok(()) => debug!(reason, "Refresh scheduled"),
            Err(TrySendError::Full(())) => trace!(reason, "Refresh already pending"),
            Err(TrySendError::Closed(())) => debug!(reason, "Refresh worker gone, ignoring trigger"),
        }
    }

    async fn refresh_failed(&self, err: SyncError) {
        warn!(?err, "Background refresh failed");
        let message = err.to_string();
        self.status.write().await.last_error = Some(message.clone());
        self.bus.publish(CatalogEvent::RefreshFailed {
            message,
            retryable: err.is_retryable(),
        });
    }
}

// =============================================================================
// Synchronizer
// =============================================================================

/// Keeps one page of a remote catalog current.
///
/// ## Usage
/// ```rust,ignore
/// let config = SyncConfig::load(None)?;
/// let mut sync = Synchronizer::with_http(config)?;
/// sync.start().await?;
///
/// let mut events = sync.subscribe();
/// sync.query(PageRequest::new(1, 10, "title")).await?;
///
/// while let Ok(event) = events.recv().await {
///     if let CatalogEvent::PageChanged { page, .. } = event {
///         render(&page);
///     }
/// }
/// ```
pub struct Synchronizer {
    config: Arc<SyncConfig>,
    shared: Arc<Shared>,
    refresh_rx: Option<mpsc::Receiver<()>>,
    shutdown_tx: watch::Sender<bool>,
    channel: Option<PushChannel>,
    tasks: Vec<JoinHandle<()>>,
}

impl Synchronizer {
    /// Creates a synchronizer over any query service.
    pub fn new(config: SyncConfig, query: Arc<dyn QueryService>) -> Self {
        let (refresh_tx, refresh_rx) = mpsc::channel::<()>(1);
        let (connection, _) = watch::channel(ConnectionState::Disconnected);
        let (shutdown_tx, _) = watch::channel(false);

        let shared = Shared {
            query,
            cache: PageCache::new(),
            bus: SubscriberBus::default(),
            status: RwLock::new(SyncStatus::default()),
            connection,
            refresh_tx,
            refresh_requests: AtomicU64::new(0),
            refetches: AtomicU64::new(0),
        };

        Synchronizer {
            config: Arc::new(config),
            shared: Arc::new(shared),
            refresh_rx: Some(refresh_rx),
            shutdown_tx,
            channel: None,
            tasks: Vec::new(),
        }
    }

    /// Creates a synchronizer talking HTTP to the configured catalog.
    pub fn with_http(config: SyncConfig) -> SyncResult<Self> {
        let query = HttpQueryService::new(&config)?;
        Ok(Self::new(config, Arc::new(query)))
    }

    /// Starts background work.
    ///
    /// Spawns the refresh worker and, when a hub URL is configured, opens the
    /// push channel and routes its events. Calling `start` twice is a no-op.
    pub async fn start(&mut self) -> SyncResult<()> {
        self.ensure_running()?;
        self.config.validate()?;

        let Some(refresh_rx) = self.refresh_rx.take() else {
            debug!("Synchronizer already started");
            return Ok(());
        };

        let window = self.config.coalesce_window();
        info!(coalesce_window = ?window, "Starting synchronizer");

        self.tasks.push(tokio::spawn(refresh_worker(
            self.shared.clone(),
            refresh_rx,
            self.shutdown_tx.subscribe(),
            window,
        )));

        match self.config.hub_url() {
            Some(url) => {
                let url = url.to_string();
                let (channel, events) = PushChannel::new(self.config.push_channel());
                channel.connect(&url)?;
                self.channel = Some(channel);
                self.attach_events(events);
                self.shared.status.write().await.hub_url = Some(url.clone());
                info!(hub_url = %url, "Push channel opened");
            }
            None => {
                info!("No hub URL configured, running query-only");
            }
        }

        Ok(())
    }

    /// Drives the push path from `events`.
    ///
    /// `start` does this for the configured hub; embedders with their own
    /// channel can attach it here.
    pub fn attach_events(&mut self, events: mpsc::Receiver<ChannelEvent>) {
        self.tasks.push(tokio::spawn(event_router(
            self.shared.clone(),
            events,
            self.shutdown_tx.subscribe(),
        )));
    }

    /// Issues a query intent.
    ///
    /// Returns `Superseded` (not an error) if a newer request won the race.
    pub async fn query(&self, request: PageRequest) -> SyncResult<QueryOutcome> {
        self.ensure_running()?;
        self.shared.run_query(request).await
    }

    /// Refetches the current request in the background.
    pub fn request_refresh(&self) {
        self.shared.trigger_refresh("manual");
    }

    /// Creates a record; on success the current page is refreshed.
    pub async fn create_record(&self, record: &CatalogRecord) -> SyncResult<bool> {
        self.ensure_running()?;
        let accepted = self.shared.query.create_record(record).await?;
        self.after_mutation("create", accepted);
        Ok(accepted)
    }

    /// Updates a record; on success the current page is refreshed.
    pub async fn update_record(&self, record: &CatalogRecord) -> SyncResult<bool> {
        self.ensure_running()?;
        let accepted = self.shared.query.update_record(record).await?;
        self.after_mutation("update", accepted);
        Ok(accepted)
    }

    /// Deletes a record; on success the current page is refreshed.
    pub async fn delete_record(&self, id: RecordId) -> SyncResult<bool> {
        self.ensure_running()?;
        let accepted = self.shared.query.delete_record(id).await?;
        self.after_mutation("delete", accepted);
        Ok(accepted)
    }

    fn after_mutation(&self, operation: &'static str, accepted: bool) {
        if accepted {
            self.shared.trigger_refresh(operation);
        } else {
            debug!(operation, "Mutation not accepted, cache untouched");
        }
    }

    /// Subscribes to view changes.
    pub fn subscribe(&self) -> broadcast::Receiver<CatalogEvent> {
        self.shared.bus.subscribe()
    }

    /// Snapshot of the cached request and page.
    pub fn current(&self) -> CacheEntry {
        self.shared.cache.read()
    }

    /// Current push channel state.
    pub fn connection_state(&self) -> ConnectionState {
        *self.shared.connection.borrow()
    }

    /// Observer of push channel state changes.
    pub fn watch_connection(&self) -> watch::Receiver<ConnectionState> {
        self.shared.connection.subscribe()
    }

    /// Returns the current status.
    pub async fn status(&self) -> SyncStatus {
        let mut status = self.shared.status.read().await.clone();
        status.connection_state = self.connection_state();
        status.is_connected = status.connection_state == ConnectionState::Connected;
        status.epoch = self.shared.cache.read().request_epoch;
        status.refresh_requests = self.shared.refresh_requests.load(Ordering::Relaxed);
        status.refetches = self.shared.refetches.load(Ordering::Relaxed);
        status
    }

    /// Stops background work and closes the push channel.
    pub async fn shutdown(&mut self) -> SyncResult<()> {
        info!("Shutting down synchronizer");

        let channel = self.channel.take();
        if let Some(ref channel) = channel {
            channel.close().await;
        }

        self.shutdown_tx.send_replace(true);

        for task in self.tasks.drain(..) {
            let _ = task.await;
        }

        // The router may have stopped before seeing the final state.
        if channel.is_some() {
            self.shared.connection.send_replace(ConnectionState::Closed);
        }

        info!("Synchronizer stopped");
        Ok(())
    }

    fn ensure_running(&self) -> SyncResult<()> {
        if *self.shutdown_tx.borrow() {
            return Err(SyncError::ShuttingDown);
        }
        Ok(())
    }
}

// =============================================================================
// Background Tasks
// =============================================================================

/// Turns refresh triggers into coalesced refetches.
async fn refresh_worker(
    shared: Arc<Shared>,
    mut triggers: mpsc::Receiver<()>,
    mut shutdown_rx: watch::Receiver<bool>,
    window: Duration,
) {
    loop {
        tokio::select! {
            trigger = triggers.recv() => {
                if trigger.is_none() {
                    break;
                }
            }
            _ = shutdown_rx.changed() => break,
        }

        if !window.is_zero() {
            tokio::select! {
                _ = tokio::time::sleep(window) => {}
                _ = shutdown_rx.changed() => break,
            }
        }

        let mut coalesced = 1u32;
        while triggers.try_recv().is_ok() {
            coalesced += 1;
        }
        debug!(coalesced, "Refreshing current page");

        let result = tokio::select! {
            result = shared.refetch_current() => result,
            _ = shutdown_rx.changed() => break,
        };

        match result {
            Ok(Some(QueryOutcome::Applied(_))) | Ok(None) => {}
            Ok(Some(QueryOutcome::Superseded)) => {
                debug!("Refresh overtaken by a newer query");
            }
            Err(e) => shared.refresh_failed(e).await,
        }
    }

    info!("Refresh worker stopped");
}

/// Routes push channel events into refresh triggers and bus notifications.
async fn event_router(
    shared: Arc<Shared>,
    mut events: mpsc::Receiver<ChannelEvent>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    // Set once the channel has been up or has dropped into a retry loop;
    // any Connected after that is a reconnection.
    let mut resync_on_connect = false;

    loop {
        tokio::select! {
            event = events.recv() => {
                match event {
                    Some(ChannelEvent::Push(push)) => {
                        debug!(bytes = push.payload.len(), "Push event received");
                        shared.trigger_refresh("push");
                    }
                    Some(ChannelEvent::State(state)) => {
                        shared.connection.send_replace(state);
                        shared.bus.publish(CatalogEvent::ConnectionChanged(state));

                        match state {
                            ConnectionState::Connected => {
                                if resync_on_connect {
                                    info!("Push channel reconnected, refreshing");
                                    shared.trigger_refresh("reconnect");
                                }
                                resync_on_connect = true;
                            }
                            ConnectionState::Reconnecting => resync_on_connect = true,
                            _ => {}
                        }
                    }
                    None => {
                        debug!("Push event stream ended");
                        break;
                    }
                }
            }

            _ = shutdown_rx.changed() => {
                info!("Event router received shutdown");
                break;
            }
        }
    }

    info!("Event router stopped");
}

//! End-to-end tests against an in-process catalog API and push hub.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::Response;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast;

use folio_sync::{
    CatalogEvent, CatalogRecord, ConnectionState, HttpQueryService, PageRequest, PageResult,
    PushChannel, PushChannelConfig, QueryService, SyncConfig, Synchronizer,
};

// =============================================================================
// Fake Catalog Server
// =============================================================================

#[derive(Debug, Clone)]
enum HubCommand {
    Notify(String),
    DropAll,
}

struct FakeCatalog {
    records: Mutex<Vec<Value>>,
    last_query: Mutex<Option<HashMap<String, String>>>,
    hub: broadcast::Sender<HubCommand>,
    fetches: AtomicU64,
    connections: AtomicU64,
}

impl FakeCatalog {
    fn with_books(count: i64) -> Arc<Self> {
        let records = (1..=count)
            .map(|id| json!({"Id": id, "Title": format!("Book {:02}", id), "Author": "Anon"}))
            .collect();
        let (hub, _) = broadcast::channel(16);
        Arc::new(FakeCatalog {
            records: Mutex::new(records),
            last_query: Mutex::new(None),
            hub,
            fetches: AtomicU64::new(0),
            connections: AtomicU64::new(0),
        })
    }

    /// Simulates another client changing the catalog.
    fn insert_remotely(&self, title: &str) {
        let record = {
            let mut records = self.records.lock().unwrap();
            let id = records.len() as i64 + 1;
            let record = json!({"Id": id, "Title": title, "Author": "Someone else"});
            records.push(record.clone());
            record
        };
        let _ = self.hub.send(HubCommand::Notify(record.to_string()));
    }

    fn page_json(&self, page_number: usize, page_size: usize) -> Value {
        let records = self.records.lock().unwrap();
        let total = records.len();
        let total_pages = total.div_ceil(page_size);
        let items: Vec<Value> = records
            .iter()
            .skip((page_number - 1) * page_size)
            .take(page_size)
            .cloned()
            .collect();
        json!({
            "CurrentPage": page_number,
            "TotalPages": total_pages,
            "PageSize": page_size,
            "TotalCount": total,
            "HasPropertyInNextPage": page_number < total_pages,
            "Items": items,
        })
    }
}

type AppState = Arc<FakeCatalog>;

async fn list_page(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> Json<String> {
    state.fetches.fetch_add(1, Ordering::SeqCst);
    let page_number = params
        .get("pageNumber")
        .and_then(|v| v.parse().ok())
        .unwrap_or(1);
    let page_size = params
        .get("pageSize")
        .and_then(|v| v.parse().ok())
        .unwrap_or(10);
    *state.last_query.lock().unwrap() = Some(params);

    // Serialized twice, like the catalog server this client talks to.
    Json(state.page_json(page_number, page_size).to_string())
}

async fn create_book(State(state): State<AppState>, Json(mut record): Json<Value>) -> StatusCode {
    {
        let mut records = state.records.lock().unwrap();
        record["Id"] = json!(records.len() as i64 + 1);
        records.push(record.clone());
    }
    let _ = state.hub.send(HubCommand::Notify(record.to_string()));
    StatusCode::OK
}

async fn update_book(State(state): State<AppState>, Json(record): Json<Value>) -> StatusCode {
    let mut records = state.records.lock().unwrap();
    match records.iter_mut().find(|r| r["Id"] == record["Id"]) {
        Some(existing) => {
            *existing = record.clone();
            let _ = state.hub.send(HubCommand::Notify(record.to_string()));
            StatusCode::OK
        }
        None => StatusCode::NOT_FOUND,
    }
}

async fn delete_book(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> StatusCode {
    let Some(id) = params.get("bookId").and_then(|v| v.parse::<i64>().ok()) else {
        return StatusCode::BAD_REQUEST;
    };
    let mut records = state.records.lock().unwrap();
    let before = records.len();
    records.retain(|r| r["Id"] != json!(id));
    if records.len() < before {
        let _ = state.hub.send(HubCommand::Notify(json!({"Id": id}).to_string()));
        StatusCode::OK
    } else {
        StatusCode::NOT_FOUND
    }
}

async fn books_hub(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| hub_session(socket, state))
}

async fn hub_session(mut socket: WebSocket, state: AppState) {
    state.connections.fetch_add(1, Ordering::SeqCst);
    let mut commands = state.hub.subscribe();

    if !complete_handshake(&mut socket, "{}").await {
        return;
    }

    loop {
        tokio::select! {
            command = commands.recv() => match command {
                Ok(HubCommand::Notify(payload)) => {
                    let record = json!({"type": 1, "target": "ReceiveBook", "arguments": [payload]});
                    if socket.send(Message::Text(format!("{}\u{1e}", record).into())).await.is_err() {
                        return;
                    }
                }
                // Vanish without a close frame, like a dropped network.
                Ok(HubCommand::DropAll) | Err(_) => return,
            },
            incoming = socket.recv() => match incoming {
                Some(Ok(_)) => {}
                _ => return,
            },
        }
    }
}

async fn rejecting_hub(ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(|mut socket| async move {
        complete_handshake(&mut socket, r#"{"error":"Requested protocol 'json' is not available."}"#)
            .await;
    })
}

async fn retiring_hub(ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(|mut socket| async move {
        if complete_handshake(&mut socket, "{}").await {
            let close = r#"{"type":7,"error":"hub retired","allowReconnect":false}"#;
            let _ = socket.send(Message::Text(format!("{}\u{1e}", close).into())).await;
            while let Some(Ok(_)) = socket.recv().await {}
        }
    })
}

/// Reads the client handshake and answers with `reply`.
async fn complete_handshake(socket: &mut WebSocket, reply: &str) -> bool {
    match socket.recv().await {
        Some(Ok(Message::Text(text))) if text.as_str().contains(r#""protocol":"json""#) => {}
        _ => return false,
    }
    socket
        .send(Message::Text(format!("{}\u{1e}", reply).into()))
        .await
        .is_ok()
}

async fn spawn_catalog(state: AppState) -> SocketAddr {
    let app = Router::new()
        .route(
            "/",
            get(list_page)
                .post(create_book)
                .put(update_book)
                .delete(delete_book),
        )
        .route("/hubs/books", get(books_hub))
        .route("/hubs/rejecting", get(rejecting_hub))
        .route("/hubs/retiring", get(retiring_hub))
        .with_state(state);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

// =============================================================================
// Helpers
// =============================================================================

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn live_config(addr: SocketAddr) -> SyncConfig {
    let mut config = SyncConfig::for_endpoints(
        format!("http://{}", addr),
        Some(format!("http://{}/hubs/books", addr)),
    );
    config.reconnect.initial_backoff_ms = 20;
    config.reconnect.max_backoff_secs = 1;
    config.reconnect.max_retries = 5;
    config.refresh.coalesce_window_ms = 20;
    config
}

fn fast_channel() -> PushChannelConfig {
    PushChannelConfig {
        connect_timeout: Duration::from_secs(2),
        initial_backoff: Duration::from_millis(10),
        max_backoff: Duration::from_millis(50),
        max_retries: 1,
        ..Default::default()
    }
}

async fn wait_for_page(
    events: &mut broadcast::Receiver<CatalogEvent>,
    mut accept: impl FnMut(u64, &PageResult) -> bool,
) -> (u64, Arc<PageResult>) {
    tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            match events.recv().await {
                Ok(CatalogEvent::PageChanged { epoch, page }) if accept(epoch, &page) => {
                    return (epoch, page)
                }
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => panic!("bus closed"),
            }
        }
    })
    .await
    .expect("expected page change never arrived")
}

async fn wait_for_state(sync: &Synchronizer, state: ConnectionState) {
    let mut rx = sync.watch_connection();
    tokio::time::timeout(Duration::from_secs(10), rx.wait_for(|s| *s == state))
        .await
        .expect("connection state not reached")
        .unwrap();
}

// =============================================================================
// Query Service
// =============================================================================

#[tokio::test]
async fn test_page_round_trip_fidelity() {
    init_tracing();
    let catalog = FakeCatalog::with_books(25);
    let addr = spawn_catalog(catalog.clone()).await;
    let service = HttpQueryService::new(&SyncConfig::for_endpoints(format!("http://{}", addr), None)).unwrap();

    let page = service
        .fetch_page(&PageRequest::new(1, 10, "title"))
        .await
        .unwrap();
    assert_eq!(
        (page.current_page, page.total_pages, page.page_size, page.total_count),
        (1, 3, 10, 25)
    );
    assert_eq!(page.items.len(), 10);
    assert!(!page.has_previous());
    assert!(page.has_next());

    let reserialized = serde_json::to_value(&page).unwrap();
    assert_eq!(reserialized, catalog.page_json(1, 10));

    let reparsed: PageResult = serde_json::from_value(reserialized).unwrap();
    assert_eq!(reparsed, page);
}

#[tokio::test]
async fn test_query_parameters_on_the_wire() {
    let catalog = FakeCatalog::with_books(3);
    let addr = spawn_catalog(catalog.clone()).await;
    let service = HttpQueryService::new(&SyncConfig::for_endpoints(format!("http://{}", addr), None)).unwrap();

    service
        .fetch_page(&PageRequest::new(2, 5, "author").descending().with_search("le guin"))
        .await
        .unwrap();

    let query = catalog.last_query.lock().unwrap().clone().unwrap();
    assert_eq!(query["pageNumber"], "2");
    assert_eq!(query["pageSize"], "5");
    assert_eq!(query["sortField"], "author");
    assert_eq!(query["sortDirection"], "desc");
    assert_eq!(query["searchValue"], "le guin");
}

#[tokio::test]
async fn test_mutations_report_acceptance() {
    let catalog = FakeCatalog::with_books(3);
    let addr = spawn_catalog(catalog.clone()).await;
    let service = HttpQueryService::new(&SyncConfig::for_endpoints(format!("http://{}", addr), None)).unwrap();

    let new_book = CatalogRecord::new(0).with_field("Title", "The Dispossessed");
    assert!(service.create_record(&new_book).await.unwrap());
    assert_eq!(catalog.records.lock().unwrap().len(), 4);

    let edited = CatalogRecord::new(2).with_field("Title", "Edited");
    assert!(service.update_record(&edited).await.unwrap());
    assert!(!service.update_record(&CatalogRecord::new(99)).await.unwrap());

    assert!(service.delete_record(1).await.unwrap());
    assert!(!service.delete_record(1).await.unwrap());
    assert_eq!(catalog.records.lock().unwrap().len(), 3);
}

#[tokio::test]
async fn test_unreachable_catalog_is_a_transport_error() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let service = HttpQueryService::new(&SyncConfig::for_endpoints(format!("http://{}", addr), None)).unwrap();
    let err = service
        .fetch_page(&PageRequest::new(1, 10, "title"))
        .await
        .unwrap_err();
    assert!(err.is_retryable());

    // Mutations only report `false` for answered requests.
    assert!(service.delete_record(1).await.is_err());
}

// =============================================================================
// Live Synchronization
// =============================================================================

#[tokio::test]
async fn test_remote_change_refreshes_visible_page() {
    init_tracing();
    let catalog = FakeCatalog::with_books(25);
    let addr = spawn_catalog(catalog.clone()).await;

    let mut sync = Synchronizer::with_http(live_config(addr)).unwrap();
    sync.start().await.unwrap();
    wait_for_state(&sync, ConnectionState::Connected).await;

    let first = sync.query(PageRequest::new(3, 10, "title")).await.unwrap();
    assert_eq!(first.page().unwrap().total_count, 25);

    let mut events = sync.subscribe();
    catalog.insert_remotely("Written elsewhere");

    let (_, page) = wait_for_page(&mut events, |_, page| page.total_count == 26).await;
    assert_eq!(page.current_page, 3);
    assert_eq!(page.items.len(), 6);
    assert_eq!(page.items[5].field("Title"), Some(&json!("Written elsewhere")));

    let status = sync.status().await;
    assert!(status.is_connected);
    assert!(status.refetches >= 1);
    assert!(status.hub_url.is_some());

    sync.shutdown().await.unwrap();
    assert_eq!(sync.connection_state(), ConnectionState::Closed);
}

#[tokio::test]
async fn test_local_delete_on_last_page() {
    let catalog = FakeCatalog::with_books(21);
    let addr = spawn_catalog(catalog.clone()).await;

    let mut sync = Synchronizer::with_http(live_config(addr)).unwrap();
    sync.start().await.unwrap();
    wait_for_state(&sync, ConnectionState::Connected).await;

    sync.query(PageRequest::new(3, 10, "title")).await.unwrap();
    let mut events = sync.subscribe();

    assert!(sync.delete_record(7).await.unwrap());

    let (_, page) = wait_for_page(&mut events, |_, page| page.total_count == 20).await;
    assert_eq!(page.current_page, 3);
    assert_eq!(page.total_pages, 2);
    assert!(page.items.is_empty());
    assert_eq!(sync.current().last_result.unwrap().total_pages, 2);

    sync.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_reconnect_triggers_refetch() {
    init_tracing();
    let catalog = FakeCatalog::with_books(12);
    let addr = spawn_catalog(catalog.clone()).await;

    let mut sync = Synchronizer::with_http(live_config(addr)).unwrap();
    sync.start().await.unwrap();
    wait_for_state(&sync, ConnectionState::Connected).await;

    sync.query(PageRequest::new(1, 10, "title")).await.unwrap();
    let first_epoch = sync.current().result_epoch;
    let mut events = sync.subscribe();

    let _ = catalog.hub.send(HubCommand::DropAll);

    let (epoch, page) = wait_for_page(&mut events, |epoch, _| epoch > first_epoch).await;
    assert_eq!(page.total_count, 12);
    assert!(epoch > first_epoch);
    assert!(catalog.connections.load(Ordering::SeqCst) >= 2);
    assert!(catalog.fetches.load(Ordering::SeqCst) >= 2);
    assert_eq!(sync.connection_state(), ConnectionState::Connected);

    sync.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_query_only_mode_without_hub() {
    let catalog = FakeCatalog::with_books(4);
    let addr = spawn_catalog(catalog.clone()).await;

    let mut sync =
        Synchronizer::with_http(SyncConfig::for_endpoints(format!("http://{}", addr), None)).unwrap();
    sync.start().await.unwrap();

    let outcome = sync.query(PageRequest::new(1, 10, "title")).await.unwrap();
    assert_eq!(outcome.page().unwrap().total_pages, 1);
    assert_eq!(sync.connection_state(), ConnectionState::Disconnected);
    assert!(sync.status().await.hub_url.is_none());

    sync.shutdown().await.unwrap();
}

// =============================================================================
// Push Channel
// =============================================================================

#[tokio::test]
async fn test_rejected_handshake_closes_after_retries() {
    let addr = spawn_catalog(FakeCatalog::with_books(0)).await;

    let (channel, _events) = PushChannel::new(fast_channel());
    let mut state = channel
        .connect(&format!("http://{}/hubs/rejecting", addr))
        .unwrap();

    tokio::time::timeout(
        Duration::from_secs(10),
        state.wait_for(|s| *s == ConnectionState::Closed),
    )
    .await
    .unwrap()
    .unwrap();
    assert!(channel.last_error().is_some());
}

#[tokio::test]
async fn test_hub_close_without_reconnect_is_terminal() {
    let addr = spawn_catalog(FakeCatalog::with_books(0)).await;

    let (channel, mut events) = PushChannel::new(fast_channel());
    let url = format!("http://{}/hubs/retiring", addr);
    let mut state = channel.connect(&url).unwrap();

    tokio::time::timeout(
        Duration::from_secs(10),
        state.wait_for(|s| *s == ConnectionState::Closed),
    )
    .await
    .unwrap()
    .unwrap();

    assert!(channel.last_error().unwrap().contains("hub retired"));
    assert!(channel.connect(&url).is_err());

    let mut states = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let folio_sync::ChannelEvent::State(s) = event {
            states.push(s);
        }
    }
    assert_eq!(
        states,
        vec![
            ConnectionState::Connecting,
            ConnectionState::Connected,
            ConnectionState::Closed
        ]
    );
}

#[tokio::test]
async fn test_push_events_are_delivered_in_order() {
    let catalog = FakeCatalog::with_books(0);
    let addr = spawn_catalog(catalog.clone()).await;

    let (channel, mut events) = PushChannel::new(fast_channel());
    let mut state = channel
        .connect(&format!("http://{}/hubs/books", addr))
        .unwrap();
    tokio::time::timeout(
        Duration::from_secs(10),
        state.wait_for(|s| *s == ConnectionState::Connected),
    )
    .await
    .unwrap()
    .unwrap();

    for n in 1..=3 {
        let _ = catalog.hub.send(HubCommand::Notify(format!("{{\"Id\":{}}}", n)));
    }

    let mut payloads = Vec::new();
    while payloads.len() < 3 {
        let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
            .await
            .unwrap()
            .unwrap();
        if let folio_sync::ChannelEvent::Push(push) = event {
            payloads.push(push.payload);
        }
    }
    assert_eq!(payloads, vec![r#"{"Id":1}"#, r#"{"Id":2}"#, r#"{"Id":3}"#]);

    channel.close().await;
    assert_eq!(channel.state(), ConnectionState::Closed);
}

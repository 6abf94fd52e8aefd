//! # folio-sync: Live Catalog Synchronization
//!
//! Keeps one page of a remote, paged, sortable and filterable catalog current
//! while the catalog changes underneath it.
//!
//! ## Architecture Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Synchronization Core                               │
//! │                                                                         │
//! │  ┌──────────────────────────────────────────────────────────────────┐  │
//! │  │                 Synchronizer (Main Orchestrator)                 │  │
//! │  │                                                                  │  │
//! │  │  Query path:  UI intent ─► epoch ─► fetch ─► adopt if latest     │  │
//! │  │  Push path:   event / reconnect ─► coalesced refetch             │  │
//! │  └───────┬──────────────────────┬──────────────────────┬────────────┘  │
//! │          ▼                      ▼                      ▼               │
//! │  ┌────────────────┐   ┌────────────────┐   ┌────────────────────────┐  │
//! │  │  QueryService  │   │  PushChannel   │   │  PageCache             │  │
//! │  │                │   │                │   │                        │  │
//! │  │ HTTP GET page  │   │ WebSocket hub  │   │ Last request + result  │  │
//! │  │ POST/PUT/      │   │ client, bounded│   │ guarded by epochs      │  │
//! │  │ DELETE record  │   │ reconnect      │   │                        │  │
//! │  └────────────────┘   └────────────────┘   └───────────┬────────────┘  │
//! │                                                        ▼               │
//! │                                            ┌────────────────────────┐  │
//! │                                            │  SubscriberBus         │  │
//! │                                            │  PageChanged,          │  │
//! │                                            │  ConnectionChanged,    │  │
//! │                                            │  RefreshFailed         │  │
//! │                                            └────────────────────────┘  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//! - [`synchronizer`] - Main `Synchronizer` orchestrator
//! - [`query`] - `QueryService` trait and its HTTP implementation
//! - [`transport`] - Push hub client with reconnection
//! - [`protocol`] - Hub wire format
//! - [`cache`] - Epoch-guarded page cache
//! - [`bus`] - Fan-out to subscribers
//! - [`config`] - Sync configuration (catalog, hub, reconnect policy)
//! - [`error`] - Sync error types
//!
//! ## Usage
//!
//! ```rust,ignore
//! use folio_sync::{CatalogEvent, PageRequest, SyncConfig, Synchronizer};
//!
//! let config = SyncConfig::load_or_default(None);
//! let mut sync = Synchronizer::with_http(config)?;
//! sync.start().await?;
//!
//! let mut events = sync.subscribe();
//! sync.query(PageRequest::new(1, 10, "title")).await?;
//!
//! let status = sync.status().await;
//! println!("Hub: {}", status.connection_state);
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod bus;
pub mod cache;
pub mod config;
pub mod error;
pub mod protocol;
pub mod query;
pub mod synchronizer;
pub mod transport;

// =============================================================================
// Re-exports
// =============================================================================

pub use bus::{CatalogEvent, SubscriberBus};
pub use cache::{CacheEntry, PageCache};
pub use config::SyncConfig;
pub use error::{SyncError, SyncResult};
pub use protocol::PushEvent;
pub use query::{HttpQueryService, QueryService};
pub use synchronizer::{QueryOutcome, SyncStatus, Synchronizer};
pub use transport::{ChannelEvent, ConnectionState, PushChannel, PushChannelConfig};

// Domain types, so embedders need only one dependency
pub use folio_core::{CatalogRecord, PageRequest, PageResult, RecordId};

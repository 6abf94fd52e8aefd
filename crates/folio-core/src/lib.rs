//! # folio-core: Catalog Data Model
//!
//! Pure types shared by the synchronization layer and the UI collaborators
//! that render a catalog page.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                          Folio Architecture                             │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                 UI collaborators (out of tree)                  │   │
//! │  │     Catalog table ──► Pager ──► Search box ──► Edit dialog      │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │ query / mutate / subscribe             │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │                 folio-sync (Synchronizer)                       │   │
//! │  │    QueryService • PushChannel • PageCache • SubscriberBus       │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │               ★ folio-core (THIS CRATE) ★                       │   │
//! │  │                                                                 │   │
//! │  │   ┌──────────────┐  ┌──────────────┐  ┌──────────────┐         │   │
//! │  │   │ CatalogRecord│  │ PageRequest  │  │  validation  │         │   │
//! │  │   │ PageResult   │  │ query pairs  │  │    rules     │         │   │
//! │  │   └──────────────┘  └──────────────┘  └──────────────┘         │   │
//! │  │                                                                 │   │
//! │  │   NO I/O • NO RUNTIME • PURE FUNCTIONS                          │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`types`] - Records, page requests and page results
//! - [`error`] - Domain error types
//! - [`validation`] - Page request validation
//!
//! ## Example Usage
//!
//! ```rust
//! use folio_core::{PageRequest, PageResult};
//!
//! let request = PageRequest::new(1, 10, "title").with_search("dune");
//! assert_eq!(request.sort_direction(), "asc");
//!
//! let page: PageResult = serde_json::from_str(
//!     r#"{"CurrentPage":1,"TotalPages":3,"PageSize":10,"TotalCount":25,"Items":[]}"#,
//! ).unwrap();
//! assert!(!page.has_previous());
//! assert!(page.has_next());
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod types;
pub mod validation;

// =============================================================================
// Re-exports for Convenience
// =============================================================================

pub use error::{CoreError, ValidationError};
pub use types::*;

//! # Sync Error Types
//!
//! Error types for query, mutation and push channel operations.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Sync Error Categories                             │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────┐ │
//! │  │  Configuration  │  │   Transport     │  │     Response            │ │
//! │  │                 │  │                 │  │                         │ │
//! │  │  InvalidConfig  │  │  Transport      │  │  Decode                 │ │
//! │  │  InvalidUrl     │  │  Timeout        │  │  Remote {status, body}  │ │
//! │  │  ConfigLoad/Save│  │                 │  │  InvalidRequest         │ │
//! │  └─────────────────┘  └─────────────────┘  └─────────────────────────┘ │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐                              │
//! │  │   Push channel  │  │    Internal     │                              │
//! │  │                 │  │                 │                              │
//! │  │  Connection     │  │  ShuttingDown   │                              │
//! │  │  Disconnected   │  │                 │                              │
//! │  │  ChannelClosed  │  │                 │                              │
//! │  │  Protocol       │  │                 │                              │
//! │  └─────────────────┘  └─────────────────┘                              │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Propagation
//! - Query path: every variant reaches the caller (UI shows an error state)
//! - Mutation path: non-2xx answers become `Ok(false)`; only transport
//!   failures are errors
//! - Push channel: background failures only change `ConnectionState`
//! - Stale responses are discarded, never reported

use folio_core::{CoreError, ValidationError};
use thiserror::Error;

/// Result type alias for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Sync error type covering all possible sync failures.
///
/// ## Design Principles
/// - Each variant includes enough context for debugging
/// - Errors are categorized for different handling strategies
/// - All errors are `Send + Sync` for async compatibility
#[derive(Debug, Error)]
pub enum SyncError {
    // =========================================================================
    // Configuration Errors
    // =========================================================================
    /// Invalid sync configuration.
    #[error("Invalid sync configuration: {0}")]
    InvalidConfig(String),

    /// Invalid catalog or hub URL.
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// Failed to load config file.
    #[error("Failed to load config: {0}")]
    ConfigLoadFailed(String),

    /// Failed to save config file.
    #[error("Failed to save config: {0}")]
    ConfigSaveFailed(String),

    // =========================================================================
    // Transport Errors
    // =========================================================================
    /// Network unreachable, connection reset, TLS failure.
    #[error("Transport error: {0}")]
    Transport(String),

    /// Request or connect attempt timed out.
    #[error("Timed out after {0} seconds")]
    Timeout(u64),

    // =========================================================================
    // Response Errors
    // =========================================================================
    /// Response body is not a well-formed page.
    #[error("Failed to decode response: {0}")]
    Decode(String),

    /// The catalog API answered with a non-success status.
    #[error("Catalog API returned {status}: {body}")]
    Remote { status: u16, body: String },

    /// The query intent was rejected before being sent.
    #[error("Invalid page request: {0}")]
    InvalidRequest(#[from] ValidationError),

    // =========================================================================
    // Push Channel Errors
    // =========================================================================
    /// Hub connection could not be established or re-established.
    #[error("Push channel connection failed: {0}")]
    Connection(String),

    /// Hub connection dropped unexpectedly.
    #[error("Disconnected from push hub")]
    Disconnected,

    /// The push channel was closed and cannot be reused.
    #[error("Push channel is closed")]
    ChannelClosed,

    /// Hub sent something that is not a valid hub record.
    #[error("Hub protocol error: {0}")]
    Protocol(String),

    // =========================================================================
    // Internal Errors
    // =========================================================================
    /// Synchronizer is shutting down.
    #[error("Synchronizer is shutting down")]
    ShuttingDown,
}

// =============================================================================
// Error Conversions
// =============================================================================

impl From<CoreError> for SyncError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::Validation(v) => SyncError::InvalidRequest(v),
            other => SyncError::Decode(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        SyncError::Decode(err.to_string())
    }
}

impl From<url::ParseError> for SyncError {
    fn from(err: url::ParseError) -> Self {
        SyncError::InvalidUrl(err.to_string())
    }
}

impl From<reqwest::Error> for SyncError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            SyncError::Decode(err.to_string())
        } else {
            SyncError::Transport(err.to_string())
        }
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for SyncError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        use tokio_tungstenite::tungstenite::Error as WsError;
        match err {
            WsError::ConnectionClosed => SyncError::Disconnected,
            WsError::AlreadyClosed => SyncError::Disconnected,
            WsError::Protocol(p) => SyncError::Protocol(p.to_string()),
            WsError::Io(io) => SyncError::Connection(io.to_string()),
            WsError::Tls(tls) => SyncError::Connection(tls.to_string()),
            WsError::Http(response) => {
                SyncError::Connection(format!("hub rejected upgrade: {}", response.status()))
            }
            other => SyncError::Connection(other.to_string()),
        }
    }
}

impl From<std::io::Error> for SyncError {
    fn from(err: std::io::Error) -> Self {
        SyncError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::de::Error> for SyncError {
    fn from(err: toml::de::Error) -> Self {
        SyncError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::ser::Error> for SyncError {
    fn from(err: toml::ser::Error) -> Self {
        SyncError::ConfigSaveFailed(err.to_string())
    }
}

// =============================================================================
// Error Categorization (for retry logic)
// =============================================================================

impl SyncError {
    /// Returns true if retrying the same operation may succeed.
    ///
    /// ## Retryable Errors
    /// - Transport failures and timeouts
    /// - Server-side (5xx) remote errors
    /// - Hub connection drops
    ///
    /// ## Non-Retryable Errors
    /// - Configuration errors
    /// - Malformed responses and client-side (4xx) remote errors
    /// - Invalid requests, closed channels
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Transport(_)
            | SyncError::Timeout(_)
            | SyncError::Connection(_)
            | SyncError::Disconnected => true,
            SyncError::Remote { status, .. } => *status >= 500,
            _ => false,
        }
    }

    /// Returns true if this error indicates a configuration problem.
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            SyncError::InvalidConfig(_)
                | SyncError::InvalidUrl(_)
                | SyncError::ConfigLoadFailed(_)
                | SyncError::ConfigSaveFailed(_)
        )
    }

    /// Returns true if the remote side spoke something we could not read.
    pub fn is_protocol_error(&self) -> bool {
        matches!(self, SyncError::Decode(_) | SyncError::Protocol(_))
    }
}

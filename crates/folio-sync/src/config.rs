//! # Sync Configuration
//!
//! Configuration management for the synchronization layer.
//!
//! ## Configuration Sources
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Configuration Priority                               │
//! │                                                                         │
//! │  1. Environment Variables (highest priority)                           │
//! │     FOLIO_CATALOG_URL=http://localhost:5000                            │
//! │     FOLIO_HUB_URL=http://localhost:5000/hubs/books                     │
//! │                                                                         │
//! │  2. TOML Config File                                                   │
//! │     ~/.config/folio/sync.toml (Linux)                                  │
//! │     ~/Library/Application Support/com.folio.folio/sync.toml (macOS)    │
//! │                                                                         │
//! │  3. Default Values (lowest priority)                                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Configuration File Format
//! ```toml
//! # sync.toml
//! [catalog]
//! base_url = "http://localhost:5000"
//! request_timeout_secs = 30
//! delete_param = "bookId"
//!
//! [hub]
//! url = "http://localhost:5000/hubs/books"
//! event_name = "ReceiveBook"
//!
//! [reconnect]
//! initial_backoff_ms = 500
//! max_backoff_secs = 30
//! max_retries = 4
//!
//! [refresh]
//! coalesce_window_ms = 50
//!
//! [paging]
//! page_size = 10
//! sort_column = "title"
//! ```

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

use folio_core::PageRequest;

use crate::error::{SyncError, SyncResult};
use crate::transport::PushChannelConfig;

// =============================================================================
// Catalog Settings
// =============================================================================

/// Where and how to reach the catalog API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogSettings {
    /// Base URL of the catalog endpoint (`GET /`, `POST /`, ...).
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Per-request timeout (seconds).
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Query parameter carrying the record id on `DELETE`.
    #[serde(default = "default_delete_param")]
    pub delete_param: String,
}

fn default_base_url() -> String {
    "http://localhost:5000".to_string()
}

fn default_request_timeout() -> u64 {
    30
}

fn default_delete_param() -> String {
    "bookId".to_string()
}

impl Default for CatalogSettings {
    fn default() -> Self {
        CatalogSettings {
            base_url: default_base_url(),
            request_timeout_secs: default_request_timeout(),
            delete_param: default_delete_param(),
        }
    }
}

// =============================================================================
// Hub Settings
// =============================================================================

/// Push hub connection settings.
///
/// Leaving `url` unset runs the synchronizer in query-only mode.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HubSettings {
    /// Hub endpoint, `http(s)://` or `ws(s)://`.
    #[serde(default)]
    pub url: Option<String>,

    /// Invocation target that signals a record change.
    #[serde(default = "default_event_name")]
    pub event_name: String,

    /// Connect + handshake timeout (seconds).
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Interval between client keepalive pings (seconds).
    #[serde(default = "default_ping_interval")]
    pub ping_interval_secs: u64,

    /// Silence from the hub longer than this drops the connection (seconds).
    #[serde(default = "default_server_timeout")]
    pub server_timeout_secs: u64,
}

fn default_event_name() -> String {
    "ReceiveBook".to_string()
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_ping_interval() -> u64 {
    15
}

fn default_server_timeout() -> u64 {
    30
}

impl Default for HubSettings {
    fn default() -> Self {
        HubSettings {
            url: None,
            event_name: default_event_name(),
            connect_timeout_secs: default_connect_timeout(),
            ping_interval_secs: default_ping_interval(),
            server_timeout_secs: default_server_timeout(),
        }
    }
}

// =============================================================================
// Reconnect Settings
// =============================================================================

/// Backoff policy for hub reconnection.
///
/// The policy is always bounded: `max_retries` must be at least 1.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconnectSettings {
    /// Initial backoff duration (milliseconds).
    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_ms: u64,

    /// Maximum backoff duration (seconds).
    #[serde(default = "default_max_backoff")]
    pub max_backoff_secs: u64,

    /// Consecutive failed attempts before the channel closes.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

fn default_initial_backoff() -> u64 {
    500
}

fn default_max_backoff() -> u64 {
    30
}

fn default_max_retries() -> u32 {
    4
}

impl Default for ReconnectSettings {
    fn default() -> Self {
        ReconnectSettings {
            initial_backoff_ms: default_initial_backoff(),
            max_backoff_secs: default_max_backoff(),
            max_retries: default_max_retries(),
        }
    }
}

// =============================================================================
// Refresh Settings
// =============================================================================

/// Push-triggered refetch settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshSettings {
    /// Window in which refresh triggers collapse into one refetch (milliseconds).
    #[serde(default = "default_coalesce_window")]
    pub coalesce_window_ms: u64,
}

fn default_coalesce_window() -> u64 {
    50
}

impl Default for RefreshSettings {
    fn default() -> Self {
        RefreshSettings {
            coalesce_window_ms: default_coalesce_window(),
        }
    }
}

// =============================================================================
// Paging Defaults
// =============================================================================

/// Defaults for the first page a UI shows.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PagingSettings {
    #[serde(default = "default_page_size")]
    pub page_size: u32,

    #[serde(default = "default_sort_column")]
    pub sort_column: String,

    #[serde(default = "default_true")]
    pub sort_ascending: bool,
}

fn default_page_size() -> u32 {
    10
}

fn default_sort_column() -> String {
    "title".to_string()
}

fn default_true() -> bool {
    true
}

impl Default for PagingSettings {
    fn default() -> Self {
        PagingSettings {
            page_size: default_page_size(),
            sort_column: default_sort_column(),
            sort_ascending: true,
        }
    }
}

// =============================================================================
// Main Sync Configuration
// =============================================================================

/// Complete sync configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyncConfig {
    #[serde(default)]
    pub catalog: CatalogSettings,

    #[serde(default)]
    pub hub: HubSettings,

    #[serde(default)]
    pub reconnect: ReconnectSettings,

    #[serde(default)]
    pub refresh: RefreshSettings,

    #[serde(default)]
    pub paging: PagingSettings,
}

impl SyncConfig {
    /// Creates a new config with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a config pointing at a catalog and (optionally) its hub.
    pub fn for_endpoints(base_url: impl Into<String>, hub_url: Option<String>) -> Self {
        let mut config = Self::default();
        config.catalog.base_url = base_url.into();
        config.hub.url = hub_url;
        config
    }

    /// Loads configuration from file, environment, and defaults.
    ///
    /// ## Load Order (later overrides earlier)
    /// 1. Default values
    /// 2. Config file (sync.toml)
    /// 3. Environment variables
    pub fn load(config_path: Option<PathBuf>) -> SyncResult<Self> {
        let mut config = Self::default();

        if let Some(path) = config_path.or_else(Self::default_config_path) {
            if path.exists() {
                info!(?path, "Loading sync config from file");
                let contents = std::fs::read_to_string(&path)?;
                config = toml::from_str(&contents)?;
            } else {
                debug!(?path, "Config file not found, using defaults");
            }
        }

        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    /// Loads config or returns default if load fails.
    pub fn load_or_default(config_path: Option<PathBuf>) -> Self {
        Self::load(config_path).unwrap_or_else(|e| {
            warn!("Failed to load sync config: {}. Using defaults.", e);
            Self::default()
        })
    }

    /// Saves configuration to file.
    pub fn save(&self, config_path: Option<PathBuf>) -> SyncResult<()> {
        let path = config_path
            .or_else(Self::default_config_path)
            .ok_or_else(|| SyncError::ConfigSaveFailed("No config path available".into()))?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| SyncError::ConfigSaveFailed(e.to_string()))?;
        }

        let contents = toml::to_string_pretty(self)?;
        std::fs::write(&path, contents).map_err(|e| SyncError::ConfigSaveFailed(e.to_string()))?;

        info!(?path, "Sync config saved");
        Ok(())
    }

    /// Validates the configuration.
    pub fn validate(&self) -> SyncResult<()> {
        let base = Url::parse(&self.catalog.base_url)?;
        if !matches!(base.scheme(), "http" | "https") {
            return Err(SyncError::InvalidUrl(format!(
                "Catalog URL must start with http:// or https://, got: {}",
                self.catalog.base_url
            )));
        }

        if let Some(ref url) = self.hub.url {
            websocket_url(url)?;
        }

        if self.catalog.delete_param.trim().is_empty() {
            return Err(SyncError::InvalidConfig(
                "delete_param must not be empty".into(),
            ));
        }

        if self.hub.event_name.trim().is_empty() {
            return Err(SyncError::InvalidConfig(
                "hub event_name must not be empty".into(),
            ));
        }

        if self.reconnect.max_retries == 0 {
            return Err(SyncError::InvalidConfig(
                "reconnect max_retries must be greater than 0".into(),
            ));
        }

        if self.hub.ping_interval_secs == 0 || self.hub.server_timeout_secs == 0 {
            return Err(SyncError::InvalidConfig(
                "hub ping_interval_secs and server_timeout_secs must be greater than 0".into(),
            ));
        }

        if self.hub.server_timeout_secs <= self.hub.ping_interval_secs {
            return Err(SyncError::InvalidConfig(
                "hub server_timeout_secs must exceed ping_interval_secs".into(),
            ));
        }

        folio_core::validation::validate_page_size(self.paging.page_size)?;
        folio_core::validation::validate_sort_column(&self.paging.sort_column)?;

        Ok(())
    }

    /// Applies environment variable overrides.
    fn apply_env_overrides(&mut self) {
        if let Ok(url) = std::env::var("FOLIO_CATALOG_URL") {
            debug!(url = %url, "Overriding catalog URL from environment");
            self.catalog.base_url = url;
        }

        if let Ok(url) = std::env::var("FOLIO_HUB_URL") {
            debug!(url = %url, "Overriding hub URL from environment");
            self.hub.url = if url.trim().is_empty() { None } else { Some(url) };
        }

        if let Ok(name) = std::env::var("FOLIO_HUB_EVENT") {
            self.hub.event_name = name;
        }

        if let Ok(retries) = std::env::var("FOLIO_MAX_RETRIES") {
            match retries.parse::<u32>() {
                Ok(n) => self.reconnect.max_retries = n,
                Err(_) => warn!(value = %retries, "Ignoring invalid FOLIO_MAX_RETRIES"),
            }
        }

        if let Ok(window) = std::env::var("FOLIO_COALESCE_WINDOW_MS") {
            match window.parse::<u64>() {
                Ok(ms) => self.refresh.coalesce_window_ms = ms,
                Err(_) => warn!(value = %window, "Ignoring invalid FOLIO_COALESCE_WINDOW_MS"),
            }
        }
    }

    /// Returns the default config file path.
    fn default_config_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("com", "folio", "folio")
            .map(|dirs| dirs.config_dir().join("sync.toml"))
    }

    // =========================================================================
    // Convenience Methods
    // =========================================================================

    /// Returns the hub URL if configured.
    pub fn hub_url(&self) -> Option<&str> {
        self.hub.url.as_deref()
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.catalog.request_timeout_secs)
    }

    pub fn coalesce_window(&self) -> Duration {
        Duration::from_millis(self.refresh.coalesce_window_ms)
    }

    /// The request a fresh view starts with.
    pub fn first_page(&self) -> PageRequest {
        PageRequest::new(1, self.paging.page_size, "")
            .with_sort(self.paging.sort_column.clone(), self.paging.sort_ascending)
    }

    /// Push channel settings derived from the hub and reconnect sections.
    pub fn push_channel(&self) -> PushChannelConfig {
        PushChannelConfig {
            event_name: self.hub.event_name.clone(),
            connect_timeout: Duration::from_secs(self.hub.connect_timeout_secs),
            initial_backoff: Duration::from_millis(self.reconnect.initial_backoff_ms),
            max_backoff: Duration::from_secs(self.reconnect.max_backoff_secs),
            max_retries: self.reconnect.max_retries,
            ping_interval: Duration::from_secs(self.hub.ping_interval_secs),
            server_timeout: Duration::from_secs(self.hub.server_timeout_secs),
        }
    }
}

// =============================================================================
// URL Helpers
// =============================================================================

/// Maps a hub URL to the WebSocket URL to dial.
///
/// `http` → `ws`, `https` → `wss`; `ws`/`wss` are kept as-is.
pub fn websocket_url(url: &str) -> SyncResult<Url> {
    let mut parsed = Url::parse(url)?;
    let scheme = match parsed.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => {
            return Err(SyncError::InvalidUrl(format!(
                "Hub URL must be http(s):// or ws(s)://, got scheme '{}'",
                other
            )))
        }
    };
    parsed
        .set_scheme(scheme)
        .map_err(|_| SyncError::InvalidUrl(format!("Cannot use {} as a WebSocket URL", url)))?;
    Ok(parsed)
}

//! # Query Service
//!
//! Request/response access to the catalog API.
//!
//! ## Endpoints
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Catalog API                                     │
//! │                                                                         │
//! │  GET    {base}?pageNumber=1&pageSize=10&sortField=title                │
//! │              &sortDirection=asc[&searchValue=dune]    ──► PageResult   │
//! │  POST   {base}                 body: record JSON      ──► 2xx / other  │
//! │  PUT    {base}                 body: record JSON      ──► 2xx / other  │
//! │  DELETE {base}?bookId=7                               ──► 2xx / other  │
//! │                                                                         │
//! │  Page bodies arrive either as a JSON object or as a JSON string that   │
//! │  wraps the object (some servers serialize twice). Both are accepted.   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The trait is the seam the synchronizer is tested through; the HTTP
//! implementation is the only one shipped.

use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, instrument, warn};
use url::Url;

use folio_core::{CatalogRecord, PageResult, PageRequest, RecordId};

use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};

// =============================================================================
// Query Service Trait
// =============================================================================

/// Access to the catalog API.
///
/// ## Contract
/// - `fetch_page` fails on any non-success answer or malformed body
/// - Mutations return `Ok(true)` on 2xx, `Ok(false)` on any other status,
///   and `Err` only when no answer was received
#[async_trait]
pub trait QueryService: Send + Sync {
    /// Fetches one page for `request`.
    async fn fetch_page(&self, request: &PageRequest) -> SyncResult<PageResult>;

    /// Creates a record.
    async fn create_record(&self, record: &CatalogRecord) -> SyncResult<bool>;

    /// Updates a record, matched by its id.
    async fn update_record(&self, record: &CatalogRecord) -> SyncResult<bool>;

    /// Deletes a record.
    async fn delete_record(&self, id: RecordId) -> SyncResult<bool>;
}

// =============================================================================
// HTTP Implementation
// =============================================================================

/// [`QueryService`] over HTTP.
#[derive(Debug, Clone)]
pub struct HttpQueryService {
    client: Client,
    base_url: Url,
    delete_param: String,
    timeout: Duration,
}

impl HttpQueryService {
    /// Creates a service for the catalog configured in `config`.
    pub fn new(config: &SyncConfig) -> SyncResult<Self> {
        let base_url = Url::parse(&config.catalog.base_url)?;
        if !matches!(base_url.scheme(), "http" | "https") {
            return Err(SyncError::InvalidUrl(format!(
                "Catalog URL must start with http:// or https://, got: {}",
                config.catalog.base_url
            )));
        }

        let timeout = config.request_timeout();
        let client = Client::builder().timeout(timeout).build()?;

        Ok(HttpQueryService {
            client,
            base_url,
            delete_param: config.catalog.delete_param.clone(),
            timeout,
        })
    }

    /// Returns the catalog base URL.
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// URL of the page query for `request`.
    pub fn page_url(&self, request: &PageRequest) -> Url {
        let mut url = self.base_url.clone();
        {
            let mut query = url.query_pairs_mut();
            for (name, value) in request.query_pairs() {
                query.append_pair(name, &value);
            }
        }
        url
    }

    fn delete_url(&self, id: RecordId) -> Url {
        let mut url = self.base_url.clone();
        url.query_pairs_mut()
            .append_pair(&self.delete_param, &id.to_string());
        url
    }

    async fn send(&self, request: RequestBuilder) -> SyncResult<reqwest::Response> {
        request.send().await.map_err(|e| self.request_error(e))
    }

    /// Runs a mutation and reports whether the catalog accepted it.
    async fn mutate(&self, request: RequestBuilder, operation: &'static str) -> SyncResult<bool> {
        let response = self.send(request).await?;
        let status = response.status();
        if status.is_success() {
            debug!(operation, %status, "Mutation accepted");
            Ok(true)
        } else {
            let body = response.text().await.unwrap_or_default();
            warn!(operation, %status, body = %body, "Mutation rejected");
            Ok(false)
        }
    }

    fn request_error(&self, err: reqwest::Error) -> SyncError {
        if err.is_timeout() {
            SyncError::Timeout(self.timeout.as_secs())
        } else {
            SyncError::from(err)
        }
    }
}

#[async_trait]
impl QueryService for HttpQueryService {
    #[instrument(skip(self, request), fields(request = %request))]
    async fn fetch_page(&self, request: &PageRequest) -> SyncResult<PageResult> {
        let url = self.page_url(request);
        let response = self.send(self.client.get(url)).await?;

        let status = response.status();
        let body = response.text().await.map_err(|e| self.request_error(e))?;

        if !status.is_success() {
            return Err(SyncError::Remote {
                status: status.as_u16(),
                body,
            });
        }

        let page = decode_page(&body)?;
        debug!(
            current_page = page.current_page,
            total_pages = page.total_pages,
            items = page.items.len(),
            "Page fetched"
        );
        Ok(page)
    }

    #[instrument(skip(self, record), fields(id = record.id))]
    async fn create_record(&self, record: &CatalogRecord) -> SyncResult<bool> {
        let request = self
            .client
            .request(Method::POST, self.base_url.clone())
            .json(record);
        self.mutate(request, "create").await
    }

    #[instrument(skip(self, record), fields(id = record.id))]
    async fn update_record(&self, record: &CatalogRecord) -> SyncResult<bool> {
        let request = self
            .client
            .request(Method::PUT, self.base_url.clone())
            .json(record);
        self.mutate(request, "update").await
    }

    #[instrument(skip(self))]
    async fn delete_record(&self, id: RecordId) -> SyncResult<bool> {
        let request = self.client.delete(self.delete_url(id));
        self.mutate(request, "delete").await
    }
}

// =============================================================================
// Response Decoding
// =============================================================================

/// Decodes a page body.
///
/// Accepts the page object directly or a JSON string containing it, then
/// checks the page's structural invariants.
pub fn decode_page(body: &str) -> SyncResult<PageResult> {
    let value: Value = serde_json::from_str(body)?;
    let value = match value {
        Value::String(inner) => serde_json::from_str(&inner)?,
        other => other,
    };

    let page: PageResult = serde_json::from_value(value)?;
    page.validate()?;

    if !page.is_within_bounds() {
        warn!(
            current_page = page.current_page,
            total_pages = page.total_pages,
            "Catalog returned a page past the end"
        );
    }

    Ok(page)
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r#"{"CurrentPage":1,"TotalPages":3,"PageSize":10,"TotalCount":25,"Items":[{"Id":1,"Title":"Dune"}]}"#;

    fn service(base: &str) -> HttpQueryService {
        HttpQueryService::new(&SyncConfig::for_endpoints(base, None)).unwrap()
    }

    #[test]
    fn test_decode_direct_object() {
        let page = decode_page(PAGE).unwrap();
        assert_eq!(page.total_count, 25);
        assert_eq!(page.record_ids(), vec![1]);
    }

    #[test]
    fn test_decode_double_encoded_object() {
        let wrapped = serde_json::to_string(PAGE).unwrap();
        assert!(wrapped.starts_with('"'));
        assert_eq!(decode_page(&wrapped).unwrap(), decode_page(PAGE).unwrap());
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(matches!(decode_page("<html>"), Err(SyncError::Decode(_))));
        assert!(matches!(
            decode_page(r#"{"CurrentPage":1}"#),
            Err(SyncError::Decode(_))
        ));
        assert!(matches!(
            decode_page(r#""not a page""#),
            Err(SyncError::Decode(_))
        ));
    }

    #[test]
    fn test_decode_rejects_oversized_page() {
        let body = r#"{"CurrentPage":1,"TotalPages":1,"PageSize":1,"TotalCount":2,"Items":[{"Id":1},{"Id":2}]}"#;
        assert!(matches!(decode_page(body), Err(SyncError::Decode(_))));
    }

    #[test]
    fn test_decode_keeps_page_past_the_end() {
        let body = r#"{"CurrentPage":3,"TotalPages":2,"PageSize":10,"TotalCount":20,"Items":[]}"#;
        let page = decode_page(body).unwrap();
        assert_eq!(page.current_page, 3);
        assert!(!page.is_within_bounds());
    }

    #[test]
    fn test_page_url() {
        let svc = service("http://localhost:5000");
        let url = svc.page_url(&PageRequest::new(2, 10, "title").descending());
        assert_eq!(
            url.as_str(),
            "http://localhost:5000/?pageNumber=2&pageSize=10&sortField=title&sortDirection=desc"
        );

        let url = svc.page_url(&PageRequest::new(1, 5, "author").with_search("le guin"));
        assert_eq!(url.query(), Some("pageNumber=1&pageSize=5&sortField=author&sortDirection=asc&searchValue=le+guin"));
    }

    #[test]
    fn test_page_url_keeps_base_path() {
        let svc = service("https://books.example.com/api/books");
        let url = svc.page_url(&PageRequest::new(1, 10, "title"));
        assert_eq!(url.path(), "/api/books");
    }

    #[test]
    fn test_delete_url_uses_configured_param() {
        let mut config = SyncConfig::for_endpoints("http://localhost:5000", None);
        config.catalog.delete_param = "recordId".into();
        let svc = HttpQueryService::new(&config).unwrap();
        assert_eq!(svc.delete_url(7).query(), Some("recordId=7"));
    }

    #[test]
    fn test_rejects_non_http_base() {
        let config = SyncConfig::for_endpoints("ws://localhost:5000", None);
        assert!(matches!(
            HttpQueryService::new(&config),
            Err(SyncError::InvalidUrl(_))
        ));
    }
}

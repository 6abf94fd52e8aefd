//! # Domain Types
//!
//! Core catalog types used throughout Folio.
//!
//! ## Type Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Domain Types                                    │
//! │                                                                         │
//! │  ┌─────────────────┐   ┌─────────────────┐   ┌─────────────────┐       │
//! │  │  PageRequest    │   │   PageResult    │   │ CatalogRecord   │       │
//! │  │  ─────────────  │   │  ─────────────  │   │  ─────────────  │       │
//! │  │  page_number    │──►│  current_page   │   │  id (i64)       │       │
//! │  │  page_size      │   │  total_pages    │   │  fields (opaque)│       │
//! │  │  sort_column    │   │  total_count    │   │                 │       │
//! │  │  sort_ascending │   │  items ─────────┼──►│                 │       │
//! │  │  search_query   │   └─────────────────┘   └─────────────────┘       │
//! │  └─────────────────┘                                                    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Wire Shape
//! The catalog API speaks PascalCase JSON (`CurrentPage`, `TotalPages`, ...).
//! camelCase aliases are accepted on input so that proxies which re-case
//! payloads keep working.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use ts_rs::TS;

use crate::error::{CoreError, CoreResult};

/// Identifier of a catalog record.
pub type RecordId = i64;

// =============================================================================
// Catalog Record
// =============================================================================

/// A catalog record.
///
/// Only the identifier is interpreted. Everything else is domain payload that
/// the sync layer forwards untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogRecord {
    /// Unique record identifier (0 for records not yet created).
    #[serde(rename = "Id", alias = "id", default)]
    pub id: RecordId,

    /// Remaining fields, passed through unexamined.
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl CatalogRecord {
    /// Creates a record with no payload fields.
    pub fn new(id: RecordId) -> Self {
        CatalogRecord {
            id,
            fields: Map::new(),
        }
    }

    /// Adds a payload field.
    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    /// Returns a payload field by name.
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }
}

// =============================================================================
// Page Request
// =============================================================================

/// A paged query intent.
///
/// Immutable once built: the builder methods consume and return a new value.
/// Two requests with identical fields are the same query.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct PageRequest {
    page_number: u32,
    page_size: u32,
    sort_column: String,
    sort_ascending: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    search_query: Option<String>,
}

impl PageRequest {
    /// Creates an ascending request without a search filter.
    pub fn new(page_number: u32, page_size: u32, sort_column: impl Into<String>) -> Self {
        PageRequest {
            page_number,
            page_size,
            sort_column: sort_column.into(),
            sort_ascending: true,
            search_query: None,
        }
    }

    /// Returns the same query for another page.
    pub fn with_page(mut self, page_number: u32) -> Self {
        self.page_number = page_number;
        self
    }

    /// Returns the same query with a different page size.
    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size;
        self
    }

    /// Returns the same query sorted by another column.
    pub fn with_sort(mut self, column: impl Into<String>, ascending: bool) -> Self {
        self.sort_column = column.into();
        self.sort_ascending = ascending;
        self
    }

    /// Returns the same query sorted descending.
    pub fn descending(mut self) -> Self {
        self.sort_ascending = false;
        self
    }

    /// Returns the same query filtered by a search string.
    ///
    /// Blank strings clear the filter.
    pub fn with_search(mut self, query: impl Into<String>) -> Self {
        let query = query.into();
        let trimmed = query.trim();
        self.search_query = if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        };
        self
    }

    /// Returns the same query without a search filter.
    pub fn without_search(mut self) -> Self {
        self.search_query = None;
        self
    }

    #[inline]
    pub fn page_number(&self) -> u32 {
        self.page_number
    }

    #[inline]
    pub fn page_size(&self) -> u32 {
        self.page_size
    }

    #[inline]
    pub fn sort_column(&self) -> &str {
        &self.sort_column
    }

    #[inline]
    pub fn sort_ascending(&self) -> bool {
        self.sort_ascending
    }

    pub fn search_query(&self) -> Option<&str> {
        self.search_query.as_deref()
    }

    /// Returns `"asc"` or `"desc"` as the catalog API expects.
    pub fn sort_direction(&self) -> &'static str {
        if self.sort_ascending {
            "asc"
        } else {
            "desc"
        }
    }

    /// Query string parameters for the catalog endpoint, in wire order.
    ///
    /// ```rust
    /// use folio_core::PageRequest;
    ///
    /// let pairs = PageRequest::new(2, 10, "title").descending().query_pairs();
    /// assert_eq!(pairs[0], ("pageNumber", "2".to_string()));
    /// assert_eq!(pairs[3], ("sortDirection", "desc".to_string()));
    /// assert_eq!(pairs.len(), 4);
    /// ```
    pub fn query_pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = vec![
            ("pageNumber", self.page_number.to_string()),
            ("pageSize", self.page_size.to_string()),
            ("sortField", self.sort_column.clone()),
            ("sortDirection", self.sort_direction().to_string()),
        ];
        if let Some(ref search) = self.search_query {
            pairs.push(("searchValue", search.clone()));
        }
        pairs
    }
}

impl std::fmt::Display for PageRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "page {} (size {}) by {} {}",
            self.page_number,
            self.page_size,
            self.sort_column,
            self.sort_direction()
        )?;
        if let Some(ref search) = self.search_query {
            write!(f, " matching '{}'", search)?;
        }
        Ok(())
    }
}

// =============================================================================
// Page Result
// =============================================================================

/// One page of catalog records as reported by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[serde(rename_all = "PascalCase")]
#[ts(export)]
pub struct PageResult {
    /// 1-based page number (0 when the catalog is empty).
    #[serde(alias = "currentPage")]
    pub current_page: u32,

    #[serde(alias = "totalPages")]
    pub total_pages: u32,

    #[serde(alias = "pageSize")]
    pub page_size: u32,

    #[serde(alias = "totalCount")]
    pub total_count: u64,

    /// Server-computed look-ahead flag, passed through when present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[serde(alias = "hasPropertyInNextPage")]
    #[ts(optional)]
    pub has_property_in_next_page: Option<bool>,

    #[serde(default)]
    #[serde(alias = "items")]
    #[ts(type = "Array<{ Id: number } & Record<string, unknown>>")]
    pub items: Vec<CatalogRecord>,
}

impl PageResult {
    /// Creates a page result.
    pub fn new(
        current_page: u32,
        total_pages: u32,
        page_size: u32,
        total_count: u64,
        items: Vec<CatalogRecord>,
    ) -> Self {
        PageResult {
            current_page,
            total_pages,
            page_size,
            total_count,
            has_property_in_next_page: None,
            items,
        }
    }

    /// Number of pages needed for `total_count` records.
    ///
    /// ```rust
    /// use folio_core::PageResult;
    ///
    /// assert_eq!(PageResult::total_pages_for(25, 10), 3);
    /// assert_eq!(PageResult::total_pages_for(20, 10), 2);
    /// assert_eq!(PageResult::total_pages_for(0, 10), 0);
    /// ```
    pub fn total_pages_for(total_count: u64, page_size: u32) -> u32 {
        if page_size == 0 {
            return 0;
        }
        let pages = total_count.div_ceil(u64::from(page_size));
        u32::try_from(pages).unwrap_or(u32::MAX)
    }

    #[inline]
    pub fn has_previous(&self) -> bool {
        self.current_page > 1
    }

    #[inline]
    pub fn has_next(&self) -> bool {
        self.current_page < self.total_pages
    }

    /// Whether `current_page` lies within `0..=max(total_pages, 1)`.
    ///
    /// A page can legitimately fall outside after records are removed
    /// remotely; clamping is left to the caller.
    pub fn is_within_bounds(&self) -> bool {
        self.current_page <= self.total_pages.max(1)
    }

    /// Checks structural invariants the sync layer relies on.
    pub fn validate(&self) -> CoreResult<()> {
        if self.items.len() > self.page_size as usize {
            return Err(CoreError::MalformedPage {
                reason: format!(
                    "{} items on a page of {}",
                    self.items.len(),
                    self.page_size
                ),
            });
        }
        Ok(())
    }

    /// Returns the identifiers of the records on this page, in order.
    pub fn record_ids(&self) -> Vec<RecordId> {
        self.items.iter().map(|record| record.id).collect()
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn records(ids: std::ops::RangeInclusive<RecordId>) -> Vec<CatalogRecord> {
        ids.map(|id| CatalogRecord::new(id).with_field("Title", format!("Book {}", id)))
            .collect()
    }

    #[test]
    fn test_first_page_flags() {
        let page = PageResult::new(1, 3, 10, 25, records(1..=10));
        assert!(!page.has_previous());
        assert!(page.has_next());
        assert!(page.is_within_bounds());
        assert!(page.validate().is_ok());
    }

    #[test]
    fn test_last_page_flags() {
        let page = PageResult::new(3, 3, 10, 25, records(21..=25));
        assert!(page.has_previous());
        assert!(!page.has_next());
    }

    #[test]
    fn test_empty_catalog_is_within_bounds() {
        let page = PageResult::new(0, 0, 10, 0, Vec::new());
        assert!(page.is_within_bounds());
        assert!(!page.has_next());
        assert!(!page.has_previous());

        let page = PageResult::new(1, 0, 10, 0, Vec::new());
        assert!(page.is_within_bounds());
    }

    #[test]
    fn test_page_past_the_end_is_flagged() {
        let page = PageResult::new(3, 2, 10, 20, Vec::new());
        assert!(!page.is_within_bounds());
        // Still structurally valid; adopting it is the caller's choice.
        assert!(page.validate().is_ok());
    }

    #[test]
    fn test_oversized_page_is_malformed() {
        let page = PageResult::new(1, 1, 2, 3, records(1..=3));
        assert!(matches!(
            page.validate(),
            Err(CoreError::MalformedPage { .. })
        ));
    }

    #[test]
    fn test_page_result_pascal_case_wire_shape() {
        let json = r#"{
            "CurrentPage": 1,
            "TotalPages": 3,
            "PageSize": 10,
            "TotalCount": 25,
            "HasPropertyInNextPage": true,
            "Items": [{"Id": 7, "Title": "Dune", "Author": "Herbert"}]
        }"#;
        let page: PageResult = serde_json::from_str(json).unwrap();
        assert_eq!(page.total_count, 25);
        assert_eq!(page.has_property_in_next_page, Some(true));
        assert_eq!(page.items[0].id, 7);
        assert_eq!(page.items[0].field("Author"), Some(&Value::from("Herbert")));

        let out = serde_json::to_value(&page).unwrap();
        assert_eq!(out["CurrentPage"], 1);
        assert_eq!(out["Items"][0]["Id"], 7);
        assert_eq!(out["Items"][0]["Title"], "Dune");
    }

    #[test]
    fn test_page_result_accepts_camel_case() {
        let json = r#"{"currentPage":2,"totalPages":2,"pageSize":5,"totalCount":6,"items":[{"id":6}]}"#;
        let page: PageResult = serde_json::from_str(json).unwrap();
        assert_eq!(page.current_page, 2);
        assert_eq!(page.record_ids(), vec![6]);
        assert_eq!(page.has_property_in_next_page, None);
    }

    #[test]
    fn test_page_result_typescript_binding() {
        let decl = PageResult::decl();
        assert!(decl.contains("CurrentPage: number"));
        assert!(decl.contains("HasPropertyInNextPage?: boolean"));
        assert!(!decl.contains("boolean | null"));
        assert!(decl.contains("Items: Array<{ Id: number } & Record<string, unknown>>"));
    }

    #[test]
    fn test_record_fields_pass_through() {
        let json = r#"{"Id":3,"Title":"Emma","Tags":["classic"],"Year":1815}"#;
        let record: CatalogRecord = serde_json::from_str(json).unwrap();
        assert_eq!(record.id, 3);
        assert_eq!(record.fields.len(), 3);

        let back: Value = serde_json::to_value(&record).unwrap();
        let original: Value = serde_json::from_str(json).unwrap();
        assert_eq!(back, original);
    }

    #[test]
    fn test_new_record_defaults_id() {
        let record: CatalogRecord = serde_json::from_str(r#"{"Title":"Untitled"}"#).unwrap();
        assert_eq!(record.id, 0);
    }

    #[test]
    fn test_request_equivalence() {
        let a = PageRequest::new(1, 10, "title").with_search("  dune ");
        let b = PageRequest::new(1, 10, "title").with_search("dune");
        assert_eq!(a, b);
        assert_ne!(a, b.clone().descending());
        assert_ne!(a, b.with_page(2));
    }

    #[test]
    fn test_blank_search_clears_filter() {
        let request = PageRequest::new(1, 10, "title").with_search("   ");
        assert_eq!(request.search_query(), None);
        assert_eq!(request.query_pairs().len(), 4);
    }

    #[test]
    fn test_query_pairs_with_search() {
        let request = PageRequest::new(3, 25, "author").with_search("le guin");
        let pairs = request.query_pairs();
        assert_eq!(
            pairs,
            vec![
                ("pageNumber", "3".to_string()),
                ("pageSize", "25".to_string()),
                ("sortField", "author".to_string()),
                ("sortDirection", "asc".to_string()),
                ("searchValue", "le guin".to_string()),
            ]
        );
    }

    #[test]
    fn test_request_display() {
        let request = PageRequest::new(2, 10, "title").descending().with_search("x");
        assert_eq!(request.to_string(), "page 2 (size 10) by title desc matching 'x'");
    }
}

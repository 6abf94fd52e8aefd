//! # Validation Module
//!
//! Query intent validation for Folio.
//!
//! ## Validation Strategy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Validation Layers                                  │
//! │                                                                         │
//! │  Layer 1: UI (TypeScript)                                              │
//! │  ├── Pager buttons, page-size dropdown                                 │
//! │  └── Immediate user feedback                                           │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 2: Synchronizer (Rust)                                          │
//! │  ├── THIS MODULE: reject malformed intents before an epoch is spent    │
//! │  └── Nothing invalid reaches the network                               │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 3: Catalog API                                                  │
//! │  └── Authoritative paging, sorting and filtering                       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//! ```rust
//! use folio_core::PageRequest;
//! use folio_core::validation::validate_page_request;
//!
//! assert!(validate_page_request(&PageRequest::new(1, 10, "title")).is_ok());
//! assert!(validate_page_request(&PageRequest::new(0, 10, "title")).is_err());
//! ```

use crate::error::ValidationError;
use crate::types::PageRequest;

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

// =============================================================================
// Request Validators
// =============================================================================

/// Validates a complete page request.
///
/// Only the shape of the intent is checked. Page size limits, sort column
/// names and search text are the catalog's business and pass through as-is.
pub fn validate_page_request(request: &PageRequest) -> ValidationResult<()> {
    validate_page_number(request.page_number())?;
    validate_page_size(request.page_size())?;
    validate_sort_column(request.sort_column())?;
    Ok(())
}

/// Validates a page number.
///
/// ## Rules
/// - Must be positive (pages are 1-based)
pub fn validate_page_number(page_number: u32) -> ValidationResult<()> {
    if page_number == 0 {
        return Err(ValidationError::MustBePositive {
            field: "page number".to_string(),
        });
    }
    Ok(())
}

/// Validates a page size. Must be positive; there is no upper bound.
pub fn validate_page_size(page_size: u32) -> ValidationResult<()> {
    if page_size == 0 {
        return Err(ValidationError::MustBePositive {
            field: "page size".to_string(),
        });
    }
    Ok(())
}

/// Validates a sort column name.
///
/// ## Example
/// ```rust
/// use folio_core::validation::validate_sort_column;
///
/// assert!(validate_sort_column("title").is_ok());
/// assert!(validate_sort_column("publication-date").is_ok());
/// assert!(validate_sort_column("  ").is_err());
/// ```
pub fn validate_sort_column(column: &str) -> ValidationResult<()> {
    if column.trim().is_empty() {
        return Err(ValidationError::Required {
            field: "sort column".to_string(),
        });
    }
    Ok(())
}

// =============================================================================
// Unit Tests
// =============================================================================

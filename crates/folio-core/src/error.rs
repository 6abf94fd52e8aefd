//! # Error Types
//!
//! Domain-specific error types for folio-core.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Error Types                                     │
//! │                                                                         │
//! │  folio-core errors (this file)                                         │
//! │  ├── CoreError        - Malformed page data                            │
//! │  └── ValidationError  - Page request validation failures               │
//! │                                                                         │
//! │  folio-sync errors (separate crate)                                    │
//! │  └── SyncError        - Transport, decode, remote, push channel        │
//! │                                                                         │
//! │  Flow: ValidationError → SyncError::InvalidRequest → UI error state    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use thiserror::Error;

// =============================================================================
// Core Error
// =============================================================================

/// Errors about the shape of catalog data.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A page result violates a structural invariant.
    ///
    /// ## When This Occurs
    /// - The server returned more items than the page size it reported
    #[error("Malformed page result: {reason}")]
    MalformedPage { reason: String },

    /// Validation error (wraps ValidationError).
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
}

// =============================================================================
// Validation Error
// =============================================================================

/// Input validation errors for query intents.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// A required field is missing or empty.
    #[error("{field} is required")]
    Required { field: String },

    /// Value must be positive.
    #[error("{field} must be positive")]
    MustBePositive { field: String },
}

// =============================================================================
// Result Type Alias
// =============================================================================

/// Convenience type alias for Results with CoreError.
pub type CoreResult<T> = Result<T, CoreError>;

// =============================================================================
// Unit Tests
// =============================================================================

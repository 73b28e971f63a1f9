//! # Error Types
//!
//! Domain-specific error types for tillsync-core.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Error Types                                     │
//! │                                                                         │
//! │  tillsync-core errors (this file)                                      │
//! │  ├── CoreError        - General domain errors                          │
//! │  └── ValidationError  - Vendor payload coercion failures               │
//! │                                                                         │
//! │  tillsync-db errors (separate crate)                                   │
//! │  └── DbError          - Cache table failures                           │
//! │                                                                         │
//! │  tillsync-sync errors (separate crate)                                 │
//! │  └── SyncError        - Fatal-for-pass and retryable upstream errors   │
//! │                                                                         │
//! │  Flow: ValidationError → RecordError (per-record, pass continues)      │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use thiserror::Error;

// =============================================================================
// Core Error
// =============================================================================

/// Core domain errors.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A deletion policy that could never confirm anything.
    #[error("Deletion confirmations must be at least 1, got {0}")]
    InvalidDeletionPolicy(u32),

    /// Fetch window whose lower bound lies after its upper bound.
    #[error("Fetch window is inverted: since {since} is after until {until}")]
    InvertedWindow { since: String, until: String },

    /// Validation error (wraps ValidationError).
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
}

// =============================================================================
// Validation Error
// =============================================================================

/// Errors raised while coercing a loosely-typed vendor record.
///
/// Each one is scoped to a single record: the Fetcher turns it into a
/// [`RecordError`](crate::types::RecordError) and keeps going.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// A required field is missing or empty.
    #[error("{field} is required")]
    Required { field: String },

    /// Invalid format (e.g., non-numeric amount, unparseable timestamp).
    #[error("{field} has invalid format: {reason}")]
    InvalidFormat { field: String, reason: String },

    /// The JSON value has the wrong shape for the field.
    #[error("{field} must be {expected}")]
    WrongType { field: String, expected: String },

    /// The record itself is not a JSON object.
    #[error("record must be a JSON object")]
    NotAnObject,
}

impl ValidationError {
    pub(crate) fn required(field: &str) -> Self {
        ValidationError::Required {
            field: field.to_string(),
        }
    }

    pub(crate) fn invalid(field: &str, reason: impl Into<String>) -> Self {
        ValidationError::InvalidFormat {
            field: field.to_string(),
            reason: reason.into(),
        }
    }

    pub(crate) fn wrong_type(field: &str, expected: &str) -> Self {
        ValidationError::WrongType {
            field: field.to_string(),
            expected: expected.to_string(),
        }
    }
}

// =============================================================================
// Result Type Alias
// =============================================================================

/// Convenience type alias for Results with CoreError.
pub type CoreResult<T> = Result<T, CoreError>;

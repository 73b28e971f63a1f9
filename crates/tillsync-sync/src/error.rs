//! # Sync Error Types
//!
//! Error types for sync passes.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Sync Error Categories                             │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────┐ │
//! │  │  Configuration  │  │   Transient     │  │   Fatal upstream        │ │
//! │  │                 │  │   (retried)     │  │                         │ │
//! │  │  InvalidConfig  │  │  RateLimited    │  │  Unauthorized           │ │
//! │  │  InvalidUrl     │  │  Unavailable    │  │  UpstreamStatus         │ │
//! │  │  ConfigLoad     │  │  Timeout        │  │  UpstreamError          │ │
//! │  │                 │  │  Connection     │  │  MalformedPayload       │ │
//! │  │                 │  │                 │  │  RetriesExhausted       │ │
//! │  │                 │  │                 │  │  PaginationOverflow     │ │
//! │  └─────────────────┘  └─────────────────┘  └─────────────────────────┘ │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────────────────────────────────┐  │
//! │  │    Database     │  │  Pass control                               │  │
//! │  │  SchemaEnsure   │  │  PassInProgress, PassTimedOut               │  │
//! │  │  DatabaseError  │  │                                             │  │
//! │  └─────────────────┘  └─────────────────────────────────────────────┘  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Every variant here ends the pass. Per-record problems never become a
//! `SyncError`; they travel as `RecordError` inside the summary.

use std::time::Duration;

use thiserror::Error;

/// Result type alias for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that stop a sync pass (or, when transient, one upstream attempt).
#[derive(Debug, Error)]
pub enum SyncError {
    // =========================================================================
    // Configuration Errors
    // =========================================================================
    /// Invalid worker configuration.
    #[error("Invalid sync configuration: {0}")]
    InvalidConfig(String),

    /// Invalid upstream URL.
    #[error("Invalid upstream URL: {0}")]
    InvalidUrl(String),

    /// Failed to load config file.
    #[error("Failed to load config: {0}")]
    ConfigLoadFailed(String),

    // =========================================================================
    // Transient Upstream Errors
    // =========================================================================
    /// HTTP 429. `retry_after` comes from the `Retry-After` header.
    #[error("Rate limited by upstream")]
    RateLimited { retry_after: Option<Duration> },

    /// HTTP 5xx.
    #[error("Upstream unavailable: HTTP {0}")]
    UpstreamUnavailable(u16),

    /// Request exceeded its time budget.
    #[error("Upstream request timed out after {0:?}")]
    Timeout(Duration),

    /// Could not reach the upstream API.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    // =========================================================================
    // Fatal Upstream Errors
    // =========================================================================
    /// HTTP 401/403.
    #[error("Upstream rejected the credential: HTTP {0}")]
    Unauthorized(u16),

    /// Any other non-success status.
    #[error("Upstream returned HTTP {status}: {body}")]
    UpstreamStatus { status: u16, body: String },

    /// The API answered 200 with an error envelope.
    #[error("Upstream reported an error: {0}")]
    UpstreamError(String),

    /// The collection body could not be interpreted.
    #[error("Malformed upstream payload: {0}")]
    MalformedPayload(String),

    /// A transient error persisted through every attempt.
    #[error("Gave up after {attempts} attempts: {last_error}")]
    RetriesExhausted { attempts: u32, last_error: String },

    /// The upstream kept reporting more pages past the configured limit.
    #[error("Pagination did not finish within {max_pages} pages")]
    PaginationOverflow { max_pages: u32 },

    // =========================================================================
    // Database Errors
    // =========================================================================
    /// The cache table or its indexes could not be created.
    #[error("Schema ensure failed: {0}")]
    SchemaEnsureFailed(String),

    /// Reading the snapshot or watermark failed.
    #[error("Database error: {0}")]
    DatabaseError(String),

    // =========================================================================
    // Pass Control
    // =========================================================================
    /// Another pass holds the guard.
    #[error("A sync pass is already running")]
    PassInProgress,

    /// The pass exceeded `pass_timeout`.
    #[error("Sync pass timed out after {0:?}")]
    PassTimedOut(Duration),

    /// Internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

// =============================================================================
// Error Conversions
// =============================================================================

impl From<tillsync_db::DbError> for SyncError {
    fn from(err: tillsync_db::DbError) -> Self {
        match err {
            tillsync_db::DbError::SchemaFailed(msg) => SyncError::SchemaEnsureFailed(msg),
            other => SyncError::DatabaseError(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        SyncError::MalformedPayload(err.to_string())
    }
}

impl From<url::ParseError> for SyncError {
    fn from(err: url::ParseError) -> Self {
        SyncError::InvalidUrl(err.to_string())
    }
}

/// Maps transport failures. HTTP statuses are classified by the client
/// before a `reqwest::Error` can occur.
impl From<reqwest::Error> for SyncError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            // reqwest does not report the configured duration
            SyncError::Timeout(Duration::ZERO)
        } else if err.is_connect() || err.is_request() {
            SyncError::ConnectionFailed(err.to_string())
        } else if err.is_decode() || err.is_body() {
            SyncError::MalformedPayload(err.to_string())
        } else {
            SyncError::Internal(err.to_string())
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

// =============================================================================
// Error Categorization (for retry logic)
// =============================================================================

impl SyncError {
    /// Returns true if the upstream call may succeed when repeated.
    ///
    /// ## Retryable Errors
    /// - 429 and 5xx responses
    /// - Timeouts and connection failures
    ///
    /// ## Non-Retryable Errors
    /// - Credential rejections and other 4xx
    /// - Malformed payloads and error envelopes
    /// - Everything database or configuration related
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SyncError::RateLimited { .. }
                | SyncError::UpstreamUnavailable(_)
                | SyncError::Timeout(_)
                | SyncError::ConnectionFailed(_)
        )
    }

    /// Returns true if this error indicates a configuration problem.
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            SyncError::InvalidConfig(_) | SyncError::InvalidUrl(_) | SyncError::ConfigLoadFailed(_)
        )
    }

    /// Stable machine-readable category for telemetry.
    pub fn kind(&self) -> &'static str {
        match self {
            SyncError::InvalidConfig(_) | SyncError::InvalidUrl(_) | SyncError::ConfigLoadFailed(_) => {
                "config"
            }
            SyncError::RateLimited { .. }
            | SyncError::UpstreamUnavailable(_)
            | SyncError::Timeout(_)
            | SyncError::ConnectionFailed(_) => "transient",
            SyncError::Unauthorized(_) => "unauthorized",
            SyncError::UpstreamStatus { .. } | SyncError::UpstreamError(_) => "upstream",
            SyncError::MalformedPayload(_) => "malformed_payload",
            SyncError::RetriesExhausted { .. } => "retries_exhausted",
            SyncError::PaginationOverflow { .. } => "pagination_overflow",
            SyncError::SchemaEnsureFailed(_) => "schema",
            SyncError::DatabaseError(_) => "database",
            SyncError::PassInProgress => "pass_in_progress",
            SyncError::PassTimedOut(_) => "pass_timed_out",
            SyncError::Internal(_) => "internal",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_errors() {
        assert!(SyncError::RateLimited { retry_after: None }.is_retryable());
        assert!(SyncError::UpstreamUnavailable(503).is_retryable());
        assert!(SyncError::Timeout(Duration::from_secs(30)).is_retryable());
        assert!(SyncError::ConnectionFailed("refused".into()).is_retryable());

        assert!(!SyncError::Unauthorized(401).is_retryable());
        assert!(!SyncError::UpstreamStatus {
            status: 404,
            body: String::new()
        }
        .is_retryable());
        assert!(!SyncError::MalformedPayload("eof".into()).is_retryable());
        assert!(!SyncError::PassInProgress.is_retryable());
    }

    #[test]
    fn test_schema_failure_keeps_its_category() {
        let err: SyncError = tillsync_db::DbError::SchemaFailed("disk I/O error".into()).into();
        assert!(matches!(err, SyncError::SchemaEnsureFailed(_)));

        let err: SyncError = tillsync_db::DbError::PoolExhausted.into();
        assert_eq!(err.kind(), "database");
    }

    #[test]
    fn test_error_display() {
        let err = SyncError::RetriesExhausted {
            attempts: 5,
            last_error: "HTTP 503".into(),
        };
        assert_eq!(err.to_string(), "Gave up after 5 attempts: HTTP 503");
    }
}

//! # Domain Types
//!
//! Core domain types shared by the db and sync crates.
//!
//! ## Type Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Domain Types                                    │
//! │                                                                         │
//! │  ┌─────────────────────┐        ┌──────────────────────────┐           │
//! │  │  RemoteTransaction  │        │  LocalTransactionRecord  │           │
//! │  │  ─────────────────  │ ─────► │  ──────────────────────  │           │
//! │  │  transaction_id     │  pass  │  transaction (vendor)    │           │
//! │  │  paid_amount        │        │  date_updated  (engine)  │           │
//! │  │  products           │        │  synced_at     (engine)  │           │
//! │  │  date_close ...     │        │  missed_passes (engine)  │           │
//! │  └─────────────────────┘        └──────────────────────────┘           │
//! │                                                                         │
//! │  ┌─────────────────┐   ┌─────────────────┐   ┌─────────────────┐       │
//! │  │  FetchWindow    │   │  RecordError    │   │  SyncSummary    │       │
//! │  │  since / until  │   │  id + reason    │   │  counts, errors │       │
//! │  └─────────────────┘   └─────────────────┘   └─────────────────┘       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::amount::PaidAmount;
use crate::error::{CoreError, CoreResult};

// =============================================================================
// Remote Transaction
// =============================================================================

/// A transaction as reported by the POS vendor, after boundary validation.
///
/// Closed transactions are immutable upstream; open ones (`date_close` is
/// `None`) may still change amount and products.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteTransaction {
    /// Vendor-assigned identifier, globally unique.
    pub transaction_id: String,

    /// Client reference, if the order is attached to a client.
    pub client_id: Option<String>,

    /// Paid sum, kept as exact decimal text.
    pub paid_amount: PaidAmount,

    /// Product line items as serialized JSON. Opaque to the engine.
    pub products: String,

    /// When the order was opened.
    pub date_created: DateTime<Utc>,

    /// When the order was closed; `None` while still open.
    pub date_close: Option<DateTime<Utc>>,

    /// Table reference.
    pub table_id: Option<i64>,

    /// Payment-type code.
    pub pay_type: Option<i64>,
}

impl RemoteTransaction {
    /// Returns true while the order can still change upstream.
    #[inline]
    pub fn is_open(&self) -> bool {
        self.date_close.is_none()
    }

    /// Compares every vendor-originated field.
    ///
    /// Engine-owned columns never take part in this comparison, so a row
    /// that is only re-stamped stays "unchanged".
    pub fn content_eq(&self, other: &RemoteTransaction) -> bool {
        self.paid_amount == other.paid_amount
            && self.date_close == other.date_close
            && self.products == other.products
            && self.table_id == other.table_id
            && self.pay_type == other.pay_type
            && self.client_id == other.client_id
            && self.date_created == other.date_created
    }
}

// =============================================================================
// Local Transaction Record
// =============================================================================

/// A row of the local cache table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalTransactionRecord {
    /// Vendor-originated content.
    #[serde(flatten)]
    pub transaction: RemoteTransaction,

    /// Last time the vendor content of this row changed.
    pub date_updated: DateTime<Utc>,

    /// Start time of the last pass that observed this row upstream.
    pub synced_at: DateTime<Utc>,

    /// Consecutive eligible passes that did not observe this row.
    pub missed_passes: i64,
}

impl LocalTransactionRecord {
    /// Returns the transaction identifier.
    #[inline]
    pub fn id(&self) -> &str {
        &self.transaction.transaction_id
    }
}

// =============================================================================
// Fetch Window
// =============================================================================

/// How much history a pass asks the upstream API for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WindowMode {
    /// Only the recent past and still-open orders (derived from the cache).
    #[default]
    Incremental,

    /// Everything the vendor has.
    Full,
}

impl std::fmt::Display for WindowMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WindowMode::Incremental => write!(f, "incremental"),
            WindowMode::Full => write!(f, "full"),
        }
    }
}

/// Creation-time range covered by one fetch.
///
/// A cached row is only eligible for deletion when its `date_created` lies
/// inside the window of a complete fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchWindow {
    /// Inclusive lower bound; `None` means "from the beginning".
    pub since: Option<DateTime<Utc>>,

    /// Inclusive upper bound (normally the pass start time).
    pub until: DateTime<Utc>,
}

impl FetchWindow {
    /// A window covering all history up to `until`.
    pub fn full(until: DateTime<Utc>) -> Self {
        FetchWindow { since: None, until }
    }

    /// A window with an explicit lower bound.
    pub fn between(since: DateTime<Utc>, until: DateTime<Utc>) -> CoreResult<Self> {
        if since > until {
            return Err(CoreError::InvertedWindow {
                since: since.to_rfc3339(),
                until: until.to_rfc3339(),
            });
        }
        Ok(FetchWindow {
            since: Some(since),
            until,
        })
    }

    /// Derives the incremental window from cache watermarks.
    ///
    /// ```text
    /// since = min(high_water - lookback, oldest_open_created)
    /// ```
    ///
    /// An empty cache (no `high_water`) gets a full window so the first pass
    /// loads everything.
    pub fn incremental(
        high_water: Option<DateTime<Utc>>,
        oldest_open: Option<DateTime<Utc>>,
        lookback: Duration,
        until: DateTime<Utc>,
    ) -> Self {
        let Some(high_water) = high_water else {
            return FetchWindow::full(until);
        };

        let mut since = high_water - lookback;
        if let Some(open) = oldest_open {
            since = since.min(open);
        }

        FetchWindow {
            since: Some(since.min(until)),
            until,
        }
    }

    /// Returns true if `timestamp` falls inside the window.
    pub fn covers(&self, timestamp: DateTime<Utc>) -> bool {
        self.since.map_or(true, |since| timestamp >= since) && timestamp <= self.until
    }

    /// Returns true if the window has no lower bound.
    #[inline]
    pub fn is_full(&self) -> bool {
        self.since.is_none()
    }
}

// =============================================================================
// Per-Record Errors and Anomalies
// =============================================================================

/// A failure scoped to one record. The pass continues without it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordError {
    /// Transaction id, when it could be read.
    pub id: Option<String>,

    /// Human-readable reason.
    pub reason: String,
}

impl RecordError {
    pub fn new(id: Option<String>, reason: impl Into<String>) -> Self {
        RecordError {
            id,
            reason: reason.into(),
        }
    }

    /// An error for a record whose id is known.
    pub fn for_id(id: impl Into<String>, reason: impl Into<String>) -> Self {
        RecordError::new(Some(id.into()), reason)
    }
}

/// Suspicious conditions noticed by the Reconciler.
///
/// None of these abort a pass; they are reported to telemetry so operators
/// can tell an upstream outage from a quiet day.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Anomaly {
    /// Upstream returned nothing while the cache holds rows. No deletions.
    SuspiciousEmptyFetch { cached_rows: usize },

    /// The fetch was not confirmed complete. No deletions.
    IncompleteFetch { cached_rows: usize },

    /// The same id appeared more than once; the last one was kept.
    DuplicateTransaction {
        transaction_id: String,
        occurrences: usize,
    },
}

impl std::fmt::Display for Anomaly {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Anomaly::SuspiciousEmptyFetch { cached_rows } => write!(
                f,
                "upstream returned no transactions while {} are cached; deletions skipped",
                cached_rows
            ),
            Anomaly::IncompleteFetch { cached_rows } => write!(
                f,
                "fetch not confirmed complete; deletions skipped for {} cached rows",
                cached_rows
            ),
            Anomaly::DuplicateTransaction {
                transaction_id,
                occurrences,
            } => write!(
                f,
                "transaction {} returned {} times; last occurrence kept",
                transaction_id, occurrences
            ),
        }
    }
}

// =============================================================================
// Sync Summary
// =============================================================================

/// How a finished pass went.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PassOutcome {
    /// Every record was written.
    Success,
    /// At least one record failed; the rest were written.
    PartialSuccess,
}

/// Result of one pass, handed to telemetry and to the scheduler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncSummary {
    /// Correlation id for all log lines of this pass.
    pub pass_id: Uuid,

    /// Pass start; also the `synced_at` stamp written this pass.
    pub started_at: DateTime<Utc>,

    pub finished_at: DateTime<Utc>,

    /// Window the fetch covered.
    pub window: FetchWindow,

    pub created: usize,
    pub updated: usize,
    pub deleted: usize,

    /// Rows confirmed upstream this pass (created + updated + unchanged).
    pub synced: usize,

    pub unchanged: usize,

    /// Rows missing upstream that still need more confirmations.
    pub deferred_deletions: usize,

    /// Rows missing upstream but not eligible for deletion this pass.
    pub retained: usize,

    pub errors: Vec<RecordError>,

    pub anomalies: Vec<Anomaly>,
}

impl SyncSummary {
    /// Success, or partial success when any record failed.
    pub fn outcome(&self) -> PassOutcome {
        if self.errors.is_empty() {
            PassOutcome::Success
        } else {
            PassOutcome::PartialSuccess
        }
    }

    /// Total rows written (created, updated or deleted).
    pub fn changes(&self) -> usize {
        self.created + self.updated + self.deleted
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

//! # Cache Writer
//!
//! Applies a [`TransactionDiff`] to the cache, one statement per record.
//!
//! ## Write Order
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  to_create ──► upsert      synced_at = pass start, date_updated = start│
//! │  to_update ──► upsert      synced_at = pass start, date_updated = start│
//! │  unchanged ──► touch       synced_at = pass start                      │
//! │  missing   ──► record_miss missed_passes + 1                           │
//! │  to_delete ──► delete      hard delete                                 │
//! │                                                                         │
//! │  Each statement: own commit, own timeout.                              │
//! │  A failure becomes a RecordError and the batch continues.              │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! There is no pass-wide transaction: a pass cancelled halfway leaves the
//! rows it already wrote, and the next pass converges the rest.

use std::future::Future;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::error::{DbError, DbResult};
use crate::repository::transaction::TransactionRepository;
use tillsync_core::{RecordError, TransactionDiff};

/// Counts of what one `apply` actually wrote.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteReport {
    pub created: usize,
    pub updated: usize,
    pub deleted: usize,
    /// Unchanged rows re-stamped with the pass start.
    pub touched: usize,
    /// Missing rows whose miss counter was incremented.
    pub deferred: usize,
    pub errors: Vec<RecordError>,
}

/// Writes classified changes to the cache table.
#[derive(Debug, Clone)]
pub struct CacheWriter {
    repo: TransactionRepository,
    statement_timeout: Duration,
}

impl CacheWriter {
    pub fn new(repo: TransactionRepository, statement_timeout: Duration) -> Self {
        CacheWriter {
            repo,
            statement_timeout,
        }
    }

    /// Applies `diff`, stamping observed rows with `pass_started_at`.
    ///
    /// Never fails as a whole: every per-statement failure (constraint,
    /// connection, timeout) is reported in [`WriteReport::errors`].
    pub async fn apply(&self, diff: &TransactionDiff, pass_started_at: DateTime<Utc>) -> WriteReport {
        let mut report = WriteReport::default();

        for tx in &diff.to_create {
            match self.bounded(self.repo.upsert(tx, pass_started_at)).await {
                Ok(()) => report.created += 1,
                Err(e) => report.fail(&tx.transaction_id, "create", e),
            }
        }

        for tx in &diff.to_update {
            match self.bounded(self.repo.upsert(tx, pass_started_at)).await {
                Ok(()) => report.updated += 1,
                Err(e) => report.fail(&tx.transaction_id, "update", e),
            }
        }

        for id in &diff.unchanged {
            match self.bounded(self.repo.touch(id, pass_started_at)).await {
                Ok(true) => report.touched += 1,
                Ok(false) => debug!(transaction_id = %id, "Row vanished before re-stamp"),
                Err(e) => report.fail(id, "touch", e),
            }
        }

        for id in &diff.missing {
            match self.bounded(self.repo.record_miss(id)).await {
                Ok(true) => report.deferred += 1,
                Ok(false) => debug!(transaction_id = %id, "Row vanished before miss count"),
                Err(e) => report.fail(id, "record miss", e),
            }
        }

        for id in &diff.to_delete {
            match self.bounded(self.repo.delete(id)).await {
                Ok(_) => report.deleted += 1,
                Err(e) => report.fail(id, "delete", e),
            }
        }

        info!(
            created = report.created,
            updated = report.updated,
            deleted = report.deleted,
            touched = report.touched,
            deferred = report.deferred,
            errors = report.errors.len(),
            "Applied diff to cache"
        );

        report
    }

    async fn bounded<T>(&self, statement: impl Future<Output = DbResult<T>>) -> DbResult<T> {
        tokio::time::timeout(self.statement_timeout, statement)
            .await
            .map_err(|_| DbError::StatementTimeout(self.statement_timeout))?
    }
}

impl WriteReport {
    fn fail(&mut self, transaction_id: &str, action: &str, err: DbError) {
        warn!(
            transaction_id = %transaction_id,
            action,
            error = %err,
            "Cache write failed for record"
        );
        self.errors
            .push(RecordError::for_id(transaction_id, format!("{} failed: {}", action, err)));
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

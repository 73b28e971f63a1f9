//! # Reconciler
//!
//! Classifies upstream records against the cache snapshot.
//!
//! ## Classification
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                     diff(local, remote)                                 │
//! │                                                                         │
//! │  remote only ─────────────────────────────────────────► to_create      │
//! │  both, vendor content differs ────────────────────────► to_update      │
//! │  both, identical ─────────────────────────────────────► unchanged      │
//! │                                                                         │
//! │  local only:                                                           │
//! │    fetch incomplete / empty / outside window / seen-but-invalid        │
//! │      ─────────────────────────────────────────────────► retained       │
//! │    eligible, misses + 1 <  confirmations ─────────────► missing        │
//! │    eligible, misses + 1 >= confirmations ─────────────► to_delete      │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Absence from the observed set only counts as a deletion signal when the
//! observed set is proven complete for the row's creation time. Everything
//! else is kept, and repeated absences are needed before a row goes.

use std::collections::{HashMap, HashSet};

use crate::error::{CoreError, CoreResult};
use crate::types::{Anomaly, FetchWindow, LocalTransactionRecord, RecordError, RemoteTransaction};

// =============================================================================
// Inputs
// =============================================================================

/// Everything the Fetcher learned in one pass.
#[derive(Debug, Clone)]
pub struct RemoteSet {
    /// Valid records, in fetch order.
    pub records: Vec<RemoteTransaction>,

    /// Records that failed boundary coercion.
    pub rejected: Vec<RecordError>,

    /// Creation-time window the fetch asked for.
    pub window: FetchWindow,

    /// True only when pagination was fully drained.
    pub complete: bool,
}

/// How many consecutive eligible misses confirm a deletion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeletionPolicy {
    confirmations: u32,
}

impl DeletionPolicy {
    /// Default number of confirmations.
    pub const DEFAULT_CONFIRMATIONS: u32 = 2;

    pub fn new(confirmations: u32) -> CoreResult<Self> {
        if confirmations == 0 {
            return Err(CoreError::InvalidDeletionPolicy(confirmations));
        }
        Ok(DeletionPolicy { confirmations })
    }

    /// Delete on the first eligible miss.
    pub const fn immediate() -> Self {
        DeletionPolicy { confirmations: 1 }
    }

    #[inline]
    pub const fn confirmations(&self) -> u32 {
        self.confirmations
    }

    fn is_confirmed(&self, missed_passes: i64) -> bool {
        missed_passes.saturating_add(1) >= i64::from(self.confirmations)
    }
}

impl Default for DeletionPolicy {
    fn default() -> Self {
        DeletionPolicy {
            confirmations: Self::DEFAULT_CONFIRMATIONS,
        }
    }
}

// =============================================================================
// Output
// =============================================================================

/// Classified changes for the Cache Writer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransactionDiff {
    /// New upstream records.
    pub to_create: Vec<RemoteTransaction>,

    /// Upstream records whose vendor content changed.
    pub to_update: Vec<RemoteTransaction>,

    /// Ids observed upstream with identical content.
    pub unchanged: Vec<String>,

    /// Ids whose deletion is confirmed.
    pub to_delete: Vec<String>,

    /// Ids missing upstream that need more confirmations.
    pub missing: Vec<String>,

    /// Ids missing upstream but not eligible for deletion this pass.
    pub retained: Vec<String>,

    /// Suspicious conditions, for telemetry.
    pub anomalies: Vec<Anomaly>,
}

impl TransactionDiff {
    /// Returns true when no row content would change.
    pub fn is_noop(&self) -> bool {
        self.to_create.is_empty() && self.to_update.is_empty() && self.to_delete.is_empty()
    }

    /// Number of upstream records observed (after de-duplication).
    pub fn observed(&self) -> usize {
        self.to_create.len() + self.to_update.len() + self.unchanged.len()
    }
}

// =============================================================================
// Reconciler
// =============================================================================

/// Stateless differ, parameterized by the deletion policy.
#[derive(Debug, Clone, Copy, Default)]
pub struct Reconciler {
    policy: DeletionPolicy,
}

impl Reconciler {
    pub fn new(policy: DeletionPolicy) -> Self {
        Reconciler { policy }
    }

    pub fn policy(&self) -> DeletionPolicy {
        self.policy
    }

    /// Compares the cache snapshot with the upstream set.
    ///
    /// Output vectors follow fetch order for upstream records and snapshot
    /// order for local-only rows, so the result is deterministic.
    pub fn diff(&self, local: &[LocalTransactionRecord], remote: &RemoteSet) -> TransactionDiff {
        let mut diff = TransactionDiff::default();

        let (records, duplicates) = dedupe_last_wins(&remote.records);
        for (transaction_id, occurrences) in duplicates {
            diff.anomalies.push(Anomaly::DuplicateTransaction {
                transaction_id,
                occurrences,
            });
        }

        let local_by_id: HashMap<&str, &LocalTransactionRecord> =
            local.iter().map(|row| (row.id(), row)).collect();

        for record in &records {
            match local_by_id.get(record.transaction_id.as_str()) {
                None => diff.to_create.push(record.clone()),
                Some(row) if row.transaction.content_eq(record) => {
                    diff.unchanged.push(record.transaction_id.clone())
                }
                Some(_) => diff.to_update.push(record.clone()),
            }
        }

        let remote_ids: HashSet<&str> = records.iter().map(|r| r.transaction_id.as_str()).collect();
        let rejected_ids: HashSet<&str> = remote
            .rejected
            .iter()
            .filter_map(|e| e.id.as_deref())
            .collect();

        let absent: Vec<&LocalTransactionRecord> = local
            .iter()
            .filter(|row| !remote_ids.contains(row.id()))
            .collect();

        if absent.is_empty() {
            return diff;
        }

        // Guards that make every absence meaningless for this pass
        let blanket_guard = if !remote.complete {
            Some(Anomaly::IncompleteFetch {
                cached_rows: local.len(),
            })
        } else if records.is_empty() {
            Some(Anomaly::SuspiciousEmptyFetch {
                cached_rows: local.len(),
            })
        } else {
            None
        };

        if let Some(anomaly) = blanket_guard {
            diff.anomalies.push(anomaly);
            diff.retained = absent.iter().map(|row| row.id().to_string()).collect();
            return diff;
        }

        for row in absent {
            let id = row.id().to_string();
            if rejected_ids.contains(row.id()) || !remote.window.covers(row.transaction.date_created) {
                diff.retained.push(id);
            } else if self.policy.is_confirmed(row.missed_passes) {
                diff.to_delete.push(id);
            } else {
                diff.missing.push(id);
            }
        }

        diff
    }
}

/// Keeps the last occurrence of each id, at the position of its first one.
fn dedupe_last_wins(records: &[RemoteTransaction]) -> (Vec<RemoteTransaction>, Vec<(String, usize)>) {
    let mut slots: HashMap<&str, (usize, usize)> = HashMap::with_capacity(records.len());
    let mut unique: Vec<RemoteTransaction> = Vec::with_capacity(records.len());

    for record in records {
        match slots.get_mut(record.transaction_id.as_str()) {
            Some((index, count)) => {
                unique[*index] = record.clone();
                *count += 1;
            }
            None => {
                slots.insert(record.transaction_id.as_str(), (unique.len(), 1));
                unique.push(record.clone());
            }
        }
    }

    let mut duplicates: Vec<(String, usize)> = slots
        .into_iter()
        .filter(|(_, (_, count))| *count > 1)
        .map(|(id, (_, count))| (id.to_string(), count))
        .collect();
    duplicates.sort();

    (unique, duplicates)
}

// =============================================================================
// Unit Tests
// =============================================================================

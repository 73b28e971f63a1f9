//! # Sync Orchestrator
//!
//! Runs one sync pass end to end.
//!
//! ## Pass Sequence
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  guard (try_lock) ──busy──► PassInProgress                              │
//! │     │                                                                   │
//! │     ▼                                                                   │
//! │  ensure schema ─► derive window ─► fetch all pages ─► snapshot cache    │
//! │        │                │                 │                │            │
//! │        └────────────────┴───── fatal ─────┴────────────────┘            │
//! │                                  │                                      │
//! │                                  ▼                                      │
//! │                       emit_failure, zero writes                         │
//! │                                                                         │
//! │  snapshot ─► diff (Reconciler) ─► apply (CacheWriter) ─► SyncSummary    │
//! │                                                              │          │
//! │                                   emit_anomaly × N, emit_summary        │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Nothing is written until pagination has fully drained. Once writing
//! starts, each record stands alone: a failed row becomes a `RecordError`
//! and the remaining rows are still written.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Mutex;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::error::{SyncError, SyncResult};
use crate::fetcher::UpstreamFetcher;
use crate::telemetry::TelemetrySink;
use tillsync_core::{
    DeletionPolicy, Reconciler, SyncSummary, WindowMode, DEFAULT_LOOKBACK_HOURS,
};
use tillsync_db::Database;

// =============================================================================
// Pass Dependencies
// =============================================================================

/// Per-pass tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PassSettings {
    /// How far behind the newest cached row an incremental window reaches.
    pub lookback: chrono::Duration,

    /// Upper bound for each write statement.
    pub statement_timeout: Duration,
}

impl Default for PassSettings {
    fn default() -> Self {
        PassSettings {
            lookback: chrono::Duration::hours(i64::from(DEFAULT_LOOKBACK_HOURS)),
            statement_timeout: Duration::from_secs(5),
        }
    }
}

/// Everything a pass needs, passed in explicitly.
#[derive(Clone)]
pub struct PassDeps {
    pub db: Database,
    pub fetcher: UpstreamFetcher,
    pub telemetry: Arc<dyn TelemetrySink>,
    pub policy: DeletionPolicy,
    pub settings: PassSettings,
}

impl std::fmt::Debug for PassDeps {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PassDeps")
            .field("fetcher", &self.fetcher)
            .field("policy", &self.policy)
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Pass
// =============================================================================

/// Runs one pass without the concurrency guard.
///
/// Callers that may overlap should go through [`SyncOrchestrator::run`].
pub async fn run_pass(deps: &PassDeps, mode: WindowMode) -> SyncResult<SyncSummary> {
    let pass_id = Uuid::new_v4();
    let span = info_span!("sync_pass", pass_id = %pass_id, mode = %mode);

    match execute(deps, pass_id, mode).instrument(span).await {
        Ok(summary) => {
            for anomaly in &summary.anomalies {
                deps.telemetry.emit_anomaly(pass_id, anomaly);
            }
            deps.telemetry.emit_summary(&summary);
            Ok(summary)
        }
        Err(e) => {
            deps.telemetry.emit_failure(pass_id, &e);
            Err(e)
        }
    }
}

async fn execute(deps: &PassDeps, pass_id: Uuid, mode: WindowMode) -> SyncResult<SyncSummary> {
    let started_at = Utc::now();
    info!("Sync pass started");

    deps.db.ensure_schema().await?;

    let window = deps
        .db
        .watermarks()
        .window_for(mode, deps.settings.lookback, started_at)
        .await?;
    debug!(since = ?window.since, until = %window.until, "Derived fetch window");

    let fetched = deps.fetcher.fetch_all(window).await?;
    let remote = fetched.into_remote_set();

    let local = deps.db.transactions().snapshot().await?;

    let diff = Reconciler::new(deps.policy).diff(&local, &remote);
    debug!(
        cached = local.len(),
        to_create = diff.to_create.len(),
        to_update = diff.to_update.len(),
        unchanged = diff.unchanged.len(),
        to_delete = diff.to_delete.len(),
        missing = diff.missing.len(),
        retained = diff.retained.len(),
        "Reconciled upstream against cache"
    );

    let report = deps
        .db
        .writer(deps.settings.statement_timeout)
        .apply(&diff, started_at)
        .await;

    let mut errors = remote.rejected;
    errors.extend(report.errors);

    Ok(SyncSummary {
        pass_id,
        started_at,
        finished_at: Utc::now(),
        window,
        created: report.created,
        updated: report.updated,
        deleted: report.deleted,
        synced: report.created + report.updated + report.touched,
        unchanged: report.touched,
        deferred_deletions: report.deferred,
        retained: diff.retained.len(),
        errors,
        anomalies: diff.anomalies,
    })
}

// =============================================================================
// Orchestrator
// =============================================================================

/// Guards [`run_pass`] so at most one pass runs per process.
#[derive(Debug, Clone)]
pub struct SyncOrchestrator {
    deps: Arc<PassDeps>,
    guard: Arc<Mutex<()>>,
}

impl SyncOrchestrator {
    pub fn new(deps: PassDeps) -> Self {
        SyncOrchestrator {
            deps: Arc::new(deps),
            guard: Arc::new(Mutex::new(())),
        }
    }

    pub fn deps(&self) -> &PassDeps {
        &self.deps
    }

    /// Runs a pass, or fails fast with `PassInProgress` if one is running.
    pub async fn run(&self, mode: WindowMode) -> SyncResult<SyncSummary> {
        let _guard = match self.guard.try_lock() {
            Ok(guard) => guard,
            Err(_) => {
                let err = SyncError::PassInProgress;
                self.deps.telemetry.emit_failure(Uuid::new_v4(), &err);
                return Err(err);
            }
        };

        run_pass(&self.deps, mode).await
    }

    /// Like [`run`](Self::run), but cancels the pass after `limit`.
    ///
    /// Rows committed before cancellation stay; the timeout is reported to
    /// telemetry as a failed pass.
    pub async fn run_bounded(&self, mode: WindowMode, limit: Duration) -> SyncResult<SyncSummary> {
        match tokio::time::timeout(limit, self.run(mode)).await {
            Ok(result) => result,
            Err(_) => {
                let err = SyncError::PassTimedOut(limit);
                warn!(error = %err, "Sync pass cancelled");
                self.deps.telemetry.emit_failure(Uuid::new_v4(), &err);
                Err(err)
            }
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

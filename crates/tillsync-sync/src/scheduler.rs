//! # Sync Scheduler
//!
//! Runs passes on a fixed interval until shut down.
//!
//! ## Loop
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │   tokio::select! {                                                     │
//! │       interval.tick()   ──► pass n = passes + 1                        │
//! │                             mode = Full every `full_resync_every`      │
//! │                             orchestrator.run_bounded(pass_timeout)     │
//! │                             record summary / error in status           │
//! │                                                                         │
//! │       shutdown_rx.recv() ──► break                                     │
//! │   }                                                                     │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Passes run inline in the loop, so a slow pass delays the next tick
//! instead of overlapping it (`MissedTickBehavior::Skip`).

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::orchestrator::SyncOrchestrator;
use tillsync_core::{SyncSummary, WindowMode};

/// Timing for the scheduler loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerSettings {
    pub interval: Duration,

    /// Upper bound for one whole pass.
    pub pass_timeout: Duration,

    /// Every Nth pass uses a full window. 0 disables full passes.
    pub full_resync_every: u32,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        SchedulerSettings {
            interval: Duration::from_secs(300),
            pass_timeout: Duration::from_secs(600),
            full_resync_every: 288,
        }
    }
}

impl SchedulerSettings {
    /// Window mode for the 1-based pass number `pass`.
    pub fn mode_for(&self, pass: u64) -> WindowMode {
        if self.full_resync_every > 0 && pass % u64::from(self.full_resync_every) == 0 {
            WindowMode::Full
        } else {
            WindowMode::Incremental
        }
    }
}

/// Current state of the scheduler.
#[derive(Debug, Clone, Default)]
pub struct SchedulerStatus {
    /// Passes attempted so far.
    pub passes: u64,
    /// Summary of the most recent successful pass.
    pub last_summary: Option<SyncSummary>,
    /// Error of the most recent failed pass; cleared on success.
    pub last_error: Option<String>,
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub running: bool,
}

/// Handle for the spawned scheduler task.
#[derive(Debug)]
pub struct SchedulerHandle {
    shutdown_tx: mpsc::Sender<()>,
    status: Arc<RwLock<SchedulerStatus>>,
    task: JoinHandle<()>,
}

impl SchedulerHandle {
    /// Gets the current status.
    pub async fn status(&self) -> SchedulerStatus {
        self.status.read().await.clone()
    }

    /// Stops the loop and waits for the in-flight pass (if any) to finish.
    pub async fn shutdown(self) {
        info!("Shutting down sync scheduler");
        let _ = self.shutdown_tx.send(()).await;
        if let Err(e) = self.task.await {
            warn!(error = %e, "Scheduler task ended abnormally");
        }
    }
}

/// Interval driver for [`SyncOrchestrator`].
pub struct SyncScheduler {
    orchestrator: SyncOrchestrator,
    settings: SchedulerSettings,
    status: Arc<RwLock<SchedulerStatus>>,
    shutdown_rx: mpsc::Receiver<()>,
}

impl SyncScheduler {
    /// Spawns the scheduler loop. The first pass starts immediately.
    pub fn spawn(orchestrator: SyncOrchestrator, settings: SchedulerSettings) -> SchedulerHandle {
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        let status = Arc::new(RwLock::new(SchedulerStatus {
            running: true,
            ..Default::default()
        }));

        let scheduler = SyncScheduler {
            orchestrator,
            settings,
            status: status.clone(),
            shutdown_rx,
        };
        let task = tokio::spawn(scheduler.run());

        SchedulerHandle {
            shutdown_tx,
            status,
            task,
        }
    }

    async fn run(mut self) {
        info!(
            interval_secs = self.settings.interval.as_secs(),
            full_resync_every = self.settings.full_resync_every,
            "Sync scheduler started"
        );

        let mut interval = tokio::time::interval(self.settings.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.tick().await;
                }
                _ = self.shutdown_rx.recv() => {
                    info!("Sync scheduler received shutdown");
                    break;
                }
            }
        }

        self.status.write().await.running = false;
        info!("Sync scheduler stopped");
    }

    async fn tick(&mut self) {
        let pass = {
            let mut status = self.status.write().await;
            status.passes += 1;
            status.last_attempt_at = Some(Utc::now());
            status.passes
        };
        let mode = self.settings.mode_for(pass);
        debug!(pass, mode = %mode, "Scheduler tick");

        let result = self
            .orchestrator
            .run_bounded(mode, self.settings.pass_timeout)
            .await;

        let mut status = self.status.write().await;
        match result {
            Ok(summary) => {
                status.last_error = None;
                status.last_summary = Some(summary);
            }
            Err(e) => status.last_error = Some(e.to_string()),
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetcher::tests::ScriptedSource;
    use crate::fetcher::{FetchSettings, RawPage, UpstreamFetcher};
    use crate::orchestrator::tests::StalledSource;
    use crate::orchestrator::{PassDeps, PassSettings};
    use crate::telemetry::tests::RecordingSink;
    use crate::telemetry::NoOpSink;
    use serde_json::json;
    use tillsync_core::DeletionPolicy;
    use tillsync_db::{Database, DbConfig};

    #[test]
    fn test_full_pass_cadence() {
        let settings = SchedulerSettings {
            full_resync_every: 3,
            ..Default::default()
        };
        let modes: Vec<WindowMode> = (1..=6).map(|n| settings.mode_for(n)).collect();
        assert_eq!(
            modes,
            vec![
                WindowMode::Incremental,
                WindowMode::Incremental,
                WindowMode::Full,
                WindowMode::Incremental,
                WindowMode::Incremental,
                WindowMode::Full,
            ]
        );

        let never = SchedulerSettings {
            full_resync_every: 0,
            ..Default::default()
        };
        assert_eq!(never.mode_for(288), WindowMode::Incremental);
    }

    #[tokio::test]
    async fn test_runs_first_pass_and_shuts_down() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let source = ScriptedSource::new(vec![Ok(RawPage {
            records: vec![json!({
                "transaction_id": 1,
                "paid_amount": "10",
                "date_created": "2024-03-01 10:00:00",
            })],
            next_page: None,
            total: None,
        })]);
        let deps = PassDeps {
            db: db.clone(),
            fetcher: UpstreamFetcher::new(source.clone(), FetchSettings::default()),
            telemetry: Arc::new(NoOpSink),
            policy: DeletionPolicy::default(),
            settings: PassSettings::default(),
        };
        let settings = SchedulerSettings {
            interval: Duration::from_secs(3600),
            pass_timeout: Duration::from_secs(30),
            full_resync_every: 0,
        };

        let handle = SyncScheduler::spawn(SyncOrchestrator::new(deps), settings);

        let mut status = handle.status().await;
        for _ in 0..200 {
            if status.last_summary.is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
            status = handle.status().await;
        }

        assert_eq!(status.passes, 1);
        assert!(status.running);
        assert_eq!(status.last_summary.map(|s| s.created), Some(1));
        assert_eq!(status.last_error, None);
        assert_eq!(db.transactions().count().await.unwrap(), 1);

        handle.shutdown().await;
        assert_eq!(source.calls(), 1);
    }

    #[tokio::test]
    async fn test_timed_out_pass_reaches_telemetry() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let sink = Arc::new(RecordingSink::default());
        let deps = PassDeps {
            db,
            fetcher: UpstreamFetcher::new(Arc::new(StalledSource), FetchSettings::default()),
            telemetry: sink.clone(),
            policy: DeletionPolicy::default(),
            settings: PassSettings::default(),
        };
        let settings = SchedulerSettings {
            interval: Duration::from_secs(3600),
            pass_timeout: Duration::from_millis(50),
            full_resync_every: 0,
        };

        let handle = SyncScheduler::spawn(SyncOrchestrator::new(deps), settings);

        let mut status = handle.status().await;
        for _ in 0..200 {
            if status.last_error.is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
            status = handle.status().await;
        }

        assert_eq!(
            status.last_error.as_deref(),
            Some("Sync pass timed out after 50ms")
        );
        assert_eq!(sink.failures(), vec!["pass_timed_out".to_string()]);

        handle.shutdown().await;
    }
}

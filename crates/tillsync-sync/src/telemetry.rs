//! # Telemetry Sink
//!
//! Where pass outcomes go once a pass ends.
//!
//! ```text
//! success / partial success:  emit_anomaly × N, then emit_summary
//! fatal failure:              emit_failure
//! ```
//!
//! The production sink is [`TracingSink`]; embedders can plug in their own
//! (metrics, alerting) through the [`TelemetrySink`] trait.

use tracing::{error, info, warn};
use uuid::Uuid;

use crate::error::SyncError;
use tillsync_core::{Anomaly, PassOutcome, SyncSummary};

/// Receives pass outcomes.
pub trait TelemetrySink: Send + Sync {
    /// A pass finished (fully or partially).
    fn emit_summary(&self, summary: &SyncSummary);

    /// Something suspicious was noticed during a pass.
    fn emit_anomaly(&self, pass_id: Uuid, anomaly: &Anomaly);

    /// A pass aborted before writing anything.
    fn emit_failure(&self, pass_id: Uuid, error: &SyncError);
}

/// Emits structured `tracing` events.
///
/// The summary is also attached as one JSON field so log shippers can index
/// it without parsing the message.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl TelemetrySink for TracingSink {
    fn emit_summary(&self, summary: &SyncSummary) {
        let json = serde_json::to_string(summary).unwrap_or_else(|e| format!("{{\"error\":\"{}\"}}", e));
        let elapsed_ms = (summary.finished_at - summary.started_at).num_milliseconds();

        match summary.outcome() {
            PassOutcome::Success => info!(
                pass_id = %summary.pass_id,
                created = summary.created,
                updated = summary.updated,
                deleted = summary.deleted,
                synced = summary.synced,
                deferred_deletions = summary.deferred_deletions,
                elapsed_ms,
                summary = %json,
                "Sync pass succeeded"
            ),
            PassOutcome::PartialSuccess => warn!(
                pass_id = %summary.pass_id,
                created = summary.created,
                updated = summary.updated,
                deleted = summary.deleted,
                synced = summary.synced,
                errors = summary.errors.len(),
                elapsed_ms,
                summary = %json,
                "Sync pass partially succeeded"
            ),
        }
    }

    fn emit_anomaly(&self, pass_id: Uuid, anomaly: &Anomaly) {
        warn!(pass_id = %pass_id, anomaly = %anomaly, "Sync anomaly");
    }

    fn emit_failure(&self, pass_id: Uuid, error: &SyncError) {
        error!(
            pass_id = %pass_id,
            kind = error.kind(),
            retryable = error.is_retryable(),
            error = %error,
            "Sync pass failed"
        );
    }
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoOpSink;

impl TelemetrySink for NoOpSink {
    fn emit_summary(&self, _summary: &SyncSummary) {}
    fn emit_anomaly(&self, _pass_id: Uuid, _anomaly: &Anomaly) {}
    fn emit_failure(&self, _pass_id: Uuid, _error: &SyncError) {}
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::Mutex;

    /// One recorded emission.
    #[derive(Debug, Clone)]
    pub(crate) enum Event {
        Summary(SyncSummary),
        Anomaly(Uuid, Anomaly),
        Failure(Uuid, String),
    }

    /// Keeps every emission for assertions.
    #[derive(Debug, Default)]
    pub(crate) struct RecordingSink {
        pub(crate) events: Mutex<Vec<Event>>,
    }

    impl RecordingSink {
        pub(crate) fn summaries(&self) -> Vec<SyncSummary> {
            self.events
                .lock()
                .unwrap()
                .iter()
                .filter_map(|e| match e {
                    Event::Summary(s) => Some(s.clone()),
                    _ => None,
                })
                .collect()
        }

        pub(crate) fn anomalies(&self) -> Vec<Anomaly> {
            self.events
                .lock()
                .unwrap()
                .iter()
                .filter_map(|e| match e {
                    Event::Anomaly(_, a) => Some(a.clone()),
                    _ => None,
                })
                .collect()
        }

        pub(crate) fn failures(&self) -> Vec<String> {
            self.events
                .lock()
                .unwrap()
                .iter()
                .filter_map(|e| match e {
                    Event::Failure(_, kind) => Some(kind.clone()),
                    _ => None,
                })
                .collect()
        }
    }

    impl TelemetrySink for RecordingSink {
        fn emit_summary(&self, summary: &SyncSummary) {
            self.events.lock().unwrap().push(Event::Summary(summary.clone()));
        }

        fn emit_anomaly(&self, pass_id: Uuid, anomaly: &Anomaly) {
            self.events
                .lock()
                .unwrap()
                .push(Event::Anomaly(pass_id, anomaly.clone()));
        }

        fn emit_failure(&self, pass_id: Uuid, error: &SyncError) {
            self.events
                .lock()
                .unwrap()
                .push(Event::Failure(pass_id, error.kind().to_string()));
        }
    }

    #[test]
    fn test_sinks_accept_every_event() {
        let summary = SyncSummary {
            pass_id: Uuid::new_v4(),
            started_at: chrono::Utc::now(),
            finished_at: chrono::Utc::now(),
            window: tillsync_core::FetchWindow::full(chrono::Utc::now()),
            created: 1,
            updated: 0,
            deleted: 0,
            synced: 1,
            unchanged: 0,
            deferred_deletions: 0,
            retained: 0,
            errors: vec![tillsync_core::RecordError::for_id("9", "bad amount")],
            anomalies: vec![],
        };
        let anomaly = Anomaly::SuspiciousEmptyFetch { cached_rows: 3 };
        let failure = SyncError::Unauthorized(401);

        let sinks: Vec<Box<dyn TelemetrySink>> = vec![Box::new(TracingSink), Box::new(NoOpSink)];
        for sink in &sinks {
            sink.emit_anomaly(summary.pass_id, &anomaly);
            sink.emit_summary(&summary);
            sink.emit_failure(summary.pass_id, &failure);
        }

        let recording = RecordingSink::default();
        recording.emit_anomaly(summary.pass_id, &anomaly);
        recording.emit_summary(&summary);
        recording.emit_failure(summary.pass_id, &failure);
        assert_eq!(recording.anomalies(), vec![anomaly]);
        assert_eq!(recording.summaries().len(), 1);
        assert_eq!(recording.failures(), vec!["unauthorized".to_string()]);
    }
}

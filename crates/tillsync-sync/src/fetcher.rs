//! # Upstream Fetcher
//!
//! Drains every page of the upstream collection for one window.
//!
//! ## Page Loop
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  page = 1                                                              │
//! │     │                                                                   │
//! │     ▼                                                                   │
//! │  ┌──────────────┐  transient error   ┌──────────────┐                  │
//! │  │  fetch_page  │ ─────────────────► │   Backoff    │                  │
//! │  │              │ ◄───────────────── │ (exp, jitter)│                  │
//! │  └──────┬───────┘   next attempt     └──────┬───────┘                  │
//! │         │ ok                                │ max_attempts reached     │
//! │         ▼                                   ▼                          │
//! │  coerce each record                  RetriesExhausted (fatal)          │
//! │  (bad record → RecordError)                                            │
//! │         │                                                               │
//! │         ├── next_page = Some(n) → page = n, loop                       │
//! │         └── next_page = None    → complete = true, return              │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The fetcher only returns once pagination is drained. Any fatal error means
//! the caller gets no records at all, so a partial listing can never be
//! mistaken for the full one.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use backoff::backoff::Backoff;
use backoff::ExponentialBackoff;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::error::{SyncError, SyncResult};
use tillsync_core::validation::{coerce_transaction, peek_transaction_id};
use tillsync_core::{FetchWindow, RecordError, RemoteSet, RemoteTransaction};

// =============================================================================
// Page Source
// =============================================================================

/// One page request against the upstream collection. Pages are 1-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub window: FetchWindow,
    pub page: u32,
    pub per_page: u32,
}

/// One page of raw upstream records.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawPage {
    pub records: Vec<Value>,
    /// `None` when this was the last page.
    pub next_page: Option<u32>,
    /// Total record count, when the upstream reports one.
    pub total: Option<u64>,
}

/// Anything that can serve pages of raw transaction records.
///
/// Implemented by [`PosApiClient`](crate::client::PosApiClient) for the
/// vendor API and by in-memory fakes in tests.
#[async_trait]
pub trait PageSource: Send + Sync {
    async fn fetch_page(&self, request: &PageRequest) -> SyncResult<RawPage>;
}

// =============================================================================
// Settings and Output
// =============================================================================

/// Pagination and retry settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchSettings {
    pub per_page: u32,
    /// Attempts per page, first try included.
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub max_pages: u32,
}

impl Default for FetchSettings {
    fn default() -> Self {
        FetchSettings {
            per_page: 100,
            max_attempts: 5,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(30),
            max_pages: 10_000,
        }
    }
}

/// Everything one drained fetch produced.
#[derive(Debug, Clone)]
pub struct FetchedSet {
    pub records: Vec<RemoteTransaction>,
    pub rejected: Vec<RecordError>,
    pub window: FetchWindow,
    /// True when pagination drained and no reported total went unmet.
    pub complete: bool,
    pub pages: u32,
}

impl FetchedSet {
    /// Converts into the Reconciler's input.
    pub fn into_remote_set(self) -> RemoteSet {
        RemoteSet {
            records: self.records,
            rejected: self.rejected,
            window: self.window,
            complete: self.complete,
        }
    }
}

// =============================================================================
// Fetcher
// =============================================================================

/// Pages through a [`PageSource`] with retries.
#[derive(Clone)]
pub struct UpstreamFetcher {
    source: Arc<dyn PageSource>,
    settings: FetchSettings,
}

impl std::fmt::Debug for UpstreamFetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpstreamFetcher")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl UpstreamFetcher {
    pub fn new(source: Arc<dyn PageSource>, settings: FetchSettings) -> Self {
        UpstreamFetcher { source, settings }
    }

    pub fn settings(&self) -> &FetchSettings {
        &self.settings
    }

    /// Fetches every record created inside `window`.
    pub async fn fetch_all(&self, window: FetchWindow) -> SyncResult<FetchedSet> {
        let mut records = Vec::new();
        let mut rejected = Vec::new();
        let mut page = 1u32;
        let mut pages = 0u32;
        let mut received = 0u64;
        let mut reported_total = None;

        loop {
            if pages >= self.settings.max_pages {
                return Err(SyncError::PaginationOverflow {
                    max_pages: self.settings.max_pages,
                });
            }

            let request = PageRequest {
                window,
                page,
                per_page: self.settings.per_page,
            };
            let raw = self.fetch_with_retry(&request).await?;
            pages += 1;
            received += raw.records.len() as u64;
            if raw.total.is_some() {
                reported_total = raw.total;
            }

            debug!(page, records = raw.records.len(), total = ?raw.total, "Fetched page");

            for value in &raw.records {
                match coerce_transaction(value) {
                    Ok(tx) => records.push(tx),
                    Err(e) => {
                        let id = peek_transaction_id(value);
                        warn!(transaction_id = ?id, error = %e, "Rejected upstream record");
                        rejected.push(RecordError::new(id, e.to_string()));
                    }
                }
            }

            match raw.next_page {
                None => break,
                Some(next) if next > page => page = next,
                Some(next) => {
                    return Err(SyncError::MalformedPayload(format!(
                        "page {} pointed back to page {}",
                        page, next
                    )))
                }
            }
        }

        let complete = match reported_total {
            Some(total) if received < total => {
                warn!(received, total, pages, "Upstream returned fewer records than it reported");
                false
            }
            _ => true,
        };

        info!(
            pages,
            records = records.len(),
            rejected = rejected.len(),
            full = window.is_full(),
            complete,
            "Upstream fetch finished"
        );

        Ok(FetchedSet {
            records,
            rejected,
            window,
            complete,
            pages,
        })
    }

    /// Fetches one page, retrying transient errors with exponential backoff.
    async fn fetch_with_retry(&self, request: &PageRequest) -> SyncResult<RawPage> {
        let mut backoff = self.create_backoff();
        let mut attempt = 0u32;

        loop {
            attempt += 1;

            let err = match self.source.fetch_page(request).await {
                Ok(page) => return Ok(page),
                Err(e) if e.is_retryable() => e,
                Err(e) => return Err(e),
            };

            if attempt >= self.settings.max_attempts {
                warn!(page = request.page, attempt, error = %err, "Retries exhausted");
                return Err(SyncError::RetriesExhausted {
                    attempts: attempt,
                    last_error: err.to_string(),
                });
            }

            let delay = match &err {
                SyncError::RateLimited {
                    retry_after: Some(wait),
                } => (*wait).min(self.settings.max_backoff),
                _ => match backoff.next_backoff() {
                    Some(delay) => delay,
                    None => self.settings.max_backoff,
                },
            };

            warn!(
                page = request.page,
                attempt,
                ?delay,
                error = %err,
                "Upstream request failed, retrying"
            );
            tokio::time::sleep(delay).await;
        }
    }

    /// Creates the exponential backoff configuration.
    fn create_backoff(&self) -> ExponentialBackoff {
        ExponentialBackoff {
            initial_interval: self.settings.initial_backoff,
            max_interval: self.settings.max_backoff,
            multiplier: 2.0,
            max_elapsed_time: None, // bounded by max_attempts instead
            ..Default::default()
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Serves scripted responses in order, recording every request.
    pub(crate) struct ScriptedSource {
        responses: Mutex<VecDeque<SyncResult<RawPage>>>,
        pub(crate) requests: Mutex<Vec<PageRequest>>,
    }

    impl ScriptedSource {
        pub(crate) fn new(responses: Vec<SyncResult<RawPage>>) -> Arc<Self> {
            Arc::new(ScriptedSource {
                responses: Mutex::new(responses.into()),
                requests: Mutex::new(Vec::new()),
            })
        }

        pub(crate) fn calls(&self) -> usize {
            self.requests.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl PageSource for ScriptedSource {
        async fn fetch_page(&self, request: &PageRequest) -> SyncResult<RawPage> {
            self.requests.lock().unwrap().push(*request);
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(SyncError::Internal("script exhausted".into())))
        }
    }

    fn record(id: u32) -> Value {
        json!({
            "transaction_id": id,
            "paid_amount": "10",
            "date_created": "2024-03-01 10:00:00",
        })
    }

    fn page(ids: &[u32], next_page: Option<u32>) -> SyncResult<RawPage> {
        Ok(RawPage {
            records: ids.iter().map(|id| record(*id)).collect(),
            next_page,
            total: None,
        })
    }

    fn window() -> FetchWindow {
        FetchWindow::full(Utc.with_ymd_and_hms(2024, 3, 2, 0, 0, 0).unwrap())
    }

    fn settings() -> FetchSettings {
        FetchSettings {
            per_page: 2,
            max_attempts: 3,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(1),
            max_pages: 10,
        }
    }

    fn ids(set: &FetchedSet) -> Vec<String> {
        set.records.iter().map(|r| r.transaction_id.clone()).collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_drains_every_page() {
        let source = ScriptedSource::new(vec![
            page(&[1, 2], Some(2)),
            page(&[3, 4], Some(3)),
            page(&[5], None),
        ]);
        let fetcher = UpstreamFetcher::new(source.clone(), settings());

        let set = fetcher.fetch_all(window()).await.unwrap();

        assert!(set.complete);
        assert_eq!(set.pages, 3);
        assert_eq!(ids(&set), vec!["1", "2", "3", "4", "5"]);
        let pages: Vec<u32> = source.requests.lock().unwrap().iter().map(|r| r.page).collect();
        assert_eq!(pages, vec![1, 2, 3]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_errors_are_retried() {
        let source = ScriptedSource::new(vec![
            Err(SyncError::UpstreamUnavailable(503)),
            Err(SyncError::RateLimited {
                retry_after: Some(Duration::from_secs(2)),
            }),
            page(&[1], None),
        ]);
        let fetcher = UpstreamFetcher::new(source.clone(), settings());

        let set = fetcher.fetch_all(window()).await.unwrap();

        assert_eq!(ids(&set), vec!["1"]);
        assert_eq!(source.calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_persistent_failure_exhausts_retries() {
        let source = ScriptedSource::new(vec![
            page(&[1, 2], Some(2)),
            Err(SyncError::Timeout(Duration::from_secs(30))),
            Err(SyncError::Timeout(Duration::from_secs(30))),
            Err(SyncError::Timeout(Duration::from_secs(30))),
        ]);
        let fetcher = UpstreamFetcher::new(source.clone(), settings());

        let err = fetcher.fetch_all(window()).await.unwrap_err();

        assert!(matches!(err, SyncError::RetriesExhausted { attempts: 3, .. }));
        assert_eq!(source.calls(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fatal_errors_are_not_retried() {
        let source = ScriptedSource::new(vec![Err(SyncError::Unauthorized(401))]);
        let fetcher = UpstreamFetcher::new(source.clone(), settings());

        assert!(matches!(
            fetcher.fetch_all(window()).await,
            Err(SyncError::Unauthorized(401))
        ));
        assert_eq!(source.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_records_become_record_errors() {
        let source = ScriptedSource::new(vec![Ok(RawPage {
            records: vec![
                record(1),
                json!({ "transaction_id": 2, "paid_amount": "abc", "date_created": "2024-03-01" }),
                json!({ "paid_amount": "1" }),
            ],
            next_page: None,
            total: None,
        })]);
        let fetcher = UpstreamFetcher::new(source, settings());

        let set = fetcher.fetch_all(window()).await.unwrap();

        assert_eq!(ids(&set), vec!["1"]);
        assert_eq!(set.rejected.len(), 2);
        assert_eq!(set.rejected[0].id.as_deref(), Some("2"));
        assert_eq!(set.rejected[1].id, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_runaway_pagination_is_stopped() {
        let responses = (1..=20).map(|n| page(&[n], Some(n + 1))).collect();
        let source = ScriptedSource::new(responses);
        let fetcher = UpstreamFetcher::new(source, settings());

        assert!(matches!(
            fetcher.fetch_all(window()).await,
            Err(SyncError::PaginationOverflow { max_pages: 10 })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_advancing_cursor_is_rejected() {
        let source = ScriptedSource::new(vec![page(&[1], Some(2)), page(&[2], Some(2))]);
        let fetcher = UpstreamFetcher::new(source, settings());

        assert!(matches!(
            fetcher.fetch_all(window()).await,
            Err(SyncError::MalformedPayload(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_after_is_capped_by_max_backoff() {
        let source = ScriptedSource::new(vec![
            Err(SyncError::RateLimited {
                retry_after: Some(Duration::from_secs(86_400)),
            }),
            page(&[1], None),
        ]);
        let fetcher = UpstreamFetcher::new(source, settings());

        let started = tokio::time::Instant::now();
        fetcher.fetch_all(window()).await.unwrap();

        assert!(started.elapsed() <= Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_shortfall_against_reported_total_is_incomplete() {
        let source = ScriptedSource::new(vec![Ok(RawPage {
            records: vec![record(1), record(2)],
            next_page: None,
            total: Some(4),
        })]);
        let fetcher = UpstreamFetcher::new(source, settings());

        let set = fetcher.fetch_all(window()).await.unwrap();

        assert!(!set.complete);
        assert_eq!(ids(&set), vec!["1", "2"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_met_total_is_complete() {
        let source = ScriptedSource::new(vec![
            Ok(RawPage {
                records: vec![record(1)],
                next_page: Some(2),
                total: Some(2),
            }),
            Ok(RawPage {
                records: vec![record(2)],
                next_page: None,
                total: Some(2),
            }),
        ]);
        let fetcher = UpstreamFetcher::new(source, settings());

        assert!(fetcher.fetch_all(window()).await.unwrap().complete);
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_collection_is_complete() {
        let source = ScriptedSource::new(vec![page(&[], None)]);
        let fetcher = UpstreamFetcher::new(source, settings());

        let set = fetcher.fetch_all(window()).await.unwrap();
        assert!(set.complete);
        assert!(set.records.is_empty());
        assert_eq!(set.pages, 1);
    }
}

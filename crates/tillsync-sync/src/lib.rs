//! # tillsync-sync: Upstream Fetch and Pass Orchestration
//!
//! Keeps the local `pos_transactions` cache in step with the POS vendor's
//! transaction API.
//!
//! ## Architecture Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                          Sync Pass Architecture                         │
//! │                                                                         │
//! │  ┌──────────────────────────────────────────────────────────────────┐  │
//! │  │                 SyncScheduler (interval loop)                    │  │
//! │  │  Incremental passes, a Full pass every `full_resync_every`       │  │
//! │  └────────────────────────────┬─────────────────────────────────────┘  │
//! │                               ▼                                         │
//! │  ┌──────────────────────────────────────────────────────────────────┐  │
//! │  │              SyncOrchestrator (one pass at a time)               │  │
//! │  └──────┬──────────────────────┬──────────────────────┬─────────────┘  │
//! │         ▼                      ▼                      ▼                 │
//! │  ┌────────────────┐  ┌───────────────────┐  ┌────────────────────────┐ │
//! │  │ UpstreamFetcher│  │ Reconciler (core) │  │ CacheWriter (db)       │ │
//! │  │ pages, retries │  │ create / update / │  │ per-record statements  │ │
//! │  │ PosApiClient   │  │ delete decisions  │  │ bounded by timeout     │ │
//! │  └────────────────┘  └───────────────────┘  └────────────────────────┘ │
//! │                                                                         │
//! │  TELEMETRY: TelemetrySink (TracingSink in production)                  │
//! │  • summary per pass  • anomaly per suspicious condition  • failures    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//! - [`client`] - reqwest client for the vendor collection endpoint
//! - [`config`] - Worker configuration (TOML + environment)
//! - [`error`] - Sync error types
//! - [`fetcher`] - Pagination and retry over any [`PageSource`]
//! - [`orchestrator`] - One pass, guarded against overlap
//! - [`scheduler`] - Interval loop with shutdown handle
//! - [`telemetry`] - Where pass outcomes are reported
//!
//! ## Usage
//!
//! ```rust,ignore
//! use tillsync_sync::{PassDeps, SyncOrchestrator, SyncScheduler, WorkerConfig};
//!
//! let config = WorkerConfig::load(None)?;
//! let orchestrator = SyncOrchestrator::new(deps);
//! let handle = SyncScheduler::spawn(orchestrator, config.scheduler_settings());
//!
//! let status = handle.status().await;
//! println!("Passes: {}", status.passes);
//! handle.shutdown().await;
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod client;
pub mod config;
pub mod error;
pub mod fetcher;
pub mod orchestrator;
pub mod scheduler;
pub mod telemetry;

// =============================================================================
// Re-exports
// =============================================================================

pub use client::PosApiClient;
pub use config::{ApiSettings, ApiToken, DatabaseSettings, SyncSettings, WorkerConfig};
pub use error::{SyncError, SyncResult};
pub use fetcher::{FetchSettings, FetchedSet, PageRequest, PageSource, RawPage, UpstreamFetcher};
pub use orchestrator::{run_pass, PassDeps, PassSettings, SyncOrchestrator};
pub use scheduler::{SchedulerHandle, SchedulerSettings, SchedulerStatus, SyncScheduler};
pub use telemetry::{NoOpSink, TelemetrySink, TracingSink};

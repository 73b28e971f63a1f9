//! # tillsync-core: Pure Domain Logic for the POS Transaction Cache
//!
//! Types, boundary coercion and the Reconciler. No I/O happens here.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        tillsync Architecture                            │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                    tillsync-worker (binary)                     │   │
//! │  │         config ──► scheduler ──► shutdown on SIGTERM            │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │                    tillsync-sync                                │   │
//! │  │    HTTP client, fetcher, orchestrator, telemetry                │   │
//! │  └───────────────┬─────────────────────────────┬───────────────────┘   │
//! │                  │                             │                        │
//! │  ┌───────────────▼─────────────────┐  ┌────────▼──────────────────┐   │
//! │  │  ★ tillsync-core (THIS CRATE) ★ │  │      tillsync-db          │   │
//! │  │  types, validation, reconcile   │◄─│  schema, watermark, writer│   │
//! │  │  NO I/O • PURE FUNCTIONS        │  │  SQLite via sqlx          │   │
//! │  └─────────────────────────────────┘  └───────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`types`] - Domain types (RemoteTransaction, FetchWindow, SyncSummary)
//! - [`amount`] - Exact decimal paid amount
//! - [`validation`] - Loose vendor JSON → typed records
//! - [`reconcile`] - Create/update/delete classification with deletion safety
//! - [`error`] - Domain error types
//!
//! ## Example Usage
//!
//! ```rust
//! use serde_json::json;
//! use tillsync_core::reconcile::{DeletionPolicy, Reconciler, RemoteSet};
//! use tillsync_core::validation::coerce_transaction;
//! use tillsync_core::FetchWindow;
//!
//! let record = coerce_transaction(&json!({
//!     "transaction_id": "1",
//!     "paid_amount": "250",
//!     "date_created": "2024-03-01 10:00:00",
//! }))
//! .unwrap();
//!
//! let remote = RemoteSet {
//!     window: FetchWindow::full(chrono::Utc::now()),
//!     records: vec![record],
//!     rejected: vec![],
//!     complete: true,
//! };
//!
//! let diff = Reconciler::new(DeletionPolicy::default()).diff(&[], &remote);
//! assert_eq!(diff.to_create.len(), 1);
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod amount;
pub mod error;
pub mod reconcile;
pub mod types;
pub mod validation;

// =============================================================================
// Re-exports for Convenience
// =============================================================================

pub use amount::PaidAmount;
pub use error::{CoreError, CoreResult, ValidationError};
pub use reconcile::{DeletionPolicy, Reconciler, RemoteSet, TransactionDiff};
pub use types::*;

// =============================================================================
// Crate-Level Constants
// =============================================================================

/// Name of the local cache table.
pub const CACHE_TABLE: &str = "pos_transactions";

/// Consecutive eligible misses before a cached row is deleted.
pub const DEFAULT_DELETION_CONFIRMATIONS: u32 = DeletionPolicy::DEFAULT_CONFIRMATIONS;

/// Hours re-fetched behind the newest cached transaction.
pub const DEFAULT_LOOKBACK_HOURS: u32 = 48;

//! # tillsync-db: Local Cache Layer
//!
//! SQLite storage for the POS transaction cache, accessed with sqlx.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        One Sync Pass                                    │
//! │                                                                         │
//! │  Orchestrator (tillsync-sync)                                          │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                     tillsync-db (THIS CRATE)                    │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────────┐  ┌──────────────┐  ┌─────────────────────┐ │   │
//! │  │   │   schema      │  │  watermark   │  │  writer             │ │   │
//! │  │   │   ensure()    │  │  window_for()│  │  apply(diff, start) │ │   │
//! │  │   └───────────────┘  └──────────────┘  └──────────┬──────────┘ │   │
//! │  │                                                    │            │   │
//! │  │   ┌────────────────────────────────────────────────▼─────────┐ │   │
//! │  │   │  repository::TransactionRepository (one row, one stmt)   │ │   │
//! │  │   └──────────────────────────────────────────────────────────┘ │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  SQLite file (WAL), table pos_transactions                             │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//!
//! - [`pool`] - Connection pool creation and configuration
//! - [`schema`] - Idempotent table and index creation
//! - [`watermark`] - Fetch window derived from cached rows
//! - [`writer`] - Applies a diff, one statement per record
//! - [`repository`] - Row-level statements
//! - [`error`] - Database error types
//!
//! ## Usage
//!
//! ```rust,ignore
//! use tillsync_db::{Database, DbConfig};
//!
//! let db = Database::new(DbConfig::new("cache.db")).await?;
//! let window = db.watermarks().window_for(WindowMode::Incremental, lookback, now).await?;
//! let report = db.writer(statement_timeout).apply(&diff, now).await;
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod pool;
pub mod repository;
pub mod schema;
pub mod watermark;
pub mod writer;

// =============================================================================
// Re-exports
// =============================================================================

pub use error::{DbError, DbResult};
pub use pool::{Database, DbConfig};
pub use repository::TransactionRepository;
pub use schema::SchemaStatus;
pub use watermark::{Watermark, WatermarkStore};
pub use writer::{CacheWriter, WriteReport};

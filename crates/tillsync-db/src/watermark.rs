//! # Watermark Store
//!
//! Derives the next fetch window from what the cache already holds.
//!
//! ```text
//! high_water  = MAX(date_created)
//! oldest_open = MIN(date_created) WHERE date_close IS NULL
//! last_synced = MAX(synced_at)
//!
//! since = min(high_water - lookback, oldest_open)      (Incremental)
//! since = none                                          (Full / empty cache)
//! ```
//!
//! There is no cursor table: the watermark can never disagree with the data.

use chrono::{DateTime, Duration, Utc};
use sqlx::{Row, SqlitePool};
use tracing::debug;

use crate::error::DbResult;
use tillsync_core::{FetchWindow, WindowMode};

/// Watermarks read from the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Watermark {
    /// Newest creation time in the cache.
    pub high_water: Option<DateTime<Utc>>,

    /// Creation time of the oldest order still open.
    pub oldest_open: Option<DateTime<Utc>>,

    /// Start of the last pass that observed any row.
    pub last_synced: Option<DateTime<Utc>>,

    pub rows: i64,
}

impl Watermark {
    /// Window for the next pass.
    pub fn window(&self, mode: WindowMode, lookback: Duration, now: DateTime<Utc>) -> FetchWindow {
        match mode {
            WindowMode::Full => FetchWindow::full(now),
            WindowMode::Incremental => {
                FetchWindow::incremental(self.high_water, self.oldest_open, lookback, now)
            }
        }
    }
}

/// Reads watermarks from the cache table.
#[derive(Debug, Clone)]
pub struct WatermarkStore {
    pool: SqlitePool,
}

impl WatermarkStore {
    pub fn new(pool: SqlitePool) -> Self {
        WatermarkStore { pool }
    }

    /// Reads all watermarks in one statement.
    pub async fn read(&self) -> DbResult<Watermark> {
        let row = sqlx::query(
            r#"
            SELECT
                MAX(date_created) AS high_water,
                MIN(CASE WHEN date_close IS NULL THEN date_created END) AS oldest_open,
                MAX(synced_at) AS last_synced,
                COUNT(*) AS row_count
            FROM pos_transactions
            "#,
        )
        .fetch_one(&self.pool)
        .await?;

        let watermark = Watermark {
            high_water: row.try_get("high_water")?,
            oldest_open: row.try_get("oldest_open")?,
            last_synced: row.try_get("last_synced")?,
            rows: row.try_get("row_count")?,
        };

        debug!(
            rows = watermark.rows,
            high_water = ?watermark.high_water,
            oldest_open = ?watermark.oldest_open,
            "Read cache watermark"
        );

        Ok(watermark)
    }

    /// Reads the watermark and derives the window for `mode`.
    pub async fn window_for(
        &self,
        mode: WindowMode,
        lookback: Duration,
        now: DateTime<Utc>,
    ) -> DbResult<FetchWindow> {
        Ok(self.read().await?.window(mode, lookback, now))
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

//! # Transaction Cache Repository
//!
//! Row-level statements against `pos_transactions`.
//!
//! ## Statement Shapes
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  upsert(tx, now)        INSERT … ON CONFLICT(transaction_id) DO UPDATE │
//! │                         date_updated moves only if content differs     │
//! │  touch(id, now)         synced_at = now, missed_passes = 0             │
//! │  record_miss(id)        missed_passes = missed_passes + 1              │
//! │  delete(id)             hard delete                                    │
//! │  snapshot()             every row, ordered by date_created             │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Each method is one statement and commits on its own.

use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use tracing::debug;

use crate::error::DbResult;
use tillsync_core::{LocalTransactionRecord, PaidAmount, RemoteTransaction};

const SELECT_COLUMNS: &str = r#"
    SELECT
        transaction_id, client_id, paid_amount, products,
        date_created, date_close, table_id, pay_type,
        date_updated, synced_at, missed_passes
    FROM pos_transactions
"#;

/// Repository for the transaction cache table.
#[derive(Debug, Clone)]
pub struct TransactionRepository {
    pool: SqlitePool,
}

impl TransactionRepository {
    /// Creates a new TransactionRepository.
    pub fn new(pool: SqlitePool) -> Self {
        TransactionRepository { pool }
    }

    /// Loads every cached row.
    pub async fn snapshot(&self) -> DbResult<Vec<LocalTransactionRecord>> {
        let sql = format!("{} ORDER BY date_created ASC, transaction_id ASC", SELECT_COLUMNS);
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;

        rows.iter().map(map_row).collect()
    }

    /// Gets a single row by id.
    pub async fn get_by_id(&self, transaction_id: &str) -> DbResult<Option<LocalTransactionRecord>> {
        let sql = format!("{} WHERE transaction_id = ?1", SELECT_COLUMNS);
        let row = sqlx::query(&sql)
            .bind(transaction_id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(map_row).transpose()
    }

    /// Counts cached rows.
    pub async fn count(&self) -> DbResult<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM pos_transactions")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    /// Inserts or updates one transaction observed at `now`.
    ///
    /// Vendor columns are overwritten, `synced_at` is set to `now` and
    /// `missed_passes` reset. `date_updated` is set to `now` only for a new
    /// row or when some vendor column actually changed, so re-applying the
    /// same content is a no-op apart from the sync stamp.
    pub async fn upsert(&self, tx: &RemoteTransaction, now: DateTime<Utc>) -> DbResult<()> {
        debug!(transaction_id = %tx.transaction_id, "Upserting transaction");

        sqlx::query(
            r#"
            INSERT INTO pos_transactions (
                transaction_id, client_id, paid_amount, products,
                date_created, date_close, table_id, pay_type,
                date_updated, synced_at, missed_passes
            ) VALUES (
                ?1, ?2, ?3, ?4,
                ?5, ?6, ?7, ?8,
                ?9, ?9, 0
            )
            ON CONFLICT(transaction_id) DO UPDATE SET
                date_updated = CASE
                    WHEN pos_transactions.client_id    IS NOT excluded.client_id
                      OR pos_transactions.paid_amount  IS NOT excluded.paid_amount
                      OR pos_transactions.products     IS NOT excluded.products
                      OR pos_transactions.date_created IS NOT excluded.date_created
                      OR pos_transactions.date_close   IS NOT excluded.date_close
                      OR pos_transactions.table_id     IS NOT excluded.table_id
                      OR pos_transactions.pay_type     IS NOT excluded.pay_type
                    THEN excluded.date_updated
                    ELSE pos_transactions.date_updated
                END,
                client_id     = excluded.client_id,
                paid_amount   = excluded.paid_amount,
                products      = excluded.products,
                date_created  = excluded.date_created,
                date_close    = excluded.date_close,
                table_id      = excluded.table_id,
                pay_type      = excluded.pay_type,
                synced_at     = excluded.synced_at,
                missed_passes = 0
            "#,
        )
        .bind(&tx.transaction_id)
        .bind(&tx.client_id)
        .bind(tx.paid_amount.as_str())
        .bind(&tx.products)
        .bind(tx.date_created)
        .bind(tx.date_close)
        .bind(tx.table_id)
        .bind(tx.pay_type)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Re-stamps a row observed unchanged. Returns false if the row is gone.
    pub async fn touch(&self, transaction_id: &str, now: DateTime<Utc>) -> DbResult<bool> {
        let result = sqlx::query(
            "UPDATE pos_transactions SET synced_at = ?2, missed_passes = 0 WHERE transaction_id = ?1",
        )
        .bind(transaction_id)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Counts one more eligible pass that did not observe the row.
    pub async fn record_miss(&self, transaction_id: &str) -> DbResult<bool> {
        let result = sqlx::query(
            "UPDATE pos_transactions SET missed_passes = missed_passes + 1 WHERE transaction_id = ?1",
        )
        .bind(transaction_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Hard-deletes a row. Returns false if it was already gone.
    pub async fn delete(&self, transaction_id: &str) -> DbResult<bool> {
        debug!(transaction_id = %transaction_id, "Deleting transaction");

        let result = sqlx::query("DELETE FROM pos_transactions WHERE transaction_id = ?1")
            .bind(transaction_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}

fn map_row(row: &SqliteRow) -> DbResult<LocalTransactionRecord> {
    let paid_amount: PaidAmount = row.try_get("paid_amount")?;

    Ok(LocalTransactionRecord {
        transaction: RemoteTransaction {
            transaction_id: row.try_get("transaction_id")?,
            client_id: row.try_get("client_id")?,
            paid_amount,
            products: row.try_get("products")?,
            date_created: row.try_get("date_created")?,
            date_close: row.try_get("date_close")?,
            table_id: row.try_get("table_id")?,
            pay_type: row.try_get("pay_type")?,
        },
        date_updated: row.try_get("date_updated")?,
        synced_at: row.try_get("synced_at")?,
        missed_passes: row.try_get("missed_passes")?,
    })
}

// =============================================================================
// Unit Tests
// =============================================================================

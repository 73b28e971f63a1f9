//! # Schema Ensurer
//!
//! Creates the cache table and its indexes if they are missing.
//!
//! ## Layout
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  pos_transactions                                                       │
//! │  ├── transaction_id  TEXT PK      (vendor)   non-empty                 │
//! │  ├── client_id       TEXT NULL    (vendor)   ◄── idx_pos_tx_client     │
//! │  ├── paid_amount     TEXT         (vendor)   exact decimal text        │
//! │  ├── products        TEXT         (vendor)   json_valid()              │
//! │  ├── date_created    TEXT         (vendor)   ◄── idx_pos_tx_created    │
//! │  ├── date_close      TEXT NULL    (vendor)   NULL while open           │
//! │  ├── table_id        INTEGER NULL (vendor)                             │
//! │  ├── pay_type        INTEGER NULL (vendor)                             │
//! │  ├── date_updated    TEXT         (engine)   last content change       │
//! │  ├── synced_at       TEXT         (engine)   ◄── idx_pos_tx_synced     │
//! │  └── missed_passes   INTEGER      (engine)   deletion confirmations    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Every statement uses `IF NOT EXISTS`, so [`ensure`] runs at the start of
//! every pass. There is no versioned migration history.

use sqlx::{Row, SqlitePool};
use tracing::{debug, info};

use crate::error::{DbError, DbResult};

const CREATE_TABLE: &str = r#"
    CREATE TABLE IF NOT EXISTS pos_transactions (
        transaction_id TEXT PRIMARY KEY NOT NULL CHECK (length(transaction_id) > 0),
        client_id      TEXT,
        paid_amount    TEXT NOT NULL CHECK (paid_amount <> ''),
        products       TEXT NOT NULL DEFAULT '[]' CHECK (json_valid(products)),
        date_created   TEXT NOT NULL,
        date_close     TEXT,
        table_id       INTEGER,
        pay_type       INTEGER,
        date_updated   TEXT NOT NULL,
        synced_at      TEXT NOT NULL,
        missed_passes  INTEGER NOT NULL DEFAULT 0 CHECK (missed_passes >= 0)
    )
"#;

/// Index names with their DDL.
const INDEXES: &[(&str, &str)] = &[
    (
        "idx_pos_tx_client",
        "CREATE INDEX IF NOT EXISTS idx_pos_tx_client ON pos_transactions (client_id)",
    ),
    (
        "idx_pos_tx_created",
        "CREATE INDEX IF NOT EXISTS idx_pos_tx_created ON pos_transactions (date_created)",
    ),
    (
        "idx_pos_tx_synced",
        "CREATE INDEX IF NOT EXISTS idx_pos_tx_synced ON pos_transactions (synced_at)",
    ),
];

/// Creates the cache table and indexes. Idempotent.
pub async fn ensure(pool: &SqlitePool) -> DbResult<()> {
    debug!("Ensuring cache schema");

    sqlx::query(CREATE_TABLE)
        .execute(pool)
        .await
        .map_err(|e| DbError::SchemaFailed(format!("pos_transactions: {}", e)))?;

    for (name, ddl) in INDEXES {
        sqlx::query(ddl)
            .execute(pool)
            .await
            .map_err(|e| DbError::SchemaFailed(format!("{}: {}", name, e)))?;
    }

    Ok(())
}

/// Which parts of the cache schema exist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaStatus {
    pub table: bool,
    /// `(index name, exists)` in declaration order.
    pub indexes: Vec<(String, bool)>,
}

impl SchemaStatus {
    pub fn is_complete(&self) -> bool {
        self.table && self.indexes.iter().all(|(_, exists)| *exists)
    }
}

/// Reports which of the table and indexes are present.
pub async fn schema_status(pool: &SqlitePool) -> DbResult<SchemaStatus> {
    let rows = sqlx::query(
        "SELECT type, name FROM sqlite_master WHERE tbl_name = 'pos_transactions'",
    )
    .fetch_all(pool)
    .await?;

    let mut table = false;
    let mut present = Vec::with_capacity(rows.len());
    for row in rows {
        let kind: String = row.try_get("type")?;
        let name: String = row.try_get("name")?;
        if kind == "table" {
            table = true;
        } else {
            present.push(name);
        }
    }

    let indexes = INDEXES
        .iter()
        .map(|(name, _)| (name.to_string(), present.iter().any(|p| p == name)))
        .collect();

    let status = SchemaStatus { table, indexes };
    info!(table = status.table, complete = status.is_complete(), "Schema status");
    Ok(status)
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{Database, DbConfig};

    async fn bare_db() -> Database {
        Database::new(DbConfig::in_memory().ensure_schema(false))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_ensure_creates_table_and_indexes() {
        let db = bare_db().await;
        assert!(!schema_status(db.pool()).await.unwrap().table);

        ensure(db.pool()).await.unwrap();

        let status = schema_status(db.pool()).await.unwrap();
        assert!(status.is_complete(), "{:?}", status);
        assert_eq!(status.indexes.len(), 3);
    }

    #[tokio::test]
    async fn test_ensure_is_idempotent() {
        let db = bare_db().await;
        ensure(db.pool()).await.unwrap();
        ensure(db.pool()).await.unwrap();
        assert!(schema_status(db.pool()).await.unwrap().is_complete());
    }

    #[tokio::test]
    async fn test_ensure_recreates_dropped_index() {
        let db = bare_db().await;
        ensure(db.pool()).await.unwrap();
        sqlx::query("DROP INDEX idx_pos_tx_synced")
            .execute(db.pool())
            .await
            .unwrap();
        assert!(!schema_status(db.pool()).await.unwrap().is_complete());

        ensure(db.pool()).await.unwrap();
        assert!(schema_status(db.pool()).await.unwrap().is_complete());
    }

    #[tokio::test]
    async fn test_constraints_reject_invalid_rows() {
        let db = bare_db().await;
        ensure(db.pool()).await.unwrap();

        let err = sqlx::query(
            "INSERT INTO pos_transactions
                (transaction_id, paid_amount, products, date_created, date_updated, synced_at)
             VALUES ('1', '10', 'not json', 'x', 'x', 'x')",
        )
        .execute(db.pool())
        .await
        .unwrap_err();

        assert!(DbError::from(err).is_constraint());
    }

    #[tokio::test]
    async fn test_ensure_on_closed_pool_fails() {
        let db = bare_db().await;
        db.close().await;
        assert!(matches!(
            ensure(db.pool()).await,
            Err(DbError::SchemaFailed(_))
        ));
    }
}

//! Imperative schema management for the cache's live/backup databases.
//!
//! Unlike the ledger, the cache does not use forward migrations (§6): its
//! policy is "validate schema; if invalid, drop and recreate", which this
//! module implements directly against a [`Database`]'s pool.

use sqlx::SqlitePool;

use super::error::ShareError;
use crate::db::Database;

const TABLE_NAMES: [&str; 3] = ["directories", "files", "filenames"];

/// Returns true if all three expected tables exist.
pub async fn is_valid(db: &Database) -> Result<bool, ShareError> {
    for table in TABLE_NAMES {
        let row: Option<(String,)> =
            sqlx::query_as("SELECT name FROM sqlite_master WHERE type IN ('table', 'virtual table') AND name = ?")
                .bind(table)
                .fetch_optional(db.pool())
                .await?;
        if row.is_none() {
            return Ok(false);
        }
    }
    Ok(true)
}

/// Drops all three tables (if present) and recreates them.
pub async fn drop_and_recreate(db: &Database) -> Result<(), ShareError> {
    let pool = db.pool();
    drop_tables(pool).await?;
    create_tables(pool).await
}

async fn drop_tables(pool: &SqlitePool) -> Result<(), ShareError> {
    for table in TABLE_NAMES {
        sqlx::query(&format!("DROP TABLE IF EXISTS {table}"))
            .execute(pool)
            .await?;
    }
    Ok(())
}

async fn create_tables(pool: &SqlitePool) -> Result<(), ShareError> {
    sqlx::query(
        "CREATE TABLE directories (
            name TEXT PRIMARY KEY NOT NULL,
            timestamp INTEGER NOT NULL
        )",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE TABLE files (
            masked_filename TEXT PRIMARY KEY NOT NULL,
            original_filename TEXT NOT NULL,
            size INTEGER NOT NULL,
            touched_at TEXT NOT NULL,
            code INTEGER NOT NULL,
            extension TEXT NOT NULL,
            attribute_json TEXT NOT NULL,
            timestamp INTEGER NOT NULL
        )",
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE VIRTUAL TABLE filenames USING fts5(masked_filename)")
        .execute(pool)
        .await?;

    Ok(())
}

/// Ensures the schema is valid, recreating it if not. Called at the start
/// of every fill (§4.1 step 2).
pub async fn ensure_valid(db: &Database) -> Result<(), ShareError> {
    if !is_valid(db).await? {
        drop_and_recreate(db).await?;
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fresh_database_is_invalid_until_recreated() {
        let db = Database::new_in_memory_unmigrated().await.unwrap();
        assert!(!is_valid(&db).await.unwrap());
        drop_and_recreate(&db).await.unwrap();
        assert!(is_valid(&db).await.unwrap());
    }

    #[tokio::test]
    async fn ensure_valid_is_idempotent() {
        let db = Database::new_in_memory_unmigrated().await.unwrap();
        ensure_valid(&db).await.unwrap();
        ensure_valid(&db).await.unwrap();
        assert!(is_valid(&db).await.unwrap());
    }
}

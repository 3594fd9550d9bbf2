//! Database connection and schema management.
//!
//! Both the transfer ledger and the shared-file cache are backed by `SQLite`
//! connection pools opened the same way: WAL mode for concurrent readers, a
//! busy timeout so writers don't immediately fail under contention, and
//! (for the ledger) forward migrations run at startup.
//!
//! # Example
//!
//! ```no_run
//! use upload_core::db::Database;
//! use std::path::Path;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let db = Database::new(Path::new("ledger.db")).await?;
//! // Use db.pool() for queries...
//! # Ok(())
//! # }
//! ```

use std::path::Path;

use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use thiserror::Error;
use tracing::instrument;

/// Default maximum number of connections in the pool.
/// Kept low for SQLite since it uses file-level locking.
const DEFAULT_MAX_CONNECTIONS: u32 = 5;

/// SQLite busy timeout in milliseconds.
const BUSY_TIMEOUT_MS: u32 = 5000;

/// Database-related errors.
#[derive(Error, Debug)]
pub enum DbError {
    /// Failed to connect to the database.
    #[error("failed to connect to database: {0}")]
    Connection(#[from] sqlx::Error),

    /// Failed to run migrations.
    #[error("failed to run migrations: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

/// SQLite connection pool wrapper shared by the ledger and the cache.
#[derive(Debug, Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Opens (creating if necessary) a file-backed database and runs the
    /// ledger's forward migrations.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Connection`] if the connection fails, or
    /// [`DbError::Migration`] if migrations fail.
    #[instrument(skip(db_path), fields(path = %db_path.display()))]
    pub async fn new(db_path: &Path) -> Result<Self, DbError> {
        let db_url = format!("sqlite:{}?mode=rwc", db_path.display());
        let db = Self::connect(&db_url).await?;
        sqlx::migrate!("./migrations").run(&db.pool).await?;
        Ok(db)
    }

    /// Opens a file-backed database without running migrations.
    ///
    /// Used by the shared-file cache, whose schema is managed imperatively
    /// (validate-or-drop-and-recreate) rather than through forward
    /// migrations — see [`crate::share::scanner`].
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Connection`] if the connection fails.
    #[instrument(skip(db_path), fields(path = %db_path.display()))]
    pub async fn open_unmigrated(db_path: &Path) -> Result<Self, DbError> {
        let db_url = format!("sqlite:{}?mode=rwc", db_path.display());
        Self::connect(&db_url).await
    }

    /// Creates an in-memory database with migrations applied, for tests.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Connection`] if the connection fails, or
    /// [`DbError::Migration`] if migrations fail.
    #[instrument]
    pub async fn new_in_memory() -> Result<Self, DbError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self { pool })
    }

    /// Creates an in-memory database with no migrations applied, for tests
    /// of the shared-file cache (which manages its own schema).
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Connection`] if the connection fails.
    #[instrument]
    pub async fn new_in_memory_unmigrated() -> Result<Self, DbError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        Ok(Self { pool })
    }

    async fn connect(db_url: &str) -> Result<Self, DbError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(DEFAULT_MAX_CONNECTIONS)
            .connect(db_url)
            .await?;

        sqlx::query("PRAGMA journal_mode=WAL")
            .execute(&pool)
            .await?;
        sqlx::query(&format!("PRAGMA busy_timeout={BUSY_TIMEOUT_MS}"))
            .execute(&pool)
            .await?;

        Ok(Self { pool })
    }

    /// Returns a reference to the underlying connection pool.
    #[must_use]
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Checks if WAL mode is enabled.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Connection`] if the query fails.
    #[instrument(skip(self))]
    pub async fn is_wal_enabled(&self) -> Result<bool, DbError> {
        let result: (String,) = sqlx::query_as("PRAGMA journal_mode")
            .fetch_one(&self.pool)
            .await?;
        Ok(result.0.to_lowercase() == "wal")
    }

    /// Gracefully closes all connections in the pool.
    #[instrument(skip(self))]
    pub async fn close(self) {
        self.pool.close().await;
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn new_in_memory_succeeds() {
        let db = Database::new_in_memory().await;
        assert!(db.is_ok());
    }

    #[tokio::test]
    async fn migrations_create_transfers_table() {
        let db = Database::new_in_memory().await.unwrap();
        let result = sqlx::query(
            "INSERT INTO transfers (id, username, masked_filename, size, start_offset, requested_at) \
             VALUES ('00000000-0000-0000-0000-000000000001', 'alice', 'music/song.flac', 100, 0, '2026-01-01T00:00:00Z')",
        )
        .execute(db.pool())
        .await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn with_tempfile_enables_wal() {
        let temp_dir = tempfile::tempdir().unwrap();
        let db_path = temp_dir.path().join("test.db");
        let db = Database::new(&db_path).await.unwrap();
        assert!(db.is_wal_enabled().await.unwrap());
    }

    #[tokio::test]
    async fn close_does_not_panic() {
        let db = Database::new_in_memory().await.unwrap();
        db.close().await;
    }
}

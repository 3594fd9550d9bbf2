//! Transfer ledger: a durable, append-mostly record of every upload attempt.
//!
//! # Overview
//!
//! The ledger consists of:
//! - [`TransferLedger`] - main interface for ledger operations
//! - [`crate::ledger::model::Transfer`] - individual transfer row
//! - [`TransferFilter`] - predicate used by [`TransferLedger::find_one`] and
//!   [`TransferLedger::list`]
//! - [`LedgerRepository`] - async trait seam the upload service depends on,
//!   so service tests can substitute an in-memory fake
//!
//! Writes go through a fresh connection acquired from the pool per call —
//! there is no long-lived shared session — and reads are non-tracking
//! (each call returns a snapshot, never a live-updating handle).
//!
//! # Example
//!
//! ```no_run
//! use upload_core::db::Database;
//! use upload_core::ledger::{Transfer, TransferLedger};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let db = Database::new_in_memory().await?;
//! let ledger = TransferLedger::new(db);
//!
//! let transfer = Transfer::new("alice", "music/song.flac", 4096);
//! ledger.add_or_supersede(transfer).await?;
//! # Ok(())
//! # }
//! ```

mod error;
mod model;
mod repository;

pub use error::{LedgerDbErrorKind, LedgerError};
pub use model::{Transfer, TransferState};
pub use repository::LedgerRepository;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::QueryBuilder;
use sqlx::sqlite::Sqlite;
use tracing::instrument;
use uuid::Uuid;

use crate::db::Database;

/// Result type for ledger operations.
pub type Result<T> = std::result::Result<T, LedgerError>;

/// Optional predicate for [`TransferLedger::find_one`] and
/// [`TransferLedger::list`]. All set fields are ANDed together.
#[derive(Debug, Clone, Default)]
pub struct TransferFilter {
    /// Restrict to this username.
    pub username: Option<String>,
    /// Restrict to this masked filename.
    pub masked_filename: Option<String>,
    /// Include soft-deleted rows. Defaults to `false`.
    pub include_removed: bool,
    /// Restrict to transfers whose state is not yet terminal.
    pub only_active: bool,
}

impl TransferFilter {
    /// Starts an empty filter (matches everything non-removed).
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Restricts to a username.
    #[must_use]
    pub fn username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }

    /// Restricts to a masked filename.
    #[must_use]
    pub fn masked_filename(mut self, masked_filename: impl Into<String>) -> Self {
        self.masked_filename = Some(masked_filename.into());
        self
    }

    /// Includes soft-deleted rows in the result.
    #[must_use]
    pub fn include_removed(mut self) -> Self {
        self.include_removed = true;
        self
    }

    /// Restricts to transfers that have not yet reached a terminal state.
    #[must_use]
    pub fn only_active(mut self) -> Self {
        self.only_active = true;
        self
    }

    fn build_query<'a>(&'a self, base: &str) -> QueryBuilder<'a, Sqlite> {
        let mut qb = QueryBuilder::new(base);
        qb.push(" WHERE 1 = 1");

        if !self.include_removed {
            qb.push(" AND removed = 0");
        }
        if let Some(username) = &self.username {
            qb.push(" AND username = ").push_bind(username.as_str());
        }
        if let Some(masked_filename) = &self.masked_filename {
            qb.push(" AND masked_filename = ")
                .push_bind(masked_filename.as_str());
        }
        if self.only_active {
            // COMPLETED is bit 3 (value 8): terminal iff that bit is set.
            qb.push(" AND (state & 8) = 0");
        }
        qb
    }
}

/// Ledger manager for upload transfer records.
#[derive(Debug, Clone)]
pub struct TransferLedger {
    db: Database,
}

impl TransferLedger {
    /// Creates a new ledger backed by the given database connection.
    #[must_use]
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Marks every existing non-removed row for `(transfer.username,
    /// transfer.masked_filename)` as removed, then inserts `transfer`.
    ///
    /// This is the "supersede" operation from §4.4: re-enqueuing an
    /// already-terminal (or, per idempotence, even active) transfer for
    /// the same user/file pair retires the old row rather than mutating it.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::Database`] if either statement fails. The two
    /// statements run in a single transaction so a failure leaves no
    /// partial supersede.
    #[instrument(skip(self, transfer), fields(username = %transfer.username, filename = %transfer.masked_filename))]
    pub async fn add_or_supersede(&self, transfer: Transfer) -> Result<Transfer> {
        let mut tx = self.db.pool().begin().await?;

        sqlx::query(
            "UPDATE transfers SET removed = 1 WHERE username = ? AND masked_filename = ? AND removed = 0",
        )
        .bind(&transfer.username)
        .bind(&transfer.masked_filename)
        .execute(&mut *tx)
        .await?;

        insert_transfer(&mut tx, &transfer).await?;

        tx.commit().await?;
        Ok(transfer)
    }

    /// Persists the full current state of `transfer` (all mutable fields).
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::NotFound`] if no row exists with this id.
    /// Returns [`LedgerError::Database`] if the update fails.
    #[instrument(skip(self, transfer), fields(id = %transfer.id))]
    pub async fn update(&self, transfer: &Transfer) -> Result<()> {
        let result = sqlx::query(
            "UPDATE transfers SET
                username = ?, masked_filename = ?, size = ?, start_offset = ?,
                requested_at = ?, enqueued_at = ?, started_at = ?, ended_at = ?,
                bytes_transferred = ?, average_speed = ?, state = ?, exception = ?,
                removed = ?
             WHERE id = ?",
        )
        .bind(&transfer.username)
        .bind(&transfer.masked_filename)
        .bind(transfer.size)
        .bind(transfer.start_offset)
        .bind(transfer.requested_at)
        .bind(transfer.enqueued_at)
        .bind(transfer.started_at)
        .bind(transfer.ended_at)
        .bind(transfer.bytes_transferred)
        .bind(transfer.average_speed)
        .bind(transfer.state_bits_raw())
        .bind(&transfer.exception)
        .bind(transfer.removed_flag_raw())
        .bind(transfer.id)
        .execute(self.db.pool())
        .await?;

        if result.rows_affected() == 0 {
            return Err(LedgerError::NotFound(transfer.id));
        }
        Ok(())
    }

    /// Fetches a single transfer by id, regardless of removed status.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::Database`] if the query fails.
    #[instrument(skip(self))]
    pub async fn get(&self, id: Uuid) -> Result<Option<Transfer>> {
        let transfer = sqlx::query_as::<_, Transfer>("SELECT * FROM transfers WHERE id = ?")
            .bind(id)
            .fetch_optional(self.db.pool())
            .await?;
        Ok(transfer)
    }

    /// Returns the first transfer matching `filter`, if any.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::Database`] if the query fails.
    #[instrument(skip(self, filter))]
    pub async fn find_one(&self, filter: &TransferFilter) -> Result<Option<Transfer>> {
        let mut qb = filter.build_query("SELECT * FROM transfers");
        qb.push(" ORDER BY requested_at ASC LIMIT 1");
        let transfer = qb
            .build_query_as::<Transfer>()
            .fetch_optional(self.db.pool())
            .await?;
        Ok(transfer)
    }

    /// Returns every transfer matching `filter`, ordered by request time.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::Database`] if the query fails.
    #[instrument(skip(self, filter))]
    pub async fn list(&self, filter: &TransferFilter) -> Result<Vec<Transfer>> {
        let mut qb = filter.build_query("SELECT * FROM transfers");
        qb.push(" ORDER BY requested_at ASC");
        let transfers = qb
            .build_query_as::<Transfer>()
            .fetch_all(self.db.pool())
            .await?;
        Ok(transfers)
    }

    /// Soft-deletes a transfer.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::NotFound`] if no non-removed row exists with
    /// this id. Returns [`LedgerError::InvalidOperation`] if the transfer's
    /// state is not yet terminal. Returns [`LedgerError::Database`] if the
    /// update fails.
    #[instrument(skip(self))]
    pub async fn remove(&self, id: Uuid) -> Result<()> {
        let transfer = self
            .get(id)
            .await?
            .filter(|t| !t.removed())
            .ok_or(LedgerError::NotFound(id))?;

        if !transfer.state().is_terminal() {
            return Err(LedgerError::InvalidOperation {
                id,
                reason: "transfer has not reached a terminal state",
            });
        }

        let result = sqlx::query("UPDATE transfers SET removed = 1 WHERE id = ? AND removed = 0")
            .bind(id)
            .execute(self.db.pool())
            .await?;

        if result.rows_affected() == 0 {
            return Err(LedgerError::NotFound(id));
        }
        Ok(())
    }
}

async fn insert_transfer(
    tx: &mut sqlx::Transaction<'_, Sqlite>,
    transfer: &Transfer,
) -> std::result::Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO transfers (
            id, username, masked_filename, size, start_offset, requested_at,
            enqueued_at, started_at, ended_at, bytes_transferred, average_speed,
            state, exception, removed
         ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(transfer.id)
    .bind(&transfer.username)
    .bind(&transfer.masked_filename)
    .bind(transfer.size)
    .bind(transfer.start_offset)
    .bind(transfer.requested_at)
    .bind(transfer.enqueued_at)
    .bind(transfer.started_at)
    .bind(transfer.ended_at)
    .bind(transfer.bytes_transferred)
    .bind(transfer.average_speed)
    .bind(transfer.state_bits_raw())
    .bind(&transfer.exception)
    .bind(transfer.removed_flag_raw())
    .execute(&mut **tx)
    .await?;
    Ok(())
}

/// Helper used by tests that want a specific `ended_at` without waiting.
#[must_use]
pub fn now() -> DateTime<Utc> {
    Utc::now()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    async fn ledger() -> TransferLedger {
        let db = Database::new_in_memory().await.unwrap();
        TransferLedger::new(db)
    }

    #[tokio::test]
    async fn add_or_supersede_inserts_a_fresh_row() {
        let ledger = ledger().await;
        let transfer = Transfer::new("alice", "music/song.flac", 4096);
        let id = transfer.id;
        ledger.add_or_supersede(transfer).await.unwrap();

        let fetched = ledger.get(id).await.unwrap().unwrap();
        assert_eq!(fetched.username, "alice");
        assert!(!fetched.removed());
    }

    #[tokio::test]
    async fn supersede_removes_prior_row_for_same_user_and_file() {
        let ledger = ledger().await;
        let mut first = Transfer::new("alice", "music/song.flac", 4096);
        first.set_state(TransferState::COMPLETED | TransferState::ERRORED);
        let first_id = first.id;
        ledger.add_or_supersede(first).await.unwrap();

        let second = Transfer::new("alice", "music/song.flac", 4096);
        let second_id = second.id;
        ledger.add_or_supersede(second).await.unwrap();

        let first_after = ledger.get(first_id).await.unwrap().unwrap();
        assert!(first_after.removed());

        let second_after = ledger.get(second_id).await.unwrap().unwrap();
        assert!(!second_after.removed());
        assert!(second_after.is_active());
    }

    #[tokio::test]
    async fn update_requires_existing_row() {
        let ledger = ledger().await;
        let transfer = Transfer::new("alice", "music/song.flac", 4096);
        let result = ledger.update(&transfer).await;
        assert!(matches!(result, Err(LedgerError::NotFound(_))));
    }

    #[tokio::test]
    async fn remove_rejects_non_terminal_transfer() {
        let ledger = ledger().await;
        let transfer = Transfer::new("alice", "music/song.flac", 4096);
        let id = transfer.id;
        ledger.add_or_supersede(transfer).await.unwrap();

        let result = ledger.remove(id).await;
        assert!(matches!(
            result,
            Err(LedgerError::InvalidOperation { .. })
        ));
    }

    #[tokio::test]
    async fn remove_soft_deletes_terminal_transfer() {
        let ledger = ledger().await;
        let mut transfer = Transfer::new("alice", "music/song.flac", 4096);
        transfer.set_state(TransferState::COMPLETED | TransferState::SUCCEEDED);
        let id = transfer.id;
        ledger.add_or_supersede(transfer).await.unwrap();

        ledger.remove(id).await.unwrap();
        let fetched = ledger.get(id).await.unwrap().unwrap();
        assert!(fetched.removed());
    }

    #[tokio::test]
    async fn find_one_only_active_skips_terminal_rows() {
        let ledger = ledger().await;
        let mut terminal = Transfer::new("bob", "a.txt", 10);
        terminal.set_state(TransferState::COMPLETED | TransferState::SUCCEEDED);
        ledger.add_or_supersede(terminal).await.unwrap();

        let filter = TransferFilter::new().username("bob").only_active();
        assert!(ledger.find_one(&filter).await.unwrap().is_none());

        let active = Transfer::new("bob", "b.txt", 10);
        ledger.add_or_supersede(active).await.unwrap();
        assert!(ledger.find_one(&filter.username("bob")).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn list_excludes_removed_by_default() {
        let ledger = ledger().await;
        let mut gone = Transfer::new("carol", "gone.txt", 1);
        gone.set_state(TransferState::COMPLETED | TransferState::SUCCEEDED);
        let gone_id = gone.id;
        ledger.add_or_supersede(gone).await.unwrap();
        ledger.remove(gone_id).await.unwrap();

        let filter = TransferFilter::new().username("carol");
        assert!(ledger.list(&filter).await.unwrap().is_empty());

        let filter = filter.include_removed();
        assert_eq!(ledger.list(&filter).await.unwrap().len(), 1);
    }
}

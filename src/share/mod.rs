//! Shared-file cache: the authoritative index of what this peer shares.
//!
//! # Overview
//!
//! [`SharedFileCache`] owns two `SQLite` databases (live + backup) and
//! exposes [`SharedFileCache::fill`] (rebuild the index), lookup
//! operations ([`SharedFileCache::resolve`], [`SharedFileCache::search`],
//! [`SharedFileCache::browse`], [`SharedFileCache::list`]), counts, and a
//! `tokio::sync::watch`-based state monitor.
//!
//! Both databases are opened the way [`crate::db::Database::new`] opens
//! the ledger (WAL mode, busy timeout), but through
//! [`crate::db::Database::open_unmigrated`] since schema management here
//! is imperative (validate-or-drop-and-recreate), not forward migrations.
//!
//! # Example
//!
//! ```no_run
//! use upload_core::share::{Share, SharedFileCache};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let cache = SharedFileCache::new_in_memory().await?;
//! let share = Share::new("/srv/music", "music");
//! cache.fill(&[share], Default::default()).await?;
//! let hit = cache.resolve("music/song.flac").await?;
//! # let _ = hit;
//! # Ok(())
//! # }
//! ```

mod error;
mod model;
mod schema;
mod scanner;
mod search;

pub use error::{ShareDbErrorKind, ShareError};
pub use model::{DirectoryRecord, FileRecord, ScanState, Share};
pub use scanner::ScanFilters;
pub use search::SearchQuery;

use std::path::Path;
use std::sync::Mutex as StdMutex;

use tokio::sync::{watch, Mutex as AsyncMutex};
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use crate::db::Database;

/// Default number of fan-out workers for a fill, when the caller has no
/// stronger opinion.
pub const DEFAULT_WORKER_COUNT: usize = 4;

/// Owns the live and backup indexes and coordinates fills against them.
pub struct SharedFileCache {
    live: Database,
    backup: Database,
    scan_lock: AsyncMutex<()>,
    active_fill: StdMutex<Option<CancellationToken>>,
    master_ct: CancellationToken,
    state_tx: watch::Sender<ScanState>,
    state_rx: watch::Receiver<ScanState>,
    worker_count: usize,
}

impl SharedFileCache {
    /// Opens live and backup databases at the given paths.
    ///
    /// # Errors
    ///
    /// Returns [`ShareError::Database`] if either connection fails.
    pub async fn new(live_path: &Path, backup_path: &Path) -> Result<Self, ShareError> {
        let live = Database::open_unmigrated(live_path).await.map_err(to_share_db_error)?;
        let backup = Database::open_unmigrated(backup_path).await.map_err(to_share_db_error)?;
        Ok(Self::from_databases(live, backup))
    }

    /// Opens in-memory live and backup databases, for tests.
    ///
    /// # Errors
    ///
    /// Returns [`ShareError::Database`] if either connection fails.
    pub async fn new_in_memory() -> Result<Self, ShareError> {
        let live = Database::new_in_memory_unmigrated().await.map_err(to_share_db_error)?;
        let backup = Database::new_in_memory_unmigrated().await.map_err(to_share_db_error)?;
        Ok(Self::from_databases(live, backup))
    }

    fn from_databases(live: Database, backup: Database) -> Self {
        let (state_tx, state_rx) = watch::channel(ScanState::default());
        Self {
            live,
            backup,
            scan_lock: AsyncMutex::new(()),
            active_fill: StdMutex::new(None),
            master_ct: CancellationToken::new(),
            state_tx,
            state_rx,
            worker_count: DEFAULT_WORKER_COUNT,
        }
    }

    /// A receiver for the scan-state broadcast.
    #[must_use]
    pub fn state(&self) -> watch::Receiver<ScanState> {
        self.state_rx.clone()
    }

    fn publish(&self, state: ScanState) {
        let _ = self.state_tx.send(state);
    }

    /// Runs one fill: single-writer (a non-blocking acquisition attempt),
    /// schema validation, directory enumeration and worker fan-out,
    /// tombstone sweep (skipped on cancellation), and a backup of the live
    /// database.
    ///
    /// # Errors
    ///
    /// Returns [`ShareError::ScanInProgress`] if a fill is already
    /// running. Returns [`ShareError::Database`] or [`ShareError::Io`] on
    /// failure; in that case `faulted` is published and the live database
    /// is left as-is (possibly partially populated, never destroyed).
    #[instrument(skip(self, shares, filters))]
    pub async fn fill(&self, shares: &[Share], filters: ScanFilters) -> Result<(), ShareError> {
        let _guard = match self.scan_lock.try_lock() {
            Ok(guard) => guard,
            Err(_) => return Err(ShareError::ScanInProgress),
        };

        let fill_ct = self.master_ct.child_token();
        *self.active_fill.lock().unwrap_or_else(std::sync::PoisonError::into_inner) = Some(fill_ct.clone());

        self.publish(ScanState {
            filling: true,
            progress: 0.0,
            ..ScanState::default()
        });

        let result = scanner::run_fill(&self.live, shares, &filters, self.worker_count, fill_ct.clone()).await;

        *self.active_fill.lock().unwrap_or_else(std::sync::PoisonError::into_inner) = None;

        match result {
            Ok(counts) => {
                let cancelled = fill_ct.is_cancelled();
                if !cancelled {
                    if let Err(err) = self.backup_live().await {
                        warn!(error = %err, "backup step failed after a successful fill");
                    }
                }
                self.publish(ScanState {
                    filling: false,
                    filled: !cancelled,
                    faulted: false,
                    cancelled,
                    progress: 1.0,
                    files: counts.files,
                    directories: counts.directories,
                    excluded_directories: counts.excluded_directories,
                });
                info!(files = counts.files, directories = counts.directories, cancelled, "fill finished");
                Ok(())
            }
            Err(err) => {
                self.publish(ScanState {
                    filling: false,
                    filled: false,
                    faulted: true,
                    ..ScanState::default()
                });
                Err(err)
            }
        }
    }

    /// Restores the live database from the backup if the live schema is
    /// missing or invalid. Call once at startup.
    ///
    /// # Errors
    ///
    /// Returns [`ShareError::Database`] if either database can't be read.
    #[instrument(skip(self))]
    pub async fn try_load(&self) -> Result<bool, ShareError> {
        if schema::is_valid(&self.live).await? {
            return Ok(false);
        }
        if !schema::is_valid(&self.backup).await? {
            return Ok(false);
        }
        schema::drop_and_recreate(&self.live).await?;
        copy_directories(&self.backup, &self.live).await?;
        copy_files(&self.backup, &self.live).await?;
        reindex_filenames(&self.live).await?;
        Ok(true)
    }

    async fn backup_live(&self) -> Result<(), ShareError> {
        schema::drop_and_recreate(&self.backup).await?;
        copy_directories(&self.live, &self.backup).await?;
        copy_files(&self.live, &self.backup).await?;
        reindex_filenames(&self.backup).await?;
        Ok(())
    }

    /// Non-blockingly cancels the in-progress fill, if any.
    ///
    /// Returns whether a cancellation was actually issued.
    #[instrument(skip(self))]
    pub fn try_cancel_fill(&self) -> bool {
        let guard = self.active_fill.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        match guard.as_ref() {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Looks up the original filename for a masked name.
    ///
    /// # Errors
    ///
    /// Returns [`ShareError::Database`] if the query fails.
    #[instrument(skip(self))]
    pub async fn resolve(&self, masked_name: &str) -> Result<Option<String>, ShareError> {
        let row: Option<(String,)> =
            sqlx::query_as("SELECT original_filename FROM files WHERE masked_filename = ?")
                .bind(masked_name)
                .fetch_optional(self.live.pool())
                .await?;
        Ok(row.map(|(name,)| name))
    }

    /// Runs a tokenised search, sorted ascending by masked filename.
    ///
    /// # Errors
    ///
    /// Returns [`ShareError::Database`] if the query fails.
    #[instrument(skip(self))]
    pub async fn search(&self, query: &SearchQuery) -> Result<Vec<FileRecord>, ShareError> {
        let Some(expression) = query.to_fts_expression() else {
            return Ok(Vec::new());
        };
        let files = sqlx::query_as::<_, FileRecord>(
            "SELECT f.* FROM files f
             JOIN filenames ON filenames.masked_filename = f.masked_filename
             WHERE filenames MATCH ?
             ORDER BY f.masked_filename ASC",
        )
        .bind(expression)
        .fetch_all(self.live.pool())
        .await?;
        Ok(files)
    }

    /// Returns every directory in the index (optionally restricted to
    /// those under `share_prefix`), each paired with its directly
    /// contained files. Directories with no files appear with an empty
    /// file list.
    ///
    /// # Errors
    ///
    /// Returns [`ShareError::Database`] if the query fails.
    #[instrument(skip(self))]
    pub async fn browse(
        &self,
        share_prefix: Option<&str>,
    ) -> Result<Vec<(DirectoryRecord, Vec<FileRecord>)>, ShareError> {
        let directories = if let Some(prefix) = share_prefix {
            let pattern = format!("{prefix}%");
            sqlx::query_as::<_, DirectoryRecord>(
                "SELECT * FROM directories WHERE name LIKE ? ORDER BY name ASC",
            )
            .bind(pattern)
            .fetch_all(self.live.pool())
            .await?
        } else {
            sqlx::query_as::<_, DirectoryRecord>("SELECT * FROM directories ORDER BY name ASC")
                .fetch_all(self.live.pool())
                .await?
        };

        let mut result = Vec::with_capacity(directories.len());
        for directory in directories {
            let files = self.list(&directory.name).await?;
            result.push((directory, files));
        }
        Ok(result)
    }

    /// Returns every file directly inside `directory` (non-recursive).
    ///
    /// # Errors
    ///
    /// Returns [`ShareError::Database`] if the query fails.
    #[instrument(skip(self))]
    pub async fn list(&self, directory: &str) -> Result<Vec<FileRecord>, ShareError> {
        let prefix = format!("{}/", directory.trim_end_matches('/'));
        let files = sqlx::query_as::<_, FileRecord>(
            "SELECT * FROM files
             WHERE masked_filename LIKE ?
               AND instr(substr(masked_filename, ?), '/') = 0
             ORDER BY masked_filename ASC",
        )
        .bind(format!("{prefix}%"))
        .bind(i64::try_from(prefix.len() + 1).unwrap_or(1))
        .fetch_all(self.live.pool())
        .await?;
        Ok(files)
    }

    /// Counts file rows (optionally restricted to `share_prefix`).
    ///
    /// # Errors
    ///
    /// Returns [`ShareError::Database`] if the query fails.
    pub async fn count_files(&self, share_prefix: Option<&str>) -> Result<i64, ShareError> {
        count_rows(&self.live, "files", "masked_filename", share_prefix).await
    }

    /// Counts directory rows (optionally restricted to `share_prefix`).
    ///
    /// # Errors
    ///
    /// Returns [`ShareError::Database`] if the query fails.
    pub async fn count_directories(&self, share_prefix: Option<&str>) -> Result<i64, ShareError> {
        count_rows(&self.live, "directories", "name", share_prefix).await
    }
}

async fn count_rows(
    db: &Database,
    table: &str,
    column: &str,
    prefix: Option<&str>,
) -> Result<i64, ShareError> {
    let row: (i64,) = if let Some(prefix) = prefix {
        sqlx::query_as(&format!("SELECT COUNT(*) FROM {table} WHERE {column} LIKE ?"))
            .bind(format!("{prefix}%"))
            .fetch_one(db.pool())
            .await?
    } else {
        sqlx::query_as(&format!("SELECT COUNT(*) FROM {table}"))
            .fetch_one(db.pool())
            .await?
    };
    Ok(row.0)
}

async fn copy_directories(from: &Database, to: &Database) -> Result<(), ShareError> {
    let rows = sqlx::query_as::<_, DirectoryRecord>("SELECT * FROM directories")
        .fetch_all(from.pool())
        .await?;
    for row in rows {
        sqlx::query("INSERT INTO directories (name, timestamp) VALUES (?, ?)")
            .bind(row.name)
            .bind(row.timestamp)
            .execute(to.pool())
            .await?;
    }
    Ok(())
}

async fn copy_files(from: &Database, to: &Database) -> Result<(), ShareError> {
    let rows = sqlx::query_as::<_, FileRecord>("SELECT * FROM files")
        .fetch_all(from.pool())
        .await?;
    for row in rows {
        sqlx::query(
            "INSERT INTO files (
                masked_filename, original_filename, size, touched_at, code,
                extension, attribute_json, timestamp
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(row.masked_filename)
        .bind(row.original_filename)
        .bind(row.size)
        .bind(row.touched_at)
        .bind(row.code)
        .bind(row.extension)
        .bind(row.attribute_json)
        .bind(row.timestamp)
        .execute(to.pool())
        .await?;
    }
    Ok(())
}

async fn reindex_filenames(db: &Database) -> Result<(), ShareError> {
    sqlx::query("DELETE FROM filenames").execute(db.pool()).await?;
    sqlx::query("INSERT INTO filenames (masked_filename) SELECT masked_filename FROM files")
        .execute(db.pool())
        .await?;
    Ok(())
}

fn to_share_db_error(err: crate::db::DbError) -> ShareError {
    match err {
        crate::db::DbError::Connection(e) => e.into(),
        crate::db::DbError::Migration(e) => ShareError::Database {
            kind: ShareDbErrorKind::Other,
            message: e.to_string(),
        },
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn write_file(dir: &Path, name: &str, contents: &[u8]) {
        std::fs::write(dir.join(name), contents).unwrap();
    }

    #[tokio::test]
    async fn fill_then_resolve_round_trips() {
        let root = tempdir().unwrap();
        write_file(root.path(), "song.flac", b"data");

        let cache = SharedFileCache::new_in_memory().await.unwrap();
        let share = Share::new(root.path(), "music");
        cache.fill(&[share], ScanFilters::default()).await.unwrap();

        let resolved = cache.resolve("music/song.flac").await.unwrap();
        assert!(resolved.is_some());
    }

    #[tokio::test]
    async fn concurrent_fill_is_rejected() {
        let root = tempdir().unwrap();
        for i in 0..200 {
            write_file(root.path(), &format!("f{i}.txt"), b"x");
        }
        let cache = std::sync::Arc::new(SharedFileCache::new_in_memory().await.unwrap());
        let share = Share::new(root.path(), "music");

        let cache2 = std::sync::Arc::clone(&cache);
        let share2 = share.clone();
        let first = tokio::spawn(async move { cache2.fill(&[share2], ScanFilters::default()).await });

        let second = cache.fill(&[share], ScanFilters::default()).await;
        let _ = first.await;
        assert!(matches!(second, Err(ShareError::ScanInProgress)) || second.is_ok());
    }

    #[tokio::test]
    async fn search_finds_indexed_file() {
        let root = tempdir().unwrap();
        write_file(root.path(), "interesting-song.flac", b"data");

        let cache = SharedFileCache::new_in_memory().await.unwrap();
        let share = Share::new(root.path(), "music");
        cache.fill(&[share], ScanFilters::default()).await.unwrap();

        let results = cache.search(&SearchQuery::parse("interesting")).await.unwrap();
        assert_eq!(results.len(), 1);
    }

    #[tokio::test]
    async fn try_cancel_fill_without_fill_returns_false() {
        let cache = SharedFileCache::new_in_memory().await.unwrap();
        assert!(!cache.try_cancel_fill());
    }

    #[tokio::test]
    async fn counts_reflect_filled_index() {
        let root = tempdir().unwrap();
        write_file(root.path(), "a.txt", b"1");
        write_file(root.path(), "b.txt", b"2");

        let cache = SharedFileCache::new_in_memory().await.unwrap();
        let share = Share::new(root.path(), "music");
        cache.fill(&[share], ScanFilters::default()).await.unwrap();

        assert_eq!(cache.count_files(None).await.unwrap(), 2);
        assert!(cache.count_directories(None).await.unwrap() >= 1);
    }
}

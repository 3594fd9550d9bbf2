//! The fill protocol: (re)building the index from the filesystem.
//!
//! Directory walking uses `walkdir`, adopted from the `NitronPlus-hostpilot`
//! pack entry (the other filesystem-heavy example) since the teacher has no
//! directory-walk precedent of its own. The worker fan-out is a bounded
//! `tokio::sync::mpsc` channel with capacity 1000, `send().await` providing
//! the back-pressure — the producer/consumer translation of the teacher's
//! `Semaphore`-gated concurrency model (`download/engine.rs`) to a
//! push-driven rather than pull-driven shape.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;
use regex::Regex;
use sqlx::SqlitePool;
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};
use walkdir::WalkDir;

use super::error::ShareError;
use super::model::Share;
use super::schema;
use crate::db::Database;

/// Directory fan-out channel capacity (§4.1 step 5, "source" value).
const CHANNEL_CAPACITY: usize = 1000;

/// Regex filters applied during enumeration. A path matching any filter
/// in the relevant list is excluded from the scan.
#[derive(Debug, Clone, Default)]
pub struct ScanFilters {
    /// Patterns excluding directories by masked path.
    pub directory_filters: Vec<Regex>,
    /// Patterns excluding files by masked path.
    pub file_filters: Vec<Regex>,
}

impl ScanFilters {
    fn excludes_directory(&self, masked: &str) -> bool {
        self.directory_filters.iter().any(|re| re.is_match(masked))
    }

    fn excludes_file(&self, masked: &str) -> bool {
        self.file_filters.iter().any(|re| re.is_match(masked))
    }
}

fn is_hidden_or_system(entry: &walkdir::DirEntry) -> bool {
    entry
        .file_name()
        .to_str()
        .is_some_and(|name| name.starts_with('.'))
}

struct DirJob {
    local_path: PathBuf,
    masked_name: String,
}

/// Counts accumulated over one fill.
#[derive(Debug, Default, Clone, Copy)]
pub struct FillCounts {
    /// Directory rows written or confirmed.
    pub directories: u64,
    /// File rows written or confirmed.
    pub files: u64,
    /// Directories skipped for matching an excluded share.
    pub excluded_directories: u64,
}

/// Enumerates every directory under every non-excluded share: skips
/// hidden/system and inaccessible directories, applies `filters`, then
/// deduplicates and subtracts any directory whose local path starts with
/// an excluded share's local path (§4.1 step 4).
fn enumerate_directories(shares: &[Share], filters: &ScanFilters) -> (Vec<DirJob>, u64) {
    let excluded_prefixes: Vec<&Path> = shares
        .iter()
        .filter(|s| s.excluded)
        .map(|s| s.local_path.as_path())
        .collect();

    let mut seen = HashSet::new();
    let mut jobs = Vec::new();
    let mut excluded_count = 0u64;

    for share in shares.iter().filter(|s| !s.excluded) {
        for entry in WalkDir::new(&share.local_path)
            .into_iter()
            .filter_entry(|e| !is_hidden_or_system(e))
        {
            let Ok(entry) = entry else {
                continue;
            };
            if !entry.file_type().is_dir() {
                continue;
            }

            let local_path = entry.path().to_path_buf();
            if excluded_prefixes.iter().any(|prefix| local_path.starts_with(prefix)) {
                excluded_count += 1;
                continue;
            }

            let Some(masked_name) = share.mask(&local_path) else {
                continue;
            };
            if filters.excludes_directory(&masked_name) {
                continue;
            }
            if !seen.insert(local_path.clone()) {
                continue;
            }

            jobs.push(DirJob {
                local_path,
                masked_name,
            });
        }
    }

    (jobs, excluded_count)
}

/// Enumerates files directly inside `local_path` (non-recursive) and
/// upserts a file + full-text-index row for each that survives `filters`.
async fn process_directory(
    pool: &SqlitePool,
    job: &DirJob,
    epoch: i64,
    filters: &ScanFilters,
) -> Result<u64, ShareError> {
    sqlx::query(
        "INSERT INTO directories (name, timestamp) VALUES (?, ?)
         ON CONFLICT(name) DO UPDATE SET timestamp = excluded.timestamp",
    )
    .bind(&job.masked_name)
    .bind(epoch)
    .execute(pool)
    .await?;

    let mut file_count = 0u64;
    let read_dir = match std::fs::read_dir(&job.local_path) {
        Ok(rd) => rd,
        Err(err) => {
            warn!(path = %job.local_path.display(), error = %err, "skipping unreadable directory");
            return Ok(0);
        }
    };

    for entry in read_dir.flatten() {
        let Ok(file_type) = entry.file_type() else {
            continue;
        };
        if !file_type.is_file() {
            continue;
        }
        let Ok(metadata) = entry.metadata() else {
            continue;
        };

        let original_filename = entry.path().to_string_lossy().into_owned();
        let masked_filename = format!(
            "{}/{}",
            job.masked_name.trim_end_matches('/'),
            entry.file_name().to_string_lossy()
        );
        if filters.excludes_file(&masked_filename) {
            continue;
        }

        let extension = entry
            .path()
            .extension()
            .map(|ext| ext.to_string_lossy().to_lowercase())
            .unwrap_or_default();

        sqlx::query(
            "INSERT INTO files (
                masked_filename, original_filename, size, touched_at, code,
                extension, attribute_json, timestamp
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(masked_filename) DO UPDATE SET
                original_filename = excluded.original_filename,
                size = excluded.size,
                touched_at = excluded.touched_at,
                code = excluded.code,
                extension = excluded.extension,
                attribute_json = excluded.attribute_json,
                timestamp = excluded.timestamp",
        )
        .bind(&masked_filename)
        .bind(&original_filename)
        .bind(i64::try_from(metadata.len()).unwrap_or(i64::MAX))
        .bind(Utc::now())
        .bind(1_i64)
        .bind(&extension)
        .bind("[]")
        .bind(epoch)
        .execute(pool)
        .await?;

        sqlx::query("DELETE FROM filenames WHERE masked_filename = ?")
            .bind(&masked_filename)
            .execute(pool)
            .await?;
        sqlx::query("INSERT INTO filenames (masked_filename) VALUES (?)")
            .bind(&masked_filename)
            .execute(pool)
            .await?;

        file_count += 1;
    }

    Ok(file_count)
}

/// Runs one full fill against `db`: schema validation, directory
/// enumeration, worker fan-out, and (unless cancelled) the tombstone
/// sweep. Does not perform the backup step or publish state — the caller
/// ([`super::SharedFileCache`]) owns that.
#[instrument(skip(db, shares, filters, ct))]
pub async fn run_fill(
    db: &Database,
    shares: &[Share],
    filters: &ScanFilters,
    worker_count: usize,
    ct: CancellationToken,
) -> Result<FillCounts, ShareError> {
    schema::ensure_valid(db).await?;
    let epoch = Utc::now().timestamp_millis();

    let (jobs, excluded_directories) = enumerate_directories(shares, filters);
    debug!(jobs = jobs.len(), excluded_directories, "enumerated directories");

    let (tx, rx) = mpsc::channel::<DirJob>(CHANNEL_CAPACITY);
    let rx = Arc::new(AsyncMutex::new(rx));

    let directories_done = Arc::new(AtomicU64::new(0));
    let files_done = Arc::new(AtomicU64::new(0));

    let mut workers = Vec::with_capacity(worker_count.max(1));
    for _ in 0..worker_count.max(1) {
        let rx = Arc::clone(&rx);
        let pool = db.pool().clone();
        let filters = filters.clone();
        let directories_done = Arc::clone(&directories_done);
        let files_done = Arc::clone(&files_done);
        let ct = ct.clone();

        workers.push(tokio::spawn(async move {
            loop {
                let job = {
                    let mut rx = rx.lock().await;
                    rx.recv().await
                };
                let Some(job) = job else { break };
                if ct.is_cancelled() {
                    continue;
                }
                match process_directory(&pool, &job, epoch, &filters).await {
                    Ok(count) => {
                        files_done.fetch_add(count, Ordering::SeqCst);
                        directories_done.fetch_add(1, Ordering::SeqCst);
                    }
                    Err(err) => warn!(error = %err, "directory processing failed"),
                }
            }
        }));
    }

    for job in jobs {
        if ct.is_cancelled() {
            break;
        }
        if tx.send(job).await.is_err() {
            break;
        }
    }
    drop(tx);

    for worker in workers {
        let _ = worker.await;
    }

    if !ct.is_cancelled() {
        sqlx::query("DELETE FROM files WHERE timestamp < ?")
            .bind(epoch)
            .execute(db.pool())
            .await?;
        sqlx::query("DELETE FROM directories WHERE timestamp < ?")
            .bind(epoch)
            .execute(db.pool())
            .await?;
        sqlx::query("DELETE FROM filenames WHERE masked_filename NOT IN (SELECT masked_filename FROM files)")
            .execute(db.pool())
            .await?;
    }

    Ok(FillCounts {
        directories: directories_done.load(Ordering::SeqCst),
        files: files_done.load(Ordering::SeqCst),
        excluded_directories,
    })
}

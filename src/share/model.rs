//! Share roots and the records the scanner writes.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A root of the filesystem index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Share {
    /// Unique identifier.
    pub id: uuid::Uuid,
    /// Local filesystem path this share points at.
    pub local_path: PathBuf,
    /// Remote-facing (masked) path prefix peers see.
    pub remote_path: String,
    /// Display alias, if any.
    pub alias: Option<String>,
    /// Whether this share (and everything under it) is excluded from the
    /// index.
    pub excluded: bool,
}

impl Share {
    /// Creates a non-excluded share.
    #[must_use]
    pub fn new(local_path: impl Into<PathBuf>, remote_path: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4(),
            local_path: local_path.into(),
            remote_path: remote_path.into(),
            alias: None,
            excluded: false,
        }
    }

    /// Marks this share excluded: matched paths are never indexed even if
    /// also matched by a non-excluded share.
    #[must_use]
    pub fn excluded(mut self) -> Self {
        self.excluded = true;
        self
    }

    /// Rewrites a local path under this share to its masked (remote-facing)
    /// form by substituting the local-path prefix with the remote prefix.
    #[must_use]
    pub fn mask(&self, local: &std::path::Path) -> Option<String> {
        let rel = local.strip_prefix(&self.local_path).ok()?;
        let rel = rel.to_string_lossy().replace('\\', "/");
        if rel.is_empty() {
            Some(self.remote_path.clone())
        } else {
            Some(format!("{}/{}", self.remote_path.trim_end_matches('/'), rel))
        }
    }
}

/// A file row in the live/backup index.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct FileRecord {
    /// Remote-facing path. Primary key.
    #[sqlx(rename = "masked_filename")]
    pub masked_filename: String,
    /// Original (local or agent-resolved) filename.
    #[sqlx(rename = "original_filename")]
    pub original_filename: String,
    /// Size in bytes.
    pub size: i64,
    /// Last-touched timestamp.
    #[sqlx(rename = "touched_at")]
    pub touched_at: DateTime<Utc>,
    /// Peer-protocol file code.
    pub code: i64,
    /// File extension, lowercase, without the leading dot.
    pub extension: String,
    /// Peer-protocol attribute list, stored as JSON text.
    #[sqlx(rename = "attribute_json")]
    pub attribute_json: String,
    /// Scan-epoch this row was last written or confirmed under.
    pub timestamp: i64,
}

/// A directory row in the live/backup index.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct DirectoryRecord {
    /// Masked directory path. Primary key.
    pub name: String,
    /// Scan-epoch this row was last written or confirmed under.
    pub timestamp: i64,
}

/// Broadcast snapshot of the cache's scan lifecycle, the in-memory
/// analogue of `spec.md`'s "pure-functional `setValue(prev -> next)`"
/// state monitor (here: `tokio::sync::watch`).
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ScanState {
    /// A fill is currently running.
    pub filling: bool,
    /// The most recent fill completed successfully.
    pub filled: bool,
    /// The most recent fill ended in an unhandled error.
    pub faulted: bool,
    /// The most recent fill was cancelled by the caller.
    pub cancelled: bool,
    /// Fraction of enumerated directories processed so far, in `[0, 1]`.
    pub progress: f64,
    /// File rows in the index as of the last published snapshot.
    pub files: u64,
    /// Directory rows in the index as of the last published snapshot.
    pub directories: u64,
    /// Directories skipped because they matched an excluded share.
    pub excluded_directories: u64,
}

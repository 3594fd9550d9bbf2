//! Error types for the shared-file cache.

use thiserror::Error;

/// Structured classification for cache database failures, mirroring
/// [`crate::ledger::LedgerDbErrorKind`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShareDbErrorKind {
    /// `SQLite` returned busy/locked under concurrent access.
    BusyOrLocked,
    /// Constraint failure.
    ConstraintViolation,
    /// Unclassified database failure.
    Other,
}

impl ShareDbErrorKind {
    #[must_use]
    pub fn from_sqlx(error: &sqlx::Error) -> Self {
        match error {
            sqlx::Error::Database(database_error) => {
                let code = database_error.code();
                if matches!(code.as_deref(), Some("SQLITE_BUSY" | "SQLITE_LOCKED" | "5" | "6")) {
                    Self::BusyOrLocked
                } else if database_error.is_unique_violation()
                    || database_error.is_check_violation()
                {
                    Self::ConstraintViolation
                } else {
                    Self::Other
                }
            }
            _ => Self::Other,
        }
    }
}

/// Errors raised by [`crate::share::SharedFileCache`].
#[derive(Debug, Error)]
pub enum ShareError {
    /// A fill was requested while one was already running.
    #[error("a share scan is already in progress")]
    ScanInProgress,

    /// Database operation failed.
    #[error("database error ({kind:?}): {message}")]
    Database {
        /// Typed classification.
        kind: ShareDbErrorKind,
        /// Human-readable database error text.
        message: String,
    },

    /// A filesystem operation failed during enumeration or backup.
    #[error("filesystem error: {0}")]
    Io(#[from] std::io::Error),

    /// The regex supplied as a directory/file filter failed to compile.
    #[error("invalid filter pattern: {0}")]
    InvalidFilter(#[from] regex::Error),
}

impl From<sqlx::Error> for ShareError {
    fn from(err: sqlx::Error) -> Self {
        Self::Database {
            kind: ShareDbErrorKind::from_sqlx(&err),
            message: err.to_string(),
        }
    }
}

//! Error types for transfer ledger operations.

use std::fmt;

use thiserror::Error;

/// Structured classification for ledger database failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedgerDbErrorKind {
    /// `SQLite` returned busy/locked under concurrent access.
    BusyOrLocked,
    /// Constraint failure (unique/foreign-key/check/not-null).
    ConstraintViolation,
    /// Connection pool timed out waiting for a free connection.
    PoolTimeout,
    /// Connection pool is closed.
    PoolClosed,
    /// Expected row was not found.
    RowNotFound,
    /// Filesystem or transport IO failure.
    Io,
    /// SQL protocol/driver error.
    Protocol,
    /// Unclassified database failure.
    Other,
}

impl LedgerDbErrorKind {
    #[must_use]
    pub fn from_sqlx(error: &sqlx::Error) -> Self {
        match error {
            sqlx::Error::PoolTimedOut => Self::PoolTimeout,
            sqlx::Error::PoolClosed => Self::PoolClosed,
            sqlx::Error::RowNotFound => Self::RowNotFound,
            sqlx::Error::Io(_) => Self::Io,
            sqlx::Error::Protocol(_) => Self::Protocol,
            sqlx::Error::Database(database_error) => {
                classify_database_error(database_error.as_ref())
            }
            _ => Self::Other,
        }
    }
}

impl fmt::Display for LedgerDbErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::BusyOrLocked => "busy_or_locked",
            Self::ConstraintViolation => "constraint_violation",
            Self::PoolTimeout => "pool_timeout",
            Self::PoolClosed => "pool_closed",
            Self::RowNotFound => "row_not_found",
            Self::Io => "io",
            Self::Protocol => "protocol",
            Self::Other => "other",
        };
        write!(f, "{label}")
    }
}

fn classify_database_error(
    database_error: &(dyn sqlx::error::DatabaseError + 'static),
) -> LedgerDbErrorKind {
    let code = database_error.code();
    if matches!(
        code.as_deref(),
        Some("SQLITE_BUSY" | "SQLITE_LOCKED" | "5" | "6")
    ) {
        return LedgerDbErrorKind::BusyOrLocked;
    }

    if database_error.is_unique_violation()
        || database_error.is_foreign_key_violation()
        || database_error.is_check_violation()
        || code
            .as_deref()
            .is_some_and(|value| value.starts_with("SQLITE_CONSTRAINT"))
    {
        return LedgerDbErrorKind::ConstraintViolation;
    }

    let message = database_error.message().to_ascii_lowercase();
    if message.contains("database is locked")
        || message.contains("database table is locked")
        || message.contains("database is busy")
    {
        return LedgerDbErrorKind::BusyOrLocked;
    }

    LedgerDbErrorKind::Other
}

/// Errors that can occur during ledger operations.
#[derive(Debug, Clone, Error)]
pub enum LedgerError {
    /// Database operation failed.
    #[error("database error ({kind}): {message}")]
    Database {
        /// Typed classification used for retry/alerting decisions.
        kind: LedgerDbErrorKind,
        /// Human-readable database error text.
        message: String,
    },

    /// No non-removed transfer exists with the given id.
    #[error("transfer not found: {0}")]
    NotFound(uuid::Uuid),

    /// Caller attempted an operation that requires a different lifecycle
    /// state (e.g. removing a transfer that hasn't reached a terminal
    /// state yet).
    #[error("invalid operation on transfer {id}: {reason}")]
    InvalidOperation {
        /// The transfer the operation was attempted on.
        id: uuid::Uuid,
        /// Why the operation was rejected.
        reason: &'static str,
    },
}

impl From<sqlx::Error> for LedgerError {
    fn from(err: sqlx::Error) -> Self {
        Self::Database {
            kind: LedgerDbErrorKind::from_sqlx(&err),
            message: err.to_string(),
        }
    }
}

impl LedgerError {
    /// Returns the typed database error kind, when this is a database error.
    #[must_use]
    pub fn database_kind(&self) -> Option<LedgerDbErrorKind> {
        match self {
            Self::Database { kind, .. } => Some(*kind),
            Self::NotFound(_) | Self::InvalidOperation { .. } => None,
        }
    }

    /// Returns true when this error is a database busy/locked condition.
    #[must_use]
    pub fn is_busy_or_locked(&self) -> bool {
        self.database_kind() == Some(LedgerDbErrorKind::BusyOrLocked)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn database_error_message_includes_kind() {
        let err = LedgerError::Database {
            kind: LedgerDbErrorKind::BusyOrLocked,
            message: "database is locked".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("busy_or_locked"));
        assert!(err.is_busy_or_locked());
    }

    #[test]
    fn not_found_message_includes_id() {
        let id = uuid::Uuid::nil();
        let err = LedgerError::NotFound(id);
        assert!(err.to_string().contains(&id.to_string()));
    }
}

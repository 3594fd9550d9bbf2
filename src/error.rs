//! Crate-wide error taxonomy (§7).
//!
//! Each component's local error enum (`LedgerError`, `ShareError`,
//! `GovernorError`, `QueueError`, `ServiceError`, `PeerError`) converts
//! into [`CoreError`] via `#[from]`, mirroring how the teacher's
//! `download::EngineError` wraps `QueueError`.

use thiserror::Error;

use crate::governor::GovernorError;
use crate::ledger::LedgerError;
use crate::peer::PeerError;
use crate::queue::QueueError;
use crate::service::ServiceError;
use crate::share::ShareError;

/// The crate's top-level error type. Surfaced to whatever binds this
/// core to a transport (out of scope here) — variant names map directly
/// to the HTTP status codes §7 specifies for a controller layer.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Resolution miss, missing transfer, missing share. HTTP 404.
    #[error("not found: {0}")]
    NotFound(String),

    /// A fill was requested while one was already running. HTTP 409.
    #[error("share scan already in progress")]
    ShareScanInProgress,

    /// Upload rejected at admission (file not shared, resolution
    /// failure). Returned to the peer as a rejection, not surfaced as a
    /// transport error.
    #[error("upload rejected: {0}")]
    DownloadEnqueueException(String),

    /// Caller attempted an operation requiring a different lifecycle
    /// state (e.g. removing a non-terminal transfer). HTTP 400.
    #[error("invalid operation: {0}")]
    InvalidOperation(String),

    /// A cancellation token fired. Handled locally wherever possible
    /// (fill cancellation skips the tombstone sweep; transfer
    /// cancellation produces the Cancelled terminal state) — this
    /// variant only escapes on a shutdown path.
    #[error("operation cancelled")]
    OperationCancelled,

    /// Ledger persistence failed.
    #[error(transparent)]
    Ledger(#[from] LedgerError),

    /// Shared-file cache operation failed.
    #[error(transparent)]
    Share(#[from] ShareError),

    /// Governor operation failed.
    #[error(transparent)]
    Governor(#[from] GovernorError),

    /// Queue operation failed.
    #[error(transparent)]
    Queue(#[from] QueueError),

    /// Upload service operation failed.
    #[error(transparent)]
    Service(#[from] ServiceError),

    /// An external collaborator (peer-protocol library, relay, user
    /// service) failed.
    #[error(transparent)]
    Peer(#[from] PeerError),
}

impl CoreError {
    /// True for errors that are the caller's own fault (bad request
    /// shape) rather than a backend failure, per §7's policy note that
    /// everything not locally recoverable is "surfaced with the error
    /// kind preserved."
    #[must_use]
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::NotFound(_)
                | Self::ShareScanInProgress
                | Self::DownloadEnqueueException(_)
                | Self::InvalidOperation(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ledger_not_found_converts_into_core_error() {
        let ledger_err = LedgerError::NotFound(uuid::Uuid::nil());
        let core_err: CoreError = ledger_err.into();
        assert!(matches!(core_err, CoreError::Ledger(_)));
    }

    #[test]
    fn client_errors_are_classified() {
        assert!(CoreError::ShareScanInProgress.is_client_error());
        assert!(!CoreError::OperationCancelled.is_client_error());
    }
}

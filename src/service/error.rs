//! Error types for the upload service.

use thiserror::Error;
use uuid::Uuid;

use crate::governor::GovernorError;
use crate::ledger::LedgerError;
use crate::peer::PeerError;
use crate::queue::QueueError;
use crate::share::ShareError;

/// Errors raised by [`crate::service::UploadService`].
#[derive(Debug, Error)]
pub enum ServiceError {
    /// The requested file could not be resolved, locally or on a remote
    /// agent (§4.4 step 2, "File not shared").
    #[error("file not shared: {0}")]
    FileNotShared(String),

    /// No transfer exists with the given id.
    #[error("transfer not found: {0}")]
    NotFound(Uuid),

    /// `Remove` was called on a transfer that has not reached a terminal
    /// state.
    #[error("transfer {0} has not reached a terminal state")]
    NotTerminal(Uuid),

    /// The shared-file cache operation failed.
    #[error(transparent)]
    Share(#[from] ShareError),

    /// A ledger operation failed.
    #[error(transparent)]
    Ledger(#[from] LedgerError),

    /// A governor operation failed.
    #[error(transparent)]
    Governor(#[from] GovernorError),

    /// A queue operation failed.
    #[error(transparent)]
    Queue(#[from] QueueError),

    /// An external collaborator failed.
    #[error(transparent)]
    Peer(#[from] PeerError),
}

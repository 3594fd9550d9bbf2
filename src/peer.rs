//! External collaborators consumed by the upload service (§6): the
//! peer-protocol transfer primitive, the relay fronting remote agents,
//! and the user service's group/watch bookkeeping.
//!
//! Each is modelled as an `async_trait` object-safe trait, the same
//! pattern the teacher uses for `resolver::Resolver` — the core stays
//! compilable and testable without the real peer-protocol crate; a mock
//! implementation lives under `tests/support` for black-box tests.
//!
//! The option bundle §4.4 describes as being passed *into* the
//! peer-protocol library is itself expressed as a trait
//! ([`UploadCallbacks`]) the upload service implements and the library
//! calls back into, per §9's design note: "in languages without
//! delegates, expose an interface the library consumes."

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::io::AsyncRead;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::ledger::TransferState;

/// Errors raised by the external collaborators themselves (transport
/// failures, missing files, protocol violations). Distinct from the
/// service's own [`crate::error::CoreError`] — this is what those
/// collaborators hand back to us.
#[derive(Debug, Error)]
pub enum PeerError {
    /// The named file does not exist (locally or on the named agent).
    #[error("file not found: {0}")]
    NotFound(String),

    /// Local filesystem or remote stream IO failed.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// The peer-protocol library reported a transfer-level failure.
    #[error("peer transfer failed: {0}")]
    TransferFailed(String),

    /// Any other collaborator-side failure.
    #[error("peer collaborator error: {0}")]
    Other(String),
}

/// A state transition reported by the peer-protocol library.
#[derive(Debug, Clone, Copy)]
pub struct TransferStateEvent {
    /// The state the transfer has moved to.
    pub state: TransferState,
}

/// A progress snapshot reported by the peer-protocol library, at most
/// once per 250 ms per the service's rate limiter (§4.4).
#[derive(Debug, Clone, Copy)]
pub struct ProgressEvent {
    /// Cumulative bytes transferred as of this snapshot.
    pub bytes_transferred: i64,
    /// Average speed in bytes/second as of this snapshot.
    pub average_speed: f64,
    /// When this snapshot was taken.
    pub at: DateTime<Utc>,
}

/// The peer-protocol library's final transfer snapshot, merged into the
/// ledger row on successful completion (§4.4 Terminal handling).
#[derive(Debug, Clone, Copy)]
pub struct CompletedTransfer {
    /// Total bytes transferred.
    pub bytes_transferred: i64,
    /// Final average speed in bytes/second.
    pub average_speed: f64,
}

/// The option bundle §4.4 passes to the peer-protocol library, expressed
/// as a trait the upload service implements and `PeerProtocol::upload`
/// calls back into for the lifetime of one transfer.
#[async_trait]
pub trait UploadCallbacks: Send + Sync {
    /// The transfer moved to a new state. If the new state contains
    /// `Queued`, the implementation enqueues into the upload queue and
    /// stamps `enqueued_at` before persisting.
    async fn state_changed(&self, event: TransferStateEvent);

    /// A (rate-limited) progress snapshot. Coalesced to at most one
    /// persist per 250 ms by the implementation.
    async fn progress_updated(&self, event: ProgressEvent);

    /// Delegates to the governor's `getBytes`.
    async fn governor_get_bytes(&self, requested: u64, ct: &CancellationToken) -> Option<u64>;

    /// Delegates to the governor's `returnBytes`.
    fn governor_return_bytes(&self, attempted: u64, granted: u64, actual: u64);

    /// Delegates to the queue's `awaitStart`.
    async fn slot_awaiter(&self, ct: &CancellationToken) -> Result<(), PeerError>;

    /// Delegates to the queue's `complete`.
    async fn slot_released(&self);

    /// Opens the byte source for this transfer at `offset`: the local
    /// file for a local host, a relay stream for a remote agent.
    async fn open_input_stream(
        &self,
        offset: i64,
    ) -> Result<Box<dyn AsyncRead + Unpin + Send>, PeerError>;
}

/// The external peer-protocol library's upload primitive (§6). Opaque:
/// this core only depends on the shape of the call, never its codec.
#[async_trait]
pub trait PeerProtocol: Send + Sync {
    /// Transmits `filename` (`size` bytes) to `username`, calling back
    /// into `callbacks` throughout, honouring `ct`. The library is told
    /// not to seek automatically (the callbacks' `open_input_stream`
    /// already seeks) and to dispose the input stream on completion.
    async fn upload(
        &self,
        transfer_id: Uuid,
        username: &str,
        filename: &str,
        size: i64,
        callbacks: Arc<dyn UploadCallbacks>,
        ct: CancellationToken,
    ) -> Result<CompletedTransfer, PeerError>;
}

/// The relay fronting remote agents (§6).
#[async_trait]
pub trait Relay: Send + Sync {
    /// Looks up a file on a named agent. Returns its length if present.
    async fn get_file_info(&self, agent: &str, filename: &str) -> Result<Option<i64>, PeerError>;

    /// Opens a byte stream for `filename` on `agent`, starting at `offset`,
    /// tagged with a caller-chosen stream id for later close/error
    /// correlation.
    async fn get_file_stream(
        &self,
        agent: &str,
        filename: &str,
        offset: i64,
        stream_id: Uuid,
    ) -> Result<Box<dyn AsyncRead + Unpin + Send>, PeerError>;

    /// Best-effort close of a previously opened stream, optionally
    /// reporting the error that caused the close.
    async fn try_close_file_stream(&self, agent: &str, stream_id: Uuid, error: Option<&str>);
}

/// The user service's group/watch bookkeeping (§6).
#[async_trait]
pub trait UserService: Send + Sync {
    /// The configured group for `username`, or `None` if unmapped (the
    /// queue and governor both fall back to the Default group).
    async fn get_group(&self, username: &str) -> Option<String>;

    /// Whether `username` is currently watched (out of scope for the
    /// upload path itself, but part of the collaborator's surface).
    async fn is_watched(&self, username: &str) -> bool;

    /// Begins watching `username`.
    async fn watch(&self, username: &str) -> Result<(), PeerError>;
}

//! Transfer record and its flag-set state.

use std::fmt;

use bitflags::bitflags;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

bitflags! {
    /// Lifecycle state of a [`Transfer`], drawn from §3 of the upload spec.
    ///
    /// Terminal states always include [`TransferState::COMPLETED`]. The five
    /// outcome flags (`SUCCEEDED`, `CANCELLED`, `ERRORED`, `REJECTED`,
    /// `TIMED_OUT`) are mutually exclusive and only meaningful alongside
    /// `COMPLETED` — callers that need "which outcome" should check
    /// `is_terminal()` first.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    #[serde(transparent)]
    pub struct TransferState: u32 {
        /// Waiting for an upload slot.
        const QUEUED       = 1 << 0;
        /// Slot granted, peer-protocol transfer is starting up.
        const INITIALIZING = 1 << 1;
        /// Bytes are actively flowing.
        const IN_PROGRESS  = 1 << 2;
        /// Terminal: the transfer has finished, one way or another.
        const COMPLETED    = 1 << 3;
        /// Terminal outcome: finished successfully.
        const SUCCEEDED    = 1 << 4;
        /// Terminal outcome: cancelled by caller or shutdown.
        const CANCELLED    = 1 << 5;
        /// Terminal outcome: an exception ended the transfer.
        const ERRORED      = 1 << 6;
        /// Terminal outcome: rejected at admission (e.g. file not shared).
        const REJECTED      = 1 << 7;
        /// Terminal outcome: exceeded a deadline.
        const TIMED_OUT     = 1 << 8;
    }
}

impl TransferState {
    /// True once [`TransferState::COMPLETED`] is set.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        self.contains(Self::COMPLETED)
    }
}

impl fmt::Display for TransferState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// A single transfer attempt recorded in the ledger.
///
/// Mutated only by the upload service, and only under that transfer's
/// per-transfer exclusion (see [`crate::service`]). Never destroyed —
/// `removed` is a soft-delete flag, set at most once, and only once
/// `state` is terminal.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Transfer {
    /// Stable 128-bit identifier.
    #[sqlx(rename = "id")]
    pub id: Uuid,
    /// The requesting peer's username.
    pub username: String,
    /// The remote-facing (masked) filename requested.
    pub masked_filename: String,
    /// Size in bytes.
    pub size: i64,
    /// Byte offset the transfer resumes from, if any.
    pub start_offset: i64,
    /// When the upload service first saw this request.
    pub requested_at: DateTime<Utc>,
    /// When the transfer reached the `Queued` state.
    pub enqueued_at: Option<DateTime<Utc>>,
    /// When the peer-protocol transfer actually began streaming.
    pub started_at: Option<DateTime<Utc>>,
    /// When the transfer reached a terminal state.
    pub ended_at: Option<DateTime<Utc>>,
    /// Cumulative bytes transferred so far.
    pub bytes_transferred: i64,
    /// Average speed in bytes/second, updated alongside progress.
    pub average_speed: f64,
    /// Raw flag bits; use [`Transfer::state`] to read as [`TransferState`].
    #[sqlx(rename = "state")]
    state_bits: i64,
    /// Exception or cancellation message, when terminal and not `Succeeded`.
    pub exception: Option<String>,
    /// Soft-delete flag.
    #[sqlx(rename = "removed")]
    removed_flag: i64,
}

impl Transfer {
    /// Creates a freshly requested transfer: a fresh id, `requested_at = now`,
    /// empty state, not removed.
    #[must_use]
    pub fn new(username: impl Into<String>, masked_filename: impl Into<String>, size: i64) -> Self {
        Self {
            id: Uuid::new_v4(),
            username: username.into(),
            masked_filename: masked_filename.into(),
            size,
            start_offset: 0,
            requested_at: Utc::now(),
            enqueued_at: None,
            started_at: None,
            ended_at: None,
            bytes_transferred: 0,
            average_speed: 0.0,
            state_bits: 0,
            exception: None,
            removed_flag: 0,
        }
    }

    /// The parsed state flag-set.
    #[must_use]
    pub fn state(&self) -> TransferState {
        TransferState::from_bits_truncate(
            u32::try_from(self.state_bits).unwrap_or(0),
        )
    }

    /// Replaces the state flag-set.
    pub fn set_state(&mut self, state: TransferState) {
        self.state_bits = i64::from(state.bits());
    }

    /// Whether this row has been soft-deleted.
    #[must_use]
    pub fn removed(&self) -> bool {
        self.removed_flag != 0
    }

    /// Marks this row removed. Caller must ensure `state().is_terminal()`
    /// first — the ledger enforces this at the API boundary
    /// (see [`crate::ledger::TransferLedger::remove`]).
    pub fn mark_removed(&mut self) {
        self.removed_flag = 1;
    }

    /// True if `state` is non-terminal (i.e. this transfer is still active).
    #[must_use]
    pub fn is_active(&self) -> bool {
        !self.state().is_terminal()
    }

    /// Raw state bits, for binding into an `INSERT`/`UPDATE` statement.
    #[must_use]
    pub(crate) fn state_bits_raw(&self) -> i64 {
        self.state_bits
    }

    /// Raw removed flag, for binding into an `INSERT`/`UPDATE` statement.
    #[must_use]
    pub(crate) fn removed_flag_raw(&self) -> i64 {
        self.removed_flag
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn completed_is_terminal_but_queued_is_not() {
        assert!(!TransferState::QUEUED.is_terminal());
        assert!((TransferState::COMPLETED | TransferState::SUCCEEDED).is_terminal());
    }

    #[test]
    fn new_transfer_starts_non_terminal_and_not_removed() {
        let t = Transfer::new("alice", "music/song.flac", 1024);
        assert!(t.is_active());
        assert!(!t.removed());
        assert_eq!(t.state(), TransferState::empty());
    }

    #[test]
    fn set_state_round_trips_through_bits() {
        let mut t = Transfer::new("alice", "music/song.flac", 1024);
        t.set_state(TransferState::COMPLETED | TransferState::CANCELLED);
        assert!(t.state().is_terminal());
        assert!(t.state().contains(TransferState::CANCELLED));
    }
}

//! A single in-memory admission entry.

use chrono::{DateTime, Utc};
use tokio::sync::oneshot;

/// An enqueued upload waiting for admission.
///
/// Lives only in memory: the queue holds at most one entry per
/// (username, filename) pair. `ready_at` and `completion` are populated by
/// `awaitStart`, not at enqueue time.
#[derive(Debug)]
pub struct QueueEntry {
    /// The requesting peer's username.
    pub username: String,
    /// The masked filename requested.
    pub masked_filename: String,
    /// Group this entry's slot budget is drawn from.
    pub group: String,
    /// When `enqueue` registered this entry.
    pub enqueued_at: DateTime<Utc>,
    /// When `awaitStart` marked this entry ready, if it has been.
    pub ready_at: Option<DateTime<Utc>>,
    /// Fired by the admission pass when this entry is selected. `None`
    /// until `awaitStart` installs it.
    completion: Option<oneshot::Sender<()>>,
}

impl QueueEntry {
    /// Creates a freshly enqueued, not-yet-ready entry.
    #[must_use]
    pub fn new(username: impl Into<String>, masked_filename: impl Into<String>, group: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            masked_filename: masked_filename.into(),
            group: group.into(),
            enqueued_at: Utc::now(),
            ready_at: None,
            completion: None,
        }
    }

    /// True once `awaitStart` has marked this entry ready.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.ready_at.is_some()
    }

    /// Marks the entry ready and installs the completion sender, returning
    /// the paired receiver for the caller to await.
    pub fn mark_ready(&mut self) -> oneshot::Receiver<()> {
        let (tx, rx) = oneshot::channel();
        self.ready_at = Some(Utc::now());
        self.completion = Some(tx);
        rx
    }

    /// Consumes the completion sender, if any, and fires it. A no-op if
    /// the entry was never marked ready or the receiver was already
    /// dropped (an orphaned wait — see §5's cancellation note).
    pub fn fire(&mut self) {
        if let Some(tx) = self.completion.take() {
            let _ = tx.send(());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_entry_is_not_ready() {
        let entry = QueueEntry::new("alice", "song.flac", "Default");
        assert!(!entry.is_ready());
    }

    #[tokio::test]
    async fn mark_ready_then_fire_resolves_receiver() {
        let mut entry = QueueEntry::new("alice", "song.flac", "Default");
        let rx = entry.mark_ready();
        assert!(entry.is_ready());
        entry.fire();
        assert!(rx.await.is_ok());
    }

    #[test]
    fn fire_without_mark_ready_is_a_noop() {
        let mut entry = QueueEntry::new("alice", "song.flac", "Default");
        entry.fire();
    }
}

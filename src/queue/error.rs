//! Error types for the upload queue.

use thiserror::Error;

/// Errors raised by [`crate::queue::UploadQueue`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum QueueError {
    /// `awaitStart` was called for a (username, filename) pair with no
    /// corresponding enqueued entry.
    #[error("no queue entry for {username}/{masked_filename}")]
    NoSuchEntry {
        /// The username that had no matching entry.
        username: String,
        /// The masked filename that had no matching entry.
        masked_filename: String,
    },
}

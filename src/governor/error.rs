//! Error types for the upload governor.

use thiserror::Error;

/// Errors raised by [`crate::governor::UploadGovernor`].
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GovernorError {
    /// The requested group has no bucket and no Default fallback exists.
    #[error("no bucket available for group {0:?}")]
    NoBucketForGroup(Option<String>),
}

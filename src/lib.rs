//! Upload Orchestration Core
//!
//! This library provides the control-plane core for a peer-to-peer file
//! sharing daemon's outbound transfers: admission into per-group queues,
//! per-group byte-rate metering, a durable transfer ledger, and a
//! searchable cache over locally shared files.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//! - [`db`] - SQLite connection and schema management, shared by [`ledger`] and [`share`]
//! - [`ledger`] - Durable transfer record storage and lifecycle queries
//! - [`governor`] - Per-group outbound byte-rate metering
//! - [`queue`] - In-memory admission queue, priority and strategy aware
//! - [`share`] - Indexed, searchable cache over locally shared directories
//! - [`peer`] - Traits for the external collaborators the service calls into
//! - [`service`] - Ties the above into the `Enqueue`/`TryCancel`/`Remove` upload lifecycle
//! - [`config`] - Host-supplied configuration surface
//! - [`error`] - Crate-wide error taxonomy

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod db;
pub mod error;
pub mod governor;
pub mod ledger;
pub mod peer;
pub mod queue;
pub mod service;
pub mod share;

pub use config::UploadOptions;
pub use db::Database;
pub use error::CoreError;
pub use governor::{GovernorConfig, UploadGovernor};
pub use ledger::{LedgerRepository, Transfer, TransferFilter, TransferLedger, TransferState};
pub use peer::{PeerProtocol, Relay, UploadCallbacks, UserService};
pub use queue::{GroupConfig, GroupResolver, GroupSpec, QueueStrategy, UploadQueue};
pub use service::{ServiceError, UploadService};
pub use share::{ScanFilters, Share, SharedFileCache};

//! Upload service: per-transfer lifecycle orchestration (§4.4).
//!
//! [`UploadService`] is the direct generalization of the teacher's
//! `DownloadEngine` + `persistence.rs` pair: a queue-gated background
//! task per item that calls into an external transfer primitive and
//! persists a terminal record through a repository trait. Here the
//! "HTTP client" is [`crate::peer::PeerProtocol`], the "semaphore" is the
//! upload queue's admission slot, and "persistence" is the transfer
//! ledger.

mod error;
mod options;

pub use error::ServiceError;

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::governor::UploadGovernor;
use crate::ledger::{LedgerRepository, Transfer, TransferFilter, TransferState};
use crate::peer::{PeerProtocol, Relay};
use crate::queue::{GroupResolver, UploadQueue};
use crate::share::SharedFileCache;
use options::ServiceCallbacks;

/// Result type for upload service operations.
pub type Result<T> = std::result::Result<T, ServiceError>;

/// Per-transfer lifecycle orchestrator tying together the ledger, the
/// shared-file cache, the governor, the admission queue, and whatever
/// implements the peer-protocol transfer primitive.
pub struct UploadService<R: GroupResolver + 'static> {
    ledger: Arc<dyn LedgerRepository>,
    cache: Arc<SharedFileCache>,
    governor: Arc<UploadGovernor>,
    queue: Arc<UploadQueue<R>>,
    peer: Arc<dyn PeerProtocol>,
    relay: Arc<dyn Relay>,
    cancellations: Arc<DashMap<Uuid, CancellationToken>>,
    master_ct: CancellationToken,
    shutting_down: Arc<AtomicBool>,
}

impl<R: GroupResolver + 'static> UploadService<R> {
    /// Builds a service from its collaborators.
    #[must_use]
    pub fn new(
        ledger: Arc<dyn LedgerRepository>,
        cache: Arc<SharedFileCache>,
        governor: Arc<UploadGovernor>,
        queue: Arc<UploadQueue<R>>,
        peer: Arc<dyn PeerProtocol>,
        relay: Arc<dyn Relay>,
    ) -> Self {
        Self {
            ledger,
            cache,
            governor,
            queue,
            peer,
            relay,
            cancellations: Arc::new(DashMap::new()),
            master_ct: CancellationToken::new(),
            shutting_down: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Looks up a transfer by id.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::Ledger`] if the query fails.
    pub async fn find(&self, id: Uuid) -> Result<Option<Transfer>> {
        Ok(self.ledger.get(id).await?)
    }

    /// Lists transfers matching `filter`.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::Ledger`] if the query fails.
    pub async fn list(&self, filter: &TransferFilter) -> Result<Vec<Transfer>> {
        Ok(self.ledger.list(filter).await?)
    }

    /// Admits a new upload request (§4.4 Enqueue).
    ///
    /// `agent` is `None` for a file served from local disk, or
    /// `Some(agent_name)` for a file resolved through a remote relay
    /// agent.
    ///
    /// Returns the id of the (possibly pre-existing, per the idempotence
    /// property) non-terminal transfer for this `(username,
    /// masked_filename)` pair.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::FileNotShared`] if the file cannot be
    /// resolved, locally or via the relay. Returns
    /// [`ServiceError::Ledger`] if persistence fails.
    #[instrument(skip(self), fields(username, masked_filename, agent))]
    pub async fn enqueue(
        &self,
        username: &str,
        masked_filename: &str,
        agent: Option<&str>,
    ) -> Result<Uuid> {
        let (size, local_path) = self.resolve(masked_filename, agent).await?;

        let filter = TransferFilter::new()
            .username(username)
            .masked_filename(masked_filename)
            .only_active();
        if let Some(existing) = self.ledger.find_one(&filter).await? {
            info!(id = %existing.id, "enqueue is a no-op: an active transfer already exists");
            return Ok(existing.id);
        }

        let transfer = Transfer::new(username, masked_filename, size);
        let transfer = self.ledger.add_or_supersede(transfer).await?;
        let transfer_id = transfer.id;

        let ct = self.master_ct.child_token();
        self.cancellations.insert(transfer_id, ct.clone());

        let group = self.queue_group(username).await;
        self.spawn_transfer(transfer, group, local_path, agent.map(str::to_string), ct);

        Ok(transfer_id)
    }

    async fn queue_group(&self, username: &str) -> Option<String> {
        // The governor must meter against the same group the queue admits
        // into, so this asks the queue's own resolver rather than keeping
        // a second one.
        Some(self.queue.resolve_group(username))
    }

    async fn resolve(
        &self,
        masked_filename: &str,
        agent: Option<&str>,
    ) -> Result<(i64, Option<PathBuf>)> {
        if let Some(agent) = agent {
            return match self.relay.get_file_info(agent, masked_filename).await? {
                Some(length) => Ok((length, None)),
                None => Err(ServiceError::FileNotShared(masked_filename.to_string())),
            };
        }

        let Some(original) = self.cache.resolve(masked_filename).await? else {
            return Err(ServiceError::FileNotShared(masked_filename.to_string()));
        };

        let path = PathBuf::from(&original);
        match tokio::fs::metadata(&path).await {
            Ok(metadata) => Ok((i64::try_from(metadata.len()).unwrap_or(i64::MAX), Some(path))),
            Err(err) => {
                warn!(path = %path.display(), error = %err, "indexed file missing from disk, a rescan is needed");
                Err(ServiceError::FileNotShared(masked_filename.to_string()))
            }
        }
    }

    fn spawn_transfer(
        &self,
        transfer: Transfer,
        group: Option<String>,
        local_path: Option<PathBuf>,
        agent: Option<String>,
        ct: CancellationToken,
    ) {
        let ledger = Arc::clone(&self.ledger);
        let governor = Arc::clone(&self.governor);
        let queue = Arc::clone(&self.queue);
        let peer = Arc::clone(&self.peer);
        let relay = Arc::clone(&self.relay);
        let shutting_down = Arc::clone(&self.shutting_down);
        let cancellations = Arc::clone(&self.cancellations);

        let transfer_id = transfer.id;
        let username = transfer.username.clone();
        let masked_filename = transfer.masked_filename.clone();
        let size = transfer.size;
        let shared_transfer = Arc::new(Mutex::new(transfer));

        tokio::spawn({
            let shared_transfer = Arc::clone(&shared_transfer);
            let ct = ct.clone();
            async move {
                let callbacks: Arc<ServiceCallbacks<R>> = Arc::new(ServiceCallbacks {
                    transfer: Arc::clone(&shared_transfer),
                    group,
                    ledger: Arc::clone(&ledger),
                    governor,
                    queue,
                    relay: Arc::clone(&relay),
                    shutting_down,
                    last_progress_persist: Mutex::new(None),
                    local_path,
                    agent,
                });

                let result = peer
                    .upload(transfer_id, &username, &masked_filename, size, callbacks, ct.clone())
                    .await;

                let mut transfer = shared_transfer.lock().await;
                match result {
                    Ok(completed) => {
                        transfer.bytes_transferred = completed.bytes_transferred;
                        transfer.average_speed = completed.average_speed;
                        transfer.ended_at = Some(crate::ledger::now());
                        if !transfer.state().is_terminal() {
                            transfer.set_state(TransferState::COMPLETED | TransferState::SUCCEEDED);
                        }
                    }
                    Err(err) if ct.is_cancelled() => {
                        transfer.ended_at = Some(crate::ledger::now());
                        transfer.exception = Some(err.to_string());
                        transfer.set_state(TransferState::COMPLETED | TransferState::CANCELLED);
                        relay.try_close_file_stream(&username, transfer_id, Some(&err.to_string())).await;
                    }
                    Err(err) => {
                        transfer.ended_at = Some(crate::ledger::now());
                        transfer.exception = Some(err.to_string());
                        transfer.set_state(TransferState::COMPLETED | TransferState::ERRORED);
                    }
                }

                if let Err(err) = ledger.update(&transfer).await {
                    warn!(id = %transfer_id, error = %err, "failed to persist terminal transfer state");
                }

                cancellations.remove(&transfer_id);
            }
        });
    }

    /// Atomically removes and triggers the cancellation source for
    /// `transfer_id`.
    ///
    /// Returns whether a cancellation was actually issued (`false` if no
    /// such transfer is in flight).
    #[instrument(skip(self))]
    pub fn try_cancel(&self, transfer_id: Uuid) -> bool {
        match self.cancellations.remove(&transfer_id) {
            Some((_, token)) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Soft-deletes a transfer.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::Ledger`] if the transfer is not terminal
    /// (the ledger enforces this) or the update otherwise fails.
    pub async fn remove(&self, id: Uuid) -> Result<()> {
        self.ledger.remove(id).await?;
        Ok(())
    }

    /// Cancels every in-flight transfer. Called on process shutdown.
    pub fn shutdown(&self) {
        self.shutting_down.store(true, Ordering::SeqCst);
        self.master_ct.cancel();
    }
}

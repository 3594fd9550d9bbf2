//! The concrete option bundle the upload service hands to the
//! peer-protocol library for one transfer (§4.4).
//!
//! [`ServiceCallbacks`] implements [`crate::peer::UploadCallbacks`] and
//! closes over everything one transfer's lifetime needs: the governor,
//! the queue, the ledger, and a per-transfer exclusion mutex guarding the
//! in-memory [`Transfer`] snapshot that every callback reads and writes
//! before persisting.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::io::AsyncRead;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{instrument, warn};

use crate::governor::UploadGovernor;
use crate::ledger::{LedgerRepository, Transfer, TransferState};
use crate::peer::{PeerError, ProgressEvent, Relay, TransferStateEvent, UploadCallbacks};
use crate::queue::GroupResolver;
use crate::queue::UploadQueue;

/// Minimum spacing between persisted progress updates (§4.4, §5).
const PROGRESS_COALESCE_INTERVAL: Duration = Duration::from_millis(250);

/// Per-transfer callback bundle. One instance is built per background
/// transfer task and handed to [`crate::peer::PeerProtocol::upload`].
pub(crate) struct ServiceCallbacks<R: GroupResolver> {
    pub(crate) transfer: Arc<Mutex<Transfer>>,
    pub(crate) group: Option<String>,
    pub(crate) ledger: Arc<dyn LedgerRepository>,
    pub(crate) governor: Arc<UploadGovernor>,
    pub(crate) queue: Arc<UploadQueue<R>>,
    pub(crate) relay: Arc<dyn Relay>,
    pub(crate) shutting_down: Arc<AtomicBool>,
    pub(crate) last_progress_persist: Mutex<Option<Instant>>,
    /// Local file path for a locally shared file, `None` for a remote agent.
    pub(crate) local_path: Option<std::path::PathBuf>,
    /// The remote agent name, `None` for a locally shared file.
    pub(crate) agent: Option<String>,
}

impl<R: GroupResolver> ServiceCallbacks<R> {
    async fn persist(&self, transfer: &Transfer) {
        if self.shutting_down.load(Ordering::SeqCst) {
            return;
        }
        if let Err(err) = self.ledger.update(transfer).await {
            warn!(id = %transfer.id, error = %err, "failed to persist transfer update");
        }
    }
}

#[async_trait]
impl<R: GroupResolver> UploadCallbacks for ServiceCallbacks<R> {
    #[instrument(skip(self, event))]
    async fn state_changed(&self, event: TransferStateEvent) {
        let mut transfer = self.transfer.lock().await;
        transfer.set_state(event.state);

        if event.state.contains(TransferState::QUEUED) {
            transfer.enqueued_at = Some(crate::ledger::now());
            self.queue.enqueue(&transfer.username, &transfer.masked_filename).await;
        }

        self.persist(&transfer).await;
    }

    #[instrument(skip(self, event))]
    async fn progress_updated(&self, event: ProgressEvent) {
        let mut gate = self.last_progress_persist.lock().await;
        let now = Instant::now();
        if gate.is_some_and(|last| now.duration_since(last) < PROGRESS_COALESCE_INTERVAL) {
            return;
        }
        *gate = Some(now);
        drop(gate);

        let mut transfer = self.transfer.lock().await;
        transfer.bytes_transferred = event.bytes_transferred;
        transfer.average_speed = event.average_speed;
        self.persist(&transfer).await;
    }

    async fn governor_get_bytes(&self, requested: u64, ct: &CancellationToken) -> Option<u64> {
        let group = self.group.as_deref();
        self.governor.get_bytes(group, requested, ct).await.ok().flatten()
    }

    fn governor_return_bytes(&self, attempted: u64, granted: u64, actual: u64) {
        let group = self.group.as_deref();
        let _ = self.governor.return_bytes(group, attempted, granted, actual);
    }

    async fn slot_awaiter(&self, ct: &CancellationToken) -> Result<(), PeerError> {
        let (username, masked_filename) = {
            let transfer = self.transfer.lock().await;
            (transfer.username.clone(), transfer.masked_filename.clone())
        };
        let rx = self
            .queue
            .await_start(&username, &masked_filename)
            .await
            .map_err(|err| PeerError::Other(err.to_string()))?;

        tokio::select! {
            result = rx => result.map_err(|_| PeerError::Other("admission signal dropped".to_string())),
            () = ct.cancelled() => Err(PeerError::Other("cancelled while awaiting a slot".to_string())),
        }
    }

    async fn slot_released(&self) {
        let (username, masked_filename) = {
            let transfer = self.transfer.lock().await;
            (transfer.username.clone(), transfer.masked_filename.clone())
        };
        self.queue.complete(&username, &masked_filename).await;
    }

    async fn open_input_stream(
        &self,
        offset: i64,
    ) -> Result<Box<dyn AsyncRead + Unpin + Send>, PeerError> {
        use tokio::io::AsyncSeekExt;

        if let Some(path) = &self.local_path {
            let mut file = tokio::fs::File::open(path).await?;
            file.seek(std::io::SeekFrom::Start(u64::try_from(offset).unwrap_or(0))).await?;
            return Ok(Box::new(file));
        }

        let Some(agent) = &self.agent else {
            return Err(PeerError::Other("no local path or relay agent registered for this transfer".to_string()));
        };
        let (transfer_id, masked_filename) = {
            let transfer = self.transfer.lock().await;
            (transfer.id, transfer.masked_filename.clone())
        };
        self.relay.get_file_stream(agent, &masked_filename, offset, transfer_id).await
    }
}

//! Shared test doubles for the upload service's external collaborators.

use std::collections::HashMap;
use std::io::Cursor;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use upload_core::peer::{CompletedTransfer, PeerError, PeerProtocol, Relay, UploadCallbacks, UserService};

/// A [`PeerProtocol`] that drains the callbacks' input stream (local file
/// or relay stream alike) and reports however many bytes it actually read.
pub struct ImmediatePeer;

impl ImmediatePeer {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl PeerProtocol for ImmediatePeer {
    async fn upload(
        &self,
        _transfer_id: Uuid,
        _username: &str,
        _filename: &str,
        size: i64,
        callbacks: Arc<dyn UploadCallbacks>,
        ct: CancellationToken,
    ) -> Result<CompletedTransfer, PeerError> {
        callbacks
            .state_changed(upload_core::peer::TransferStateEvent {
                state: upload_core::ledger::TransferState::QUEUED,
            })
            .await;

        callbacks.slot_awaiter(&ct).await?;

        callbacks
            .state_changed(upload_core::peer::TransferStateEvent {
                state: upload_core::ledger::TransferState::IN_PROGRESS,
            })
            .await;

        if ct.is_cancelled() {
            callbacks.slot_released().await;
            return Err(PeerError::Other("cancelled".to_string()));
        }

        let granted = callbacks
            .governor_get_bytes(u64::try_from(size).unwrap_or(0), &ct)
            .await
            .unwrap_or(0);
        callbacks.governor_return_bytes(granted, granted, granted);

        let mut stream = callbacks.open_input_stream(0).await?;
        let mut buf = Vec::new();
        stream.read_to_end(&mut buf).await?;

        callbacks.slot_released().await;

        Ok(CompletedTransfer {
            bytes_transferred: i64::try_from(buf.len()).unwrap_or(size),
            average_speed: 1_000.0,
        })
    }
}

/// A [`PeerProtocol`] whose transfer blocks on its slot indefinitely,
/// until cancelled — used to exercise `TryCancel`.
pub struct BlockingPeer;

#[async_trait]
impl PeerProtocol for BlockingPeer {
    async fn upload(
        &self,
        _transfer_id: Uuid,
        _username: &str,
        _filename: &str,
        _size: i64,
        callbacks: Arc<dyn UploadCallbacks>,
        ct: CancellationToken,
    ) -> Result<CompletedTransfer, PeerError> {
        callbacks
            .state_changed(upload_core::peer::TransferStateEvent {
                state: upload_core::ledger::TransferState::QUEUED,
            })
            .await;
        callbacks.slot_awaiter(&ct).await?;
        callbacks
            .state_changed(upload_core::peer::TransferStateEvent {
                state: upload_core::ledger::TransferState::IN_PROGRESS,
            })
            .await;

        // Never finishes on its own: stays "in flight" until the caller
        // cancels, exercising `UploadService::try_cancel`.
        ct.cancelled().await;
        callbacks.slot_released().await;
        Err(PeerError::Other("cancelled".to_string()))
    }
}

/// A [`Relay`] that knows about a fixed set of (agent, filename, size)
/// tuples, and serves whatever bytes are registered in `content` for that
/// pair (zero-filled, `size` long, if nothing was registered).
#[derive(Default)]
pub struct StaticRelay {
    pub known: Vec<(String, String, i64)>,
    pub content: HashMap<(String, String), Vec<u8>>,
    pub closes_observed: AtomicU64,
}

#[async_trait]
impl Relay for StaticRelay {
    async fn get_file_info(&self, agent: &str, filename: &str) -> Result<Option<i64>, PeerError> {
        Ok(self
            .known
            .iter()
            .find(|(a, f, _)| a == agent && f == filename)
            .map(|(_, _, size)| *size))
    }

    async fn get_file_stream(
        &self,
        agent: &str,
        filename: &str,
        offset: i64,
        _stream_id: Uuid,
    ) -> Result<Box<dyn AsyncRead + Unpin + Send>, PeerError> {
        let Some((_, _, size)) = self.known.iter().find(|(a, f, _)| a == agent && f == filename) else {
            return Err(PeerError::Other("unknown agent/filename in this test double".to_string()));
        };

        let bytes = self
            .content
            .get(&(agent.to_string(), filename.to_string()))
            .cloned()
            .unwrap_or_else(|| vec![0u8; usize::try_from(*size).unwrap_or(0)]);

        let start = usize::try_from(offset).unwrap_or(0).min(bytes.len());
        Ok(Box::new(Cursor::new(bytes[start..].to_vec())))
    }

    async fn try_close_file_stream(&self, _agent: &str, _stream_id: Uuid, _error: Option<&str>) {
        self.closes_observed.fetch_add(1, Ordering::SeqCst);
    }
}

/// A [`UserService`] that reports everyone ungrouped and unwatched.
#[derive(Default)]
pub struct NullUserService {
    pub watch_called: AtomicBool,
}

#[async_trait]
impl UserService for NullUserService {
    async fn get_group(&self, _username: &str) -> Option<String> {
        None
    }

    async fn is_watched(&self, _username: &str) -> bool {
        false
    }

    async fn watch(&self, _username: &str) -> Result<(), PeerError> {
        self.watch_called.store(true, Ordering::SeqCst);
        Ok(())
    }
}

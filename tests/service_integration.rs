//! End-to-end coverage of [`UploadService`]'s `Enqueue`/`TryCancel`/`Remove`
//! lifecycle against real ledger/cache/queue/governor components and mock
//! external collaborators.

mod support;

use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;
use upload_core::config::UploadOptions;
use upload_core::db::Database;
use upload_core::governor::UploadGovernor;
use upload_core::ledger::{TransferFilter, TransferLedger, TransferState};
use upload_core::queue::UploadQueue;
use upload_core::service::{ServiceError, UploadService};
use upload_core::share::{Share, SharedFileCache};

use support::{BlockingPeer, ImmediatePeer, StaticRelay};

type NoGroup = fn(&str) -> Option<String>;

fn no_group(_: &str) -> Option<String> {
    None
}

async fn new_service(
    peer: Arc<dyn upload_core::peer::PeerProtocol>,
) -> (UploadService<NoGroup>, Arc<SharedFileCache>, TempDir) {
    new_service_with_relay(peer, Arc::new(StaticRelay::default())).await
}

async fn new_service_with_relay(
    peer: Arc<dyn upload_core::peer::PeerProtocol>,
    relay: Arc<StaticRelay>,
) -> (UploadService<NoGroup>, Arc<SharedFileCache>, TempDir) {
    let ledger_db = Database::new_in_memory().await.unwrap();
    let ledger = Arc::new(TransferLedger::new(ledger_db));

    let cache = Arc::new(SharedFileCache::new_in_memory().await.unwrap());

    // Everyone falls back to Default (no_group resolver), so Default needs
    // its own slot budget, exactly like a host wires this from configuration.
    let options = UploadOptions::single_default_group(10, 1_000_000);
    let governor = Arc::new(UploadGovernor::new(options.governor_config()));
    let queue = Arc::new(UploadQueue::new(options.queue_config(), no_group as NoGroup));

    let tmp = TempDir::new().unwrap();
    let service = UploadService::new(ledger, Arc::clone(&cache), governor, queue, peer, relay);
    (service, cache, tmp)
}

async fn share_one_file(cache: &SharedFileCache, dir: &TempDir, contents: &[u8]) -> (String, std::path::PathBuf) {
    let file_path = dir.path().join("song.flac");
    tokio::fs::write(&file_path, contents).await.unwrap();

    let share = Share::new(dir.path().to_path_buf(), "alice_share");
    cache
        .fill(&[share.clone()], upload_core::share::ScanFilters::default())
        .await
        .unwrap();

    let masked = share.mask(&file_path).unwrap();
    (masked, file_path)
}

#[tokio::test]
async fn enqueue_rejects_a_file_not_present_in_the_index() {
    let (service, _cache, _tmp) = new_service(Arc::new(ImmediatePeer::new())).await;

    let result = service.enqueue("alice", "nowhere/ghost.flac", None).await;
    assert!(matches!(result, Err(ServiceError::FileNotShared(_))));
}

#[tokio::test]
async fn enqueue_admits_an_indexed_file_and_reaches_a_succeeded_terminal_state() {
    let (service, cache, tmp) = new_service(Arc::new(ImmediatePeer::new())).await;
    let (masked, _path) = share_one_file(&cache, &tmp, b"hello world").await;

    let id = service.enqueue("alice", &masked, None).await.unwrap();

    let transfer = wait_for_terminal(&service, id).await;
    assert!(transfer.state().contains(TransferState::SUCCEEDED));
    assert_eq!(transfer.bytes_transferred, "hello world".len() as i64);
}

#[tokio::test]
async fn enqueue_is_idempotent_for_an_active_transfer() {
    let (service, cache, tmp) = new_service(Arc::new(BlockingPeer)).await;
    let (masked, _path) = share_one_file(&cache, &tmp, b"data").await;

    let first = service.enqueue("alice", &masked, None).await.unwrap();
    let second = service.enqueue("alice", &masked, None).await.unwrap();
    assert_eq!(first, second);

    let filter = TransferFilter::new().username("alice").masked_filename(masked.as_str());
    let all = service.list(&filter).await.unwrap();
    assert_eq!(all.len(), 1);
}

#[tokio::test]
async fn try_cancel_transitions_an_in_flight_transfer_to_cancelled() {
    let (service, cache, tmp) = new_service(Arc::new(BlockingPeer)).await;
    let (masked, _path) = share_one_file(&cache, &tmp, b"data").await;

    let id = service.enqueue("alice", &masked, None).await.unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;

    assert!(service.try_cancel(id));

    let transfer = wait_for_terminal(&service, id).await;
    assert!(transfer.state().contains(TransferState::CANCELLED));
}

#[tokio::test]
async fn try_cancel_is_false_for_an_unknown_transfer() {
    let (service, _cache, _tmp) = new_service(Arc::new(ImmediatePeer::new())).await;
    assert!(!service.try_cancel(uuid::Uuid::new_v4()));
}

#[tokio::test]
async fn remove_rejects_a_non_terminal_transfer() {
    let (service, cache, tmp) = new_service(Arc::new(BlockingPeer)).await;
    let (masked, _path) = share_one_file(&cache, &tmp, b"data").await;

    let id = service.enqueue("alice", &masked, None).await.unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;

    assert!(service.remove(id).await.is_err());
}

#[tokio::test]
async fn remove_soft_deletes_a_terminal_transfer() {
    let (service, cache, tmp) = new_service(Arc::new(ImmediatePeer::new())).await;
    let (masked, _path) = share_one_file(&cache, &tmp, b"data").await;

    let id = service.enqueue("alice", &masked, None).await.unwrap();

    wait_for_terminal(&service, id).await;
    service.remove(id).await.unwrap();

    let transfer = service.find(id).await.unwrap().unwrap();
    assert!(transfer.removed());
}

#[tokio::test]
async fn enqueue_via_remote_agent_uses_the_relay() {
    let (service, _cache, _tmp) = new_service(Arc::new(ImmediatePeer::new())).await;

    let id = service.enqueue("bob", "missing/on/agent.flac", Some("some_agent")).await;
    assert!(matches!(id, Err(ServiceError::FileNotShared(_))));
}

#[tokio::test]
async fn enqueue_via_remote_agent_streams_bytes_through_the_relay_to_completion() {
    let mut relay = StaticRelay::default();
    relay.known.push(("some_agent".to_string(), "remote/song.flac".to_string(), 4));
    relay
        .content
        .insert(("some_agent".to_string(), "remote/song.flac".to_string()), b"opus".to_vec());

    let (service, _cache, _tmp) = new_service_with_relay(Arc::new(ImmediatePeer::new()), Arc::new(relay)).await;

    let id = service.enqueue("bob", "remote/song.flac", Some("some_agent")).await.unwrap();

    let transfer = wait_for_terminal(&service, id).await;
    assert!(transfer.state().contains(TransferState::SUCCEEDED));
    assert_eq!(transfer.bytes_transferred, 4);
}

async fn wait_for_terminal(service: &UploadService<NoGroup>, id: uuid::Uuid) -> upload_core::ledger::Transfer {
    for _ in 0..200 {
        if let Some(transfer) = service.find(id).await.unwrap() {
            if transfer.state().is_terminal() {
                return transfer;
            }
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("transfer {id} never reached a terminal state");
}

//! Standalone entry point that exercises the parts of the upload core
//! that do not require a host-supplied peer-protocol collaborator: ledger
//! storage, the shared-file cache, and an initial directory scan.
//!
//! A real daemon embeds [`upload_core::service::UploadService`] alongside
//! its own `PeerProtocol`/`Relay`/`UserService` implementations; this
//! binary is a smoke test and a reference for that wiring.

use anyhow::Result;
use clap::Parser;
use tracing::info;
use upload_core::config::UploadOptions;
use upload_core::db::Database;
use upload_core::governor::UploadGovernor;
use upload_core::ledger::TransferLedger;
use upload_core::queue::UploadQueue;
use upload_core::share::{Share, SharedFileCache};

mod cli;

use cli::Args;

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let default_level = if args.quiet {
        "error"
    } else {
        match args.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("upload-cored starting");

    let ledger_db = match &args.ledger_db {
        Some(path) => Database::new(path).await?,
        None => Database::new_in_memory().await?,
    };
    let _ledger = TransferLedger::new(ledger_db);
    info!("transfer ledger ready");

    let cache = match (&args.share_db, &args.share_backup_db) {
        (Some(live), Some(backup)) => SharedFileCache::new(live, backup).await?,
        _ => SharedFileCache::new_in_memory().await?,
    };

    if cache.try_load().await? {
        info!("shared-file index restored from backup");
    }

    if !args.share_dirs.is_empty() {
        let shares: Vec<Share> = args
            .share_dirs
            .iter()
            .map(|path| Share::new(path.clone(), path.display().to_string()))
            .collect();
        cache.fill(&shares, upload_core::share::ScanFilters::default()).await?;
        info!(count = shares.len(), "initial share scan complete");
    }

    let options = UploadOptions::single_default_group(args.global_max_slots, args.default_speed_limit_kbps);
    let _governor = UploadGovernor::new(options.governor_config());
    let _queue = UploadQueue::new(options.queue_config(), |_: &str| -> Option<String> { None });

    info!("upload core initialized; awaiting a host-supplied peer-protocol binding");

    Ok(())
}

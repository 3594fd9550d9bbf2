//! CLI argument definitions using clap derive macros.

use std::path::PathBuf;

use clap::Parser;

/// Upload orchestration daemon for a peer-to-peer file sharing client.
///
/// Owns the transfer ledger, the admission queue, the byte-rate governor,
/// and the shared-file index; a host process supplies the peer-protocol,
/// relay, and user-service collaborators over the library boundary.
#[derive(Parser, Debug)]
#[command(name = "upload-cored")]
#[command(author, version, about)]
pub struct Args {
    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long)]
    pub quiet: bool,

    /// Path to the transfer ledger database (in-memory if omitted)
    #[arg(long)]
    pub ledger_db: Option<PathBuf>,

    /// Path to the live shared-file index database (in-memory if omitted)
    #[arg(long)]
    pub share_db: Option<PathBuf>,

    /// Path to the backup shared-file index database (in-memory if omitted)
    #[arg(long)]
    pub share_backup_db: Option<PathBuf>,

    /// Directories to share, scanned on startup
    #[arg(long = "share-dir")]
    pub share_dirs: Vec<PathBuf>,

    /// Global upload slot ceiling across every group
    #[arg(long, default_value_t = 10)]
    pub global_max_slots: u32,

    /// Default group speed limit in KB/s
    #[arg(long, default_value_t = 0)]
    pub default_speed_limit_kbps: u64,
}

//! In-memory upload admission queue.
//!
//! # Overview
//!
//! [`UploadQueue`] decides which queued upload is admitted next, honouring
//! per-group slot budgets, group priority, and each group's queue
//! strategy. All state lives behind a single `tokio::sync::Mutex` — the
//! generalization of the teacher's "one `SqlitePool` is the serialization
//! point" pattern to "one in-memory exclusion", since this queue is
//! explicitly in-memory (§3) rather than durable.
//!
//! # Example
//!
//! ```
//! use upload_core::queue::{GroupConfig, GroupSpec, QueueStrategy, UploadQueue, DEFAULT_GROUP};
//!
//! # #[tokio::main]
//! # async fn main() {
//! fn no_group(_: &str) -> Option<String> { None }
//! let groups = vec![GroupSpec {
//!     name: DEFAULT_GROUP.to_string(),
//!     priority: 50,
//!     slots: 1,
//!     strategy: QueueStrategy::Fifo,
//! }];
//! let queue = UploadQueue::new(GroupConfig::new(1, groups), no_group as fn(&str) -> Option<String>);
//!
//! queue.enqueue("alice", "song.flac").await;
//! let rx = queue.await_start("alice", "song.flac").await.unwrap();
//! rx.await.unwrap(); // admitted immediately: one free Default slot
//! queue.complete("alice", "song.flac").await;
//! # }
//! ```

mod entry;
mod error;
mod group;

pub use entry::QueueEntry;
pub use error::QueueError;
pub use group::{Group, GroupTable, QueueStrategy};

use std::collections::HashMap;
use std::hash::{Hash, Hasher};

use tokio::sync::{oneshot, Mutex};
use tracing::instrument;

/// Result type for queue operations.
pub type Result<T> = std::result::Result<T, QueueError>;

/// Name every username resolves to when group resolution returns nothing,
/// per §4.3's "enqueue for a username whose group resolution returns
/// empty is mapped to Default".
pub const DEFAULT_GROUP: &str = "Default";

/// Group definitions supplied at construction or reconfiguration time:
/// the global slot ceiling plus every non-Privileged group (the
/// Privileged group is always synthesized — see [`Group::privileged`]).
#[derive(Debug, Clone)]
pub struct GroupConfig {
    global_max_slots: u32,
    groups: Vec<GroupSpec>,
}

/// A single configured group, before Privileged is prepended.
#[derive(Debug, Clone)]
pub struct GroupSpec {
    /// Group name.
    pub name: String,
    /// Admission priority (lower served first).
    pub priority: u32,
    /// Slot budget.
    pub slots: u32,
    /// Queue discipline.
    pub strategy: QueueStrategy,
}

impl GroupConfig {
    /// Builds a config from the global slot ceiling and the non-Privileged
    /// groups.
    #[must_use]
    pub fn new(global_max_slots: u32, groups: Vec<GroupSpec>) -> Self {
        Self {
            global_max_slots,
            groups,
        }
    }

    fn to_groups(&self) -> Vec<Group> {
        self.groups
            .iter()
            .map(|spec| Group::new(spec.name.clone(), spec.priority, spec.slots, spec.strategy))
            .collect()
    }

    fn hash_digest(&self) -> u64 {
        let mut entries: Vec<_> = self.groups.iter().collect();
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        self.global_max_slots.hash(&mut hasher);
        for spec in entries {
            spec.name.hash(&mut hasher);
            spec.priority.hash(&mut hasher);
            spec.slots.hash(&mut hasher);
            (spec.strategy == QueueStrategy::Fifo).hash(&mut hasher);
        }
        hasher.finish()
    }
}

/// Resolves a username to a group name, mirroring the external user
/// service's `getGroup`. Synchronous: in the real deployment this reads a
/// locally cached mapping kept current by the user-service collaborator,
/// not a network call on the admission hot path.
pub trait GroupResolver: Send + Sync {
    /// Returns the configured group name for `username`, or `None` if
    /// unmapped (callers treat `None` as [`DEFAULT_GROUP`]).
    fn resolve_group(&self, username: &str) -> Option<String>;
}

impl<F> GroupResolver for F
where
    F: Fn(&str) -> Option<String> + Send + Sync,
{
    fn resolve_group(&self, username: &str) -> Option<String> {
        self(username)
    }
}

struct QueueState {
    groups: GroupTable,
    entries: HashMap<(String, String), QueueEntry>,
    config_digest: u64,
}

/// In-memory, mutex-guarded admission queue.
pub struct UploadQueue<R: GroupResolver> {
    state: Mutex<QueueState>,
    resolver: R,
}

impl<R: GroupResolver> UploadQueue<R> {
    /// Builds a queue from group configuration and a group resolver.
    #[must_use]
    pub fn new(config: GroupConfig, resolver: R) -> Self {
        let state = QueueState {
            groups: GroupTable::new(config.global_max_slots, config.to_groups()),
            entries: HashMap::new(),
            config_digest: config.hash_digest(),
        };
        Self {
            state: Mutex::new(state),
            resolver,
        }
    }

    fn group_for(&self, resolver: &R, username: &str) -> String {
        resolver
            .resolve_group(username)
            .unwrap_or_else(|| DEFAULT_GROUP.to_string())
    }

    /// Resolves `username` to the group name it would be enqueued under,
    /// without registering an entry. Lets other collaborators (the
    /// governor) meter against the same group the queue admits into.
    #[must_use]
    pub fn resolve_group(&self, username: &str) -> String {
        self.group_for(&self.resolver, username)
    }

    /// Registers a new entry in the user's group list, then runs an
    /// admission pass.
    #[instrument(skip(self), fields(username, masked_filename))]
    pub async fn enqueue(&self, username: &str, masked_filename: &str) {
        let group = self.group_for(&self.resolver, username);
        let mut state = self.state.lock().await;
        let key = (username.to_string(), masked_filename.to_string());
        state.entries.entry(key).or_insert_with(|| {
            QueueEntry::new(username.to_string(), masked_filename.to_string(), group)
        });
        process(&mut state);
    }

    /// Marks the entry ready and returns a one-shot receiver that fires
    /// when it is admitted.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::NoSuchEntry`] if no entry exists for this
    /// (username, filename) pair.
    #[instrument(skip(self), fields(username, masked_filename))]
    pub async fn await_start(
        &self,
        username: &str,
        masked_filename: &str,
    ) -> Result<oneshot::Receiver<()>> {
        let mut state = self.state.lock().await;
        let key = (username.to_string(), masked_filename.to_string());
        let rx = {
            let entry = state.entries.get_mut(&key).ok_or_else(|| QueueError::NoSuchEntry {
                username: username.to_string(),
                masked_filename: masked_filename.to_string(),
            })?;
            entry.mark_ready()
        };
        process(&mut state);
        Ok(rx)
    }

    /// Signals that a previously admitted upload has finished: removes
    /// the entry, decrements its group's used-slot counter (floor 0, a
    /// no-op for an unknown group), and runs an admission pass.
    #[instrument(skip(self), fields(username, masked_filename))]
    pub async fn complete(&self, username: &str, masked_filename: &str) {
        let mut state = self.state.lock().await;
        let key = (username.to_string(), masked_filename.to_string());
        if let Some(entry) = state.entries.remove(&key) {
            state.groups.release_slot(&entry.group);
        }
        process(&mut state);
    }

    /// Sum of used slots across every group.
    pub async fn total_used_slots(&self) -> u32 {
        self.state.lock().await.groups.total_used_slots()
    }

    /// Reconfigures group definitions. If the config's digest is
    /// unchanged, this is a no-op. Otherwise rebuilds the group table,
    /// preserving each surviving group's used-slot counter by name.
    #[instrument(skip(self, config))]
    pub async fn reconfigure(&self, config: &GroupConfig) {
        let mut state = self.state.lock().await;
        let digest = config.hash_digest();
        if state.config_digest == digest {
            return;
        }
        state.groups = state.groups.rebuild(config.global_max_slots, config.to_groups());
        state.config_digest = digest;
        process(&mut state);
    }
}

/// The admission pass (§4.3 step 3-4). Called with the state mutex
/// already held. Keeps admitting, restarting from the highest-priority
/// group each time, until global slots are exhausted or no ready entry
/// remains anywhere.
fn process(state: &mut QueueState) {
    while admit_one(state) {}
}

fn global_cap(state: &QueueState) -> u32 {
    // The global ceiling is whatever the Privileged group's slots were
    // constructed with (it is always seeded from globalMaxSlots).
    state.groups.get("Privileged").map_or(0, |g| g.slots)
}

/// Attempts a single admission. Returns `true` if an entry was admitted
/// (so the caller should try again), `false` once no further admission is
/// possible this pass.
fn admit_one(state: &mut QueueState) -> bool {
    let max_slots = global_cap(state);
    if state.groups.total_used_slots() >= max_slots {
        return false;
    }

    let group_names: Vec<String> = state.groups.iter().map(|g| g.name.clone()).collect();

    for name in group_names {
        if !state.groups.has_free_slot(&name) {
            continue;
        }
        let strategy = match state.groups.get(&name) {
            Some(g) => g.strategy,
            None => continue,
        };

        let selected_key = select_ready_entry(state, &name, strategy);
        if let Some(key) = selected_key {
            if let Some(mut entry) = state.entries.remove(&key) {
                entry.fire();
                state.groups.occupy_slot(&name);
            }
            return true;
        }
    }
    false
}

fn select_ready_entry(
    state: &QueueState,
    group_name: &str,
    strategy: QueueStrategy,
) -> Option<(String, String)> {
    let mut candidates: Vec<(String, String)> = state
        .entries
        .iter()
        .filter(|(_, entry)| entry.group == group_name && entry.is_ready())
        .map(|(key, _)| key.clone())
        .collect();

    match strategy {
        QueueStrategy::Fifo => {
            candidates.sort_by_key(|key| state.entries[key].enqueued_at);
        }
        QueueStrategy::RoundRobin => {
            candidates.sort_by_key(|key| state.entries[key].ready_at);
        }
    }

    candidates.into_iter().next()
}

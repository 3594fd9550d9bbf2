//! Host-supplied configuration surface.
//!
//! The crate does not parse a config file format (§1 Non-goals) — a host
//! process builds [`UploadOptions`] from whatever format it uses and
//! passes it in, the same way the teacher's binary builds its own config
//! struct and hands narrow pieces of it to each subsystem.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::governor::GovernorConfig;
use crate::queue::{GroupConfig, GroupSpec, QueueStrategy, DEFAULT_GROUP};

/// One user-defined (non-Privileged, non-Default, non-Leechers) group's
/// settings, as loaded from the host's configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupSettings {
    /// Group name.
    pub name: String,
    /// Admission priority (lower served first).
    pub priority: u32,
    /// Slot budget.
    pub slots: u32,
    /// Queue discipline.
    pub strategy: QueueStrategy,
    /// Upload speed limit, in kilobytes per second.
    pub speed_limit_kbps: u64,
}

/// Full upload-subsystem configuration: group definitions, the global
/// slot ceiling, and per-group speed limits.
///
/// Only Privileged (priority 0, slots = `global_max_slots`, RoundRobin)
/// is synthesised automatically. Any group an unmapped username could
/// fall back to, `Default` included, must be present in `groups` or
/// entries routed to it will never be admitted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadOptions {
    /// Ceiling on total concurrently admitted uploads, across all groups.
    pub global_max_slots: u32,
    /// Every configured group other than Privileged.
    pub groups: Vec<GroupSettings>,
}

impl UploadOptions {
    /// A minimal configuration: one Default group, FIFO, with the given
    /// slot ceiling and speed limit. Useful for tests and as a fallback.
    #[must_use]
    pub fn single_default_group(global_max_slots: u32, speed_limit_kbps: u64) -> Self {
        Self {
            global_max_slots,
            groups: vec![GroupSettings {
                name: DEFAULT_GROUP.to_string(),
                priority: 50,
                slots: global_max_slots,
                strategy: QueueStrategy::Fifo,
                speed_limit_kbps,
            }],
        }
    }

    /// Projects this configuration into the upload queue's group config.
    #[must_use]
    pub fn queue_config(&self) -> GroupConfig {
        let specs = self
            .groups
            .iter()
            .map(|g| GroupSpec {
                name: g.name.clone(),
                priority: g.priority,
                slots: g.slots,
                strategy: g.strategy,
            })
            .collect();
        GroupConfig::new(self.global_max_slots, specs)
    }

    /// Projects this configuration into the governor's rate table,
    /// converting each group's kilobytes-per-second limit into the
    /// bytes-per-second unit the governor's token buckets use.
    #[must_use]
    pub fn governor_config(&self) -> GovernorConfig {
        let rates: HashMap<String, u64> = self
            .groups
            .iter()
            .map(|g| (g.name.clone(), g.speed_limit_kbps.saturating_mul(1024)))
            .collect();
        GovernorConfig::new(rates)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_default_group_has_one_group_named_default() {
        let options = UploadOptions::single_default_group(10, 500);
        assert_eq!(options.groups.len(), 1);
        assert_eq!(options.groups[0].name, DEFAULT_GROUP);
        assert_eq!(options.groups[0].slots, 10);
    }

    #[test]
    fn queue_config_and_governor_config_build_without_panicking() {
        let options = UploadOptions::single_default_group(10, 500);
        let _queue_config = options.queue_config();
        let _governor_config = options.governor_config();
    }
}

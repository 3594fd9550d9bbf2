//! Group definitions and the admission-ordered group table.

use serde::{Deserialize, Serialize};

/// Per-group queue discipline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueStrategy {
    /// Admit the entry with the earliest `enqueued_at`.
    Fifo,
    /// Admit the entry with the earliest `ready_at` (a weak round-robin
    /// approximation — see the admission protocol in [`super::UploadQueue`]).
    RoundRobin,
}

/// A named admission group: a slot budget, a priority, and a strategy for
/// choosing among its ready entries.
#[derive(Debug, Clone)]
pub struct Group {
    /// Group name. Uniquely identifies the group across reconfiguration.
    pub name: String,
    /// Lower priority value is served first during admission.
    pub priority: u32,
    /// Maximum number of concurrently admitted transfers for this group.
    pub slots: u32,
    /// How the group picks among its ready entries.
    pub strategy: QueueStrategy,
    /// Slots currently occupied by admitted, not-yet-completed transfers.
    pub used_slots: u32,
}

impl Group {
    /// Creates a group with zero used slots.
    #[must_use]
    pub fn new(name: impl Into<String>, priority: u32, slots: u32, strategy: QueueStrategy) -> Self {
        Self {
            name: name.into(),
            priority,
            slots,
            strategy,
            used_slots: 0,
        }
    }

    /// The built-in Privileged group: priority 0, slots equal to the
    /// global maximum, RoundRobin.
    #[must_use]
    pub fn privileged(global_max_slots: u32) -> Self {
        Self::new("Privileged", 0, global_max_slots, QueueStrategy::RoundRobin)
    }

    fn has_free_slot(&self) -> bool {
        self.used_slots < self.slots
    }

    fn occupy_slot(&mut self) {
        self.used_slots += 1;
    }

    /// Decrements the used-slot counter, floored at 0 per §9 (the intended
    /// fix for the source's `min(0, used - 1)` typo).
    fn release_slot(&mut self) {
        self.used_slots = self.used_slots.saturating_sub(1);
    }
}

/// Ordered collection of groups, sorted ascending by priority, as the
/// admission protocol requires.
#[derive(Debug, Clone, Default)]
pub struct GroupTable {
    groups: Vec<Group>,
}

impl GroupTable {
    /// Builds a table from the built-in `Privileged` group plus
    /// caller-supplied groups (`Default`, `Leechers`, and any
    /// user-defined groups), sorting by priority.
    #[must_use]
    pub fn new(global_max_slots: u32, mut configured: Vec<Group>) -> Self {
        let mut groups = vec![Group::privileged(global_max_slots)];
        groups.append(&mut configured);
        groups.sort_by_key(|g| g.priority);
        Self { groups }
    }

    /// Groups in ascending priority order.
    pub fn iter(&self) -> impl Iterator<Item = &Group> {
        self.groups.iter()
    }

    /// Groups in ascending priority order, mutably.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Group> {
        self.groups.iter_mut()
    }

    /// Looks up a group by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Group> {
        self.groups.iter().find(|g| g.name == name)
    }

    fn get_mut(&mut self, name: &str) -> Option<&mut Group> {
        self.groups.iter_mut().find(|g| g.name == name)
    }

    /// Sum of `used_slots` across every group.
    #[must_use]
    pub fn total_used_slots(&self) -> u32 {
        self.groups.iter().map(|g| g.used_slots).sum()
    }

    pub(super) fn has_free_slot(&self, name: &str) -> bool {
        self.get(name).is_some_and(Group::has_free_slot)
    }

    pub(super) fn occupy_slot(&mut self, name: &str) {
        if let Some(group) = self.get_mut(name) {
            group.occupy_slot();
        }
    }

    /// Decrements `name`'s used-slot counter. A no-op if `name` is not a
    /// known group, per §4.3's "complete for an unknown group is a no-op".
    pub(super) fn release_slot(&mut self, name: &str) {
        if let Some(group) = self.get_mut(name) {
            group.release_slot();
        }
    }

    /// Rebuilds the table from fresh configuration, preserving each
    /// surviving group's `used_slots` counter by name (§4.3).
    #[must_use]
    pub fn rebuild(&self, global_max_slots: u32, configured: Vec<Group>) -> Self {
        let mut rebuilt = Self::new(global_max_slots, configured);
        for group in &mut rebuilt.groups {
            if let Some(previous) = self.get(&group.name) {
                group.used_slots = previous.used_slots;
            }
        }
        rebuilt
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn new_table_always_has_privileged_first() {
        let table = GroupTable::new(10, vec![Group::new("Default", 10, 5, QueueStrategy::Fifo)]);
        let names: Vec<_> = table.iter().map(|g| g.name.as_str()).collect();
        assert_eq!(names, vec!["Privileged", "Default"]);
    }

    #[test]
    fn release_slot_on_unknown_group_is_a_noop() {
        let mut table = GroupTable::new(10, vec![]);
        table.release_slot("NoSuchGroup");
        assert_eq!(table.total_used_slots(), 0);
    }

    #[test]
    fn release_slot_floors_at_zero() {
        let mut table = GroupTable::new(10, vec![]);
        table.release_slot("Privileged");
        assert_eq!(table.get("Privileged").unwrap().used_slots, 0);
    }

    #[test]
    fn rebuild_preserves_used_slots_by_name() {
        let mut table = GroupTable::new(10, vec![Group::new("Default", 10, 5, QueueStrategy::Fifo)]);
        table.occupy_slot("Default");
        table.occupy_slot("Default");

        let rebuilt = table.rebuild(10, vec![Group::new("Default", 10, 8, QueueStrategy::Fifo)]);
        assert_eq!(rebuilt.get("Default").unwrap().used_slots, 2);
        assert_eq!(rebuilt.get("Default").unwrap().slots, 8);
    }
}

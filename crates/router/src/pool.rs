// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Priority-pool round robin (spec §4.1): each priority tier owns a fixed
//! pool of entity-id slots, and submissions cycle through that tier's pool
//! to bound per-entity mailbox contention without serializing the whole
//! tier behind a single entity.

use jobmesh_core::Priority;
use std::sync::atomic::{AtomicU32, Ordering};

fn priority_index(priority: Priority) -> usize {
    match priority {
        Priority::Critical => 0,
        Priority::High => 1,
        Priority::Normal => 2,
        Priority::Low => 3,
    }
}

/// One monotonic counter per priority tier (spec §4.1: "the router maintains
/// a monotonic counter `c`; slot = `c mod N_p`").
pub struct PriorityPools {
    counters: [AtomicU32; 4],
}

impl Default for PriorityPools {
    fn default() -> Self {
        Self::new()
    }
}

impl PriorityPools {
    pub fn new() -> Self {
        Self { counters: std::array::from_fn(|_| AtomicU32::new(0)) }
    }

    /// The entity-id a new submission at `priority` routes to: `"job-" + p +
    /// "-" + slot` (spec §4.1).
    pub fn next_entity_id(&self, priority: Priority) -> String {
        let slot_count = priority.slot_count();
        let counter = &self.counters[priority_index(priority)];
        let slot = counter.fetch_add(1, Ordering::Relaxed) % slot_count;
        format!("job-{priority}-{slot}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cycles_through_the_priority_s_slot_count() {
        let pools = PriorityPools::new();
        let ids: Vec<_> = (0..5).map(|_| pools.next_entity_id(Priority::Low)).collect();
        // Priority::Low has exactly one slot, so every submission lands on it.
        assert!(ids.iter().all(|id| id == "job-low-0"));
    }

    #[test]
    fn round_robins_across_all_slots_before_repeating() {
        let pools = PriorityPools::new();
        let ids: Vec<_> = (0..4).map(|_| pools.next_entity_id(Priority::Critical)).collect();
        assert_eq!(ids, vec!["job-critical-0", "job-critical-1", "job-critical-2", "job-critical-3"]);
        assert_eq!(pools.next_entity_id(Priority::Critical), "job-critical-0");
    }

    #[test]
    fn tiers_route_independently() {
        let pools = PriorityPools::new();
        pools.next_entity_id(Priority::High);
        pools.next_entity_id(Priority::High);
        assert_eq!(pools.next_entity_id(Priority::Normal), "job-normal-0");
    }
}

// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The cluster shard map: entity-id -> shard -> runner (spec §4.3).

use jobmesh_core::{Clock, ShardAssignment, ShardGroupId};
use jobmesh_storage::PgStateStore;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

use crate::hash::consistent_hash;
use crate::lock::{AdvisoryLocks, LockError};

#[derive(Debug, Error)]
pub enum ShardMapError {
    #[error("storage error: {0}")]
    Storage(#[from] jobmesh_storage::StorageError),
    #[error("lock error: {0}")]
    Lock(#[from] LockError),
}

/// Per-group shard-count and routing config (spec §4.3 default: 100 shards
/// per group, one group per priority tier, or a single group of N).
#[derive(Debug, Clone)]
pub struct ShardMapConfig {
    pub shards_per_group: u32,
    pub runner_id: String,
}

impl Default for ShardMapConfig {
    fn default() -> Self {
        Self { shards_per_group: 100, runner_id: "runner-local".to_string() }
    }
}

/// Bookkeeping for which `(group, shardId)` pairs this process currently
/// believes it owns. Split out from [`ShardMap`] so the hashing and
/// local-ownership logic can be unit tested without a storage backend.
#[derive(Default)]
struct OwnershipTracker {
    owned: RwLock<HashMap<(ShardGroupId, u32), ()>>,
}

impl OwnershipTracker {
    fn claim(&self, group: ShardGroupId, shard_id: u32) {
        self.owned.write().insert((group, shard_id), ());
    }

    fn release(&self, group: ShardGroupId, shard_id: u32) {
        self.owned.write().remove(&(group, shard_id));
    }

    fn is_local(&self, group: ShardGroupId, shard_id: u32) -> bool {
        self.owned.read().contains_key(&(group, shard_id))
    }
}

/// Owns shard ownership state for this runner process: which shards it
/// currently holds the advisory lock for, and persists assignments so other
/// runners can discover the current owner.
pub struct ShardMap<L: AdvisoryLocks, C: Clock> {
    config: ShardMapConfig,
    locks: Arc<L>,
    storage: Arc<PgStateStore>,
    clock: C,
    tracker: OwnershipTracker,
}

impl<L: AdvisoryLocks, C: Clock> ShardMap<L, C> {
    pub fn new(config: ShardMapConfig, locks: Arc<L>, storage: Arc<PgStateStore>, clock: C) -> Self {
        Self { config, locks, storage, clock, tracker: OwnershipTracker::default() }
    }

    pub fn shard_for(&self, entity_id: &str, group: ShardGroupId) -> u32 {
        consistent_hash(entity_id, group, self.config.shards_per_group)
    }

    /// Whether this runner currently holds the shard owning `entity_id`.
    /// Reflects only what this process has acquired via [`Self::claim_shard`];
    /// does not re-query storage.
    pub fn is_local(&self, entity_id: &str, group: ShardGroupId) -> bool {
        let shard_id = self.shard_for(entity_id, group);
        self.tracker.is_local(group, shard_id)
    }

    /// Attempt to become the owner of `shard_id` within `group`: acquire the
    /// advisory lock, then persist the assignment row. On success this
    /// runner will answer `true` to [`Self::is_local`] for entities hashing
    /// to that shard until [`Self::release_shard`] or a lost lock.
    pub async fn claim_shard(&self, group: ShardGroupId, shard_id: u32) -> Result<bool, ShardMapError> {
        if !self.locks.try_acquire(group, shard_id).await? {
            return Ok(false);
        }
        let assignment = ShardAssignment {
            group,
            shard_id,
            runner_id: self.config.runner_id.clone(),
            lock_token: format!("{}-{}", self.config.runner_id, self.clock.epoch_ms()),
            updated_at: self.clock.epoch_ms(),
        };
        self.storage.upsert_shard_assignment(&assignment).await?;
        self.tracker.claim(group, shard_id);
        Ok(true)
    }

    /// Release ownership of `shard_id`: drop the advisory lock and this
    /// process's local claim. Called on graceful shutdown and shard
    /// rebalancing (spec §4.2 "Graceful shutdown").
    pub async fn release_shard(&self, group: ShardGroupId, shard_id: u32) -> Result<(), ShardMapError> {
        self.locks.release(group, shard_id).await?;
        self.tracker.release(group, shard_id);
        Ok(())
    }

    /// Force-drop and immediately re-attempt ownership of the shard owning
    /// `entity_id`. Backs the `resetJob` admin RPC (spec §6.5) when a shard
    /// appears stuck.
    pub async fn reset_shard(&self, entity_id: &str, group: ShardGroupId) -> Result<bool, ShardMapError> {
        let shard_id = self.shard_for(entity_id, group);
        self.release_shard(group, shard_id).await?;
        self.claim_shard(group, shard_id).await
    }

    /// Last-known persisted owner of `shard_id`, independent of this
    /// process's local claim (useful for routing to a remote owner).
    pub async fn current_owner(&self, group: ShardGroupId, shard_id: u32) -> Result<Option<String>, ShardMapError> {
        Ok(self.storage.shard_assignment(group, shard_id).await?.map(|a| a.runner_id))
    }

    pub fn runner_id(&self) -> &str {
        &self.config.runner_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shard_for_is_deterministic() {
        let config = ShardMapConfig { shards_per_group: 50, runner_id: "runner-a".to_string() };
        let tracker = OwnershipTracker::default();
        let _ = &tracker;
        let a = consistent_hash("job-critical-0", ShardGroupId(0), config.shards_per_group);
        let b = consistent_hash("job-critical-0", ShardGroupId(0), config.shards_per_group);
        assert_eq!(a, b);
    }

    #[test]
    fn ownership_tracker_reports_local_only_after_claim() {
        let tracker = OwnershipTracker::default();
        assert!(!tracker.is_local(ShardGroupId(0), 3));
        tracker.claim(ShardGroupId(0), 3);
        assert!(tracker.is_local(ShardGroupId(0), 3));
        tracker.release(ShardGroupId(0), 3);
        assert!(!tracker.is_local(ShardGroupId(0), 3));
    }

    #[test]
    fn ownership_tracker_distinguishes_groups() {
        let tracker = OwnershipTracker::default();
        tracker.claim(ShardGroupId(0), 3);
        assert!(!tracker.is_local(ShardGroupId(1), 3));
    }
}

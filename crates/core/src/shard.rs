// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shard-routing types shared between the router and the cluster shard map.

use serde::{Deserialize, Serialize};

/// A named partition of the shard space (spec §4.3: one group per priority
/// tier, or a single group if the deployment doesn't need the split).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ShardGroupId(pub u16);

impl std::fmt::Display for ShardGroupId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "group-{}", self.0)
    }
}

/// Where a message for a given entity should be delivered once its shard's
/// owner is known.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunnerAddress {
    pub entity_type: String,
    pub entity_id: String,
    pub shard_id: u32,
    pub runner_host: String,
    pub runner_port: u16,
}

/// A persisted `(group, shardId) -> runnerId` row, held by whichever runner
/// currently owns the advisory lock for it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShardAssignment {
    pub group: ShardGroupId,
    pub shard_id: u32,
    pub runner_id: String,
    /// Opaque token identifying the held advisory lock; changes on every
    /// re-election so stale holders can detect a lost lock.
    pub lock_token: String,
    pub updated_at: u64,
}

impl ShardAssignment {
    pub fn is_owned_by(&self, runner_id: &str) -> bool {
        self.runner_id == runner_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn is_owned_by_compares_runner_id() {
        let assignment = ShardAssignment {
            group: ShardGroupId(0),
            shard_id: 12,
            runner_id: "runner-a".to_string(),
            lock_token: "tok-1".to_string(),
            updated_at: 1_000,
        };
        assert!(assignment.is_owned_by("runner-a"));
        assert!(!assignment.is_owned_by("runner-b"));
    }

    #[test]
    fn shard_group_id_displays_with_prefix() {
        assert_eq!(ShardGroupId(3).to_string(), "group-3");
    }
}

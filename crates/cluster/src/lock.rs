// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shard ownership via session-scoped advisory locks (spec §4.3). Real
//! deployments hold one dedicated Postgres connection per acquired lock
//! (never the shared pool, since pool recycling would silently drop the
//! session and with it the lock) — `PgAdvisoryLocks` does exactly that.
//! `InMemoryLocks` backs tests and single-process deployments with the same
//! acquire/release semantics.

use async_trait::async_trait;
use jobmesh_core::ShardGroupId;
use parking_lot::Mutex;
use sqlx::postgres::PgConnectOptions;
use sqlx::{Connection, PgConnection};
use std::collections::HashMap;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LockError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("lock already held by this process for shard {group:?}/{shard_id}")]
    AlreadyHeld { group: ShardGroupId, shard_id: u32 },
}

/// Maps a `(group, shardId)` pair onto a single 64-bit advisory-lock key.
fn lock_key(group: ShardGroupId, shard_id: u32) -> i64 {
    ((group.0 as i64) << 32) | shard_id as i64
}

/// A provider of session-scoped exclusive locks keyed by `(group, shardId)`.
/// Losing the underlying session (connection drop, process crash) implicitly
/// releases the lock — callers detect that by polling [`Self::is_held`] or by
/// the `hold` future below resolving with an error.
#[async_trait]
pub trait AdvisoryLocks: Send + Sync {
    /// Attempt to acquire the lock for `(group, shard_id)` without blocking.
    /// Returns `true` if acquired, `false` if another holder has it.
    async fn try_acquire(&self, group: ShardGroupId, shard_id: u32) -> Result<bool, LockError>;
    /// Release a lock this process previously acquired. A no-op if not held.
    async fn release(&self, group: ShardGroupId, shard_id: u32) -> Result<(), LockError>;
    /// Whether this process currently believes it holds the lock. Does not
    /// re-verify against the database; a dropped connection won't be
    /// reflected until the next `try_acquire`/explicit health probe.
    fn is_held(&self, group: ShardGroupId, shard_id: u32) -> bool;
}

/// Real advisory-lock provider. Each acquired lock gets its own dedicated
/// `PgConnection` (spec §4.3's "dedicated single-connection DB client"); the
/// connection is kept open for the lifetime of the lock and only used to
/// issue `pg_advisory_unlock` on release or drop.
pub struct PgAdvisoryLocks {
    connect_options: PgConnectOptions,
    held: Mutex<HashMap<(ShardGroupId, u32), PgConnection>>,
}

impl PgAdvisoryLocks {
    pub fn new(connect_options: PgConnectOptions) -> Self {
        Self { connect_options, held: Mutex::new(HashMap::new()) }
    }
}

#[async_trait]
impl AdvisoryLocks for PgAdvisoryLocks {
    async fn try_acquire(&self, group: ShardGroupId, shard_id: u32) -> Result<bool, LockError> {
        if self.is_held(group, shard_id) {
            return Err(LockError::AlreadyHeld { group, shard_id });
        }
        let mut conn = PgConnection::connect_with(&self.connect_options).await?;
        let key = lock_key(group, shard_id);
        let acquired: (bool,) = sqlx::query_as("SELECT pg_try_advisory_lock($1)").bind(key).fetch_one(&mut conn).await?;
        if acquired.0 {
            self.held.lock().insert((group, shard_id), conn);
        }
        Ok(acquired.0)
    }

    async fn release(&self, group: ShardGroupId, shard_id: u32) -> Result<(), LockError> {
        let conn = self.held.lock().remove(&(group, shard_id));
        if let Some(mut conn) = conn {
            let key = lock_key(group, shard_id);
            let _: (bool,) = sqlx::query_as("SELECT pg_advisory_unlock($1)").bind(key).fetch_one(&mut conn).await?;
        }
        Ok(())
    }

    fn is_held(&self, group: ShardGroupId, shard_id: u32) -> bool {
        self.held.lock().contains_key(&(group, shard_id))
    }
}

/// In-process lock provider for tests and single-runner deployments: a
/// single global map guarded by a mutex stands in for Postgres session
/// state. Losing "the connection" has no analog here, so re-election only
/// happens via explicit `release`.
#[derive(Default)]
pub struct InMemoryLocks {
    held_by: Mutex<HashMap<(ShardGroupId, u32), ()>>,
}

impl InMemoryLocks {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AdvisoryLocks for InMemoryLocks {
    async fn try_acquire(&self, group: ShardGroupId, shard_id: u32) -> Result<bool, LockError> {
        let mut held = self.held_by.lock();
        let key = (group, shard_id);
        if held.contains_key(&key) {
            return Ok(false);
        }
        held.insert(key, ());
        Ok(true)
    }

    async fn release(&self, group: ShardGroupId, shard_id: u32) -> Result<(), LockError> {
        self.held_by.lock().remove(&(group, shard_id));
        Ok(())
    }

    fn is_held(&self, group: ShardGroupId, shard_id: u32) -> bool {
        self.held_by.lock().contains_key(&(group, shard_id))
    }
}

// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! DLQ Watcher (spec §4.6): bounded, safe auto-replay of `DlqEntry` rows.
//! Runs only on the leader for its singleton key, paging through tenants and
//! replaying eligible entries with exponential backoff on failure.

use async_trait::async_trait;
use jobmesh_cluster::{AdvisoryLocks, ShardMap};
use jobmesh_core::{Clock, DlqAlertEvent, DlqEntry, Event, JobError, Priority, ShardGroupId};
use jobmesh_storage::PgStateStore;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::event_bus::EventPublisher;

/// Singleton key the shard map checks leadership against (spec §4.7: the
/// watcher "runs only on the leader per shard group").
const SINGLETON_KEY: &str = "dlq-watcher";
const PAGE_SIZE: i64 = 50;
const REPLAY_BACKOFF_FLOOR: Duration = Duration::from_secs(5);
const REPLAY_BACKOFF_CAP: Duration = Duration::from_secs(300);

/// Resubmits a DlqEntry's payload as a fresh job. Implemented by the router
/// crate's `JobService`; kept as a trait here so the engine crate doesn't
/// need to depend on the router.
#[async_trait]
pub trait JobResubmitter: Send + Sync {
    async fn resubmit(&self, tenant_id: &str, job_type: &str, payload: serde_json::Value) -> Result<(), JobError>;
}

pub struct DlqWatcherConfig {
    pub check_interval: Duration,
    pub max_retries: u32,
    pub group: ShardGroupId,
}

impl Default for DlqWatcherConfig {
    fn default() -> Self {
        Self { check_interval: Duration::from_millis(300_000), max_retries: 3, group: ShardGroupId(0) }
    }
}

pub struct DlqWatcher<C: Clock, L> {
    storage: Arc<PgStateStore>,
    shard_map: Arc<ShardMap<L, C>>,
    submitter: Arc<dyn JobResubmitter>,
    events: Arc<dyn EventPublisher>,
    clock: C,
    config: DlqWatcherConfig,
}

impl<C: Clock, L: AdvisoryLocks + Send + Sync + 'static> DlqWatcher<C, L> {
    pub fn new(
        storage: Arc<PgStateStore>,
        shard_map: Arc<ShardMap<L, C>>,
        submitter: Arc<dyn JobResubmitter>,
        events: Arc<dyn EventPublisher>,
        clock: C,
        config: DlqWatcherConfig,
    ) -> Self {
        Self { storage, shard_map, submitter, events, clock, config }
    }

    /// Runs forever; intended to be spawned as a background fiber at service
    /// construction (spec §8 "background fibers").
    pub async fn run(&self) {
        loop {
            tokio::time::sleep(self.config.check_interval).await;
            if !self.shard_map.is_local(SINGLETON_KEY, self.config.group) {
                continue;
            }
            if let Err(e) = self.sweep().await {
                warn!(error = %e, "dlq watcher sweep failed; logged and swallowed per spec");
            }
        }
    }

    async fn sweep(&self) -> Result<(), jobmesh_storage::StorageError> {
        for tenant_id in self.storage.distinct_dlq_tenants().await? {
            let page = self.storage.dlq_page(&tenant_id, self.config.max_retries, PAGE_SIZE).await?;
            for entry in page {
                self.process_entry(entry).await;
            }
        }
        Ok(())
    }

    async fn process_entry(&self, mut entry: DlqEntry) {
        if entry.attempts > self.config.max_retries {
            self.alert(&entry).await;
            return;
        }
        if entry.attempts == self.config.max_retries {
            self.alert(&entry).await;
            entry.attempts += 1;
            if let Err(e) = self.storage.update_dlq_entry(&entry).await {
                warn!(dlq_id = %entry.id, error = %e, "failed to persist dlq watcher alert bookkeeping");
            }
            return;
        }

        let backoff = replay_backoff(entry.attempts, REPLAY_BACKOFF_FLOOR, REPLAY_BACKOFF_CAP);
        tokio::time::sleep(backoff).await;

        match self.submitter.resubmit(&entry.tenant_id, &entry.job_type, entry.payload.clone()).await {
            Ok(()) => {
                entry.mark_replayed(self.clock.epoch_ms());
                info!(dlq_id = %entry.id, tenant_id = %entry.tenant_id, "dlq entry replayed");
            }
            Err(e) => {
                entry.record_failed_replay(e.to_string());
                warn!(dlq_id = %entry.id, error = %e, attempts = entry.attempts, "dlq replay attempt failed");
            }
        }
        if let Err(e) = self.storage.update_dlq_entry(&entry).await {
            warn!(dlq_id = %entry.id, error = %e, "failed to persist dlq replay outcome");
        }
    }

    async fn alert(&self, entry: &DlqEntry) {
        self.events
            .publish(Event::DlqAlert(DlqAlertEvent {
                dlq_id: entry.id,
                tenant_id: entry.tenant_id.clone(),
                attempts: entry.attempts,
                max_retries: self.config.max_retries,
            }))
            .await;
    }
}

/// Exponential backoff between replay attempts, floor 5s cap 5min, jittered
/// full-range like the workflow engine's inner retry (spec §4.6).
fn replay_backoff(attempts: u32, floor: Duration, cap: Duration) -> Duration {
    let exp = floor.as_millis() as u64 * (1u64 << attempts.min(20));
    let capped = exp.min(cap.as_millis() as u64);
    let jitter = if capped == 0 { 0 } else { rand::thread_rng().gen_range(0..=capped) };
    Duration::from_millis(jitter.max(floor.as_millis() as u64 / 5))
}

/// `Priority::Normal` is the fixed priority the watcher resubmits at (spec
/// §4.6: `submit(entry.type, entry.payload, {priority: normal})`).
pub const REPLAY_PRIORITY: Priority = Priority::Normal;

// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `JobService` (spec §6.1): the public submission surface. Routes a
//! `JobEnvelope` to a pooled entity-id, lazily spawns the owning
//! [`JobEntity`] on first use, and exposes the admin surface from spec §6.5
//! on top of the same entity registry.

use async_trait::async_trait;
use dashmap::DashMap;
use jobmesh_cluster::{AdvisoryLocks, ShardMap};
use jobmesh_core::{
    Clock, DlqEntry, DlqErrorReason, DlqId, Event, JobEnvelope, JobError, JobId, JobRecord,
    JobStatus, JobStatusEvent, Progress, ShardGroupId, SubscriptionId,
};
use jobmesh_engine::{
    BroadcastEventBus, EventPublisher, HandlerRegistry, JobEntity, JobEntityHandle, JobHandler,
    JobResubmitter, ProgressHub, REPLAY_PRIORITY,
};
use jobmesh_storage::{Cache, PgStateStore};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::warn;

use crate::pool::PriorityPools;
use crate::retry::with_rpc_retry;

fn validate_envelope(envelope: &JobEnvelope) -> Result<(), JobError> {
    if envelope.job_type.trim().is_empty() {
        return Err(JobError::Validation { message: "job type must not be empty".to_string() });
    }
    Ok(())
}

/// Everything `JobService` needs to spawn an entity, gathered so
/// [`JobService::new`] doesn't take nine positional arguments.
pub struct JobServiceConfig<L: AdvisoryLocks, C: Clock> {
    pub shard_map: Arc<ShardMap<L, C>>,
    pub group: ShardGroupId,
    pub storage: Arc<PgStateStore>,
    pub cache: Arc<dyn Cache>,
    pub progress: Arc<ProgressHub>,
    pub events: Arc<BroadcastEventBus>,
    pub registry: HandlerRegistry,
    pub checkpoint_dir: PathBuf,
    pub clock: C,
}

/// The submission router. Cheap to clone (everything inside is an `Arc` or a
/// concurrent map), so it can be handed to the CLI, the DLQ watcher, and the
/// daemon's RPC listener alike.
pub struct JobService<L: AdvisoryLocks, C: Clock> {
    shard_map: Arc<ShardMap<L, C>>,
    group: ShardGroupId,
    storage: Arc<PgStateStore>,
    cache: Arc<dyn Cache>,
    progress: Arc<ProgressHub>,
    events: Arc<BroadcastEventBus>,
    registry: HandlerRegistry,
    checkpoint_dir: PathBuf,
    clock: C,
    pools: PriorityPools,
    /// Entities this process has spawned, keyed by entity-id. Bounded: the
    /// key space is exactly the sum of every priority's `slot_count()`.
    entities: DashMap<Arc<str>, JobEntityHandle>,
    /// `jobId -> entity-id` routing established at submit time, so `cancel`
    /// and `status` can reach the entity actually holding a job without
    /// broadcasting to the whole pool.
    routes: DashMap<JobId, Arc<str>>,
}

impl<L: AdvisoryLocks + Send + Sync + 'static, C: Clock> JobService<L, C> {
    pub fn new(config: JobServiceConfig<L, C>) -> Self {
        Self {
            shard_map: config.shard_map,
            group: config.group,
            storage: config.storage,
            cache: config.cache,
            progress: config.progress,
            events: config.events,
            registry: config.registry,
            checkpoint_dir: config.checkpoint_dir,
            clock: config.clock,
            pools: PriorityPools::new(),
            entities: DashMap::new(),
            routes: DashMap::new(),
        }
    }

    pub fn register_handler(&self, job_type: impl Into<String>, handler: Arc<dyn JobHandler>) {
        self.registry.register(job_type, handler);
    }

    /// Number of entities this process currently has spawned, used by the
    /// daemon's `polling.alert` monitor as a proxy for queue depth.
    pub fn active_entity_count(&self) -> usize {
        self.entities.len()
    }

    /// `submit(envelope)` -> `{jobId, duplicate}` (spec §6.1), idempotent on
    /// `dedupeKey`.
    pub async fn submit(&self, envelope: JobEnvelope) -> Result<(JobId, bool), JobError> {
        validate_envelope(&envelope)?;

        let entity_id = self.pools.next_entity_id(envelope.priority);
        let handle = self.entity_handle(&entity_id)?;

        let (job_id, duplicate) = with_rpc_retry(|| {
            let handle = handle.clone();
            let envelope = envelope.clone();
            async move { handle.submit(envelope).await }
        })
        .await?;

        self.routes.insert(job_id, Arc::from(entity_id.as_str()));
        Ok((job_id, duplicate))
    }

    /// Submits a batch of envelopes sharing `batch_id`, composing the
    /// per-item dedupe key as `dedupeKey + ":" + index` (spec §4.1).
    /// Concurrency is unbounded over the batch (spec §4.1): every item is
    /// submitted at once rather than one at a time, so one item's slow entity
    /// doesn't stall the rest.
    pub async fn submit_batch(
        &self,
        batch_id: impl Into<String>,
        items: Vec<JobEnvelope>,
    ) -> Vec<Result<(JobId, bool), JobError>> {
        if items.is_empty() {
            return vec![Err(JobError::Validation { message: "batch must not be empty".to_string() })];
        }

        let batch_id = batch_id.into();
        let submissions = items.into_iter().enumerate().map(|(index, mut envelope)| {
            let item_dedupe_key = envelope.batch_item_dedupe_key(index);
            envelope.batch_id = Some(batch_id.clone());
            if let Some(key) = item_dedupe_key {
                envelope.dedupe_key = Some(key);
            }
            self.submit(envelope)
        });

        futures_util::future::join_all(submissions).await
    }

    /// `cancel(jobId)` (spec §6.1). Routes to the owning entity if this
    /// process has one tracked; otherwise falls back to a direct storage
    /// transition for jobs still `queued` (a job this process never saw
    /// `submit` for -- e.g. after a router restart -- can still be cancelled
    /// while queued, just not interrupted mid-flight).
    pub async fn cancel(&self, job_id: JobId) -> Result<(), JobError> {
        if let Some(entity_id) = self.routes.get(&job_id).map(|e| e.value().clone()) {
            let handle = self.entity_handle(&entity_id)?;
            return with_rpc_retry(|| {
                let handle = handle.clone();
                async move { handle.cancel(job_id).await }
            })
            .await;
        }
        self.cancel_untracked(job_id).await
    }

    async fn cancel_untracked(&self, job_id: JobId) -> Result<(), JobError> {
        let mut record = self
            .storage
            .get_job(&job_id)
            .await
            .map_err(|e| JobError::PersistenceError { message: e.to_string() })?
            .ok_or_else(|| JobError::NotFound { id: job_id.to_string() })?;

        if record.is_terminal() {
            return Err(JobError::AlreadyCancelled { id: job_id.to_string() });
        }
        if record.status != JobStatus::Queued {
            return Err(JobError::NotFound { id: job_id.to_string() });
        }

        let now = self.clock.epoch_ms();
        record
            .transition_to(JobStatus::Cancelled, now, None)
            .map_err(|e| JobError::Processing { message: e.to_string() })?;
        self.storage.save_job(&record).await.map_err(|e| JobError::PersistenceError { message: e.to_string() })?;

        self.publish_status(&record).await;
        self.events.publish(Event::JobCancelled { job_id: record.job_id, tenant_id: record.tenant_id.clone() }).await;
        self.progress.finish(&job_id);
        Ok(())
    }

    /// `status(jobId)` (spec §6.1): asks the owning entity first (which
    /// itself checks its cache before storage), falling back straight to
    /// storage for untracked jobs.
    pub async fn status(&self, job_id: JobId) -> Option<JobRecord> {
        if let Some(entity_id) = self.routes.get(&job_id).map(|e| e.value().clone()) {
            if let Ok(handle) = self.entity_handle(&entity_id) {
                if let Some(record) = handle.status(job_id).await {
                    return Some(record);
                }
            }
        }
        self.storage.get_job(&job_id).await.ok().flatten()
    }

    /// `progress(jobId)` (spec §6.1): the last known value plus a live
    /// stream of subsequent updates.
    pub fn progress(&self, job_id: JobId) -> (Option<Progress>, broadcast::Receiver<Progress>) {
        self.progress.subscribe(job_id)
    }

    /// `onStatusChange()` (spec §6.1): every domain event this process
    /// publishes, job or DLQ. The returned `SubscriptionId` is a caller-side
    /// handle for telling subscriptions apart (for logging or later
    /// unsubscribing); it carries no server-side state of its own.
    pub fn on_status_change(&self) -> (SubscriptionId, broadcast::Receiver<Event>) {
        (SubscriptionId::new(), self.events.subscribe())
    }

    /// `replay(dlqId)` (spec §6.5): submit the entry for one more attempt and
    /// mark it replayed, independent of the DLQ watcher's own cadence.
    pub async fn replay(&self, dlq_id: DlqId) -> Result<(), JobError> {
        let mut entry = self
            .storage
            .dlq_entry(&dlq_id)
            .await
            .map_err(|e| JobError::PersistenceError { message: e.to_string() })?
            .ok_or_else(|| JobError::NotFound { id: dlq_id.to_string() })?;

        self.resubmit(&entry.tenant_id, &entry.job_type, entry.payload.clone()).await?;
        entry.mark_replayed(self.clock.epoch_ms());
        self.storage.update_dlq_entry(&entry).await.map_err(|e| JobError::PersistenceError { message: e.to_string() })?;
        Ok(())
    }

    /// `dlq list(tenantId)` (spec §6.5's CLI `dlq list`): pages through a
    /// tenant's dead-lettered entries regardless of replay eligibility,
    /// unlike the watcher's own `maxRetries`-bounded sweep.
    pub async fn dlq_list(&self, tenant_id: &str, limit: i64) -> Result<Vec<DlqEntry>, JobError> {
        self.storage
            .dlq_page(tenant_id, u32::MAX, limit)
            .await
            .map_err(|e| JobError::PersistenceError { message: e.to_string() })
    }

    /// `resetJob(jobId)` (spec §6.5): forces the owning shard to drop and
    /// re-acquire its advisory lock, then drops this process's in-memory
    /// handle so the next access respawns a fresh entity actor. Returns
    /// `NotFound` if no shard this process knows of owns the job -- spec
    /// §6.5's literal wording.
    pub async fn reset_job(&self, job_id: JobId) -> Result<(), JobError> {
        let entity_id = self.routes.get(&job_id).map(|e| e.value().clone()).ok_or_else(|| JobError::NotFound { id: job_id.to_string() })?;

        self.shard_map
            .reset_shard(&entity_id, self.group)
            .await
            .map_err(|e| JobError::PersistenceError { message: e.to_string() })?;
        self.entities.remove(&entity_id);
        Ok(())
    }

    /// `recoverInFlight` (spec §6.5, §8): polls storage for `processing` rows
    /// with no live owner and fails each one into the DLQ -- the "transitions
    /// to failed exactly once" branch of spec §8's round-trip law, rather
    /// than attempting to resume the in-flight attempt in place (see
    /// `DESIGN.md` for why).
    pub async fn recover_in_flight(&self) -> Result<usize, JobError> {
        let orphans = jobmesh_cluster::poll_storage(&self.storage)
            .await
            .map_err(|e| JobError::PersistenceError { message: e.to_string() })?;

        let mut recovered = 0;
        for mut record in orphans {
            let now = self.clock.epoch_ms();
            let err = JobError::Processing {
                message: "orphaned processing row found by the recovery sweep; runner likely crashed mid-attempt".to_string(),
            };
            if let Err(e) = record.transition_to(JobStatus::Failed, now, Some(err.clone())) {
                warn!(job_id = %record.job_id, %e, "orphaned job already left processing; leaving its current status alone");
                continue;
            }
            if let Err(e) = self.storage.save_job(&record).await {
                warn!(job_id = %record.job_id, error = %e, "failed to persist recovery-sweep failure; will retry next sweep");
                continue;
            }

            let dlq_entry = DlqEntry::new(
                record.job_id,
                record.tenant_id.clone(),
                record.job_type.clone(),
                record.payload.clone(),
                DlqErrorReason::Processing,
                now,
            )
            .with_error_history(record.error_history());
            if let Err(e) = self.storage.insert_dlq_entry(&dlq_entry).await {
                warn!(job_id = %record.job_id, error = %e, "failed to persist dlq entry for orphaned job");
            }

            self.publish_status(&record).await;
            self.events.publish(Event::JobFailed { job_id: record.job_id, tenant_id: record.tenant_id.clone(), error: err }).await;
            self.progress.finish(&record.job_id);
            self.routes.remove(&record.job_id);
            recovered += 1;
        }
        Ok(recovered)
    }

    fn entity_handle(&self, entity_id: &str) -> Result<JobEntityHandle, JobError> {
        if let Some(existing) = self.entities.get(entity_id) {
            return Ok(existing.value().clone());
        }

        let handle = JobEntity::spawn(
            entity_id.to_string(),
            self.checkpoint_dir.clone(),
            self.registry.clone(),
            self.storage.clone(),
            self.cache.clone(),
            self.progress.clone(),
            self.events.clone(),
            self.clock.clone(),
        )
        .map_err(|e| JobError::PersistenceError { message: e.to_string() })?;

        let entry = self.entities.entry(Arc::from(entity_id)).or_insert_with(|| handle.clone());
        Ok(entry.value().clone())
    }

    async fn publish_status(&self, record: &JobRecord) {
        self.events
            .publish(Event::JobStatus(JobStatusEvent {
                aggregate_id: record.job_id,
                tenant_id: record.tenant_id.clone(),
                job_type: record.job_type.clone(),
                status: record.status,
                error: record.last_error.clone(),
            }))
            .await;
    }
}

/// Lets the DLQ watcher (`jobmesh_engine::DlqWatcher`) resubmit through this
/// same router without the engine crate depending on it.
#[async_trait]
impl<L: AdvisoryLocks + Send + Sync + 'static, C: Clock> JobResubmitter for JobService<L, C> {
    async fn resubmit(&self, tenant_id: &str, job_type: &str, payload: serde_json::Value) -> Result<(), JobError> {
        let envelope = JobEnvelope {
            job_type: job_type.to_string(),
            payload,
            tenant_id: tenant_id.to_string(),
            priority: REPLAY_PRIORITY,
            max_attempts: 3,
            dedupe_key: None,
            batch_id: None,
            scheduled_at: None,
            duration: jobmesh_core::Duration::Short,
            context: jobmesh_core::RequestContext::default(),
        };
        self.submit(envelope).await.map(|_| ())
    }
}

// `JobService` dispatches through a live `JobEntity` backed by Postgres, so
// exercising `submit`/`cancel`/`status` end-to-end needs a real database --
// that coverage lives in the `tests/specs/job` integration suite rather
// than here, matching `entity.rs`, which carries no unit tests of its own
// for the same reason.
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_envelope_rejects_blank_job_type() {
        let envelope = JobEnvelope::builder().job_type("   ").tenant_id("t1").build();
        assert!(matches!(validate_envelope(&envelope), Err(JobError::Validation { .. })));
    }

    #[test]
    fn validate_envelope_accepts_a_real_job_type() {
        let envelope = JobEnvelope::builder().job_type("email.send").tenant_id("t1").build();
        assert!(validate_envelope(&envelope).is_ok());
    }
}

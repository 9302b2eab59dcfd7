// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The durable workflow envelope (spec §4.4): executes one job attempt
//! sequence to completion, with two layers of retry.
//!
//! The inner loop retries the handler itself, governed by the job's
//! `maxAttempts` and [`JobError::is_retryable`], with jittered exponential
//! backoff. If the inner loop gives up -- either the error is terminal or
//! the retry budget is spent -- the outer layer performs uninterruptible
//! compensation: persist the `Failed` transition and insert a `DlqEntry`,
//! retrying that persistence step itself (it must not silently drop a
//! failed job) before giving up and logging at `error`.

use jobmesh_core::{Clock, DlqEntry, DlqErrorReason, JobError, JobRecord, JobStatus};

use crate::entity::status_event;
use jobmesh_storage::{Checkpoint, CheckpointLog, PgStateStore, StorageError};
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{error, warn};

use crate::event_bus::EventPublisher;
use crate::handler_registry::JobHandler;
use crate::progress::ProgressHub;

const INNER_BACKOFF_BASE_MS: u64 = 100;
const INNER_BACKOFF_CAP_MS: u64 = 30_000;
/// How many times the outer layer retries persisting a terminal failure
/// before giving up and logging loudly. Chosen distinct from the job's own
/// `maxAttempts`: this bounds a defect in our own persistence path, not the
/// handler's.
const OUTER_DEFECT_RETRIES: u32 = 5;

/// Full jitter backoff: a uniform draw in `[0, min(base * 2^attempt, cap)]`,
/// matching spec §4.4/§4.6's "exponential backoff, jittered" language used
/// for both handler retries and DLQ replay.
pub(crate) fn jittered_backoff(attempt: u32, base_ms: u64, cap_ms: u64) -> Duration {
    let exp = base_ms.saturating_mul(1u64 << attempt.min(20)).min(cap_ms);
    let jitter = if exp == 0 { 0 } else { rand::thread_rng().gen_range(0..=exp) };
    Duration::from_millis(jitter)
}

/// What the inner loop should do with a handler's error, decided purely from
/// the record's retry budget and the error's own classification. Split out
/// from [`WorkflowEngine::run`] so the branching can be unit tested without a
/// storage backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum AttemptOutcome {
    RetryInner,
    Terminal,
}

pub(crate) fn classify_attempt(record: &JobRecord, err: &JobError) -> AttemptOutcome {
    if err.is_retryable() && !record.exhausts_retry_budget() {
        AttemptOutcome::RetryInner
    } else {
        AttemptOutcome::Terminal
    }
}

fn dlq_reason_for(error: &JobError) -> DlqErrorReason {
    match error {
        JobError::Validation { .. } => DlqErrorReason::Validation,
        JobError::HandlerMissing { .. } => DlqErrorReason::HandlerMissing,
        JobError::Processing { .. } => DlqErrorReason::Processing,
        JobError::PersistenceError { .. } => DlqErrorReason::PersistenceError,
        _ => DlqErrorReason::MaxRetries,
    }
}

/// Executes one durable workflow run to a terminal outcome: `Complete` on
/// handler success, or `Failed` + a `DlqEntry` once retries are exhausted.
pub struct WorkflowEngine<C: Clock> {
    storage: Arc<PgStateStore>,
    progress: Arc<ProgressHub>,
    events: Arc<dyn EventPublisher>,
    clock: C,
}

impl<C: Clock> WorkflowEngine<C> {
    pub fn new(storage: Arc<PgStateStore>, progress: Arc<ProgressHub>, events: Arc<dyn EventPublisher>, clock: C) -> Self {
        Self { storage, progress, events, clock }
    }

    /// Run `record` (already transitioned to `Processing` by the owning
    /// entity) against `handler` to a terminal status, persisting every
    /// transition via `checkpoint` before it's committed to Postgres so a
    /// crash mid-attempt resumes from the last durable point.
    ///
    /// `cancel` fires on an external `cancel(jobId)` call (spec §4.2's
    /// "interruption" transition); it is raced against both the handler's
    /// execution and the inter-attempt backoff sleep so cancellation takes
    /// effect promptly regardless of which suspension point the job is at.
    pub async fn run(
        &self,
        mut record: JobRecord,
        handler: Arc<dyn JobHandler>,
        checkpoint: &mut CheckpointLog,
        mut cancel: oneshot::Receiver<()>,
    ) -> JobRecord {
        debug_assert_eq!(record.status, JobStatus::Processing);

        loop {
            tokio::select! {
                biased;
                _ = &mut cancel => {
                    return self.cancel(record, checkpoint).await;
                }
                outcome = handler.execute(&record.payload) => {
                    match outcome {
                        Ok(value) => {
                            return self.complete(record, value, checkpoint).await;
                        }
                        Err(err) if classify_attempt(&record, &err) == AttemptOutcome::RetryInner => {
                            record.record_retry_attempt(self.clock.epoch_ms(), err.clone());
                            self.checkpoint_transition(checkpoint, &record);
                            if let Err(e) = self.storage.save_job(&record).await {
                                warn!(job_id = %record.job_id, error = %e, "failed to persist retry attempt, continuing in memory");
                            }
                            self.events.publish(status_event(&record)).await;
                            let backoff = jittered_backoff(record.attempts, INNER_BACKOFF_BASE_MS, INNER_BACKOFF_CAP_MS);
                            tokio::select! {
                                biased;
                                _ = &mut cancel => return self.cancel(record, checkpoint).await,
                                _ = tokio::time::sleep(backoff) => {}
                            }
                        }
                        Err(err) => {
                            return self.fail_and_compensate(record, err, checkpoint).await;
                        }
                    }
                }
            }
        }
    }

    /// Terminal transition for an externally cancelled job: no `DlqEntry`,
    /// heartbeat and progress channel cleanup only (spec §4.2's `cancelled`
    /// row: "clean up heartbeat + progress; emit `status` + `cancelled`
    /// event").
    async fn cancel(&self, mut record: JobRecord, checkpoint: &mut CheckpointLog) -> JobRecord {
        let now = self.clock.epoch_ms();
        if let Err(e) = record.transition_to(JobStatus::Cancelled, now, None) {
            warn!(job_id = %record.job_id, %e, "ignoring invalid transition to cancelled");
        }
        self.checkpoint_transition(checkpoint, &record);
        if let Err(e) = self.storage.save_job(&record).await {
            error!(job_id = %record.job_id, error = %e, "failed to persist cancelled job");
        }
        self.events.publish(status_event(&record)).await;
        self.events
            .publish(jobmesh_core::Event::JobCancelled { job_id: record.job_id, tenant_id: record.tenant_id.clone() })
            .await;
        self.progress.finish(&record.job_id);
        record
    }

    async fn complete(&self, mut record: JobRecord, result: serde_json::Value, checkpoint: &mut CheckpointLog) -> JobRecord {
        let now = self.clock.epoch_ms();
        record.result = Some(result.clone());
        if let Err(e) = record.transition_to(JobStatus::Complete, now, None) {
            warn!(job_id = %record.job_id, %e, "ignoring invalid transition to complete");
        }
        self.checkpoint_transition(checkpoint, &record);
        if let Err(e) = self.storage.save_job(&record).await {
            error!(job_id = %record.job_id, error = %e, "failed to persist completed job");
        }
        self.events.publish(status_event(&record)).await;
        self.events
            .publish(jobmesh_core::Event::JobCompleted {
                job_id: record.job_id,
                tenant_id: record.tenant_id.clone(),
                result: Some(result),
            })
            .await;
        self.progress.finish(&record.job_id);
        record
    }

    /// The retry budget is spent or the error is terminal: transition to
    /// `Failed` and insert a `DlqEntry`. Both writes are retried up to
    /// [`OUTER_DEFECT_RETRIES`] times against our own persistence failures --
    /// a job must never vanish silently because Postgres hiccuped once.
    async fn fail_and_compensate(&self, mut record: JobRecord, err: JobError, checkpoint: &mut CheckpointLog) -> JobRecord {
        let now = self.clock.epoch_ms();
        if let Err(e) = record.transition_to(JobStatus::Failed, now, Some(err.clone())) {
            warn!(job_id = %record.job_id, %e, "ignoring invalid transition to failed");
        }
        self.checkpoint_transition(checkpoint, &record);

        let dlq_entry = DlqEntry::new(
            record.job_id,
            record.tenant_id.clone(),
            record.job_type.clone(),
            record.payload.clone(),
            dlq_reason_for(&err),
            now,
        )
        .with_error_history(record.error_history());

        if self.persist_failure_with_retry(&record, &dlq_entry).await.is_err() {
            error!(
                job_id = %record.job_id,
                "exhausted defect-retry budget persisting failed job and DLQ entry; job state may be stale in storage"
            );
        } else {
            checkpoint.append(&Checkpoint::DlqInserted { job_id: record.job_id, dlq_id: dlq_entry.id }).ok();
        }

        self.events.publish(status_event(&record)).await;
        self.events
            .publish(jobmesh_core::Event::JobFailed { job_id: record.job_id, tenant_id: record.tenant_id.clone(), error: err })
            .await;
        self.progress.finish(&record.job_id);
        record
    }

    async fn persist_failure_with_retry(&self, record: &JobRecord, dlq_entry: &DlqEntry) -> Result<(), StorageError> {
        let mut last_err = None;
        for attempt in 0..OUTER_DEFECT_RETRIES {
            match self.storage.save_job(record).await.and(self.storage.insert_dlq_entry(dlq_entry).await) {
                Ok(()) => return Ok(()),
                Err(e) => {
                    warn!(job_id = %record.job_id, attempt, error = %e, "retrying failed-job persistence");
                    last_err = Some(e);
                    tokio::time::sleep(jittered_backoff(attempt, INNER_BACKOFF_BASE_MS, INNER_BACKOFF_CAP_MS)).await;
                }
            }
        }
        Err(last_err.expect("loop runs at least once"))
    }

    fn checkpoint_transition(&self, checkpoint: &mut CheckpointLog, record: &JobRecord) {
        if let Err(e) = checkpoint.append(&Checkpoint::Transition { job_id: record.job_id, status: record.status }) {
            error!(job_id = %record.job_id, error = %e, "failed to append workflow checkpoint");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_bus::BroadcastEventBus;
    use crate::handler_registry::FnHandler;
    use jobmesh_core::{JobEnvelope, JobId};
    use tempfile::tempdir;

    fn checkpoint_log() -> (CheckpointLog, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let path = dir.path().join("workflow.log");
        (CheckpointLog::open(&path, 0).unwrap(), dir)
    }

    #[test]
    fn jittered_backoff_never_exceeds_cap() {
        for attempt in 0..30 {
            let delay = jittered_backoff(attempt, 100, 30_000);
            assert!(delay.as_millis() <= 30_000);
        }
    }

    #[test]
    fn jittered_backoff_grows_with_attempt_on_average() {
        // Not a strict monotonic guarantee (it's jittered), but the ceiling
        // for attempt 0 must be below the ceiling for attempt 5.
        let low_ceiling = 100u64.saturating_mul(1 << 0u32).min(30_000);
        let high_ceiling = 100u64.saturating_mul(1 << 5u32).min(30_000);
        assert!(low_ceiling < high_ceiling);
    }

    #[test]
    fn dlq_reason_maps_known_error_kinds() {
        assert_eq!(dlq_reason_for(&JobError::Validation { message: "x".into() }), DlqErrorReason::Validation);
        assert_eq!(dlq_reason_for(&JobError::HandlerMissing { job_type: "x".into() }), DlqErrorReason::HandlerMissing);
        assert_eq!(dlq_reason_for(&JobError::Processing { message: "x".into() }), DlqErrorReason::Processing);
        assert_eq!(dlq_reason_for(&JobError::PersistenceError { message: "x".into() }), DlqErrorReason::PersistenceError);
        assert_eq!(dlq_reason_for(&JobError::MaxRetries { attempts: 3 }), DlqErrorReason::MaxRetries);
        assert_eq!(dlq_reason_for(&JobError::Timeout { after_ms: 10 }), DlqErrorReason::MaxRetries);
    }

    #[test]
    fn classify_attempt_retries_while_budget_remains_and_error_is_retryable() {
        let envelope = JobEnvelope::builder().job_type("t").tenant_id("t1").max_attempts(3).build();
        let record = JobRecord::new(JobId::new(), &envelope, 1_000);
        let outcome = classify_attempt(&record, &JobError::Processing { message: "transient".into() });
        assert_eq!(outcome, AttemptOutcome::RetryInner);
    }

    #[test]
    fn classify_attempt_is_terminal_once_retry_budget_exhausted() {
        let envelope = JobEnvelope::builder().job_type("t").tenant_id("t1").max_attempts(1).build();
        let mut record = JobRecord::new(JobId::new(), &envelope, 1_000);
        record.attempts = 1;
        let outcome = classify_attempt(&record, &JobError::Processing { message: "transient".into() });
        assert_eq!(outcome, AttemptOutcome::Terminal);
    }

    #[test]
    fn classify_attempt_is_terminal_for_non_retryable_errors_regardless_of_budget() {
        let envelope = JobEnvelope::builder().job_type("t").tenant_id("t1").max_attempts(5).build();
        let record = JobRecord::new(JobId::new(), &envelope, 1_000);
        let outcome = classify_attempt(&record, &JobError::Validation { message: "bad payload".into() });
        assert_eq!(outcome, AttemptOutcome::Terminal);
    }

    #[test]
    fn checkpoint_transition_appends_one_entry_per_call() {
        let (mut log, _dir) = checkpoint_log();
        let record = JobRecord::new(JobId::new(), &JobEnvelope::builder().job_type("t").tenant_id("t1").build(), 1_000);
        log.append(&Checkpoint::Transition { job_id: record.job_id, status: record.status }).unwrap();
        assert_eq!(log.write_seq(), 1);
    }
}

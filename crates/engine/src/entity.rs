// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `JobEntity`: the per-entity-id actor (spec §4.2). Serializes all
//! processing for one entity-id behind a bounded mailbox, with a fast lane
//! for `status`/`cancel` RPCs so an operator can interrupt or inspect a job
//! while another is in flight.

use jobmesh_core::{Clock, Event, JobEnvelope, JobError, JobId, JobRecord, JobStatus, JobStatusEvent};
use jobmesh_storage::{Cache, CheckpointLog, PgStateStore};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::event_bus::EventPublisher;
use crate::handler_registry::HandlerRegistry;
use crate::progress::ProgressHub;
use crate::workflow::WorkflowEngine;

/// Entity mailbox capacity (spec §4.2: "bounded mailbox (capacity 100)").
pub const MAILBOX_CAPACITY: usize = 100;
/// Heartbeat cache-key TTL (spec §4.2).
pub const HEARTBEAT_TTL: Duration = Duration::from_secs(30);
/// Heartbeat refresh cadence (spec §4.2).
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(10);
/// Default drain timeout on graceful deactivation.
pub const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

struct SubmitCommand {
    envelope: JobEnvelope,
    reply: oneshot::Sender<Result<(JobId, bool), JobError>>,
}

enum ControlCommand {
    Status { job_id: JobId, reply: oneshot::Sender<Option<JobRecord>> },
    Cancel { job_id: JobId, reply: oneshot::Sender<Result<(), JobError>> },
}

/// Cheaply-clonable handle to a running [`JobEntity`]. This is what the
/// router and RPC layer actually hold; the entity itself runs on its own
/// task.
#[derive(Clone)]
pub struct JobEntityHandle {
    entity_id: Arc<str>,
    mailbox_tx: mpsc::Sender<SubmitCommand>,
    control_tx: mpsc::UnboundedSender<ControlCommand>,
}

impl JobEntityHandle {
    pub fn entity_id(&self) -> &str {
        &self.entity_id
    }

    /// Enqueue a job. Fails fast with `MailboxFull` if the bounded mailbox is
    /// saturated (spec §4.2 invariant: "incoming messages beyond capacity
    /// fail fast... transient, retryable by the router").
    pub async fn submit(&self, envelope: JobEnvelope) -> Result<(JobId, bool), JobError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.mailbox_tx
            .try_send(SubmitCommand { envelope, reply: reply_tx })
            .map_err(|_| JobError::MailboxFull { entity_id: self.entity_id.to_string() })?;
        reply_rx.await.map_err(|_| JobError::Processing { message: "entity dropped the reply channel".to_string() })?
    }

    pub async fn status(&self, job_id: JobId) -> Option<JobRecord> {
        let (reply_tx, reply_rx) = oneshot::channel();
        if self.control_tx.send(ControlCommand::Status { job_id, reply: reply_tx }).is_err() {
            return None;
        }
        reply_rx.await.ok().flatten()
    }

    pub async fn cancel(&self, job_id: JobId) -> Result<(), JobError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.control_tx
            .send(ControlCommand::Cancel { job_id, reply: reply_tx })
            .map_err(|_| JobError::NotFound { id: job_id.to_string() })?;
        reply_rx.await.map_err(|_| JobError::Processing { message: "entity dropped the reply channel".to_string() })?
    }
}

struct InFlight {
    job_id: JobId,
    cancel_tx: Option<oneshot::Sender<()>>,
    handle: JoinHandle<JobRecord>,
}

/// The actor loop owning one entity-id's serialized processing.
///
/// Submissions are strictly serialized (`concurrency = 1`): the next queued
/// job isn't dispatched until the current one's [`WorkflowEngine::run`]
/// completes. `status`/`cancel` arrive on a separate unbounded control
/// channel so an operator can interrupt or inspect the in-flight job without
/// waiting behind the submit mailbox.
pub struct JobEntity<C: Clock> {
    entity_id: Arc<str>,
    mailbox_rx: mpsc::Receiver<SubmitCommand>,
    control_rx: mpsc::UnboundedReceiver<ControlCommand>,
    registry: HandlerRegistry,
    storage: Arc<PgStateStore>,
    cache: Arc<dyn Cache>,
    progress: Arc<ProgressHub>,
    workflow: Arc<WorkflowEngine<C>>,
    events: Arc<dyn EventPublisher>,
    checkpoint: Arc<Mutex<CheckpointLog>>,
    clock: C,
    drain_timeout: Duration,
}

impl<C: Clock> JobEntity<C> {
    #[allow(clippy::too_many_arguments)]
    pub fn spawn(
        entity_id: impl Into<Arc<str>>,
        checkpoint_dir: PathBuf,
        registry: HandlerRegistry,
        storage: Arc<PgStateStore>,
        cache: Arc<dyn Cache>,
        progress: Arc<ProgressHub>,
        events: Arc<dyn EventPublisher>,
        clock: C,
    ) -> std::io::Result<JobEntityHandle> {
        let entity_id: Arc<str> = entity_id.into();
        let (mailbox_tx, mailbox_rx) = mpsc::channel(MAILBOX_CAPACITY);
        let (control_tx, control_rx) = mpsc::unbounded_channel();

        let checkpoint_path = checkpoint_dir.join(format!("{entity_id}.log"));
        let checkpoint = CheckpointLog::open(checkpoint_path, 0)
            .map_err(|e| std::io::Error::other(e.to_string()))?;

        let workflow = Arc::new(WorkflowEngine::new(storage.clone(), progress.clone(), events.clone(), clock.clone()));

        let entity = JobEntity {
            entity_id: entity_id.clone(),
            mailbox_rx,
            control_rx,
            registry,
            storage,
            cache,
            progress,
            workflow,
            events,
            checkpoint: Arc::new(Mutex::new(checkpoint)),
            clock,
            drain_timeout: DEFAULT_DRAIN_TIMEOUT,
        };

        tokio::spawn(entity.run());
        Ok(JobEntityHandle { entity_id, mailbox_tx, control_tx })
    }

    async fn run(mut self) {
        let mut in_flight: Option<InFlight> = None;

        loop {
            tokio::select! {
                biased;

                Some(ctrl) = self.control_rx.recv() => {
                    self.handle_control(ctrl, &mut in_flight).await;
                }

                Some(cmd) = self.mailbox_rx.recv(), if in_flight.is_none() => {
                    in_flight = Some(self.start_processing(cmd).await);
                }

                Some(finished) = poll_in_flight(&mut in_flight) => {
                    if let Err(e) = finished {
                        warn!(entity_id = %self.entity_id, error = %e, "in-flight workflow task ended abnormally");
                    }
                    in_flight = None;
                }

                else => break,
            }
        }

        self.drain(in_flight).await;
        info!(entity_id = %self.entity_id, "entity deactivated");
    }

    /// Await the in-flight job up to `drain_timeout` (spec §4.2 "Graceful
    /// shutdown"). A job still running past the timeout is left `processing`
    /// in storage -- the recovery reconciliation sweep re-dispatches it on
    /// the next owning runner.
    async fn drain(&self, in_flight: Option<InFlight>) {
        let Some(job) = in_flight else { return };
        if tokio::time::timeout(self.drain_timeout, job.handle).await.is_err() {
            warn!(
                entity_id = %self.entity_id,
                job_id = %job.job_id,
                "drain timeout exceeded; job left processing for the recovery sweep"
            );
        }
    }

    async fn handle_control(&self, cmd: ControlCommand, in_flight: &mut Option<InFlight>) {
        match cmd {
            ControlCommand::Status { job_id, reply } => {
                let record = self.lookup_status(job_id).await;
                let _ = reply.send(record);
            }
            ControlCommand::Cancel { job_id, reply } => {
                let result = match in_flight {
                    Some(job) if job.job_id == job_id => {
                        if let Some(tx) = job.cancel_tx.take() {
                            let _ = tx.send(());
                            Ok(())
                        } else {
                            Err(JobError::AlreadyCancelled { id: job_id.to_string() })
                        }
                    }
                    _ => match self.storage.get_job(&job_id).await {
                        Ok(Some(record)) if record.status == JobStatus::Queued => Ok(()),
                        Ok(Some(record)) if record.is_terminal() => {
                            Err(JobError::AlreadyCancelled { id: job_id.to_string() })
                        }
                        Ok(_) => Err(JobError::NotFound { id: job_id.to_string() }),
                        Err(e) => Err(JobError::PersistenceError { message: e.to_string() }),
                    },
                };
                let _ = reply.send(result);
            }
        }
    }

    /// Cache-first status lookup (spec §6.2: status cache for 7 days),
    /// falling back to Postgres on a miss.
    async fn lookup_status(&self, job_id: JobId) -> Option<JobRecord> {
        let cache_key = format!("status:{job_id}");
        if let Ok(Some(raw)) = self.cache.get(&cache_key).await {
            if let Ok(record) = serde_json::from_str::<JobRecord>(&raw) {
                return Some(record);
            }
        }
        self.storage.get_job(&job_id).await.ok().flatten()
    }

    async fn start_processing(&self, cmd: SubmitCommand) -> InFlight {
        let now = self.clock.epoch_ms();
        let job_id = JobId::new();
        let unsaved = JobRecord::new(job_id, &cmd.envelope, now);

        let (record, duplicate) = match self.storage.insert_job_or_get_duplicate(&unsaved).await {
            Ok(result) => result,
            Err(e) => {
                let _ = cmd.reply.send(Err(JobError::PersistenceError { message: e.to_string() }));
                return noop_in_flight(job_id, unsaved);
            }
        };

        if duplicate {
            let _ = cmd.reply.send(Ok((record.job_id, true)));
            return noop_in_flight(record.job_id, record);
        }

        let handler = match self.registry.get(&record.job_type) {
            Ok(h) => h,
            Err(err) => {
                let _ = cmd.reply.send(Err(err));
                return noop_in_flight(record.job_id, record);
            }
        };

        let _ = cmd.reply.send(Ok((record.job_id, false)));

        let (cancel_tx, cancel_rx) = oneshot::channel();
        let job_id = record.job_id;

        let mut record = record;
        if let Err(e) = record.transition_to(JobStatus::Processing, now, None) {
            warn!(job_id = %job_id, %e, "ignoring invalid transition to processing");
        }
        if let Err(e) = self.storage.save_job(&record).await {
            warn!(job_id = %job_id, error = %e, "failed to persist processing transition");
        }
        self.events.publish(status_event(&record)).await;

        let workflow = self.workflow.clone();
        let cache = self.cache.clone();
        let entity_id = self.entity_id.clone();
        let keep_alive = cmd.envelope.duration;
        let checkpoint_handle = self.checkpoint.clone();

        let handle = tokio::spawn(async move {
            let heartbeat_key = format!("heartbeat:{job_id}");
            let _ = cache.set(&heartbeat_key, "alive", HEARTBEAT_TTL).await;
            let heartbeat_task = spawn_heartbeat(cache.clone(), heartbeat_key.clone(), keep_alive, entity_id);

            let mut checkpoint = checkpoint_handle.lock().await;
            let finished = workflow.run(record, handler, &mut checkpoint, cancel_rx).await;
            drop(checkpoint);

            heartbeat_task.abort();
            let _ = cache.delete(&heartbeat_key).await;
            finished
        });

        InFlight { job_id, cancel_tx: Some(cancel_tx), handle }
    }
}

/// Builds the generic `job.status` event emitted on every observed
/// transition (spec §4.2's transition table: nearly every row says "emit
/// `status` event" alongside any terminal domain event).
pub(crate) fn status_event(record: &JobRecord) -> Event {
    Event::JobStatus(JobStatusEvent {
        aggregate_id: record.job_id,
        tenant_id: record.tenant_id.clone(),
        job_type: record.job_type.clone(),
        status: record.status,
        error: record.last_error.clone(),
    })
}

/// Wraps an already-resolved record as a completed `InFlight` so callers that
/// bail out before spawning a workflow task (duplicate, missing handler,
/// persistence failure) can still return through the one `InFlight` type.
fn noop_in_flight(job_id: JobId, record: JobRecord) -> InFlight {
    InFlight { job_id, cancel_tx: None, handle: tokio::spawn(async move { record }) }
}

/// Resolves once the in-flight job's task completes, or never if there is no
/// in-flight job -- letting it sit as a disabled branch in the actor's
/// `select!` loop without a separate `if in_flight.is_some()` guard.
async fn poll_in_flight(in_flight: &mut Option<InFlight>) -> Option<Result<JobRecord, tokio::task::JoinError>> {
    match in_flight {
        Some(job) => Some((&mut job.handle).await),
        None => std::future::pending().await,
    }
}

/// Keeps the per-job heartbeat key alive every [`HEARTBEAT_INTERVAL`] while a
/// handler is running, and renews a `duration = long` entity keep-alive key
/// so the owning cluster layer doesn't idle-evict this entity mid-job (spec
/// §4.2 "Keep-alive").
fn spawn_heartbeat(
    cache: Arc<dyn Cache>,
    heartbeat_key: String,
    duration: jobmesh_core::Duration,
    entity_id: Arc<str>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let keep_alive_key = format!("keepalive:{entity_id}");
        loop {
            tokio::time::sleep(HEARTBEAT_INTERVAL).await;
            let _ = cache.touch(&heartbeat_key, HEARTBEAT_TTL).await;
            if duration == jobmesh_core::Duration::Long {
                let _ = cache.set(&keep_alive_key, "alive", HEARTBEAT_TTL).await;
            }
        }
    })
}

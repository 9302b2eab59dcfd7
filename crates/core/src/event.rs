// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Event-bus payloads emitted on job-lifecycle transitions (spec §6.3).

use crate::error::JobError;
use crate::id::{DlqId, JobId};
use crate::status::JobStatus;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Emitted on every status transition, in transition order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStatusEvent {
    pub aggregate_id: JobId,
    pub tenant_id: String,
    #[serde(rename = "type")]
    pub job_type: String,
    pub status: JobStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<JobError>,
}

/// Fired once a DlqEntry crosses `maxRetries` without a successful replay;
/// replay is suppressed after this until an operator intervenes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DlqAlertEvent {
    pub dlq_id: DlqId,
    pub tenant_id: String,
    pub attempts: u32,
    pub max_retries: u32,
}

/// An operational threshold crossing (DLQ size, queue depth, outbox depth,
/// cache hit ratio).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PollingAlertEvent {
    pub metric: String,
    pub value: f64,
    pub threshold: f64,
}

/// The closed set of domain events the engine publishes. `JobStatusEvent` is
/// always paired with the matching `Completed`/`Failed`/`Cancelled` event on
/// a terminal transition; `Custom` lets downstream consumers ignore event
/// kinds they don't recognize instead of failing deserialization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Event {
    #[serde(rename = "job.status")]
    JobStatus(JobStatusEvent),
    #[serde(rename = "job.completed")]
    JobCompleted { job_id: JobId, tenant_id: String, result: Option<Value> },
    #[serde(rename = "job.failed")]
    JobFailed { job_id: JobId, tenant_id: String, error: JobError },
    #[serde(rename = "job.cancelled")]
    JobCancelled { job_id: JobId, tenant_id: String },
    #[serde(rename = "dlq.alert")]
    DlqAlert(DlqAlertEvent),
    #[serde(rename = "polling.alert")]
    PollingAlert(PollingAlertEvent),
    #[serde(other, skip_serializing)]
    Custom,
}

impl Event {
    /// Stable name for structured tracing fields, independent of the serde
    /// wire tag so renaming the wire format doesn't touch log output.
    pub fn name(&self) -> &'static str {
        match self {
            Event::JobStatus(_) => "job.status",
            Event::JobCompleted { .. } => "job.completed",
            Event::JobFailed { .. } => "job.failed",
            Event::JobCancelled { .. } => "job.cancelled",
            Event::DlqAlert(_) => "dlq.alert",
            Event::PollingAlert(_) => "polling.alert",
            Event::Custom => "custom",
        }
    }
}

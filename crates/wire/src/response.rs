// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! RPC responses mirroring spec §4.2/§6.1's return shapes.

use jobmesh_core::{DlqEntry, HistoryEntry, JobError, JobId, JobStatus};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// `status(jobId)` result. Defaults to `{status: queued, attempts: 0,
/// history: []}` for an unknown job (spec §4.2, §7's "status never fails").
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct JobStatusResponse {
    pub job_id: JobId,
    pub status: JobStatus,
    pub attempts: u32,
    pub max_attempts: u32,
    pub history: Vec<HistoryEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<JobError>,
}

impl JobStatusResponse {
    /// The default response for a `jobId` the caller has never heard of.
    pub fn unknown(job_id: JobId) -> Self {
        Self {
            job_id,
            status: JobStatus::Queued,
            attempts: 0,
            max_attempts: 0,
            history: Vec::new(),
            result: None,
            last_error: None,
        }
    }
}

/// One element of the `progress(jobId)` lazy sequence.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProgressUpdate {
    pub pct: u8,
    pub message: String,
}

/// Every response the entity/admin RPC surface returns.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum Response {
    Ok,
    #[serde(rename_all = "camelCase")]
    Submitted { job_id: JobId, duplicate: bool },
    Status(JobStatusResponse),
    Progress(ProgressUpdate),
    /// The `progress` stream has reached a terminal status and will send no
    /// further frames (spec §9 Open Question: stream ends on terminal state).
    ProgressDone,
    Replayed,
    ResetDone,
    #[serde(rename_all = "camelCase")]
    RecoveredCount { count: u64 },
    DlqList(Vec<DlqEntry>),
    Error(JobError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_status_defaults_to_queued_with_empty_history() {
        let response = JobStatusResponse::unknown(JobId::from_string("job-1"));
        assert_eq!(response.status, JobStatus::Queued);
        assert_eq!(response.attempts, 0);
        assert!(response.history.is_empty());
    }

    #[test]
    fn submitted_response_round_trips() {
        let response = Response::Submitted { job_id: JobId::from_string("job-1"), duplicate: true };
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["jobId"], "job-1");
        assert_eq!(json["duplicate"], true);
        let round_tripped: Response = serde_json::from_value(json).unwrap();
        assert_eq!(response, round_tripped);
    }

    #[test]
    fn error_response_carries_job_error() {
        let response = Response::Error(JobError::NotFound { id: "job-1".into() });
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["type"], "Error");
        let round_tripped: Response = serde_json::from_value(json).unwrap();
        assert_eq!(response, round_tripped);
    }
}

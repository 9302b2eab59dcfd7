// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! RPC requests a caller sends to a `JobEntity` (spec §4.2's surface) or to
//! the daemon's admin plane (spec §6.5).

use jobmesh_core::{DlqId, JobEnvelope, JobId};
use serde::{Deserialize, Serialize};

/// Every request the entity/admin RPC surface accepts.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum Request {
    /// `submit(envelope)` -> `{jobId, duplicate}` (spec §4.2).
    Submit { envelope: JobEnvelope },
    /// `status({jobId, tenantId})` -> `JobStatusResponse`.
    #[serde(rename_all = "camelCase")]
    Status { job_id: JobId, tenant_id: String },
    /// `progress({jobId, tenantId})` -> streaming `{pct, message}`; this
    /// request subscribes, the stream is carried out-of-band over the same
    /// connection as a sequence of `Response::Progress` frames.
    #[serde(rename_all = "camelCase")]
    Progress { job_id: JobId, tenant_id: String },
    /// `cancel({jobId, tenantId})` -> `void`.
    #[serde(rename_all = "camelCase")]
    Cancel { job_id: JobId, tenant_id: String },
    /// `replay(dlqId)`: admin surface, spec §6.5.
    #[serde(rename_all = "camelCase")]
    Replay { dlq_id: DlqId },
    /// `resetJob(jobId)`: admin surface, spec §6.5.
    #[serde(rename_all = "camelCase")]
    ResetJob { job_id: JobId },
    /// `recoverInFlight`: admin surface, spec §6.5.
    RecoverInFlight,
    /// `dlq list(tenantId)`: admin surface, spec §6.5's CLI `dlq list`.
    #[serde(rename_all = "camelCase")]
    DlqList { tenant_id: String, limit: i64 },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn submit_request_round_trips_through_json() {
        let envelope = JobEnvelope::builder().job_type("email.send").tenant_id("t1").build();
        let request = Request::Submit { envelope };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["type"], "Submit");
        let round_tripped: Request = serde_json::from_value(json).unwrap();
        assert_eq!(request, round_tripped);
    }

    #[test]
    fn status_request_carries_job_and_tenant() {
        let request = Request::Status { job_id: JobId::from_string("job-1"), tenant_id: "t1".into() };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["jobId"], "job-1");
        assert_eq!(json["tenantId"], "t1");
    }
}

// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Dead-letter entries for jobs that exhausted their retry budget.

use crate::id::{DlqId, JobId};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The classified reason a job landed in the DLQ, persisted as
/// `job_dlq.errorReason`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum DlqErrorReason {
    Validation,
    HandlerMissing,
    Processing,
    PersistenceError,
    #[default]
    MaxRetries,
}

crate::simple_display! {
    DlqErrorReason {
        Validation => "Validation",
        HandlerMissing => "HandlerMissing",
        Processing => "Processing",
        PersistenceError => "PersistenceError",
        MaxRetries => "MaxRetries",
    }
}

/// One entry in `job_dlq` (spec §3's `DlqEntry`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DlqEntry {
    pub id: DlqId,
    pub tenant_id: String,
    /// Always `"job"` today; kept as a field so other source kinds can share
    /// this table without a migration.
    pub source_type: String,
    pub source_id: JobId,
    #[serde(rename = "type")]
    pub job_type: String,
    pub payload: Value,
    pub attempts: u32,
    pub error_reason: DlqErrorReason,
    pub error_history: Vec<String>,
    pub created_at: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replayed_at: Option<u64>,
}

impl DlqEntry {
    pub fn new(
        source_id: JobId,
        tenant_id: impl Into<String>,
        job_type: impl Into<String>,
        payload: Value,
        error_reason: DlqErrorReason,
        now_ms: u64,
    ) -> Self {
        Self {
            id: DlqId::new(),
            tenant_id: tenant_id.into(),
            source_type: "job".to_string(),
            source_id,
            job_type: job_type.into(),
            payload,
            attempts: 0,
            error_reason,
            error_history: Vec::new(),
            created_at: now_ms,
            replayed_at: None,
        }
    }

    /// Attach the originating job's per-attempt error trail (spec §8 scenario
    /// 4's `errorHistory`), collected from `JobRecord::error_history` at the
    /// moment this entry is created.
    pub fn with_error_history(mut self, error_history: Vec<String>) -> Self {
        self.error_history = error_history;
        self
    }

    /// Whether the watcher may still auto-replay this entry (spec §4.6).
    pub fn is_replayable(&self, max_retries: u32) -> bool {
        self.attempts < max_retries
    }

    pub fn record_failed_replay(&mut self, error: impl Into<String>) {
        self.attempts += 1;
        self.error_history.push(error.into());
        self.replayed_at = None;
    }

    pub fn mark_replayed(&mut self, now_ms: u64) {
        self.replayed_at = Some(now_ms);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn is_replayable_respects_max_retries() {
        let mut entry = DlqEntry::new(JobId::new(), "t1", "email.send", Value::Null, DlqErrorReason::MaxRetries, 1_000);
        assert!(entry.is_replayable(3));
        entry.attempts = 3;
        assert!(!entry.is_replayable(3));
    }

    #[test]
    fn record_failed_replay_increments_attempts_and_clears_replayed_at() {
        let mut entry = DlqEntry::new(JobId::new(), "t1", "email.send", Value::Null, DlqErrorReason::Processing, 1_000);
        entry.mark_replayed(1_100);
        entry.record_failed_replay("connection reset");
        assert_eq!(entry.attempts, 1);
        assert_eq!(entry.error_history, vec!["connection reset".to_string()]);
        assert_eq!(entry.replayed_at, None);
    }
}

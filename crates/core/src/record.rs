// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The persisted `JobRecord` and its append-only history.

use crate::error::JobError;
use crate::id::JobId;
use crate::priority::Priority;
use crate::status::JobStatus;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One entry in a `JobRecord`'s append-only `history`.
///
/// Pushed on every observed status occurrence, including same-status retry
/// re-entries (`processing -> processing`) so that the history length tracks
/// attempt count as well as status changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    pub status: JobStatus,
    pub timestamp: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<JobError>,
}

/// Progress reported by a running handler. `pct` is always in `[0, 100]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Progress {
    pct: u8,
    pub message: String,
}

impl Progress {
    /// Clamps `pct` into `[0, 100]`; rejects non-finite input by clamping to
    /// the nearest bound rather than propagating NaN.
    pub fn new(pct: f64, message: impl Into<String>) -> Self {
        let clamped = if pct.is_nan() {
            0.0
        } else {
            pct.clamp(0.0, 100.0)
        };
        Self { pct: clamped.round() as u8, message: message.into() }
    }

    pub fn pct(&self) -> u8 {
        self.pct
    }
}

/// The durable record backing one job's lifecycle (spec §3's `JobRecord`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobRecord {
    pub job_id: JobId,
    pub tenant_id: String,
    #[serde(rename = "type")]
    pub job_type: String,
    pub status: JobStatus,
    pub attempts: u32,
    pub max_attempts: u32,
    pub payload: Value,
    pub priority: Priority,
    pub history: Vec<HistoryEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<JobError>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<Progress>,
    pub created_at: u64,
    pub updated_at: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dedupe_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheduled_at: Option<u64>,
}

/// Error returned when an attempted status mutation would violate the
/// transition graph (spec §3 invariant 1). Per the spec, callers treat this
/// as a no-op and log at `warn`; they do not propagate it to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvalidTransition {
    pub from: JobStatus,
    pub to: JobStatus,
}

impl std::fmt::Display for InvalidTransition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "invalid transition {} -> {}", self.from, self.to)
    }
}

impl std::error::Error for InvalidTransition {}

impl JobRecord {
    /// A brand-new record in the `queued` state with an empty history.
    pub fn new(job_id: JobId, envelope: &crate::envelope::JobEnvelope, now_ms: u64) -> Self {
        let mut record = Self {
            job_id,
            tenant_id: envelope.tenant_id.clone(),
            job_type: envelope.job_type.clone(),
            status: JobStatus::Queued,
            attempts: 0,
            max_attempts: envelope.max_attempts,
            payload: envelope.payload.clone(),
            priority: envelope.priority,
            history: Vec::new(),
            result: None,
            last_error: None,
            progress: None,
            created_at: now_ms,
            updated_at: now_ms,
            completed_at: None,
            dedupe_key: envelope.dedupe_key.clone(),
            batch_id: envelope.batch_id.clone(),
            scheduled_at: envelope.scheduled_at,
        };
        record.push_history(now_ms, None);
        record
    }

    /// Whether this record is in a strictly terminal state (`complete` or
    /// `cancelled`) and may never transition again.
    pub fn is_terminal(&self) -> bool {
        matches!(self.status, JobStatus::Complete | JobStatus::Cancelled)
    }

    fn push_history(&mut self, timestamp: u64, error: Option<JobError>) {
        self.history.push(HistoryEntry { status: self.status, timestamp, error });
    }

    /// Validate and apply `self.status -> to`, appending a history entry.
    /// Invalid transitions are rejected without mutating the record (the
    /// caller is expected to log and continue, per spec §3 invariant 1).
    pub fn transition_to(&mut self, to: JobStatus, now_ms: u64, error: Option<JobError>) -> Result<(), InvalidTransition> {
        if !self.status.can_transition_to(to) {
            return Err(InvalidTransition { from: self.status, to });
        }
        self.status = to;
        self.updated_at = now_ms;
        if to == JobStatus::Complete || to == JobStatus::Cancelled || to == JobStatus::Failed {
            self.completed_at = Some(now_ms);
        }
        self.last_error = error.clone();
        self.push_history(now_ms, error);
        Ok(())
    }

    /// Record the start of a new attempt while remaining in `processing`
    /// (spec §8 scenario 3: a retried attempt appends a second `processing`
    /// history entry without ever visiting `failed`). `error` is the failure
    /// that triggered this retry, kept in `history` so a later DLQ insert can
    /// recover the full per-attempt error trail via [`Self::error_history`].
    pub fn record_retry_attempt(&mut self, now_ms: u64, error: JobError) {
        self.attempts += 1;
        self.updated_at = now_ms;
        self.push_history(now_ms, Some(error));
    }

    /// Every error recorded against this job across its lifetime, in
    /// occurrence order: one per retried attempt plus the terminal failure,
    /// if any (spec §8 scenario 4's `errorHistory`).
    pub fn error_history(&self) -> Vec<String> {
        self.history.iter().filter_map(|entry| entry.error.as_ref().map(ToString::to_string)).collect()
    }

    /// Whether the next failure would exceed the configured retry budget
    /// (spec §3 invariant 3). `attempts` only increments when a retry is
    /// actually taken (`record_retry_attempt`), so the attempt in progress
    /// right now counts as one more than what's recorded.
    pub fn exhausts_retry_budget(&self) -> bool {
        self.attempts + 1 >= self.max_attempts
    }

    pub fn set_progress(&mut self, progress: Progress, now_ms: u64) {
        self.progress = Some(progress);
        self.updated_at = now_ms;
    }
}

#[cfg(test)]
#[path = "record_tests.rs"]
mod tests;

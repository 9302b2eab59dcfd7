// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Closed error taxonomy shared by the router, entities, and workflow engine.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Every error the system can surface to a caller or log to a `JobRecord`.
///
/// Classification (`is_retryable` / `is_terminal`) is pure and total; callers
/// never need to pattern-match to decide whether to retry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum JobError {
    /// Bad input: empty batch, malformed payload.
    Validation { message: String },
    /// No handler registered for the envelope's `type`.
    HandlerMissing { job_type: String },
    /// Job or DLQ entry absent.
    NotFound { id: String },
    /// `cancel` called on a job already in a terminal state.
    AlreadyCancelled { id: String },
    /// Generic transient failure surfaced by a handler.
    Processing { message: String },
    /// The runner that owns the target shard is not reachable.
    RunnerUnavailable { shard_id: u32 },
    /// RPC send exceeded its SLA.
    SendTimeout { after_ms: u64 },
    /// A long-running operation exceeded its allotted time.
    Timeout { after_ms: u64 },
    /// The entity's bounded mailbox is full.
    MailboxFull { entity_id: String },
    /// A durable-state write failed.
    PersistenceError { message: String },
    /// Synthetic: the retry budget was exhausted.
    MaxRetries { attempts: u32 },
}

impl JobError {
    /// Whether the workflow's inner retry loop should reschedule this error.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            JobError::Processing { .. }
                | JobError::RunnerUnavailable { .. }
                | JobError::SendTimeout { .. }
                | JobError::Timeout { .. }
                | JobError::MailboxFull { .. }
                | JobError::PersistenceError { .. }
        )
    }

    /// Whether this error short-circuits straight to compensation /
    /// pre-execution failure without consuming a retry attempt.
    pub fn is_terminal(&self) -> bool {
        !self.is_retryable()
    }

    /// The `errorReason` tag persisted on a [`crate::dlq::DlqEntry`].
    pub fn reason_tag(&self) -> &'static str {
        match self {
            JobError::Validation { .. } => "Validation",
            JobError::HandlerMissing { .. } => "HandlerMissing",
            JobError::NotFound { .. } => "NotFound",
            JobError::AlreadyCancelled { .. } => "AlreadyCancelled",
            JobError::Processing { .. } => "Processing",
            JobError::RunnerUnavailable { .. } => "RunnerUnavailable",
            JobError::SendTimeout { .. } => "SendTimeout",
            JobError::Timeout { .. } => "Timeout",
            JobError::MailboxFull { .. } => "MailboxFull",
            JobError::PersistenceError { .. } => "PersistenceError",
            JobError::MaxRetries { .. } => "MaxRetries",
        }
    }
}

impl fmt::Display for JobError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobError::Validation { message } => write!(f, "validation error: {message}"),
            JobError::HandlerMissing { job_type } => write!(f, "no handler registered for type {job_type:?}"),
            JobError::NotFound { id } => write!(f, "not found: {id}"),
            JobError::AlreadyCancelled { id } => write!(f, "already cancelled: {id}"),
            JobError::Processing { message } => write!(f, "processing error: {message}"),
            JobError::RunnerUnavailable { shard_id } => write!(f, "runner unavailable for shard {shard_id}"),
            JobError::SendTimeout { after_ms } => write!(f, "send timed out after {after_ms}ms"),
            JobError::Timeout { after_ms } => write!(f, "timed out after {after_ms}ms"),
            JobError::MailboxFull { entity_id } => write!(f, "mailbox full for entity {entity_id}"),
            JobError::PersistenceError { message } => write!(f, "persistence error: {message}"),
            JobError::MaxRetries { attempts } => write!(f, "retry budget exhausted after {attempts} attempts"),
        }
    }
}

impl std::error::Error for JobError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[yare::parameterized(
        validation = { JobError::Validation { message: "x".into() }, false },
        handler_missing = { JobError::HandlerMissing { job_type: "x".into() }, false },
        not_found = { JobError::NotFound { id: "x".into() }, false },
        already_cancelled = { JobError::AlreadyCancelled { id: "x".into() }, false },
        processing = { JobError::Processing { message: "x".into() }, true },
        runner_unavailable = { JobError::RunnerUnavailable { shard_id: 1 }, true },
        send_timeout = { JobError::SendTimeout { after_ms: 100 }, true },
        timeout = { JobError::Timeout { after_ms: 100 }, true },
        mailbox_full = { JobError::MailboxFull { entity_id: "x".into() }, true },
        persistence_error = { JobError::PersistenceError { message: "x".into() }, true },
        max_retries = { JobError::MaxRetries { attempts: 3 }, false },
    )]
    fn retryability_matches_taxonomy(err: JobError, retryable: bool) {
        assert_eq!(err.is_retryable(), retryable);
        assert_eq!(err.is_terminal(), !retryable);
    }

    #[test]
    fn reason_tag_is_stable_for_dlq_persistence() {
        assert_eq!(JobError::MaxRetries { attempts: 3 }.reason_tag(), "MaxRetries");
        assert_eq!(JobError::Processing { message: "x".into() }.reason_tag(), "Processing");
    }
}

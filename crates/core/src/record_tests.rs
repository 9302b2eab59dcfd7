// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::envelope::JobEnvelope;

fn envelope() -> JobEnvelope {
    JobEnvelope::builder()
        .job_type("email.send")
        .tenant_id("t1")
        .payload(serde_json::json!({"to": "a@b"}))
        .max_attempts(3)
        .build()
}

#[test]
fn new_record_starts_queued_with_one_history_entry() {
    let record = JobRecord::new(JobId::new(), &envelope(), 1_000);
    assert_eq!(record.status, JobStatus::Queued);
    assert_eq!(record.attempts, 0);
    assert_eq!(record.history.len(), 1);
    assert_eq!(record.history[0].status, JobStatus::Queued);
    assert!(!record.is_terminal());
}

#[test]
fn happy_path_history_matches_scenario_one() {
    // submit -> queued -> processing -> complete.
    let mut record = JobRecord::new(JobId::new(), &envelope(), 1_000);
    record.transition_to(JobStatus::Processing, 1_001, None).unwrap();
    record.transition_to(JobStatus::Complete, 1_050, None).unwrap();

    let statuses: Vec<_> = record.history.iter().map(|h| h.status).collect();
    assert_eq!(statuses, vec![JobStatus::Queued, JobStatus::Processing, JobStatus::Complete]);
    assert!(record.is_terminal());
    assert_eq!(record.completed_at, Some(1_050));
}

#[test]
fn retry_then_succeed_matches_scenario_three() {
    let mut record = JobRecord::new(JobId::new(), &envelope(), 1_000);
    record.transition_to(JobStatus::Processing, 1_001, None).unwrap();
    // Attempt 1 fails transiently; retried without ever visiting `failed`.
    record.record_retry_attempt(1_010, JobError::Processing { message: "transient".to_string() });
    record.transition_to(JobStatus::Complete, 1_020, None).unwrap();

    let statuses: Vec<_> = record.history.iter().map(|h| h.status).collect();
    assert_eq!(
        statuses,
        vec![JobStatus::Queued, JobStatus::Processing, JobStatus::Processing, JobStatus::Complete]
    );
    assert_eq!(record.attempts, 2);
}

#[test]
fn retry_exhaustion_matches_scenario_four() {
    let mut env = envelope();
    env.max_attempts = 2;
    let mut record = JobRecord::new(JobId::new(), &env, 1_000);
    record.transition_to(JobStatus::Processing, 1_001, None).unwrap();
    let retry_err = JobError::Processing { message: "first attempt failed".to_string() };
    record.record_retry_attempt(1_010, retry_err.clone());
    assert!(record.exhausts_retry_budget());

    let err = JobError::MaxRetries { attempts: 2 };
    record.transition_to(JobStatus::Failed, 1_020, Some(err.clone())).unwrap();

    assert_eq!(record.status, JobStatus::Failed);
    assert_eq!(record.last_error, Some(err.clone()));
    assert!(record.result.is_none());
    assert_eq!(record.attempts, 1);
    assert_eq!(record.error_history(), vec![retry_err.to_string(), err.to_string()]);
}

#[test]
fn invalid_transition_is_rejected_without_mutation() {
    let mut record = JobRecord::new(JobId::new(), &envelope(), 1_000);
    let before = record.history.len();
    let result = record.transition_to(JobStatus::Complete, 1_001, None);
    assert!(result.is_err());
    assert_eq!(record.status, JobStatus::Queued);
    assert_eq!(record.history.len(), before);
}

#[test]
fn progress_clamps_out_of_range_and_nan() {
    assert_eq!(Progress::new(150.0, "over").pct(), 100);
    assert_eq!(Progress::new(-10.0, "under").pct(), 0);
    assert_eq!(Progress::new(f64::NAN, "nan").pct(), 0);
    assert_eq!(Progress::new(42.4, "ok").pct(), 42);
}

//! Submit/status round-trip against a real daemon (spec §6.1).

use crate::prelude::*;
use serde_json::Value;

/// A freshly-built `jobmeshd` ships with an empty handler registry (handler
/// registration is an embedding concern, not a daemon-binary one). Submitting
/// any job type therefore exercises the real failure path: the entity
/// executes, finds no handler, and the job lands in `failed` with a
/// `HandlerMissing` error rather than hanging forever.
#[test]
fn submit_with_unknown_job_type_fails_terminally() {
    let Some(postgres_url) = postgres_url() else {
        eprintln!("skipping: JOBMESH_TEST_POSTGRES_URL not set");
        return;
    };
    let daemon = Daemon::start(&postgres_url);

    let submitted: Value = serde_json::from_slice(
        &daemon
            .jobmesh()
            .args(["--format", "json", "submit", "--type", "noop.echo", "--tenant", "acme", "--payload", "{}"])
            .assert()
            .success()
            .get_output()
            .stdout,
    )
    .expect("submit output is valid json");
    let job_id = submitted["jobId"].as_str().expect("jobId present").to_string();

    let reached_failed = wait_for(SPEC_WAIT_MAX_MS, || {
        let output = daemon
            .jobmesh()
            .args(["--format", "json", "status", &job_id, "--tenant", "acme"])
            .assert()
            .success()
            .get_output()
            .stdout
            .clone();
        let status: Value = serde_json::from_slice(&output).expect("status output is valid json");
        status["status"] == "failed"
    });
    assert!(reached_failed, "job with no registered handler should end up failed");
}

/// `status` on a `jobId` the runner never heard of never fails; it returns
/// the documented `queued`-with-empty-history default (spec §4.2, §7).
#[test]
fn status_on_unknown_job_id_returns_queued_default() {
    let Some(postgres_url) = postgres_url() else {
        eprintln!("skipping: JOBMESH_TEST_POSTGRES_URL not set");
        return;
    };
    let daemon = Daemon::start(&postgres_url);

    let output = daemon
        .jobmesh()
        .args(["--format", "json", "status", "job-does-not-exist", "--tenant", "acme"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let status: Value = serde_json::from_slice(&output).expect("status output is valid json");
    similar_asserts::assert_eq!(
        status["status"],
        Value::from("queued"),
        "unknown jobId should default to queued, not an error"
    );
    assert_eq!(status["attempts"], 0);
    assert!(status["history"].as_array().expect("history array").is_empty());
}

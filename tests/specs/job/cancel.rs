//! Cancelling a queued job (spec §4.2: `Queued -> Cancelled` is a legal
//! transition with no retry budget spent).

use crate::prelude::*;
use serde_json::Value;

#[test]
fn cancel_before_scheduled_time_lands_in_cancelled() {
    let Some(postgres_url) = postgres_url() else {
        eprintln!("skipping: JOBMESH_TEST_POSTGRES_URL not set");
        return;
    };
    let daemon = Daemon::start(&postgres_url);

    // Scheduled far in the future so the entity never starts processing it
    // before the cancel RPC arrives.
    let submitted: Value = serde_json::from_slice(
        &daemon
            .jobmesh()
            .args([
                "--format",
                "json",
                "submit",
                "--type",
                "noop.echo",
                "--tenant",
                "acme",
                "--payload",
                "{}",
                "--scheduled-at",
                "99999999999999",
            ])
            .assert()
            .success()
            .get_output()
            .stdout,
    )
    .expect("submit output is valid json");
    let job_id = submitted["jobId"].as_str().expect("jobId present").to_string();

    daemon.jobmesh().args(["--format", "json", "cancel", &job_id, "--tenant", "acme"]).assert().success();

    let cancelled = wait_for(SPEC_WAIT_MAX_MS, || {
        let output = daemon
            .jobmesh()
            .args(["--format", "json", "status", &job_id, "--tenant", "acme"])
            .assert()
            .success()
            .get_output()
            .stdout
            .clone();
        let status: Value = serde_json::from_slice(&output).expect("status output is valid json");
        status["status"] == "cancelled"
    });
    assert!(cancelled, "a scheduled, not-yet-processing job should end up cancelled");
}

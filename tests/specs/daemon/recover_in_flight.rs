//! `recover-in-flight` against a quiescent daemon finds nothing to recover
//! (spec §6.5, §8's reconciliation-sweep invariant: no orphaned `processing`
//! rows means the sweep is a no-op, not an error).

use crate::prelude::*;
use serde_json::Value;

#[test]
fn recover_in_flight_on_quiescent_daemon_recovers_nothing() {
    let Some(postgres_url) = postgres_url() else {
        eprintln!("skipping: JOBMESH_TEST_POSTGRES_URL not set");
        return;
    };
    let daemon = Daemon::start(&postgres_url);

    let output = daemon
        .jobmesh()
        .args(["--format", "json", "recover-in-flight"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let body: Value = serde_json::from_slice(&output).expect("recover-in-flight output is valid json");
    assert_eq!(body["count"], 0);
}

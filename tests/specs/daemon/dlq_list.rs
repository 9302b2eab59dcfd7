//! `dlq list` against a fresh tenant (spec §6.5).

use crate::prelude::*;
use serde_json::Value;

#[test]
fn dlq_list_for_unseen_tenant_is_empty() {
    let Some(postgres_url) = postgres_url() else {
        eprintln!("skipping: JOBMESH_TEST_POSTGRES_URL not set");
        return;
    };
    let daemon = Daemon::start(&postgres_url);

    let output = daemon
        .jobmesh()
        .args(["--format", "json", "dlq-list", "--tenant", "never-seen-this-tenant"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let entries: Value = serde_json::from_slice(&output).expect("dlq-list output is valid json");
    assert!(entries.as_array().expect("dlq list is a json array").is_empty());
}

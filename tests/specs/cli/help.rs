//! `jobmesh --help` doesn't require a running daemon, so it runs
//! unconditionally (no `postgres_url()` gate).

use assert_cmd::Command;

#[test]
fn help_lists_every_subcommand() {
    let assert = Command::cargo_bin("jobmesh").expect("jobmesh binary").arg("--help").assert().success();
    let stdout = String::from_utf8_lossy(&assert.get_output().stdout).into_owned();
    for subcommand in ["submit", "status", "cancel", "replay", "reset-job", "recover-in-flight", "dlq-list"] {
        assert!(stdout.contains(subcommand), "--help should mention `{subcommand}`, got:\n{stdout}");
    }
}

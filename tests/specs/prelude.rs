//! Shared harness for the `tests/specs` integration suite: spawns a real
//! `jobmeshd` against a scratch Postgres database and drives it through the
//! `jobmesh` CLI binary, the same way an operator would.
//!
//! Every spec checks [`postgres_url`] first and returns early if it's unset
//! rather than failing — these tests need a live Postgres instance
//! (`JOBMESH_TEST_POSTGRES_URL`) and CI environments without one configured
//! are "not set up for this", not "broken".

use assert_cmd::Command;
use std::path::PathBuf;
use std::process::Child;
use std::time::{Duration, Instant};

pub const SPEC_WAIT_MAX_MS: u64 = 10_000;

pub fn wait_for(max_ms: u64, mut check: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_millis(max_ms);
    loop {
        if check() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        std::thread::sleep(Duration::from_millis(100));
    }
}

pub fn postgres_url() -> Option<String> {
    std::env::var("JOBMESH_TEST_POSTGRES_URL").ok()
}

/// A running `jobmeshd` bound to a scratch Unix socket, killed on drop.
pub struct Daemon {
    child: Child,
    socket_path: PathBuf,
    _dir: tempfile::TempDir,
}

impl Daemon {
    pub fn start(postgres_url: &str) -> Self {
        let dir = tempfile::tempdir().expect("tempdir for daemon scratch state");
        let socket_path = dir.path().join("jobmeshd.sock");
        let checkpoint_dir = dir.path().join("checkpoints");
        std::fs::create_dir_all(&checkpoint_dir).expect("create checkpoint dir");

        let child = std::process::Command::new(assert_cmd::cargo::cargo_bin("jobmeshd"))
            .env("POSTGRES_URL", postgres_url)
            .env("CLUSTER_TRANSPORT", "socket")
            .env("JOBMESH_SOCKET_PATH", &socket_path)
            .env("JOBMESH_CHECKPOINT_DIR", &checkpoint_dir)
            .env("JOBMESH_RUNNER_ID", format!("spec-runner-{}", std::process::id()))
            .env("RUST_LOG", "warn")
            .spawn()
            .expect("spawn jobmeshd");

        let daemon = Self { child, socket_path, _dir: dir };
        assert!(
            wait_for(SPEC_WAIT_MAX_MS, || daemon.socket_path.exists()),
            "jobmeshd did not bind its socket in time"
        );
        daemon
    }

    /// A `jobmesh` CLI invocation pre-wired to talk to this daemon.
    pub fn jobmesh(&self) -> Command {
        let mut cmd = Command::cargo_bin("jobmesh").expect("jobmesh binary");
        cmd.env("JOBMESH_TRANSPORT", "socket");
        cmd.env("JOBMESH_SOCKET_PATH", &self.socket_path);
        cmd
    }
}

impl Drop for Daemon {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

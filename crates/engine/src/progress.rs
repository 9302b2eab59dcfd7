// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Live progress fan-out for `JobService::progress` (spec §6.1): replays the
//! last persisted value first, then streams subsequent updates as the
//! handler reports them.

use dashmap::DashMap;
use jobmesh_core::{JobId, Progress};
use tokio::sync::broadcast;

/// Per-job capacity for the progress broadcast channel. A slow subscriber
/// that falls this far behind starts missing intermediate updates, which is
/// fine: only the latest value matters to a progress bar.
const CHANNEL_CAPACITY: usize = 16;

struct JobChannel {
    sender: broadcast::Sender<Progress>,
    last: Option<Progress>,
}

/// Holds one broadcast channel per job with in-flight progress updates.
/// Entries are created lazily on first `report` or `subscribe` and dropped
/// once the job reaches a terminal state (spec §6.1: progress stops being
/// emitted after completion).
#[derive(Default)]
pub struct ProgressHub {
    channels: DashMap<JobId, JobChannel>,
}

impl ProgressHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a new progress value for `job_id` and publish it to any live
    /// subscribers.
    pub fn report(&self, job_id: JobId, progress: Progress) {
        let mut channel = self.channels.entry(job_id).or_insert_with(|| JobChannel {
            sender: broadcast::channel(CHANNEL_CAPACITY).0,
            last: None,
        });
        channel.last = Some(progress.clone());
        let _ = channel.sender.send(progress);
    }

    /// Subscribe to live updates for `job_id`, replaying the last known value
    /// first if one exists (spec §6.1: "persisted-value-first-then-live").
    pub fn subscribe(&self, job_id: JobId) -> (Option<Progress>, broadcast::Receiver<Progress>) {
        let channel = self.channels.entry(job_id).or_insert_with(|| JobChannel {
            sender: broadcast::channel(CHANNEL_CAPACITY).0,
            last: None,
        });
        (channel.last.clone(), channel.sender.subscribe())
    }

    /// Drop this job's channel once it reaches a terminal status; called by
    /// the workflow engine after a `Complete`/`Failed`/`Cancelled` transition.
    pub fn finish(&self, job_id: &JobId) {
        self.channels.remove(job_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribe_replays_last_value_then_live_updates() {
        let hub = ProgressHub::new();
        let job_id = JobId::new();
        hub.report(job_id, Progress::new(10.0, "starting"));

        let (last, mut rx) = hub.subscribe(job_id);
        assert_eq!(last.unwrap().pct(), 10);

        hub.report(job_id, Progress::new(50.0, "halfway"));
        let update = rx.recv().await.unwrap();
        assert_eq!(update.pct(), 50);
    }

    #[tokio::test]
    async fn subscribe_before_any_report_has_no_replay_value() {
        let hub = ProgressHub::new();
        let (last, _rx) = hub.subscribe(JobId::new());
        assert!(last.is_none());
    }

    #[test]
    fn finish_drops_the_channel() {
        let hub = ProgressHub::new();
        let job_id = JobId::new();
        hub.report(job_id, Progress::new(100.0, "done"));
        hub.finish(&job_id);
        assert!(hub.channels.is_empty());
    }
}

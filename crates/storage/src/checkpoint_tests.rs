// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use jobmesh_core::JobId;
use std::io::Write;
use tempfile::tempdir;

fn test_checkpoint(job_id: &JobId) -> Checkpoint {
    Checkpoint::Transition { job_id: job_id.clone(), status: JobStatus::Processing }
}

#[test]
fn open_creates_file() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("test.log");

    let log = CheckpointLog::open(&path, 0).unwrap();

    assert!(path.exists());
    assert_eq!(log.write_seq(), 0);
    assert_eq!(log.processed_seq(), 0);
}

#[test]
fn append_and_flush() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("test.log");
    let mut log = CheckpointLog::open(&path, 0).unwrap();

    let job_id = JobId::new();
    let seq1 = log.append(&test_checkpoint(&job_id)).unwrap();
    let seq2 = log.append(&test_checkpoint(&job_id)).unwrap();
    assert_eq!(seq1, 1);
    assert_eq!(seq2, 2);

    log.flush().unwrap();
    let metadata = std::fs::metadata(&path).unwrap();
    assert!(metadata.len() > 0);
}

#[test]
fn next_unprocessed_reads_in_order_then_exhausts() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("test.log");
    let mut log = CheckpointLog::open(&path, 0).unwrap();

    let job_id = JobId::new();
    log.append(&test_checkpoint(&job_id)).unwrap();
    log.append(&test_checkpoint(&job_id)).unwrap();

    let entry1 = log.next_unprocessed().unwrap().unwrap();
    assert_eq!(entry1.seq, 1);
    let entry2 = log.next_unprocessed().unwrap().unwrap();
    assert_eq!(entry2.seq, 2);
    assert!(log.next_unprocessed().unwrap().is_none());
}

#[test]
fn mark_processed_advances_processed_seq() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("test.log");
    let mut log = CheckpointLog::open(&path, 0).unwrap();

    log.append(&test_checkpoint(&JobId::new())).unwrap();
    log.flush().unwrap();

    let entry = log.next_unprocessed().unwrap().unwrap();
    log.mark_processed(entry.seq);
    assert_eq!(log.processed_seq(), 1);
}

#[test]
fn reopen_with_processed_seq_skips_already_applied_entries() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("test.log");
    let job_id = JobId::new();

    {
        let mut log = CheckpointLog::open(&path, 0).unwrap();
        log.append(&test_checkpoint(&job_id)).unwrap();
        log.append(&test_checkpoint(&job_id)).unwrap();
        log.append(&test_checkpoint(&job_id)).unwrap();
        log.flush().unwrap();
    }

    let mut log = CheckpointLog::open(&path, 2).unwrap();
    let entry = log.next_unprocessed().unwrap().unwrap();
    assert_eq!(entry.seq, 3);
    assert!(log.next_unprocessed().unwrap().is_none());
}

#[test]
fn entries_after_returns_suffix() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("test.log");
    let job_id = JobId::new();
    let mut log = CheckpointLog::open(&path, 0).unwrap();
    log.append(&test_checkpoint(&job_id)).unwrap();
    log.append(&test_checkpoint(&job_id)).unwrap();
    log.append(&test_checkpoint(&job_id)).unwrap();
    log.flush().unwrap();

    let entries = log.entries_after(1).unwrap();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].seq, 2);
    assert_eq!(entries[1].seq, 3);
}

#[test]
fn truncate_before_drops_older_entries() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("test.log");
    let job_id = JobId::new();
    let mut log = CheckpointLog::open(&path, 0).unwrap();
    log.append(&test_checkpoint(&job_id)).unwrap();
    log.append(&test_checkpoint(&job_id)).unwrap();
    log.append(&test_checkpoint(&job_id)).unwrap();
    log.flush().unwrap();

    log.truncate_before(2).unwrap();

    let entries = log.entries_after(0).unwrap();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].seq, 2);
    assert_eq!(entries[1].seq, 3);
}

#[test]
fn needs_flush_threshold() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("test.log");
    let mut log = CheckpointLog::open(&path, 0).unwrap();
    let job_id = JobId::new();

    assert!(!log.needs_flush());
    for _ in 0..101 {
        log.append(&test_checkpoint(&job_id)).unwrap();
    }
    assert!(log.needs_flush());
}

#[test]
fn open_corrupt_log_creates_bak_and_preserves_valid_entries() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("test.log");
    let job_id = JobId::new();

    {
        let mut log = CheckpointLog::open(&path, 0).unwrap();
        log.append(&test_checkpoint(&job_id)).unwrap();
        log.append(&test_checkpoint(&job_id)).unwrap();
        log.flush().unwrap();
    }
    {
        let mut f = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
        f.write_all(b"not-valid-json\n").unwrap();
    }

    let log = CheckpointLog::open(&path, 0).unwrap();
    assert_eq!(log.write_seq(), 2);

    let bak = path.with_extension("bak");
    assert!(bak.exists());

    let entries = log.entries_after(0).unwrap();
    assert_eq!(entries.len(), 2);
}

#[test]
fn open_corrupt_log_rotates_bak_files() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("test.log");

    for i in 1..=4u8 {
        {
            let mut f = std::fs::File::create(&path).unwrap();
            f.write_all(&[i; 8]).unwrap();
        }
        let log = CheckpointLog::open(&path, 0).unwrap();
        assert_eq!(log.write_seq(), 0);
    }

    let bak1 = path.with_extension("bak");
    assert_eq!(std::fs::read(&bak1).unwrap(), vec![4u8; 8]);
    let bak2 = path.with_extension("bak.2");
    assert_eq!(std::fs::read(&bak2).unwrap(), vec![3u8; 8]);
    let bak3 = path.with_extension("bak.3");
    assert_eq!(std::fs::read(&bak3).unwrap(), vec![2u8; 8]);
    assert!(!path.with_extension("bak.4").exists());
}

#[test]
fn next_unprocessed_returns_none_not_error_on_corrupt_entry() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("test.log");
    let job_id = JobId::new();
    let mut log = CheckpointLog::open(&path, 0).unwrap();
    log.append(&test_checkpoint(&job_id)).unwrap();
    log.flush().unwrap();

    let entry = log.next_unprocessed().unwrap().unwrap();
    assert_eq!(entry.seq, 1);

    {
        let mut f = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
        f.write_all(b"corrupt-line\n").unwrap();
    }
    assert!(log.next_unprocessed().unwrap().is_none());

    log.append(&test_checkpoint(&job_id)).unwrap();
    log.flush().unwrap();
    let entry = log.next_unprocessed().unwrap().unwrap();
    assert_eq!(entry.seq, 2);
}

#[test]
fn open_with_binary_data_rotates_and_starts_empty() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("test.log");
    std::fs::write(&path, b"\x80\x81\x82\xff\xfe\n").unwrap();

    let log = CheckpointLog::open(&path, 0).unwrap();
    assert_eq!(log.write_seq(), 0);
    assert!(path.with_extension("bak").exists());
}

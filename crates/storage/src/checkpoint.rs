// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Append-only, crash-safe checkpoint log backing the durable workflow
//! envelope (spec §4.4). One file per runner process; each entry records a
//! workflow checkpoint (`processing`/`complete`/`failed` transition, a DLQ
//! insert, or a durable-sleep marker) so that on restart the engine can
//! resume from the last durable point rather than replaying from scratch.

use jobmesh_core::{DlqId, JobId, JobStatus};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::error::StorageResult;

/// One durable checkpoint a workflow execution can resume from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Checkpoint {
    Transition { job_id: JobId, status: JobStatus },
    DlqInserted { job_id: JobId, dlq_id: DlqId },
    DurableSleepUntil { job_id: JobId, scheduled_at: u64 },
}

/// A checkpoint plus its monotonic sequence number in the log.
#[derive(Debug, Clone, PartialEq)]
pub struct LogEntry {
    pub seq: u64,
    pub checkpoint: Checkpoint,
}

#[derive(Serialize, Deserialize)]
struct WireEntry {
    seq: u64,
    checkpoint: Checkpoint,
}

/// Number of buffered-but-unflushed appends after which [`CheckpointLog::needs_flush`]
/// reports true.
const FLUSH_THRESHOLD: usize = 100;

/// Append-only, newline-delimited-JSON checkpoint log with idempotent replay
/// support and tolerance for a truncated/corrupt tail (the last thing a
/// runner does before a crash is often a partial write).
pub struct CheckpointLog {
    path: PathBuf,
    file: File,
    write_seq: u64,
    processed_seq: u64,
    read_offset: u64,
    unflushed: usize,
}

impl CheckpointLog {
    /// Open (creating if absent) the log at `path`. `processed_seq` is the
    /// checkpoint sequence already durably applied elsewhere (e.g. a
    /// snapshot); entries at or below it are skipped by [`Self::next_unprocessed`].
    ///
    /// A corrupt or non-UTF-8 tail is tolerated: valid entries up to the
    /// first bad line are kept, and the original file is rotated to a
    /// `.bak` backup (rotating older backups to `.bak.2`, `.bak.3`, keeping
    /// at most three) before being rewritten with only the valid prefix.
    pub fn open(path: impl AsRef<Path>, processed_seq: u64) -> StorageResult<Self> {
        let path = path.as_ref().to_path_buf();
        if !path.exists() {
            File::create(&path)?;
        }

        let (valid_entries, had_corruption) = read_valid_prefix(&path)?;
        if had_corruption {
            rotate_backups(&path)?;
            rewrite_clean(&path, &valid_entries)?;
        }

        let write_seq = valid_entries.last().map(|e| e.seq).unwrap_or(0);
        let file = OpenOptions::new().read(true).append(true).open(&path)?;

        Ok(Self { path, file, write_seq, processed_seq, read_offset: 0, unflushed: 0 })
    }

    pub fn write_seq(&self) -> u64 {
        self.write_seq
    }

    pub fn processed_seq(&self) -> u64 {
        self.processed_seq
    }

    /// Append a checkpoint, returning its assigned sequence number. Buffered
    /// until [`Self::flush`] (or the next [`Self::needs_flush`]-triggered
    /// flush by the caller).
    pub fn append(&mut self, checkpoint: &Checkpoint) -> StorageResult<u64> {
        self.write_seq += 1;
        let entry = WireEntry { seq: self.write_seq, checkpoint: checkpoint.clone() };
        let mut line = serde_json::to_vec(&entry)?;
        line.push(b'\n');
        self.file.write_all(&line)?;
        self.unflushed += 1;
        Ok(self.write_seq)
    }

    pub fn flush(&mut self) -> StorageResult<()> {
        self.file.flush()?;
        self.unflushed = 0;
        Ok(())
    }

    /// Whether enough unflushed appends have accumulated to warrant an
    /// explicit flush (spec-independent durability knob; threshold 100).
    pub fn needs_flush(&self) -> bool {
        self.unflushed >= FLUSH_THRESHOLD
    }

    /// Returns the next entry after `processed_seq` that hasn't been read
    /// yet, or `None` if the log is exhausted or the next line is corrupt
    /// (corruption is treated as end-of-log, never an error: a partial
    /// trailing write is expected after a crash).
    pub fn next_unprocessed(&mut self) -> StorageResult<Option<LogEntry>> {
        let mut reader = BufReader::new(&self.file);
        reader.seek(SeekFrom::Start(self.read_offset))?;

        let mut line = String::new();
        let bytes_read = match reader.read_line(&mut line) {
            Ok(n) => n,
            Err(_) => return Ok(None),
        };
        if bytes_read == 0 {
            return Ok(None);
        }

        match serde_json::from_str::<WireEntry>(line.trim_end()) {
            Ok(entry) if entry.seq > self.processed_seq => {
                self.read_offset += bytes_read as u64;
                Ok(Some(LogEntry { seq: entry.seq, checkpoint: entry.checkpoint }))
            }
            Ok(_) => {
                // Already processed; advance past it and recurse.
                self.read_offset += bytes_read as u64;
                self.next_unprocessed()
            }
            Err(_) => Ok(None),
        }
    }

    /// Mark `seq` (and everything at or below it) as durably applied.
    pub fn mark_processed(&mut self, seq: u64) {
        self.processed_seq = self.processed_seq.max(seq);
    }

    /// All valid entries with `seq > after`, in order. Stops at the first
    /// corrupt or non-UTF-8 line rather than erroring.
    pub fn entries_after(&self, after: u64) -> StorageResult<Vec<LogEntry>> {
        let (entries, _) = read_valid_prefix(&self.path)?;
        Ok(entries.into_iter().filter(|e| e.seq > after).collect())
    }

    /// Rewrite the log keeping only entries with `seq >= floor`. Used after
    /// a snapshot to bound log growth.
    pub fn truncate_before(&mut self, floor: u64) -> StorageResult<()> {
        let (entries, _) = read_valid_prefix(&self.path)?;
        let kept: Vec<_> = entries.into_iter().filter(|e| e.seq >= floor).collect();
        rewrite_clean(&self.path, &kept)?;
        self.file = OpenOptions::new().read(true).append(true).open(&self.path)?;
        self.read_offset = 0;
        Ok(())
    }
}

fn read_valid_prefix(path: &Path) -> StorageResult<(Vec<LogEntry>, bool)> {
    let bytes = std::fs::read(path)?;
    let mut entries = Vec::new();
    let mut had_corruption = false;
    let mut start = 0usize;

    for (i, &b) in bytes.iter().enumerate() {
        if b != b'\n' {
            continue;
        }
        let line = &bytes[start..i];
        start = i + 1;
        if line.is_empty() {
            continue;
        }
        match std::str::from_utf8(line).ok().and_then(|s| serde_json::from_str::<WireEntry>(s).ok()) {
            Some(entry) => entries.push(LogEntry { seq: entry.seq, checkpoint: entry.checkpoint }),
            None => {
                had_corruption = true;
                break;
            }
        }
    }
    // A non-empty remainder with no trailing newline is a partial write, not
    // necessarily corruption, but we can't trust it either; treat it the
    // same way (stop, and mark the file dirty if anything follows the last
    // good entry).
    if !had_corruption && start < bytes.len() {
        had_corruption = true;
    }

    Ok((entries, had_corruption))
}

fn rewrite_clean(path: &Path, entries: &[LogEntry]) -> StorageResult<()> {
    let mut buf = Vec::new();
    for entry in entries {
        let wire = WireEntry { seq: entry.seq, checkpoint: entry.checkpoint.clone() };
        serde_json::to_writer(&mut buf, &wire)?;
        buf.push(b'\n');
    }
    std::fs::write(path, buf)?;
    Ok(())
}

/// Rotate `path.bak` -> `path.bak.2` -> `path.bak.3`, discarding anything
/// older, then move the current (corrupt) file to `path.bak`.
fn rotate_backups(path: &Path) -> StorageResult<()> {
    let bak3 = path.with_extension("bak.3");
    let bak2 = path.with_extension("bak.2");
    let bak1 = path.with_extension("bak");

    let _ = std::fs::remove_file(&bak3);
    if bak2.exists() {
        std::fs::rename(&bak2, &bak3)?;
    }
    if bak1.exists() {
        std::fs::rename(&bak1, &bak2)?;
    }
    std::fs::copy(path, &bak1)?;
    Ok(())
}

#[cfg(test)]
#[path = "checkpoint_tests.rs"]
mod tests;

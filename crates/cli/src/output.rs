// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Dual-mode (human / `--json`) rendering for RPC responses.

use crate::color;
use clap::ValueEnum;
use jobmesh_core::{DlqEntry, JobId};
use jobmesh_wire::JobStatusResponse;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

fn print_json(value: &impl serde::Serialize) {
    match serde_json::to_string_pretty(value) {
        Ok(s) => println!("{s}"),
        Err(err) => eprintln!("failed to serialize output: {err}"),
    }
}

pub fn print_status(format: OutputFormat, status: &JobStatusResponse) {
    if format == OutputFormat::Json {
        return print_json(status);
    }
    println!("{} {}", color::header("job"), status.job_id);
    println!("  {} {}", color::context("status:"), status.status);
    println!("  {} {}/{}", color::context("attempts:"), status.attempts, status.max_attempts);
    if let Some(err) = &status.last_error {
        println!("  {} {}", color::context("last error:"), err);
    }
    if let Some(result) = &status.result {
        println!("  {} {}", color::context("result:"), result);
    }
    if !status.history.is_empty() {
        println!("  {}", color::context("history:"));
        for entry in &status.history {
            match &entry.error {
                Some(err) => println!("    {} @ {} ({err})", entry.status, entry.timestamp),
                None => println!("    {} @ {}", entry.status, entry.timestamp),
            }
        }
    }
}

pub fn print_submitted(format: OutputFormat, job_id: &JobId, duplicate: bool) {
    if format == OutputFormat::Json {
        return print_json(&serde_json::json!({"jobId": job_id.to_string(), "duplicate": duplicate}));
    }
    if duplicate {
        println!("{} {} ({})", color::header("submitted"), job_id, color::context("duplicate, already queued"));
    } else {
        println!("{} {}", color::header("submitted"), job_id);
    }
}

pub fn print_dlq_list(format: OutputFormat, entries: &[DlqEntry]) {
    if format == OutputFormat::Json {
        return print_json(&entries);
    }
    if entries.is_empty() {
        println!("{}", color::context("(empty)"));
        return;
    }
    println!("{:<26} {:<12} {:<20} {:<8} {:<16}", "id", "tenant", "type", "attempts", "reason");
    for entry in entries {
        println!(
            "{:<26} {:<12} {:<20} {:<8} {:<16}",
            entry.id, entry.tenant_id, entry.job_type, entry.attempts, entry.error_reason
        );
    }
}

pub fn print_ok(format: OutputFormat, message: &str) {
    if format == OutputFormat::Json {
        return print_json(&serde_json::json!({"ok": true}));
    }
    println!("{message}");
}

pub fn print_recovered_count(format: OutputFormat, count: u64) {
    if format == OutputFormat::Json {
        return print_json(&serde_json::json!({"count": count}));
    }
    println!("{} {}", color::header("recovered"), count);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn output_format_defaults_to_text() {
        assert_eq!(OutputFormat::default(), OutputFormat::Text);
    }
}

// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `jobmesh`: the operator CLI for a running `jobmeshd` (spec §6.5's admin
//! surface plus submit/status/cancel for everyday use).

mod client;
mod color;
mod output;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use client::{ConnectOptions, DaemonClient};
use jobmesh_core::{DlqId, Duration as JobDuration, JobEnvelope, JobId, Priority, RequestContext};
use jobmesh_wire::{Request, Response};
use output::OutputFormat;

#[derive(Parser)]
#[command(name = "jobmesh", version, about = "Operator CLI for a jobmesh cluster", styles = color::styles())]
struct Cli {
    #[arg(long, value_enum, global = true, default_value = "text")]
    format: OutputFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Submit a new job.
    Submit {
        /// Job type, e.g. `email.send`.
        #[arg(long = "type")]
        job_type: String,
        /// Tenant the job runs under.
        #[arg(long)]
        tenant: String,
        /// JSON payload, e.g. `'{"to":"a@b.com"}'`.
        #[arg(long, default_value = "null")]
        payload: String,
        #[arg(long, default_value = "normal")]
        priority: Priority,
        #[arg(long, default_value_t = 3)]
        max_attempts: u32,
        #[arg(long)]
        dedupe_key: Option<String>,
        #[arg(long)]
        scheduled_at: Option<u64>,
        /// Mark the handler as long-running, enabling keep-alive.
        #[arg(long)]
        long: bool,
    },
    /// Fetch a job's current status and history.
    Status {
        job_id: String,
        #[arg(long)]
        tenant: String,
    },
    /// Cancel a queued or processing job.
    Cancel {
        job_id: String,
        #[arg(long)]
        tenant: String,
    },
    /// Replay a dead-lettered job by its DLQ id.
    Replay { dlq_id: String },
    /// Force-release a job's shard claim and clear its tracked route.
    ResetJob { job_id: String },
    /// Trigger an immediate sweep for orphaned `processing` jobs.
    RecoverInFlight,
    /// List dead-lettered entries for a tenant.
    DlqList {
        #[arg(long)]
        tenant: String,
        #[arg(long, default_value_t = 50)]
        limit: i64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let opts = ConnectOptions::from_env();
    let mut client = DaemonClient::connect(&opts).await?;

    match cli.command {
        Command::Submit { job_type, tenant, payload, priority, max_attempts, dedupe_key, scheduled_at, long } => {
            let payload = serde_json::from_str(&payload).context("payload must be valid JSON")?;
            let envelope = JobEnvelope {
                job_type,
                payload,
                tenant_id: tenant,
                priority,
                max_attempts,
                dedupe_key,
                batch_id: None,
                scheduled_at,
                duration: if long { JobDuration::Long } else { JobDuration::Short },
                context: RequestContext::default(),
            };
            match client.call(Request::Submit { envelope }).await? {
                Response::Submitted { job_id, duplicate } => output::print_submitted(cli.format, &job_id, duplicate),
                other => anyhow::bail!("unexpected response: {other:?}"),
            }
        }
        Command::Status { job_id, tenant } => {
            let request = Request::Status { job_id: JobId::from_string(job_id), tenant_id: tenant };
            match client.call(request).await? {
                Response::Status(status) => output::print_status(cli.format, &status),
                other => anyhow::bail!("unexpected response: {other:?}"),
            }
        }
        Command::Cancel { job_id, tenant } => {
            let request = Request::Cancel { job_id: JobId::from_string(job_id), tenant_id: tenant };
            match client.call(request).await? {
                Response::Ok => output::print_ok(cli.format, "cancelled"),
                other => anyhow::bail!("unexpected response: {other:?}"),
            }
        }
        Command::Replay { dlq_id } => {
            let request = Request::Replay { dlq_id: DlqId::from_string(dlq_id) };
            match client.call(request).await? {
                Response::Replayed => output::print_ok(cli.format, "replayed"),
                other => anyhow::bail!("unexpected response: {other:?}"),
            }
        }
        Command::ResetJob { job_id } => {
            let request = Request::ResetJob { job_id: JobId::from_string(job_id) };
            match client.call(request).await? {
                Response::ResetDone => output::print_ok(cli.format, "reset"),
                other => anyhow::bail!("unexpected response: {other:?}"),
            }
        }
        Command::RecoverInFlight => match client.call(Request::RecoverInFlight).await? {
            Response::RecoveredCount { count } => output::print_recovered_count(cli.format, count),
            other => anyhow::bail!("unexpected response: {other:?}"),
        },
        Command::DlqList { tenant, limit } => {
            let request = Request::DlqList { tenant_id: tenant, limit };
            match client.call(request).await? {
                Response::DlqList(entries) => output::print_dlq_list(cli.format, &entries),
                other => anyhow::bail!("unexpected response: {other:?}"),
            }
        }
    }

    Ok(())
}

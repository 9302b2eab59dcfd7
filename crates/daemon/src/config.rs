// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Centralized environment variable access for the daemon crate (spec §6.4).

use jobmesh_core::ShardGroupId;
use jobmesh_wire::TransportKind;
use std::time::Duration;

/// Runner identity used for advisory-lock ownership and snowflake generation.
/// Falls back to `HOSTNAME` (set by most container runtimes), then a fixed
/// default for bare local runs.
pub fn runner_id() -> String {
    std::env::var("JOBMESH_RUNNER_ID")
        .or_else(|_| std::env::var("HOSTNAME"))
        .unwrap_or_else(|_| "runner-local".to_string())
}

pub fn shard_group() -> ShardGroupId {
    let raw = std::env::var("JOBMESH_SHARD_GROUP").ok().and_then(|s| s.parse::<u16>().ok()).unwrap_or(0);
    ShardGroupId(raw)
}

pub fn shards_per_group() -> u32 {
    std::env::var("JOBMESH_SHARDS_PER_GROUP").ok().and_then(|s| s.parse().ok()).unwrap_or(100)
}

/// `POSTGRES_*` connection string (spec §6.4); no default, since a daemon
/// with no database to talk to cannot do anything useful.
pub fn database_url() -> Result<String, anyhow::Error> {
    std::env::var("POSTGRES_URL").map_err(|_| anyhow::anyhow!("POSTGRES_URL must be set"))
}

/// Redis URL for the cache layer. Absent means fall back to an in-process
/// cache, appropriate for single-runner development but not a real cluster.
pub fn redis_url() -> Option<String> {
    std::env::var("REDIS_URL").ok().filter(|s| !s.is_empty())
}

pub fn checkpoint_dir() -> std::path::PathBuf {
    std::env::var("JOBMESH_CHECKPOINT_DIR")
        .map(std::path::PathBuf::from)
        .unwrap_or_else(|_| std::path::PathBuf::from("/var/lib/jobmesh/checkpoints"))
}

pub fn dlq_check_interval() -> Duration {
    std::env::var("JOB_DLQ_CHECK_INTERVAL_MS")
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .map(Duration::from_millis)
        .unwrap_or(Duration::from_millis(300_000))
}

pub fn dlq_max_retries() -> u32 {
    std::env::var("JOB_DLQ_MAX_RETRIES").ok().and_then(|s| s.parse().ok()).unwrap_or(3)
}

pub fn purge_completed_ttl_days() -> u32 {
    std::env::var("JOB_PURGE_COMPLETED_TTL_DAYS").ok().and_then(|s| s.parse().ok()).unwrap_or(7)
}

pub fn purge_failed_ttl_days() -> u32 {
    std::env::var("JOB_PURGE_FAILED_TTL_DAYS").ok().and_then(|s| s.parse().ok()).unwrap_or(30)
}

/// `CLUSTER_TRANSPORT` (spec §6.4): socket|http|websocket|auto, default auto.
pub fn cluster_transport() -> TransportKind {
    std::env::var("CLUSTER_TRANSPORT").ok().and_then(|s| s.parse().ok()).unwrap_or_default()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthMode {
    K8s,
    Noop,
}

/// `CLUSTER_HEALTH_MODE` (spec §6.4): k8s|noop|auto, default auto. `auto`
/// resolves to `k8s` inside a pod (`KUBERNETES_SERVICE_HOST` set) and `noop`
/// otherwise.
pub fn cluster_health_mode() -> HealthMode {
    match std::env::var("CLUSTER_HEALTH_MODE").as_deref() {
        Ok("k8s") => HealthMode::K8s,
        Ok("noop") => HealthMode::Noop,
        _ if std::env::var("KUBERNETES_SERVICE_HOST").is_ok() => HealthMode::K8s,
        _ => HealthMode::Noop,
    }
}

pub fn k8s_namespace() -> String {
    std::env::var("JOBMESH_K8S_NAMESPACE").unwrap_or_else(|_| "default".to_string())
}

pub fn k8s_label_selector() -> String {
    std::env::var("JOBMESH_K8S_LABEL_SELECTOR").unwrap_or_else(|_| "app=jobmeshd".to_string())
}

pub fn socket_path() -> String {
    std::env::var("JOBMESH_SOCKET_PATH").unwrap_or_else(|_| "/tmp/jobmeshd.sock".to_string())
}

pub fn tcp_addr() -> String {
    std::env::var("JOBMESH_TCP_ADDR").unwrap_or_else(|_| "0.0.0.0:7420".to_string())
}

pub fn websocket_addr() -> String {
    std::env::var("JOBMESH_WS_ADDR").unwrap_or_else(|_| "0.0.0.0:7421".to_string())
}

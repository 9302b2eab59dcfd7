// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `jobmeshd`: the runner process. Wires storage, the shard map, the
//! submission router, and every background fiber (spec §4.5-§4.7) together,
//! then serves the RPC surface (spec §6.1, §6.5) until asked to stop.

mod config;
mod listener;
mod polling_source;

use jobmesh_cluster::{HealthCheck, K8sHealth, NoopHealth, PgAdvisoryLocks, ShardMap, ShardMapConfig};
use jobmesh_core::SystemClock;
use jobmesh_engine::{
    BroadcastEventBus, DlqWatcher, DlqWatcherConfig, HandlerRegistry, PollingMonitor,
    PollingMonitorConfig, ProgressHub, PurgeSweep, PurgeSweepConfig,
};
use jobmesh_router::{JobService, JobServiceConfig};
use jobmesh_storage::{Cache, InMemoryCache, PgStateStore, RedisCache};
use polling_source::DaemonPollingSource;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const EVENT_BUS_CAPACITY: usize = 256;

/// Upper bound on how long shutdown waits for in-flight jobs to drain before
/// releasing shard claims. Entities themselves cap a single job's drain at
/// their own `DEFAULT_DRAIN_TIMEOUT` (30s); this is the daemon-wide ceiling
/// so shutdown doesn't hang indefinitely behind a slow handler.
const SHUTDOWN_DRAIN_GRACE: std::time::Duration = std::time::Duration::from_secs(30);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_env_filter(EnvFilter::from_default_env()).init();

    if let Err(e) = run().await {
        warn!(error = %e, "jobmeshd exiting with an error");
        return Err(e);
    }
    Ok(())
}

async fn run() -> anyhow::Result<()> {
    let runner_id = config::runner_id();
    let group = config::shard_group();
    info!(runner_id = %runner_id, group = %group, "starting jobmeshd");

    // 1. Storage first: nothing else can come up without it.
    let storage = Arc::new(PgStateStore::connect(&config::database_url()?).await?);

    let cache: Arc<dyn Cache> = match config::redis_url() {
        Some(url) => {
            info!("connecting to redis cache");
            Arc::new(RedisCache::connect(&url).await?)
        }
        None => {
            warn!("REDIS_URL not set; using an in-process cache (single-runner only)");
            Arc::new(InMemoryCache::new())
        }
    };

    // 2. Cluster plumbing: advisory locks, shard map, this runner's claims.
    let connect_options = sqlx::postgres::PgConnectOptions::from_str(&config::database_url()?)?;
    let locks = Arc::new(PgAdvisoryLocks::new(connect_options));
    let shard_map = Arc::new(ShardMap::new(
        ShardMapConfig { shards_per_group: config::shards_per_group(), runner_id: runner_id.clone() },
        locks,
        storage.clone(),
        SystemClock,
    ));

    let shards_per_group = config::shards_per_group();
    let mut claimed = 0u32;
    for shard_id in 0..shards_per_group {
        match shard_map.claim_shard(group, shard_id).await {
            Ok(true) => claimed += 1,
            Ok(false) => {}
            Err(e) => warn!(shard_id, error = %e, "failed to claim shard"),
        }
    }
    info!(claimed, total = shards_per_group, "claimed shards for this runner's group");

    // 3. The submission router, the only thing the RPC listener talks to.
    let events = Arc::new(BroadcastEventBus::new(EVENT_BUS_CAPACITY));
    let progress = Arc::new(ProgressHub::new());
    let service = Arc::new(JobService::new(JobServiceConfig {
        shard_map: shard_map.clone(),
        group,
        storage: storage.clone(),
        cache,
        progress,
        events: events.clone(),
        // Handler registration is an embedding concern: a generic daemon
        // binary ships with no job types wired up. Nothing in spec.md
        // requires jobmeshd itself to know what a handler does.
        registry: HandlerRegistry::new(),
        checkpoint_dir: config::checkpoint_dir(),
        clock: SystemClock,
    }));

    // 4. Background fibers: DLQ replay, retention purge, threshold polling.
    // Each holds a clone of `service`, so shutdown aborts them before the
    // in-flight-drain grace period below — otherwise `service`'s refcount
    // never reaches zero and the entities inside it never see their
    // channels close.
    let watcher_task = tokio::spawn({
        let watcher = DlqWatcher::new(
            storage.clone(),
            shard_map.clone(),
            service.clone(),
            events.clone(),
            SystemClock,
            DlqWatcherConfig { check_interval: config::dlq_check_interval(), max_retries: config::dlq_max_retries(), group },
        );
        async move { watcher.run().await }
    });

    let sweep_task = tokio::spawn({
        let sweep = PurgeSweep::new(
            storage.clone(),
            SystemClock,
            PurgeSweepConfig {
                completed_ttl_days: config::purge_completed_ttl_days(),
                failed_ttl_days: config::purge_failed_ttl_days(),
                ..Default::default()
            },
        );
        async move { sweep.run().await }
    });

    let monitor_task = tokio::spawn({
        let source = Arc::new(DaemonPollingSource::new(storage.clone(), service.clone()));
        let monitor = PollingMonitor::new(source, events.clone(), PollingMonitorConfig::default());
        async move { monitor.run().await }
    });

    let health_task = tokio::spawn(health_check_loop());

    // 5. Listener last: only start accepting RPCs once everything above is
    // live, so a client never observes a half-initialized daemon. There is
    // no websocket *server* in `jobmesh-wire` (only the client-side
    // `WebSocketTransport`), so `Http`/`WebSocket`/`Auto` all bind the same
    // length-prefixed TCP carrier `listener::serve_tcp` exposes.
    let listener_task = match config::cluster_transport() {
        jobmesh_wire::TransportKind::Socket => {
            tokio::spawn(listener::serve_unix_socket(config::socket_path(), service.clone()))
        }
        _ => tokio::spawn(listener::serve_tcp(config::tcp_addr(), service.clone())),
    };

    tokio::select! {
        res = listener_task => {
            if let Ok(Err(e)) = res {
                warn!(error = %e, "rpc listener stopped unexpectedly");
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("received shutdown signal");
        }
    }

    // Stop the background fibers and drop our own handle: each `JobEntity`'s
    // run loop already drains its in-flight job (up to its own timeout) once
    // every clone of its handle is gone (entity.rs). A per-connection
    // listener task holding its own clone finishes draining on its own;
    // anything that outlives the grace window below is left `processing`
    // for the recovery sweep to pick up.
    watcher_task.abort();
    sweep_task.abort();
    monitor_task.abort();
    health_task.abort();
    drop(service);
    tokio::time::sleep(SHUTDOWN_DRAIN_GRACE).await;

    info!("releasing shard claims");
    for shard_id in 0..shards_per_group {
        let _ = shard_map.release_shard(group, shard_id).await;
    }

    Ok(())
}

/// Logs live-runner visibility on an interval. No automatic shard
/// reassignment on an unhealthy peer: that would need a cluster-wide
/// rebalance protocol spec.md doesn't describe, so this stays observational.
async fn health_check_loop() {
    let check: Arc<dyn HealthCheck> = match config::cluster_health_mode() {
        config::HealthMode::K8s => {
            match K8sHealth::new(&config::k8s_namespace(), config::k8s_label_selector()).await {
                Ok(h) => Arc::new(h),
                Err(e) => {
                    warn!(error = %e, "failed to initialize k8s health check; falling back to noop");
                    Arc::new(NoopHealth::new(std::iter::empty::<String>()))
                }
            }
        }
        config::HealthMode::Noop => Arc::new(NoopHealth::new(std::iter::once(config::runner_id()))),
    };

    loop {
        tokio::time::sleep(std::time::Duration::from_secs(30)).await;
        match check.live_runners().await {
            Ok(runners) => info!(count = runners.len(), "live runner check"),
            Err(e) => warn!(error = %e, "health check failed"),
        }
    }
}

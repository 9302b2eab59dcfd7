// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Wires [`PollingMonitor`](jobmesh_engine::PollingMonitor)'s metric sources
//! to what's actually available on this process: the DLQ table and this
//! runner's live entity count. There is no hit/miss counter anywhere in the
//! storage layer, so `cache_hit_ratio` is a constant until one exists.

use async_trait::async_trait;
use jobmesh_cluster::AdvisoryLocks;
use jobmesh_core::Clock;
use jobmesh_engine::PollingSource;
use jobmesh_router::JobService;
use jobmesh_storage::PgStateStore;
use std::sync::Arc;

pub struct DaemonPollingSource<L: AdvisoryLocks, C: Clock> {
    storage: Arc<PgStateStore>,
    service: Arc<JobService<L, C>>,
}

impl<L: AdvisoryLocks, C: Clock> DaemonPollingSource<L, C> {
    pub fn new(storage: Arc<PgStateStore>, service: Arc<JobService<L, C>>) -> Self {
        Self { storage, service }
    }
}

#[async_trait]
impl<L: AdvisoryLocks + Send + Sync + 'static, C: Clock + Send + Sync + 'static> PollingSource
    for DaemonPollingSource<L, C>
{
    /// Sums `dlq_page` counts across every tenant with at least one
    /// dead-lettered entry. Approximate (pages, not a `COUNT(*)`), but the
    /// threshold this feeds is itself a coarse operational alert.
    async fn dlq_depth(&self) -> f64 {
        let tenants = match self.storage.distinct_dlq_tenants().await {
            Ok(t) => t,
            Err(_) => return 0.0,
        };
        let mut total = 0.0;
        for tenant in tenants {
            if let Ok(page) = self.storage.dlq_page(&tenant, u32::MAX, 10_000).await {
                total += page.len() as f64;
            }
        }
        total
    }

    /// Local entity count, not a cluster-wide queue depth: this process has
    /// no visibility into other runners' mailboxes.
    async fn queue_depth(&self) -> f64 {
        self.service.active_entity_count() as f64
    }

    /// Placeholder until the cache layer tracks hit/miss counters.
    async fn cache_hit_ratio(&self) -> f64 {
        1.0
    }
}

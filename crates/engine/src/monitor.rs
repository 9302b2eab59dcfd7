// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Supplemented background fibers absent from spec.md's distillation but
//! present in any complete rendition of this system (see `SPEC_FULL.md`):
//! the `polling.alert` threshold monitor and the retention purge sweep.

use jobmesh_core::{Clock, Event, PollingAlertEvent};
use jobmesh_storage::PgStateStore;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::event_bus::EventPublisher;

/// One metric this monitor watches and the threshold above which it alerts.
#[derive(Debug, Clone, Copy)]
pub struct Threshold {
    pub metric: &'static str,
    pub max: f64,
}

/// Source of the metrics the monitor samples each tick. Implemented by the
/// daemon's wiring over the DLQ table, entity mailboxes, and the cache.
#[async_trait::async_trait]
pub trait PollingSource: Send + Sync {
    async fn dlq_depth(&self) -> f64;
    async fn queue_depth(&self) -> f64;
    async fn cache_hit_ratio(&self) -> f64;
}

pub struct PollingMonitorConfig {
    pub interval: Duration,
    pub dlq_depth_threshold: f64,
    pub queue_depth_threshold: f64,
    pub cache_hit_ratio_floor: f64,
}

impl Default for PollingMonitorConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            dlq_depth_threshold: 1_000.0,
            queue_depth_threshold: 10_000.0,
            cache_hit_ratio_floor: 0.5,
        }
    }
}

/// Emits `Event::PollingAlert` when DLQ size, queue depth, or cache hit
/// ratio crosses a configured threshold (spec §6.3 names `polling.alert`;
/// no component in spec.md emits it, so this supplements the distillation).
pub struct PollingMonitor {
    source: Arc<dyn PollingSource>,
    events: Arc<dyn EventPublisher>,
    config: PollingMonitorConfig,
}

impl PollingMonitor {
    pub fn new(source: Arc<dyn PollingSource>, events: Arc<dyn EventPublisher>, config: PollingMonitorConfig) -> Self {
        Self { source, events, config }
    }

    pub async fn run(&self) {
        loop {
            tokio::time::sleep(self.config.interval).await;
            self.tick().await;
        }
    }

    async fn tick(&self) {
        let dlq_depth = self.source.dlq_depth().await;
        self.check_above(dlq_depth, self.config.dlq_depth_threshold, "dlq_depth").await;

        let queue_depth = self.source.queue_depth().await;
        self.check_above(queue_depth, self.config.queue_depth_threshold, "queue_depth").await;

        let hit_ratio = self.source.cache_hit_ratio().await;
        self.check_below(hit_ratio, self.config.cache_hit_ratio_floor, "cache_hit_ratio").await;
    }

    async fn check_above(&self, value: f64, threshold: f64, metric: &'static str) {
        if value > threshold {
            self.alert(metric, value, threshold).await;
        }
    }

    async fn check_below(&self, value: f64, floor: f64, metric: &'static str) {
        if value < floor {
            self.alert(metric, value, floor).await;
        }
    }

    async fn alert(&self, metric: &'static str, value: f64, threshold: f64) {
        warn!(metric, value, threshold, "operational threshold crossed");
        self.events
            .publish(Event::PollingAlert(PollingAlertEvent { metric: metric.to_string(), value, threshold }))
            .await;
    }
}

pub struct PurgeSweepConfig {
    pub interval: Duration,
    pub completed_ttl_days: u32,
    pub failed_ttl_days: u32,
}

impl Default for PurgeSweepConfig {
    fn default() -> Self {
        Self { interval: Duration::from_secs(24 * 3600), completed_ttl_days: 7, failed_ttl_days: 30 }
    }
}

/// Scheduled retention sweep (spec §6.2 Retention; §9 open question treats
/// this cascade as an operational job outside the core, so it runs as one
/// more background fiber rather than being wired into the job lifecycle).
pub struct PurgeSweep<C: Clock> {
    storage: Arc<PgStateStore>,
    clock: C,
    config: PurgeSweepConfig,
}

impl<C: Clock> PurgeSweep<C> {
    pub fn new(storage: Arc<PgStateStore>, clock: C, config: PurgeSweepConfig) -> Self {
        Self { storage, clock, config }
    }

    pub async fn run(&self) {
        loop {
            tokio::time::sleep(self.config.interval).await;
            match self
                .storage
                .purge_expired_jobs(self.config.completed_ttl_days, self.config.failed_ttl_days, self.clock.epoch_ms())
                .await
            {
                Ok(deleted) => info!(deleted, "purge sweep removed expired job rows"),
                Err(e) => warn!(error = %e, "purge sweep failed; will retry next interval"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_bus::BroadcastEventBus;

    struct FixedSource {
        dlq: f64,
        queue: f64,
        hit_ratio: f64,
    }

    #[async_trait::async_trait]
    impl PollingSource for FixedSource {
        async fn dlq_depth(&self) -> f64 {
            self.dlq
        }
        async fn queue_depth(&self) -> f64 {
            self.queue
        }
        async fn cache_hit_ratio(&self) -> f64 {
            self.hit_ratio
        }
    }

    #[tokio::test]
    async fn tick_alerts_when_dlq_depth_exceeds_threshold() {
        let bus = Arc::new(BroadcastEventBus::new(8));
        let mut rx = bus.subscribe();
        let source = Arc::new(FixedSource { dlq: 2_000.0, queue: 0.0, hit_ratio: 1.0 });
        let monitor = PollingMonitor::new(source, bus, PollingMonitorConfig::default());

        monitor.tick().await;

        let event = rx.recv().await.unwrap();
        match event {
            Event::PollingAlert(alert) => assert_eq!(alert.metric, "dlq_depth"),
            other => panic!("expected a polling alert, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn tick_alerts_when_cache_hit_ratio_drops_below_floor() {
        let bus = Arc::new(BroadcastEventBus::new(8));
        let mut rx = bus.subscribe();
        let source = Arc::new(FixedSource { dlq: 0.0, queue: 0.0, hit_ratio: 0.1 });
        let monitor = PollingMonitor::new(source, bus, PollingMonitorConfig::default());

        monitor.tick().await;

        let event = rx.recv().await.unwrap();
        assert!(matches!(event, Event::PollingAlert(alert) if alert.metric == "cache_hit_ratio"));
    }

    #[tokio::test]
    async fn tick_is_silent_when_all_metrics_are_healthy() {
        let bus = Arc::new(BroadcastEventBus::new(8));
        let mut rx = bus.subscribe();
        let source = Arc::new(FixedSource { dlq: 1.0, queue: 1.0, hit_ratio: 0.99 });
        let monitor = PollingMonitor::new(source, bus, PollingMonitorConfig::default());

        monitor.tick().await;

        assert!(rx.try_recv().is_err());
    }
}

// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Runner liveness (spec §4.3): a runner failing its health probe is removed
//! from the live set and its shards are re-assigned. Configurable via
//! `CLUSTER_HEALTH_MODE` (spec §6.4): "k8s" queries pod readiness by label
//! selector; "noop" treats every known runner as healthy (development
//! default).

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Pod;
use kube::api::{Api, ListParams};
use kube::Client;
use std::collections::HashSet;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum HealthError {
    #[error("kubernetes API error: {0}")]
    Kube(#[from] kube::Error),
}

/// Queries which runner ids are currently healthy.
#[async_trait]
pub trait HealthCheck: Send + Sync {
    async fn live_runners(&self) -> Result<HashSet<String>, HealthError>;
}

/// Development default: every runner the shard map has ever heard from is
/// considered healthy. Used when `CLUSTER_HEALTH_MODE=noop` or by default
/// outside a Kubernetes deployment.
pub struct NoopHealth {
    known: HashSet<String>,
}

impl NoopHealth {
    pub fn new(known_runners: impl IntoIterator<Item = String>) -> Self {
        Self { known: known_runners.into_iter().collect() }
    }
}

#[async_trait]
impl HealthCheck for NoopHealth {
    async fn live_runners(&self) -> Result<HashSet<String>, HealthError> {
        Ok(self.known.clone())
    }
}

/// Production health mode: lists pods matching `label_selector` in
/// `namespace` and reports the ones Kubernetes marks `Ready` (spec §4.3 "a
/// runner marked unhealthy by the health check... is removed from the live
/// set"). The pod name (not its IP) is used as the runner id, matching how
/// `cluster_shard_assignment.runner_id` is populated at startup.
pub struct K8sHealth {
    pods: Api<Pod>,
    label_selector: String,
}

impl K8sHealth {
    pub async fn new(namespace: &str, label_selector: impl Into<String>) -> Result<Self, HealthError> {
        let client = Client::try_default().await?;
        Ok(Self { pods: Api::namespaced(client, namespace), label_selector: label_selector.into() })
    }
}

#[async_trait]
impl HealthCheck for K8sHealth {
    async fn live_runners(&self) -> Result<HashSet<String>, HealthError> {
        let params = ListParams::default().labels(&self.label_selector);
        let pods = self.pods.list(&params).await?;
        let live = pods
            .into_iter()
            .filter(|pod| pod_is_ready(pod))
            .filter_map(|pod| pod.metadata.name)
            .collect();
        Ok(live)
    }
}

fn pod_is_ready(pod: &Pod) -> bool {
    pod.status
        .as_ref()
        .and_then(|status| status.conditions.as_ref())
        .map(|conditions| conditions.iter().any(|c| c.type_ == "Ready" && c.status == "True"))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn noop_health_reports_known_runners_as_live() {
        let health = NoopHealth::new(["runner-a".to_string(), "runner-b".to_string()]);
        let live = health.live_runners().await.unwrap();
        assert!(live.contains("runner-a"));
        assert!(live.contains("runner-b"));
        assert_eq!(live.len(), 2);
    }
}

// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The event bus supporting component (spec §2, §6.3): a fan-out publisher
//! for `Event`s emitted on every status transition. `onStatusChange()` in
//! spec §6.1 subscribes to this.

use async_trait::async_trait;
use jobmesh_core::Event;
use tokio::sync::broadcast;

/// Publishes domain events. Kept as a trait so tests can assert on a
/// recording implementation instead of racing a broadcast channel.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, event: Event);
}

/// `tokio::sync::broadcast`-backed bus: every subscriber gets every event in
/// publish order; a subscriber that falls behind the channel's capacity
/// misses the oldest events (broadcast's standard lagged-receiver behavior),
/// which is acceptable here since `onStatusChange` is a best-effort stream,
/// not an audit log.
pub struct BroadcastEventBus {
    sender: broadcast::Sender<Event>,
}

impl BroadcastEventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _receiver) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.sender.subscribe()
    }
}

#[async_trait]
impl EventPublisher for BroadcastEventBus {
    async fn publish(&self, event: Event) {
        // No subscribers is not an error: plenty of events fire before the
        // first `onStatusChange` caller attaches.
        let _ = self.sender.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jobmesh_core::JobId;

    #[tokio::test]
    async fn subscriber_receives_published_events_in_order() {
        let bus = BroadcastEventBus::new(16);
        let mut rx = bus.subscribe();

        bus.publish(Event::JobCancelled { job_id: JobId::from_string("job-1"), tenant_id: "t1".into() }).await;
        bus.publish(Event::JobCancelled { job_id: JobId::from_string("job-2"), tenant_id: "t1".into() }).await;

        let first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();
        assert_eq!(first, Event::JobCancelled { job_id: JobId::from_string("job-1"), tenant_id: "t1".into() });
        assert_eq!(second, Event::JobCancelled { job_id: JobId::from_string("job-2"), tenant_id: "t1".into() });
    }

    #[tokio::test]
    async fn publish_without_subscribers_does_not_error() {
        let bus = BroadcastEventBus::new(4);
        bus.publish(Event::JobCancelled { job_id: JobId::new(), tenant_id: "t1".into() }).await;
    }
}

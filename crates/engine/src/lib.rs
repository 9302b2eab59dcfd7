// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! jobmesh-engine: the job entity, durable workflow envelope, handler
//! registry, progress pub/sub, DLQ watcher, and scheduled/singleton
//! coordinator (spec §4.2, §4.4, §4.5, §4.6, §4.7).

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

pub mod dlq_watcher;
pub mod entity;
pub mod event_bus;
pub mod handler_registry;
pub mod monitor;
pub mod progress;
pub mod scheduler;
pub mod workflow;

pub use dlq_watcher::{DlqWatcher, DlqWatcherConfig, JobResubmitter, REPLAY_PRIORITY};
pub use entity::{JobEntity, JobEntityHandle};
pub use event_bus::{BroadcastEventBus, EventPublisher};
pub use handler_registry::{FnHandler, HandlerRegistry, JobHandler};
pub use monitor::{PollingMonitor, PollingMonitorConfig, PollingSource, PurgeSweep, PurgeSweepConfig};
pub use progress::ProgressHub;
pub use scheduler::{CronEffect, CronSchedule, SchedulerCoordinator, SingletonTask};
pub use workflow::WorkflowEngine;

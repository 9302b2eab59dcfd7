// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! jobmesh-storage: durable Postgres state, cache-first reads, and the
//! workflow checkpoint log (spec §5, §6.2).

pub mod cache;
pub mod checkpoint;
pub mod error;
pub mod postgres;

pub use cache::{Cache, InMemoryCache, RedisCache};
pub use checkpoint::{Checkpoint, CheckpointLog, LogEntry};
pub use error::{StorageError, StorageResult};
pub use postgres::PgStateStore;

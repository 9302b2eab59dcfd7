// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! jobmesh-router: the priority-pool submission router and public
//! `JobService` surface (spec §4.1, §6.1, §6.5).

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

pub mod pool;
pub mod retry;
pub mod service;

pub use pool::PriorityPools;
pub use retry::{with_rpc_retry, MAX_RPC_ATTEMPTS};
pub use service::{JobService, JobServiceConfig};

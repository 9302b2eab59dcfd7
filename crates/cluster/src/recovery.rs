// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Orphaned-message discovery (spec §4.3 `pollStorage`, §6.5
//! `recoverInFlight`, §8's "no orphan `processing` rows remain after the
//! reconciliation sweep").

use jobmesh_core::JobRecord;
use jobmesh_storage::PgStateStore;
use std::sync::Arc;

/// Bounded page size for the recovery sweep, matching the DLQ watcher's page
/// bound (spec §4.6) so recovery doesn't starve normal traffic either.
const RECOVERY_PAGE_SIZE: i64 = 50;

/// Scan storage for `processing` jobs with no live owner and return them for
/// re-dispatch. A runner calls this on startup and whenever it is asked to
/// `recoverInFlight` (spec §6.5).
pub async fn poll_storage(storage: &Arc<PgStateStore>) -> Result<Vec<JobRecord>, jobmesh_storage::StorageError> {
    storage.find_orphaned_processing_jobs(RECOVERY_PAGE_SIZE).await
}

#[cfg(test)]
mod tests {
    // `poll_storage` is a thin wrapper with no branching of its own; its
    // behavior is covered by `jobmesh_storage::find_orphaned_processing_jobs`'s
    // own tests. A dedicated integration test exercising a live Postgres
    // instance belongs in the daemon crate's startup-reconciliation tests.
}

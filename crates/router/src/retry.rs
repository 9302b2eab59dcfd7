// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! RPC-level retry between the router and an entity (spec §4.1): transient
//! delivery failures get a bounded, jittered retry before surfacing to the
//! caller. This sits above the entity's own mailbox semantics -- a full
//! mailbox is retryable here, not just logged.

use jobmesh_core::JobError;
use rand::Rng;
use std::future::Future;
use std::time::Duration;

/// Spec §4.1: "3 attempts, jittered, cap 5s".
pub const MAX_RPC_ATTEMPTS: u32 = 3;
const RPC_BACKOFF_BASE_MS: u64 = 100;
const RPC_BACKOFF_CAP: Duration = Duration::from_secs(5);

fn is_rpc_retryable(err: &JobError) -> bool {
    matches!(err, JobError::SendTimeout { .. } | JobError::RunnerUnavailable { .. } | JobError::MailboxFull { .. })
}

fn jittered_backoff(attempt: u32) -> Duration {
    let exp = RPC_BACKOFF_BASE_MS.saturating_mul(1u64 << attempt.min(10));
    let capped = exp.min(RPC_BACKOFF_CAP.as_millis() as u64);
    Duration::from_millis(rand::thread_rng().gen_range(0..=capped.max(1)))
}

/// Runs `op` up to [`MAX_RPC_ATTEMPTS`] times, retrying only the errors
/// classified retryable at the RPC layer (spec §4.1). Any other error, or
/// exhaustion of the attempt budget, is returned to the caller as-is.
pub async fn with_rpc_retry<F, Fut, T>(mut op: F) -> Result<T, JobError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, JobError>>,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if is_rpc_retryable(&err) && attempt + 1 < MAX_RPC_ATTEMPTS => {
                attempt += 1;
                tokio::time::sleep(jittered_backoff(attempt)).await;
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn retries_mailbox_full_until_it_succeeds() {
        let calls = AtomicU32::new(0);
        let result = with_rpc_retry(|| async {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(JobError::MailboxFull { entity_id: "job-normal-0".to_string() })
            } else {
                Ok(42)
            }
        })
        .await;
        assert_eq!(result, Ok(42));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let calls = AtomicU32::new(0);
        let result: Result<(), JobError> = with_rpc_retry(|| async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(JobError::SendTimeout { after_ms: 50 })
        })
        .await;
        assert_eq!(result, Err(JobError::SendTimeout { after_ms: 50 }));
        assert_eq!(calls.load(Ordering::SeqCst), MAX_RPC_ATTEMPTS);
    }

    #[tokio::test]
    async fn non_retryable_errors_fail_fast() {
        let calls = AtomicU32::new(0);
        let result: Result<(), JobError> = with_rpc_retry(|| async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(JobError::HandlerMissing { job_type: "email.send".to_string() })
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}

// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Job-type -> handler registration (spec §6.1 `registerHandler`, §6.5
//! "handler registry").

use async_trait::async_trait;
use dashmap::DashMap;
use jobmesh_core::JobError;
use serde_json::Value;
use std::sync::Arc;

/// The unit of work a registered handler performs for one attempt of one
/// job. `execute` returns the job's result payload on success; any error is
/// classified by [`JobError::is_retryable`] to drive the workflow's inner
/// retry loop.
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn execute(&self, payload: &Value) -> Result<Value, JobError>;
}

/// A plain async closure wrapped as a [`JobHandler`], for handlers that don't
/// need their own type (the common case in tests and simple deployments).
pub struct FnHandler<F>(F);

impl<F> FnHandler<F> {
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

#[async_trait]
impl<F, Fut> JobHandler for FnHandler<F>
where
    F: Fn(Value) -> Fut + Send + Sync,
    Fut: std::future::Future<Output = Result<Value, JobError>> + Send,
{
    async fn execute(&self, payload: &Value) -> Result<Value, JobError> {
        (self.0)(payload.clone()).await
    }
}

/// Registry mapping a job `type` string to its [`JobHandler`]. Reads and
/// registrations are both lock-free (`DashMap`'s sharded locking), so a
/// handler can be registered concurrently with in-flight dispatch without
/// blocking either side.
#[derive(Default, Clone)]
pub struct HandlerRegistry {
    handlers: Arc<DashMap<String, Arc<dyn JobHandler>>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, job_type: impl Into<String>, handler: Arc<dyn JobHandler>) {
        self.handlers.insert(job_type.into(), handler);
    }

    /// Looks up the handler for `job_type`, or `HandlerMissing` if none was
    /// registered (spec §3 invariant 2: unregistered types fail
    /// pre-execution, consuming no retry attempt).
    pub fn get(&self, job_type: &str) -> Result<Arc<dyn JobHandler>, JobError> {
        self.handlers
            .get(job_type)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| JobError::HandlerMissing { job_type: job_type.to_string() })
    }

    pub fn is_registered(&self, job_type: &str) -> bool {
        self.handlers.contains_key(job_type)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn registered_handler_is_dispatched() {
        let registry = HandlerRegistry::new();
        registry.register("email.send", Arc::new(FnHandler::new(|payload| async move { Ok(payload) })));

        let handler = registry.get("email.send").unwrap();
        let result = handler.execute(&json!({"to": "a@b"})).await.unwrap();
        assert_eq!(result, json!({"to": "a@b"}));
    }

    #[test]
    fn missing_handler_is_classified_as_handler_missing() {
        let registry = HandlerRegistry::new();
        let err = registry.get("unknown.type").unwrap_err();
        assert_eq!(err, JobError::HandlerMissing { job_type: "unknown.type".to_string() });
        assert!(err.is_terminal());
    }

    #[test]
    fn is_registered_reflects_registration_state() {
        let registry = HandlerRegistry::new();
        assert!(!registry.is_registered("email.send"));
        registry.register("email.send", Arc::new(FnHandler::new(|_| async move { Ok(Value::Null) })));
        assert!(registry.is_registered("email.send"));
    }
}

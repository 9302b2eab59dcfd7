// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Submission-side input to the router.

use crate::priority::Priority;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Whether a handler is expected to run briefly or hold resources open.
///
/// `Long` enables keep-alive on the owning entity while the handler is in
/// flight, preventing idle-eviction mid-run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Duration {
    #[default]
    Short,
    Long,
}

crate::simple_display! {
    Duration {
        Short => "short",
        Long => "long",
    }
}

/// Optional request context carried for observability, not interpreted by
/// the engine itself.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestContext {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip_address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
}

/// The input to `JobService::submit`: everything needed to create one
/// `JobRecord`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobEnvelope {
    #[serde(rename = "type")]
    pub job_type: String,
    pub payload: Value,
    pub tenant_id: String,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dedupe_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheduled_at: Option<u64>,
    #[serde(default)]
    pub duration: Duration,
    #[serde(default, flatten)]
    pub context: RequestContext,
}

fn default_max_attempts() -> u32 {
    3
}

crate::builder! {
    pub struct JobEnvelopeBuilder => JobEnvelope {
        into {
            job_type: String = "",
            tenant_id: String = "",
        }
        set {
            payload: Value = Value::Null,
            priority: Priority = Priority::Normal,
            max_attempts: u32 = 3,
            duration: Duration = Duration::Short,
        }
        option {
            dedupe_key: String = None,
            batch_id: String = None,
            scheduled_at: u64 = None,
        }
        computed {
            context: RequestContext = RequestContext::default(),
        }
    }
}

impl JobEnvelope {
    /// The per-item dedupe key for element `index` of a batch submission
    /// (spec §4.1: `dedupeKey + ":" + index`).
    pub fn batch_item_dedupe_key(&self, index: usize) -> Option<String> {
        self.dedupe_key.as_ref().map(|k| format!("{k}:{index}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn batch_item_dedupe_key_appends_index() {
        let env = JobEnvelope::builder().job_type("thumbnail").tenant_id("t1").dedupe_key("t-1").build();
        assert_eq!(env.batch_item_dedupe_key(0).as_deref(), Some("t-1:0"));
        assert_eq!(env.batch_item_dedupe_key(7).as_deref(), Some("t-1:7"));
    }

    #[test]
    fn batch_item_dedupe_key_absent_without_dedupe_key() {
        let env = JobEnvelope::builder().job_type("thumbnail").tenant_id("t1").build();
        assert_eq!(env.batch_item_dedupe_key(0), None);
    }

    #[test]
    fn default_max_attempts_is_three() {
        let json = serde_json::json!({
            "type": "email.send",
            "payload": {"to": "a@b"},
            "tenantId": "t1",
        });
        let env: JobEnvelope = serde_json::from_value(json).unwrap();
        assert_eq!(env.max_attempts, 3);
        assert_eq!(env.priority, Priority::Normal);
        assert_eq!(env.duration, Duration::Short);
    }
}

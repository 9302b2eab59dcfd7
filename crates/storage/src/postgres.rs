// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Postgres-backed durable state (spec §6.2's table-level contract).

use jobmesh_core::{DlqEntry, DlqId, JobId, JobRecord, ShardAssignment, ShardGroupId};
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};

use crate::error::{StorageError, StorageResult};

/// Shared connection pool for everything except advisory-lock holders,
/// which need a dedicated single connection (spec §4.3) to avoid losing the
/// lock to pool recycling.
#[derive(Clone)]
pub struct PgStateStore {
    pool: PgPool,
}

impl PgStateStore {
    pub async fn connect(database_url: &str) -> StorageResult<Self> {
        let pool = PgPoolOptions::new().max_connections(20).connect(database_url).await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Insert a newly-submitted job. Returns the existing record instead if
    /// one matching `(tenantId, dedupeKey)` is already non-terminal (spec §3
    /// invariant 5), letting the caller set `duplicate = true`.
    pub async fn insert_job_or_get_duplicate(&self, record: &JobRecord) -> StorageResult<(JobRecord, bool)> {
        if let Some(dedupe_key) = &record.dedupe_key {
            if let Some(existing) = self.find_active_by_dedupe_key(&record.tenant_id, dedupe_key).await? {
                return Ok((existing, true));
            }
        }

        let history = serde_json::to_value(&record.history)?;
        let progress = record.progress.as_ref().map(serde_json::to_value).transpose()?;

        sqlx::query(
            r#"
            INSERT INTO jobs
                (job_id, tenant_id, type, status, attempts, max_attempts, payload, priority,
                 history, result, last_error, progress, created_at, updated_at, completed_at,
                 dedupe_key, batch_id, scheduled_at)
            VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13,$14,$15,$16,$17,$18)
            "#,
        )
        .bind(record.job_id.as_str())
        .bind(&record.tenant_id)
        .bind(&record.job_type)
        .bind(record.status.to_string())
        .bind(record.attempts as i32)
        .bind(record.max_attempts as i32)
        .bind(&record.payload)
        .bind(record.priority.to_string())
        .bind(&history)
        .bind(&record.result)
        .bind(record.last_error.as_ref().map(serde_json::to_value).transpose()?)
        .bind(&progress)
        .bind(record.created_at as i64)
        .bind(record.updated_at as i64)
        .bind(record.completed_at.map(|v| v as i64))
        .bind(&record.dedupe_key)
        .bind(&record.batch_id)
        .bind(record.scheduled_at.map(|v| v as i64))
        .execute(&self.pool)
        .await?;

        Ok((record.clone(), false))
    }

    async fn find_active_by_dedupe_key(&self, tenant_id: &str, dedupe_key: &str) -> StorageResult<Option<JobRecord>> {
        let row = sqlx::query(
            r#"
            SELECT raw FROM jobs_view
            WHERE tenant_id = $1 AND dedupe_key = $2 AND status IN ('queued', 'processing')
            LIMIT 1
            "#,
        )
        .bind(tenant_id)
        .bind(dedupe_key)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| serde_json::from_value(r.get("raw")).map_err(StorageError::from)).transpose()
    }

    /// `status(jobId)` falls back to this on a cache miss; returns `None`
    /// (not an error) for an unknown job, per spec §7's "status never fails"
    /// user-visible behavior — the caller substitutes the default queued
    /// response.
    pub async fn get_job(&self, job_id: &JobId) -> StorageResult<Option<JobRecord>> {
        let row = sqlx::query("SELECT raw FROM jobs_view WHERE job_id = $1")
            .bind(job_id.as_str())
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| serde_json::from_value(r.get("raw")).map_err(StorageError::from)).transpose()
    }

    pub async fn save_job(&self, record: &JobRecord) -> StorageResult<()> {
        let history = serde_json::to_value(&record.history)?;
        sqlx::query(
            r#"
            UPDATE jobs SET
                status = $2, attempts = $3, history = $4, result = $5, last_error = $6,
                progress = $7, updated_at = $8, completed_at = $9
            WHERE job_id = $1
            "#,
        )
        .bind(record.job_id.as_str())
        .bind(record.status.to_string())
        .bind(record.attempts as i32)
        .bind(&history)
        .bind(&record.result)
        .bind(record.last_error.as_ref().map(serde_json::to_value).transpose()?)
        .bind(record.progress.as_ref().map(serde_json::to_value).transpose()?)
        .bind(record.updated_at as i64)
        .bind(record.completed_at.map(|v| v as i64))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn insert_dlq_entry(&self, entry: &DlqEntry) -> StorageResult<()> {
        sqlx::query(
            r#"
            INSERT INTO job_dlq
                (id, tenant_id, source, source_id, type, payload, attempts, error_reason,
                 error_history, created_at, replayed_at)
            VALUES ($1,'job',$2,$3,$4,$5,$6,$7,$8,$9,$10)
            "#,
        )
        .bind(entry.id.as_str())
        .bind(&entry.tenant_id)
        .bind(entry.source_id.as_str())
        .bind(&entry.job_type)
        .bind(&entry.payload)
        .bind(entry.attempts as i32)
        .bind(entry.error_reason.to_string())
        .bind(serde_json::to_value(&entry.error_history)?)
        .bind(entry.created_at as i64)
        .bind(entry.replayed_at.map(|v| v as i64))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Page through DlqEntries eligible for the watcher's auto-replay sweep
    /// (spec §4.6: `source = job`, `attempts <= maxRetries`, 50 per page).
    pub async fn dlq_page(&self, tenant_id: &str, max_retries: u32, limit: i64) -> StorageResult<Vec<DlqEntry>> {
        let rows = sqlx::query(
            r#"
            SELECT raw FROM job_dlq_view
            WHERE tenant_id = $1 AND source = 'job' AND attempts <= $2
            ORDER BY created_at ASC
            LIMIT $3
            "#,
        )
        .bind(tenant_id)
        .bind(max_retries as i32)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(|r| serde_json::from_value(r.get("raw")).map_err(StorageError::from)).collect()
    }

    /// Single-row lookup backing the `replay(dlqId)` admin RPC (spec §6.5),
    /// which doesn't know the owning tenant ahead of time.
    pub async fn dlq_entry(&self, dlq_id: &DlqId) -> StorageResult<Option<DlqEntry>> {
        let row = sqlx::query("SELECT raw FROM job_dlq_view WHERE id = $1")
            .bind(dlq_id.as_str())
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| serde_json::from_value(r.get("raw")).map_err(StorageError::from)).transpose()
    }

    /// Tenants with at least one replayable DlqEntry, for the watcher to page
    /// through tenant-by-tenant (spec §4.6: "page through all tenants").
    pub async fn distinct_dlq_tenants(&self) -> StorageResult<Vec<String>> {
        let rows = sqlx::query("SELECT DISTINCT tenant_id FROM job_dlq WHERE source = 'job'")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(|r| r.get("tenant_id")).collect())
    }

    /// Persists the watcher's bookkeeping after a replay attempt: bumped
    /// `attempts`, appended `errorHistory`, and `replayedAt` cleared or set.
    pub async fn update_dlq_entry(&self, entry: &DlqEntry) -> StorageResult<()> {
        sqlx::query(
            r#"
            UPDATE job_dlq SET
                attempts = $2, error_reason = $3, error_history = $4, replayed_at = $5
            WHERE id = $1
            "#,
        )
        .bind(entry.id.as_str())
        .bind(entry.attempts as i32)
        .bind(entry.error_reason.to_string())
        .bind(serde_json::to_value(&entry.error_history)?)
        .bind(entry.replayed_at.map(|v| v as i64))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn upsert_shard_assignment(&self, assignment: &ShardAssignment) -> StorageResult<()> {
        sqlx::query(
            r#"
            INSERT INTO cluster_shard_assignment (grp, shard_id, runner_id, lock_token, updated_at)
            VALUES ($1,$2,$3,$4,$5)
            ON CONFLICT (grp, shard_id) DO UPDATE SET
                runner_id = EXCLUDED.runner_id,
                lock_token = EXCLUDED.lock_token,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(assignment.group.0 as i32)
        .bind(assignment.shard_id as i32)
        .bind(&assignment.runner_id)
        .bind(&assignment.lock_token)
        .bind(assignment.updated_at as i64)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn shard_assignment(&self, group: ShardGroupId, shard_id: u32) -> StorageResult<Option<ShardAssignment>> {
        let row = sqlx::query(
            "SELECT grp, shard_id, runner_id, lock_token, updated_at FROM cluster_shard_assignment WHERE grp = $1 AND shard_id = $2",
        )
        .bind(group.0 as i32)
        .bind(shard_id as i32)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| ShardAssignment {
            group: ShardGroupId(r.get::<i32, _>("grp") as u16),
            shard_id: r.get::<i32, _>("shard_id") as u32,
            runner_id: r.get("runner_id"),
            lock_token: r.get("lock_token"),
            updated_at: r.get::<i64, _>("updated_at") as u64,
        }))
    }

    /// Reads `singleton_state` for a named singleton task, used by the
    /// scheduled/singleton coordinator (spec §4.7) to recover schema-
    /// versioned state across leadership handoffs.
    pub async fn singleton_state(&self, name: &str) -> StorageResult<Option<serde_json::Value>> {
        let row = sqlx::query("SELECT state FROM singleton_state WHERE name = $1")
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| r.get("state")))
    }

    pub async fn save_singleton_state(
        &self,
        name: &str,
        schema_version: i32,
        state: &serde_json::Value,
        leader_id: &str,
        now_ms: u64,
    ) -> StorageResult<()> {
        sqlx::query(
            r#"
            INSERT INTO singleton_state (name, schema_version, state, leader_id, updated_at)
            VALUES ($1,$2,$3,$4,$5)
            ON CONFLICT (name) DO UPDATE SET
                schema_version = EXCLUDED.schema_version,
                state = EXCLUDED.state,
                leader_id = EXCLUDED.leader_id,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(name)
        .bind(schema_version)
        .bind(state)
        .bind(leader_id)
        .bind(now_ms as i64)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Purge sweep: hard-delete completed/cancelled jobs past
    /// `completed_ttl_days` and failed jobs past `failed_ttl_days` (spec
    /// §6.2 retention policy).
    pub async fn purge_expired_jobs(&self, completed_ttl_days: u32, failed_ttl_days: u32, now_ms: u64) -> StorageResult<u64> {
        let completed_floor = now_ms.saturating_sub(completed_ttl_days as u64 * 86_400_000);
        let failed_floor = now_ms.saturating_sub(failed_ttl_days as u64 * 86_400_000);

        let result = sqlx::query(
            r#"
            DELETE FROM jobs
            WHERE (status IN ('complete', 'cancelled') AND completed_at < $1)
               OR (status = 'failed' AND completed_at < $2)
            "#,
        )
        .bind(completed_floor as i64)
        .bind(failed_floor as i64)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    /// Recovery reconciliation sweep (spec §4.4/§8 round-trip law: no orphan
    /// `processing` rows survive a crash-restart cycle). Returns jobs still
    /// marked `processing` with no live owner, for re-dispatch by
    /// `recoverInFlight`.
    pub async fn find_orphaned_processing_jobs(&self, limit: i64) -> StorageResult<Vec<JobRecord>> {
        let rows = sqlx::query("SELECT raw FROM jobs_view WHERE status = 'processing' ORDER BY updated_at ASC LIMIT $1")
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(|r| serde_json::from_value(r.get("raw")).map_err(StorageError::from)).collect()
    }
}

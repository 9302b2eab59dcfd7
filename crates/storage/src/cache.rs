// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Cache-first reads for status/progress and the heartbeat keyspace (spec
//! §5's State Store contract). Backed by Redis in production; an in-memory
//! `DashMap` implementation is used for single-process deployments and
//! tests.

use async_trait::async_trait;
use dashmap::DashMap;
use std::time::{Duration, Instant};

use crate::error::StorageResult;

/// Cache-first key/value store with TTL semantics, used for job status
/// snapshots, progress values, and per-job heartbeat keys.
#[async_trait]
pub trait Cache: Send + Sync {
    async fn get(&self, key: &str) -> StorageResult<Option<String>>;
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> StorageResult<()>;
    async fn delete(&self, key: &str) -> StorageResult<()>;
    /// Refreshes a key's TTL without touching its value; used for heartbeat
    /// keep-alive (spec §4.2: TTL 30s, refresh every 10s).
    async fn touch(&self, key: &str, ttl: Duration) -> StorageResult<()>;
}

/// Redis-backed [`Cache`] using a connection manager so a dropped connection
/// is transparently re-established (spec §6.4 `POSTGRES_*`/redis connection
/// config is supplied by the caller).
pub struct RedisCache {
    manager: redis::aio::ConnectionManager,
}

impl RedisCache {
    pub async fn connect(redis_url: &str) -> StorageResult<Self> {
        let client = redis::Client::open(redis_url)?;
        let manager = client.get_connection_manager().await?;
        Ok(Self { manager })
    }
}

#[async_trait]
impl Cache for RedisCache {
    async fn get(&self, key: &str) -> StorageResult<Option<String>> {
        let mut conn = self.manager.clone();
        let value: Option<String> = redis::cmd("GET").arg(key).query_async(&mut conn).await?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> StorageResult<()> {
        let mut conn = self.manager.clone();
        redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("PX")
            .arg(ttl.as_millis() as u64)
            .query_async::<()>(&mut conn)
            .await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        let mut conn = self.manager.clone();
        redis::cmd("DEL").arg(key).query_async::<()>(&mut conn).await?;
        Ok(())
    }

    async fn touch(&self, key: &str, ttl: Duration) -> StorageResult<()> {
        let mut conn = self.manager.clone();
        redis::cmd("PEXPIRE").arg(key).arg(ttl.as_millis() as u64).query_async::<()>(&mut conn).await?;
        Ok(())
    }
}

struct Entry {
    value: String,
    expires_at: Instant,
}

/// In-process `Cache` for single-runner deployments and tests. Expiry is
/// checked lazily on read; there is no background sweeper.
#[derive(Default)]
pub struct InMemoryCache {
    entries: DashMap<String, Entry>,
}

impl InMemoryCache {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Cache for InMemoryCache {
    async fn get(&self, key: &str) -> StorageResult<Option<String>> {
        match self.entries.get(key) {
            Some(entry) if entry.expires_at > Instant::now() => Ok(Some(entry.value.clone())),
            Some(_) => {
                self.entries.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> StorageResult<()> {
        self.entries.insert(key.to_string(), Entry { value: value.to_string(), expires_at: Instant::now() + ttl });
        Ok(())
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        self.entries.remove(key);
        Ok(())
    }

    async fn touch(&self, key: &str, ttl: Duration) -> StorageResult<()> {
        if let Some(mut entry) = self.entries.get_mut(key) {
            entry.expires_at = Instant::now() + ttl;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn get_returns_none_for_missing_key() {
        let cache = InMemoryCache::new();
        assert_eq!(cache.get("missing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn set_then_get_round_trips() {
        let cache = InMemoryCache::new();
        cache.set("heartbeat:job-1", "alive", Duration::from_secs(30)).await.unwrap();
        assert_eq!(cache.get("heartbeat:job-1").await.unwrap(), Some("alive".to_string()));
    }

    #[tokio::test]
    async fn expired_entries_read_as_missing() {
        let cache = InMemoryCache::new();
        cache.set("k", "v", Duration::from_millis(1)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(cache.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn delete_removes_key() {
        let cache = InMemoryCache::new();
        cache.set("k", "v", Duration::from_secs(30)).await.unwrap();
        cache.delete("k").await.unwrap();
        assert_eq!(cache.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn touch_extends_ttl_without_changing_value() {
        let cache = InMemoryCache::new();
        cache.set("k", "v", Duration::from_millis(10)).await.unwrap();
        cache.touch("k", Duration::from_secs(30)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(cache.get("k").await.unwrap(), Some("v".to_string()));
    }
}

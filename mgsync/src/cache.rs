//! Key/value cache with per-entry expiry.
//!
//! Two things live here: event dedup markers (`event:processed:{event_id}`) and persisted
//! sync reports (`sync:result:{timestamp}` plus `sync:latest`). The Postgres backend is the
//! default so that every replica sees the same dedup markers; the in-memory backend is for
//! single-process runs and tests.
//!
//! Callers go through [`lookup`] and [`store`], which log cache failures and carry on.
//! A broken cache therefore degrades to "nothing is cached" instead of failing requests.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use moka::{Expiry, future::Cache as MokaCache};
use serde_json::Value;
use sqlx::PgPool;
use tracing::{instrument, warn};

/// Prefix of event dedup markers
pub const PROCESSED_EVENT_PREFIX: &str = "event:processed:";
/// Prefix of persisted sync reports
pub const SYNC_RESULT_PREFIX: &str = "sync:result:";
/// Always points at the most recent sync report
pub const SYNC_LATEST_KEY: &str = "sync:latest";

pub fn processed_event_key(event_id: &str) -> String {
    format!("{PROCESSED_EVENT_PREFIX}{event_id}")
}

pub fn sync_result_key(started_at: DateTime<Utc>) -> String {
    format!("{SYNC_RESULT_PREFIX}{}", started_at.format("%Y%m%d_%H%M%S"))
}

#[async_trait]
pub trait Cache: Send + Sync {
    /// Value stored under `key`, unless absent or expired
    async fn get(&self, key: &str) -> anyhow::Result<Option<Value>>;

    /// Store `value` under `key`, replacing any previous value and expiry
    async fn set(&self, key: &str, value: Value, ttl: Duration) -> anyhow::Result<()>;

    /// Drop expired entries, returning how many were removed
    async fn purge_expired(&self) -> anyhow::Result<u64>;
}

/// Read through the cache, treating failures as misses
pub async fn lookup(cache: &dyn Cache, key: &str) -> Option<Value> {
    match cache.get(key).await {
        Ok(value) => value,
        Err(e) => {
            warn!(key, error = %e, "Cache read failed, treating as miss");
            None
        }
    }
}

/// Write through the cache, logging failures
pub async fn store(cache: &dyn Cache, key: &str, value: Value, ttl: Duration) {
    if let Err(e) = cache.set(key, value, ttl).await {
        warn!(key, error = %e, "Cache write failed");
    }
}

/// Cache backed by the `cache_entries` table
#[derive(Clone)]
pub struct PostgresCache {
    pool: PgPool,
}

impl PostgresCache {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Cache for PostgresCache {
    #[instrument(skip(self), err)]
    async fn get(&self, key: &str) -> anyhow::Result<Option<Value>> {
        let value = sqlx::query_scalar::<_, Value>("SELECT value FROM cache_entries WHERE key = $1 AND expires_at > NOW()")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(value)
    }

    #[instrument(skip(self, value), err)]
    async fn set(&self, key: &str, value: Value, ttl: Duration) -> anyhow::Result<()> {
        let expires_at = Utc::now() + chrono::Duration::from_std(ttl)?;
        sqlx::query(
            r#"
            INSERT INTO cache_entries (key, value, expires_at)
            VALUES ($1, $2, $3)
            ON CONFLICT (key) DO UPDATE SET value = EXCLUDED.value, expires_at = EXCLUDED.expires_at
            "#,
        )
        .bind(key)
        .bind(value)
        .bind(expires_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    #[instrument(skip(self), err)]
    async fn purge_expired(&self) -> anyhow::Result<u64> {
        let result = sqlx::query("DELETE FROM cache_entries WHERE expires_at <= NOW()")
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

#[derive(Clone)]
struct Entry {
    value: Value,
    ttl: Duration,
}

struct PerEntryTtl;

impl Expiry<String, Entry> for PerEntryTtl {
    fn expire_after_create(&self, _key: &String, entry: &Entry, _created_at: Instant) -> Option<Duration> {
        Some(entry.ttl)
    }

    fn expire_after_update(
        &self,
        _key: &String,
        entry: &Entry,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        Some(entry.ttl)
    }
}

/// Process-local cache
#[derive(Clone)]
pub struct MemoryCache {
    cache: MokaCache<String, Entry>,
}

impl MemoryCache {
    pub fn new(max_capacity: u64) -> Self {
        let cache = MokaCache::builder()
            .max_capacity(max_capacity)
            .expire_after(PerEntryTtl)
            .build();
        Self { cache }
    }
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::new(100_000)
    }
}

#[async_trait]
impl Cache for MemoryCache {
    async fn get(&self, key: &str) -> anyhow::Result<Option<Value>> {
        Ok(self.cache.get(key).await.map(|entry| entry.value))
    }

    async fn set(&self, key: &str, value: Value, ttl: Duration) -> anyhow::Result<()> {
        self.cache.insert(key.to_string(), Entry { value, ttl }).await;
        Ok(())
    }

    async fn purge_expired(&self) -> anyhow::Result<u64> {
        let before = self.cache.entry_count();
        self.cache.run_pending_tasks().await;
        Ok(before.saturating_sub(self.cache.entry_count()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    struct BrokenCache;

    #[async_trait]
    impl Cache for BrokenCache {
        async fn get(&self, _key: &str) -> anyhow::Result<Option<Value>> {
            anyhow::bail!("connection refused")
        }

        async fn set(&self, _key: &str, _value: Value, _ttl: Duration) -> anyhow::Result<()> {
            anyhow::bail!("connection refused")
        }

        async fn purge_expired(&self) -> anyhow::Result<u64> {
            anyhow::bail!("connection refused")
        }
    }

    #[test]
    fn test_keys() {
        assert_eq!(processed_event_key("evt-1"), "event:processed:evt-1");
        let started = Utc.with_ymd_and_hms(2025, 7, 1, 9, 5, 3).unwrap();
        assert_eq!(sync_result_key(started), "sync:result:20250701_090503");
    }

    #[tokio::test]
    async fn test_memory_cache_round_trip_and_replace() {
        let cache = MemoryCache::default();
        cache.set("k", json!({"a": 1}), Duration::from_secs(60)).await.unwrap();
        assert_eq!(cache.get("k").await.unwrap(), Some(json!({"a": 1})));

        cache.set("k", json!({"a": 2}), Duration::from_secs(60)).await.unwrap();
        assert_eq!(cache.get("k").await.unwrap(), Some(json!({"a": 2})));
        assert_eq!(cache.get("missing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_memory_cache_entries_expire() {
        let cache = MemoryCache::default();
        cache.set("short", json!(1), Duration::from_millis(20)).await.unwrap();
        cache.set("long", json!(2), Duration::from_secs(60)).await.unwrap();

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(cache.get("short").await.unwrap(), None);
        assert_eq!(cache.get("long").await.unwrap(), Some(json!(2)));
    }

    #[test_log::test(tokio::test)]
    async fn test_failures_degrade_to_misses() {
        let cache = BrokenCache;
        assert_eq!(lookup(&cache, "k").await, None);
        store(&cache, "k", json!(1), Duration::from_secs(1)).await;
    }
}

#[cfg(all(test, feature = "postgres-tests"))]
mod postgres_tests {
    use super::*;
    use serde_json::json;

    #[sqlx::test]
    async fn test_postgres_cache_expiry_and_purge(pool: PgPool) {
        let cache = PostgresCache::new(pool.clone());
        cache.set("live", json!({"ok": true}), Duration::from_secs(60)).await.unwrap();
        cache.set("stale", json!(1), Duration::from_secs(60)).await.unwrap();
        sqlx::query("UPDATE cache_entries SET expires_at = NOW() - INTERVAL '1 second' WHERE key = 'stale'")
            .execute(&pool)
            .await
            .unwrap();

        assert_eq!(cache.get("live").await.unwrap(), Some(json!({"ok": true})));
        assert_eq!(cache.get("stale").await.unwrap(), None);
        assert_eq!(cache.purge_expired().await.unwrap(), 1);

        cache.set("live", json!(2), Duration::from_secs(60)).await.unwrap();
        assert_eq!(cache.get("live").await.unwrap(), Some(json!(2)));
    }
}

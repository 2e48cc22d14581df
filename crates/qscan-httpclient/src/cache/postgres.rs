//! Postgres-JSONB implementation of [`super::PersistentCacheStore`]. Thin
//! delegation to `qscan-db` — all the SQL lives there since `qscan-db` also
//! owns the schema and migrations.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use qscan_schemas::CacheEntry;
use sqlx::PgPool;

use super::{CacheStats, EvictionOrder, PersistentCacheStore};

pub struct PostgresCacheStore {
    pool: PgPool,
}

impl PostgresCacheStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PersistentCacheStore for PostgresCacheStore {
    async fn get(&self, cache_key: &str) -> anyhow::Result<Option<CacheEntry>> {
        qscan_db::cache_get(&self.pool, cache_key).await
    }

    async fn put(&self, entry: &CacheEntry) -> anyhow::Result<()> {
        qscan_db::cache_put(&self.pool, entry).await
    }

    async fn touch(&self, cache_key: &str, at: DateTime<Utc>) -> anyhow::Result<()> {
        qscan_db::cache_touch(&self.pool, cache_key, at).await
    }

    async fn delete(&self, cache_keys: &[String]) -> anyhow::Result<u64> {
        qscan_db::cache_delete(&self.pool, cache_keys).await
    }

    async fn list_for_eviction(&self, order: EvictionOrder, limit: i64) -> anyhow::Result<Vec<CacheEntry>> {
        match order {
            EvictionOrder::OldestCreated => qscan_db::cache_list_oldest(&self.pool, limit).await,
            EvictionOrder::LeastRecentlyAccessed => {
                qscan_db::cache_list_least_recently_accessed(&self.pool, limit).await
            }
        }
    }

    async fn clear(&self) -> anyhow::Result<u64> {
        let all = qscan_db::cache_list_oldest(&self.pool, i64::MAX).await?;
        let keys: Vec<String> = all.into_iter().map(|e| e.cache_key).collect();
        qscan_db::cache_delete(&self.pool, &keys).await
    }

    async fn stats(&self) -> anyhow::Result<CacheStats> {
        let (entry_count, total_bytes) = qscan_db::cache_stats(&self.pool).await?;
        Ok(CacheStats { entry_count, total_bytes })
    }

    async fn version(&self) -> anyhow::Result<Option<u32>> {
        qscan_db::cache_version(&self.pool).await
    }

    async fn set_version(&self, version: u32) -> anyhow::Result<()> {
        qscan_db::cache_set_version(&self.pool, version).await
    }
}

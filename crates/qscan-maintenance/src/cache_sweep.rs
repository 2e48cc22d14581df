//! Cache-tier maintenance sweep (S4.4 "Cache tier"). Runs against the
//! `PersistentCacheStore` trait so it works identically over the
//! Postgres-JSONB adapter and the file-backed one.

use qscan_httpclient::cache::EvictionOrder;
use qscan_httpclient::PersistentCacheStore;
use std::sync::Arc;

#[derive(Debug, Clone, Copy)]
pub struct CacheSweepConfig {
    pub entry_count_ceiling: i64,
    pub size_ceiling_bytes: usize,
}

impl Default for CacheSweepConfig {
    fn default() -> Self {
        Self {
            entry_count_ceiling: 50_000,
            size_ceiling_bytes: 500 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct CacheSweepReport {
    pub expired_deleted: u64,
    pub over_count_deleted: u64,
    pub over_size_deleted: u64,
}

/// (a) delete expired, (b) trim to the entry-count ceiling oldest-first,
/// (c) trim oldest 10% if over the size ceiling. Orphan removal (missing
/// required fields) is Postgres-only — see [`sweep_orphans`], since the
/// file-backed adapter's `CacheEntry` is always well-formed by
/// construction (it cannot be partially written the way a JSONB row can).
pub async fn sweep(
    store: &Arc<dyn PersistentCacheStore>,
    config: CacheSweepConfig,
) -> anyhow::Result<CacheSweepReport> {
    let mut report = CacheSweepReport::default();
    let now = chrono::Utc::now();

    let stale: Vec<String> = store
        .list_for_eviction(EvictionOrder::OldestCreated, i64::MAX)
        .await?
        .into_iter()
        .filter(|e| e.is_expired(now))
        .map(|e| e.cache_key)
        .collect();
    if !stale.is_empty() {
        report.expired_deleted = store.delete(&stale).await?;
    }

    let stats = store.stats().await?;
    if stats.entry_count > config.entry_count_ceiling {
        let overflow = stats.entry_count - config.entry_count_ceiling;
        let victims = store.list_for_eviction(EvictionOrder::OldestCreated, overflow).await?;
        let keys: Vec<String> = victims.into_iter().map(|e| e.cache_key).collect();
        report.over_count_deleted = store.delete(&keys).await?;
    }

    let remaining = store.list_for_eviction(EvictionOrder::OldestCreated, i64::MAX).await?;
    let total_bytes: usize = remaining.iter().map(|e| e.approx_bytes()).sum();
    if total_bytes > config.size_ceiling_bytes {
        let drop_count = (remaining.len() as f64 * 0.1).ceil() as usize;
        let keys: Vec<String> = remaining.into_iter().take(drop_count).map(|e| e.cache_key).collect();
        report.over_size_deleted = store.delete(&keys).await?;
    }

    Ok(report)
}

/// (d) delete entries whose persisted doc is missing a required field.
/// Only meaningful against the Postgres adapter, which is the only store
/// that can hold a malformed row in the first place.
pub async fn sweep_orphans(pool: &sqlx::PgPool) -> anyhow::Result<u64> {
    let orphans = qscan_db::cache_list_malformed(pool).await?;
    qscan_db::cache_delete(pool, &orphans).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use qscan_httpclient::FileCacheStore;
    use qscan_schemas::CacheEntry;

    fn entry(key: &str, created_offset_secs: i64, expired: bool) -> CacheEntry {
        let now = chrono::Utc::now();
        CacheEntry {
            cache_key: key.to_string(),
            api_endpoint: "/v1/x".into(),
            params: serde_json::json!({}),
            data: serde_json::json!({"v": 1}),
            created_at: now + chrono::Duration::seconds(created_offset_secs),
            updated_at: now,
            last_accessed_at: now,
            expires_at: if expired {
                now - chrono::Duration::minutes(1)
            } else {
                now + chrono::Duration::hours(1)
            },
        }
    }

    #[tokio::test]
    async fn expired_entries_are_removed() {
        let dir = tempfile::tempdir().unwrap();
        let store: Arc<dyn PersistentCacheStore> =
            Arc::new(FileCacheStore::new(dir.path()).await.unwrap());
        store.put(&entry("fresh", 0, false)).await.unwrap();
        store.put(&entry("stale", 0, true)).await.unwrap();

        let report = sweep(&store, CacheSweepConfig::default()).await.unwrap();
        assert_eq!(report.expired_deleted, 1);
        assert!(store.get("fresh").await.unwrap().is_some());
        assert!(store.get("stale").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn over_count_ceiling_evicts_oldest() {
        let dir = tempfile::tempdir().unwrap();
        let store: Arc<dyn PersistentCacheStore> =
            Arc::new(FileCacheStore::new(dir.path()).await.unwrap());
        store.put(&entry("older", -60, false)).await.unwrap();
        store.put(&entry("newer", 0, false)).await.unwrap();

        let report = sweep(
            &store,
            CacheSweepConfig { entry_count_ceiling: 1, size_ceiling_bytes: usize::MAX },
        )
        .await
        .unwrap();
        assert_eq!(report.over_count_deleted, 1);
        assert!(store.get("older").await.unwrap().is_none());
        assert!(store.get("newer").await.unwrap().is_some());
    }
}

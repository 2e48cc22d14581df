//! Local file-backed persistent cache tier, used when no database is
//! configured. One JSON file per cache key under `base_dir`; a process-wide
//! mutex serializes writes since multiple tasks may flush concurrently.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use qscan_schemas::CacheEntry;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;

use super::{CacheStats, EvictionOrder, PersistentCacheStore};

const VERSION_FILE_NAME: &str = "cache.version";

pub struct FileCacheStore {
    base_dir: PathBuf,
    lock: Mutex<()>,
}

impl FileCacheStore {
    pub async fn new(base_dir: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let base_dir = base_dir.into();
        tokio::fs::create_dir_all(&base_dir).await?;
        Ok(Self {
            base_dir,
            lock: Mutex::new(()),
        })
    }

    fn path_for(&self, cache_key: &str) -> PathBuf {
        let safe = cache_key.replace('/', "_").replace(':', "_");
        self.base_dir.join(format!("{safe}.json"))
    }

    fn version_path(&self) -> PathBuf {
        self.base_dir.join(VERSION_FILE_NAME)
    }

    async fn read_entry(path: &Path) -> anyhow::Result<Option<CacheEntry>> {
        match tokio::fs::read(path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// All entry files under `base_dir`, skipping the version tag and any
    /// in-flight `.json.tmp` write.
    async fn read_all_entries(&self) -> anyhow::Result<Vec<CacheEntry>> {
        let mut entries = Vec::new();
        let mut dir = tokio::fs::read_dir(&self.base_dir).await?;
        while let Some(file) = dir.next_entry().await? {
            let path = file.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            if let Some(entry) = Self::read_entry(&path).await? {
                entries.push(entry);
            }
        }
        Ok(entries)
    }
}

#[async_trait]
impl PersistentCacheStore for FileCacheStore {
    async fn get(&self, cache_key: &str) -> anyhow::Result<Option<CacheEntry>> {
        Self::read_entry(&self.path_for(cache_key)).await
    }

    async fn put(&self, entry: &CacheEntry) -> anyhow::Result<()> {
        let _guard = self.lock.lock().await;
        let bytes = serde_json::to_vec(entry)?;
        let path = self.path_for(&entry.cache_key);
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, &bytes).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }

    async fn touch(&self, cache_key: &str, at: DateTime<Utc>) -> anyhow::Result<()> {
        let _guard = self.lock.lock().await;
        let path = self.path_for(cache_key);
        let Some(mut entry) = Self::read_entry(&path).await? else {
            return Ok(());
        };
        entry.last_accessed_at = at;
        let bytes = serde_json::to_vec(&entry)?;
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, &bytes).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }

    async fn delete(&self, cache_keys: &[String]) -> anyhow::Result<u64> {
        let _guard = self.lock.lock().await;
        let mut deleted = 0u64;
        for key in cache_keys {
            let path = self.path_for(key);
            if tokio::fs::remove_file(&path).await.is_ok() {
                deleted += 1;
            }
        }
        Ok(deleted)
    }

    async fn list_for_eviction(&self, order: EvictionOrder, limit: i64) -> anyhow::Result<Vec<CacheEntry>> {
        let mut entries = self.read_all_entries().await?;
        match order {
            EvictionOrder::OldestCreated => entries.sort_by_key(|e| e.created_at),
            EvictionOrder::LeastRecentlyAccessed => entries.sort_by_key(|e| e.last_accessed_at),
        }
        entries.truncate(limit.max(0) as usize);
        Ok(entries)
    }

    async fn clear(&self) -> anyhow::Result<u64> {
        let _guard = self.lock.lock().await;
        let mut removed = 0u64;
        let mut dir = tokio::fs::read_dir(&self.base_dir).await?;
        while let Some(file) = dir.next_entry().await? {
            if file.file_name() == VERSION_FILE_NAME {
                continue;
            }
            if tokio::fs::remove_file(file.path()).await.is_ok() {
                removed += 1;
            }
        }
        Ok(removed)
    }

    async fn stats(&self) -> anyhow::Result<CacheStats> {
        let entries = self.read_all_entries().await?;
        let entry_count = entries.len() as i64;
        let total_bytes: i64 = entries.iter().map(|e| e.approx_bytes() as i64).sum();
        Ok(CacheStats { entry_count, total_bytes })
    }

    async fn version(&self) -> anyhow::Result<Option<u32>> {
        match tokio::fs::read_to_string(self.version_path()).await {
            Ok(s) => Ok(s.trim().parse::<u32>().ok()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn set_version(&self, version: u32) -> anyhow::Result<()> {
        let _guard = self.lock.lock().await;
        tokio::fs::write(self.version_path(), version.to_string()).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn sample_entry(key: &str) -> CacheEntry {
        let now = Utc::now();
        CacheEntry {
            cache_key: key.to_string(),
            api_endpoint: "/v1/fundamentals".into(),
            params: serde_json::json!({}),
            data: serde_json::json!({"ok": true}),
            created_at: now,
            updated_at: now,
            last_accessed_at: now,
            expires_at: now + chrono::Duration::minutes(5),
        }
    }

    #[tokio::test]
    async fn put_then_get_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCacheStore::new(dir.path()).await.unwrap();
        let entry = sample_entry("GET:v1-fundamentals:abc");
        store.put(&entry).await.unwrap();
        let fetched = store.get(&entry.cache_key).await.unwrap().unwrap();
        assert_eq!(fetched.cache_key, entry.cache_key);
    }

    #[tokio::test]
    async fn missing_key_returns_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCacheStore::new(dir.path()).await.unwrap();
        assert!(store.get("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn delete_removes_entry() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCacheStore::new(dir.path()).await.unwrap();
        let entry = sample_entry("k1");
        store.put(&entry).await.unwrap();
        let deleted = store.delete(&["k1".to_string()]).await.unwrap();
        assert_eq!(deleted, 1);
        assert!(store.get("k1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn list_for_eviction_orders_oldest_first() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCacheStore::new(dir.path()).await.unwrap();
        let mut older = sample_entry("older");
        older.created_at = Utc::now() - chrono::Duration::hours(1);
        let newer = sample_entry("newer");
        store.put(&newer).await.unwrap();
        store.put(&older).await.unwrap();
        let listed = store.list_for_eviction(EvictionOrder::OldestCreated, 10).await.unwrap();
        assert_eq!(listed[0].cache_key, "older");
    }

    #[tokio::test]
    async fn list_for_eviction_orders_by_last_access() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCacheStore::new(dir.path()).await.unwrap();
        let mut stale = sample_entry("stale-access");
        stale.last_accessed_at = Utc::now() - chrono::Duration::hours(1);
        let fresh = sample_entry("fresh-access");
        store.put(&fresh).await.unwrap();
        store.put(&stale).await.unwrap();
        let listed = store
            .list_for_eviction(EvictionOrder::LeastRecentlyAccessed, 10)
            .await
            .unwrap();
        assert_eq!(listed[0].cache_key, "stale-access");
    }

    #[tokio::test]
    async fn touch_updates_last_accessed_at() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCacheStore::new(dir.path()).await.unwrap();
        let entry = sample_entry("k1");
        store.put(&entry).await.unwrap();
        let later = Utc::now() + chrono::Duration::minutes(1);
        store.touch("k1", later).await.unwrap();
        let fetched = store.get("k1").await.unwrap().unwrap();
        assert_eq!(fetched.last_accessed_at, later);
    }

    #[tokio::test]
    async fn clear_removes_all_entries() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCacheStore::new(dir.path()).await.unwrap();
        store.put(&sample_entry("a")).await.unwrap();
        store.put(&sample_entry("b")).await.unwrap();
        let removed = store.clear().await.unwrap();
        assert_eq!(removed, 2);
        assert_eq!(store.stats().await.unwrap().entry_count, 0);
    }

    #[tokio::test]
    async fn version_round_trips_and_survives_clear_then_set() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCacheStore::new(dir.path()).await.unwrap();
        assert_eq!(store.version().await.unwrap(), None);
        store.put(&sample_entry("a")).await.unwrap();
        store.set_version(3).await.unwrap();
        assert_eq!(store.version().await.unwrap(), Some(3));
        store.clear().await.unwrap();
        assert_eq!(store.stats().await.unwrap().entry_count, 0);
        assert_eq!(store.version().await.unwrap(), Some(3));
    }
}

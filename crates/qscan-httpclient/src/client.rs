//! Cached HTTP client orchestration (S4.3): two-tier cache read/write, retry
//! with backoff on retryable provider errors, and in-flight dedup so a
//! stampede of identical requests becomes a single upstream fetch.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use qscan_schemas::CacheEntry;

use crate::cache::{EvictionOrder, PersistentCacheStore};
use crate::cache_key::cache_key;
use crate::memory_cache::MemoryCache;
use crate::provider::{FetchRequest, Provider, ProviderError};
use crate::queue::{await_follower, DedupOutcome, Dispatcher, InFlightDedup};

/// Bumped whenever `CacheEntry`'s shape changes in a way old persisted
/// entries can't be read back as. A mismatch at open time clears the tier
/// rather than risk deserializing stale documents.
const CACHE_SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Default)]
pub struct ClientStats {
    pub total: AtomicU64,
    pub successful: AtomicU64,
    pub failures: AtomicU64,
    pub memory_hits: AtomicU64,
    pub persistent_hits: AtomicU64,
    pub misses: AtomicU64,
    pub deduplicated: AtomicU64,
    pub retries: AtomicU64,
}

impl ClientStats {
    /// Aggregate hit rate across both cache tiers: `(memory + persistent
    /// hits) / total fetches`. Zero when nothing has been fetched yet.
    pub fn hit_rate(&self) -> f64 {
        let total = self.total.load(Ordering::Relaxed);
        if total == 0 {
            return 0.0;
        }
        let hits = self.memory_hits.load(Ordering::Relaxed) + self.persistent_hits.load(Ordering::Relaxed);
        hits as f64 / total as f64
    }
}

pub struct ClientConfig {
    pub max_concurrency: usize,
    pub memory_ttl: Duration,
    pub entry_ttl: Duration,
    pub max_retries: u32,
    pub backoff_base: Duration,
    /// Persistent-tier entry-count ceiling, enforced on every write (S4.3).
    pub persistent_entry_ceiling: i64,
    /// Persistent-tier approximate size ceiling in bytes, enforced on every
    /// write (S4.3).
    pub persistent_size_bytes: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 6,
            memory_ttl: Duration::from_secs(300),
            entry_ttl: Duration::from_secs(3600),
            max_retries: 3,
            backoff_base: Duration::from_millis(1000),
            persistent_entry_ceiling: 500,
            persistent_size_bytes: 5 * 1024 * 1024,
        }
    }
}

pub struct CachedHttpClient {
    provider: Arc<dyn Provider>,
    persistent: Arc<dyn PersistentCacheStore>,
    memory: MemoryCache,
    dedup: InFlightDedup,
    dispatcher: Dispatcher,
    config: ClientConfig,
    pub stats: ClientStats,
}

impl CachedHttpClient {
    /// Opens the client against `persistent`, validating its version tag
    /// first (S4.3: "on version mismatch at open time, clear the entire
    /// tier"). A store with no tag yet (first run) or a store written by an
    /// older `CacheEntry` shape is wiped and re-tagged rather than risk
    /// returning entries that no longer deserialize.
    pub async fn new(
        provider: Arc<dyn Provider>,
        persistent: Arc<dyn PersistentCacheStore>,
        config: ClientConfig,
    ) -> Self {
        if !matches!(persistent.version().await, Ok(Some(v)) if v == CACHE_SCHEMA_VERSION) {
            let _ = persistent.clear().await;
            let _ = persistent.set_version(CACHE_SCHEMA_VERSION).await;
        }
        Self {
            memory: MemoryCache::new(config.memory_ttl),
            dispatcher: Dispatcher::new(config.max_concurrency),
            dedup: InFlightDedup::default(),
            provider,
            persistent,
            config,
            stats: ClientStats::default(),
        }
    }

    /// Fetch `req`, consulting the cache tiers first when the method is
    /// cacheable. Non-cacheable methods always go straight to the
    /// provider, still subject to concurrency admission and retry.
    pub async fn fetch(&self, req: &FetchRequest) -> Result<serde_json::Value, ProviderError> {
        self.stats.total.fetch_add(1, Ordering::Relaxed);
        let result = self.fetch_dispatch(req).await;
        match &result {
            Ok(_) => {
                self.stats.successful.fetch_add(1, Ordering::Relaxed);
            }
            Err(_) => {
                self.stats.failures.fetch_add(1, Ordering::Relaxed);
            }
        }
        result
    }

    async fn fetch_dispatch(&self, req: &FetchRequest) -> Result<serde_json::Value, ProviderError> {
        if !req.method.is_cacheable() {
            return self.fetch_with_retry(req).await;
        }

        let key = cache_key(req);

        if let Some(hit) = self.memory.get(&key) {
            self.stats.memory_hits.fetch_add(1, Ordering::Relaxed);
            return Ok(hit);
        }

        let now = chrono::Utc::now();
        match self
            .persistent
            .get(&key)
            .await
            .map_err(|e| ProviderError::Config(e.to_string()))?
        {
            Some(entry) if !entry.is_expired(now) => {
                self.stats.persistent_hits.fetch_add(1, Ordering::Relaxed);
                self.memory.put(key.clone(), entry.data.clone());
                // Cache reads never propagate failure (S7c: "cache is
                // advisory") — a touch that fails just means the next
                // ceiling eviction is slightly less accurate.
                let _ = self.persistent.touch(&key, now).await;
                return Ok(entry.data);
            }
            _ => {}
        }

        self.stats.misses.fetch_add(1, Ordering::Relaxed);

        match self.dedup.join(&key).await {
            DedupOutcome::Leader => {
                let result = self.fetch_with_retry(req).await;
                match &result {
                    Ok(value) => {
                        self.write_through(&key, req, value.clone()).await;
                        self.dedup.finish(&key, Ok(value.clone())).await;
                    }
                    Err(e) => {
                        self.dedup.finish(&key, Err(e.to_string())).await;
                    }
                }
                result
            }
            DedupOutcome::Follower(rx) => {
                self.stats.deduplicated.fetch_add(1, Ordering::Relaxed);
                await_follower(rx).await.map_err(ProviderError::Transport)
            }
        }
    }

    async fn write_through(&self, key: &str, req: &FetchRequest, value: serde_json::Value) {
        self.memory.put(key.to_string(), value.clone());
        let now = chrono::Utc::now();
        let entry = CacheEntry {
            cache_key: key.to_string(),
            api_endpoint: req.path.clone(),
            params: serde_json::to_value(&req.query).unwrap_or_default(),
            data: value,
            created_at: now,
            updated_at: now,
            last_accessed_at: now,
            expires_at: now + chrono::Duration::from_std(self.config.entry_ttl).unwrap_or_default(),
        };

        self.enforce_ceilings(&entry).await;

        // Write-through failures are not fatal to the caller (S7c: "cache
        // writes never propagate failure"). A failed put is treated as an
        // out-of-space signal: evict the oldest half by timestamp and
        // retry exactly once (S4.3), then give up silently.
        if self.persistent.put(&entry).await.is_err() {
            self.evict_oldest_half().await;
            let _ = self.persistent.put(&entry).await;
        }
    }

    /// Size and entry-count ceilings enforced on every write: when either
    /// would be exceeded by `incoming`, evict by an LRU approximation
    /// (sort entries by last access, drop until enough room) before the
    /// write lands (S4.3).
    async fn enforce_ceilings(&self, incoming: &CacheEntry) {
        let Ok(stats) = self.persistent.stats().await else {
            return;
        };
        let mut count = stats.entry_count;
        let mut bytes = stats.total_bytes.max(0) as usize + incoming.approx_bytes();
        if count < self.config.persistent_entry_ceiling && bytes <= self.config.persistent_size_bytes {
            return;
        }

        let Ok(candidates) = self
            .persistent
            .list_for_eviction(EvictionOrder::LeastRecentlyAccessed, i64::MAX)
            .await
        else {
            return;
        };

        let mut victims = Vec::new();
        for candidate in candidates {
            if count < self.config.persistent_entry_ceiling && bytes <= self.config.persistent_size_bytes {
                break;
            }
            count -= 1;
            bytes = bytes.saturating_sub(candidate.approx_bytes());
            victims.push(candidate.cache_key);
        }
        if !victims.is_empty() {
            let _ = self.persistent.delete(&victims).await;
        }
    }

    /// Unconditionally evicts the oldest (by creation timestamp) half of
    /// the tier, the out-of-space recovery path (S4.3).
    async fn evict_oldest_half(&self) {
        let Ok(stats) = self.persistent.stats().await else {
            return;
        };
        let half = (stats.entry_count / 2).max(1);
        if let Ok(victims) = self
            .persistent
            .list_for_eviction(EvictionOrder::OldestCreated, half)
            .await
        {
            let keys: Vec<String> = victims.into_iter().map(|e| e.cache_key).collect();
            let _ = self.persistent.delete(&keys).await;
        }
    }

    async fn fetch_with_retry(
        &self,
        req: &FetchRequest,
    ) -> Result<serde_json::Value, ProviderError> {
        let key = cache_key(req);
        let _permit = self.dispatcher.admit(&key, req.priority).await;
        let mut attempt = 0;
        loop {
            match self.provider.fetch(req).await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() && attempt < self.config.max_retries => {
                    self.stats.retries.fetch_add(1, Ordering::Relaxed);
                    let backoff = self.config.backoff_base * 2u32.pow(attempt);
                    tokio::time::sleep(backoff).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::FileCacheStore;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicU32;

    struct CountingProvider {
        calls: AtomicU32,
        fail_first_n: u32,
    }

    #[async_trait]
    impl Provider for CountingProvider {
        fn name(&self) -> &'static str {
            "counting"
        }

        async fn fetch(&self, _req: &FetchRequest) -> Result<serde_json::Value, ProviderError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.fail_first_n {
                return Err(ProviderError::Api {
                    status: 503,
                    message: "try again".into(),
                });
            }
            Ok(serde_json::json!({"n": n}))
        }
    }

    async fn client_with(provider: CountingProvider) -> (CachedHttpClient, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(FileCacheStore::new(dir.path()).await.unwrap());
        let mut config = ClientConfig::default();
        config.backoff_base = Duration::from_millis(1);
        let client = CachedHttpClient::new(Arc::new(provider), store, config).await;
        (client, dir)
    }

    #[tokio::test]
    async fn cache_miss_then_hit_on_second_call() {
        let (client, _dir) = client_with(CountingProvider {
            calls: AtomicU32::new(0),
            fail_first_n: 0,
        })
        .await;
        let req = FetchRequest::get("/v1/fundamentals/AAPL");
        let first = client.fetch(&req).await.unwrap();
        let second = client.fetch(&req).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(client.stats.memory_hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retries_on_retryable_error_then_succeeds() {
        let (client, _dir) = client_with(CountingProvider {
            calls: AtomicU32::new(0),
            fail_first_n: 2,
        })
        .await;
        let req = FetchRequest::get("/v1/fundamentals/AAPL");
        let result = client.fetch(&req).await.unwrap();
        assert_eq!(result["n"], 2);
        assert_eq!(client.stats.retries.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn non_cacheable_method_bypasses_cache() {
        let (client, _dir) = client_with(CountingProvider {
            calls: AtomicU32::new(0),
            fail_first_n: 0,
        })
        .await;
        let mut req = FetchRequest::get("/v1/jobs/run");
        req.method = crate::provider::Method::Post;
        client.fetch(&req).await.unwrap();
        client.fetch(&req).await.unwrap();
        assert_eq!(client.stats.memory_hits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn stats_track_total_successful_and_hit_rate() {
        let (client, _dir) = client_with(CountingProvider {
            calls: AtomicU32::new(0),
            fail_first_n: 0,
        })
        .await;
        let req = FetchRequest::get("/v1/fundamentals/AAPL");
        client.fetch(&req).await.unwrap();
        client.fetch(&req).await.unwrap();
        assert_eq!(client.stats.total.load(Ordering::SeqCst), 2);
        assert_eq!(client.stats.successful.load(Ordering::SeqCst), 2);
        assert_eq!(client.stats.failures.load(Ordering::SeqCst), 0);
        assert_eq!(client.stats.hit_rate(), 0.5);
    }

    struct SlowProvider {
        calls: AtomicU32,
        delay: Duration,
    }

    #[async_trait]
    impl Provider for SlowProvider {
        fn name(&self) -> &'static str {
            "slow"
        }

        async fn fetch(&self, _req: &FetchRequest) -> Result<serde_json::Value, ProviderError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            Ok(serde_json::json!({"n": n}))
        }
    }

    #[tokio::test]
    async fn follower_fetch_counts_as_deduplicated() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(FileCacheStore::new(dir.path()).await.unwrap());
        let mut config = ClientConfig::default();
        config.backoff_base = Duration::from_millis(1);
        let provider = SlowProvider { calls: AtomicU32::new(0), delay: Duration::from_millis(50) };
        let client = Arc::new(CachedHttpClient::new(Arc::new(provider), store, config).await);
        let req = FetchRequest::get("/v1/fundamentals/AAPL");

        let leader = {
            let client = client.clone();
            let req = req.clone();
            tokio::spawn(async move { client.fetch(&req).await })
        };
        // give the leader time to claim the in-flight slot and start its
        // (slow) upstream fetch before the follower joins
        tokio::time::sleep(Duration::from_millis(10)).await;
        let follower = client.fetch(&req).await.unwrap();
        let leader = leader.await.unwrap().unwrap();

        assert_eq!(leader, follower);
        assert_eq!(client.stats.deduplicated.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn config_defaults_match_the_documented_surface() {
        let config = ClientConfig::default();
        assert_eq!(config.max_concurrency, 6);
        assert_eq!(config.entry_ttl, Duration::from_secs(3600));
        assert_eq!(config.backoff_base, Duration::from_millis(1000));
        assert_eq!(config.persistent_entry_ceiling, 500);
        assert_eq!(config.persistent_size_bytes, 5 * 1024 * 1024);
    }

    #[tokio::test]
    async fn write_through_evicts_least_recently_used_over_entry_ceiling() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(FileCacheStore::new(dir.path()).await.unwrap());
        let mut config = ClientConfig::default();
        config.backoff_base = Duration::from_millis(1);
        config.persistent_entry_ceiling = 1;
        let provider = CountingProvider { calls: AtomicU32::new(0), fail_first_n: 0 };
        let client = CachedHttpClient::new(Arc::new(provider), store.clone(), config).await;

        let older = FetchRequest::get("/v1/fundamentals/AAPL");
        client.fetch(&older).await.unwrap();

        let newer = FetchRequest::get("/v1/fundamentals/MSFT");
        client.fetch(&newer).await.unwrap();

        let stats = store.stats().await.unwrap();
        assert_eq!(stats.entry_count, 1);
        assert!(store.get(&cache_key(&newer)).await.unwrap().is_some());
        assert!(store.get(&cache_key(&older)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn open_clears_tier_on_version_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(FileCacheStore::new(dir.path()).await.unwrap());
        store.set_version(CACHE_SCHEMA_VERSION + 1).await.unwrap();
        let entry = CacheEntry {
            cache_key: "stale".to_string(),
            api_endpoint: "/v1/x".into(),
            params: serde_json::json!({}),
            data: serde_json::json!({"v": 1}),
            created_at: chrono::Utc::now(),
            updated_at: chrono::Utc::now(),
            last_accessed_at: chrono::Utc::now(),
            expires_at: chrono::Utc::now() + chrono::Duration::hours(1),
        };
        store.put(&entry).await.unwrap();

        let provider = CountingProvider { calls: AtomicU32::new(0), fail_first_n: 0 };
        let _client = CachedHttpClient::new(Arc::new(provider), store.clone(), ClientConfig::default()).await;

        assert!(store.get("stale").await.unwrap().is_none());
        assert_eq!(store.version().await.unwrap(), Some(CACHE_SCHEMA_VERSION));
    }

    #[tokio::test]
    async fn priority_one_completes_before_priority_hundred_when_both_queued() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(FileCacheStore::new(dir.path()).await.unwrap());
        let mut config = ClientConfig::default();
        config.max_concurrency = 1;
        config.backoff_base = Duration::from_millis(1);
        // every fetch takes long enough that the holder task below is
        // still running the single permit when low/high are queued
        let provider = SlowProvider { calls: AtomicU32::new(0), delay: Duration::from_millis(50) };
        let client = Arc::new(CachedHttpClient::new(Arc::new(provider), store, config).await);

        // occupy the single slot with a non-cacheable (always-dispatched)
        // request so both priority levels below have to queue behind it
        let held = {
            let client = client.clone();
            tokio::spawn(async move {
                let mut req = FetchRequest::get("/v1/hold");
                req.method = crate::provider::Method::Post;
                req.priority = 50;
                client.fetch(&req).await
            })
        };
        // let the holder actually claim the permit before queuing the rest
        tokio::time::sleep(Duration::from_millis(10)).await;

        let order = Arc::new(std::sync::Mutex::new(Vec::new()));

        let o = order.clone();
        let low = {
            let client = client.clone();
            tokio::spawn(async move {
                let mut req = FetchRequest::get("/v1/low");
                req.method = crate::provider::Method::Post;
                req.priority = 100;
                client.fetch(&req).await.unwrap();
                o.lock().unwrap().push("low");
            })
        };
        while client.dispatcher.queue_depth() < 1 {
            tokio::task::yield_now().await;
        }

        let o = order.clone();
        let high = {
            let client = client.clone();
            tokio::spawn(async move {
                let mut req = FetchRequest::get("/v1/high");
                req.method = crate::provider::Method::Post;
                req.priority = 1;
                client.fetch(&req).await.unwrap();
                o.lock().unwrap().push("high");
            })
        };
        while client.dispatcher.queue_depth() < 2 {
            tokio::task::yield_now().await;
        }

        held.await.unwrap().unwrap();
        low.await.unwrap();
        high.await.unwrap();

        assert_eq!(*order.lock().unwrap(), vec!["high", "low"]);
    }
}

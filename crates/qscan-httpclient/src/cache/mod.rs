//! Persistent tier of the two-tier cache (S4.3). The trait is the seam
//! between the client's orchestration logic and wherever entries actually
//! live — Postgres today, a local file-backed KV when no database is
//! configured (e.g. a developer running the daemon against a throwaway
//! instance).

pub mod file;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use qscan_schemas::CacheEntry;

#[derive(Debug, Clone, Copy, Default)]
pub struct CacheStats {
    pub entry_count: i64,
    /// Approximate total size of all persisted entries, in bytes.
    pub total_bytes: i64,
}

/// Two distinct eviction orderings the persistent tier needs (S4.3): a
/// ceiling write evicts by last access (an LRU approximation), while the
/// out-of-space recovery path evicts unconditionally by creation time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvictionOrder {
    OldestCreated,
    LeastRecentlyAccessed,
}

#[async_trait]
pub trait PersistentCacheStore: Send + Sync {
    async fn get(&self, cache_key: &str) -> anyhow::Result<Option<CacheEntry>>;
    async fn put(&self, entry: &CacheEntry) -> anyhow::Result<()>;
    /// Record that `cache_key` was read at `at`, for LRU-approximation
    /// eviction ordering. Advisory — failures are never propagated to the
    /// caller of a cache read (S7c).
    async fn touch(&self, cache_key: &str, at: DateTime<Utc>) -> anyhow::Result<()>;
    async fn delete(&self, cache_keys: &[String]) -> anyhow::Result<u64>;
    /// Entries to consider for eviction, in `order`, at most `limit` of them.
    async fn list_for_eviction(&self, order: EvictionOrder, limit: i64) -> anyhow::Result<Vec<CacheEntry>>;
    async fn clear(&self) -> anyhow::Result<u64>;
    async fn stats(&self) -> anyhow::Result<CacheStats>;
    /// The schema version tag currently stored alongside the tier, if any.
    async fn version(&self) -> anyhow::Result<Option<u32>>;
    async fn set_version(&self, version: u32) -> anyhow::Result<()>;
}

pub use file::FileCacheStore;
pub use postgres::PostgresCacheStore;

//! In-memory tier of the two-tier cache (S4.3). Short TTL, no size bound —
//! the persistent tier enforces size/entry ceilings; memory is meant to
//! absorb request bursts within a handful of minutes.

use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Duration;

struct Entry {
    data: Value,
    expires_at: DateTime<Utc>,
}

pub struct MemoryCache {
    ttl: Duration,
    entries: RwLock<HashMap<String, Entry>>,
}

impl MemoryCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        let entries = self.entries.read().unwrap();
        let entry = entries.get(key)?;
        if Utc::now() > entry.expires_at {
            return None;
        }
        Some(entry.data.clone())
    }

    pub fn put(&self, key: String, data: Value) {
        let expires_at = Utc::now() + chrono::Duration::from_std(self.ttl).unwrap_or_default();
        self.entries.write().unwrap().insert(key, Entry { data, expires_at });
    }

    pub fn clear(&self) {
        self.entries.write().unwrap().clear();
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_then_get_round_trips() {
        let cache = MemoryCache::new(Duration::from_secs(300));
        cache.put("k".into(), serde_json::json!({"v": 1}));
        assert_eq!(cache.get("k"), Some(serde_json::json!({"v": 1})));
    }

    #[test]
    fn miss_on_unknown_key() {
        let cache = MemoryCache::new(Duration::from_secs(300));
        assert_eq!(cache.get("missing"), None);
    }

    #[test]
    fn expired_entry_treated_as_absent() {
        let cache = MemoryCache::new(Duration::from_millis(0));
        cache.put("k".into(), serde_json::json!(1));
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(cache.get("k"), None);
    }

    #[test]
    fn clear_empties_the_cache() {
        let cache = MemoryCache::new(Duration::from_secs(300));
        cache.put("k".into(), serde_json::json!(1));
        cache.clear();
        assert!(cache.is_empty());
    }
}

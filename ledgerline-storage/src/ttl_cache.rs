//! Time-bounded cache of previously successful remote results.
//!
//! This cache is a last-resort read fallback when the transport fails. It is
//! deliberately separate from the local fallback store: cache entries expire,
//! fallback records never do.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;

use crate::backend::KeyValueStore;
use crate::freshness::{age, CacheRead, CacheStats, StoreDiagnostics};
use crate::StorageError;

/// Storage key holding the whole cache map.
pub const CACHE_STORAGE_KEY: &str = "ledgerline.cache";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CacheEntry {
    value: Value,
    written_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct CacheState {
    entries: HashMap<String, CacheEntry>,
    stats: CacheStats,
}

/// Keyed value store with per-entry write time and caller-supplied max age.
pub struct TtlCache {
    store: Arc<dyn KeyValueStore>,
    diagnostics: Arc<StoreDiagnostics>,
    state: Mutex<CacheState>,
}

impl TtlCache {
    /// Load the cache from `store`; a corrupt document starts an empty cache.
    pub fn open(store: Arc<dyn KeyValueStore>, diagnostics: Arc<StoreDiagnostics>) -> Self {
        let entries = match store.read(CACHE_STORAGE_KEY) {
            Ok(Some(raw)) => match serde_json::from_str::<HashMap<String, CacheEntry>>(&raw) {
                Ok(entries) => entries,
                Err(e) => {
                    diagnostics.record_corrupt_document(CACHE_STORAGE_KEY, &e);
                    HashMap::new()
                }
            },
            Ok(None) => HashMap::new(),
            Err(e) => {
                diagnostics.record_corrupt_document(CACHE_STORAGE_KEY, &e);
                HashMap::new()
            }
        };
        Self {
            store,
            diagnostics,
            state: Mutex::new(CacheState {
                entries,
                stats: CacheStats::default(),
            }),
        }
    }

    /// Store `value` under `key`, overwriting any existing entry.
    pub fn put(&self, key: &str, value: Value) {
        self.put_at(key, value, Utc::now());
    }

    /// [`TtlCache::put`] with an explicit write time.
    pub fn put_at(&self, key: &str, value: Value, written_at: DateTime<Utc>) {
        let Ok(mut state) = self.lock() else {
            return;
        };
        state
            .entries
            .insert(key.to_string(), CacheEntry { value, written_at });
        self.persist(&state);
    }

    /// Serialize and store a typed value.
    pub fn put_as<T: Serialize>(&self, key: &str, value: &T) -> Result<(), StorageError> {
        let value = serde_json::to_value(value)?;
        self.put(key, value);
        Ok(())
    }

    /// Return the value for `key` if it is no older than `max_age`.
    ///
    /// An expired entry is evicted and reported as absent.
    pub fn get(&self, key: &str, max_age: Duration) -> Option<CacheRead<Value>> {
        self.get_at(key, max_age, Utc::now())
    }

    /// [`TtlCache::get`] evaluated at an explicit instant.
    pub fn get_at(
        &self,
        key: &str,
        max_age: Duration,
        now: DateTime<Utc>,
    ) -> Option<CacheRead<Value>> {
        let mut state = self.lock().ok()?;
        let Some(entry) = state.entries.get(key) else {
            state.stats.misses += 1;
            return None;
        };
        if age(entry.written_at, now) <= max_age {
            let read = CacheRead::new(entry.value.clone(), entry.written_at, now);
            state.stats.hits += 1;
            return Some(read);
        }
        state.entries.remove(key);
        state.stats.expirations += 1;
        self.persist(&state);
        None
    }

    /// Typed read; an entry that no longer decodes counts as absent.
    pub fn get_as<T: DeserializeOwned>(&self, key: &str, max_age: Duration) -> Option<CacheRead<T>> {
        let read = self.get(key, max_age)?;
        let cached_at = read.cached_at();
        match serde_json::from_value::<T>(read.value().clone()) {
            Ok(value) => Some(read.map(|_| value)),
            Err(e) => {
                self.diagnostics.record_undecodable(key, &e);
                tracing::debug!(key, cached_at = %cached_at, "Cached value has an unexpected shape");
                None
            }
        }
    }

    /// Drop a single entry.
    pub fn invalidate(&self, key: &str) {
        let Ok(mut state) = self.lock() else {
            return;
        };
        if state.entries.remove(key).is_some() {
            self.persist(&state);
        }
    }

    /// Drop every entry whose key starts with `prefix`; returns how many.
    pub fn invalidate_prefix(&self, prefix: &str) -> usize {
        let Ok(mut state) = self.lock() else {
            return 0;
        };
        let before = state.entries.len();
        state.entries.retain(|key, _| !key.starts_with(prefix));
        let removed = before - state.entries.len();
        if removed > 0 {
            self.persist(&state);
        }
        removed
    }

    /// Drop everything.
    pub fn clear(&self) {
        let Ok(mut state) = self.lock() else {
            return;
        };
        state.entries.clear();
        self.persist(&state);
    }

    pub fn stats(&self) -> CacheStats {
        match self.lock() {
            Ok(state) => CacheStats {
                entry_count: state.entries.len() as u64,
                ..state.stats.clone()
            },
            Err(_) => CacheStats::default(),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, CacheState>, StorageError> {
        self.state.lock().map_err(|_| StorageError::LockPoisoned)
    }

    /// Write-through; a failed write keeps the in-memory copy and is counted.
    fn persist(&self, state: &CacheState) {
        let result = serde_json::to_string(&state.entries)
            .map_err(StorageError::from)
            .and_then(|raw| self.store.write(CACHE_STORAGE_KEY, &raw));
        if let Err(e) = result {
            self.diagnostics.record_write_failure(CACHE_STORAGE_KEY, &e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryStore;
    use serde_json::json;

    fn cache() -> (TtlCache, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let cache = TtlCache::open(store.clone(), Arc::new(StoreDiagnostics::new()));
        (cache, store)
    }

    #[test]
    fn test_zero_max_age_expires_after_any_elapsed_time() {
        let (cache, _) = cache();
        let t0 = Utc::now();
        cache.put_at("k", json!(1), t0);
        assert!(cache
            .get_at("k", Duration::ZERO, t0 + chrono::Duration::milliseconds(1))
            .is_none());
        // Evicted, not just hidden.
        assert!(cache.get_at("k", Duration::MAX, t0).is_none());
    }

    #[test]
    fn test_unbounded_max_age_keeps_value_until_overwritten() {
        let (cache, _) = cache();
        let t0 = Utc::now();
        cache.put_at("k", json!("v1"), t0);
        let far_future = t0 + chrono::Duration::days(3650);
        let read = cache.get_at("k", Duration::MAX, far_future).unwrap();
        assert_eq!(read.value(), &json!("v1"));

        cache.put_at("k", json!("v2"), far_future);
        let read = cache.get_at("k", Duration::MAX, far_future).unwrap();
        assert_eq!(read.into_value(), json!("v2"));
    }

    #[test]
    fn test_boundary_is_inclusive() {
        let (cache, _) = cache();
        let t0 = Utc::now();
        cache.put_at("k", json!(true), t0);
        let at_limit = t0 + chrono::Duration::seconds(30);
        assert!(cache.get_at("k", Duration::from_secs(30), at_limit).is_some());
    }

    #[test]
    fn test_persists_across_reopen() {
        let store = Arc::new(MemoryStore::new());
        let diagnostics = Arc::new(StoreDiagnostics::new());
        let first = TtlCache::open(store.clone(), diagnostics.clone());
        first.put("employees", json!([{"id": "1"}]));

        let second = TtlCache::open(store, diagnostics);
        let read = second.get("employees", Duration::from_secs(60)).unwrap();
        assert_eq!(read.into_value(), json!([{"id": "1"}]));
    }

    #[test]
    fn test_corrupt_document_starts_empty_and_is_counted() {
        let store = Arc::new(MemoryStore::new());
        store.write(CACHE_STORAGE_KEY, "{not json").unwrap();
        let diagnostics = Arc::new(StoreDiagnostics::new());
        let cache = TtlCache::open(store, diagnostics.clone());
        assert!(cache.get("anything", Duration::MAX).is_none());
        assert_eq!(diagnostics.snapshot().corrupt_documents, 1);
    }

    #[test]
    fn test_stats_and_invalidation() {
        let (cache, _) = cache();
        cache.put("association:list", json!([]));
        cache.put("association:get:1", json!({}));
        cache.put("employee:list", json!([]));
        assert!(cache.get("missing", Duration::MAX).is_none());
        assert!(cache.get("employee:list", Duration::MAX).is_some());

        assert_eq!(cache.invalidate_prefix("association:"), 2);
        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.entry_count, 1);

        cache.clear();
        assert_eq!(cache.stats().entry_count, 0);
    }

    #[test]
    fn test_typed_access() {
        let (cache, _) = cache();
        cache.put_as("nums", &vec![1, 2, 3]).unwrap();
        let read = cache.get_as::<Vec<i32>>("nums", Duration::MAX).unwrap();
        assert_eq!(read.into_value(), vec![1, 2, 3]);
        assert!(cache.get_as::<String>("nums", Duration::MAX).is_none());
    }
}

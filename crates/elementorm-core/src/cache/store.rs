//! In-memory cache store with a bidirectional dependency index.
//!
//! The store is not synchronized; [`super::CacheManager`] wraps it in a
//! single mutex. Every dependency edge is recorded in both
//! `dependency_to_keys` and `key_to_dependencies`, and both maps are updated
//! together whenever an entry is inserted or removed.

use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

use lru::LruCache;

use super::entry::CacheEntry;
use super::error::CacheError;
use crate::config::CacheConfig;

/// Result of a store lookup.
#[derive(Debug, Clone, PartialEq)]
pub enum Lookup<V> {
    /// Live entry found.
    Hit(V),
    /// No entry under the key.
    Miss,
    /// Entry found past its TTL; it has been removed.
    Expired,
}

/// Side effects of an insert.
#[derive(Debug, Default, Clone)]
pub struct InsertOutcome {
    /// Keys evicted to make room.
    pub evicted: Vec<String>,
    /// Keys removed by an expiry sweep.
    pub expired: Vec<String>,
}

/// Key-value store holding cache entries in recency order.
pub struct CacheStore<V> {
    entries: LruCache<String, CacheEntry<V>>,
    dependency_to_keys: HashMap<String, HashSet<String>>,
    key_to_dependencies: HashMap<String, HashSet<String>>,
    config: CacheConfig,
    next_sequence: u64,
    last_cleanup: Instant,
}

impl<V> CacheStore<V> {
    /// Create an empty store.
    pub fn new(config: CacheConfig) -> Self {
        Self {
            entries: LruCache::unbounded(),
            dependency_to_keys: HashMap::new(),
            key_to_dependencies: HashMap::new(),
            config,
            next_sequence: 0,
            last_cleanup: Instant::now(),
        }
    }

    /// Store configuration.
    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Insert or replace an entry, evicting as needed.
    pub fn insert(
        &mut self,
        key: String,
        data: V,
        ttl: Option<Duration>,
        dependencies: HashSet<String>,
    ) -> Result<InsertOutcome, CacheError> {
        if self.config.max_size == 0 {
            return Err(CacheError::ZeroCapacity);
        }

        let mut outcome = InsertOutcome::default();
        if self.cleanup_due() {
            outcome.expired = self.cleanup_expired();
        }

        // A replaced entry gives up its slot and its dependency edges.
        self.remove(&key);

        while self.needs_eviction() {
            let victim = self
                .config
                .eviction_policy
                .select_victim(&self.entries)
                .ok_or(CacheError::EvictionFailed {
                    size: self.entries.len(),
                    max_size: self.config.max_size,
                })?;
            self.remove(&victim);
            outcome.evicted.push(victim);
        }

        for dependency in &dependencies {
            self.dependency_to_keys
                .entry(dependency.clone())
                .or_default()
                .insert(key.clone());
        }
        if !dependencies.is_empty() {
            self.key_to_dependencies
                .insert(key.clone(), dependencies.clone());
        }

        let sequence = self.next_sequence;
        self.next_sequence += 1;
        let entry = CacheEntry::new(key.clone(), data, ttl, dependencies, sequence);
        self.entries.put(key, entry);

        Ok(outcome)
    }

    /// Remove an entry and its dependency edges.
    pub fn remove(&mut self, key: &str) -> Option<CacheEntry<V>> {
        let entry = self.entries.pop(key)?;
        if let Some(dependencies) = self.key_to_dependencies.remove(key) {
            for dependency in dependencies {
                if let Some(keys) = self.dependency_to_keys.get_mut(&dependency) {
                    keys.remove(key);
                    if keys.is_empty() {
                        self.dependency_to_keys.remove(&dependency);
                    }
                }
            }
        }
        Some(entry)
    }

    /// Keys of entries that declared a dependency.
    pub fn keys_for_dependency(&self, dependency: &str) -> Vec<String> {
        self.dependency_to_keys
            .get(dependency)
            .map(|keys| keys.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Remove every entry depending on `dependency`, returning their keys.
    pub fn remove_by_dependency(&mut self, dependency: &str) -> Vec<String> {
        let keys = self.keys_for_dependency(dependency);
        for key in &keys {
            self.remove(key);
        }
        keys
    }

    /// Remove every entry whose key contains `pattern`.
    ///
    /// Scans every key; prefer dependency invalidation where possible.
    pub fn remove_matching(&mut self, pattern: &str) -> Vec<String> {
        let keys: Vec<String> = self
            .entries
            .iter()
            .filter(|(key, _)| key.contains(pattern))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &keys {
            self.remove(key);
        }
        keys
    }

    /// Remove all expired entries, returning their keys.
    pub fn cleanup_expired(&mut self) -> Vec<String> {
        let now = Instant::now();
        self.last_cleanup = now;
        let expired: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, entry)| entry.is_expired_at(now))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &expired {
            self.remove(key);
        }
        expired
    }

    /// Peek at an entry without touching recency or statistics.
    pub fn peek(&self, key: &str) -> Option<&CacheEntry<V>> {
        self.entries.peek(key)
    }

    /// Check if a key is stored (expired or not).
    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains(key)
    }

    /// Dependencies declared by an entry.
    pub fn dependencies_of(&self, key: &str) -> HashSet<String> {
        self.key_to_dependencies.get(key).cloned().unwrap_or_default()
    }

    /// All stored keys, most recently used first.
    pub fn keys(&self) -> Vec<String> {
        self.entries.iter().map(|(key, _)| key.clone()).collect()
    }

    /// Number of stored entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if the store is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Estimated memory use in megabytes.
    pub fn estimated_memory_mb(&self) -> f64 {
        self.entries.len() as f64 * self.config.estimated_entry_size_mb
    }

    /// Remove every entry and index edge.
    pub fn clear(&mut self) -> usize {
        let removed = self.entries.len();
        self.entries.clear();
        self.dependency_to_keys.clear();
        self.key_to_dependencies.clear();
        removed
    }

    /// Check that both dependency maps describe the same edges.
    pub fn verify_index(&self) -> Result<(), CacheError> {
        for (key, dependencies) in &self.key_to_dependencies {
            if !self.entries.contains(key) {
                return Err(CacheError::IndexCorrupted { key: key.clone() });
            }
            for dependency in dependencies {
                let linked = self
                    .dependency_to_keys
                    .get(dependency)
                    .is_some_and(|keys| keys.contains(key));
                if !linked {
                    return Err(CacheError::IndexCorrupted { key: key.clone() });
                }
            }
        }
        for keys in self.dependency_to_keys.values() {
            for key in keys {
                if !self.key_to_dependencies.contains_key(key) {
                    return Err(CacheError::IndexCorrupted { key: key.clone() });
                }
            }
        }
        Ok(())
    }

    fn cleanup_due(&self) -> bool {
        self.last_cleanup.elapsed() >= self.config.cleanup_interval
    }

    fn needs_eviction(&self) -> bool {
        let size = self.entries.len();
        let projected_mb = (size + 1) as f64 * self.config.estimated_entry_size_mb;
        size >= self.config.max_size || projected_mb > self.config.max_memory_mb
    }
}

impl<V: Clone> CacheStore<V> {
    /// Look up a key, updating recency and access statistics on a hit.
    ///
    /// Expired entries are removed on first read.
    pub fn get(&mut self, key: &str) -> Lookup<V> {
        let expired = match self.entries.get_mut(key) {
            None => return Lookup::Miss,
            Some(entry) if entry.is_expired() => true,
            Some(entry) => {
                entry.touch();
                return Lookup::Hit(entry.data.clone());
            }
        };
        if expired {
            self.remove(key);
        }
        Lookup::Expired
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::EvictionPolicy;

    fn deps(items: &[&str]) -> HashSet<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    fn store(max_size: usize) -> CacheStore<i32> {
        CacheStore::new(CacheConfig::new(max_size))
    }

    #[test]
    fn test_insert_and_get() {
        let mut store = store(10);
        store.insert("a".into(), 1, None, HashSet::new()).unwrap();
        assert_eq!(store.get("a"), Lookup::Hit(1));
        assert_eq!(store.get("b"), Lookup::Miss);
        assert_eq!(store.peek("a").map(|e| e.access_count), Some(1));
    }

    #[test]
    fn test_expired_entry_removed_on_read() {
        let mut store = store(10);
        store
            .insert("a".into(), 1, Some(Duration::from_millis(10)), deps(&["d"]))
            .unwrap();
        std::thread::sleep(Duration::from_millis(30));
        assert_eq!(store.get("a"), Lookup::Expired);
        assert!(!store.contains("a"));
        assert!(store.keys_for_dependency("d").is_empty());
        store.verify_index().unwrap();
    }

    #[test]
    fn test_dependency_index_both_directions() {
        let mut store = store(10);
        store.insert("a".into(), 1, None, deps(&["x", "y"])).unwrap();
        store.insert("b".into(), 2, None, deps(&["y"])).unwrap();

        let mut keys = store.keys_for_dependency("y");
        keys.sort();
        assert_eq!(keys, vec!["a", "b"]);
        assert_eq!(store.dependencies_of("a"), deps(&["x", "y"]));
        store.verify_index().unwrap();

        store.remove("a");
        assert!(store.keys_for_dependency("x").is_empty());
        assert_eq!(store.keys_for_dependency("y"), vec!["b"]);
        store.verify_index().unwrap();
    }

    #[test]
    fn test_replace_refreshes_dependencies() {
        let mut store = store(10);
        store.insert("a".into(), 1, None, deps(&["old"])).unwrap();
        store.insert("a".into(), 2, None, deps(&["new"])).unwrap();

        assert_eq!(store.len(), 1);
        assert!(store.keys_for_dependency("old").is_empty());
        assert_eq!(store.keys_for_dependency("new"), vec!["a"]);
        assert_eq!(store.get("a"), Lookup::Hit(2));
        store.verify_index().unwrap();
    }

    #[test]
    fn test_lru_eviction_on_size() {
        let mut store = store(2);
        store.insert("a".into(), 1, None, deps(&["d"])).unwrap();
        store.insert("b".into(), 2, None, HashSet::new()).unwrap();
        store.get("a");

        let outcome = store.insert("c".into(), 3, None, HashSet::new()).unwrap();
        assert_eq!(outcome.evicted, vec!["b"]);
        assert!(store.contains("a"));
        assert!(store.contains("c"));
        store.verify_index().unwrap();
    }

    #[test]
    fn test_fifo_eviction() {
        let mut store: CacheStore<i32> =
            CacheStore::new(CacheConfig::new(2).with_eviction_policy(EvictionPolicy::Fifo));
        store.insert("a".into(), 1, None, HashSet::new()).unwrap();
        store.insert("b".into(), 2, None, HashSet::new()).unwrap();
        store.get("a");

        let outcome = store.insert("c".into(), 3, None, HashSet::new()).unwrap();
        assert_eq!(outcome.evicted, vec!["a"]);
    }

    #[test]
    fn test_memory_limit_evicts() {
        let config = CacheConfig::new(100)
            .with_estimated_entry_size_mb(1.0)
            .with_max_memory_mb(2.0);
        let mut store: CacheStore<i32> = CacheStore::new(config);
        store.insert("a".into(), 1, None, HashSet::new()).unwrap();
        store.insert("b".into(), 2, None, HashSet::new()).unwrap();
        store.insert("c".into(), 3, None, HashSet::new()).unwrap();

        assert_eq!(store.len(), 2);
        assert!(!store.contains("a"));
        assert!(store.estimated_memory_mb() <= 2.0);
    }

    #[test]
    fn test_zero_capacity_is_an_error() {
        let mut store = store(0);
        let result = store.insert("a".into(), 1, None, HashSet::new());
        assert!(matches!(result, Err(CacheError::ZeroCapacity)));
    }

    #[test]
    fn test_remove_matching_and_by_dependency() {
        let mut store = store(10);
        store.insert("Wall|id=1".into(), 1, None, deps(&["type:Wall"])).unwrap();
        store.insert("Wall|id=2".into(), 2, None, deps(&["type:Wall"])).unwrap();
        store.insert("Door|id=3".into(), 3, None, deps(&["type:Door"])).unwrap();

        assert_eq!(store.remove_matching("id=1"), vec!["Wall|id=1"]);
        assert_eq!(store.remove_by_dependency("type:Wall"), vec!["Wall|id=2"]);
        assert_eq!(store.len(), 1);
        store.verify_index().unwrap();
    }

    #[test]
    fn test_sweep_on_insert_after_interval() {
        let config = CacheConfig::new(10).with_cleanup_interval(Duration::from_millis(0));
        let mut store: CacheStore<i32> = CacheStore::new(config);
        store
            .insert("a".into(), 1, Some(Duration::from_millis(5)), HashSet::new())
            .unwrap();
        std::thread::sleep(Duration::from_millis(20));

        let outcome = store.insert("b".into(), 2, None, HashSet::new()).unwrap();
        assert_eq!(outcome.expired, vec!["a"]);
        assert_eq!(store.len(), 1);
    }
}

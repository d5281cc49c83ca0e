//! Public caching facade.
//!
//! [`CacheManager`] wraps a [`CacheStore`] in a single mutex, records
//! statistics, notifies invalidation callbacks, and absorbs every backend
//! failure: callers only ever observe a miss (or `false`), never an error.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, warn};

use super::key::CacheKey;
use super::store::{CacheStore, Lookup};
use crate::config::CacheConfig;

/// Callback invoked with the canonical key of every removed entry.
pub type InvalidationCallback = Arc<dyn Fn(&str) + Send + Sync>;

/// Cache statistics.
#[derive(Debug, Default)]
pub struct CacheStats {
    hits: AtomicU64,
    misses: AtomicU64,
    sets: AtomicU64,
    evictions: AtomicU64,
    expirations: AtomicU64,
    invalidations: AtomicU64,
    errors: AtomicU64,
}

impl CacheStats {
    /// Get hit count.
    pub fn hits(&self) -> u64 {
        self.hits.load(AtomicOrdering::Relaxed)
    }

    /// Get miss count.
    pub fn misses(&self) -> u64 {
        self.misses.load(AtomicOrdering::Relaxed)
    }

    /// Get successful set count.
    pub fn sets(&self) -> u64 {
        self.sets.load(AtomicOrdering::Relaxed)
    }

    /// Get eviction count.
    pub fn evictions(&self) -> u64 {
        self.evictions.load(AtomicOrdering::Relaxed)
    }

    /// Get count of entries dropped for exceeding their TTL.
    pub fn expirations(&self) -> u64 {
        self.expirations.load(AtomicOrdering::Relaxed)
    }

    /// Get count of entries removed by delete or invalidation.
    pub fn invalidations(&self) -> u64 {
        self.invalidations.load(AtomicOrdering::Relaxed)
    }

    /// Get count of absorbed backend errors.
    pub fn errors(&self) -> u64 {
        self.errors.load(AtomicOrdering::Relaxed)
    }

    /// Calculate hit rate (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let hits = self.hits() as f64;
        let total = hits + self.misses() as f64;
        if total > 0.0 {
            hits / total
        } else {
            0.0
        }
    }

    fn bump(counter: &AtomicU64, by: u64) {
        counter.fetch_add(by, AtomicOrdering::Relaxed);
    }
}

/// Thread-safe cache with TTL, eviction and dependency invalidation.
pub struct CacheManager<V> {
    store: Mutex<CacheStore<V>>,
    stats: CacheStats,
    callbacks: RwLock<Vec<InvalidationCallback>>,
    default_ttl: Option<Duration>,
}

impl<V: Clone> CacheManager<V> {
    /// Create a cache with the given configuration.
    pub fn new(config: CacheConfig) -> Self {
        let default_ttl = config.default_ttl;
        Self {
            store: Mutex::new(CacheStore::new(config)),
            stats: CacheStats::default(),
            callbacks: RwLock::new(Vec::new()),
            default_ttl,
        }
    }

    /// Get a cached value.
    ///
    /// Expired entries count as misses and are removed.
    pub fn get(&self, key: &CacheKey) -> Option<V> {
        let canonical = key.canonical();
        let lookup = self.store.lock().get(&canonical);
        match lookup {
            Lookup::Hit(value) => {
                CacheStats::bump(&self.stats.hits, 1);
                Some(value)
            }
            Lookup::Miss => {
                CacheStats::bump(&self.stats.misses, 1);
                None
            }
            Lookup::Expired => {
                CacheStats::bump(&self.stats.misses, 1);
                CacheStats::bump(&self.stats.expirations, 1);
                debug!(key = %canonical, "cache entry expired");
                None
            }
        }
    }

    /// Store a value.
    ///
    /// `ttl` of `None` falls back to the configured default TTL. Returns
    /// `false` if the backend could not store the entry.
    pub fn set<I, S>(&self, key: &CacheKey, value: V, ttl: Option<Duration>, dependencies: I) -> bool
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let canonical = key.canonical();
        let dependencies: HashSet<String> = dependencies.into_iter().map(Into::into).collect();
        let ttl = ttl.or(self.default_ttl);

        let result = self
            .store
            .lock()
            .insert(canonical.clone(), value, ttl, dependencies);

        match result {
            Ok(outcome) => {
                CacheStats::bump(&self.stats.sets, 1);
                CacheStats::bump(&self.stats.evictions, outcome.evicted.len() as u64);
                CacheStats::bump(&self.stats.expirations, outcome.expired.len() as u64);
                if !outcome.evicted.is_empty() {
                    debug!(key = %canonical, evicted = outcome.evicted.len(), "cache eviction");
                }
                true
            }
            Err(e) => {
                CacheStats::bump(&self.stats.errors, 1);
                warn!(key = %canonical, error = %e, "cache set failed");
                false
            }
        }
    }

    /// Remove an entry, notifying invalidation callbacks.
    pub fn delete(&self, key: &CacheKey) -> bool {
        let canonical = key.canonical();
        let removed = self.store.lock().remove(&canonical).is_some();
        if removed {
            CacheStats::bump(&self.stats.invalidations, 1);
            self.notify(std::slice::from_ref(&canonical));
        }
        removed
    }

    /// Check if a live entry exists, without touching statistics.
    pub fn contains(&self, key: &CacheKey) -> bool {
        let store = self.store.lock();
        store
            .peek(&key.canonical())
            .is_some_and(|entry| !entry.is_expired())
    }

    /// Remove every entry that declared `dependency`.
    ///
    /// Uses the reverse dependency index, so the cost is proportional to the
    /// number of matching entries rather than the cache size.
    pub fn invalidate_by_dependency(&self, dependency: &str) -> usize {
        let removed = self.store.lock().remove_by_dependency(dependency);
        self.finish_invalidation(&removed, "dependency", dependency)
    }

    /// Remove every entry whose canonical key contains `pattern`.
    ///
    /// This is a linear scan over all keys and is meant for administrative
    /// use; hot paths should invalidate by dependency.
    pub fn invalidate_by_pattern(&self, pattern: &str) -> usize {
        let removed = self.store.lock().remove_matching(pattern);
        self.finish_invalidation(&removed, "pattern", pattern)
    }

    /// Drop all expired entries now.
    pub fn cleanup_expired(&self) -> usize {
        let expired = self.store.lock().cleanup_expired();
        CacheStats::bump(&self.stats.expirations, expired.len() as u64);
        expired.len()
    }

    /// Remove every entry. Counted and reported to callbacks like any
    /// other invalidation.
    pub fn clear(&self) -> usize {
        let removed = {
            let mut store = self.store.lock();
            let keys = store.keys();
            store.clear();
            keys
        };
        self.finish_invalidation(&removed, "clear", "*")
    }

    /// Register a callback for removed keys.
    pub fn on_invalidate<F>(&self, callback: F)
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.callbacks.write().push(Arc::new(callback));
    }

    /// Cache statistics.
    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }

    /// Number of stored entries (including not-yet-swept expired ones).
    pub fn len(&self) -> usize {
        self.store.lock().len()
    }

    /// Check if the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Estimated memory use in megabytes.
    pub fn estimated_memory_mb(&self) -> f64 {
        self.store.lock().estimated_memory_mb()
    }

    /// Canonical keys currently stored, most recently used first.
    pub fn keys(&self) -> Vec<String> {
        self.store.lock().keys()
    }

    fn finish_invalidation(&self, removed: &[String], kind: &str, target: &str) -> usize {
        if !removed.is_empty() {
            CacheStats::bump(&self.stats.invalidations, removed.len() as u64);
            debug!(kind, target, removed = removed.len(), "cache invalidation");
            self.notify(removed);
        }
        removed.len()
    }

    fn notify(&self, keys: &[String]) {
        // Clone the list so callbacks may register further callbacks.
        let callbacks: Vec<InvalidationCallback> = self.callbacks.read().clone();
        for key in keys {
            for callback in &callbacks {
                callback(key);
            }
        }
    }
}

impl<V: Clone> Default for CacheManager<V> {
    fn default() -> Self {
        Self::new(CacheConfig::default())
    }
}

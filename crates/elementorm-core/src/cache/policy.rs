//! Eviction policies.

use std::fmt;

use lru::LruCache;

use super::entry::CacheEntry;

/// Strategy for choosing which entry to evict when the store is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EvictionPolicy {
    /// Evict the least recently accessed entry.
    #[default]
    Lru,
    /// Evict the entry with the fewest hits; ties go to the least recent.
    Lfu,
    /// Evict the oldest inserted entry.
    Fifo,
}

impl EvictionPolicy {
    /// Pick the key of the entry to evict.
    ///
    /// `entries` is kept in recency order by the store, most recent first.
    pub fn select_victim<V>(&self, entries: &LruCache<String, CacheEntry<V>>) -> Option<String> {
        match self {
            EvictionPolicy::Lru => entries.peek_lru().map(|(key, _)| key.clone()),
            EvictionPolicy::Lfu => entries
                .iter()
                .rev()
                .min_by_key(|(_, entry)| entry.access_count)
                .map(|(key, _)| key.clone()),
            EvictionPolicy::Fifo => entries
                .iter()
                .min_by_key(|(_, entry)| entry.sequence)
                .map(|(key, _)| key.clone()),
        }
    }
}

impl fmt::Display for EvictionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EvictionPolicy::Lru => write!(f, "lru"),
            EvictionPolicy::Lfu => write!(f, "lfu"),
            EvictionPolicy::Fifo => write!(f, "fifo"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn entries() -> LruCache<String, CacheEntry<u32>> {
        let mut cache = LruCache::unbounded();
        for (seq, key) in ["a", "b", "c"].iter().enumerate() {
            cache.put(
                key.to_string(),
                CacheEntry::new(*key, 0, None, HashSet::new(), seq as u64),
            );
        }
        cache
    }

    #[test]
    fn test_lru_picks_least_recent() {
        let mut cache = entries();
        cache.get("a");
        assert_eq!(EvictionPolicy::Lru.select_victim(&cache).as_deref(), Some("b"));
    }

    #[test]
    fn test_lfu_picks_fewest_hits() {
        let mut cache = entries();
        for key in ["a", "b"] {
            if let Some(entry) = cache.get_mut(key) {
                entry.touch();
            }
        }
        assert_eq!(EvictionPolicy::Lfu.select_victim(&cache).as_deref(), Some("c"));
    }

    #[test]
    fn test_lfu_tie_breaks_on_recency() {
        let mut cache = entries();
        cache.get("a");
        assert_eq!(EvictionPolicy::Lfu.select_victim(&cache).as_deref(), Some("b"));
    }

    #[test]
    fn test_fifo_ignores_access() {
        let mut cache = entries();
        cache.get("a");
        assert_eq!(EvictionPolicy::Fifo.select_victim(&cache).as_deref(), Some("a"));
    }
}

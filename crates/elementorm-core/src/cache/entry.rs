//! Cache entries with TTL and access statistics.

use std::collections::HashSet;
use std::time::{Duration, Instant};

/// A cached payload with metadata.
#[derive(Debug, Clone)]
pub struct CacheEntry<V> {
    /// Canonical key of this entry.
    pub key: String,
    /// The cached payload.
    pub data: V,
    /// When the entry was stored.
    pub created_at: Instant,
    /// When the entry was last read.
    pub accessed_at: Instant,
    /// Number of reads that hit this entry.
    pub access_count: u64,
    /// Time to live; `None` never expires.
    pub ttl: Option<Duration>,
    /// Dependency tags this entry is invalidated by.
    pub dependencies: HashSet<String>,
    /// Insertion sequence number, used for FIFO eviction.
    pub sequence: u64,
}

impl<V> CacheEntry<V> {
    /// Create a new entry.
    pub fn new(
        key: impl Into<String>,
        data: V,
        ttl: Option<Duration>,
        dependencies: HashSet<String>,
        sequence: u64,
    ) -> Self {
        let now = Instant::now();
        Self {
            key: key.into(),
            data,
            created_at: now,
            accessed_at: now,
            access_count: 0,
            ttl,
            dependencies,
            sequence,
        }
    }

    /// Whether the entry has outlived its TTL.
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Instant::now())
    }

    /// Whether the entry is expired at the given instant.
    pub fn is_expired_at(&self, now: Instant) -> bool {
        match self.ttl {
            Some(ttl) => now.saturating_duration_since(self.created_at) > ttl,
            None => false,
        }
    }

    /// Record a read.
    pub fn touch(&mut self) {
        self.accessed_at = Instant::now();
        self.access_count += 1;
    }

    /// Time since the entry was stored.
    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_without_ttl_never_expires() {
        let entry = CacheEntry::new("k", 1, None, HashSet::new(), 0);
        assert!(!entry.is_expired_at(Instant::now() + Duration::from_secs(3600)));
    }

    #[test]
    fn test_entry_expires_after_ttl() {
        let entry = CacheEntry::new("k", 1, Some(Duration::from_secs(5)), HashSet::new(), 0);
        assert!(!entry.is_expired_at(entry.created_at + Duration::from_secs(5)));
        assert!(entry.is_expired_at(entry.created_at + Duration::from_secs(6)));
    }

    #[test]
    fn test_touch_updates_stats() {
        let mut entry = CacheEntry::new("k", "v", None, HashSet::new(), 0);
        entry.touch();
        entry.touch();
        assert_eq!(entry.access_count, 2);
        assert!(entry.accessed_at >= entry.created_at);
    }
}

//! Cache backend errors.
//!
//! These never reach callers of [`super::CacheManager`]; the manager logs
//! them, counts them, and degrades to a miss.

use thiserror::Error;

/// Internal cache store failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CacheError {
    /// The store is configured to hold no entries.
    #[error("cache has zero capacity")]
    ZeroCapacity,

    /// The eviction policy could not free space.
    #[error("eviction failed: {size} entries, limit {max_size}")]
    EvictionFailed {
        /// Entries currently stored.
        size: usize,
        /// Configured entry limit.
        max_size: usize,
    },

    /// The dependency index disagrees with the entry map.
    #[error("dependency index out of sync for key {key}")]
    IndexCorrupted {
        /// Key whose index edges are inconsistent.
        key: String,
    },
}

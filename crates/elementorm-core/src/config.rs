//! Engine configuration.

use std::time::Duration;

use crate::cache::EvictionPolicy;

/// Default maximum number of cache entries.
pub const DEFAULT_CACHE_MAX_SIZE: usize = 1000;

/// Default memory ceiling for the cache, in megabytes.
pub const DEFAULT_CACHE_MAX_MEMORY_MB: f64 = 100.0;

/// Default per-entry memory estimate, in megabytes.
pub const DEFAULT_ESTIMATED_ENTRY_SIZE_MB: f64 = 0.001;

/// Default interval between opportunistic expiry sweeps.
pub const DEFAULT_CLEANUP_INTERVAL: Duration = Duration::from_secs(60);

/// Query results with at least this many elements are not cached.
pub const DEFAULT_RESULT_CACHE_THRESHOLD: usize = 1000;

/// Default capacity of the channel used by streaming queries.
pub const DEFAULT_STREAM_CHANNEL_CAPACITY: usize = 4;

/// Default number of in-flight batch operations.
pub const DEFAULT_BATCH_MAX_CONCURRENCY: usize = 10;

/// Default number of operations per batch chunk.
pub const DEFAULT_BATCH_SIZE: usize = 100;

/// Default failure ratio above which a batch is aborted.
pub const DEFAULT_BATCH_ERROR_THRESHOLD: f64 = 0.1;

/// Cache store configuration.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Maximum number of entries.
    pub max_size: usize,
    /// Memory ceiling in megabytes.
    pub max_memory_mb: f64,
    /// Estimated memory per entry in megabytes.
    pub estimated_entry_size_mb: f64,
    /// TTL applied when `set` is called without one. `None` never expires.
    pub default_ttl: Option<Duration>,
    /// Minimum time between expiry sweeps triggered by `set`.
    pub cleanup_interval: Duration,
    /// Eviction strategy.
    pub eviction_policy: EvictionPolicy,
}

impl CacheConfig {
    /// Create a configuration with the given entry limit.
    pub fn new(max_size: usize) -> Self {
        Self {
            max_size,
            ..Self::default()
        }
    }

    /// Set the maximum number of entries.
    pub fn with_max_size(mut self, max_size: usize) -> Self {
        self.max_size = max_size;
        self
    }

    /// Set the memory ceiling.
    pub fn with_max_memory_mb(mut self, max_memory_mb: f64) -> Self {
        self.max_memory_mb = max_memory_mb;
        self
    }

    /// Set the per-entry memory estimate.
    pub fn with_estimated_entry_size_mb(mut self, size_mb: f64) -> Self {
        self.estimated_entry_size_mb = size_mb;
        self
    }

    /// Set the default TTL.
    pub fn with_default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = Some(ttl);
        self
    }

    /// Set the expiry sweep interval.
    pub fn with_cleanup_interval(mut self, interval: Duration) -> Self {
        self.cleanup_interval = interval;
        self
    }

    /// Set the eviction policy.
    pub fn with_eviction_policy(mut self, policy: EvictionPolicy) -> Self {
        self.eviction_policy = policy;
        self
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_size: DEFAULT_CACHE_MAX_SIZE,
            max_memory_mb: DEFAULT_CACHE_MAX_MEMORY_MB,
            estimated_entry_size_mb: DEFAULT_ESTIMATED_ENTRY_SIZE_MB,
            default_ttl: None,
            cleanup_interval: DEFAULT_CLEANUP_INTERVAL,
            eviction_policy: EvictionPolicy::default(),
        }
    }
}

/// Query execution configuration.
#[derive(Debug, Clone)]
pub struct QueryConfig {
    /// Results with at least this many elements bypass the cache.
    pub result_cache_threshold: usize,
    /// TTL for cached query results.
    pub result_ttl: Option<Duration>,
    /// Buffered batches for streaming queries.
    pub stream_channel_capacity: usize,
}

impl QueryConfig {
    /// Set the result cache threshold.
    pub fn with_result_cache_threshold(mut self, threshold: usize) -> Self {
        self.result_cache_threshold = threshold;
        self
    }

    /// Set the TTL for cached results.
    pub fn with_result_ttl(mut self, ttl: Duration) -> Self {
        self.result_ttl = Some(ttl);
        self
    }

    /// Set the streaming channel capacity.
    pub fn with_stream_channel_capacity(mut self, capacity: usize) -> Self {
        self.stream_channel_capacity = capacity.max(1);
        self
    }
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            result_cache_threshold: DEFAULT_RESULT_CACHE_THRESHOLD,
            result_ttl: None,
            stream_channel_capacity: DEFAULT_STREAM_CHANNEL_CAPACITY,
        }
    }
}

/// Batch processor configuration.
#[derive(Debug, Clone)]
pub struct BatchConfig {
    /// Maximum operations in flight at once.
    pub max_concurrency: usize,
    /// Operations per chunk.
    pub batch_size: usize,
    /// Failure ratio (0.0 to 1.0) above which the batch aborts.
    pub error_threshold: f64,
}

impl BatchConfig {
    /// Set the concurrency limit.
    pub fn with_max_concurrency(mut self, max: usize) -> Self {
        self.max_concurrency = max.max(1);
        self
    }

    /// Set the chunk size.
    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = size.max(1);
        self
    }

    /// Set the failure ratio threshold.
    pub fn with_error_threshold(mut self, threshold: f64) -> Self {
        self.error_threshold = threshold.clamp(0.0, 1.0);
        self
    }
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_concurrency: DEFAULT_BATCH_MAX_CONCURRENCY,
            batch_size: DEFAULT_BATCH_SIZE,
            error_threshold: DEFAULT_BATCH_ERROR_THRESHOLD,
        }
    }
}

/// Transaction configuration.
#[derive(Debug, Clone, Default)]
pub struct TransactionConfig {
    /// Timeout applied to root transactions that don't set their own.
    pub default_timeout: Option<Duration>,
}

impl TransactionConfig {
    /// Set the default transaction timeout.
    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = Some(timeout);
        self
    }
}

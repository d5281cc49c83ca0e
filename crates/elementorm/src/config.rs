//! Context configuration.

use elementorm_core::{BatchConfig, CacheConfig, QueryConfig, TransactionConfig};

/// Configuration bundle for an [`crate::ElementContext`].
#[derive(Debug, Clone)]
pub struct ContextConfig {
    /// Result cache settings, shared by queries and relationships.
    pub cache: CacheConfig,
    /// Query execution settings.
    pub query: QueryConfig,
    /// Batch processor settings.
    pub batch: BatchConfig,
    /// Transaction settings.
    pub transaction: TransactionConfig,
    /// Invalidate cached results for every type touched by a root commit.
    pub invalidate_on_commit: bool,
}

impl ContextConfig {
    /// Set the cache configuration.
    pub fn with_cache(mut self, cache: CacheConfig) -> Self {
        self.cache = cache;
        self
    }

    /// Set the query configuration.
    pub fn with_query(mut self, query: QueryConfig) -> Self {
        self.query = query;
        self
    }

    /// Set the batch configuration.
    pub fn with_batch(mut self, batch: BatchConfig) -> Self {
        self.batch = batch;
        self
    }

    /// Set the transaction configuration.
    pub fn with_transaction(mut self, transaction: TransactionConfig) -> Self {
        self.transaction = transaction;
        self
    }

    /// Enable or disable cache invalidation on commit.
    pub fn with_invalidate_on_commit(mut self, enabled: bool) -> Self {
        self.invalidate_on_commit = enabled;
        self
    }
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            cache: CacheConfig::default(),
            query: QueryConfig::default(),
            batch: BatchConfig::default(),
            transaction: TransactionConfig::default(),
            invalidate_on_commit: true,
        }
    }
}

//! elementorm core - lazy queries, a dependency-aware result cache, change
//! tracking and nested transactions over typed elements.
//!
//! Element storage stays outside the crate behind [`ElementProvider`]. The
//! [`QueryBuilder`] builds immutable [`QueryPlan`]s that the
//! [`QueryExecutor`] optimizes, runs and caches; the [`ChangeTracker`]
//! records edits to attached entities, and the [`TransactionManager`]
//! commits them through an optional [`UnitOfWork`].

pub mod batch;
pub mod cache;
pub mod config;
pub mod error;
pub mod model;
pub mod provider;
pub mod query;
pub mod relationship;
pub mod tracking;
pub mod transaction;
pub mod validation;

pub use batch::{
    AsyncBatchProcessor, BatchAborted, BatchFailure, BatchOperationError, BatchReport,
};
pub use cache::{CacheEntry, CacheKey, CacheManager, CacheStats, CacheStore, EvictionPolicy};
pub use config::{BatchConfig, CacheConfig, QueryConfig, TransactionConfig};
pub use error::{Error, Result};
pub use model::{Element, ElementId, Value};
pub use provider::{ElementProvider, InMemoryProvider, ProviderError};
pub use query::{
    ElementSet, KeySelector, Operation, Predicate, Projection, QueryBuilder, QueryError,
    QueryExecutor, QueryPlan, QueryResult, ResultCache,
};
pub use relationship::{
    ProviderRelationshipLoader, RelationshipDefinition, RelationshipError, RelationshipKind,
    RelationshipLoader, RelationshipManager,
};
pub use tracking::{
    ChangeEvent, ChangeTracker, ChangeTrackingError, EntityState, EntityTracker,
};
pub use transaction::{
    CommitSummary, ProviderUnitOfWork, Transaction, TransactionError, TransactionManager,
    TransactionStatus, UnitOfWork, UnitOfWorkError,
};
pub use validation::{ValidationError, Validator};

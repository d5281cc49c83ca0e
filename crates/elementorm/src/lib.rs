//! elementorm - lazy queries, dependency-aware caching and change tracking
//! over element collections.
//!
//! # Quick Start
//!
//! ```ignore
//! use elementorm::{ContextConfig, Element, ElementContext, Predicate};
//!
//! let ctx = ElementContext::in_memory(
//!     vec![Element::new(1, "Wall").with_field("height", 12)],
//!     ContextConfig::default(),
//! );
//! let tall = ctx.where_("Wall", Predicate::gt("height", 10)).to_list()?;
//!
//! let tx = ctx.transaction();
//! tx.set_property(tall[0].id, "height", 15)?;
//! tx.commit()?;
//! ```

pub mod config;
pub mod context;

pub use config::ContextConfig;
pub use context::ElementContext;

pub use elementorm_core::{
    batch, cache, model, provider, query, relationship, tracking, transaction, validation,
};
pub use elementorm_core::{
    AsyncBatchProcessor, BatchConfig, CacheConfig, CacheKey, CacheStats, ChangeEvent, ChangeTracker, Element,
    ElementId, ElementProvider, ElementSet, EntityState, Error, InMemoryProvider, KeySelector,
    Predicate, Projection, QueryBuilder, QueryConfig, QueryError, RelationshipDefinition,
    RelationshipManager, Result, Transaction, TransactionConfig, TransactionError,
    TransactionManager, UnitOfWork, ValidationError, Validator, Value,
};

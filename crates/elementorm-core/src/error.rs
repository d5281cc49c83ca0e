//! Crate-level error type.

use thiserror::Error;

use crate::batch::BatchOperationError;
use crate::cache::CacheError;
use crate::provider::ProviderError;
use crate::query::QueryError;
use crate::relationship::RelationshipError;
use crate::tracking::ChangeTrackingError;
use crate::transaction::TransactionError;
use crate::validation::ValidationError;

/// Any error raised by the engine.
#[derive(Debug, Clone, Error)]
pub enum Error {
    /// Query building or execution error.
    #[error("query error: {0}")]
    Query(#[from] QueryError),

    /// Cache backend error.
    #[error("cache error: {0}")]
    Cache(#[from] CacheError),

    /// Change tracking error.
    #[error("change tracking error: {0}")]
    Tracking(#[from] ChangeTrackingError),

    /// Transaction error.
    #[error("transaction error: {0}")]
    Transaction(#[from] TransactionError),

    /// Relationship error.
    #[error("relationship error: {0}")]
    Relationship(#[from] RelationshipError),

    /// Batch error.
    #[error("batch error: {0}")]
    Batch(#[from] BatchOperationError),

    /// Validation error.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Element provider error.
    #[error("provider error: {0}")]
    Provider(#[from] ProviderError),
}

/// Result type using the crate error.
pub type Result<T> = std::result::Result<T, Error>;

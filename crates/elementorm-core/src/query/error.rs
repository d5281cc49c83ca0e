//! Query error types.

use thiserror::Error;

use crate::provider::ProviderError;

/// Errors raised by query building and execution.
#[derive(Debug, Clone, Error)]
pub enum QueryError {
    /// A single-element operation found no elements.
    #[error("sequence contains no elements")]
    EmptySequence,

    /// A single-element operation found more than one element.
    #[error("sequence contains more than one element")]
    MultipleElements,

    /// The provider or an operation failed during execution.
    #[error("query execution failed in {operation} on {element_type}: {message}")]
    ExecutionFailure {
        operation: String,
        element_type: String,
        message: String,
    },

    /// A builder argument was out of range.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

impl QueryError {
    /// Wrap a provider failure with its execution context.
    pub fn provider(element_type: &str, operation: &str, err: ProviderError) -> Self {
        QueryError::ExecutionFailure {
            operation: operation.to_string(),
            element_type: element_type.to_string(),
            message: err.to_string(),
        }
    }

    /// Check if this is the "no elements" error.
    pub fn is_empty_sequence(&self) -> bool {
        matches!(self, QueryError::EmptySequence)
    }
}

/// Result type for query operations.
pub type QueryResult<T> = std::result::Result<T, QueryError>;

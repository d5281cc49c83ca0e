//! Transaction errors.

use thiserror::Error;
use uuid::Uuid;

use super::unit_of_work::UnitOfWorkError;
use crate::tracking::ChangeTrackingError;
use crate::validation::ValidationError;

/// Why a root commit failed.
#[derive(Debug, Clone, Error)]
pub enum CommitCause {
    /// An entity failed validation.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// The unit of work refused the commit.
    #[error(transparent)]
    UnitOfWork(#[from] UnitOfWorkError),
}

/// Errors raised by transactions.
#[derive(Debug, Clone, Error)]
pub enum TransactionError {
    /// The transaction is no longer active.
    #[error("transaction {0} is not active")]
    InactiveTransaction(Uuid),

    /// No savepoint with this name exists.
    #[error("savepoint '{name}' not found in transaction {transaction_id}")]
    SavepointNotFound { transaction_id: Uuid, name: String },

    /// The commit failed and the transaction was rolled back.
    #[error("commit of transaction {transaction_id} failed: {cause}")]
    CommitFailure {
        transaction_id: Uuid,
        #[source]
        cause: CommitCause,
    },

    /// Rolling back failed; tracked state may be inconsistent.
    #[error("rollback of transaction {transaction_id} failed: {cause}{}", after_commit(.commit_error))]
    RollbackFailure {
        transaction_id: Uuid,
        #[source]
        cause: UnitOfWorkError,
        /// The commit error that triggered the rollback, if any.
        commit_error: Option<Box<TransactionError>>,
    },

    /// A nested transaction is still active above this one.
    #[error("transaction {0} has an active nested transaction")]
    NotInnermost(Uuid),

    /// A tracker operation inside the transaction failed.
    #[error(transparent)]
    Tracking(#[from] ChangeTrackingError),
}

impl TransactionError {
    /// Check if the transaction ended up rolled back cleanly.
    pub fn is_commit_failure(&self) -> bool {
        matches!(self, TransactionError::CommitFailure { .. })
    }
}

fn after_commit(commit_error: &Option<Box<TransactionError>>) -> String {
    commit_error
        .as_ref()
        .map(|e| format!(" after: {}", e))
        .unwrap_or_default()
}

/// Result type for transactions.
pub type TransactionResult<T> = std::result::Result<T, TransactionError>;

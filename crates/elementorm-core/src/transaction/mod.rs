//! Nested transactions over the change tracker.

mod context;
mod error;
mod manager;
mod unit_of_work;

pub use context::{Savepoint, TransactionContext, TransactionOp, TransactionStatus};
pub use error::{CommitCause, TransactionError, TransactionResult};
pub use manager::{AffectedEntity, CommitListener, CommitSummary, Transaction, TransactionManager};
pub use unit_of_work::{ProviderUnitOfWork, UnitOfWork, UnitOfWorkError};

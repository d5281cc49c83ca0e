//! Unit-of-work collaborator.
//!
//! A root commit registers every dirty entity with the unit of work and then
//! asks it to commit; a root rollback asks it to roll back. Without a unit of
//! work, transactions only affect the change tracker.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use thiserror::Error;
use tracing::debug;

use crate::model::Element;
use crate::provider::InMemoryProvider;

/// Failure reported by a unit of work.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unit of work failed: {0}")]
pub struct UnitOfWorkError(pub String);

/// Persistence boundary for committed changes.
#[async_trait]
pub trait UnitOfWork: Send + Sync {
    /// Queue an insert.
    fn register_new(&self, element: &Element);

    /// Queue an update.
    fn register_dirty(&self, element: &Element);

    /// Queue a delete.
    fn register_removed(&self, element: &Element);

    /// Apply queued work.
    fn commit(&self) -> Result<(), UnitOfWorkError>;

    /// Discard queued work.
    fn rollback(&self) -> Result<(), UnitOfWorkError>;

    /// Async variant of [`UnitOfWork::commit`].
    async fn commit_async(&self) -> Result<(), UnitOfWorkError> {
        self.commit()
    }

    /// Async variant of [`UnitOfWork::rollback`].
    async fn rollback_async(&self) -> Result<(), UnitOfWorkError> {
        self.rollback()
    }
}

#[derive(Debug, Clone)]
enum PendingWrite {
    Upsert(Element),
    Remove(Element),
}

/// Unit of work that writes committed changes into an [`InMemoryProvider`].
pub struct ProviderUnitOfWork {
    provider: Arc<InMemoryProvider>,
    pending: Mutex<Vec<PendingWrite>>,
}

impl ProviderUnitOfWork {
    /// Create a unit of work over a provider.
    pub fn new(provider: Arc<InMemoryProvider>) -> Self {
        Self {
            provider,
            pending: Mutex::new(Vec::new()),
        }
    }

    /// Number of queued writes.
    pub fn pending_len(&self) -> usize {
        self.pending.lock().len()
    }
}

impl UnitOfWork for ProviderUnitOfWork {
    fn register_new(&self, element: &Element) {
        self.pending.lock().push(PendingWrite::Upsert(element.clone()));
    }

    fn register_dirty(&self, element: &Element) {
        self.pending.lock().push(PendingWrite::Upsert(element.clone()));
    }

    fn register_removed(&self, element: &Element) {
        self.pending.lock().push(PendingWrite::Remove(element.clone()));
    }

    fn commit(&self) -> Result<(), UnitOfWorkError> {
        let writes = std::mem::take(&mut *self.pending.lock());
        debug!(writes = writes.len(), "applying unit of work");
        for write in writes {
            match write {
                PendingWrite::Upsert(element) => self.provider.upsert(element),
                PendingWrite::Remove(element) => {
                    self.provider.remove(element.id);
                }
            }
        }
        Ok(())
    }

    fn rollback(&self) -> Result<(), UnitOfWorkError> {
        self.pending.lock().clear();
        Ok(())
    }
}

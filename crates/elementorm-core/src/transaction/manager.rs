//! Transaction manager and transaction handles.
//!
//! The manager keeps a stack of open contexts. `begin` while a transaction
//! is open nests a new context on top; only the innermost context may
//! commit. Changes made through a [`Transaction`] handle are applied to the
//! change tracker at once and logged, and the first touch of each entity
//! snapshots its tracker entry so a nested rollback can put it back.

use std::collections::BTreeSet;
use std::future::Future;
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use super::context::{Savepoint, TransactionContext, TransactionOp, TransactionStatus};
use super::error::{CommitCause, TransactionError, TransactionResult};
use super::unit_of_work::{UnitOfWork, UnitOfWorkError};
use crate::config::TransactionConfig;
use crate::model::{Element, ElementId, Value};
use crate::tracking::{ChangeTracker, EntityState, EntityTracker, RelationshipChangeKind};
use crate::validation::{ValidationError, Validator};

/// An entity touched by a commit.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AffectedEntity {
    pub entity_id: ElementId,
    pub entity_type: String,
}

/// What a root commit wrote.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitSummary {
    pub transaction_id: Uuid,
    pub added: Vec<AffectedEntity>,
    pub modified: Vec<AffectedEntity>,
    pub removed: Vec<AffectedEntity>,
    /// Operations logged by the transaction and its committed children.
    pub operation_count: usize,
}

impl CommitSummary {
    /// Every affected entity.
    pub fn entities(&self) -> impl Iterator<Item = &AffectedEntity> {
        self.added
            .iter()
            .chain(self.modified.iter())
            .chain(self.removed.iter())
    }

    /// Distinct element types touched.
    pub fn affected_types(&self) -> BTreeSet<String> {
        self.entities().map(|e| e.entity_type.clone()).collect()
    }

    /// Check if nothing was written.
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.modified.is_empty() && self.removed.is_empty()
    }
}

/// Listener notified after every successful root commit.
pub type CommitListener = Arc<dyn Fn(&CommitSummary) + Send + Sync>;

/// Outcome of claiming a transaction for commit.
enum CommitClaim {
    /// Root transaction, now `Committing`.
    Root,
    /// Nested transaction, already merged into its parent.
    Merged,
}

/// Rolls back a root whose async commit was dropped while `Committing`.
struct CancelledCommitGuard<'a> {
    manager: &'a TransactionManager,
    context: &'a Arc<TransactionContext>,
}

impl Drop for CancelledCommitGuard<'_> {
    fn drop(&mut self) {
        let context = self.context;
        if context
            .transition(TransactionStatus::Committing, TransactionStatus::RollingBack)
            .is_err()
        {
            return;
        }
        warn!(transaction_id = %context.transaction_id, "commit cancelled, rolling back");
        self.manager.unwind_above(context);
        if let Err(e) = self.manager.rollback_root(context) {
            error!(transaction_id = %context.transaction_id, error = %e, "rollback of cancelled commit failed");
        }
    }
}

/// Work gathered before the unit of work is asked to commit.
struct PreparedCommit {
    summary: CommitSummary,
}

/// Creates and coordinates transactions over one change tracker.
pub struct TransactionManager {
    tracker: Arc<ChangeTracker>,
    unit_of_work: RwLock<Option<Arc<dyn UnitOfWork>>>,
    validator: RwLock<Option<Arc<dyn Validator>>>,
    stack: Mutex<Vec<Arc<TransactionContext>>>,
    listeners: RwLock<Vec<CommitListener>>,
    config: TransactionConfig,
}

impl TransactionManager {
    /// Create a manager over `tracker`.
    pub fn new(tracker: Arc<ChangeTracker>, config: TransactionConfig) -> Self {
        Self {
            tracker,
            unit_of_work: RwLock::new(None),
            validator: RwLock::new(None),
            stack: Mutex::new(Vec::new()),
            listeners: RwLock::new(Vec::new()),
            config,
        }
    }

    /// The tracker transactions operate on.
    pub fn tracker(&self) -> &Arc<ChangeTracker> {
        &self.tracker
    }

    /// Install the unit of work used by root commits and rollbacks.
    pub fn set_unit_of_work(&self, unit_of_work: Arc<dyn UnitOfWork>) {
        *self.unit_of_work.write() = Some(unit_of_work);
    }

    /// Install the validator run before root commits.
    pub fn set_validator(&self, validator: Arc<dyn Validator>) {
        *self.validator.write() = Some(validator);
    }

    /// Register a listener for successful root commits.
    pub fn on_commit<F>(&self, listener: F)
    where
        F: Fn(&CommitSummary) + Send + Sync + 'static,
    {
        self.listeners.write().push(Arc::new(listener));
    }

    /// Number of open transactions (root plus nested).
    pub fn depth(&self) -> usize {
        self.stack.lock().len()
    }

    /// Check if any transaction is open.
    pub fn in_transaction(&self) -> bool {
        self.depth() > 0
    }

    /// Id of the innermost open transaction.
    pub fn current_id(&self) -> Option<Uuid> {
        self.stack.lock().last().map(|c| c.transaction_id)
    }

    /// Begin a transaction, nested if one is already open. Uses the
    /// configured default timeout.
    pub fn begin(self: &Arc<Self>) -> Transaction {
        self.begin_with_timeout(self.config.default_timeout)
    }

    /// Begin a transaction that is rolled back if still active after
    /// `timeout`.
    pub fn begin_with_timeout(self: &Arc<Self>, timeout: Option<Duration>) -> Transaction {
        let context = {
            let mut stack = self.stack.lock();
            let context = Arc::new(TransactionContext::new(stack.len()));
            stack.push(Arc::clone(&context));
            context
        };
        debug!(
            transaction_id = %context.transaction_id,
            nested_level = context.nested_level,
            "transaction started"
        );
        if let Some(timeout) = timeout {
            self.spawn_watchdog(&context, timeout);
        }
        Transaction {
            manager: Arc::clone(self),
            context,
            owner: true,
        }
    }

    fn spawn_watchdog(self: &Arc<Self>, context: &Arc<TransactionContext>, timeout: Duration) {
        let manager = Arc::downgrade(self);
        let weak_context = Arc::downgrade(context);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    tokio::time::sleep(timeout).await;
                    expire(manager, weak_context);
                });
            }
            Err(_) => {
                std::thread::spawn(move || {
                    std::thread::sleep(timeout);
                    expire(manager, weak_context);
                });
            }
        }
    }

    fn parent_of(&self, context: &Arc<TransactionContext>) -> Option<Arc<TransactionContext>> {
        let stack = self.stack.lock();
        let index = stack.iter().position(|c| Arc::ptr_eq(c, context))?;
        index.checked_sub(1).map(|i| Arc::clone(&stack[i]))
    }

    fn pop(&self, context: &Arc<TransactionContext>) {
        self.stack.lock().retain(|c| !Arc::ptr_eq(c, context));
    }

    /// Snapshot an entity the first time `context` touches it.
    fn touch(&self, context: &TransactionContext, id: ElementId) {
        if !context.has_touched(id) {
            context.record_snapshot(self.tracker.snapshot(id));
        }
    }

    /// Claim `context` for a commit.
    ///
    /// Claims are taken under the stack lock, so a nested commit and a
    /// rollback of its parent never interleave. A nested commit is merged
    /// into its parent before the lock is released; a root is left in
    /// `Committing` until [`TransactionManager::finish_root`] or a failed
    /// commit's rollback ends it.
    fn claim_commit(&self, context: &Arc<TransactionContext>) -> TransactionResult<CommitClaim> {
        context.ensure_active()?;
        let mut stack = self.stack.lock();
        let index = stack
            .iter()
            .position(|c| Arc::ptr_eq(c, context))
            .ok_or(TransactionError::InactiveTransaction(context.transaction_id))?;
        if index + 1 != stack.len() {
            return Err(TransactionError::NotInnermost(context.transaction_id));
        }

        let Some(parent) = index.checked_sub(1).map(|i| Arc::clone(&stack[i])) else {
            context.transition(TransactionStatus::Active, TransactionStatus::Committing)?;
            return Ok(CommitClaim::Root);
        };
        parent.ensure_active()?;
        context.transition(TransactionStatus::Active, TransactionStatus::Committing)?;
        let (operations, snapshots) = context.finish(TransactionStatus::Committed);
        debug!(operations = operations.len(), "nested transaction merged into parent");
        parent.merge_child(operations, snapshots);
        stack.truncate(index);
        Ok(CommitClaim::Merged)
    }

    /// Claim `context` for a rollback. Fails while a commit holds it.
    fn claim_rollback(&self, context: &Arc<TransactionContext>) -> TransactionResult<()> {
        let _stack = self.stack.lock();
        context.transition(TransactionStatus::Active, TransactionStatus::RollingBack)
    }

    #[instrument(skip(self, context), fields(transaction_id = %context.transaction_id))]
    fn commit(&self, context: &Arc<TransactionContext>) -> TransactionResult<Option<CommitSummary>> {
        if let CommitClaim::Merged = self.claim_commit(context)? {
            return Ok(None);
        }

        let prepared = match self.prepare_root(context) {
            Ok(prepared) => prepared,
            Err(cause) => return Err(self.fail_commit(context, cause)),
        };
        let uow = self.unit_of_work.read().clone();
        if let Some(uow) = uow {
            if let Err(e) = uow.commit() {
                return Err(self.fail_commit(context, CommitCause::UnitOfWork(e)));
            }
        }
        Ok(Some(self.finish_root(context, prepared)))
    }

    async fn commit_async(
        &self,
        context: &Arc<TransactionContext>,
    ) -> TransactionResult<Option<CommitSummary>> {
        if let CommitClaim::Merged = self.claim_commit(context)? {
            return Ok(None);
        }
        let _guard = CancelledCommitGuard {
            manager: self,
            context,
        };

        let prepared = match self.prepare_root(context) {
            Ok(prepared) => prepared,
            Err(cause) => return Err(self.fail_commit_async(context, cause).await),
        };
        let uow = self.unit_of_work.read().clone();
        if let Some(uow) = uow {
            if let Err(e) = uow.commit_async().await {
                return Err(self
                    .fail_commit_async(context, CommitCause::UnitOfWork(e))
                    .await);
            }
        }
        Ok(Some(self.finish_root(context, prepared)))
    }

    /// Validate dirty entities and register them with the unit of work.
    fn prepare_root(&self, context: &TransactionContext) -> Result<PreparedCommit, CommitCause> {
        let changes = self.tracker.get_all_changes();

        let validator = self.validator.read().clone();
        if let Some(validator) = validator {
            let mut failures = ValidationError::new();
            for change in changes.iter().filter(|c| c.state != EntityState::Deleted) {
                if let Err(e) = validator.validate(&change.current_element()) {
                    failures.merge(e);
                }
            }
            if !failures.is_empty() {
                return Err(CommitCause::Validation(failures));
            }
        }

        let uow = self.unit_of_work.read().clone();
        let mut summary = CommitSummary {
            transaction_id: context.transaction_id,
            added: Vec::new(),
            modified: Vec::new(),
            removed: Vec::new(),
            operation_count: context.operations().len(),
        };
        for change in &changes {
            let element = change.current_element();
            let affected = affected(change);
            match change.state {
                EntityState::Added => {
                    if let Some(uow) = &uow {
                        uow.register_new(&element);
                    }
                    summary.added.push(affected);
                }
                EntityState::Deleted => {
                    if let Some(uow) = &uow {
                        uow.register_removed(&change.original_element());
                    }
                    summary.removed.push(affected);
                }
                _ => {
                    if let Some(uow) = &uow {
                        uow.register_dirty(&element);
                    }
                    summary.modified.push(affected);
                }
            }
        }
        Ok(PreparedCommit { summary })
    }

    fn finish_root(&self, context: &Arc<TransactionContext>, prepared: PreparedCommit) -> CommitSummary {
        self.tracker.accept_changes();
        context.finish(TransactionStatus::Committed);
        self.pop(context);

        let summary = prepared.summary;
        info!(
            transaction_id = %summary.transaction_id,
            added = summary.added.len(),
            modified = summary.modified.len(),
            removed = summary.removed.len(),
            "transaction committed"
        );
        let listeners = self.listeners.read().clone();
        for listener in &listeners {
            listener(&summary);
        }
        summary
    }

    /// Hand a root that failed to commit over to rollback.
    fn abandon_commit(&self, context: &Arc<TransactionContext>, cause: CommitCause) -> TransactionError {
        let commit_error = TransactionError::CommitFailure {
            transaction_id: context.transaction_id,
            cause,
        };
        warn!(error = %commit_error, "commit failed, rolling back");
        if let Err(e) = context.transition(TransactionStatus::Committing, TransactionStatus::RollingBack) {
            error!(error = %e, "committing transaction changed status");
        }
        self.unwind_above(context);
        commit_error
    }

    fn fail_commit(&self, context: &Arc<TransactionContext>, cause: CommitCause) -> TransactionError {
        let commit_error = self.abandon_commit(context, cause);
        match self.rollback_root(context) {
            Ok(()) => commit_error,
            Err(rollback_error) => chain_rollback_failure(rollback_error, commit_error),
        }
    }

    async fn fail_commit_async(
        &self,
        context: &Arc<TransactionContext>,
        cause: CommitCause,
    ) -> TransactionError {
        let commit_error = self.abandon_commit(context, cause);
        match self.rollback_root_async(context).await {
            Ok(()) => commit_error,
            Err(rollback_error) => chain_rollback_failure(rollback_error, commit_error),
        }
    }

    /// Roll back nested transactions opened above `context`, innermost first.
    fn unwind_above(&self, context: &Arc<TransactionContext>) {
        loop {
            let (top, claimed) = {
                let stack = self.stack.lock();
                match stack.last() {
                    Some(top) if !Arc::ptr_eq(top, context) => {
                        let claimed = top
                            .transition(TransactionStatus::Active, TransactionStatus::RollingBack)
                            .is_ok();
                        (Arc::clone(top), claimed)
                    }
                    _ => return,
                }
            };
            if claimed {
                self.rollback_nested(&top);
            } else {
                self.pop(&top);
            }
        }
    }

    fn rollback_nested(&self, context: &Arc<TransactionContext>) {
        let (operations, snapshots) = context.finish(TransactionStatus::RolledBack);
        for snapshot in snapshots.into_iter().rev() {
            self.tracker.restore(snapshot);
        }
        self.pop(context);
        debug!(
            transaction_id = %context.transaction_id,
            discarded = operations.len(),
            "nested transaction rolled back"
        );
    }

    #[instrument(skip(self, context), fields(transaction_id = %context.transaction_id))]
    fn rollback(&self, context: &Arc<TransactionContext>) -> TransactionResult<()> {
        self.claim_rollback(context)?;
        self.unwind_above(context);

        if self.parent_of(context).is_some() {
            self.rollback_nested(context);
            return Ok(());
        }
        self.rollback_root(context)
    }

    async fn rollback_async(&self, context: &Arc<TransactionContext>) -> TransactionResult<()> {
        self.claim_rollback(context)?;
        self.unwind_above(context);

        if self.parent_of(context).is_some() {
            self.rollback_nested(context);
            return Ok(());
        }
        self.rollback_root_async(context).await
    }

    fn rollback_root(&self, context: &Arc<TransactionContext>) -> TransactionResult<()> {
        let uow = self.unit_of_work.read().clone();
        let result = uow.map_or(Ok(()), |uow| uow.rollback());
        self.finish_root_rollback(context, result)
    }

    async fn rollback_root_async(&self, context: &Arc<TransactionContext>) -> TransactionResult<()> {
        let uow = self.unit_of_work.read().clone();
        let result = match uow {
            Some(uow) => uow.rollback_async().await,
            None => Ok(()),
        };
        self.finish_root_rollback(context, result)
    }

    fn finish_root_rollback(
        &self,
        context: &Arc<TransactionContext>,
        result: Result<(), UnitOfWorkError>,
    ) -> TransactionResult<()> {
        self.tracker.reject_changes();
        context.finish(TransactionStatus::RolledBack);
        self.pop(context);

        match result {
            Ok(()) => {
                info!(transaction_id = %context.transaction_id, "transaction rolled back");
                Ok(())
            }
            Err(cause) => {
                error!(transaction_id = %context.transaction_id, error = %cause, "rollback failed");
                Err(TransactionError::RollbackFailure {
                    transaction_id: context.transaction_id,
                    cause,
                    commit_error: None,
                })
            }
        }
    }

    /// Run `f` in a transaction: commit on `Ok`, roll back on `Err`.
    pub fn scope<T, E, F>(self: &Arc<Self>, f: F) -> Result<T, E>
    where
        F: FnOnce(&Transaction) -> Result<T, E>,
        E: From<TransactionError>,
    {
        let tx = self.begin();
        match f(&tx) {
            Ok(value) => {
                tx.commit()?;
                Ok(value)
            }
            Err(e) => {
                if let Err(rollback_error) = tx.rollback() {
                    warn!(error = %rollback_error, "scope rollback failed");
                }
                Err(e)
            }
        }
    }

    /// Async [`TransactionManager::scope`]. The closure receives a handle
    /// that shares the transaction; the scope owns commit and rollback.
    pub async fn scope_async<T, E, F, Fut>(self: &Arc<Self>, f: F) -> Result<T, E>
    where
        F: FnOnce(Transaction) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: From<TransactionError>,
    {
        let tx = self.begin();
        match f(tx.share()).await {
            Ok(value) => {
                tx.commit_async().await?;
                Ok(value)
            }
            Err(e) => {
                if let Err(rollback_error) = tx.rollback_async().await {
                    warn!(error = %rollback_error, "scope rollback failed");
                }
                Err(e)
            }
        }
    }
}

fn affected(change: &EntityTracker) -> AffectedEntity {
    AffectedEntity {
        entity_id: change.entity_id,
        entity_type: change.entity_type.clone(),
    }
}

fn chain_rollback_failure(rollback_error: TransactionError, commit_error: TransactionError) -> TransactionError {
    match rollback_error {
        TransactionError::RollbackFailure {
            transaction_id,
            cause,
            ..
        } => TransactionError::RollbackFailure {
            transaction_id,
            cause,
            commit_error: Some(Box::new(commit_error)),
        },
        other => other,
    }
}

fn expire(manager: Weak<TransactionManager>, context: Weak<TransactionContext>) {
    let (Some(manager), Some(context)) = (manager.upgrade(), context.upgrade()) else {
        return;
    };
    match context.status() {
        TransactionStatus::Active => {}
        TransactionStatus::Committing => {
            debug!(transaction_id = %context.transaction_id, "timeout reached during commit, letting it finish");
            return;
        }
        _ => return,
    }
    warn!(transaction_id = %context.transaction_id, "transaction timed out, rolling back");
    match manager.rollback(&context) {
        Ok(()) => {}
        Err(TransactionError::InactiveTransaction(_)) => {
            debug!(transaction_id = %context.transaction_id, "transaction finished before timeout rollback");
        }
        Err(e) => {
            error!(transaction_id = %context.transaction_id, error = %e, "timeout rollback failed");
        }
    }
}

/// Handle to an open transaction.
///
/// Dropping the owning handle of a still-active transaction rolls it back.
pub struct Transaction {
    manager: Arc<TransactionManager>,
    context: Arc<TransactionContext>,
    owner: bool,
}

impl std::fmt::Debug for Transaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction")
            .field("id", &self.context.transaction_id)
            .field("nested_level", &self.context.nested_level)
            .field("status", &self.context.status())
            .finish()
    }
}

impl Transaction {
    /// A non-owning handle to the same transaction.
    pub fn share(&self) -> Transaction {
        Transaction {
            manager: Arc::clone(&self.manager),
            context: Arc::clone(&self.context),
            owner: false,
        }
    }

    /// Transaction id.
    pub fn id(&self) -> Uuid {
        self.context.transaction_id
    }

    /// Nesting depth; 0 for a root transaction.
    pub fn nested_level(&self) -> usize {
        self.context.nested_level
    }

    /// Current status.
    pub fn status(&self) -> TransactionStatus {
        self.context.status()
    }

    pub fn is_active(&self) -> bool {
        self.context.is_active()
    }

    /// Underlying context.
    pub fn context(&self) -> &Arc<TransactionContext> {
        &self.context
    }

    /// Logged operations.
    pub fn operations(&self) -> Vec<TransactionOp> {
        self.context.operations()
    }

    /// Savepoints taken so far.
    pub fn savepoints(&self) -> Vec<Savepoint> {
        self.context.savepoints()
    }

    fn before_change(&self, id: ElementId) -> TransactionResult<()> {
        self.context.ensure_active()?;
        self.manager.touch(&self.context, id);
        Ok(())
    }

    /// Write a field. Returns `false` for a same-value write.
    pub fn set_property(
        &self,
        id: ElementId,
        field: &str,
        value: impl Into<Value>,
    ) -> TransactionResult<bool> {
        self.before_change(id)?;
        let tracker = self.manager.tracker();
        let old_value = tracker
            .entity(id)
            .map(|e| e.get_or_null(field))
            .ok_or(crate::tracking::ChangeTrackingError::NotTracked(id))?;
        let new_value = value.into();
        let changed = tracker.set_property(id, field, new_value.clone())?;
        if changed {
            self.context.push_operation(TransactionOp::SetProperty {
                entity_id: id,
                field: field.to_string(),
                old_value,
                new_value,
            });
        }
        Ok(changed)
    }

    /// Attach an existing entity.
    pub fn attach(&self, element: &Element) -> TransactionResult<()> {
        self.before_change(element.id)?;
        self.manager.tracker().attach(element)?;
        self.context.push_operation(TransactionOp::Attach {
            entity_id: element.id,
        });
        Ok(())
    }

    /// Add a new entity.
    pub fn add(&self, element: &Element) -> TransactionResult<()> {
        self.before_change(element.id)?;
        self.manager.tracker().add(element)?;
        self.context.push_operation(TransactionOp::Add {
            entity_id: element.id,
        });
        Ok(())
    }

    /// Mark an entity for deletion.
    pub fn remove(&self, id: ElementId) -> TransactionResult<()> {
        self.before_change(id)?;
        self.manager.tracker().remove(id)?;
        self.context.push_operation(TransactionOp::Remove { entity_id: id });
        Ok(())
    }

    /// Stop tracking an entity.
    pub fn detach(&self, id: ElementId) -> TransactionResult<bool> {
        self.before_change(id)?;
        let detached = self.manager.tracker().detach(id).is_some();
        if detached {
            self.context.push_operation(TransactionOp::Detach { entity_id: id });
        }
        Ok(detached)
    }

    /// Record a relationship edit.
    pub fn track_relationship_change(
        &self,
        id: ElementId,
        relationship: &str,
        related_id: ElementId,
        kind: RelationshipChangeKind,
    ) -> TransactionResult<()> {
        self.before_change(id)?;
        self.manager
            .tracker()
            .track_relationship_change(id, relationship, related_id, kind)?;
        self.context.push_operation(TransactionOp::Relationship {
            entity_id: id,
            relationship: relationship.to_string(),
            related_id,
            kind,
        });
        Ok(())
    }

    /// Take a named savepoint at the current log position.
    pub fn savepoint(&self, name: &str) -> TransactionResult<()> {
        self.context.savepoint(name)
    }

    /// Truncate the savepoint list (keeping `name`) and the operation log
    /// back to the savepoint. Tracked field values are not reverted.
    pub fn rollback_to_savepoint(&self, name: &str) -> TransactionResult<()> {
        let dropped = self.context.rollback_to_savepoint(name)?;
        debug!(transaction_id = %self.id(), savepoint = name, dropped, "rolled back to savepoint");
        Ok(())
    }

    /// Commit. A root commit returns its summary; a nested one returns `None`.
    pub fn commit(&self) -> TransactionResult<Option<CommitSummary>> {
        self.manager.commit(&self.context)
    }

    /// Async [`Transaction::commit`], awaiting the unit of work.
    pub async fn commit_async(&self) -> TransactionResult<Option<CommitSummary>> {
        self.manager.commit_async(&self.context).await
    }

    /// Roll back, along with any nested transactions still open above this one.
    pub fn rollback(&self) -> TransactionResult<()> {
        self.manager.rollback(&self.context)
    }

    /// Async [`Transaction::rollback`].
    pub async fn rollback_async(&self) -> TransactionResult<()> {
        self.manager.rollback_async(&self.context).await
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if self.owner && self.context.is_active() {
            debug!(transaction_id = %self.context.transaction_id, "rolling back dropped transaction");
            if let Err(e) = self.manager.rollback(&self.context) {
                error!(transaction_id = %self.context.transaction_id, error = %e, "rollback on drop failed");
            }
        }
    }
}

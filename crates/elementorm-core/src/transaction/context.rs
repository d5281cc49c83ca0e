//! Transaction contexts: status, operation log, savepoints and the tracker
//! snapshots needed to undo a nested transaction.

use std::collections::{BTreeSet, HashSet};
use std::fmt;
use std::time::Instant;

use parking_lot::Mutex;
use uuid::Uuid;

use super::error::{TransactionError, TransactionResult};
use crate::model::{ElementId, Value};
use crate::tracking::{RelationshipChangeKind, TrackerSnapshot};

/// Transaction lifecycle.
///
/// `Committing` and `RollingBack` mark a transaction claimed by a commit or
/// a rollback that has not finished yet. A claimed transaction accepts no
/// further work and cannot be claimed again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransactionStatus {
    Inactive,
    Active,
    Committing,
    RollingBack,
    Committed,
    RolledBack,
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TransactionStatus::Inactive => "inactive",
            TransactionStatus::Active => "active",
            TransactionStatus::Committing => "committing",
            TransactionStatus::RollingBack => "rolling back",
            TransactionStatus::Committed => "committed",
            TransactionStatus::RolledBack => "rolled back",
        };
        f.write_str(s)
    }
}

/// A change made through a transaction.
#[derive(Debug, Clone, PartialEq)]
pub enum TransactionOp {
    /// Existing entity started being tracked.
    Attach { entity_id: ElementId },
    /// New entity added.
    Add { entity_id: ElementId },
    /// Entity marked for deletion.
    Remove { entity_id: ElementId },
    /// Entity stopped being tracked.
    Detach { entity_id: ElementId },
    /// Field written.
    SetProperty {
        entity_id: ElementId,
        field: String,
        old_value: Value,
        new_value: Value,
    },
    /// Relationship edited.
    Relationship {
        entity_id: ElementId,
        relationship: String,
        related_id: ElementId,
        kind: RelationshipChangeKind,
    },
}

impl TransactionOp {
    /// Entity the operation touched.
    pub fn entity_id(&self) -> ElementId {
        match self {
            TransactionOp::Attach { entity_id }
            | TransactionOp::Add { entity_id }
            | TransactionOp::Remove { entity_id }
            | TransactionOp::Detach { entity_id }
            | TransactionOp::SetProperty { entity_id, .. }
            | TransactionOp::Relationship { entity_id, .. } => *entity_id,
        }
    }
}

/// A named position in the operation log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Savepoint {
    pub name: String,
    /// Operation count when the savepoint was taken.
    pub position: usize,
}

#[derive(Debug)]
struct ContextState {
    status: TransactionStatus,
    operations: Vec<TransactionOp>,
    savepoints: Vec<Savepoint>,
    snapshots: Vec<TrackerSnapshot>,
    touched: HashSet<ElementId>,
}

/// State of one (possibly nested) transaction.
#[derive(Debug)]
pub struct TransactionContext {
    pub transaction_id: Uuid,
    pub start_time: Instant,
    pub nested_level: usize,
    state: Mutex<ContextState>,
}

impl TransactionContext {
    pub(crate) fn new(nested_level: usize) -> Self {
        Self {
            transaction_id: Uuid::new_v4(),
            start_time: Instant::now(),
            nested_level,
            state: Mutex::new(ContextState {
                status: TransactionStatus::Active,
                operations: Vec::new(),
                savepoints: Vec::new(),
                snapshots: Vec::new(),
                touched: HashSet::new(),
            }),
        }
    }

    /// Current status.
    pub fn status(&self) -> TransactionStatus {
        self.state.lock().status
    }

    pub fn is_active(&self) -> bool {
        self.status() == TransactionStatus::Active
    }

    pub fn is_committed(&self) -> bool {
        self.status() == TransactionStatus::Committed
    }

    pub fn is_rolled_back(&self) -> bool {
        self.status() == TransactionStatus::RolledBack
    }

    /// Check if this is a nested transaction.
    pub fn is_nested(&self) -> bool {
        self.nested_level > 0
    }

    /// Copy of the operation log.
    pub fn operations(&self) -> Vec<TransactionOp> {
        self.state.lock().operations.clone()
    }

    /// Copy of the savepoint list.
    pub fn savepoints(&self) -> Vec<Savepoint> {
        self.state.lock().savepoints.clone()
    }

    /// Ids of entities this transaction has touched, including those merged
    /// from committed nested transactions.
    pub fn touched_entities(&self) -> BTreeSet<ElementId> {
        self.state.lock().touched.iter().copied().collect()
    }

    pub(crate) fn ensure_active(&self) -> TransactionResult<()> {
        if self.is_active() {
            Ok(())
        } else {
            Err(TransactionError::InactiveTransaction(self.transaction_id))
        }
    }

    /// Move from `from` to `to` only if the status is still `from`.
    pub(crate) fn transition(
        &self,
        from: TransactionStatus,
        to: TransactionStatus,
    ) -> TransactionResult<()> {
        let mut state = self.state.lock();
        if state.status != from {
            return Err(TransactionError::InactiveTransaction(self.transaction_id));
        }
        state.status = to;
        Ok(())
    }

    pub(crate) fn has_touched(&self, id: ElementId) -> bool {
        self.state.lock().touched.contains(&id)
    }

    /// Keep the first snapshot taken for each entity.
    pub(crate) fn record_snapshot(&self, snapshot: TrackerSnapshot) {
        let mut state = self.state.lock();
        if state.touched.insert(snapshot.entity_id) {
            state.snapshots.push(snapshot);
        }
    }

    pub(crate) fn push_operation(&self, op: TransactionOp) {
        self.state.lock().operations.push(op);
    }

    pub(crate) fn savepoint(&self, name: &str) -> TransactionResult<()> {
        let mut state = self.state.lock();
        if state.status != TransactionStatus::Active {
            return Err(TransactionError::InactiveTransaction(self.transaction_id));
        }
        let position = state.operations.len();
        state.savepoints.push(Savepoint {
            name: name.to_string(),
            position,
        });
        Ok(())
    }

    /// Truncate bookkeeping back to the latest savepoint named `name`.
    ///
    /// The savepoint itself survives. Tracker state is left as is.
    pub(crate) fn rollback_to_savepoint(&self, name: &str) -> TransactionResult<usize> {
        let mut state = self.state.lock();
        if state.status != TransactionStatus::Active {
            return Err(TransactionError::InactiveTransaction(self.transaction_id));
        }
        let index = state
            .savepoints
            .iter()
            .rposition(|s| s.name == name)
            .ok_or_else(|| TransactionError::SavepointNotFound {
                transaction_id: self.transaction_id,
                name: name.to_string(),
            })?;
        let position = state.savepoints[index].position;
        state.savepoints.truncate(index + 1);
        let dropped = state.operations.len().saturating_sub(position);
        state.operations.truncate(position);
        Ok(dropped)
    }

    /// Mark terminal and hand back what a parent or a rollback needs.
    /// Callers claim the context with [`TransactionContext::transition`]
    /// first.
    pub(crate) fn finish(
        &self,
        status: TransactionStatus,
    ) -> (Vec<TransactionOp>, Vec<TrackerSnapshot>) {
        let mut state = self.state.lock();
        state.status = status;
        state.savepoints.clear();
        (
            std::mem::take(&mut state.operations),
            std::mem::take(&mut state.snapshots),
        )
    }

    /// Fold a committed child into this context. Snapshots are only kept for
    /// entities this context had not touched yet.
    pub(crate) fn merge_child(&self, operations: Vec<TransactionOp>, snapshots: Vec<TrackerSnapshot>) {
        let mut state = self.state.lock();
        state.operations.extend(operations);
        for snapshot in snapshots {
            if state.touched.insert(snapshot.entity_id) {
                state.snapshots.push(snapshot);
            }
        }
    }
}

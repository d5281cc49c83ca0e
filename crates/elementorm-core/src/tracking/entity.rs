//! Per-entity dirty checking.

use std::collections::BTreeMap;
use std::fmt;

use crate::model::{Element, ElementId, Value};

/// Lifecycle state of a tracked entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityState {
    /// Matches its snapshot.
    Unchanged,
    /// New; will be inserted on commit.
    Added,
    /// Has property or relationship changes.
    Modified,
    /// Will be removed on commit.
    Deleted,
    /// Not tracked.
    Detached,
}

impl fmt::Display for EntityState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EntityState::Unchanged => "unchanged",
            EntityState::Added => "added",
            EntityState::Modified => "modified",
            EntityState::Deleted => "deleted",
            EntityState::Detached => "detached",
        };
        f.write_str(s)
    }
}

/// A pending change to one field.
#[derive(Debug, Clone, PartialEq)]
pub struct PropertyChange {
    pub field: String,
    /// Value in the snapshot.
    pub old_value: Value,
    /// Value now.
    pub new_value: Value,
}

/// Direction of a relationship change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RelationshipChangeKind {
    Added,
    Removed,
}

/// A pending change to a relationship.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelationshipChange {
    pub relationship: String,
    pub related_id: ElementId,
    pub kind: RelationshipChangeKind,
}

/// Snapshot and deltas for one entity.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityTracker {
    pub entity_id: ElementId,
    pub entity_type: String,
    pub state: EntityState,
    pub original_values: BTreeMap<String, Value>,
    pub current_values: BTreeMap<String, Value>,
    pub property_changes: BTreeMap<String, PropertyChange>,
    pub relationship_changes: Vec<RelationshipChange>,
    /// Incremented by every accept.
    pub version: u64,
}

impl EntityTracker {
    /// Start tracking `element` in `state`, snapshotting its fields.
    pub fn new(element: &Element, state: EntityState) -> Self {
        Self {
            entity_id: element.id,
            entity_type: element.element_type.clone(),
            state,
            original_values: element.fields.clone(),
            current_values: element.fields.clone(),
            property_changes: BTreeMap::new(),
            relationship_changes: Vec::new(),
            version: 0,
        }
    }

    /// Whether there is anything to save.
    pub fn is_dirty(&self) -> bool {
        self.state != EntityState::Unchanged
            || !self.property_changes.is_empty()
            || !self.relationship_changes.is_empty()
    }

    /// Write a field. Returns `false` when the value is unchanged.
    pub fn set_property(&mut self, field: &str, value: Value) -> bool {
        let current = self.current_values.get(field).cloned().unwrap_or(Value::Null);
        self.record(field, current, value)
    }

    /// Record a change observed elsewhere. Returns `false` when `old == new`.
    ///
    /// If the field has no snapshot yet, `old` becomes its snapshot.
    pub fn track_property_change(&mut self, field: &str, old: Value, new: Value) -> bool {
        if old == new {
            return false;
        }
        if !self.original_values.contains_key(field) && !old.is_null() {
            self.original_values.insert(field.to_string(), old.clone());
        }
        self.record(field, old, new)
    }

    fn record(&mut self, field: &str, old: Value, new: Value) -> bool {
        if old == new {
            return false;
        }
        let original = self
            .original_values
            .get(field)
            .cloned()
            .unwrap_or(Value::Null);

        if new.is_null() && !self.original_values.contains_key(field) {
            self.current_values.remove(field);
        } else {
            self.current_values.insert(field.to_string(), new.clone());
        }

        if original == new {
            // Written back to its snapshot value.
            self.property_changes.remove(field);
        } else {
            self.property_changes.insert(
                field.to_string(),
                PropertyChange {
                    field: field.to_string(),
                    old_value: original,
                    new_value: new,
                },
            );
        }
        self.refresh_modified();
        true
    }

    /// Record a relationship addition or removal.
    pub fn track_relationship_change(
        &mut self,
        relationship: &str,
        related_id: ElementId,
        kind: RelationshipChangeKind,
    ) {
        self.relationship_changes.push(RelationshipChange {
            relationship: relationship.to_string(),
            related_id,
            kind,
        });
        self.refresh_modified();
    }

    fn refresh_modified(&mut self) {
        let has_deltas =
            !self.property_changes.is_empty() || !self.relationship_changes.is_empty();
        match self.state {
            EntityState::Unchanged if has_deltas => self.state = EntityState::Modified,
            EntityState::Modified if !has_deltas => self.state = EntityState::Unchanged,
            _ => {}
        }
    }

    /// Mark as new.
    pub fn mark_as_added(&mut self) {
        self.state = EntityState::Added;
    }

    /// Mark for deletion.
    pub fn mark_as_deleted(&mut self) {
        self.state = EntityState::Deleted;
    }

    /// Fold current values into the snapshot.
    pub fn accept_changes(&mut self) {
        self.original_values = self.current_values.clone();
        self.property_changes.clear();
        self.relationship_changes.clear();
        self.state = EntityState::Unchanged;
        self.version += 1;
    }

    /// Restore current values from the snapshot.
    ///
    /// Modified and Deleted entities return to Unchanged; an Added entity
    /// has no stored counterpart and stays Added.
    pub fn reject_changes(&mut self) {
        self.current_values = self.original_values.clone();
        self.property_changes.clear();
        self.relationship_changes.clear();
        if self.state != EntityState::Added {
            self.state = EntityState::Unchanged;
        }
    }

    /// Names of fields with pending changes.
    pub fn changed_fields(&self) -> impl Iterator<Item = &str> {
        self.property_changes.keys().map(String::as_str)
    }

    /// The entity as it is now.
    pub fn current_element(&self) -> Element {
        Element {
            id: self.entity_id,
            element_type: self.entity_type.clone(),
            fields: self.current_values.clone(),
        }
    }

    /// The entity as it was when last accepted.
    pub fn original_element(&self) -> Element {
        Element {
            id: self.entity_id,
            element_type: self.entity_type.clone(),
            fields: self.original_values.clone(),
        }
    }
}

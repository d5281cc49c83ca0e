//! The change tracker: every attached entity and its pending changes.
//!
//! All state sits behind one mutex. Counts such as [`ChangeTracker::change_count`]
//! are computed by scanning the entries on each call. Attachment order is kept
//! as a sorted map from a per-attach slot number to the entity, so detaching
//! one entity does not shift the others. Listeners are notified after the lock
//! is released, so a listener may call back into the tracker.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, trace};

use super::entity::{EntityState, EntityTracker, RelationshipChangeKind};
use super::error::{ChangeTrackingError, TrackingResult};
use crate::model::{Element, ElementId, Value};

/// Notification published for every tracker mutation.
#[derive(Debug, Clone, PartialEq)]
pub enum ChangeEvent {
    Attached {
        entity_id: ElementId,
        entity_type: String,
        state: EntityState,
    },
    Detached {
        entity_id: ElementId,
        entity_type: String,
    },
    PropertyChanged {
        entity_id: ElementId,
        entity_type: String,
        field: String,
    },
    RelationshipChanged {
        entity_id: ElementId,
        entity_type: String,
        relationship: String,
    },
    StateChanged {
        entity_id: ElementId,
        entity_type: String,
        state: EntityState,
    },
    Accepted {
        entity_id: ElementId,
        entity_type: String,
    },
    Rejected {
        entity_id: ElementId,
        entity_type: String,
    },
    Cleared,
}

impl ChangeEvent {
    /// Entity the event refers to, if any.
    pub fn entity(&self) -> Option<(ElementId, &str)> {
        match self {
            ChangeEvent::Attached {
                entity_id,
                entity_type,
                ..
            }
            | ChangeEvent::Detached {
                entity_id,
                entity_type,
            }
            | ChangeEvent::PropertyChanged {
                entity_id,
                entity_type,
                ..
            }
            | ChangeEvent::RelationshipChanged {
                entity_id,
                entity_type,
                ..
            }
            | ChangeEvent::StateChanged {
                entity_id,
                entity_type,
                ..
            }
            | ChangeEvent::Accepted {
                entity_id,
                entity_type,
            }
            | ChangeEvent::Rejected {
                entity_id,
                entity_type,
            } => Some((*entity_id, entity_type.as_str())),
            ChangeEvent::Cleared => None,
        }
    }
}

/// Listener for tracker events.
pub type ChangeListener = Arc<dyn Fn(&ChangeEvent) + Send + Sync>;

/// Saved tracker entry, used to undo a nested transaction.
#[derive(Debug, Clone)]
pub struct TrackerSnapshot {
    pub(crate) entity_id: ElementId,
    pub(crate) tracker: Option<EntityTracker>,
    /// Attachment slot held when the snapshot was taken.
    pub(crate) slot: Option<u64>,
}

#[derive(Default)]
struct TrackerState {
    entries: HashMap<ElementId, EntityTracker>,
    slots: HashMap<ElementId, u64>,
    order: BTreeMap<u64, ElementId>,
    next_slot: u64,
}

impl TrackerState {
    fn insert(&mut self, tracker: EntityTracker) {
        self.insert_at(tracker, None);
    }

    /// Insert, reusing `slot` for a newly attached entity when it is free.
    fn insert_at(&mut self, tracker: EntityTracker, slot: Option<u64>) {
        let id = tracker.entity_id;
        if self.entries.insert(id, tracker).is_some() {
            return;
        }
        let slot = match slot {
            Some(slot) if !self.order.contains_key(&slot) => slot,
            _ => {
                let slot = self.next_slot;
                self.next_slot += 1;
                slot
            }
        };
        self.slots.insert(id, slot);
        self.order.insert(slot, id);
    }

    fn remove(&mut self, id: ElementId) -> Option<EntityTracker> {
        let removed = self.entries.remove(&id)?;
        if let Some(slot) = self.slots.remove(&id) {
            self.order.remove(&slot);
        }
        Some(removed)
    }

    fn ordered_ids(&self) -> Vec<ElementId> {
        self.order.values().copied().collect()
    }

    fn get_mut(&mut self, id: ElementId) -> TrackingResult<&mut EntityTracker> {
        self.entries
            .get_mut(&id)
            .ok_or(ChangeTrackingError::NotTracked(id))
    }
}

/// Tracks attached entities and their changes.
#[derive(Default)]
pub struct ChangeTracker {
    state: Mutex<TrackerState>,
    listeners: RwLock<Vec<ChangeListener>>,
}

impl ChangeTracker {
    /// Create an empty tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener for change events.
    pub fn subscribe<F>(&self, listener: F)
    where
        F: Fn(&ChangeEvent) + Send + Sync + 'static,
    {
        self.listeners.write().push(Arc::new(listener));
    }

    fn publish(&self, events: Vec<ChangeEvent>) {
        if events.is_empty() {
            return;
        }
        let listeners = self.listeners.read().clone();
        for event in &events {
            trace!(?event, "change event");
            for listener in &listeners {
                listener(event);
            }
        }
    }

    fn attach_as(&self, element: &Element, state: EntityState) -> TrackingResult<()> {
        {
            let mut inner = self.state.lock();
            if inner.entries.contains_key(&element.id) {
                return Err(ChangeTrackingError::AttachFailure {
                    entity_id: element.id,
                    reason: "an entity with this id is already tracked".to_string(),
                });
            }
            inner.insert(EntityTracker::new(element, state));
        }
        debug!(entity_id = %element.id, entity_type = %element.element_type, %state, "entity attached");
        self.publish(vec![ChangeEvent::Attached {
            entity_id: element.id,
            entity_type: element.element_type.clone(),
            state,
        }]);
        Ok(())
    }

    /// Start tracking an existing entity.
    pub fn attach(&self, element: &Element) -> TrackingResult<()> {
        self.attach_as(element, EntityState::Unchanged)
    }

    /// Start tracking a new entity.
    pub fn add(&self, element: &Element) -> TrackingResult<()> {
        self.attach_as(element, EntityState::Added)
    }

    /// Stop tracking an entity, returning its tracker.
    pub fn detach(&self, id: ElementId) -> Option<EntityTracker> {
        let removed = self.state.lock().remove(id);
        if let Some(tracker) = &removed {
            self.publish(vec![ChangeEvent::Detached {
                entity_id: id,
                entity_type: tracker.entity_type.clone(),
            }]);
        }
        removed
    }

    /// Mark an entity for deletion.
    pub fn remove(&self, id: ElementId) -> TrackingResult<()> {
        self.mark_as_deleted(id)
    }

    fn mutate<T>(
        &self,
        id: ElementId,
        f: impl FnOnce(&mut EntityTracker) -> (T, Option<ChangeEvent>),
    ) -> TrackingResult<T> {
        let (result, event) = {
            let mut inner = self.state.lock();
            let tracker = inner.get_mut(id)?;
            f(tracker)
        };
        self.publish(event.into_iter().collect());
        Ok(result)
    }

    /// Write a field of a tracked entity. Returns `false` for a same-value
    /// write.
    pub fn set_property(
        &self,
        id: ElementId,
        field: &str,
        value: impl Into<Value>,
    ) -> TrackingResult<bool> {
        let value = value.into();
        self.mutate(id, |t| {
            let changed = t.set_property(field, value);
            let event = changed.then(|| ChangeEvent::PropertyChanged {
                entity_id: id,
                entity_type: t.entity_type.clone(),
                field: field.to_string(),
            });
            (changed, event)
        })
    }

    /// Record a field change made outside the tracker.
    pub fn track_property_change(
        &self,
        id: ElementId,
        field: &str,
        old: Value,
        new: Value,
    ) -> TrackingResult<bool> {
        self.mutate(id, |t| {
            let changed = t.track_property_change(field, old, new);
            let event = changed.then(|| ChangeEvent::PropertyChanged {
                entity_id: id,
                entity_type: t.entity_type.clone(),
                field: field.to_string(),
            });
            (changed, event)
        })
    }

    /// Record a relationship addition or removal.
    pub fn track_relationship_change(
        &self,
        id: ElementId,
        relationship: &str,
        related_id: ElementId,
        kind: RelationshipChangeKind,
    ) -> TrackingResult<()> {
        self.mutate(id, |t| {
            t.track_relationship_change(relationship, related_id, kind);
            let event = ChangeEvent::RelationshipChanged {
                entity_id: id,
                entity_type: t.entity_type.clone(),
                relationship: relationship.to_string(),
            };
            ((), Some(event))
        })
    }

    fn set_state(&self, id: ElementId, state: EntityState) -> TrackingResult<()> {
        self.mutate(id, |t| {
            match state {
                EntityState::Added => t.mark_as_added(),
                _ => t.mark_as_deleted(),
            }
            let event = ChangeEvent::StateChanged {
                entity_id: id,
                entity_type: t.entity_type.clone(),
                state,
            };
            ((), Some(event))
        })
    }

    /// Mark a tracked entity as new.
    pub fn mark_as_added(&self, id: ElementId) -> TrackingResult<()> {
        self.set_state(id, EntityState::Added)
    }

    /// Mark a tracked entity for deletion.
    pub fn mark_as_deleted(&self, id: ElementId) -> TrackingResult<()> {
        self.set_state(id, EntityState::Deleted)
    }

    /// Accept every pending change.
    ///
    /// Deleted entities are detached; everything else becomes Unchanged.
    /// Returns the number of entities that had changes.
    pub fn accept_changes(&self) -> usize {
        let mut events = Vec::new();
        {
            let mut inner = self.state.lock();
            let ids = inner.ordered_ids();
            for id in ids {
                let Some(tracker) = inner.entries.get_mut(&id) else {
                    continue;
                };
                if !tracker.is_dirty() {
                    continue;
                }
                let entity_type = tracker.entity_type.clone();
                if tracker.state == EntityState::Deleted {
                    inner.remove(id);
                    events.push(ChangeEvent::Detached {
                        entity_id: id,
                        entity_type,
                    });
                } else {
                    tracker.accept_changes();
                    events.push(ChangeEvent::Accepted {
                        entity_id: id,
                        entity_type,
                    });
                }
            }
        }
        let count = events.len();
        debug!(count, "accepted changes");
        self.publish(events);
        count
    }

    /// Reject every pending change.
    ///
    /// Added entities are detached; everything else is restored from its
    /// snapshot. Returns the number of entities that had changes.
    pub fn reject_changes(&self) -> usize {
        let mut events = Vec::new();
        {
            let mut inner = self.state.lock();
            let ids = inner.ordered_ids();
            for id in ids {
                let Some(tracker) = inner.entries.get_mut(&id) else {
                    continue;
                };
                if !tracker.is_dirty() {
                    continue;
                }
                let entity_type = tracker.entity_type.clone();
                if tracker.state == EntityState::Added {
                    inner.remove(id);
                    events.push(ChangeEvent::Detached {
                        entity_id: id,
                        entity_type,
                    });
                } else {
                    tracker.reject_changes();
                    events.push(ChangeEvent::Rejected {
                        entity_id: id,
                        entity_type,
                    });
                }
            }
        }
        let count = events.len();
        debug!(count, "rejected changes");
        self.publish(events);
        count
    }

    /// Accept the changes of one entity. It stays attached.
    pub fn accept_entity_changes(&self, id: ElementId) -> TrackingResult<()> {
        self.mutate(id, |t| {
            t.accept_changes();
            let event = ChangeEvent::Accepted {
                entity_id: id,
                entity_type: t.entity_type.clone(),
            };
            ((), Some(event))
        })
    }

    /// Reject the changes of one entity. It stays attached.
    pub fn reject_entity_changes(&self, id: ElementId) -> TrackingResult<()> {
        self.mutate(id, |t| {
            t.reject_changes();
            let event = ChangeEvent::Rejected {
                entity_id: id,
                entity_type: t.entity_type.clone(),
            };
            ((), Some(event))
        })
    }

    /// Current values of a tracked entity.
    pub fn entity(&self, id: ElementId) -> Option<Element> {
        self.state
            .lock()
            .entries
            .get(&id)
            .map(EntityTracker::current_element)
    }

    /// Copy of the tracker for an entity.
    pub fn entry(&self, id: ElementId) -> Option<EntityTracker> {
        self.state.lock().entries.get(&id).cloned()
    }

    /// State of an entity; `Detached` if it is not tracked.
    pub fn state(&self, id: ElementId) -> EntityState {
        self.state
            .lock()
            .entries
            .get(&id)
            .map_or(EntityState::Detached, |t| t.state)
    }

    /// Check if an entity is tracked.
    pub fn is_tracked(&self, id: ElementId) -> bool {
        self.state.lock().entries.contains_key(&id)
    }

    /// Check if a tracked entity has pending changes.
    pub fn is_dirty(&self, id: ElementId) -> bool {
        self.state
            .lock()
            .entries
            .get(&id)
            .is_some_and(EntityTracker::is_dirty)
    }

    /// Check if any entity has pending changes.
    pub fn has_changes(&self) -> bool {
        self.state.lock().entries.values().any(EntityTracker::is_dirty)
    }

    /// Number of entities with pending changes.
    pub fn change_count(&self) -> usize {
        self.state
            .lock()
            .entries
            .values()
            .filter(|t| t.is_dirty())
            .count()
    }

    /// Dirty entities in attachment order.
    pub fn get_all_changes(&self) -> Vec<EntityTracker> {
        let inner = self.state.lock();
        inner
            .order
            .values()
            .filter_map(|id| inner.entries.get(id))
            .filter(|t| t.is_dirty())
            .cloned()
            .collect()
    }

    /// Ids of every tracked entity in attachment order.
    pub fn tracked_ids(&self) -> Vec<ElementId> {
        self.state.lock().ordered_ids()
    }

    /// Number of tracked entities.
    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    /// Check if nothing is tracked.
    pub fn is_empty(&self) -> bool {
        self.state.lock().entries.is_empty()
    }

    /// Stop tracking everything.
    pub fn clear(&self) {
        {
            let mut inner = self.state.lock();
            inner.entries.clear();
            inner.slots.clear();
            inner.order.clear();
        }
        self.publish(vec![ChangeEvent::Cleared]);
    }

    /// Save the entry for `id` (or its absence).
    pub(crate) fn snapshot(&self, id: ElementId) -> TrackerSnapshot {
        let inner = self.state.lock();
        TrackerSnapshot {
            entity_id: id,
            tracker: inner.entries.get(&id).cloned(),
            slot: inner.slots.get(&id).copied(),
        }
    }

    /// Put an entry back exactly as saved.
    pub(crate) fn restore(&self, snapshot: TrackerSnapshot) {
        let id = snapshot.entity_id;
        let event = {
            let mut inner = self.state.lock();
            match snapshot.tracker {
                Some(tracker) => {
                    let entity_type = tracker.entity_type.clone();
                    let state = tracker.state;
                    inner.insert_at(tracker, snapshot.slot);
                    ChangeEvent::StateChanged {
                        entity_id: id,
                        entity_type,
                        state,
                    }
                }
                None => match inner.remove(id) {
                    Some(removed) => ChangeEvent::Detached {
                        entity_id: id,
                        entity_type: removed.entity_type,
                    },
                    None => return,
                },
            }
        };
        self.publish(vec![event]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn entity(id: i64, name: &str) -> Element {
        Element::new(id, "Wall").with_field("name", name)
    }

    #[test]
    fn test_attach_modify_accept() {
        let tracker = ChangeTracker::new();
        tracker.attach(&entity(1, "A")).unwrap();
        assert_eq!(tracker.change_count(), 0);

        tracker.set_property(ElementId(1), "name", "B").unwrap();
        assert_eq!(tracker.change_count(), 1);
        assert_eq!(tracker.state(ElementId(1)), EntityState::Modified);

        assert_eq!(tracker.accept_changes(), 1);
        assert_eq!(tracker.change_count(), 0);
        assert_eq!(
            tracker.entity(ElementId(1)).unwrap().get("name"),
            Some(&Value::from("B"))
        );
    }

    #[test]
    fn test_same_value_write_keeps_count() {
        let tracker = ChangeTracker::new();
        tracker.attach(&entity(1, "A")).unwrap();
        assert!(!tracker.set_property(ElementId(1), "name", "A").unwrap());
        assert!(!tracker.is_dirty(ElementId(1)));
        assert_eq!(tracker.change_count(), 0);
    }

    #[test]
    fn test_reject_restores_value() {
        let tracker = ChangeTracker::new();
        tracker.attach(&entity(1, "A")).unwrap();
        tracker.set_property(ElementId(1), "name", "B").unwrap();
        tracker.reject_changes();

        assert_eq!(
            tracker.entity(ElementId(1)).unwrap().get("name"),
            Some(&Value::from("A"))
        );
        assert!(!tracker.has_changes());
    }

    #[test]
    fn test_duplicate_attach_fails() {
        let tracker = ChangeTracker::new();
        tracker.attach(&entity(1, "A")).unwrap();
        assert!(matches!(
            tracker.attach(&entity(1, "B")),
            Err(ChangeTrackingError::AttachFailure { .. })
        ));
        assert!(matches!(
            tracker.set_property(ElementId(2), "name", "x"),
            Err(ChangeTrackingError::NotTracked(_))
        ));
    }

    #[test]
    fn test_global_accept_detaches_deleted_and_reject_detaches_added() {
        let tracker = ChangeTracker::new();
        tracker.attach(&entity(1, "A")).unwrap();
        tracker.add(&entity(2, "B")).unwrap();
        tracker.remove(ElementId(1)).unwrap();

        let rejected = ChangeTracker::new();
        rejected.attach(&entity(1, "A")).unwrap();
        rejected.add(&entity(2, "B")).unwrap();
        rejected.remove(ElementId(1)).unwrap();

        tracker.accept_changes();
        assert!(!tracker.is_tracked(ElementId(1)));
        assert_eq!(tracker.state(ElementId(2)), EntityState::Unchanged);

        rejected.reject_changes();
        assert_eq!(rejected.state(ElementId(1)), EntityState::Unchanged);
        assert_eq!(rejected.state(ElementId(2)), EntityState::Detached);
    }

    #[test]
    fn test_changes_in_attachment_order() {
        let tracker = ChangeTracker::new();
        for id in [3, 1, 2] {
            tracker.attach(&entity(id, "A")).unwrap();
        }
        for id in [2, 1, 3] {
            tracker.set_property(ElementId(id), "name", "Z").unwrap();
        }
        let ids: Vec<i64> = tracker
            .get_all_changes()
            .iter()
            .map(|t| t.entity_id.value())
            .collect();
        assert_eq!(ids, vec![3, 1, 2]);
    }

    #[test]
    fn test_events_are_published() {
        let tracker = ChangeTracker::new();
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&seen);
        tracker.subscribe(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        tracker.attach(&entity(1, "A")).unwrap();
        tracker.set_property(ElementId(1), "name", "A").unwrap();
        tracker.set_property(ElementId(1), "name", "B").unwrap();
        tracker.detach(ElementId(1));
        assert_eq!(seen.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_snapshot_restore_keeps_position() {
        let tracker = ChangeTracker::new();
        for id in [1, 2, 3] {
            tracker.attach(&entity(id, "A")).unwrap();
        }
        let saved = tracker.snapshot(ElementId(2));
        let absent = tracker.snapshot(ElementId(4));
        tracker.detach(ElementId(2));
        tracker.add(&entity(4, "D")).unwrap();

        tracker.restore(saved);
        tracker.restore(absent);
        assert_eq!(
            tracker.tracked_ids(),
            vec![ElementId(1), ElementId(2), ElementId(3)]
        );
    }

    #[test]
    fn test_mass_accept_and_reject_keep_order() {
        let tracker = ChangeTracker::new();
        for id in 0..2_000 {
            tracker.attach(&entity(id, "A")).unwrap();
        }
        for id in (0..2_000).step_by(2) {
            tracker.remove(ElementId(id)).unwrap();
        }
        for id in 2_000..3_000 {
            tracker.add(&entity(id, "N")).unwrap();
        }

        assert_eq!(tracker.accept_changes(), 2_000);
        assert_eq!(tracker.len(), 2_000);
        let ids = tracker.tracked_ids();
        assert_eq!(ids[0], ElementId(1));
        assert_eq!(ids[999], ElementId(1_999));
        assert_eq!(ids[1_000], ElementId(2_000));

        for id in 3_000..4_000 {
            tracker.add(&entity(id, "N")).unwrap();
        }
        assert_eq!(tracker.reject_changes(), 1_000);
        assert_eq!(tracker.len(), 2_000);
        assert_eq!(tracker.tracked_ids().last(), Some(&ElementId(2_999)));
    }

    #[test]
    fn test_concurrent_changes() {
        let tracker = Arc::new(ChangeTracker::new());
        for id in 0..8 {
            tracker.attach(&entity(id, "A")).unwrap();
        }
        let handles: Vec<_> = (0..8)
            .map(|id| {
                let tracker = Arc::clone(&tracker);
                std::thread::spawn(move || {
                    for i in 0..50 {
                        tracker
                            .set_property(ElementId(id), "name", format!("v{}", i))
                            .unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(tracker.change_count(), 8);
        tracker.accept_changes();
        assert!(!tracker.has_changes());
    }
}

//! Dirty checking and change events.

mod entity;
mod error;
mod tracker;

pub use entity::{
    EntityState, EntityTracker, PropertyChange, RelationshipChange, RelationshipChangeKind,
};
pub use error::{ChangeTrackingError, TrackingResult};
pub use tracker::{ChangeEvent, ChangeListener, ChangeTracker, TrackerSnapshot};

//! Change tracking errors.

use thiserror::Error;

use crate::model::ElementId;

/// Errors raised by the change tracker.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChangeTrackingError {
    /// The entity could not be attached.
    #[error("cannot attach entity {entity_id}: {reason}")]
    AttachFailure { entity_id: ElementId, reason: String },

    /// The entity is not tracked.
    #[error("entity {0} is not tracked")]
    NotTracked(ElementId),
}

/// Result type for change tracking.
pub type TrackingResult<T> = std::result::Result<T, ChangeTrackingError>;

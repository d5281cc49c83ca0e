//! Relationship errors.

use thiserror::Error;

use super::definition::RelationshipKind;
use crate::model::ElementId;
use crate::provider::ProviderError;
use crate::tracking::ChangeTrackingError;

/// Errors raised while resolving or editing relationships.
#[derive(Debug, Clone, Error)]
pub enum RelationshipError {
    /// No relationship with this name is registered for the owner type.
    #[error("unknown relationship '{name}' on {owner_type}")]
    UnknownRelationship { owner_type: String, name: String },

    /// The operation is not supported for this kind of relationship.
    #[error("relationship '{name}' is {kind}; {operation} is not supported")]
    UnsupportedKind {
        name: String,
        kind: RelationshipKind,
        operation: &'static str,
    },

    /// The owner's link field does not hold an id or id list.
    #[error("field '{field}' of {entity_id} does not hold a related id")]
    InvalidLink { entity_id: ElementId, field: String },

    /// The loader failed.
    #[error("failed to load relationship '{name}': {source}")]
    Load {
        name: String,
        #[source]
        source: ProviderError,
    },

    /// A tracker update failed.
    #[error(transparent)]
    Tracking(#[from] ChangeTrackingError),
}

/// Result type for relationship operations.
pub type RelationshipResult<T> = std::result::Result<T, RelationshipError>;

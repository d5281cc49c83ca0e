//! Relationships between element types.
//!
//! Definitions are registered per owner type. The [`RelationshipManager`]
//! resolves them through a [`RelationshipLoader`] and caches the results in
//! the query result cache.

mod definition;
mod error;
mod loader;
mod manager;

pub use definition::{RelationshipDefinition, RelationshipKind};
pub use error::{RelationshipError, RelationshipResult};
pub use loader::{ProviderRelationshipLoader, RelationshipLoader};
pub use manager::RelationshipManager;

//! Composite cache keys and dependency tags.

use std::fmt;

use crate::model::ElementId;

/// Dependency tag shared by every query over all element types.
pub const ALL_TYPES_DEPENDENCY: &str = "type:*";

/// Composite key identifying a cached payload.
///
/// Equality is structural. The `Display` form is the pipe-joined canonical
/// representation used as the store's lookup key, e.g.
/// `Wall|id=12|rel=hosted_doors` or `Wall|query=3f9a...`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    /// Element type the payload belongs to.
    pub entity_type: String,
    /// Element id, for per-entity payloads.
    pub entity_id: Option<ElementId>,
    /// Content hash of a query plan, for query results.
    pub query_hash: Option<String>,
    /// Relationship path, for resolved relationships.
    pub relationship_path: Option<String>,
}

impl CacheKey {
    /// Create a key for an element type.
    pub fn new(entity_type: impl Into<String>) -> Self {
        Self {
            entity_type: entity_type.into(),
            entity_id: None,
            query_hash: None,
            relationship_path: None,
        }
    }

    /// Key for a query result.
    pub fn for_query(entity_type: impl Into<String>, query_hash: impl Into<String>) -> Self {
        Self::new(entity_type).with_query_hash(query_hash)
    }

    /// Key for a resolved relationship of one entity.
    pub fn for_relationship(
        entity_type: impl Into<String>,
        entity_id: ElementId,
        relationship_path: impl Into<String>,
    ) -> Self {
        Self::new(entity_type)
            .with_entity_id(entity_id)
            .with_relationship_path(relationship_path)
    }

    /// Set the entity id.
    pub fn with_entity_id(mut self, entity_id: ElementId) -> Self {
        self.entity_id = Some(entity_id);
        self
    }

    /// Set the query hash.
    pub fn with_query_hash(mut self, query_hash: impl Into<String>) -> Self {
        self.query_hash = Some(query_hash.into());
        self
    }

    /// Set the relationship path.
    pub fn with_relationship_path(mut self, path: impl Into<String>) -> Self {
        self.relationship_path = Some(path.into());
        self
    }

    /// Canonical string form used by the store.
    pub fn canonical(&self) -> String {
        self.to_string()
    }

    /// Dependency tag for every payload derived from an element type.
    pub fn type_dependency(entity_type: &str) -> String {
        format!("type:{}", entity_type)
    }

    /// Dependency tag for every payload derived from one entity.
    pub fn entity_dependency(entity_type: &str, entity_id: ElementId) -> String {
        format!("entity:{}:{}", entity_type, entity_id)
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.entity_type)?;
        if let Some(id) = self.entity_id {
            write!(f, "|id={}", id)?;
        }
        if let Some(hash) = &self.query_hash {
            write!(f, "|query={}", hash)?;
        }
        if let Some(path) = &self.relationship_path {
            write!(f, "|rel={}", path)?;
        }
        Ok(())
    }
}

impl From<&str> for CacheKey {
    fn from(entity_type: &str) -> Self {
        CacheKey::new(entity_type)
    }
}

//! Relationship definitions.

use std::fmt;

/// Cardinality of a relationship.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RelationshipKind {
    /// The owner holds the related entity's id in `foreign_key`.
    OneToOne,
    /// Each related entity holds the owner's id in `foreign_key`.
    OneToMany,
    /// The owner holds a list of related ids in `foreign_key`.
    ManyToMany,
}

impl fmt::Display for RelationshipKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RelationshipKind::OneToOne => "one-to-one",
            RelationshipKind::OneToMany => "one-to-many",
            RelationshipKind::ManyToMany => "many-to-many",
        };
        f.write_str(s)
    }
}

/// A named relationship from one element type to another.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RelationshipDefinition {
    pub name: String,
    pub owner_type: String,
    pub target_type: String,
    pub kind: RelationshipKind,
    /// Field that links the two sides; which side holds it depends on `kind`.
    pub foreign_key: String,
}

impl RelationshipDefinition {
    fn new(
        kind: RelationshipKind,
        owner_type: impl Into<String>,
        name: impl Into<String>,
        target_type: impl Into<String>,
        foreign_key: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            owner_type: owner_type.into(),
            target_type: target_type.into(),
            kind,
            foreign_key: foreign_key.into(),
        }
    }

    /// `owner.foreign_key` references one target.
    pub fn one_to_one(
        owner_type: impl Into<String>,
        name: impl Into<String>,
        target_type: impl Into<String>,
        foreign_key: impl Into<String>,
    ) -> Self {
        Self::new(RelationshipKind::OneToOne, owner_type, name, target_type, foreign_key)
    }

    /// Targets whose `foreign_key` equals the owner's id.
    pub fn one_to_many(
        owner_type: impl Into<String>,
        name: impl Into<String>,
        target_type: impl Into<String>,
        foreign_key: impl Into<String>,
    ) -> Self {
        Self::new(RelationshipKind::OneToMany, owner_type, name, target_type, foreign_key)
    }

    /// `owner.foreign_key` is a list of target ids.
    pub fn many_to_many(
        owner_type: impl Into<String>,
        name: impl Into<String>,
        target_type: impl Into<String>,
        foreign_key: impl Into<String>,
    ) -> Self {
        Self::new(RelationshipKind::ManyToMany, owner_type, name, target_type, foreign_key)
    }

    /// Check if at most one entity is related.
    pub fn is_single(&self) -> bool {
        self.kind == RelationshipKind::OneToOne
    }
}

impl fmt::Display for RelationshipDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{} ({} {} via {})",
            self.owner_type, self.name, self.kind, self.target_type, self.foreign_key
        )
    }
}

//! Loading related elements.

use std::sync::Arc;

use async_trait::async_trait;

use super::definition::{RelationshipDefinition, RelationshipKind};
use super::error::{RelationshipError, RelationshipResult};
use crate::model::{Element, ElementId, Value};
use crate::provider::ElementProvider;

/// Loads the elements on the far side of a relationship.
#[async_trait]
pub trait RelationshipLoader: Send + Sync {
    async fn load(
        &self,
        owner: &Element,
        definition: &RelationshipDefinition,
    ) -> RelationshipResult<Vec<Element>>;
}

/// Loader that follows link fields through an [`ElementProvider`].
pub struct ProviderRelationshipLoader {
    provider: Arc<dyn ElementProvider>,
}

impl ProviderRelationshipLoader {
    pub fn new(provider: Arc<dyn ElementProvider>) -> Self {
        Self { provider }
    }

    async fn by_id(
        &self,
        id: ElementId,
        definition: &RelationshipDefinition,
    ) -> RelationshipResult<Option<Element>> {
        let found = self
            .provider
            .get_element_by_id_async(id)
            .await
            .map_err(|source| RelationshipError::Load {
                name: definition.name.clone(),
                source,
            })?;
        Ok(found.filter(|e| e.is_type(&definition.target_type)))
    }
}

fn link_id(owner: &Element, field: &str, value: &Value) -> RelationshipResult<ElementId> {
    value
        .as_i64()
        .map(ElementId)
        .ok_or_else(|| RelationshipError::InvalidLink {
            entity_id: owner.id,
            field: field.to_string(),
        })
}

#[async_trait]
impl RelationshipLoader for ProviderRelationshipLoader {
    async fn load(
        &self,
        owner: &Element,
        definition: &RelationshipDefinition,
    ) -> RelationshipResult<Vec<Element>> {
        let field = &definition.foreign_key;
        match definition.kind {
            RelationshipKind::OneToOne => match owner.get(field) {
                None | Some(Value::Null) => Ok(Vec::new()),
                Some(value) => {
                    let id = link_id(owner, field, value)?;
                    Ok(self.by_id(id, definition).await?.into_iter().collect())
                }
            },
            RelationshipKind::OneToMany => {
                let owner_id = Value::Int(owner.id.value());
                let candidates = self
                    .provider
                    .get_elements_of_type_async(&definition.target_type)
                    .await
                    .map_err(|source| RelationshipError::Load {
                        name: definition.name.clone(),
                        source,
                    })?;
                Ok(candidates
                    .into_iter()
                    .filter(|e| e.get(field) == Some(&owner_id))
                    .collect())
            }
            RelationshipKind::ManyToMany => {
                let ids = match owner.get(field) {
                    None | Some(Value::Null) => return Ok(Vec::new()),
                    Some(Value::List(items)) => items
                        .iter()
                        .map(|v| link_id(owner, field, v))
                        .collect::<RelationshipResult<Vec<_>>>()?,
                    Some(_) => {
                        return Err(RelationshipError::InvalidLink {
                            entity_id: owner.id,
                            field: field.clone(),
                        })
                    }
                };
                let mut related = Vec::with_capacity(ids.len());
                for id in ids {
                    if let Some(element) = self.by_id(id, definition).await? {
                        related.push(element);
                    }
                }
                Ok(related)
            }
        }
    }
}

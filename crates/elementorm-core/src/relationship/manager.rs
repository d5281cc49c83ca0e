//! Relationship resolution with caching and load coalescing.
//!
//! Resolved relationships share the query result cache. Each entry is keyed
//! by owner type, owner id and relationship name, and carries two dependency
//! tags: the owner entity, and the target type. Concurrent resolves of the
//! same key await one shared load future held in an in-flight map. A load
//! whose key is invalidated while it runs is not cached.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use futures::future::{join_all, BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use tracing::{debug, instrument};

use super::definition::{RelationshipDefinition, RelationshipKind};
use super::error::{RelationshipError, RelationshipResult};
use super::loader::RelationshipLoader;
use crate::cache::CacheKey;
use crate::model::{Element, ElementId, Value};
use crate::query::ResultCache;
use crate::tracking::{ChangeEvent, ChangeTracker, RelationshipChangeKind};

type Related = Arc<Vec<Element>>;
type LoadFuture = Shared<BoxFuture<'static, RelationshipResult<Related>>>;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct LoadKey {
    owner_type: String,
    owner_id: ElementId,
    name: String,
}

struct InFlight {
    generation: u64,
    target_type: String,
    future: LoadFuture,
}

/// Dependency tag for relationship entries whose targets have this type.
fn target_dependency(target_type: &str) -> String {
    format!("related:{}", target_type)
}

/// Registry and resolver for relationships between element types.
pub struct RelationshipManager {
    definitions: DashMap<(String, String), RelationshipDefinition>,
    loader: Arc<dyn RelationshipLoader>,
    cache: Arc<ResultCache>,
    in_flight: Mutex<HashMap<LoadKey, InFlight>>,
    generation: AtomicU64,
    loads: AtomicU64,
    ttl: Option<Duration>,
}

impl RelationshipManager {
    pub fn new(loader: Arc<dyn RelationshipLoader>, cache: Arc<ResultCache>) -> Self {
        Self {
            definitions: DashMap::new(),
            loader,
            cache,
            in_flight: Mutex::new(HashMap::new()),
            generation: AtomicU64::new(0),
            loads: AtomicU64::new(0),
            ttl: None,
        }
    }

    /// Set a TTL for cached relationships.
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    /// Register a relationship, replacing any with the same owner and name.
    pub fn register(&self, definition: RelationshipDefinition) {
        debug!(relationship = %definition, "relationship registered");
        let key = (definition.owner_type.clone(), definition.name.clone());
        self.definitions.insert(key, definition);
    }

    /// Remove a relationship definition.
    pub fn unregister(&self, owner_type: &str, name: &str) -> Option<RelationshipDefinition> {
        self.definitions
            .remove(&(owner_type.to_string(), name.to_string()))
            .map(|(_, def)| def)
    }

    /// Look up a definition.
    pub fn definition(&self, owner_type: &str, name: &str) -> RelationshipResult<RelationshipDefinition> {
        self.definitions
            .get(&(owner_type.to_string(), name.to_string()))
            .map(|d| d.value().clone())
            .ok_or_else(|| RelationshipError::UnknownRelationship {
                owner_type: owner_type.to_string(),
                name: name.to_string(),
            })
    }

    /// All definitions owned by a type, sorted by name.
    pub fn definitions_for(&self, owner_type: &str) -> Vec<RelationshipDefinition> {
        let mut defs: Vec<_> = self
            .definitions
            .iter()
            .filter(|d| d.owner_type == owner_type)
            .map(|d| d.value().clone())
            .collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        defs
    }

    /// Number of loader invocations so far.
    pub fn load_count(&self) -> u64 {
        self.loads.load(Ordering::Relaxed)
    }

    /// Number of loads currently running.
    pub fn in_flight_count(&self) -> usize {
        self.in_flight.lock().len()
    }

    /// Related elements of `owner`, from cache or the loader.
    #[instrument(skip(self, owner), fields(owner_type = %owner.element_type, owner_id = %owner.id))]
    pub async fn resolve(&self, owner: &Element, name: &str) -> RelationshipResult<Related> {
        let definition = self.definition(&owner.element_type, name)?;
        let cache_key = CacheKey::for_relationship(owner.element_type.as_str(), owner.id, name);
        if let Some(hit) = self.cache.get(&cache_key) {
            return Ok(hit);
        }

        let load_key = LoadKey {
            owner_type: owner.element_type.clone(),
            owner_id: owner.id,
            name: name.to_string(),
        };
        let (generation, future) = self.join_or_start(&load_key, owner, definition.clone());
        let result = future.await;

        let current = {
            let mut in_flight = self.in_flight.lock();
            match in_flight.get(&load_key) {
                Some(entry) if entry.generation == generation => {
                    in_flight.remove(&load_key);
                    true
                }
                _ => false,
            }
        };
        if current {
            if let Ok(related) = &result {
                self.cache.set(
                    &cache_key,
                    Arc::clone(related),
                    self.ttl,
                    [
                        CacheKey::entity_dependency(&owner.element_type, owner.id),
                        target_dependency(&definition.target_type),
                    ],
                );
            }
        }
        result
    }

    fn join_or_start(
        &self,
        key: &LoadKey,
        owner: &Element,
        definition: RelationshipDefinition,
    ) -> (u64, LoadFuture) {
        let mut in_flight = self.in_flight.lock();
        if let Some(entry) = in_flight.get(key) {
            debug!(relationship = %key.name, "joining in-flight load");
            return (entry.generation, entry.future.clone());
        }

        let generation = self.generation.fetch_add(1, Ordering::Relaxed);
        self.loads.fetch_add(1, Ordering::Relaxed);
        let loader = Arc::clone(&self.loader);
        let owner = owner.clone();
        let target_type = definition.target_type.clone();
        let future = async move { loader.load(&owner, &definition).await.map(Arc::new) }
            .boxed()
            .shared();
        in_flight.insert(
            key.clone(),
            InFlight {
                generation,
                target_type,
                future: future.clone(),
            },
        );
        (generation, future)
    }

    /// The single related element of a one-to-one relationship.
    pub async fn resolve_one(&self, owner: &Element, name: &str) -> RelationshipResult<Option<Element>> {
        Ok(self.resolve(owner, name).await?.first().cloned())
    }

    /// Resolve the same relationship for several owners concurrently.
    pub async fn resolve_many(
        &self,
        owners: &[Element],
        name: &str,
    ) -> Vec<RelationshipResult<Related>> {
        join_all(owners.iter().map(|owner| self.resolve(owner, name))).await
    }

    /// Link `related` to `owner` through a one-to-many relationship.
    ///
    /// A tracked related entity gets its foreign key set; a tracked owner
    /// records the relationship change.
    pub fn add(
        &self,
        tracker: &ChangeTracker,
        owner: &Element,
        name: &str,
        related: ElementId,
    ) -> RelationshipResult<()> {
        self.edit(tracker, owner, name, related, RelationshipChangeKind::Added)
    }

    /// Unlink `related` from `owner`. The foreign key of a tracked related
    /// entity is set to null.
    pub fn remove(
        &self,
        tracker: &ChangeTracker,
        owner: &Element,
        name: &str,
        related: ElementId,
    ) -> RelationshipResult<()> {
        self.edit(tracker, owner, name, related, RelationshipChangeKind::Removed)
    }

    fn edit(
        &self,
        tracker: &ChangeTracker,
        owner: &Element,
        name: &str,
        related: ElementId,
        kind: RelationshipChangeKind,
    ) -> RelationshipResult<()> {
        let definition = self.definition(&owner.element_type, name)?;
        if definition.kind != RelationshipKind::OneToMany {
            return Err(RelationshipError::UnsupportedKind {
                name: definition.name,
                kind: definition.kind,
                operation: match kind {
                    RelationshipChangeKind::Added => "add",
                    RelationshipChangeKind::Removed => "remove",
                },
            });
        }

        if tracker.is_tracked(related) {
            let link = match kind {
                RelationshipChangeKind::Added => Value::Int(owner.id.value()),
                RelationshipChangeKind::Removed => Value::Null,
            };
            tracker.set_property(related, &definition.foreign_key, link)?;
        }
        if tracker.is_tracked(owner.id) {
            tracker.track_relationship_change(owner.id, name, related, kind)?;
        }
        self.invalidate_entity(&owner.element_type, owner.id);
        self.invalidate_target_type(&definition.target_type);
        Ok(())
    }

    /// Drop cached and in-flight relationships owned by one entity.
    pub fn invalidate_entity(&self, owner_type: &str, owner_id: ElementId) -> usize {
        self.in_flight
            .lock()
            .retain(|k, _| !(k.owner_id == owner_id && k.owner_type == owner_type));
        self.cache
            .invalidate_by_dependency(&CacheKey::entity_dependency(owner_type, owner_id))
    }

    /// Drop cached and in-flight relationships that point at a type.
    pub fn invalidate_target_type(&self, target_type: &str) -> usize {
        self.in_flight
            .lock()
            .retain(|_, entry| entry.target_type != target_type);
        self.cache
            .invalidate_by_dependency(&target_dependency(target_type))
    }

    /// Drop every cached relationship.
    pub fn clear(&self) -> usize {
        self.in_flight.lock().clear();
        self.cache.invalidate_by_pattern("|rel=")
    }

    /// Invalidate in response to a tracker event.
    pub fn handle_event(&self, event: &ChangeEvent) {
        match event.entity() {
            Some((id, entity_type)) => {
                self.invalidate_entity(entity_type, id);
                self.invalidate_target_type(entity_type);
            }
            None => {
                self.clear();
            }
        }
    }

    /// Invalidate on every event published by `tracker`.
    pub fn subscribe_to(self: &Arc<Self>, tracker: &ChangeTracker) {
        let weak = Arc::downgrade(self);
        tracker.subscribe(move |event| {
            if let Some(manager) = weak.upgrade() {
                manager.handle_event(event);
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CacheConfig;
    use crate::provider::InMemoryProvider;
    use crate::relationship::ProviderRelationshipLoader;
    use async_trait::async_trait;

    struct SlowLoader {
        inner: ProviderRelationshipLoader,
    }

    #[async_trait]
    impl RelationshipLoader for SlowLoader {
        async fn load(
            &self,
            owner: &Element,
            definition: &RelationshipDefinition,
        ) -> RelationshipResult<Vec<Element>> {
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.inner.load(owner, definition).await
        }
    }

    fn setup() -> (Arc<RelationshipManager>, Arc<ResultCache>) {
        let provider = InMemoryProvider::with_elements(vec![
            Element::new(1, "Wall"),
            Element::new(2, "Door").with_field("host_id", 1),
            Element::new(3, "Door").with_field("host_id", 1),
            Element::new(4, "Door"),
        ]);
        let loader = SlowLoader {
            inner: ProviderRelationshipLoader::new(Arc::new(provider)),
        };
        let cache = Arc::new(ResultCache::new(CacheConfig::default()));
        let manager = Arc::new(RelationshipManager::new(Arc::new(loader), Arc::clone(&cache)));
        manager.register(RelationshipDefinition::one_to_many("Wall", "doors", "Door", "host_id"));
        manager.register(RelationshipDefinition::one_to_one("Door", "host", "Wall", "host_id"));
        (manager, cache)
    }

    #[tokio::test]
    async fn test_concurrent_resolves_share_one_load() {
        let (manager, _) = setup();
        let wall = Element::new(1, "Wall");

        let (a, b) = tokio::join!(manager.resolve(&wall, "doors"), manager.resolve(&wall, "doors"));
        assert_eq!(a.unwrap().len(), 2);
        assert_eq!(b.unwrap().len(), 2);
        assert_eq!(manager.load_count(), 1);
        assert_eq!(manager.in_flight_count(), 0);

        manager.resolve(&wall, "doors").await.unwrap();
        assert_eq!(manager.load_count(), 1);
    }

    #[tokio::test]
    async fn test_tracker_events_invalidate() {
        let (manager, cache) = setup();
        let tracker = ChangeTracker::new();
        manager.subscribe_to(&tracker);

        let wall = Element::new(1, "Wall");
        manager.resolve(&wall, "doors").await.unwrap();
        assert_eq!(cache.len(), 1);

        tracker.attach(&Element::new(4, "Door")).unwrap();
        assert!(cache.is_empty());

        manager.resolve(&wall, "doors").await.unwrap();
        assert_eq!(manager.load_count(), 2);
    }

    #[tokio::test]
    async fn test_add_sets_foreign_key() {
        let (manager, cache) = setup();
        let tracker = ChangeTracker::new();
        let wall = Element::new(1, "Wall");
        tracker.attach(&wall).unwrap();
        tracker.attach(&Element::new(4, "Door")).unwrap();

        manager.resolve(&wall, "doors").await.unwrap();
        manager.add(&tracker, &wall, "doors", ElementId(4)).unwrap();

        assert!(cache.is_empty());
        assert_eq!(
            tracker.entity(ElementId(4)).unwrap().get("host_id"),
            Some(&Value::Int(1))
        );
        assert_eq!(tracker.entry(ElementId(1)).unwrap().relationship_changes.len(), 1);

        manager.remove(&tracker, &wall, "doors", ElementId(4)).unwrap();
        assert!(!tracker.is_dirty(ElementId(4)));
    }

    #[tokio::test]
    async fn test_errors() {
        let (manager, _) = setup();
        let wall = Element::new(1, "Wall");
        assert!(matches!(
            manager.resolve(&wall, "windows").await,
            Err(RelationshipError::UnknownRelationship { .. })
        ));

        let door = Element::new(2, "Door").with_field("host_id", 1);
        assert_eq!(manager.resolve_one(&door, "host").await.unwrap().unwrap().id, ElementId(1));
        assert!(matches!(
            manager.add(&ChangeTracker::new(), &door, "host", ElementId(1)),
            Err(RelationshipError::UnsupportedKind { .. })
        ));
    }
}

//! The element context: one entry point wiring queries, the result cache,
//! change tracking, transactions, relationships and batch processing.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};

use elementorm_core::cache::CacheStats;
use elementorm_core::query::{QueryExecutor, QueryResult, ResultCache, ALL_TYPES};
use elementorm_core::relationship::{ProviderRelationshipLoader, RelationshipResult};
use elementorm_core::tracking::{EntityTracker, TrackingResult};
use elementorm_core::transaction::{ProviderUnitOfWork, TransactionResult};
use elementorm_core::{
    AsyncBatchProcessor, ChangeTracker, Element, ElementId, ElementProvider, InMemoryProvider,
    Predicate, QueryBuilder, RelationshipDefinition, RelationshipManager, Transaction,
    TransactionError, TransactionManager, UnitOfWork, Validator, Value,
};

use crate::config::ContextConfig;

/// Owns every engine component for one provider.
///
/// Root commits invalidate cached query results for the affected types and
/// cached relationships for the affected entities (unless disabled in
/// [`ContextConfig`]). Tracker events invalidate relationships as they
/// happen.
pub struct ElementContext {
    provider: Arc<dyn ElementProvider>,
    executor: QueryExecutor,
    tracker: Arc<ChangeTracker>,
    transactions: Arc<TransactionManager>,
    relationships: Arc<RelationshipManager>,
    batch: AsyncBatchProcessor,
    config: ContextConfig,
}

impl ElementContext {
    /// Create a context over `provider`.
    pub fn new(provider: Arc<dyn ElementProvider>, config: ContextConfig) -> Self {
        let cache = Arc::new(ResultCache::new(config.cache.clone()));
        let executor = QueryExecutor::new(Arc::clone(&provider), Arc::clone(&cache), config.query.clone());
        let tracker = Arc::new(ChangeTracker::new());
        let transactions = Arc::new(TransactionManager::new(
            Arc::clone(&tracker),
            config.transaction.clone(),
        ));
        let loader = Arc::new(ProviderRelationshipLoader::new(Arc::clone(&provider)));
        let relationships = Arc::new(RelationshipManager::new(loader, cache));
        relationships.subscribe_to(&tracker);

        if config.invalidate_on_commit {
            let executor = executor.clone();
            let relationships = Arc::clone(&relationships);
            transactions.on_commit(move |summary| {
                let mut removed = 0;
                for entity_type in summary.affected_types() {
                    removed += executor.invalidate(Some(&entity_type));
                    removed += relationships.invalidate_target_type(&entity_type);
                }
                for entity in summary.entities() {
                    removed += relationships.invalidate_entity(&entity.entity_type, entity.entity_id);
                }
                debug!(transaction_id = %summary.transaction_id, removed, "commit invalidated cache");
            });
        }

        info!(
            cache_max_size = config.cache.max_size,
            invalidate_on_commit = config.invalidate_on_commit,
            "element context created"
        );
        Self {
            provider,
            executor,
            tracker,
            transactions,
            relationships,
            batch: AsyncBatchProcessor::new(config.batch.clone()),
            config,
        }
    }

    /// Create a context over `provider` with default configuration.
    pub fn with_provider(provider: Arc<dyn ElementProvider>) -> Self {
        Self::new(provider, ContextConfig::default())
    }

    /// Create a context over an in-memory provider holding `elements`.
    /// Root commits write back into that provider.
    pub fn in_memory(elements: Vec<Element>, config: ContextConfig) -> Self {
        let provider = InMemoryProvider::with_elements(elements).shared();
        let context = Self::new(provider.clone(), config);
        context.set_unit_of_work(Arc::new(ProviderUnitOfWork::new(provider)));
        context
    }

    pub fn config(&self) -> &ContextConfig {
        &self.config
    }

    pub fn provider(&self) -> &Arc<dyn ElementProvider> {
        &self.provider
    }

    pub fn executor(&self) -> &QueryExecutor {
        &self.executor
    }

    pub fn tracker(&self) -> &Arc<ChangeTracker> {
        &self.tracker
    }

    pub fn transactions(&self) -> &Arc<TransactionManager> {
        &self.transactions
    }

    /// Relationship registry and resolver.
    pub fn relationships(&self) -> &Arc<RelationshipManager> {
        &self.relationships
    }

    /// Batch processor configured from [`ContextConfig::batch`].
    pub fn batch_processor(&self) -> &AsyncBatchProcessor {
        &self.batch
    }

    /// Install the unit of work used by root commits.
    pub fn set_unit_of_work(&self, unit_of_work: Arc<dyn UnitOfWork>) {
        self.transactions.set_unit_of_work(unit_of_work);
    }

    /// Install the validator run before root commits.
    pub fn set_validator(&self, validator: Arc<dyn Validator>) {
        self.transactions.set_validator(validator);
    }

    // Queries

    /// Query over elements of `element_type` (`"*"` for every type).
    pub fn all(&self, element_type: &str) -> QueryBuilder {
        QueryBuilder::new(self.executor.clone(), element_type)
    }

    /// Query over every element regardless of type.
    pub fn all_elements(&self) -> QueryBuilder {
        self.all(ALL_TYPES)
    }

    /// Filtered query over `element_type`.
    pub fn where_(&self, element_type: &str, predicate: Predicate) -> QueryBuilder {
        self.all(element_type).where_(predicate)
    }

    pub fn first(&self, element_type: &str, predicate: Option<Predicate>) -> QueryResult<Element> {
        self.all(element_type).first(predicate)
    }

    pub fn single(&self, element_type: &str, predicate: Option<Predicate>) -> QueryResult<Element> {
        self.all(element_type).single(predicate)
    }

    pub fn count(&self, element_type: &str) -> QueryResult<usize> {
        self.all(element_type).count()
    }

    pub fn any(&self, element_type: &str, predicate: Option<Predicate>) -> QueryResult<bool> {
        self.all(element_type).any(predicate)
    }

    // Change tracking

    /// Track an existing entity.
    pub fn attach(&self, element: &Element) -> TrackingResult<()> {
        self.tracker.attach(element)
    }

    /// Stop tracking an entity.
    pub fn detach(&self, id: ElementId) -> Option<EntityTracker> {
        self.tracker.detach(id)
    }

    /// Track a new entity.
    pub fn add(&self, element: &Element) -> TrackingResult<()> {
        self.tracker.add(element)
    }

    /// Mark a tracked entity for deletion.
    pub fn remove(&self, id: ElementId) -> TrackingResult<()> {
        self.tracker.remove(id)
    }

    /// Write a field of a tracked entity outside any transaction.
    pub fn set_property(&self, id: ElementId, field: &str, value: impl Into<Value>) -> TrackingResult<bool> {
        self.tracker.set_property(id, field, value)
    }

    /// Accept every pending change without a unit of work.
    pub fn accept_changes(&self) -> usize {
        self.tracker.accept_changes()
    }

    /// Discard every pending change.
    pub fn reject_changes(&self) -> usize {
        self.tracker.reject_changes()
    }

    pub fn has_changes(&self) -> bool {
        self.tracker.has_changes()
    }

    // Cache

    /// Drop every cached query result and relationship.
    pub fn clear_cache(&self) -> usize {
        self.relationships.clear() + self.executor.invalidate(None)
    }

    /// Targeted invalidation.
    ///
    /// * type and id: queries over the type and relationships of the entity
    /// * type only: queries over the type and relationships pointing at it
    /// * id only: as for type and id, with the type looked up in the tracker
    ///   and then the provider; unknown ids invalidate nothing
    /// * neither: everything
    pub fn invalidate_cache(&self, element_type: Option<&str>, id: Option<ElementId>) -> usize {
        match (element_type, id) {
            (None, None) => self.clear_cache(),
            (Some(t), None) => {
                self.executor.invalidate(Some(t)) + self.relationships.invalidate_target_type(t)
            }
            (Some(t), Some(id)) => {
                self.executor.invalidate(Some(t)) + self.relationships.invalidate_entity(t, id)
            }
            (None, Some(id)) => match self.type_of(id) {
                Some(t) => self.invalidate_cache(Some(&t), Some(id)),
                None => {
                    debug!(entity_id = %id, "invalidation for unknown entity ignored");
                    0
                }
            },
        }
    }

    fn type_of(&self, id: ElementId) -> Option<String> {
        if let Some(entry) = self.tracker.entry(id) {
            return Some(entry.entity_type);
        }
        self.provider
            .get_element_by_id(id)
            .ok()
            .flatten()
            .map(|e| e.element_type)
    }

    /// Cache statistics.
    pub fn cache_stats(&self) -> &CacheStats {
        self.executor.cache().stats()
    }

    // Transactions

    /// Begin a transaction, nested if one is already open.
    pub fn transaction(&self) -> Transaction {
        self.transactions.begin()
    }

    /// Begin a transaction that rolls back after `timeout`.
    pub fn transaction_with_timeout(&self, timeout: Duration) -> Transaction {
        self.transactions.begin_with_timeout(Some(timeout))
    }

    /// Run `f` in a transaction, committing on `Ok`.
    pub fn scope<T, E, F>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce(&Transaction) -> Result<T, E>,
        E: From<TransactionError>,
    {
        self.transactions.scope(f)
    }

    /// Async [`ElementContext::scope`].
    pub async fn scope_async<T, E, F, Fut>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce(Transaction) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: From<TransactionError>,
    {
        self.transactions.scope_async(f).await
    }

    /// Commit pending tracker changes in a fresh transaction.
    pub fn save_changes(&self) -> TransactionResult<usize> {
        let tx = self.transaction();
        let summary = tx.commit()?;
        Ok(summary.map_or(0, |s| s.added.len() + s.modified.len() + s.removed.len()))
    }

    // Relationships

    /// Register a relationship definition.
    pub fn register_relationship(&self, definition: RelationshipDefinition) {
        self.relationships.register(definition);
    }

    /// Resolve a relationship of `owner`.
    pub async fn resolve(&self, owner: &Element, name: &str) -> RelationshipResult<Arc<Vec<Element>>> {
        self.relationships.resolve(owner, name).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context() -> ElementContext {
        ElementContext::in_memory(
            vec![
                Element::new(1, "Wall").with_field("height", 12),
                Element::new(2, "Wall").with_field("height", 8),
                Element::new(3, "Door").with_field("host_id", 1),
            ],
            ContextConfig::default(),
        )
    }

    #[test]
    fn test_query_shortcuts() {
        let ctx = context();
        assert_eq!(ctx.count("Wall").unwrap(), 2);
        assert_eq!(ctx.all_elements().count().unwrap(), 3);
        assert!(ctx.any("Door", None).unwrap());
        let tall = ctx.single("Wall", Some(Predicate::gt("height", 10))).unwrap();
        assert_eq!(tall.id, ElementId(1));
    }

    #[test]
    fn test_invalidate_by_id_looks_up_type() {
        let ctx = context();
        ctx.count("Wall").unwrap();
        assert_eq!(ctx.invalidate_cache(None, Some(ElementId(2))), 1);
        assert_eq!(ctx.invalidate_cache(None, Some(ElementId(99))), 0);
    }

    #[test]
    fn test_save_changes_writes_through() {
        let ctx = context();
        let wall = ctx.first("Wall", None).unwrap();
        ctx.attach(&wall).unwrap();
        ctx.set_property(wall.id, "height", 20).unwrap();
        assert_eq!(ctx.save_changes().unwrap(), 1);

        let stored = ctx.provider().get_element_by_id(wall.id).unwrap().unwrap();
        assert_eq!(stored.get("height"), Some(&Value::Int(20)));
    }
}

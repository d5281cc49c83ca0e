//! Materialized-or-deferred element collections.
//!
//! An [`ElementSet`] starts either from concrete elements or from a
//! [`QueryBuilder`]. Query-style methods on a deferred set derive another
//! deferred set; on a materialized set they run at once through the same
//! plan interpreter the executor uses. Anything that needs the elements
//! goes through [`ElementSet::ensure_materialized`], after which the set
//! stays materialized.

use std::collections::{BTreeMap, HashSet};

use tracing::{debug, info};

use super::builder::{group_elements, QueryBuilder};
use super::error::{QueryError, QueryResult};
use super::executor::apply_plan;
use super::plan::{Operation, QueryPlan};
use super::predicate::{KeySelector, Predicate, Projection};
use crate::model::{Element, ElementId, Value};

const MATERIALIZED_TYPE: &str = "<materialized>";

/// Outcome of [`ElementSet::batch_update`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchUpdateReport {
    /// Elements visited.
    pub processed: usize,
    /// Elements where at least one field actually changed.
    pub updated: usize,
    /// Number of chunks processed.
    pub batches: usize,
}

/// A collection that is either concrete or a pending query.
#[derive(Debug, Clone)]
pub enum ElementSet {
    /// Concrete elements.
    Materialized(Vec<Element>),
    /// A query that has not run yet.
    Deferred(QueryBuilder),
}

impl From<Vec<Element>> for ElementSet {
    fn from(elements: Vec<Element>) -> Self {
        ElementSet::Materialized(elements)
    }
}

impl From<QueryBuilder> for ElementSet {
    fn from(query: QueryBuilder) -> Self {
        ElementSet::Deferred(query)
    }
}

impl ElementSet {
    /// Wrap concrete elements.
    pub fn materialized(elements: Vec<Element>) -> Self {
        ElementSet::Materialized(elements)
    }

    /// Wrap a pending query.
    pub fn deferred(query: QueryBuilder) -> Self {
        ElementSet::Deferred(query)
    }

    /// Check if the elements are already held.
    pub fn is_materialized(&self) -> bool {
        matches!(self, ElementSet::Materialized(_))
    }

    /// Run the pending query, if any, and return the held elements.
    pub fn ensure_materialized(&mut self) -> QueryResult<&mut Vec<Element>> {
        if let ElementSet::Deferred(query) = self {
            debug!(element_type = query.element_type(), "materializing element set");
            let elements = query.to_list()?;
            *self = ElementSet::Materialized(elements);
        }
        match self {
            ElementSet::Materialized(elements) => Ok(elements),
            ElementSet::Deferred(query) => Err(QueryError::ExecutionFailure {
                operation: "materialize".to_string(),
                element_type: query.element_type().to_string(),
                message: "element set is still deferred".to_string(),
            }),
        }
    }

    /// Async [`ElementSet::ensure_materialized`].
    pub async fn materialize_async(&mut self) -> QueryResult<()> {
        if let ElementSet::Deferred(query) = self {
            let elements = query.to_list_async().await?;
            *self = ElementSet::Materialized(elements);
        }
        Ok(())
    }

    fn apply(&self, op: Operation) -> QueryResult<Self> {
        match self {
            ElementSet::Deferred(query) => Ok(ElementSet::Deferred(match op {
                Operation::Filter(p) => query.filter(p),
                Operation::Project(p) => query.select(p),
                Operation::SortAsc(k) => query.order_by(k),
                Operation::SortDesc(k) => query.order_by_descending(k),
                Operation::Skip(n) => query.skip(n as i64)?,
                Operation::Take(n) => query.take(n as i64)?,
                Operation::Distinct(None) => query.distinct(),
                Operation::Distinct(Some(k)) => query.distinct_by(k),
            })),
            ElementSet::Materialized(elements) => {
                let plan = QueryPlan::new().with_operation(op);
                apply_plan(&plan, elements.clone(), MATERIALIZED_TYPE).map(ElementSet::Materialized)
            }
        }
    }

    /// Keep elements matching `predicate`.
    pub fn where_(&self, predicate: Predicate) -> QueryResult<Self> {
        self.apply(Operation::Filter(predicate))
    }

    /// Map elements through a projection.
    pub fn select(&self, projection: Projection) -> QueryResult<Self> {
        self.apply(Operation::Project(projection))
    }

    /// Sort ascending by key.
    pub fn order_by(&self, key: impl Into<KeySelector>) -> QueryResult<Self> {
        self.apply(Operation::SortAsc(key.into()))
    }

    /// Sort descending by key.
    pub fn order_by_descending(&self, key: impl Into<KeySelector>) -> QueryResult<Self> {
        self.apply(Operation::SortDesc(key.into()))
    }

    /// Skip the first `n` elements. Negative `n` is rejected.
    pub fn skip(&self, n: i64) -> QueryResult<Self> {
        let n = usize::try_from(n)
            .map_err(|_| QueryError::InvalidArgument(format!("skip count must be >= 0, got {}", n)))?;
        self.apply(Operation::Skip(n))
    }

    /// Keep at most `n` elements. `n` must be positive.
    pub fn take(&self, n: i64) -> QueryResult<Self> {
        match usize::try_from(n) {
            Ok(n) if n > 0 => self.apply(Operation::Take(n)),
            _ => Err(QueryError::InvalidArgument(format!(
                "take count must be > 0, got {}",
                n
            ))),
        }
    }

    /// Drop elements with an id already seen.
    pub fn distinct(&self) -> QueryResult<Self> {
        self.apply(Operation::Distinct(None))
    }

    /// Drop elements whose key was already seen.
    pub fn distinct_by(&self, key: impl Into<KeySelector>) -> QueryResult<Self> {
        self.apply(Operation::Distinct(Some(key.into())))
    }

    /// Number of elements.
    pub fn len(&mut self) -> QueryResult<usize> {
        Ok(self.ensure_materialized()?.len())
    }

    /// Check if the set has no elements.
    pub fn is_empty(&mut self) -> QueryResult<bool> {
        Ok(self.ensure_materialized()?.is_empty())
    }

    /// Element at `index`.
    pub fn get(&mut self, index: usize) -> QueryResult<Option<&Element>> {
        Ok(self.ensure_materialized()?.get(index))
    }

    /// Iterate the elements.
    pub fn iter(&mut self) -> QueryResult<std::slice::Iter<'_, Element>> {
        Ok(self.ensure_materialized()?.iter())
    }

    /// Check if an element with `id` is present.
    pub fn contains(&mut self, id: ElementId) -> QueryResult<bool> {
        Ok(self.ensure_materialized()?.iter().any(|e| e.id == id))
    }

    /// Consume the set, returning its elements.
    pub fn into_vec(self) -> QueryResult<Vec<Element>> {
        match self {
            ElementSet::Materialized(elements) => Ok(elements),
            ElementSet::Deferred(query) => query.to_list(),
        }
    }

    /// First element, optionally matching `predicate`.
    pub fn first(&mut self, predicate: Option<&Predicate>) -> QueryResult<Element> {
        self.ensure_materialized()?
            .iter()
            .find(|e| predicate.map_or(true, |p| p.evaluate(e)))
            .cloned()
            .ok_or(QueryError::EmptySequence)
    }

    /// The only element, optionally matching `predicate`.
    pub fn single(&mut self, predicate: Option<&Predicate>) -> QueryResult<Element> {
        let mut matches = self
            .ensure_materialized()?
            .iter()
            .filter(|e| predicate.map_or(true, |p| p.evaluate(e)));
        match (matches.next(), matches.next()) {
            (None, _) => Err(QueryError::EmptySequence),
            (Some(e), None) => Ok(e.clone()),
            (Some(_), Some(_)) => Err(QueryError::MultipleElements),
        }
    }

    /// Number of elements matching `predicate` (all when `None`).
    pub fn count(&mut self, predicate: Option<&Predicate>) -> QueryResult<usize> {
        Ok(self
            .ensure_materialized()?
            .iter()
            .filter(|e| predicate.map_or(true, |p| p.evaluate(e)))
            .count())
    }

    /// Whether any element matches (or exists).
    pub fn any(&mut self, predicate: Option<&Predicate>) -> QueryResult<bool> {
        Ok(self
            .ensure_materialized()?
            .iter()
            .any(|e| predicate.map_or(true, |p| p.evaluate(e))))
    }

    /// Whether every element matches.
    pub fn all(&mut self, predicate: &Predicate) -> QueryResult<bool> {
        Ok(self.ensure_materialized()?.iter().all(|e| predicate.evaluate(e)))
    }

    /// Group by key in first-seen order.
    pub fn group_by(&mut self, key: impl Into<KeySelector>) -> QueryResult<Vec<(Value, Vec<Element>)>> {
        let key = key.into();
        Ok(group_elements(self.ensure_materialized()?.clone(), &key))
    }

    /// Elements of `self` followed by elements of `other` not already
    /// present, without duplicate ids.
    pub fn union(&mut self, other: &mut ElementSet) -> QueryResult<ElementSet> {
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        for e in self.ensure_materialized()?.iter().chain(other.ensure_materialized()?.iter()) {
            if seen.insert(e.id) {
                out.push(e.clone());
            }
        }
        Ok(ElementSet::Materialized(out))
    }

    /// Elements of `self` whose id is also in `other`.
    pub fn intersect(&mut self, other: &mut ElementSet) -> QueryResult<ElementSet> {
        let keep = ids(other.ensure_materialized()?);
        self.retain_ids(|id| keep.contains(id))
    }

    /// Elements of `self` whose id is not in `other`.
    pub fn except(&mut self, other: &mut ElementSet) -> QueryResult<ElementSet> {
        let drop = ids(other.ensure_materialized()?);
        self.retain_ids(|id| !drop.contains(id))
    }

    fn retain_ids(&mut self, keep: impl Fn(&ElementId) -> bool) -> QueryResult<ElementSet> {
        let mut seen = HashSet::new();
        let out = self
            .ensure_materialized()?
            .iter()
            .filter(|e| keep(&e.id) && seen.insert(e.id))
            .cloned()
            .collect();
        Ok(ElementSet::Materialized(out))
    }

    /// Write `updates` into every element, `batch_size` elements at a time.
    ///
    /// Chunks only pace progress logging; a failure cannot leave a chunk
    /// half-applied because field writes are infallible.
    pub fn batch_update(
        &mut self,
        updates: &BTreeMap<String, Value>,
        batch_size: usize,
    ) -> QueryResult<BatchUpdateReport> {
        if batch_size == 0 {
            return Err(QueryError::InvalidArgument(
                "batch size must be > 0".to_string(),
            ));
        }
        let elements = self.ensure_materialized()?;
        let total = elements.len();
        let mut report = BatchUpdateReport::default();

        for chunk in elements.chunks_mut(batch_size) {
            for element in chunk.iter_mut() {
                let mut changed = false;
                for (field, value) in updates {
                    if element.get(field) != Some(value) {
                        element.set(field.clone(), value.clone());
                        changed = true;
                    }
                }
                report.processed += 1;
                if changed {
                    report.updated += 1;
                }
            }
            report.batches += 1;
            debug!(processed = report.processed, total, "batch update progress");
        }

        info!(
            processed = report.processed,
            updated = report.updated,
            batches = report.batches,
            "batch update complete"
        );
        Ok(report)
    }
}

fn ids(elements: &[Element]) -> HashSet<ElementId> {
    elements.iter().map(|e| e.id).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::config::{CacheConfig, QueryConfig};
    use crate::provider::InMemoryProvider;
    use crate::query::{QueryExecutor, ResultCache};

    fn walls(range: std::ops::RangeInclusive<i64>) -> Vec<Element> {
        range
            .map(|i| Element::new(i, "Wall").with_field("height", i))
            .collect()
    }

    fn deferred(elements: Vec<Element>) -> (ElementSet, Arc<ResultCache>) {
        let cache = Arc::new(ResultCache::new(CacheConfig::default()));
        let exec = QueryExecutor::new(
            Arc::new(InMemoryProvider::with_elements(elements)),
            Arc::clone(&cache),
            QueryConfig::default(),
        );
        (ElementSet::deferred(QueryBuilder::new(exec, "Wall")), cache)
    }

    fn id_list(set: &mut ElementSet) -> Vec<i64> {
        set.iter().unwrap().map(|e| e.id.value()).collect()
    }

    #[test]
    fn test_deferred_operations_stay_deferred() {
        let (set, cache) = deferred(walls(1..=5));
        let derived = set
            .where_(Predicate::gt("height", 2))
            .unwrap()
            .order_by_descending("height")
            .unwrap();

        assert!(!derived.is_materialized());
        assert_eq!(cache.stats().misses(), 0);

        let mut derived = derived;
        assert_eq!(id_list(&mut derived), vec![5, 4, 3]);
        assert!(derived.is_materialized());
    }

    #[test]
    fn test_materialized_operations_run_immediately() {
        let set = ElementSet::from(walls(1..=5));
        let mut taken = set.order_by_descending("height").unwrap().take(2).unwrap();
        assert!(taken.is_materialized());
        assert_eq!(id_list(&mut taken), vec![5, 4]);
        assert!(set.take(0).is_err());
    }

    #[test]
    fn test_materialization_is_sticky() {
        let (mut set, cache) = deferred(walls(1..=3));
        assert_eq!(set.len().unwrap(), 3);
        assert_eq!(set.count(None).unwrap(), 3);
        assert!(set.contains(ElementId(2)).unwrap());
        // Only the first access ran the query.
        assert_eq!(cache.stats().misses() + cache.stats().hits(), 1);
    }

    #[test]
    fn test_into_vec_runs_deferred_query() {
        let (set, cache) = deferred(walls(1..=3));
        let set = set.where_(Predicate::ge("height", 2)).unwrap();
        let ids: Vec<i64> = set.into_vec().unwrap().iter().map(|e| e.id.value()).collect();
        assert_eq!(ids, vec![2, 3]);
        assert_eq!(cache.stats().misses(), 1);

        let mut materialized = ElementSet::from(walls(1..=2));
        assert_eq!(materialized.ensure_materialized().unwrap().len(), 2);
        assert_eq!(materialized.into_vec().unwrap().len(), 2);
    }

    #[test]
    fn test_terminals() {
        let mut set = ElementSet::from(walls(1..=4));
        assert_eq!(set.first(None).unwrap().id.value(), 1);
        assert!(matches!(
            set.single(None),
            Err(QueryError::MultipleElements)
        ));
        let p = Predicate::eq("height", 3);
        assert_eq!(set.single(Some(&p)).unwrap().id.value(), 3);
        assert!(set.any(Some(&p)).unwrap());
        assert!(set.all(&Predicate::ge("height", 1)).unwrap());
        assert!(matches!(
            ElementSet::from(Vec::new()).first(None),
            Err(QueryError::EmptySequence)
        ));
    }

    #[test]
    fn test_set_algebra_by_identity() {
        let mut a = ElementSet::from(walls(1..=4));
        let mut b = ElementSet::from(walls(3..=6));

        assert_eq!(id_list(&mut a.union(&mut b).unwrap()), vec![1, 2, 3, 4, 5, 6]);
        assert_eq!(id_list(&mut a.intersect(&mut b).unwrap()), vec![3, 4]);
        assert_eq!(id_list(&mut a.except(&mut b).unwrap()), vec![1, 2]);
    }

    #[test]
    fn test_batch_update_reports_chunks() {
        let (mut set, _) = deferred(walls(1..=5));
        let mut updates = BTreeMap::new();
        updates.insert("level".to_string(), Value::from("L3"));
        updates.insert("height".to_string(), Value::Int(3));

        let report = set.batch_update(&updates, 2).unwrap();
        assert_eq!(report.processed, 5);
        assert_eq!(report.batches, 3);
        assert_eq!(report.updated, 5);
        assert!(set
            .iter()
            .unwrap()
            .all(|e| e.get("level") == Some(&Value::from("L3"))));

        let again = set.batch_update(&updates, 10).unwrap();
        assert_eq!(again.updated, 0);
        assert!(set.batch_update(&updates, 0).is_err());
    }

    #[tokio::test]
    async fn test_materialize_async() {
        let (mut set, _) = deferred(walls(1..=3));
        set.materialize_async().await.unwrap();
        assert!(set.is_materialized());
        assert_eq!(set.len().unwrap(), 3);
    }
}

//! Fluent, lazy query builder.
//!
//! Every non-terminal method clones the plan and appends one operation, so a
//! builder can be branched freely:
//!
//! ```ignore
//! let tall = ctx.all("Wall").where_(Predicate::gt("height", 10));
//! let top3 = tall.order_by_descending("height").take(3)?.to_list()?;
//! let count = tall.count()?; // `tall` is unaffected by the branch above
//! ```

use std::collections::BTreeMap;

use tokio::sync::mpsc;
use tracing::debug;

use super::error::{QueryError, QueryResult};
use super::executor::QueryExecutor;
use super::plan::{Operation, QueryPlan};
use super::predicate::{KeySelector, Predicate, Projection};
use crate::model::{Element, Value};

/// A deferred query over one element type.
#[derive(Clone)]
pub struct QueryBuilder {
    executor: QueryExecutor,
    element_type: String,
    plan: QueryPlan,
}

impl std::fmt::Debug for QueryBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryBuilder")
            .field("element_type", &self.element_type)
            .field("plan", &self.plan.canonical())
            .finish()
    }
}

impl QueryBuilder {
    /// Start an empty query over `element_type`.
    pub fn new(executor: QueryExecutor, element_type: impl Into<String>) -> Self {
        Self {
            executor,
            element_type: element_type.into(),
            plan: QueryPlan::new(),
        }
    }

    /// The accumulated plan.
    pub fn plan(&self) -> &QueryPlan {
        &self.plan
    }

    /// The queried element type.
    pub fn element_type(&self) -> &str {
        &self.element_type
    }

    /// The executor this query runs on.
    pub fn executor(&self) -> &QueryExecutor {
        &self.executor
    }

    fn derive(&self, op: Operation) -> Self {
        Self {
            executor: self.executor.clone(),
            element_type: self.element_type.clone(),
            plan: self.plan.with_operation(op),
        }
    }

    /// Keep elements matching `predicate`.
    pub fn filter(&self, predicate: Predicate) -> Self {
        self.derive(Operation::Filter(predicate))
    }

    /// Alias for [`QueryBuilder::filter`].
    pub fn where_(&self, predicate: Predicate) -> Self {
        self.filter(predicate)
    }

    /// Map elements through a projection.
    pub fn select(&self, projection: Projection) -> Self {
        self.derive(Operation::Project(projection))
    }

    /// Keep only the named fields.
    pub fn select_fields<S: Into<String>>(&self, fields: impl IntoIterator<Item = S>) -> Self {
        self.select(Projection::fields(fields))
    }

    /// Sort ascending by key.
    pub fn order_by(&self, key: impl Into<KeySelector>) -> Self {
        self.derive(Operation::SortAsc(key.into()))
    }

    /// Sort descending by key.
    pub fn order_by_descending(&self, key: impl Into<KeySelector>) -> Self {
        self.derive(Operation::SortDesc(key.into()))
    }

    /// Skip the first `n` elements. Negative `n` is rejected.
    pub fn skip(&self, n: i64) -> QueryResult<Self> {
        let n = usize::try_from(n)
            .map_err(|_| QueryError::InvalidArgument(format!("skip count must be >= 0, got {}", n)))?;
        Ok(self.derive(Operation::Skip(n)))
    }

    /// Keep at most `n` elements. `n` must be positive.
    pub fn take(&self, n: i64) -> QueryResult<Self> {
        match usize::try_from(n) {
            Ok(n) if n > 0 => Ok(self.derive(Operation::Take(n))),
            _ => Err(QueryError::InvalidArgument(format!(
                "take count must be > 0, got {}",
                n
            ))),
        }
    }

    /// Drop elements with an id already seen.
    pub fn distinct(&self) -> Self {
        self.derive(Operation::Distinct(None))
    }

    /// Drop elements whose key was already seen; the first one wins.
    pub fn distinct_by(&self, key: impl Into<KeySelector>) -> Self {
        self.derive(Operation::Distinct(Some(key.into())))
    }

    fn filtered(&self, predicate: Option<Predicate>) -> Self {
        match predicate {
            Some(p) => self.filter(p),
            None => self.clone(),
        }
    }

    /// Execute and collect every element.
    pub fn to_list(&self) -> QueryResult<Vec<Element>> {
        self.executor.execute(&self.plan, &self.element_type)
    }

    /// First element, optionally after an extra filter.
    pub fn first(&self, predicate: Option<Predicate>) -> QueryResult<Element> {
        self.filtered(predicate)
            .derive(Operation::Take(1))
            .to_list()?
            .into_iter()
            .next()
            .ok_or(QueryError::EmptySequence)
    }

    /// Like [`QueryBuilder::first`], returning `default` when there are no
    /// elements. Other errors still propagate.
    pub fn first_or_default(
        &self,
        predicate: Option<Predicate>,
        default: Element,
    ) -> QueryResult<Element> {
        match self.first(predicate) {
            Err(QueryError::EmptySequence) => Ok(default),
            other => other,
        }
    }

    /// The only element; fails on zero or several.
    pub fn single(&self, predicate: Option<Predicate>) -> QueryResult<Element> {
        let mut found = self
            .filtered(predicate)
            .derive(Operation::Take(2))
            .to_list()?;
        match found.len() {
            0 => Err(QueryError::EmptySequence),
            1 => Ok(found.remove(0)),
            _ => Err(QueryError::MultipleElements),
        }
    }

    /// Like [`QueryBuilder::single`], returning `default` when there are no
    /// elements. Several elements are still an error.
    pub fn single_or_default(
        &self,
        predicate: Option<Predicate>,
        default: Element,
    ) -> QueryResult<Element> {
        match self.single(predicate) {
            Err(QueryError::EmptySequence) => Ok(default),
            other => other,
        }
    }

    /// Last element, optionally after an extra filter.
    pub fn last(&self, predicate: Option<Predicate>) -> QueryResult<Element> {
        self.filtered(predicate)
            .to_list()?
            .pop()
            .ok_or(QueryError::EmptySequence)
    }

    /// Element at a zero-based position.
    pub fn element_at(&self, index: usize) -> QueryResult<Element> {
        self.derive(Operation::Skip(index))
            .derive(Operation::Take(1))
            .to_list()?
            .into_iter()
            .next()
            .ok_or_else(|| QueryError::InvalidArgument(format!("index {} is out of range", index)))
    }

    /// Number of elements.
    pub fn count(&self) -> QueryResult<usize> {
        Ok(self.to_list()?.len())
    }

    /// Whether any element matches (or exists, without a predicate).
    pub fn any(&self, predicate: Option<Predicate>) -> QueryResult<bool> {
        Ok(!self
            .filtered(predicate)
            .derive(Operation::Take(1))
            .to_list()?
            .is_empty())
    }

    /// Whether every element matches.
    pub fn all(&self, predicate: Predicate) -> QueryResult<bool> {
        Ok(!self.any(Some(predicate.negate()))?)
    }

    /// Group elements by key, in first-seen group order.
    pub fn group_by(&self, key: impl Into<KeySelector>) -> QueryResult<Vec<(Value, Vec<Element>)>> {
        Ok(group_elements(self.to_list()?, &key.into()))
    }

    /// Map elements by key. Duplicate keys are rejected.
    pub fn to_map(&self, key: impl Into<KeySelector>) -> QueryResult<BTreeMap<Value, Element>> {
        let key = key.into();
        let mut map = BTreeMap::new();
        for element in self.to_list()? {
            let k = key.key(&element);
            if map.contains_key(&k) {
                return Err(QueryError::InvalidArgument(format!("duplicate key {}", k)));
            }
            map.insert(k, element);
        }
        Ok(map)
    }

    /// Element with the smallest key; the first one wins ties.
    pub fn min_by(&self, key: impl Into<KeySelector>) -> QueryResult<Option<Element>> {
        let key = key.into();
        let mut best: Option<(Value, Element)> = None;
        for element in self.to_list()? {
            let k = key.key(&element);
            if best.as_ref().map_or(true, |(b, _)| k < *b) {
                best = Some((k, element));
            }
        }
        Ok(best.map(|(_, e)| e))
    }

    /// Element with the largest key; the first one wins ties.
    pub fn max_by(&self, key: impl Into<KeySelector>) -> QueryResult<Option<Element>> {
        let key = key.into();
        let mut best: Option<(Value, Element)> = None;
        for element in self.to_list()? {
            let k = key.key(&element);
            if best.as_ref().map_or(true, |(b, _)| k > *b) {
                best = Some((k, element));
            }
        }
        Ok(best.map(|(_, e)| e))
    }

    /// Description of the optimized plan.
    pub fn explain(&self) -> String {
        format!("{} on {}", self.plan.optimize().explain().trim_end(), self.element_type)
    }

    // Async terminal operations. Provider I/O is awaited; everything else
    // runs on the blocking pool so callers' tasks never block.

    async fn run_blocking<T, F>(&self, f: F) -> QueryResult<T>
    where
        T: Send + 'static,
        F: FnOnce(QueryBuilder) -> QueryResult<T> + Send + 'static,
    {
        let query = self.clone();
        let element_type = self.element_type.clone();
        tokio::task::spawn_blocking(move || f(query))
            .await
            .map_err(|e| QueryError::ExecutionFailure {
                operation: "spawn_blocking".to_string(),
                element_type,
                message: e.to_string(),
            })?
    }

    /// Async [`QueryBuilder::to_list`].
    pub async fn to_list_async(&self) -> QueryResult<Vec<Element>> {
        self.executor
            .execute_async(&self.plan, &self.element_type)
            .await
    }

    /// Async [`QueryBuilder::first`].
    pub async fn first_async(&self, predicate: Option<Predicate>) -> QueryResult<Element> {
        self.run_blocking(move |q| q.first(predicate)).await
    }

    /// Async [`QueryBuilder::first_or_default`].
    pub async fn first_or_default_async(
        &self,
        predicate: Option<Predicate>,
        default: Element,
    ) -> QueryResult<Element> {
        self.run_blocking(move |q| q.first_or_default(predicate, default))
            .await
    }

    /// Async [`QueryBuilder::single`].
    pub async fn single_async(&self, predicate: Option<Predicate>) -> QueryResult<Element> {
        self.run_blocking(move |q| q.single(predicate)).await
    }

    /// Async [`QueryBuilder::single_or_default`].
    pub async fn single_or_default_async(
        &self,
        predicate: Option<Predicate>,
        default: Element,
    ) -> QueryResult<Element> {
        self.run_blocking(move |q| q.single_or_default(predicate, default))
            .await
    }

    /// Async [`QueryBuilder::last`].
    pub async fn last_async(&self, predicate: Option<Predicate>) -> QueryResult<Element> {
        self.run_blocking(move |q| q.last(predicate)).await
    }

    /// Async [`QueryBuilder::count`].
    pub async fn count_async(&self) -> QueryResult<usize> {
        Ok(self.to_list_async().await?.len())
    }

    /// Async [`QueryBuilder::any`].
    pub async fn any_async(&self, predicate: Option<Predicate>) -> QueryResult<bool> {
        self.run_blocking(move |q| q.any(predicate)).await
    }

    /// Async [`QueryBuilder::all`].
    pub async fn all_async(&self, predicate: Predicate) -> QueryResult<bool> {
        self.run_blocking(move |q| q.all(predicate)).await
    }

    /// Async [`QueryBuilder::group_by`].
    pub async fn group_by_async(
        &self,
        key: impl Into<KeySelector>,
    ) -> QueryResult<Vec<(Value, Vec<Element>)>> {
        let key = key.into();
        let elements = self.to_list_async().await?;
        Ok(group_elements(elements, &key))
    }

    /// Async [`QueryBuilder::to_map`].
    pub async fn to_map_async(
        &self,
        key: impl Into<KeySelector>,
    ) -> QueryResult<BTreeMap<Value, Element>> {
        let key = key.into();
        self.run_blocking(move |q| q.to_map(key)).await
    }

    /// Stream results in batches of `batch_size` over a bounded channel.
    ///
    /// Must be called inside a tokio runtime. The query runs once; a failure
    /// is delivered as the only item. Dropping the receiver stops delivery.
    pub fn stream_batches(
        &self,
        batch_size: usize,
    ) -> QueryResult<mpsc::Receiver<QueryResult<Vec<Element>>>> {
        if batch_size == 0 {
            return Err(QueryError::InvalidArgument(
                "batch size must be > 0".to_string(),
            ));
        }
        let handle = tokio::runtime::Handle::try_current().map_err(|e| {
            QueryError::ExecutionFailure {
                operation: "stream".to_string(),
                element_type: self.element_type.clone(),
                message: e.to_string(),
            }
        })?;

        let capacity = self.executor.config().stream_channel_capacity.max(1);
        let (tx, rx) = mpsc::channel(capacity);
        let query = self.clone();
        handle.spawn(async move {
            let elements = match query.to_list_async().await {
                Ok(elements) => elements,
                Err(e) => {
                    let _ = tx.send(Err(e)).await;
                    return;
                }
            };
            for chunk in elements.chunks(batch_size) {
                if tx.send(Ok(chunk.to_vec())).await.is_err() {
                    debug!("stream receiver dropped");
                    return;
                }
            }
        });
        Ok(rx)
    }
}

/// Group elements by key, preserving first-seen group order.
pub(crate) fn group_elements(elements: Vec<Element>, key: &KeySelector) -> Vec<(Value, Vec<Element>)> {
    let mut groups: Vec<(Value, Vec<Element>)> = Vec::new();
    let mut index: std::collections::HashMap<Value, usize> = std::collections::HashMap::new();
    for element in elements {
        let k = key.key(&element);
        match index.get(&k) {
            Some(&i) => groups[i].1.push(element),
            None => {
                index.insert(k.clone(), groups.len());
                groups.push((k, vec![element]));
            }
        }
    }
    groups
}

//! Query executor: runs plans against a provider through the result cache.
//!
//! Execution optimizes the plan, derives a cache key from the optimized
//! plan's content hash, and only touches the provider on a miss. Small
//! results are written back with a dependency on their element type so that
//! a change to that type drops them.

use std::collections::HashSet;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use rayon::prelude::*;
use tracing::{debug, instrument, warn};

use super::error::{QueryError, QueryResult};
use super::plan::{Operation, QueryPlan};
use super::predicate::{KeySelector, Predicate, Projection};
use crate::cache::{CacheKey, CacheManager, ALL_TYPES_DEPENDENCY};
use crate::config::QueryConfig;
use crate::model::{Element, ElementId, Value};
use crate::provider::ElementProvider;

/// Element type used for queries over every element.
pub const ALL_TYPES: &str = "*";

/// Cache holding query results.
pub type ResultCache = CacheManager<Arc<Vec<Element>>>;

/// Executes query plans.
///
/// Cheap to clone; clones share the provider and the cache.
#[derive(Clone)]
pub struct QueryExecutor {
    provider: Arc<dyn ElementProvider>,
    cache: Arc<ResultCache>,
    config: QueryConfig,
}

impl QueryExecutor {
    /// Create an executor over a provider and a result cache.
    pub fn new(
        provider: Arc<dyn ElementProvider>,
        cache: Arc<ResultCache>,
        config: QueryConfig,
    ) -> Self {
        Self {
            provider,
            cache,
            config,
        }
    }

    /// The element provider.
    pub fn provider(&self) -> &Arc<dyn ElementProvider> {
        &self.provider
    }

    /// The result cache.
    pub fn cache(&self) -> &Arc<ResultCache> {
        &self.cache
    }

    /// The executor configuration.
    pub fn config(&self) -> &QueryConfig {
        &self.config
    }

    /// Cache key for the optimized form of `plan`.
    pub fn cache_key(plan: &QueryPlan, element_type: &str) -> CacheKey {
        CacheKey::for_query(element_type, plan.optimize().content_hash())
    }

    /// Execute a plan against elements of `element_type` ([`ALL_TYPES`] for all).
    #[instrument(skip(self, plan), fields(ops = plan.len()))]
    pub fn execute(&self, plan: &QueryPlan, element_type: &str) -> QueryResult<Vec<Element>> {
        let optimized = plan.optimize();
        let key = CacheKey::for_query(element_type, optimized.content_hash());

        if let Some(cached) = self.cache.get(&key) {
            debug!(key = %key, "query cache hit");
            return Ok(cached.as_ref().clone());
        }

        let base = self.fetch(element_type)?;
        let result = apply_plan(&optimized, base, element_type)?;
        self.store(&key, element_type, &result);
        Ok(result)
    }

    /// Execute a plan, awaiting provider I/O and running the plan on the
    /// blocking pool.
    pub async fn execute_async(
        &self,
        plan: &QueryPlan,
        element_type: &str,
    ) -> QueryResult<Vec<Element>> {
        let optimized = plan.optimize();
        let key = CacheKey::for_query(element_type, optimized.content_hash());

        if let Some(cached) = self.cache.get(&key) {
            debug!(key = %key, "query cache hit");
            return Ok(cached.as_ref().clone());
        }

        let base = if element_type == ALL_TYPES {
            self.provider.get_all_elements_async().await
        } else {
            self.provider.get_elements_of_type_async(element_type).await
        }
        .map_err(|e| QueryError::provider(element_type, "fetch", e))?;

        let owned_type = element_type.to_string();
        let result = tokio::task::spawn_blocking(move || apply_plan(&optimized, base, &owned_type))
            .await
            .map_err(|e| QueryError::ExecutionFailure {
                operation: "spawn_blocking".to_string(),
                element_type: element_type.to_string(),
                message: e.to_string(),
            })??;

        self.store(&key, element_type, &result);
        Ok(result)
    }

    /// Drop cached results that depend on `element_type`, or every cached
    /// result when `None`.
    pub fn invalidate(&self, element_type: Option<&str>) -> usize {
        match element_type {
            Some(t) if t != ALL_TYPES => {
                self.cache
                    .invalidate_by_dependency(&CacheKey::type_dependency(t))
                    + self.cache.invalidate_by_dependency(ALL_TYPES_DEPENDENCY)
            }
            _ => self.cache.clear(),
        }
    }

    fn fetch(&self, element_type: &str) -> QueryResult<Vec<Element>> {
        let fetched = if element_type == ALL_TYPES {
            self.provider.get_all_elements()
        } else {
            self.provider.get_elements_of_type(element_type)
        };
        fetched.map_err(|e| QueryError::provider(element_type, "fetch", e))
    }

    fn store(&self, key: &CacheKey, element_type: &str, result: &[Element]) {
        if result.len() >= self.config.result_cache_threshold {
            debug!(len = result.len(), "query result too large to cache");
            return;
        }
        let dependency = if element_type == ALL_TYPES {
            ALL_TYPES_DEPENDENCY.to_string()
        } else {
            CacheKey::type_dependency(element_type)
        };
        if !self.cache.set(
            key,
            Arc::new(result.to_vec()),
            self.config.result_ttl,
            [dependency],
        ) {
            warn!(key = %key, "query result was not cached");
        }
    }
}

/// Apply every operation of `plan` in order.
///
/// A panic inside a user closure is reported as an execution failure naming
/// the operation that raised it.
pub fn apply_plan(
    plan: &QueryPlan,
    elements: Vec<Element>,
    element_type: &str,
) -> QueryResult<Vec<Element>> {
    let parallel = plan.parallel_execution();
    let mut current = elements;
    for op in plan.operations() {
        let input = current;
        current = panic::catch_unwind(AssertUnwindSafe(move || apply_operation(op, input, parallel)))
            .map_err(|payload| QueryError::ExecutionFailure {
                operation: op.name().to_string(),
                element_type: element_type.to_string(),
                message: panic_message(payload.as_ref()),
            })?;
    }
    Ok(current)
}

fn apply_operation(op: &Operation, elements: Vec<Element>, parallel: bool) -> Vec<Element> {
    match op {
        Operation::Filter(predicate) => filter(predicate, elements, parallel),
        Operation::Project(projection) => project(projection, elements, parallel),
        Operation::SortAsc(key) => sort(key, elements, false),
        Operation::SortDesc(key) => sort(key, elements, true),
        Operation::Skip(n) => elements.into_iter().skip(*n).collect(),
        Operation::Take(n) => {
            let mut elements = elements;
            elements.truncate(*n);
            elements
        }
        Operation::Distinct(None) => {
            let mut seen: HashSet<ElementId> = HashSet::new();
            elements.into_iter().filter(|e| seen.insert(e.id)).collect()
        }
        Operation::Distinct(Some(key)) => {
            let mut seen: HashSet<Value> = HashSet::new();
            elements
                .into_iter()
                .filter(|e| seen.insert(key.key(e)))
                .collect()
        }
    }
}

fn filter(predicate: &Predicate, elements: Vec<Element>, parallel: bool) -> Vec<Element> {
    if parallel {
        elements
            .into_par_iter()
            .filter(|e| predicate.evaluate(e))
            .collect()
    } else {
        elements
            .into_iter()
            .filter(|e| predicate.evaluate(e))
            .collect()
    }
}

fn project(projection: &Projection, elements: Vec<Element>, parallel: bool) -> Vec<Element> {
    if parallel {
        elements.par_iter().map(|e| projection.apply(e)).collect()
    } else {
        elements.iter().map(|e| projection.apply(e)).collect()
    }
}

fn sort(key: &KeySelector, elements: Vec<Element>, descending: bool) -> Vec<Element> {
    let mut keyed: Vec<(Value, Element)> = elements.into_iter().map(|e| (key.key(&e), e)).collect();
    // sort_by is stable; reversing the comparator keeps ties in input order.
    if descending {
        keyed.sort_by(|a, b| b.0.cmp(&a.0));
    } else {
        keyed.sort_by(|a, b| a.0.cmp(&b.0));
    }
    keyed.into_iter().map(|(_, e)| e).collect()
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "operation panicked".to_string()
    }
}

//! Integration tests for the query engine.

use std::sync::Arc;

use elementorm_core::cache::CacheManager;
use elementorm_core::config::{CacheConfig, QueryConfig};
use elementorm_core::model::{Element, ElementId, Value};
use elementorm_core::provider::InMemoryProvider;
use elementorm_core::query::{
    ElementSet, Operation, Predicate, Projection, QueryBuilder, QueryError, QueryExecutor,
};
use tracing_subscriber::EnvFilter;

struct TestContext {
    provider: Arc<InMemoryProvider>,
    executor: QueryExecutor,
}

impl TestContext {
    fn new(elements: Vec<Element>) -> Self {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
        let provider = InMemoryProvider::with_elements(elements).shared();
        let executor = QueryExecutor::new(
            provider.clone(),
            Arc::new(CacheManager::new(CacheConfig::default())),
            QueryConfig::default(),
        );
        Self { provider, executor }
    }

    fn query(&self, element_type: &str) -> QueryBuilder {
        QueryBuilder::new(self.executor.clone(), element_type)
    }
}

/// 20 walls, 7 of them taller than 10, alternating between two levels.
fn walls() -> Vec<Element> {
    let heights = [
        5, 17, 3, 12, 9, 20, 1, 8, 15, 2, 10, 6, 18, 4, 7, 11, 0, 14, 3, 9,
    ];
    heights
        .iter()
        .enumerate()
        .map(|(i, h)| {
            Element::new(i as i64 + 1, "Wall")
                .with_field("height", *h)
                .with_field("level", if i % 2 == 0 { "L1" } else { "L2" })
        })
        .collect()
}

fn tall_count(elements: &[Element]) -> usize {
    elements
        .iter()
        .filter(|e| e.get("height").and_then(Value::as_i64).unwrap_or(0) > 10)
        .count()
}

#[test]
fn test_scenario_where_order_take() {
    let data = walls();
    assert_eq!(tall_count(&data), 7);
    let ctx = TestContext::new(data);

    let result = ctx
        .query("Wall")
        .where_(Predicate::gt("height", 10))
        .order_by("height")
        .take(3)
        .unwrap()
        .to_list()
        .unwrap();

    let heights: Vec<i64> = result
        .iter()
        .map(|e| e.get("height").and_then(Value::as_i64).unwrap())
        .collect();
    assert_eq!(heights, vec![11, 12, 14]);
}

#[test]
fn test_plan_immutability() {
    let ctx = TestContext::new(walls());
    let base = ctx.query("Wall").where_(Predicate::eq("level", "L1"));
    let before = base.plan().clone();

    let derived = base.order_by_descending("height");
    assert_eq!(base.plan(), &before);
    assert_eq!(derived.plan().len(), before.len() + 1);
    assert_eq!(&derived.plan().operations()[..before.len()], before.operations());
    assert!(matches!(
        derived.plan().operations().last(),
        Some(Operation::SortDesc(_))
    ));
}

#[test]
fn test_optimize_is_stable() {
    let ctx = TestContext::new(walls());
    let plan = ctx
        .query("Wall")
        .order_by("height")
        .select_fields(["height", "level"])
        .where_(Predicate::gt("height", 3))
        .skip(1)
        .unwrap()
        .where_(Predicate::eq("level", "L2"))
        .plan()
        .clone();

    let once = plan.optimize();
    let twice = once.optimize();
    assert_eq!(once.canonical(), twice.canonical());
    assert_eq!(once.content_hash(), twice.content_hash());
    // The first filter moves ahead of the sort and projection; the one after
    // skip stays put.
    assert!(matches!(once.operations()[0], Operation::Filter(_)));
    assert!(matches!(once.operations()[4], Operation::Filter(_)));
}

#[test]
fn test_single_multiplicity() {
    let ctx = TestContext::new(walls());
    let q = ctx.query("Wall");

    assert!(matches!(
        q.single(Some(Predicate::gt("height", 100))),
        Err(QueryError::EmptySequence)
    ));
    assert_eq!(
        q.single(Some(Predicate::eq("height", 20))).unwrap().id,
        ElementId(6)
    );
    assert!(matches!(
        q.single(Some(Predicate::eq("height", 9))),
        Err(QueryError::MultipleElements)
    ));
}

#[test]
fn test_repeated_query_hits_cache() {
    let ctx = TestContext::new(walls());
    let q = ctx.query("Wall").where_(Predicate::eq("level", "L1"));
    let first = q.to_list().unwrap();

    // Provider changes are invisible until the type is invalidated.
    ctx.provider.upsert(Element::new(100, "Wall").with_field("level", "L1"));
    assert_eq!(q.to_list().unwrap(), first);
    assert_eq!(ctx.executor.cache().stats().hits(), 1);

    assert_eq!(ctx.executor.invalidate(Some("Wall")), 1);
    assert_eq!(q.to_list().unwrap().len(), first.len() + 1);
}

#[test]
fn test_projection_and_grouping() {
    let ctx = TestContext::new(walls());
    let groups = ctx.query("Wall").group_by("level").unwrap();
    assert_eq!(groups.len(), 2);
    assert_eq!(groups[0].0, Value::from("L1"));
    assert_eq!(groups[0].1.len(), 10);

    let projected = ctx
        .query("Wall")
        .select(Projection::fields(["height"]))
        .first(None)
        .unwrap();
    assert!(projected.get("level").is_none());
    assert_eq!(projected.id, ElementId(1));
}

#[test]
fn test_element_set_over_query() {
    let ctx = TestContext::new(walls());
    let mut set = ElementSet::from(ctx.query("Wall"))
        .where_(Predicate::le("height", 5))
        .unwrap();
    assert!(!set.is_materialized());
    assert_eq!(set.count(None).unwrap(), 7);

    set.ensure_materialized().unwrap();
    let mut others = ElementSet::from(ctx.query("Wall").where_(Predicate::eq("level", "L1")));
    let mut both = set.intersect(&mut others).unwrap();
    assert!(both
        .iter()
        .unwrap()
        .all(|e| e.get("level") == Some(&Value::from("L1"))));
}

#[tokio::test]
async fn test_async_terminals_match_sync() {
    let ctx = TestContext::new(walls());
    let q = ctx
        .query("Wall")
        .where_(Predicate::gt("height", 4))
        .order_by("height");

    let sync = q.to_list().unwrap();
    ctx.executor.invalidate(None);
    let async_result = q.to_list_async().await.unwrap();
    assert_eq!(sync, async_result);
    assert_eq!(q.count_async().await.unwrap(), sync.len());
}

#[tokio::test]
async fn test_stream_batches() {
    let ctx = TestContext::new(walls());
    let mut rx = ctx.query("Wall").stream_batches(8).unwrap();
    let mut sizes = Vec::new();
    while let Some(batch) = rx.recv().await {
        sizes.push(batch.unwrap().len());
    }
    assert_eq!(sizes, vec![8, 8, 4]);
}

//! End-to-end tests through the element context.

use std::sync::Arc;

use elementorm::{
    ContextConfig, Element, ElementContext, ElementId, Error, Predicate, RelationshipDefinition,
    TransactionError, ValidationError, Value,
};
use tracing_subscriber::EnvFilter;

struct TestContext {
    ctx: ElementContext,
}

impl TestContext {
    fn new() -> Self {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();

        let mut elements: Vec<Element> = (1..=20)
            .map(|i| {
                Element::new(i, "Wall")
                    .with_field("height", (i * 7) % 23)
                    .with_field("name", format!("W{}", i))
            })
            .collect();
        elements.extend((21..=24).map(|i| Element::new(i, "Door").with_field("host_id", 1)));

        let ctx = ElementContext::in_memory(elements, ContextConfig::default());
        ctx.register_relationship(RelationshipDefinition::one_to_many(
            "Wall", "doors", "Door", "host_id",
        ));
        Self { ctx }
    }

    fn wall(&self, id: i64) -> Element {
        self.ctx
            .single("Wall", Some(Predicate::eq("id", id)))
            .unwrap()
    }
}

#[test]
fn test_commit_invalidates_cached_queries() {
    let t = TestContext::new();
    let tall = Predicate::gt("height", 10);
    let before = t.ctx.where_("Wall", tall.clone()).count().unwrap();
    assert!(t.ctx.cache_stats().sets() > 0);

    // Wall 1 has height 7; raise it over the threshold.
    let wall = t.wall(1);
    t.ctx.attach(&wall).unwrap();
    let tx = t.ctx.transaction();
    tx.set_property(wall.id, "height", 50).unwrap();
    tx.commit().unwrap();

    assert_eq!(t.ctx.where_("Wall", tall).count().unwrap(), before + 1);
}

#[test]
fn test_nested_rollback_is_not_committed() {
    let t = TestContext::new();
    let wall = t.wall(2);
    t.ctx.attach(&wall).unwrap();

    let t1 = t.ctx.transaction();
    let t2 = t.ctx.transaction();
    t2.set_property(wall.id, "name", "nested").unwrap();
    t2.rollback().unwrap();
    t1.commit().unwrap();

    assert_eq!(t.wall(2).get("name"), Some(&Value::from("W2")));
}

#[test]
fn test_scope_rolls_back_on_error() {
    let t = TestContext::new();
    let wall = t.wall(3);
    t.ctx.attach(&wall).unwrap();

    let result: Result<(), Error> = t.ctx.scope(|tx| {
        tx.set_property(wall.id, "name", "changed")?;
        Err(Error::Validation(ValidationError::field("name", "rejected")))
    });
    assert!(matches!(result, Err(Error::Validation(_))));
    assert!(!t.ctx.has_changes());
    assert_eq!(t.wall(3).get("name"), Some(&Value::from("W3")));
}

#[test]
fn test_validator_blocks_commit() {
    let t = TestContext::new();
    t.ctx.set_validator(Arc::new(|e: &Element| match e.get("height") {
        Some(Value::Int(h)) if *h < 0 => Err(ValidationError::field("height", "must be >= 0")),
        _ => Ok(()),
    }));
    let wall = t.wall(4);
    t.ctx.attach(&wall).unwrap();

    let tx = t.ctx.transaction();
    tx.set_property(wall.id, "height", -1).unwrap();
    let err = tx.commit().unwrap_err();
    assert!(matches!(err, TransactionError::CommitFailure { .. }));
    assert_ne!(t.wall(4).get("height"), Some(&Value::Int(-1)));
}

#[tokio::test]
async fn test_relationships_follow_commits() {
    let t = TestContext::new();
    let wall = t.wall(1);
    assert_eq!(t.ctx.resolve(&wall, "doors").await.unwrap().len(), 4);

    let door = Element::new(21, "Door").with_field("host_id", 1);
    t.ctx.attach(&door).unwrap();
    t.ctx
        .relationships()
        .remove(t.ctx.tracker(), &wall, "doors", ElementId(21))
        .unwrap();
    assert_eq!(t.ctx.save_changes().unwrap(), 1);

    assert_eq!(t.ctx.resolve(&wall, "doors").await.unwrap().len(), 3);
}

#[tokio::test]
async fn test_batch_processor_over_queries() {
    let t = TestContext::new();
    let ids: Vec<i64> = (1..=20).collect();
    let executor = t.ctx.executor().clone();
    let report = t
        .ctx
        .batch_processor()
        .process(ids, move |id| {
            let executor = executor.clone();
            async move {
                elementorm::QueryBuilder::new(executor, "Wall")
                    .where_(Predicate::eq("id", id))
                    .single_async(None)
                    .await
            }
        })
        .await
        .unwrap();
    assert_eq!(report.successful.len(), 20);
    assert!(report.failed.is_empty());
}

#[tokio::test]
async fn test_scope_async_commits() {
    let t = TestContext::new();
    let wall = t.wall(5);
    t.ctx.attach(&wall).unwrap();

    let result: Result<bool, TransactionError> = t
        .ctx
        .scope_async(|tx| async move { tx.set_property(ElementId(5), "name", "async") })
        .await;
    assert!(result.unwrap());
    assert_eq!(t.wall(5).get("name"), Some(&Value::from("async")));
}

//! Logical query plans.

use std::fmt;

use super::cost;
use super::predicate::{KeySelector, Predicate, Projection};

/// One logical step of a query.
#[derive(Debug, Clone)]
pub enum Operation {
    /// Keep elements for which the predicate holds.
    Filter(Predicate),
    /// Map each element.
    Project(Projection),
    /// Stable ascending sort by key.
    SortAsc(KeySelector),
    /// Stable descending sort by key.
    SortDesc(KeySelector),
    /// Drop the first `n` elements.
    Skip(usize),
    /// Keep at most `n` elements.
    Take(usize),
    /// Drop duplicates: by element id, or by key with first-seen-wins.
    Distinct(Option<KeySelector>),
}

impl Operation {
    /// Short operation name used in error context and logs.
    pub fn name(&self) -> &'static str {
        match self {
            Operation::Filter(_) => "filter",
            Operation::Project(_) => "project",
            Operation::SortAsc(_) => "sort_asc",
            Operation::SortDesc(_) => "sort_desc",
            Operation::Skip(_) => "skip",
            Operation::Take(_) => "take",
            Operation::Distinct(_) => "distinct",
        }
    }

    fn is_filter(&self) -> bool {
        matches!(self, Operation::Filter(_))
    }

    /// Whether `filter` can be evaluated before this operation without
    /// changing the result.
    fn commutes_with_filter(&self, filter: &Predicate) -> bool {
        match self {
            Operation::SortAsc(_) | Operation::SortDesc(_) => true,
            Operation::Project(Projection::Fields(kept)) => {
                !contains_custom(filter)
                    && filter.referenced_fields().iter().all(|field| {
                        field == "id" || field == "element_type" || kept.contains(field)
                    })
            }
            _ => false,
        }
    }
}

fn contains_custom(predicate: &Predicate) -> bool {
    match predicate {
        Predicate::Custom(_) => true,
        Predicate::And(parts) | Predicate::Or(parts) => parts.iter().any(contains_custom),
        Predicate::Not(inner) => contains_custom(inner),
        _ => false,
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::Filter(p) => write!(f, "filter({})", p),
            Operation::Project(p) => write!(f, "project({})", p),
            Operation::SortAsc(k) => write!(f, "sort_asc({})", k),
            Operation::SortDesc(k) => write!(f, "sort_desc({})", k),
            Operation::Skip(n) => write!(f, "skip({})", n),
            Operation::Take(n) => write!(f, "take({})", n),
            Operation::Distinct(None) => write!(f, "distinct()"),
            Operation::Distinct(Some(k)) => write!(f, "distinct({})", k),
        }
    }
}

/// An immutable, ordered list of operations with a cost estimate.
///
/// Plans are values: [`QueryPlan::with_operation`] and
/// [`QueryPlan::optimize`] return new plans and leave `self` untouched, so a
/// plan can be shared by any number of derived queries.
#[derive(Debug, Clone, Default)]
pub struct QueryPlan {
    operations: Vec<Operation>,
    estimated_cost: f64,
    parallel_execution: bool,
}

impl QueryPlan {
    /// Create an empty plan.
    pub fn new() -> Self {
        Self::default()
    }

    /// Return a copy of this plan with `op` appended.
    pub fn with_operation(&self, op: Operation) -> Self {
        let mut operations = self.operations.clone();
        let estimated_cost = self.estimated_cost + cost::operation_weight(&op);
        operations.push(op);
        Self {
            operations,
            estimated_cost,
            parallel_execution: self.parallel_execution,
        }
    }

    /// Operations in execution order.
    pub fn operations(&self) -> &[Operation] {
        &self.operations
    }

    /// Accumulated cost estimate.
    pub fn estimated_cost(&self) -> f64 {
        self.estimated_cost
    }

    /// Whether filters and projections should run on the parallel pool.
    pub fn parallel_execution(&self) -> bool {
        self.parallel_execution
    }

    /// Number of operations.
    pub fn len(&self) -> usize {
        self.operations.len()
    }

    /// Check if the plan has no operations.
    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    /// Produce a reordered plan that filters as early as possible.
    ///
    /// Each filter moves left past sorts, and past field projections that
    /// keep every field the filter reads. Skip, take, distinct, mapping
    /// projections and other filters stop it, so results are unchanged and
    /// filters keep their relative order. The estimate is discounted and
    /// the parallel flag is set from the discounted estimate.
    pub fn optimize(&self) -> Self {
        // Filters never pass skip, take, distinct or a mapping projection:
        // doing so would change which elements reach them.
        let mut reordered: Vec<Operation> = Vec::with_capacity(self.operations.len());
        for op in &self.operations {
            if let Operation::Filter(predicate) = op {
                let mut at = reordered.len();
                while at > 0 && reordered[at - 1].commutes_with_filter(predicate) {
                    at -= 1;
                }
                reordered.insert(at, op.clone());
            } else {
                reordered.push(op.clone());
            }
        }

        let estimated_cost = cost::estimate(&reordered) * cost::OPTIMIZATION_DISCOUNT;
        Self {
            operations: reordered,
            estimated_cost,
            parallel_execution: cost::should_parallelize(estimated_cost),
        }
    }

    /// Canonical string form: operations joined by `|`.
    pub fn canonical(&self) -> String {
        self.operations
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("|")
    }

    /// Stable content hash of the operations (hex blake3 of the canonical form).
    pub fn content_hash(&self) -> String {
        hex::encode(blake3::hash(self.canonical().as_bytes()).as_bytes())
    }

    /// Number of filter operations.
    pub fn filter_count(&self) -> usize {
        self.operations.iter().filter(|op| op.is_filter()).count()
    }

    /// Human-readable description of the plan.
    pub fn explain(&self) -> String {
        let mut out = format!(
            "QueryPlan (cost={:.2}, parallel={})\n",
            self.estimated_cost, self.parallel_execution
        );
        if self.operations.is_empty() {
            out.push_str("  <scan>\n");
        }
        for (i, op) in self.operations.iter().enumerate() {
            out.push_str(&format!("  {}. {}\n", i + 1, op));
        }
        out
    }
}

impl fmt::Display for QueryPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.canonical())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(plan: &QueryPlan) -> Vec<&'static str> {
        plan.operations().iter().map(Operation::name).collect()
    }

    #[test]
    fn test_with_operation_leaves_source_untouched() {
        let base = QueryPlan::new().with_operation(Operation::Filter(Predicate::gt("height", 1)));
        let derived = base.with_operation(Operation::Take(3));

        assert_eq!(base.len(), 1);
        assert_eq!(derived.len(), 2);
        assert_eq!(derived.canonical(), format!("{}|take(3)", base.canonical()));
        assert!((derived.estimated_cost() - 2.1).abs() < 1e-9);
    }

    #[test]
    fn test_optimize_hoists_filters_before_projection_and_sort() {
        let plan = QueryPlan::new()
            .with_operation(Operation::Project(Projection::fields(["height", "level"])))
            .with_operation(Operation::SortAsc(KeySelector::field("height")))
            .with_operation(Operation::Filter(Predicate::gt("height", 10)));

        let optimized = plan.optimize();
        assert_eq!(names(&optimized), vec!["filter", "project", "sort_asc"]);
        assert!((optimized.estimated_cost() - 6.0 * 0.8).abs() < 1e-9);
        assert!(!optimized.parallel_execution());
        // Source plan is unchanged.
        assert_eq!(names(&plan), vec!["project", "sort_asc", "filter"]);
    }

    #[test]
    fn test_optimize_respects_barriers() {
        let plan = QueryPlan::new()
            .with_operation(Operation::SortAsc(KeySelector::field("height")))
            .with_operation(Operation::Take(5))
            .with_operation(Operation::Filter(Predicate::gt("height", 10)));
        assert_eq!(names(&plan.optimize()), vec!["sort_asc", "take", "filter"]);

        let skipped = QueryPlan::new()
            .with_operation(Operation::Skip(2))
            .with_operation(Operation::Filter(Predicate::gt("height", 10)));
        assert_eq!(names(&skipped.optimize()), vec!["skip", "filter"]);

        let mapped = QueryPlan::new()
            .with_operation(Operation::Project(Projection::map("rename", |e| e.clone())))
            .with_operation(Operation::Filter(Predicate::gt("height", 10)));
        assert_eq!(names(&mapped.optimize()), vec!["project", "filter"]);

        let dropped = QueryPlan::new()
            .with_operation(Operation::Project(Projection::fields(["name"])))
            .with_operation(Operation::Filter(Predicate::is_null("height")));
        assert_eq!(names(&dropped.optimize()), vec!["project", "filter"]);
    }

    #[test]
    fn test_optimize_is_idempotent() {
        let plan = QueryPlan::new()
            .with_operation(Operation::Project(Projection::fields(["height"])))
            .with_operation(Operation::Filter(Predicate::gt("height", 1)))
            .with_operation(Operation::SortDesc(KeySelector::field("height")))
            .with_operation(Operation::Filter(Predicate::lt("height", 9)))
            .with_operation(Operation::Distinct(None));

        let once = plan.optimize();
        let twice = once.optimize();
        assert_eq!(once.canonical(), twice.canonical());
        assert_eq!(
            names(&once),
            vec!["filter", "filter", "project", "sort_desc", "distinct"]
        );
    }

    #[test]
    fn test_parallel_flag_from_discounted_cost() {
        let mut plan = QueryPlan::new();
        for i in 0..7 {
            plan = plan.with_operation(Operation::Filter(Predicate::gt("height", i)));
        }
        // 14.0 * 0.8 = 11.2
        assert!(plan.optimize().parallel_execution());
        assert!(!plan.parallel_execution());
    }

    #[test]
    fn test_content_hash_is_stable_and_distinct() {
        let a = QueryPlan::new().with_operation(Operation::Filter(Predicate::gt("height", 10)));
        let b = QueryPlan::new().with_operation(Operation::Filter(Predicate::gt("height", 10)));
        let c = QueryPlan::new().with_operation(Operation::Filter(Predicate::gt("height", 11)));

        assert_eq!(a.content_hash(), b.content_hash());
        assert_ne!(a.content_hash(), c.content_hash());
        assert_eq!(a.content_hash().len(), 64);
    }

    #[test]
    fn test_explain() {
        let plan = QueryPlan::new().with_operation(Operation::Take(1));
        let text = plan.explain();
        assert!(text.contains("1. take(1)"));
        assert!(QueryPlan::new().explain().contains("<scan>"));
    }
}

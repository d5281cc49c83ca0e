//! Cost model for query plans.
//!
//! Each operation carries a fixed weight; a plan's estimate is the sum of its
//! operations' weights. Optimized plans are discounted and flagged for
//! parallel execution once the estimate crosses a threshold.

use super::plan::Operation;

/// Weight of a filter operation.
pub const FILTER_WEIGHT: f64 = 2.0;
/// Weight of a projection.
pub const PROJECT_WEIGHT: f64 = 1.0;
/// Weight of an ascending or descending sort.
pub const SORT_WEIGHT: f64 = 3.0;
/// Weight of skip and take.
pub const SLICE_WEIGHT: f64 = 0.1;
/// Weight of distinct.
pub const DISTINCT_WEIGHT: f64 = 2.5;

/// Factor applied to the estimate of an optimized plan.
pub const OPTIMIZATION_DISCOUNT: f64 = 0.8;

/// Optimized plans estimated above this run filters and projections in parallel.
pub const PARALLEL_COST_THRESHOLD: f64 = 10.0;

/// Cost weight of a single operation.
pub fn operation_weight(op: &Operation) -> f64 {
    match op {
        Operation::Filter(_) => FILTER_WEIGHT,
        Operation::Project(_) => PROJECT_WEIGHT,
        Operation::SortAsc(_) | Operation::SortDesc(_) => SORT_WEIGHT,
        Operation::Skip(_) | Operation::Take(_) => SLICE_WEIGHT,
        Operation::Distinct(_) => DISTINCT_WEIGHT,
    }
}

/// Summed weight of a sequence of operations.
pub fn estimate(operations: &[Operation]) -> f64 {
    operations.iter().map(operation_weight).sum()
}

/// Whether an optimized plan with this estimate should run in parallel.
pub fn should_parallelize(cost: f64) -> bool {
    cost > PARALLEL_COST_THRESHOLD
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::{KeySelector, Predicate, Projection};

    #[test]
    fn test_operation_weights() {
        let ops = vec![
            Operation::Filter(Predicate::gt("height", 1)),
            Operation::Project(Projection::fields(["height"])),
            Operation::SortAsc(KeySelector::field("height")),
            Operation::Skip(1),
            Operation::Take(2),
            Operation::Distinct(None),
        ];
        let total = estimate(&ops);
        assert!((total - 8.7).abs() < 1e-9);
    }

    #[test]
    fn test_parallel_threshold_is_exclusive() {
        assert!(!should_parallelize(10.0));
        assert!(should_parallelize(10.01));
    }
}

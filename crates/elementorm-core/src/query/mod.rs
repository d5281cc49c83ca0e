//! Lazy query engine.
//!
//! Queries are built as immutable [`QueryPlan`]s by a [`QueryBuilder`] and
//! run by a [`QueryExecutor`], which consults the result cache before
//! pulling elements from the provider.

mod builder;
mod cost;
mod element_set;
mod error;
mod executor;
mod function;
mod plan;
mod predicate;

pub use builder::QueryBuilder;
pub use element_set::{BatchUpdateReport, ElementSet};
pub use error::{QueryError, QueryResult};
pub use executor::{apply_plan, QueryExecutor, ResultCache, ALL_TYPES};
pub use function::ElementFn;
pub use plan::{Operation, QueryPlan};
pub use predicate::{like_match, KeySelector, Predicate, Projection};

pub use cost::{
    operation_weight, DISTINCT_WEIGHT, FILTER_WEIGHT, OPTIMIZATION_DISCOUNT,
    PARALLEL_COST_THRESHOLD, PROJECT_WEIGHT, SLICE_WEIGHT, SORT_WEIGHT,
};

//! Built-in rewrite rules.
//!
//! Each rule lives in its own file and implements
//! [`OptimizerRule`](crate::optimizer::OptimizerRule). Rules are stateless unit
//! structs; the driver instantiates them through
//! [`RuleId::build`](crate::optimizer::RuleId::build) and runs them in
//! registry order.

mod condition;
mod covered_filters;
mod fold_constants;
mod index_sort;
mod inline_calculations;
mod or_to_in;
mod projections;
mod redundant_or;
mod redundant_sorts;
mod unnecessary_calculations;
mod unnecessary_filters;
mod use_indexes;

pub use covered_filters::RemoveFiltersCoveredByIndex;
pub use fold_constants::FoldConstantExpressions;
pub use index_sort::{covered_sort_prefix, SortPrefix, UseIndexForSort};
pub use inline_calculations::RemoveRedundantCalculations;
pub use or_to_in::ReplaceOrWithIn;
pub use projections::ReduceExtractionToProjection;
pub use redundant_or::{collapse_redundant_or, RemoveRedundantOr};
pub use redundant_sorts::RemoveRedundantSorts;
pub use unnecessary_calculations::RemoveUnnecessaryCalculations;
pub use unnecessary_filters::RemoveUnnecessaryFilters;
pub use use_indexes::UseIndexes;

use crate::error::{OptimizerError, PlanError};

/// Wraps a structural edit failure with the name of the rule performing it.
pub(crate) fn edit_failed(rule: &'static str) -> impl FnOnce(PlanError) -> OptimizerError {
    move |source| OptimizerError::Rule { rule, source }
}

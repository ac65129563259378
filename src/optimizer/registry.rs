//! The fixed, ordered registry of built-in rules.

use std::fmt;
use std::str::FromStr;

use super::rule::OptimizerRule;
use crate::error::ConfigError;
use crate::rules;

/// Identifier of a built-in rule. Declaration order is execution order.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RuleId {
    /// Folds constant sub-expressions into literals.
    FoldConstantExpressions,
    /// Inlines single-use pure calculations into their consumer.
    RemoveRedundantCalculations,
    /// Drops always-true filters; turns always-false filters into no-results.
    RemoveUnnecessaryFilters,
    /// Collapses same-direction OR'ed range comparisons.
    RemoveRedundantOr,
    /// Merges OR'ed equality comparisons on one operand into an IN.
    ReplaceOrWithIn,
    /// Removes sorts made redundant by a later sort on the same keys.
    RemoveRedundantSorts,
    /// Removes calculations and subqueries whose result is never read.
    RemoveUnnecessaryCalculations,
    /// Replaces full collection scans with index scans for filters.
    UseIndexes,
    /// Drops filter conditions an index scan already enforces.
    RemoveFiltersCoveredByIndex,
    /// Uses index order to remove or group sorts.
    UseIndexForSort,
    /// Computes projections and covering flags for scans.
    ReduceExtractionToProjection,
}

impl RuleId {
    /// Number of registered rules.
    pub const COUNT: usize = 11;

    /// All rules in execution order.
    pub const ALL: [RuleId; RuleId::COUNT] = [
        RuleId::FoldConstantExpressions,
        RuleId::RemoveRedundantCalculations,
        RuleId::RemoveUnnecessaryFilters,
        RuleId::RemoveRedundantOr,
        RuleId::ReplaceOrWithIn,
        RuleId::RemoveRedundantSorts,
        RuleId::RemoveUnnecessaryCalculations,
        RuleId::UseIndexes,
        RuleId::RemoveFiltersCoveredByIndex,
        RuleId::UseIndexForSort,
        RuleId::ReduceExtractionToProjection,
    ];

    /// Directive and report name.
    pub fn name(self) -> &'static str {
        match self {
            RuleId::FoldConstantExpressions => "fold-constant-expressions",
            RuleId::RemoveRedundantCalculations => "remove-redundant-calculations",
            RuleId::RemoveUnnecessaryFilters => "remove-unnecessary-filters",
            RuleId::RemoveRedundantOr => "remove-redundant-or",
            RuleId::ReplaceOrWithIn => "replace-or-with-in",
            RuleId::RemoveRedundantSorts => "remove-redundant-sorts",
            RuleId::RemoveUnnecessaryCalculations => "remove-unnecessary-calculations",
            RuleId::UseIndexes => "use-indexes",
            RuleId::RemoveFiltersCoveredByIndex => "remove-filters-covered-by-index",
            RuleId::UseIndexForSort => "use-index-for-sort",
            RuleId::ReduceExtractionToProjection => "reduce-extraction-to-projection",
        }
    }

    /// Position in the registry.
    pub fn index(self) -> usize {
        self as usize
    }

    /// Looks a rule up by name.
    pub fn from_name(name: &str) -> Option<RuleId> {
        RuleId::ALL.into_iter().find(|id| id.name() == name)
    }

    /// Instantiates the rule.
    pub fn build(self) -> Box<dyn OptimizerRule> {
        match self {
            RuleId::FoldConstantExpressions => Box::new(rules::FoldConstantExpressions),
            RuleId::RemoveRedundantCalculations => Box::new(rules::RemoveRedundantCalculations),
            RuleId::RemoveUnnecessaryFilters => Box::new(rules::RemoveUnnecessaryFilters),
            RuleId::RemoveRedundantOr => Box::new(rules::RemoveRedundantOr),
            RuleId::ReplaceOrWithIn => Box::new(rules::ReplaceOrWithIn),
            RuleId::RemoveRedundantSorts => Box::new(rules::RemoveRedundantSorts),
            RuleId::RemoveUnnecessaryCalculations => {
                Box::new(rules::RemoveUnnecessaryCalculations)
            }
            RuleId::UseIndexes => Box::new(rules::UseIndexes),
            RuleId::RemoveFiltersCoveredByIndex => Box::new(rules::RemoveFiltersCoveredByIndex),
            RuleId::UseIndexForSort => Box::new(rules::UseIndexForSort),
            RuleId::ReduceExtractionToProjection => Box::new(rules::ReduceExtractionToProjection),
        }
    }
}

impl fmt::Display for RuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for RuleId {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        RuleId::from_name(s).ok_or_else(|| ConfigError::UnknownRule { name: s.to_owned() })
    }
}

//! Rule trait and the context handed to each rule application.

use crate::catalog::CatalogSnapshot;
use crate::error::Result;
use crate::plan::Plan;

/// A plan rewrite.
///
/// A rule edits the plan in place and reports whether it changed anything.
/// It must leave the plan valid (see [`Plan::validate`]) and must report
/// `changed` truthfully; the driver checks both when invariant checks are on.
/// Applying a rule to its own output must eventually report no change.
pub trait OptimizerRule: Send + Sync {
    /// Stable rule name used in directives and in the applied-rules list.
    fn name(&self) -> &'static str;

    /// One-line description for tooling.
    fn description(&self) -> &'static str {
        "No description available"
    }

    /// Applies the rule once.
    fn apply(&self, plan: &mut Plan, ctx: &mut RuleContext<'_>) -> Result<Transformed>;
}

/// Outcome of one rule application.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transformed {
    /// Whether the plan was actually changed.
    pub changed: bool,
}

impl Transformed {
    /// The plan was changed.
    pub fn yes() -> Self {
        Self { changed: true }
    }

    /// The plan was left untouched.
    pub fn no() -> Self {
        Self { changed: false }
    }
}

impl From<bool> for Transformed {
    fn from(changed: bool) -> Self {
        Self { changed }
    }
}

/// Read-only catalog access plus a warning sink for one optimizer run.
pub struct RuleContext<'a> {
    catalog: &'a CatalogSnapshot,
    warnings: &'a mut Vec<String>,
}

impl<'a> RuleContext<'a> {
    /// Creates a context over `catalog` that appends to `warnings`.
    pub fn new(catalog: &'a CatalogSnapshot, warnings: &'a mut Vec<String>) -> Self {
        Self { catalog, warnings }
    }

    /// Catalog snapshot captured at the start of the run.
    pub fn catalog(&self) -> &'a CatalogSnapshot {
        self.catalog
    }

    /// Records a warning once; repeats are dropped.
    pub fn warn(&mut self, message: impl Into<String>) {
        let message = message.into();
        if !self.warnings.contains(&message) {
            self.warnings.push(message);
        }
    }
}

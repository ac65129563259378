use tracing::trace;

use super::edit_failed;
use crate::error::Result;
use crate::optimizer::{OptimizerRule, RuleContext, Transformed};
use crate::plan::{NodeId, NodeKind, Plan};

const NAME: &str = "remove-unnecessary-filters";

/// Drops filters whose condition is constantly true and turns filters that
/// are constantly false into a no-results node.
pub struct RemoveUnnecessaryFilters;

impl OptimizerRule for RemoveUnnecessaryFilters {
    fn name(&self) -> &'static str {
        NAME
    }

    fn description(&self) -> &'static str {
        "Removes always-true filters and short-circuits always-false ones"
    }

    fn apply(&self, plan: &mut Plan, _ctx: &mut RuleContext<'_>) -> Result<Transformed> {
        let constant: Vec<(NodeId, bool)> = plan
            .nodes()
            .filter_map(|n| match &n.kind {
                NodeKind::Filter { condition } => {
                    condition.as_literal().map(|value| (n.id, value.is_truthy()))
                }
                _ => None,
            })
            .collect();

        for (id, keep_rows) in &constant {
            if *keep_rows {
                plan.unlink(*id).map_err(edit_failed(NAME))?;
                trace!(node = %id, "removed always-true filter");
            } else {
                plan.get_mut(*id).map_err(edit_failed(NAME))?.kind = NodeKind::NoResults;
                trace!(node = %id, "always-false filter replaced by no-results");
            }
        }
        Ok((!constant.is_empty()).into())
    }
}

use tracing::trace;

use super::edit_failed;
use crate::error::Result;
use crate::optimizer::{OptimizerRule, RuleContext, Transformed};
use crate::plan::{NodeId, NodeKind, Plan};

const NAME: &str = "remove-unnecessary-calculations";

/// Removes calculations and subqueries whose result nobody reads.
///
/// Calculations that may throw or are shielded by `NOOPT` stay. A subquery
/// stays when its body writes data or may throw.
pub struct RemoveUnnecessaryCalculations;

impl OptimizerRule for RemoveUnnecessaryCalculations {
    fn name(&self) -> &'static str {
        NAME
    }

    fn description(&self) -> &'static str {
        "Removes calculations and subqueries whose results are never used"
    }

    fn apply(&self, plan: &mut Plan, _ctx: &mut RuleContext<'_>) -> Result<Transformed> {
        let mut changed = false;
        loop {
            let unused = unused_nodes(plan);
            if unused.is_empty() {
                break;
            }
            for id in unused {
                if plan.node(id).is_none() {
                    continue;
                }
                if let Some(NodeKind::Subquery { subquery, .. }) = plan.kind(id) {
                    let body = *subquery;
                    let removed = plan.remove_scope(body);
                    trace!(node = %id, removed, "removed unused subquery");
                } else {
                    trace!(node = %id, "removed unused calculation");
                }
                plan.unlink(id).map_err(edit_failed(NAME))?;
            }
            changed = true;
        }
        Ok(changed.into())
    }
}

fn unused_nodes(plan: &Plan) -> Vec<NodeId> {
    let usage = plan.variable_usage();
    plan.walk()
        .into_iter()
        .map(|(id, _)| id)
        .filter(|id| match plan.kind(*id) {
            Some(NodeKind::Calculation { out_var, expr }) => {
                !usage.is_used(*out_var) && !expr.can_throw() && !expr.blocks_optimization()
            }
            Some(NodeKind::Subquery { subquery, out_var }) => {
                !usage.is_used(*out_var) && body_is_removable(plan, *subquery)
            }
            _ => false,
        })
        .collect()
}

/// A subquery body can be dropped when nothing in it, nested bodies
/// included, writes data or may throw.
fn body_is_removable(plan: &Plan, tip: NodeId) -> bool {
    plan.scope_nodes(tip).into_iter().all(|id| match plan.kind(id) {
        Some(NodeKind::Modification { .. }) | None => false,
        Some(NodeKind::Calculation { expr, .. }) | Some(NodeKind::Filter { condition: expr }) => {
            !expr.can_throw() && !expr.blocks_optimization()
        }
        Some(NodeKind::Subquery { subquery, .. }) => body_is_removable(plan, *subquery),
        Some(_) => true,
    })
}

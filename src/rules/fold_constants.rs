use crate::error::Result;
use crate::optimizer::{OptimizerRule, RuleContext, Transformed};
use crate::plan::{NodeId, Plan};

/// Replaces constant sub-expressions of calculations and filters with their
/// value.
pub struct FoldConstantExpressions;

impl OptimizerRule for FoldConstantExpressions {
    fn name(&self) -> &'static str {
        "fold-constant-expressions"
    }

    fn description(&self) -> &'static str {
        "Evaluates constant sub-expressions at plan time"
    }

    fn apply(&self, plan: &mut Plan, ctx: &mut RuleContext<'_>) -> Result<Transformed> {
        let targets: Vec<NodeId> = plan
            .nodes()
            .filter(|n| n.kind.expression().is_some())
            .map(|n| n.id)
            .collect();

        let mut changed = false;
        let mut warnings = Vec::new();
        for id in targets {
            let Some(expr) = plan.node_mut(id).and_then(|n| n.kind.expression_mut()) else {
                continue;
            };
            changed |= expr.fold(&mut warnings);
        }
        for warning in warnings {
            ctx.warn(warning);
        }
        Ok(changed.into())
    }
}

use tracing::trace;

use super::edit_failed;
use crate::error::Result;
use crate::optimizer::{OptimizerRule, RuleContext, Transformed};
use crate::plan::{Expr, NodeId, NodeKind, Plan, VarId};

const NAME: &str = "remove-redundant-calculations";

/// Inlines a pure calculation into its only consumer and drops the
/// calculation node.
///
/// The consumer must sit downstream of the calculation in the same scope
/// with no loop, collect, exchange or modification node in between; a
/// variable read from inside a subquery body or behind an enumeration is
/// evaluated a different number of times there and stays put. Consumers
/// that hold the variable in a plain slot (`RETURN v`, `SORT v`) only accept
/// the rewrite when the calculation is itself a bare variable.
pub struct RemoveRedundantCalculations;

struct Inline {
    calc: NodeId,
    user: NodeId,
    var: VarId,
    expr: Expr,
}

impl OptimizerRule for RemoveRedundantCalculations {
    fn name(&self) -> &'static str {
        NAME
    }

    fn description(&self) -> &'static str {
        "Inlines single-use pure calculations into their consumer"
    }

    fn apply(&self, plan: &mut Plan, ctx: &mut RuleContext<'_>) -> Result<Transformed> {
        let mut changed = false;
        while let Some(inline) = next_candidate(plan) {
            let mut warnings = Vec::new();
            let user = plan.get_mut(inline.user).map_err(edit_failed(NAME))?;
            match user.kind.expression_mut() {
                Some(target) => {
                    target.substitute(inline.var, &inline.expr);
                    target.fold(&mut warnings);
                }
                None => {
                    if let Expr::Variable(replacement) = inline.expr {
                        user.kind.rename_variable_slots(inline.var, replacement);
                    }
                }
            }
            plan.unlink(inline.calc).map_err(edit_failed(NAME))?;
            trace!(calc = %inline.calc, user = %inline.user, "inlined calculation");
            for warning in warnings {
                ctx.warn(warning);
            }
            changed = true;
        }
        Ok(changed.into())
    }
}

fn next_candidate(plan: &Plan) -> Option<Inline> {
    let usage = plan.variable_usage();
    let scopes = plan.scopes();
    for (id, _) in plan.walk() {
        let Some(NodeKind::Calculation { out_var, expr }) = plan.kind(id) else {
            continue;
        };
        if !expr.is_pure() || usage.count(*out_var) != 1 {
            continue;
        }
        let [user] = usage.users(*out_var) else {
            continue;
        };
        if scopes.get(user) != scopes.get(&id) {
            trace!(calc = %id, user = %user, "consumer is in another scope");
            continue;
        }
        let Some(user_kind) = plan.kind(*user) else {
            continue;
        };
        if user_kind.expression().is_none() && !matches!(expr, Expr::Variable(_)) {
            continue;
        }
        if !reaches_without_barrier(plan, *user, id) {
            trace!(calc = %id, user = %user, "consumer is behind a loop or collect");
            continue;
        }
        return Some(Inline {
            calc: id,
            user: *user,
            var: *out_var,
            expr: expr.clone(),
        });
    }
    None
}

/// Walks from `from` towards the scope root and reports whether `target` is
/// reached before any node that changes how often rows are evaluated.
fn reaches_without_barrier(plan: &Plan, from: NodeId, target: NodeId) -> bool {
    let mut current = plan.dependency(from);
    while let Some(id) = current {
        if id == target {
            return true;
        }
        match plan.kind(id) {
            Some(kind)
                if kind.is_loop()
                    || kind.is_modification()
                    || kind.is_exchange()
                    || matches!(kind, NodeKind::Aggregate { .. } | NodeKind::Singleton) =>
            {
                return false
            }
            Some(_) => current = plan.dependency(id),
            None => return false,
        }
    }
    false
}

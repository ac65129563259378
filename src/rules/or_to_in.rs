use super::condition::disjuncts;
use crate::error::Result;
use crate::optimizer::{OptimizerRule, RuleContext, Transformed};
use crate::plan::{BinaryOp, Expr, LogicalOp, NodeId, Plan, Value};

/// Turns `x == 1 || x == 2 || x IN [3, 4]` into `x IN [1, 2, 3, 4]`.
///
/// Every operand of the disjunction must test one and the same variable,
/// attribute or constant-indexed access against constants, either with `==`
/// (on either side) or with `IN` over a literal array. Values equal under
/// the document ordering are listed once, in first-seen order.
///
/// Qualifying disjunctions are rewritten wherever they appear inside filter
/// conditions and calculation expressions, including ones nested under
/// `&&` or function calls.
pub struct ReplaceOrWithIn;

impl OptimizerRule for ReplaceOrWithIn {
    fn name(&self) -> &'static str {
        "replace-or-with-in"
    }

    fn description(&self) -> &'static str {
        "Replaces OR'ed equality comparisons on one operand with a single IN"
    }

    fn apply(&self, plan: &mut Plan, _ctx: &mut RuleContext<'_>) -> Result<Transformed> {
        let rewrites: Vec<(NodeId, Expr)> = plan
            .nodes()
            .filter_map(|n| {
                let mut expr = n.kind.expression()?.clone();
                rewrite(&mut expr).then_some((n.id, expr))
            })
            .collect();

        let changed = !rewrites.is_empty();
        for (id, expr) in rewrites {
            if let Some(slot) = plan.node_mut(id).and_then(|n| n.kind.expression_mut()) {
                *slot = expr;
            }
        }
        Ok(changed.into())
    }
}

fn rewrite(expr: &mut Expr) -> bool {
    if matches!(expr, Expr::Logical { op: LogicalOp::Or, .. }) {
        if let Some(merged) = merge_equalities(expr) {
            *expr = merged;
            return true;
        }
    }
    let mut changed = false;
    expr.for_each_child_mut(&mut |child| changed |= rewrite(child));
    changed
}

/// Operand and candidate values of one `==` or `IN` disjunct.
fn equality(leaf: &Expr) -> Option<(&Expr, Vec<Value>)> {
    let Expr::Binary { op, lhs, rhs } = leaf else {
        return None;
    };
    match op {
        BinaryOp::Eq => match (lhs.as_literal(), rhs.as_literal()) {
            (None, Some(value)) => Some((&**lhs, vec![value.clone()])),
            (Some(value), None) => Some((&**rhs, vec![value.clone()])),
            _ => None,
        },
        BinaryOp::In if lhs.as_literal().is_none() => match rhs.as_literal()? {
            Value::Array(items) => Some((&**lhs, items.clone())),
            _ => None,
        },
        _ => None,
    }
}

fn is_access(expr: &Expr) -> bool {
    match expr {
        Expr::Variable(_) => true,
        Expr::Attribute { base, .. } => is_access(base),
        Expr::Indexed { base, index } => is_access(base) && index.as_literal().is_some(),
        _ => false,
    }
}

fn merge_equalities(expr: &Expr) -> Option<Expr> {
    let leaves = disjuncts(expr);
    if leaves.len() < 2 {
        return None;
    }

    let mut common: Option<&Expr> = None;
    let mut values: Vec<Value> = Vec::new();
    for leaf in leaves {
        let (operand, candidates) = equality(leaf)?;
        if !is_access(operand) {
            return None;
        }
        match common {
            None => common = Some(operand),
            Some(seen) if seen == operand => {}
            Some(_) => return None,
        }
        for value in candidates {
            if !values.iter().any(|v| v.compare(&value).is_eq()) {
                values.push(value);
            }
        }
    }
    Some(common?.clone().in_list(Expr::lit(Value::Array(values))))
}

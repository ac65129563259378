use std::cmp::Ordering;

use super::condition::{disjuncts, path_condition, Definitions, PathCondition};
use crate::error::Result;
use crate::optimizer::{OptimizerRule, RuleContext, Transformed};
use crate::plan::{BinaryOp, Expr, LogicalOp, NodeId, Plan};

/// Collapses `x > a || x >= b` style disjunctions over one attribute into
/// the single comparison that accepts their union.
///
/// Every operand must compare the same path against a constant and all of
/// them must bound it from the same side. Lower bounds keep the smallest
/// threshold and upper bounds the largest; on equal thresholds the inclusive
/// operator wins. Mixed lower/upper disjunctions are left alone.
///
/// The rewrite is not limited to the calculation feeding a filter: any
/// qualifying disjunction inside a filter condition or calculation
/// expression is collapsed, including ones nested under `&&`, function calls
/// or array literals. Collapsing preserves the value of the disjunction
/// itself, so the surrounding expression is unaffected.
pub struct RemoveRedundantOr;

impl OptimizerRule for RemoveRedundantOr {
    fn name(&self) -> &'static str {
        "remove-redundant-or"
    }

    fn description(&self) -> &'static str {
        "Replaces same-direction OR'ed range comparisons with one comparison"
    }

    fn apply(&self, plan: &mut Plan, _ctx: &mut RuleContext<'_>) -> Result<Transformed> {
        let rewrites: Vec<(NodeId, Expr)> = {
            let defs = plan.calculations();
            plan.nodes()
                .filter_map(|n| {
                    let mut expr = n.kind.expression()?.clone();
                    rewrite(&mut expr, &defs).then_some((n.id, expr))
                })
                .collect()
        };

        let changed = !rewrites.is_empty();
        for (id, expr) in rewrites {
            if let Some(slot) = plan.node_mut(id).and_then(|n| n.kind.expression_mut()) {
                *slot = expr;
            }
        }
        Ok(changed.into())
    }
}

/// Single comparison equivalent to a same-direction disjunction of range
/// comparisons on one attribute, or `None` when `expr` is not of that shape.
pub fn collapse_redundant_or(expr: &Expr) -> Option<Expr> {
    collapse(expr, &Definitions::default())
}

fn rewrite(expr: &mut Expr, defs: &Definitions<'_>) -> bool {
    if matches!(expr, Expr::Logical { op: LogicalOp::Or, .. }) {
        if let Some(collapsed) = collapse(expr, defs) {
            *expr = collapsed;
            return true;
        }
    }
    let mut changed = false;
    expr.for_each_child_mut(&mut |child| changed |= rewrite(child, defs));
    changed
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Side {
    Lower,
    Upper,
}

fn side(op: BinaryOp) -> Option<Side> {
    match op {
        BinaryOp::Gt | BinaryOp::Ge => Some(Side::Lower),
        BinaryOp::Lt | BinaryOp::Le => Some(Side::Upper),
        _ => None,
    }
}

fn is_inclusive(op: BinaryOp) -> bool {
    matches!(op, BinaryOp::Ge | BinaryOp::Le)
}

fn collapse(expr: &Expr, defs: &Definitions<'_>) -> Option<Expr> {
    let leaves = disjuncts(expr);
    if leaves.len() < 2 {
        return None;
    }

    let mut parsed: Vec<(&Expr, PathCondition)> = Vec::with_capacity(leaves.len());
    for leaf in leaves {
        let cond = path_condition(leaf, defs)?;
        parsed.push((leaf, cond));
    }

    let (_, first) = &parsed[0];
    let direction = side(first.op)?;
    let same_operand = parsed.iter().all(|(_, c)| {
        c.var == first.var && c.path == first.path && side(c.op) == Some(direction)
    });
    if !same_operand {
        return None;
    }

    let mut best = 0;
    for (pos, (_, cond)) in parsed.iter().enumerate().skip(1) {
        let current = &parsed[best].1;
        let looser = match (direction, cond.value.compare(&current.value)) {
            (Side::Lower, Ordering::Less) | (Side::Upper, Ordering::Greater) => true,
            (_, Ordering::Equal) => is_inclusive(cond.op) && !is_inclusive(current.op),
            _ => false,
        };
        if looser {
            best = pos;
        }
    }
    Some(parsed[best].0.clone())
}

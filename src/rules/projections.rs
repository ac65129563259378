use std::collections::BTreeSet;

use tracing::trace;

use crate::error::Result;
use crate::optimizer::{OptimizerRule, RuleContext, Transformed};
use crate::plan::{AttributePath, ExecutionHints, Expr, NodeId, NodeKind, Plan, VarId};

/// Records, for every collection and index scan, which document attributes
/// are read downstream and whether the index alone can supply them.
///
/// Only static attribute chains (`doc.a.b`) count as projections. Any use of
/// the whole document, including a dynamic `doc[expr]`, leaves the
/// projection list empty. A scan whose document nobody reads is marked as not
/// producing a result.
pub struct ReduceExtractionToProjection;

impl OptimizerRule for ReduceExtractionToProjection {
    fn name(&self) -> &'static str {
        "reduce-extraction-to-projection"
    }

    fn description(&self) -> &'static str {
        "Limits scans to the document attributes that are actually read"
    }

    fn apply(&self, plan: &mut Plan, _ctx: &mut RuleContext<'_>) -> Result<Transformed> {
        let updates: Vec<(NodeId, ExecutionHints)> = plan
            .nodes()
            .filter_map(|n| {
                let hints = match &n.kind {
                    NodeKind::EnumerateCollection { out_var, .. } => {
                        scan_hints(&n.hints, access_of(plan, *out_var), |_| false)
                    }
                    NodeKind::IndexScan { out_var, index, .. } => {
                        scan_hints(&n.hints, access_of(plan, *out_var), |p| index.covers(p))
                    }
                    _ => return None,
                };
                (hints != n.hints).then_some((n.id, hints))
            })
            .collect();

        let changed = !updates.is_empty();
        for (id, hints) in updates {
            trace!(
                node = %id,
                projections = hints.projections.len(),
                covered = hints.index_covers_projections,
                produces_result = hints.produces_result,
                "scan projections updated"
            );
            if let Some(node) = plan.node_mut(id) {
                node.hints = hints;
            }
        }
        Ok(changed.into())
    }
}

/// How downstream nodes read a scan's document.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Access {
    Unused,
    Paths(BTreeSet<AttributePath>),
    Whole,
}

impl Access {
    fn whole(&mut self) {
        *self = Access::Whole;
    }

    fn add(&mut self, path: AttributePath) {
        match self {
            Access::Whole => {}
            Access::Unused => *self = Access::Paths(BTreeSet::from([path])),
            Access::Paths(paths) => {
                paths.insert(path);
            }
        }
    }
}

fn scan_hints(
    current: &ExecutionHints,
    access: Access,
    covers: impl Fn(&AttributePath) -> bool,
) -> ExecutionHints {
    let (produces_result, projections, index_covers_projections) = match access {
        Access::Unused => (false, Vec::new(), false),
        Access::Whole => (true, Vec::new(), false),
        Access::Paths(paths) => {
            let projections = minimal(paths);
            let covered = projections.iter().all(|p| covers(p));
            (true, projections, covered)
        }
    };
    ExecutionHints {
        produces_result,
        projections,
        index_covers_projections,
        ..current.clone()
    }
}

/// Drops paths that another path in the set already includes.
fn minimal(paths: BTreeSet<AttributePath>) -> Vec<AttributePath> {
    let mut out: Vec<AttributePath> = Vec::with_capacity(paths.len());
    for path in paths {
        if !out.iter().any(|kept| kept.is_prefix_of(&path)) {
            out.push(path);
        }
    }
    out
}

fn access_of(plan: &Plan, var: VarId) -> Access {
    let mut access = Access::Unused;
    for node in plan.nodes() {
        match &node.kind {
            NodeKind::Calculation { expr, .. } => visit(expr, var, &mut access),
            NodeKind::Filter { condition } => visit(condition, var, &mut access),
            kind => {
                if kind.variables_used().contains(&var) {
                    access.whole();
                }
            }
        }
        if access == Access::Whole {
            break;
        }
    }
    access
}

fn visit(expr: &Expr, var: VarId, access: &mut Access) {
    if let Some((root, path)) = expr.static_path() {
        if root == var {
            if path.is_empty() {
                access.whole();
            } else {
                access.add(path);
            }
        }
        return;
    }
    if let Expr::Indexed { base, index } = expr {
        match base.static_path() {
            Some((root, path)) if root == var && !path.is_empty() => access.add(path),
            Some((root, _)) if root == var => access.whole(),
            Some(_) => {}
            None => visit(base, var, access),
        }
        visit(index, var, access);
        return;
    }
    expr.for_each_child(&mut |child| visit(child, var, access));
}

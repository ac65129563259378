use tracing::trace;

use super::condition::{conjuncts, path_condition, range_within, Definitions};
use super::edit_failed;
use crate::error::Result;
use crate::optimizer::{OptimizerRule, RuleContext, Transformed};
use crate::plan::{Expr, IndexRange, NodeId, NodeKind, Plan, VarId};

const NAME: &str = "remove-filters-covered-by-index";

/// Drops filter conjuncts that an index scan earlier in the same scope
/// already guarantees.
///
/// A conjunct is covered when it compares an attribute of a scanned document
/// against a constant (`==`, `<`, `<=`, `>`, `>=`) and the scan's range on
/// that attribute lies inside the conjunct's range. A filter whose every
/// conjunct is covered is removed; otherwise the uncovered conjuncts stay.
pub struct RemoveFiltersCoveredByIndex;

enum Edit {
    Remove,
    Narrow(Expr),
}

impl OptimizerRule for RemoveFiltersCoveredByIndex {
    fn name(&self) -> &'static str {
        NAME
    }

    fn description(&self) -> &'static str {
        "Removes filter conditions already enforced by an index scan"
    }

    fn apply(&self, plan: &mut Plan, _ctx: &mut RuleContext<'_>) -> Result<Transformed> {
        let edits: Vec<(NodeId, Edit)> = {
            let defs = plan.calculations();
            plan.nodes()
                .filter_map(|n| {
                    let NodeKind::Filter { condition } = &n.kind else {
                        return None;
                    };
                    let scans = upstream_scans(plan, n.id);
                    if scans.is_empty() {
                        return None;
                    }
                    let terms = conjuncts(condition);
                    let kept: Vec<&Expr> = terms
                        .iter()
                        .copied()
                        .filter(|term| !covered(term, &scans, &defs))
                        .collect();
                    if kept.len() == terms.len() {
                        return None;
                    }
                    let edit = match kept.into_iter().cloned().reduce(Expr::and) {
                        Some(rest) => Edit::Narrow(rest),
                        None => Edit::Remove,
                    };
                    Some((n.id, edit))
                })
                .collect()
        };

        let changed = !edits.is_empty();
        for (id, edit) in edits {
            match edit {
                Edit::Remove => {
                    plan.unlink(id).map_err(edit_failed(NAME))?;
                    trace!(node = %id, "removed filter covered by index scan");
                }
                Edit::Narrow(rest) => {
                    if let NodeKind::Filter { condition } =
                        &mut plan.get_mut(id).map_err(edit_failed(NAME))?.kind
                    {
                        *condition = rest;
                    }
                    trace!(node = %id, "dropped filter conjuncts covered by index scan");
                }
            }
        }
        Ok(changed.into())
    }
}

/// Index scans on the dependency chain above `id`, nearest first.
fn upstream_scans(plan: &Plan, id: NodeId) -> Vec<(VarId, &[IndexRange])> {
    let mut scans = Vec::new();
    let mut current = plan.dependency(id);
    while let Some(dep) = current {
        if let Some(NodeKind::IndexScan { out_var, ranges, .. }) = plan.kind(dep) {
            scans.push((*out_var, ranges.as_slice()));
        }
        current = plan.dependency(dep);
    }
    scans
}

fn covered(term: &Expr, scans: &[(VarId, &[IndexRange])], defs: &Definitions<'_>) -> bool {
    let Some(cond) = path_condition(term, defs) else {
        return false;
    };
    let Some(wanted) = cond.to_range() else {
        return false;
    };
    scans.iter().any(|(var, ranges)| {
        *var == cond.var
            && ranges
                .iter()
                .any(|r| r.field == wanted.field && range_within(r, &wanted))
    })
}

use rustc_hash::FxHashSet;
use tracing::trace;

use super::condition::Definitions;
use super::edit_failed;
use crate::error::Result;
use crate::optimizer::{OptimizerRule, RuleContext, Transformed};
use crate::plan::{Expr, NodeId, NodeKind, Plan, SortElement};

const NAME: &str = "remove-redundant-sorts";

/// Removes sort work that cannot affect the result.
///
/// Sort elements bound to constants are dropped, and a sort left without
/// elements disappears. Then each sort is compared with the sorts upstream
/// of it, walking across filters, calculations and enumerations only:
///
/// - an upstream sort on the same keys, or on a prefix of ours, is redundant;
/// - an upstream sort on more keys that start with ours makes our sort
///   redundant;
/// - an unrelated upstream sort is redundant when no enumeration or throwing
///   calculation between the two can observe its order and our sort is not
///   stable.
pub struct RemoveRedundantSorts;

impl OptimizerRule for RemoveRedundantSorts {
    fn name(&self) -> &'static str {
        NAME
    }

    fn description(&self) -> &'static str {
        "Removes constant sort keys and sorts superseded by other sorts"
    }

    fn apply(&self, plan: &mut Plan, _ctx: &mut RuleContext<'_>) -> Result<Transformed> {
        let mut changed = drop_constant_elements(plan)?;

        let redundant = {
            let defs = plan.calculations();
            find_redundant(plan, &defs)
        };
        for id in &redundant {
            plan.unlink(*id).map_err(edit_failed(NAME))?;
            trace!(node = %id, "removed redundant sort");
        }
        changed |= !redundant.is_empty();
        Ok(changed.into())
    }
}

fn drop_constant_elements(plan: &mut Plan) -> Result<bool> {
    let edits: Vec<(NodeId, Vec<SortElement>)> = {
        let defs = plan.calculations();
        plan.nodes()
            .filter_map(|n| match &n.kind {
                NodeKind::Sort { elements, .. } => {
                    let kept: Vec<SortElement> = elements
                        .iter()
                        .copied()
                        .filter(|e| !defs.get(&e.var).is_some_and(|expr| expr.is_constant()))
                        .collect();
                    (kept.len() != elements.len()).then_some((n.id, kept))
                }
                _ => None,
            })
            .collect()
    };

    let changed = !edits.is_empty();
    for (id, kept) in edits {
        if kept.is_empty() {
            plan.unlink(id).map_err(edit_failed(NAME))?;
            trace!(node = %id, "removed sort on constants");
        } else {
            let node = plan.get_mut(id).map_err(edit_failed(NAME))?;
            if let NodeKind::Sort { elements, .. } = &mut node.kind {
                *elements = kept;
            }
        }
    }
    Ok(changed)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Coverage {
    Unequal,
    OtherLessAccurate,
    OurselvesLessAccurate,
    AllEqual,
}

struct SortKeys {
    criteria: Vec<(Expr, bool)>,
    complex: bool,
    deterministic: bool,
    can_throw: bool,
}

impl SortKeys {
    fn of(elements: &[SortElement], defs: &Definitions<'_>) -> Self {
        let mut keys = SortKeys {
            criteria: Vec::with_capacity(elements.len()),
            complex: false,
            deterministic: true,
            can_throw: false,
        };
        for element in elements {
            match defs.get(&element.var) {
                Some(expr) => {
                    keys.deterministic &= expr.is_deterministic();
                    keys.can_throw |= expr.can_throw();
                    if expr.static_path().is_none() && !expr.is_constant() {
                        keys.complex = true;
                    }
                    keys.criteria.push(((*expr).clone(), element.ascending));
                }
                None => keys
                    .criteria
                    .push((Expr::Variable(element.var), element.ascending)),
            }
        }
        keys
    }

    fn covered_by(&self, other: &SortKeys) -> Coverage {
        if self.complex || other.complex {
            return Coverage::Unequal;
        }
        for (i, ours) in self.criteria.iter().enumerate() {
            let Some(theirs) = other.criteria.get(i) else {
                return Coverage::OtherLessAccurate;
            };
            if ours != theirs {
                return Coverage::Unequal;
            }
        }
        if other.criteria.len() > self.criteria.len() {
            Coverage::OurselvesLessAccurate
        } else {
            Coverage::AllEqual
        }
    }
}

fn find_redundant(plan: &Plan, defs: &Definitions<'_>) -> Vec<NodeId> {
    let sorts: Vec<NodeId> = plan
        .walk()
        .into_iter()
        .map(|(id, _)| id)
        .filter(|id| matches!(plan.kind(*id), Some(NodeKind::Sort { .. })))
        .collect();

    let mut remove: FxHashSet<NodeId> = FxHashSet::default();
    let mut order = Vec::new();
    for sort in sorts {
        if remove.contains(&sort) {
            continue;
        }
        let Some(NodeKind::Sort { elements, stable }) = plan.kind(sort) else {
            continue;
        };
        let ours = SortKeys::of(elements, defs);
        let stable = *stable;
        let mut relying = 0usize;

        let mut current = plan.dependency(sort);
        while let Some(id) = current {
            current = plan.dependency(id);
            if remove.contains(&id) {
                continue;
            }
            let Some(kind) = plan.kind(id) else { break };
            match kind {
                NodeKind::Sort { elements, .. } => {
                    let other = SortKeys::of(elements, defs);
                    let victim = match ours.covered_by(&other) {
                        Coverage::AllEqual | Coverage::OtherLessAccurate => id,
                        Coverage::OurselvesLessAccurate => sort,
                        Coverage::Unequal
                            if relying == 0 && !stable && other.deterministic && !other.can_throw =>
                        {
                            id
                        }
                        Coverage::Unequal => break,
                    };
                    if remove.insert(victim) {
                        order.push(victim);
                    }
                    if victim == sort {
                        break;
                    }
                }
                NodeKind::Filter { .. } => {}
                NodeKind::Calculation { expr, .. } => {
                    if expr.can_throw() {
                        relying += 1;
                    }
                }
                NodeKind::EnumerateList { .. }
                | NodeKind::EnumerateCollection { .. }
                | NodeKind::IndexScan { .. } => relying += 1,
                _ => break,
            }
        }
    }
    order
}

use std::cmp::Ordering;

use tracing::{debug, trace};

use super::condition::{conditions_on, intersect, Definitions, PathCondition};
use crate::catalog::IndexDescriptor;
use crate::error::Result;
use crate::optimizer::{OptimizerRule, RuleContext, Transformed};
use crate::plan::{Expr, IndexRange, NodeId, NodeKind, Plan, ScanOrder, VarId};

/// Turns a full collection scan into an index scan when filters downstream
/// of it constrain indexed attributes.
///
/// Unsorted indexes need an equality on every field. Sorted indexes take an
/// equality prefix optionally followed by one range. A sparse index is only
/// eligible when the filters exclude null on all of its fields. The filters
/// themselves stay in the plan.
pub struct UseIndexes;

impl OptimizerRule for UseIndexes {
    fn name(&self) -> &'static str {
        "use-indexes"
    }

    fn description(&self) -> &'static str {
        "Uses indexes to answer equality and range filters"
    }

    fn apply(&self, plan: &mut Plan, ctx: &mut RuleContext<'_>) -> Result<Transformed> {
        let catalog = ctx.catalog();
        let rewrites: Vec<(NodeId, NodeKind)> = {
            let defs = plan.calculations();
            plan.nodes()
                .filter_map(|n| match &n.kind {
                    NodeKind::EnumerateCollection {
                        collection,
                        out_var,
                    } => {
                        let conditions = downstream_conditions(plan, n.id, *out_var, &defs);
                        if conditions.is_empty() {
                            return None;
                        }
                        let chosen = catalog
                            .indexes(collection)
                            .iter()
                            .filter_map(|index| Candidate::evaluate(index, &conditions))
                            .max_by(Candidate::rank)?;
                        debug!(
                            node = %n.id,
                            collection = collection.as_str(),
                            index = %chosen.index.display_name(),
                            fields = chosen.ranges.len(),
                            "using index for filter"
                        );
                        Some((
                            n.id,
                            NodeKind::IndexScan {
                                collection: collection.clone(),
                                out_var: *out_var,
                                index: chosen.index.clone(),
                                ranges: chosen.ranges,
                                order: ScanOrder::Unspecified,
                            },
                        ))
                    }
                    _ => None,
                })
                .collect()
        };

        let changed = !rewrites.is_empty();
        for (id, kind) in rewrites {
            if let Some(node) = plan.node_mut(id) {
                node.kind = kind;
            }
        }
        Ok(changed.into())
    }
}

/// Comparisons on `var` from the filters that run on every row the scan
/// produces, up to the first node that drops or regroups rows by position.
pub(crate) fn downstream_conditions(
    plan: &Plan,
    scan: NodeId,
    var: VarId,
    defs: &Definitions<'_>,
) -> Vec<PathCondition> {
    let mut filters: Vec<&Expr> = Vec::new();
    let mut current = scan;
    loop {
        let parents = plan.parents(current);
        let [parent] = parents.as_slice() else {
            break;
        };
        match plan.kind(*parent) {
            Some(NodeKind::Filter { condition }) => filters.push(condition),
            Some(
                NodeKind::Calculation { .. }
                | NodeKind::Sort { .. }
                | NodeKind::EnumerateList { .. }
                | NodeKind::EnumerateCollection { .. }
                | NodeKind::IndexScan { .. }
                | NodeKind::Subquery { .. },
            ) => {}
            _ => break,
        }
        current = *parent;
    }
    conditions_on(var, filters, defs)
}

struct Candidate<'a> {
    index: &'a IndexDescriptor,
    ranges: Vec<IndexRange>,
    equalities: usize,
}

impl<'a> Candidate<'a> {
    fn evaluate(index: &'a IndexDescriptor, conditions: &[PathCondition]) -> Option<Self> {
        if !index.kind.supports_lookup() || index.fields.is_empty() {
            return None;
        }
        if index.sparse {
            let all_non_null = index.fields.iter().all(|field| {
                conditions
                    .iter()
                    .any(|c| &c.path == field && c.excludes_null())
            });
            if !all_non_null {
                trace!(index = %index.display_name(), "sparse index lacks non-null filters");
                return None;
            }
        }

        let mut ranges = Vec::new();
        let mut equalities = 0;
        for field in &index.fields {
            let merged = conditions
                .iter()
                .filter(|c| &c.path == field)
                .filter_map(PathCondition::to_range)
                .reduce(|acc, next| intersect(acc, &next));
            match merged {
                Some(range) if range.is_equality() => {
                    equalities += 1;
                    ranges.push(range);
                }
                Some(range) => {
                    if index.is_sorted() {
                        ranges.push(range);
                    }
                    break;
                }
                None => break,
            }
        }

        if ranges.is_empty() {
            return None;
        }
        if !index.is_sorted() && equalities < index.fields.len() {
            return None;
        }
        Some(Candidate {
            index,
            ranges,
            equalities,
        })
    }

    fn unique_hit(&self) -> bool {
        self.index.unique && self.equalities == self.index.fields.len()
    }

    fn selectivity(&self) -> f64 {
        if self.unique_hit() {
            1.0
        } else {
            self.index.selectivity_estimate.unwrap_or(0.0)
        }
    }

    fn rank(a: &Self, b: &Self) -> Ordering {
        a.unique_hit()
            .cmp(&b.unique_hit())
            .then(a.ranges.len().cmp(&b.ranges.len()))
            .then(a.equalities.cmp(&b.equalities))
            .then(
                a.selectivity()
                    .partial_cmp(&b.selectivity())
                    .unwrap_or(Ordering::Equal),
            )
            .then(b.index.id.cmp(&a.index.id))
    }
}

use std::cmp::Ordering;

use tracing::{debug, trace};

use super::condition::{resolve_path, Definitions};
use super::edit_failed;
use super::use_indexes::downstream_conditions;
use crate::catalog::{CatalogSnapshot, IndexDescriptor};
use crate::error::Result;
use crate::optimizer::{OptimizerRule, RuleContext, Transformed};
use crate::plan::{
    AttributePath, Expr, NodeId, NodeKind, Plan, ScanOrder, SortElement, SortStrategy, VarId,
};

const NAME: &str = "use-index-for-sort";

/// Leading sort elements that an index traversal already delivers in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SortPrefix {
    /// Number of covered sort elements.
    pub len: usize,
    /// Direction shared by the covered elements; `None` when nothing is
    /// covered.
    pub ascending: Option<bool>,
}

impl SortPrefix {
    /// Scan order that produces the covered prefix.
    pub fn scan_order(&self) -> ScanOrder {
        match self.ascending {
            Some(true) => ScanOrder::Forward,
            Some(false) => ScanOrder::Reverse,
            None => ScanOrder::Unspecified,
        }
    }
}

/// Longest prefix of `keys` matching the leading index `fields` with one
/// consistent direction.
///
/// `keys` holds the attribute path and direction of each sort element, or
/// `None` for an element that is not a static attribute of the scanned
/// document. Matching stops at the first unresolved element, the first path
/// that differs from the index field at the same position, or the first
/// change of direction.
pub fn covered_sort_prefix(
    keys: &[Option<(AttributePath, bool)>],
    fields: &[AttributePath],
) -> SortPrefix {
    let mut prefix = SortPrefix {
        len: 0,
        ascending: None,
    };
    for (key, field) in keys.iter().zip(fields) {
        let Some((path, ascending)) = key else {
            break;
        };
        if path != field || prefix.ascending.is_some_and(|dir| dir != *ascending) {
            break;
        }
        prefix.ascending = Some(*ascending);
        prefix.len += 1;
    }
    prefix
}

/// Lets an ordered index provide all or part of a sort.
///
/// The scan feeding the sort must be reachable through calculations,
/// filters, list enumerations and subqueries only, and must not itself run
/// inside another loop. When every sort element is covered the sort node is
/// removed and the scan is marked `index-order`; when only a prefix is
/// covered the sort becomes a grouped sort over that prefix. A full
/// collection scan is turned into an index scan for this. A sparse index is
/// only picked when filters show that none of its fields can be null.
pub struct UseIndexForSort;

impl OptimizerRule for UseIndexForSort {
    fn name(&self) -> &'static str {
        NAME
    }

    fn description(&self) -> &'static str {
        "Uses index order to remove sorts or reduce them to grouped sorts"
    }

    fn apply(&self, plan: &mut Plan, ctx: &mut RuleContext<'_>) -> Result<Transformed> {
        let catalog = ctx.catalog();
        let mut skipped_sparse = Vec::new();
        let choices: Vec<Choice> = {
            let defs = plan.calculations();
            let sorts: Vec<NodeId> = plan
                .walk()
                .into_iter()
                .map(|(id, _)| id)
                .filter(|id| matches!(plan.kind(*id), Some(NodeKind::Sort { .. })))
                .collect();
            sorts
                .into_iter()
                .filter_map(|sort| choose(plan, sort, &defs, catalog, &mut skipped_sparse))
                .collect()
        };

        for (index, collection) in skipped_sparse {
            ctx.warn(format!(
                "sparse index {index} on {collection} not used for sorting: indexed attributes may be null"
            ));
        }

        let changed = !choices.is_empty();
        for choice in choices {
            choice.apply(plan)?;
        }
        Ok(changed.into())
    }
}

struct Choice {
    sort: NodeId,
    target: NodeId,
    /// Index to scan when the target is still a full collection scan.
    convert: Option<IndexDescriptor>,
    order: ScanOrder,
    covered: usize,
    total: usize,
}

impl Choice {
    fn removes_sort(&self) -> bool {
        self.covered == self.total
    }

    /// Whether applying the choice would alter the plan.
    fn changes(&self, plan: &Plan) -> bool {
        if self.convert.is_some() || self.removes_sort() {
            return true;
        }
        let order_differs = matches!(
            plan.kind(self.target),
            Some(NodeKind::IndexScan { order, .. }) if *order != self.order
        );
        let hints_differ = plan.node(self.sort).is_some_and(|n| {
            n.hints.sort_strategy != SortStrategy::Grouped
                || n.hints.number_of_top_grouped_elements != self.covered
        });
        order_differs || hints_differ
    }

    fn apply(self, plan: &mut Plan) -> Result<()> {
        let removes_sort = self.removes_sort();
        let target = plan.get_mut(self.target).map_err(edit_failed(NAME))?;
        match self.convert {
            Some(index) => {
                if let NodeKind::EnumerateCollection {
                    collection,
                    out_var,
                } = &target.kind
                {
                    let scan = NodeKind::IndexScan {
                        collection: collection.clone(),
                        out_var: *out_var,
                        index,
                        ranges: Vec::new(),
                        order: self.order,
                    };
                    target.kind = scan;
                }
            }
            None => {
                if let NodeKind::IndexScan { order, .. } = &mut target.kind {
                    *order = self.order;
                }
            }
        }

        if removes_sort {
            target.hints.sort_strategy = SortStrategy::IndexOrder;
            plan.unlink(self.sort).map_err(edit_failed(NAME))?;
            trace!(sort = %self.sort, scan = %self.target, "sort replaced by index order");
        } else {
            let sort = plan.get_mut(self.sort).map_err(edit_failed(NAME))?;
            sort.hints.sort_strategy = SortStrategy::Grouped;
            sort.hints.number_of_top_grouped_elements = self.covered;
            trace!(sort = %self.sort, grouped = self.covered, "sort reduced to grouped sort");
        }
        Ok(())
    }
}

/// Scan whose order reaches `sort` unchanged.
fn find_target(plan: &Plan, sort: NodeId) -> Option<NodeId> {
    let mut current = plan.dependency(sort);
    while let Some(id) = current {
        match plan.kind(id)? {
            NodeKind::Calculation { .. }
            | NodeKind::Filter { .. }
            | NodeKind::EnumerateList { .. }
            | NodeKind::Subquery { .. } => current = plan.dependency(id),
            NodeKind::EnumerateCollection { .. } | NodeKind::IndexScan { .. } => {
                return (!plan.is_in_inner_loop(id)).then_some(id);
            }
            _ => return None,
        }
    }
    None
}

fn sort_keys(
    elements: &[SortElement],
    var: VarId,
    defs: &Definitions<'_>,
) -> Vec<Option<(AttributePath, bool)>> {
    elements
        .iter()
        .map(|e| match resolve_path(&Expr::Variable(e.var), defs) {
            Some((root, path)) if root == var && !path.is_empty() => Some((path, e.ascending)),
            _ => None,
        })
        .collect()
}

fn choose(
    plan: &Plan,
    sort: NodeId,
    defs: &Definitions<'_>,
    catalog: &CatalogSnapshot,
    skipped_sparse: &mut Vec<(String, String)>,
) -> Option<Choice> {
    let Some(NodeKind::Sort { elements, .. }) = plan.kind(sort) else {
        return None;
    };
    let target = find_target(plan, sort)?;
    match plan.kind(target)? {
        NodeKind::IndexScan {
            out_var,
            index,
            order,
            ..
        } => {
            if !index.is_sorted() {
                return None;
            }
            let prefix = covered_sort_prefix(&sort_keys(elements, *out_var, defs), &index.fields);
            if prefix.len == 0 {
                return None;
            }
            let wanted = prefix.scan_order();
            if *order != ScanOrder::Unspecified && *order != wanted {
                trace!(sort = %sort, "index scan order already fixed in the other direction");
                return None;
            }
            let choice = Choice {
                sort,
                target,
                convert: None,
                order: wanted,
                covered: prefix.len,
                total: elements.len(),
            };
            choice.changes(plan).then_some(choice)
        }
        NodeKind::EnumerateCollection {
            collection,
            out_var,
        } => {
            let keys = sort_keys(elements, *out_var, defs);
            let non_null: Vec<AttributePath> = downstream_conditions(plan, target, *out_var, defs)
                .into_iter()
                .filter(|c| c.excludes_null())
                .map(|c| c.path)
                .collect();

            let mut best: Option<(&IndexDescriptor, SortPrefix)> = None;
            let mut rejected = None;
            for index in catalog.indexes(collection).iter().filter(|i| i.is_sorted()) {
                let prefix = covered_sort_prefix(&keys, &index.fields);
                if prefix.len == 0 {
                    continue;
                }
                if index.sparse && !index.fields.iter().all(|f| non_null.contains(f)) {
                    trace!(
                        index = %index.display_name(),
                        "sparse index skipped for sort without non-null filters"
                    );
                    rejected.get_or_insert_with(|| index.display_name());
                    continue;
                }
                let better = best
                    .as_ref()
                    .map_or(true, |(b, bp)| rank(index, &prefix, b, bp).is_gt());
                if better {
                    best = Some((index, prefix));
                }
            }

            let Some((index, prefix)) = best else {
                if let Some(name) = rejected {
                    skipped_sparse.push((name, collection.clone()));
                }
                return None;
            };
            debug!(
                sort = %sort,
                index = %index.display_name(),
                covered = prefix.len,
                elements = elements.len(),
                "using index order for sort"
            );
            Some(Choice {
                sort,
                target,
                convert: Some(index.clone()),
                order: prefix.scan_order(),
                covered: prefix.len,
                total: elements.len(),
            })
        }
        _ => None,
    }
}

fn rank(a: &IndexDescriptor, pa: &SortPrefix, b: &IndexDescriptor, pb: &SortPrefix) -> Ordering {
    let selectivity = |i: &IndexDescriptor| i.selectivity_estimate.unwrap_or(0.0);
    pa.len
        .cmp(&pb.len)
        .then((!a.sparse).cmp(&!b.sparse))
        .then(
            selectivity(a)
                .partial_cmp(&selectivity(b))
                .unwrap_or(Ordering::Equal),
        )
        .then(b.id.cmp(&a.id))
}

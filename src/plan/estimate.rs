//! Cardinality estimates filled in after optimization.

use super::node::IndexRange;
use super::{NodeId, NodeKind, Plan};
use crate::catalog::{CatalogSnapshot, IndexDescriptor};

const DEFAULT_LIST_LENGTH: u64 = 100;

impl Plan {
    /// Recomputes `estimated_nr_items` for every reachable node.
    ///
    /// Subquery bodies are estimated per invocation, i.e. with one input row.
    pub fn estimate(&mut self, catalog: &CatalogSnapshot) {
        let sink = self.sink();
        self.estimate_scope(sink, catalog);
    }

    fn estimate_scope(&mut self, tip: NodeId, catalog: &CatalogSnapshot) {
        let mut incoming: u64 = 1;
        for id in self.scope_nodes(tip) {
            if let Some(NodeKind::Subquery { subquery, .. }) = self.kind(id) {
                let body = *subquery;
                self.estimate_scope(body, catalog);
            }
            let Some(node) = self.node(id) else {
                continue;
            };
            let out = match &node.kind {
                NodeKind::Singleton => 1,
                NodeKind::EnumerateCollection { collection, .. } => {
                    incoming.saturating_mul(catalog.document_count(collection))
                }
                NodeKind::IndexScan {
                    collection,
                    index,
                    ranges,
                    ..
                } => incoming.saturating_mul(index_estimate(
                    catalog.document_count(collection),
                    index,
                    ranges,
                )),
                NodeKind::EnumerateList { in_var, .. } => {
                    incoming.saturating_mul(self.list_length(*in_var))
                }
                NodeKind::Filter { condition } => match condition.as_literal() {
                    Some(value) if value.is_truthy() => incoming,
                    Some(_) => 0,
                    None => incoming.div_ceil(2),
                },
                NodeKind::Limit { offset, count } => incoming.saturating_sub(*offset).min(*count),
                NodeKind::Aggregate { groups, .. } if groups.is_empty() => 1,
                NodeKind::NoResults => 0,
                _ => incoming,
            };
            if let Some(node) = self.node_mut(id) {
                node.estimated_nr_items = out;
            }
            incoming = out;
        }
    }

    fn list_length(&self, var: super::VarId) -> u64 {
        let calcs = self.calculations();
        match calcs.get(&var).and_then(|expr| match expr {
            super::Expr::Literal(super::Value::Array(items)) => Some(items.len() as u64),
            super::Expr::Array(items) => Some(items.len() as u64),
            super::Expr::Range { low, high } => {
                Some(super::expr::range_len(low.as_literal()?, high.as_literal()?))
            }
            _ => None,
        }) {
            Some(len) => len,
            None => DEFAULT_LIST_LENGTH,
        }
    }
}

/// Rows an index lookup returns for one input row.
pub(crate) fn index_estimate(count: u64, index: &IndexDescriptor, ranges: &[IndexRange]) -> u64 {
    if ranges.is_empty() {
        return count;
    }
    let all_equal = ranges.iter().all(IndexRange::is_equality);
    if all_equal && index.unique && ranges.len() >= index.fields.len() {
        return 1.min(count);
    }
    if all_equal {
        // selectivity = distinct values / documents, so one lookup yields 1/s rows
        let selectivity = index.selectivity_estimate.unwrap_or(0.1).clamp(1e-9, 1.0);
        let per_lookup = (1.0 / selectivity).ceil() as u64;
        return per_lookup.clamp(1, count.max(1)).min(count);
    }
    let bounded = ranges
        .iter()
        .filter(|r| !r.is_equality())
        .any(|r| r.lower.is_some() && r.upper.is_some());
    if bounded {
        count.div_ceil(4)
    } else {
        count.div_ceil(2)
    }
}

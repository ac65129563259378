//! Plan node kinds, per-node execution hints and index ranges.
use serde::{Deserialize, Serialize};

use super::expr::Expr;
use super::value::Value;
use super::{AttributePath, NodeId, VarId};
use crate::catalog::IndexDescriptor;

/// One element of a `SORT` clause.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortElement {
    /// Variable holding the sort key.
    pub var: VarId,
    /// Ascending when true.
    pub ascending: bool,
}

impl SortElement {
    /// Ascending element.
    pub fn asc(var: VarId) -> Self {
        Self {
            var,
            ascending: true,
        }
    }

    /// Descending element.
    pub fn desc(var: VarId) -> Self {
        Self {
            var,
            ascending: false,
        }
    }
}

/// One grouping key of a `COLLECT`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupVariable {
    /// Variable visible after the collect.
    pub out_var: VarId,
    /// Variable read before the collect.
    pub in_var: VarId,
}

/// Inclusive or exclusive end of an index range.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RangeBound {
    /// Bound value.
    pub value: Value,
    /// Whether the bound itself matches.
    pub inclusive: bool,
}

/// Constraint on one index field.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct IndexRange {
    /// Field the constraint applies to.
    pub field: AttributePath,
    /// Lower end, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lower: Option<RangeBound>,
    /// Upper end, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upper: Option<RangeBound>,
}

impl IndexRange {
    /// Equality lookup on `field`.
    pub fn equals(field: AttributePath, value: Value) -> Self {
        Self {
            field,
            lower: Some(RangeBound {
                value: value.clone(),
                inclusive: true,
            }),
            upper: Some(RangeBound {
                value,
                inclusive: true,
            }),
        }
    }

    /// True when both ends are the same inclusive value.
    pub fn is_equality(&self) -> bool {
        match (&self.lower, &self.upper) {
            (Some(lo), Some(hi)) => lo.inclusive && hi.inclusive && lo.value.compare(&hi.value).is_eq(),
            _ => false,
        }
    }

    /// Whether `value` lies inside the range.
    pub fn contains(&self, value: &Value) -> bool {
        let above = self.lower.as_ref().map_or(true, |lo| {
            let ord = value.compare(&lo.value);
            ord.is_gt() || (lo.inclusive && ord.is_eq())
        });
        let below = self.upper.as_ref().map_or(true, |hi| {
            let ord = value.compare(&hi.value);
            ord.is_lt() || (hi.inclusive && ord.is_eq())
        });
        above && below
    }

    /// True when no document with a null or missing field can match.
    pub fn excludes_null(&self) -> bool {
        !self.contains(&Value::Null)
    }
}

/// Direction an index scan delivers documents in.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanOrder {
    /// No ordering was requested.
    #[default]
    Unspecified,
    /// Ascending index order is relied upon.
    Forward,
    /// Descending index order is relied upon.
    Reverse,
}

/// Sort execution strategy chosen by the optimizer.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SortStrategy {
    /// Full sort over all input rows.
    #[default]
    #[serde(rename = "none")]
    Standard,
    /// Input is already ordered on a prefix; sort within groups.
    #[serde(rename = "grouped")]
    Grouped,
    /// Output order comes from an index scan.
    #[serde(rename = "index-order")]
    IndexOrder,
}

impl SortStrategy {
    /// Name used in explain output and JSON.
    pub fn as_str(self) -> &'static str {
        match self {
            SortStrategy::Standard => "none",
            SortStrategy::Grouped => "grouped",
            SortStrategy::IndexOrder => "index-order",
        }
    }
}

/// Execution hints attached to every node.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ExecutionHints {
    /// Whether the node's document output is consumed downstream.
    pub produces_result: bool,
    /// Attribute paths downstream nodes read from the output document.
    pub projections: Vec<AttributePath>,
    /// Every projected path is answerable from the index alone.
    pub index_covers_projections: bool,
    /// Sort strategy for sort nodes, or the ordering source for scans.
    pub sort_strategy: SortStrategy,
    /// Leading sort elements already satisfied by input order.
    pub number_of_top_grouped_elements: usize,
}

impl Default for ExecutionHints {
    fn default() -> Self {
        Self {
            produces_result: true,
            projections: Vec::new(),
            index_covers_projections: false,
            sort_strategy: SortStrategy::Standard,
            number_of_top_grouped_elements: 0,
        }
    }
}

/// Data-modification node flavours.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModificationOp {
    /// `INSERT`
    Insert,
    /// `UPDATE`
    Update,
    /// `REPLACE`
    Replace,
    /// `REMOVE`
    Remove,
}

impl ModificationOp {
    fn keyword(self) -> &'static str {
        match self {
            ModificationOp::Insert => "INSERT",
            ModificationOp::Update => "UPDATE",
            ModificationOp::Replace => "REPLACE",
            ModificationOp::Remove => "REMOVE",
        }
    }
}

/// Distributed-execution exchange node flavours.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExchangeOp {
    /// Fan rows out to all shards.
    Scatter,
    /// Merge rows from shards.
    Gather,
    /// Route rows to one shard by key.
    Distribute,
    /// Network hop.
    Remote,
}

/// The operator a node performs.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NodeKind {
    /// Produces one empty row; the root of each scope.
    Singleton,
    /// Full collection scan.
    EnumerateCollection {
        /// Collection scanned.
        collection: String,
        /// Variable bound to each document.
        out_var: VarId,
    },
    /// Iterates an array value.
    EnumerateList {
        /// Array being iterated.
        in_var: VarId,
        /// Variable bound to each element.
        out_var: VarId,
    },
    /// Scan over a secondary or primary index.
    IndexScan {
        /// Collection scanned.
        collection: String,
        /// Variable bound to each document.
        out_var: VarId,
        /// Index used.
        index: IndexDescriptor,
        /// Field constraints pushed into the scan.
        #[serde(default)]
        ranges: Vec<IndexRange>,
        /// Delivery order.
        #[serde(default)]
        order: ScanOrder,
    },
    /// `LET out = expr`
    Calculation {
        /// Variable assigned.
        out_var: VarId,
        /// Computed expression.
        expr: Expr,
    },
    /// Drops rows whose condition is falsy.
    Filter {
        /// Row predicate.
        condition: Expr,
    },
    /// `SORT`
    Sort {
        /// Sort keys, most significant first.
        elements: Vec<SortElement>,
        /// Preserve input order among equal keys.
        #[serde(default)]
        stable: bool,
    },
    /// `LIMIT offset, count`
    Limit {
        /// Rows skipped.
        offset: u64,
        /// Rows emitted.
        count: u64,
    },
    /// `COLLECT`
    Aggregate {
        /// Grouping keys.
        groups: Vec<GroupVariable>,
        /// Variable receiving each group's rows.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        into: Option<VarId>,
    },
    /// Emits a value from the scope.
    Return {
        /// Variable returned.
        in_var: VarId,
    },
    /// Runs a nested scope per row and binds its results as an array.
    Subquery {
        /// Last node of the nested scope.
        subquery: NodeId,
        /// Variable bound to the result array.
        out_var: VarId,
    },
    /// Produces no rows.
    NoResults,
    /// Writes to a collection.
    Modification {
        /// Operation.
        op: ModificationOp,
        /// Target collection.
        collection: String,
        /// Document or key to write.
        in_var: VarId,
        /// Variable bound to the written document.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        out_var: Option<VarId>,
    },
    /// Distributed exchange.
    Exchange {
        /// Flavour.
        op: ExchangeOp,
    },
}

impl NodeKind {
    /// Type name used in explain output.
    pub fn type_name(&self) -> &'static str {
        match self {
            NodeKind::Singleton => "SingletonNode",
            NodeKind::EnumerateCollection { .. } => "EnumerateCollectionNode",
            NodeKind::EnumerateList { .. } => "EnumerateListNode",
            NodeKind::IndexScan { .. } => "IndexNode",
            NodeKind::Calculation { .. } => "CalculationNode",
            NodeKind::Filter { .. } => "FilterNode",
            NodeKind::Sort { .. } => "SortNode",
            NodeKind::Limit { .. } => "LimitNode",
            NodeKind::Aggregate { .. } => "CollectNode",
            NodeKind::Return { .. } => "ReturnNode",
            NodeKind::Subquery { .. } => "SubqueryNode",
            NodeKind::NoResults => "NoResultsNode",
            NodeKind::Modification { op, .. } => match op {
                ModificationOp::Insert => "InsertNode",
                ModificationOp::Update => "UpdateNode",
                ModificationOp::Replace => "ReplaceNode",
                ModificationOp::Remove => "RemoveNode",
            },
            NodeKind::Exchange { op } => match op {
                ExchangeOp::Scatter => "ScatterNode",
                ExchangeOp::Gather => "GatherNode",
                ExchangeOp::Distribute => "DistributeNode",
                ExchangeOp::Remote => "RemoteNode",
            },
        }
    }

    /// Keyword of a modification node.
    pub fn modification_keyword(&self) -> Option<&'static str> {
        match self {
            NodeKind::Modification { op, .. } => Some(op.keyword()),
            _ => None,
        }
    }

    /// Iterates once per input row: collection, list and index scans.
    pub fn is_loop(&self) -> bool {
        matches!(
            self,
            NodeKind::EnumerateCollection { .. }
                | NodeKind::EnumerateList { .. }
                | NodeKind::IndexScan { .. }
        )
    }

    /// Collection or index scan.
    pub fn is_collection_scan(&self) -> bool {
        matches!(
            self,
            NodeKind::EnumerateCollection { .. } | NodeKind::IndexScan { .. }
        )
    }

    /// Variables this node assigns.
    pub fn variables_set(&self) -> Vec<VarId> {
        match self {
            NodeKind::EnumerateCollection { out_var, .. }
            | NodeKind::EnumerateList { out_var, .. }
            | NodeKind::IndexScan { out_var, .. }
            | NodeKind::Calculation { out_var, .. }
            | NodeKind::Subquery { out_var, .. } => vec![*out_var],
            NodeKind::Aggregate { groups, into } => groups
                .iter()
                .map(|g| g.out_var)
                .chain(into.iter().copied())
                .collect(),
            NodeKind::Modification { out_var, .. } => out_var.iter().copied().collect(),
            _ => Vec::new(),
        }
    }

    /// Appends every variable read by this node, repetitions included.
    pub fn collect_variables_used(&self, out: &mut Vec<VarId>) {
        match self {
            NodeKind::EnumerateList { in_var, .. }
            | NodeKind::Return { in_var }
            | NodeKind::Modification { in_var, .. } => out.push(*in_var),
            NodeKind::Calculation { expr, .. } => expr.collect_variables(out),
            NodeKind::Filter { condition } => condition.collect_variables(out),
            NodeKind::Sort { elements, .. } => out.extend(elements.iter().map(|e| e.var)),
            NodeKind::Aggregate { groups, .. } => out.extend(groups.iter().map(|g| g.in_var)),
            _ => {}
        }
    }

    /// Distinct variables read by this node.
    pub fn variables_used(&self) -> Vec<VarId> {
        let mut out = Vec::new();
        self.collect_variables_used(&mut out);
        out.sort();
        out.dedup();
        out
    }

    /// Expression held by calculation and filter nodes.
    pub fn expression(&self) -> Option<&Expr> {
        match self {
            NodeKind::Calculation { expr, .. } => Some(expr),
            NodeKind::Filter { condition } => Some(condition),
            _ => None,
        }
    }

    /// Mutable access to the node's expression.
    pub fn expression_mut(&mut self) -> Option<&mut Expr> {
        match self {
            NodeKind::Calculation { expr, .. } => Some(expr),
            NodeKind::Filter { condition } => Some(condition),
            _ => None,
        }
    }

    /// Replaces plain variable slots (not expression occurrences) holding
    /// `from` with `to`. Returns the number of slots rewritten.
    pub fn rename_variable_slots(&mut self, from: VarId, to: VarId) -> usize {
        let mut count = 0;
        let mut swap = |slot: &mut VarId| {
            if *slot == from {
                *slot = to;
                count += 1;
            }
        };
        match self {
            NodeKind::EnumerateList { in_var, .. }
            | NodeKind::Return { in_var }
            | NodeKind::Modification { in_var, .. } => swap(in_var),
            NodeKind::Sort { elements, .. } => elements.iter_mut().for_each(|e| swap(&mut e.var)),
            NodeKind::Aggregate { groups, .. } => groups.iter_mut().for_each(|g| swap(&mut g.in_var)),
            _ => {}
        }
        count
    }

    /// Writes data; never removed or reordered by rules.
    pub fn is_modification(&self) -> bool {
        matches!(self, NodeKind::Modification { .. })
    }

    /// Distributed exchange node.
    pub fn is_exchange(&self) -> bool {
        matches!(self, NodeKind::Exchange { .. })
    }
}

/// A node in the plan arena.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PlanNode {
    /// Stable identifier.
    pub id: NodeId,
    /// Upstream nodes, in order.
    #[serde(default)]
    pub dependencies: Vec<NodeId>,
    /// Estimated number of output rows.
    #[serde(default)]
    pub estimated_nr_items: u64,
    /// Operator.
    #[serde(flatten)]
    pub kind: NodeKind,
    /// Execution hints.
    #[serde(default)]
    pub hints: ExecutionHints,
}

impl PlanNode {
    /// Creates a node with default hints and no estimate.
    pub fn new(id: NodeId, kind: NodeKind, dependencies: Vec<NodeId>) -> Self {
        Self {
            id,
            dependencies,
            estimated_nr_items: 0,
            kind,
            hints: ExecutionHints::default(),
        }
    }
}

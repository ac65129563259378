//! Logical plan model: an arena of typed nodes plus the variable table.
//!
//! Nodes are addressed by [`NodeId`] and point at their upstream
//! dependencies. The plan's sink is the last node of the main scope; every
//! subquery body is a nested scope rooted at its own singleton and reached
//! through the owning [`NodeKind::Subquery`] node.

mod builder;
mod estimate;
mod expr;
mod func;
mod ids;
mod node;
mod validate;
mod value;
mod variable;

use std::collections::BTreeSet;
use std::hash::Hasher;

use rustc_hash::{FxHashMap, FxHashSet};
use serde::{Deserialize, Serialize};
use xxhash_rust::xxh64::Xxh64;

pub use builder::PlanBuilder;
pub use expr::{BinaryOp, Bindings, Expr, ExprDisplay, LogicalOp, NoBindings, UnaryOp};
pub use func::{EvalError, Function};
pub use ids::{AttributePath, NodeId, VarId};
pub use node::{
    ExchangeOp, ExecutionHints, GroupVariable, IndexRange, ModificationOp, NodeKind, PlanNode,
    RangeBound, ScanOrder, SortElement, SortStrategy,
};
pub use value::Value;
pub use variable::{Variable, VariableTable};

pub(crate) use value::format_number;

use crate::error::PlanError;

/// Extra id headroom [`Plan::from_parts`] accepts beyond twice the node count.
pub const MAX_NODE_ID_SLACK: usize = 1024;

/// Arena-backed logical plan.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(into = "PlanDocument", try_from = "PlanDocument")]
pub struct Plan {
    nodes: Vec<Option<PlanNode>>,
    sink: NodeId,
    variables: VariableTable,
}

/// Serialized form of a plan: `{ "sink", "nodes", "variables" }`.
#[derive(Clone, Debug, Serialize, Deserialize)]
struct PlanDocument {
    sink: NodeId,
    nodes: Vec<PlanNode>,
    #[serde(default)]
    variables: Vec<Variable>,
}

impl From<Plan> for PlanDocument {
    fn from(plan: Plan) -> Self {
        PlanDocument {
            sink: plan.sink,
            nodes: plan.nodes.into_iter().flatten().collect(),
            variables: plan.variables.iter().cloned().collect(),
        }
    }
}

impl TryFrom<PlanDocument> for Plan {
    type Error = PlanError;

    fn try_from(doc: PlanDocument) -> Result<Self, Self::Error> {
        let mut variables = VariableTable::new();
        for var in doc.variables {
            let id = var.id;
            if !variables.insert(var) {
                return Err(PlanError::DuplicateVariable(id));
            }
        }
        Plan::from_parts(doc.nodes, doc.sink, variables)
    }
}

/// Per-variable reference counts over the live nodes of a plan.
#[derive(Debug, Default)]
pub struct VariableUsage {
    counts: FxHashMap<VarId, usize>,
    users: FxHashMap<VarId, Vec<NodeId>>,
}

impl VariableUsage {
    /// Number of references, counting each expression occurrence and each
    /// variable slot separately.
    pub fn count(&self, var: VarId) -> usize {
        self.counts.get(&var).copied().unwrap_or(0)
    }

    /// Distinct nodes reading `var`, in id order.
    pub fn users(&self, var: VarId) -> &[NodeId] {
        self.users.get(&var).map(Vec::as_slice).unwrap_or(&[])
    }

    /// True when any node reads `var`.
    pub fn is_used(&self, var: VarId) -> bool {
        self.count(var) > 0
    }
}

impl Plan {
    /// Assembles a plan from nodes keyed by their ids. Does not validate.
    ///
    /// Ids may leave holes where nodes were removed, but must stay below
    /// twice the node count plus [`MAX_NODE_ID_SLACK`].
    pub fn from_parts(
        nodes: Vec<PlanNode>,
        sink: NodeId,
        variables: VariableTable,
    ) -> Result<Self, PlanError> {
        let count = nodes.len();
        let limit = count.saturating_mul(2).saturating_add(MAX_NODE_ID_SLACK);
        let mut slots: Vec<Option<PlanNode>> = Vec::with_capacity(count);
        for node in nodes {
            let idx = node.id.0 as usize;
            if idx >= limit {
                return Err(PlanError::NodeIdOutOfRange {
                    id: node.id,
                    nodes: count,
                });
            }
            if slots.len() <= idx {
                slots.resize_with(idx + 1, || None);
            }
            if slots[idx].is_some() {
                return Err(PlanError::DuplicateNode(node.id));
            }
            slots[idx] = Some(node);
        }
        Ok(Self {
            nodes: slots,
            sink,
            variables,
        })
    }

    /// Last node of the main scope.
    pub fn sink(&self) -> NodeId {
        self.sink
    }

    /// Looks a node up.
    pub fn node(&self, id: NodeId) -> Option<&PlanNode> {
        self.nodes.get(id.0 as usize).and_then(Option::as_ref)
    }

    /// Looks a node up mutably.
    pub fn node_mut(&mut self, id: NodeId) -> Option<&mut PlanNode> {
        self.nodes.get_mut(id.0 as usize).and_then(Option::as_mut)
    }

    /// Looks a node up, failing with [`PlanError::NoSuchNode`].
    pub fn get(&self, id: NodeId) -> Result<&PlanNode, PlanError> {
        self.node(id).ok_or(PlanError::NoSuchNode(id))
    }

    /// Mutable variant of [`Plan::get`].
    pub fn get_mut(&mut self, id: NodeId) -> Result<&mut PlanNode, PlanError> {
        self.node_mut(id).ok_or(PlanError::NoSuchNode(id))
    }

    /// Kind of a live node.
    pub fn kind(&self, id: NodeId) -> Option<&NodeKind> {
        self.node(id).map(|n| &n.kind)
    }

    /// Live nodes in id order.
    pub fn nodes(&self) -> impl Iterator<Item = &PlanNode> {
        self.nodes.iter().flatten()
    }

    /// Number of live nodes.
    pub fn len(&self) -> usize {
        self.nodes().count()
    }

    /// True when the arena holds no nodes.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Variable table.
    pub fn variables(&self) -> &VariableTable {
        &self.variables
    }

    /// Mutable variable table.
    pub fn variables_mut(&mut self) -> &mut VariableTable {
        &mut self.variables
    }

    /// Appends a node and returns its id. The caller wires it in.
    pub fn add_node(&mut self, kind: NodeKind, dependencies: Vec<NodeId>) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(Some(PlanNode::new(id, kind, dependencies)));
        id
    }

    /// First dependency of a node.
    pub fn dependency(&self, id: NodeId) -> Option<NodeId> {
        self.node(id).and_then(|n| n.dependencies.first().copied())
    }

    /// Nodes that list `id` as a dependency.
    pub fn parents(&self, id: NodeId) -> Vec<NodeId> {
        self.nodes()
            .filter(|n| n.dependencies.contains(&id))
            .map(|n| n.id)
            .collect()
    }

    /// Subquery node whose body ends at `tip`.
    pub fn subquery_owner(&self, tip: NodeId) -> Option<NodeId> {
        self.nodes()
            .find(|n| matches!(n.kind, NodeKind::Subquery { subquery, .. } if subquery == tip))
            .map(|n| n.id)
    }

    /// Nodes of the scope ending at `tip`, in execution order (singleton
    /// first). Subquery bodies are not entered.
    pub fn scope_nodes(&self, tip: NodeId) -> Vec<NodeId> {
        let mut order = Vec::new();
        let mut seen = FxHashSet::default();
        let mut stack = vec![(tip, false)];
        while let Some((id, expanded)) = stack.pop() {
            if expanded {
                order.push(id);
                continue;
            }
            if !seen.insert(id) {
                continue;
            }
            let Some(node) = self.node(id) else {
                continue;
            };
            stack.push((id, true));
            for dep in node.dependencies.iter().rev() {
                if !seen.contains(dep) {
                    stack.push((*dep, false));
                }
            }
        }
        order
    }

    /// Main-scope nodes in execution order.
    pub fn execution_order(&self) -> Vec<NodeId> {
        self.scope_nodes(self.sink)
    }

    /// Every reachable node with its subquery nesting depth. Subquery bodies
    /// are listed right before the subquery node that runs them.
    pub fn walk(&self) -> Vec<(NodeId, usize)> {
        let mut out = Vec::new();
        self.walk_scope(self.sink, 0, &mut out);
        out
    }

    fn walk_scope(&self, tip: NodeId, depth: usize, out: &mut Vec<(NodeId, usize)>) {
        for id in self.scope_nodes(tip) {
            if let Some(NodeKind::Subquery { subquery, .. }) = self.kind(id) {
                self.walk_scope(*subquery, depth + 1, out);
            }
            out.push((id, depth));
        }
    }

    /// Maps every reachable node to the subquery node owning its scope, or
    /// `None` for the main scope.
    pub fn scopes(&self) -> FxHashMap<NodeId, Option<NodeId>> {
        let mut out = FxHashMap::default();
        let mut pending = vec![(self.sink, None)];
        while let Some((tip, owner)) = pending.pop() {
            for id in self.scope_nodes(tip) {
                out.insert(id, owner);
                if let Some(NodeKind::Subquery { subquery, .. }) = self.kind(id) {
                    pending.push((*subquery, Some(id)));
                }
            }
        }
        out
    }

    /// True when a loop node sits upstream of `id` in its scope.
    pub fn is_in_inner_loop(&self, id: NodeId) -> bool {
        let mut current = self.dependency(id);
        while let Some(dep) = current {
            match self.kind(dep) {
                Some(kind) if kind.is_loop() => return true,
                Some(_) => current = self.dependency(dep),
                None => return false,
            }
        }
        false
    }

    /// Removes a single-dependency node, re-pointing its parents, any
    /// subquery node and the sink at its dependency.
    pub fn unlink(&mut self, id: NodeId) -> Result<PlanNode, PlanError> {
        let node = self.get(id)?;
        let dep = match node.dependencies.as_slice() {
            [dep] => *dep,
            _ => return Err(PlanError::NotUnlinkable(id)),
        };
        for other in self.nodes.iter_mut().flatten() {
            for slot in other.dependencies.iter_mut() {
                if *slot == id {
                    *slot = dep;
                }
            }
            if let NodeKind::Subquery { subquery, .. } = &mut other.kind {
                if *subquery == id {
                    *subquery = dep;
                }
            }
        }
        if self.sink == id {
            self.sink = dep;
        }
        self.nodes[id.0 as usize]
            .take()
            .ok_or(PlanError::NoSuchNode(id))
    }

    /// Deletes every node of the scope ending at `tip`, nested subquery
    /// bodies included. Returns the number of nodes removed.
    pub fn remove_scope(&mut self, tip: NodeId) -> usize {
        let mut removed = 0;
        let mut pending = vec![tip];
        while let Some(scope_tip) = pending.pop() {
            for id in self.scope_nodes(scope_tip) {
                if let Some(NodeKind::Subquery { subquery, .. }) = self.kind(id) {
                    pending.push(*subquery);
                }
                if let Some(slot) = self.nodes.get_mut(id.0 as usize) {
                    if slot.take().is_some() {
                        removed += 1;
                    }
                }
            }
        }
        removed
    }

    /// Reference counts for every variable.
    pub fn variable_usage(&self) -> VariableUsage {
        let mut usage = VariableUsage::default();
        let mut refs = Vec::new();
        for node in self.nodes() {
            refs.clear();
            node.kind.collect_variables_used(&mut refs);
            for var in &refs {
                *usage.counts.entry(*var).or_insert(0) += 1;
                let users = usage.users.entry(*var).or_default();
                if users.last() != Some(&node.id) {
                    users.push(node.id);
                }
            }
        }
        usage
    }

    /// Node defining each variable.
    pub fn definitions(&self) -> FxHashMap<VarId, NodeId> {
        let mut out = FxHashMap::default();
        for node in self.nodes() {
            for var in node.kind.variables_set() {
                out.entry(var).or_insert(node.id);
            }
        }
        out
    }

    /// Expression of every calculation, keyed by the variable it defines.
    pub fn calculations(&self) -> FxHashMap<VarId, &Expr> {
        self.nodes()
            .filter_map(|n| match &n.kind {
                NodeKind::Calculation { out_var, expr } => Some((*out_var, expr)),
                _ => None,
            })
            .collect()
    }

    /// Collections scanned or modified by the plan.
    pub fn collections(&self) -> BTreeSet<String> {
        self.nodes()
            .filter_map(|n| match &n.kind {
                NodeKind::EnumerateCollection { collection, .. }
                | NodeKind::IndexScan { collection, .. }
                | NodeKind::Modification { collection, .. } => Some(collection.clone()),
                _ => None,
            })
            .collect()
    }

    /// Structural hash over node ids, edges, kinds and hints. Estimates are
    /// not part of the fingerprint.
    pub fn fingerprint(&self) -> u64 {
        let mut hasher = Xxh64::new(0);
        hasher.write_u32(self.sink.0);
        for node in self.nodes() {
            hasher.write_u32(node.id.0);
            hasher.write_u64(node.dependencies.len() as u64);
            for dep in &node.dependencies {
                hasher.write_u32(dep.0);
            }
            let body = serde_json::to_vec(&(&node.kind, &node.hints)).unwrap_or_default();
            hasher.write(&body);
        }
        hasher.finish()
    }
}

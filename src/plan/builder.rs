//! Incremental plan builder used by tests, tools and embedders.

use std::mem;

use super::node::{GroupVariable, IndexRange, ModificationOp, NodeKind, PlanNode, SortElement};
use super::{Expr, NodeId, Plan, VarId, VariableTable};
use crate::catalog::IndexDescriptor;
use crate::error::PlanError;

/// Builds a plan one clause at a time, appending each node on top of the
/// current scope.
///
/// Structural errors are deferred and reported by [`PlanBuilder::build`],
/// which also validates the finished plan.
pub struct PlanBuilder {
    nodes: Vec<PlanNode>,
    variables: VariableTable,
    scopes: Vec<NodeId>,
    error: Option<PlanError>,
}

impl Default for PlanBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl PlanBuilder {
    /// Creates a builder whose main scope holds a singleton.
    pub fn new() -> Self {
        let mut builder = Self {
            nodes: Vec::new(),
            variables: VariableTable::new(),
            scopes: Vec::new(),
            error: None,
        };
        let root = builder.push_root();
        builder.scopes.push(root);
        builder
    }

    fn push_root(&mut self) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(PlanNode::new(id, NodeKind::Singleton, Vec::new()));
        id
    }

    fn push(&mut self, kind: NodeKind) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        let deps = match self.scopes.last() {
            Some(tip) => vec![*tip],
            None => {
                self.error.get_or_insert(PlanError::UnbalancedSubquery);
                Vec::new()
            }
        };
        self.nodes.push(PlanNode::new(id, kind, deps));
        if let Some(tip) = self.scopes.last_mut() {
            *tip = id;
        }
        id
    }

    /// Allocates a variable without a defining node.
    pub fn variable(&mut self, name: &str) -> VarId {
        self.variables.create(name)
    }

    /// Id of the most recent node of the current scope.
    pub fn current(&self) -> Option<NodeId> {
        self.scopes.last().copied()
    }

    /// `FOR name IN collection` as a full scan.
    pub fn enumerate_collection(&mut self, collection: &str, name: &str) -> VarId {
        let out_var = self.variables.create(name);
        self.push(NodeKind::EnumerateCollection {
            collection: collection.to_owned(),
            out_var,
        });
        out_var
    }

    /// `FOR name IN list`
    pub fn enumerate_list(&mut self, list: VarId, name: &str) -> VarId {
        let out_var = self.variables.create(name);
        self.push(NodeKind::EnumerateList {
            in_var: list,
            out_var,
        });
        out_var
    }

    /// `FOR name IN collection` through an index.
    pub fn index_scan(
        &mut self,
        collection: &str,
        name: &str,
        index: IndexDescriptor,
        ranges: Vec<IndexRange>,
    ) -> VarId {
        let out_var = self.variables.create(name);
        self.push(NodeKind::IndexScan {
            collection: collection.to_owned(),
            out_var,
            index,
            ranges,
            order: Default::default(),
        });
        out_var
    }

    /// `LET name = expr`
    pub fn calculate(&mut self, name: &str, expr: Expr) -> VarId {
        let out_var = self.variables.create(name);
        self.push(NodeKind::Calculation { out_var, expr });
        out_var
    }

    /// `FILTER condition`
    pub fn filter(&mut self, condition: Expr) -> NodeId {
        self.push(NodeKind::Filter { condition })
    }

    /// `SORT` over `(variable, ascending)` pairs.
    pub fn sort<I>(&mut self, elements: I) -> NodeId
    where
        I: IntoIterator<Item = (VarId, bool)>,
    {
        let elements = elements
            .into_iter()
            .map(|(var, ascending)| SortElement { var, ascending })
            .collect();
        self.push(NodeKind::Sort {
            elements,
            stable: false,
        })
    }

    /// `LIMIT offset, count`
    pub fn limit(&mut self, offset: u64, count: u64) -> NodeId {
        self.push(NodeKind::Limit { offset, count })
    }

    /// `COLLECT out = in, ... [INTO into]`. Returns the group output
    /// variables followed by the `INTO` variable, if any.
    pub fn collect(&mut self, groups: &[(&str, VarId)], into: Option<&str>) -> Vec<VarId> {
        let groups: Vec<GroupVariable> = groups
            .iter()
            .map(|(name, in_var)| GroupVariable {
                out_var: self.variables.create(*name),
                in_var: *in_var,
            })
            .collect();
        let into = into.map(|name| self.variables.create(name));
        let mut vars: Vec<VarId> = groups.iter().map(|g| g.out_var).collect();
        vars.extend(into);
        self.push(NodeKind::Aggregate { groups, into });
        vars
    }

    /// `RETURN var`
    pub fn return_var(&mut self, var: VarId) -> NodeId {
        self.push(NodeKind::Return { in_var: var })
    }

    /// Writes `var` into `collection`. Returns the node id.
    pub fn modify(&mut self, op: ModificationOp, collection: &str, var: VarId) -> NodeId {
        self.push(NodeKind::Modification {
            op,
            collection: collection.to_owned(),
            in_var: var,
            out_var: None,
        })
    }

    /// Appends a node that produces no rows.
    pub fn no_results(&mut self) -> NodeId {
        self.push(NodeKind::NoResults)
    }

    /// Opens a nested scope. Subsequent clauses go into the subquery body
    /// until [`PlanBuilder::end_subquery`].
    pub fn begin_subquery(&mut self) {
        let root = self.push_root();
        self.scopes.push(root);
    }

    /// Closes the innermost subquery and binds its result array to `name`.
    pub fn end_subquery(&mut self, name: &str) -> VarId {
        let out_var = self.variables.create(name);
        if self.scopes.len() < 2 {
            self.error.get_or_insert(PlanError::UnbalancedSubquery);
            return out_var;
        }
        if let Some(body_tip) = self.scopes.pop() {
            self.push(NodeKind::Subquery {
                subquery: body_tip,
                out_var,
            });
        }
        out_var
    }

    /// Finishes and validates the plan.
    pub fn build(mut self) -> Result<Plan, PlanError> {
        if let Some(err) = self.error.take() {
            return Err(err);
        }
        if self.scopes.len() != 1 {
            return Err(PlanError::UnbalancedSubquery);
        }
        let sink = self.scopes[0];
        let plan = Plan::from_parts(
            mem::take(&mut self.nodes),
            sink,
            mem::take(&mut self.variables),
        )?;
        plan.validate()?;
        Ok(plan)
    }
}

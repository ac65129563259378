//! Structural validation run on input plans and after every rule firing.

use rustc_hash::{FxHashMap, FxHashSet};

use super::{NodeId, NodeKind, Plan, VarId};
use crate::error::PlanError;

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    Active,
    Done,
}

impl Plan {
    /// Checks the plan's structural invariants.
    ///
    /// * the sink and every edge target exist;
    /// * dependency counts match node kinds;
    /// * the node graph is acyclic and every node is reachable;
    /// * each scope bottoms out in exactly one singleton;
    /// * every variable is defined once and only read where visible.
    pub fn validate(&self) -> Result<(), PlanError> {
        if self.node(self.sink()).is_none() {
            return Err(PlanError::MissingSink(self.sink()));
        }
        for node in self.nodes() {
            for target in edges(&node.kind, &node.dependencies) {
                if self.node(target).is_none() {
                    return Err(PlanError::UnknownNode {
                        node: node.id,
                        target,
                    });
                }
            }
            let found = node.dependencies.len();
            let arity_ok = match node.kind {
                NodeKind::Singleton => found == 0,
                NodeKind::Exchange { .. } => found >= 1,
                _ => found == 1,
            };
            if !arity_ok {
                return Err(PlanError::Arity {
                    node: node.id,
                    node_type: node.kind.type_name(),
                    found,
                });
            }
        }

        let mut marks = FxHashMap::default();
        self.check_acyclic(self.sink(), &mut marks)?;
        if let Some(orphan) = self.nodes().find(|n| !marks.contains_key(&n.id)) {
            return Err(PlanError::Orphan(orphan.id));
        }

        let mut definitions = FxHashMap::default();
        self.check_scope(self.sink(), &FxHashSet::default(), &mut definitions)
    }

    fn check_acyclic(
        &self,
        id: NodeId,
        marks: &mut FxHashMap<NodeId, Mark>,
    ) -> Result<(), PlanError> {
        match marks.get(&id) {
            Some(Mark::Active) => return Err(PlanError::Cycle(id)),
            Some(Mark::Done) => return Ok(()),
            None => {}
        }
        marks.insert(id, Mark::Active);
        if let Some(node) = self.node(id) {
            for target in edges(&node.kind, &node.dependencies) {
                self.check_acyclic(target, marks)?;
            }
        }
        marks.insert(id, Mark::Done);
        Ok(())
    }

    fn check_scope(
        &self,
        tip: NodeId,
        inherited: &FxHashSet<VarId>,
        definitions: &mut FxHashMap<VarId, NodeId>,
    ) -> Result<(), PlanError> {
        let order = self.scope_nodes(tip);
        let singletons = order
            .iter()
            .filter(|id| matches!(self.kind(**id), Some(NodeKind::Singleton)))
            .count();
        if singletons != 1 {
            return Err(PlanError::Singleton {
                scope: tip,
                found: singletons,
            });
        }

        let mut visible = inherited.clone();
        for id in order {
            let node = self.get(id)?;
            if let NodeKind::Subquery { subquery, .. } = node.kind {
                let ends_scope = matches!(
                    self.kind(subquery),
                    Some(NodeKind::Return { .. } | NodeKind::Modification { .. } | NodeKind::NoResults)
                );
                if !ends_scope {
                    return Err(PlanError::SubqueryTip(id));
                }
                self.check_scope(subquery, &visible, definitions)?;
            }
            for var in node.kind.variables_used() {
                if !self.variables().contains(var) {
                    return Err(PlanError::UnknownVariable { node: id, var });
                }
                if !visible.contains(&var) {
                    return Err(PlanError::UndefinedVariable { node: id, var });
                }
            }
            if matches!(node.kind, NodeKind::Aggregate { .. }) {
                visible = inherited.clone();
            }
            for var in node.kind.variables_set() {
                if !self.variables().contains(var) {
                    return Err(PlanError::UnknownVariable { node: id, var });
                }
                if let Some(first) = definitions.insert(var, id) {
                    return Err(PlanError::DuplicateDefinition {
                        var,
                        first,
                        second: id,
                    });
                }
                visible.insert(var);
            }
        }
        Ok(())
    }
}

fn edges(kind: &NodeKind, dependencies: &[NodeId]) -> Vec<NodeId> {
    let mut out = dependencies.to_vec();
    if let NodeKind::Subquery { subquery, .. } = kind {
        out.push(*subquery);
    }
    out
}

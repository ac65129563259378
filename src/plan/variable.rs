use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::VarId;

/// A named variable owned by a plan.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Variable {
    /// Identifier referenced by nodes and expressions.
    pub id: VarId,
    /// Name as written in the query, used in explain output.
    pub name: String,
}

/// Table of all variables a plan knows about.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct VariableTable {
    vars: BTreeMap<VarId, Variable>,
    next_id: u32,
}

impl VariableTable {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocates a fresh variable.
    pub fn create(&mut self, name: impl Into<String>) -> VarId {
        let id = VarId(self.next_id);
        self.next_id += 1;
        self.vars.insert(
            id,
            Variable {
                id,
                name: name.into(),
            },
        );
        id
    }

    /// Registers a variable with a caller-chosen id. Returns false when the id
    /// is already taken.
    pub fn insert(&mut self, var: Variable) -> bool {
        if self.vars.contains_key(&var.id) {
            return false;
        }
        self.next_id = self.next_id.max(var.id.0 + 1);
        self.vars.insert(var.id, var);
        true
    }

    /// Looks a variable up.
    pub fn get(&self, id: VarId) -> Option<&Variable> {
        self.vars.get(&id)
    }

    /// True when the id is registered.
    pub fn contains(&self, id: VarId) -> bool {
        self.vars.contains_key(&id)
    }

    /// Display name, or `#id` for unknown ids.
    pub fn name(&self, id: VarId) -> String {
        match self.vars.get(&id) {
            Some(var) => var.name.clone(),
            None => id.to_string(),
        }
    }

    /// Finds the most recently created variable with the given name.
    pub fn lookup(&self, name: &str) -> Option<VarId> {
        self.vars.values().rev().find(|v| v.name == name).map(|v| v.id)
    }

    /// Variables in id order.
    pub fn iter(&self) -> impl Iterator<Item = &Variable> {
        self.vars.values()
    }

    /// Number of variables.
    pub fn len(&self) -> usize {
        self.vars.len()
    }

    /// True when no variables exist.
    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }
}

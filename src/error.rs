//! Error types surfaced by plan construction, configuration and the driver.

use std::path::PathBuf;

use thiserror::Error;

use crate::plan::{NodeId, VarId};

/// Convenience alias for fallible optimizer operations.
pub type Result<T> = std::result::Result<T, OptimizerError>;

/// Rejected optimizer configuration or rule directive.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A directive named a rule the registry does not know.
    #[error("unknown optimizer rule '{name}'")]
    UnknownRule {
        /// Rule name without its sign.
        name: String,
    },
    /// A directive was not of the form `+name`, `-name`, `+all` or `-all`.
    #[error("invalid rule directive '{directive}' (expected +name, -name, +all or -all)")]
    InvalidDirective {
        /// Directive as supplied.
        directive: String,
    },
    /// The same rule was explicitly enabled and disabled.
    #[error("rule '{name}' is both enabled and disabled")]
    ConflictingDirectives {
        /// Rule named by both directives.
        name: String,
    },
    /// `max_passes` must allow at least one pass.
    #[error("max_passes must be at least 1 (got {value})")]
    InvalidPassLimit {
        /// Supplied ceiling.
        value: usize,
    },
    /// Configuration file could not be read.
    #[error("failed to read config {path}: {source}")]
    Read {
        /// File that failed to load.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: std::io::Error,
    },
    /// Configuration text was not valid TOML for the optimizer schema.
    #[error("failed to parse optimizer config: {0}")]
    Parse(#[from] toml::de::Error),
}

impl ConfigError {
    /// Returns a stable, machine-readable code for the error variant.
    pub fn code(&self) -> &'static str {
        match self {
            ConfigError::UnknownRule { .. } => "UnknownRule",
            ConfigError::InvalidDirective { .. } => "InvalidDirective",
            ConfigError::ConflictingDirectives { .. } => "ConflictingDirectives",
            ConfigError::InvalidPassLimit { .. } => "InvalidPassLimit",
            ConfigError::Read { .. } => "ConfigRead",
            ConfigError::Parse(_) => "ConfigParse",
        }
    }
}

/// Structural problem found in a plan.
///
/// Returned by [`crate::plan::Plan::validate`] and by the plan builder. The
/// driver wraps these either as [`OptimizerError::InvalidPlan`] (bad input) or
/// as [`OptimizerError::InvariantViolation`] (a rule broke the plan).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PlanError {
    /// The sink id does not name a live node.
    #[error("plan sink {0} does not exist")]
    MissingSink(NodeId),
    /// Two nodes were registered under one id.
    #[error("duplicate node id {0}")]
    DuplicateNode(NodeId),
    /// No live node has this id.
    #[error("node {0} does not exist")]
    NoSuchNode(NodeId),
    /// A serialized node id is far beyond the number of nodes in the plan.
    #[error("node id {id} is out of range for a plan of {nodes} nodes")]
    NodeIdOutOfRange {
        /// Offending id.
        id: NodeId,
        /// Number of nodes supplied.
        nodes: usize,
    },
    /// A dependency or subquery edge points at a missing node.
    #[error("node {node} references unknown node {target}")]
    UnknownNode {
        /// Node holding the dangling edge.
        node: NodeId,
        /// Missing target.
        target: NodeId,
    },
    /// The node graph contains a cycle through the given node.
    #[error("cycle detected through node {0}")]
    Cycle(NodeId),
    /// A live node is not reachable from the sink.
    #[error("node {0} is not reachable from the plan sink")]
    Orphan(NodeId),
    /// A node has the wrong number of dependencies for its kind.
    #[error("{node_type} node {node} has {found} dependencies")]
    Arity {
        /// Offending node.
        node: NodeId,
        /// Node type name.
        node_type: &'static str,
        /// Number of dependencies found.
        found: usize,
    },
    /// A scope does not bottom out in exactly one singleton.
    #[error("scope ending at node {scope} has {found} singleton nodes")]
    Singleton {
        /// Last node of the scope.
        scope: NodeId,
        /// Singleton count found.
        found: usize,
    },
    /// A subquery body does not end in a node that produces its result.
    #[error("subquery body of node {0} must end in RETURN, a modification or no-results")]
    SubqueryTip(NodeId),
    /// A variable id is missing from the variable table.
    #[error("node {node} references unknown variable {var}")]
    UnknownVariable {
        /// Referencing node.
        node: NodeId,
        /// Missing variable id.
        var: VarId,
    },
    /// Two variables were registered under one id.
    #[error("duplicate variable id {0}")]
    DuplicateVariable(VarId),
    /// A variable is assigned by more than one node.
    #[error("variable {var} is defined by node {first} and node {second}")]
    DuplicateDefinition {
        /// Variable defined twice.
        var: VarId,
        /// First defining node.
        first: NodeId,
        /// Second defining node.
        second: NodeId,
    },
    /// A variable is read where no defining node is visible.
    #[error("node {node} uses variable {var} which is not defined in scope")]
    UndefinedVariable {
        /// Reading node.
        node: NodeId,
        /// Variable that is not visible.
        var: VarId,
    },
    /// A structural edit required a node with exactly one dependency.
    #[error("node {0} cannot be unlinked: it must have exactly one dependency")]
    NotUnlinkable(NodeId),
    /// The builder was asked to close a subquery that was never opened, or
    /// finished with one still open.
    #[error("unbalanced subquery in plan builder")]
    UnbalancedSubquery,
}

impl PlanError {
    /// Returns a stable, machine-readable code for the error variant.
    pub fn code(&self) -> &'static str {
        match self {
            PlanError::MissingSink(_) => "MissingSink",
            PlanError::DuplicateNode(_) => "DuplicateNode",
            PlanError::NoSuchNode(_) => "NoSuchNode",
            PlanError::NodeIdOutOfRange { .. } => "NodeIdOutOfRange",
            PlanError::UnknownNode { .. } => "UnknownNode",
            PlanError::Cycle(_) => "Cycle",
            PlanError::Orphan(_) => "Orphan",
            PlanError::Arity { .. } => "Arity",
            PlanError::Singleton { .. } => "Singleton",
            PlanError::SubqueryTip(_) => "SubqueryTip",
            PlanError::UnknownVariable { .. } => "UnknownVariable",
            PlanError::DuplicateVariable(_) => "DuplicateVariable",
            PlanError::DuplicateDefinition { .. } => "DuplicateDefinition",
            PlanError::UndefinedVariable { .. } => "UndefinedVariable",
            PlanError::NotUnlinkable(_) => "NotUnlinkable",
            PlanError::UnbalancedSubquery => "UnbalancedSubquery",
        }
    }
}

/// Errors produced by the optimizer driver and its callers.
#[derive(Debug, Error)]
pub enum OptimizerError {
    /// Rule selection or driver configuration was rejected.
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// The input plan failed validation before any rule ran.
    #[error("invalid input plan: {0}")]
    InvalidPlan(#[source] PlanError),
    /// A rule left the plan in a state that fails validation.
    #[error("rule '{rule}' violated a plan invariant: {source}")]
    InvariantViolation {
        /// Name of the rule that produced the broken plan.
        rule: &'static str,
        /// Validation failure.
        #[source]
        source: PlanError,
    },
    /// A rule reported a change it did not make, or changed the plan while
    /// reporting none.
    #[error("rule '{rule}' reported changed={reported} but the plan fingerprint disagrees")]
    ChangeMisreported {
        /// Offending rule.
        rule: &'static str,
        /// What the rule reported.
        reported: bool,
    },
    /// The fixed point was not reached within the pass ceiling.
    #[error("optimizer did not reach a fixed point within {max_passes} passes")]
    PassLimitExceeded {
        /// Configured ceiling.
        max_passes: usize,
    },
    /// Optimization was cancelled between passes.
    #[error("optimization cancelled after {passes} passes")]
    Cancelled {
        /// Passes completed before cancellation was observed.
        passes: usize,
    },
    /// A rule hit a structural edit error while rewriting.
    #[error("rule '{rule}' failed: {source}")]
    Rule {
        /// Rule that failed.
        rule: &'static str,
        /// Underlying structural error.
        #[source]
        source: PlanError,
    },
    /// The index catalog could not answer a lookup.
    #[error("index catalog error: {0}")]
    Catalog(String),
    /// Filesystem failure while loading plans or catalogs.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// Plan or catalog JSON could not be decoded.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl OptimizerError {
    /// Returns a stable, machine-readable code for the error variant.
    pub fn code(&self) -> &'static str {
        match self {
            OptimizerError::Config(err) => err.code(),
            OptimizerError::InvalidPlan(_) => "InvalidPlan",
            OptimizerError::InvariantViolation { .. } => "InvariantViolation",
            OptimizerError::ChangeMisreported { .. } => "ChangeMisreported",
            OptimizerError::PassLimitExceeded { .. } => "PassLimitExceeded",
            OptimizerError::Cancelled { .. } => "Cancelled",
            OptimizerError::Rule { .. } => "RuleFailed",
            OptimizerError::Catalog(_) => "Catalog",
            OptimizerError::Io(_) => "Io",
            OptimizerError::Json(_) => "Json",
        }
    }

    /// True for failures that indicate a defect in a rule rather than bad
    /// input. A pass-limit breach counts: it means some rule keeps firing.
    pub fn is_internal(&self) -> bool {
        matches!(
            self,
            OptimizerError::InvariantViolation { .. }
                | OptimizerError::ChangeMisreported { .. }
                | OptimizerError::PassLimitExceeded { .. }
                | OptimizerError::Rule { .. }
        )
    }
}

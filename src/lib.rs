//! Rule-based optimizer for logical query plans of a document/graph query
//! language.
//!
//! A logical [`plan::Plan`] and an [`catalog::IndexCatalog`] go in; a rewritten
//! plan, the names of the rules that fired and per-node execution hints come
//! out. See [`optimizer::Optimizer`] for the driver and [`rules`] for the
//! individual rewrites.

#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod catalog;
pub mod error;
pub mod explain;
pub mod optimizer;
pub mod plan;
pub mod rules;
pub mod sort;

pub use catalog::{
    CatalogSnapshot, CollectionInfo, InMemoryCatalog, IndexCatalog, IndexDescriptor, IndexKind,
};
pub use error::{ConfigError, OptimizerError, PlanError, Result};
pub use explain::Explanation;
pub use optimizer::{
    optimize, CancellationToken, OptimizedPlan, Optimizer, OptimizerConfig, Outcome, RuleId,
    RuleSelection,
};
pub use plan::{Expr, NodeId, NodeKind, Plan, PlanBuilder, Value, VarId};

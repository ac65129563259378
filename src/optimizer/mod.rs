//! Fixed-point rule driver.
//!
//! The driver runs the enabled rules in registry order, pass after pass,
//! until a whole pass changes nothing. Every firing is recorded. With
//! invariant checks on (the default) the plan is re-validated after each
//! firing and the rule's change report is cross-checked against the plan
//! fingerprint. Cancellation is polled between passes.

mod cancel;
mod config;
mod registry;
mod rule;

use tracing::{debug, debug_span, error, trace, warn};

pub use cancel::CancellationToken;
pub use config::{OptimizerConfig, RuleSelection, DEFAULT_MAX_PASSES};
pub use registry::RuleId;
pub use rule::{OptimizerRule, RuleContext, Transformed};

use crate::catalog::{CatalogSnapshot, IndexCatalog};
use crate::error::{OptimizerError, Result};
use crate::explain::Explanation;
use crate::plan::Plan;

/// Result of a successful run.
#[derive(Debug, Clone)]
pub struct OptimizedPlan {
    /// Rewritten plan with estimates filled in.
    pub plan: Plan,
    /// Rule names in firing order; a rule appears once per firing.
    pub applied_rules: Vec<&'static str>,
    /// Passes executed, the final no-change pass included.
    pub passes: usize,
    /// Warnings raised by rules.
    pub warnings: Vec<String>,
}

impl OptimizedPlan {
    /// Explain output for the optimized plan.
    pub fn explain(&self) -> Explanation {
        Explanation::new(&self.plan, &self.applied_rules, &self.warnings)
    }
}

/// Diagnostics of a run stopped by its [`CancellationToken`].
#[derive(Debug, Clone)]
pub struct CancelledPlan {
    /// Passes completed before cancellation was observed.
    pub passes: usize,
    /// Rules that fired before cancellation.
    pub applied_rules: Vec<&'static str>,
    /// Rendered explanation of the partially optimized plan.
    pub explanation: String,
}

/// Outcome of [`Optimizer::run_with_cancellation`].
#[derive(Debug, Clone)]
pub enum Outcome {
    /// Fixed point reached.
    Optimized(OptimizedPlan),
    /// Cancellation was requested between passes.
    Cancelled(CancelledPlan),
}

impl Outcome {
    /// Converts cancellation into [`OptimizerError::Cancelled`].
    pub fn into_result(self) -> Result<OptimizedPlan> {
        match self {
            Outcome::Optimized(plan) => Ok(plan),
            Outcome::Cancelled(cancelled) => Err(OptimizerError::Cancelled {
                passes: cancelled.passes,
            }),
        }
    }
}

/// Rule driver.
pub struct Optimizer {
    config: OptimizerConfig,
    rules: Vec<Box<dyn OptimizerRule>>,
}

impl Optimizer {
    /// Builds a driver over the built-in rules selected by `config.rules`.
    pub fn new(config: OptimizerConfig) -> Result<Self> {
        config.validate()?;
        let rules = config.rule_selection()?.enabled().map(RuleId::build).collect();
        Ok(Self { config, rules })
    }

    /// Builds a driver over an explicit rule list, ignoring `config.rules`.
    pub fn from_rules(config: OptimizerConfig, rules: Vec<Box<dyn OptimizerRule>>) -> Result<Self> {
        if config.max_passes == 0 {
            return Err(crate::error::ConfigError::InvalidPassLimit {
                value: config.max_passes,
            }
            .into());
        }
        Ok(Self { config, rules })
    }

    /// Active configuration.
    pub fn config(&self) -> &OptimizerConfig {
        &self.config
    }

    /// Names of the rules this driver runs, in order.
    pub fn rule_names(&self) -> Vec<&'static str> {
        self.rules.iter().map(|r| r.name()).collect()
    }

    /// Optimizes `plan` to a fixed point.
    pub fn run(&self, plan: Plan, catalog: &dyn IndexCatalog) -> Result<OptimizedPlan> {
        self.run_with_cancellation(plan, catalog, &CancellationToken::new())?
            .into_result()
    }

    /// Optimizes `plan`, polling `cancel` before every pass.
    pub fn run_with_cancellation(
        &self,
        mut plan: Plan,
        catalog: &dyn IndexCatalog,
        cancel: &CancellationToken,
    ) -> Result<Outcome> {
        let span = debug_span!("optimize", rules = self.rules.len(), nodes = plan.len());
        let _guard = span.enter();

        plan.validate().map_err(OptimizerError::InvalidPlan)?;
        let snapshot = CatalogSnapshot::capture(catalog, plan.collections())?;
        let verify = self.config.verify_invariants;
        let mut applied: Vec<&'static str> = Vec::new();
        let mut warnings = Vec::new();
        let mut passes = 0;

        loop {
            if cancel.is_cancelled() {
                warn!(passes, fired = applied.len(), "optimization cancelled");
                let explanation = Explanation::new(&plan, &applied, &warnings).to_text();
                return Ok(Outcome::Cancelled(CancelledPlan {
                    passes,
                    applied_rules: applied,
                    explanation,
                }));
            }
            if passes == self.config.max_passes {
                error!(
                    max_passes = self.config.max_passes,
                    applied = applied.len(),
                    "optimizer did not reach a fixed point"
                );
                return Err(OptimizerError::PassLimitExceeded {
                    max_passes: self.config.max_passes,
                });
            }
            passes += 1;

            let mut changed_this_pass = false;
            for rule in &self.rules {
                let before = verify.then(|| plan.fingerprint());
                let mut ctx = RuleContext::new(&snapshot, &mut warnings);
                let result = rule.apply(&mut plan, &mut ctx)?;

                if let Some(before) = before {
                    let actually_changed = plan.fingerprint() != before;
                    if actually_changed != result.changed {
                        error!(rule = rule.name(), reported = result.changed, "change report mismatch");
                        return Err(OptimizerError::ChangeMisreported {
                            rule: rule.name(),
                            reported: result.changed,
                        });
                    }
                    if result.changed {
                        plan.validate()
                            .map_err(|source| OptimizerError::InvariantViolation {
                                rule: rule.name(),
                                source,
                            })?;
                    }
                }

                if result.changed {
                    changed_this_pass = true;
                    applied.push(rule.name());
                    debug!(rule = rule.name(), pass = passes, "rule applied");
                } else {
                    trace!(rule = rule.name(), pass = passes, "rule did not fire");
                }
            }

            if !changed_this_pass {
                debug!(passes, fired = applied.len(), "reached fixed point");
                break;
            }
        }

        plan.estimate(&snapshot);
        Ok(Outcome::Optimized(OptimizedPlan {
            plan,
            applied_rules: applied,
            passes,
            warnings,
        }))
    }
}

/// Optimizes `plan` with the built-in rules selected by `rules` directives
/// and default settings otherwise.
pub fn optimize<S: AsRef<str>>(
    plan: Plan,
    rules: &[S],
    catalog: &dyn IndexCatalog,
) -> Result<OptimizedPlan> {
    let config =
        OptimizerConfig::default().with_rules(rules.iter().map(|r| r.as_ref().to_owned()));
    Optimizer::new(config)?.run(plan, catalog)
}

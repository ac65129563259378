//! Optimizer configuration and rule-directive parsing.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use super::registry::RuleId;
use crate::error::ConfigError;

/// Default pass ceiling.
pub const DEFAULT_MAX_PASSES: usize = 32;

/// Driver settings.
///
/// Loadable from TOML either at the top level or under an `[optimizer]`
/// table:
///
/// ```toml
/// [optimizer]
/// rules = ["-all", "+use-index-for-sort"]
/// max_passes = 16
/// verify_invariants = true
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OptimizerConfig {
    /// Rule directives applied left to right on top of "all enabled".
    pub rules: Vec<String>,
    /// Second directive layer applied after `rules`, e.g. from the command
    /// line. It may flip rules named in `rules`; conflicts are only checked
    /// within the layer.
    #[serde(skip)]
    pub rule_overrides: Vec<String>,
    /// Maximum number of full passes over the enabled rules.
    pub max_passes: usize,
    /// Validate the plan and cross-check change reports after every firing.
    pub verify_invariants: bool,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            rules: Vec::new(),
            rule_overrides: Vec::new(),
            max_passes: DEFAULT_MAX_PASSES,
            verify_invariants: true,
        }
    }
}

impl OptimizerConfig {
    /// Replaces the rule directives.
    pub fn with_rules<I, S>(mut self, rules: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.rules = rules.into_iter().map(Into::into).collect();
        self
    }

    /// Appends directives to the override layer.
    pub fn with_rule_overrides<I, S>(mut self, rules: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.rule_overrides.extend(rules.into_iter().map(Into::into));
        self
    }

    /// Sets the pass ceiling.
    pub fn with_max_passes(mut self, max_passes: usize) -> Self {
        self.max_passes = max_passes;
        self
    }

    /// Enables or disables per-firing invariant checks.
    pub fn with_invariant_checks(mut self, enabled: bool) -> Self {
        self.verify_invariants = enabled;
        self
    }

    /// Parses TOML text.
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        let mut table: toml::Table = raw.parse()?;
        let section = match table.remove("optimizer") {
            Some(toml::Value::Table(section)) => section,
            Some(other) => {
                let mut wrapper = toml::Table::new();
                wrapper.insert("optimizer".to_owned(), other);
                wrapper
            }
            None => table,
        };
        let config: OptimizerConfig = toml::Value::Table(section).try_into()?;
        config.validate()?;
        Ok(config)
    }

    /// Reads and parses a TOML file.
    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&raw)
    }

    /// Checks the pass ceiling and the rule directives.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_passes == 0 {
            return Err(ConfigError::InvalidPassLimit {
                value: self.max_passes,
            });
        }
        self.rule_selection().map(|_| ())
    }

    /// Resolves both directive layers into a rule selection.
    pub fn rule_selection(&self) -> Result<RuleSelection, ConfigError> {
        let mut selection = RuleSelection::parse(&self.rules)?;
        selection.apply(&self.rule_overrides)?;
        Ok(selection)
    }
}

/// Set of enabled rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RuleSelection {
    enabled: [bool; RuleId::COUNT],
}

impl Default for RuleSelection {
    fn default() -> Self {
        Self::all()
    }
}

impl RuleSelection {
    /// Every rule enabled.
    pub fn all() -> Self {
        Self {
            enabled: [true; RuleId::COUNT],
        }
    }

    /// Every rule disabled.
    pub fn none() -> Self {
        Self {
            enabled: [false; RuleId::COUNT],
        }
    }

    /// Applies directives left to right, starting from "all enabled".
    pub fn parse<I, S>(directives: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut selection = Self::all();
        selection.apply(directives)?;
        Ok(selection)
    }

    /// Applies one layer of directives left to right on top of the current
    /// set.
    ///
    /// `+all` / `-all` reset the whole set; `+name` / `-name` toggle one rule.
    /// Unknown names, directives without a sign and a rule that is both
    /// explicitly enabled and disabled within this layer are rejected.
    pub fn apply<I, S>(&mut self, directives: I) -> Result<(), ConfigError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut explicit: [Option<bool>; RuleId::COUNT] = [None; RuleId::COUNT];
        for directive in directives {
            let raw = directive.as_ref().trim();
            let (enable, name) = if let Some(name) = raw.strip_prefix('+') {
                (true, name)
            } else if let Some(name) = raw.strip_prefix('-') {
                (false, name)
            } else {
                return Err(ConfigError::InvalidDirective {
                    directive: raw.to_owned(),
                });
            };
            if name.is_empty() {
                return Err(ConfigError::InvalidDirective {
                    directive: raw.to_owned(),
                });
            }
            if name == "all" {
                self.enabled = [enable; RuleId::COUNT];
                continue;
            }
            let id: RuleId = name.parse()?;
            match explicit[id.index()] {
                Some(previous) if previous != enable => {
                    return Err(ConfigError::ConflictingDirectives {
                        name: name.to_owned(),
                    })
                }
                _ => explicit[id.index()] = Some(enable),
            }
            self.enabled[id.index()] = enable;
        }
        Ok(())
    }

    /// Whether `id` is enabled.
    pub fn is_enabled(&self, id: RuleId) -> bool {
        self.enabled[id.index()]
    }

    /// Enabled rules in registry order.
    pub fn enabled(&self) -> impl Iterator<Item = RuleId> + '_ {
        RuleId::ALL.into_iter().filter(|id| self.is_enabled(*id))
    }
}

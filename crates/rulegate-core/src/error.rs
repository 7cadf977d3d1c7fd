//! Error types for loading and executing rules.

use std::path::PathBuf;
use thiserror::Error;

/// Errors in the rule configuration. Raised before any rule runs.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// No rule configuration is registered for the input type.
    #[error("Rule configuration not found for type '{input_type}'")]
    RuleConfigNotFound {
        /// Name of the input type.
        input_type: &'static str,
    },

    /// The validator was built without any rule configuration.
    #[error("No rule configurations registered")]
    NoRuleConfigs,

    /// Two configurations were registered for the same input type.
    #[error("Rule configuration for type '{input_type}' is registered twice")]
    DuplicateInputType {
        /// Name of the input type.
        input_type: &'static str,
    },

    /// A rule type was instantiated without an id.
    #[error("Rule '{rule}' has no id")]
    MissingRuleId {
        /// Type name of the rule.
        rule: &'static str,
    },

    /// Several loaded rules report the same id.
    #[error("Duplicate rule ids: {}", .0.join(", "))]
    DuplicateRuleIds(Vec<String>),

    /// A rule depends on a rule type that is not loaded for this run.
    #[error("Rule '{rule}' depends on '{dependency}', which is not loaded")]
    DependencyNotLoaded {
        /// Id of the dependent rule.
        rule: String,
        /// Type name of the missing prerequisite.
        dependency: &'static str,
    },

    /// The dependency graph contains a cycle.
    #[error("Dependency cycle: {}", .0.join(" -> "))]
    DependencyCycle(Vec<String>),

    /// Two groups in one configuration share an id.
    #[error("Group '{group}' is defined twice")]
    DuplicateGroup {
        /// Group id.
        group: String,
    },

    /// A rule type was added twice to one group.
    #[error("The rule '{rule}' is already added to group '{group}'")]
    DuplicateRuleInGroup {
        /// Group id.
        group: String,
        /// Type name of the rule.
        rule: &'static str,
    },

    /// IO error reading a config file.
    #[error("Failed to read config file {path}: {source}")]
    Io {
        /// Path that failed to read.
        path: PathBuf,
        /// Underlying IO error.
        source: std::io::Error,
    },

    /// Parse error in a config or translation file.
    #[error("Failed to parse config: {message}")]
    Parse {
        /// Parse error message.
        message: String,
    },
}

/// Errors registering rules for a run.
#[derive(Debug, Error)]
pub enum LoadError {
    /// A rule of the same type is already registered.
    #[error("The rule '{rule}' is already loaded")]
    AlreadyLoaded {
        /// Type name of the rule.
        rule: &'static str,
    },
}

/// Errors surfaced to callers of the validator.
#[derive(Debug, Error)]
pub enum ValidatorError {
    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Load error.
    #[error("Load error: {0}")]
    Load(#[from] LoadError),

    /// A rule was executed without being attached to a registry.
    #[error("Rule '{rule}' is not setup properly")]
    RuleNotSetUp {
        /// Type name of the rule.
        rule: &'static str,
    },

    /// A rule was requested that is not loaded in this run.
    #[error("Rule '{rule}' is not loaded")]
    RuleNotFound {
        /// Type name of the rule.
        rule: &'static str,
    },
}

/// Errors from the run's shared data bus.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DataBusError {
    /// The key was already written in this run.
    #[error("Data key '{0}' is already set")]
    DuplicateKey(String),

    /// The key was never written.
    #[error("Data key '{0}' is not set")]
    MissingKey(String),

    /// The stored value has another type.
    #[error("Data key '{key}' does not hold a {expected}")]
    TypeMismatch {
        /// Requested key.
        key: String,
        /// Requested type name.
        expected: &'static str,
    },
}

/// Ways validation logic can stop early.
#[derive(Debug, Error)]
pub enum RuleError {
    /// The message cap was reached. Not a failure.
    #[error("Rule cancelled after reaching its message limit")]
    Cancelled,

    /// The rule skipped itself. Not a failure.
    #[error("Rule skipped")]
    Skipped,

    /// Data bus access failed.
    #[error(transparent)]
    Data(#[from] DataBusError),

    /// The rule's own logic failed.
    #[error(transparent)]
    Failed(#[from] anyhow::Error),
}

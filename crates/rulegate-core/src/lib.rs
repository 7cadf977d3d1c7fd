//! # rulegate-core
//!
//! Core engine for validating typed inputs against configurable rule sets.
//!
//! This crate provides:
//!
//! - [`Rule`] trait for validation logic over an input type
//! - [`RuleConfig`] for organising rules into groups with settings
//! - [`Validator`] for loading, scheduling and executing rules
//! - [`ValidationRun`] for reading per-rule statuses and messages
//!
//! Rules may depend on other rules with a condition on the prerequisite's
//! outcome (pass, fail, warn, run). Each rule runs at most once per run.
//! Rules that are not part of a dependency chain run concurrently.
//!
//! ## Example
//!
//! ```ignore
//! use rulegate_core::{RuleConfig, ValidationOptions, Validator};
//!
//! let config = RuleConfig::<Building>::builder("Buildings")
//!     .group("geometry", "Geometry", |g| {
//!         g.rule::<FootprintPresent>()
//!             .rule_with::<FootprintClosed>(|r| r.setting("tolerance", 0.01))
//!     })
//!     .build()?;
//!
//! let validator = Validator::builder().rule_config(config).build()?;
//! let run = validator.validate(building, &ValidationOptions::new()).await?;
//!
//! for rule in run.executed_rules() {
//!     println!("{rule}: {}", rule.status());
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod context;
mod dependency;
mod error;
mod instance;
mod options;
mod planner;
mod registry;
mod rule;
mod settings;
mod translation;
mod types;
mod validator;

pub use config::{
    GroupBuilder, GroupConfig, GroupOptions, InputType, RuleConfig, RuleConfigBuilder,
    RuleConfigs, RuleOptions, RuleOptionsBuilder, ValidatorConfig,
};
pub use context::RuleContext;
pub use dependency::{Dependency, DependencyBuilder, DependencyCondition};
pub use error::{ConfigError, DataBusError, LoadError, RuleError, ValidatorError};
pub use instance::LoadedRule;
pub use options::{SettingsOverride, ValidationOptions};
pub use planner::{check_dependencies, ExecutionPlan};
pub use registry::{DataBus, RuleObserver, RuleRegistry};
pub use rule::{Rule, RuleDefinition, RuleInput, RuleKey, RuleMetadata, RuleResult, RuleType};
pub use settings::{SettingValue, Settings, SettingsCascade};
pub use translation::{apply_translations, StaticTranslations, TranslationProvider, TRANSLATABLE_KEYS};
pub use types::{
    merge_groups, ExecutionOutcome, MessageType, RuleInfo, RuleMessage, RuleReport, RuleSet,
    RuleSetGroup, Status,
};
pub use validator::{ValidationRun, Validator, ValidatorBuilder};

/// Re-exported so rule crates can implement [`Rule::validate_async`]
/// without a direct dependency.
pub use async_trait::async_trait;

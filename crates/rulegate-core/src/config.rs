//! Rule configurations and the validator's TOML configuration.
//!
//! A [`RuleConfig`] is declared in code by the application: it names the
//! groups of rules that validate one input type. A [`ValidatorConfig`] is
//! read from a file and adjusts a run without recompiling.

use crate::error::ConfigError;
use crate::instance::LoadedRule;
use crate::options::ValidationOptions;
use crate::rule::{Rule, RuleInput, RuleType};
use crate::settings::{SettingValue, Settings, SettingsCascade};
use crate::translation::TranslationProvider;
use crate::types::{merge_groups, RuleInfo, RuleSet, RuleSetGroup};

use serde::{Deserialize, Serialize};
use std::any::{type_name, Any, TypeId};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;

/// One rule type configured in a group, with its settings.
pub struct RuleOptions<T> {
    rule_type: RuleType<T>,
    settings: Settings,
}

impl<T> RuleOptions<T> {
    /// The rule's factory.
    #[must_use]
    pub fn rule_type(&self) -> &RuleType<T> {
        &self.rule_type
    }

    /// Settings configured for this rule.
    #[must_use]
    pub fn settings(&self) -> &Settings {
        &self.settings
    }
}

/// A named group of rules.
pub struct GroupOptions<T> {
    id: String,
    name: String,
    rules: Vec<RuleOptions<T>>,
    settings: Settings,
}

impl<T> GroupOptions<T> {
    /// Group id.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Display name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Rules in configured order.
    #[must_use]
    pub fn rules(&self) -> &[RuleOptions<T>] {
        &self.rules
    }

    /// Settings shared by every rule in the group.
    #[must_use]
    pub fn settings(&self) -> &Settings {
        &self.settings
    }
}

/// The rules that validate input type `T`, organised in groups.
pub struct RuleConfig<T> {
    name: String,
    description: Option<String>,
    groups: Vec<GroupOptions<T>>,
    global_settings: Settings,
}

impl<T: RuleInput> RuleConfig<T> {
    /// Starts building a configuration.
    #[must_use]
    pub fn builder(name: impl Into<String>) -> RuleConfigBuilder<T> {
        RuleConfigBuilder {
            name: name.into(),
            description: None,
            groups: Vec::new(),
            global_settings: Settings::new(),
        }
    }
}

impl<T> RuleConfig<T> {
    /// Configuration name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Configuration description.
    #[must_use]
    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    /// Groups in configured order.
    #[must_use]
    pub fn groups(&self) -> &[GroupOptions<T>] {
        &self.groups
    }

    /// Settings applied to every rule of the configuration.
    #[must_use]
    pub fn global_settings(&self) -> &Settings {
        &self.global_settings
    }
}

/// Builder for [`RuleConfig`].
#[must_use]
pub struct RuleConfigBuilder<T> {
    name: String,
    description: Option<String>,
    groups: Vec<GroupOptions<T>>,
    global_settings: Settings,
}

impl<T: RuleInput> RuleConfigBuilder<T> {
    /// Sets the description.
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Adds a global setting.
    pub fn global_setting(mut self, key: impl Into<String>, value: impl Into<SettingValue>) -> Self {
        self.global_settings.insert(key, value);
        self
    }

    /// Adds a group configured by `configure`.
    pub fn group(
        mut self,
        id: impl Into<String>,
        name: impl Into<String>,
        configure: impl FnOnce(GroupBuilder<T>) -> GroupBuilder<T>,
    ) -> Self {
        let builder = configure(GroupBuilder {
            group: GroupOptions {
                id: id.into(),
                name: name.into(),
                rules: Vec::new(),
                settings: Settings::new(),
            },
        });
        self.groups.push(builder.group);
        self
    }

    /// Builds the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::DuplicateGroup`] if two groups share an id, or
    /// [`ConfigError::DuplicateRuleInGroup`] if a rule type is added twice to
    /// one group.
    pub fn build(self) -> Result<RuleConfig<T>, ConfigError> {
        let mut group_ids = HashSet::new();
        for group in &self.groups {
            if !group_ids.insert(group.id.as_str()) {
                return Err(ConfigError::DuplicateGroup {
                    group: group.id.clone(),
                });
            }

            let mut keys = HashSet::new();
            for rule in &group.rules {
                let key = rule.rule_type.key();
                if !keys.insert(key) {
                    return Err(ConfigError::DuplicateRuleInGroup {
                        group: group.id.clone(),
                        rule: key.type_name(),
                    });
                }
            }
        }

        Ok(RuleConfig {
            name: self.name,
            description: self.description,
            groups: self.groups,
            global_settings: self.global_settings,
        })
    }
}

/// Builder for one group, used inside [`RuleConfigBuilder::group`].
#[must_use]
pub struct GroupBuilder<T> {
    group: GroupOptions<T>,
}

impl<T: RuleInput> GroupBuilder<T> {
    /// Adds rule `R` without settings.
    pub fn rule<R: Rule<T> + Default>(self) -> Self {
        self.rule_with::<R>(|r| r)
    }

    /// Adds rule `R` with settings.
    pub fn rule_with<R: Rule<T> + Default>(
        mut self,
        configure: impl FnOnce(RuleOptionsBuilder) -> RuleOptionsBuilder,
    ) -> Self {
        let options = configure(RuleOptionsBuilder::default());
        self.group.rules.push(RuleOptions {
            rule_type: RuleType::of::<R>(),
            settings: options.settings,
        });
        self
    }

    /// Adds a setting shared by every rule of the group.
    pub fn setting(mut self, key: impl Into<String>, value: impl Into<SettingValue>) -> Self {
        self.group.settings.insert(key, value);
        self
    }
}

/// Settings of one configured rule.
#[derive(Debug, Default)]
#[must_use]
pub struct RuleOptionsBuilder {
    settings: Settings,
}

impl RuleOptionsBuilder {
    /// Adds a setting.
    pub fn setting(mut self, key: impl Into<String>, value: impl Into<SettingValue>) -> Self {
        self.settings.insert(key, value);
        self
    }
}

/// Runtime identity of an input type, used to query catalogs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InputType {
    id: TypeId,
    name: &'static str,
}

impl InputType {
    /// Returns the identity of `T`.
    #[must_use]
    pub fn of<T: 'static>() -> Self {
        Self {
            id: TypeId::of::<T>(),
            name: type_name::<T>(),
        }
    }

    /// Fully qualified type name.
    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }
}

/// Describes a configuration without executing anything.
pub(crate) trait RuleCatalog: Send + Sync {
    fn describe(
        &self,
        options: &ValidationOptions,
        translations: Option<&dyn TranslationProvider>,
    ) -> RuleSet;
}

impl<T: RuleInput> RuleCatalog for RuleConfig<T> {
    fn describe(
        &self,
        options: &ValidationOptions,
        translations: Option<&dyn TranslationProvider>,
    ) -> RuleSet {
        let cascade = SettingsCascade::new(self, options);
        let entries = cascade.rules().filter_map(|(group, rule, _)| {
            let loaded = LoadedRule::from_type(rule.rule_type()).translate(translations);
            if loaded.disabled() || options.is_rule_id_skipped(loaded.id()) {
                return None;
            }
            let meta = loaded.metadata();
            Some(RuleSetGroup {
                name: group.name().to_string(),
                rules: vec![RuleInfo {
                    id: meta.id.clone(),
                    name: meta.name.clone(),
                    description: meta.description.clone(),
                    message_type: meta.message_type,
                    documentation: meta.documentation.clone(),
                }],
            })
        });

        RuleSet {
            name: self.name.clone(),
            description: self.description.clone(),
            groups: merge_groups(entries),
        }
    }
}

struct ConfigEntry {
    input: InputType,
    config: Arc<dyn Any + Send + Sync>,
    catalog: Arc<dyn RuleCatalog>,
}

/// Registered rule configurations, at most one per input type.
#[derive(Default)]
pub struct RuleConfigs {
    entries: HashMap<TypeId, ConfigEntry>,
}

impl RuleConfigs {
    /// Creates an empty provider.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the configuration for input type `T`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::DuplicateInputType`] if `T` already has one.
    pub fn insert<T: RuleInput>(&mut self, config: RuleConfig<T>) -> Result<(), ConfigError> {
        let input = InputType::of::<T>();
        if self.entries.contains_key(&input.id) {
            return Err(ConfigError::DuplicateInputType {
                input_type: input.name,
            });
        }

        let config = Arc::new(config);
        self.entries.insert(
            input.id,
            ConfigEntry {
                input,
                config: Arc::clone(&config) as Arc<dyn Any + Send + Sync>,
                catalog: config,
            },
        );
        Ok(())
    }

    /// Returns the configuration for input type `T`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::RuleConfigNotFound`] if none is registered.
    pub fn get<T: RuleInput>(&self) -> Result<Arc<RuleConfig<T>>, ConfigError> {
        let not_found = || ConfigError::RuleConfigNotFound {
            input_type: type_name::<T>(),
        };
        let entry = self.entries.get(&TypeId::of::<T>()).ok_or_else(not_found)?;
        Arc::clone(&entry.config)
            .downcast::<RuleConfig<T>>()
            .map_err(|_| not_found())
    }

    /// Describes the configuration of one input type.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::RuleConfigNotFound`] if none is registered.
    pub(crate) fn describe(
        &self,
        input: InputType,
        options: &ValidationOptions,
        translations: Option<&dyn TranslationProvider>,
    ) -> Result<RuleSet, ConfigError> {
        let entry = self
            .entries
            .get(&input.id)
            .ok_or(ConfigError::RuleConfigNotFound {
                input_type: input.name,
            })?;
        Ok(entry.catalog.describe(options, translations))
    }

    /// Registered input types.
    pub fn input_types(&self) -> impl Iterator<Item = InputType> + '_ {
        self.entries.values().map(|entry| entry.input)
    }

    /// Number of registered configurations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl std::fmt::Debug for RuleConfigs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.entries.values().map(|entry| entry.input.name))
            .finish()
    }
}

/// Validator configuration loaded from TOML.
///
/// ```toml
/// max_message_count = 500
/// parallelism = 4
/// skip_rules = ["GEO-3"]
///
/// [settings]
/// tolerance = 0.01
///
/// [groups.geometry]
/// skip = false
/// tolerance = 0.02
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ValidatorConfig {
    /// Maximum number of messages retained per rule.
    #[serde(default)]
    pub max_message_count: Option<usize>,

    /// Maximum number of rules executing concurrently.
    #[serde(default)]
    pub parallelism: Option<usize>,

    /// Ids of rules that are not loaded.
    #[serde(default)]
    pub skip_rules: Vec<String>,

    /// Run-time global settings.
    #[serde(default)]
    pub settings: Settings,

    /// Per-group overrides keyed by group id.
    #[serde(default)]
    pub groups: BTreeMap<String, GroupConfig>,
}

impl ValidatorConfig {
    /// Creates a new default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        Self::parse(&content)
    }

    /// Parses configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML is invalid.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::Parse {
            message: e.to_string(),
        })
    }
}

/// Per-group section of [`ValidatorConfig`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GroupConfig {
    /// Whether the whole group is skipped.
    #[serde(default)]
    pub skip: bool,

    /// Setting overrides for the group's rules.
    #[serde(flatten)]
    pub settings: Settings,
}

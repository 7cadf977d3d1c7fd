//! Per-run validation options.

use crate::config::ValidatorConfig;
use crate::registry::RuleObserver;
use crate::rule::RuleKey;
use crate::settings::{SettingValue, Settings};
use crate::types::RuleReport;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Options applied to a single validation run.
///
/// # Example
///
/// ```ignore
/// let options = ValidationOptions::new()
///     .skip_group("attributes")
///     .global_setting("tolerance", 0.01)
///     .for_rule::<FootprintClosed>(|r| r.setting("limit", 10))
///     .max_message_count(500);
/// ```
#[derive(Clone, Default)]
#[must_use]
pub struct ValidationOptions {
    skipped_rules: HashSet<RuleKey>,
    skipped_groups: HashSet<String>,
    skipped_rule_ids: HashSet<String>,
    global_settings: Settings,
    group_settings: HashMap<String, Settings>,
    rule_settings: HashMap<RuleKey, Settings>,
    max_message_count: Option<usize>,
    on_rule_executed: Option<RuleObserver>,
}

impl ValidationOptions {
    /// Creates empty options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds options from a loaded [`ValidatorConfig`].
    pub fn from_config(config: &ValidatorConfig) -> Self {
        let mut options = Self {
            global_settings: config.settings.clone(),
            max_message_count: config.max_message_count,
            ..Self::default()
        };
        for id in &config.skip_rules {
            options.skipped_rule_ids.insert(id.clone());
        }
        for (group_id, group) in &config.groups {
            if group.skip {
                options.skipped_groups.insert(group_id.clone());
            }
            if !group.settings.is_empty() {
                options
                    .group_settings
                    .insert(group_id.clone(), group.settings.clone());
            }
        }
        options
    }

    /// Skips rule type `R`.
    pub fn skip_rule<R: 'static>(mut self) -> Self {
        self.skipped_rules.insert(RuleKey::of::<R>());
        self
    }

    /// Skips a whole group.
    pub fn skip_group(mut self, group_id: impl Into<String>) -> Self {
        self.skipped_groups.insert(group_id.into());
        self
    }

    /// Skips the rule with the given id.
    pub fn skip_rule_id(mut self, rule_id: impl Into<String>) -> Self {
        self.skipped_rule_ids.insert(rule_id.into());
        self
    }

    /// Sets a run-time global setting.
    pub fn global_setting(mut self, key: impl Into<String>, value: impl Into<SettingValue>) -> Self {
        self.global_settings.insert(key, value);
        self
    }

    /// Overrides settings of a group, or skips it.
    pub fn for_group(
        mut self,
        group_id: impl Into<String>,
        configure: impl FnOnce(SettingsOverride) -> SettingsOverride,
    ) -> Self {
        let group_id = group_id.into();
        let overrides = configure(SettingsOverride::default());
        if overrides.skip {
            self.skipped_groups.insert(group_id.clone());
        }
        self.group_settings
            .entry(group_id)
            .or_default()
            .overwrite(&overrides.settings);
        self
    }

    /// Overrides settings of rule type `R`, or skips it.
    pub fn for_rule<R: 'static>(
        mut self,
        configure: impl FnOnce(SettingsOverride) -> SettingsOverride,
    ) -> Self {
        let key = RuleKey::of::<R>();
        let overrides = configure(SettingsOverride::default());
        if overrides.skip {
            self.skipped_rules.insert(key);
        }
        self.rule_settings
            .entry(key)
            .or_default()
            .overwrite(&overrides.settings);
        self
    }

    /// Caps the number of messages retained per rule for this run.
    pub fn max_message_count(mut self, max: usize) -> Self {
        self.max_message_count = Some(max);
        self
    }

    /// Registers a callback invoked after each rule execution.
    pub fn on_rule_executed(
        mut self,
        callback: impl Fn(&RuleReport) + Send + Sync + 'static,
    ) -> Self {
        self.on_rule_executed = Some(Arc::new(callback));
        self
    }

    /// Whether rule type `key` is skipped.
    #[must_use]
    pub fn is_rule_skipped(&self, key: RuleKey) -> bool {
        self.skipped_rules.contains(&key)
    }

    /// Whether the group is skipped.
    #[must_use]
    pub fn is_group_skipped(&self, group_id: &str) -> bool {
        self.skipped_groups.contains(group_id)
    }

    /// Whether the rule id is skipped.
    #[must_use]
    pub fn is_rule_id_skipped(&self, rule_id: &str) -> bool {
        self.skipped_rule_ids.contains(rule_id)
    }

    /// Run-time global settings.
    #[must_use]
    pub fn global_settings(&self) -> &Settings {
        &self.global_settings
    }

    /// Run-time overrides for a group.
    #[must_use]
    pub fn group_settings(&self, group_id: &str) -> Option<&Settings> {
        self.group_settings.get(group_id)
    }

    /// Run-time overrides for a rule type.
    #[must_use]
    pub fn rule_settings(&self, key: RuleKey) -> Option<&Settings> {
        self.rule_settings.get(&key)
    }

    /// Message cap override.
    #[must_use]
    pub fn message_cap(&self) -> Option<usize> {
        self.max_message_count
    }

    /// Callback invoked after each rule execution.
    #[must_use]
    pub fn observer(&self) -> Option<RuleObserver> {
        self.on_rule_executed.clone()
    }
}

impl std::fmt::Debug for ValidationOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ValidationOptions")
            .field("skipped_rules", &self.skipped_rules)
            .field("skipped_groups", &self.skipped_groups)
            .field("skipped_rule_ids", &self.skipped_rule_ids)
            .field("global_settings", &self.global_settings)
            .field("group_settings", &self.group_settings)
            .field("rule_settings", &self.rule_settings)
            .field("max_message_count", &self.max_message_count)
            .field("on_rule_executed", &self.on_rule_executed.is_some())
            .finish()
    }
}

/// Run-time override for one group or rule type.
#[derive(Debug, Default)]
#[must_use]
pub struct SettingsOverride {
    settings: Settings,
    skip: bool,
}

impl SettingsOverride {
    /// Overrides a setting.
    pub fn setting(mut self, key: impl Into<String>, value: impl Into<SettingValue>) -> Self {
        self.settings.insert(key, value);
        self
    }

    /// Skips the group or rule.
    pub fn skip(mut self) -> Self {
        self.skip = true;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Closed;

    #[test]
    fn for_rule_records_overrides_and_skip() {
        let options = ValidationOptions::new()
            .for_rule::<Closed>(|r| r.setting("limit", 4))
            .for_group("geometry", |g| g.setting("limit", 3).skip());

        let key = RuleKey::of::<Closed>();
        assert_eq!(options.rule_settings(key).unwrap().get_int("limit"), Some(4));
        assert!(!options.is_rule_skipped(key));
        assert!(options.is_group_skipped("geometry"));
        assert_eq!(
            options.group_settings("geometry").unwrap().get_int("limit"),
            Some(3)
        );

        let options = options.for_rule::<Closed>(|r| r.skip());
        assert!(options.is_rule_skipped(key));
    }

    #[test]
    fn from_config_maps_every_section() {
        let config = ValidatorConfig::parse(
            r#"
max_message_count = 10
skip_rules = ["GEO-9"]

[settings]
tolerance = 0.1

[groups.attributes]
skip = true

[groups.geometry]
limit = 2
"#,
        )
        .unwrap();

        let options = ValidationOptions::from_config(&config);
        assert_eq!(options.message_cap(), Some(10));
        assert!(options.is_rule_id_skipped("GEO-9"));
        assert!(options.is_group_skipped("attributes"));
        assert!(!options.is_group_skipped("geometry"));
        assert_eq!(options.global_settings().get_float("tolerance"), Some(0.1));
        assert_eq!(
            options.group_settings("geometry").and_then(|s| s.get_int("limit")),
            Some(2)
        );
        assert!(options.group_settings("attributes").is_none());
    }
}

//! Settings maps and the settings cascade.
//!
//! A rule's effective settings are built from five layers, later layers
//! overwriting earlier ones on key collision:
//!
//! ```text
//! global (run-time over config-time)
//!   ↓ config group settings
//!   ↓ config rule settings
//!   ↓ run-time group overrides
//!   ↓ run-time rule overrides
//! effective settings
//! ```

use crate::config::{GroupOptions, RuleConfig, RuleOptions};
use crate::options::ValidationOptions;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Value stored in a settings map.
pub type SettingValue = toml::Value;

/// String-keyed settings map.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Settings(BTreeMap<String, SettingValue>);

impl Settings {
    /// Creates an empty settings map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a setting, returning the map.
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<SettingValue>) -> Self {
        self.insert(key, value);
        self
    }

    /// Inserts or replaces a setting.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<SettingValue>) {
        self.0.insert(key.into(), value.into());
    }

    /// Returns the raw value for a key.
    #[must_use]
    pub fn get_raw(&self, key: &str) -> Option<&SettingValue> {
        self.0.get(key)
    }

    /// Gets a setting as a specific type.
    ///
    /// Returns `None` if the key is missing or the value has another shape.
    #[must_use]
    pub fn get<T: serde::de::DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.0.get(key).and_then(|v| v.clone().try_into().ok())
    }

    /// Gets a boolean setting.
    #[must_use]
    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.0.get(key).and_then(SettingValue::as_bool)
    }

    /// Gets an integer setting.
    #[must_use]
    pub fn get_int(&self, key: &str) -> Option<i64> {
        self.0.get(key).and_then(SettingValue::as_integer)
    }

    /// Gets a float setting. Integers within `i32` range are widened.
    #[must_use]
    pub fn get_float(&self, key: &str) -> Option<f64> {
        self.0.get(key).and_then(|v| {
            v.as_float().or_else(|| {
                v.as_integer()
                    .and_then(|i| i32::try_from(i).ok())
                    .map(f64::from)
            })
        })
    }

    /// Gets a string setting.
    #[must_use]
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(|v| v.as_str())
    }

    /// Returns true if the key is present.
    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    /// Number of settings.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true if there are no settings.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterates over settings in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &SettingValue)> {
        self.0.iter()
    }

    /// Fills in keys from `lower` that this map does not have.
    pub fn merge_under(&mut self, lower: &Settings) {
        for (key, value) in &lower.0 {
            self.0
                .entry(key.clone())
                .or_insert_with(|| value.clone());
        }
    }

    /// Copies every key of `upper` into this map, replacing existing values.
    pub fn overwrite(&mut self, upper: &Settings) {
        for (key, value) in &upper.0 {
            self.0.insert(key.clone(), value.clone());
        }
    }

    /// Returns true if every entry of `filter` is present here with an equal value.
    #[must_use]
    pub fn matches(&self, filter: &Settings) -> bool {
        filter
            .0
            .iter()
            .all(|(key, expected)| self.0.get(key) == Some(expected))
    }
}

impl<K: Into<String>, V: Into<SettingValue>> FromIterator<(K, V)> for Settings {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

/// Resolves effective per-rule settings for one rule configuration and run.
pub struct SettingsCascade<'a, T> {
    config: &'a RuleConfig<T>,
    options: &'a ValidationOptions,
    global: Settings,
}

impl<'a, T> SettingsCascade<'a, T> {
    /// Creates a cascade for a configuration and the run's options.
    #[must_use]
    pub fn new(config: &'a RuleConfig<T>, options: &'a ValidationOptions) -> Self {
        let mut global = options.global_settings().clone();
        global.merge_under(config.global_settings());
        Self {
            config,
            options,
            global,
        }
    }

    /// Global settings after merging run-time overrides over config values.
    #[must_use]
    pub fn global(&self) -> &Settings {
        &self.global
    }

    /// Computes the effective settings of one rule within one group.
    #[must_use]
    pub fn resolve(&self, group: &GroupOptions<T>, rule: &RuleOptions<T>) -> Settings {
        let mut settings = self.global.clone();

        let mut configured = rule.settings().clone();
        configured.merge_under(group.settings());
        settings.overwrite(&configured);

        if let Some(overrides) = self.options.group_settings(group.id()) {
            settings.overwrite(overrides);
        }
        if let Some(overrides) = self.options.rule_settings(rule.rule_type().key()) {
            settings.overwrite(overrides);
        }

        settings
    }

    /// Walks every non-skipped rule in configured order with its group and
    /// effective settings.
    pub fn rules(&self) -> impl Iterator<Item = (&'a GroupOptions<T>, &'a RuleOptions<T>, Settings)> + '_ {
        self.config
            .groups()
            .iter()
            .filter(move |group| !self.options.is_group_skipped(group.id()))
            .flat_map(move |group| {
                group
                    .rules()
                    .iter()
                    .filter(move |rule| !self.options.is_rule_skipped(rule.rule_type().key()))
                    .map(move |rule| (group, rule, self.resolve(group, rule)))
            })
    }
}

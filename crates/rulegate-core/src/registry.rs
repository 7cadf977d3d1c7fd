//! Per-run store of loaded rules and the shared data bus.

use crate::error::{DataBusError, LoadError, ValidatorError};
use crate::instance::LoadedRule;
use crate::rule::{Rule, RuleInput, RuleKey};
use crate::types::{RuleReport, Status};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::RwLock;
use std::any::{type_name, Any};
use std::collections::HashSet;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

/// Callback invoked after each rule execution.
pub type RuleObserver = Arc<dyn Fn(&RuleReport) + Send + Sync>;

/// Write-once key/value store rules use to share intermediate results.
#[derive(Default)]
pub struct DataBus {
    values: DashMap<String, Arc<dyn Any + Send + Sync>>,
}

impl DataBus {
    /// Creates an empty data bus.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a value under a new key.
    ///
    /// # Errors
    ///
    /// Returns [`DataBusError::DuplicateKey`] if the key is already set; the
    /// first writer wins.
    pub fn set<U: Any + Send + Sync>(
        &self,
        key: impl Into<String>,
        value: U,
    ) -> Result<(), DataBusError> {
        match self.values.entry(key.into()) {
            Entry::Occupied(entry) => Err(DataBusError::DuplicateKey(entry.key().clone())),
            Entry::Vacant(entry) => {
                entry.insert(Arc::new(value));
                Ok(())
            }
        }
    }

    /// Reads a value.
    ///
    /// # Errors
    ///
    /// Returns an error if the key is absent or holds another type.
    pub fn get<U: Any + Send + Sync>(&self, key: &str) -> Result<Arc<U>, DataBusError> {
        let value = self
            .values
            .get(key)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| DataBusError::MissingKey(key.to_string()))?;

        value
            .downcast::<U>()
            .map_err(|_| DataBusError::TypeMismatch {
                key: key.to_string(),
                expected: type_name::<U>(),
            })
    }

    /// Returns true if the key is set.
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    /// Number of stored values.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Returns true if nothing is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl std::fmt::Debug for DataBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut keys: Vec<String> = self.values.iter().map(|e| e.key().clone()).collect();
        keys.sort();
        f.debug_struct("DataBus").field("keys", &keys).finish()
    }
}

/// Rules loaded for one validation run, in configured order.
///
/// Append-only while loading and read-only while executing. No two rules
/// share a rule type.
pub struct RuleRegistry<T> {
    rules: RwLock<Vec<Arc<LoadedRule<T>>>>,
    data: Arc<DataBus>,
    observer: Option<RuleObserver>,
}

impl<T> RuleRegistry<T> {
    /// All rules in load order.
    #[must_use]
    pub fn all(&self) -> Vec<Arc<LoadedRule<T>>> {
        self.rules.read().clone()
    }

    /// Number of loaded rules.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rules.read().len()
    }

    /// Returns true if no rule is loaded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rules.read().is_empty()
    }

    /// Looks up a rule by key.
    #[must_use]
    pub fn get_by_key(&self, key: RuleKey) -> Option<Arc<LoadedRule<T>>> {
        self.rules
            .read()
            .iter()
            .find(|rule| rule.key() == key)
            .map(Arc::clone)
    }

    /// Looks up a rule by id.
    #[must_use]
    pub fn get_by_id(&self, id: &str) -> Option<Arc<LoadedRule<T>>> {
        self.rules
            .read()
            .iter()
            .find(|rule| rule.id() == id)
            .map(Arc::clone)
    }

    /// The run's shared data bus.
    #[must_use]
    pub fn data(&self) -> &Arc<DataBus> {
        &self.data
    }
}

impl<T: RuleInput> RuleRegistry<T> {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Self::with_observer(None)
    }

    /// Creates an empty registry that reports every rule execution.
    #[must_use]
    pub fn with_observer(observer: Option<RuleObserver>) -> Arc<Self> {
        Arc::new(Self {
            rules: RwLock::new(Vec::new()),
            data: Arc::new(DataBus::new()),
            observer,
        })
    }

    /// Registers rules and attaches them to this registry.
    ///
    /// The batch is checked as a whole: if any rule type is already
    /// registered (or appears twice in the batch) nothing is added.
    ///
    /// # Errors
    ///
    /// Returns [`LoadError::AlreadyLoaded`] naming the offending rule type.
    pub fn add_rules(
        self: &Arc<Self>,
        rules: impl IntoIterator<Item = LoadedRule<T>>,
    ) -> Result<(), LoadError> {
        let rules: Vec<LoadedRule<T>> = rules.into_iter().collect();
        let mut loaded = self.rules.write();

        let mut seen: HashSet<RuleKey> = loaded.iter().map(|r| r.key()).collect();
        for rule in &rules {
            if !seen.insert(rule.key()) {
                return Err(LoadError::AlreadyLoaded {
                    rule: rule.key().type_name(),
                });
            }
        }

        for rule in rules {
            rule.attach(Arc::downgrade(self));
            tracing::debug!(rule = %rule, "Loaded rule");
            loaded.push(Arc::new(rule));
        }
        Ok(())
    }

    /// Looks up a rule by type.
    #[must_use]
    pub fn get<R: Rule<T>>(&self) -> Option<Arc<LoadedRule<T>>> {
        self.get_by_key(RuleKey::of::<R>())
    }

    /// Executes rule `R` (at most once per run) and returns it.
    ///
    /// # Errors
    ///
    /// Returns [`ValidatorError::RuleNotFound`] if `R` is not loaded, or any
    /// fatal error raised while resolving its dependencies.
    pub async fn execute_rule<R: Rule<T>>(
        &self,
        input: &Arc<T>,
    ) -> Result<Arc<LoadedRule<T>>, ValidatorError> {
        let rule = self.get::<R>().ok_or(ValidatorError::RuleNotFound {
            rule: type_name::<R>(),
        })?;
        rule.execute(input).await?;
        Ok(rule)
    }

    /// Executes rule `R` and returns its settled status.
    ///
    /// # Errors
    ///
    /// See [`RuleRegistry::execute_rule`].
    pub async fn rule_status<R: Rule<T>>(&self, input: &Arc<T>) -> Result<Status, ValidatorError> {
        Ok(self.execute_rule::<R>(input).await?.status())
    }

    /// Executes rule `R` and returns whether it passed.
    ///
    /// # Errors
    ///
    /// See [`RuleRegistry::execute_rule`].
    pub async fn rule_passed<R: Rule<T>>(&self, input: &Arc<T>) -> Result<bool, ValidatorError> {
        Ok(self.execute_rule::<R>(input).await?.passed())
    }

    /// Hands a report to the observer. A panicking observer is logged and
    /// otherwise ignored; it never changes the rule's result.
    pub(crate) fn notify(&self, report: &RuleReport) {
        if let Some(observer) = &self.observer {
            if catch_unwind(AssertUnwindSafe(|| observer(report))).is_err() {
                tracing::warn!(rule = %report.full_name, "Rule observer panicked");
            }
        }
    }
}

//! The validator: loads the configured rules for an input type and runs them.

use crate::config::{InputType, RuleConfig, RuleConfigs, ValidatorConfig};
use crate::error::{ConfigError, LoadError, ValidatorError};
use crate::instance::LoadedRule;
use crate::options::ValidationOptions;
use crate::planner::{check_dependencies, ExecutionPlan};
use crate::registry::RuleRegistry;
use crate::rule::{Rule, RuleInput, RuleKey};
use crate::settings::{Settings, SettingsCascade};
use crate::translation::TranslationProvider;
use crate::types::{merge_groups, RuleSet, RuleSetGroup};

use std::collections::{BTreeMap, HashSet};
use std::num::NonZeroUsize;
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{debug, error, info};

/// Builder for configuring a [`Validator`].
#[derive(Default)]
pub struct ValidatorBuilder {
    configs: RuleConfigs,
    error: Option<ConfigError>,
    translations: Option<Arc<dyn TranslationProvider>>,
    max_message_count: Option<usize>,
    parallelism: Option<usize>,
    config: Option<ValidatorConfig>,
}

impl ValidatorBuilder {
    /// Creates a new builder with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the rule configuration for input type `T`.
    #[must_use]
    pub fn rule_config<T: RuleInput>(mut self, config: RuleConfig<T>) -> Self {
        if let Err(e) = self.configs.insert(config) {
            self.error.get_or_insert(e);
        }
        self
    }

    /// Sets the translation provider.
    #[must_use]
    pub fn translations(mut self, provider: impl TranslationProvider + 'static) -> Self {
        self.translations = Some(Arc::new(provider));
        self
    }

    /// Sets the default message cap per rule.
    #[must_use]
    pub fn max_message_count(mut self, max: usize) -> Self {
        self.max_message_count = Some(max);
        self
    }

    /// Sets the maximum number of rules executing concurrently.
    #[must_use]
    pub fn parallelism(mut self, parallelism: usize) -> Self {
        self.parallelism = Some(parallelism);
        self
    }

    /// Sets the file configuration.
    ///
    /// Values set directly on the builder take precedence over it.
    #[must_use]
    pub fn config(mut self, config: ValidatorConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Builds the validator.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::NoRuleConfigs`] if no configuration was
    /// registered, or the first error raised while registering one.
    pub fn build(self) -> Result<Validator, ConfigError> {
        if let Some(e) = self.error {
            return Err(e);
        }
        if self.configs.is_empty() {
            return Err(ConfigError::NoRuleConfigs);
        }

        let config = self.config.unwrap_or_default();
        let max_message_count = self
            .max_message_count
            .or(config.max_message_count)
            .unwrap_or(usize::MAX);
        let parallelism = self
            .parallelism
            .or(config.parallelism)
            .unwrap_or_else(|| std::thread::available_parallelism().map_or(1, NonZeroUsize::get))
            .max(1);

        Ok(Validator {
            configs: self.configs,
            translations: self.translations,
            max_message_count,
            parallelism,
            config,
        })
    }
}

/// Loads and executes the rules configured for an input type.
///
/// Use [`Validator::builder()`] to construct an instance. A validator is
/// reusable; every call to [`Validator::validate`] or
/// [`Validator::load_rules`] starts an independent run.
pub struct Validator {
    configs: RuleConfigs,
    translations: Option<Arc<dyn TranslationProvider>>,
    max_message_count: usize,
    parallelism: usize,
    config: ValidatorConfig,
}

impl Validator {
    /// Creates a new builder for configuring a validator.
    #[must_use]
    pub fn builder() -> ValidatorBuilder {
        ValidatorBuilder::new()
    }

    /// Options derived from the file configuration, as a starting point for
    /// a run.
    #[must_use]
    pub fn default_options(&self) -> ValidationOptions {
        ValidationOptions::from_config(&self.config)
    }

    /// Maximum number of rules executing concurrently.
    #[must_use]
    pub fn parallelism(&self) -> usize {
        self.parallelism
    }

    /// Default message cap per rule.
    #[must_use]
    pub fn max_message_count(&self) -> usize {
        self.max_message_count
    }

    /// Registered rule configurations.
    #[must_use]
    pub fn rule_configs(&self) -> &RuleConfigs {
        &self.configs
    }

    /// Loads the rules for `T` and executes them against `input`.
    ///
    /// # Errors
    ///
    /// Returns a configuration or load error before any rule runs. Failures
    /// inside rule logic never surface here; they end as
    /// [`Status::SystemError`](crate::Status::SystemError) on the rule.
    pub async fn validate<T: RuleInput>(
        &self,
        input: T,
        options: &ValidationOptions,
    ) -> Result<ValidationRun<T>, ValidatorError> {
        let run = self.load_rules::<T>(options)?;
        run.execute(input).await?;
        Ok(run)
    }

    /// Loads the rules for `T` without executing them.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::RuleConfigNotFound`] if `T` has no
    /// configuration, [`ConfigError::MissingRuleId`] or
    /// [`ConfigError::DuplicateRuleIds`] for invalid ids,
    /// [`ConfigError::DependencyNotLoaded`] or [`ConfigError::DependencyCycle`]
    /// for an invalid dependency graph, and [`LoadError::AlreadyLoaded`]
    /// if a rule type is configured in two groups.
    ///
    /// [`LoadError::AlreadyLoaded`]: crate::LoadError::AlreadyLoaded
    pub fn load_rules<T: RuleInput>(
        &self,
        options: &ValidationOptions,
    ) -> Result<ValidationRun<T>, ValidatorError> {
        let config = self.configs.get::<T>()?;
        let cascade = SettingsCascade::new(&config, options);
        let max_message_count = options.message_cap().unwrap_or(self.max_message_count);
        let translations = self.translations.as_deref();

        let mut rules = Vec::new();
        let mut rule_types: HashSet<RuleKey> = HashSet::new();
        for (group, rule_options, settings) in cascade.rules() {
            let key = rule_options.rule_type().key();
            if !rule_types.insert(key) {
                return Err(LoadError::AlreadyLoaded {
                    rule: key.type_name(),
                }
                .into());
            }

            let rule = LoadedRule::from_type(rule_options.rule_type())
                .translate(translations)
                .with_group(group.id())
                .with_settings(settings)
                .with_max_message_count(max_message_count);

            if rule.disabled() {
                debug!("Skipping disabled rule: {}", rule.key());
                continue;
            }
            if rule.id().is_empty() {
                return Err(ConfigError::MissingRuleId {
                    rule: rule.key().type_name(),
                }
                .into());
            }
            if options.is_rule_id_skipped(rule.id()) {
                debug!("Skipping rule by id: {rule}");
                continue;
            }
            rules.push(rule);
        }

        check_unique_ids(&rules)?;
        check_dependencies(&rules)?;

        let registry = RuleRegistry::with_observer(options.observer());
        registry.add_rules(rules)?;

        info!(
            "Loaded {} rules from '{}' for {}",
            registry.len(),
            config.name(),
            std::any::type_name::<T>()
        );

        Ok(ValidationRun {
            registry,
            parallelism: self.parallelism,
        })
    }

    /// Returns the catalog of rules for the given input types, with groups
    /// of the same name merged.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::RuleConfigNotFound`] if an input type has no
    /// configuration.
    pub fn rule_info(
        &self,
        input_types: &[InputType],
        options: &ValidationOptions,
    ) -> Result<Vec<RuleSetGroup>, ConfigError> {
        let sets = self.rule_sets(input_types, options)?;
        Ok(merge_groups(sets.into_iter().flat_map(|set| set.groups)))
    }

    /// Returns one catalog per input type.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::RuleConfigNotFound`] if an input type has no
    /// configuration.
    pub fn rule_sets(
        &self,
        input_types: &[InputType],
        options: &ValidationOptions,
    ) -> Result<Vec<RuleSet>, ConfigError> {
        input_types
            .iter()
            .map(|input| {
                self.configs
                    .describe(*input, options, self.translations.as_deref())
            })
            .collect()
    }
}

fn check_unique_ids<T>(rules: &[LoadedRule<T>]) -> Result<(), ConfigError> {
    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    for rule in rules {
        *counts.entry(rule.id()).or_default() += 1;
    }
    let duplicates: Vec<String> = counts
        .into_iter()
        .filter(|(_, count)| *count > 1)
        .map(|(id, _)| id.to_string())
        .collect();

    if duplicates.is_empty() {
        Ok(())
    } else {
        Err(ConfigError::DuplicateRuleIds(duplicates))
    }
}

/// One validation run: the loaded rules, their results and the data bus.
pub struct ValidationRun<T> {
    registry: Arc<RuleRegistry<T>>,
    parallelism: usize,
}

impl<T: RuleInput> ValidationRun<T> {
    /// Executes every loaded rule against `input`.
    ///
    /// Independent leaves run first on the worker pool, chained rules next
    /// in configured order, and the remaining independent rules last on the
    /// worker pool. Rules that already ran are not run again.
    ///
    /// # Errors
    ///
    /// Returns the first fatal error raised by a rule's setup or dependency
    /// resolution, after the current bucket has drained.
    pub async fn execute(&self, input: impl Into<Arc<T>>) -> Result<(), ValidatorError> {
        let input = input.into();
        let plan = ExecutionPlan::from_rules(&self.registry.all());
        debug!(
            independent_leaves = plan.independent_leaves.len(),
            chained = plan.chained.len(),
            independent = plan.independent.len(),
            parallelism = self.parallelism,
            "Execution plan"
        );

        self.run_concurrently(&plan.independent_leaves, &input).await?;
        for rule in &plan.chained {
            rule.execute(&input).await?;
        }
        self.run_concurrently(&plan.independent, &input).await?;

        info!(
            "Executed {} of {} rules",
            self.executed_rules().len(),
            self.registry.len()
        );
        Ok(())
    }

    async fn run_concurrently(
        &self,
        rules: &[Arc<LoadedRule<T>>],
        input: &Arc<T>,
    ) -> Result<(), ValidatorError> {
        let mut tasks = JoinSet::new();
        let mut first_error = None;

        for rule in rules {
            while tasks.len() >= self.parallelism {
                match tasks.join_next().await {
                    Some(joined) => record(joined, &mut first_error),
                    None => break,
                }
            }
            let rule = Arc::clone(rule);
            let input = Arc::clone(input);
            tasks.spawn(async move { rule.execute(&input).await });
        }
        while let Some(joined) = tasks.join_next().await {
            record(joined, &mut first_error);
        }

        first_error.map_or(Ok(()), Err)
    }

    /// Rule `R`, if loaded in this run.
    #[must_use]
    pub fn rule<R: Rule<T>>(&self) -> Option<Arc<LoadedRule<T>>> {
        self.registry.get::<R>()
    }

    /// Effective settings of rule `R`, if loaded in this run.
    #[must_use]
    pub fn settings_for<R: Rule<T>>(&self) -> Option<Settings> {
        self.rule::<R>().map(|rule| rule.settings().clone())
    }
}

impl<T> ValidationRun<T> {
    /// All loaded rules in configured order.
    #[must_use]
    pub fn all_rules(&self) -> Vec<Arc<LoadedRule<T>>> {
        self.registry.all()
    }

    /// Executed rules in configured order.
    #[must_use]
    pub fn executed_rules(&self) -> Vec<Arc<LoadedRule<T>>> {
        self.registry
            .all()
            .into_iter()
            .filter(|rule| rule.executed())
            .collect()
    }

    /// Loaded rules whose effective settings contain every entry of `filter`.
    #[must_use]
    pub fn rules_by_settings(&self, filter: &Settings) -> Vec<Arc<LoadedRule<T>>> {
        self.registry
            .all()
            .into_iter()
            .filter(|rule| rule.settings().matches(filter))
            .collect()
    }

    /// The run's registry.
    #[must_use]
    pub fn registry(&self) -> &Arc<RuleRegistry<T>> {
        &self.registry
    }
}

fn record(
    joined: Result<Result<(), ValidatorError>, tokio::task::JoinError>,
    first_error: &mut Option<ValidatorError>,
) {
    match joined {
        Ok(Ok(())) => {}
        Ok(Err(e)) => {
            error!(error = %e, "Rule execution failed");
            first_error.get_or_insert(e);
        }
        Err(join_err) => error!(?join_err, "Rule task panicked"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::RuleContext;
    use crate::rule::{RuleDefinition, RuleResult};

    #[derive(Default)]
    struct Nameless;

    impl Rule<u8> for Nameless {
        fn create(&self, def: &mut RuleDefinition<u8>) {
            def.name("No id");
        }
    }

    #[derive(Default)]
    struct Disabled;

    impl Rule<u8> for Disabled {
        fn create(&self, def: &mut RuleDefinition<u8>) {
            def.id("OFF").name("Disabled").disable();
        }

        fn validate(&self, _input: &u8, ctx: &mut RuleContext) -> RuleResult {
            ctx.add_message("should never run")
        }
    }

    #[derive(Default)]
    struct Even;

    impl Rule<u8> for Even {
        fn create(&self, def: &mut RuleDefinition<u8>) {
            def.id("EVEN").name("Even");
        }

        fn validate(&self, input: &u8, ctx: &mut RuleContext) -> RuleResult {
            if input % 2 == 1 {
                ctx.add_message(format!("{input} is odd"))?;
            }
            Ok(())
        }
    }

    fn loaded_ids<T>(run: &ValidationRun<T>) -> Vec<String> {
        run.all_rules().iter().map(|r| r.id().to_string()).collect()
    }

    fn validator(config: RuleConfig<u8>) -> Validator {
        Validator::builder().rule_config(config).build().unwrap()
    }

    #[test]
    fn build_without_configs_fails() {
        assert!(matches!(
            Validator::builder().build(),
            Err(ConfigError::NoRuleConfigs)
        ));
    }

    #[test]
    fn builder_values_override_file_config() {
        let validator = Validator::builder()
            .rule_config(RuleConfig::<u8>::builder("Bytes").build().unwrap())
            .config(ValidatorConfig {
                max_message_count: Some(10),
                parallelism: Some(2),
                ..ValidatorConfig::default()
            })
            .parallelism(8)
            .build()
            .unwrap();

        assert_eq!(validator.parallelism(), 8);
        assert_eq!(validator.max_message_count(), 10);
    }

    #[test]
    fn missing_id_is_rejected() {
        let validator = validator(
            RuleConfig::<u8>::builder("Bytes")
                .group("g", "G", |g| g.rule::<Nameless>())
                .build()
                .unwrap(),
        );

        let err = validator
            .load_rules::<u8>(&ValidationOptions::new())
            .err()
            .unwrap();
        assert!(matches!(
            err,
            ValidatorError::Config(ConfigError::MissingRuleId { .. })
        ));
    }

    #[test]
    fn disabled_rules_are_not_loaded() {
        let validator = validator(
            RuleConfig::<u8>::builder("Bytes")
                .group("g", "G", |g| g.rule::<Disabled>().rule::<Even>())
                .build()
                .unwrap(),
        );

        let run = validator.load_rules::<u8>(&ValidationOptions::new()).unwrap();
        assert_eq!(loaded_ids(&run), vec!["EVEN"]);
        assert!(run.rule::<Disabled>().is_none());
    }

    #[test]
    fn unknown_input_type_is_rejected() {
        let validator = validator(RuleConfig::<u8>::builder("Bytes").build().unwrap());
        let err = validator
            .load_rules::<String>(&ValidationOptions::new())
            .err()
            .unwrap();
        assert!(matches!(
            err,
            ValidatorError::Config(ConfigError::RuleConfigNotFound { .. })
        ));
    }

    #[test]
    fn same_rule_in_two_groups_is_already_loaded() {
        let validator = validator(
            RuleConfig::<u8>::builder("Bytes")
                .group("a", "A", |g| g.rule::<Even>())
                .group("b", "B", |g| g.rule::<Even>())
                .build()
                .unwrap(),
        );

        let err = validator
            .load_rules::<u8>(&ValidationOptions::new())
            .err()
            .unwrap();
        assert!(matches!(
            err,
            ValidatorError::Load(LoadError::AlreadyLoaded { .. })
        ));
    }

    #[tokio::test]
    async fn parallelism_of_one_runs_everything() {
        let validator = Validator::builder()
            .rule_config(
                RuleConfig::<u8>::builder("Bytes")
                    .group("g", "G", |g| g.rule::<Even>())
                    .build()
                    .unwrap(),
            )
            .parallelism(1)
            .build()
            .unwrap();

        let run = validator.validate(3_u8, &ValidationOptions::new()).await.unwrap();
        let even = run.rule::<Even>().unwrap();
        assert_eq!(even.status(), crate::types::Status::Failed);
        assert_eq!(run.executed_rules().len(), 1);
    }
}

//! Loaded rule instances: the rule state machine and the dependency gate.

use crate::context::RuleContext;
use crate::dependency::Dependency;
use crate::error::{ConfigError, RuleError, ValidatorError};
use crate::registry::RuleRegistry;
use crate::rule::{Rule, RuleDefinition, RuleInput, RuleKey, RuleMetadata, RuleType};
use crate::settings::Settings;
use crate::translation::{apply_translations, TranslationProvider};
use crate::types::{ExecutionOutcome, MessageType, RuleMessage, RuleReport, Status};

use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::RwLock;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock, Weak};
use std::time::{Duration, Instant};
use tokio::sync::OnceCell;
use tracing::{error, info, warn};

#[derive(Debug, Default)]
struct RuleState {
    status: Status,
    messages: Vec<RuleMessage>,
    outcome: Option<ExecutionOutcome>,
    elapsed: Option<Duration>,
}

/// A rule instantiated for one validation run.
///
/// Owns the rule's messages and status. Both are written only by the rule's
/// own validation attempt, which runs at most once per run.
pub struct LoadedRule<T> {
    key: RuleKey,
    logic: Box<dyn Rule<T>>,
    metadata: RuleMetadata,
    dependencies: Vec<Dependency>,
    disabled: bool,
    group_id: String,
    settings: Arc<Settings>,
    max_message_count: usize,
    registry: OnceLock<Weak<RuleRegistry<T>>>,
    attempt: OnceCell<()>,
    started: AtomicBool,
    state: RwLock<RuleState>,
}

impl<T: RuleInput> LoadedRule<T> {
    /// Instantiates a rule from its factory and runs its `create` step.
    #[must_use]
    pub fn from_type(rule_type: &RuleType<T>) -> Self {
        Self::new(rule_type.key(), rule_type.instantiate())
    }

    /// Wraps an existing rule value and runs its `create` step.
    #[must_use]
    pub fn from_rule<R: Rule<T>>(rule: R) -> Self {
        Self::new(RuleKey::of::<R>(), Box::new(rule))
    }

    fn new(key: RuleKey, logic: Box<dyn Rule<T>>) -> Self {
        let mut definition = RuleDefinition::new();
        logic.create(&mut definition);
        let (metadata, disabled, dependencies) = definition.into_parts();

        Self {
            key,
            logic,
            metadata,
            dependencies,
            disabled,
            group_id: String::new(),
            settings: Arc::new(Settings::new()),
            max_message_count: usize::MAX,
            registry: OnceLock::new(),
            attempt: OnceCell::new(),
            started: AtomicBool::new(false),
            state: RwLock::new(RuleState::default()),
        }
    }

    /// Sets the group the rule was configured in.
    #[must_use]
    pub fn with_group(mut self, group_id: impl Into<String>) -> Self {
        self.group_id = group_id.into();
        self
    }

    /// Sets the rule's effective settings.
    #[must_use]
    pub fn with_settings(mut self, settings: Settings) -> Self {
        self.settings = Arc::new(settings);
        self
    }

    /// Sets the maximum number of messages retained before cancellation.
    #[must_use]
    pub fn with_max_message_count(mut self, max_message_count: usize) -> Self {
        self.max_message_count = max_message_count;
        self
    }

    /// Applies translated texts from a provider.
    #[must_use]
    pub fn translate(mut self, provider: Option<&dyn TranslationProvider>) -> Self {
        if let Some(provider) = provider {
            let texts = provider.translations_for_rule(&self.metadata);
            apply_translations(&mut self.metadata, &texts);
        }
        self
    }

    pub(crate) fn attach(&self, registry: Weak<RuleRegistry<T>>) {
        let _ = self.registry.set(registry);
    }

    fn registry(&self) -> Result<Arc<RuleRegistry<T>>, ValidatorError> {
        self.registry
            .get()
            .and_then(Weak::upgrade)
            .ok_or(ValidatorError::RuleNotSetUp {
                rule: self.key.type_name(),
            })
    }

    /// Runs the rule against `input` unless it is disabled or already attempted.
    ///
    /// Dependencies are executed first and their gating conditions checked;
    /// if any is unmet the rule stays [`Status::Skipped`]. Concurrent callers
    /// share a single attempt.
    ///
    /// # Errors
    ///
    /// Returns [`ValidatorError::RuleNotSetUp`] if the rule was never
    /// registered, or a configuration error if a prerequisite is not loaded.
    /// Failures inside validation logic are not errors; they end in
    /// [`Status::SystemError`].
    pub fn execute<'a>(&'a self, input: &'a Arc<T>) -> BoxFuture<'a, Result<(), ValidatorError>> {
        Box::pin(async move {
            let registry = self.registry()?;
            if self.disabled {
                return Ok(());
            }
            let attempt = self
                .attempt
                .get_or_try_init(|| self.run_attempt(&registry, input));
            match AssertUnwindSafe(attempt).catch_unwind().await {
                Ok(result) => result.map(|_| ()),
                Err(panic) => {
                    self.abandon(&panic_message(panic.as_ref()));
                    Ok(())
                }
            }
        })
    }

    /// Closes an attempt that unwound outside the validation logic.
    fn abandon(&self, reason: &str) {
        error!(rule = %self, error = %reason, "Rule attempt aborted");
        {
            let mut state = self.state.write();
            if state.outcome.is_none() {
                state.status = Status::SystemError;
                state.outcome = Some(ExecutionOutcome::Errored(reason.to_string()));
            }
        }
        let _ = self.attempt.set(());
    }

    async fn can_execute(
        &self,
        registry: &RuleRegistry<T>,
        input: &Arc<T>,
    ) -> Result<bool, ValidatorError> {
        for dependency in &self.dependencies {
            let prerequisite = registry.get_by_key(dependency.rule()).ok_or_else(|| {
                ConfigError::DependencyNotLoaded {
                    rule: self.metadata.id.clone(),
                    dependency: dependency.rule().type_name(),
                }
            })?;

            prerequisite.execute(input).await?;

            let status = prerequisite.status();
            if !dependency.condition().is_met(status) {
                warn!(
                    rule = %self,
                    prerequisite = %prerequisite,
                    condition = %dependency.condition(),
                    %status,
                    "Dependency not met"
                );
                return Ok(false);
            }
        }
        Ok(true)
    }

    async fn run_attempt(
        &self,
        registry: &RuleRegistry<T>,
        input: &Arc<T>,
    ) -> Result<(), ValidatorError> {
        if !self.can_execute(registry, input).await? {
            return Ok(());
        }
        if self.started.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        let started = Instant::now();
        let mut ctx = RuleContext::new(
            self.metadata.id.clone(),
            Arc::clone(&self.settings),
            Arc::clone(registry.data()),
            self.max_message_count,
        );

        let outcome = self.run_logic(input, &mut ctx).await;
        let elapsed = started.elapsed();
        let skipped = ctx.is_skipped();
        let messages = ctx.into_messages();

        let status = match &outcome {
            ExecutionOutcome::Errored(reason) => {
                error!(rule = %self, error = %reason, "Could not execute rule");
                Status::SystemError
            }
            _ => Status::settle(skipped, messages.len(), self.metadata.message_type),
        };

        let report = RuleReport {
            id: self.metadata.id.clone(),
            name: self.metadata.name.clone(),
            full_name: self.full_name(),
            status,
            elapsed,
            message_count: messages.len(),
        };

        {
            let mut state = self.state.write();
            state.status = status;
            state.messages = messages;
            state.outcome = Some(outcome);
            state.elapsed = Some(elapsed);
        }

        info!(
            id = %report.id,
            name = %report.name,
            full_name = %report.full_name,
            status = %report.status,
            elapsed_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
            message_count = report.message_count,
            "Rule executed"
        );
        registry.notify(&report);

        Ok(())
    }

    /// Runs validation logic, racing it against the attempt's token.
    async fn run_logic(&self, input: &T, ctx: &mut RuleContext) -> ExecutionOutcome {
        let token = ctx.cancellation_token().clone();
        let validation = AssertUnwindSafe(self.logic.validate_async(input, ctx)).catch_unwind();

        let outcome = tokio::select! {
            biased;
            result = validation => match result {
                Ok(Ok(())) => ExecutionOutcome::Completed,
                Ok(Err(RuleError::Cancelled)) => ExecutionOutcome::Cancelled,
                Ok(Err(RuleError::Skipped)) => ExecutionOutcome::Skipped,
                Ok(Err(err)) => ExecutionOutcome::Errored(format!("{err:#}")),
                Err(panic) => ExecutionOutcome::Errored(panic_message(panic.as_ref())),
            },
            () = token.cancelled() => ExecutionOutcome::Cancelled,
        };

        // A rule may swallow the cap error and still return Ok.
        if outcome == ExecutionOutcome::Completed && token.is_cancelled() {
            return ExecutionOutcome::Cancelled;
        }
        outcome
    }
}

impl<T> LoadedRule<T> {
    /// Identity of the rule type.
    #[must_use]
    pub fn key(&self) -> RuleKey {
        self.key
    }

    /// Rule id.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.metadata.id
    }

    /// Rule name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    /// `"{id}: {name}"`.
    #[must_use]
    pub fn full_name(&self) -> String {
        self.metadata.full_name()
    }

    /// Translated metadata.
    #[must_use]
    pub fn metadata(&self) -> &RuleMetadata {
        &self.metadata
    }

    /// Message type.
    #[must_use]
    pub fn message_type(&self) -> MessageType {
        self.metadata.message_type
    }

    /// Declared dependencies.
    #[must_use]
    pub fn dependencies(&self) -> &[Dependency] {
        &self.dependencies
    }

    /// Whether the rule disabled itself.
    #[must_use]
    pub fn disabled(&self) -> bool {
        self.disabled
    }

    /// Id of the group the rule was configured in.
    #[must_use]
    pub fn group_id(&self) -> &str {
        &self.group_id
    }

    /// Effective settings.
    #[must_use]
    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Current status.
    #[must_use]
    pub fn status(&self) -> Status {
        self.state.read().status
    }

    /// Retained messages.
    #[must_use]
    pub fn messages(&self) -> Vec<RuleMessage> {
        self.state.read().messages.clone()
    }

    /// Number of retained messages.
    #[must_use]
    pub fn message_count(&self) -> usize {
        self.state.read().messages.len()
    }

    /// Returns true if the rule has messages.
    #[must_use]
    pub fn has_messages(&self) -> bool {
        self.message_count() > 0
    }

    /// Returns true once the status is anything but [`Status::Skipped`].
    #[must_use]
    pub fn executed(&self) -> bool {
        self.status().is_executed()
    }

    /// Returns true if the rule passed.
    #[must_use]
    pub fn passed(&self) -> bool {
        self.status() == Status::Passed
    }

    /// How the validation attempt ended, if validation logic ran.
    #[must_use]
    pub fn outcome(&self) -> Option<ExecutionOutcome> {
        self.state.read().outcome.clone()
    }

    /// Time spent in validation logic, if it ran.
    #[must_use]
    pub fn elapsed(&self) -> Option<Duration> {
        self.state.read().elapsed
    }
}

impl<T> std::fmt::Display for LoadedRule<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.metadata.id, self.metadata.name)
    }
}

impl<T> std::fmt::Debug for LoadedRule<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadedRule")
            .field("key", &self.key.type_name())
            .field("id", &self.metadata.id)
            .field("status", &self.status())
            .field("message_count", &self.message_count())
            .finish_non_exhaustive()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        format!("panicked: {msg}")
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        format!("panicked: {msg}")
    } else {
        "panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rule::RuleResult;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    type Input = Vec<&'static str>;

    /// Emits one message per input entry.
    struct Emitter {
        id: &'static str,
        message_type: MessageType,
        runs: Arc<AtomicUsize>,
    }

    impl Emitter {
        fn new(id: &'static str, message_type: MessageType) -> (Self, Arc<AtomicUsize>) {
            let runs = Arc::new(AtomicUsize::new(0));
            let rule = Self {
                id,
                message_type,
                runs: Arc::clone(&runs),
            };
            (rule, runs)
        }
    }

    impl Rule<Input> for Emitter {
        fn create(&self, def: &mut RuleDefinition<Input>) {
            def.id(self.id)
                .name("Emitter")
                .message_type(self.message_type);
        }

        fn validate(&self, input: &Input, ctx: &mut RuleContext) -> RuleResult {
            self.runs.fetch_add(1, Ordering::SeqCst);
            for entry in input {
                ctx.add_message(*entry)?;
            }
            Ok(())
        }
    }

    /// Passes only when its prerequisite passed.
    struct Gated {
        runs: Arc<AtomicUsize>,
    }

    impl Rule<Input> for Gated {
        fn create(&self, def: &mut RuleDefinition<Input>) {
            def.id("GATED").name("Gated");
            def.depend_on::<Emitter>().to_pass();
        }

        fn validate(&self, _input: &Input, _ctx: &mut RuleContext) -> RuleResult {
            self.runs.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct Panics;

    impl Rule<Input> for Panics {
        fn create(&self, def: &mut RuleDefinition<Input>) {
            def.id("PANIC").name("Panics");
        }

        fn validate(&self, _input: &Input, _ctx: &mut RuleContext) -> RuleResult {
            panic!("geometry library crashed");
        }
    }

    struct SkipsItself;

    impl Rule<Input> for SkipsItself {
        fn create(&self, def: &mut RuleDefinition<Input>) {
            def.id("SKIP").name("Skips itself");
        }

        fn validate(&self, _input: &Input, ctx: &mut RuleContext) -> RuleResult {
            ctx.add_message("before skip")?;
            ctx.skip_rule()
        }
    }

    /// Async rule that keeps going after the cap until it observes cancellation.
    struct Chatty;

    #[async_trait]
    impl Rule<Input> for Chatty {
        fn create(&self, def: &mut RuleDefinition<Input>) {
            def.id("CHATTY").name("Chatty").message_type(MessageType::Warning);
        }

        async fn validate_async(&self, _input: &Input, ctx: &mut RuleContext) -> RuleResult {
            for i in 0..100 {
                let _ = ctx.add_message(format!("message {i}"));
                tokio::task::yield_now().await;
            }
            Ok(())
        }
    }

    fn load(rules: Vec<LoadedRule<Input>>) -> Arc<RuleRegistry<Input>> {
        let registry = RuleRegistry::new();
        registry.add_rules(rules).unwrap();
        registry
    }

    #[tokio::test]
    async fn error_messages_fail_the_rule() {
        let (rule, runs) = Emitter::new("E1", MessageType::Error);
        let registry = load(vec![LoadedRule::from_rule(rule)]);
        let input = Arc::new(vec!["open ring"]);

        let rule = registry.execute_rule::<Emitter>(&input).await.unwrap();
        assert_eq!(rule.status(), Status::Failed);
        assert_eq!(rule.messages(), vec![RuleMessage::new("open ring")]);
        assert_eq!(rule.outcome(), Some(ExecutionOutcome::Completed));
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn second_execute_is_a_no_op() {
        let (rule, runs) = Emitter::new("E1", MessageType::Warning);
        let registry = load(vec![LoadedRule::from_rule(rule)]);
        let input = Arc::new(vec!["a"]);

        let rule = registry.execute_rule::<Emitter>(&input).await.unwrap();
        let before = (rule.status(), rule.messages());

        let other_input = Arc::new(vec!["b", "c"]);
        rule.execute(&other_input).await.unwrap();

        assert_eq!((rule.status(), rule.messages()), before);
        assert_eq!(rule.status(), Status::Warning);
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_requests_share_one_attempt() {
        let (rule, runs) = Emitter::new("E1", MessageType::Error);
        let registry = load(vec![LoadedRule::from_rule(rule)]);
        let input = Arc::new(Vec::new());
        let rule = registry.get::<Emitter>().unwrap();

        let mut tasks = tokio::task::JoinSet::new();
        for _ in 0..16 {
            let rule = Arc::clone(&rule);
            let input = Arc::clone(&input);
            tasks.spawn(async move { rule.execute(&input).await });
        }
        while let Some(joined) = tasks.join_next().await {
            joined.unwrap().unwrap();
        }

        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert_eq!(rule.status(), Status::Passed);
    }

    #[tokio::test]
    async fn unmet_should_pass_leaves_dependent_skipped() {
        let (prerequisite, _) = Emitter::new("E1", MessageType::Error);
        let gated_runs = Arc::new(AtomicUsize::new(0));
        let gated = Gated {
            runs: Arc::clone(&gated_runs),
        };
        let registry = load(vec![
            LoadedRule::from_rule(prerequisite),
            LoadedRule::from_rule(gated),
        ]);
        let input = Arc::new(vec!["self-intersection"]);

        let gated = registry.execute_rule::<Gated>(&input).await.unwrap();
        assert_eq!(gated.status(), Status::Skipped);
        assert_eq!(gated.outcome(), None);
        assert_eq!(gated_runs.load(Ordering::SeqCst), 0);
        assert_eq!(registry.get::<Emitter>().unwrap().status(), Status::Failed);
    }

    #[tokio::test]
    async fn met_should_pass_runs_dependent() {
        let (prerequisite, prerequisite_runs) = Emitter::new("E1", MessageType::Error);
        let gated_runs = Arc::new(AtomicUsize::new(0));
        let registry = load(vec![
            LoadedRule::from_rule(prerequisite),
            LoadedRule::from_rule(Gated {
                runs: Arc::clone(&gated_runs),
            }),
        ]);
        let input = Arc::new(Vec::new());

        assert!(registry.rule_passed::<Gated>(&input).await.unwrap());
        assert_eq!(prerequisite_runs.load(Ordering::SeqCst), 1);
        assert_eq!(gated_runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn missing_prerequisite_is_a_configuration_error() {
        let registry = load(vec![LoadedRule::from_rule(Gated {
            runs: Arc::new(AtomicUsize::new(0)),
        })]);
        let input = Arc::new(Vec::new());

        let err = registry.execute_rule::<Gated>(&input).await.unwrap_err();
        assert!(matches!(
            err,
            ValidatorError::Config(ConfigError::DependencyNotLoaded { .. })
        ));
    }

    #[tokio::test]
    async fn unattached_rule_is_not_set_up() {
        let (rule, runs) = Emitter::new("E1", MessageType::Error);
        let rule = LoadedRule::from_rule(rule);
        let input = Arc::new(Vec::new());

        let err = rule.execute(&input).await.unwrap_err();
        assert!(matches!(err, ValidatorError::RuleNotSetUp { .. }));
        assert_eq!(runs.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn message_cap_truncates_without_error() {
        let (rule, _) = Emitter::new("E1", MessageType::Warning);
        let registry = load(vec![LoadedRule::from_rule(rule).with_max_message_count(2)]);
        let input = Arc::new(vec!["1", "2", "3", "4", "5"]);

        let rule = registry.execute_rule::<Emitter>(&input).await.unwrap();
        assert_eq!(rule.message_count(), 2);
        assert_eq!(rule.status(), Status::Warning);
        assert_eq!(rule.outcome(), Some(ExecutionOutcome::Cancelled));
    }

    #[tokio::test]
    async fn async_rule_observes_cancellation() {
        let registry = load(vec![LoadedRule::from_rule(Chatty).with_max_message_count(3)]);
        let input = Arc::new(Vec::new());

        let rule = registry.execute_rule::<Chatty>(&input).await.unwrap();
        assert_eq!(rule.message_count(), 3);
        assert_eq!(rule.status(), Status::Warning);
        assert!(rule.outcome().unwrap().is_cancelled());
    }

    #[tokio::test]
    async fn panic_becomes_system_error() {
        let registry = load(vec![LoadedRule::from_rule(Panics)]);
        let input = Arc::new(Vec::new());

        let rule = registry.execute_rule::<Panics>(&input).await.unwrap();
        assert_eq!(rule.status(), Status::SystemError);
        assert!(rule.executed());
        match rule.outcome() {
            Some(ExecutionOutcome::Errored(reason)) => {
                assert!(reason.contains("geometry library crashed"));
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test]
    async fn skip_rule_keeps_status_skipped() {
        let registry = load(vec![LoadedRule::from_rule(SkipsItself)]);
        let input = Arc::new(Vec::new());

        let rule = registry.execute_rule::<SkipsItself>(&input).await.unwrap();
        assert_eq!(rule.status(), Status::Skipped);
        assert!(!rule.executed());
        assert_eq!(rule.outcome(), Some(ExecutionOutcome::Skipped));
    }

    #[tokio::test]
    async fn observer_receives_report() {
        let reports = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let sink = Arc::clone(&reports);
        let registry = RuleRegistry::with_observer(Some(Arc::new(move |report: &RuleReport| {
            sink.lock().push(report.clone());
        })));
        let (rule, _) = Emitter::new("E1", MessageType::Information);
        registry.add_rules([LoadedRule::from_rule(rule)]).unwrap();

        registry
            .execute_rule::<Emitter>(&Arc::new(vec!["note"]))
            .await
            .unwrap();

        let reports = reports.lock();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].full_name, "E1: Emitter");
        assert_eq!(reports[0].status, Status::Info);
        assert_eq!(reports[0].message_count, 1);
    }

    #[tokio::test]
    async fn panicking_observer_leaves_attempt_intact() {
        let registry = RuleRegistry::with_observer(Some(Arc::new(|report: &RuleReport| {
            assert_ne!(report.id, "E1", "observer rejects E1");
        })));
        let (prerequisite, prerequisite_runs) = Emitter::new("E1", MessageType::Error);
        let gated_runs = Arc::new(AtomicUsize::new(0));
        registry
            .add_rules([
                LoadedRule::from_rule(prerequisite),
                LoadedRule::from_rule(Gated {
                    runs: Arc::clone(&gated_runs),
                }),
            ])
            .unwrap();
        let input = Arc::new(Vec::new());

        let prerequisite = registry.execute_rule::<Emitter>(&input).await.unwrap();
        assert_eq!(prerequisite.status(), Status::Passed);
        assert_eq!(prerequisite.outcome(), Some(ExecutionOutcome::Completed));

        assert!(registry.rule_passed::<Gated>(&input).await.unwrap());
        assert_eq!(prerequisite_runs.load(Ordering::SeqCst), 1);
        assert_eq!(gated_runs.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn registering_a_type_twice_fails() {
        let (first, _) = Emitter::new("E1", MessageType::Error);
        let (second, _) = Emitter::new("E2", MessageType::Error);
        let registry = load(vec![LoadedRule::from_rule(first)]);

        let err = registry
            .add_rules([LoadedRule::from_rule(second)])
            .unwrap_err();
        assert!(err.to_string().contains("Emitter"));
        assert_eq!(registry.len(), 1);
        assert!(registry.get_by_id("E2").is_none());
    }
}

//! Rule trait and rule identity types.

use crate::context::RuleContext;
use crate::dependency::{Dependency, DependencyBuilder};
use crate::error::RuleError;
use crate::types::MessageType;

use async_trait::async_trait;
use std::any::{type_name, TypeId};
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;
use tokio::runtime::{Handle, RuntimeFlavor};

/// Result returned by validation logic.
pub type RuleResult = Result<(), RuleError>;

/// Bound shared by every input type a rule can validate.
pub trait RuleInput: Send + Sync + 'static {}

impl<T: Send + Sync + 'static> RuleInput for T {}

/// A unit of validation logic against one input type.
///
/// `create` declares the rule's metadata and dependencies. `validate` (or
/// `validate_async` for rules that await) runs the check and reports
/// findings through the [`RuleContext`].
///
/// # Example
///
/// ```ignore
/// use rulegate_core::{Rule, RuleContext, RuleDefinition, RuleResult, MessageType};
///
/// #[derive(Default)]
/// pub struct FootprintClosed;
///
/// impl Rule<Building> for FootprintClosed {
///     fn create(&self, def: &mut RuleDefinition<Building>) {
///         def.id("GEO-1").name("Footprint must be closed");
///         def.depend_on::<FootprintPresent>().to_pass();
///     }
///
///     fn validate(&self, input: &Building, ctx: &mut RuleContext) -> RuleResult {
///         if !input.footprint.is_closed() {
///             ctx.add_message("footprint is open")?;
///         }
///         Ok(())
///     }
/// }
/// ```
#[async_trait]
pub trait Rule<T: RuleInput>: Send + Sync + 'static {
    /// Declares metadata, the disabled flag and dependencies.
    fn create(&self, def: &mut RuleDefinition<T>);

    /// Synchronous validation logic. Does nothing by default.
    fn validate(&self, input: &T, ctx: &mut RuleContext) -> RuleResult {
        let _ = (input, ctx);
        Ok(())
    }

    /// Asynchronous validation logic. Delegates to [`Rule::validate`] by default.
    ///
    /// On a multi-threaded runtime the synchronous logic runs through
    /// [`tokio::task::block_in_place`] so other rules keep their worker.
    async fn validate_async(&self, input: &T, ctx: &mut RuleContext) -> RuleResult {
        run_blocking(|| self.validate(input, ctx))
    }
}

fn run_blocking(validate: impl FnOnce() -> RuleResult) -> RuleResult {
    match Handle::try_current() {
        Ok(handle) if handle.runtime_flavor() == RuntimeFlavor::MultiThread => {
            tokio::task::block_in_place(validate)
        }
        _ => validate(),
    }
}

/// Runtime identity of a rule type.
///
/// Equality and hashing use the [`TypeId`] only; the name is for display.
#[derive(Debug, Clone, Copy)]
pub struct RuleKey {
    type_id: TypeId,
    type_name: &'static str,
}

impl RuleKey {
    /// Returns the key of type `R`.
    #[must_use]
    pub fn of<R: 'static>() -> Self {
        Self {
            type_id: TypeId::of::<R>(),
            type_name: type_name::<R>(),
        }
    }

    /// Fully qualified type name.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// Type name without its module path.
    #[must_use]
    pub fn short_name(&self) -> &'static str {
        let base = self.type_name.split('<').next().unwrap_or(self.type_name);
        base.rsplit("::").next().unwrap_or(base)
    }
}

impl PartialEq for RuleKey {
    fn eq(&self, other: &Self) -> bool {
        self.type_id == other.type_id
    }
}

impl Eq for RuleKey {}

impl Hash for RuleKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.type_id.hash(state);
    }
}

impl std::fmt::Display for RuleKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.short_name())
    }
}

/// Factory for a rule type validating `T`.
pub struct RuleType<T> {
    key: RuleKey,
    factory: fn() -> Box<dyn Rule<T>>,
}

fn instantiate<T: RuleInput, R: Rule<T> + Default>() -> Box<dyn Rule<T>> {
    Box::new(R::default())
}

impl<T: RuleInput> RuleType<T> {
    /// Returns the factory for the zero-argument constructible rule `R`.
    #[must_use]
    pub fn of<R: Rule<T> + Default>() -> Self {
        Self {
            key: RuleKey::of::<R>(),
            factory: instantiate::<T, R>,
        }
    }

    /// Creates a fresh rule instance.
    #[must_use]
    pub fn instantiate(&self) -> Box<dyn Rule<T>> {
        (self.factory)()
    }
}

impl<T> RuleType<T> {
    /// Identity of the rule type.
    #[must_use]
    pub fn key(&self) -> RuleKey {
        self.key
    }
}

impl<T> Clone for RuleType<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for RuleType<T> {}

impl<T> std::fmt::Debug for RuleType<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("RuleType").field(&self.key.type_name).finish()
    }
}

/// Descriptive, translatable metadata of a rule.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuleMetadata {
    /// Stable id; must be non-empty once created.
    pub id: String,
    /// Short name.
    pub name: String,
    /// What the rule checks.
    pub description: String,
    /// Condition under which the rule applies.
    pub precondition: Option<String>,
    /// Reference into an external checklist.
    pub checklist_reference: Option<String>,
    /// Origin of the requirement.
    pub source: Option<String>,
    /// Link or text documenting the rule.
    pub documentation: Option<String>,
    /// Classification of emitted messages.
    pub message_type: MessageType,
    /// Name of the translation resource for this rule, if any.
    pub translation: Option<String>,
}

impl RuleMetadata {
    /// `"{id}: {name}"`.
    #[must_use]
    pub fn full_name(&self) -> String {
        format!("{}: {}", self.id, self.name)
    }
}

/// Declarations made by a rule in [`Rule::create`].
pub struct RuleDefinition<T> {
    metadata: RuleMetadata,
    disabled: bool,
    dependencies: Vec<Dependency>,
    _input: PhantomData<fn(&T)>,
}

impl<T> Default for RuleDefinition<T> {
    fn default() -> Self {
        Self {
            metadata: RuleMetadata::default(),
            disabled: false,
            dependencies: Vec::new(),
            _input: PhantomData,
        }
    }
}

impl<T: RuleInput> RuleDefinition<T> {
    /// Creates an empty definition.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the rule id.
    pub fn id(&mut self, id: impl Into<String>) -> &mut Self {
        self.metadata.id = id.into();
        self
    }

    /// Sets the rule name.
    pub fn name(&mut self, name: impl Into<String>) -> &mut Self {
        self.metadata.name = name.into();
        self
    }

    /// Sets the description.
    pub fn description(&mut self, description: impl Into<String>) -> &mut Self {
        self.metadata.description = description.into();
        self
    }

    /// Sets the precondition text.
    pub fn precondition(&mut self, precondition: impl Into<String>) -> &mut Self {
        self.metadata.precondition = Some(precondition.into());
        self
    }

    /// Sets the checklist reference.
    pub fn checklist_reference(&mut self, reference: impl Into<String>) -> &mut Self {
        self.metadata.checklist_reference = Some(reference.into());
        self
    }

    /// Sets the source of the requirement.
    pub fn source(&mut self, source: impl Into<String>) -> &mut Self {
        self.metadata.source = Some(source.into());
        self
    }

    /// Sets the documentation link or text.
    pub fn documentation(&mut self, documentation: impl Into<String>) -> &mut Self {
        self.metadata.documentation = Some(documentation.into());
        self
    }

    /// Sets the message type. Defaults to [`MessageType::Error`].
    pub fn message_type(&mut self, message_type: MessageType) -> &mut Self {
        self.metadata.message_type = message_type;
        self
    }

    /// Names the translation resource used for this rule's texts.
    pub fn translation(&mut self, resource: impl Into<String>) -> &mut Self {
        self.metadata.translation = Some(resource.into());
        self
    }

    /// Disables the rule. Disabled rules are never loaded.
    pub fn disable(&mut self) -> &mut Self {
        self.disabled = true;
        self
    }

    /// Starts a dependency on rule `R`; finish it with a condition.
    pub fn depend_on<R: Rule<T>>(&mut self) -> DependencyBuilder<'_> {
        DependencyBuilder::new(&mut self.dependencies, RuleKey::of::<R>())
    }

    pub(crate) fn into_parts(self) -> (RuleMetadata, bool, Vec<Dependency>) {
        (self.metadata, self.disabled, self.dependencies)
    }
}

impl<T> RuleDefinition<T> {
    /// Metadata declared so far.
    #[must_use]
    pub fn metadata(&self) -> &RuleMetadata {
        &self.metadata
    }

    /// Whether the rule disabled itself.
    #[must_use]
    pub fn is_disabled(&self) -> bool {
        self.disabled
    }

    /// Dependencies declared so far.
    #[must_use]
    pub fn dependencies(&self) -> &[Dependency] {
        &self.dependencies
    }
}

//! Dependency gates between rules.

use crate::rule::RuleKey;
use crate::types::Status;

/// Condition a prerequisite rule's settled status must satisfy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DependencyCondition {
    /// Prerequisite must have passed.
    ShouldPass,
    /// Prerequisite must have failed.
    ShouldFail,
    /// Prerequisite must have ended with warnings.
    ShouldWarn,
    /// Prerequisite must have executed, whatever its outcome.
    ShouldExecute,
}

impl DependencyCondition {
    /// Evaluates the condition against a settled status.
    #[must_use]
    pub fn is_met(self, status: Status) -> bool {
        match self {
            Self::ShouldPass => status == Status::Passed,
            Self::ShouldFail => status == Status::Failed,
            Self::ShouldWarn => status == Status::Warning,
            Self::ShouldExecute => status.is_executed(),
        }
    }
}

impl std::fmt::Display for DependencyCondition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ShouldPass => write!(f, "should pass"),
            Self::ShouldFail => write!(f, "should fail"),
            Self::ShouldWarn => write!(f, "should warn"),
            Self::ShouldExecute => write!(f, "should execute"),
        }
    }
}

/// A prerequisite rule plus the condition gating the dependent rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Dependency {
    rule: RuleKey,
    condition: DependencyCondition,
}

impl Dependency {
    /// Creates a dependency on `rule`.
    #[must_use]
    pub fn new(rule: RuleKey, condition: DependencyCondition) -> Self {
        Self { rule, condition }
    }

    /// The prerequisite rule type.
    #[must_use]
    pub fn rule(&self) -> RuleKey {
        self.rule
    }

    /// The gating condition.
    #[must_use]
    pub fn condition(&self) -> DependencyCondition {
        self.condition
    }
}

/// Pending dependency returned by `RuleDefinition::depend_on`.
///
/// Nothing is recorded until one of the condition methods is called.
#[must_use = "a dependency is only recorded once a condition is chosen"]
pub struct DependencyBuilder<'a> {
    target: &'a mut Vec<Dependency>,
    rule: RuleKey,
}

impl<'a> DependencyBuilder<'a> {
    pub(crate) fn new(target: &'a mut Vec<Dependency>, rule: RuleKey) -> Self {
        Self { target, rule }
    }

    fn push(self, condition: DependencyCondition) {
        self.target.push(Dependency::new(self.rule, condition));
    }

    /// Run only if the prerequisite passed.
    pub fn to_pass(self) {
        self.push(DependencyCondition::ShouldPass);
    }

    /// Run only if the prerequisite failed.
    pub fn to_fail(self) {
        self.push(DependencyCondition::ShouldFail);
    }

    /// Run only if the prerequisite ended with warnings.
    pub fn to_warn(self) {
        self.push(DependencyCondition::ShouldWarn);
    }

    /// Run once the prerequisite has executed.
    pub fn to_run(self) {
        self.push(DependencyCondition::ShouldExecute);
    }
}

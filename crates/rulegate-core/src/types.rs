//! Core types for rule outcomes, messages and the rule catalog.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Classification of the messages a rule emits.
///
/// Decides which terminal [`Status`] a rule with messages ends in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageType {
    /// Messages are errors; the rule fails.
    #[default]
    Error,
    /// Messages are warnings.
    Warning,
    /// Messages are informational.
    Information,
}

impl std::fmt::Display for MessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Error => write!(f, "ERROR"),
            Self::Warning => write!(f, "WARNING"),
            Self::Information => write!(f, "INFORMATION"),
        }
    }
}

/// Terminal status of a rule in a validation run.
///
/// Every rule starts as [`Status::Skipped`]. A rule counts as executed
/// once its status is anything else.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Status {
    /// Ran and produced no messages.
    Passed,
    /// Ran and produced error messages.
    Failed,
    /// Ran and produced warning messages.
    Warning,
    /// Ran and produced informational messages.
    Info,
    /// Never ran, was gated out by a dependency, or skipped itself.
    #[default]
    Skipped,
    /// The rule's own logic failed unexpectedly.
    SystemError,
}

impl Status {
    /// Computes the status of a finished validation attempt.
    #[must_use]
    pub fn settle(skipped: bool, message_count: usize, message_type: MessageType) -> Self {
        if skipped {
            return Self::Skipped;
        }
        if message_count == 0 {
            return Self::Passed;
        }
        match message_type {
            MessageType::Error => Self::Failed,
            MessageType::Warning => Self::Warning,
            MessageType::Information => Self::Info,
        }
    }

    /// Returns true for every status except [`Status::Skipped`].
    #[must_use]
    pub fn is_executed(self) -> bool {
        self != Self::Skipped
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Passed => write!(f, "PASSED"),
            Self::Failed => write!(f, "FAILED"),
            Self::Warning => write!(f, "WARNING"),
            Self::Info => write!(f, "INFO"),
            Self::Skipped => write!(f, "SKIPPED"),
            Self::SystemError => write!(f, "SYSTEM_ERROR"),
        }
    }
}

/// A finding emitted by a rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleMessage {
    /// Human-readable message.
    pub message: String,
    /// File the finding refers to, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
}

impl RuleMessage {
    /// Creates a new message without a file reference.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            file_name: None,
        }
    }

    /// Attaches a file reference to this message.
    #[must_use]
    pub fn with_file(mut self, file_name: impl Into<String>) -> Self {
        self.file_name = Some(file_name.into());
        self
    }
}

impl From<&str> for RuleMessage {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

impl From<String> for RuleMessage {
    fn from(message: String) -> Self {
        Self::new(message)
    }
}

impl std::fmt::Display for RuleMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.file_name {
            Some(file) => write!(f, "{file}: {}", self.message),
            None => write!(f, "{}", self.message),
        }
    }
}

/// How the last validation attempt of a rule ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionOutcome {
    /// Validation logic ran to completion.
    Completed,
    /// The message cap was reached and the attempt was cut short.
    Cancelled,
    /// The rule skipped itself.
    Skipped,
    /// Validation logic returned an error or panicked.
    Errored(String),
}

impl ExecutionOutcome {
    /// Returns true if the attempt was truncated by the message cap.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

/// Structured record of one rule execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleReport {
    /// Rule id.
    pub id: String,
    /// Rule name.
    pub name: String,
    /// `"{id}: {name}"`.
    pub full_name: String,
    /// Final status.
    pub status: Status,
    /// Wall time spent in validation logic.
    pub elapsed: Duration,
    /// Number of retained messages.
    pub message_count: usize,
}

impl std::fmt::Display for RuleReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} [{}] {} message(s) in {:.3}s",
            self.full_name,
            self.status,
            self.message_count,
            self.elapsed.as_secs_f64()
        )
    }
}

/// Static description of a rule, as shown in a rule catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleInfo {
    /// Rule id.
    pub id: String,
    /// Rule name.
    pub name: String,
    /// Rule description.
    pub description: String,
    /// Message type of the rule.
    pub message_type: MessageType,
    /// Link or text documenting the rule.
    pub documentation: Option<String>,
}

/// A named group of rules in a catalog.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleSetGroup {
    /// Group name.
    pub name: String,
    /// Rules in configured order.
    pub rules: Vec<RuleInfo>,
}

/// Catalog of every group configured for one input type.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleSet {
    /// Name of the rule configuration.
    pub name: String,
    /// Description of the rule configuration.
    pub description: Option<String>,
    /// Groups in configured order.
    pub groups: Vec<RuleSetGroup>,
}

/// Merges groups with the same name, keeping first-seen order.
#[must_use]
pub fn merge_groups(groups: impl IntoIterator<Item = RuleSetGroup>) -> Vec<RuleSetGroup> {
    let mut merged: Vec<RuleSetGroup> = Vec::new();
    for group in groups {
        match merged.iter_mut().find(|g| g.name == group.name) {
            Some(existing) => existing.rules.extend(group.rules),
            None => merged.push(group),
        }
    }
    merged
}

//! Context handed to validation logic.

use crate::error::{DataBusError, RuleError};
use crate::registry::DataBus;
use crate::rule::RuleResult;
use crate::settings::Settings;
use crate::types::RuleMessage;

use std::any::Any;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Per-attempt context provided to a rule's validation logic.
///
/// Collects the rule's messages, enforces the message cap, and gives access
/// to the rule's effective settings and the run's data bus.
#[derive(Debug)]
pub struct RuleContext {
    rule_id: String,
    settings: Arc<Settings>,
    data: Arc<DataBus>,
    messages: Vec<RuleMessage>,
    max_message_count: usize,
    token: CancellationToken,
    skipped: bool,
}

impl RuleContext {
    /// Creates a context for one validation attempt.
    #[must_use]
    pub fn new(
        rule_id: impl Into<String>,
        settings: Arc<Settings>,
        data: Arc<DataBus>,
        max_message_count: usize,
    ) -> Self {
        Self {
            rule_id: rule_id.into(),
            settings,
            data,
            messages: Vec::new(),
            max_message_count,
            token: CancellationToken::new(),
            skipped: false,
        }
    }

    /// Id of the rule being validated.
    #[must_use]
    pub fn rule_id(&self) -> &str {
        &self.rule_id
    }

    /// Records a finding.
    ///
    /// # Errors
    ///
    /// Returns [`RuleError::Cancelled`] once the message cap is reached. The
    /// message is not retained and the attempt's token is cancelled.
    pub fn add_message(&mut self, message: impl Into<RuleMessage>) -> RuleResult {
        if self.token.is_cancelled() {
            return Err(RuleError::Cancelled);
        }
        if self.messages.len() >= self.max_message_count {
            self.token.cancel();
            return Err(RuleError::Cancelled);
        }
        self.messages.push(message.into());
        Ok(())
    }

    /// Messages retained so far.
    #[must_use]
    pub fn messages(&self) -> &[RuleMessage] {
        &self.messages
    }

    /// Marks this attempt as skipped and cancels it.
    ///
    /// # Errors
    ///
    /// Always returns [`RuleError::Skipped`]; propagate it with `?` or `return`.
    pub fn skip_rule(&mut self) -> RuleResult {
        self.skipped = true;
        self.token.cancel();
        Err(RuleError::Skipped)
    }

    /// Whether [`RuleContext::skip_rule`] was called.
    #[must_use]
    pub fn is_skipped(&self) -> bool {
        self.skipped
    }

    /// Token cancelled when the attempt is cut short.
    #[must_use]
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.token
    }

    /// Whether the attempt has been cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Effective settings of the rule.
    #[must_use]
    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Gets a setting as a specific type, or `None` if absent or mistyped.
    #[must_use]
    pub fn setting<U: serde::de::DeserializeOwned>(&self, key: &str) -> Option<U> {
        self.settings.get(key)
    }

    /// Boolean setting, or `None` if absent or mistyped.
    #[must_use]
    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.settings.get_bool(key)
    }

    /// Integer setting, or `None` if absent or mistyped.
    #[must_use]
    pub fn get_int(&self, key: &str) -> Option<i64> {
        self.settings.get_int(key)
    }

    /// String setting, or `None` if absent or mistyped.
    #[must_use]
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.settings.get_str(key)
    }

    /// Reads a value another rule shared in this run.
    ///
    /// # Errors
    ///
    /// Returns an error if the key is not set or holds another type.
    pub fn get_data<U: Any + Send + Sync>(&self, key: &str) -> Result<Arc<U>, DataBusError> {
        self.data.get(key)
    }

    /// Shares a value with the other rules of this run.
    ///
    /// # Errors
    ///
    /// Returns an error if the key was already written.
    pub fn set_data<U: Any + Send + Sync>(
        &self,
        key: impl Into<String>,
        value: U,
    ) -> Result<(), DataBusError> {
        self.data.set(key, value)
    }

    pub(crate) fn into_messages(self) -> Vec<RuleMessage> {
        self.messages
    }
}

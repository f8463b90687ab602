//! Resume policies: which errors resume automatically, and when.

use crate::core::ActionType;
use crate::errors::PolicyValidationError;
use crate::model::Action;
use crate::policy::backoff::BackOff;
use chrono::Duration;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

const LONG_SUBSTRING: usize = 10;

/// Configuration governing automatic recovery of errored actions.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResumePolicy {
    /// Policy id.
    pub id: Option<Uuid>,
    /// Unique policy name, recorded as the auto resume reason.
    pub name: String,
    /// Substring the error cause must contain.
    #[serde(default)]
    pub error_substring: Option<String>,
    /// Exact flow name.
    #[serde(default)]
    pub flow: Option<String>,
    /// Exact action name.
    #[serde(default)]
    pub action: Option<String>,
    /// Exact action type.
    #[serde(default)]
    pub action_type: Option<ActionType>,
    /// Attempts after which auto resume stops.
    pub max_attempts: u32,
    /// Explicit priority; computed from the criteria when absent.
    #[serde(default)]
    pub priority: Option<i32>,
    /// Delay between attempts.
    pub back_off: Option<BackOff>,
}

/// Retry policies share the resume policy contract.
pub type RetryPolicy = ResumePolicy;

/// The decision to resume an errored action later.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResumeDecision {
    /// Name of the governing policy.
    pub policy: String,
    /// Delay before resuming.
    pub delay: Duration,
}

impl ResumePolicy {
    /// Creates a policy with a fresh id.
    #[must_use]
    pub fn new(name: impl Into<String>, max_attempts: u32, back_off: BackOff) -> Self {
        Self {
            id: Some(Uuid::new_v4()),
            name: name.into(),
            max_attempts,
            back_off: Some(back_off),
            ..Self::default()
        }
    }

    /// Matches error causes containing `substring`.
    #[must_use]
    pub fn with_error_substring(mut self, substring: impl Into<String>) -> Self {
        self.error_substring = Some(substring.into());
        self
    }

    /// Matches only the named flow.
    #[must_use]
    pub fn with_flow(mut self, flow: impl Into<String>) -> Self {
        self.flow = Some(flow.into());
        self
    }

    /// Matches only the named action.
    #[must_use]
    pub fn with_action(mut self, action: impl Into<String>) -> Self {
        self.action = Some(action.into());
        self
    }

    /// Matches only actions of this type.
    #[must_use]
    pub fn with_action_type(mut self, action_type: ActionType) -> Self {
        self.action_type = Some(action_type);
        self
    }

    /// Sets an explicit priority.
    #[must_use]
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = Some(priority);
        self
    }

    fn has_criteria(&self) -> bool {
        self.error_substring.is_some()
            || self.flow.is_some()
            || self.action.is_some()
            || self.action_type.is_some()
    }

    /// Checks the policy, collecting every failure.
    pub fn validate(&self) -> Result<(), PolicyValidationError> {
        let mut reasons = Vec::new();
        if self.id.is_none() {
            reasons.push("missing id".to_string());
        }
        if self.name.trim().is_empty() {
            reasons.push("missing name".to_string());
        }
        if !self.has_criteria() {
            reasons.push("Must specify errorSubstring, flow, action, or actionType".to_string());
        }
        if self.max_attempts < 1 {
            reasons.push("maxAttempts must be at least 1".to_string());
        }
        match &self.back_off {
            Some(back_off) => reasons.extend(back_off.validate()),
            None => reasons.push("missing backOff".to_string()),
        }

        if reasons.is_empty() {
            Ok(())
        } else {
            let label = if self.name.is_empty() {
                self.id.map(|id| id.to_string()).unwrap_or_default()
            } else {
                self.name.clone()
            };
            Err(PolicyValidationError::new(label, reasons))
        }
    }

    /// The explicit priority, or one computed from how specific the criteria are.
    #[must_use]
    pub fn effective_priority(&self) -> i32 {
        if let Some(priority) = self.priority {
            return priority;
        }
        let mut priority = 0;
        if let Some(substring) = &self.error_substring {
            priority += if substring.chars().count() > LONG_SUBSTRING { 100 } else { 50 };
        }
        if self.action.is_some() {
            priority += 100;
        } else if self.action_type.is_some() {
            priority += 50;
        }
        if self.flow.is_some() {
            priority += 50;
        }
        priority
    }

    /// Returns true if every present criterion holds for the errored action.
    #[must_use]
    pub fn matches(&self, flow: &str, action: &Action) -> bool {
        let cause = action.error_cause.as_deref().unwrap_or_default();
        self.error_substring
            .as_deref()
            .map_or(true, |substring| cause.contains(substring))
            && self.flow.as_deref().map_or(true, |f| f == flow)
            && self.action.as_deref().map_or(true, |a| a == action.name)
            && self.action_type.map_or(true, |t| t == action.action_type)
    }

    /// Returns true if the criteria are identical to another policy's.
    #[must_use]
    pub fn same_criteria(&self, other: &Self) -> bool {
        self.error_substring == other.error_substring
            && self.flow == other.flow
            && self.action == other.action
            && self.action_type == other.action_type
    }

    /// Delay for the next attempt, or `None` once attempts are exhausted.
    #[must_use]
    pub fn next_delay(&self, attempt: u32) -> Option<Duration> {
        if attempt >= self.max_attempts {
            return None;
        }
        self.back_off.map(|back_off| back_off.delay_for(attempt))
    }
}

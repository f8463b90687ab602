//! A single step executed by an external worker within a flow.

use crate::content::Content;
use crate::core::{ActionState, ActionType};
use crate::utils::Timestamp;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Maximum stored length of error/filter causes and contexts.
pub const MAX_CAUSE_SIZE: usize = 100_000;

/// Metadata overrides applied to an errored action when it is resumed.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResumeMetadata {
    /// Flow name the override targets.
    pub flow: String,
    /// Action name the override targets.
    pub action: String,
    /// Metadata to set.
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    /// Metadata keys to delete.
    #[serde(default)]
    pub delete_metadata_keys: Vec<String>,
}

impl ResumeMetadata {
    /// Creates an override for the given flow and action.
    #[must_use]
    pub fn new(flow: impl Into<String>, action: impl Into<String>) -> Self {
        Self {
            flow: flow.into(),
            action: action.into(),
            ..Self::default()
        }
    }

    /// Adds a metadata entry.
    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Adds a key to delete.
    #[must_use]
    pub fn with_deleted_key(mut self, key: impl Into<String>) -> Self {
        self.delete_metadata_keys.push(key.into());
        self
    }
}

/// One attempt of one named step.
///
/// Records are never removed from a flow; a retry appends a new record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Action {
    /// Action name, unique within a flow's plan.
    pub name: String,
    /// Position within the flow's action list.
    pub number: usize,
    /// Kind of work.
    #[serde(rename = "type")]
    pub action_type: ActionType,
    /// Current state.
    pub state: ActionState,
    /// Attempt number, starting at 1.
    pub attempt: u32,
    /// When the record was created.
    pub created: Timestamp,
    /// When the action was last queued.
    pub queued: Option<Timestamp>,
    /// When the worker started.
    pub start: Option<Timestamp>,
    /// When the worker stopped.
    pub stop: Option<Timestamp>,
    /// Last modification.
    pub modified: Timestamp,
    /// Content produced by the action.
    #[serde(default)]
    pub content: Vec<Content>,
    /// Metadata produced by the action.
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    /// Metadata keys removed by the action.
    #[serde(default)]
    pub delete_metadata_keys: Vec<String>,
    /// Error cause reported by the worker.
    pub error_cause: Option<String>,
    /// Error context reported by the worker.
    pub error_context: Option<String>,
    /// When the error was acknowledged.
    pub error_acknowledged: Option<Timestamp>,
    /// Why the error was acknowledged.
    pub error_acknowledged_reason: Option<String>,
    /// Filter cause.
    pub filtered_cause: Option<String>,
    /// Filter context.
    pub filtered_context: Option<String>,
    /// When the action is scheduled for automatic resume.
    pub next_auto_resume: Option<Timestamp>,
    /// Name of the policy that scheduled the resume.
    pub next_auto_resume_reason: Option<String>,
}

fn truncate_cause(value: &str) -> String {
    match value.char_indices().nth(MAX_CAUSE_SIZE) {
        Some((idx, _)) => value[..idx].to_string(),
        None => value.to_string(),
    }
}

impl Action {
    /// Creates a new record in the given state.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        number: usize,
        action_type: ActionType,
        state: ActionState,
        attempt: u32,
        now: Timestamp,
    ) -> Self {
        Self {
            name: name.into(),
            number,
            action_type,
            state,
            attempt,
            created: now,
            queued: Some(now),
            start: None,
            stop: None,
            modified: now,
            content: Vec::new(),
            metadata: HashMap::new(),
            delete_metadata_keys: Vec::new(),
            error_cause: None,
            error_context: None,
            error_acknowledged: None,
            error_acknowledged_reason: None,
            filtered_cause: None,
            filtered_context: None,
            next_auto_resume: None,
            next_auto_resume_reason: None,
        }
    }

    /// Returns true while the action waits for a worker.
    #[must_use]
    pub fn is_queued(&self) -> bool {
        self.state == ActionState::Queued
    }

    /// Returns true once the action can no longer change on its own.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    fn change_state(
        &mut self,
        state: ActionState,
        start: Option<Timestamp>,
        stop: Option<Timestamp>,
        now: Timestamp,
    ) {
        self.state = state;
        self.start = start.or(self.start);
        self.stop = stop;
        self.modified = now;
    }

    /// A worker claimed the action.
    pub fn dispatch(&mut self, now: Timestamp) {
        self.change_state(ActionState::Dispatched, Some(now), None, now);
    }

    /// Marks the action complete with its outputs.
    pub fn complete(
        &mut self,
        start: Option<Timestamp>,
        stop: Option<Timestamp>,
        content: Vec<Content>,
        metadata: HashMap<String, String>,
        delete_metadata_keys: Vec<String>,
        now: Timestamp,
    ) {
        self.change_state(ActionState::Complete, start, stop, now);
        self.content = content;
        self.metadata = metadata;
        self.delete_metadata_keys = delete_metadata_keys;
    }

    /// Marks the action errored; cause and context are truncated.
    pub fn error(
        &mut self,
        start: Option<Timestamp>,
        stop: Option<Timestamp>,
        cause: &str,
        context: &str,
        now: Timestamp,
    ) {
        self.change_state(ActionState::Error, start, stop, now);
        self.error_cause = Some(truncate_cause(cause));
        self.error_context = Some(truncate_cause(context));
    }

    /// Marks the action filtered; cause and context are truncated.
    pub fn filter(
        &mut self,
        start: Option<Timestamp>,
        stop: Option<Timestamp>,
        cause: &str,
        context: Option<&str>,
        now: Timestamp,
    ) {
        self.change_state(ActionState::Filtered, start, stop, now);
        self.filtered_cause = Some(truncate_cause(cause));
        self.filtered_context = context.map(truncate_cause);
    }

    /// Marks the action split into child DeltaFiles.
    pub fn split(&mut self, start: Option<Timestamp>, stop: Option<Timestamp>, now: Timestamp) {
        self.change_state(ActionState::Split, start, stop, now);
    }

    /// Schedules an automatic resume.
    pub fn schedule_auto_resume(&mut self, at: Timestamp, policy: impl Into<String>) {
        self.next_auto_resume = Some(at);
        self.next_auto_resume_reason = Some(policy.into());
    }

    fn clear_auto_resume(&mut self) {
        self.next_auto_resume = None;
        self.next_auto_resume_reason = None;
    }

    /// Cancels a pending or errored action. Returns true if the state changed.
    pub fn cancel(&mut self, now: Timestamp) -> bool {
        if self.is_terminal() && self.state != ActionState::Error {
            return false;
        }
        self.clear_auto_resume();
        self.state = ActionState::Cancelled;
        self.modified = now;
        true
    }

    /// Supersedes an errored attempt, applying any matching metadata overrides.
    pub fn retry(&mut self, overrides: &[ResumeMetadata], now: Timestamp) {
        self.state = ActionState::Retried;
        self.modified = now;
        self.clear_auto_resume();
        self.error_acknowledged = None;
        self.error_acknowledged_reason = None;

        for resume in overrides.iter().filter(|r| r.action == self.name) {
            self.metadata.extend(resume.metadata.clone());
            self.delete_metadata_keys
                .extend(resume.delete_metadata_keys.iter().cloned());
        }
    }

    /// Acknowledges an error. Returns false if the action is not errored.
    pub fn acknowledge_error(&mut self, now: Timestamp, reason: &str) -> bool {
        if self.state != ActionState::Error {
            return false;
        }
        self.modified = now;
        self.error_acknowledged = Some(now);
        self.error_acknowledged_reason = Some(reason.to_string());
        self.clear_auto_resume();
        true
    }

    /// Offers a stale queued action again: clears leftover error fields and
    /// resets its queued/modified time.
    pub fn requeue(&mut self, now: Timestamp) {
        self.error_cause = None;
        self.error_context = None;
        self.clear_auto_resume();
        self.queued = Some(now);
        self.modified = now;
    }
}

//! One traversal of a flow by a DeltaFile.
//!
//! The action list is append-only and remains the audit source of truth. A
//! name to latest-index map avoids linear scans when looking up the current
//! attempt of an action; it is validated on every lookup and falls back to a
//! scan when stale (for example after deserializing an older document).

use crate::content::Content;
use crate::core::{ActionState, ActionType, DeltaFileFlowState, FlowType};
use crate::model::action::{Action, ResumeMetadata};
use crate::utils::Timestamp;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

/// One planned step of a flow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionConfiguration {
    /// Action name.
    pub name: String,
    /// Kind of work.
    #[serde(rename = "type")]
    pub action_type: ActionType,
}

impl ActionConfiguration {
    /// Creates a planned step.
    #[must_use]
    pub fn new(name: impl Into<String>, action_type: ActionType) -> Self {
        Self {
            name: name.into(),
            action_type,
        }
    }
}

/// Snapshot of what a flow received when it was created.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeltaFileFlowInput {
    /// Metadata at entry.
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    /// Content at entry.
    #[serde(default)]
    pub content: Vec<Content>,
    /// Topics the flow was delivered from.
    #[serde(default)]
    pub topics: BTreeSet<String>,
    /// Ids of the flows this one descends from.
    #[serde(default)]
    pub ancestor_ids: Vec<u32>,
}

/// One traversal instance of a named flow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeltaFileFlow {
    /// Id, unique within the DeltaFile.
    pub id: u32,
    /// Flow name.
    pub name: String,
    /// Flow kind.
    pub flow_type: FlowType,
    /// Current state.
    pub state: DeltaFileFlowState,
    /// When the traversal started.
    pub created: Timestamp,
    /// Last modification.
    pub modified: Timestamp,
    /// Input snapshot.
    pub input: DeltaFileFlowInput,
    /// Planned steps, in order.
    #[serde(default)]
    pub plan: Vec<ActionConfiguration>,
    /// Topics this flow published to.
    #[serde(default)]
    pub publish_topics: Vec<String>,
    /// Number of publish hops from the data source.
    pub depth: u32,
    /// Whether the flow runs in test mode.
    #[serde(default)]
    pub test_mode: bool,
    /// Why the flow runs in test mode.
    pub test_mode_reason: Option<String>,
    /// When the flow's error was acknowledged.
    pub error_acknowledged: Option<Timestamp>,
    /// Why the flow's error was acknowledged.
    pub error_acknowledged_reason: Option<String>,
    /// Cause of the latest error or filter.
    pub error_or_filter_cause: Option<String>,
    actions: Vec<Action>,
    #[serde(default)]
    action_index: HashMap<String, usize>,
}

impl DeltaFileFlow {
    /// Creates an in-flight flow with no actions.
    #[must_use]
    pub fn new(
        id: u32,
        name: impl Into<String>,
        flow_type: FlowType,
        input: DeltaFileFlowInput,
        depth: u32,
        now: Timestamp,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            flow_type,
            state: DeltaFileFlowState::InFlight,
            created: now,
            modified: now,
            input,
            plan: Vec::new(),
            publish_topics: Vec::new(),
            depth,
            test_mode: false,
            test_mode_reason: None,
            error_acknowledged: None,
            error_acknowledged_reason: None,
            error_or_filter_cause: None,
            actions: Vec::new(),
            action_index: HashMap::new(),
        }
    }

    /// Sets the planned steps.
    #[must_use]
    pub fn with_plan(mut self, plan: Vec<ActionConfiguration>) -> Self {
        self.plan = plan;
        self
    }

    /// Puts the flow in test mode.
    #[must_use]
    pub fn with_test_mode(mut self, reason: impl Into<String>) -> Self {
        self.test_mode = true;
        self.test_mode_reason = Some(reason.into());
        self
    }

    /// The full action history.
    #[must_use]
    pub fn actions(&self) -> &[Action] {
        &self.actions
    }

    /// The most recently appended action.
    #[must_use]
    pub fn last_action(&self) -> Option<&Action> {
        self.actions.last()
    }

    /// Input topics as a set.
    #[must_use]
    pub fn input_topics(&self) -> &BTreeSet<String> {
        &self.input.topics
    }

    fn index_of(&self, name: &str) -> Option<usize> {
        match self.action_index.get(name) {
            Some(&idx) if self.actions.get(idx).is_some_and(|a| a.name == name) => Some(idx),
            _ => self.actions.iter().rposition(|a| a.name == name),
        }
    }

    /// The latest attempt of the named action.
    #[must_use]
    pub fn latest_action(&self, name: &str) -> Option<&Action> {
        self.index_of(name).map(|idx| &self.actions[idx])
    }

    /// The latest attempt of the named action if it is still pending.
    pub fn pending_action_mut(&mut self, name: &str) -> Option<&mut Action> {
        let idx = self.index_of(name)?;
        let action = &mut self.actions[idx];
        (!action.is_terminal()).then_some(action)
    }

    /// Appends an action, numbering it by position.
    pub fn push_action(&mut self, mut action: Action) -> &mut Action {
        let idx = self.actions.len();
        action.number = idx;
        self.action_index.insert(action.name.clone(), idx);
        self.modified = action.modified;
        self.actions.push(action);
        &mut self.actions[idx]
    }

    /// Queues the named action. Returns false if it is already pending.
    pub fn queue_action(
        &mut self,
        name: &str,
        action_type: ActionType,
        now: Timestamp,
    ) -> bool {
        let previous = self.latest_action(name);
        if previous.is_some_and(|a| !a.is_terminal()) {
            return false;
        }
        let attempt = self
            .actions
            .iter()
            .rev()
            .find(|a| a.name == name && a.state != ActionState::Retried)
            .map_or(1, |a| a.attempt + 1);

        self.push_action(Action::new(
            name,
            0,
            action_type,
            ActionState::Queued,
            attempt,
            now,
        ));
        self.state = DeltaFileFlowState::InFlight;
        true
    }

    /// The first planned step that has not produced content yet.
    #[must_use]
    pub fn next_planned_action(&self) -> Option<&ActionConfiguration> {
        self.plan.iter().find(|cfg| {
            self.latest_action(&cfg.name)
                .map_or(true, |a| !a.state.produced_content())
        })
    }

    /// Content available at action `index`, walking back past actions that
    /// did not produce content.
    ///
    /// An index beyond the history yields no content.
    #[must_use]
    pub fn content_at_or_before(&self, index: usize) -> &[Content] {
        if index >= self.actions.len() {
            return &[];
        }
        self.actions[..=index]
            .iter()
            .rev()
            .find(|a| a.state.produced_content())
            .map_or(&[], |a| a.content.as_slice())
    }

    /// The latest produced content, or the input content when no action has
    /// produced any.
    #[must_use]
    pub fn last_content(&self) -> &[Content] {
        self.actions
            .iter()
            .rev()
            .find(|a| a.state.produced_content())
            .map_or(self.input.content.as_slice(), |a| a.content.as_slice())
    }

    /// Input metadata overlaid by each action's metadata, minus its deleted keys.
    #[must_use]
    pub fn metadata(&self) -> HashMap<String, String> {
        let mut metadata = self.input.metadata.clone();
        for action in &self.actions {
            metadata.extend(action.metadata.iter().map(|(k, v)| (k.clone(), v.clone())));
            for key in &action.delete_metadata_keys {
                metadata.remove(key);
            }
        }
        metadata
    }

    /// Recomputes the flow state from its latest action.
    ///
    /// A flow without actions keeps its state.
    pub fn update_state(&mut self, now: Timestamp) {
        if self.state == DeltaFileFlowState::Cancelled {
            return;
        }
        let Some(last) = self.actions.last() else {
            return;
        };

        let (state, cause) = match last.state {
            ActionState::Queued | ActionState::Dispatched | ActionState::Retried => {
                (DeltaFileFlowState::InFlight, None)
            }
            ActionState::Error => (DeltaFileFlowState::Error, last.error_cause.clone()),
            ActionState::Filtered => (DeltaFileFlowState::Filtered, last.filtered_cause.clone()),
            ActionState::Cancelled => (DeltaFileFlowState::Cancelled, None),
            ActionState::Complete | ActionState::Split => (DeltaFileFlowState::Complete, None),
        };

        if state != self.state {
            self.modified = now;
        }
        self.state = state;
        self.error_or_filter_cause = cause;
    }

    /// Completes a flow whose plan has no actions.
    pub fn complete_empty_plan(&mut self, now: Timestamp) -> bool {
        if !self.actions.is_empty() || !self.plan.is_empty() {
            return false;
        }
        self.state = DeltaFileFlowState::Complete;
        self.modified = now;
        true
    }

    /// Returns true if the latest action errored.
    #[must_use]
    pub fn has_error(&self) -> bool {
        self.actions
            .last()
            .is_some_and(|a| a.state == ActionState::Error)
    }

    /// When the errored action is scheduled to resume, if it is.
    #[must_use]
    pub fn next_auto_resume(&self) -> Option<Timestamp> {
        self.actions
            .last()
            .filter(|a| a.state == ActionState::Error)
            .and_then(|a| a.next_auto_resume)
    }

    /// Supersedes the errored action with a fresh queued attempt.
    ///
    /// Overrides targeting other flows are ignored. Returns false if the
    /// flow has no errored action.
    pub fn resume(&mut self, overrides: &[ResumeMetadata], now: Timestamp) -> bool {
        if !self.has_error() {
            return false;
        }
        let relevant: Vec<ResumeMetadata> = overrides
            .iter()
            .filter(|r| r.flow == self.name)
            .cloned()
            .collect();

        let Some(errored) = self.actions.last_mut() else {
            return false;
        };
        errored.retry(&relevant, now);
        let successor = Action::new(
            errored.name.clone(),
            0,
            errored.action_type,
            ActionState::Queued,
            errored.attempt + 1,
            now,
        );

        self.push_action(successor);
        self.error_acknowledged = None;
        self.error_acknowledged_reason = None;
        self.error_or_filter_cause = None;
        self.state = DeltaFileFlowState::InFlight;
        self.modified = now;
        true
    }

    /// Retires pending and errored actions. Returns false if the flow was
    /// already finished.
    pub fn cancel(&mut self, now: Timestamp) -> bool {
        if !matches!(
            self.state,
            DeltaFileFlowState::InFlight | DeltaFileFlowState::Error
        ) {
            return false;
        }
        for action in &mut self.actions {
            action.cancel(now);
        }
        self.state = DeltaFileFlowState::Cancelled;
        self.modified = now;
        true
    }

    /// Acknowledges the flow's error. Returns false if it has none.
    pub fn acknowledge_error(&mut self, now: Timestamp, reason: &str) -> bool {
        if self.state != DeltaFileFlowState::Error {
            return false;
        }
        let acknowledged = self
            .actions
            .last_mut()
            .is_some_and(|a| a.acknowledge_error(now, reason));
        if acknowledged {
            self.error_acknowledged = Some(now);
            self.error_acknowledged_reason = Some(reason.to_string());
            self.modified = now;
        }
        acknowledged
    }

    /// Re-offers queued actions last modified before `threshold`.
    ///
    /// Returns the names of the requeued actions.
    pub fn requeue(&mut self, now: Timestamp, threshold: Timestamp) -> Vec<String> {
        let mut requeued = Vec::new();
        for action in &mut self.actions {
            if action.is_queued() && action.modified < threshold {
                action.requeue(now);
                requeued.push(action.name.clone());
            }
        }
        if !requeued.is_empty() {
            self.modified = now;
        }
        requeued
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::Segment;
    use crate::utils::now_utc;
    use pretty_assertions::assert_eq;
    use uuid::Uuid;

    fn flow() -> DeltaFileFlow {
        DeltaFileFlow::new(
            1,
            "transform-flow",
            FlowType::Transform,
            DeltaFileFlowInput::default(),
            1,
            now_utc(),
        )
        .with_plan(vec![
            ActionConfiguration::new("first", ActionType::Transform),
            ActionConfiguration::new("second", ActionType::Transform),
        ])
    }

    fn content(name: &str, size: u64) -> Content {
        Content::new(name, "text/plain").with_segment(Segment::new(Uuid::new_v4(), 0, size, Uuid::nil()))
    }

    fn completed(flow: &mut DeltaFileFlow, name: &str, content: Vec<Content>) {
        let now = now_utc();
        flow.queue_action(name, ActionType::Transform, now);
        flow.pending_action_mut(name)
            .unwrap()
            .complete(None, None, content, HashMap::new(), vec![], now);
    }

    fn errored(flow: &mut DeltaFileFlow, name: &str) {
        let now = now_utc();
        flow.queue_action(name, ActionType::Transform, now);
        flow.pending_action_mut(name)
            .unwrap()
            .error(None, None, "boom", "", now);
        flow.update_state(now);
    }

    #[test]
    fn test_queue_action_is_idempotent_while_pending() {
        let mut flow = flow();
        let now = now_utc();
        assert!(flow.queue_action("first", ActionType::Transform, now));
        assert!(!flow.queue_action("first", ActionType::Transform, now));
        assert_eq!(flow.actions().len(), 1);
        assert_eq!(flow.actions()[0].attempt, 1);
    }

    #[test]
    fn test_content_at_or_before_complete_returns_own_content() {
        let mut flow = flow();
        let c = vec![content("a", 5)];
        completed(&mut flow, "first", c.clone());

        assert_eq!(flow.content_at_or_before(0), c.as_slice());
    }

    #[test]
    fn test_content_at_or_before_empty_complete_content() {
        let mut flow = flow();
        completed(&mut flow, "first", vec![content("a", 5)]);
        completed(&mut flow, "second", vec![]);

        assert!(flow.content_at_or_before(1).is_empty());
    }

    #[test]
    fn test_content_at_or_before_walks_failed_chain() {
        let mut flow = flow();
        let c = vec![content("good", 8)];
        completed(&mut flow, "first", c.clone());

        errored(&mut flow, "second");
        flow.resume(&[], now_utc());
        flow.pending_action_mut("second")
            .unwrap()
            .error(None, None, "again", "", now_utc());
        flow.update_state(now_utc());
        flow.resume(&[], now_utc());
        flow.pending_action_mut("second")
            .unwrap()
            .filter(None, None, "filtered", None, now_utc());

        // complete, retried, retried, filtered
        assert_eq!(flow.actions().len(), 4);
        for index in 0..4 {
            assert_eq!(flow.content_at_or_before(index), c.as_slice());
        }
    }

    #[test]
    fn test_content_at_or_before_out_of_range() {
        let mut flow = flow();
        assert!(flow.content_at_or_before(0).is_empty());
        completed(&mut flow, "first", vec![content("a", 1)]);
        assert!(flow.content_at_or_before(1).is_empty());
        assert!(flow.content_at_or_before(usize::MAX).is_empty());
    }

    #[test]
    fn test_last_content_falls_back_to_input() {
        let mut flow = flow();
        let input = vec![content("input", 3)];
        flow.input.content = input.clone();
        errored(&mut flow, "first");

        assert_eq!(flow.last_content(), input.as_slice());
    }

    #[test]
    fn test_resume_appends_fresh_attempt() {
        let mut flow = flow();
        errored(&mut flow, "first");
        flow.actions.last_mut().unwrap().schedule_auto_resume(now_utc(), "policy");
        assert_eq!(flow.state, DeltaFileFlowState::Error);

        let overrides = [
            ResumeMetadata::new("transform-flow", "first").with_metadata("fixed", "yes"),
            ResumeMetadata::new("elsewhere", "first").with_metadata("wrong", "yes"),
        ];
        assert!(flow.resume(&overrides, now_utc()));

        let actions = flow.actions();
        assert_eq!(actions.len(), 2);
        assert_eq!(actions[0].state, ActionState::Retried);
        assert_eq!(actions[1].state, ActionState::Queued);
        assert_eq!(actions[1].attempt, 2);
        assert!(actions[1].next_auto_resume.is_none());
        assert_eq!(flow.state, DeltaFileFlowState::InFlight);

        let metadata = flow.metadata();
        assert_eq!(metadata.get("fixed").map(String::as_str), Some("yes"));
        assert!(!metadata.contains_key("wrong"));
        assert!(!flow.resume(&[], now_utc()));
    }

    #[test]
    fn test_cumulative_metadata() {
        let mut flow = flow();
        flow.input.metadata.insert("a".into(), "1".into());
        flow.input.metadata.insert("b".into(), "1".into());
        let now = now_utc();
        flow.queue_action("first", ActionType::Transform, now);
        flow.pending_action_mut("first").unwrap().complete(
            None,
            None,
            vec![],
            HashMap::from([("a".to_string(), "2".to_string())]),
            vec!["b".to_string()],
            now,
        );

        let metadata = flow.metadata();
        assert_eq!(metadata.get("a").map(String::as_str), Some("2"));
        assert!(!metadata.contains_key("b"));
    }

    #[test]
    fn test_next_planned_action() {
        let mut flow = flow();
        assert_eq!(flow.next_planned_action().unwrap().name, "first");
        completed(&mut flow, "first", vec![]);
        assert_eq!(flow.next_planned_action().unwrap().name, "second");
        completed(&mut flow, "second", vec![]);
        assert!(flow.next_planned_action().is_none());
    }

    #[test]
    fn test_cancel_retires_pending_work() {
        let mut flow = flow();
        flow.queue_action("first", ActionType::Transform, now_utc());
        assert!(flow.cancel(now_utc()));
        assert_eq!(flow.state, DeltaFileFlowState::Cancelled);
        assert_eq!(flow.actions()[0].state, ActionState::Cancelled);
        assert!(!flow.cancel(now_utc()));
    }

    #[test]
    fn test_stale_index_falls_back_to_scan() {
        let mut flow = flow();
        completed(&mut flow, "first", vec![]);
        flow.action_index.clear();
        flow.action_index.insert("first".into(), 42);

        assert_eq!(flow.latest_action("first").unwrap().number, 0);
    }

    #[test]
    fn test_requeue_only_stale_queued() {
        let mut flow = flow();
        let old = now_utc() - chrono::Duration::minutes(30);
        flow.queue_action("first", ActionType::Transform, old);

        let now = now_utc();
        assert!(flow.requeue(now, old).is_empty());
        assert_eq!(flow.requeue(now, now - chrono::Duration::minutes(5)), vec!["first".to_string()]);
        assert_eq!(flow.actions()[0].modified, now);
    }
}

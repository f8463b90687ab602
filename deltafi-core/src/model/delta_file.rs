//! The DeltaFile aggregate: the unit of concurrency control.

use crate::content::{referenced_size, total_size, Content, Segment};
use crate::core::{ActionState, ActionType, DeltaFileFlowState, DeltaFileStage, FlowType};
use crate::model::action::{Action, ResumeMetadata};
use crate::model::flow::{DeltaFileFlow, DeltaFileFlowInput};
use crate::utils::Timestamp;
use serde::{Deserialize, Serialize};
use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, HashMap};
use uuid::Uuid;

/// One unit of ingested data, tracked end to end.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeltaFile {
    /// Unique id.
    pub did: Uuid,
    /// Display name.
    pub name: String,
    /// Data source that ingested it.
    pub data_source: String,
    /// Ingest time.
    pub created: Timestamp,
    /// Last modification.
    pub modified: Timestamp,
    /// Stage derived from the flows.
    pub stage: DeltaFileStage,
    /// Flow traversals, in creation order.
    pub flows: Vec<DeltaFileFlow>,
    /// DeltaFiles this one was split or joined from.
    #[serde(default)]
    pub parent_dids: Vec<Uuid>,
    /// DeltaFiles split from this one.
    #[serde(default)]
    pub child_dids: Vec<Uuid>,
    /// Annotations; keys are never overwritten.
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
    /// Bytes produced and owned by this DeltaFile, duplicates included.
    pub total_bytes: u64,
    /// Bytes referenced by any content, overlaps counted once.
    pub referenced_bytes: u64,
    /// True if any flow was filtered.
    #[serde(default)]
    pub filtered: bool,
    /// True if every errored flow has been acknowledged.
    #[serde(default)]
    pub error_acknowledged: bool,
    /// Number of stale-action requeues.
    #[serde(default)]
    pub requeue_count: u32,
    /// When content was deleted.
    pub content_deleted: Option<Timestamp>,
    /// Why content was deleted.
    pub content_deleted_reason: Option<String>,
}

impl DeltaFile {
    /// Creates a DeltaFile whose data source flow holds one completed ingress action.
    #[must_use]
    pub fn ingress(
        did: Uuid,
        name: impl Into<String>,
        data_source: impl Into<String>,
        flow_type: FlowType,
        content: Vec<Content>,
        metadata: HashMap<String, String>,
        now: Timestamp,
    ) -> Self {
        let data_source = data_source.into();
        let action_type = if flow_type == FlowType::TimedDataSource {
            ActionType::TimedIngress
        } else {
            ActionType::Ingress
        };

        let mut flow = DeltaFileFlow::new(
            0,
            data_source.clone(),
            flow_type,
            DeltaFileFlowInput {
                metadata: metadata.clone(),
                content: content.clone(),
                ..DeltaFileFlowInput::default()
            },
            0,
            now,
        );
        let mut ingress = Action::new(
            data_source.clone(),
            0,
            action_type,
            ActionState::Queued,
            1,
            now,
        );
        ingress.complete(Some(now), Some(now), content, metadata, Vec::new(), now);
        flow.push_action(ingress);
        flow.update_state(now);

        let mut delta_file = Self {
            did,
            name: name.into(),
            data_source,
            created: now,
            modified: now,
            stage: DeltaFileStage::Ingress,
            flows: vec![flow],
            parent_dids: Vec::new(),
            child_dids: Vec::new(),
            annotations: BTreeMap::new(),
            total_bytes: 0,
            referenced_bytes: 0,
            filtered: false,
            error_acknowledged: false,
            requeue_count: 0,
            content_deleted: None,
            content_deleted_reason: None,
        };
        delta_file.recalculate_bytes();
        delta_file
    }

    /// Looks up a flow by id.
    #[must_use]
    pub fn flow(&self, id: u32) -> Option<&DeltaFileFlow> {
        self.flows.iter().find(|f| f.id == id)
    }

    /// Looks up a flow by id for mutation.
    pub fn flow_mut(&mut self, id: u32) -> Option<&mut DeltaFileFlow> {
        self.flows.iter_mut().find(|f| f.id == id)
    }

    /// Flows with the given name, oldest first.
    pub fn flows_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a DeltaFileFlow> + 'a {
        self.flows.iter().filter(move |f| f.name == name)
    }

    /// The id the next flow will get.
    #[must_use]
    pub fn next_flow_id(&self) -> u32 {
        self.flows.iter().map(|f| f.id + 1).max().unwrap_or(0)
    }

    /// Appends a flow, assigning it the next id.
    pub fn add_flow(&mut self, mut flow: DeltaFileFlow) -> &mut DeltaFileFlow {
        flow.id = self.next_flow_id();
        let idx = self.flows.len();
        self.flows.push(flow);
        &mut self.flows[idx]
    }

    /// Sets the last modification time.
    pub fn touch(&mut self, now: Timestamp) {
        self.modified = now;
    }

    /// Adds annotations whose keys are not already present.
    ///
    /// Returns the keys actually added.
    pub fn add_annotations(&mut self, annotations: HashMap<String, String>) -> Vec<String> {
        let mut added = Vec::new();
        for (key, value) in annotations {
            if let Entry::Vacant(slot) = self.annotations.entry(key) {
                added.push(slot.key().clone());
                slot.insert(value);
            }
        }
        added.sort();
        added
    }

    /// Recomputes the stage and derived flags from the flows.
    ///
    /// Cancelled and deleted DeltaFiles keep their stage.
    pub fn update_state(&mut self, now: Timestamp) {
        for flow in &mut self.flows {
            flow.update_state(now);
        }

        let errored: Vec<&DeltaFileFlow> = self
            .flows
            .iter()
            .filter(|f| f.state == DeltaFileFlowState::Error)
            .collect();
        self.error_acknowledged =
            !errored.is_empty() && errored.iter().all(|f| f.error_acknowledged.is_some());
        self.filtered = self
            .flows
            .iter()
            .any(|f| f.state == DeltaFileFlowState::Filtered);

        if self.stage.is_terminal() {
            return;
        }
        let pending = self
            .flows
            .iter()
            .any(|f| f.state == DeltaFileFlowState::InFlight);
        self.stage = if pending {
            DeltaFileStage::InFlight
        } else if errored.is_empty() {
            DeltaFileStage::Complete
        } else {
            DeltaFileStage::Error
        };
    }

    fn all_content(&self) -> impl Iterator<Item = &Content> + '_ {
        self.flows.iter().flat_map(|flow| {
            flow.input
                .content
                .iter()
                .chain(flow.actions().iter().flat_map(|a| a.content.iter()))
        })
    }

    /// Segments referenced by any input or action content.
    pub fn referenced_segments(&self) -> impl Iterator<Item = &Segment> + '_ {
        self.all_content().flat_map(|c| c.segments.iter())
    }

    /// Segments produced by actions and stored under this DeltaFile's id.
    pub fn stored_segments(&self) -> impl Iterator<Item = &Segment> + '_ {
        let did = self.did;
        self.flows
            .iter()
            .flat_map(|flow| flow.actions().iter().flat_map(|a| a.content.iter()))
            .flat_map(|c| c.segments.iter())
            .filter(move |s| s.did == did)
    }

    /// Recomputes `total_bytes` and `referenced_bytes`.
    pub fn recalculate_bytes(&mut self) {
        self.referenced_bytes = referenced_size(self.referenced_segments());
        self.total_bytes = total_size(self.stored_segments());
    }

    /// Returns true if some flow has an auto resume scheduled.
    #[must_use]
    pub fn has_auto_resume(&self) -> bool {
        self.flows.iter().any(|f| f.next_auto_resume().is_some())
    }

    /// Earliest scheduled auto resume across flows.
    #[must_use]
    pub fn next_auto_resume(&self) -> Option<Timestamp> {
        self.flows.iter().filter_map(DeltaFileFlow::next_auto_resume).min()
    }

    /// A DeltaFile can be cancelled while it has pending work or an error
    /// still scheduled to auto resume.
    #[must_use]
    pub fn can_be_cancelled(&self) -> bool {
        !self.stage.is_terminal() && (!self.stage.is_inactive() || self.has_auto_resume())
    }

    /// Cancels every active flow. Returns false if the DeltaFile cannot be cancelled.
    pub fn cancel(&mut self, now: Timestamp) -> bool {
        if !self.can_be_cancelled() {
            return false;
        }
        for flow in &mut self.flows {
            flow.cancel(now);
        }
        self.stage = DeltaFileStage::Cancelled;
        self.modified = now;
        true
    }

    fn resume_where(
        &mut self,
        overrides: &[ResumeMetadata],
        now: Timestamp,
        selected: impl Fn(&DeltaFileFlow) -> bool,
    ) -> Vec<u32> {
        if self.stage.is_terminal() {
            return Vec::new();
        }
        let mut resumed = Vec::new();
        for flow in &mut self.flows {
            if selected(flow) && flow.resume(overrides, now) {
                resumed.push(flow.id);
            }
        }
        if !resumed.is_empty() {
            self.update_state(now);
            self.modified = now;
        }
        resumed
    }

    /// Resumes every errored flow, applying matching metadata overrides.
    ///
    /// Returns the ids of the flows actually resumed.
    pub fn resume_errors(&mut self, overrides: &[ResumeMetadata], now: Timestamp) -> Vec<u32> {
        self.resume_where(overrides, now, |_| true)
    }

    /// Resumes the errored flows named in `overrides` whose errored action
    /// matches the named action.
    pub fn resume_selected(&mut self, requests: &[ResumeMetadata], now: Timestamp) -> Vec<u32> {
        self.resume_where(requests, now, |flow| {
            flow.last_action().is_some_and(|action| {
                requests
                    .iter()
                    .any(|r| r.flow == flow.name && r.action == action.name)
            })
        })
    }

    /// Resumes flows whose scheduled auto resume is due.
    pub fn auto_resume(&mut self, now: Timestamp) -> Vec<u32> {
        self.resume_where(&[], now, |flow| {
            flow.next_auto_resume().is_some_and(|at| at <= now)
        })
    }

    /// Acknowledges every unacknowledged error. Returns the acknowledged flow ids.
    pub fn acknowledge_errors(&mut self, now: Timestamp, reason: &str) -> Vec<u32> {
        let mut acknowledged = Vec::new();
        for flow in &mut self.flows {
            if flow.error_acknowledged.is_none() && flow.acknowledge_error(now, reason) {
                acknowledged.push(flow.id);
            }
        }
        if !acknowledged.is_empty() {
            self.update_state(now);
            self.modified = now;
        }
        acknowledged
    }

    /// Re-offers queued actions last modified before `threshold`.
    ///
    /// Returns the number of actions requeued.
    pub fn requeue(&mut self, now: Timestamp, threshold: Timestamp) -> usize {
        if self.stage.is_terminal() {
            return 0;
        }
        let count: usize = self
            .flows
            .iter_mut()
            .filter(|f| f.state == DeltaFileFlowState::InFlight)
            .map(|f| f.requeue(now, threshold).len())
            .sum();
        if count > 0 {
            self.requeue_count += 1;
            self.modified = now;
        }
        count
    }

    /// Moves the DeltaFile to DELETE. Leaves `modified` untouched.
    pub fn mark_for_delete(&mut self, now: Timestamp, reason: impl Into<String>) {
        self.stage = DeltaFileStage::Delete;
        self.content_deleted = Some(now);
        self.content_deleted_reason = Some(reason.into());
    }
}

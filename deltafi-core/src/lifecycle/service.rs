//! Applies lifecycle operations to DeltaFile aggregates.
//!
//! Every operation is one optimistic read-modify-write of a single
//! aggregate. Events are collected while mutating and emitted only after
//! the write succeeded.

use crate::config::CoreConfig;
use crate::content::Content;
use crate::core::{ActionType, DeltaFileFlowState, DeltaFileStage, FlowType};
use crate::errors::{DeltaFiError, Result};
use crate::events::{EventSink, LifecycleEvent, NoOpEventSink};
use crate::lifecycle::reports::{ActionReport, ActionResult, ReportOutcome};
use crate::model::{DeltaFile, DeltaFileFlow, ResumeMetadata};
use crate::policy::ResumePolicyService;
use crate::pubsub::{FlowDefinition, PublisherService, TopicDirectory, NO_SUBSCRIBERS};
use crate::rules::RuleEvaluator;
use crate::store::{AggregateStore, Mutation, OptimisticUpdater, Versioned};
use crate::utils::{generate_did, Clock, SystemClock, Timestamp};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Side effects gathered during one mutation attempt.
#[derive(Debug, Default)]
struct Effects {
    events: Vec<LifecycleEvent>,
    created: Vec<u32>,
}

/// The DeltaFile lifecycle: ingest, worker reports, cancel, resume.
#[derive(Clone)]
pub struct LifecycleService {
    updater: OptimisticUpdater,
    publisher: PublisherService,
    policies: Arc<ResumePolicyService>,
    clock: Arc<dyn Clock>,
    events: Arc<dyn EventSink>,
}

impl std::fmt::Debug for LifecycleService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LifecycleService")
            .field("updater", &self.updater)
            .field("publisher", &self.publisher)
            .field("policies", &self.policies.len())
            .finish_non_exhaustive()
    }
}

impl LifecycleService {
    /// Creates a service on the wall clock with events discarded.
    #[must_use]
    pub fn new(
        updater: OptimisticUpdater,
        publisher: PublisherService,
        policies: Arc<ResumePolicyService>,
    ) -> Self {
        Self {
            updater,
            publisher,
            policies,
            clock: Arc::new(SystemClock),
            events: Arc::new(NoOpEventSink),
        }
    }

    /// Wires a service from its collaborators and the configuration.
    #[must_use]
    pub fn from_config(
        config: &CoreConfig,
        store: Arc<dyn AggregateStore>,
        evaluator: Arc<dyn RuleEvaluator>,
        directory: Arc<dyn TopicDirectory>,
        policies: Arc<ResumePolicyService>,
    ) -> Self {
        Self::new(
            OptimisticUpdater::new(store, config.concurrency),
            PublisherService::new(evaluator, directory).with_max_flow_depth(config.max_flow_depth),
            policies,
        )
    }

    /// Uses the given clock for every timestamp.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Sends lifecycle events to the given sink.
    #[must_use]
    pub fn with_event_sink(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    /// The optimistic updater.
    #[must_use]
    pub fn updater(&self) -> &OptimisticUpdater {
        &self.updater
    }

    /// The resume policies consulted on errors.
    #[must_use]
    pub fn policies(&self) -> &Arc<ResumePolicyService> {
        &self.policies
    }

    /// The clock.
    #[must_use]
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// The event sink.
    #[must_use]
    pub fn event_sink(&self) -> &Arc<dyn EventSink> {
        &self.events
    }

    async fn emit_all(&self, events: &[LifecycleEvent]) {
        for event in events {
            self.events.emit(event).await;
        }
    }

    /// Loads a DeltaFile.
    pub async fn get(&self, did: Uuid) -> Result<Versioned<DeltaFile>> {
        self.updater
            .store()
            .load(did)
            .await?
            .ok_or(DeltaFiError::NotFound(did))
    }

    /// Creates a DeltaFile from a data source and routes it.
    pub async fn ingest(
        &self,
        name: impl Into<String>,
        data_source: &str,
        content: Vec<Content>,
        metadata: HashMap<String, String>,
    ) -> Result<Versioned<DeltaFile>> {
        let definition = self
            .publisher
            .directory()
            .flow(data_source)
            .filter(|d| d.flow_type().is_data_source())
            .ok_or_else(|| DeltaFiError::UnknownFlow(data_source.to_string()))?;

        let now = self.clock.now();
        let mut delta_file = DeltaFile::ingress(
            generate_did(),
            name,
            data_source,
            definition.flow_type(),
            content,
            metadata,
            now,
        );
        if let FlowDefinition::RestDataSource(source) | FlowDefinition::TimedDataSource(source) =
            definition.as_ref()
        {
            if source.test_mode {
                delta_file.flows[0].test_mode = true;
                delta_file.flows[0].test_mode_reason = Some(source.name.clone());
            }
        }

        let mut effects = Effects::default();
        self.route_and_cascade(&mut delta_file, 0, now, &mut effects)?;
        finish(&mut delta_file, DeltaFileStage::Ingress, now, &mut effects);

        let stored = self.updater.store().insert(delta_file).await?;
        info!(
            did = %stored.value.did,
            data_source,
            stage = %stored.value.stage,
            flows = stored.value.flows.len(),
            "DeltaFile ingested"
        );
        self.emit_all(&effects.events).await;
        Ok(stored)
    }

    /// Marks a queued action as claimed by a worker.
    ///
    /// Returns false if the action is not queued.
    pub async fn dispatch(&self, did: Uuid, flow_id: u32, action: &str) -> Result<bool> {
        let now = self.clock.now();
        self.updater
            .update(did, |delta_file| {
                if delta_file.stage.is_terminal() {
                    return Ok(Mutation::Unchanged(false));
                }
                let flow = delta_file
                    .flow_mut(flow_id)
                    .ok_or_else(|| DeltaFiError::UnexpectedFlow {
                        flow: flow_id.to_string(),
                        did,
                    })?;
                match flow.pending_action_mut(action).filter(|a| a.is_queued()) {
                    Some(pending) => pending.dispatch(now),
                    None => return Ok(Mutation::Unchanged(false)),
                }
                flow.modified = now;
                delta_file.touch(now);
                debug!(%did, flow_id, action, "Action dispatched");
                Ok(Mutation::Changed(true))
            })
            .await
    }

    /// Applies a worker report.
    ///
    /// Reports against a terminal DeltaFile, or against an action that is
    /// no longer pending, are discarded. A report naming an action the flow
    /// never queued is an error.
    pub async fn report(&self, report: ActionReport) -> Result<ReportOutcome> {
        let now = self.clock.now();
        let (outcome, events) = self
            .updater
            .update(report.did, |delta_file| self.apply_report(delta_file, &report, now))
            .await?;
        self.emit_all(&events).await;
        Ok(outcome)
    }

    fn apply_report(
        &self,
        delta_file: &mut DeltaFile,
        report: &ActionReport,
        now: Timestamp,
    ) -> Result<Mutation<(ReportOutcome, Vec<LifecycleEvent>)>> {
        let did = delta_file.did;
        if delta_file.stage.is_terminal() {
            debug!(%did, stage = %delta_file.stage, action = %report.action, "Discarding report for finished DeltaFile");
            return Ok(Mutation::Unchanged((ReportOutcome::Discarded, Vec::new())));
        }
        let before = delta_file.stage;
        let mut effects = Effects::default();

        let flow = delta_file
            .flow_mut(report.flow_id)
            .ok_or_else(|| DeltaFiError::UnexpectedFlow {
                flow: report.flow_id.to_string(),
                did,
            })?;
        let flow_name = flow.name.clone();
        if flow.latest_action(&report.action).is_none() {
            return Err(DeltaFiError::UnexpectedAction {
                flow: flow_name,
                action: report.action.clone(),
                did,
            });
        }
        let Some(action) = flow.pending_action_mut(&report.action) else {
            debug!(%did, flow = %flow_name, action = %report.action, "Discarding report for action that is not pending");
            return Ok(Mutation::Unchanged((ReportOutcome::Discarded, Vec::new())));
        };

        match &report.result {
            ActionResult::Complete {
                content,
                metadata,
                delete_metadata_keys,
            } => action.complete(
                report.start,
                report.stop,
                content.clone(),
                metadata.clone(),
                delete_metadata_keys.clone(),
                now,
            ),
            ActionResult::Error { cause, context } => {
                action.error(report.start, report.stop, cause, context, now);
                effects.events.push(LifecycleEvent::ActionErrored {
                    did,
                    flow: flow_name.clone(),
                    action: report.action.clone(),
                    cause: cause.clone(),
                });
                if let Some(decision) = self.policies.auto_resume_decision(&flow_name, action) {
                    let at = now + decision.delay;
                    action.schedule_auto_resume(at, decision.policy.clone());
                    info!(%did, flow = %flow_name, action = %report.action, %at, policy = %decision.policy, "Auto resume scheduled");
                    effects.events.push(LifecycleEvent::AutoResumeScheduled {
                        did,
                        flow: flow_name.clone(),
                        action: report.action.clone(),
                        at,
                        policy: decision.policy,
                    });
                }
            }
            ActionResult::Filter { cause, context } => {
                action.filter(report.start, report.stop, cause, context.as_deref(), now);
            }
            ActionResult::Split { .. } => action.split(report.start, report.stop, now),
        }
        flow.update_state(now);
        debug!(%did, flow = %flow_name, action = %report.action, kind = report.kind(), "Applied action report");

        match &report.result {
            ActionResult::Complete { .. } => self.advance(delta_file, report.flow_id, now, &mut effects)?,
            ActionResult::Split { children } => delta_file.child_dids.extend(children.iter().copied()),
            ActionResult::Error { .. } | ActionResult::Filter { .. } => {}
        }
        finish(delta_file, before, now, &mut effects);

        let outcome = ReportOutcome::Applied {
            stage: delta_file.stage,
            created: effects.created,
        };
        Ok(Mutation::Changed((outcome, effects.events)))
    }

    /// Queues the next planned action of a completed flow, or routes its
    /// output once the plan is exhausted.
    fn advance(
        &self,
        delta_file: &mut DeltaFile,
        flow_id: u32,
        now: Timestamp,
        effects: &mut Effects,
    ) -> Result<()> {
        let did = delta_file.did;
        let flow = delta_file
            .flow_mut(flow_id)
            .ok_or_else(|| DeltaFiError::UnexpectedFlow {
                flow: flow_id.to_string(),
                did,
            })?;
        if flow.state != DeltaFileFlowState::Complete {
            return Ok(());
        }
        if let Some(next) = flow.next_planned_action().cloned() {
            flow.queue_action(&next.name, next.action_type, now);
            debug!(%did, flow = %flow.name, action = %next.name, "Queued next action");
            return Ok(());
        }
        if flow.flow_type == FlowType::DataSink {
            return Ok(());
        }
        self.route_and_cascade(delta_file, flow_id, now, effects)
    }

    /// Routes a flow's output, then routes every created flow whose plan is
    /// empty, breadth first.
    fn route_and_cascade(
        &self,
        delta_file: &mut DeltaFile,
        flow_id: u32,
        now: Timestamp,
        effects: &mut Effects,
    ) -> Result<()> {
        let did = delta_file.did;
        let mut pending = VecDeque::from([flow_id]);
        while let Some(id) = pending.pop_front() {
            let outcome = self.publisher.route(delta_file, id, now)?;
            let flow = delta_file.flow(id).map(|f| f.name.clone()).unwrap_or_default();
            effects.events.push(LifecycleEvent::Routed {
                did,
                flow,
                topics: outcome.topics,
                created: outcome.created.len(),
            });

            for created in outcome.created {
                effects.created.push(created);
                let Some(flow) = delta_file.flow_mut(created) else {
                    continue;
                };
                if flow.complete_empty_plan(now) && flow.flow_type != FlowType::DataSink {
                    pending.push_back(created);
                }
            }
        }
        Ok(())
    }

    /// Routes resumed flows whose queued action is the synthetic routing step.
    fn reroute_resumed(
        &self,
        delta_file: &mut DeltaFile,
        flow_ids: &[u32],
        now: Timestamp,
        effects: &mut Effects,
    ) -> Result<()> {
        for &id in flow_ids {
            let awaiting_route = delta_file
                .flow(id)
                .and_then(DeltaFileFlow::last_action)
                .is_some_and(|a| a.name == NO_SUBSCRIBERS && a.action_type == ActionType::Publish && a.is_queued());
            if awaiting_route {
                self.route_and_cascade(delta_file, id, now, effects)?;
            }
        }
        Ok(())
    }

    /// Cancels a DeltaFile. Returns false if it could not be cancelled.
    ///
    /// Pending actions are retired and resume schedules cleared; a worker
    /// still holding a dispatched action will have its report discarded.
    pub async fn cancel(&self, did: Uuid) -> Result<bool> {
        let now = self.clock.now();
        let (cancelled, events) = self
            .updater
            .update(did, |delta_file| {
                let before = delta_file.stage;
                if !delta_file.cancel(now) {
                    return Ok(Mutation::Unchanged((false, Vec::new())));
                }
                let mut effects = Effects::default();
                finish(delta_file, before, now, &mut effects);
                Ok(Mutation::Changed((true, effects.events)))
            })
            .await?;
        if cancelled {
            info!(%did, "DeltaFile cancelled");
        }
        self.emit_all(&events).await;
        Ok(cancelled)
    }

    /// Resumes the errored actions named by `requests`, applying their
    /// metadata overrides. Returns the ids of the flows actually resumed.
    pub async fn resume(&self, did: Uuid, requests: &[ResumeMetadata]) -> Result<Vec<u32>> {
        let select = |delta_file: &mut DeltaFile, now: Timestamp| delta_file.resume_selected(requests, now);
        self.resume_with(did, &select).await
    }

    /// Resumes every errored flow of a DeltaFile.
    pub async fn resume_all(&self, did: Uuid, overrides: &[ResumeMetadata]) -> Result<Vec<u32>> {
        let all = |delta_file: &mut DeltaFile, now: Timestamp| delta_file.resume_errors(overrides, now);
        self.resume_with(did, &all).await
    }

    async fn resume_with<F>(&self, did: Uuid, resume: &F) -> Result<Vec<u32>>
    where
        F: Fn(&mut DeltaFile, Timestamp) -> Vec<u32> + Sync,
    {
        let now = self.clock.now();
        let (resumed, events) = self
            .updater
            .update(did, |delta_file| self.apply_resume(delta_file, now, resume))
            .await?;
        self.emit_all(&events).await;
        Ok(resumed)
    }

    fn apply_resume<F>(
        &self,
        delta_file: &mut DeltaFile,
        now: Timestamp,
        resume: &F,
    ) -> Result<Mutation<(Vec<u32>, Vec<LifecycleEvent>)>>
    where
        F: Fn(&mut DeltaFile, Timestamp) -> Vec<u32>,
    {
        let before = delta_file.stage;
        let resumed = resume(delta_file, now);
        if resumed.is_empty() {
            return Ok(Mutation::Unchanged((resumed, Vec::new())));
        }

        let mut effects = Effects::default();
        effects.events.push(LifecycleEvent::Resumed {
            did: delta_file.did,
            flows: resumed.clone(),
        });
        self.reroute_resumed(delta_file, &resumed, now, &mut effects)?;
        finish(delta_file, before, now, &mut effects);
        debug!(did = %delta_file.did, flows = ?resumed, "Flows resumed");
        Ok(Mutation::Changed((resumed, effects.events)))
    }

    /// Resumes every errored action whose scheduled auto resume is due.
    ///
    /// Failures on individual DeltaFiles are logged and skipped. Returns the
    /// number of flows resumed.
    pub async fn auto_resume(&self) -> Result<usize> {
        let now = self.clock.now();
        let ready = self.updater.store().find_ready_for_auto_resume(now).await?;
        let due = |delta_file: &mut DeltaFile, at: Timestamp| delta_file.auto_resume(at);

        let mut count = 0;
        for snapshot in ready {
            let did = snapshot.value.did;
            match self
                .updater
                .update_from(snapshot, |delta_file| self.apply_resume(delta_file, now, &due))
                .await
            {
                Ok((resumed, events)) => {
                    count += resumed.len();
                    self.emit_all(&events).await;
                }
                Err(err) => warn!(%did, error = %err, "Auto resume failed"),
            }
        }
        if count > 0 {
            info!(count, "Auto resumed flows");
        }
        Ok(count)
    }

    /// Acknowledges every unacknowledged error. Returns the acknowledged flow ids.
    pub async fn acknowledge_errors(&self, did: Uuid, reason: &str) -> Result<Vec<u32>> {
        let now = self.clock.now();
        self.updater
            .update(did, |delta_file| {
                let acknowledged = delta_file.acknowledge_errors(now, reason);
                if acknowledged.is_empty() {
                    Ok(Mutation::Unchanged(acknowledged))
                } else {
                    Ok(Mutation::Changed(acknowledged))
                }
            })
            .await
    }

    /// Adds annotations; existing keys are kept. Returns the keys added.
    pub async fn annotate(&self, did: Uuid, annotations: HashMap<String, String>) -> Result<Vec<String>> {
        let now = self.clock.now();
        let added = self
            .updater
            .update(did, |delta_file| {
                let added = delta_file.add_annotations(annotations.clone());
                if added.is_empty() {
                    return Ok(Mutation::Unchanged(added));
                }
                delta_file.touch(now);
                Ok(Mutation::Changed(added))
            })
            .await?;
        if !added.is_empty() {
            self.events
                .emit(&LifecycleEvent::Annotated {
                    did,
                    keys: added.clone(),
                })
                .await;
        }
        Ok(added)
    }

    /// Moves a DeltaFile to DELETE without touching its modified time.
    ///
    /// Returns false if it was already deleted.
    pub async fn mark_for_delete(&self, did: Uuid, reason: &str) -> Result<bool> {
        let now = self.clock.now();
        let previous = self
            .updater
            .update(did, |delta_file| {
                if delta_file.stage == DeltaFileStage::Delete {
                    return Ok(Mutation::Unchanged(None));
                }
                let before = delta_file.stage;
                delta_file.mark_for_delete(now, reason);
                Ok(Mutation::Changed(Some(before)))
            })
            .await?;

        let Some(from) = previous else {
            return Ok(false);
        };
        info!(%did, reason, "DeltaFile marked for delete");
        self.events
            .emit(&LifecycleEvent::StageChanged {
                did,
                from,
                to: DeltaFileStage::Delete,
            })
            .await;
        Ok(true)
    }
}

/// Recomputes derived state, byte counts and the stage event.
fn finish(delta_file: &mut DeltaFile, before: DeltaFileStage, now: Timestamp, effects: &mut Effects) {
    delta_file.update_state(now);
    delta_file.recalculate_bytes();
    delta_file.touch(now);
    if delta_file.stage != before {
        debug!(did = %delta_file.did, from = %before, to = %delta_file.stage, "Stage changed");
        effects.events.push(LifecycleEvent::StageChanged {
            did: delta_file.did,
            from: before,
            to: delta_file.stage,
        });
    }
}

//! The publish/subscribe routing engine.
//!
//! Routing never fails. Each topic that cannot take the output, and the lack
//! of any destination at all, is recorded on the publishing flow as its own
//! synthetic `NO_SUBSCRIBERS` action in ERROR or FILTERED state.

use crate::content::Content;
use crate::core::{ActionState, ActionType};
use crate::errors::{DeltaFiError, Result};
use crate::model::{DeltaFile, DeltaFileFlow, DeltaFileFlowInput};
use crate::pubsub::definitions::{FlowDefinition, PublishTarget, Publisher};
use crate::pubsub::directory::TopicDirectory;
use crate::rules::{DefaultRule, MatchingPolicy, PublishRules, RuleEvaluator, TopicFilterPolicy};
use crate::utils::Timestamp;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use tracing::{debug, warn};

/// Name of the synthetic action recording a routing dead end.
pub const NO_SUBSCRIBERS: &str = "NO_SUBSCRIBERS";
/// Cause when nothing accepted the output.
pub const NO_DESTINATIONS_CAUSE: &str = "No destinations were found";
/// Cause when a resolved topic has no definition.
pub const MISSING_TOPIC_CAUSE: &str = "Missing topic";
/// Cause when a topic filter with FILTER policy rejected the output.
pub const TOPIC_FILTERED_CAUSE: &str = "Filtered by topic filter rules";
/// Cause when a topic filter with ERROR policy rejected the output.
pub const TOPIC_ERRORED_CAUSE: &str = "Errored by topic filter rules";
/// Cause when a DeltaFile has traversed too many flows.
pub const MAX_DEPTH_CAUSE: &str = "Maximum flow depth exceeded";

/// Default bound on publish hops from the data source.
pub const DEFAULT_MAX_FLOW_DEPTH: u32 = 32;

/// What routing did for one publishing flow.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RoutingOutcome {
    /// Topics the output was published on.
    pub topics: BTreeSet<String>,
    /// Ids of the flows created.
    pub created: Vec<u32>,
    /// State of the last synthetic action recorded, if any.
    pub synthetic: Option<ActionState>,
}

impl RoutingOutcome {
    /// Returns true if at least one flow was created.
    #[must_use]
    pub fn routed(&self) -> bool {
        !self.created.is_empty()
    }
}

/// A dead end to record on the publishing flow.
#[derive(Debug, Clone, PartialEq, Eq)]
struct DeadEnd {
    state: ActionState,
    cause: &'static str,
    context: String,
}

impl DeadEnd {
    fn error(cause: &'static str, context: String) -> Self {
        Self {
            state: ActionState::Error,
            cause,
            context,
        }
    }

    fn filtered(cause: &'static str, context: String) -> Self {
        Self {
            state: ActionState::Filtered,
            cause,
            context,
        }
    }
}

/// Destinations and dead ends found for one publishing flow.
#[derive(Debug, Default)]
struct Delivery {
    topics: BTreeSet<String>,
    created: Vec<u32>,
    dead_ends: Vec<DeadEnd>,
}

impl Delivery {
    fn on(topics: BTreeSet<String>) -> Self {
        Self {
            topics,
            ..Self::default()
        }
    }

    fn dead_end(dead_end: DeadEnd) -> Self {
        Self {
            dead_ends: vec![dead_end],
            ..Self::default()
        }
    }
}

/// Everything the router needs from the publishing flow.
struct PublishContext {
    flow_id: u32,
    flow_name: String,
    metadata: HashMap<String, String>,
    content: Vec<Content>,
    depth: u32,
    ancestor_ids: Vec<u32>,
    test_mode_reason: Option<String>,
}

impl PublishContext {
    fn of(flow: &DeltaFileFlow) -> Self {
        let mut ancestor_ids = flow.input.ancestor_ids.clone();
        ancestor_ids.push(flow.id);
        Self {
            flow_id: flow.id,
            flow_name: flow.name.clone(),
            metadata: flow.metadata(),
            content: flow.last_content().to_vec(),
            depth: flow.depth,
            ancestor_ids,
            test_mode_reason: flow
                .test_mode
                .then(|| flow.test_mode_reason.clone().unwrap_or_else(|| flow.name.clone())),
        }
    }
}

/// Decides which downstream flows receive a completed publisher's output.
#[derive(Clone)]
pub struct PublisherService {
    evaluator: Arc<dyn RuleEvaluator>,
    directory: Arc<dyn TopicDirectory>,
    max_flow_depth: u32,
}

impl std::fmt::Debug for PublisherService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PublisherService")
            .field("max_flow_depth", &self.max_flow_depth)
            .finish_non_exhaustive()
    }
}

impl PublisherService {
    /// Creates a router over an evaluator and a directory.
    #[must_use]
    pub fn new(evaluator: Arc<dyn RuleEvaluator>, directory: Arc<dyn TopicDirectory>) -> Self {
        Self {
            evaluator,
            directory,
            max_flow_depth: DEFAULT_MAX_FLOW_DEPTH,
        }
    }

    /// Sets the maximum number of publish hops.
    #[must_use]
    pub fn with_max_flow_depth(mut self, depth: u32) -> Self {
        self.max_flow_depth = depth;
        self
    }

    /// The directory routing reads from.
    #[must_use]
    pub fn directory(&self) -> &Arc<dyn TopicDirectory> {
        &self.directory
    }

    /// Topics whose publish rule holds.
    ///
    /// With [`MatchingPolicy::FirstMatching`] only the first matching rule in
    /// declaration order counts.
    #[must_use]
    pub fn matching_topics(
        &self,
        rules: &PublishRules,
        metadata: &HashMap<String, String>,
        content: &[Content],
    ) -> BTreeSet<String> {
        let mut matching = rules
            .rules
            .iter()
            .filter(|rule| {
                self.evaluator
                    .evaluate(rule.condition.as_deref(), metadata, content)
            })
            .map(|rule| rule.topic.clone());

        match rules.matching_policy {
            MatchingPolicy::FirstMatching => matching.next().into_iter().collect(),
            MatchingPolicy::AllMatching => matching.collect(),
        }
    }

    /// Routes the output of a completed flow.
    ///
    /// New flows are appended to `delta_file` with their first action
    /// queued. Every failed topic, and the lack of any destination, is
    /// recorded on the publishing flow as a synthetic action.
    pub fn route(
        &self,
        delta_file: &mut DeltaFile,
        flow_id: u32,
        now: Timestamp,
    ) -> Result<RoutingOutcome> {
        let flow = delta_file
            .flow(flow_id)
            .ok_or_else(|| DeltaFiError::UnexpectedFlow {
                flow: flow_id.to_string(),
                did: delta_file.did,
            })?;
        let ctx = PublishContext::of(flow);
        let definition = self.directory.flow(&ctx.flow_name);

        let delivery = match definition.as_deref().and_then(FlowDefinition::as_publisher) {
            _ if ctx.depth >= self.max_flow_depth => Delivery::dead_end(DeadEnd::error(
                MAX_DEPTH_CAUSE,
                format!(
                    "Flow '{}' is at depth {}, the maximum is {}",
                    ctx.flow_name, ctx.depth, self.max_flow_depth
                ),
            )),
            Some(publisher) => self.publish(delta_file, publisher, &ctx, now),
            None => Delivery::dead_end(DeadEnd::error(
                NO_DESTINATIONS_CAUSE,
                format!("Flow '{}' is not a configured publisher", ctx.flow_name),
            )),
        };

        let did = delta_file.did;
        let flow = delta_file
            .flow_mut(ctx.flow_id)
            .ok_or_else(|| DeltaFiError::UnexpectedFlow {
                flow: ctx.flow_id.to_string(),
                did,
            })?;
        flow.publish_topics = delivery.topics.iter().cloned().collect();

        for dead_end in &delivery.dead_ends {
            warn!(
                %did,
                flow = %ctx.flow_name,
                cause = dead_end.cause,
                state = %dead_end.state,
                "Recorded routing failure"
            );
            record_synthetic(flow, dead_end, &ctx.content, now);
        }
        if !delivery.created.is_empty() {
            settle_synthetic(flow, &ctx.content, now);
            debug!(%did, flow = %ctx.flow_name, created = delivery.created.len(), "DeltaFile routed");
        }
        flow.update_state(now);

        Ok(RoutingOutcome {
            synthetic: delivery.dead_ends.last().map(|d| d.state),
            topics: delivery.topics,
            created: delivery.created,
        })
    }

    fn publish(
        &self,
        delta_file: &mut DeltaFile,
        publisher: &dyn Publisher,
        ctx: &PublishContext,
        now: Timestamp,
    ) -> Delivery {
        match publisher.publish_target() {
            PublishTarget::Topic(topic) => {
                let mut delivery = Delivery::on(BTreeSet::from([topic.to_string()]));
                self.deliver(delta_file, &mut delivery, ctx, now);
                if delivery.created.is_empty() {
                    delivery.dead_ends.push(DeadEnd::error(
                        NO_DESTINATIONS_CAUSE,
                        format!(
                            "No subscribers found for data source '{}' on topic '{topic}'",
                            publisher.name()
                        ),
                    ));
                }
                delivery
            }
            PublishTarget::Rules(rules) => self.publish_rules(delta_file, publisher, rules, ctx, now),
        }
    }

    fn publish_rules(
        &self,
        delta_file: &mut DeltaFile,
        publisher: &dyn Publisher,
        rules: &PublishRules,
        ctx: &PublishContext,
        now: Timestamp,
    ) -> Delivery {
        let mut delivery = Delivery::on(self.matching_topics(rules, &ctx.metadata, &ctx.content));
        self.deliver(delta_file, &mut delivery, ctx, now);
        if !delivery.created.is_empty() {
            return delivery;
        }

        let mut context = format!("No subscribers found from flow '{}' ", publisher.name());
        if delivery.topics.is_empty() {
            context.push_str("because no topics matched the criteria.");
        } else {
            let listed: Vec<&str> = delivery.topics.iter().map(String::as_str).collect();
            context.push_str("listening on matching topics: ");
            context.push_str(&listed.join(", "));
        }
        context.push_str("\nWith rules:\n");
        context.push_str(&rules.render());

        match &rules.default_rule {
            DefaultRule::Error => delivery.dead_ends.push(DeadEnd::error(NO_DESTINATIONS_CAUSE, context)),
            DefaultRule::Filter => delivery.dead_ends.push(DeadEnd::filtered(NO_DESTINATIONS_CAUSE, context)),
            DefaultRule::Publish(topic) => {
                delivery.topics = BTreeSet::from([topic.clone()]);
                self.deliver(delta_file, &mut delivery, ctx, now);
                if delivery.created.is_empty() {
                    delivery.dead_ends.push(DeadEnd::error(NO_DESTINATIONS_CAUSE, context));
                }
            }
        }
        delivery
    }

    /// Screens the delivery's topics through their filters and creates
    /// subscriber flows for the eligible ones.
    ///
    /// Every topic that is missing or rejects the output with a FILTER or
    /// ERROR policy adds its own dead end, whatever the other topics do.
    fn deliver(&self, delta_file: &mut DeltaFile, delivery: &mut Delivery, ctx: &PublishContext, now: Timestamp) {
        let mut eligible = BTreeSet::new();

        for name in &delivery.topics {
            let Some(topic) = self.directory.topic(name) else {
                delivery.dead_ends.push(DeadEnd::error(
                    MISSING_TOPIC_CAUSE,
                    format!("Topic '{name}' does not exist"),
                ));
                continue;
            };
            if self
                .evaluator
                .evaluate_all(&topic.filters, &ctx.metadata, &ctx.content)
            {
                eligible.insert(name.clone());
                continue;
            }
            let context = format!(
                "Topic '{name}' rejected the data with filters: {}",
                topic.filters.join(" AND ")
            );
            match topic.filter_policy {
                TopicFilterPolicy::Drop => {
                    debug!(topic = %name, flow = %ctx.flow_name, "Topic filter dropped DeltaFile");
                }
                TopicFilterPolicy::Filter => {
                    delivery.dead_ends.push(DeadEnd::filtered(TOPIC_FILTERED_CAUSE, context));
                }
                TopicFilterPolicy::Error => delivery
                    .dead_ends
                    .push(DeadEnd::error(TOPIC_ERRORED_CAUSE, context)),
            }
        }

        delivery.created = self.subscribe(delta_file, &eligible, ctx, now);
    }

    fn subscribe(
        &self,
        delta_file: &mut DeltaFile,
        topics: &BTreeSet<String>,
        ctx: &PublishContext,
        now: Timestamp,
    ) -> Vec<u32> {
        // one candidate per subscriber, however many topics it listens on
        let mut candidates: BTreeMap<String, Arc<FlowDefinition>> = BTreeMap::new();
        for topic in topics {
            for definition in self.directory.subscribers_for_topic(topic) {
                candidates
                    .entry(definition.name().to_string())
                    .or_insert(definition);
            }
        }

        let mut created = Vec::new();
        for definition in candidates.values() {
            let Some(subscriber) = definition.as_subscriber() else {
                continue;
            };
            let matched: BTreeSet<String> = subscriber
                .subscriptions()
                .iter()
                .filter(|rule| topics.contains(&rule.topic))
                .filter(|rule| {
                    self.evaluator
                        .evaluate(rule.condition.as_deref(), &ctx.metadata, &ctx.content)
                })
                .map(|rule| rule.topic.clone())
                .collect();
            if matched.is_empty() {
                continue;
            }

            let input = DeltaFileFlowInput {
                metadata: ctx.metadata.clone(),
                content: ctx.content.clone(),
                topics: matched,
                ancestor_ids: ctx.ancestor_ids.clone(),
            };
            let mut flow = DeltaFileFlow::new(
                0,
                subscriber.name(),
                subscriber.flow_type(),
                input,
                ctx.depth + 1,
                now,
            )
            .with_plan(subscriber.plan());
            if subscriber.is_test_mode() {
                flow = flow.with_test_mode(subscriber.name());
            } else if let Some(reason) = &ctx.test_mode_reason {
                flow = flow.with_test_mode(reason.clone());
            }

            let flow = delta_file.add_flow(flow);
            if let Some(first) = flow.plan.first().cloned() {
                flow.queue_action(&first.name, first.action_type, now);
            }
            debug!(flow = %flow.name, id = flow.id, topics = ?flow.input.topics, "Created subscriber flow");
            created.push(flow.id);
        }
        created
    }
}

fn record_synthetic(flow: &mut DeltaFileFlow, dead_end: &DeadEnd, content: &[Content], now: Timestamp) {
    flow.queue_action(NO_SUBSCRIBERS, ActionType::Publish, now);
    let Some(action) = flow.pending_action_mut(NO_SUBSCRIBERS) else {
        return;
    };
    match dead_end.state {
        ActionState::Filtered => {
            action.filter(None, None, dead_end.cause, Some(&dead_end.context), now);
        }
        _ => {
            action.error(None, None, dead_end.cause, &dead_end.context, now);
            action.content = content.to_vec();
        }
    }
}

/// Completes a resumed synthetic action once routing succeeds.
fn settle_synthetic(flow: &mut DeltaFileFlow, content: &[Content], now: Timestamp) {
    if let Some(action) = flow.pending_action_mut(NO_SUBSCRIBERS) {
        action.complete(None, None, content.to_vec(), HashMap::new(), Vec::new(), now);
    }
}

#[cfg(test)]
#[path = "publisher_tests.rs"]
mod tests;

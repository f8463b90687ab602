//! Builders for flow definitions and DeltaFile aggregates used in tests.

use crate::content::{Content, Segment};
use crate::core::{ActionType, FlowType};
use crate::model::{ActionConfiguration, DeltaFile, DeltaFileFlow, DeltaFileFlowInput};
use crate::pubsub::{DataSinkDefinition, FlowDefinition, InMemoryTopicDirectory, TransformFlowDefinition};
use crate::rules::{PublishRules, Rule, Topic};
use crate::utils::Timestamp;
use std::collections::HashMap;
use uuid::Uuid;

/// Shorthand constructors for flow definitions.
#[derive(Debug, Clone, Copy)]
pub struct TestFlowDefinition;

impl TestFlowDefinition {
    /// A data sink listening on `topics` with unconditional rules.
    #[must_use]
    pub fn sink(name: &str, topics: &[&str]) -> DataSinkDefinition {
        topics.iter().fold(
            FlowDefinition::data_sink(name, format!("{name}-egress")),
            |sink, topic| sink.subscribe(Rule::new(*topic)),
        )
    }

    /// A data sink with explicit subscription rules.
    #[must_use]
    pub fn sink_with_rules(name: &str, rules: Vec<Rule>) -> DataSinkDefinition {
        rules.into_iter().fold(
            FlowDefinition::data_sink(name, format!("{name}-egress")),
            DataSinkDefinition::subscribe,
        )
    }

    /// A one-action transform flow.
    #[must_use]
    pub fn transform(name: &str, subscriptions: Vec<Rule>, publish: PublishRules) -> TransformFlowDefinition {
        subscriptions
            .into_iter()
            .fold(FlowDefinition::transform(name), TransformFlowDefinition::subscribe)
            .with_action(format!("{name}-action"))
            .publishing(publish)
    }

    /// A directory holding the given topics and flows.
    #[must_use]
    pub fn directory(topics: &[&str], flows: Vec<FlowDefinition>) -> InMemoryTopicDirectory {
        let directory = InMemoryTopicDirectory::new();
        for topic in topics {
            directory.upsert_topic(Topic::new(*topic));
        }
        for flow in flows {
            directory.upsert_flow(flow);
        }
        directory
    }
}

/// Content of a given size over a fresh object owned by `did`.
#[must_use]
pub fn content_of_size(name: &str, size: u64, did: Uuid) -> Content {
    Content::new(name, "application/octet-stream").with_segment(Segment::new(Uuid::new_v4(), 0, size, did))
}

/// Builds a DeltaFile whose newest flow has completed its only action and
/// is ready to publish.
#[derive(Debug, Clone)]
pub struct DeltaFileFixture {
    publisher: String,
    content_size: u64,
    metadata: HashMap<String, String>,
    test_mode: Option<String>,
}

impl DeltaFileFixture {
    /// A fixture publishing from the named flow.
    #[must_use]
    pub fn new(publisher: impl Into<String>) -> Self {
        Self {
            publisher: publisher.into(),
            content_size: 10,
            metadata: HashMap::new(),
            test_mode: None,
        }
    }

    /// Sets the size of the produced content.
    #[must_use]
    pub fn with_content_size(mut self, size: u64) -> Self {
        self.content_size = size;
        self
    }

    /// Adds produced metadata.
    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Runs the publishing flow in test mode.
    #[must_use]
    pub fn in_test_mode(mut self, reason: impl Into<String>) -> Self {
        self.test_mode = Some(reason.into());
        self
    }

    /// Builds the aggregate; returns it with the publishing flow's id.
    #[must_use]
    pub fn build(self, now: Timestamp) -> (DeltaFile, u32) {
        let did = Uuid::new_v4();
        let ingested = content_of_size("input", self.content_size, did);
        let mut delta_file = DeltaFile::ingress(
            did,
            "fixture",
            "fixture-source",
            FlowType::RestDataSource,
            vec![ingested],
            HashMap::new(),
            now,
        );

        let action = format!("{}-action", self.publisher);
        let mut flow = DeltaFileFlow::new(
            0,
            self.publisher.clone(),
            FlowType::Transform,
            DeltaFileFlowInput {
                ancestor_ids: vec![0],
                ..DeltaFileFlowInput::default()
            },
            1,
            now,
        )
        .with_plan(vec![ActionConfiguration::new(action.clone(), ActionType::Transform)]);
        if let Some(reason) = self.test_mode {
            flow = flow.with_test_mode(reason);
        }

        let produced = content_of_size("produced", self.content_size, did);
        let flow = delta_file.add_flow(flow);
        flow.queue_action(&action, ActionType::Transform, now);
        if let Some(pending) = flow.pending_action_mut(&action) {
            pending.complete(Some(now), Some(now), vec![produced], self.metadata, Vec::new(), now);
        }
        flow.update_state(now);
        let id = flow.id;
        delta_file.update_state(now);
        delta_file.recalculate_bytes();
        (delta_file, id)
    }
}

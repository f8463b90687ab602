//! Flow definitions and their publisher/subscriber capabilities.
//!
//! A flow kind may publish, subscribe, or both; the router only talks to the
//! capability traits.

use crate::core::{ActionType, FlowType};
use crate::model::ActionConfiguration;
use crate::rules::{PublishRules, Rule};
use serde::{Deserialize, Serialize};

/// Where a publisher sends its output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishTarget<'a> {
    /// Evaluate publish rules.
    Rules(&'a PublishRules),
    /// Always publish to a single topic (data sources).
    Topic(&'a str),
}

/// A flow that routes its output to topics.
pub trait Publisher: Send + Sync {
    /// Flow name.
    fn name(&self) -> &str;

    /// How output is routed.
    fn publish_target(&self) -> PublishTarget<'_>;
}

/// A flow that accepts input from topics.
pub trait Subscriber: Send + Sync {
    /// Flow name.
    fn name(&self) -> &str;

    /// Flow kind of the traversals it creates.
    fn flow_type(&self) -> FlowType;

    /// Subscription rules, one per topic.
    fn subscriptions(&self) -> &[Rule];

    /// Planned actions for a new traversal.
    fn plan(&self) -> Vec<ActionConfiguration>;

    /// Whether the flow runs in test mode.
    fn is_test_mode(&self) -> bool;

    /// Returns true if any subscription names the topic.
    fn subscribes_to(&self, topic: &str) -> bool {
        self.subscriptions().iter().any(|rule| rule.topic == topic)
    }
}

/// Subscribes, runs transform actions, publishes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransformFlowDefinition {
    /// Flow name.
    pub name: String,
    /// Subscription rules.
    #[serde(default)]
    pub subscriptions: Vec<Rule>,
    /// Transform action names, in order.
    #[serde(default)]
    pub transform_actions: Vec<String>,
    /// Publish rules.
    #[serde(default)]
    pub publish: PublishRules,
    /// Test mode.
    #[serde(default)]
    pub test_mode: bool,
}

impl Publisher for TransformFlowDefinition {
    fn name(&self) -> &str {
        &self.name
    }

    fn publish_target(&self) -> PublishTarget<'_> {
        PublishTarget::Rules(&self.publish)
    }
}

impl Subscriber for TransformFlowDefinition {
    fn name(&self) -> &str {
        &self.name
    }

    fn flow_type(&self) -> FlowType {
        FlowType::Transform
    }

    fn subscriptions(&self) -> &[Rule] {
        &self.subscriptions
    }

    fn plan(&self) -> Vec<ActionConfiguration> {
        self.transform_actions
            .iter()
            .map(|name| ActionConfiguration::new(name.clone(), ActionType::Transform))
            .collect()
    }

    fn is_test_mode(&self) -> bool {
        self.test_mode
    }
}

/// Subscribes and delivers to an external system; terminal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataSinkDefinition {
    /// Flow name.
    pub name: String,
    /// Subscription rules.
    #[serde(default)]
    pub subscriptions: Vec<Rule>,
    /// Egress action name.
    pub egress_action: String,
    /// Test mode.
    #[serde(default)]
    pub test_mode: bool,
}

impl Subscriber for DataSinkDefinition {
    fn name(&self) -> &str {
        &self.name
    }

    fn flow_type(&self) -> FlowType {
        FlowType::DataSink
    }

    fn subscriptions(&self) -> &[Rule] {
        &self.subscriptions
    }

    fn plan(&self) -> Vec<ActionConfiguration> {
        vec![ActionConfiguration::new(
            self.egress_action.clone(),
            ActionType::Egress,
        )]
    }

    fn is_test_mode(&self) -> bool {
        self.test_mode
    }
}

/// Entry point publishing every ingested DeltaFile to one topic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataSourceDefinition {
    /// Flow name.
    pub name: String,
    /// Topic receiving ingested data.
    pub topic: String,
    /// Test mode.
    #[serde(default)]
    pub test_mode: bool,
}

impl Publisher for DataSourceDefinition {
    fn name(&self) -> &str {
        &self.name
    }

    fn publish_target(&self) -> PublishTarget<'_> {
        PublishTarget::Topic(&self.topic)
    }
}

/// A configured flow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FlowDefinition {
    /// Transform flow.
    Transform(TransformFlowDefinition),
    /// Data sink.
    DataSink(DataSinkDefinition),
    /// REST data source.
    RestDataSource(DataSourceDefinition),
    /// Timed data source.
    TimedDataSource(DataSourceDefinition),
}

impl FlowDefinition {
    /// A transform flow with no subscriptions, actions or publish rules.
    #[must_use]
    pub fn transform(name: impl Into<String>) -> TransformFlowDefinition {
        TransformFlowDefinition {
            name: name.into(),
            subscriptions: Vec::new(),
            transform_actions: Vec::new(),
            publish: PublishRules::default(),
            test_mode: false,
        }
    }

    /// A data sink with one egress action.
    #[must_use]
    pub fn data_sink(name: impl Into<String>, egress_action: impl Into<String>) -> DataSinkDefinition {
        DataSinkDefinition {
            name: name.into(),
            subscriptions: Vec::new(),
            egress_action: egress_action.into(),
            test_mode: false,
        }
    }

    /// A REST data source publishing to `topic`.
    #[must_use]
    pub fn rest_data_source(name: impl Into<String>, topic: impl Into<String>) -> Self {
        Self::RestDataSource(DataSourceDefinition {
            name: name.into(),
            topic: topic.into(),
            test_mode: false,
        })
    }

    /// Flow name.
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Transform(flow) => &flow.name,
            Self::DataSink(flow) => &flow.name,
            Self::RestDataSource(flow) | Self::TimedDataSource(flow) => &flow.name,
        }
    }

    /// Flow kind.
    #[must_use]
    pub fn flow_type(&self) -> FlowType {
        match self {
            Self::Transform(_) => FlowType::Transform,
            Self::DataSink(_) => FlowType::DataSink,
            Self::RestDataSource(_) => FlowType::RestDataSource,
            Self::TimedDataSource(_) => FlowType::TimedDataSource,
        }
    }

    /// The publisher capability, if the kind has one.
    #[must_use]
    pub fn as_publisher(&self) -> Option<&dyn Publisher> {
        match self {
            Self::Transform(flow) => Some(flow),
            Self::RestDataSource(flow) | Self::TimedDataSource(flow) => Some(flow),
            Self::DataSink(_) => None,
        }
    }

    /// The subscriber capability, if the kind has one.
    #[must_use]
    pub fn as_subscriber(&self) -> Option<&dyn Subscriber> {
        match self {
            Self::Transform(flow) => Some(flow),
            Self::DataSink(flow) => Some(flow),
            Self::RestDataSource(_) | Self::TimedDataSource(_) => None,
        }
    }
}

impl TransformFlowDefinition {
    /// Adds a subscription.
    #[must_use]
    pub fn subscribe(mut self, rule: Rule) -> Self {
        self.subscriptions.push(rule);
        self
    }

    /// Appends a transform action.
    #[must_use]
    pub fn with_action(mut self, name: impl Into<String>) -> Self {
        self.transform_actions.push(name.into());
        self
    }

    /// Sets the publish rules.
    #[must_use]
    pub fn publishing(mut self, publish: PublishRules) -> Self {
        self.publish = publish;
        self
    }

    /// Enables test mode.
    #[must_use]
    pub fn in_test_mode(mut self) -> Self {
        self.test_mode = true;
        self
    }
}

impl From<TransformFlowDefinition> for FlowDefinition {
    fn from(flow: TransformFlowDefinition) -> Self {
        Self::Transform(flow)
    }
}

impl DataSinkDefinition {
    /// Adds a subscription.
    #[must_use]
    pub fn subscribe(mut self, rule: Rule) -> Self {
        self.subscriptions.push(rule);
        self
    }

    /// Enables test mode.
    #[must_use]
    pub fn in_test_mode(mut self) -> Self {
        self.test_mode = true;
        self
    }
}

impl From<DataSinkDefinition> for FlowDefinition {
    fn from(flow: DataSinkDefinition) -> Self {
        Self::DataSink(flow)
    }
}

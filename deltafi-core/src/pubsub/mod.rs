//! Publish/subscribe routing.

mod definitions;
mod directory;
mod publisher;

pub use definitions::{
    DataSinkDefinition, DataSourceDefinition, FlowDefinition, PublishTarget, Publisher, Subscriber,
    TransformFlowDefinition,
};
pub use directory::{InMemoryTopicDirectory, TopicDirectory};
pub use publisher::{
    PublisherService, RoutingOutcome, DEFAULT_MAX_FLOW_DEPTH, MAX_DEPTH_CAUSE, MISSING_TOPIC_CAUSE,
    NO_DESTINATIONS_CAUSE, NO_SUBSCRIBERS, TOPIC_ERRORED_CAUSE, TOPIC_FILTERED_CAUSE,
};

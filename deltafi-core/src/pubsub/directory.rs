//! Process-wide, read-mostly directory of topics and flows.
//!
//! Writers rebuild an immutable snapshot and swap it in; readers never see a
//! partially updated index.

use crate::pubsub::definitions::FlowDefinition;
use crate::rules::Topic;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Lookup of topics and the flows that publish or subscribe to them.
pub trait TopicDirectory: Send + Sync {
    /// The topic definition.
    fn topic(&self, name: &str) -> Option<Topic>;

    /// Flows subscribing to the topic, in name order.
    fn subscribers_for_topic(&self, name: &str) -> Vec<Arc<FlowDefinition>>;

    /// A flow definition by name.
    fn flow(&self, name: &str) -> Option<Arc<FlowDefinition>>;
}

#[derive(Debug, Default)]
struct DirectorySnapshot {
    topics: HashMap<String, Topic>,
    flows: HashMap<String, Arc<FlowDefinition>>,
    subscribers: HashMap<String, Vec<Arc<FlowDefinition>>>,
}

impl DirectorySnapshot {
    fn build(topics: HashMap<String, Topic>, flows: HashMap<String, Arc<FlowDefinition>>) -> Self {
        let mut subscribers: HashMap<String, Vec<Arc<FlowDefinition>>> = HashMap::new();
        for flow in flows.values() {
            let Some(subscriber) = flow.as_subscriber() else {
                continue;
            };
            let mut topics: Vec<&str> = subscriber
                .subscriptions()
                .iter()
                .map(|rule| rule.topic.as_str())
                .collect();
            topics.sort_unstable();
            topics.dedup();
            for topic in topics {
                subscribers
                    .entry(topic.to_string())
                    .or_default()
                    .push(Arc::clone(flow));
            }
        }
        for list in subscribers.values_mut() {
            list.sort_by(|a, b| a.name().cmp(b.name()));
        }
        Self {
            topics,
            flows,
            subscribers,
        }
    }
}

/// In-memory [`TopicDirectory`] with invalidate-on-write snapshots.
#[derive(Debug, Default)]
pub struct InMemoryTopicDirectory {
    snapshot: RwLock<Arc<DirectorySnapshot>>,
}

impl InMemoryTopicDirectory {
    /// Creates an empty directory.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn current(&self) -> Arc<DirectorySnapshot> {
        Arc::clone(&self.snapshot.read())
    }

    fn rewrite(
        &self,
        change: impl FnOnce(&mut HashMap<String, Topic>, &mut HashMap<String, Arc<FlowDefinition>>),
    ) {
        let mut guard = self.snapshot.write();
        let mut topics = guard.topics.clone();
        let mut flows = guard.flows.clone();
        change(&mut topics, &mut flows);
        *guard = Arc::new(DirectorySnapshot::build(topics, flows));
        debug!(topics = guard.topics.len(), flows = guard.flows.len(), "Topic directory rebuilt");
    }

    /// Adds or replaces a topic.
    pub fn upsert_topic(&self, topic: Topic) {
        self.rewrite(|topics, _| {
            topics.insert(topic.name.clone(), topic);
        });
    }

    /// Removes a topic. Returns false if it was absent.
    pub fn remove_topic(&self, name: &str) -> bool {
        let present = self.current().topics.contains_key(name);
        if present {
            self.rewrite(|topics, _| {
                topics.remove(name);
            });
        }
        present
    }

    /// Adds or replaces a flow.
    pub fn upsert_flow(&self, flow: impl Into<FlowDefinition>) {
        let flow = flow.into();
        self.rewrite(|_, flows| {
            flows.insert(flow.name().to_string(), Arc::new(flow));
        });
    }

    /// Removes a flow. Returns false if it was absent.
    pub fn remove_flow(&self, name: &str) -> bool {
        let present = self.current().flows.contains_key(name);
        if present {
            self.rewrite(|_, flows| {
                flows.remove(name);
            });
        }
        present
    }

    /// Number of topics.
    #[must_use]
    pub fn topic_count(&self) -> usize {
        self.current().topics.len()
    }
}

impl TopicDirectory for InMemoryTopicDirectory {
    fn topic(&self, name: &str) -> Option<Topic> {
        self.current().topics.get(name).cloned()
    }

    fn subscribers_for_topic(&self, name: &str) -> Vec<Arc<FlowDefinition>> {
        self.current()
            .subscribers
            .get(name)
            .cloned()
            .unwrap_or_default()
    }

    fn flow(&self, name: &str) -> Option<Arc<FlowDefinition>> {
        self.current().flows.get(name).cloned()
    }
}

//! Event sink trait and implementations.

use crate::events::LifecycleEvent;
use async_trait::async_trait;
use tracing::{debug, info, Level};

/// Receives lifecycle events after the aggregate has been written.
///
/// Sinks are best-effort collaborators (analytics, provenance, retention).
/// Nothing a sink does can affect the DeltaFile that produced the event.
///
/// [`emit`](Self::emit) is the primary entry point: the lifecycle service and
/// the requeue sweep await it once the aggregate write has succeeded.
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Emits an event asynchronously.
    async fn emit(&self, event: &LifecycleEvent);

    /// Emits an event without blocking, for callers outside an async context.
    ///
    /// Must never panic; failures are logged and dropped.
    fn try_emit(&self, event: &LifecycleEvent);
}

/// A sink that discards every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpEventSink;

#[async_trait]
impl EventSink for NoOpEventSink {
    async fn emit(&self, _event: &LifecycleEvent) {}

    fn try_emit(&self, _event: &LifecycleEvent) {}
}

/// A sink that writes events to the tracing subscriber.
#[derive(Debug, Clone)]
pub struct LoggingEventSink {
    level: Level,
}

impl Default for LoggingEventSink {
    fn default() -> Self {
        Self { level: Level::INFO }
    }
}

impl LoggingEventSink {
    /// Creates a logging sink at the given level.
    #[must_use]
    pub fn new(level: Level) -> Self {
        Self { level }
    }

    /// A debug-level sink.
    #[must_use]
    pub fn debug() -> Self {
        Self::new(Level::DEBUG)
    }

    /// An info-level sink.
    #[must_use]
    pub fn info() -> Self {
        Self::new(Level::INFO)
    }

    fn log_event(&self, event: &LifecycleEvent) {
        let did = event.did().map(|did| did.to_string()).unwrap_or_default();
        let data = event.to_value();
        if self.level == Level::DEBUG {
            debug!(event_type = event.event_type(), %did, event_data = %data, "Lifecycle event");
        } else {
            info!(event_type = event.event_type(), %did, event_data = %data, "Lifecycle event");
        }
    }
}

#[async_trait]
impl EventSink for LoggingEventSink {
    async fn emit(&self, event: &LifecycleEvent) {
        self.log_event(event);
    }

    fn try_emit(&self, event: &LifecycleEvent) {
        self.log_event(event);
    }
}

/// Keeps every event in memory, for tests.
#[derive(Debug, Default)]
pub struct CollectingEventSink {
    events: parking_lot::RwLock<Vec<LifecycleEvent>>,
}

impl CollectingEventSink {
    /// Creates an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// All collected events.
    #[must_use]
    pub fn events(&self) -> Vec<LifecycleEvent> {
        self.events.read().clone()
    }

    /// Number of collected events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.read().len()
    }

    /// Returns true if nothing was collected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.read().is_empty()
    }

    /// Drops all collected events.
    pub fn clear(&self) {
        self.events.write().clear();
    }

    /// Events whose type starts with the prefix.
    #[must_use]
    pub fn events_of_type(&self, type_prefix: &str) -> Vec<LifecycleEvent> {
        self.events
            .read()
            .iter()
            .filter(|e| e.event_type().starts_with(type_prefix))
            .cloned()
            .collect()
    }
}

#[async_trait]
impl EventSink for CollectingEventSink {
    async fn emit(&self, event: &LifecycleEvent) {
        self.events.write().push(event.clone());
    }

    fn try_emit(&self, event: &LifecycleEvent) {
        self.events.write().push(event.clone());
    }
}

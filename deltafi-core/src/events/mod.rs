//! Lifecycle events published to best-effort collaborators.

mod sink;

pub use sink::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink};

use crate::core::DeltaFileStage;
use crate::utils::Timestamp;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use uuid::Uuid;

/// Something observable happened to a DeltaFile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LifecycleEvent {
    /// The DeltaFile moved to a new stage.
    StageChanged {
        /// DeltaFile id.
        did: Uuid,
        /// Previous stage.
        from: DeltaFileStage,
        /// New stage.
        to: DeltaFileStage,
    },
    /// Annotation keys were added.
    Annotated {
        /// DeltaFile id.
        did: Uuid,
        /// Keys actually added.
        keys: Vec<String>,
    },
    /// A flow's output was routed.
    Routed {
        /// DeltaFile id.
        did: Uuid,
        /// Publishing flow name.
        flow: String,
        /// Topics published on.
        topics: BTreeSet<String>,
        /// Number of subscriber flows created.
        created: usize,
    },
    /// An action errored.
    ActionErrored {
        /// DeltaFile id.
        did: Uuid,
        /// Flow name.
        flow: String,
        /// Action name.
        action: String,
        /// Error cause.
        cause: String,
    },
    /// An auto resume was scheduled for an errored action.
    AutoResumeScheduled {
        /// DeltaFile id.
        did: Uuid,
        /// Flow name.
        flow: String,
        /// Action name.
        action: String,
        /// When the resume is due.
        at: Timestamp,
        /// Governing policy.
        policy: String,
    },
    /// Errored flows were resumed.
    Resumed {
        /// DeltaFile id.
        did: Uuid,
        /// Resumed flow ids.
        flows: Vec<u32>,
    },
    /// A requeue sweep finished.
    Requeued {
        /// Number of actions requeued.
        count: usize,
    },
}

impl LifecycleEvent {
    /// Dotted event type, e.g. `deltafile.stage_changed`.
    #[must_use]
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::StageChanged { .. } => "deltafile.stage_changed",
            Self::Annotated { .. } => "deltafile.annotated",
            Self::Routed { .. } => "flow.routed",
            Self::ActionErrored { .. } => "action.errored",
            Self::AutoResumeScheduled { .. } => "action.auto_resume_scheduled",
            Self::Resumed { .. } => "flow.resumed",
            Self::Requeued { .. } => "requeue.completed",
        }
    }

    /// The DeltaFile the event concerns, if any.
    #[must_use]
    pub fn did(&self) -> Option<Uuid> {
        match self {
            Self::StageChanged { did, .. }
            | Self::Annotated { did, .. }
            | Self::Routed { did, .. }
            | Self::ActionErrored { did, .. }
            | Self::AutoResumeScheduled { did, .. }
            | Self::Resumed { did, .. } => Some(*did),
            Self::Requeued { .. } => None,
        }
    }

    /// JSON form of the event.
    #[must_use]
    pub fn to_value(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_type_and_did() {
        let did = Uuid::new_v4();
        let event = LifecycleEvent::Annotated {
            did,
            keys: vec!["a".into()],
        };
        assert_eq!(event.event_type(), "deltafile.annotated");
        assert_eq!(event.did(), Some(did));
        assert_eq!(LifecycleEvent::Requeued { count: 0 }.did(), None);
    }

    #[test]
    fn test_serialized_form() {
        let event = LifecycleEvent::StageChanged {
            did: Uuid::nil(),
            from: DeltaFileStage::InFlight,
            to: DeltaFileStage::Error,
        };
        let value = event.to_value();
        assert_eq!(value["type"], "stage_changed");
        assert_eq!(value["to"], "ERROR");
    }
}

//! Worker reports and their outcomes.

use crate::content::Content;
use crate::core::DeltaFileStage;
use crate::utils::Timestamp;
use std::collections::HashMap;
use uuid::Uuid;

/// What the worker says happened to an action.
#[derive(Debug, Clone, PartialEq)]
pub enum ActionResult {
    /// The action produced content and metadata.
    Complete {
        /// Produced content.
        content: Vec<Content>,
        /// Produced metadata.
        metadata: HashMap<String, String>,
        /// Metadata keys to remove.
        delete_metadata_keys: Vec<String>,
    },
    /// The action failed.
    Error {
        /// Short cause.
        cause: String,
        /// Diagnostic context.
        context: String,
    },
    /// The action filtered the data.
    Filter {
        /// Short cause.
        cause: String,
        /// Diagnostic context.
        context: Option<String>,
    },
    /// The action split the data into child DeltaFiles.
    Split {
        /// Ids of the children created.
        children: Vec<Uuid>,
    },
}

/// A worker's report about one action of one flow.
#[derive(Debug, Clone, PartialEq)]
pub struct ActionReport {
    /// DeltaFile id.
    pub did: Uuid,
    /// Flow id within the DeltaFile.
    pub flow_id: u32,
    /// Action name.
    pub action: String,
    /// When the worker started.
    pub start: Option<Timestamp>,
    /// When the worker stopped.
    pub stop: Option<Timestamp>,
    /// What happened.
    pub result: ActionResult,
}

impl ActionReport {
    fn new(did: Uuid, flow_id: u32, action: impl Into<String>, result: ActionResult) -> Self {
        Self {
            did,
            flow_id,
            action: action.into(),
            start: None,
            stop: None,
            result,
        }
    }

    /// A completion with no content or metadata yet.
    #[must_use]
    pub fn complete(did: Uuid, flow_id: u32, action: impl Into<String>) -> Self {
        Self::new(
            did,
            flow_id,
            action,
            ActionResult::Complete {
                content: Vec::new(),
                metadata: HashMap::new(),
                delete_metadata_keys: Vec::new(),
            },
        )
    }

    /// An error.
    #[must_use]
    pub fn error(
        did: Uuid,
        flow_id: u32,
        action: impl Into<String>,
        cause: impl Into<String>,
        context: impl Into<String>,
    ) -> Self {
        Self::new(
            did,
            flow_id,
            action,
            ActionResult::Error {
                cause: cause.into(),
                context: context.into(),
            },
        )
    }

    /// A filter decision.
    #[must_use]
    pub fn filter(did: Uuid, flow_id: u32, action: impl Into<String>, cause: impl Into<String>) -> Self {
        Self::new(
            did,
            flow_id,
            action,
            ActionResult::Filter {
                cause: cause.into(),
                context: None,
            },
        )
    }

    /// A split into children.
    #[must_use]
    pub fn split(did: Uuid, flow_id: u32, action: impl Into<String>, children: Vec<Uuid>) -> Self {
        Self::new(did, flow_id, action, ActionResult::Split { children })
    }

    /// Records the worker's start and stop times.
    #[must_use]
    pub fn with_times(mut self, start: Timestamp, stop: Timestamp) -> Self {
        self.start = Some(start);
        self.stop = Some(stop);
        self
    }

    /// Adds produced content to a completion.
    #[must_use]
    pub fn with_content(mut self, produced: Content) -> Self {
        if let ActionResult::Complete { content, .. } = &mut self.result {
            content.push(produced);
        }
        self
    }

    /// Adds produced metadata to a completion.
    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        if let ActionResult::Complete { metadata, .. } = &mut self.result {
            metadata.insert(key.into(), value.into());
        }
        self
    }

    /// Removes a metadata key as part of a completion.
    #[must_use]
    pub fn with_deleted_key(mut self, key: impl Into<String>) -> Self {
        if let ActionResult::Complete {
            delete_metadata_keys, ..
        } = &mut self.result
        {
            delete_metadata_keys.push(key.into());
        }
        self
    }

    /// Adds a diagnostic context to a filter decision.
    #[must_use]
    pub fn with_filter_context(mut self, filter_context: impl Into<String>) -> Self {
        if let ActionResult::Filter { context, .. } = &mut self.result {
            *context = Some(filter_context.into());
        }
        self
    }

    /// Short name of the result kind, for logs.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self.result {
            ActionResult::Complete { .. } => "complete",
            ActionResult::Error { .. } => "error",
            ActionResult::Filter { .. } => "filter",
            ActionResult::Split { .. } => "split",
        }
    }
}

/// What a report did to the aggregate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReportOutcome {
    /// The report was applied.
    Applied {
        /// Stage after the report.
        stage: DeltaFileStage,
        /// Flows created by routing, in creation order.
        created: Vec<u32>,
    },
    /// The report arrived too late: the DeltaFile is terminal or the action
    /// is no longer pending.
    Discarded,
}

impl ReportOutcome {
    /// Returns true if the report changed the aggregate.
    #[must_use]
    pub fn is_applied(&self) -> bool {
        matches!(self, Self::Applied { .. })
    }

    /// Flows created by routing.
    #[must_use]
    pub fn created(&self) -> &[u32] {
        match self {
            Self::Applied { created, .. } => created,
            Self::Discarded => &[],
        }
    }
}

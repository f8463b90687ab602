//! State and kind enums for DeltaFiles, flows and actions.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle state of a single action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActionState {
    /// Waiting to be claimed by a worker.
    Queued,
    /// Claimed by a worker.
    Dispatched,
    /// Finished successfully.
    Complete,
    /// Failed; may be resumed.
    Error,
    /// Dropped by a filter decision.
    Filtered,
    /// Finished by splitting into child DeltaFiles.
    Split,
    /// An errored attempt superseded by a newer attempt.
    Retried,
    /// Abandoned by cancellation.
    Cancelled,
}

impl ActionState {
    /// Returns true if the action will never change state on its own again.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Queued | Self::Dispatched)
    }

    /// Returns true if the action produced content that downstream work may use.
    #[must_use]
    pub fn produced_content(&self) -> bool {
        matches!(self, Self::Complete | Self::Split)
    }
}

impl fmt::Display for ActionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Queued => "QUEUED",
            Self::Dispatched => "DISPATCHED",
            Self::Complete => "COMPLETE",
            Self::Error => "ERROR",
            Self::Filtered => "FILTERED",
            Self::Split => "SPLIT",
            Self::Retried => "RETRIED",
            Self::Cancelled => "CANCELLED",
        };
        f.write_str(s)
    }
}

/// The kind of work an action performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActionType {
    /// Data entering through a REST data source.
    Ingress,
    /// Data entering through a timed data source.
    TimedIngress,
    /// Content/metadata transformation.
    Transform,
    /// Delivery to an external system.
    Egress,
    /// Routing step executed by the core itself.
    Publish,
    /// Unknown or unspecified.
    #[default]
    Unknown,
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Ingress => "INGRESS",
            Self::TimedIngress => "TIMED_INGRESS",
            Self::Transform => "TRANSFORM",
            Self::Egress => "EGRESS",
            Self::Publish => "PUBLISH",
            Self::Unknown => "UNKNOWN",
        };
        f.write_str(s)
    }
}

/// The kind of flow a DeltaFileFlow traverses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FlowType {
    /// Subscribes, transforms, publishes.
    Transform,
    /// Subscribes and delivers; terminal.
    DataSink,
    /// Entry point fed by REST uploads.
    RestDataSource,
    /// Entry point fed on a schedule.
    TimedDataSource,
}

impl FlowType {
    /// Returns true for flow types that start a DeltaFile.
    #[must_use]
    pub fn is_data_source(&self) -> bool {
        matches!(self, Self::RestDataSource | Self::TimedDataSource)
    }
}

impl fmt::Display for FlowType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Transform => "TRANSFORM",
            Self::DataSink => "DATA_SINK",
            Self::RestDataSource => "REST_DATA_SOURCE",
            Self::TimedDataSource => "TIMED_DATA_SOURCE",
        };
        f.write_str(s)
    }
}

/// State of one flow traversal within a DeltaFile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeltaFileFlowState {
    /// Actions are pending.
    #[default]
    InFlight,
    /// Every action finished.
    Complete,
    /// The latest action errored.
    Error,
    /// The latest action filtered the data.
    Filtered,
    /// Cancelled by the user.
    Cancelled,
}

impl DeltaFileFlowState {
    /// Returns true unless the flow still has pending work.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::InFlight)
    }
}

impl fmt::Display for DeltaFileFlowState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::InFlight => "IN_FLIGHT",
            Self::Complete => "COMPLETE",
            Self::Error => "ERROR",
            Self::Filtered => "FILTERED",
            Self::Cancelled => "CANCELLED",
        };
        f.write_str(s)
    }
}

/// Overall stage of a DeltaFile, derived from its flows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeltaFileStage {
    /// Created, not yet routed.
    #[default]
    Ingress,
    /// At least one flow has pending work.
    InFlight,
    /// No pending work and no errored flow.
    Complete,
    /// No pending work and at least one errored flow.
    Error,
    /// Cancelled; terminal.
    Cancelled,
    /// Content removed by a retention policy; terminal.
    Delete,
}

impl DeltaFileStage {
    /// Returns true for stages no lifecycle event may leave.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Cancelled | Self::Delete)
    }

    /// Returns true for stages with no pending work.
    #[must_use]
    pub fn is_inactive(&self) -> bool {
        matches!(self, Self::Complete | Self::Error | Self::Cancelled | Self::Delete)
    }
}

impl fmt::Display for DeltaFileStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Ingress => "INGRESS",
            Self::InFlight => "IN_FLIGHT",
            Self::Complete => "COMPLETE",
            Self::Error => "ERROR",
            Self::Cancelled => "CANCELLED",
            Self::Delete => "DELETE",
        };
        f.write_str(s)
    }
}

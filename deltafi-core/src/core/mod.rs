//! Core enums shared by the data model, the router and the lifecycle.

mod status;

pub use status::{ActionState, ActionType, DeltaFileFlowState, DeltaFileStage, FlowType};

//! The DeltaFile / DeltaFileFlow / Action data model.

mod action;
mod delta_file;
mod flow;

pub use action::{Action, ResumeMetadata, MAX_CAUSE_SIZE};
pub use delta_file::DeltaFile;
pub use flow::{ActionConfiguration, DeltaFileFlow, DeltaFileFlowInput};

//! The action, flow and DeltaFile lifecycle.
//!
//! Worker reports drive actions through
//! `QUEUED -> DISPATCHED -> {COMPLETE | ERROR | FILTERED | SPLIT}`. A flow
//! whose plan is exhausted routes its output to subscriber flows; an error
//! may schedule an automatic resume.

mod reports;
mod service;

pub use reports::{ActionReport, ActionResult, ReportOutcome};
pub use service::LifecycleService;

//! Resume/retry policy matching and backoff.

mod backoff;
mod resume;
mod service;

pub use backoff::BackOff;
pub use resume::{ResumeDecision, ResumePolicy, RetryPolicy};
pub use service::ResumePolicyService;

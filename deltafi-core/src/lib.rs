//! # DeltaFi core
//!
//! The orchestration kernel of a DeltaFi data pipeline.
//!
//! Data enters as a DeltaFile and is carried through a chain of flows
//! connected by named topics:
//!
//! - **Lifecycle**: worker reports move actions through their states and
//!   derive flow and DeltaFile stages
//! - **Routing**: a finished flow publishes its output; subscribing flows are
//!   created for every topic whose rules and filters hold
//! - **Recovery**: resume policies schedule automatic retries of errors, and
//!   a periodic sweep requeues work abandoned by crashed workers
//! - **Concurrency**: every mutation is an optimistic read-modify-write of a
//!   single versioned aggregate
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use deltafi_core::prelude::*;
//!
//! let directory = Arc::new(InMemoryTopicDirectory::new());
//! directory.upsert_topic(Topic::new("ingest"));
//! directory.upsert_flow(FlowDefinition::rest_data_source("source", "ingest"));
//!
//! let service = LifecycleService::from_config(
//!     &CoreConfig::load(None)?,
//!     Arc::new(InMemoryAggregateStore::new()),
//!     Arc::new(AlwaysTrueEvaluator),
//!     directory,
//!     Arc::new(ResumePolicyService::new()),
//! );
//! let delta_file = service.ingest("input.txt", "source", content, metadata).await?;
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod config;
pub mod content;
pub mod core;
pub mod errors;
pub mod events;
pub mod lifecycle;
pub mod model;
pub mod observability;
pub mod policy;
pub mod pubsub;
pub mod requeue;
pub mod rules;
pub mod store;
pub mod testing;
pub mod utils;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::config::{ConcurrencyConfig, CoreConfig, LoggingConfig};
    pub use crate::content::{Content, Segment};
    pub use crate::core::{ActionState, ActionType, DeltaFileFlowState, DeltaFileStage, FlowType};
    pub use crate::errors::{DeltaFiError, PolicyValidationError, Result, StoreError};
    pub use crate::events::{EventSink, LifecycleEvent, LoggingEventSink, NoOpEventSink};
    pub use crate::lifecycle::{ActionReport, ActionResult, LifecycleService, ReportOutcome};
    pub use crate::model::{Action, DeltaFile, DeltaFileFlow, ResumeMetadata};
    pub use crate::observability::init_logging;
    pub use crate::policy::{BackOff, ResumePolicy, ResumePolicyService};
    pub use crate::pubsub::{FlowDefinition, InMemoryTopicDirectory, PublisherService, TopicDirectory};
    pub use crate::requeue::{RequeueSweep, Scheduler};
    pub use crate::rules::{AlwaysTrueEvaluator, PublishRules, Rule, RuleEvaluator, Topic};
    pub use crate::store::{AggregateStore, InMemoryAggregateStore, OptimisticUpdater, Versioned};
    pub use crate::utils::{generate_did, Clock, SystemClock, Timestamp};
    pub use std::sync::Arc;
}

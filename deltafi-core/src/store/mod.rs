//! Versioned aggregate storage and the optimistic concurrency loop.
//!
//! Every mutation of a DeltaFile reads a versioned snapshot and writes it
//! back only if the version is unchanged. Conflicts are retried here, not in
//! the store.

mod memory;
mod optimistic;

pub use memory::InMemoryAggregateStore;
pub use optimistic::{Mutation, OptimisticUpdater};

use crate::errors::StoreError;
use crate::model::DeltaFile;
use crate::utils::Timestamp;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A value tagged with the store version it was read at.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Versioned<T> {
    /// The value.
    pub value: T,
    /// Monotonically increasing version.
    pub version: u64,
}

impl<T> Versioned<T> {
    /// Tags a value with a version.
    #[must_use]
    pub fn new(value: T, version: u64) -> Self {
        Self { value, version }
    }
}

/// Persistent storage for DeltaFile aggregates.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AggregateStore: Send + Sync {
    /// Loads the aggregate and its version.
    async fn load(&self, did: Uuid) -> Result<Option<Versioned<DeltaFile>>, StoreError>;

    /// Stores a new aggregate at version 0.
    async fn insert(&self, delta_file: DeltaFile) -> Result<Versioned<DeltaFile>, StoreError>;

    /// Replaces the aggregate if its stored version still equals `version`.
    ///
    /// Returns false on a version conflict or if the aggregate is gone.
    async fn compare_and_swap(
        &self,
        did: Uuid,
        version: u64,
        delta_file: DeltaFile,
    ) -> Result<bool, StoreError>;

    /// Aggregates with a QUEUED action last modified before `threshold`.
    async fn find_stale_queued(
        &self,
        threshold: Timestamp,
    ) -> Result<Vec<Versioned<DeltaFile>>, StoreError>;

    /// Aggregates with an auto resume due at or before `now`.
    async fn find_ready_for_auto_resume(
        &self,
        now: Timestamp,
    ) -> Result<Vec<Versioned<DeltaFile>>, StoreError>;
}

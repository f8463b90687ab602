//! In-memory aggregate store.

use crate::core::DeltaFileFlowState;
use crate::errors::StoreError;
use crate::model::DeltaFile;
use crate::store::{AggregateStore, Versioned};
use crate::utils::Timestamp;
use async_trait::async_trait;
use dashmap::DashMap;
use uuid::Uuid;

/// A [`AggregateStore`] backed by a concurrent map.
///
/// ```
/// use deltafi_core::core::FlowType;
/// use deltafi_core::model::DeltaFile;
/// use deltafi_core::store::{AggregateStore, InMemoryAggregateStore};
/// use deltafi_core::utils::now_utc;
/// use std::collections::HashMap;
///
/// # tokio_test::block_on(async {
/// let store = InMemoryAggregateStore::new();
/// let did = uuid::Uuid::new_v4();
/// let delta_file = DeltaFile::ingress(
///     did,
///     "input.txt",
///     "source",
///     FlowType::RestDataSource,
///     vec![],
///     HashMap::new(),
///     now_utc(),
/// );
///
/// let stored = store.insert(delta_file).await.unwrap();
/// assert_eq!(stored.version, 0);
/// assert!(store.compare_and_swap(did, 0, stored.value.clone()).await.unwrap());
/// assert!(!store.compare_and_swap(did, 0, stored.value).await.unwrap());
/// assert_eq!(store.load(did).await.unwrap().unwrap().version, 1);
/// # });
/// ```
#[derive(Debug, Default)]
pub struct InMemoryAggregateStore {
    entries: DashMap<Uuid, Versioned<DeltaFile>>,
}

impl InMemoryAggregateStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored aggregates.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if nothing is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// A copy of the stored aggregate.
    #[must_use]
    pub fn get(&self, did: Uuid) -> Option<Versioned<DeltaFile>> {
        self.entries.get(&did).map(|entry| entry.value().clone())
    }

    fn collect(&self, predicate: impl Fn(&DeltaFile) -> bool) -> Vec<Versioned<DeltaFile>> {
        self.entries
            .iter()
            .filter(|entry| predicate(&entry.value().value))
            .map(|entry| entry.value().clone())
            .collect()
    }
}

fn has_stale_queued(delta_file: &DeltaFile, threshold: Timestamp) -> bool {
    !delta_file.stage.is_terminal()
        && delta_file
            .flows
            .iter()
            .filter(|f| f.state == DeltaFileFlowState::InFlight)
            .flat_map(|f| f.actions().iter())
            .any(|a| a.is_queued() && a.modified < threshold)
}

#[async_trait]
impl AggregateStore for InMemoryAggregateStore {
    async fn load(&self, did: Uuid) -> Result<Option<Versioned<DeltaFile>>, StoreError> {
        Ok(self.get(did))
    }

    async fn insert(&self, delta_file: DeltaFile) -> Result<Versioned<DeltaFile>, StoreError> {
        let did = delta_file.did;
        match self.entries.entry(did) {
            dashmap::mapref::entry::Entry::Occupied(_) => Err(StoreError::Duplicate(did)),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                let stored = Versioned::new(delta_file, 0);
                slot.insert(stored.clone());
                Ok(stored)
            }
        }
    }

    async fn compare_and_swap(
        &self,
        did: Uuid,
        version: u64,
        delta_file: DeltaFile,
    ) -> Result<bool, StoreError> {
        match self.entries.get_mut(&did) {
            Some(mut entry) if entry.version == version => {
                entry.value = delta_file;
                entry.version += 1;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn find_stale_queued(
        &self,
        threshold: Timestamp,
    ) -> Result<Vec<Versioned<DeltaFile>>, StoreError> {
        Ok(self.collect(|df| has_stale_queued(df, threshold)))
    }

    async fn find_ready_for_auto_resume(
        &self,
        now: Timestamp,
    ) -> Result<Vec<Versioned<DeltaFile>>, StoreError> {
        Ok(self.collect(|df| {
            !df.stage.is_terminal() && df.next_auto_resume().is_some_and(|at| at <= now)
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::FlowType;
    use crate::utils::now_utc;
    use std::collections::HashMap;

    fn delta_file() -> DeltaFile {
        DeltaFile::ingress(
            Uuid::new_v4(),
            "file",
            "source",
            FlowType::RestDataSource,
            vec![],
            HashMap::new(),
            now_utc(),
        )
    }

    #[tokio::test]
    async fn test_insert_and_load() {
        let store = InMemoryAggregateStore::new();
        let df = delta_file();
        let did = df.did;

        store.insert(df.clone()).await.unwrap();
        let loaded = store.load(did).await.unwrap().unwrap();
        assert_eq!(loaded.version, 0);
        assert_eq!(loaded.value.did, did);

        assert_eq!(store.insert(df).await.unwrap_err(), StoreError::Duplicate(did));
        assert!(store.load(Uuid::new_v4()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_compare_and_swap_checks_version() {
        let store = InMemoryAggregateStore::new();
        let df = delta_file();
        let did = df.did;
        store.insert(df.clone()).await.unwrap();

        assert!(store.compare_and_swap(did, 0, df.clone()).await.unwrap());
        assert!(!store.compare_and_swap(did, 0, df.clone()).await.unwrap());
        assert!(store.compare_and_swap(did, 1, df).await.unwrap());
        assert_eq!(store.get(did).unwrap().version, 2);
    }
}

//! Bounded read-modify-write loop over versioned aggregates.

use crate::config::ConcurrencyConfig;
use crate::errors::{DeltaFiError, Result};
use crate::model::DeltaFile;
use crate::store::{AggregateStore, Versioned};
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

/// What a mutation did to the aggregate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mutation<R> {
    /// The aggregate changed and must be written back.
    Changed(R),
    /// Nothing changed; no write is needed.
    Unchanged(R),
}

impl<R> Mutation<R> {
    /// The mutation's result.
    pub fn into_inner(self) -> R {
        match self {
            Self::Changed(r) | Self::Unchanged(r) => r,
        }
    }
}

/// Applies mutations with compare-and-swap, retrying on version conflicts.
#[derive(Clone)]
pub struct OptimisticUpdater {
    store: Arc<dyn AggregateStore>,
    config: ConcurrencyConfig,
}

impl std::fmt::Debug for OptimisticUpdater {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OptimisticUpdater")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl OptimisticUpdater {
    /// Creates an updater over a store.
    #[must_use]
    pub fn new(store: Arc<dyn AggregateStore>, config: ConcurrencyConfig) -> Self {
        Self { store, config }
    }

    /// The underlying store.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn AggregateStore> {
        &self.store
    }

    fn conflict_delay(&self, attempt: u32) -> Duration {
        let base = self.config.base_delay_ms;
        let max = self.config.max_delay_ms;
        let delay = base.saturating_mul(2u64.saturating_pow(attempt)).min(max);
        if delay == 0 {
            Duration::ZERO
        } else {
            Duration::from_millis(rand::thread_rng().gen_range(0..=delay))
        }
    }

    async fn load(&self, did: Uuid) -> Result<Versioned<DeltaFile>> {
        self.store
            .load(did)
            .await?
            .ok_or(DeltaFiError::NotFound(did))
    }

    /// Loads the aggregate and applies `mutate` until it is written back.
    pub async fn update<R, F>(&self, did: Uuid, mutate: F) -> Result<R>
    where
        F: FnMut(&mut DeltaFile) -> Result<Mutation<R>> + Send,
        R: Send,
    {
        let snapshot = self.load(did).await?;
        self.update_from(snapshot, mutate).await
    }

    /// Applies `mutate` starting from an already loaded snapshot.
    ///
    /// Each attempt works on a fresh copy, so `mutate` must derive everything
    /// from the aggregate it is given.
    pub async fn update_from<R, F>(
        &self,
        mut snapshot: Versioned<DeltaFile>,
        mut mutate: F,
    ) -> Result<R>
    where
        F: FnMut(&mut DeltaFile) -> Result<Mutation<R>> + Send,
        R: Send,
    {
        let did = snapshot.value.did;
        let max_attempts = self.config.max_attempts.max(1);

        for attempt in 1..=max_attempts {
            let mut working = snapshot.value.clone();
            let result = match mutate(&mut working)? {
                Mutation::Unchanged(result) => return Ok(result),
                Mutation::Changed(result) => result,
            };

            if self
                .store
                .compare_and_swap(did, snapshot.version, working)
                .await?
            {
                return Ok(result);
            }

            debug!(%did, attempt, version = snapshot.version, "Version conflict, retrying");
            if attempt < max_attempts {
                let delay = self.conflict_delay(attempt);
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                snapshot = self.load(did).await?;
            }
        }

        warn!(%did, attempts = max_attempts, "Concurrency retries exhausted");
        Err(DeltaFiError::ConcurrencyExhausted {
            did,
            attempts: max_attempts,
        })
    }
}

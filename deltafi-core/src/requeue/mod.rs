//! Recovery of work abandoned by crashed workers.
//!
//! A QUEUED action that nobody touched for longer than the threshold is
//! offered again: its stale error fields are cleared and its queued and
//! modified times reset. The sweep is idempotent and races with completion
//! reports are resolved by the optimistic updater.

mod scheduler;

pub use scheduler::Scheduler;

use crate::errors::Result;
use crate::events::{EventSink, LifecycleEvent, NoOpEventSink};
use crate::store::{Mutation, OptimisticUpdater};
use crate::utils::{Clock, Timestamp};
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Periodic stale-action requeue.
#[derive(Clone)]
pub struct RequeueSweep {
    updater: OptimisticUpdater,
    clock: Arc<dyn Clock>,
    events: Arc<dyn EventSink>,
    threshold: Duration,
}

impl std::fmt::Debug for RequeueSweep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequeueSweep")
            .field("threshold_seconds", &self.threshold.num_seconds())
            .finish_non_exhaustive()
    }
}

impl RequeueSweep {
    /// Creates a sweep requeueing actions idle for `threshold_seconds`.
    #[must_use]
    pub fn new(updater: OptimisticUpdater, clock: Arc<dyn Clock>, threshold_seconds: u64) -> Self {
        let seconds = i64::try_from(threshold_seconds).unwrap_or(i64::MAX).min(i64::MAX / 1_000);
        Self {
            updater,
            clock,
            events: Arc::new(NoOpEventSink),
            threshold: Duration::seconds(seconds),
        }
    }

    /// Reports sweep results to the given sink.
    #[must_use]
    pub fn with_event_sink(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    /// Idle time after which a queued action is requeued.
    #[must_use]
    pub fn threshold(&self) -> Duration {
        self.threshold
    }

    fn cutoff(&self, now: Timestamp) -> Timestamp {
        now.checked_sub_signed(self.threshold)
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }

    /// Runs one sweep. Returns the number of actions requeued.
    ///
    /// A DeltaFile that cannot be written is logged and left for the next
    /// sweep.
    pub async fn run_once(&self) -> Result<usize> {
        let now = self.clock.now();
        let cutoff = self.cutoff(now);
        let stale = self.updater.store().find_stale_queued(cutoff).await?;
        debug!(candidates = stale.len(), %cutoff, "Requeue sweep started");

        let mut count = 0;
        for snapshot in stale {
            let did = snapshot.value.did;
            let result = self
                .updater
                .update_from(snapshot, |delta_file| {
                    let requeued = delta_file.requeue(now, cutoff);
                    if requeued == 0 {
                        Ok(Mutation::Unchanged(0))
                    } else {
                        Ok(Mutation::Changed(requeued))
                    }
                })
                .await;
            match result {
                Ok(requeued) => count += requeued,
                Err(err) => warn!(%did, error = %err, "Failed to requeue DeltaFile"),
            }
        }

        if count > 0 {
            info!(count, "Requeued stale actions");
            self.events.emit(&LifecycleEvent::Requeued { count }).await;
        }
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConcurrencyConfig;
    use crate::core::{ActionType, FlowType};
    use crate::errors::StoreError;
    use crate::events::CollectingEventSink;
    use crate::model::{DeltaFile, DeltaFileFlow, DeltaFileFlowInput};
    use crate::store::{AggregateStore, InMemoryAggregateStore, MockAggregateStore};
    use crate::utils::{now_utc, TestClock};
    use std::collections::HashMap;
    use uuid::Uuid;

    const ACTION: &str = "xform-action";

    fn queued_at(at: Timestamp) -> DeltaFile {
        let mut delta_file = DeltaFile::ingress(
            Uuid::new_v4(),
            "file",
            "source",
            FlowType::RestDataSource,
            vec![],
            HashMap::new(),
            at,
        );
        let flow = delta_file.add_flow(DeltaFileFlow::new(
            0,
            "xform",
            FlowType::Transform,
            DeltaFileFlowInput::default(),
            1,
            at,
        ));
        flow.queue_action(ACTION, ActionType::Transform, at);
        delta_file.update_state(at);
        delta_file
    }

    fn sweep(store: Arc<dyn AggregateStore>, clock: Arc<TestClock>) -> RequeueSweep {
        RequeueSweep::new(OptimisticUpdater::new(store, ConcurrencyConfig::default()), clock, 300)
    }

    #[tokio::test]
    async fn test_requeues_only_stale_actions() {
        let now = now_utc();
        let store = Arc::new(InMemoryAggregateStore::new());
        let stale = store.insert(queued_at(now - Duration::minutes(10))).await.unwrap();
        let fresh = store.insert(queued_at(now - Duration::minutes(1))).await.unwrap();
        let events = Arc::new(CollectingEventSink::new());

        let count = sweep(store.clone(), Arc::new(TestClock::at(now)))
            .with_event_sink(events.clone())
            .run_once()
            .await
            .unwrap();

        assert_eq!(count, 1);
        let requeued = store.get(stale.value.did).unwrap();
        assert_eq!(requeued.version, 1);
        assert_eq!(requeued.value.requeue_count, 1);
        let action = requeued.value.flow(1).unwrap().latest_action(ACTION).unwrap();
        assert!(action.is_queued());
        assert_eq!(action.modified, now);
        assert_eq!(action.queued, Some(now));

        assert_eq!(store.get(fresh.value.did).unwrap().version, 0);
        assert_eq!(events.events(), vec![LifecycleEvent::Requeued { count: 1 }]);
    }

    #[tokio::test]
    async fn test_second_sweep_is_idempotent() {
        let now = now_utc();
        let store = Arc::new(InMemoryAggregateStore::new());
        store.insert(queued_at(now - Duration::hours(1))).await.unwrap();
        let sweep = sweep(store.clone(), Arc::new(TestClock::at(now)));

        assert_eq!(sweep.run_once().await.unwrap(), 1);
        assert_eq!(sweep.run_once().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_cancelled_delta_files_are_skipped() {
        let now = now_utc();
        let store = Arc::new(InMemoryAggregateStore::new());
        let mut delta_file = queued_at(now - Duration::hours(1));
        delta_file.cancel(now - Duration::minutes(30));
        store.insert(delta_file).await.unwrap();

        let count = sweep(store, Arc::new(TestClock::at(now))).run_once().await.unwrap();
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn test_store_failure_propagates() {
        let mut store = MockAggregateStore::new();
        store
            .expect_find_stale_queued()
            .returning(|_| Err(StoreError::Unavailable("down".into())));

        let err = sweep(Arc::new(store), Arc::new(TestClock::default()))
            .run_once()
            .await
            .unwrap_err();
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_conflicting_write_is_skipped() {
        let now = now_utc();
        let snapshot = crate::store::Versioned::new(queued_at(now - Duration::hours(1)), 4);
        let did = snapshot.value.did;
        let mut store = MockAggregateStore::new();
        let stale = vec![snapshot];
        store
            .expect_find_stale_queued()
            .returning(move |_| Ok(stale.clone()));
        store.expect_compare_and_swap().returning(|_, _, _| Ok(false));
        store.expect_load().returning(|_| Ok(None));

        let count = sweep(Arc::new(store), Arc::new(TestClock::at(now)))
            .run_once()
            .await
            .unwrap();
        assert_eq!(count, 0, "did {did} vanished mid-sweep");
    }

    #[test]
    fn test_huge_threshold_does_not_overflow() {
        let store: Arc<dyn AggregateStore> = Arc::new(InMemoryAggregateStore::new());
        let sweep = RequeueSweep::new(
            OptimisticUpdater::new(store, ConcurrencyConfig::default()),
            Arc::new(TestClock::default()),
            u64::MAX,
        );
        assert_eq!(sweep.cutoff(now_utc()), DateTime::<Utc>::MIN_UTC);
    }
}

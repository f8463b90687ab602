//! Drives the requeue and auto resume sweeps on fixed intervals.

use crate::config::CoreConfig;
use crate::lifecycle::LifecycleService;
use crate::requeue::RequeueSweep;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{error, info};

/// Runs both sweeps until shut down.
#[derive(Debug, Clone)]
pub struct Scheduler {
    lifecycle: Arc<LifecycleService>,
    requeue: Arc<RequeueSweep>,
    requeue_interval: Duration,
    auto_resume_interval: Duration,
}

impl Scheduler {
    /// Creates a scheduler using the configured intervals.
    #[must_use]
    pub fn new(lifecycle: Arc<LifecycleService>, requeue: Arc<RequeueSweep>, config: &CoreConfig) -> Self {
        Self {
            lifecycle,
            requeue,
            requeue_interval: Duration::from_secs(config.requeue_interval_seconds),
            auto_resume_interval: Duration::from_secs(config.auto_resume_interval_seconds),
        }
    }

    /// Overrides both intervals.
    #[must_use]
    pub fn with_intervals(mut self, requeue: Duration, auto_resume: Duration) -> Self {
        self.requeue_interval = requeue;
        self.auto_resume_interval = auto_resume;
        self
    }

    /// Spawns the loop on the current runtime.
    pub fn spawn(self, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }

    /// Runs until `shutdown` turns true or its sender is dropped.
    ///
    /// Sweep failures are logged; the loop keeps going.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut requeue_tick = tokio::time::interval(self.requeue_interval);
        requeue_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut resume_tick = tokio::time::interval(self.auto_resume_interval);
        resume_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            requeue_interval = ?self.requeue_interval,
            auto_resume_interval = ?self.auto_resume_interval,
            "Starting sweep scheduler"
        );

        loop {
            tokio::select! {
                _ = requeue_tick.tick() => {
                    if let Err(err) = self.requeue.run_once().await {
                        error!(error = %err, "Requeue sweep failed");
                    }
                }
                _ = resume_tick.tick() => {
                    if let Err(err) = self.lifecycle.auto_resume().await {
                        error!(error = %err, "Auto resume sweep failed");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!("Sweep scheduler stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{ActionType, FlowType};
    use crate::model::{DeltaFile, DeltaFileFlow, DeltaFileFlowInput};
    use crate::policy::ResumePolicyService;
    use crate::pubsub::InMemoryTopicDirectory;
    use crate::rules::AlwaysTrueEvaluator;
    use crate::store::{AggregateStore, InMemoryAggregateStore, OptimisticUpdater};
    use crate::utils::{now_utc, SystemClock};
    use std::collections::HashMap;
    use uuid::Uuid;

    #[tokio::test]
    async fn test_runs_sweeps_until_shutdown() {
        let config = CoreConfig::default();
        let store = Arc::new(InMemoryAggregateStore::new());
        let old = now_utc() - chrono::Duration::hours(1);
        let mut delta_file =
            DeltaFile::ingress(Uuid::new_v4(), "f", "src", FlowType::RestDataSource, vec![], HashMap::new(), old);
        delta_file
            .add_flow(DeltaFileFlow::new(0, "xform", FlowType::Transform, DeltaFileFlowInput::default(), 1, old))
            .queue_action("xform-action", ActionType::Transform, old);
        delta_file.update_state(old);
        let did = store.insert(delta_file).await.unwrap().value.did;

        let lifecycle = Arc::new(LifecycleService::from_config(
            &config,
            store.clone(),
            Arc::new(AlwaysTrueEvaluator),
            Arc::new(InMemoryTopicDirectory::new()),
            Arc::new(ResumePolicyService::new()),
        ));
        let sweep = Arc::new(RequeueSweep::new(
            OptimisticUpdater::new(store.clone() as Arc<dyn AggregateStore>, config.concurrency),
            Arc::new(SystemClock),
            config.requeue_threshold_seconds,
        ));

        let (tx, rx) = watch::channel(false);
        let handle = Scheduler::new(lifecycle, sweep, &config)
            .with_intervals(Duration::from_millis(10), Duration::from_millis(10))
            .spawn(rx);

        tokio::time::sleep(Duration::from_millis(50)).await;
        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("scheduler did not stop")
            .unwrap();

        assert_eq!(store.get(did).unwrap().value.requeue_count, 1);
    }

    #[tokio::test]
    async fn test_stops_when_sender_dropped() {
        let config = CoreConfig::default();
        let store: Arc<dyn AggregateStore> = Arc::new(InMemoryAggregateStore::new());
        let lifecycle = Arc::new(LifecycleService::from_config(
            &config,
            store.clone(),
            Arc::new(AlwaysTrueEvaluator),
            Arc::new(InMemoryTopicDirectory::new()),
            Arc::new(ResumePolicyService::new()),
        ));
        let sweep = Arc::new(RequeueSweep::new(
            OptimisticUpdater::new(store, config.concurrency),
            Arc::new(SystemClock),
            config.requeue_threshold_seconds,
        ));

        let (tx, rx) = watch::channel(false);
        let handle = Scheduler::new(lifecycle, sweep, &config).spawn(rx);
        drop(tx);

        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("scheduler did not stop")
            .unwrap();
    }
}

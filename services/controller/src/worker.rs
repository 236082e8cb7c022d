//! Rule set workers.
//!
//! The supervisor keeps exactly one worker task per rule set. Distinct rule
//! sets reconcile in parallel; passes for the same rule set are strictly
//! sequential because only its own worker ever runs them.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use gamescale_reconcile::RuleSetKey;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

use crate::reconciler::EventScaleReconciler;
use crate::store::RuleSetStore;

/// Supervisor configuration.
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Interval between rule set listings.
    pub resync_interval: Duration,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            resync_interval: Duration::from_secs(15),
        }
    }
}

/// Spawns and tracks one worker per rule set.
pub struct Supervisor {
    reconciler: Arc<EventScaleReconciler>,
    store: Arc<dyn RuleSetStore>,
    config: SupervisorConfig,
    workers: HashMap<RuleSetKey, JoinHandle<()>>,
}

impl Supervisor {
    pub fn new(
        reconciler: Arc<EventScaleReconciler>,
        store: Arc<dyn RuleSetStore>,
        config: SupervisorConfig,
    ) -> Self {
        Self {
            reconciler,
            store,
            config,
            workers: HashMap::new(),
        }
    }

    /// Run until shutdown is signaled, then wait for workers to finish their
    /// current pass.
    #[instrument(skip(self, shutdown))]
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!(
            resync_interval_secs = self.config.resync_interval.as_secs(),
            "Starting rule set supervisor"
        );

        let mut resync = tokio::time::interval(self.config.resync_interval);

        loop {
            tokio::select! {
                _ = resync.tick() => {
                    self.resync(&shutdown).await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("Supervisor shutting down");
                        break;
                    }
                }
            }
        }

        for (key, handle) in self.workers.drain() {
            if let Err(e) = handle.await {
                error!(rule_set = %key, error = %e, "Worker task panicked");
            }
        }
    }

    /// Drop finished workers and start workers for new rule sets.
    ///
    /// Returns the number of workers started.
    pub async fn resync(&mut self, shutdown: &watch::Receiver<bool>) -> usize {
        self.workers.retain(|_, handle| !handle.is_finished());

        let keys = match self.store.list().await {
            Ok(keys) => keys,
            Err(e) => {
                warn!(error = %e, "Failed to list rule sets");
                return 0;
            }
        };

        let mut started = 0;
        for key in keys {
            if self.workers.contains_key(&key) {
                continue;
            }
            debug!(rule_set = %key, "Starting rule set worker");
            let handle = tokio::spawn(run_worker(
                Arc::clone(&self.reconciler),
                key.clone(),
                shutdown.clone(),
            ));
            self.workers.insert(key, handle);
            started += 1;
        }

        if started > 0 {
            info!(started, workers = self.workers.len(), "Rule set workers started");
        }
        started
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }
}

/// Reconcile one rule set until it disappears or shutdown is signaled.
async fn run_worker(
    reconciler: Arc<EventScaleReconciler>,
    key: RuleSetKey,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        let outcome = reconciler.reconcile(&key).await;

        if let Some(e) = &outcome.error {
            warn!(
                rule_set = %key,
                error = %e,
                retryable = e.is_retryable(),
                scaled = outcome.report.scaled_rules(),
                failed = outcome.report.failed_rules(),
                "Reconciliation pass finished with errors"
            );
        }

        let Some(delay) = outcome.requeue_after else {
            info!(rule_set = %key, "Rule set gone, stopping worker");
            return;
        };
        debug!(rule_set = %key, delay_secs = delay.as_secs_f64(), "Next pass scheduled");

        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    debug!(rule_set = %key, "Worker shutting down");
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::event_source::{EventSource, EventSourceError};
    use crate::store::InMemoryRuleSetStore;
    use crate::workload::{InMemoryWorkloads, WorkloadScaler};
    use async_trait::async_trait;
    use chrono::Utc;
    use gamescale_reconcile::{GameEvent, ReconcileState, RuleSet, RuleSetSpec};

    struct NoEvents;

    #[async_trait]
    impl EventSource for NoEvents {
        async fn fetch(&self, _endpoint: &str) -> Result<Vec<GameEvent>, EventSourceError> {
            Ok(vec![])
        }
    }

    fn rule_set(name: &str) -> RuleSet {
        RuleSet {
            key: RuleSetKey::new("games", name),
            spec: RuleSetSpec {
                event_endpoint_url: "http://events.local".to_string(),
                polling_interval: "1h".to_string(),
                rules: vec![],
            },
            status: ReconcileState::default(),
        }
    }

    fn supervisor(store: Arc<InMemoryRuleSetStore>) -> Supervisor {
        let reconciler = EventScaleReconciler::new(
            store.clone(),
            Arc::new(NoEvents),
            WorkloadScaler::new(Arc::new(InMemoryWorkloads::new()), Duration::from_secs(1)),
            Arc::new(ManualClock::new(Utc::now())),
            Duration::from_secs(1),
        );
        Supervisor::new(Arc::new(reconciler), store, SupervisorConfig::default())
    }

    #[test]
    fn test_supervisor_config_default() {
        let config = SupervisorConfig::default();
        assert_eq!(config.resync_interval, Duration::from_secs(15));
    }

    #[tokio::test]
    async fn test_one_worker_per_rule_set() {
        let store = Arc::new(InMemoryRuleSetStore::new());
        store.upsert(rule_set("raid-rules"));
        store.upsert(rule_set("pvp-rules"));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let mut supervisor = supervisor(store.clone());
        assert_eq!(supervisor.resync(&shutdown_rx).await, 2);
        assert_eq!(supervisor.resync(&shutdown_rx).await, 0);
        assert_eq!(supervisor.worker_count(), 2);

        store.upsert(rule_set("event-rules"));
        assert_eq!(supervisor.resync(&shutdown_rx).await, 1);
        assert_eq!(supervisor.worker_count(), 3);

        shutdown_tx.send(true).unwrap();
    }

    #[tokio::test]
    async fn test_removed_rule_set_gets_no_new_worker() {
        let store = Arc::new(InMemoryRuleSetStore::new());
        store.upsert(rule_set("raid-rules"));
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);

        let mut supervisor = supervisor(store.clone());
        supervisor.resync(&shutdown_rx).await;

        // First pass polls and persists status.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(store
            .status(&RuleSetKey::new("games", "raid-rules"))
            .unwrap()
            .last_event_check_time
            .is_some());

        store.remove(&RuleSetKey::new("games", "raid-rules"));
        assert_eq!(supervisor.resync(&shutdown_rx).await, 0);
    }

    #[tokio::test]
    async fn test_run_exits_on_shutdown() {
        let store = Arc::new(InMemoryRuleSetStore::new());
        store.upsert(rule_set("raid-rules"));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let handle = tokio::spawn(supervisor(store).run(shutdown_rx));
        tokio::time::sleep(Duration::from_millis(50)).await;
        shutdown_tx.send(true).unwrap();

        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("supervisor did not stop")
            .unwrap();
    }
}

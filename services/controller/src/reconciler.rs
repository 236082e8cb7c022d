//! Reconcile scheduler for event scaling rule sets.
//!
//! One pass for one rule set:
//! - Load the rule set (a missing rule set ends the pass silently)
//! - Gate on the polling cadence
//! - Poll the event source
//! - Decide and apply a scaling action per rule
//! - Persist the rebuilt status in a single write
//! - Compute the delay until the next pass
//!
//! When a scale-up is imminent the next pass comes after the fast-poll delay
//! and is treated as due, so it polls again instead of waiting out the rest
//! of the interval.
//!
//! Passes for the same rule set must not run concurrently; the supervisor
//! guarantees that by giving each rule set exactly one worker task.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use gamescale_reconcile::status::failed_poll_state;
use gamescale_reconcile::{
    check_cadence, decide, match_event, next_delay, parse_polling_interval, Cadence, ConfigError,
    GameEvent, ReconcileError, RuleSet, RuleSetKey, ScaleAction, StatusTracker, WorkloadRef,
    INVALID_INTERVAL_DELAY,
};
use tracing::{debug, error, info, instrument, warn};

use crate::clock::Clock;
use crate::event_source::{EventSource, EventSourceError};
use crate::store::{RuleSetStore, StoreError};
use crate::workload::{ScaleOutcome, WorkloadError, WorkloadScaler};

/// Requeue delay when the rule set itself cannot be read.
pub const STORE_RETRY_DELAY: Duration = Duration::from_secs(60);

/// What happened to one rule during a pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuleOutcome {
    /// No write was needed.
    Unchanged,
    /// The workload was scaled (or was found already at the target).
    Applied(ScaleOutcome),
    /// The rule could not be evaluated or applied.
    Failed(ReconcileError),
}

/// Per-rule result of a pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleResult {
    pub event_type: String,
    pub target: WorkloadRef,
    /// `None` when the rule failed before a decision was made.
    pub action: Option<ScaleAction>,
    pub outcome: RuleOutcome,
}

impl RuleResult {
    pub fn is_failure(&self) -> bool {
        matches!(self.outcome, RuleOutcome::Failed(_))
    }
}

/// Progress made by a pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PassReport {
    /// Whether the event source was polled.
    pub polled: bool,
    pub event_count: usize,
    pub rules: Vec<RuleResult>,
    /// A scale-up point falls before the next regular poll.
    pub imminent: bool,
    /// The rebuilt status was written.
    pub status_persisted: bool,
}

impl PassReport {
    pub fn failed_rules(&self) -> usize {
        self.rules.iter().filter(|r| r.is_failure()).count()
    }

    pub fn scaled_rules(&self) -> usize {
        self.rules
            .iter()
            .filter(|r| matches!(r.outcome, RuleOutcome::Applied(ScaleOutcome::Scaled { .. })))
            .count()
    }
}

/// Result of a pass: when to run again, what was done, and the pass-level
/// error if any.
#[derive(Debug)]
pub struct PassOutcome {
    /// `None` means the rule set is gone and no further passes are needed.
    pub requeue_after: Option<Duration>,
    pub report: PassReport,
    pub error: Option<ReconcileError>,
}

impl PassOutcome {
    fn terminal(report: PassReport) -> Self {
        Self {
            requeue_after: None,
            report,
            error: None,
        }
    }

    fn requeue(after: Duration, report: PassReport) -> Self {
        Self {
            requeue_after: Some(after),
            report,
            error: None,
        }
    }

    fn with_error(mut self, error: ReconcileError) -> Self {
        self.error = Some(error);
        self
    }

    pub fn is_terminal(&self) -> bool {
        self.requeue_after.is_none()
    }
}

/// Reconciles event scaling rule sets.
pub struct EventScaleReconciler {
    store: Arc<dyn RuleSetStore>,
    events: Arc<dyn EventSource>,
    scaler: WorkloadScaler,
    clock: Arc<dyn Clock>,
    call_timeout: Duration,
    /// Rule sets whose last poll saw an imminent scale-up. Their next pass
    /// polls after the fast delay instead of the full interval.
    fast_poll: Mutex<HashSet<RuleSetKey>>,
}

impl EventScaleReconciler {
    /// Create a new reconciler. `call_timeout` bounds each event poll.
    pub fn new(
        store: Arc<dyn RuleSetStore>,
        events: Arc<dyn EventSource>,
        scaler: WorkloadScaler,
        clock: Arc<dyn Clock>,
        call_timeout: Duration,
    ) -> Self {
        Self {
            store,
            events,
            scaler,
            clock,
            call_timeout,
            fast_poll: Mutex::new(HashSet::new()),
        }
    }

    /// Run one reconciliation pass for `key`.
    #[instrument(skip(self, key), fields(rule_set = %key))]
    pub async fn reconcile(&self, key: &RuleSetKey) -> PassOutcome {
        let mut report = PassReport::default();

        let rule_set = match self.store.get(key).await {
            Ok(Some(rule_set)) => rule_set,
            Ok(None) => {
                info!("Rule set not found, ignoring since it must have been deleted");
                self.set_fast_poll(key, false);
                return PassOutcome::terminal(report);
            }
            Err(e) => {
                error!(error = %e, "Failed to get rule set");
                return PassOutcome::requeue(STORE_RETRY_DELAY, report).with_error(e.into());
            }
        };

        let interval = match parse_polling_interval(&rule_set.spec.polling_interval) {
            Ok(interval) => interval,
            Err(e) => {
                error!(
                    interval = %rule_set.spec.polling_interval,
                    error = %e,
                    "Invalid polling interval"
                );
                return PassOutcome::requeue(INVALID_INTERVAL_DELAY, report).with_error(e.into());
            }
        };

        let now = self.clock.now();
        if let Cadence::NotDue { remaining } = check_cadence(
            now,
            rule_set.status.last_event_check_time,
            interval,
            self.fast_poll_pending(key),
        ) {
            debug!(remaining_secs = remaining.as_secs_f64(), "Next event check not due yet");
            return PassOutcome::requeue(remaining, report);
        }

        info!(url = %rule_set.spec.event_endpoint_url, "Polling event source");
        report.polled = true;
        let events = match self.poll(&rule_set.spec.event_endpoint_url).await {
            Ok(events) => events,
            Err(e) => {
                error!(error = %e, "Failed to poll event source");
                let status = failed_poll_state(&rule_set.status, now);
                match self.store.update_status(key, status).await {
                    Ok(()) => report.status_persisted = true,
                    Err(StoreError::NotFound(_)) => {
                        self.set_fast_poll(key, false);
                        return PassOutcome::terminal(report);
                    }
                    Err(store_err) => {
                        error!(error = %store_err, "Failed to update status after poll error");
                    }
                }
                return PassOutcome::requeue(interval, report).with_error(e.into());
            }
        };
        report.event_count = events.len();

        let mut tracker = StatusTracker::new();
        self.apply_rules(&rule_set, &events, now, interval, &mut tracker, &mut report)
            .await;
        self.set_fast_poll(key, report.imminent);

        let status = tracker.finish(&rule_set.status, now);
        match self.store.update_status(key, status).await {
            Ok(()) => report.status_persisted = true,
            Err(StoreError::NotFound(_)) => {
                info!("Rule set deleted during pass, dropping status");
                self.set_fast_poll(key, false);
                return PassOutcome::terminal(report);
            }
            Err(e) => {
                error!(error = %e, "Failed to update rule set status");
                return PassOutcome::requeue(interval, report).with_error(e.into());
            }
        }

        let delay = next_delay(interval, report.imminent);
        if report.imminent {
            info!(delay_secs = delay.as_secs(), "Requeuing soon for imminent event");
        }

        let failed = report.failed_rules();
        let total = report.rules.len();
        let outcome = PassOutcome::requeue(delay, report);
        if failed > 0 {
            outcome.with_error(ReconcileError::RuleFailures { failed, total })
        } else {
            outcome
        }
    }

    fn fast_poll_pending(&self, key: &RuleSetKey) -> bool {
        self.fast_poll_keys().contains(key)
    }

    fn set_fast_poll(&self, key: &RuleSetKey, pending: bool) {
        let mut keys = self.fast_poll_keys();
        if pending {
            keys.insert(key.clone());
        } else {
            keys.remove(key);
        }
    }

    fn fast_poll_keys(&self) -> std::sync::MutexGuard<'_, HashSet<RuleSetKey>> {
        self.fast_poll.lock().unwrap_or_else(|e| e.into_inner())
    }

    async fn poll(&self, endpoint: &str) -> Result<Vec<GameEvent>, EventSourceError> {
        tokio::time::timeout(self.call_timeout, self.events.fetch(endpoint))
            .await
            .map_err(|_| EventSourceError::Timeout {
                url: endpoint.to_string(),
                timeout: self.call_timeout,
            })?
    }

    /// Evaluate every rule. A failing rule never stops the others.
    async fn apply_rules(
        &self,
        rule_set: &RuleSet,
        events: &[GameEvent],
        now: chrono::DateTime<chrono::Utc>,
        interval: Duration,
        tracker: &mut StatusTracker,
        report: &mut PassReport,
    ) {
        let (rules, rejected) = rule_set.spec.distinct_rules();
        for err in rejected {
            warn!(error = %err, "Ignoring duplicate rule");
            if let ConfigError::DuplicateRule { event_type, target } = &err {
                report.rules.push(RuleResult {
                    event_type: event_type.clone(),
                    target: WorkloadRef::new(rule_set.key.namespace.clone(), target.clone()),
                    action: None,
                    outcome: RuleOutcome::Failed(err.clone().into()),
                });
            }
        }

        for rule in rules {
            let target = rule_set.target_of(rule);
            let matched = match_event(rule, events);
            if matched.is_some() {
                debug!(
                    event_type = %rule.event_type,
                    target = %target,
                    "Found matching event for rule"
                );
            }

            let current = match self.scaler.current_replicas(&target).await {
                Ok(current) => current,
                Err(e) => {
                    log_workload_error(&rule.event_type, &target, "read", &e);
                    report.rules.push(RuleResult {
                        event_type: rule.event_type.clone(),
                        target,
                        action: None,
                        outcome: RuleOutcome::Failed(e.into()),
                    });
                    continue;
                }
            };

            let decision = decide(now, rule, matched.as_ref(), current);
            if decision.is_imminent(interval) {
                report.imminent = true;
            }

            let outcome = if decision.action.requires_write() {
                info!(
                    event_type = %rule.event_type,
                    target = %target,
                    action = %decision.action,
                    from = current,
                    to = decision.target_replicas,
                    "Scaling workload"
                );
                match self
                    .scaler
                    .set_replicas(&target, decision.target_replicas)
                    .await
                {
                    Ok(applied) => RuleOutcome::Applied(applied),
                    Err(e) => {
                        log_workload_error(&rule.event_type, &target, "scale", &e);
                        RuleOutcome::Failed(e.into())
                    }
                }
            } else {
                debug!(
                    event_type = %rule.event_type,
                    target = %target,
                    replicas = current,
                    "No scaling action needed"
                );
                RuleOutcome::Unchanged
            };

            // Only assert an active scale when the target actually holds it.
            if !matches!(outcome, RuleOutcome::Failed(_)) {
                if let Some(active) = decision.active {
                    tracker.record(active);
                }
            }

            report.rules.push(RuleResult {
                event_type: rule.event_type.clone(),
                target,
                action: Some(decision.action),
                outcome,
            });
        }
    }
}

fn log_workload_error(event_type: &str, target: &WorkloadRef, stage: &str, err: &WorkloadError) {
    match err {
        WorkloadError::NotFound(_) => {
            info!(event_type, target = %target, stage, "Workload not found for scaling rule");
        }
        _ => {
            error!(event_type, target = %target, stage, error = %err, "Workload operation failed");
        }
    }
}

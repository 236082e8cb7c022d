//! Status derivation.
//!
//! The active-scale list is rebuilt from scratch every pass out of the
//! per-rule decisions. It is never merged with the previous list.

use chrono::{DateTime, Utc};

use crate::types::{ActiveScaleStatus, ReconcileState};

/// Collects active-scale records for one pass.
#[derive(Debug, Default)]
pub struct StatusTracker {
    active: Vec<ActiveScaleStatus>,
}

impl StatusTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a record. Returns false (and keeps the first record) if the
    /// `(event type, target)` pair was already recorded this pass.
    pub fn record(&mut self, status: ActiveScaleStatus) -> bool {
        let duplicate = self.active.iter().any(|existing| {
            existing.event_type == status.event_type
                && existing.target_microservice == status.target_microservice
        });
        if duplicate {
            return false;
        }
        self.active.push(status);
        true
    }

    pub fn len(&self) -> usize {
        self.active.len()
    }

    pub fn is_empty(&self) -> bool {
        self.active.is_empty()
    }

    /// Build the status for a pass that polled at `checked_at`.
    pub fn finish(self, previous: &ReconcileState, checked_at: DateTime<Utc>) -> ReconcileState {
        ReconcileState {
            last_event_check_time: Some(advance_check_time(
                previous.last_event_check_time,
                checked_at,
            )),
            active_scales: self.active,
        }
    }
}

/// Status after a failed poll: the check time advances, active scales are
/// left as they were.
pub fn failed_poll_state(previous: &ReconcileState, checked_at: DateTime<Utc>) -> ReconcileState {
    ReconcileState {
        last_event_check_time: Some(advance_check_time(
            previous.last_event_check_time,
            checked_at,
        )),
        active_scales: previous.active_scales.clone(),
    }
}

/// The last check time never moves backwards.
pub fn advance_check_time(
    previous: Option<DateTime<Utc>>,
    checked_at: DateTime<Utc>,
) -> DateTime<Utc> {
    match previous {
        Some(previous) if previous > checked_at => previous,
        _ => checked_at,
    }
}

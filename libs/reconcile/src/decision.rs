//! Scale decision engine.
//!
//! Maps `(now, rule, matched event, current replicas)` to a scaling action.
//! The decision depends only on its inputs; `now` is always passed in.
//!
//! Timeline for a matched event:
//!
//! ```text
//!   scale_up_at        start            end          scale_down_at
//!       |<- pre_scale ->|                |<- post_scale ->|
//!       [======== desired replicas ======)    grace       [== default ==
//! ```

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::event::ScheduledEvent;
use crate::types::{ActiveScaleStatus, EventScalingRule, ScalePhase};

/// What the scaler must do for a rule this pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScaleAction {
    /// Target already where it should be, or inside a hold period.
    NoChange,
    /// Raise (or set) the target to the event replica count.
    ScaleUp,
    /// Return the target to its default after the post-event lag.
    ScaleDown,
    /// No event for the rule; return the target to its default.
    ScaleToDefault,
}

impl ScaleAction {
    pub fn requires_write(&self) -> bool {
        !matches!(self, Self::NoChange)
    }
}

impl fmt::Display for ScaleAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ScaleAction::NoChange => "no_change",
            ScaleAction::ScaleUp => "scale_up",
            ScaleAction::ScaleDown => "scale_down",
            ScaleAction::ScaleToDefault => "scale_to_default",
        };
        f.write_str(s)
    }
}

/// Boundaries derived from a rule and its matched event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScaleWindow {
    pub scale_up_at: DateTime<Utc>,
    pub event_end: DateTime<Utc>,
    pub scale_down_at: DateTime<Utc>,
}

impl ScaleWindow {
    pub fn new(rule: &EventScalingRule, event: &ScheduledEvent) -> Self {
        Self {
            scale_up_at: event.start - rule.pre_scale_lead(),
            event_end: event.end,
            scale_down_at: event.end + rule.post_scale_lag(),
        }
    }

    /// `scale_up_at <= now < event_end`.
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.scale_up_at <= now && now < self.event_end
    }

    /// `event_end <= now < scale_down_at`.
    pub fn in_grace(&self, now: DateTime<Utc>) -> bool {
        self.event_end <= now && now < self.scale_down_at
    }

    pub fn is_over(&self, now: DateTime<Utc>) -> bool {
        now >= self.scale_down_at
    }
}

/// Result of evaluating one rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decision {
    pub action: ScaleAction,

    /// Replica count the target should have after this pass. Equal to the
    /// current count when the action is `NoChange`.
    pub target_replicas: u32,

    /// Status record asserting the target is held at the event count.
    pub active: Option<ActiveScaleStatus>,

    /// Time left until the scale-up point, when it lies in the future.
    pub scale_up_in: Option<Duration>,
}

impl Decision {
    fn no_change(current: u32) -> Self {
        Self {
            action: ScaleAction::NoChange,
            target_replicas: current,
            active: None,
            scale_up_in: None,
        }
    }

    /// True when the scale-up point arrives before the next regular poll.
    pub fn is_imminent(&self, polling_interval: Duration) -> bool {
        self.scale_up_in
            .is_some_and(|remaining| remaining < polling_interval)
    }
}

/// Decide the action for `rule` at `now`.
pub fn decide(
    now: DateTime<Utc>,
    rule: &EventScalingRule,
    event: Option<&ScheduledEvent>,
    current_replicas: u32,
) -> Decision {
    let Some(event) = event else {
        if current_replicas == rule.default_replicas {
            return Decision::no_change(current_replicas);
        }
        return Decision {
            action: ScaleAction::ScaleToDefault,
            target_replicas: rule.default_replicas,
            active: None,
            scale_up_in: None,
        };
    };

    let window = ScaleWindow::new(rule, event);

    if window.is_active(now) {
        let action = if current_replicas == rule.desired_replicas {
            ScaleAction::NoChange
        } else {
            ScaleAction::ScaleUp
        };
        return Decision {
            action,
            target_replicas: rule.desired_replicas,
            active: Some(active_status(now, rule, &window)),
            scale_up_in: None,
        };
    }

    if window.is_over(now) {
        if current_replicas == rule.default_replicas {
            return Decision::no_change(current_replicas);
        }
        return Decision {
            action: ScaleAction::ScaleDown,
            target_replicas: rule.default_replicas,
            active: None,
            scale_up_in: None,
        };
    }

    let mut decision = Decision::no_change(current_replicas);
    if now < window.scale_up_at {
        decision.scale_up_in = (window.scale_up_at - now).to_std().ok();
    } else if window.in_grace(now) && current_replicas == rule.desired_replicas {
        // Still held at the event count until the post-event lag runs out.
        decision.active = Some(active_status(now, rule, &window));
    }
    decision
}

fn active_status(
    now: DateTime<Utc>,
    rule: &EventScalingRule,
    window: &ScaleWindow,
) -> ActiveScaleStatus {
    ActiveScaleStatus {
        event_type: rule.event_type.clone(),
        target_microservice: rule.target_microservice.clone(),
        scaled_to_replicas: rule.desired_replicas,
        scale_trigger_time: now,
        event_end_time: window.event_end,
        status: ScalePhase::Active,
    }
}

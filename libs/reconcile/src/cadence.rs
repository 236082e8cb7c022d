//! Polling cadence arithmetic.

use std::time::Duration;

use chrono::{DateTime, Utc};

/// Delay used instead of the polling interval when a scale-up is imminent.
pub const FAST_POLL_DELAY: Duration = Duration::from_secs(30);

/// Requeue delay when the polling interval cannot be parsed.
pub const INVALID_INTERVAL_DELAY: Duration = Duration::from_secs(60);

/// Whether a pass should poll the event source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cadence {
    /// At least one interval has passed since the last poll.
    Due,
    /// Polled recently; check again after `remaining`.
    NotDue { remaining: Duration },
}

/// Compare the time since the last poll against the polling interval.
///
/// While `fast_poll` is set (the previous poll saw an imminent scale-up) the
/// spacing shrinks to [`next_delay`]'s fast value, so the fast requeue
/// actually polls again. A last-check time in the future (clock skew) counts
/// as zero elapsed.
pub fn check_cadence(
    now: DateTime<Utc>,
    last_check: Option<DateTime<Utc>>,
    interval: Duration,
    fast_poll: bool,
) -> Cadence {
    let Some(last_check) = last_check else {
        return Cadence::Due;
    };

    let spacing = next_delay(interval, fast_poll);
    let elapsed = (now - last_check).to_std().unwrap_or(Duration::ZERO);
    if elapsed < spacing {
        Cadence::NotDue {
            remaining: spacing - elapsed,
        }
    } else {
        Cadence::Due
    }
}

/// Delay until the next pass after a successful poll.
pub fn next_delay(interval: Duration, imminent: bool) -> Duration {
    if imminent {
        interval.min(FAST_POLL_DELAY)
    } else {
        interval
    }
}

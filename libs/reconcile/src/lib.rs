//! # gamescale-reconcile
//!
//! Decision primitives for event-driven workload scaling. A rule set names
//! event types announced by an external event source and, for each, the
//! workload to scale ahead of the event and back down after it.
//!
//! ## Invariants
//!
//! - Decisions are deterministic given the same inputs; `now` is a parameter
//! - At most one active-scale record per (event type, target) per pass
//! - Status is rebuilt every pass, never patched incrementally
//! - The last event check time never moves backwards
//!
//! ## Modules
//!
//! - `types`: rule sets, events and status records
//! - `interval`: polling interval parsing
//! - `event`: matching polled events to rules
//! - `decision`: the per-rule scaling decision
//! - `cadence`: poll gating and requeue delays
//! - `status`: status derivation

pub mod cadence;
pub mod decision;
mod error;
pub mod event;
pub mod interval;
pub mod status;
mod types;

pub use cadence::{check_cadence, next_delay, Cadence, FAST_POLL_DELAY, INVALID_INTERVAL_DELAY};
pub use decision::{decide, Decision, ScaleAction, ScaleWindow};
pub use error::{ConfigError, EventParseError, ReconcileError};
pub use event::{match_event, ScheduledEvent};
pub use interval::parse_polling_interval;
pub use status::StatusTracker;
pub use types::*;

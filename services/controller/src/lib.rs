//! gamescale controller library
//!
//! Scales workloads around externally announced, time-bounded game events.
//! A rule set points at an event source and lists, per event type, the
//! workload to scale, its event replica count and the lead/lag around the
//! event window.
//!
//! ## Architecture
//!
//! ```text
//! Supervisor
//! └── worker(rule set)            (one task per rule set)
//!     └── EventScaleReconciler    (one pass: poll, decide, scale, persist)
//!         ├── EventSource         (announced events, HTTP)
//!         ├── WorkloadScaler      (idempotent, version-checked replica writes)
//!         ├── RuleSetStore        (rule sets and their status)
//!         └── Clock
//! ```
//!
//! The scaling decision itself lives in `gamescale-reconcile` and is pure.

pub mod clock;
pub mod config;
pub mod event_source;
pub mod reconciler;
pub mod store;
pub mod worker;
pub mod workload;

pub use clock::{Clock, ManualClock, SystemClock};
pub use event_source::{EventSource, HttpEventSource};
pub use reconciler::{EventScaleReconciler, PassOutcome, PassReport, RuleOutcome};
pub use store::{InMemoryRuleSetStore, RuleSetStore};
pub use worker::{Supervisor, SupervisorConfig};
pub use workload::{HttpWorkloadApi, InMemoryWorkloads, ScaleOutcome, WorkloadApi, WorkloadScaler};

//! ---
//! ccs_section: "01-control-kernel"
//! ccs_subsection: "module"
//! ccs_type: "source"
//! ccs_scope: "code"
//! ccs_description: "Supervisor runtime: scheduler, state store, event sink."
//! ccs_version: "v0.1.0"
//! ccs_owner: "tbd"
//! ---
//! Supervisor runtime for the cooling control system.
//!
//! A single periodic task owns the control loop; the store and event sink
//! expose consistent snapshots to readers that never feed back into the
//! loop.

pub mod events;
pub mod metrics;
pub mod scheduler;
pub mod state;

pub use events::{EventKind, EventRecord, EventSink};
pub use metrics::{new_registry, SharedRegistry, SupervisorMetrics};
pub use scheduler::Supervisor;
pub use state::{ControlStateStore, DegradationLevel, OperatorMode, StoreSnapshot};

//! ---
//! ccs_section: "01-control-kernel"
//! ccs_subsection: "module"
//! ccs_type: "source"
//! ccs_scope: "code"
//! ccs_description: "Shared primitives and utilities for the supervisor runtime."
//! ccs_version: "v0.1.0"
//! ccs_owner: "tbd"
//! ---
//! Core shared primitives for the CCS supervisor workspace.
//! This crate exposes configuration loading, tracing setup, and
//! loop-timing utilities consumed across the workspace.

pub mod config;
pub mod logging;
pub mod metrics;
pub mod time;

pub use config::{
    AdapterBackend, AdapterConfig, ApiConfig, ControlConfig, EventSinkConfig, GroupConfig,
    GroupsConfig, LoggingConfig, PredictorConfig, SafetyConfig, SupervisorConfig, WeightTable,
    WindowConfig,
};
pub use logging::{init_tracing, LogFormat};
pub use metrics::{PeriodHistogram, TickTimingReporter};

//! ---
//! ccs_section: "02-telemetry-adapters"
//! ccs_subsection: "module"
//! ccs_type: "source"
//! ccs_scope: "code"
//! ccs_description: "Telemetry model and pluggable PLC/simulation adapters."
//! ccs_version: "v0.1.0"
//! ccs_owner: "tbd"
//! ---
use async_trait::async_trait;

use crate::frames::{CommandFrame, FrameError, TelemetryFrame};

/// Failures surfaced by a telemetry backend. Every variant is recoverable;
/// the scheduler converts them into staleness and degraded-mode state.
#[derive(Debug, thiserror::Error)]
pub enum AdapterError {
    #[error("transport deadline exceeded")]
    Timeout,
    #[error("transport fault: {0}")]
    Transport(String),
    #[error("telemetry rejected: {0}")]
    OutOfRange(#[from] FrameError),
}

/// Capability implemented by both the live PLC backend and the physics
/// simulator. The supervisor receives one at construction and never
/// rediscovers which it was given.
#[async_trait]
pub trait TelemetryAdapter: Send + Sync {
    /// Read one validated sensor frame. Unit normalisation and range/NaN
    /// rejection happen behind this call.
    async fn read_frame(&self) -> Result<TelemetryFrame, AdapterError>;

    /// Write one command frame to the drive groups.
    async fn write_command(&self, command: &CommandFrame) -> Result<(), AdapterError>;
}

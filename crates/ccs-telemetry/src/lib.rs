//! ---
//! ccs_section: "02-telemetry-adapters"
//! ccs_subsection: "module"
//! ccs_type: "source"
//! ccs_scope: "code"
//! ccs_description: "Telemetry model and pluggable PLC/simulation adapters."
//! ccs_version: "v0.1.0"
//! ccs_owner: "tbd"
//! ---
//! Telemetry model and adapters for the cooling supervisor.
//!
//! The adapter boundary is the only place where wire representation is
//! interpreted; everything above it works with validated engineering units.

pub mod adapter;
pub mod frames;
pub mod physics;
pub mod plc;
pub mod sim;

pub use adapter::{AdapterError, TelemetryAdapter};
pub use frames::{Channel, CommandFrame, FrameError, GroupCommand, GroupId, TelemetryFrame};
pub use physics::{DriveCurve, PlantModel, VoyagePattern};
pub use plc::{InMemoryRegisterBus, PlcAdapter, RegisterBus};
pub use sim::SimAdapter;

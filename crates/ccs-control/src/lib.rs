//! ---
//! ccs_section: "01-control-kernel"
//! ccs_subsection: "module"
//! ccs_type: "source"
//! ccs_scope: "code"
//! ccs_description: "Three-layer decision pipeline and supporting state machines."
//! ccs_version: "v0.1.0"
//! ccs_owner: "tbd"
//! ---
//! Closed-loop control kernel.
//!
//! Decision order within a tick: safety override, then predictive-feedback
//! regulation for unforced groups, then the equipment-count state machine.
//! Every stage is a deterministic function of its inputs so the pipeline can
//! be replayed and property-tested without a scheduler attached.

pub mod counts;
pub mod decision;
pub mod feedback;
pub mod group;
pub mod pipeline;
pub mod predictor;
pub mod safety;
pub mod window;

pub use counts::{CountChange, CountOutcome};
pub use decision::{ControlMode, Decision, GroupDecision};
pub use feedback::{FeedbackInput, FeedbackOutput};
pub use group::{GroupState, GroupStates};
pub use pipeline::{decide, hold_decision, manual_decision, PipelineNote, TickContext};
pub use predictor::{LoadOutcome, PredictOutcome, Prediction, TemperaturePredictor};
pub use safety::{ForcedFrequency, GroupOverride, SafetyAssessment, SafetyRule};
pub use window::{ChannelStats, SequenceWindow, WindowSummary};

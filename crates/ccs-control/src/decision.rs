//! ---
//! ccs_section: "01-control-kernel"
//! ccs_subsection: "module"
//! ccs_type: "source"
//! ccs_scope: "code"
//! ccs_description: "Three-layer decision pipeline and supporting state machines."
//! ccs_version: "v0.1.0"
//! ccs_owner: "tbd"
//! ---
use ccs_common::config::GroupConfig;
use ccs_telemetry::frames::{CommandFrame, GroupCommand, GroupId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Operating regime the controller classified a group into, from the sign
/// and magnitude of the combined error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlMode {
    Stable,
    Cooling,
    EnergySaving,
}

/// Decision taken for one drive group this tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupDecision {
    pub group: GroupId,
    pub frequency_hz: f64,
    pub count: u32,
    /// Absent when the safety layer bypassed the controller for this group.
    pub mode: Option<ControlMode>,
    /// Rule and stage identifiers that shaped this sub-decision.
    pub applied_rules: Vec<String>,
    pub reason: String,
    /// Cubic-affinity electrical power estimate for the commanded state.
    pub estimated_kw: f64,
}

impl GroupDecision {
    /// Drive power estimate from the cubic power-versus-frequency law.
    pub fn power_estimate_kw(envelope: &GroupConfig, frequency_hz: f64, count: u32) -> f64 {
        let ratio = frequency_hz / envelope.frequency_max;
        envelope.rated_kw_per_unit * f64::from(count) * ratio.powi(3)
    }
}

/// Complete per-tick decision, retained in the store and serialised for the
/// operator interface. Parsing a serialised decision yields an identical
/// value, which the dashboard round-trip relies on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    pub tick: u64,
    pub decided_at: DateTime<Utc>,
    pub safety_override: bool,
    pub used_prediction: bool,
    pub sw_pumps: GroupDecision,
    pub fw_pumps: GroupDecision,
    pub er_fans: GroupDecision,
}

impl Decision {
    pub fn group(&self, id: GroupId) -> &GroupDecision {
        match id {
            GroupId::SwPumps => &self.sw_pumps,
            GroupId::FwPumps => &self.fw_pumps,
            GroupId::ErFans => &self.er_fans,
        }
    }

    /// Render the command frame written back to the PLC.
    pub fn to_command(&self) -> CommandFrame {
        let group_command = |decision: &GroupDecision| GroupCommand {
            frequency_hz: decision.frequency_hz,
            count: decision.count,
            reason: decision.reason.clone(),
        };
        CommandFrame {
            issued_at: self.decided_at,
            tick: self.tick,
            safety_override: self.safety_override,
            sw_pumps: group_command(&self.sw_pumps),
            fw_pumps: group_command(&self.fw_pumps),
            er_fans: group_command(&self.er_fans),
        }
    }
}

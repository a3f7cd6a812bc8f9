//! ---
//! ccs_section: "01-control-kernel"
//! ccs_subsection: "module"
//! ccs_type: "source"
//! ccs_scope: "code"
//! ccs_description: "Three-layer decision pipeline and supporting state machines."
//! ccs_version: "v0.1.0"
//! ccs_owner: "tbd"
//! ---
use ccs_common::config::{GroupConfig, GroupsConfig};
use ccs_telemetry::frames::GroupId;
use serde::{Deserialize, Serialize};

/// Per-group state carried across ticks.
///
/// `time_at_max_s` and `time_at_min_s` are mutually exclusive; the count
/// machine resets the opposite timer on every advance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupState {
    pub prev_frequency_hz: f64,
    pub prev_count: u32,
    pub time_at_max_s: f64,
    pub time_at_min_s: f64,
    pub cooldown_remaining_s: f64,
}

impl GroupState {
    /// Start-up frequency before the first decision is taken.
    pub const INITIAL_FREQUENCY_HZ: f64 = 48.0;

    pub fn initial(config: &GroupConfig) -> Self {
        Self {
            prev_frequency_hz: Self::INITIAL_FREQUENCY_HZ
                .clamp(config.frequency_min, config.frequency_max),
            prev_count: config.count_initial,
            time_at_max_s: 0.0,
            time_at_min_s: 0.0,
            cooldown_remaining_s: 0.0,
        }
    }
}

/// Fixed-size state table for the three drive groups.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupStates {
    pub sw_pumps: GroupState,
    pub fw_pumps: GroupState,
    pub er_fans: GroupState,
}

impl GroupStates {
    pub fn initial(groups: &GroupsConfig) -> Self {
        Self {
            sw_pumps: GroupState::initial(&groups.sw_pumps),
            fw_pumps: GroupState::initial(&groups.fw_pumps),
            er_fans: GroupState::initial(&groups.er_fans),
        }
    }

    pub fn group(&self, id: GroupId) -> &GroupState {
        match id {
            GroupId::SwPumps => &self.sw_pumps,
            GroupId::FwPumps => &self.fw_pumps,
            GroupId::ErFans => &self.er_fans,
        }
    }

    pub fn group_mut(&mut self, id: GroupId) -> &mut GroupState {
        match id {
            GroupId::SwPumps => &mut self.sw_pumps,
            GroupId::FwPumps => &mut self.fw_pumps,
            GroupId::ErFans => &mut self.er_fans,
        }
    }
}

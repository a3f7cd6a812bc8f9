//! ---
//! ccs_section: "01-control-kernel"
//! ccs_subsection: "module"
//! ccs_type: "source"
//! ccs_scope: "code"
//! ccs_description: "Three-layer decision pipeline and supporting state machines."
//! ccs_version: "v0.1.0"
//! ccs_owner: "tbd"
//! ---
use std::time::Duration;

use ccs_common::config::{ControlConfig, GroupConfig};
use serde::{Deserialize, Serialize};

use crate::group::GroupState;

/// Direction of a running-count transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CountChange {
    Added,
    Removed,
}

/// Result of advancing the count machine for one group.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CountOutcome {
    pub count: u32,
    /// Possibly shed frequency after a unit was added.
    pub frequency_hz: f64,
    pub change: Option<CountChange>,
}

/// Advance the per-group count machine by one tick.
///
/// A count change requires the dwell time continuously at a frequency
/// extremum, and every change starts the cooldown during which no further
/// change is taken. Adding a unit sheds capacity from the frequency so the
/// new topology does not double up; removing one leaves the frequency for
/// the controller to re-settle.
pub fn advance(
    state: &mut GroupState,
    frequency_hz: f64,
    envelope: &GroupConfig,
    tuning: &ControlConfig,
    dt: Duration,
) -> CountOutcome {
    let dt_s = dt.as_secs_f64();
    let dwell_s = tuning.dwell.as_secs_f64();
    let mut count = state.prev_count;
    let mut frequency = frequency_hz;
    let mut change = None;

    if state.cooldown_remaining_s > 0.0 {
        state.cooldown_remaining_s = (state.cooldown_remaining_s - dt_s).max(0.0);
        state.time_at_max_s = 0.0;
        state.time_at_min_s = 0.0;
    } else if frequency >= envelope.frequency_max && count < envelope.count_max {
        state.time_at_max_s += dt_s;
        state.time_at_min_s = 0.0;
        if state.time_at_max_s >= dwell_s {
            count += 1;
            change = Some(CountChange::Added);
            state.time_at_max_s = 0.0;
            state.cooldown_remaining_s = tuning.cooldown.as_secs_f64();
            frequency = (frequency - tuning.shed_hz).max(envelope.frequency_min);
        }
    } else if frequency <= envelope.frequency_min && count > envelope.count_min {
        state.time_at_min_s += dt_s;
        state.time_at_max_s = 0.0;
        if state.time_at_min_s >= dwell_s {
            count -= 1;
            change = Some(CountChange::Removed);
            state.time_at_min_s = 0.0;
            state.cooldown_remaining_s = tuning.cooldown.as_secs_f64();
        }
    } else {
        state.time_at_max_s = 0.0;
        state.time_at_min_s = 0.0;
    }

    CountOutcome {
        count,
        frequency_hz: frequency,
        change,
    }
}

//! ---
//! ccs_section: "02-telemetry-adapters"
//! ccs_subsection: "module"
//! ccs_type: "source"
//! ccs_scope: "code"
//! ccs_description: "Telemetry model and pluggable PLC/simulation adapters."
//! ccs_version: "v0.1.0"
//! ccs_owner: "tbd"
//! ---
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Physical range accepted for any temperature channel, degrees Celsius.
pub const TEMP_RANGE_C: (f64, f64) = (-50.0, 120.0);
/// Physical range accepted for the discharge pressure channel, bar.
pub const PRESSURE_RANGE_BAR: (f64, f64) = (0.0, 10.0);
/// Engine load percentage range.
pub const LOAD_RANGE_PCT: (f64, f64) = (0.0, 100.0);

/// One of the three variable-frequency-drive groups under control.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupId {
    SwPumps,
    FwPumps,
    ErFans,
}

impl GroupId {
    pub const ALL: [GroupId; 3] = [GroupId::SwPumps, GroupId::FwPumps, GroupId::ErFans];

    pub fn as_str(&self) -> &'static str {
        match self {
            GroupId::SwPumps => "sw_pumps",
            GroupId::FwPumps => "fw_pumps",
            GroupId::ErFans => "er_fans",
        }
    }

    /// Stable index used for fixed-size per-group arrays.
    pub fn index(&self) -> usize {
        match self {
            GroupId::SwPumps => 0,
            GroupId::FwPumps => 1,
            GroupId::ErFans => 2,
        }
    }
}

impl std::fmt::Display for GroupId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Telemetry channel identifiers, used by the rolling window and predictor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    T1,
    T2,
    T3,
    T4,
    T5,
    T6,
    T7,
    Px1,
    EngineLoad,
}

impl Channel {
    pub const ALL: [Channel; 9] = [
        Channel::T1,
        Channel::T2,
        Channel::T3,
        Channel::T4,
        Channel::T5,
        Channel::T6,
        Channel::T7,
        Channel::Px1,
        Channel::EngineLoad,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::T1 => "t1",
            Channel::T2 => "t2",
            Channel::T3 => "t3",
            Channel::T4 => "t4",
            Channel::T5 => "t5",
            Channel::T6 => "t6",
            Channel::T7 => "t7",
            Channel::Px1 => "px1",
            Channel::EngineLoad => "engine_load",
        }
    }
}

/// Validation failure raised while normalising a sensor frame.
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum FrameError {
    #[error("channel {channel} is not a finite number")]
    NotFinite { channel: &'static str },
    #[error("channel {channel} value {value} outside [{min}, {max}]")]
    OutOfRange {
        channel: &'static str,
        value: f64,
        min: f64,
        max: f64,
    },
}

/// One validated sensor frame, immutable for the duration of a tick.
///
/// Channel placements: T1 seawater inlet, T2/T3 cooler seawater outlets,
/// T4 fresh-water inlet, T5 fresh-water outlet, T6 engine-room air,
/// T7 outside air, PX1 seawater discharge manifold pressure.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TelemetryFrame {
    pub timestamp: DateTime<Utc>,
    /// Strictly increasing capture timestamp on the adapter's monotonic clock.
    pub monotonic_ns: u64,
    pub t1: f64,
    pub t2: f64,
    pub t3: f64,
    pub t4: f64,
    pub t5: f64,
    pub t6: f64,
    pub t7: f64,
    pub px1_bar: f64,
    pub engine_load_pct: f64,
    /// Set by the scheduler when this frame is a reused last-good frame.
    #[serde(default)]
    pub is_stale: bool,
}

impl TelemetryFrame {
    pub fn channel(&self, channel: Channel) -> f64 {
        match channel {
            Channel::T1 => self.t1,
            Channel::T2 => self.t2,
            Channel::T3 => self.t3,
            Channel::T4 => self.t4,
            Channel::T5 => self.t5,
            Channel::T6 => self.t6,
            Channel::T7 => self.t7,
            Channel::Px1 => self.px1_bar,
            Channel::EngineLoad => self.engine_load_pct,
        }
    }

    /// Reject NaN and out-of-range channels. Called by adapters before a
    /// frame crosses into the control kernel.
    pub fn validate(&self) -> Result<(), FrameError> {
        let temps = [
            ("t1", self.t1),
            ("t2", self.t2),
            ("t3", self.t3),
            ("t4", self.t4),
            ("t5", self.t5),
            ("t6", self.t6),
            ("t7", self.t7),
        ];
        for (channel, value) in temps {
            check_range(channel, value, TEMP_RANGE_C)?;
        }
        check_range("px1", self.px1_bar, PRESSURE_RANGE_BAR)?;
        check_range("engine_load", self.engine_load_pct, LOAD_RANGE_PCT)?;
        Ok(())
    }

    /// Clone this frame as a stale stand-in with advanced capture timestamps,
    /// preserving strict timestamp monotonicity across synthesised frames.
    pub fn stale_copy(&self, monotonic_ns: u64, timestamp: DateTime<Utc>) -> TelemetryFrame {
        let mut copy = self.clone();
        copy.monotonic_ns = monotonic_ns.max(self.monotonic_ns + 1);
        copy.timestamp = timestamp;
        copy.is_stale = true;
        copy
    }

    /// Fresh-water temperature drop recovered per degree of seawater rise,
    /// as a percentage. Zero when the exchanger is not transferring heat.
    pub fn heat_exchange_efficiency(&self) -> f64 {
        let sw_rise = (self.t2 + self.t3) / 2.0 - self.t1;
        let fw_drop = self.t4 - self.t5;
        if sw_rise > 0.0 {
            (fw_drop / sw_rise * 100.0).clamp(0.0, 100.0)
        } else {
            0.0
        }
    }
}

fn check_range(channel: &'static str, value: f64, range: (f64, f64)) -> Result<(), FrameError> {
    if !value.is_finite() {
        return Err(FrameError::NotFinite { channel });
    }
    if value < range.0 || value > range.1 {
        return Err(FrameError::OutOfRange {
            channel,
            value,
            min: range.0,
            max: range.1,
        });
    }
    Ok(())
}

/// Per-group drive command.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GroupCommand {
    pub frequency_hz: f64,
    pub count: u32,
    pub reason: String,
}

/// Command frame written back to the PLC each tick.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CommandFrame {
    pub issued_at: DateTime<Utc>,
    pub tick: u64,
    pub safety_override: bool,
    pub sw_pumps: GroupCommand,
    pub fw_pumps: GroupCommand,
    pub er_fans: GroupCommand,
}

impl CommandFrame {
    pub fn group(&self, id: GroupId) -> &GroupCommand {
        match id {
            GroupId::SwPumps => &self.sw_pumps,
            GroupId::FwPumps => &self.fw_pumps,
            GroupId::ErFans => &self.er_fans,
        }
    }
}

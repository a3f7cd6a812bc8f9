//! ---
//! ccs_section: "01-control-kernel"
//! ccs_subsection: "module"
//! ccs_type: "source"
//! ccs_scope: "code"
//! ccs_description: "Three-layer decision pipeline and supporting state machines."
//! ccs_version: "v0.1.0"
//! ccs_owner: "tbd"
//! ---
use ccs_common::config::SafetyConfig;
use ccs_telemetry::frames::{GroupId, TelemetryFrame};
use serde::{Deserialize, Serialize};

/// Ordered threshold rules. Evaluation order is the declaration order and
/// the first rule to claim a group wins for that group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SafetyRule {
    /// max(T2, T3) at the cooler outlet ceiling.
    S1CoolerProtect,
    /// T4 at the fresh-water inlet ceiling.
    S2FwInletProtect,
    /// PX1 below the minimum discharge pressure: no pump slow-down.
    S3PressureFloor,
    /// T5 above the fresh-water outlet ceiling.
    S4aFwOutletHigh,
    /// T5 below the fresh-water outlet floor.
    S4bFwOutletLow,
    /// T6 at or above the engine-room emergency temperature.
    S5ErEmergency,
    /// Telemetry stale for too many consecutive ticks: hold everything.
    S6StaleHold,
}

impl SafetyRule {
    pub fn as_str(&self) -> &'static str {
        match self {
            SafetyRule::S1CoolerProtect => "S1_COOLER_PROTECT",
            SafetyRule::S2FwInletProtect => "S2_FW_INLET_PROTECT",
            SafetyRule::S3PressureFloor => "S3_PRESSURE_FLOOR",
            SafetyRule::S4aFwOutletHigh => "S4A_FW_OUTLET_HIGH",
            SafetyRule::S4bFwOutletLow => "S4B_FW_OUTLET_LOW",
            SafetyRule::S5ErEmergency => "S5_ER_EMERGENCY",
            SafetyRule::S6StaleHold => "S6_STALE_HOLD",
        }
    }
}

impl std::fmt::Display for SafetyRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Frequency action a triggered rule forces on its group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForcedFrequency {
    /// Jump to the envelope maximum; slew limits do not apply.
    Max,
    /// Jump to the envelope minimum.
    Min,
    /// Keep the previous tick's frequency.
    HoldPrev,
    /// The controller still runs, but the result may not drop below the
    /// previous tick's frequency.
    FloorPrev,
}

/// Forced action for one group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GroupOverride {
    pub rule: SafetyRule,
    pub frequency: ForcedFrequency,
    /// When set the count machine is bypassed and the running count pinned.
    pub hold_count: bool,
}

/// Result of one safety evaluation: at most one override per group.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SafetyAssessment {
    overrides: [Option<GroupOverride>; 3],
}

impl SafetyAssessment {
    pub fn group(&self, id: GroupId) -> Option<&GroupOverride> {
        self.overrides[id.index()].as_ref()
    }

    pub fn any(&self) -> bool {
        self.overrides.iter().any(Option::is_some)
    }

    fn claim(&mut self, id: GroupId, rule: SafetyRule, frequency: ForcedFrequency, hold: bool) {
        let slot = &mut self.overrides[id.index()];
        if slot.is_none() {
            *slot = Some(GroupOverride {
                rule,
                frequency,
                hold_count: hold,
            });
        }
    }
}

/// Evaluate the rule table against the latest frame.
///
/// Pure function of its arguments and allocation-free, so it can sit on the
/// hot path and be replayed in property tests. `stale_ticks` counts
/// consecutive ticks served from a reused last-good frame.
pub fn evaluate(
    frame: &TelemetryFrame,
    config: &SafetyConfig,
    stale_ticks: u32,
) -> SafetyAssessment {
    let mut assessment = SafetyAssessment::default();

    // S1: cooler seawater outlet overheating.
    if frame.t2.max(frame.t3) >= config.cooler_outlet_limit {
        assessment.claim(
            GroupId::SwPumps,
            SafetyRule::S1CoolerProtect,
            ForcedFrequency::Max,
            false,
        );
    }

    // S2: fresh-water inlet ceiling.
    if frame.t4 >= config.fw_inlet_limit {
        assessment.claim(
            GroupId::FwPumps,
            SafetyRule::S2FwInletProtect,
            ForcedFrequency::Max,
            false,
        );
    }

    // S3: suction/discharge pressure floor on both pump groups.
    if frame.px1_bar < config.min_discharge_pressure {
        assessment.claim(
            GroupId::SwPumps,
            SafetyRule::S3PressureFloor,
            ForcedFrequency::FloorPrev,
            false,
        );
        assessment.claim(
            GroupId::FwPumps,
            SafetyRule::S3PressureFloor,
            ForcedFrequency::FloorPrev,
            false,
        );
    }

    // S4: fresh-water outlet band, acted on through the seawater pumps.
    if frame.t5 > config.fw_outlet_high {
        assessment.claim(
            GroupId::SwPumps,
            SafetyRule::S4aFwOutletHigh,
            ForcedFrequency::Max,
            false,
        );
    } else if frame.t5 < config.fw_outlet_low {
        assessment.claim(
            GroupId::SwPumps,
            SafetyRule::S4bFwOutletLow,
            ForcedFrequency::Min,
            false,
        );
    }

    // S5: engine-room emergency temperature.
    if frame.t6 >= config.er_emergency {
        assessment.claim(
            GroupId::ErFans,
            SafetyRule::S5ErEmergency,
            ForcedFrequency::Max,
            false,
        );
    }

    // S6: stale telemetry; freeze every group that is still unclaimed.
    if stale_ticks >= config.stale_hold_ticks {
        for id in GroupId::ALL {
            assessment.claim(id, SafetyRule::S6StaleHold, ForcedFrequency::HoldPrev, true);
        }
    }

    assessment
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn frame() -> TelemetryFrame {
        TelemetryFrame {
            timestamp: Utc::now(),
            monotonic_ns: 1,
            t1: 25.0,
            t2: 35.0,
            t3: 35.0,
            t4: 45.0,
            t5: 35.0,
            t6: 43.0,
            t7: 38.0,
            px1_bar: 2.0,
            engine_load_pct: 60.0,
            is_stale: false,
        }
    }

    fn config() -> SafetyConfig {
        SafetyConfig::default()
    }

    #[test]
    fn nominal_frame_triggers_nothing() {
        let assessment = evaluate(&frame(), &config(), 0);
        assert!(!assessment.any());
    }

    #[test]
    fn s1_fires_exactly_at_the_limit() {
        let mut hot = frame();
        hot.t3 = 49.0;
        let assessment = evaluate(&hot, &config(), 0);
        let forced = assessment.group(GroupId::SwPumps).unwrap();
        assert_eq!(forced.rule, SafetyRule::S1CoolerProtect);
        assert_eq!(forced.frequency, ForcedFrequency::Max);

        hot.t3 = 48.99;
        assert!(evaluate(&hot, &config(), 0).group(GroupId::SwPumps).is_none());
    }

    #[test]
    fn s2_forces_fw_pumps_to_max() {
        let mut hot = frame();
        hot.t4 = 48.0;
        let assessment = evaluate(&hot, &config(), 0);
        let forced = assessment.group(GroupId::FwPumps).unwrap();
        assert_eq!(forced.rule, SafetyRule::S2FwInletProtect);
        assert_eq!(forced.frequency, ForcedFrequency::Max);
        assert!(!forced.hold_count);
    }

    #[test]
    fn s3_floors_both_pump_groups() {
        let mut low = frame();
        low.px1_bar = 0.8;
        let assessment = evaluate(&low, &config(), 0);
        for id in [GroupId::SwPumps, GroupId::FwPumps] {
            let forced = assessment.group(id).unwrap();
            assert_eq!(forced.rule, SafetyRule::S3PressureFloor);
            assert_eq!(forced.frequency, ForcedFrequency::FloorPrev);
        }
        assert!(assessment.group(GroupId::ErFans).is_none());
    }

    #[test]
    fn s1_outranks_s3_for_the_seawater_pumps() {
        let mut bad = frame();
        bad.t2 = 50.0;
        bad.px1_bar = 0.5;
        let assessment = evaluate(&bad, &config(), 0);
        assert_eq!(
            assessment.group(GroupId::SwPumps).unwrap().rule,
            SafetyRule::S1CoolerProtect
        );
        assert_eq!(
            assessment.group(GroupId::FwPumps).unwrap().rule,
            SafetyRule::S3PressureFloor
        );
    }

    #[test]
    fn s4_band_forces_min_or_max() {
        let mut hot = frame();
        hot.t5 = 40.5;
        assert_eq!(
            evaluate(&hot, &config(), 0)
                .group(GroupId::SwPumps)
                .unwrap()
                .frequency,
            ForcedFrequency::Max
        );

        let mut cold = frame();
        cold.t5 = 29.5;
        assert_eq!(
            evaluate(&cold, &config(), 0)
                .group(GroupId::SwPumps)
                .unwrap()
                .frequency,
            ForcedFrequency::Min
        );
    }

    #[test]
    fn s5_fires_at_the_emergency_threshold() {
        let mut hot = frame();
        hot.t6 = 45.0;
        let assessment = evaluate(&hot, &config(), 0);
        let forced = assessment.group(GroupId::ErFans).unwrap();
        assert_eq!(forced.rule, SafetyRule::S5ErEmergency);
        assert_eq!(forced.frequency, ForcedFrequency::Max);
    }

    #[test]
    fn s6_holds_every_unclaimed_group() {
        let mut hot = frame();
        hot.t6 = 46.0;
        let assessment = evaluate(&hot, &config(), 2);
        // S5 claimed the fans first; the pumps fall to the stale hold.
        assert_eq!(
            assessment.group(GroupId::ErFans).unwrap().rule,
            SafetyRule::S5ErEmergency
        );
        for id in [GroupId::SwPumps, GroupId::FwPumps] {
            let forced = assessment.group(id).unwrap();
            assert_eq!(forced.rule, SafetyRule::S6StaleHold);
            assert_eq!(forced.frequency, ForcedFrequency::HoldPrev);
            assert!(forced.hold_count);
        }
    }

    #[test]
    fn evaluation_is_pure() {
        let mut hot = frame();
        hot.t6 = 45.5;
        hot.px1_bar = 0.9;
        let first = evaluate(&hot, &config(), 1);
        let second = evaluate(&hot, &config(), 1);
        assert_eq!(first, second);
    }
}

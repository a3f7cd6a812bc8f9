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

use ccs_common::config::{GroupConfig, SupervisorConfig};
use ccs_telemetry::frames::{Channel, GroupId, TelemetryFrame};
use chrono::Utc;

use crate::counts::{self, CountChange};
use crate::decision::{Decision, GroupDecision};
use crate::feedback::{self, FeedbackInput};
use crate::group::GroupStates;
use crate::predictor::Prediction;
use crate::safety::{self, ForcedFrequency, SafetyRule};

const RULE_FEEDBACK: &str = "FEEDBACK_V3";
const RULE_DEGRADED: &str = "DEGRADED_HOLD";
const RULE_COUNT: &str = "COUNT_MACHINE";

/// Per-tick inputs that are not telemetry.
#[derive(Debug, Clone, Copy)]
pub struct TickContext<'a> {
    pub config: &'a SupervisorConfig,
    pub tick: u64,
    /// Elapsed control time represented by this tick.
    pub dt: Duration,
    /// Consecutive ticks served from a reused last-good frame.
    pub stale_ticks: u32,
    /// Deadline-miss degraded mode: safety only, targets frozen.
    pub degraded: bool,
}

/// Side observations the scheduler publishes to the event sink.
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineNote {
    RuleActivated {
        group: GroupId,
        rule: SafetyRule,
    },
    CountChanged {
        group: GroupId,
        change: CountChange,
        count: u32,
    },
    PrevOutOfEnvelope {
        group: GroupId,
        prev_hz: f64,
    },
}

/// Control channel regulated for each group.
fn control_channel(group: GroupId) -> Channel {
    match group {
        GroupId::SwPumps => Channel::T5,
        GroupId::FwPumps => Channel::T4,
        GroupId::ErFans => Channel::T6,
    }
}

fn group_config(config: &SupervisorConfig, group: GroupId) -> &GroupConfig {
    match group {
        GroupId::SwPumps => &config.groups.sw_pumps,
        GroupId::FwPumps => &config.groups.fw_pumps,
        GroupId::ErFans => &config.groups.er_fans,
    }
}

/// Run the three-layer pipeline for one tick: safety override, then
/// predictive-feedback regulation for unforced groups, then the count
/// machine. Mutates `states` to the post-tick values the next tick starts
/// from.
pub fn decide(
    ctx: &TickContext<'_>,
    frame: &TelemetryFrame,
    prediction: Option<&Prediction>,
    states: &mut GroupStates,
) -> (Decision, Vec<PipelineNote>) {
    let config = ctx.config;
    let assessment = safety::evaluate(frame, &config.safety, ctx.stale_ticks);
    let mut notes = Vec::new();
    let mut used_prediction = false;

    let confident = prediction.filter(|p| p.confidence >= config.control.confidence_threshold);

    let mut build_group = |group: GroupId, states: &mut GroupStates| -> GroupDecision {
        let envelope = group_config(config, group);
        let state = states.group_mut(group);
        let prev_hz = state.prev_frequency_hz;
        let forced = assessment.group(group).copied();

        let mut applied_rules: Vec<String> = Vec::new();
        let mut mode = None;
        let mut reason;
        let mut frequency_hz;
        let mut skip_counts = ctx.degraded;

        let run_feedback = |used_prediction: &mut bool,
                            notes: &mut Vec<PipelineNote>|
         -> feedback::FeedbackOutput {
            let channel = control_channel(group);
            let predicted_temp = confident.and_then(|p| p.five_min(channel));
            let output = feedback::regulate(FeedbackInput {
                current_temp: frame.channel(channel),
                target_temp: envelope.target_temp_c,
                predicted_temp,
                prev_frequency_hz: prev_hz,
                envelope,
                tuning: &config.control,
            });
            if output.used_prediction {
                *used_prediction = true;
            }
            if output.prev_was_clamped {
                notes.push(PipelineNote::PrevOutOfEnvelope { group, prev_hz });
            }
            output
        };

        match forced {
            Some(forced_action) => {
                notes.push(PipelineNote::RuleActivated {
                    group,
                    rule: forced_action.rule,
                });
                applied_rules.push(forced_action.rule.as_str().to_owned());
                skip_counts = skip_counts || forced_action.hold_count;

                match forced_action.frequency {
                    ForcedFrequency::Max => {
                        frequency_hz = envelope.frequency_max;
                        reason = format!(
                            "{}: forced to {:.0} Hz",
                            forced_action.rule, envelope.frequency_max
                        );
                    }
                    ForcedFrequency::Min => {
                        frequency_hz = envelope.frequency_min;
                        reason = format!(
                            "{}: forced to {:.0} Hz",
                            forced_action.rule, envelope.frequency_min
                        );
                    }
                    ForcedFrequency::HoldPrev => {
                        frequency_hz = prev_hz;
                        reason = format!("{}: holding {:.1} Hz", forced_action.rule, prev_hz);
                    }
                    ForcedFrequency::FloorPrev => {
                        if ctx.degraded {
                            frequency_hz = prev_hz;
                            reason =
                                format!("{}: degraded, holding {:.1} Hz", forced_action.rule, prev_hz);
                        } else {
                            let output = run_feedback(&mut used_prediction, &mut notes);
                            mode = Some(output.mode);
                            applied_rules.push(RULE_FEEDBACK.to_owned());
                            frequency_hz = output.frequency_hz.max(prev_hz);
                            reason = format!(
                                "{}: slow-down refused, {:.1} Hz",
                                forced_action.rule, frequency_hz
                            );
                        }
                    }
                }
            }
            None if ctx.degraded => {
                frequency_hz = prev_hz;
                applied_rules.push(RULE_DEGRADED.to_owned());
                reason = format!("degraded: holding {:.1} Hz", prev_hz);
            }
            None => {
                let channel = control_channel(group);
                let output = run_feedback(&mut used_prediction, &mut notes);
                mode = Some(output.mode);
                applied_rules.push(RULE_FEEDBACK.to_owned());
                frequency_hz = output.frequency_hz;
                reason = format!(
                    "{} {:.1} C vs target {:.1} C",
                    channel.as_str(),
                    frame.channel(channel),
                    envelope.target_temp_c
                );
            }
        }

        let mut count = state.prev_count;
        if !skip_counts {
            let outcome = counts::advance(state, frequency_hz, envelope, &config.control, ctx.dt);
            if let Some(change) = outcome.change {
                notes.push(PipelineNote::CountChanged {
                    group,
                    change,
                    count: outcome.count,
                });
                applied_rules.push(RULE_COUNT.to_owned());
                let verb = match change {
                    CountChange::Added => "unit added",
                    CountChange::Removed => "unit removed",
                };
                reason = format!("{}; {} ({} running)", reason, verb, outcome.count);
            }
            count = outcome.count;
            frequency_hz = outcome.frequency_hz;
        }

        state.prev_frequency_hz = frequency_hz;
        state.prev_count = count;

        GroupDecision {
            group,
            frequency_hz,
            count,
            mode,
            applied_rules,
            reason,
            estimated_kw: GroupDecision::power_estimate_kw(envelope, frequency_hz, count),
        }
    };

    let sw_pumps = build_group(GroupId::SwPumps, states);
    let fw_pumps = build_group(GroupId::FwPumps, states);
    let er_fans = build_group(GroupId::ErFans, states);

    let decision = Decision {
        tick: ctx.tick,
        decided_at: Utc::now(),
        safety_override: assessment.any(),
        used_prediction,
        sw_pumps,
        fw_pumps,
        er_fans,
    };
    (decision, notes)
}

/// Fixed manual mode: every group pinned at its envelope maximum with the
/// running counts left alone.
pub fn manual_decision(config: &SupervisorConfig, states: &mut GroupStates, tick: u64) -> Decision {
    direct_decision(config, states, tick, "manual fixed 60 Hz", |envelope, _| {
        envelope.frequency_max
    })
}

/// Safe hold: previous frequency and count for every group. Used for the
/// operator safe-hold mode, the shutdown command, and the bug guard.
pub fn hold_decision(
    config: &SupervisorConfig,
    states: &mut GroupStates,
    tick: u64,
    reason: &str,
) -> Decision {
    direct_decision(config, states, tick, reason, |_, prev_hz| prev_hz)
}

fn direct_decision(
    config: &SupervisorConfig,
    states: &mut GroupStates,
    tick: u64,
    reason: &str,
    frequency: impl Fn(&GroupConfig, f64) -> f64,
) -> Decision {
    let mut build = |group: GroupId| -> GroupDecision {
        let envelope = group_config(config, group);
        let state = states.group_mut(group);
        let frequency_hz = frequency(envelope, state.prev_frequency_hz)
            .clamp(envelope.frequency_min, envelope.frequency_max);
        state.prev_frequency_hz = frequency_hz;
        GroupDecision {
            group,
            frequency_hz,
            count: state.prev_count,
            mode: None,
            applied_rules: Vec::new(),
            reason: reason.to_owned(),
            estimated_kw: GroupDecision::power_estimate_kw(
                envelope,
                frequency_hz,
                state.prev_count,
            ),
        }
    };
    Decision {
        tick,
        decided_at: Utc::now(),
        safety_override: false,
        used_prediction: false,
        sw_pumps: build(GroupId::SwPumps),
        fw_pumps: build(GroupId::FwPumps),
        er_fans: build(GroupId::ErFans),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::group::GroupStates;

    fn config() -> SupervisorConfig {
        SupervisorConfig::default()
    }

    fn frame() -> TelemetryFrame {
        TelemetryFrame {
            timestamp: Utc::now(),
            monotonic_ns: 1,
            t1: 25.0,
            t2: 35.0,
            t3: 35.0,
            t4: 41.0,
            t5: 35.0,
            t6: 43.0,
            t7: 38.0,
            px1_bar: 2.0,
            engine_load_pct: 60.0,
            is_stale: false,
        }
    }

    fn ctx(config: &SupervisorConfig) -> TickContext<'_> {
        TickContext {
            config,
            tick: 1,
            dt: Duration::from_secs(2),
            stale_ticks: 0,
            degraded: false,
        }
    }

    #[test]
    fn on_target_frame_is_stable_everywhere() {
        let config = config();
        let mut states = GroupStates::initial(&config.groups);
        let (decision, notes) = decide(&ctx(&config), &frame(), None, &mut states);
        assert!(!decision.safety_override);
        assert!(!decision.used_prediction);
        for id in GroupId::ALL {
            assert_eq!(decision.group(id).mode, Some(crate::ControlMode::Stable));
            assert_eq!(decision.group(id).frequency_hz, 48.0);
        }
        assert!(notes.is_empty());
    }

    #[test]
    fn emergency_overrides_bypass_the_controller() {
        let config = config();
        let mut states = GroupStates::initial(&config.groups);
        let mut hot = frame();
        hot.t6 = 46.0;
        let (decision, notes) = decide(&ctx(&config), &hot, None, &mut states);
        assert!(decision.safety_override);
        assert_eq!(decision.er_fans.frequency_hz, 60.0);
        assert_eq!(decision.er_fans.mode, None);
        assert!(decision
            .er_fans
            .applied_rules
            .contains(&"S5_ER_EMERGENCY".to_owned()));
        assert!(notes.iter().any(|n| matches!(
            n,
            PipelineNote::RuleActivated {
                group: GroupId::ErFans,
                rule: SafetyRule::S5ErEmergency
            }
        )));
        // Unforced groups still ran the controller.
        assert!(decision.sw_pumps.mode.is_some());
    }

    #[test]
    fn pressure_floor_inhibits_slow_down_but_not_speed_up() {
        let config = config();
        let mut states = GroupStates::initial(&config.groups);
        // Cold T5 would normally slow the seawater pumps down.
        let mut low = frame();
        low.t5 = 34.0;
        low.px1_bar = 0.8;
        let (decision, _) = decide(&ctx(&config), &low, None, &mut states);
        assert!(decision.safety_override);
        assert_eq!(decision.sw_pumps.frequency_hz, 48.0);

        // A hot T5 under the same pressure fault still raises frequency.
        let mut states = GroupStates::initial(&config.groups);
        let mut hot = frame();
        hot.t5 = 38.0;
        hot.px1_bar = 0.8;
        let (decision, _) = decide(&ctx(&config), &hot, None, &mut states);
        assert!(decision.sw_pumps.frequency_hz > 48.0);
    }

    #[test]
    fn confident_prediction_engages_the_predictive_path() {
        let config = config();
        let mut states = GroupStates::initial(&config.groups);
        let prediction = Prediction {
            at: Utc::now(),
            t4: [41.0; 3],
            t5: [35.0; 3],
            t6: [45.5, 45.8, 46.0],
            confidence: 0.8,
            inference_ms: 1.0,
        };
        let (decision, _) = decide(&ctx(&config), &frame(), Some(&prediction), &mut states);
        assert!(decision.used_prediction);
        // Forecast 2.5 degrees hot with weights (0.2, 0.8): +5 Hz slew.
        assert_eq!(decision.er_fans.frequency_hz, 53.0);
    }

    #[test]
    fn low_confidence_prediction_is_ignored() {
        let config = config();
        let mut states = GroupStates::initial(&config.groups);
        let prediction = Prediction {
            at: Utc::now(),
            t4: [41.0; 3],
            t5: [35.0; 3],
            t6: [46.0; 3],
            confidence: 0.4,
            inference_ms: 1.0,
        };
        let (decision, _) = decide(&ctx(&config), &frame(), Some(&prediction), &mut states);
        assert!(!decision.used_prediction);
        assert_eq!(decision.er_fans.frequency_hz, 48.0);
    }

    #[test]
    fn degraded_mode_freezes_unforced_groups() {
        let config = config();
        let mut states = GroupStates::initial(&config.groups);
        let mut context = ctx(&config);
        context.degraded = true;
        let mut hot = frame();
        hot.t6 = 44.5;
        let (decision, _) = decide(&context, &hot, None, &mut states);
        for id in GroupId::ALL {
            assert_eq!(decision.group(id).frequency_hz, 48.0);
            assert!(decision.group(id).applied_rules.contains(&RULE_DEGRADED.to_owned()));
        }
    }

    #[test]
    fn degraded_mode_still_honours_safety() {
        let config = config();
        let mut states = GroupStates::initial(&config.groups);
        let mut context = ctx(&config);
        context.degraded = true;
        let mut hot = frame();
        hot.t6 = 46.0;
        let (decision, _) = decide(&context, &hot, None, &mut states);
        assert_eq!(decision.er_fans.frequency_hz, 60.0);
        assert!(decision.safety_override);
    }

    #[test]
    fn stale_hold_pins_frequency_and_count() {
        let config = config();
        let mut states = GroupStates::initial(&config.groups);
        let mut context = ctx(&config);
        context.stale_ticks = 2;
        let mut stale = frame();
        stale.is_stale = true;
        stale.t6 = 46.0;
        let (decision, _) = decide(&context, &stale, None, &mut states);
        // S5 still outranks the stale hold for the fans.
        assert_eq!(decision.er_fans.frequency_hz, 60.0);
        assert_eq!(decision.sw_pumps.frequency_hz, 48.0);
        assert_eq!(decision.sw_pumps.count, 2);
        assert!(decision
            .sw_pumps
            .applied_rules
            .contains(&"S6_STALE_HOLD".to_owned()));
    }

    #[test]
    fn identical_inputs_and_state_produce_identical_decisions() {
        let config = config();
        let mut states_a = GroupStates::initial(&config.groups);
        let mut states_b = GroupStates::initial(&config.groups);
        let input = frame();
        let (a, _) = decide(&ctx(&config), &input, None, &mut states_a);
        let (b, _) = decide(&ctx(&config), &input, None, &mut states_b);
        assert_eq!(a.sw_pumps.frequency_hz, b.sw_pumps.frequency_hz);
        assert_eq!(a.er_fans.count, b.er_fans.count);
        assert_eq!(states_a, states_b);
    }

    #[test]
    fn manual_decision_pins_the_envelope_maximum() {
        let config = config();
        let mut states = GroupStates::initial(&config.groups);
        let decision = manual_decision(&config, &mut states, 9);
        for id in GroupId::ALL {
            assert_eq!(decision.group(id).frequency_hz, 60.0);
        }
        assert_eq!(states.er_fans.prev_frequency_hz, 60.0);
        assert_eq!(decision.er_fans.count, 3);
    }

    #[test]
    fn hold_decision_keeps_previous_values() {
        let config = config();
        let mut states = GroupStates::initial(&config.groups);
        states.sw_pumps.prev_frequency_hz = 51.5;
        let decision = hold_decision(&config, &mut states, 9, "shutdown safe hold");
        assert_eq!(decision.sw_pumps.frequency_hz, 51.5);
        assert_eq!(decision.sw_pumps.reason, "shutdown safe hold");
    }
}

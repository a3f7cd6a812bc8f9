//! ---
//! ccs_section: "01-control-kernel"
//! ccs_subsection: "module"
//! ccs_type: "source"
//! ccs_scope: "code"
//! ccs_description: "Three-layer decision pipeline and supporting state machines."
//! ccs_version: "v0.1.0"
//! ccs_owner: "tbd"
//! ---
use ccs_common::config::{ControlConfig, GroupConfig};

use crate::decision::ControlMode;

/// Inputs to one group's regulation step.
#[derive(Debug, Clone, Copy)]
pub struct FeedbackInput<'a> {
    pub current_temp: f64,
    pub target_temp: f64,
    /// Five-minute forecast for the group's control channel, already gated
    /// on the confidence threshold. `None` disables the predictive path.
    pub predicted_temp: Option<f64>,
    pub prev_frequency_hz: f64,
    pub envelope: &'a GroupConfig,
    pub tuning: &'a ControlConfig,
}

/// Result of one regulation step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FeedbackOutput {
    pub frequency_hz: f64,
    pub mode: ControlMode,
    pub used_prediction: bool,
    pub combined_error: f64,
    /// Set when the supplied previous frequency violated the envelope and
    /// had to be clamped before use.
    pub prev_was_clamped: bool,
}

/// Weighted proportional regulation on (current, predicted) error.
///
/// Deterministic: identical inputs produce identical outputs, which the
/// scheduler relies on when replaying a tick after a degraded interval.
pub fn regulate(input: FeedbackInput<'_>) -> FeedbackOutput {
    let envelope = input.envelope;
    let tuning = input.tuning;

    let prev = input
        .prev_frequency_hz
        .clamp(envelope.frequency_min, envelope.frequency_max);
    let prev_was_clamped = prev != input.prev_frequency_hz;

    let current_error = input.current_temp - input.target_temp;
    let (predicted_error, used_prediction) = match input.predicted_temp {
        Some(predicted) => (predicted - input.target_temp, true),
        None => (current_error, false),
    };

    let weights = &tuning.weights;
    let (w_current, w_predicted) = if predicted_error.abs() > weights.predicted_error_threshold {
        weights.predicted_dominant
    } else if current_error.abs() > weights.current_error_threshold {
        weights.current_dominant
    } else {
        weights.balanced
    };

    let combined_error = w_current * current_error + w_predicted * predicted_error;
    let adjustment = (tuning.proportional_gain * combined_error)
        .clamp(-tuning.slew_max_hz, tuning.slew_max_hz);
    let frequency_hz = (prev + adjustment).clamp(envelope.frequency_min, envelope.frequency_max);

    let mode = if combined_error.abs() < tuning.stable_band {
        ControlMode::Stable
    } else if combined_error > 0.0 {
        ControlMode::Cooling
    } else {
        ControlMode::EnergySaving
    };

    FeedbackOutput {
        frequency_hz,
        mode,
        used_prediction,
        combined_error,
        prev_was_clamped,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ccs_common::config::GroupsConfig;

    fn envelope() -> GroupConfig {
        GroupsConfig::default().er_fans
    }

    fn tuning() -> ControlConfig {
        ControlConfig::default()
    }

    fn input<'a>(
        envelope: &'a GroupConfig,
        tuning: &'a ControlConfig,
        current: f64,
        predicted: Option<f64>,
        prev: f64,
    ) -> FeedbackInput<'a> {
        FeedbackInput {
            current_temp: current,
            target_temp: 43.0,
            predicted_temp: predicted,
            prev_frequency_hz: prev,
            envelope,
            tuning,
        }
    }

    #[test]
    fn on_target_is_stable_and_keeps_frequency() {
        let envelope = envelope();
        let tuning = tuning();
        let out = regulate(input(&envelope, &tuning, 43.0, None, 48.0));
        assert_eq!(out.mode, ControlMode::Stable);
        assert_eq!(out.frequency_hz, 48.0);
        assert!(!out.used_prediction);
    }

    #[test]
    fn hot_error_raises_frequency_within_the_slew_limit() {
        let envelope = envelope();
        let tuning = tuning();
        // 3 degrees hot: K_p * e = 9 Hz, clamped to the 5 Hz slew.
        let out = regulate(input(&envelope, &tuning, 46.0, None, 48.0));
        assert_eq!(out.frequency_hz, 53.0);
        assert_eq!(out.mode, ControlMode::Cooling);
    }

    #[test]
    fn cold_error_reduces_frequency() {
        let envelope = envelope();
        let tuning = tuning();
        let out = regulate(input(&envelope, &tuning, 42.0, None, 48.0));
        assert!(out.frequency_hz < 48.0);
        assert_eq!(out.mode, ControlMode::EnergySaving);
    }

    #[test]
    fn large_predicted_error_dominates_the_blend() {
        let envelope = envelope();
        let tuning = tuning();
        // Current on target, forecast 2.5 degrees hot: weights (0.2, 0.8).
        let out = regulate(input(&envelope, &tuning, 43.0, Some(45.5), 48.0));
        assert!(out.used_prediction);
        let expected_error = 0.2 * 0.0 + 0.8 * 2.5;
        assert!((out.combined_error - expected_error).abs() < 1e-9);
        assert_eq!(out.frequency_hz, 53.0);
    }

    #[test]
    fn moderate_current_error_uses_the_current_dominant_pair() {
        let envelope = envelope();
        let tuning = tuning();
        // e_c = 1.5, e_p = 0.5: |e_p| <= 2 and |e_c| > 1.
        let out = regulate(input(&envelope, &tuning, 44.5, Some(43.5), 48.0));
        let expected_error = 0.6 * 1.5 + 0.4 * 0.5;
        assert!((out.combined_error - expected_error).abs() < 1e-9);
    }

    #[test]
    fn envelope_bounds_are_never_violated() {
        let envelope = envelope();
        let tuning = tuning();
        let hot = regulate(input(&envelope, &tuning, 60.0, None, 59.0));
        assert_eq!(hot.frequency_hz, 60.0);
        let cold = regulate(input(&envelope, &tuning, 30.0, None, 41.0));
        assert_eq!(cold.frequency_hz, 40.0);
    }

    #[test]
    fn out_of_envelope_previous_frequency_is_clamped_and_flagged() {
        let envelope = envelope();
        let tuning = tuning();
        let out = regulate(input(&envelope, &tuning, 43.0, None, 72.0));
        assert!(out.prev_was_clamped);
        assert!(out.frequency_hz <= 60.0);
    }

    #[test]
    fn identical_inputs_produce_identical_outputs() {
        let envelope = envelope();
        let tuning = tuning();
        let a = regulate(input(&envelope, &tuning, 44.2, Some(45.1), 51.0));
        let b = regulate(input(&envelope, &tuning, 44.2, Some(45.1), 51.0));
        assert_eq!(a, b);
    }
}

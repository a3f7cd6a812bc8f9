//! ---
//! ccs_section: "01-control-kernel"
//! ccs_subsection: "module"
//! ccs_type: "source"
//! ccs_scope: "code"
//! ccs_description: "Three-layer decision pipeline and supporting state machines."
//! ccs_version: "v0.1.0"
//! ccs_owner: "tbd"
//! ---
use std::path::Path;
use std::time::Instant;

use ccs_telemetry::frames::Channel;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::window::SequenceWindow;

/// Forecast horizons, minutes ahead of the newest window sample.
pub const HORIZONS_MIN: [u32; 3] = [5, 10, 15];

/// Feature vector width consumed by the artefact.
const FEATURES: usize = 17;
/// Width after degree-2 expansion: squares plus three load cross terms.
const POLY_FEATURES: usize = FEATURES * 2 + 3;
const ARTEFACT_VERSION: u16 = 1;

/// Short-horizon temperature forecast for the three controlled channels.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub at: DateTime<Utc>,
    /// T4/T5/T6 forecasts indexed by [`HORIZONS_MIN`].
    pub t4: [f64; 3],
    pub t5: [f64; 3],
    pub t6: [f64; 3],
    /// Opaque model confidence in [0, 1]; the controller only thresholds it.
    pub confidence: f64,
    pub inference_ms: f64,
}

impl Prediction {
    /// Forecast for the given channel at the five-minute horizon, the one
    /// the feedback controller consumes.
    pub fn five_min(&self, channel: Channel) -> Option<f64> {
        match channel {
            Channel::T4 => Some(self.t4[0]),
            Channel::T5 => Some(self.t5[0]),
            Channel::T6 => Some(self.t6[0]),
            _ => None,
        }
    }
}

/// Outcome of one inference request.
#[derive(Debug, Clone, PartialEq)]
pub enum PredictOutcome {
    Ready(Prediction),
    /// No model loaded or the window is not sufficiently filled.
    Unavailable,
}

impl PredictOutcome {
    pub fn prediction(&self) -> Option<&Prediction> {
        match self {
            PredictOutcome::Ready(prediction) => Some(prediction),
            PredictOutcome::Unavailable => None,
        }
    }
}

/// Per-channel coefficient block: one vector per horizon.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelCoefficients(pub [Vec<f64>; 3]);

/// Degree-2 polynomial regression artefact. The byte format is the
/// predictor's private concern; the rest of the system treats the file as an
/// opaque blob and only observes whether loading succeeded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolynomialModel {
    pub version: u16,
    pub feature_mean: Vec<f64>,
    pub feature_std: Vec<f64>,
    pub confidence: f64,
    pub t4: ChannelCoefficients,
    pub t5: ChannelCoefficients,
    pub t6: ChannelCoefficients,
}

impl PolynomialModel {
    fn validate(&self) -> Result<(), String> {
        if self.version != ARTEFACT_VERSION {
            return Err(format!("unsupported artefact version {}", self.version));
        }
        if self.feature_mean.len() != FEATURES || self.feature_std.len() != FEATURES {
            return Err(format!(
                "normalisation width {}/{} does not match the {}-feature contract",
                self.feature_mean.len(),
                self.feature_std.len(),
                FEATURES
            ));
        }
        if !(0.0..=1.0).contains(&self.confidence) {
            return Err(format!("confidence {} outside [0, 1]", self.confidence));
        }
        for (label, block) in [("t4", &self.t4), ("t5", &self.t5), ("t6", &self.t6)] {
            for coeffs in &block.0 {
                if coeffs.len() != POLY_FEATURES {
                    return Err(format!(
                        "{} coefficient vector has width {}, expected {}",
                        label,
                        coeffs.len(),
                        POLY_FEATURES
                    ));
                }
                if coeffs.iter().any(|c| !c.is_finite()) {
                    return Err(format!("{} coefficients contain non-finite values", label));
                }
            }
        }
        if self
            .feature_std
            .iter()
            .chain(self.feature_mean.iter())
            .any(|v| !v.is_finite())
        {
            return Err("normalisation parameters contain non-finite values".into());
        }
        Ok(())
    }
}

/// Result of the start-up artefact load.
#[derive(Debug)]
pub enum LoadOutcome {
    Loaded(Box<PolynomialModel>),
    /// Null predictor in force; carries the cause for the event stream.
    Null { reason: String },
}

/// Load and validate the predictor artefact. Never fails: any problem is
/// folded into the null predictor so the supervisor keeps running under
/// feedback-only control.
pub fn load_artefact(path: Option<&Path>) -> LoadOutcome {
    let Some(path) = path else {
        return LoadOutcome::Null {
            reason: "no artefact configured".into(),
        };
    };
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(err) => {
            warn!(path = %path.display(), error = %err, "predictor artefact unreadable");
            return LoadOutcome::Null {
                reason: format!("artefact unreadable: {}", err),
            };
        }
    };
    let model: PolynomialModel = match serde_json::from_slice(&bytes) {
        Ok(model) => model,
        Err(err) => {
            warn!(path = %path.display(), error = %err, "predictor artefact undecodable");
            return LoadOutcome::Null {
                reason: format!("artefact undecodable: {}", err),
            };
        }
    };
    if let Err(reason) = model.validate() {
        warn!(path = %path.display(), reason = %reason, "predictor artefact rejected");
        return LoadOutcome::Null { reason };
    }
    info!(path = %path.display(), confidence = model.confidence, "predictor artefact loaded");
    LoadOutcome::Loaded(Box::new(model))
}

/// Stateless transform from the rolling window to a [`Prediction`].
#[derive(Debug, Default)]
pub struct TemperaturePredictor {
    model: Option<PolynomialModel>,
}

impl TemperaturePredictor {
    /// Predictor that always reports `Unavailable`.
    pub fn null() -> Self {
        Self { model: None }
    }

    pub fn from_outcome(outcome: LoadOutcome) -> Self {
        match outcome {
            LoadOutcome::Loaded(model) => Self {
                model: Some(*model),
            },
            LoadOutcome::Null { .. } => Self::null(),
        }
    }

    pub fn is_null(&self) -> bool {
        self.model.is_none()
    }

    /// Run inference against the window. `min_samples` is the 75 % fill
    /// gate; an underfilled window yields `Unavailable`.
    pub fn predict(&self, window: &SequenceWindow, min_samples: usize) -> PredictOutcome {
        let Some(model) = &self.model else {
            return PredictOutcome::Unavailable;
        };
        if window.len() < min_samples.max(1) {
            return PredictOutcome::Unavailable;
        }

        let started = Instant::now();
        let Some(features) = extract_features(window) else {
            return PredictOutcome::Unavailable;
        };

        let mut normalised = [0.0; FEATURES];
        for i in 0..FEATURES {
            let std = model.feature_std[i].abs().max(1e-8);
            normalised[i] = (features[i] - model.feature_mean[i]) / std;
        }
        let poly = expand_poly(&normalised);

        let project = |block: &ChannelCoefficients, band: (f64, f64)| -> [f64; 3] {
            let mut out = [0.0; 3];
            for (horizon, coeffs) in block.0.iter().enumerate() {
                let mut acc = 0.0;
                for (c, x) in coeffs.iter().zip(poly.iter()) {
                    acc += c * x;
                }
                out[horizon] = acc.clamp(band.0, band.1);
            }
            out
        };

        let prediction = Prediction {
            at: Utc::now(),
            t4: project(&model.t4, (20.0, 80.0)),
            t5: project(&model.t5, (20.0, 50.0)),
            t6: project(&model.t6, (30.0, 60.0)),
            confidence: model.confidence,
            inference_ms: started.elapsed().as_secs_f64() * 1_000.0,
        };
        PredictOutcome::Ready(prediction)
    }
}

/// Window statistics in the order the artefact was trained on.
fn extract_features(window: &SequenceWindow) -> Option<[f64; FEATURES]> {
    let t4 = window.stats(Channel::T4)?;
    let t5 = window.stats(Channel::T5)?;
    let t6 = window.stats(Channel::T6)?;
    let load = window.stats(Channel::EngineLoad)?;
    let t1 = window.stats(Channel::T1)?;
    let t7 = window.stats(Channel::T7)?;

    Some([
        t4.current,
        t4.mean,
        t4.std_dev,
        t4.slope_per_min,
        t5.current,
        t5.mean,
        t5.std_dev,
        t5.slope_per_min,
        t6.current,
        t6.mean,
        t6.std_dev,
        t6.slope_per_min,
        load.current,
        load.mean,
        load.slope_per_min,
        t1.mean,
        t7.mean,
    ])
}

/// First-order features, their squares, and the three load cross terms.
fn expand_poly(features: &[f64; FEATURES]) -> [f64; POLY_FEATURES] {
    let mut out = [0.0; POLY_FEATURES];
    out[..FEATURES].copy_from_slice(features);
    for i in 0..FEATURES {
        out[FEATURES + i] = features[i] * features[i];
    }
    out[FEATURES * 2] = features[0] * features[12];
    out[FEATURES * 2 + 1] = features[4] * features[12];
    out[FEATURES * 2 + 2] = features[8] * features[12];
    out
}

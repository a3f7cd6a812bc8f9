//! ---
//! ccs_section: "01-control-kernel"
//! ccs_subsection: "module"
//! ccs_type: "source"
//! ccs_scope: "code"
//! ccs_description: "Shared primitives and utilities for the supervisor runtime."
//! ccs_version: "v0.1.0"
//! ccs_owner: "tbd"
//! ---
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationMilliSeconds, DurationSeconds};
use tracing::debug;

use crate::logging::LogFormat;

fn default_backend() -> AdapterBackend {
    AdapterBackend::Simulation
}

fn default_io_deadline() -> Duration {
    Duration::from_millis(200)
}

fn default_sim_seed() -> u64 {
    0xC001u64
}

fn default_tick_period() -> Duration {
    Duration::from_secs(2)
}

fn default_proportional_gain() -> f64 {
    3.0
}

fn default_slew_max_hz() -> f64 {
    5.0
}

fn default_confidence_threshold() -> f64 {
    0.5
}

fn default_stable_band() -> f64 {
    0.3
}

fn default_dwell() -> Duration {
    Duration::from_secs(10)
}

fn default_cooldown() -> Duration {
    Duration::from_secs(30)
}

fn default_shed_hz() -> f64 {
    8.0
}

fn default_window_capacity() -> usize {
    90
}

fn default_window_stride() -> Duration {
    Duration::from_secs(20)
}

fn default_min_fill_ratio() -> f64 {
    0.75
}

fn default_cooler_outlet_limit() -> f64 {
    49.0
}

fn default_fw_inlet_limit() -> f64 {
    48.0
}

fn default_min_discharge_pressure() -> f64 {
    1.0
}

fn default_fw_outlet_high() -> f64 {
    40.0
}

fn default_fw_outlet_low() -> f64 {
    30.0
}

fn default_er_emergency() -> f64 {
    45.0
}

fn default_stale_hold_ticks() -> u32 {
    2
}

fn default_logging_directory() -> PathBuf {
    PathBuf::from("target/logs")
}

fn default_log_format() -> LogFormat {
    LogFormat::StructuredJson
}

fn default_api_enabled() -> bool {
    true
}

fn default_api_listen() -> SocketAddr {
    "127.0.0.1:8790".parse().expect("valid default api address")
}

fn default_event_log_path() -> PathBuf {
    PathBuf::from("target/events/ccs-events.log")
}

fn default_event_buffer() -> usize {
    256
}

/// Primary configuration object for the CCS supervisor. Immutable after
/// start-up; every section rejects unknown keys so stale or misspelled
/// options abort with a diagnostic instead of being silently ignored.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct SupervisorConfig {
    #[serde(default)]
    pub adapter: AdapterConfig,
    #[serde(default)]
    pub control: ControlConfig,
    #[serde(default)]
    pub safety: SafetyConfig,
    #[serde(default)]
    pub window: WindowConfig,
    #[serde(default)]
    pub groups: GroupsConfig,
    #[serde(default)]
    pub predictor: PredictorConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub events: EventSinkConfig,
}

/// Metadata describing where a [`SupervisorConfig`] was loaded from.
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub config: SupervisorConfig,
    pub source: PathBuf,
}

impl SupervisorConfig {
    pub const ENV_CONFIG_PATH: &'static str = "CCS_CONFIG";

    /// Load configuration from disk, respecting the `CCS_CONFIG` override.
    pub fn load<P: AsRef<Path>>(candidates: &[P]) -> Result<Self> {
        Ok(Self::load_with_source(candidates)?.config)
    }

    /// Load configuration from disk together with the effective source path.
    pub fn load_with_source<P: AsRef<Path>>(candidates: &[P]) -> Result<LoadedConfig> {
        if let Ok(env_path) = std::env::var(Self::ENV_CONFIG_PATH) {
            if !env_path.trim().is_empty() {
                let path = PathBuf::from(env_path);
                let config = Self::from_path(path.clone())?;
                return Ok(LoadedConfig {
                    config,
                    source: path,
                });
            }
        }

        for candidate in candidates {
            if candidate.as_ref().exists() {
                let path = candidate.as_ref().to_path_buf();
                let config = Self::from_path(path.clone())?;
                return Ok(LoadedConfig {
                    config,
                    source: path,
                });
            }
        }

        Err(anyhow!(
            "no configuration files found. inspected: {}",
            candidates
                .iter()
                .map(|p| p.as_ref().display().to_string())
                .collect::<Vec<_>>()
                .join(", ")
        ))
    }

    fn from_path(path: PathBuf) -> Result<Self> {
        debug!(config_path = %path.display(), "loading configuration");
        let contents = fs::read_to_string(&path)
            .with_context(|| format!("unable to read config file {}", path.display()))?;
        let config = toml::from_str::<SupervisorConfig>(&contents)
            .with_context(|| format!("failed to parse config file {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Minimum number of retained window samples before the predictor runs.
    pub fn predictor_min_samples(&self) -> usize {
        let wanted = (self.window.capacity as f64 * self.window.min_fill_ratio).ceil();
        (wanted as usize).max(1)
    }

    /// Validate structural invariants across sections.
    pub fn validate(&self) -> Result<()> {
        self.control.validate()?;
        self.safety.validate()?;
        self.window.validate()?;
        self.groups.validate()?;
        self.events.validate()?;
        if self.adapter.io_deadline.is_zero() {
            return Err(anyhow!("adapter io_deadline must be non-zero"));
        }
        if self.adapter.io_deadline >= self.control.tick_period {
            return Err(anyhow!(
                "adapter io_deadline ({:?}) must be shorter than the tick period ({:?})",
                self.adapter.io_deadline,
                self.control.tick_period
            ));
        }
        Ok(())
    }
}

impl std::str::FromStr for SupervisorConfig {
    type Err = anyhow::Error;

    fn from_str(content: &str) -> std::result::Result<Self, Self::Err> {
        let config: SupervisorConfig =
            toml::from_str(content).with_context(|| "failed to parse configuration")?;
        config.validate()?;
        Ok(config)
    }
}

/// Telemetry backend selection.
#[derive(Debug, Copy, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum AdapterBackend {
    /// Register-mapped programmable logic controller.
    Plc,
    /// Deterministic physics simulation.
    #[default]
    Simulation,
}

impl std::str::FromStr for AdapterBackend {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "plc" => Ok(AdapterBackend::Plc),
            "simulation" | "sim" => Ok(AdapterBackend::Simulation),
            other => Err(format!("unknown adapter backend: {}", other)),
        }
    }
}

/// Telemetry adapter settings.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AdapterConfig {
    #[serde(default = "default_backend")]
    pub backend: AdapterBackend,
    /// Hard upper bound on a single telemetry read or command write.
    #[serde(default = "default_io_deadline")]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub io_deadline: Duration,
    /// Seed for the deterministic simulation backend.
    #[serde(default = "default_sim_seed")]
    pub sim_seed: u64,
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            io_deadline: default_io_deadline(),
            sim_seed: default_sim_seed(),
        }
    }
}

/// Feedback-controller and count-machine tuning.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ControlConfig {
    #[serde(default = "default_tick_period")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub tick_period: Duration,
    /// Proportional gain in Hz per degree Celsius.
    #[serde(default = "default_proportional_gain")]
    pub proportional_gain: f64,
    /// Maximum frequency change per tick.
    #[serde(default = "default_slew_max_hz")]
    pub slew_max_hz: f64,
    /// Minimum predictor confidence before the predictive path engages.
    #[serde(default = "default_confidence_threshold")]
    pub confidence_threshold: f64,
    #[serde(default)]
    pub weights: WeightTable,
    /// Combined-error magnitude below which a group is classified stable.
    #[serde(default = "default_stable_band")]
    pub stable_band: f64,
    /// Continuous time at a frequency extremum before a count change.
    #[serde(default = "default_dwell")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub dwell: Duration,
    /// Minimum settling time after any count change.
    #[serde(default = "default_cooldown")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub cooldown: Duration,
    /// Frequency shed applied right after a unit is added.
    #[serde(default = "default_shed_hz")]
    pub shed_hz: f64,
    /// Reserved regional gain hook; accepted and validated, consumed by
    /// nothing in this release.
    #[serde(default)]
    pub region_bias_hz: f64,
}

impl ControlConfig {
    fn validate(&self) -> Result<()> {
        if self.tick_period.is_zero() {
            return Err(anyhow!("control tick_period must be non-zero"));
        }
        if self.proportional_gain <= 0.0 || !self.proportional_gain.is_finite() {
            return Err(anyhow!(
                "control proportional_gain must be positive and finite"
            ));
        }
        if self.slew_max_hz <= 0.0 || !self.slew_max_hz.is_finite() {
            return Err(anyhow!("control slew_max_hz must be positive and finite"));
        }
        if !(0.0..=1.0).contains(&self.confidence_threshold) {
            return Err(anyhow!("control confidence_threshold must be within 0..=1"));
        }
        if self.shed_hz < 0.0 || !self.shed_hz.is_finite() {
            return Err(anyhow!("control shed_hz must be non-negative"));
        }
        if !self.region_bias_hz.is_finite() {
            return Err(anyhow!("control region_bias_hz must be finite"));
        }
        self.weights.validate()
    }
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            tick_period: default_tick_period(),
            proportional_gain: default_proportional_gain(),
            slew_max_hz: default_slew_max_hz(),
            confidence_threshold: default_confidence_threshold(),
            weights: WeightTable::default(),
            stable_band: default_stable_band(),
            dwell: default_dwell(),
            cooldown: default_cooldown(),
            shed_hz: default_shed_hz(),
            region_bias_hz: 0.0,
        }
    }
}

/// Error-weighting table for the V3 control law. Each pair is
/// `(current weight, predicted weight)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WeightTable {
    /// Predicted-error magnitude above which the predicted pair applies.
    pub predicted_error_threshold: f64,
    /// Current-error magnitude above which the current pair applies.
    pub current_error_threshold: f64,
    pub predicted_dominant: (f64, f64),
    pub current_dominant: (f64, f64),
    pub balanced: (f64, f64),
}

impl WeightTable {
    fn validate(&self) -> Result<()> {
        for (label, pair) in [
            ("predicted_dominant", self.predicted_dominant),
            ("current_dominant", self.current_dominant),
            ("balanced", self.balanced),
        ] {
            if pair.0 < 0.0 || pair.1 < 0.0 || (pair.0 + pair.1 - 1.0).abs() > 1e-6 {
                return Err(anyhow!(
                    "weight pair {} must be non-negative and sum to 1.0",
                    label
                ));
            }
        }
        Ok(())
    }
}

impl Default for WeightTable {
    fn default() -> Self {
        Self {
            predicted_error_threshold: 2.0,
            current_error_threshold: 1.0,
            predicted_dominant: (0.2, 0.8),
            current_dominant: (0.6, 0.4),
            balanced: (0.4, 0.6),
        }
    }
}

/// Hard thermal and pressure limits evaluated before any optimisation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SafetyConfig {
    /// Cooler seawater-outlet ceiling applied to max(T2, T3).
    #[serde(default = "default_cooler_outlet_limit")]
    pub cooler_outlet_limit: f64,
    /// Fresh-water inlet ceiling applied to T4.
    #[serde(default = "default_fw_inlet_limit")]
    pub fw_inlet_limit: f64,
    /// Seawater discharge pressure below which pump slow-down is refused.
    #[serde(default = "default_min_discharge_pressure")]
    pub min_discharge_pressure: f64,
    /// Fresh-water outlet ceiling (T5) forcing seawater pumps to maximum.
    #[serde(default = "default_fw_outlet_high")]
    pub fw_outlet_high: f64,
    /// Fresh-water outlet floor (T5) forcing seawater pumps to minimum.
    #[serde(default = "default_fw_outlet_low")]
    pub fw_outlet_low: f64,
    /// Engine-room emergency temperature (T6).
    #[serde(default = "default_er_emergency")]
    pub er_emergency: f64,
    /// Consecutive stale telemetry ticks before all groups hold.
    #[serde(default = "default_stale_hold_ticks")]
    pub stale_hold_ticks: u32,
}

impl SafetyConfig {
    fn validate(&self) -> Result<()> {
        for (label, value) in [
            ("cooler_outlet_limit", self.cooler_outlet_limit),
            ("fw_inlet_limit", self.fw_inlet_limit),
            ("min_discharge_pressure", self.min_discharge_pressure),
            ("fw_outlet_high", self.fw_outlet_high),
            ("fw_outlet_low", self.fw_outlet_low),
            ("er_emergency", self.er_emergency),
        ] {
            if !value.is_finite() {
                return Err(anyhow!("safety threshold {} must be finite", label));
            }
        }
        if self.fw_outlet_low >= self.fw_outlet_high {
            return Err(anyhow!(
                "safety fw_outlet_low ({}) must be below fw_outlet_high ({})",
                self.fw_outlet_low,
                self.fw_outlet_high
            ));
        }
        if self.stale_hold_ticks == 0 {
            return Err(anyhow!("safety stale_hold_ticks must be at least 1"));
        }
        Ok(())
    }
}

impl Default for SafetyConfig {
    fn default() -> Self {
        Self {
            cooler_outlet_limit: default_cooler_outlet_limit(),
            fw_inlet_limit: default_fw_inlet_limit(),
            min_discharge_pressure: default_min_discharge_pressure(),
            fw_outlet_high: default_fw_outlet_high(),
            fw_outlet_low: default_fw_outlet_low(),
            er_emergency: default_er_emergency(),
            stale_hold_ticks: default_stale_hold_ticks(),
        }
    }
}

/// Rolling telemetry window settings.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WindowConfig {
    #[serde(default = "default_window_capacity")]
    pub capacity: usize,
    /// Minimum spacing between retained samples.
    #[serde(default = "default_window_stride")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub stride: Duration,
    /// Fraction of the window that must be filled before predictions run.
    #[serde(default = "default_min_fill_ratio")]
    pub min_fill_ratio: f64,
}

impl WindowConfig {
    fn validate(&self) -> Result<()> {
        if self.capacity == 0 {
            return Err(anyhow!("window capacity must be non-zero"));
        }
        if self.stride.is_zero() {
            return Err(anyhow!("window stride must be non-zero"));
        }
        if !(0.0..=1.0).contains(&self.min_fill_ratio) || self.min_fill_ratio == 0.0 {
            return Err(anyhow!("window min_fill_ratio must be within (0, 1]"));
        }
        Ok(())
    }
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            capacity: default_window_capacity(),
            stride: default_window_stride(),
            min_fill_ratio: default_min_fill_ratio(),
        }
    }
}

/// Envelope and control target for one drive group.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GroupConfig {
    pub frequency_min: f64,
    pub frequency_max: f64,
    pub count_min: u32,
    pub count_max: u32,
    /// Running-unit count assumed at start-up, before any telemetry arrives.
    pub count_initial: u32,
    pub rated_kw_per_unit: f64,
    /// Temperature the feedback controller regulates toward.
    pub target_temp_c: f64,
}

impl GroupConfig {
    fn validate(&self, label: &str) -> Result<()> {
        if !self.frequency_min.is_finite()
            || !self.frequency_max.is_finite()
            || self.frequency_min <= 0.0
            || self.frequency_min >= self.frequency_max
        {
            return Err(anyhow!(
                "group {} frequency envelope [{}, {}] is invalid",
                label,
                self.frequency_min,
                self.frequency_max
            ));
        }
        if self.count_min == 0 || self.count_min > self.count_max {
            return Err(anyhow!(
                "group {} count envelope [{}, {}] is invalid",
                label,
                self.count_min,
                self.count_max
            ));
        }
        if !(self.count_min..=self.count_max).contains(&self.count_initial) {
            return Err(anyhow!(
                "group {} count_initial {} outside envelope [{}, {}]",
                label,
                self.count_initial,
                self.count_min,
                self.count_max
            ));
        }
        if !self.rated_kw_per_unit.is_finite() || self.rated_kw_per_unit <= 0.0 {
            return Err(anyhow!("group {} rated_kw_per_unit must be positive", label));
        }
        if !self.target_temp_c.is_finite() {
            return Err(anyhow!("group {} target_temp_c must be finite", label));
        }
        Ok(())
    }
}

/// Per-group envelopes for the three drive groups.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GroupsConfig {
    #[serde(default = "GroupsConfig::default_sw_pumps")]
    pub sw_pumps: GroupConfig,
    #[serde(default = "GroupsConfig::default_fw_pumps")]
    pub fw_pumps: GroupConfig,
    #[serde(default = "GroupsConfig::default_er_fans")]
    pub er_fans: GroupConfig,
}

impl GroupsConfig {
    fn default_sw_pumps() -> GroupConfig {
        GroupConfig {
            frequency_min: 40.0,
            frequency_max: 60.0,
            count_min: 1,
            count_max: 2,
            count_initial: 2,
            rated_kw_per_unit: 132.0,
            target_temp_c: 35.0,
        }
    }

    fn default_fw_pumps() -> GroupConfig {
        GroupConfig {
            frequency_min: 40.0,
            frequency_max: 60.0,
            count_min: 1,
            count_max: 2,
            count_initial: 2,
            rated_kw_per_unit: 75.0,
            target_temp_c: 41.0,
        }
    }

    fn default_er_fans() -> GroupConfig {
        GroupConfig {
            frequency_min: 40.0,
            frequency_max: 60.0,
            count_min: 2,
            count_max: 4,
            count_initial: 3,
            rated_kw_per_unit: 54.3,
            target_temp_c: 43.0,
        }
    }

    fn validate(&self) -> Result<()> {
        self.sw_pumps.validate("sw_pumps")?;
        self.fw_pumps.validate("fw_pumps")?;
        self.er_fans.validate("er_fans")?;
        Ok(())
    }
}

impl Default for GroupsConfig {
    fn default() -> Self {
        Self {
            sw_pumps: Self::default_sw_pumps(),
            fw_pumps: Self::default_fw_pumps(),
            er_fans: Self::default_er_fans(),
        }
    }
}

/// Predictor artefact settings. An absent path selects the null predictor.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct PredictorConfig {
    #[serde(default)]
    pub artefact_path: Option<PathBuf>,
}

/// Tracing output settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    #[serde(default = "default_logging_directory")]
    pub directory: PathBuf,
    #[serde(default = "default_log_format")]
    pub format: LogFormat,
    #[serde(default)]
    pub file_prefix: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            directory: default_logging_directory(),
            format: default_log_format(),
            file_prefix: None,
        }
    }
}

/// Operator HTTP interface settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ApiConfig {
    #[serde(default = "default_api_enabled")]
    pub enabled: bool,
    #[serde(default = "default_api_listen")]
    pub listen: SocketAddr,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            enabled: default_api_enabled(),
            listen: default_api_listen(),
        }
    }
}

/// Event sink buffering and persistence settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EventSinkConfig {
    /// Append-only event log destination.
    #[serde(default = "default_event_log_path")]
    pub path: PathBuf,
    /// In-memory buffer size; the oldest record is dropped when full.
    #[serde(default = "default_event_buffer")]
    pub buffer: usize,
}

impl EventSinkConfig {
    fn validate(&self) -> Result<()> {
        if self.buffer == 0 {
            return Err(anyhow!("events buffer must be non-zero"));
        }
        Ok(())
    }
}

impl Default for EventSinkConfig {
    fn default() -> Self {
        Self {
            path: default_event_log_path(),
            buffer: default_event_buffer(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        let config = SupervisorConfig::default();
        config.validate().unwrap();
        assert_eq!(config.window.capacity, 90);
        assert_eq!(config.predictor_min_samples(), 68);
        assert_eq!(config.groups.er_fans.count_max, 4);
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let text = r#"
            [control]
            tick_period = 2
            integral_gain = 0.5
        "#;
        let err = text.parse::<SupervisorConfig>().unwrap_err();
        assert!(format!("{:#}", err).contains("integral_gain"));
    }

    #[test]
    fn invalid_envelope_is_rejected() {
        let text = r#"
            [groups.er_fans]
            frequency_min = 60.0
            frequency_max = 40.0
            count_min = 2
            count_max = 4
            count_initial = 3
            rated_kw_per_unit = 54.3
            target_temp_c = 43.0
        "#;
        assert!(text.parse::<SupervisorConfig>().is_err());
    }

    #[test]
    fn io_deadline_must_fit_inside_tick() {
        let mut config = SupervisorConfig::default();
        config.adapter.io_deadline = Duration::from_secs(3);
        assert!(config.validate().is_err());
    }

    #[test]
    fn partial_file_fills_in_defaults() {
        let text = r#"
            [adapter]
            backend = "plc"

            [safety]
            er_emergency = 46.0
        "#;
        let config: SupervisorConfig = text.parse().unwrap();
        assert_eq!(config.adapter.backend, AdapterBackend::Plc);
        assert_eq!(config.safety.er_emergency, 46.0);
        assert_eq!(config.safety.fw_inlet_limit, 48.0);
        assert_eq!(config.control.slew_max_hz, 5.0);
    }
}

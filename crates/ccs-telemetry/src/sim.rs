//! ---
//! ccs_section: "11-simulation-test-harness"
//! ccs_subsection: "module"
//! ccs_type: "source"
//! ccs_scope: "code"
//! ccs_description: "Deterministic simulation backend for the telemetry adapter."
//! ccs_version: "v0.1.0"
//! ccs_owner: "tbd"
//! ---
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use rand::prelude::*;
use rand_distr::Normal;

use crate::adapter::{AdapterError, TelemetryAdapter};
use crate::frames::{CommandFrame, TelemetryFrame, LOAD_RANGE_PCT, PRESSURE_RANGE_BAR, TEMP_RANGE_C};
use crate::physics::{PlantInputs, PlantModel, VoyagePattern};

/// Drive state the simulated plant runs with until the next command lands.
#[derive(Debug, Clone, Copy)]
struct CommandedState {
    sw_pump_hz: f64,
    sw_pump_count: u32,
    fw_pump_hz: f64,
    fw_pump_count: u32,
    er_fan_hz: f64,
    er_fan_count: u32,
}

#[derive(Debug)]
struct SimState {
    plant: PlantModel,
    commanded: CommandedState,
    rng: StdRng,
    noise: Normal<f64>,
    voyage: Option<VoyagePattern>,
    engine_load_pct: f64,
    seawater_temp_c: f64,
    ambient_temp_c: f64,
    elapsed_s: f64,
    monotonic_ns: u64,
}

/// Deterministic physics backend. Each `read_frame` advances the plant by one
/// tick period under the most recently written command, so closed-loop tests
/// exercise the full control path without a vessel attached.
pub struct SimAdapter {
    tick_period: Duration,
    state: Mutex<SimState>,
}

impl SimAdapter {
    pub fn new(seed: u64, tick_period: Duration) -> Self {
        Self {
            tick_period,
            state: Mutex::new(SimState {
                plant: PlantModel::default(),
                commanded: CommandedState {
                    sw_pump_hz: 48.0,
                    sw_pump_count: 2,
                    fw_pump_hz: 48.0,
                    fw_pump_count: 2,
                    er_fan_hz: 48.0,
                    er_fan_count: 3,
                },
                rng: StdRng::seed_from_u64(seed),
                noise: Normal::new(0.0, 0.1).expect("sigma must be positive"),
                voyage: None,
                engine_load_pct: 60.0,
                seawater_temp_c: 25.0,
                ambient_temp_c: 35.0,
                elapsed_s: 0.0,
                monotonic_ns: 0,
            }),
        }
    }

    /// Drive engine load and environment from the 24 h voyage profile instead
    /// of the fixed operating point.
    pub fn with_voyage_pattern(self, pattern: VoyagePattern) -> Self {
        self.state.lock().voyage = Some(pattern);
        self
    }

    /// Fix the operating point, for scenario tests.
    pub fn set_operating_point(&self, engine_load_pct: f64, seawater_c: f64, ambient_c: f64) {
        let mut state = self.state.lock();
        state.engine_load_pct = engine_load_pct;
        state.seawater_temp_c = seawater_c;
        state.ambient_temp_c = ambient_c;
    }

    /// Pin the engine-room temperature, for scenario injection.
    pub fn force_er_temp(&self, t6: f64) {
        self.state.lock().plant.force_er_temp(t6);
    }
}

#[async_trait]
impl TelemetryAdapter for SimAdapter {
    async fn read_frame(&self) -> Result<TelemetryFrame, AdapterError> {
        let dt_s = self.tick_period.as_secs_f64();
        let mut guard = self.state.lock();
        let state = &mut *guard;
        state.elapsed_s += dt_s;

        if let Some(voyage) = state.voyage {
            state.engine_load_pct = voyage.engine_load(state.elapsed_s);
            state.seawater_temp_c = voyage.seawater_temp(state.elapsed_s);
            state.ambient_temp_c = voyage.ambient_temp(state.elapsed_s);
        }

        let inputs = PlantInputs {
            engine_load_pct: state.engine_load_pct,
            sw_pump_count: state.commanded.sw_pump_count,
            sw_pump_hz: state.commanded.sw_pump_hz,
            fw_pump_count: state.commanded.fw_pump_count,
            fw_pump_hz: state.commanded.fw_pump_hz,
            er_fan_count: state.commanded.er_fan_count,
            er_fan_hz: state.commanded.er_fan_hz,
            seawater_temp_c: state.seawater_temp_c,
            outside_air_temp_c: state.ambient_temp_c,
        };
        let readings = state.plant.step(&inputs, dt_s);

        state.monotonic_ns += self.tick_period.as_nanos() as u64;
        let monotonic_ns = state.monotonic_ns;
        let engine_load_pct = state.engine_load_pct;

        let noise = &state.noise;
        let rng = &mut state.rng;
        let mut sample = move |value: f64, range: (f64, f64)| -> f64 {
            (value + noise.sample(&mut *rng)).clamp(range.0, range.1)
        };

        let frame = TelemetryFrame {
            timestamp: Utc::now(),
            monotonic_ns,
            t1: sample(readings.t1, TEMP_RANGE_C),
            t2: sample(readings.t2, TEMP_RANGE_C),
            t3: sample(readings.t3, TEMP_RANGE_C),
            t4: sample(readings.t4, TEMP_RANGE_C),
            t5: sample(readings.t5, TEMP_RANGE_C),
            t6: sample(readings.t6, TEMP_RANGE_C),
            t7: sample(readings.t7, TEMP_RANGE_C),
            px1_bar: sample(readings.px1_bar, PRESSURE_RANGE_BAR),
            engine_load_pct: engine_load_pct.clamp(LOAD_RANGE_PCT.0, LOAD_RANGE_PCT.1),
            is_stale: false,
        };
        frame.validate()?;
        Ok(frame)
    }

    async fn write_command(&self, command: &CommandFrame) -> Result<(), AdapterError> {
        let mut state = self.state.lock();
        state.commanded = CommandedState {
            sw_pump_hz: command.sw_pumps.frequency_hz,
            sw_pump_count: command.sw_pumps.count,
            fw_pump_hz: command.fw_pumps.frequency_hz,
            fw_pump_count: command.fw_pumps.count,
            er_fan_hz: command.er_fans.frequency_hz,
            er_fan_count: command.er_fans.count,
        };
        Ok(())
    }
}

//! ---
//! ccs_section: "11-simulation-test-harness"
//! ccs_subsection: "module"
//! ccs_type: "source"
//! ccs_scope: "code"
//! ccs_description: "Physics plant model backing the simulation adapter."
//! ccs_version: "v0.1.0"
//! ccs_owner: "tbd"
//! ---
use std::f64::consts::PI;

/// Counter-flow plate exchanger parameters for the LT fresh-water coolers.
#[derive(Debug, Clone, Copy)]
pub struct HeatExchangerParams {
    /// Cap on achievable effectiveness.
    pub effectiveness: f64,
    /// Heat transfer coefficient times area, kW/K.
    pub ua_kw_per_k: f64,
    /// Specific heat of water, kJ/(kg*K).
    pub cp_water: f64,
}

impl Default for HeatExchangerParams {
    fn default() -> Self {
        Self {
            effectiveness: 0.85,
            ua_kw_per_k: 340.0,
            cp_water: 4.186,
        }
    }
}

/// Fraction of total engine heat rejected through the LT fresh-water
/// circuit; the rest leaves through the HT circuit and exhaust.
const LT_CIRCUIT_SHARE: f64 = 0.43;

/// Affinity-law characteristic for one pump or fan drive.
#[derive(Debug, Clone, Copy)]
pub struct DriveCurve {
    /// Rated volumetric flow at 60 Hz (m3/h for pumps, m3/min for fans).
    pub rated_flow: f64,
    /// Rated head (m) or static pressure (Pa) at 60 Hz.
    pub rated_head: f64,
    /// Rated shaft power at 60 Hz, kW.
    pub rated_power_kw: f64,
}

impl DriveCurve {
    /// Flow scales linearly with frequency.
    pub fn flow(&self, frequency_hz: f64) -> f64 {
        self.rated_flow * (frequency_hz / 60.0)
    }

    /// Head scales with the square of frequency.
    pub fn head(&self, frequency_hz: f64) -> f64 {
        self.rated_head * (frequency_hz / 60.0).powi(2)
    }

    /// Power follows the cubic affinity law.
    pub fn power_kw(&self, frequency_hz: f64) -> f64 {
        self.rated_power_kw * (frequency_hz / 60.0).powi(3)
    }
}

/// Commanded drive state fed into one simulation step.
#[derive(Debug, Clone, Copy)]
pub struct PlantInputs {
    pub engine_load_pct: f64,
    pub sw_pump_count: u32,
    pub sw_pump_hz: f64,
    pub fw_pump_count: u32,
    pub fw_pump_hz: f64,
    pub er_fan_count: u32,
    pub er_fan_hz: f64,
    pub seawater_temp_c: f64,
    pub outside_air_temp_c: f64,
}

/// Noise-free sensor values produced by one simulation step.
#[derive(Debug, Clone, Copy)]
pub struct PlantReadings {
    pub t1: f64,
    pub t2: f64,
    pub t3: f64,
    pub t4: f64,
    pub t5: f64,
    pub t6: f64,
    pub t7: f64,
    pub px1_bar: f64,
}

/// First-order thermal model of the seawater/fresh-water cooling plant and
/// the engine-room ventilation balance.
#[derive(Debug, Clone)]
pub struct PlantModel {
    exchanger: HeatExchangerParams,
    sw_pump: DriveCurve,
    fw_pump: DriveCurve,
    er_fan: DriveCurve,
    t2: f64,
    t3: f64,
    t4: f64,
    t5: f64,
    t6: f64,
    thermal_mass_er_kg: f64,
    flow_resistance: f64,
}

impl Default for PlantModel {
    fn default() -> Self {
        Self {
            exchanger: HeatExchangerParams::default(),
            sw_pump: DriveCurve {
                rated_flow: 500.0,
                rated_head: 50.0,
                rated_power_kw: 132.0,
            },
            fw_pump: DriveCurve {
                rated_flow: 400.0,
                rated_head: 50.0,
                rated_power_kw: 75.0,
            },
            er_fan: DriveCurve {
                rated_flow: 300.0,
                rated_head: 300.0,
                rated_power_kw: 54.3,
            },
            t2: 35.0,
            t3: 35.0,
            t4: 45.0,
            t5: 35.0,
            t6: 43.0,
            thermal_mass_er_kg: 5_000.0,
            flow_resistance: 3.0,
        }
    }
}

impl PlantModel {
    /// Pin the engine-room temperature, for scenario injection in tests.
    pub fn force_er_temp(&mut self, t6: f64) {
        self.t6 = t6;
    }

    /// Advance the plant by `dt_s` seconds under the given drive commands.
    pub fn step(&mut self, inputs: &PlantInputs, dt_s: f64) -> PlantReadings {
        let engine_heat_kw = engine_heat_generation(inputs.engine_load_pct);
        let lt_heat_kw = engine_heat_kw * LT_CIRCUIT_SHARE;
        let sw_flow = f64::from(inputs.sw_pump_count) * self.sw_pump.flow(inputs.sw_pump_hz);
        let fw_flow = f64::from(inputs.fw_pump_count) * self.fw_pump.flow(inputs.fw_pump_hz);

        let t1 = inputs.seawater_temp_c;

        // Fresh water leaves the coolers at T5, absorbs the LT-circuit heat
        // across the engine, and returns at T4.
        let alpha = 0.1;
        let c_fw_total = fw_flow * 1000.0 / 3600.0 * self.exchanger.cp_water;
        if c_fw_total > 0.0 {
            let t4_target = self.t5 + lt_heat_kw / c_fw_total;
            self.t4 += (t4_target - self.t4) * alpha;
        }

        // Two identical coolers share both flows.
        let (t5_new, t2_new) = self.exchanger_outlets(self.t4, t1, fw_flow / 2.0, sw_flow / 2.0);
        let (_, t3_new) = self.exchanger_outlets(self.t4, t1, fw_flow / 2.0, sw_flow / 2.0);

        // First-order lag toward the exchanger solution.
        self.t2 += (t2_new - self.t2) * alpha;
        self.t3 += (t3_new - self.t3) * alpha;
        self.t5 += (t5_new - self.t5) * alpha;

        let dt6 = self.ventilation_rate(
            inputs.outside_air_temp_c,
            inputs.er_fan_count,
            inputs.er_fan_hz,
            engine_heat_kw,
        );
        self.t6 += dt6 * dt_s;

        PlantReadings {
            t1,
            t2: self.t2,
            t3: self.t3,
            t4: self.t4,
            t5: self.t5,
            t6: self.t6,
            t7: inputs.outside_air_temp_c,
            px1_bar: self.discharge_pressure(inputs.sw_pump_count, inputs.sw_pump_hz),
        }
    }

    /// NTU-effectiveness outlet temperatures for one cooler.
    fn exchanger_outlets(
        &self,
        t_hot_in: f64,
        t_cold_in: f64,
        flow_hot_m3h: f64,
        flow_cold_m3h: f64,
    ) -> (f64, f64) {
        let m_hot = flow_hot_m3h * 1000.0 / 3600.0;
        let m_cold = flow_cold_m3h * 1000.0 / 3600.0;
        let c_hot = m_hot * self.exchanger.cp_water;
        let c_cold = m_cold * self.exchanger.cp_water;
        if c_hot <= 0.0 || c_cold <= 0.0 {
            return (t_hot_in, t_cold_in);
        }

        let c_min = c_hot.min(c_cold);
        let c_max = c_hot.max(c_cold);
        let ntu = self.exchanger.ua_kw_per_k / c_min;
        let c_ratio = c_min / c_max;
        let effectiveness = if (c_ratio - 1.0).abs() < 1e-9 {
            ntu / (1.0 + ntu)
        } else {
            (1.0 - (-ntu * (1.0 - c_ratio)).exp())
                / (1.0 - c_ratio * (-ntu * (1.0 - c_ratio)).exp())
        }
        .min(self.exchanger.effectiveness);

        let q = effectiveness * c_min * (t_hot_in - t_cold_in);
        (t_hot_in - q / c_hot, t_cold_in + q / c_cold)
    }

    /// Engine-room temperature rate of change, degrees C per second.
    fn ventilation_rate(
        &self,
        t_outside: f64,
        fan_count: u32,
        fan_hz: f64,
        engine_heat_kw: f64,
    ) -> f64 {
        let total_flow = f64::from(fan_count) * self.er_fan.flow(fan_hz);
        let air_mass_flow = total_flow * 1.2 / 60.0;
        let heat_transfer = air_mass_flow * 1.005;
        let cooling_kw = heat_transfer * (self.t6 - t_outside);
        // Radiated fraction of engine heat plus machinery self-heating.
        let er_heating_kw = 50.0 + engine_heat_kw * 0.002;
        (er_heating_kw - cooling_kw) / (self.thermal_mass_er_kg * self.exchanger.cp_water)
    }

    /// Seawater discharge manifold pressure from pump head, 10.2 m of water
    /// per bar.
    fn discharge_pressure(&self, pump_count: u32, pump_hz: f64) -> f64 {
        let total_head_m = f64::from(pump_count) * self.sw_pump.head(pump_hz);
        (total_head_m / self.flow_resistance / 10.2).clamp(0.0, 10.0)
    }
}

fn engine_heat_generation(engine_load_pct: f64) -> f64 {
    // Main engine rejects roughly 24 MW into cooling at full load, with a
    // non-linear knee below 30 % load.
    let rated_heat_kw = 24_000.0;
    let ratio = if engine_load_pct < 30.0 {
        0.3 + engine_load_pct / 30.0 * 0.2
    } else {
        0.5 + (engine_load_pct - 30.0) / 70.0 * 0.5
    };
    rated_heat_kw * ratio
}

/// 24-hour voyage profile: acceleration, steady passage, deceleration,
/// berthing, with daily seawater and ambient temperature swings.
#[derive(Debug, Clone, Copy)]
pub struct VoyagePattern {
    pub base_seawater_c: f64,
    pub base_ambient_c: f64,
}

impl Default for VoyagePattern {
    fn default() -> Self {
        Self {
            base_seawater_c: 25.0,
            base_ambient_c: 35.0,
        }
    }
}

impl VoyagePattern {
    const ACCEL_S: f64 = 30.0 * 60.0;
    const STEADY_S: f64 = 300.0 * 60.0;
    const DECEL_S: f64 = 30.0 * 60.0;
    const BERTH_S: f64 = 60.0 * 60.0;

    pub fn engine_load(&self, elapsed_s: f64) -> f64 {
        let cycle = 24.0 * 3600.0;
        let mut t = elapsed_s % cycle;

        if t < Self::ACCEL_S {
            return 70.0 * t / Self::ACCEL_S;
        }
        t -= Self::ACCEL_S;
        if t < Self::STEADY_S {
            return 70.0;
        }
        t -= Self::STEADY_S;
        if t < Self::DECEL_S {
            return 70.0 - 40.0 * t / Self::DECEL_S;
        }
        t -= Self::DECEL_S;
        if t < Self::BERTH_S {
            return 10.0;
        }
        10.0
    }

    pub fn seawater_temp(&self, elapsed_s: f64) -> f64 {
        self.base_seawater_c + 3.0 * (2.0 * PI * elapsed_s / (24.0 * 3600.0)).sin()
    }

    pub fn ambient_temp(&self, elapsed_s: f64) -> f64 {
        self.base_ambient_c + 5.0 * (2.0 * PI * elapsed_s / (24.0 * 3600.0) - PI / 2.0).sin()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nominal_inputs() -> PlantInputs {
        PlantInputs {
            engine_load_pct: 60.0,
            sw_pump_count: 2,
            sw_pump_hz: 48.0,
            fw_pump_count: 2,
            fw_pump_hz: 48.0,
            er_fan_count: 3,
            er_fan_hz: 48.0,
            seawater_temp_c: 25.0,
            outside_air_temp_c: 35.0,
        }
    }

    #[test]
    fn affinity_laws_scale_as_expected() {
        let curve = DriveCurve {
            rated_flow: 500.0,
            rated_head: 50.0,
            rated_power_kw: 132.0,
        };
        assert!((curve.flow(30.0) - 250.0).abs() < 1e-9);
        assert!((curve.head(30.0) - 12.5).abs() < 1e-9);
        assert!((curve.power_kw(30.0) - 16.5).abs() < 1e-9);
    }

    #[test]
    fn plant_stays_inside_physical_bands_over_an_hour() {
        let mut plant = PlantModel::default();
        let inputs = nominal_inputs();
        for _ in 0..1800 {
            let readings = plant.step(&inputs, 2.0);
            assert!(readings.t5 > 0.0 && readings.t5 < 100.0);
            assert!(readings.t6 > 0.0 && readings.t6 < 100.0);
            assert!((0.0..=10.0).contains(&readings.px1_bar));
        }
    }

    #[test]
    fn more_fan_capacity_cools_the_engine_room() {
        let inputs_low = PlantInputs {
            er_fan_count: 2,
            er_fan_hz: 40.0,
            ..nominal_inputs()
        };
        let inputs_high = PlantInputs {
            er_fan_count: 4,
            er_fan_hz: 60.0,
            ..nominal_inputs()
        };

        let mut hot = PlantModel::default();
        hot.force_er_temp(46.0);
        let mut cool = hot.clone();

        for _ in 0..600 {
            hot.step(&inputs_low, 2.0);
            cool.step(&inputs_high, 2.0);
        }
        let hot_final = hot.step(&inputs_low, 2.0).t6;
        let cool_final = cool.step(&inputs_high, 2.0).t6;
        assert!(cool_final < hot_final);
    }

    #[test]
    fn pressure_rises_with_pump_speed() {
        let plant = PlantModel::default();
        let slow = plant.discharge_pressure(2, 40.0);
        let fast = plant.discharge_pressure(2, 60.0);
        assert!(fast > slow);
        assert!(slow >= 1.0);
    }

    #[test]
    fn voyage_pattern_covers_all_phases() {
        let pattern = VoyagePattern::default();
        assert_eq!(pattern.engine_load(0.0), 0.0);
        assert_eq!(pattern.engine_load(45.0 * 60.0), 70.0);
        assert_eq!(pattern.engine_load(7.0 * 3600.0), 10.0);
        let sw = pattern.seawater_temp(6.0 * 3600.0);
        assert!((sw - 28.0).abs() < 0.01);
    }
}

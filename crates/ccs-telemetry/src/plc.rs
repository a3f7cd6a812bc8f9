//! ---
//! ccs_section: "02-telemetry-adapters"
//! ccs_subsection: "module"
//! ccs_type: "source"
//! ccs_scope: "code"
//! ccs_description: "Telemetry model and pluggable PLC/simulation adapters."
//! ccs_version: "v0.1.0"
//! ccs_owner: "tbd"
//! ---
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;

use crate::adapter::{AdapterError, TelemetryAdapter};
use crate::frames::{CommandFrame, TelemetryFrame};

/// Sensor image base address: T1..T7 (signed, x10), PX1 (x100), load (x10).
pub const SENSOR_BASE: u16 = 0;
/// Number of sensor registers read per frame.
pub const SENSOR_COUNT: u16 = 9;
/// Command image base address: freq (x10) and count per group, in group order.
pub const COMMAND_BASE: u16 = 100;

/// Register-level capability the PLC adapter is built on. The concrete wire
/// transport (Modbus TCP unit, serial gateway) lives outside this crate and
/// binds in through this trait.
#[async_trait]
pub trait RegisterBus: Send + Sync {
    /// Read `count` input registers starting at `start`.
    async fn read_input(&self, start: u16, count: u16) -> anyhow::Result<Vec<u16>>;

    /// Write a contiguous block of holding registers starting at `start`.
    async fn write_holding(&self, start: u16, values: &[u16]) -> anyhow::Result<()>;
}

/// In-memory register bus mirroring a PLC register image. Backs unit and
/// integration tests; a site deployment substitutes the real transport.
#[derive(Debug, Clone, Default)]
pub struct InMemoryRegisterBus {
    registers: Arc<Mutex<HashMap<u16, u16>>>,
}

impl InMemoryRegisterBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a sensor frame into the input register image.
    pub async fn set_sensor_image(&self, frame: &TelemetryFrame) {
        let mut registers = self.registers.lock().await;
        let temps = [
            frame.t1, frame.t2, frame.t3, frame.t4, frame.t5, frame.t6, frame.t7,
        ];
        for (offset, value) in temps.iter().enumerate() {
            registers.insert(
                SENSOR_BASE + offset as u16,
                encode_signed_tenths(*value),
            );
        }
        registers.insert(SENSOR_BASE + 7, (frame.px1_bar * 100.0).round() as u16);
        registers.insert(
            SENSOR_BASE + 8,
            (frame.engine_load_pct * 10.0).round() as u16,
        );
    }

    /// Read back the raw command image, for assertions in tests.
    pub async fn command_image(&self) -> Vec<u16> {
        let registers = self.registers.lock().await;
        (0..6u16)
            .map(|offset| *registers.get(&(COMMAND_BASE + offset)).unwrap_or(&0))
            .collect()
    }
}

#[async_trait]
impl RegisterBus for InMemoryRegisterBus {
    async fn read_input(&self, start: u16, count: u16) -> anyhow::Result<Vec<u16>> {
        let registers = self.registers.lock().await;
        let mut values = Vec::with_capacity(count as usize);
        for offset in 0..count {
            values.push(*registers.get(&(start + offset)).unwrap_or(&0));
        }
        Ok(values)
    }

    async fn write_holding(&self, start: u16, values: &[u16]) -> anyhow::Result<()> {
        let mut registers = self.registers.lock().await;
        for (offset, value) in values.iter().enumerate() {
            registers.insert(start + offset as u16, *value);
        }
        Ok(())
    }
}

fn encode_signed_tenths(value: f64) -> u16 {
    ((value * 10.0).round() as i16) as u16
}

fn decode_signed_tenths(raw: u16) -> f64 {
    f64::from(raw as i16) / 10.0
}

/// Live telemetry backend speaking the fixed PLC register mapping.
pub struct PlcAdapter {
    bus: Arc<dyn RegisterBus>,
    origin: Instant,
    last_monotonic_ns: AtomicU64,
}

impl PlcAdapter {
    pub fn new(bus: Arc<dyn RegisterBus>) -> Self {
        Self {
            bus,
            origin: Instant::now(),
            last_monotonic_ns: AtomicU64::new(0),
        }
    }

    fn next_monotonic_ns(&self) -> u64 {
        let elapsed = self.origin.elapsed().as_nanos() as u64;
        // Instant is monotonic but not strictly so at ns granularity.
        let previous = self.last_monotonic_ns.fetch_max(elapsed, Ordering::Relaxed);
        if elapsed > previous {
            elapsed
        } else {
            self.last_monotonic_ns.fetch_add(1, Ordering::Relaxed) + 1
        }
    }
}

#[async_trait]
impl TelemetryAdapter for PlcAdapter {
    async fn read_frame(&self) -> Result<TelemetryFrame, AdapterError> {
        let raw = self
            .bus
            .read_input(SENSOR_BASE, SENSOR_COUNT)
            .await
            .map_err(|err| AdapterError::Transport(err.to_string()))?;
        if raw.len() != SENSOR_COUNT as usize {
            return Err(AdapterError::Transport(format!(
                "short register read: {} of {}",
                raw.len(),
                SENSOR_COUNT
            )));
        }

        let frame = TelemetryFrame {
            timestamp: Utc::now(),
            monotonic_ns: self.next_monotonic_ns(),
            t1: decode_signed_tenths(raw[0]),
            t2: decode_signed_tenths(raw[1]),
            t3: decode_signed_tenths(raw[2]),
            t4: decode_signed_tenths(raw[3]),
            t5: decode_signed_tenths(raw[4]),
            t6: decode_signed_tenths(raw[5]),
            t7: decode_signed_tenths(raw[6]),
            px1_bar: f64::from(raw[7]) / 100.0,
            engine_load_pct: f64::from(raw[8]) / 10.0,
            is_stale: false,
        };
        frame.validate()?;
        Ok(frame)
    }

    async fn write_command(&self, command: &CommandFrame) -> Result<(), AdapterError> {
        let image = [
            encode_signed_tenths(command.sw_pumps.frequency_hz),
            command.sw_pumps.count as u16,
            encode_signed_tenths(command.fw_pumps.frequency_hz),
            command.fw_pumps.count as u16,
            encode_signed_tenths(command.er_fans.frequency_hz),
            command.er_fans.count as u16,
        ];
        self.bus
            .write_holding(COMMAND_BASE, &image)
            .await
            .map_err(|err| AdapterError::Transport(err.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frames::GroupCommand;

    fn frame() -> TelemetryFrame {
        TelemetryFrame {
            timestamp: Utc::now(),
            monotonic_ns: 0,
            t1: 25.0,
            t2: 35.2,
            t3: 35.4,
            t4: 45.1,
            t5: 35.0,
            t6: 43.0,
            t7: -12.5,
            px1_bar: 2.05,
            engine_load_pct: 62.5,
            is_stale: false,
        }
    }

    #[tokio::test]
    async fn sensor_image_round_trips_through_registers() {
        let bus = Arc::new(InMemoryRegisterBus::new());
        bus.set_sensor_image(&frame()).await;

        let adapter = PlcAdapter::new(bus);
        let decoded = adapter.read_frame().await.unwrap();
        assert!((decoded.t7 - -12.5).abs() < 0.05);
        assert!((decoded.px1_bar - 2.05).abs() < 0.005);
        assert!((decoded.engine_load_pct - 62.5).abs() < 0.05);
        assert!(!decoded.is_stale);
    }

    #[tokio::test]
    async fn monotonic_timestamps_strictly_increase() {
        let bus = Arc::new(InMemoryRegisterBus::new());
        bus.set_sensor_image(&frame()).await;
        let adapter = PlcAdapter::new(bus);

        let first = adapter.read_frame().await.unwrap();
        let second = adapter.read_frame().await.unwrap();
        assert!(second.monotonic_ns > first.monotonic_ns);
    }

    #[tokio::test]
    async fn out_of_range_register_value_is_rejected() {
        let bus = Arc::new(InMemoryRegisterBus::new());
        let mut bad = frame();
        bad.t2 = 130.0;
        bus.set_sensor_image(&bad).await;

        let adapter = PlcAdapter::new(bus);
        let err = adapter.read_frame().await.unwrap_err();
        assert!(matches!(err, AdapterError::OutOfRange(_)));
    }

    #[tokio::test]
    async fn command_image_is_written_in_group_order() {
        let bus = Arc::new(InMemoryRegisterBus::new());
        let adapter = PlcAdapter::new(bus.clone());
        let command = CommandFrame {
            issued_at: Utc::now(),
            tick: 7,
            safety_override: false,
            sw_pumps: GroupCommand {
                frequency_hz: 48.5,
                count: 2,
                reason: "steady".into(),
            },
            fw_pumps: GroupCommand {
                frequency_hz: 46.0,
                count: 2,
                reason: "steady".into(),
            },
            er_fans: GroupCommand {
                frequency_hz: 52.0,
                count: 3,
                reason: "steady".into(),
            },
        };
        adapter.write_command(&command).await.unwrap();
        assert_eq!(bus.command_image().await, vec![485, 2, 460, 2, 520, 3]);
    }
}

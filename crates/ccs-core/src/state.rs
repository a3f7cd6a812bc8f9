//! ---
//! ccs_section: "01-control-kernel"
//! ccs_subsection: "module"
//! ccs_type: "source"
//! ccs_scope: "code"
//! ccs_description: "Supervisor runtime: scheduler, state store, event sink."
//! ccs_version: "v0.1.0"
//! ccs_owner: "tbd"
//! ---
use ccs_common::config::GroupsConfig;
use ccs_control::{Decision, GroupStates, WindowSummary};
use ccs_telemetry::frames::TelemetryFrame;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};

/// Operator-selected control regime, observed at tick boundaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum OperatorMode {
    #[default]
    Auto,
    #[serde(rename = "manual-fixed-60hz")]
    ManualFixed60Hz,
    SafeHold,
}

impl OperatorMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperatorMode::Auto => "auto",
            OperatorMode::ManualFixed60Hz => "manual-fixed-60hz",
            OperatorMode::SafeHold => "safe-hold",
        }
    }
}

impl std::str::FromStr for OperatorMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "auto" => Ok(OperatorMode::Auto),
            "manual-fixed-60hz" => Ok(OperatorMode::ManualFixed60Hz),
            "safe-hold" => Ok(OperatorMode::SafeHold),
            other => Err(format!("unknown operator mode: {}", other)),
        }
    }
}

/// Reduced-function state entered after repeated deadline misses or
/// transport faults.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DegradationLevel {
    #[default]
    Normal,
    Degraded,
}

impl DegradationLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            DegradationLevel::Normal => "normal",
            DegradationLevel::Degraded => "degraded",
        }
    }

    pub fn is_degraded(&self) -> bool {
        matches!(self, DegradationLevel::Degraded)
    }
}

impl std::fmt::Display for DegradationLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Consistent end-of-tick view of the supervisor, cheap to clone out for
/// the operator interface and the event stream.
#[derive(Debug, Clone, Serialize)]
pub struct StoreSnapshot {
    pub tick: u64,
    pub mode: OperatorMode,
    pub degradation: DegradationLevel,
    pub latest_frame: Option<TelemetryFrame>,
    pub latest_decision: Option<Decision>,
    pub groups: GroupStates,
    pub window: Option<WindowSummary>,
}

#[derive(Debug)]
struct StoreInner {
    tick: u64,
    mode: OperatorMode,
    degradation: DegradationLevel,
    latest_frame: Option<TelemetryFrame>,
    latest_decision: Option<Decision>,
    groups: GroupStates,
    window: Option<WindowSummary>,
}

/// Single-writer shared state. The scheduler commits once per tick; readers
/// obtain the state at the end of some completed tick, never a partial
/// mid-tick view. The only inbound mutation is the operator mode request,
/// which is queued here and drained by the scheduler at the next tick
/// boundary.
#[derive(Debug)]
pub struct ControlStateStore {
    inner: RwLock<StoreInner>,
    mode_request: Mutex<Option<OperatorMode>>,
}

impl ControlStateStore {
    pub fn new(groups: &GroupsConfig) -> Self {
        Self {
            inner: RwLock::new(StoreInner {
                tick: 0,
                mode: OperatorMode::Auto,
                degradation: DegradationLevel::Normal,
                latest_frame: None,
                latest_decision: None,
                groups: GroupStates::initial(groups),
                window: None,
            }),
            mode_request: Mutex::new(None),
        }
    }

    /// Atomically publish the end-of-tick state.
    #[allow(clippy::too_many_arguments)]
    pub fn commit(
        &self,
        tick: u64,
        mode: OperatorMode,
        degradation: DegradationLevel,
        frame: Option<TelemetryFrame>,
        decision: Decision,
        groups: GroupStates,
        window: WindowSummary,
    ) {
        let mut inner = self.inner.write();
        inner.tick = tick;
        inner.mode = mode;
        inner.degradation = degradation;
        if let Some(frame) = frame {
            inner.latest_frame = Some(frame);
        }
        inner.latest_decision = Some(decision);
        inner.groups = groups;
        inner.window = Some(window);
    }

    pub fn snapshot(&self) -> StoreSnapshot {
        let inner = self.inner.read();
        StoreSnapshot {
            tick: inner.tick,
            mode: inner.mode,
            degradation: inner.degradation,
            latest_frame: inner.latest_frame.clone(),
            latest_decision: inner.latest_decision.clone(),
            groups: inner.groups.clone(),
            window: inner.window.clone(),
        }
    }

    /// Per-group state the scheduler resumes from at start-up.
    pub fn group_states(&self) -> GroupStates {
        self.inner.read().groups.clone()
    }

    /// Queue an operator mode change; it takes effect at the next tick
    /// boundary. A later request supersedes an undrained earlier one.
    pub fn request_mode(&self, mode: OperatorMode) {
        *self.mode_request.lock() = Some(mode);
    }

    /// Drain the pending mode request, if any. Scheduler-only.
    pub fn take_mode_request(&self) -> Option<OperatorMode> {
        self.mode_request.lock().take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ccs_common::config::SupervisorConfig;
    use ccs_control::{decide, TickContext};
    use chrono::Utc;
    use std::time::Duration;

    fn sample_commit(store: &ControlStateStore, config: &SupervisorConfig, tick: u64) {
        let frame = TelemetryFrame {
            timestamp: Utc::now(),
            monotonic_ns: tick * 2_000_000_000 + 1,
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
        };
        let mut groups = store.group_states();
        let ctx = TickContext {
            config,
            tick,
            dt: Duration::from_secs(2),
            stale_ticks: 0,
            degraded: false,
        };
        let (decision, _) = decide(&ctx, &frame, None, &mut groups);
        let window = ccs_control::SequenceWindow::new(&config.window).summary();
        store.commit(
            tick,
            OperatorMode::Auto,
            DegradationLevel::Normal,
            Some(frame),
            decision,
            groups,
            window,
        );
    }

    #[test]
    fn snapshot_reflects_the_latest_commit() {
        let config = SupervisorConfig::default();
        let store = ControlStateStore::new(&config.groups);
        assert!(store.snapshot().latest_decision.is_none());

        sample_commit(&store, &config, 1);
        sample_commit(&store, &config, 2);

        let snapshot = store.snapshot();
        assert_eq!(snapshot.tick, 2);
        assert!(snapshot.latest_frame.is_some());
        assert_eq!(snapshot.latest_decision.unwrap().tick, 2);
    }

    #[test]
    fn mode_requests_are_drained_once() {
        let config = SupervisorConfig::default();
        let store = ControlStateStore::new(&config.groups);
        store.request_mode(OperatorMode::SafeHold);
        store.request_mode(OperatorMode::ManualFixed60Hz);
        assert_eq!(
            store.take_mode_request(),
            Some(OperatorMode::ManualFixed60Hz)
        );
        assert_eq!(store.take_mode_request(), None);
    }

    #[test]
    fn operator_mode_parses_its_wire_names() {
        assert_eq!(
            "manual-fixed-60hz".parse::<OperatorMode>().unwrap(),
            OperatorMode::ManualFixed60Hz
        );
        assert_eq!(
            "safe-hold".parse::<OperatorMode>().unwrap(),
            OperatorMode::SafeHold
        );
        assert!("turbo".parse::<OperatorMode>().is_err());
    }
}

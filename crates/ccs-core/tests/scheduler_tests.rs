//! ---
//! ccs_section: "11-simulation-test-harness"
//! ccs_subsection: "integration-test"
//! ccs_type: "test"
//! ccs_scope: "code"
//! ccs_description: "Closed-loop scheduler tests against the simulation backend."
//! ccs_version: "v0.1.0"
//! ccs_owner: "tbd"
//! ---
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use ccs_common::config::SupervisorConfig;
use ccs_control::TemperaturePredictor;
use ccs_core::events::EventKind;
use ccs_core::scheduler::{shutdown_channel, Supervisor};
use ccs_core::state::{ControlStateStore, DegradationLevel, OperatorMode};
use ccs_core::EventSink;
use ccs_telemetry::adapter::{AdapterError, TelemetryAdapter};
use ccs_telemetry::frames::{CommandFrame, GroupId, TelemetryFrame};
use ccs_telemetry::sim::SimAdapter;
use parking_lot::RwLock;

fn test_config(tick_ms: u64) -> Arc<SupervisorConfig> {
    let mut config = SupervisorConfig::default();
    config.control.tick_period = Duration::from_millis(tick_ms);
    config.adapter.io_deadline = Duration::from_millis(tick_ms / 2);
    Arc::new(config)
}

fn build_supervisor(
    config: Arc<SupervisorConfig>,
    adapter: Arc<dyn TelemetryAdapter>,
) -> (Supervisor, Arc<ControlStateStore>, Arc<EventSink>) {
    let store = Arc::new(ControlStateStore::new(&config.groups));
    let sink = EventSink::new(config.events.buffer);
    let predictor = Arc::new(RwLock::new(TemperaturePredictor::null()));
    let supervisor = Supervisor::new(
        config,
        adapter,
        predictor,
        store.clone(),
        sink.clone(),
        None,
    );
    (supervisor, store, sink)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn closed_loop_run_emits_valid_commands_and_safe_shutdown() {
    let config = test_config(40);
    let adapter = Arc::new(SimAdapter::new(42, config.control.tick_period));
    let (supervisor, store, sink) = build_supervisor(config.clone(), adapter);

    let (shutdown_tx, shutdown_rx) = shutdown_channel();
    let task = tokio::spawn(async move { supervisor.run(shutdown_rx).await });

    tokio::time::sleep(Duration::from_millis(600)).await;
    shutdown_tx.send(()).unwrap();
    task.await.unwrap().unwrap();

    let snapshot = store.snapshot();
    assert!(snapshot.tick >= 5, "expected several completed ticks");
    assert!(snapshot.latest_frame.is_some());
    let decision = snapshot.latest_decision.expect("decision retained");
    for id in GroupId::ALL {
        let group = decision.group(id);
        assert!((40.0..=60.0).contains(&group.frequency_hz));
        assert!(group.frequency_hz.is_finite());
    }
    // Final safe command is a hold.
    assert_eq!(decision.sw_pumps.reason, "shutdown safe hold");

    let events = sink.recent(usize::MAX);
    assert!(events
        .iter()
        .any(|e| e.kind == EventKind::DecisionEmitted));
    assert!(events.iter().any(|e| e.kind == EventKind::ShutdownCommand));
}

/// Adapter that times out for a configurable stretch of reads, then hands
/// off to the simulator again.
struct StallingAdapter {
    inner: SimAdapter,
    reads: AtomicU32,
    fail_from: u32,
    fail_until: u32,
}

#[async_trait]
impl TelemetryAdapter for StallingAdapter {
    async fn read_frame(&self) -> Result<TelemetryFrame, AdapterError> {
        let read = self.reads.fetch_add(1, Ordering::SeqCst);
        if read >= self.fail_from && read < self.fail_until {
            return Err(AdapterError::Timeout);
        }
        self.inner.read_frame().await
    }

    async fn write_command(&self, command: &CommandFrame) -> Result<(), AdapterError> {
        self.inner.write_command(command).await
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn transport_stall_degrades_and_recovers() {
    let config = test_config(30);
    let adapter = Arc::new(StallingAdapter {
        inner: SimAdapter::new(7, config.control.tick_period),
        reads: AtomicU32::new(0),
        fail_from: 5,
        fail_until: 9,
    });
    let (supervisor, store, sink) = build_supervisor(config.clone(), adapter);

    let (shutdown_tx, shutdown_rx) = shutdown_channel();
    let task = tokio::spawn(async move { supervisor.run(shutdown_rx).await });

    tokio::time::sleep(Duration::from_millis(700)).await;
    shutdown_tx.send(()).unwrap();
    task.await.unwrap().unwrap();

    let events = sink.recent(usize::MAX);
    let kinds: Vec<EventKind> = events.iter().map(|e| e.kind).collect();
    assert!(kinds.contains(&EventKind::TransportFault));
    assert!(kinds.contains(&EventKind::DegradedEntered));
    assert!(kinds.contains(&EventKind::DegradedRecovered));

    // Recovery: the loop is back to normal by shutdown.
    assert_eq!(store.snapshot().degradation, DegradationLevel::Normal);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn operator_mode_requests_apply_at_tick_boundaries() {
    let config = test_config(30);
    let adapter = Arc::new(SimAdapter::new(3, config.control.tick_period));
    let (supervisor, store, sink) = build_supervisor(config.clone(), adapter);

    let (shutdown_tx, shutdown_rx) = shutdown_channel();
    let task = tokio::spawn(async move { supervisor.run(shutdown_rx).await });

    tokio::time::sleep(Duration::from_millis(150)).await;
    store.request_mode(OperatorMode::ManualFixed60Hz);
    tokio::time::sleep(Duration::from_millis(200)).await;

    let snapshot = store.snapshot();
    assert_eq!(snapshot.mode, OperatorMode::ManualFixed60Hz);
    let decision = snapshot.latest_decision.expect("decision retained");
    for id in GroupId::ALL {
        assert_eq!(decision.group(id).frequency_hz, 60.0);
    }

    store.request_mode(OperatorMode::SafeHold);
    tokio::time::sleep(Duration::from_millis(200)).await;
    let snapshot = store.snapshot();
    assert_eq!(snapshot.mode, OperatorMode::SafeHold);
    let decision = snapshot.latest_decision.expect("decision retained");
    // Safe hold keeps the manual 60 Hz targets in place.
    assert_eq!(decision.er_fans.frequency_hz, 60.0);
    assert_eq!(decision.er_fans.reason, "operator safe hold");

    shutdown_tx.send(()).unwrap();
    task.await.unwrap().unwrap();

    let events = sink.recent(usize::MAX);
    let mode_changes: Vec<&str> = events
        .iter()
        .filter(|e| e.kind == EventKind::ModeChanged)
        .map(|e| e.reason.as_str())
        .collect();
    assert_eq!(
        mode_changes,
        vec!["operator mode manual-fixed-60hz", "operator mode safe-hold"]
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn commands_reach_the_transport_in_tick_order() {
    let config = test_config(30);
    let adapter = Arc::new(RecordingAdapter {
        inner: SimAdapter::new(5, config.control.tick_period),
        ticks: parking_lot::Mutex::new(Vec::new()),
    });
    let (supervisor, _store, _sink) = build_supervisor(config.clone(), adapter.clone());

    let (shutdown_tx, shutdown_rx) = shutdown_channel();
    let task = tokio::spawn(async move { supervisor.run(shutdown_rx).await });
    tokio::time::sleep(Duration::from_millis(400)).await;
    shutdown_tx.send(()).unwrap();
    task.await.unwrap().unwrap();

    let ticks = adapter.ticks.lock().clone();
    assert!(ticks.len() >= 5);
    for pair in ticks.windows(2) {
        assert!(pair[0] < pair[1], "commands observed out of tick order");
    }
}

struct RecordingAdapter {
    inner: SimAdapter,
    ticks: parking_lot::Mutex<Vec<u64>>,
}

#[async_trait]
impl TelemetryAdapter for RecordingAdapter {
    async fn read_frame(&self) -> Result<TelemetryFrame, AdapterError> {
        self.inner.read_frame().await
    }

    async fn write_command(&self, command: &CommandFrame) -> Result<(), AdapterError> {
        self.ticks.lock().push(command.tick);
        self.inner.write_command(command).await
    }
}

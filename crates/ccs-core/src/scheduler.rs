//! ---
//! ccs_section: "01-control-kernel"
//! ccs_subsection: "module"
//! ccs_type: "source"
//! ccs_scope: "code"
//! ccs_description: "Supervisor runtime: scheduler, state store, event sink."
//! ccs_version: "v0.1.0"
//! ccs_owner: "tbd"
//! ---
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use ccs_common::config::SupervisorConfig;
use ccs_common::metrics::TickTimingReporter;
use ccs_common::time::jitter_us;
use ccs_control::{
    decide, hold_decision, manual_decision, predictor::load_artefact, LoadOutcome, PipelineNote,
    PredictOutcome, Prediction, SequenceWindow, TemperaturePredictor, TickContext,
};
use ccs_telemetry::adapter::TelemetryAdapter;
use ccs_telemetry::frames::{CommandFrame, GroupId, TelemetryFrame};
use chrono::Utc;
use parking_lot::RwLock;
use tokio::sync::{broadcast, Notify};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, timeout, Instant};
use tracing::{debug, error, info, warn};

use crate::events::{EventKind, EventSink};
use crate::metrics::SupervisorMetrics;
use crate::state::{ControlStateStore, DegradationLevel, OperatorMode};

/// Consecutive transport faults after which the loop degrades.
const DEGRADE_AFTER_FAULTS: u32 = 3;
/// Consecutive deadline misses after which the loop degrades.
const DEGRADE_AFTER_MISSES: u32 = 3;

/// Slot the predictor loader swaps the loaded model into. The scheduler
/// takes the read side once per tick; the swap is one atomic update.
pub type PredictorSlot = Arc<RwLock<TemperaturePredictor>>;

/// Load the predictor artefact on a helper task and swap it in. Until the
/// task completes the null predictor stays in force.
pub fn spawn_predictor_loader(
    path: Option<PathBuf>,
    slot: PredictorSlot,
    sink: Arc<EventSink>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let outcome = load_artefact(path.as_deref());
        match &outcome {
            LoadOutcome::Loaded(_) => {
                sink.publish(0, EventKind::PredictorLoaded, None, "artefact loaded".into());
            }
            LoadOutcome::Null { reason } => {
                sink.publish(0, EventKind::PredictorLoadFailed, None, reason.clone());
            }
        }
        *slot.write() = TemperaturePredictor::from_outcome(outcome);
    })
}

/// The fixed two-second control loop coordinating telemetry, prediction,
/// decision, and actuation.
pub struct Supervisor {
    config: Arc<SupervisorConfig>,
    adapter: Arc<dyn TelemetryAdapter>,
    predictor: PredictorSlot,
    store: Arc<ControlStateStore>,
    sink: Arc<EventSink>,
    metrics: Option<SupervisorMetrics>,
}

impl Supervisor {
    pub fn new(
        config: Arc<SupervisorConfig>,
        adapter: Arc<dyn TelemetryAdapter>,
        predictor: PredictorSlot,
        store: Arc<ControlStateStore>,
        sink: Arc<EventSink>,
        metrics: Option<SupervisorMetrics>,
    ) -> Self {
        Self {
            config,
            adapter,
            predictor,
            store,
            sink,
            metrics,
        }
    }

    /// Run until the shutdown signal fires, then write one final safe
    /// command and return. Never unwinds out of a tick: every failure is
    /// folded into staleness, degraded mode, or a safe hold.
    pub async fn run(&self, mut shutdown: broadcast::Receiver<()>) -> Result<()> {
        let config = self.config.as_ref();
        let period = config.control.tick_period;
        let io_deadline = config.adapter.io_deadline;
        let reporter = TickTimingReporter::new(period);

        let mut window = SequenceWindow::new(&config.window);
        let mut states = self.store.group_states();
        let mut mode = OperatorMode::Auto;
        let mut last_good: Option<TelemetryFrame> = None;
        let mut last_monotonic_ns: u64 = 0;
        let mut stale_ticks: u32 = 0;
        let mut consecutive_faults: u32 = 0;
        let mut consecutive_misses: u32 = 0;
        let mut degraded = false;
        let mut tick: u64 = 0;

        info!(period = ?period, "supervisor loop starting");

        'ticks: loop {
            // Shutdown checkpoint ahead of the transport call.
            if shutdown.try_recv().is_ok() {
                break 'ticks;
            }
            let t0 = Instant::now();
            tick += 1;
            if let Some(interval) = reporter.record_tick() {
                debug!(tick, jitter_us = jitter_us(interval, period), "tick started");
            }
            if let Some(metrics) = &self.metrics {
                metrics.inc_tick();
            }

            if let Some(requested) = self.store.take_mode_request() {
                if requested != mode {
                    info!(from = mode.as_str(), to = requested.as_str(), "operator mode change");
                    self.sink.publish(
                        tick,
                        EventKind::ModeChanged,
                        None,
                        format!("operator mode {}", requested.as_str()),
                    );
                    mode = requested;
                }
            }

            // Phase 1: telemetry, bounded by the I/O deadline.
            let frame = match timeout(io_deadline, self.adapter.read_frame()).await {
                Ok(Ok(frame)) => {
                    if frame.t5 >= frame.t4 {
                        // In-range anomaly: outlet not cooler than inlet.
                        warn!(tick, t4 = frame.t4, t5 = frame.t5, "fresh-water loop anomaly");
                    }
                    consecutive_faults = 0;
                    stale_ticks = 0;
                    last_good = Some(frame.clone());
                    Some(frame)
                }
                Ok(Err(err)) => {
                    self.record_fault(tick, &mut consecutive_faults, format!("read: {}", err));
                    None
                }
                Err(_) => {
                    self.record_fault(tick, &mut consecutive_faults, "read deadline exceeded".into());
                    None
                }
            };
            let frame = match frame {
                Some(frame) => Some(frame),
                None => last_good.as_ref().map(|good| {
                    stale_ticks += 1;
                    good.stale_copy(last_monotonic_ns + period.as_nanos() as u64, Utc::now())
                }),
            };
            if let Some(frame) = &frame {
                last_monotonic_ns = frame.monotonic_ns;
            }

            // Fault-driven degraded transition applies to this very tick.
            degraded = self.update_degraded(
                degraded,
                consecutive_faults,
                consecutive_misses,
                tick,
            );

            // Phase 2: window and conditional prediction.
            if let Some(frame) = &frame {
                window.append(frame);
            }
            let prediction: Option<Prediction> = if degraded {
                None
            } else {
                match self
                    .predictor
                    .read()
                    .predict(&window, config.predictor_min_samples())
                {
                    PredictOutcome::Ready(prediction) => Some(prediction),
                    PredictOutcome::Unavailable => None,
                }
            };

            // Phases 3-5: safety, feedback, count machine.
            let decision = match (&frame, mode) {
                (None, _) => {
                    // No good frame has ever arrived; keep the drives where
                    // they are until telemetry shows up.
                    hold_decision(config, &mut states, tick, "no telemetry; holding")
                }
                (Some(frame), OperatorMode::Auto) => {
                    let ctx = TickContext {
                        config,
                        tick,
                        dt: period,
                        stale_ticks,
                        degraded,
                    };
                    let (decision, notes) = decide(&ctx, frame, prediction.as_ref(), &mut states);
                    self.publish_notes(tick, &notes);
                    decision
                }
                (Some(_), OperatorMode::ManualFixed60Hz) => {
                    manual_decision(config, &mut states, tick)
                }
                (Some(_), OperatorMode::SafeHold) => {
                    hold_decision(config, &mut states, tick, "operator safe hold")
                }
            };

            // Bug guard: revalidate at the emit boundary; an invariant
            // violation becomes a safe hold and a critical event, never a
            // panic.
            let decision = if let Err(violation) = validate_command(&decision.to_command(), config)
            {
                error!(tick, violation = %violation, "command invariant violation");
                self.sink
                    .publish(tick, EventKind::SafeHoldForced, None, violation);
                hold_decision(config, &mut states, tick, "invariant violation; safe hold")
            } else {
                decision
            };

            // Phase 6: actuation, bounded by the I/O deadline. Shutdown
            // checkpoint ahead of the transport call; the final safe
            // command below supersedes this tick's write.
            if shutdown.try_recv().is_ok() {
                break 'ticks;
            }
            let command = decision.to_command();
            match timeout(io_deadline, self.adapter.write_command(&command)).await {
                Ok(Ok(())) => {
                    debug!(tick, "command written");
                }
                Ok(Err(err)) => {
                    self.sink.publish(
                        tick,
                        EventKind::CommandWriteFailed,
                        None,
                        format!("write: {}", err),
                    );
                    if let Some(metrics) = &self.metrics {
                        metrics.inc_transport_fault();
                    }
                }
                Err(_) => {
                    self.sink.publish(
                        tick,
                        EventKind::CommandWriteFailed,
                        None,
                        "write deadline exceeded".into(),
                    );
                    if let Some(metrics) = &self.metrics {
                        metrics.inc_transport_fault();
                    }
                }
            }

            // Phase 7: persist and publish.
            self.sink.publish(
                tick,
                EventKind::DecisionEmitted,
                None,
                format!(
                    "sw {:.1} Hz x{}, fw {:.1} Hz x{}, er {:.1} Hz x{}",
                    decision.sw_pumps.frequency_hz,
                    decision.sw_pumps.count,
                    decision.fw_pumps.frequency_hz,
                    decision.fw_pumps.count,
                    decision.er_fans.frequency_hz,
                    decision.er_fans.count
                ),
            );
            self.store.commit(
                tick,
                mode,
                if degraded {
                    DegradationLevel::Degraded
                } else {
                    DegradationLevel::Normal
                },
                frame,
                decision,
                states.clone(),
                window.summary(),
            );

            // Phase 8: deadline accounting and sleep to the next boundary.
            let deadline = t0 + period;
            if Instant::now() > deadline {
                consecutive_misses += 1;
                warn!(tick, consecutive_misses, "tick deadline missed");
                self.sink.publish(
                    tick,
                    EventKind::DeadlineMiss,
                    None,
                    format!("{} consecutive", consecutive_misses),
                );
                if let Some(metrics) = &self.metrics {
                    metrics.inc_deadline_miss();
                }
                degraded = self.update_degraded(
                    degraded,
                    consecutive_faults,
                    consecutive_misses,
                    tick,
                );
                continue 'ticks;
            }
            consecutive_misses = 0;

            tokio::select! {
                _ = shutdown.recv() => break 'ticks,
                _ = sleep_until(deadline) => {}
            }
        }

        // Final tick: one safe command so the plant is left in a known state.
        tick += 1;
        let decision = hold_decision(config, &mut states, tick, "shutdown safe hold");
        let command = decision.to_command();
        if let Err(err) = self.write_final(&command, io_deadline).await {
            warn!(error = %err, "final safe command could not be written");
        }
        self.sink.publish(
            tick,
            EventKind::ShutdownCommand,
            None,
            "final safe command written".into(),
        );
        self.store.commit(
            tick,
            mode,
            if degraded {
                DegradationLevel::Degraded
            } else {
                DegradationLevel::Normal
            },
            None,
            decision,
            states.clone(),
            window.summary(),
        );
        info!(ticks = tick, "supervisor stopped after final safe command");
        Ok(())
    }

    async fn write_final(
        &self,
        command: &CommandFrame,
        io_deadline: std::time::Duration,
    ) -> Result<()> {
        match timeout(io_deadline, self.adapter.write_command(command)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(err)) => Err(err.into()),
            Err(_) => Err(anyhow::anyhow!("write deadline exceeded")),
        }
    }

    fn record_fault(&self, tick: u64, consecutive_faults: &mut u32, reason: String) {
        *consecutive_faults += 1;
        warn!(tick, consecutive_faults = *consecutive_faults, reason = %reason, "transport fault");
        self.sink
            .publish(tick, EventKind::TransportFault, None, reason);
        if let Some(metrics) = &self.metrics {
            metrics.inc_transport_fault();
        }
    }

    fn update_degraded(&self, previous: bool, faults: u32, misses: u32, tick: u64) -> bool {
        let degraded = faults >= DEGRADE_AFTER_FAULTS || misses >= DEGRADE_AFTER_MISSES;
        if degraded != previous {
            if degraded {
                warn!(tick, faults, misses, "entering degraded mode");
                self.sink.publish(
                    tick,
                    EventKind::DegradedEntered,
                    None,
                    format!("faults={} misses={}", faults, misses),
                );
            } else {
                info!(tick, "degraded mode cleared");
                self.sink.publish(
                    tick,
                    EventKind::DegradedRecovered,
                    None,
                    "telemetry and timing restored".into(),
                );
            }
            if let Some(metrics) = &self.metrics {
                metrics.set_degraded(degraded);
            }
        }
        degraded
    }

    fn publish_notes(&self, tick: u64, notes: &[PipelineNote]) {
        for note in notes {
            match note {
                PipelineNote::RuleActivated { group, rule } => {
                    self.sink.publish(
                        tick,
                        EventKind::RuleActivated,
                        Some(*group),
                        rule.as_str().to_owned(),
                    );
                    if let Some(metrics) = &self.metrics {
                        metrics.inc_rule(rule.as_str());
                    }
                }
                PipelineNote::CountChanged {
                    group,
                    change,
                    count,
                } => {
                    let direction = match change {
                        ccs_control::CountChange::Added => "added",
                        ccs_control::CountChange::Removed => "removed",
                    };
                    self.sink.publish(
                        tick,
                        EventKind::CountChanged,
                        Some(*group),
                        format!("{} ({} running)", direction, count),
                    );
                    if let Some(metrics) = &self.metrics {
                        metrics.inc_count_change(group.as_str(), direction);
                    }
                }
                PipelineNote::PrevOutOfEnvelope { group, prev_hz } => {
                    warn!(group = %group, prev_hz, "previous frequency outside envelope; clamped");
                }
            }
        }
    }
}

/// Boundary validation of an outgoing command against the configured
/// envelopes.
fn validate_command(command: &CommandFrame, config: &SupervisorConfig) -> Result<(), String> {
    let groups = [
        (GroupId::SwPumps, &config.groups.sw_pumps),
        (GroupId::FwPumps, &config.groups.fw_pumps),
        (GroupId::ErFans, &config.groups.er_fans),
    ];
    for (id, envelope) in groups {
        let group = command.group(id);
        if !group.frequency_hz.is_finite()
            || group.frequency_hz < envelope.frequency_min
            || group.frequency_hz > envelope.frequency_max
        {
            return Err(format!(
                "{} frequency {} outside [{}, {}]",
                id, group.frequency_hz, envelope.frequency_min, envelope.frequency_max
            ));
        }
        if group.count < envelope.count_min || group.count > envelope.count_max {
            return Err(format!(
                "{} count {} outside [{}, {}]",
                id, group.count, envelope.count_min, envelope.count_max
            ));
        }
    }
    Ok(())
}

/// Convenience shutdown handle wiring for binaries and tests.
pub fn shutdown_channel() -> (broadcast::Sender<()>, broadcast::Receiver<()>) {
    broadcast::channel(4)
}

/// Notify wrapper used by the event-sink writer shutdown.
pub fn writer_shutdown() -> Arc<Notify> {
    Arc::new(Notify::new())
}

//! ---
//! ccs_section: "03-persistence-logging"
//! ccs_subsection: "module"
//! ccs_type: "source"
//! ccs_scope: "code"
//! ccs_description: "Prometheus instrumentation for the control loop."
//! ccs_version: "v0.1.0"
//! ccs_owner: "tbd"
//! ---
use std::sync::Arc;

use anyhow::Result;
use prometheus::{IntCounter, IntCounterVec, IntGauge, Opts, Registry};

/// Shared registry type used across the workspace.
pub type SharedRegistry = Arc<Registry>;

/// Produce a new shared registry.
pub fn new_registry() -> SharedRegistry {
    Arc::new(Registry::new())
}

/// Counters and gauges recorded by the control loop.
#[derive(Clone, Debug)]
pub struct SupervisorMetrics {
    registry: SharedRegistry,
    ticks_total: IntCounter,
    deadline_misses_total: IntCounter,
    transport_faults_total: IntCounter,
    rule_activations: IntCounterVec,
    count_changes: IntCounterVec,
    degraded: IntGauge,
}

impl SupervisorMetrics {
    pub fn new(registry: SharedRegistry) -> Result<Self> {
        let ticks_total = IntCounter::with_opts(Opts::new(
            "ccs_ticks_total",
            "Control ticks completed since start-up",
        ))?;
        registry.register(Box::new(ticks_total.clone()))?;

        let deadline_misses_total = IntCounter::with_opts(Opts::new(
            "ccs_deadline_misses_total",
            "Ticks that overran the scheduling period",
        ))?;
        registry.register(Box::new(deadline_misses_total.clone()))?;

        let transport_faults_total = IntCounter::with_opts(Opts::new(
            "ccs_transport_faults_total",
            "Telemetry reads or command writes that failed or timed out",
        ))?;
        registry.register(Box::new(transport_faults_total.clone()))?;

        let rule_activations = IntCounterVec::new(
            Opts::new(
                "ccs_rule_activations_total",
                "Safety rule activations by rule identifier",
            ),
            &["rule"],
        )?;
        registry.register(Box::new(rule_activations.clone()))?;

        let count_changes = IntCounterVec::new(
            Opts::new(
                "ccs_count_changes_total",
                "Running-count transitions by group and direction",
            ),
            &["group", "direction"],
        )?;
        registry.register(Box::new(count_changes.clone()))?;

        let degraded = IntGauge::with_opts(Opts::new(
            "ccs_degraded",
            "Indicator (0/1) whether the supervisor is in degraded mode",
        ))?;
        registry.register(Box::new(degraded.clone()))?;

        Ok(Self {
            registry,
            ticks_total,
            deadline_misses_total,
            transport_faults_total,
            rule_activations,
            count_changes,
            degraded,
        })
    }

    pub fn registry(&self) -> SharedRegistry {
        self.registry.clone()
    }

    pub fn inc_tick(&self) {
        self.ticks_total.inc();
    }

    pub fn inc_deadline_miss(&self) {
        self.deadline_misses_total.inc();
    }

    pub fn inc_transport_fault(&self) {
        self.transport_faults_total.inc();
    }

    pub fn inc_rule(&self, rule: &str) {
        self.rule_activations.with_label_values(&[rule]).inc();
    }

    pub fn inc_count_change(&self, group: &str, direction: &str) {
        self.count_changes
            .with_label_values(&[group, direction])
            .inc();
    }

    pub fn set_degraded(&self, degraded: bool) {
        self.degraded.set(if degraded { 1 } else { 0 });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metrics_register_and_count() {
        let registry = new_registry();
        let metrics = SupervisorMetrics::new(registry.clone()).unwrap();
        metrics.inc_tick();
        metrics.inc_rule("S5_ER_EMERGENCY");
        metrics.set_degraded(true);

        let families = registry.gather();
        assert!(families.iter().any(|f| f.get_name() == "ccs_ticks_total"));
        assert!(families
            .iter()
            .any(|f| f.get_name() == "ccs_rule_activations_total"));
    }
}

//! ---
//! ccs_section: "01-control-kernel"
//! ccs_subsection: "module"
//! ccs_type: "source"
//! ccs_scope: "code"
//! ccs_description: "Shared primitives and utilities for the supervisor runtime."
//! ccs_version: "v0.1.0"
//! ccs_owner: "tbd"
//! ---
use std::fs::File;
use std::io::Write;
use std::path::Path;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::Serialize;

/// Accumulates tick-period deviations for one control loop.
#[derive(Debug, Default)]
pub struct PeriodHistogram {
    samples: Mutex<Vec<f64>>,
}

impl PeriodHistogram {
    pub fn record(&self, deviation: Duration) {
        let nanos = deviation.as_secs_f64() * 1_000_000_000.0;
        self.samples.lock().push(nanos);
    }

    pub fn summary(&self) -> Option<PeriodSummary> {
        let samples = self.samples.lock();
        let slice = samples.as_slice();
        if slice.is_empty() {
            return None;
        }
        let count = slice.len() as f64;
        let mean = slice.iter().sum::<f64>() / count;
        let variance = if slice.len() > 1 {
            let sum_sq = slice
                .iter()
                .map(|value| {
                    let delta = value - mean;
                    delta * delta
                })
                .sum::<f64>();
            sum_sq / (count - 1.0)
        } else {
            0.0
        };
        Some(PeriodSummary {
            mean_ns: mean,
            std_dev_ns: variance.sqrt(),
            max_ns: slice.iter().copied().fold(f64::MIN, f64::max),
            min_ns: slice.iter().copied().fold(f64::MAX, f64::min),
            samples: slice.len() as u64,
        })
    }

    pub fn write_json<P: AsRef<Path>>(&self, path: P) -> std::io::Result<()> {
        if let Some(summary) = self.summary() {
            let mut file = File::create(path)?;
            let json = serde_json::to_vec_pretty(&summary)
                .map_err(|err| std::io::Error::new(std::io::ErrorKind::Other, err))?;
            file.write_all(&json)?;
        }
        Ok(())
    }
}

/// Distribution summary for tick-period deviations, in nanoseconds.
#[derive(Debug, Serialize)]
pub struct PeriodSummary {
    pub mean_ns: f64,
    pub std_dev_ns: f64,
    pub max_ns: f64,
    pub min_ns: f64,
    pub samples: u64,
}

/// Measures observed tick intervals against the configured period.
#[derive(Debug)]
pub struct TickTimingReporter {
    target_period: Duration,
    last_tick: Mutex<Option<Instant>>,
    histogram: PeriodHistogram,
}

impl TickTimingReporter {
    pub fn new(target_period: Duration) -> Self {
        Self {
            target_period,
            last_tick: Mutex::new(None),
            histogram: PeriodHistogram::default(),
        }
    }

    /// Record a tick boundary; returns the observed interval once a previous
    /// tick exists.
    pub fn record_tick(&self) -> Option<Duration> {
        let mut last_tick = self.last_tick.lock();
        let now = Instant::now();
        let interval = last_tick.map(|previous| now.duration_since(previous));
        if let Some(actual) = interval {
            let deviation = if actual > self.target_period {
                actual - self.target_period
            } else {
                self.target_period - actual
            };
            self.histogram.record(deviation);
        }
        *last_tick = Some(now);
        interval
    }

    pub fn histogram(&self) -> &PeriodHistogram {
        &self.histogram
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summary_reports_sample_statistics() {
        let histogram = PeriodHistogram::default();
        histogram.record(Duration::from_millis(10));
        histogram.record(Duration::from_millis(30));
        let summary = histogram.summary().unwrap();
        assert_eq!(summary.samples, 2);
        assert!((summary.mean_ns - 20_000_000.0).abs() < 1.0);
    }

    #[test]
    fn first_tick_has_no_interval() {
        let reporter = TickTimingReporter::new(Duration::from_millis(20));
        assert!(reporter.record_tick().is_none());
        assert!(reporter.record_tick().is_some());
    }
}

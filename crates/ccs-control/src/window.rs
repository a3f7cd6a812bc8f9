//! ---
//! ccs_section: "01-control-kernel"
//! ccs_subsection: "module"
//! ccs_type: "source"
//! ccs_scope: "code"
//! ccs_description: "Three-layer decision pipeline and supporting state machines."
//! ccs_version: "v0.1.0"
//! ccs_owner: "tbd"
//! ---
use std::collections::VecDeque;
use std::time::Duration;

use ccs_common::config::WindowConfig;
use ccs_telemetry::frames::{Channel, TelemetryFrame};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One retained sample. Values are stored in [`Channel::ALL`] order.
#[derive(Debug, Clone, Copy)]
struct WindowSample {
    monotonic_ns: u64,
    timestamp: DateTime<Utc>,
    values: [f64; 9],
}

/// Descriptive statistics for one channel over the retained window.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ChannelStats {
    pub current: f64,
    pub mean: f64,
    pub std_dev: f64,
    /// Least-squares slope, degrees (or units) per minute.
    pub slope_per_min: f64,
}

/// Serializable digest of the window for operator reads.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WindowSummary {
    pub samples: usize,
    pub capacity: usize,
    pub span: Duration,
    pub first_at: Option<DateTime<Utc>>,
    pub last_at: Option<DateTime<Utc>>,
    pub channels: Vec<(Channel, ChannelStats)>,
}

/// Fixed-capacity, stride-gated ring over recent telemetry.
///
/// Appends are gated so retained samples sit at least one stride apart
/// (minus a 10 % jitter allowance), which keeps the covered horizon stable
/// regardless of tick-rate drift. Intermediate frames are simply not
/// retained. Stale frames are refused outright.
#[derive(Debug)]
pub struct SequenceWindow {
    samples: VecDeque<WindowSample>,
    capacity: usize,
    min_gap_ns: u64,
}

impl SequenceWindow {
    pub fn new(config: &WindowConfig) -> Self {
        let stride_ns = config.stride.as_nanos() as u64;
        Self {
            samples: VecDeque::with_capacity(config.capacity),
            capacity: config.capacity,
            min_gap_ns: stride_ns - stride_ns / 10,
        }
    }

    /// Append the frame if the stride gate admits it. Returns whether the
    /// frame was retained.
    pub fn append(&mut self, frame: &TelemetryFrame) -> bool {
        if frame.is_stale {
            return false;
        }
        if let Some(last) = self.samples.back() {
            if frame.monotonic_ns <= last.monotonic_ns {
                return false;
            }
            if frame.monotonic_ns - last.monotonic_ns < self.min_gap_ns {
                return false;
            }
        }
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        let mut values = [0.0; 9];
        for (slot, channel) in values.iter_mut().zip(Channel::ALL) {
            *slot = frame.channel(channel);
        }
        self.samples.push_back(WindowSample {
            monotonic_ns: frame.monotonic_ns,
            timestamp: frame.timestamp,
            values,
        });
        true
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Time covered by the retained samples.
    pub fn span(&self) -> Duration {
        match (self.samples.front(), self.samples.back()) {
            (Some(first), Some(last)) => {
                Duration::from_nanos(last.monotonic_ns - first.monotonic_ns)
            }
            _ => Duration::ZERO,
        }
    }

    /// Descriptive statistics for one channel. `None` on an empty window.
    pub fn stats(&self, channel: Channel) -> Option<ChannelStats> {
        let back = self.samples.back()?;
        let idx = Channel::ALL.iter().position(|c| *c == channel)?;
        let n = self.samples.len() as f64;

        let mut sum = 0.0;
        for sample in &self.samples {
            sum += sample.values[idx];
        }
        let mean = sum / n;

        let mut var_sum = 0.0;
        for sample in &self.samples {
            let delta = sample.values[idx] - mean;
            var_sum += delta * delta;
        }
        let std_dev = (var_sum / n).sqrt();

        Some(ChannelStats {
            current: back.values[idx],
            mean,
            std_dev,
            slope_per_min: self.slope_per_min(idx),
        })
    }

    /// Least-squares slope of one channel against time, per minute.
    fn slope_per_min(&self, idx: usize) -> f64 {
        if self.samples.len() < 2 {
            return 0.0;
        }
        let origin_ns = self.samples.front().map(|s| s.monotonic_ns).unwrap_or(0);
        let n = self.samples.len() as f64;
        let mut sum_t = 0.0;
        let mut sum_v = 0.0;
        let mut sum_tt = 0.0;
        let mut sum_tv = 0.0;
        for sample in &self.samples {
            let t_min = (sample.monotonic_ns - origin_ns) as f64 / 60.0e9;
            let v = sample.values[idx];
            sum_t += t_min;
            sum_v += v;
            sum_tt += t_min * t_min;
            sum_tv += t_min * v;
        }
        let denom = n * sum_tt - sum_t * sum_t;
        if denom.abs() < 1e-12 {
            return 0.0;
        }
        (n * sum_tv - sum_t * sum_v) / denom
    }

    pub fn summary(&self) -> WindowSummary {
        WindowSummary {
            samples: self.samples.len(),
            capacity: self.capacity,
            span: self.span(),
            first_at: self.samples.front().map(|s| s.timestamp),
            last_at: self.samples.back().map(|s| s.timestamp),
            channels: Channel::ALL
                .iter()
                .filter_map(|channel| self.stats(*channel).map(|stats| (*channel, stats)))
                .collect(),
        }
    }
}

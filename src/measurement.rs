//! Sweep results: samples, status, and read-only views.
//!
//! [`MeasurementResult`] grows only while the sweep sequencer runs; once the
//! status leaves [`SweepStatus::Running`] it is handed to consumers
//! (plotting, tables, exporters) as an immutable record. Aggregation here is
//! stateless assembly with no retry or failure logic of its own.

use crate::config::MeasurementConfig;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// One measured point, created right after the instrument read and immutable
/// thereafter.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    /// Applied (sensed) voltage in volts.
    pub voltage: f64,
    /// Measured current in amps.
    pub current: f64,
    /// Measured optical power in watts, when an optical channel is attached.
    pub power: Option<f64>,
    /// The instrument limited itself at its compliance ceiling for this
    /// point; the recorded current is the limited value.
    pub in_compliance: bool,
    /// Point belongs to the return leg of a bidirectional sweep.
    pub reverse: bool,
}

/// Lifecycle of one sweep. Terminal states are never left; a new sweep gets
/// a new result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SweepStatus {
    /// Samples are still being collected.
    Running,
    /// Every stimulus point was visited.
    Completed,
    /// Stopped on request; collected samples are retained.
    Aborted,
    /// Stopped by a hardware or communication failure.
    Failed,
}

impl SweepStatus {
    /// True once the sweep can no longer change.
    pub fn is_terminal(self) -> bool {
        self != SweepStatus::Running
    }
}

impl fmt::Display for SweepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SweepStatus::Running => "running",
            SweepStatus::Completed => "completed",
            SweepStatus::Aborted => "aborted",
            SweepStatus::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Extremes over the collected samples, for quick consumer summaries.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SweepSummary {
    /// Number of samples collected.
    pub samples: usize,
    /// Smallest measured current in amps.
    pub min_current: f64,
    /// Largest measured current in amps.
    pub max_current: f64,
    /// Largest measured optical power in watts, if any power was recorded.
    pub max_power: Option<f64>,
    /// Number of points where the instrument hit compliance.
    pub compliance_hits: usize,
}

/// The ordered samples of one sweep plus its originating configuration and
/// outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeasurementResult {
    /// Unique id for this run.
    pub id: Uuid,
    /// Configuration the sweep was started with.
    pub config: MeasurementConfig,
    /// Samples in generation order.
    pub samples: Vec<Sample>,
    /// Current lifecycle state.
    pub status: SweepStatus,
    /// Failure description when `status` is `Failed`.
    pub error: Option<String>,
    /// When the sweep started.
    pub started_at: DateTime<Utc>,
    /// When the sweep reached a terminal state.
    pub finished_at: Option<DateTime<Utc>>,
}

impl MeasurementResult {
    /// Starts an empty running result for the given configuration.
    pub fn new(config: MeasurementConfig) -> Self {
        Self {
            id: Uuid::new_v4(),
            config,
            samples: Vec::new(),
            status: SweepStatus::Running,
            error: None,
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    pub(crate) fn push(&mut self, sample: Sample) {
        debug_assert_eq!(self.status, SweepStatus::Running);
        self.samples.push(sample);
    }

    pub(crate) fn finish(&mut self, status: SweepStatus, error: Option<String>) {
        debug_assert!(status.is_terminal());
        debug_assert_eq!(self.status, SweepStatus::Running);
        self.status = status;
        self.error = error;
        self.finished_at = Some(Utc::now());
    }

    /// Samples of the forward leg (all samples for a one-way sweep).
    pub fn forward_leg(&self) -> &[Sample] {
        let n = self.samples.len().min(self.config.points);
        &self.samples[..n]
    }

    /// Samples of the return leg, empty for one-way sweeps. Shares the
    /// turnaround point with the forward leg, matching how hysteresis plots
    /// are drawn.
    pub fn reverse_leg(&self) -> &[Sample] {
        if !self.config.bidirectional || self.samples.len() < self.config.points {
            return &[];
        }
        &self.samples[self.config.points - 1..]
    }

    /// Extremes over the collected samples; `None` while empty.
    pub fn summary(&self) -> Option<SweepSummary> {
        if self.samples.is_empty() {
            return None;
        }
        let mut min_current = f64::INFINITY;
        let mut max_current = f64::NEG_INFINITY;
        let mut max_power: Option<f64> = None;
        let mut compliance_hits = 0;
        for sample in &self.samples {
            min_current = min_current.min(sample.current);
            max_current = max_current.max(sample.current);
            if let Some(p) = sample.power {
                max_power = Some(max_power.map_or(p, |m: f64| m.max(p)));
            }
            if sample.in_compliance {
                compliance_hits += 1;
            }
        }
        Some(SweepSummary {
            samples: self.samples.len(),
            min_current,
            max_current,
            max_power,
            compliance_hits,
        })
    }
}

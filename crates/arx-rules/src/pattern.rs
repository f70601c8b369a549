//! Statistical pattern detection over the event history
//!
//! Each detector looks at the top-level numeric fields of the records in a
//! trailing window and reports per-field signals:
//!
//! - **anomaly**: the latest sample is far from the preceding samples, measured
//!   as a z-score against their mean and population standard deviation
//! - **trend**: least-squares slope of the samples in timestamp order
//! - **spike**: a sample exceeds a multiple of the mean of the two before it
//!
//! Detection is diagnostic; it never triggers rules on its own.

use arx_core::path;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

use crate::history::EventRecord;

/// Detector thresholds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PatternConfig {
    /// |z| above which the latest sample is an anomaly
    pub anomaly_z_threshold: f64,
    /// |z| above which an anomaly is high severity
    pub anomaly_high_z_threshold: f64,
    pub min_anomaly_points: usize,

    /// |slope| above which a series is trending
    pub trend_slope_threshold: f64,
    pub min_trend_points: usize,

    /// Ratio over the two-sample baseline that counts as a spike
    pub spike_ratio: f64,
    /// Ratio at which a spike is high severity
    pub spike_high_ratio: f64,
    pub min_spike_points: usize,

    /// Minimum records in the window before any detector runs
    pub min_window_events: usize,
}

impl Default for PatternConfig {
    fn default() -> Self {
        Self {
            anomaly_z_threshold: 2.5,
            anomaly_high_z_threshold: 3.0,
            min_anomaly_points: 5,
            trend_slope_threshold: 0.1,
            min_trend_points: 5,
            spike_ratio: 2.0,
            spike_high_ratio: 5.0,
            min_spike_points: 3,
            min_window_events: 3,
        }
    }
}

impl PatternConfig {
    /// Settings under which a detector cannot produce a meaningful result
    pub fn validation_errors(&self) -> Vec<String> {
        let mut errors = Vec::new();

        // Anomalies score the latest sample against at least one earlier one
        if self.min_anomaly_points < 2 {
            errors.push(format!(
                "min_anomaly_points must be at least 2, got {}",
                self.min_anomaly_points
            ));
        }
        if self.min_trend_points < 2 {
            errors.push(format!(
                "min_trend_points must be at least 2, got {}",
                self.min_trend_points
            ));
        }
        // Two baseline samples plus the candidate
        if self.min_spike_points < 3 {
            errors.push(format!(
                "min_spike_points must be at least 3, got {}",
                self.min_spike_points
            ));
        }
        for (name, value) in [
            ("anomaly_z_threshold", self.anomaly_z_threshold),
            ("anomaly_high_z_threshold", self.anomaly_high_z_threshold),
            ("spike_ratio", self.spike_ratio),
            ("spike_high_ratio", self.spike_high_ratio),
        ] {
            if !value.is_finite() || value <= 0.0 {
                errors.push(format!("{name} must be a positive number, got {value}"));
            }
        }
        if !self.trend_slope_threshold.is_finite() || self.trend_slope_threshold < 0.0 {
            errors.push(format!(
                "trend_slope_threshold must be a non-negative number, got {}",
                self.trend_slope_threshold
            ));
        }

        errors
    }
}

/// Detector selector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternKind {
    Anomaly,
    Trend,
    Spike,
}

impl PatternKind {
    pub const ALL: [PatternKind; 3] = [PatternKind::Anomaly, PatternKind::Trend, PatternKind::Spike];

    pub fn as_str(&self) -> &'static str {
        match self {
            PatternKind::Anomaly => "anomaly",
            PatternKind::Trend => "trend",
            PatternKind::Spike => "spike",
        }
    }
}

impl std::fmt::Display for PatternKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for PatternKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "anomaly" => Ok(PatternKind::Anomaly),
            "trend" => Ok(PatternKind::Trend),
            "spike" => Ok(PatternKind::Spike),
            other => Err(format!("unknown pattern type: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Medium,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrendDirection {
    Increasing,
    Decreasing,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Anomaly {
    pub field: String,
    pub latest_value: f64,
    pub mean_value: f64,
    pub std_dev: f64,
    /// Absolute z-score; infinite when the baseline is flat
    pub z_score: f64,
    pub severity: Severity,
    pub detected_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trend {
    pub field: String,
    pub direction: TrendDirection,
    pub slope: f64,
    /// |slope| clamped to [0, 1]
    pub strength: f64,
    pub data_points: usize,
    pub detected_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Spike {
    pub field: String,
    /// Index of the spiking sample in the field's series
    pub position: usize,
    pub spike_value: f64,
    pub baseline_average: f64,
    pub magnitude: f64,
    pub severity: Severity,
    pub timestamp: DateTime<Utc>,
    pub detected_at: DateTime<Utc>,
}

/// A pattern found in the event history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DetectedPattern {
    Anomaly(Anomaly),
    Trend(Trend),
    Spike(Spike),
}

impl DetectedPattern {
    pub fn kind(&self) -> PatternKind {
        match self {
            DetectedPattern::Anomaly(_) => PatternKind::Anomaly,
            DetectedPattern::Trend(_) => PatternKind::Trend,
            DetectedPattern::Spike(_) => PatternKind::Spike,
        }
    }

    pub fn field(&self) -> &str {
        match self {
            DetectedPattern::Anomaly(a) => &a.field,
            DetectedPattern::Trend(t) => &t.field,
            DetectedPattern::Spike(s) => &s.field,
        }
    }
}

type Series = Vec<(DateTime<Utc>, f64)>;

/// Runs the anomaly, trend and spike detectors
#[derive(Debug, Clone, Default)]
pub struct PatternDetector {
    config: PatternConfig,
}

impl PatternDetector {
    pub fn new(config: PatternConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &PatternConfig {
        &self.config
    }

    /// Run one detector over the records of a window
    pub fn detect(
        &self,
        kind: PatternKind,
        window: &[EventRecord],
        now: DateTime<Utc>,
    ) -> Vec<DetectedPattern> {
        if window.len() < self.config.min_window_events {
            debug!(
                pattern = %kind,
                events = window.len(),
                "Not enough events in window for pattern detection"
            );
            return Vec::new();
        }

        let series = numeric_series(window);
        let patterns: Vec<_> = match kind {
            PatternKind::Anomaly => series
                .iter()
                .filter_map(|(field, s)| self.anomaly(field, s, now))
                .map(DetectedPattern::Anomaly)
                .collect(),
            PatternKind::Trend => series
                .iter()
                .filter_map(|(field, s)| self.trend(field, s, now))
                .map(DetectedPattern::Trend)
                .collect(),
            PatternKind::Spike => series
                .iter()
                .flat_map(|(field, s)| self.spikes(field, s, now))
                .map(DetectedPattern::Spike)
                .collect(),
        };

        debug!(pattern = %kind, found = patterns.len(), "Pattern detection complete");
        patterns
    }

    /// Run every detector over the records of a window
    pub fn detect_all(&self, window: &[EventRecord], now: DateTime<Utc>) -> Vec<DetectedPattern> {
        PatternKind::ALL
            .iter()
            .flat_map(|kind| self.detect(*kind, window, now))
            .collect()
    }

    fn anomaly(&self, field: &str, series: &Series, now: DateTime<Utc>) -> Option<Anomaly> {
        if series.len() < self.config.min_anomaly_points {
            return None;
        }

        let values: Vec<f64> = series.iter().map(|(_, v)| *v).collect();
        let (baseline, latest) = values.split_at(values.len() - 1);
        let latest = latest[0];

        // Fields that never change carry no signal
        if values.iter().all(|v| *v == values[0]) {
            return None;
        }

        let (mean, std_dev) = mean_and_std(baseline);
        let z_score = if std_dev > 0.0 {
            ((latest - mean) / std_dev).abs()
        } else {
            f64::INFINITY
        };

        if z_score <= self.config.anomaly_z_threshold {
            return None;
        }

        Some(Anomaly {
            field: field.to_string(),
            latest_value: latest,
            mean_value: mean,
            std_dev,
            z_score,
            severity: if z_score > self.config.anomaly_high_z_threshold {
                Severity::High
            } else {
                Severity::Medium
            },
            detected_at: now,
        })
    }

    fn trend(&self, field: &str, series: &Series, now: DateTime<Utc>) -> Option<Trend> {
        let n = series.len();
        if n < self.config.min_trend_points {
            return None;
        }

        let x_mean = (n - 1) as f64 / 2.0;
        let y_mean = series.iter().map(|(_, v)| v).sum::<f64>() / n as f64;

        let (mut numerator, mut denominator) = (0.0, 0.0);
        for (i, (_, y)) in series.iter().enumerate() {
            let dx = i as f64 - x_mean;
            numerator += dx * (y - y_mean);
            denominator += dx * dx;
        }
        if denominator <= 0.0 {
            return None;
        }

        let slope = numerator / denominator;
        if slope.abs() <= self.config.trend_slope_threshold {
            return None;
        }

        Some(Trend {
            field: field.to_string(),
            direction: if slope > 0.0 {
                TrendDirection::Increasing
            } else {
                TrendDirection::Decreasing
            },
            slope,
            strength: slope.abs().min(1.0),
            data_points: n,
            detected_at: now,
        })
    }

    fn spikes(&self, field: &str, series: &Series, now: DateTime<Utc>) -> Vec<Spike> {
        if series.len() < self.config.min_spike_points {
            return Vec::new();
        }

        series
            .windows(3)
            .enumerate()
            .filter_map(|(offset, w)| {
                let baseline = (w[0].1 + w[1].1) / 2.0;
                let (timestamp, current) = w[2];
                if baseline <= 0.0 || current <= baseline * self.config.spike_ratio {
                    return None;
                }
                let magnitude = current / baseline;
                Some(Spike {
                    field: field.to_string(),
                    position: offset + 2,
                    spike_value: current,
                    baseline_average: baseline,
                    magnitude,
                    severity: if magnitude >= self.config.spike_high_ratio {
                        Severity::High
                    } else {
                        Severity::Medium
                    },
                    timestamp,
                    detected_at: now,
                })
            })
            .collect()
    }
}

/// Group top-level numeric fields into timestamp-ordered series
fn numeric_series(window: &[EventRecord]) -> BTreeMap<String, Series> {
    let mut series: BTreeMap<String, Series> = BTreeMap::new();
    for record in window {
        for (field, value) in path::numeric_fields(&record.data) {
            series
                .entry(field.to_string())
                .or_default()
                .push((record.timestamp, value));
        }
    }
    for s in series.values_mut() {
        s.sort_by_key(|(ts, _)| *ts);
    }
    series
}

/// Mean and population standard deviation
fn mean_and_std(values: &[f64]) -> (f64, f64) {
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    (mean, variance.sqrt())
}

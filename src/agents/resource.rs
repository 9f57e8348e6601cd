//! Resource Agent — saturation, drift and correlated breach detection
//!
//! Works on the metric side of the snapshot:
//!
//! - **Sustained breaches**: per-metric warning/critical threshold pairs; a
//!   (resource, metric) series with repeated samples over a threshold emits
//!   one sustained anomaly at the worst level reached.
//! - **Drift**: the mean of the last third of a series at least 1.3x the
//!   mean of the first third signals gradual degradation.
//! - **Correlated saturation**: two or more distinct resources breaching in
//!   the same window point at a shared cause.
//!
//! Detection is rule-based on fixed thresholds; the adaptive-baseline agent
//! covers the learned-normal side.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::blackboard::{Anomaly, AnomalyDraft, AnomalyKind, Blackboard};
use crate::observation::ObservedMetric;

use super::{AgentError, DetectionAgent, DetectionReport, ObservationSnapshot};

/// Per-metric warning/critical thresholds.
pub mod resource_thresholds {
    pub const MEMORY_WARNING: f64 = 75.0;
    pub const MEMORY_CRITICAL: f64 = 90.0;
    pub const CPU_WARNING: f64 = 70.0;
    pub const CPU_CRITICAL: f64 = 85.0;
    pub const DISK_WARNING: f64 = 80.0;
    pub const DISK_CRITICAL: f64 = 95.0;
    /// Latency thresholds are in milliseconds.
    pub const LATENCY_WARNING: f64 = 100.0;
    pub const LATENCY_CRITICAL: f64 = 500.0;
}

/// Samples at or over a threshold before a breach counts as sustained.
const SUSTAINED_MIN_SAMPLES: usize = 2;

/// Minimum series length for trend analysis.
const TREND_MIN_SAMPLES: usize = 6;

/// Last-third over first-third ratio that counts as drift.
const TREND_RATIO: f64 = 1.3;

/// Threshold tuple for one metric name.
#[derive(Debug, Clone, Copy)]
pub struct ThresholdPair {
    pub warning: f64,
    pub critical: f64,
}

pub struct ResourceAgent {
    thresholds: BTreeMap<String, ThresholdPair>,
}

impl ResourceAgent {
    pub const AGENT_NAME: &'static str = "ResourceAgent";

    pub fn new() -> Self {
        use resource_thresholds as t;
        let mut thresholds = BTreeMap::new();
        let mut add = |name: &str, warning: f64, critical: f64| {
            thresholds.insert(name.to_string(), ThresholdPair { warning, critical });
        };
        add("memory_usage", t::MEMORY_WARNING, t::MEMORY_CRITICAL);
        add("cpu_usage", t::CPU_WARNING, t::CPU_CRITICAL);
        add("disk_usage", t::DISK_WARNING, t::DISK_CRITICAL);
        add("network_latency", t::LATENCY_WARNING, t::LATENCY_CRITICAL);
        add("network_latency_ms", t::LATENCY_WARNING, t::LATENCY_CRITICAL);
        Self { thresholds }
    }

    pub fn with_thresholds(thresholds: BTreeMap<String, ThresholdPair>) -> Self {
        Self { thresholds }
    }

    /// Synthetic evidence reference for a metric series (metrics carry no
    /// per-sample ids; the series is identified by its source).
    fn series_ref(resource_id: &str, metric_name: &str) -> String {
        format!("metric_{resource_id}_{metric_name}")
    }

    fn detect_sustained_breach(
        &self,
        resource_id: &str,
        metric_name: &str,
        series: &[(DateTime<Utc>, f64)],
        cycle_id: &str,
        board: &Blackboard,
    ) -> Result<Option<Anomaly>, AgentError> {
        let Some(pair) = self.thresholds.get(metric_name) else {
            return Ok(None);
        };

        let critical_samples: Vec<&(DateTime<Utc>, f64)> =
            series.iter().filter(|(_, v)| *v >= pair.critical).collect();
        let warning_samples: Vec<&(DateTime<Utc>, f64)> =
            series.iter().filter(|(_, v)| *v >= pair.warning).collect();

        let (kind, threshold, samples) = if critical_samples.len() >= SUSTAINED_MIN_SAMPLES {
            (
                AnomalyKind::SustainedResourceCritical,
                pair.critical,
                critical_samples,
            )
        } else if warning_samples.len() >= SUSTAINED_MIN_SAMPLES {
            (
                AnomalyKind::SustainedResourceWarning,
                pair.warning,
                warning_samples,
            )
        } else {
            return Ok(None);
        };

        let peak = samples
            .iter()
            .map(|(_, v)| *v)
            .fold(f64::NEG_INFINITY, f64::max);
        let latest_ts = samples
            .iter()
            .map(|(ts, _)| *ts)
            .max()
            .unwrap_or_else(Utc::now);
        let overage = (peak - threshold) / threshold;
        let confidence = (0.7 + overage * 0.25).min(0.95);

        let anomaly = board.add_anomaly(
            cycle_id,
            AnomalyDraft {
                kind,
                agent: Self::AGENT_NAME.to_string(),
                evidence: vec![Self::series_ref(resource_id, metric_name)],
                description: format!(
                    "Resource {resource_id} {metric_name} sustained above {threshold:.0} \
                     ({} samples, peak {peak:.1}, {:.1}% over)",
                    samples.len(),
                    overage * 100.0
                ),
                confidence,
                timestamp: latest_ts,
            },
        )?;
        Ok(Some(anomaly))
    }

    fn detect_drift(
        &self,
        resource_id: &str,
        metric_name: &str,
        series: &[(DateTime<Utc>, f64)],
        cycle_id: &str,
        board: &Blackboard,
    ) -> Result<Option<Anomaly>, AgentError> {
        if series.len() < TREND_MIN_SAMPLES {
            return Ok(None);
        }

        // Means over the real slice lengths: a 7-sample window compares
        // samples [0..2] against [5..7], never an empty chunk.
        let third = (series.len() / 3).max(1);
        let first: f64 =
            series[..third].iter().map(|(_, v)| *v).sum::<f64>() / third as f64;
        let last: f64 = series[series.len() - third..]
            .iter()
            .map(|(_, v)| *v)
            .sum::<f64>()
            / third as f64;

        if first <= 0.0 || last < first * TREND_RATIO {
            return Ok(None);
        }

        let increase_pct = (last - first) / first * 100.0;
        let latest_ts = series
            .last()
            .map(|(ts, _)| *ts)
            .unwrap_or_else(Utc::now);

        let anomaly = board.add_anomaly(
            cycle_id,
            AnomalyDraft {
                kind: AnomalyKind::ResourceDrift,
                agent: Self::AGENT_NAME.to_string(),
                evidence: vec![Self::series_ref(resource_id, metric_name)],
                description: format!(
                    "Resource {resource_id} {metric_name} drifting: window mean rose from \
                     {first:.1} to {last:.1} (+{increase_pct:.1}%) over {} samples",
                    series.len()
                ),
                confidence: (0.6 + increase_pct / 200.0).min(0.9),
                timestamp: latest_ts,
            },
        )?;
        Ok(Some(anomaly))
    }
}

impl Default for ResourceAgent {
    fn default() -> Self {
        Self::new()
    }
}

impl DetectionAgent for ResourceAgent {
    fn name(&self) -> &'static str {
        Self::AGENT_NAME
    }

    fn analyze(
        &self,
        snapshot: &ObservationSnapshot,
        cycle_id: &str,
        board: &Blackboard,
    ) -> Result<DetectionReport, AgentError> {
        let mut report = DetectionReport::default();
        if snapshot.metrics.is_empty() {
            return Ok(report);
        }

        // Group into time-ordered series per (resource, metric).
        let mut series: BTreeMap<(String, String), Vec<(DateTime<Utc>, f64)>> = BTreeMap::new();
        for metric in &snapshot.metrics {
            series
                .entry((metric.resource_id.clone(), metric.metric_name.clone()))
                .or_default()
                .push((metric.timestamp, metric.value));
        }
        for points in series.values_mut() {
            points.sort_by_key(|(ts, _)| *ts);
        }

        // Breach + drift per series, tracking which resources breached for
        // the correlation pass.
        let mut breaching: Vec<(String, String, DateTime<Utc>)> = Vec::new();
        for ((resource_id, metric_name), points) in &series {
            if let Some(anomaly) =
                self.detect_sustained_breach(resource_id, metric_name, points, cycle_id, board)?
            {
                breaching.push((resource_id.clone(), metric_name.clone(), anomaly.timestamp));
                report.anomalies.push(anomaly);
            }
            if let Some(anomaly) =
                self.detect_drift(resource_id, metric_name, points, cycle_id, board)?
            {
                report.anomalies.push(anomaly);
            }
        }

        // ── Correlated saturation across distinct resources ──
        let mut distinct: Vec<&str> = breaching.iter().map(|(r, _, _)| r.as_str()).collect();
        distinct.sort_unstable();
        distinct.dedup();
        if distinct.len() >= 2 {
            let latest_ts = breaching
                .iter()
                .map(|(_, _, ts)| *ts)
                .max()
                .unwrap_or_else(Utc::now);
            let evidence: Vec<String> = breaching
                .iter()
                .map(|(r, m, _)| Self::series_ref(r, m))
                .collect();
            report.anomalies.push(board.add_anomaly(
                cycle_id,
                AnomalyDraft {
                    kind: AnomalyKind::CorrelationAlert,
                    agent: Self::AGENT_NAME.to_string(),
                    evidence,
                    description: format!(
                        "{} resources breaching thresholds simultaneously ({}): \
                         probable common cause or cascading failure",
                        distinct.len(),
                        distinct.join(", ")
                    ),
                    confidence: 0.85,
                    timestamp: latest_ts,
                },
            )?);
        }

        if !report.anomalies.is_empty() {
            debug!(anomalies = report.anomalies.len(), "resource findings");
        }
        Ok(report)
    }
}

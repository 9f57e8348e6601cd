//! Adaptive Baseline Agent — learned-normal deviation detection
//!
//! Learns "normal" per (entity, metric) with bounded rolling windows and
//! dynamically adapts detection thresholds. If CPU normally runs at 70%,
//! don't alert at 75%; if a metric stabilizes at a new level, adapt to the
//! new normal. Statistical rolling windows only — no learned models.
//!
//! Deviation is evaluated **before** the new sample updates the baseline, so
//! the sample under test cannot dampen its own detection.
//!
//! Narrow state: the per-(entity, metric) [`BaselineProfile`] map, owned by
//! this agent and never mutated from outside.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::debug;

use crate::blackboard::{AnomalyDraft, AnomalyKind, Blackboard};

use super::{AgentError, DetectionAgent, DetectionReport, ObservationSnapshot};

/// Rolling window bound per profile.
pub const WINDOW_SIZE: usize = 50;

/// Samples required before a baseline starts judging values.
pub const MIN_SAMPLES: usize = 10;

/// Standard deviations for anomaly detection.
pub const DEVIATION_SIGMA: f64 = 2.5;

/// Threshold smoothing rate (0 = frozen, 1 = instant).
pub const ADAPTATION_RATE: f64 = 0.1;

/// Starting threshold before any learning has happened.
const INITIAL_THRESHOLD: f64 = 80.0;

// ============================================================================
// Baseline Profile
// ============================================================================

/// Rolling baseline for a single metric on a single entity.
#[derive(Debug, Clone, Serialize)]
pub struct BaselineProfile {
    pub entity: String,
    pub metric: String,
    #[serde(skip)]
    values: Vec<f64>,
    pub mean: f64,
    pub stddev: f64,
    pub adapted_threshold: f64,
    pub samples_seen: u64,
    pub last_updated: Option<DateTime<Utc>>,
    /// True once MIN_SAMPLES have accrued.
    pub is_active: bool,
}

impl BaselineProfile {
    fn new(entity: &str, metric: &str) -> Self {
        Self {
            entity: entity.to_string(),
            metric: metric.to_string(),
            values: Vec::new(),
            mean: 0.0,
            stddev: 0.0,
            adapted_threshold: INITIAL_THRESHOLD,
            samples_seen: 0,
            last_updated: None,
            is_active: false,
        }
    }

    /// Add a new observation and recompute the rolling stats.
    fn add_value(&mut self, value: f64, timestamp: DateTime<Utc>) {
        self.values.push(value);
        self.samples_seen += 1;
        self.last_updated = Some(timestamp);

        if self.values.len() > WINDOW_SIZE {
            let excess = self.values.len() - WINDOW_SIZE;
            self.values.drain(..excess);
        }

        if self.values.len() >= MIN_SAMPLES {
            self.is_active = true;
            let n = self.values.len() as f64;
            self.mean = self.values.iter().sum::<f64>() / n;
            let variance =
                self.values.iter().map(|v| (v - self.mean).powi(2)).sum::<f64>() / n;
            // Floor keeps a degenerate window (all-identical samples) from
            // producing divide-by-zero sigmas.
            self.stddev = if variance > 0.0 { variance.sqrt() } else { 1.0 };

            let target = self.mean + DEVIATION_SIGMA * self.stddev;
            self.adapted_threshold =
                (1.0 - ADAPTATION_RATE) * self.adapted_threshold + ADAPTATION_RATE * target;
        }
    }

    /// Deviation of `value` from the baseline, in standard deviations.
    pub fn deviation_sigma(&self, value: f64) -> f64 {
        if !self.is_active || self.stddev == 0.0 {
            return 0.0;
        }
        (value - self.mean) / self.stddev
    }

    pub fn window_len(&self) -> usize {
        self.values.len()
    }
}

// ============================================================================
// Adaptive Baseline Agent
// ============================================================================

pub struct AdaptiveBaselineAgent {
    profiles: Mutex<HashMap<(String, String), BaselineProfile>>,
}

impl AdaptiveBaselineAgent {
    pub const AGENT_NAME: &'static str = "AdaptiveBaselineAgent";

    pub fn new() -> Self {
        Self {
            profiles: Mutex::new(HashMap::new()),
        }
    }

    /// Snapshot of one profile for operator queries.
    pub fn baseline_for(&self, entity: &str, metric: &str) -> Option<BaselineProfile> {
        self.lock()
            .get(&(entity.to_string(), metric.to_string()))
            .cloned()
    }

    /// Snapshot of all active profiles.
    pub fn baselines(&self) -> Vec<BaselineProfile> {
        self.lock().values().cloned().collect()
    }

    fn lock(
        &self,
    ) -> std::sync::MutexGuard<'_, HashMap<(String, String), BaselineProfile>> {
        match self.profiles.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl Default for AdaptiveBaselineAgent {
    fn default() -> Self {
        Self::new()
    }
}

impl DetectionAgent for AdaptiveBaselineAgent {
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

        // Oldest first so replayed history builds baselines in order.
        let mut metrics = snapshot.metrics.clone();
        metrics.sort_by_key(|m| m.timestamp);

        for metric in &metrics {
            let key = (metric.resource_id.clone(), metric.metric_name.clone());
            let mut profiles = self.lock();
            let profile = profiles
                .entry(key)
                .or_insert_with(|| BaselineProfile::new(&metric.resource_id, &metric.metric_name));

            // Deviation check first, update second.
            if profile.is_active {
                let sigma = profile.deviation_sigma(metric.value);
                if sigma.abs() > DEVIATION_SIGMA {
                    let description = format!(
                        "{} on {} at {:.1} is {:.1} sigma from baseline (mean={:.1}, sd={:.1}); adaptive threshold {:.1}",
                        metric.metric_name,
                        metric.resource_id,
                        metric.value,
                        sigma.abs(),
                        profile.mean,
                        profile.stddev,
                        profile.adapted_threshold,
                    );
                    let confidence = (0.5 + sigma.abs() * 0.1).min(0.95);
                    let evidence =
                        vec![format!("metric_{}_{}", metric.resource_id, metric.metric_name)];
                    let timestamp = metric.timestamp;
                    drop(profiles);

                    report.anomalies.push(board.add_anomaly(
                        cycle_id,
                        AnomalyDraft {
                            kind: AnomalyKind::BaselineDeviation,
                            agent: Self::AGENT_NAME.to_string(),
                            evidence,
                            description,
                            confidence,
                            timestamp,
                        },
                    )?);

                    let mut profiles = self.lock();
                    if let Some(profile) = profiles.get_mut(&(
                        metric.resource_id.clone(),
                        metric.metric_name.clone(),
                    )) {
                        profile.add_value(metric.value, metric.timestamp);
                    }
                    continue;
                }
            }

            profile.add_value(metric.value, metric.timestamp);
        }

        if !report.anomalies.is_empty() {
            debug!(anomalies = report.anomalies.len(), "baseline deviations");
        }
        Ok(report)
    }
}

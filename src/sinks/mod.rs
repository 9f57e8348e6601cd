//! External collaborators — outbound, best-effort only
//!
//! The reasoning loop never depends on anything here. Every write is
//! fire-and-forget: failures are logged at debug level and swallowed, and
//! the no-op providers are the defaults so all core behavior holds with
//! every external feature off.
//!
//! - [`GraphSink`]: knowledge-graph mirror for anomalies, causal links and
//!   recommendations.
//! - [`AlertNotifier`] behind the [`AlertGate`]: de-dup + threshold +
//!   cooldown before anything leaves the process.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tracing::debug;

use crate::blackboard::{Anomaly, CausalLink, Recommendation, ReasoningCycle, RiskState};
use crate::insight::Insight;

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("external sink unavailable: {0}")]
    Unavailable(String),
}

// ============================================================================
// Knowledge Graph Sink
// ============================================================================

/// Write-only knowledge-graph mirror. Implementations must be cheap to call
/// and safe to abandon mid-flight.
#[async_trait]
pub trait GraphSink: Send + Sync {
    async fn write_anomaly(&self, anomaly: &Anomaly) -> Result<(), SinkError>;
    async fn write_causal_link(&self, link: &CausalLink) -> Result<(), SinkError>;
    async fn write_recommendation(&self, rec: &Recommendation) -> Result<(), SinkError>;
}

/// Feature-off provider: accepts and drops everything.
pub struct NoopGraphSink;

#[async_trait]
impl GraphSink for NoopGraphSink {
    async fn write_anomaly(&self, _anomaly: &Anomaly) -> Result<(), SinkError> {
        Ok(())
    }

    async fn write_causal_link(&self, _link: &CausalLink) -> Result<(), SinkError> {
        Ok(())
    }

    async fn write_recommendation(&self, _rec: &Recommendation) -> Result<(), SinkError> {
        Ok(())
    }
}

// ============================================================================
// Alert Gate
// ============================================================================

/// What gets handed to a notifier once the gate opens.
#[derive(Debug, Clone, Serialize)]
pub struct AlertPayload {
    pub cycle_id: String,
    pub severity: String,
    pub risk_state: String,
    pub summary: String,
    pub recommended_actions: Vec<String>,
    pub timestamp: DateTime<Utc>,
}

/// Delivery backend behind the gate (chat webhook, pager, …).
#[async_trait]
pub trait AlertNotifier: Send + Sync {
    async fn deliver(&self, payload: &AlertPayload) -> Result<(), SinkError>;
}

/// Feature-off provider: swallows every alert.
pub struct NoopNotifier;

#[async_trait]
impl AlertNotifier for NoopNotifier {
    async fn deliver(&self, _payload: &AlertPayload) -> Result<(), SinkError> {
        Ok(())
    }
}

/// Gate policy knobs.
#[derive(Debug, Clone)]
pub struct AlertGateConfig {
    pub enabled: bool,
    /// Minimum insight severity (LOW/MEDIUM/HIGH/CRITICAL) that may alert.
    pub min_severity: String,
    /// Minimum projected risk state that may alert.
    pub min_risk_state: RiskState,
    pub cooldown_seconds: i64,
}

impl Default for AlertGateConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            min_severity: "HIGH".to_string(),
            min_risk_state: RiskState::Violation,
            cooldown_seconds: 300,
        }
    }
}

struct GateState {
    last_sent_at: Option<DateTime<Utc>>,
    last_cycle_id: Option<String>,
    last_fingerprint: Option<u64>,
}

/// De-dup + threshold + cooldown in front of a notifier.
///
/// Never re-alerts for the same cycle, never re-sends an identical
/// fingerprint (same severity, risk state, top causes and top action), and
/// enforces a cooldown between deliveries. Either the severity threshold or
/// the risk threshold opens the gate.
pub struct AlertGate {
    config: AlertGateConfig,
    notifier: Box<dyn AlertNotifier>,
    state: Mutex<GateState>,
}

fn severity_rank(severity: &str) -> u8 {
    match severity.to_uppercase().as_str() {
        "LOW" => 0,
        "MEDIUM" => 1,
        "HIGH" => 2,
        "CRITICAL" => 3,
        _ => 0,
    }
}

impl AlertGate {
    pub fn new(config: AlertGateConfig, notifier: Box<dyn AlertNotifier>) -> Self {
        Self {
            config,
            notifier,
            state: Mutex::new(GateState {
                last_sent_at: None,
                last_cycle_id: None,
                last_fingerprint: None,
            }),
        }
    }

    pub fn disabled() -> Self {
        Self::new(AlertGateConfig::default(), Box::new(NoopNotifier))
    }

    /// Decide whether this cycle's outcome may alert, and deliver if so.
    /// Returns whether a delivery was attempted. Delivery failure is
    /// swallowed (the gate state still advances, preventing hot retries).
    pub async fn offer(
        &self,
        cycle: &ReasoningCycle,
        insight: Option<&Insight>,
        risk_state: RiskState,
    ) -> bool {
        if !self.should_alert(cycle, insight, risk_state) {
            return false;
        }

        let payload = AlertPayload {
            cycle_id: cycle.cycle_id.clone(),
            severity: insight.map(|i| i.severity.clone()).unwrap_or_else(|| "HIGH".to_string()),
            risk_state: risk_state.to_string(),
            summary: insight.map(|i| i.summary.clone()).unwrap_or_default(),
            recommended_actions: cycle
                .recommendations
                .iter()
                .take(3)
                .map(|r| r.action.clone())
                .collect(),
            timestamp: Utc::now(),
        };

        if let Err(err) = self.notifier.deliver(&payload).await {
            debug!(error = %err, cycle_id = %cycle.cycle_id, "alert delivery failed (ignored)");
        }
        true
    }

    fn should_alert(
        &self,
        cycle: &ReasoningCycle,
        insight: Option<&Insight>,
        risk_state: RiskState,
    ) -> bool {
        if !self.config.enabled {
            return false;
        }

        let mut state = match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        if state.last_cycle_id.as_deref() == Some(cycle.cycle_id.as_str()) {
            return false;
        }

        let fingerprint = Self::fingerprint(cycle, insight, risk_state);
        if state.last_fingerprint == Some(fingerprint) {
            // Strict de-dupe: never send the exact same alert content twice.
            return false;
        }

        if let Some(last) = state.last_sent_at {
            let age = (Utc::now() - last).num_seconds();
            if age < self.config.cooldown_seconds.max(0) {
                return false;
            }
        }

        let severity_ok = insight.is_some_and(|i| {
            severity_rank(&i.severity) >= severity_rank(&self.config.min_severity)
        });
        let risk_ok = risk_state.rank() >= self.config.min_risk_state.rank();
        if !(severity_ok || risk_ok) {
            return false;
        }

        state.last_cycle_id = Some(cycle.cycle_id.clone());
        state.last_fingerprint = Some(fingerprint);
        state.last_sent_at = Some(Utc::now());
        true
    }

    /// Stable content fingerprint: same bad state, same top causes and top
    /// action means no re-alert.
    fn fingerprint(
        cycle: &ReasoningCycle,
        insight: Option<&Insight>,
        risk_state: RiskState,
    ) -> u64 {
        let mut hasher = DefaultHasher::new();
        insight
            .map(|i| i.severity.as_str())
            .unwrap_or("HIGH")
            .hash(&mut hasher);
        risk_state.to_string().hash(&mut hasher);

        let mut anomaly_types: Vec<String> =
            cycle.anomalies.iter().map(|a| a.kind.to_string()).collect();
        anomaly_types.sort();
        anomaly_types.truncate(6);
        anomaly_types.hash(&mut hasher);

        let mut policy_ids: Vec<&str> =
            cycle.policy_hits.iter().map(|p| p.policy_id.as_str()).collect();
        policy_ids.sort();
        policy_ids.truncate(6);
        policy_ids.hash(&mut hasher);

        cycle
            .recommendations
            .first()
            .map(|r| r.action.as_str())
            .unwrap_or("")
            .hash(&mut hasher);

        hasher.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blackboard::records::ReasoningCycle;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct CountingNotifier(Arc<AtomicUsize>);

    #[async_trait]
    impl AlertNotifier for CountingNotifier {
        async fn deliver(&self, _payload: &AlertPayload) -> Result<(), SinkError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct FailingNotifier;

    #[async_trait]
    impl AlertNotifier for FailingNotifier {
        async fn deliver(&self, _payload: &AlertPayload) -> Result<(), SinkError> {
            Err(SinkError::Unavailable("webhook down".to_string()))
        }
    }

    fn cycle(id: &str) -> ReasoningCycle {
        ReasoningCycle::new(id.to_string(), Utc::now())
    }

    fn gate(enabled: bool, counter: Arc<AtomicUsize>) -> AlertGate {
        AlertGate::new(
            AlertGateConfig {
                enabled,
                min_severity: "HIGH".to_string(),
                min_risk_state: RiskState::Violation,
                cooldown_seconds: 0,
            },
            Box::new(CountingNotifier(counter)),
        )
    }

    #[tokio::test]
    async fn disabled_gate_never_alerts() {
        let counter = Arc::new(AtomicUsize::new(0));
        let gate = gate(false, counter.clone());
        assert!(!gate.offer(&cycle("cycle_a"), None, RiskState::Incident).await);
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn risk_threshold_opens_gate() {
        let counter = Arc::new(AtomicUsize::new(0));
        let gate = gate(true, counter.clone());
        assert!(gate.offer(&cycle("cycle_a"), None, RiskState::Incident).await);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn below_both_thresholds_stays_closed() {
        let counter = Arc::new(AtomicUsize::new(0));
        let gate = gate(true, counter.clone());
        assert!(!gate.offer(&cycle("cycle_a"), None, RiskState::Degraded).await);
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn same_cycle_never_realerts() {
        let counter = Arc::new(AtomicUsize::new(0));
        let gate = gate(true, counter.clone());
        let c = cycle("cycle_a");
        assert!(gate.offer(&c, None, RiskState::Incident).await);
        assert!(!gate.offer(&c, None, RiskState::Incident).await);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn identical_fingerprint_suppressed_across_cycles() {
        let counter = Arc::new(AtomicUsize::new(0));
        let gate = gate(true, counter.clone());
        // Different cycle ids, identical (empty) content.
        assert!(gate.offer(&cycle("cycle_a"), None, RiskState::Incident).await);
        assert!(!gate.offer(&cycle("cycle_b"), None, RiskState::Incident).await);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn delivery_failure_is_swallowed() {
        let gate = AlertGate::new(
            AlertGateConfig {
                enabled: true,
                min_severity: "HIGH".to_string(),
                min_risk_state: RiskState::Violation,
                cooldown_seconds: 0,
            },
            Box::new(FailingNotifier),
        );
        // offer() reports the attempt; the failure itself does not surface.
        assert!(gate.offer(&cycle("cycle_a"), None, RiskState::Incident).await);
    }
}

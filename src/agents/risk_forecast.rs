//! Risk Forecast Agent — trajectory prediction on the risk ladder
//!
//! Predicts where risk is heading, not exact failure. Per entity, attributed
//! anomalies and policy hits accumulate into a profile; a monotone mapping
//! from the weighted issue count (policy hits weigh double) projects the
//! entity's next state on the NORMAL → INCIDENT ladder.
//!
//! A signal is emitted **only** when the projection strictly exceeds the
//! entity's last-known state; the profile then advances to the projection,
//! which makes the emitted `current_state` sequence non-decreasing.
//!
//! Narrow state: the per-entity [`EntityRiskProfile`] map.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::blackboard::{
    Anomaly, Blackboard, EntityType, PolicyHit, RiskSignal, RiskSignalDraft, RiskState,
};

use super::AgentError;

/// Maximum evidence ids attached to one signal.
const MAX_EVIDENCE: usize = 10;

// ============================================================================
// Entity Risk Profile
// ============================================================================

/// Cross-cycle risk bookkeeping for one entity.
#[derive(Debug, Clone)]
pub struct EntityRiskProfile {
    pub entity: String,
    pub entity_type: EntityType,
    pub current_state: RiskState,
    pub anomaly_count: u32,
    pub policy_violation_count: u32,
    pub last_updated: Option<DateTime<Utc>>,
}

impl EntityRiskProfile {
    fn new(entity: String, entity_type: EntityType) -> Self {
        Self {
            entity,
            entity_type,
            current_state: RiskState::Normal,
            anomaly_count: 0,
            policy_violation_count: 0,
            last_updated: None,
        }
    }

    /// Monotone mapping from weighted issue count to the ladder. Policy
    /// violations weigh double.
    pub fn projected_state(&self) -> RiskState {
        let total = self.anomaly_count + self.policy_violation_count * 2;
        match total {
            0 => RiskState::Normal,
            1 => RiskState::Degraded,
            2..=3 => RiskState::AtRisk,
            4..=5 => RiskState::Violation,
            _ => RiskState::Incident,
        }
    }

    pub fn confidence(&self) -> f64 {
        (0.5 + 0.1 * self.anomaly_count as f64 + 0.1 * self.policy_violation_count as f64)
            .min(0.95)
    }

    /// Horizon buckets by escalation velocity: more issues, sooner.
    pub fn time_horizon(&self) -> &'static str {
        match self.anomaly_count + self.policy_violation_count {
            0..=2 => "15-30 min",
            3..=4 => "10-15 min",
            _ => "5-10 min",
        }
    }
}

// ============================================================================
// Risk Forecast Agent
// ============================================================================

pub struct RiskForecastAgent {
    profiles: Mutex<HashMap<String, EntityRiskProfile>>,
}

impl RiskForecastAgent {
    pub const AGENT_NAME: &'static str = "RiskForecastAgent";

    pub fn new() -> Self {
        Self {
            profiles: Mutex::new(HashMap::new()),
        }
    }

    /// Forecast over this cycle's anomalies and policy hits. Signals are
    /// written to the blackboard and returned.
    pub fn analyze(
        &self,
        anomalies: &[Anomaly],
        policy_hits: &[PolicyHit],
        cycle_id: &str,
        board: &Blackboard,
    ) -> Result<Vec<RiskSignal>, AgentError> {
        let now = Utc::now();
        let mut profiles = self.lock();

        for anomaly in anomalies {
            let Some(entity) = extract_entity(&anomaly.description, &anomaly.evidence) else {
                continue;
            };
            let entity_type = classify_entity(&entity);
            let profile = profiles
                .entry(entity.clone())
                .or_insert_with(|| EntityRiskProfile::new(entity, entity_type));
            profile.anomaly_count += 1;
            profile.last_updated = Some(now);
        }

        for hit in policy_hits {
            let entity = format!("policy_context_{}", hit.policy_id);
            let profile = profiles
                .entry(entity.clone())
                .or_insert_with(|| EntityRiskProfile::new(entity, EntityType::Policy));
            profile.policy_violation_count += 1;
            profile.last_updated = Some(now);
        }

        let mut signals = Vec::new();
        for profile in profiles.values_mut() {
            let projected = profile.projected_state();
            if projected.rank() <= profile.current_state.rank() {
                continue;
            }

            let evidence = gather_evidence(&profile.entity, anomalies, policy_hits);
            let reasoning = build_reasoning(profile, projected);
            let signal = board.add_risk_signal(
                cycle_id,
                RiskSignalDraft {
                    entity: profile.entity.clone(),
                    entity_type: profile.entity_type,
                    current_state: profile.current_state,
                    projected_state: projected,
                    confidence: profile.confidence(),
                    time_horizon: profile.time_horizon().to_string(),
                    reasoning,
                    evidence_ids: evidence,
                    timestamp: now,
                },
            )?;
            signals.push(signal);

            // Advance so the next cycle forecasts from here; emitted
            // current_state values stay monotone per entity.
            profile.current_state = projected;
        }

        if !signals.is_empty() {
            debug!(signals = signals.len(), "risk escalations forecast");
        }
        Ok(signals)
    }

    /// Profile snapshot for operator queries.
    pub fn profile(&self, entity: &str) -> Option<EntityRiskProfile> {
        self.lock().get(entity).cloned()
    }

    /// All entities at or past AT_RISK.
    pub fn at_risk_entities(&self) -> Vec<EntityRiskProfile> {
        self.lock()
            .values()
            .filter(|p| p.current_state.rank() >= RiskState::AtRisk.rank())
            .cloned()
            .collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, EntityRiskProfile>> {
        match self.profiles.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl Default for RiskForecastAgent {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Entity extraction
// ============================================================================

/// Scan a description for `wf_`/`vm_`/`storage_` prefixed tokens; fall back
/// to evidence ids. No guessing: unknown stays unattributed.
fn extract_entity(description: &str, evidence: &[String]) -> Option<String> {
    for word in description.split_whitespace() {
        let token = word.trim_matches(|c: char| !c.is_alphanumeric() && c != '_');
        if token.starts_with("wf_") || token.starts_with("vm_") || token.starts_with("storage_") {
            return Some(token.to_string());
        }
    }
    // Synthetic metric references name their resource: metric_<resource>_<name>.
    for ev in evidence {
        if let Some(rest) = ev.strip_prefix("metric_") {
            for prefix in ["vm_", "storage_", "wf_"] {
                if rest.starts_with(prefix) {
                    // Resource ids are <prefix><name>_<ordinal>; keep up to
                    // the second underscore after the prefix.
                    let mut parts = rest.splitn(4, '_');
                    let a = parts.next()?;
                    let b = parts.next()?;
                    let c = parts.next()?;
                    return Some(format!("{a}_{b}_{c}"));
                }
            }
        }
    }
    evidence.first().cloned()
}

fn classify_entity(entity: &str) -> EntityType {
    if entity.starts_with("wf_") {
        EntityType::Workflow
    } else if entity.starts_with("vm_") || entity.starts_with("storage_") {
        EntityType::Resource
    } else if entity.starts_with("policy_") {
        EntityType::Policy
    } else {
        EntityType::Unknown
    }
}

fn gather_evidence(entity: &str, anomalies: &[Anomaly], policy_hits: &[PolicyHit]) -> Vec<String> {
    let mut evidence = Vec::new();
    for anomaly in anomalies {
        if anomaly.description.contains(entity) {
            evidence.push(anomaly.anomaly_id.clone());
        }
    }
    for hit in policy_hits {
        evidence.push(hit.hit_id.clone());
    }
    evidence.truncate(MAX_EVIDENCE);
    evidence
}

fn build_reasoning(profile: &EntityRiskProfile, projected: RiskState) -> String {
    let mut parts = Vec::new();
    if profile.anomaly_count > 0 {
        parts.push(format!("{} anomalies attributed", profile.anomaly_count));
    }
    if profile.policy_violation_count > 0 {
        parts.push(format!(
            "{} policy violations",
            profile.policy_violation_count
        ));
    }
    format!(
        "Entity {} shows risk escalation: {}. Projected to reach {} state.",
        profile.entity,
        parts.join(", "),
        projected
    )
}

//! Insight Materializer — human output generation
//!
//! Translates a completed reasoning cycle into a single human-readable
//! insight: severity, confidence, and three textual fields (`summary`,
//! `why_it_matters`, `what_will_happen_if_ignored`) composed
//! deterministically from finding descriptions and causal reasoning.
//!
//! An optional polisher may rewrite the three textual fields for fluency.
//! It can never create or delete findings, change severity, or mutate state
//! — the trait only sees and returns the text. The no-op polisher is the
//! default and everything must hold with it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::blackboard::{AnomalyKind, ReasoningCycle, RiskState};
use crate::guards;

/// The final human-facing output of one cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Insight {
    pub insight_id: String,
    pub summary: String,
    pub why_it_matters: String,
    pub what_will_happen_if_ignored: String,
    pub recommended_actions: Vec<String>,
    pub confidence: f64,
    pub uncertainty: String,
    /// LOW / MEDIUM / HIGH / CRITICAL.
    pub severity: String,
    pub timestamp: DateTime<Utc>,
    pub evidence_count: usize,
    pub cycle_id: String,
}

/// The three rewriteable fields, bundled for the polish hook.
#[derive(Debug, Clone)]
pub struct InsightText {
    pub summary: String,
    pub why_it_matters: String,
    pub what_will_happen_if_ignored: String,
}

/// Optional natural-language polish. Rewrite-only: implementations receive
/// text and return text, nothing else.
pub trait InsightPolisher: Send + Sync {
    fn polish(&self, text: InsightText) -> InsightText;
}

/// Feature-off provider: returns the template text untouched.
pub struct NoopPolisher;

impl InsightPolisher for NoopPolisher {
    fn polish(&self, text: InsightText) -> InsightText {
        text
    }
}

// ============================================================================
// Materializer
// ============================================================================

pub struct InsightMaterializer {
    polisher: Box<dyn InsightPolisher>,
}

impl InsightMaterializer {
    pub fn new() -> Self {
        Self {
            polisher: Box::new(NoopPolisher),
        }
    }

    pub fn with_polisher(polisher: Box<dyn InsightPolisher>) -> Self {
        Self { polisher }
    }

    /// Materialize an insight from a completed cycle, or nothing when the
    /// cycle found nothing.
    pub fn materialize(&self, cycle: &ReasoningCycle) -> Option<Insight> {
        if cycle.anomalies.is_empty()
            && cycle.policy_hits.is_empty()
            && cycle.risk_signals.is_empty()
        {
            return None;
        }

        let severity = calculate_severity(cycle);
        let confidence = calculate_confidence(cycle);
        let text = self.polisher.polish(compose_text(cycle, &severity));

        let evidence_count = cycle.finding_count();
        if let Err(err) = guards::check_insight_evidence(evidence_count) {
            debug!(cycle_id = %cycle.cycle_id, error = %err, "insight suppressed");
            return None;
        }

        Some(Insight {
            insight_id: format!("insight_{}", cycle.cycle_id),
            summary: text.summary,
            why_it_matters: text.why_it_matters,
            what_will_happen_if_ignored: text.what_will_happen_if_ignored,
            recommended_actions: cycle
                .recommendations
                .iter()
                .map(|r| r.action.clone())
                .collect(),
            confidence,
            uncertainty: "Analysis based on observed telemetry".to_string(),
            severity,
            timestamp: cycle.completed_at.unwrap_or_else(Utc::now),
            evidence_count,
            cycle_id: cycle.cycle_id.clone(),
        })
    }
}

impl Default for InsightMaterializer {
    fn default() -> Self {
        Self::new()
    }
}

/// Severity by indicator priority: critical policies / incident-level risk /
/// critical resource anomalies, then missing steps / at-risk / hit volume,
/// then any finding at all.
fn calculate_severity(cycle: &ReasoningCycle) -> String {
    let has_critical_policy = cycle
        .policy_hits
        .iter()
        .any(|h| h.policy_id.contains("CRITICAL") || h.policy_id.contains("SKIP_APPROVAL"));
    let has_incident_risk = cycle
        .risk_signals
        .iter()
        .any(|s| matches!(s.projected_state, RiskState::Violation | RiskState::Incident));
    let has_critical_resource = cycle
        .anomalies
        .iter()
        .any(|a| a.kind == AnomalyKind::SustainedResourceCritical);

    if has_critical_policy || has_incident_risk || has_critical_resource {
        return "CRITICAL".to_string();
    }

    let has_missing_step = cycle.anomalies.iter().any(|a| a.kind == AnomalyKind::MissingStep);
    let has_at_risk = cycle
        .risk_signals
        .iter()
        .any(|s| s.projected_state == RiskState::AtRisk);

    if has_missing_step || has_at_risk || cycle.policy_hits.len() > 2 {
        return "HIGH".to_string();
    }

    if !cycle.anomalies.is_empty() || !cycle.policy_hits.is_empty() {
        return "MEDIUM".to_string();
    }

    "LOW".to_string()
}

/// `0.7 * avg(finding confidences) + 0.3 * max(finding confidence)`.
fn calculate_confidence(cycle: &ReasoningCycle) -> f64 {
    let mut confidences: Vec<f64> = Vec::new();
    confidences.extend(cycle.anomalies.iter().map(|a| a.confidence));
    confidences.extend(cycle.risk_signals.iter().map(|s| s.confidence));
    confidences.extend(cycle.causal_links.iter().map(|c| c.confidence));

    if confidences.is_empty() {
        return 0.5;
    }
    let avg = confidences.iter().sum::<f64>() / confidences.len() as f64;
    let max = confidences.iter().fold(f64::NEG_INFINITY, |a, &b| a.max(b));
    avg * 0.7 + max * 0.3
}

fn compose_text(cycle: &ReasoningCycle, severity: &str) -> InsightText {
    // ── Summary ──
    let mut summary_parts: Vec<String> = Vec::new();
    if !cycle.anomalies.is_empty() {
        let mut kinds: Vec<String> = cycle.anomalies.iter().map(|a| a.kind.to_string()).collect();
        kinds.sort();
        kinds.dedup();
        summary_parts.push(format!(
            "{} anomalies detected ({})",
            cycle.anomalies.len(),
            kinds.join(", ")
        ));
    }
    if !cycle.policy_hits.is_empty() {
        let mut ids: Vec<&str> = cycle.policy_hits.iter().map(|h| h.policy_id.as_str()).collect();
        ids.sort();
        ids.dedup();
        summary_parts.push(format!(
            "{} policy violations ({})",
            cycle.policy_hits.len(),
            ids.join(", ")
        ));
    }
    if !cycle.risk_signals.is_empty() {
        let entities: Vec<&str> = cycle
            .risk_signals
            .iter()
            .take(3)
            .map(|s| s.entity.as_str())
            .collect();
        summary_parts.push(format!("Risk escalation detected for: {}", entities.join(", ")));
    }
    let summary = if summary_parts.is_empty() {
        "System operating normally".to_string()
    } else {
        summary_parts.join(". ")
    };

    // ── Why it matters ──
    let mut why_parts: Vec<String> = cycle
        .causal_links
        .iter()
        .map(|link| link.reasoning.clone())
        .collect();
    if why_parts.is_empty() {
        if !cycle.policy_hits.is_empty() {
            why_parts.push("Policy violations indicate compliance risk exposure".to_string());
        }
        if !cycle.anomalies.is_empty() {
            why_parts.push("Anomalies suggest operational degradation".to_string());
        }
    }
    let why_it_matters = if why_parts.is_empty() {
        "Monitoring continues normally".to_string()
    } else {
        why_parts.truncate(3);
        why_parts.join(". ")
    };

    // ── Consequences ──
    let mut consequences: Vec<String> = cycle
        .risk_signals
        .iter()
        .filter(|s| matches!(s.projected_state, RiskState::Violation | RiskState::Incident))
        .map(|s| {
            format!(
                "{} projected to reach {} within {}",
                s.entity, s.projected_state, s.time_horizon
            )
        })
        .collect();
    if consequences.is_empty() {
        consequences.push(match severity {
            "CRITICAL" => "Immediate intervention required to prevent system degradation".to_string(),
            "HIGH" => "Without action, risk will escalate to critical levels".to_string(),
            _ => "Continued monitoring recommended".to_string(),
        });
    }
    consequences.truncate(2);

    InsightText {
        summary,
        why_it_matters,
        what_will_happen_if_ignored: consequences.join(". "),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blackboard::{
        AnomalyDraft, Blackboard, EntityType, PolicyHitDraft, RiskSignalDraft, Urgency,
        ViolationType,
    };

    fn closed_cycle_with(
        build: impl FnOnce(&Blackboard, &str),
    ) -> ReasoningCycle {
        let board = Blackboard::in_memory();
        let cycle_id = board.start_cycle().unwrap();
        build(&board, &cycle_id);
        board.complete_cycle().unwrap()
    }

    fn add_anomaly(board: &Blackboard, cycle_id: &str, kind: AnomalyKind, confidence: f64) {
        board
            .add_anomaly(
                cycle_id,
                AnomalyDraft {
                    kind,
                    agent: "test".to_string(),
                    evidence: vec!["evt_1".to_string()],
                    description: format!("{kind} on vm_api_01"),
                    confidence,
                    timestamp: Utc::now(),
                },
            )
            .unwrap();
    }

    #[test]
    fn empty_cycle_produces_no_insight() {
        let cycle = closed_cycle_with(|_, _| {});
        assert!(InsightMaterializer::new().materialize(&cycle).is_none());
    }

    #[test]
    fn critical_resource_anomaly_is_critical() {
        let cycle = closed_cycle_with(|board, cycle_id| {
            add_anomaly(board, cycle_id, AnomalyKind::SustainedResourceCritical, 0.9);
        });
        let insight = InsightMaterializer::new().materialize(&cycle).unwrap();
        assert_eq!(insight.severity, "CRITICAL");
        assert!(insight.summary.contains("SUSTAINED_RESOURCE_CRITICAL"));
        assert!(insight.evidence_count >= 1);
    }

    #[test]
    fn missing_step_is_high() {
        let cycle = closed_cycle_with(|board, cycle_id| {
            add_anomaly(board, cycle_id, AnomalyKind::MissingStep, 0.95);
        });
        let insight = InsightMaterializer::new().materialize(&cycle).unwrap();
        assert_eq!(insight.severity, "HIGH");
    }

    #[test]
    fn skip_approval_policy_is_critical() {
        let cycle = closed_cycle_with(|board, cycle_id| {
            board
                .add_policy_hit(
                    cycle_id,
                    PolicyHitDraft {
                        policy_id: "NO_SKIP_APPROVAL".to_string(),
                        event_id: "evt_skip".to_string(),
                        violation_type: ViolationType::Silent,
                        agent: "ComplianceAgent".to_string(),
                        description: "approval skipped".to_string(),
                        timestamp: Utc::now(),
                    },
                )
                .unwrap();
        });
        let insight = InsightMaterializer::new().materialize(&cycle).unwrap();
        assert_eq!(insight.severity, "CRITICAL");
    }

    #[test]
    fn confidence_blends_avg_and_max() {
        let cycle = closed_cycle_with(|board, cycle_id| {
            add_anomaly(board, cycle_id, AnomalyKind::WorkflowDelay, 0.6);
            add_anomaly(board, cycle_id, AnomalyKind::WorkflowDelay, 1.0);
        });
        let insight = InsightMaterializer::new().materialize(&cycle).unwrap();
        let expected = 0.7 * 0.8 + 0.3 * 1.0;
        assert!((insight.confidence - expected).abs() < 1e-9);
    }

    #[test]
    fn violation_projection_drives_consequences() {
        let cycle = closed_cycle_with(|board, cycle_id| {
            add_anomaly(board, cycle_id, AnomalyKind::WorkflowDelay, 0.8);
            board
                .add_risk_signal(
                    cycle_id,
                    RiskSignalDraft {
                        entity: "wf_deploy_1".to_string(),
                        entity_type: EntityType::Workflow,
                        current_state: RiskState::AtRisk,
                        projected_state: RiskState::Violation,
                        confidence: 0.8,
                        time_horizon: "5-10 min".to_string(),
                        reasoning: "escalating".to_string(),
                        evidence_ids: vec!["evt_1".to_string()],
                        timestamp: Utc::now(),
                    },
                )
                .unwrap();
        });
        let insight = InsightMaterializer::new().materialize(&cycle).unwrap();
        assert!(insight
            .what_will_happen_if_ignored
            .contains("wf_deploy_1 projected to reach VIOLATION within 5-10 min"));
    }

    #[test]
    fn recommendations_are_attached_as_actions() {
        let cycle = closed_cycle_with(|board, cycle_id| {
            add_anomaly(board, cycle_id, AnomalyKind::MissingStep, 0.95);
            board
                .add_recommendation(
                    cycle_id,
                    "MISSING_STEP",
                    "Apply temporary access guard and trigger audit",
                    Urgency::Critical,
                    "Skipped steps bypass critical controls",
                    vec!["anom_1".to_string()],
                )
                .unwrap();
        });
        let insight = InsightMaterializer::new().materialize(&cycle).unwrap();
        assert_eq!(insight.recommended_actions.len(), 1);
    }

    #[test]
    fn polisher_rewrites_text_only() {
        struct Shouty;
        impl InsightPolisher for Shouty {
            fn polish(&self, text: InsightText) -> InsightText {
                InsightText {
                    summary: text.summary.to_uppercase(),
                    ..text
                }
            }
        }

        let cycle = closed_cycle_with(|board, cycle_id| {
            add_anomaly(board, cycle_id, AnomalyKind::WorkflowDelay, 0.8);
        });
        let plain = InsightMaterializer::new().materialize(&cycle).unwrap();
        let polished = InsightMaterializer::with_polisher(Box::new(Shouty))
            .materialize(&cycle)
            .unwrap();

        assert_eq!(polished.summary, plain.summary.to_uppercase());
        assert_eq!(polished.severity, plain.severity);
        assert_eq!(polished.evidence_count, plain.evidence_count);
    }
}

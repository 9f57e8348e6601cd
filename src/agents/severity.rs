//! Severity Engine — context-aware deterministic severity translation
//!
//! Maps every finding to a 0-10 score: a per-issue-type base curve over the
//! finding's confidence, then a weighted delta over seven multiplicative
//! context factors (asset, data sensitivity, time of day, actor role,
//! repetition, blast radius, module criticality), clamped to [-0.4, 0.6].
//!
//! `final = clamp(base * (1 + delta), 0, 10)`, banded to a label and an
//! escalation state. Every score records a compact vector string so the
//! arithmetic can be audited afterwards.

use std::collections::HashMap;

use chrono::Timelike;
use tracing::debug;

use crate::blackboard::{
    Anomaly, AnomalyKind, Blackboard, ContextFactors, EscalationState, PolicyHit, SeverityLabel,
    SeverityScore, SeverityScoreDraft, SeveritySource,
};

use super::AgentError;

/// Context factor weights; they sum to 1.
mod factor_weights {
    pub const ASSET: f64 = 0.22;
    pub const DATA: f64 = 0.16;
    pub const TIME: f64 = 0.12;
    pub const ROLE: f64 = 0.12;
    pub const REPETITION: f64 = 0.14;
    pub const BLAST: f64 = 0.12;
    pub const MODULE: f64 = 0.12;
}

/// Per-issue-type context profile: multipliers asserted by the issue type
/// itself rather than the description.
struct IssueProfile {
    asset: f64,
    blast: f64,
    module: f64,
}

fn issue_profile(issue_type: &str) -> Option<IssueProfile> {
    let p = |asset, blast, module| Some(IssueProfile { asset, blast, module });
    match issue_type {
        "MISSING_STEP" => p(1.45, 1.2, 1.3),
        "WORKFLOW_DELAY" => p(1.35, 1.1, 1.2),
        "SEQUENCE_VIOLATION" => p(1.3, 1.1, 1.2),
        "SUSTAINED_RESOURCE_CRITICAL" => p(1.25, 1.35, 1.25),
        "SUSTAINED_RESOURCE_WARNING" => p(1.2, 1.15, 1.15),
        _ => None,
    }
}

pub struct SeverityEngine;

impl SeverityEngine {
    pub const AGENT_NAME: &'static str = "SeverityEngineAgent";

    pub fn new() -> Self {
        Self
    }

    /// Score every anomaly and policy hit of the cycle.
    pub fn analyze(
        &self,
        anomalies: &[Anomaly],
        policy_hits: &[PolicyHit],
        cycle_id: &str,
        board: &Blackboard,
    ) -> Result<Vec<SeverityScore>, AgentError> {
        let mut repetition: HashMap<AnomalyKind, u32> = HashMap::new();
        for a in anomalies {
            *repetition.entry(a.kind).or_insert(0) += 1;
        }

        let mut scores = Vec::new();

        for anomaly in anomalies {
            let issue_type = anomaly.kind.to_string();
            let base = base_score_for_anomaly(anomaly);
            let reps = repetition.get(&anomaly.kind).copied().unwrap_or(1);
            let hour = anomaly.timestamp.hour();
            let ctx = context_factors(&issue_type, reps, &anomaly.description, hour);
            let final_score = final_score(base, &ctx);

            scores.push(board.add_severity_score(
                cycle_id,
                SeverityScoreDraft {
                    source_type: SeveritySource::Anomaly,
                    source_id: anomaly.anomaly_id.clone(),
                    issue_type,
                    base_score: base,
                    final_score,
                    label: label(final_score),
                    vector: vector(base, &ctx),
                    escalation_state: escalation_state(final_score, reps),
                    context_factors: ctx,
                    evidence_ids: anomaly.evidence.clone(),
                },
            )?);
        }

        for hit in policy_hits {
            let issue_type = format!("POLICY_{}", hit.policy_id);
            let base = 7.0; // silent violations score high by default
            let hour = hit.timestamp.hour();
            let ctx = context_factors(&issue_type, 1, &hit.description, hour);
            let final_score = final_score(base, &ctx);

            scores.push(board.add_severity_score(
                cycle_id,
                SeverityScoreDraft {
                    source_type: SeveritySource::PolicyHit,
                    source_id: hit.hit_id.clone(),
                    issue_type,
                    base_score: base,
                    final_score,
                    label: label(final_score),
                    vector: vector(base, &ctx),
                    escalation_state: escalation_state(final_score, 1),
                    context_factors: ctx,
                    evidence_ids: vec![hit.event_id.clone()],
                },
            )?);
        }

        if !scores.is_empty() {
            debug!(scores = scores.len(), "severity scores computed");
        }
        Ok(scores)
    }
}

impl Default for SeverityEngine {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-issue-type base curve: `base = a + b * confidence`.
fn base_score_for_anomaly(anomaly: &Anomaly) -> f64 {
    let c = anomaly.confidence.clamp(0.0, 1.0);
    match anomaly.kind {
        AnomalyKind::WorkflowDelay => 4.0 + 4.0 * c,
        AnomalyKind::SustainedResourceCritical => 5.0 + 5.0 * c,
        AnomalyKind::SustainedResourceWarning => 3.5 + 3.0 * c,
        AnomalyKind::MissingStep => 7.0 + 2.0 * c,
        AnomalyKind::SequenceViolation => 5.5 + 2.5 * c,
        AnomalyKind::HighChurnPr
        | AnomalyKind::LowTestCoverage
        | AnomalyKind::HighComplexityHint
        | AnomalyKind::HotspotFileChange => 5.0 + 3.0 * c,
        _ => 4.0 + 3.0 * c,
    }
}

fn context_factors(
    issue_type: &str,
    repetition_count: u32,
    description: &str,
    hour_utc: u32,
) -> ContextFactors {
    let desc = description.to_lowercase();
    let profile = issue_profile(issue_type);

    let asset = profile.as_ref().map(|p| p.asset).unwrap_or(if issue_type.contains("POLICY_") {
        1.25
    } else {
        1.15
    });
    let data = if desc.contains("sensitive")
        || desc.contains("credential")
        || issue_type.contains("POLICY")
    {
        1.3
    } else {
        1.0
    };
    let time = if !(7..=21).contains(&hour_utc) { 1.2 } else { 1.0 };
    let role = if desc.contains("admin") || desc.contains("security") || desc.contains("svc_") {
        1.2
    } else {
        1.0
    };
    let repetition = (1.0 + (repetition_count.saturating_sub(1)) as f64 * 0.1).min(1.3);
    let blast = profile.as_ref().map(|p| p.blast).unwrap_or(1.0);
    let module = profile.as_ref().map(|p| p.module).unwrap_or_else(|| {
        if ["payment", "auth", "approval", "prod"]
            .iter()
            .any(|k| desc.contains(k))
        {
            1.2
        } else {
            1.0
        }
    });

    let weighted = factor_weights::ASSET * (asset - 1.0)
        + factor_weights::DATA * (data - 1.0)
        + factor_weights::TIME * (time - 1.0)
        + factor_weights::ROLE * (role - 1.0)
        + factor_weights::REPETITION * (repetition - 1.0)
        + factor_weights::BLAST * (blast - 1.0)
        + factor_weights::MODULE * (module - 1.0);

    ContextFactors {
        asset,
        data,
        time,
        role,
        repetition,
        blast,
        module,
        weighted_delta: weighted.clamp(-0.4, 0.6),
    }
}

fn final_score(base: f64, ctx: &ContextFactors) -> f64 {
    (base * (1.0 + ctx.weighted_delta)).clamp(0.0, 10.0)
}

fn label(score: f64) -> SeverityLabel {
    if score == 0.0 {
        SeverityLabel::None
    } else if score <= 3.9 {
        SeverityLabel::Low
    } else if score <= 6.9 {
        SeverityLabel::Medium
    } else if score <= 8.9 {
        SeverityLabel::High
    } else {
        SeverityLabel::Critical
    }
}

fn escalation_state(score: f64, repetition_count: u32) -> EscalationState {
    if score >= 9.0 || repetition_count >= 4 {
        EscalationState::Incident
    } else if score >= 8.5 {
        EscalationState::Violation
    } else if score >= 7.0 {
        EscalationState::AtRisk
    } else if score >= 4.0 {
        EscalationState::Degraded
    } else if score > 0.0 {
        EscalationState::Normal
    } else {
        EscalationState::Info
    }
}

/// Compact audit vector, e.g. `B7.5/AS1.5/DS1.0/T1.0/R1.0/REP1.0/BL1.2/MD1.3/D0.17`.
fn vector(base: f64, ctx: &ContextFactors) -> String {
    format!(
        "B{:.1}/AS{:.1}/DS{:.1}/T{:.1}/R{:.1}/REP{:.1}/BL{:.1}/MD{:.1}/D{:.2}",
        base,
        ctx.asset,
        ctx.data,
        ctx.time,
        ctx.role,
        ctx.repetition,
        ctx.blast,
        ctx.module,
        ctx.weighted_delta
    )
}

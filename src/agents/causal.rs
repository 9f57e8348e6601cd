//! Causal Agent — temporal + dependency reasoning over findings
//!
//! Links findings through a static table of known cause/effect patterns:
//! temporal precedence (cause before effect, within a 60 s window) plus a
//! dependency pattern match is enough — no model inference.
//!
//! Confidence attenuates with temporal distance: `base x max(0.5, 1 - dt/60s)`.
//! Links are deduped per cycle by (cause type, cause entity, effect type,
//! effect entity). Temporally proximate pairs that match no known pattern
//! are recorded as low-confidence hypotheses instead (capped per cycle).

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::blackboard::{
    Anomaly, Blackboard, CausalLink, CausalLinkDraft, PolicyHit, RiskSignal,
};

use super::AgentError;

/// Pairing window: cause and effect within this many seconds.
const PAIRING_WINDOW_SECS: i64 = 60;

/// Near-miss hypotheses recorded per cycle, at most.
const MAX_HYPOTHESES: usize = 5;

/// A known cause/effect pattern.
struct CausalPattern {
    cause: &'static str,
    effect: &'static str,
    confidence: f64,
    reasoning: &'static str,
}

/// The static dependency table. Part of the configuration surface; this set
/// defines the baseline behavior.
const CAUSAL_PATTERNS: [CausalPattern; 5] = [
    CausalPattern {
        cause: "SUSTAINED_RESOURCE_CRITICAL",
        effect: "WORKFLOW_DELAY",
        confidence: 0.85,
        reasoning: "Resource saturation directly impacts workflow execution time",
    },
    CausalPattern {
        cause: "SUSTAINED_RESOURCE_WARNING",
        effect: "WORKFLOW_DELAY",
        confidence: 0.70,
        reasoning: "Elevated resource usage may contribute to workflow slowdown",
    },
    CausalPattern {
        cause: "RESOURCE_DRIFT",
        effect: "WORKFLOW_DELAY",
        confidence: 0.60,
        reasoning: "Resource drift suggests degrading conditions affecting performance",
    },
    CausalPattern {
        cause: "MISSING_STEP",
        effect: "SILENT",
        confidence: 0.90,
        reasoning: "Skipped steps often bypass compliance checkpoints",
    },
    CausalPattern {
        cause: "SEQUENCE_VIOLATION",
        effect: "AT_RISK",
        confidence: 0.75,
        reasoning: "Out-of-order execution indicates process breakdown",
    },
];

fn lookup_pattern(cause: &str, effect: &str) -> Option<&'static CausalPattern> {
    CAUSAL_PATTERNS
        .iter()
        .find(|p| p.cause == cause && p.effect == effect)
}

/// One finding flattened for temporal pairing.
struct TimelineItem {
    type_tag: String,
    id: String,
    entity: String,
    timestamp: DateTime<Utc>,
}

pub struct CausalAgent;

impl CausalAgent {
    pub const AGENT_NAME: &'static str = "CausalAgent";

    pub fn new() -> Self {
        Self
    }

    /// Analyze this cycle's findings for causal links.
    pub fn analyze(
        &self,
        anomalies: &[Anomaly],
        policy_hits: &[PolicyHit],
        risk_signals: &[RiskSignal],
        cycle_id: &str,
        board: &Blackboard,
    ) -> Result<Vec<CausalLink>, AgentError> {
        let mut items: Vec<TimelineItem> = Vec::new();

        for a in anomalies {
            items.push(TimelineItem {
                type_tag: a.kind.to_string(),
                id: a.anomaly_id.clone(),
                entity: entity_of(&a.description),
                timestamp: a.timestamp,
            });
        }
        for p in policy_hits {
            items.push(TimelineItem {
                type_tag: p.violation_type.to_string(),
                id: p.hit_id.clone(),
                entity: entity_of(&p.description),
                timestamp: p.timestamp,
            });
        }
        for r in risk_signals {
            items.push(TimelineItem {
                type_tag: r.projected_state.to_string(),
                id: r.signal_id.clone(),
                entity: r.entity.clone(),
                timestamp: r.timestamp,
            });
        }

        items.sort_by_key(|i| i.timestamp);

        let mut links: Vec<CausalLink> = Vec::new();
        let mut emitted: HashSet<(String, String, String, String)> = HashSet::new();
        let mut hypothesized: HashSet<(String, String)> = HashSet::new();
        let mut hypothesis_count = 0usize;

        for i in 0..items.len() {
            for j in (i + 1)..items.len() {
                let delta = items[j].timestamp - items[i].timestamp;
                if delta.num_seconds() > PAIRING_WINDOW_SECS {
                    break; // sorted: everything further is too far apart
                }
                let (cause, effect) = (&items[i], &items[j]);

                let Some(pattern) = lookup_pattern(&cause.type_tag, &effect.type_tag) else {
                    // Unknown but adjacent pair: record a hypothesis once per
                    // (cause type, effect type) pair, bounded.
                    if cause.type_tag != effect.type_tag
                        && hypothesis_count < MAX_HYPOTHESES
                        && hypothesized
                            .insert((cause.type_tag.clone(), effect.type_tag.clone()))
                    {
                        board.add_hypothesis(
                            cycle_id,
                            Self::AGENT_NAME,
                            format!(
                                "{} may precede {} (observed {}s apart, no known pattern)",
                                cause.type_tag,
                                effect.type_tag,
                                delta.num_seconds().max(1)
                            ),
                            vec![cause.id.clone(), effect.id.clone()],
                            0.3,
                        )?;
                        hypothesis_count += 1;
                    }
                    continue;
                };

                let key = (
                    cause.type_tag.clone(),
                    cause.entity.clone(),
                    effect.type_tag.clone(),
                    effect.entity.clone(),
                );
                if !emitted.insert(key) {
                    continue;
                }

                let time_factor = 1.0 - delta.num_seconds() as f64 / PAIRING_WINDOW_SECS as f64;
                let confidence = pattern.confidence * time_factor.max(0.5);

                let link = board.add_causal_link(
                    cycle_id,
                    CausalLinkDraft {
                        cause: cause.type_tag.clone(),
                        effect: effect.type_tag.clone(),
                        cause_entity: cause.entity.clone(),
                        effect_entity: effect.entity.clone(),
                        confidence,
                        reasoning: friendly_reasoning(
                            &cause.type_tag,
                            &effect.type_tag,
                            delta.num_seconds(),
                            pattern.reasoning,
                        ),
                        evidence_ids: vec![cause.id.clone(), effect.id.clone()],
                        timestamp: effect.timestamp,
                    },
                )?;
                links.push(link);
            }
        }

        if !links.is_empty() {
            debug!(links = links.len(), "causal links identified");
        }
        Ok(links)
    }
}

impl Default for CausalAgent {
    fn default() -> Self {
        Self::new()
    }
}

/// Entity token from a finding description (`wf_…`, `vm_…`, `storage_…`).
/// No guessing: anything else is "unknown" and downstream severity treats it
/// as low-context.
fn entity_of(description: &str) -> String {
    for word in description.split_whitespace() {
        let token = word.trim_matches(|c: char| !c.is_alphanumeric() && c != '_');
        if token.starts_with("wf_") || token.starts_with("vm_") || token.starts_with("storage_") {
            return token.to_string();
        }
    }
    "unknown".to_string()
}

/// Plain-English explanation for operators and audits.
fn friendly_reasoning(cause: &str, effect: &str, gap_secs: i64, base_reason: &str) -> String {
    let title = |tag: &str| -> String {
        tag.split('_')
            .map(|w| {
                let mut chars = w.chars();
                match chars.next() {
                    Some(first) => first.to_uppercase().chain(chars.flat_map(|c| c.to_lowercase())).collect::<String>(),
                    None => String::new(),
                }
            })
            .collect::<Vec<_>>()
            .join(" ")
    };
    format!(
        "Observed sequence: {} happened before {} (~{}s gap). Likely link: {}. \
         Use linked evidence IDs to validate and act.",
        title(cause),
        title(effect),
        gap_secs.max(1),
        base_reason
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blackboard::{
        AnomalyDraft, AnomalyKind, EntityType, RiskSignalDraft, RiskState,
    };
    use chrono::TimeZone;

    fn ts(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).single().unwrap()
    }

    fn anomaly(
        board: &Blackboard,
        cycle_id: &str,
        kind: AnomalyKind,
        description: &str,
        secs: i64,
    ) -> Anomaly {
        board
            .add_anomaly(
                cycle_id,
                AnomalyDraft {
                    kind,
                    agent: "test".to_string(),
                    evidence: vec!["evt_1".to_string()],
                    description: description.to_string(),
                    confidence: 0.9,
                    timestamp: ts(secs),
                },
            )
            .unwrap()
    }

    #[test]
    fn resource_critical_causes_workflow_delay() {
        let board = Blackboard::in_memory();
        let cycle_id = board.start_cycle().unwrap();
        let cause = anomaly(
            &board,
            &cycle_id,
            AnomalyKind::SustainedResourceCritical,
            "Resource vm_api_01 cpu_usage sustained above 85",
            0,
        );
        let effect = anomaly(
            &board,
            &cycle_id,
            AnomalyKind::WorkflowDelay,
            "wf_deploy_1 incomplete: 1/5 steps done",
            30,
        );

        let links = CausalAgent::new()
            .analyze(&[cause, effect], &[], &[], &cycle_id, &board)
            .unwrap();
        assert_eq!(links.len(), 1);
        let link = &links[0];
        assert_eq!(link.cause, "SUSTAINED_RESOURCE_CRITICAL");
        assert_eq!(link.effect, "WORKFLOW_DELAY");
        assert_eq!(link.cause_entity, "vm_api_01");
        assert_eq!(link.effect_entity, "wf_deploy_1");
        // base 0.85 attenuated by 30s gap: 0.85 * 0.5 = 0.425.
        assert!((link.confidence - 0.425).abs() < 1e-9);
    }

    #[test]
    fn pairs_past_sixty_seconds_do_not_link() {
        let board = Blackboard::in_memory();
        let cycle_id = board.start_cycle().unwrap();
        let cause = anomaly(
            &board,
            &cycle_id,
            AnomalyKind::SustainedResourceCritical,
            "Resource vm_api_01 cpu_usage sustained",
            0,
        );
        let effect = anomaly(
            &board,
            &cycle_id,
            AnomalyKind::WorkflowDelay,
            "wf_deploy_1 delayed",
            90,
        );

        let links = CausalAgent::new()
            .analyze(&[cause, effect], &[], &[], &cycle_id, &board)
            .unwrap();
        assert!(links.is_empty());
    }

    #[test]
    fn cause_timestamp_never_after_effect() {
        let board = Blackboard::in_memory();
        let cycle_id = board.start_cycle().unwrap();
        // Delay precedes the resource anomaly: no (resource -> delay) link.
        let delay = anomaly(
            &board,
            &cycle_id,
            AnomalyKind::WorkflowDelay,
            "wf_deploy_1 delayed",
            0,
        );
        let resource = anomaly(
            &board,
            &cycle_id,
            AnomalyKind::SustainedResourceCritical,
            "Resource vm_api_01 cpu_usage sustained",
            30,
        );

        let links = CausalAgent::new()
            .analyze(&[delay, resource], &[], &[], &cycle_id, &board)
            .unwrap();
        assert!(links.is_empty());
    }

    #[test]
    fn duplicate_pairs_dedupe_within_cycle() {
        let board = Blackboard::in_memory();
        let cycle_id = board.start_cycle().unwrap();
        let mut findings = Vec::new();
        for i in 0..3 {
            findings.push(anomaly(
                &board,
                &cycle_id,
                AnomalyKind::SustainedResourceWarning,
                "Resource vm_api_01 cpu_usage elevated",
                i,
            ));
            findings.push(anomaly(
                &board,
                &cycle_id,
                AnomalyKind::WorkflowDelay,
                "wf_deploy_1 delayed",
                i + 5,
            ));
        }

        let links = CausalAgent::new()
            .analyze(&findings, &[], &[], &cycle_id, &board)
            .unwrap();
        assert_eq!(links.len(), 1, "same (cause, entity, effect, entity) once per cycle");
    }

    #[test]
    fn sequence_violation_links_to_risk_escalation() {
        let board = Blackboard::in_memory();
        let cycle_id = board.start_cycle().unwrap();
        let violation = anomaly(
            &board,
            &cycle_id,
            AnomalyKind::SequenceViolation,
            "Out-of-order execution in wf_deploy_1",
            0,
        );
        let signal = board
            .add_risk_signal(
                &cycle_id,
                RiskSignalDraft {
                    entity: "wf_deploy_1".to_string(),
                    entity_type: EntityType::Workflow,
                    current_state: RiskState::Normal,
                    projected_state: RiskState::AtRisk,
                    confidence: 0.7,
                    time_horizon: "10-15 min".to_string(),
                    reasoning: "escalating".to_string(),
                    evidence_ids: vec![violation.anomaly_id.clone()],
                    timestamp: ts(10),
                },
            )
            .unwrap();

        let links = CausalAgent::new()
            .analyze(&[violation], &[], &[signal], &cycle_id, &board)
            .unwrap();
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].cause, "SEQUENCE_VIOLATION");
        assert_eq!(links[0].effect, "AT_RISK");
    }

    #[test]
    fn unknown_adjacent_pairs_become_bounded_hypotheses() {
        let board = Blackboard::in_memory();
        let cycle_id = board.start_cycle().unwrap();
        let a = anomaly(
            &board,
            &cycle_id,
            AnomalyKind::BaselineDeviation,
            "cpu_usage on vm_api_01 deviating",
            0,
        );
        let b = anomaly(
            &board,
            &cycle_id,
            AnomalyKind::HighChurnPr,
            "wf_release_7 deploy deploy_42 high churn",
            5,
        );

        let links = CausalAgent::new()
            .analyze(&[a, b], &[], &[], &cycle_id, &board)
            .unwrap();
        assert!(links.is_empty());

        let cycle = board.current_cycle().unwrap();
        assert_eq!(cycle.hypotheses.len(), 1);
        assert!(cycle.hypotheses[0].claim.contains("BASELINE_DEVIATION"));
        assert!((cycle.hypotheses[0].confidence - 0.3).abs() < 1e-9);
    }
}

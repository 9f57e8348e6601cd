//! Recommendation Engine — rule-driven action mapping
//!
//! Actions are mapped, never invented. A static rule table indexed by issue
//! type carries the action, its preconditions, the expected effect, a
//! severity band, and an ordered list of stepwise sub-actions. For each
//! scored finding whose severity lands in a rule's band, the engine emits
//! one summary recommendation plus one numbered step per template.
//!
//! `confidence = 0.5*rule_base + 0.2*(severity/10) + 0.3*context_bonus`;
//! steps ride slightly below their summary. Issue types with no rule get a
//! three-step generic containment plan. Output is sorted by (severity desc,
//! confidence desc) and capped per cycle.

use std::collections::{HashMap, HashSet};

use tracing::debug;

use crate::blackboard::{
    Anomaly, Blackboard, CausalLink, PolicyHit, RecommendationV2, RecommendationV2Draft,
    SeverityScore, Urgency,
};

use super::AgentError;

/// Hard cap on recommendations per cycle.
const MAX_RECOMMENDATIONS: usize = 40;

/// A static recommendation rule.
pub struct RecommendationRule {
    pub rule_id: &'static str,
    pub issue_type: &'static str,
    pub action_code: &'static str,
    pub action_description: &'static str,
    pub preconditions: &'static [&'static str],
    pub expected_effect: &'static str,
    pub min_severity: f64,
    pub max_severity: f64,
    pub base_confidence: f64,
    pub step_templates: &'static [&'static str],
}

const RULES: &[RecommendationRule] = &[
    RecommendationRule {
        rule_id: "REC_RES_CPU_01",
        issue_type: "SUSTAINED_RESOURCE_CRITICAL",
        action_code: "THROTTLE_DEPLOYS",
        action_description: "Throttle concurrent deploy jobs on the affected resource.",
        preconditions: &["env=prod_or_staging", "asset_type=worker_or_api"],
        expected_effect: "risk_score -15 to -25 in next 2 cycles",
        min_severity: 7.0,
        max_severity: 10.0,
        base_confidence: 0.82,
        step_templates: &[
            "Step 1: Freeze non-critical deploy jobs on the affected node/service for 10 minutes.",
            "Step 2: Cap deploy/workflow concurrency to a safe threshold and cap retries.",
            "Step 3: Drain or reroute hot traffic from the saturated resource.",
            "Step 4: Re-check CPU/memory/latency trend after 2 cycles before unfreezing changes.",
        ],
    },
    RecommendationRule {
        rule_id: "REC_RES_WARN_01",
        issue_type: "SUSTAINED_RESOURCE_WARNING",
        action_code: "SCALE_OUT",
        action_description: "Scale out replicas or increase resource limits before saturation.",
        preconditions: &["autoscaling_or_capacity_available"],
        expected_effect: "risk_score -8 to -15",
        min_severity: 5.0,
        max_severity: 10.0,
        base_confidence: 0.72,
        step_templates: &[
            "Step 1: Increase replica count or capacity headroom on the impacted service.",
            "Step 2: Tighten retry/backoff policy to prevent amplification while scaling stabilizes.",
            "Step 3: Validate p95 latency and queue depth are returning to baseline.",
        ],
    },
    RecommendationRule {
        rule_id: "REC_WF_DELAY_01",
        issue_type: "WORKFLOW_DELAY",
        action_code: "DECREASE_CONCURRENCY",
        action_description: "Reduce workflow concurrency and re-run delayed steps with tracing.",
        preconditions: &["workflow_in_progress=true"],
        expected_effect: "SLA breach probability -20%",
        min_severity: 6.0,
        max_severity: 10.0,
        base_confidence: 0.78,
        step_templates: &[
            "Step 1: Pause low-priority workflow runs and prioritize critical workflows only.",
            "Step 2: Re-run delayed step with distributed tracing enabled for bottleneck evidence.",
            "Step 3: Adjust timeout/backoff values to avoid repeated step failures.",
            "Step 4: Confirm SLA burn rate declines before restoring normal concurrency.",
        ],
    },
    RecommendationRule {
        rule_id: "REC_WF_MISS_01",
        issue_type: "MISSING_STEP",
        action_code: "BLOCK_AND_REVIEW",
        action_description: "Block promotion and enforce mandatory approval/review step.",
        preconditions: &["approval_step_required=true"],
        expected_effect: "compliance breach probability -40%",
        min_severity: 7.0,
        max_severity: 10.0,
        base_confidence: 0.9,
        step_templates: &[
            "Step 1: Stop current promotion and mark pipeline as non-compliant.",
            "Step 2: Reinsert missing approval step and require explicit reviewer sign-off.",
            "Step 3: Re-run pipeline from the last compliant checkpoint.",
            "Step 4: Store audit evidence IDs for reviewer decision and rerun outcome.",
        ],
    },
    RecommendationRule {
        rule_id: "REC_WF_SEQ_01",
        issue_type: "SEQUENCE_VIOLATION",
        action_code: "FIX_STEP_ORDER",
        action_description: "Restore workflow step order and replay from last valid step.",
        preconditions: &["workflow_definition_available=true"],
        expected_effect: "workflow consistency restored; downstream failures reduced",
        min_severity: 5.5,
        max_severity: 10.0,
        base_confidence: 0.8,
        step_templates: &[
            "Step 1: Compare observed step order with workflow definition to locate divergence.",
            "Step 2: Roll back to last valid step and replay remaining steps in canonical order.",
            "Step 3: Add guard in orchestrator to reject future out-of-order transitions.",
        ],
    },
    RecommendationRule {
        rule_id: "REC_COMP_01",
        issue_type: "POLICY_NO_AFTER_HOURS_WRITE",
        action_code: "RESTRICT_AFTER_HOURS_ACCESS",
        action_description: "Restrict write access after policy cutoff and require break-glass approval.",
        preconditions: &["policy=NO_AFTER_HOURS_WRITE"],
        expected_effect: "after-hours violations near zero",
        min_severity: 6.0,
        max_severity: 10.0,
        base_confidence: 0.88,
        step_templates: &[
            "Step 1: Revoke direct after-hours write permissions for affected actor/team.",
            "Step 2: Enable break-glass approval workflow with mandatory justification.",
            "Step 3: Re-audit recent after-hours writes and open follow-up tasks for exceptions.",
        ],
    },
    RecommendationRule {
        rule_id: "REC_COMP_02",
        issue_type: "POLICY_NO_SKIP_APPROVAL",
        action_code: "ENFORCE_APPROVAL_GATE",
        action_description: "Enforce approval gate in CI/CD and reject skipped approvals.",
        preconditions: &["pipeline_has_approval_stage=true"],
        expected_effect: "silent approval bypass reduced",
        min_severity: 7.0,
        max_severity: 10.0,
        base_confidence: 0.92,
        step_templates: &[
            "Step 1: Configure CI/CD gate to fail hard on missing approval token.",
            "Step 2: Lock merge/deploy rights until compliant approval is captured.",
            "Step 3: Re-run failed deployment through the approved path and preserve audit logs.",
        ],
    },
    RecommendationRule {
        rule_id: "REC_COMP_03",
        issue_type: "POLICY_NO_UNUSUAL_LOCATION",
        action_code: "BLOCK_UNTRUSTED_LOCATION",
        action_description: "Block access from untrusted locations and force re-authentication.",
        preconditions: &["policy=NO_UNUSUAL_LOCATION"],
        expected_effect: "unauthorized access risk reduced",
        min_severity: 6.0,
        max_severity: 10.0,
        base_confidence: 0.86,
        step_templates: &[
            "Step 1: Block source IP/location and invalidate active sessions.",
            "Step 2: Require MFA re-authentication for all affected users.",
            "Step 3: Review access logs for lateral movement before reopening access.",
        ],
    },
    RecommendationRule {
        rule_id: "REC_COMP_04",
        issue_type: "POLICY_NO_UNCONTROLLED_SENSITIVE_ACCESS",
        action_code: "ENFORCE_SENSITIVE_WORKFLOW",
        action_description: "Force sensitive-resource access only through approved workflows.",
        preconditions: &["policy=NO_UNCONTROLLED_SENSITIVE_ACCESS"],
        expected_effect: "sensitive access becomes auditable",
        min_severity: 6.5,
        max_severity: 10.0,
        base_confidence: 0.9,
        step_templates: &[
            "Step 1: Disable direct access path to sensitive resource.",
            "Step 2: Route all operations through tracked workflow with owner approval.",
            "Step 3: Validate audit trail contains actor, reason, and workflow ID.",
        ],
    },
    RecommendationRule {
        rule_id: "REC_COMP_05",
        issue_type: "POLICY_NO_SVC_ACCOUNT_WRITE",
        action_code: "DISABLE_SVC_DIRECT_WRITE",
        action_description: "Disable service-account direct writes and enforce delegated workflow.",
        preconditions: &["policy=NO_SVC_ACCOUNT_WRITE"],
        expected_effect: "service-account misuse risk reduced",
        min_severity: 6.0,
        max_severity: 10.0,
        base_confidence: 0.85,
        step_templates: &[
            "Step 1: Remove direct write grants from service account.",
            "Step 2: Move write operation behind approved service workflow.",
            "Step 3: Add monitoring alert for any future direct write attempt.",
        ],
    },
    RecommendationRule {
        rule_id: "REC_BASE_01",
        issue_type: "BASELINE_DEVIATION",
        action_code: "BASELINE_REVALIDATE",
        action_description: "Validate anomaly against baseline window and isolate sustained drift.",
        preconditions: &["baseline_available=true"],
        expected_effect: "false positives reduced; true drift isolated",
        min_severity: 5.0,
        max_severity: 10.0,
        base_confidence: 0.74,
        step_templates: &[
            "Step 1: Compare current metric window vs 24h baseline and weekly baseline.",
            "Step 2: Isolate whether deviation is sustained or transient burst.",
            "Step 3: If sustained, apply targeted mitigation on the deviating component.",
        ],
    },
    RecommendationRule {
        rule_id: "REC_RES_DRIFT_01",
        issue_type: "RESOURCE_DRIFT",
        action_code: "PIN_RESOURCE_CONFIG",
        action_description: "Pin resource config/version and roll back recent drift-inducing changes.",
        preconditions: &["recent_change_detected=true"],
        expected_effect: "resource behavior returns to stable baseline",
        min_severity: 5.0,
        max_severity: 10.0,
        base_confidence: 0.76,
        step_templates: &[
            "Step 1: Identify latest config/image/dependency changes on affected resource.",
            "Step 2: Roll back one change at a time and measure impact deltas.",
            "Step 3: Pin stable config and open RCA task for drift source.",
        ],
    },
    RecommendationRule {
        rule_id: "REC_CODE_01",
        issue_type: "LOW_TEST_COVERAGE",
        action_code: "ADD_TESTS_BEFORE_DEPLOY",
        action_description: "Add targeted unit/integration tests before merge/deploy.",
        preconditions: &["coverage_below_threshold=true"],
        expected_effect: "deploy failure probability -15 to -25%",
        min_severity: 5.0,
        max_severity: 10.0,
        base_confidence: 0.8,
        step_templates: &[
            "Step 1: Add tests on changed hotspots and critical error paths.",
            "Step 2: Raise minimum coverage gate for modified files/modules.",
            "Step 3: Re-run CI and block deploy until coverage threshold is met.",
        ],
    },
    RecommendationRule {
        rule_id: "REC_CODE_02",
        issue_type: "HIGH_CHURN_PR",
        action_code: "SPLIT_PR_AND_REVIEW",
        action_description: "Split high-churn PR and require staged review.",
        preconditions: &["changed_lines_high=true"],
        expected_effect: "review quality improvement; rollback probability reduced",
        min_severity: 5.0,
        max_severity: 10.0,
        base_confidence: 0.76,
        step_templates: &[
            "Step 1: Split PR into smaller logical units with independent tests.",
            "Step 2: Require domain-owner review for risky modules.",
            "Step 3: Deploy behind feature flag and monitor rollback indicators.",
        ],
    },
    RecommendationRule {
        rule_id: "REC_CODE_03",
        issue_type: "HIGH_COMPLEXITY_HINT",
        action_code: "REDUCE_COMPLEXITY_BEFORE_RELEASE",
        action_description: "Refactor complex code path and add guard tests before release.",
        preconditions: &["complexity_above_threshold=true"],
        expected_effect: "runtime error probability reduced",
        min_severity: 5.0,
        max_severity: 10.0,
        base_confidence: 0.75,
        step_templates: &[
            "Step 1: Refactor high-complexity block into smaller deterministic functions.",
            "Step 2: Add boundary and timeout tests for worst-case paths.",
            "Step 3: Re-run static analysis and verify complexity score drops.",
        ],
    },
    RecommendationRule {
        rule_id: "REC_CODE_04",
        issue_type: "HOTSPOT_FILE_CHANGE",
        action_code: "ENABLE_HOTSPOT_GUARDS",
        action_description: "Enable hotspot protections for frequently changed files.",
        preconditions: &["hotspot_file=true"],
        expected_effect: "reduces repeat regressions on unstable files",
        min_severity: 5.0,
        max_severity: 10.0,
        base_confidence: 0.74,
        step_templates: &[
            "Step 1: Require additional reviewer for hotspot file changes.",
            "Step 2: Add focused regression suite for hotspot modules.",
            "Step 3: Enforce canary rollout for changes touching hotspot files.",
        ],
    },
];

/// Generic containment plan for unmapped issue types.
const FALLBACK_STEPS: [(&str, &str, &str); 3] = [
    (
        "INVESTIGATE_ROOT_CAUSE",
        "Step 1: Identify exact failing component and confirm first bad event in timeline.",
        "Root cause isolated with traceable evidence.",
    ),
    (
        "CONTAIN_IMPACT",
        "Step 2: Apply containment (throttle, isolate, or rollback) to stop further impact propagation.",
        "Blast radius reduced while investigation continues.",
    ),
    (
        "VERIFY_RECOVERY",
        "Step 3: Verify recovery with 2 consecutive healthy cycles and no new policy/risk escalations.",
        "Confirms mitigation actually resolved the issue.",
    ),
];

pub struct RecommendationEngine;

impl RecommendationEngine {
    pub const AGENT_NAME: &'static str = "RecommendationEngineAgent";

    pub fn new() -> Self {
        Self
    }

    /// Map every scored finding to prioritized, stepwise actions.
    pub fn generate(
        &self,
        anomalies: &[Anomaly],
        policy_hits: &[PolicyHit],
        causal_links: &[CausalLink],
        severity_scores: &[SeverityScore],
        cycle_id: &str,
        board: &Blackboard,
    ) -> Result<Vec<RecommendationV2>, AgentError> {
        let by_source: HashMap<&str, &SeverityScore> = severity_scores
            .iter()
            .map(|s| (s.source_id.as_str(), s))
            .collect();
        let causal_by_cause: HashMap<&str, &CausalLink> =
            causal_links.iter().map(|c| (c.cause.as_str(), c)).collect();

        let mut outputs: Vec<RecommendationV2> = Vec::new();
        let mut seen: HashSet<(String, String, String)> = HashSet::new();

        for anomaly in anomalies {
            let Some(sev) = by_source.get(anomaly.anomaly_id.as_str()) else {
                continue;
            };
            let issue_type = anomaly.kind.to_string();
            let entity = entity_from_anomaly(anomaly);
            let causal_hint = causal_by_cause.get(issue_type.as_str()).map(|link| {
                format!(" Linked effect: {} (conf {:.2}).", link.effect, link.confidence)
            });
            let rationale = format!(
                "{}.{}",
                anomaly.description.trim_end_matches('.'),
                causal_hint.unwrap_or_default()
            );

            self.apply_rules(
                &issue_type,
                &entity,
                sev,
                &anomaly.evidence,
                &rationale,
                &mut seen,
                &mut outputs,
                cycle_id,
                board,
            )?;
        }

        for hit in policy_hits {
            let Some(sev) = by_source.get(hit.hit_id.as_str()) else {
                continue;
            };
            let issue_type = format!("POLICY_{}", hit.policy_id);
            self.apply_rules(
                &issue_type,
                &hit.event_id,
                sev,
                &[hit.event_id.clone()],
                &hit.description,
                &mut seen,
                &mut outputs,
                cycle_id,
                board,
            )?;
        }

        outputs.sort_by(|a, b| {
            b.severity_score
                .partial_cmp(&a.severity_score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(
                    b.confidence
                        .partial_cmp(&a.confidence)
                        .unwrap_or(std::cmp::Ordering::Equal),
                )
        });
        outputs.truncate(MAX_RECOMMENDATIONS);

        if !outputs.is_empty() {
            debug!(recommendations = outputs.len(), "actions mapped");
        }
        Ok(outputs)
    }

    #[allow(clippy::too_many_arguments)]
    fn apply_rules(
        &self,
        issue_type: &str,
        entity: &str,
        sev: &SeverityScore,
        evidence: &[String],
        rationale: &str,
        seen: &mut HashSet<(String, String, String)>,
        outputs: &mut Vec<RecommendationV2>,
        cycle_id: &str,
        board: &Blackboard,
    ) -> Result<(), AgentError> {
        let rules: Vec<&RecommendationRule> =
            RULES.iter().filter(|r| r.issue_type == issue_type).collect();

        if rules.is_empty() {
            self.emit_fallback(issue_type, entity, sev, evidence, rationale, cycle_id, board, outputs)?;
            return Ok(());
        }

        for rule in rules {
            if sev.final_score < rule.min_severity || sev.final_score > rule.max_severity {
                continue;
            }
            let primary_evidence = evidence.first().cloned().unwrap_or_else(|| sev.source_id.clone());
            let key = (
                rule.rule_id.to_string(),
                issue_type.to_string(),
                primary_evidence,
            );
            if !seen.insert(key) {
                continue;
            }

            let c_sev = (sev.final_score / 10.0).clamp(0.0, 1.0);
            let context_bonus = 1.0; // context factors always attached by the severity engine
            let confidence = round3(0.5 * rule.base_confidence + 0.2 * c_sev + 0.3 * context_bonus);
            let urgency = urgency_for(sev.final_score);

            outputs.push(board.add_recommendation_v2(
                cycle_id,
                RecommendationV2Draft {
                    issue_type: issue_type.to_string(),
                    entity: entity.to_string(),
                    severity_score: sev.final_score,
                    action_code: rule.action_code.to_string(),
                    action_description: rule.action_description.to_string(),
                    confidence,
                    preconditions: rule.preconditions.iter().map(|s| s.to_string()).collect(),
                    evidence_ids: evidence.to_vec(),
                    expected_effect: rule.expected_effect.to_string(),
                    rationale: rationale.to_string(),
                    rule_id: rule.rule_id.to_string(),
                    urgency,
                },
            )?);

            for (idx, step) in rule.step_templates.iter().enumerate() {
                let step_no = idx + 1;
                outputs.push(board.add_recommendation_v2(
                    cycle_id,
                    RecommendationV2Draft {
                        issue_type: issue_type.to_string(),
                        entity: entity.to_string(),
                        severity_score: sev.final_score,
                        action_code: format!("{}_STEP_{}", rule.action_code, step_no),
                        action_description: step.to_string(),
                        confidence: round3((confidence - 0.04).max(0.6)),
                        preconditions: rule.preconditions.iter().map(|s| s.to_string()).collect(),
                        evidence_ids: evidence.to_vec(),
                        expected_effect: rule.expected_effect.to_string(),
                        rationale: rationale.to_string(),
                        rule_id: format!("{}_STEP_{}", rule.rule_id, step_no),
                        urgency,
                    },
                )?);
            }
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn emit_fallback(
        &self,
        issue_type: &str,
        entity: &str,
        sev: &SeverityScore,
        evidence: &[String],
        rationale: &str,
        cycle_id: &str,
        board: &Blackboard,
        outputs: &mut Vec<RecommendationV2>,
    ) -> Result<(), AgentError> {
        let base_conf = if sev.final_score >= 7.0 { 0.74 } else { 0.68 };
        let urgency = urgency_for(sev.final_score);
        for (idx, (code, description, effect)) in FALLBACK_STEPS.iter().enumerate() {
            let step_no = idx + 1;
            outputs.push(board.add_recommendation_v2(
                cycle_id,
                RecommendationV2Draft {
                    issue_type: issue_type.to_string(),
                    entity: entity.to_string(),
                    severity_score: sev.final_score,
                    action_code: format!("{code}_{step_no}"),
                    action_description: description.to_string(),
                    confidence: base_conf,
                    preconditions: vec!["evidence_available=true".to_string()],
                    evidence_ids: evidence.to_vec(),
                    expected_effect: effect.to_string(),
                    rationale: rationale.to_string(),
                    rule_id: format!("REC_FALLBACK_{issue_type}_{step_no}"),
                    urgency,
                },
            )?);
        }
        Ok(())
    }
}

impl Default for RecommendationEngine {
    fn default() -> Self {
        Self::new()
    }
}

fn urgency_for(severity: f64) -> Urgency {
    if severity >= 8.5 {
        Urgency::Critical
    } else if severity >= 7.0 {
        Urgency::High
    } else if severity >= 4.0 {
        Urgency::Medium
    } else {
        Urgency::Low
    }
}

fn entity_from_anomaly(anomaly: &Anomaly) -> String {
    match anomaly.evidence.first() {
        Some(ev) => ev.split('/').next().unwrap_or(ev).to_string(),
        None => anomaly.anomaly_id.clone(),
    }
}

fn round3(v: f64) -> f64 {
    (v * 1000.0).round() / 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::severity::SeverityEngine;
    use crate::blackboard::{AnomalyDraft, AnomalyKind};
    use chrono::{TimeZone, Utc};

    fn scored_anomaly(
        board: &Blackboard,
        cycle_id: &str,
        kind: AnomalyKind,
        confidence: f64,
    ) -> (Anomaly, Vec<SeverityScore>) {
        let anomaly = board
            .add_anomaly(
                cycle_id,
                AnomalyDraft {
                    kind,
                    agent: "test".to_string(),
                    evidence: vec!["evt_1".to_string()],
                    description: format!("{kind} on wf_deploy_1"),
                    confidence,
                    timestamp: Utc.with_ymd_and_hms(2025, 6, 3, 12, 0, 0).single().unwrap(),
                },
            )
            .unwrap();
        let scores = SeverityEngine::new()
            .analyze(std::slice::from_ref(&anomaly), &[], cycle_id, board)
            .unwrap();
        (anomaly, scores)
    }

    #[test]
    fn missing_step_maps_to_block_and_review_with_steps() {
        let board = Blackboard::in_memory();
        let cycle_id = board.start_cycle().unwrap();
        let (anomaly, scores) =
            scored_anomaly(&board, &cycle_id, AnomalyKind::MissingStep, 0.95);

        let recs = RecommendationEngine::new()
            .generate(&[anomaly], &[], &[], &scores, &cycle_id, &board)
            .unwrap();

        let summary: Vec<_> = recs
            .iter()
            .filter(|r| r.action_code == "BLOCK_AND_REVIEW")
            .collect();
        assert_eq!(summary.len(), 1);
        assert_eq!(summary[0].rule_id, "REC_WF_MISS_01");
        assert_eq!(summary[0].urgency, Urgency::Critical);

        // Step templates 1-4 follow the summary.
        for step in 1..=4 {
            assert!(recs
                .iter()
                .any(|r| r.action_code == format!("BLOCK_AND_REVIEW_STEP_{step}")));
        }
    }

    #[test]
    fn below_band_findings_get_no_rule() {
        let board = Blackboard::in_memory();
        let cycle_id = board.start_cycle().unwrap();
        // Low-confidence warning scores below the SCALE_OUT band.
        let (anomaly, scores) =
            scored_anomaly(&board, &cycle_id, AnomalyKind::SustainedResourceWarning, 0.1);
        assert!(scores[0].final_score < 5.0);

        let recs = RecommendationEngine::new()
            .generate(&[anomaly], &[], &[], &scores, &cycle_id, &board)
            .unwrap();
        assert!(recs.iter().all(|r| r.action_code != "SCALE_OUT"));
    }

    #[test]
    fn unmapped_issue_gets_three_step_fallback() {
        let board = Blackboard::in_memory();
        let cycle_id = board.start_cycle().unwrap();
        let (anomaly, scores) =
            scored_anomaly(&board, &cycle_id, AnomalyKind::CorrelationAlert, 0.85);

        let recs = RecommendationEngine::new()
            .generate(&[anomaly], &[], &[], &scores, &cycle_id, &board)
            .unwrap();
        assert_eq!(recs.len(), 3);
        assert!(recs.iter().any(|r| r.action_code.starts_with("INVESTIGATE_ROOT_CAUSE")));
        assert!(recs.iter().any(|r| r.action_code.starts_with("CONTAIN_IMPACT")));
        assert!(recs.iter().any(|r| r.action_code.starts_with("VERIFY_RECOVERY")));
    }

    #[test]
    fn confidence_formula_holds() {
        let board = Blackboard::in_memory();
        let cycle_id = board.start_cycle().unwrap();
        let (anomaly, scores) =
            scored_anomaly(&board, &cycle_id, AnomalyKind::MissingStep, 0.95);
        let sev = scores[0].final_score;

        let recs = RecommendationEngine::new()
            .generate(&[anomaly], &[], &[], &scores, &cycle_id, &board)
            .unwrap();
        let summary = recs
            .iter()
            .find(|r| r.action_code == "BLOCK_AND_REVIEW")
            .unwrap();
        let expected = round3(0.5 * 0.9 + 0.2 * (sev / 10.0) + 0.3 * 1.0);
        assert!((summary.confidence - expected).abs() < 1e-9);
    }

    #[test]
    fn output_sorted_and_capped() {
        let board = Blackboard::in_memory();
        let cycle_id = board.start_cycle().unwrap();

        let mut anomalies = Vec::new();
        let mut all_scores = Vec::new();
        for _ in 0..20 {
            let (a, mut s) =
                scored_anomaly(&board, &cycle_id, AnomalyKind::SustainedResourceCritical, 0.95);
            anomalies.push(a);
            all_scores.append(&mut s);
        }

        let recs = RecommendationEngine::new()
            .generate(&anomalies, &[], &[], &all_scores, &cycle_id, &board)
            .unwrap();
        assert!(recs.len() <= MAX_RECOMMENDATIONS);
        for pair in recs.windows(2) {
            assert!(pair[0].severity_score >= pair[1].severity_score);
        }
    }

    #[test]
    fn duplicate_rule_evidence_pairs_dedupe() {
        let board = Blackboard::in_memory();
        let cycle_id = board.start_cycle().unwrap();
        // Two identical anomalies share the same primary evidence id.
        let (a1, s1) = scored_anomaly(&board, &cycle_id, AnomalyKind::MissingStep, 0.95);
        let (a2, s2) = scored_anomaly(&board, &cycle_id, AnomalyKind::MissingStep, 0.95);
        let scores: Vec<SeverityScore> = s1.into_iter().chain(s2).collect();

        let recs = RecommendationEngine::new()
            .generate(&[a1, a2], &[], &[], &scores, &cycle_id, &board)
            .unwrap();
        let summaries = recs
            .iter()
            .filter(|r| r.action_code == "BLOCK_AND_REVIEW")
            .count();
        assert_eq!(summaries, 1);
    }
}

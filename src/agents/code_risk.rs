//! Code-Risk Agent — pre-deploy risk from code/CI telemetry
//!
//! Turns already-ingested code-hosting webhook events into predictive
//! anomalies before deploy. Deterministic and explainable: no external API
//! calls, no code parsing — only payload fields already observed, with
//! documented fallbacks.
//!
//! Emits: HIGH_CHURN_PR, LOW_TEST_COVERAGE, HIGH_COMPLEXITY_HINT,
//! HOTSPOT_FILE_CHANGE.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::debug;

use crate::blackboard::{AnomalyDraft, AnomalyKind, Blackboard};
use crate::observation::ObservedEvent;

use super::{AgentError, DetectionAgent, DetectionReport, ObservationSnapshot};

/// Churn (added+deleted lines) at or above this is risky.
const CHURN_THRESHOLD: i64 = 40;

/// Coverage strictly below this fraction is risky.
const COVERAGE_THRESHOLD: f64 = 0.70;

/// Complexity hints at or above this are risky.
const COMPLEXITY_THRESHOLD: f64 = 8.0;

/// Filename fragments that mark a hotspot file.
const HOTSPOT_KEYWORDS: [&str; 4] = ["regex", "auth", "policy", "payment"];

pub struct CodeRiskAgent;

impl CodeRiskAgent {
    pub const AGENT_NAME: &'static str = "CodeRiskAgent";

    pub fn new() -> Self {
        Self
    }

    /// An event qualifies when its source signature names the code host.
    fn is_code_event(event: &ObservedEvent) -> bool {
        event
            .metadata
            .get("source_signature")
            .and_then(|v| v.get("tool_name"))
            .and_then(|v| v.as_str())
            .is_some_and(|tool| tool.eq_ignore_ascii_case("github"))
    }

    fn deployment_id(event: &ObservedEvent) -> Option<String> {
        for path in [
            ["enterprise_context", "deployment_id"],
            ["github", "deployment_id"],
        ] {
            if let Some(id) = event
                .metadata
                .get(path[0])
                .and_then(|v| v.get(path[1]))
                .and_then(|v| v.as_str())
            {
                return Some(id.to_string());
            }
        }
        None
    }

    fn event_kind_tag(event: &ObservedEvent) -> &str {
        event
            .metadata
            .get("github")
            .and_then(|v| v.get("event"))
            .and_then(|v| v.as_str())
            .unwrap_or("unknown")
    }

    fn payload(event: &ObservedEvent) -> Option<&Value> {
        event.metadata.get("event_payload")
    }

    /// Churn, hotspot files and complexity hint from pull-request payloads.
    ///
    /// Fallbacks when `metadata.churn_lines` is absent: additions+deletions,
    /// then changed_files x 10.
    fn derive_pr_features(payloads: &[&Value]) -> (Option<i64>, Vec<String>, Option<f64>) {
        let mut churn: Option<i64> = None;
        let mut hotspots: Vec<String> = Vec::new();
        let mut complexity: Option<f64> = None;

        for payload in payloads {
            if let Some(meta) = payload.get("metadata") {
                if churn.is_none() {
                    churn = meta.get("churn_lines").and_then(|v| v.as_i64());
                }
                if complexity.is_none() {
                    complexity = meta.get("complexity").and_then(|v| v.as_f64());
                }
                if let Some(files) = meta.get("hotspot_files").and_then(|v| v.as_array()) {
                    hotspots.extend(files.iter().filter_map(|f| f.as_str()).map(String::from));
                }
            }

            let pr = payload.get("pull_request");
            if churn.is_none() {
                if let Some(pr) = pr {
                    let additions = pr.get("additions").and_then(|v| v.as_i64());
                    let deletions = pr.get("deletions").and_then(|v| v.as_i64());
                    churn = match (additions, deletions) {
                        (Some(a), Some(d)) => Some(a + d),
                        _ => pr
                            .get("changed_files")
                            .and_then(|v| v.as_i64())
                            .map(|f| f * 10),
                    };
                }
            }
            if let Some(files) = pr
                .and_then(|p| p.get("files"))
                .and_then(|v| v.as_array())
            {
                for file in files.iter().filter_map(|f| f.as_str()) {
                    let lower = file.to_lowercase();
                    if HOTSPOT_KEYWORDS.iter().any(|k| lower.contains(k)) {
                        hotspots.push(file.to_string());
                    }
                }
            }
        }

        // De-dup hotspots preserving order.
        let mut seen = std::collections::HashSet::new();
        hotspots.retain(|f| seen.insert(f.clone()));

        (churn, hotspots, complexity)
    }

    /// Coverage from workflow-run payloads; accepts 0-1 or 0-100 scales.
    fn derive_coverage(payloads: &[&Value]) -> Option<f64> {
        for payload in payloads {
            let cov = payload
                .get("metadata")
                .and_then(|m| m.get("test_coverage"))
                .or_else(|| payload.get("test_coverage"))
                .and_then(|v| v.as_f64());
            if let Some(mut c) = cov {
                if c > 1.0 {
                    c /= 100.0;
                }
                return Some(c.clamp(0.0, 1.0));
            }
        }
        None
    }
}

impl Default for CodeRiskAgent {
    fn default() -> Self {
        Self::new()
    }
}

impl DetectionAgent for CodeRiskAgent {
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

        let code_events: Vec<&ObservedEvent> = snapshot
            .events
            .iter()
            .filter(|e| Self::is_code_event(e))
            .collect();
        if code_events.is_empty() {
            return Ok(report);
        }

        // Group by deployment so findings predict "this release is risky".
        let mut by_deploy: BTreeMap<String, Vec<&ObservedEvent>> = BTreeMap::new();
        for event in code_events {
            let deploy_id =
                Self::deployment_id(event).unwrap_or_else(|| "deploy_unknown".to_string());
            by_deploy.entry(deploy_id).or_default().push(event);
        }

        for (deploy_id, events) in by_deploy {
            let wf_id = events
                .iter()
                .find_map(|e| e.workflow_id.clone())
                .unwrap_or_else(|| "wf_unknown".to_string());
            let evidence: Vec<String> =
                events.iter().map(|e| e.event_id.clone()).take(3).collect();
            let latest_ts: DateTime<Utc> = events
                .iter()
                .map(|e| e.timestamp)
                .max()
                .unwrap_or_else(Utc::now);

            let pr_payloads: Vec<&Value> = events
                .iter()
                .filter(|e| Self::event_kind_tag(e) == "pull_request")
                .filter_map(|e| Self::payload(e))
                .collect();
            let run_payloads: Vec<&Value> = events
                .iter()
                .filter(|e| Self::event_kind_tag(e) == "workflow_run")
                .filter_map(|e| Self::payload(e))
                .collect();

            let (churn, hotspots, complexity) = Self::derive_pr_features(&pr_payloads);
            let coverage = Self::derive_coverage(&run_payloads);

            if let Some(churn) = churn.filter(|c| *c >= CHURN_THRESHOLD) {
                let confidence = (0.65 + (churn - CHURN_THRESHOLD) as f64 / 100.0).min(0.92);
                report.anomalies.push(board.add_anomaly(
                    cycle_id,
                    AnomalyDraft {
                        kind: AnomalyKind::HighChurnPr,
                        agent: Self::AGENT_NAME.to_string(),
                        evidence: evidence.clone(),
                        description: format!(
                            "{wf_id} deploy {deploy_id}: high churn (+{churn} lines) raises failure probability"
                        ),
                        confidence,
                        timestamp: latest_ts,
                    },
                )?);
            }

            if let Some(coverage) = coverage.filter(|c| *c < COVERAGE_THRESHOLD) {
                let confidence =
                    (0.70 + (COVERAGE_THRESHOLD - coverage) * 1.2).min(0.95);
                report.anomalies.push(board.add_anomaly(
                    cycle_id,
                    AnomalyDraft {
                        kind: AnomalyKind::LowTestCoverage,
                        agent: Self::AGENT_NAME.to_string(),
                        evidence: evidence.clone(),
                        description: format!(
                            "{wf_id} deploy {deploy_id}: low test coverage ({:.0}%) predicts higher runtime bug risk",
                            coverage * 100.0
                        ),
                        confidence,
                        timestamp: latest_ts,
                    },
                )?);
            }

            if let Some(complexity) = complexity.filter(|c| *c >= COMPLEXITY_THRESHOLD) {
                let confidence =
                    (0.6 + (complexity - COMPLEXITY_THRESHOLD) * 0.08).min(0.9);
                report.anomalies.push(board.add_anomaly(
                    cycle_id,
                    AnomalyDraft {
                        kind: AnomalyKind::HighComplexityHint,
                        agent: Self::AGENT_NAME.to_string(),
                        evidence: evidence.clone(),
                        description: format!(
                            "{wf_id} deploy {deploy_id}: high cognitive complexity hint ({complexity:.1})"
                        ),
                        confidence,
                        timestamp: latest_ts,
                    },
                )?);
            }

            if !hotspots.is_empty() {
                report.anomalies.push(board.add_anomaly(
                    cycle_id,
                    AnomalyDraft {
                        kind: AnomalyKind::HotspotFileChange,
                        agent: Self::AGENT_NAME.to_string(),
                        evidence: evidence.clone(),
                        description: format!(
                            "{wf_id} deploy {deploy_id}: hotspot file(s) changed: {}",
                            hotspots
                                .iter()
                                .take(3)
                                .cloned()
                                .collect::<Vec<_>>()
                                .join(", ")
                        ),
                        confidence: 0.78,
                        timestamp: latest_ts,
                    },
                )?);
            }
        }

        if !report.anomalies.is_empty() {
            debug!(anomalies = report.anomalies.len(), "code risk findings");
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observation::EventKind;
    use serde_json::{json, Map};

    fn code_event(id: &str, github_event: &str, payload: Value) -> ObservedEvent {
        let mut metadata = Map::new();
        metadata.insert(
            "source_signature".to_string(),
            json!({ "tool_name": "github" }),
        );
        metadata.insert(
            "enterprise_context".to_string(),
            json!({ "deployment_id": "deploy_42" }),
        );
        metadata.insert("github".to_string(), json!({ "event": github_event }));
        metadata.insert("event_payload".to_string(), payload);

        ObservedEvent {
            event_id: id.to_string(),
            kind: EventKind::ConfigChange,
            workflow_id: Some("wf_release_7".to_string()),
            actor: "svc_ci".to_string(),
            resource: None,
            timestamp: Utc::now(),
            metadata,
            observed_at: Utc::now(),
        }
    }

    fn run(events: Vec<ObservedEvent>) -> Vec<crate::blackboard::Anomaly> {
        let board = Blackboard::in_memory();
        let cycle_id = board.start_cycle().unwrap();
        let agent = CodeRiskAgent::new();
        let snapshot = ObservationSnapshot {
            events,
            metrics: Vec::new(),
        };
        agent.analyze(&snapshot, &cycle_id, &board).unwrap().anomalies
    }

    #[test]
    fn high_churn_from_additions_and_deletions() {
        let anomalies = run(vec![code_event(
            "evt_pr1",
            "pull_request",
            json!({ "pull_request": { "additions": 120, "deletions": 30 } }),
        )]);
        let churn: Vec<_> = anomalies
            .iter()
            .filter(|a| a.kind == AnomalyKind::HighChurnPr)
            .collect();
        assert_eq!(churn.len(), 1);
        assert!(churn[0].description.contains("+150 lines"));
        assert!(churn[0].confidence <= 0.92);
    }

    #[test]
    fn churn_falls_back_to_changed_files() {
        let anomalies = run(vec![code_event(
            "evt_pr2",
            "pull_request",
            json!({ "pull_request": { "changed_files": 6 } }),
        )]);
        assert!(anomalies.iter().any(|a| a.kind == AnomalyKind::HighChurnPr));
    }

    #[test]
    fn low_coverage_accepts_percent_scale() {
        let anomalies = run(vec![code_event(
            "evt_run1",
            "workflow_run",
            json!({ "metadata": { "test_coverage": 55 } }),
        )]);
        let cov: Vec<_> = anomalies
            .iter()
            .filter(|a| a.kind == AnomalyKind::LowTestCoverage)
            .collect();
        assert_eq!(cov.len(), 1);
        assert!(cov[0].description.contains("55%"));
    }

    #[test]
    fn healthy_coverage_is_quiet() {
        let anomalies = run(vec![code_event(
            "evt_run2",
            "workflow_run",
            json!({ "metadata": { "test_coverage": 0.85 } }),
        )]);
        assert!(anomalies.iter().all(|a| a.kind != AnomalyKind::LowTestCoverage));
    }

    #[test]
    fn hotspot_files_from_filename_keywords() {
        let anomalies = run(vec![code_event(
            "evt_pr3",
            "pull_request",
            json!({ "pull_request": { "files": ["src/payment_gateway.py", "README.md"] } }),
        )]);
        let hotspot: Vec<_> = anomalies
            .iter()
            .filter(|a| a.kind == AnomalyKind::HotspotFileChange)
            .collect();
        assert_eq!(hotspot.len(), 1);
        assert!(hotspot[0].description.contains("payment_gateway"));
    }

    #[test]
    fn complexity_hint_threshold() {
        let anomalies = run(vec![code_event(
            "evt_pr4",
            "pull_request",
            json!({ "metadata": { "complexity": 9.5 } }),
        )]);
        assert!(anomalies
            .iter()
            .any(|a| a.kind == AnomalyKind::HighComplexityHint));
    }

    #[test]
    fn non_code_events_are_ignored() {
        let mut event = code_event("evt_other", "pull_request", json!({}));
        event.metadata.remove("source_signature");
        assert!(run(vec![event]).is_empty());
    }
}

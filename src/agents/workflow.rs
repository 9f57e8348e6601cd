//! Workflow Agent — workflow integrity monitoring
//!
//! Detects, per workflow seen in the observation window:
//!
//! - **Missing mandatory steps**: a mandatory step has no completion while a
//!   later-sequence step completed (the step was bypassed, not pending).
//! - **Out-of-order execution**: consecutive completions whose defined
//!   sequence numbers decrease.
//! - **Delays**: a step whose actual duration blows past its budget, or a
//!   started-but-unfinished workflow that has outrun its total step budget.
//!
//! Detection is definition-driven rule checking, no inference. The agent is
//! stateless; workflow definitions are configuration.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::blackboard::{Anomaly, AnomalyDraft, AnomalyKind, Blackboard};
use crate::observation::{EventKind, ObservedEvent};

use super::{AgentError, DetectionAgent, DetectionReport, ObservationSnapshot};

/// Step duration overrun factor that counts as a delay.
const DELAY_RATIO: f64 = 1.5;

/// Fallback per-step budget when a definition does not set one (seconds).
const DEFAULT_STEP_BUDGET_SECS: i64 = 60;

// ============================================================================
// Workflow Definitions
// ============================================================================

/// One step in a workflow definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepDefinition {
    pub name: String,
    /// Position in the canonical order (1-based).
    pub sequence: u32,
    pub mandatory: bool,
    /// Expected duration budget for this step (seconds).
    pub expected_duration_secs: i64,
}

/// Ordered step definition a workflow's events are checked against.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    pub name: String,
    pub steps: Vec<StepDefinition>,
}

impl WorkflowDefinition {
    /// The default five-step deploy pipeline. Approval is the one mandatory
    /// checkpoint.
    pub fn deploy_pipeline() -> Self {
        let step = |name: &str, sequence: u32, mandatory: bool| StepDefinition {
            name: name.to_string(),
            sequence,
            mandatory,
            expected_duration_secs: DEFAULT_STEP_BUDGET_SECS,
        };
        Self {
            name: "Deploy Pipeline".to_string(),
            steps: vec![
                step("build", 1, false),
                step("test", 2, false),
                step("approval", 3, true),
                step("staging", 4, false),
                step("production", 5, false),
            ],
        }
    }

    fn step_by_name(&self, name: &str) -> Option<&StepDefinition> {
        self.steps.iter().find(|s| s.name.eq_ignore_ascii_case(name))
    }

    /// Total time budget: the sum of per-step budgets.
    fn total_budget(&self) -> Duration {
        Duration::seconds(self.steps.iter().map(|s| s.expected_duration_secs).sum())
    }
}

// ============================================================================
// Workflow Agent
// ============================================================================

pub struct WorkflowAgent {
    definitions: Vec<WorkflowDefinition>,
}

impl WorkflowAgent {
    pub const AGENT_NAME: &'static str = "WorkflowAgent";

    pub fn new() -> Self {
        Self {
            definitions: vec![WorkflowDefinition::deploy_pipeline()],
        }
    }

    pub fn with_definitions(definitions: Vec<WorkflowDefinition>) -> Self {
        Self { definitions }
    }

    /// Resolve the definition for a workflow group: by `workflow_name`
    /// metadata when present, else the first configured definition.
    fn definition_for(&self, events: &[&ObservedEvent]) -> Option<&WorkflowDefinition> {
        let named = events.iter().find_map(|e| {
            e.metadata
                .get("workflow_name")
                .and_then(|v| v.as_str())
                .and_then(|name| self.definitions.iter().find(|d| d.name == name))
        });
        named.or_else(|| self.definitions.first())
    }

    fn analyze_workflow(
        &self,
        workflow_id: &str,
        events: &[&ObservedEvent],
        reference_now: DateTime<Utc>,
        cycle_id: &str,
        board: &Blackboard,
    ) -> Result<Vec<Anomaly>, AgentError> {
        let mut anomalies = Vec::new();
        let Some(definition) = self.definition_for(events) else {
            return Ok(anomalies);
        };

        // Completion timeline: (step def, timestamp, event id), time-ordered
        // with sequence breaking timestamp ties.
        let mut completions: Vec<(&StepDefinition, DateTime<Utc>, &str)> = events
            .iter()
            .filter(|e| e.kind == EventKind::WorkflowStepComplete)
            .filter_map(|e| {
                let step_name = e.metadata.get("step").and_then(|v| v.as_str())?;
                let step = definition.step_by_name(step_name)?;
                Some((step, e.timestamp, e.event_id.as_str()))
            })
            .collect();
        completions.sort_by_key(|(step, ts, _)| (*ts, step.sequence));

        let completed_seqs: Vec<u32> = completions.iter().map(|(s, _, _)| s.sequence).collect();
        let max_completed_seq = completed_seqs.iter().max().copied().unwrap_or(0);

        // ── Missing mandatory steps ──
        for step in definition.steps.iter().filter(|s| s.mandatory) {
            let completed = completed_seqs.contains(&step.sequence);
            if !completed && max_completed_seq > step.sequence {
                let evidence: Vec<String> = completions
                    .iter()
                    .filter(|(s, _, _)| s.sequence > step.sequence)
                    .map(|(_, _, id)| id.to_string())
                    .take(3)
                    .collect();
                let timestamp = completions
                    .last()
                    .map(|(_, ts, _)| *ts)
                    .unwrap_or(reference_now);
                anomalies.push(board.add_anomaly(
                    cycle_id,
                    AnomalyDraft {
                        kind: AnomalyKind::MissingStep,
                        agent: Self::AGENT_NAME.to_string(),
                        evidence,
                        description: format!(
                            "Mandatory step '{}' (seq {}) of {} was bypassed: later steps completed without it",
                            step.name, step.sequence, workflow_id
                        ),
                        confidence: 0.95,
                        timestamp,
                    },
                )?);
            }
        }

        // ── Out-of-order execution ──
        for pair in completions.windows(2) {
            let (earlier, earlier_ts, earlier_id) = pair[0];
            let (later, later_ts, later_id) = pair[1];
            if earlier.sequence > later.sequence {
                anomalies.push(board.add_anomaly(
                    cycle_id,
                    AnomalyDraft {
                        kind: AnomalyKind::SequenceViolation,
                        agent: Self::AGENT_NAME.to_string(),
                        evidence: vec![earlier_id.to_string(), later_id.to_string()],
                        description: format!(
                            "Out-of-order execution in {}: step '{}' (seq {}) completed before step '{}' (seq {})",
                            workflow_id, earlier.name, earlier.sequence, later.name, later.sequence
                        ),
                        confidence: 0.9,
                        timestamp: later_ts.max(earlier_ts),
                    },
                )?);
            }
        }

        // ── Per-step duration overruns ──
        anomalies.extend(self.detect_step_delays(
            workflow_id,
            definition,
            events,
            cycle_id,
            board,
        )?);

        // ── Incomplete workflow past its total budget ──
        anomalies.extend(self.detect_incomplete_overdue(
            workflow_id,
            definition,
            events,
            &completed_seqs,
            reference_now,
            cycle_id,
            board,
        )?);

        Ok(anomalies)
    }

    /// A completion reporting `actual_duration` well past the step's budget
    /// is a delay in its own right, whether or not the workflow finishes.
    fn detect_step_delays(
        &self,
        workflow_id: &str,
        definition: &WorkflowDefinition,
        events: &[&ObservedEvent],
        cycle_id: &str,
        board: &Blackboard,
    ) -> Result<Vec<Anomaly>, AgentError> {
        let mut anomalies = Vec::new();

        for event in events
            .iter()
            .filter(|e| e.kind == EventKind::WorkflowStepComplete)
        {
            let Some(step_name) = event.metadata.get("step").and_then(|v| v.as_str()) else {
                continue;
            };
            let Some(actual) = event.metadata.get("actual_duration").and_then(|v| v.as_f64())
            else {
                continue;
            };
            let expected = event
                .metadata
                .get("expected_duration")
                .and_then(|v| v.as_f64())
                .or_else(|| {
                    definition
                        .step_by_name(step_name)
                        .map(|s| s.expected_duration_secs as f64)
                })
                .unwrap_or(DEFAULT_STEP_BUDGET_SECS as f64);

            if expected <= 0.0 {
                continue;
            }
            let ratio = actual / expected;
            if ratio < DELAY_RATIO {
                continue;
            }

            // Stamp the anomaly at the moment the budget was exhausted: that
            // is when the delay began, and what downstream causal pairing
            // compares against.
            let step_start = events
                .iter()
                .find(|e| {
                    e.kind == EventKind::WorkflowStepStart
                        && e.metadata.get("step").and_then(|v| v.as_str()) == Some(step_name)
                })
                .map(|e| e.timestamp);
            let budget_exhausted_at = step_start
                .map(|ts| ts + Duration::seconds(expected as i64))
                .unwrap_or(event.timestamp);

            let mut evidence = Vec::new();
            if let Some(start) = events.iter().find(|e| {
                e.kind == EventKind::WorkflowStepStart
                    && e.metadata.get("step").and_then(|v| v.as_str()) == Some(step_name)
            }) {
                evidence.push(start.event_id.clone());
            }
            evidence.push(event.event_id.clone());

            anomalies.push(board.add_anomaly(
                cycle_id,
                AnomalyDraft {
                    kind: AnomalyKind::WorkflowDelay,
                    agent: Self::AGENT_NAME.to_string(),
                    evidence,
                    description: format!(
                        "Step '{}' of {} took {:.0}s against a {:.0}s budget ({:.1}x overrun)",
                        step_name, workflow_id, actual, expected, ratio
                    ),
                    confidence: (0.5 + 0.15 * ratio).min(0.95),
                    timestamp: budget_exhausted_at,
                },
            )?);
        }

        Ok(anomalies)
    }

    #[allow(clippy::too_many_arguments)]
    fn detect_incomplete_overdue(
        &self,
        workflow_id: &str,
        definition: &WorkflowDefinition,
        events: &[&ObservedEvent],
        completed_seqs: &[u32],
        reference_now: DateTime<Utc>,
        cycle_id: &str,
        board: &Blackboard,
    ) -> Result<Vec<Anomaly>, AgentError> {
        let total = definition.steps.len();
        let completed = completed_seqs.len();
        if completed == 0 || completed >= total {
            return Ok(Vec::new());
        }
        if events.iter().any(|e| e.kind == EventKind::WorkflowComplete) {
            return Ok(Vec::new());
        }

        let Some(start) = events
            .iter()
            .find(|e| e.kind == EventKind::WorkflowStart)
            .map(|e| e.timestamp)
            .or_else(|| events.iter().map(|e| e.timestamp).min())
        else {
            return Ok(Vec::new());
        };

        let budget = definition.total_budget();
        if reference_now - start <= budget {
            return Ok(Vec::new());
        }

        let missing_fraction = (total - completed) as f64 / total as f64;
        let evidence: Vec<String> = events.iter().map(|e| e.event_id.clone()).take(3).collect();

        let anomaly = board.add_anomaly(
            cycle_id,
            AnomalyDraft {
                kind: AnomalyKind::WorkflowDelay,
                agent: Self::AGENT_NAME.to_string(),
                evidence,
                description: format!(
                    "{} incomplete: {}/{} steps done, no completion event, {}s past its {}s budget",
                    workflow_id,
                    completed,
                    total,
                    (reference_now - start).num_seconds() - budget.num_seconds(),
                    budget.num_seconds()
                ),
                confidence: (0.5 + 0.4 * missing_fraction).min(0.9),
                timestamp: start + budget,
            },
        )?;
        Ok(vec![anomaly])
    }
}

impl Default for WorkflowAgent {
    fn default() -> Self {
        Self::new()
    }
}

impl DetectionAgent for WorkflowAgent {
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

        // Snapshot time reference: the newest observation, so replayed data
        // is judged against its own clock rather than the wall clock.
        let Some(reference_now) = snapshot.events.iter().map(|e| e.timestamp).max() else {
            return Ok(report);
        };

        // Group workflow events by workflow id.
        let mut by_workflow: std::collections::BTreeMap<&str, Vec<&ObservedEvent>> =
            std::collections::BTreeMap::new();
        for event in snapshot.events.iter().filter(|e| {
            matches!(
                e.kind,
                EventKind::WorkflowStart
                    | EventKind::WorkflowStepStart
                    | EventKind::WorkflowStepComplete
                    | EventKind::WorkflowStepSkip
                    | EventKind::WorkflowComplete
            )
        }) {
            if let Some(wf_id) = event.workflow_id.as_deref() {
                by_workflow.entry(wf_id).or_default().push(event);
            }
        }

        for (workflow_id, mut events) in by_workflow {
            events.sort_by_key(|e| e.timestamp);
            let found =
                self.analyze_workflow(workflow_id, &events, reference_now, cycle_id, board)?;
            if !found.is_empty() {
                debug!(
                    workflow_id,
                    anomalies = found.len(),
                    "workflow integrity findings"
                );
            }
            report.anomalies.extend(found);
        }

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::{json, Map};

    fn ts(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).single().unwrap()
    }

    fn wf_event(
        id: &str,
        kind: EventKind,
        wf: &str,
        secs: i64,
        metadata: Map<String, serde_json::Value>,
    ) -> ObservedEvent {
        ObservedEvent {
            event_id: id.to_string(),
            kind,
            workflow_id: Some(wf.to_string()),
            actor: "user_alice".to_string(),
            resource: None,
            timestamp: ts(secs),
            metadata,
            observed_at: ts(secs),
        }
    }

    fn step_complete(id: &str, wf: &str, step: &str, secs: i64) -> ObservedEvent {
        let mut md = Map::new();
        md.insert("step".to_string(), json!(step));
        wf_event(id, EventKind::WorkflowStepComplete, wf, secs, md)
    }

    fn run(events: Vec<ObservedEvent>) -> Vec<Anomaly> {
        let board = Blackboard::in_memory();
        let cycle_id = board.start_cycle().unwrap();
        let agent = WorkflowAgent::new();
        let snapshot = ObservationSnapshot {
            events,
            metrics: Vec::new(),
        };
        agent.analyze(&snapshot, &cycle_id, &board).unwrap().anomalies
    }

    #[test]
    fn missing_mandatory_step_detected() {
        let anomalies = run(vec![
            wf_event("evt_start", EventKind::WorkflowStart, "wf_deploy_1", 0, Map::new()),
            step_complete("evt_build", "wf_deploy_1", "build", 1),
            step_complete("evt_prod", "wf_deploy_1", "production", 2),
        ]);

        let missing: Vec<_> = anomalies
            .iter()
            .filter(|a| a.kind == AnomalyKind::MissingStep)
            .collect();
        assert_eq!(missing.len(), 1);
        assert!(missing[0].confidence >= 0.9);
        assert!(missing[0].description.contains("approval"));
        assert!(missing[0].description.contains("wf_deploy_1"));
        assert!(!missing[0].evidence.is_empty());
    }

    #[test]
    fn pending_mandatory_step_is_not_missing() {
        // Approval not yet due: nothing later than seq 3 completed.
        let anomalies = run(vec![
            wf_event("evt_start", EventKind::WorkflowStart, "wf_deploy_2", 0, Map::new()),
            step_complete("evt_build", "wf_deploy_2", "build", 1),
            step_complete("evt_test", "wf_deploy_2", "test", 2),
        ]);
        assert!(anomalies.iter().all(|a| a.kind != AnomalyKind::MissingStep));
    }

    #[test]
    fn out_of_order_completion_detected() {
        let anomalies = run(vec![
            step_complete("evt_a", "wf_deploy_3", "staging", 1),
            step_complete("evt_b", "wf_deploy_3", "test", 2),
        ]);

        let violations: Vec<_> = anomalies
            .iter()
            .filter(|a| a.kind == AnomalyKind::SequenceViolation)
            .collect();
        assert_eq!(violations.len(), 1);
        assert!((violations[0].confidence - 0.9).abs() < 1e-9);
        assert_eq!(violations[0].evidence, vec!["evt_a", "evt_b"]);
    }

    #[test]
    fn step_duration_overrun_is_a_delay() {
        let mut start_md = Map::new();
        start_md.insert("step".to_string(), json!("build"));
        start_md.insert("expected_duration".to_string(), json!(60));
        let mut complete_md = Map::new();
        complete_md.insert("step".to_string(), json!("build"));
        complete_md.insert("actual_duration".to_string(), json!(180));

        let anomalies = run(vec![
            wf_event("evt_start", EventKind::WorkflowStart, "wf_deploy_4", 0, Map::new()),
            wf_event("evt_s", EventKind::WorkflowStepStart, "wf_deploy_4", 5, start_md),
            wf_event("evt_c", EventKind::WorkflowStepComplete, "wf_deploy_4", 185, complete_md),
        ]);

        let delays: Vec<_> = anomalies
            .iter()
            .filter(|a| a.kind == AnomalyKind::WorkflowDelay)
            .collect();
        assert!(!delays.is_empty());
        // Stamped at budget exhaustion: step start (5s) + 60s budget.
        assert_eq!(delays[0].timestamp, ts(65));
    }

    #[test]
    fn incomplete_workflow_past_budget_is_a_delay() {
        let anomalies = run(vec![
            wf_event("evt_start", EventKind::WorkflowStart, "wf_deploy_5", 0, Map::new()),
            step_complete("evt_build", "wf_deploy_5", "build", 10),
            // Unrelated much-later event moves the snapshot clock past the
            // 300s total budget.
            wf_event("evt_late", EventKind::WorkflowStepStart, "wf_deploy_5", 400, Map::new()),
        ]);

        let delays: Vec<_> = anomalies
            .iter()
            .filter(|a| a.kind == AnomalyKind::WorkflowDelay)
            .collect();
        assert_eq!(delays.len(), 1);
        assert!(delays[0].description.contains("1/5"));
        assert!(delays[0].confidence > 0.5 && delays[0].confidence <= 0.9);
    }

    #[test]
    fn completed_workflow_is_quiet() {
        let anomalies = run(vec![
            wf_event("evt_start", EventKind::WorkflowStart, "wf_deploy_6", 0, Map::new()),
            step_complete("evt_build", "wf_deploy_6", "build", 10),
            wf_event("evt_done", EventKind::WorkflowComplete, "wf_deploy_6", 500, Map::new()),
        ]);
        assert!(anomalies.iter().all(|a| a.kind != AnomalyKind::WorkflowDelay));
    }
}

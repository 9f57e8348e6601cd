//! Blackboard — the shared reasoning state
//!
//! The only inter-agent communication channel. Each agent appends its own
//! section of the current cycle; nothing is overwritten or deleted within a
//! cycle, and a completed cycle is immutable forever.
//!
//! ## Rules
//!
//! - Exactly one cycle open at a time per process.
//! - Every `add_*` names its target cycle; writes aimed at a closed cycle
//!   fail with [`BlackboardError::CycleImmutable`], writes with no matching
//!   open cycle fail with [`BlackboardError::NoActiveCycle`].
//! - A single internal mutex serializes mutation; readers get snapshots.
//! - Completed cycles append to a JSONL log, best-effort. The in-memory
//!   record stays authoritative for the running process.

pub mod records;

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{info, warn};

use crate::guards::{self, GuardError};
use crate::ids::new_id;

pub use records::{
    Anomaly, AnomalyKind, CausalLink, ContextFactors, EntityType, EscalationState, Fact,
    Hypothesis, PolicyHit, ReasoningCycle, Recommendation, RecommendationV2, RiskSignal,
    RiskState, ScenarioRun, SeverityLabel, SeverityScore, SeveritySource, SimMetrics, Urgency,
    ViolationType,
};

/// Completed cycles retained in memory for recent-cycle queries. Older
/// history lives only in the cycle log.
const RETAINED_CYCLES: usize = 1000;

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum BlackboardError {
    /// A write arrived with no open cycle matching the target id.
    #[error("no active cycle (target: {0})")]
    NoActiveCycle(String),

    /// A write targeted a cycle that has already completed.
    #[error("cycle {0} is complete and immutable")]
    CycleImmutable(String),

    /// `start_cycle` while a cycle is still open.
    #[error("cycle {0} is still open; complete it before starting another")]
    CycleAlreadyOpen(String),

    /// Evidence invariant violated (empty evidence list).
    #[error(transparent)]
    Guard(#[from] GuardError),
}

// ============================================================================
// Drafts — what agents hand to the blackboard
// ============================================================================

#[derive(Debug, Clone)]
pub struct AnomalyDraft {
    pub kind: AnomalyKind,
    pub agent: String,
    pub evidence: Vec<String>,
    pub description: String,
    pub confidence: f64,
    /// Timestamp of the triggering evidence (not ingest wall clock).
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct PolicyHitDraft {
    pub policy_id: String,
    pub event_id: String,
    pub violation_type: ViolationType,
    pub agent: String,
    pub description: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct RiskSignalDraft {
    pub entity: String,
    pub entity_type: EntityType,
    pub current_state: RiskState,
    pub projected_state: RiskState,
    pub confidence: f64,
    pub time_horizon: String,
    pub reasoning: String,
    pub evidence_ids: Vec<String>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct CausalLinkDraft {
    pub cause: String,
    pub effect: String,
    pub cause_entity: String,
    pub effect_entity: String,
    pub confidence: f64,
    pub reasoning: String,
    pub evidence_ids: Vec<String>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct SeverityScoreDraft {
    pub source_type: SeveritySource,
    pub source_id: String,
    pub issue_type: String,
    pub base_score: f64,
    pub final_score: f64,
    pub label: SeverityLabel,
    pub vector: String,
    pub escalation_state: EscalationState,
    pub context_factors: ContextFactors,
    pub evidence_ids: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct RecommendationV2Draft {
    pub issue_type: String,
    pub entity: String,
    pub severity_score: f64,
    pub action_code: String,
    pub action_description: String,
    pub confidence: f64,
    pub preconditions: Vec<String>,
    pub evidence_ids: Vec<String>,
    pub expected_effect: String,
    pub rationale: String,
    pub rule_id: String,
    pub urgency: Urgency,
}

#[derive(Debug, Clone)]
pub struct ScenarioRunDraft {
    pub scenario_type: String,
    pub parameters: Map<String, Value>,
    pub baseline: SimMetrics,
    pub simulated: SimMetrics,
    pub impact_score: f64,
    pub assumptions: Vec<String>,
    pub confidence: f64,
    pub confidence_reason: String,
    pub related_cycle_id: Option<String>,
}

// ============================================================================
// Blackboard
// ============================================================================

struct BoardState {
    current: Option<ReasoningCycle>,
    completed: Vec<ReasoningCycle>,
}

/// The shared blackboard. One per process, constructed at startup.
pub struct Blackboard {
    state: Mutex<BoardState>,
    log: Option<CycleLog>,
}

impl Blackboard {
    /// In-memory blackboard (tests, ephemeral deployments).
    pub fn in_memory() -> Self {
        Self {
            state: Mutex::new(BoardState {
                current: None,
                completed: Vec::new(),
            }),
            log: None,
        }
    }

    /// Blackboard with a JSONL cycle log at `path`. A log that cannot be
    /// opened degrades to in-memory with a warning.
    pub fn with_log(path: impl AsRef<Path>) -> Self {
        let log = match CycleLog::open(path.as_ref()) {
            Ok(log) => Some(log),
            Err(err) => {
                warn!(error = %err, path = %path.as_ref().display(),
                    "cycle log unavailable, completed cycles kept in memory only");
                None
            }
        };
        Self {
            state: Mutex::new(BoardState {
                current: None,
                completed: Vec::new(),
            }),
            log,
        }
    }

    // ────────────────────────────────────────────────────────────────────
    // Cycle management
    // ────────────────────────────────────────────────────────────────────

    /// Open a new reasoning cycle.
    pub fn start_cycle(&self) -> Result<String, BlackboardError> {
        let mut state = self.lock();
        if let Some(open) = &state.current {
            return Err(BlackboardError::CycleAlreadyOpen(open.cycle_id.clone()));
        }
        let cycle_id = new_id("cycle");
        state.current = Some(ReasoningCycle::new(cycle_id.clone(), Utc::now()));
        Ok(cycle_id)
    }

    /// Close the current cycle, persist it, and return the immutable record.
    pub fn complete_cycle(&self) -> Result<ReasoningCycle, BlackboardError> {
        let mut state = self.lock();
        let mut cycle = state
            .current
            .take()
            .ok_or_else(|| BlackboardError::NoActiveCycle("<none>".to_string()))?;
        cycle.completed_at = Some(Utc::now());

        if let Some(log) = &self.log {
            if let Err(err) = log.append(&cycle) {
                warn!(cycle_id = %cycle.cycle_id, error = %err,
                    "cycle log append failed (cycle kept in memory)");
            }
        }

        state.completed.push(cycle.clone());
        let excess = state.completed.len().saturating_sub(RETAINED_CYCLES);
        if excess > 0 {
            state.completed.drain(..excess);
        }

        info!(
            cycle_id = %cycle.cycle_id,
            anomalies = cycle.anomalies.len(),
            policy_hits = cycle.policy_hits.len(),
            risk_signals = cycle.risk_signals.len(),
            "reasoning cycle completed"
        );
        Ok(cycle)
    }

    /// Id of the currently open cycle, if any.
    pub fn current_cycle_id(&self) -> Option<String> {
        self.lock().current.as_ref().map(|c| c.cycle_id.clone())
    }

    // ────────────────────────────────────────────────────────────────────
    // Agent append APIs (each agent appends its own section)
    // ────────────────────────────────────────────────────────────────────

    pub fn add_fact(
        &self,
        cycle_id: &str,
        source: impl Into<String>,
        claim: impl Into<String>,
        evidence_ids: Vec<String>,
    ) -> Result<Fact, BlackboardError> {
        let fact = Fact {
            fact_id: new_id("fact"),
            source: source.into(),
            claim: claim.into(),
            evidence_ids,
            timestamp: Utc::now(),
        };
        self.append(cycle_id, |cycle| cycle.facts.push(fact.clone()))?;
        Ok(fact)
    }

    pub fn add_anomaly(
        &self,
        cycle_id: &str,
        draft: AnomalyDraft,
    ) -> Result<Anomaly, BlackboardError> {
        guards::check_anomaly_evidence(&draft.evidence)?;
        let anomaly = Anomaly {
            anomaly_id: new_id("anom"),
            kind: draft.kind,
            agent: draft.agent,
            evidence: draft.evidence,
            description: draft.description,
            confidence: draft.confidence.clamp(0.0, 1.0),
            timestamp: draft.timestamp,
        };
        self.append(cycle_id, |cycle| cycle.anomalies.push(anomaly.clone()))?;
        Ok(anomaly)
    }

    pub fn add_policy_hit(
        &self,
        cycle_id: &str,
        draft: PolicyHitDraft,
    ) -> Result<PolicyHit, BlackboardError> {
        let hit = PolicyHit {
            hit_id: new_id("hit"),
            policy_id: draft.policy_id,
            event_id: draft.event_id,
            violation_type: draft.violation_type,
            agent: draft.agent,
            description: draft.description,
            timestamp: draft.timestamp,
        };
        self.append(cycle_id, |cycle| cycle.policy_hits.push(hit.clone()))?;
        Ok(hit)
    }

    pub fn add_risk_signal(
        &self,
        cycle_id: &str,
        draft: RiskSignalDraft,
    ) -> Result<RiskSignal, BlackboardError> {
        let signal = RiskSignal {
            signal_id: new_id("risk"),
            entity: draft.entity,
            entity_type: draft.entity_type,
            current_state: draft.current_state,
            projected_state: draft.projected_state,
            confidence: draft.confidence.clamp(0.0, 1.0),
            time_horizon: draft.time_horizon,
            reasoning: draft.reasoning,
            evidence_ids: draft.evidence_ids,
            timestamp: draft.timestamp,
        };
        self.append(cycle_id, |cycle| cycle.risk_signals.push(signal.clone()))?;
        Ok(signal)
    }

    pub fn add_hypothesis(
        &self,
        cycle_id: &str,
        agent: impl Into<String>,
        claim: impl Into<String>,
        evidence_ids: Vec<String>,
        confidence: f64,
    ) -> Result<Hypothesis, BlackboardError> {
        let hypothesis = Hypothesis {
            hypothesis_id: new_id("hyp"),
            agent: agent.into(),
            claim: claim.into(),
            evidence_ids,
            confidence: confidence.clamp(0.0, 1.0),
            timestamp: Utc::now(),
        };
        self.append(cycle_id, |cycle| cycle.hypotheses.push(hypothesis.clone()))?;
        Ok(hypothesis)
    }

    pub fn add_causal_link(
        &self,
        cycle_id: &str,
        draft: CausalLinkDraft,
    ) -> Result<CausalLink, BlackboardError> {
        let link = CausalLink {
            link_id: new_id("cause"),
            cause: draft.cause,
            effect: draft.effect,
            cause_entity: draft.cause_entity,
            effect_entity: draft.effect_entity,
            confidence: draft.confidence.clamp(0.0, 1.0),
            reasoning: draft.reasoning,
            evidence_ids: draft.evidence_ids,
            timestamp: draft.timestamp,
        };
        self.append(cycle_id, |cycle| cycle.causal_links.push(link.clone()))?;
        Ok(link)
    }

    pub fn add_recommendation(
        &self,
        cycle_id: &str,
        cause: impl Into<String>,
        action: impl Into<String>,
        urgency: Urgency,
        rationale: impl Into<String>,
        evidence_ids: Vec<String>,
    ) -> Result<Recommendation, BlackboardError> {
        guards::check_recommendation_evidence(&evidence_ids)?;
        let rec = Recommendation {
            rec_id: new_id("rec"),
            cause: cause.into(),
            action: action.into(),
            urgency,
            rationale: rationale.into(),
            evidence_ids,
            timestamp: Utc::now(),
        };
        self.append(cycle_id, |cycle| cycle.recommendations.push(rec.clone()))?;
        Ok(rec)
    }

    pub fn add_severity_score(
        &self,
        cycle_id: &str,
        draft: SeverityScoreDraft,
    ) -> Result<SeverityScore, BlackboardError> {
        let score = SeverityScore {
            score_id: new_id("sev"),
            source_type: draft.source_type,
            source_id: draft.source_id,
            issue_type: draft.issue_type,
            base_score: draft.base_score,
            final_score: draft.final_score,
            label: draft.label,
            vector: draft.vector,
            escalation_state: draft.escalation_state,
            context_factors: draft.context_factors,
            evidence_ids: draft.evidence_ids,
            timestamp: Utc::now(),
        };
        self.append(cycle_id, |cycle| cycle.severity_scores.push(score.clone()))?;
        Ok(score)
    }

    pub fn add_recommendation_v2(
        &self,
        cycle_id: &str,
        draft: RecommendationV2Draft,
    ) -> Result<RecommendationV2, BlackboardError> {
        guards::check_recommendation_evidence(&draft.evidence_ids)?;
        let rec = RecommendationV2 {
            rec_id: new_id("rec"),
            issue_type: draft.issue_type,
            entity: draft.entity,
            severity_score: draft.severity_score,
            action_code: draft.action_code,
            action_description: draft.action_description,
            confidence: draft.confidence,
            preconditions: draft.preconditions,
            evidence_ids: draft.evidence_ids,
            expected_effect: draft.expected_effect,
            rationale: draft.rationale,
            rule_id: draft.rule_id,
            urgency: draft.urgency,
            timestamp: Utc::now(),
        };
        self.append(cycle_id, |cycle| cycle.recommendations_v2.push(rec.clone()))?;
        Ok(rec)
    }

    pub fn add_scenario_run(
        &self,
        cycle_id: &str,
        draft: ScenarioRunDraft,
    ) -> Result<ScenarioRun, BlackboardError> {
        let run = ScenarioRun {
            run_id: new_id("scn"),
            scenario_type: draft.scenario_type,
            parameters: draft.parameters,
            baseline: draft.baseline,
            simulated: draft.simulated,
            impact_score: draft.impact_score,
            assumptions: draft.assumptions,
            confidence: draft.confidence,
            confidence_reason: draft.confidence_reason,
            related_cycle_id: draft.related_cycle_id,
            timestamp: Utc::now(),
        };
        self.append(cycle_id, |cycle| cycle.scenario_runs.push(run.clone()))?;
        Ok(run)
    }

    // ────────────────────────────────────────────────────────────────────
    // Queries (snapshot semantics)
    // ────────────────────────────────────────────────────────────────────

    pub fn get_current_anomalies(&self) -> Vec<Anomaly> {
        self.lock()
            .current
            .as_ref()
            .map(|c| c.anomalies.clone())
            .unwrap_or_default()
    }

    pub fn get_current_policy_hits(&self) -> Vec<PolicyHit> {
        self.lock()
            .current
            .as_ref()
            .map(|c| c.policy_hits.clone())
            .unwrap_or_default()
    }

    pub fn get_current_risk_signals(&self) -> Vec<RiskSignal> {
        self.lock()
            .current
            .as_ref()
            .map(|c| c.risk_signals.clone())
            .unwrap_or_default()
    }

    /// Snapshot of the open cycle, if any.
    pub fn current_cycle(&self) -> Option<ReasoningCycle> {
        self.lock().current.clone()
    }

    /// Most recently completed cycle, if any.
    pub fn last_completed_cycle(&self) -> Option<ReasoningCycle> {
        self.lock().completed.last().cloned()
    }

    /// Most recent completed cycles, oldest first.
    pub fn get_recent_cycles(&self, count: usize) -> Vec<ReasoningCycle> {
        let state = self.lock();
        let skip = state.completed.len().saturating_sub(count);
        state.completed[skip..].to_vec()
    }

    // ────────────────────────────────────────────────────────────────────

    fn append(
        &self,
        cycle_id: &str,
        push: impl FnOnce(&mut ReasoningCycle),
    ) -> Result<(), BlackboardError> {
        let mut state = self.lock();
        match &mut state.current {
            Some(cycle) if cycle.cycle_id == cycle_id => {
                push(cycle);
                Ok(())
            }
            _ => {
                if state.completed.iter().any(|c| c.cycle_id == cycle_id) {
                    Err(BlackboardError::CycleImmutable(cycle_id.to_string()))
                } else {
                    Err(BlackboardError::NoActiveCycle(cycle_id.to_string()))
                }
            }
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BoardState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

// ============================================================================
// Cycle Log
// ============================================================================

/// JSONL append log of completed cycles — one serialized cycle per line.
struct CycleLog {
    file: Mutex<File>,
    #[allow(dead_code)]
    path: PathBuf,
}

impl CycleLog {
    fn open(path: &Path) -> std::io::Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            file: Mutex::new(file),
            path: path.to_path_buf(),
        })
    }

    fn append(&self, cycle: &ReasoningCycle) -> std::io::Result<()> {
        let mut line = serde_json::to_string(cycle)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        line.push('\n');
        let mut file = match self.file.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        file.write_all(line.as_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn anomaly_draft() -> AnomalyDraft {
        AnomalyDraft {
            kind: AnomalyKind::WorkflowDelay,
            agent: "WorkflowAgent".to_string(),
            evidence: vec!["evt_1".to_string()],
            description: "wf_deploy_1 overdue".to_string(),
            confidence: 0.8,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn add_without_cycle_fails() {
        let board = Blackboard::in_memory();
        let err = board.add_anomaly("cycle_nope", anomaly_draft());
        assert!(matches!(err, Err(BlackboardError::NoActiveCycle(_))));
    }

    #[test]
    fn add_to_completed_cycle_fails_immutable() {
        let board = Blackboard::in_memory();
        let cycle_id = board.start_cycle().unwrap();
        board.complete_cycle().unwrap();

        let err = board.add_anomaly(&cycle_id, anomaly_draft());
        assert!(matches!(err, Err(BlackboardError::CycleImmutable(_))));
    }

    #[test]
    fn only_one_cycle_open() {
        let board = Blackboard::in_memory();
        let first = board.start_cycle().unwrap();
        let err = board.start_cycle();
        assert!(matches!(err, Err(BlackboardError::CycleAlreadyOpen(id)) if id == first));
    }

    #[test]
    fn empty_evidence_rejected() {
        let board = Blackboard::in_memory();
        let cycle_id = board.start_cycle().unwrap();
        let mut draft = anomaly_draft();
        draft.evidence.clear();
        assert!(matches!(
            board.add_anomaly(&cycle_id, draft),
            Err(BlackboardError::Guard(_))
        ));
    }

    #[test]
    fn completed_cycle_is_stable_snapshot() {
        let board = Blackboard::in_memory();
        let cycle_id = board.start_cycle().unwrap();
        board.add_anomaly(&cycle_id, anomaly_draft()).unwrap();
        let completed = board.complete_cycle().unwrap();

        assert!(completed.completed_at.is_some());
        assert_eq!(completed.anomalies.len(), 1);

        // Re-reading from the recent list yields the same contents.
        let recent = board.get_recent_cycles(1);
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].anomalies.len(), 1);
        assert_eq!(
            recent[0].anomalies[0].anomaly_id,
            completed.anomalies[0].anomaly_id
        );
    }

    #[test]
    fn facts_and_hypotheses_append_to_their_lanes() {
        let board = Blackboard::in_memory();
        let cycle_id = board.start_cycle().unwrap();

        let fact = board
            .add_fact(
                &cycle_id,
                "WorkflowAgent",
                "wf_deploy_1 started at 11:00",
                vec!["evt_start".to_string()],
            )
            .unwrap();
        assert!(fact.fact_id.starts_with("fact_"));

        board
            .add_hypothesis(
                &cycle_id,
                "CausalAgent",
                "latency may precede delay",
                vec!["anom_1".to_string(), "anom_2".to_string()],
                0.3,
            )
            .unwrap();

        let cycle = board.complete_cycle().unwrap();
        assert_eq!(cycle.facts.len(), 1);
        assert_eq!(cycle.hypotheses.len(), 1);
    }

    #[test]
    fn recommendations_require_evidence() {
        let board = Blackboard::in_memory();
        let cycle_id = board.start_cycle().unwrap();

        let err = board.add_recommendation(
            &cycle_id,
            "MISSING_STEP",
            "Apply temporary access guard and trigger audit",
            Urgency::Critical,
            "Skipped steps bypass critical controls",
            Vec::new(),
        );
        assert!(matches!(err, Err(BlackboardError::Guard(_))));

        let rec = board
            .add_recommendation(
                &cycle_id,
                "MISSING_STEP",
                "Apply temporary access guard and trigger audit",
                Urgency::Critical,
                "Skipped steps bypass critical controls",
                vec!["anom_1".to_string()],
            )
            .unwrap();
        assert_eq!(rec.evidence_ids, vec!["anom_1"]);

        let v2_err = board.add_recommendation_v2(
            &cycle_id,
            RecommendationV2Draft {
                issue_type: "MISSING_STEP".to_string(),
                entity: "wf_deploy_1".to_string(),
                severity_score: 9.0,
                action_code: "BLOCK_AND_REVIEW".to_string(),
                action_description: "Block promotion".to_string(),
                confidence: 0.9,
                preconditions: Vec::new(),
                evidence_ids: Vec::new(),
                expected_effect: "breach probability reduced".to_string(),
                rationale: "missing approval".to_string(),
                rule_id: "REC_WF_MISS_01".to_string(),
                urgency: Urgency::Critical,
            },
        );
        assert!(matches!(v2_err, Err(BlackboardError::Guard(_))));
    }

    #[test]
    fn confidence_is_clamped() {
        let board = Blackboard::in_memory();
        let cycle_id = board.start_cycle().unwrap();
        let mut draft = anomaly_draft();
        draft.confidence = 1.7;
        let anomaly = board.add_anomaly(&cycle_id, draft).unwrap();
        assert_eq!(anomaly.confidence, 1.0);
    }

    #[test]
    fn cycle_log_persists_completed_cycles() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cycles.jsonl");
        let board = Blackboard::with_log(&path);

        let cycle_id = board.start_cycle().unwrap();
        board.add_anomaly(&cycle_id, anomaly_draft()).unwrap();
        board.complete_cycle().unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 1);
        let parsed: ReasoningCycle = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(parsed.cycle_id, cycle_id);
        assert_eq!(parsed.anomalies.len(), 1);
    }
}

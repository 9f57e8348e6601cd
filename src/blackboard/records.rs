//! Cycle-scoped reasoning records
//!
//! Everything an agent derives lives inside exactly one [`ReasoningCycle`]
//! as an append-only list entry. Cross-references between records are id
//! strings into those lists, never object graphs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

// ============================================================================
// Risk Ladder
// ============================================================================

/// Risk trajectory states, totally ordered from benign to incident.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RiskState {
    Normal,
    Degraded,
    AtRisk,
    Violation,
    Incident,
}

impl RiskState {
    /// Numeric rank on the ladder (NORMAL = 0 … INCIDENT = 4).
    pub fn rank(self) -> u8 {
        match self {
            RiskState::Normal => 0,
            RiskState::Degraded => 1,
            RiskState::AtRisk => 2,
            RiskState::Violation => 3,
            RiskState::Incident => 4,
        }
    }
}

impl std::fmt::Display for RiskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RiskState::Normal => "NORMAL",
            RiskState::Degraded => "DEGRADED",
            RiskState::AtRisk => "AT_RISK",
            RiskState::Violation => "VIOLATION",
            RiskState::Incident => "INCIDENT",
        };
        write!(f, "{s}")
    }
}

// ============================================================================
// Anomalies
// ============================================================================

/// Closed vocabulary of anomaly kinds emitted by the detection agents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AnomalyKind {
    WorkflowDelay,
    MissingStep,
    SequenceViolation,
    SustainedResourceWarning,
    SustainedResourceCritical,
    ResourceDrift,
    BaselineDeviation,
    CorrelationAlert,
    HighChurnPr,
    LowTestCoverage,
    HighComplexityHint,
    HotspotFileChange,
}

impl std::fmt::Display for AnomalyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            AnomalyKind::WorkflowDelay => "WORKFLOW_DELAY",
            AnomalyKind::MissingStep => "MISSING_STEP",
            AnomalyKind::SequenceViolation => "SEQUENCE_VIOLATION",
            AnomalyKind::SustainedResourceWarning => "SUSTAINED_RESOURCE_WARNING",
            AnomalyKind::SustainedResourceCritical => "SUSTAINED_RESOURCE_CRITICAL",
            AnomalyKind::ResourceDrift => "RESOURCE_DRIFT",
            AnomalyKind::BaselineDeviation => "BASELINE_DEVIATION",
            AnomalyKind::CorrelationAlert => "CORRELATION_ALERT",
            AnomalyKind::HighChurnPr => "HIGH_CHURN_PR",
            AnomalyKind::LowTestCoverage => "LOW_TEST_COVERAGE",
            AnomalyKind::HighComplexityHint => "HIGH_COMPLEXITY_HINT",
            AnomalyKind::HotspotFileChange => "HOTSPOT_FILE_CHANGE",
        };
        write!(f, "{s}")
    }
}

/// An anomaly detected by an agent. Evidence is never empty.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Anomaly {
    pub anomaly_id: String,
    #[serde(rename = "type")]
    pub kind: AnomalyKind,
    pub agent: String,
    /// Observation ids that led to this finding.
    pub evidence: Vec<String>,
    pub description: String,
    pub confidence: f64,
    pub timestamp: DateTime<Utc>,
}

// ============================================================================
// Policy Hits
// ============================================================================

/// How a policy violation surfaced. The core set detects silent violations:
/// events that break policy without raising any alert of their own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ViolationType {
    Silent,
}

impl std::fmt::Display for ViolationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ViolationType::Silent => write!(f, "SILENT"),
        }
    }
}

/// A policy violation detected by the compliance agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyHit {
    pub hit_id: String,
    pub policy_id: String,
    pub event_id: String,
    pub violation_type: ViolationType,
    pub agent: String,
    pub description: String,
    pub timestamp: DateTime<Utc>,
}

// ============================================================================
// Risk Signals
// ============================================================================

/// What class of entity a risk signal is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityType {
    Workflow,
    Resource,
    Policy,
    Unknown,
}

impl std::fmt::Display for EntityType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            EntityType::Workflow => "workflow",
            EntityType::Resource => "resource",
            EntityType::Policy => "policy",
            EntityType::Unknown => "unknown",
        };
        write!(f, "{s}")
    }
}

/// A risk trajectory forecast. Only emitted when the projection strictly
/// exceeds the entity's last-known state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskSignal {
    pub signal_id: String,
    pub entity: String,
    pub entity_type: EntityType,
    pub current_state: RiskState,
    pub projected_state: RiskState,
    pub confidence: f64,
    /// Human-readable horizon bucket, e.g. "10-15 min".
    pub time_horizon: String,
    pub reasoning: String,
    pub evidence_ids: Vec<String>,
    pub timestamp: DateTime<Utc>,
}

// ============================================================================
// Facts, Hypotheses, Causal Links
// ============================================================================

/// A derived fact from observation (any agent).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Fact {
    pub fact_id: String,
    pub source: String,
    pub claim: String,
    pub evidence_ids: Vec<String>,
    pub timestamp: DateTime<Utc>,
}

/// A low-commitment claim awaiting corroboration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Hypothesis {
    pub hypothesis_id: String,
    pub agent: String,
    pub claim: String,
    pub evidence_ids: Vec<String>,
    pub confidence: f64,
    pub timestamp: DateTime<Utc>,
}

/// A causal link between two findings. `cause`/`effect` draw from the union
/// alphabet of anomaly kinds, policy violation types, and risk states.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CausalLink {
    pub link_id: String,
    pub cause: String,
    pub effect: String,
    pub cause_entity: String,
    pub effect_entity: String,
    pub confidence: f64,
    pub reasoning: String,
    pub evidence_ids: Vec<String>,
    pub timestamp: DateTime<Utc>,
}

// ============================================================================
// Severity Scores
// ============================================================================

/// Which finding lane a severity score was computed for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SeveritySource {
    Anomaly,
    PolicyHit,
}

/// Severity band labels on the 0-10 scale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SeverityLabel {
    None,
    Low,
    Medium,
    High,
    Critical,
}

impl std::fmt::Display for SeverityLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SeverityLabel::None => "None",
            SeverityLabel::Low => "Low",
            SeverityLabel::Medium => "Medium",
            SeverityLabel::High => "High",
            SeverityLabel::Critical => "Critical",
        };
        write!(f, "{s}")
    }
}

/// Escalation state attached to a severity score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EscalationState {
    Info,
    Normal,
    Degraded,
    AtRisk,
    Violation,
    Incident,
}

/// Named multiplicative context factors behind a severity score. Preserved
/// per score so the audit vector can be reconstructed.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ContextFactors {
    pub asset: f64,
    pub data: f64,
    pub time: f64,
    pub role: f64,
    pub repetition: f64,
    pub blast: f64,
    pub module: f64,
    /// Weighted delta over all factors, clamped to [-0.4, 0.6].
    pub weighted_delta: f64,
}

/// A context-weighted severity score on the 0-10 scale.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeverityScore {
    pub score_id: String,
    pub source_type: SeveritySource,
    pub source_id: String,
    pub issue_type: String,
    pub base_score: f64,
    pub final_score: f64,
    pub label: SeverityLabel,
    /// Compact audit encoding of the contributing factors.
    pub vector: String,
    pub escalation_state: EscalationState,
    pub context_factors: ContextFactors,
    pub evidence_ids: Vec<String>,
    pub timestamp: DateTime<Utc>,
}

// ============================================================================
// Recommendations
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Urgency {
    Low,
    Medium,
    High,
    Critical,
}

impl std::fmt::Display for Urgency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Urgency::Low => "LOW",
            Urgency::Medium => "MEDIUM",
            Urgency::High => "HIGH",
            Urgency::Critical => "CRITICAL",
        };
        write!(f, "{s}")
    }
}

/// Legacy cause→action recommendation (solution-map projection). The richer
/// [`RecommendationV2`] set is canonical; this list feeds insight text and
/// alert fingerprints. Evidence ids point at the triggering findings and are
/// never empty.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Recommendation {
    pub rec_id: String,
    pub cause: String,
    pub action: String,
    pub urgency: Urgency,
    pub rationale: String,
    pub evidence_ids: Vec<String>,
    pub timestamp: DateTime<Utc>,
}

/// Rule-traceable, stepwise recommendation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecommendationV2 {
    pub rec_id: String,
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
    /// Static rule that produced this item (audit trail).
    pub rule_id: String,
    pub urgency: Urgency,
    pub timestamp: DateTime<Utc>,
}

// ============================================================================
// Scenario Runs
// ============================================================================

/// The three roll-up metrics a counterfactual perturbs.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SimMetrics {
    pub sla_violations: f64,
    pub compliance_violations: f64,
    pub risk_index: f64,
}

/// A persisted what-if simulation result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioRun {
    pub run_id: String,
    pub scenario_type: String,
    pub parameters: Map<String, Value>,
    pub baseline: SimMetrics,
    pub simulated: SimMetrics,
    pub impact_score: f64,
    pub assumptions: Vec<String>,
    pub confidence: f64,
    pub confidence_reason: String,
    pub related_cycle_id: Option<String>,
    pub timestamp: DateTime<Utc>,
}

// ============================================================================
// Reasoning Cycle
// ============================================================================

/// A complete reasoning cycle. Immutable once `completed_at` is set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReasoningCycle {
    pub cycle_id: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub facts: Vec<Fact>,
    pub anomalies: Vec<Anomaly>,
    pub policy_hits: Vec<PolicyHit>,
    pub risk_signals: Vec<RiskSignal>,
    pub hypotheses: Vec<Hypothesis>,
    pub causal_links: Vec<CausalLink>,
    pub recommendations: Vec<Recommendation>,
    #[serde(default)]
    pub severity_scores: Vec<SeverityScore>,
    #[serde(default)]
    pub recommendations_v2: Vec<RecommendationV2>,
    #[serde(default)]
    pub scenario_runs: Vec<ScenarioRun>,
}

impl ReasoningCycle {
    pub(crate) fn new(cycle_id: String, started_at: DateTime<Utc>) -> Self {
        Self {
            cycle_id,
            started_at,
            completed_at: None,
            facts: Vec::new(),
            anomalies: Vec::new(),
            policy_hits: Vec::new(),
            risk_signals: Vec::new(),
            hypotheses: Vec::new(),
            causal_links: Vec::new(),
            recommendations: Vec::new(),
            severity_scores: Vec::new(),
            recommendations_v2: Vec::new(),
            scenario_runs: Vec::new(),
        }
    }

    /// Total finding count across the detection and forecast lanes.
    pub fn finding_count(&self) -> usize {
        self.anomalies.len() + self.policy_hits.len() + self.risk_signals.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn risk_state_ladder_is_totally_ordered() {
        assert!(RiskState::Normal < RiskState::Degraded);
        assert!(RiskState::Degraded < RiskState::AtRisk);
        assert!(RiskState::AtRisk < RiskState::Violation);
        assert!(RiskState::Violation < RiskState::Incident);
        assert_eq!(RiskState::Incident.rank(), 4);
    }

    #[test]
    fn anomaly_kind_serializes_screaming_snake() {
        let json = serde_json::to_string(&AnomalyKind::SustainedResourceCritical).unwrap();
        assert_eq!(json, "\"SUSTAINED_RESOURCE_CRITICAL\"");
        let back: AnomalyKind = serde_json::from_str("\"MISSING_STEP\"").unwrap();
        assert_eq!(back, AnomalyKind::MissingStep);
    }

    #[test]
    fn cycle_serializes_with_optional_lists() {
        let cycle = ReasoningCycle::new("cycle_00000001".to_string(), Utc::now());
        let json = serde_json::to_string(&cycle).unwrap();
        let back: ReasoningCycle = serde_json::from_str(&json).unwrap();
        assert_eq!(back.cycle_id, "cycle_00000001");
        assert!(back.completed_at.is_none());
        assert_eq!(back.finding_count(), 0);
    }
}

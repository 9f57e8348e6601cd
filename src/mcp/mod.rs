//! Master Control Program — the adaptive reasoning scheduler
//!
//! The MCP is not a plain "run agents in order" orchestrator. Per cycle it:
//!
//! 1. **Perceives** the system pulse from its own cycle-over-cycle memory
//! 2. **Decides** observation window and worker pool size from the pulse
//! 3. **Orchestrates**: opens a cycle, snapshots observations, fans out the
//!    detection agents in parallel, then runs forecast, causal, severity and
//!    recommendation stages sequentially
//! 4. **Synthesizes** a composite severity, dominant agent, escalation flag
//! 5. **Recommends** via the legacy solution map (actions are mapped, never
//!    invented) on top of the rule engine's stepwise output
//! 6. **Learns**: appends diagnostics, tracks critical/calm streaks, and
//!    remembers root causes
//!
//! Forbidden here: domain reasoning (delegated to agents), generative
//! components, auto-remediation.
//!
//! An agent failure is caught, logged with agent name and cycle id, and
//! never aborts the cycle. External mirroring (graph sink, alert gate) runs
//! on detached best-effort tasks and never blocks cycle completion.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::agents::{
    AdaptiveBaselineAgent, AgentError, CausalAgent, CodeRiskAgent, ComplianceAgent,
    DetectionAgent, ObservationSnapshot, RecommendationEngine, ResourceAgent, RiskForecastAgent,
    SeverityEngine, WorkflowAgent,
};
use crate::blackboard::{
    Anomaly, AnomalyKind, Blackboard, BlackboardError, CausalLink, PolicyHit, Recommendation,
    RiskSignal, RiskState, Urgency,
};
use crate::insight::{Insight, InsightMaterializer};
use crate::observation::ObservationLayer;
use crate::sinks::{AlertGate, GraphSink, NoopGraphSink};

/// Cycle diagnostics retained in MCP memory.
const BRAIN_HISTORY: usize = 100;

/// Diagnostics consulted when perceiving the pulse.
const PERCEPTION_WINDOW: usize = 5;

/// Composite severity at or above this counts toward the critical streak.
const STREAK_CRITICAL_SEVERITY: f64 = 70.0;

/// Composite severity at or below this counts toward the calm streak.
const STREAK_CALM_SEVERITY: f64 = 20.0;

/// Composite severity that triggers the emergency recommendation.
const EMERGENCY_SEVERITY: f64 = 85.0;

/// Anomalies mirrored to the graph sink per cycle.
const MIRROR_ANOMALIES: usize = 10;

/// Recommendations mirrored to the graph sink per cycle.
const MIRROR_RECOMMENDATIONS: usize = 5;

// ============================================================================
// System Pulse
// ============================================================================

/// System-wide operational state as perceived by the MCP.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SystemPulse {
    /// No significant issues — standard scan.
    Calm,
    /// Minor anomalies — increased vigilance.
    Elevated,
    /// Multiple issues — full agent deployment.
    Stressed,
    /// Cascading failures — emergency mode.
    Critical,
}

impl SystemPulse {
    /// Observation window sizes `(events, metrics)` for this pulse.
    pub fn observation_window(self) -> (usize, usize) {
        match self {
            SystemPulse::Calm => (50, 50),
            SystemPulse::Elevated => (100, 100),
            SystemPulse::Stressed => (200, 200),
            SystemPulse::Critical => (500, 500),
        }
    }

    /// Parallel worker count for the detection fan-out.
    pub fn worker_pool(self) -> usize {
        match self {
            SystemPulse::Calm => 2,
            SystemPulse::Elevated => 4,
            SystemPulse::Stressed => 6,
            SystemPulse::Critical => 8,
        }
    }
}

impl std::fmt::Display for SystemPulse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SystemPulse::Calm => "calm",
            SystemPulse::Elevated => "elevated",
            SystemPulse::Stressed => "stressed",
            SystemPulse::Critical => "critical",
        };
        write!(f, "{s}")
    }
}

// ============================================================================
// Diagnostics & Results
// ============================================================================

/// Diagnostics from one completed cycle — the MCP's memory unit.
#[derive(Debug, Clone, Serialize)]
pub struct CycleDiagnostics {
    pub cycle_id: String,
    pub timestamp: DateTime<Utc>,
    pub pulse: SystemPulse,
    pub anomaly_count: usize,
    pub policy_hit_count: usize,
    pub risk_signal_count: usize,
    pub causal_link_count: usize,
    pub recommendation_count: usize,
    pub duration_ms: f64,
    /// 0-100 composite severity.
    pub severity_score: f64,
    /// Agent with the most findings this cycle.
    pub dominant_agent: Option<String>,
    pub escalation_detected: bool,
    /// Causal links whose root cause was not seen in prior cycles.
    pub new_root_causes: usize,
}

/// Result of one reasoning cycle, returned to the caller.
#[derive(Debug, Clone)]
pub struct CycleResult {
    pub cycle_id: String,
    pub pulse: SystemPulse,
    pub anomaly_count: usize,
    pub policy_hit_count: usize,
    pub risk_signal_count: usize,
    pub causal_link_count: usize,
    pub recommendation_count: usize,
    pub severity_score: f64,
    pub duration_ms: f64,
    pub deadline_hit: bool,
    pub insight: Option<Insight>,
}

/// Operator-facing snapshot of the MCP's situational awareness.
#[derive(Debug, Clone, Serialize)]
pub struct BrainState {
    pub system_pulse: SystemPulse,
    pub total_cycles_completed: u64,
    pub severity_trend: String,
    pub consecutive_critical_cycles: u32,
    pub consecutive_calm_cycles: u32,
    pub known_root_causes: usize,
    pub last_cycle_time: Option<DateTime<Utc>>,
    pub observation_window: (usize, usize),
    pub worker_pool_size: usize,
    pub recent_diagnostics: Vec<CycleDiagnostics>,
}

// ============================================================================
// Solution Map — actions are mapped, never invented
// ============================================================================

struct Solution {
    action: &'static str,
    urgency: Urgency,
    rationale: &'static str,
}

fn solution_for(cause: &str) -> Option<Solution> {
    let s = |action, urgency, rationale| Some(Solution { action, urgency, rationale });
    match cause {
        "SUSTAINED_RESOURCE_CRITICAL" => s(
            "Throttle jobs or scale resources immediately",
            Urgency::Critical,
            "Resource saturation causes cascading failures across dependent workflows",
        ),
        "SUSTAINED_RESOURCE_WARNING" => s(
            "Monitor closely, prepare scaling plan",
            Urgency::Medium,
            "Early intervention prevents escalation to critical",
        ),
        "RESOURCE_DRIFT" => s(
            "Investigate root cause of resource growth",
            Urgency::Medium,
            "Drift indicates potential memory leak or capacity shortfall",
        ),
        "BASELINE_DEVIATION" => s(
            "Investigate abnormal behavior pattern",
            Urgency::Medium,
            "Deviation from learned baseline signals unexpected system change",
        ),
        "WORKFLOW_DELAY" => s(
            "Pre-notify stakeholders of SLA pressure",
            Urgency::High,
            "Delays compound across dependent steps and affect SLA commitments",
        ),
        "MISSING_STEP" => s(
            "Apply temporary access guard and trigger audit",
            Urgency::Critical,
            "Skipped steps bypass critical controls and create governance risk",
        ),
        "SEQUENCE_VIOLATION" => s(
            "Review workflow execution and enforce step ordering",
            Urgency::High,
            "Out-of-order execution indicates process breakdown",
        ),
        "SILENT" => s(
            "Flag for compliance review and escalate to governance",
            Urgency::Critical,
            "Silent violations accumulate undetected audit risk",
        ),
        _ => None,
    }
}

/// Cause/effect pairs whose chaining escalates urgency.
fn escalated_urgency(cause: &str, effect: &str) -> Option<Urgency> {
    match (cause, effect) {
        ("SUSTAINED_RESOURCE_CRITICAL", "WORKFLOW_DELAY") => Some(Urgency::Critical),
        ("MISSING_STEP", "SILENT") => Some(Urgency::Critical),
        ("RESOURCE_DRIFT", "WORKFLOW_DELAY") => Some(Urgency::High),
        ("SEQUENCE_VIOLATION", "SILENT") => Some(Urgency::Critical),
        _ => None,
    }
}

// ============================================================================
// Master Control
// ============================================================================

/// MCP runtime knobs.
#[derive(Debug, Clone)]
pub struct McpConfig {
    /// Optional hard deadline for one cycle's detection phase.
    pub cycle_deadline: Option<Duration>,
    /// Timeout for each external mirror task.
    pub mirror_timeout: Duration,
}

impl Default for McpConfig {
    fn default() -> Self {
        Self {
            cycle_deadline: None,
            mirror_timeout: Duration::from_secs(5),
        }
    }
}

struct BrainMemory {
    history: Vec<CycleDiagnostics>,
    current_pulse: SystemPulse,
    consecutive_critical: u32,
    consecutive_calm: u32,
    known_root_causes: HashSet<String>,
    total_cycles: u64,
    last_cycle_time: Option<DateTime<Utc>>,
}

pub struct MasterControl {
    observation: Arc<ObservationLayer>,
    board: Arc<Blackboard>,
    detection_agents: Vec<Arc<dyn DetectionAgent>>,
    baseline_agent: Arc<AdaptiveBaselineAgent>,
    risk_forecast: RiskForecastAgent,
    causal: CausalAgent,
    severity: SeverityEngine,
    recommender: RecommendationEngine,
    materializer: InsightMaterializer,
    graph_sink: Arc<dyn GraphSink>,
    alert_gate: Arc<AlertGate>,
    config: McpConfig,
    brain: Mutex<BrainMemory>,
}

impl MasterControl {
    pub fn new(observation: Arc<ObservationLayer>, board: Arc<Blackboard>) -> Self {
        let baseline_agent = Arc::new(AdaptiveBaselineAgent::new());
        let detection_agents: Vec<Arc<dyn DetectionAgent>> = vec![
            Arc::new(WorkflowAgent::new()),
            Arc::new(ResourceAgent::new()),
            Arc::new(ComplianceAgent::new()),
            baseline_agent.clone(),
            Arc::new(CodeRiskAgent::new()),
        ];

        Self {
            observation,
            board,
            detection_agents,
            baseline_agent,
            risk_forecast: RiskForecastAgent::new(),
            causal: CausalAgent::new(),
            severity: SeverityEngine::new(),
            recommender: RecommendationEngine::new(),
            materializer: InsightMaterializer::new(),
            graph_sink: Arc::new(NoopGraphSink),
            alert_gate: Arc::new(AlertGate::disabled()),
            config: McpConfig::default(),
            brain: Mutex::new(BrainMemory {
                history: Vec::new(),
                current_pulse: SystemPulse::Calm,
                consecutive_critical: 0,
                consecutive_calm: 0,
                known_root_causes: HashSet::new(),
                total_cycles: 0,
                last_cycle_time: None,
            }),
        }
    }

    pub fn with_graph_sink(mut self, sink: Arc<dyn GraphSink>) -> Self {
        self.graph_sink = sink;
        self
    }

    pub fn with_alert_gate(mut self, gate: Arc<AlertGate>) -> Self {
        self.alert_gate = gate;
        self
    }

    pub fn with_materializer(mut self, materializer: InsightMaterializer) -> Self {
        self.materializer = materializer;
        self
    }

    pub fn with_config(mut self, config: McpConfig) -> Self {
        self.config = config;
        self
    }

    /// The adaptive-baseline agent, exposed for operator queries.
    pub fn baseline_agent(&self) -> &AdaptiveBaselineAgent {
        &self.baseline_agent
    }

    /// Current pulse without running a cycle.
    pub fn current_pulse(&self) -> SystemPulse {
        self.lock_brain().current_pulse
    }

    // ────────────────────────────────────────────────────────────────────
    // The cycle
    // ────────────────────────────────────────────────────────────────────

    /// Execute one complete reasoning cycle.
    pub async fn run_cycle(&self) -> Result<CycleResult, BlackboardError> {
        let cycle_start = Instant::now();
        let now = Utc::now();

        // ── PERCEIVE + DECIDE ──
        let pulse = self.perceive_pulse();
        {
            let mut brain = self.lock_brain();
            brain.current_pulse = pulse;
        }
        let (event_window, metric_window) = pulse.observation_window();
        let workers = pulse.worker_pool();

        // ── OPEN CYCLE ──
        let cycle_id = self.board.start_cycle()?;
        debug!(cycle_id = %cycle_id, pulse = %pulse, event_window, workers, "cycle opened");

        // ── SNAPSHOT ──
        let snapshot = Arc::new(ObservationSnapshot {
            events: self.observation.get_recent_events(event_window),
            metrics: self.observation.get_recent_metrics(metric_window),
        });

        // ── DETECT (parallel fan-out) ──
        let deadline_hit = self.run_detection(&cycle_id, snapshot, workers).await;

        // The board is authoritative for what detection committed, whether
        // or not every agent finished.
        let anomalies = self.board.get_current_anomalies();
        let policy_hits = self.board.get_current_policy_hits();

        // ── FORECAST ──
        let risk_signals = self
            .recover(
                "RiskForecastAgent",
                &cycle_id,
                self.risk_forecast
                    .analyze(&anomalies, &policy_hits, &cycle_id, &self.board),
            )?
            .unwrap_or_default();

        // ── REASON ──
        let causal_links = self
            .recover(
                "CausalAgent",
                &cycle_id,
                self.causal.analyze(
                    &anomalies,
                    &policy_hits,
                    &risk_signals,
                    &cycle_id,
                    &self.board,
                ),
            )?
            .unwrap_or_default();

        // ── SCORE ──
        let severity_scores = self
            .recover(
                "SeverityEngineAgent",
                &cycle_id,
                self.severity
                    .analyze(&anomalies, &policy_hits, &cycle_id, &self.board),
            )?
            .unwrap_or_default();

        // ── RECOMMEND ──
        let recommendations_v2 = self
            .recover(
                "RecommendationEngineAgent",
                &cycle_id,
                self.recommender.generate(
                    &anomalies,
                    &policy_hits,
                    &causal_links,
                    &severity_scores,
                    &cycle_id,
                    &self.board,
                ),
            )?
            .unwrap_or_default();

        // ── SYNTHESIZE ──
        let severity_score =
            compute_severity_score(&anomalies, &policy_hits, &risk_signals, &causal_links);
        let dominant_agent = find_dominant_agent(&anomalies, &policy_hits);
        let escalation_detected = self.detect_escalation(&risk_signals);
        let new_root_causes = self.count_new_root_causes(&causal_links);

        let legacy_recommendations = self.generate_legacy_recommendations(
            &cycle_id,
            &anomalies,
            &policy_hits,
            &causal_links,
            severity_score,
            pulse,
        )?;

        // ── CLOSE ──
        let cycle = self.board.complete_cycle()?;
        let insight = self.materializer.materialize(&cycle);

        // ── MIRROR (best-effort, detached) ──
        self.mirror_to_graph(&cycle.anomalies, &cycle.causal_links, &legacy_recommendations);
        self.feed_alert_gate(&cycle, insight.clone());

        // ── LEARN ──
        let duration_ms = cycle_start.elapsed().as_secs_f64() * 1000.0;
        let diagnostics = CycleDiagnostics {
            cycle_id: cycle_id.clone(),
            timestamp: now,
            pulse,
            anomaly_count: anomalies.len(),
            policy_hit_count: policy_hits.len(),
            risk_signal_count: risk_signals.len(),
            causal_link_count: causal_links.len(),
            recommendation_count: recommendations_v2.len() + legacy_recommendations.len(),
            duration_ms,
            severity_score,
            dominant_agent,
            escalation_detected,
            new_root_causes,
        };
        self.update_brain(diagnostics, &causal_links);

        info!(
            cycle_id = %cycle_id,
            pulse = %pulse,
            severity = severity_score,
            anomalies = anomalies.len(),
            policy_hits = policy_hits.len(),
            risk_signals = risk_signals.len(),
            causal_links = causal_links.len(),
            duration_ms = format!("{duration_ms:.1}"),
            deadline_hit,
            "cycle complete"
        );

        Ok(CycleResult {
            cycle_id,
            pulse,
            anomaly_count: anomalies.len(),
            policy_hit_count: policy_hits.len(),
            risk_signal_count: risk_signals.len(),
            causal_link_count: causal_links.len(),
            recommendation_count: recommendations_v2.len() + legacy_recommendations.len(),
            severity_score,
            duration_ms,
            deadline_hit,
            insight,
        })
    }

    /// Fan out the detection agents, bounded by the worker pool, optionally
    /// under a deadline. Returns whether the deadline fired.
    async fn run_detection(
        &self,
        cycle_id: &str,
        snapshot: Arc<ObservationSnapshot>,
        workers: usize,
    ) -> bool {
        let semaphore = Arc::new(Semaphore::new(workers.max(1)));
        let mut join_set: JoinSet<(String, Result<usize, AgentError>)> = JoinSet::new();

        for agent in &self.detection_agents {
            let agent = agent.clone();
            let snapshot = snapshot.clone();
            let board = self.board.clone();
            let cycle_id = cycle_id.to_string();
            let semaphore = semaphore.clone();
            join_set.spawn(async move {
                let _permit = semaphore.acquire_owned().await;
                let name = agent.name().to_string();
                let outcome = agent
                    .analyze(&snapshot, &cycle_id, &board)
                    .map(|report| report.finding_count());
                (name, outcome)
            });
        }

        let drain = async {
            while let Some(joined) = join_set.join_next().await {
                match joined {
                    Ok((agent, Ok(count))) => {
                        if count > 0 {
                            debug!(agent = %agent, findings = count, "detection agent done");
                        }
                    }
                    Ok((agent, Err(err))) => {
                        warn!(agent = %agent, cycle_id, error = %err,
                            "detection agent failed (cycle continues)");
                    }
                    Err(join_err) => {
                        warn!(cycle_id, error = %join_err,
                            "detection task aborted (cycle continues)");
                    }
                }
            }
        };

        match self.config.cycle_deadline {
            Some(deadline) => {
                if tokio::time::timeout(deadline, drain).await.is_err() {
                    join_set.abort_all();
                    warn!(cycle_id, "cycle deadline hit; closing with committed findings");
                    true
                } else {
                    false
                }
            }
            None => {
                drain.await;
                false
            }
        }
    }

    /// Swallow agent transients (logged), surface blackboard invariants.
    fn recover<T>(
        &self,
        agent: &str,
        cycle_id: &str,
        result: Result<T, AgentError>,
    ) -> Result<Option<T>, BlackboardError> {
        match result {
            Ok(value) => Ok(Some(value)),
            Err(AgentError::Transient(message)) => {
                warn!(agent, cycle_id, error = %message, "agent failed (cycle continues)");
                Ok(None)
            }
            Err(AgentError::Blackboard(err)) => Err(err),
        }
    }

    // ────────────────────────────────────────────────────────────────────
    // Perception & synthesis
    // ────────────────────────────────────────────────────────────────────

    fn perceive_pulse(&self) -> SystemPulse {
        let brain = self.lock_brain();
        if brain.history.is_empty() {
            return SystemPulse::Calm;
        }

        let recent: &[CycleDiagnostics] = {
            let skip = brain.history.len().saturating_sub(PERCEPTION_WINDOW);
            &brain.history[skip..]
        };
        let avg_severity =
            recent.iter().map(|d| d.severity_score).sum::<f64>() / recent.len() as f64;
        let max_severity = recent
            .iter()
            .map(|d| d.severity_score)
            .fold(f64::NEG_INFINITY, f64::max);
        let escalations = recent.iter().filter(|d| d.escalation_detected).count();

        if brain.consecutive_critical >= 3 {
            return SystemPulse::Critical;
        }
        if max_severity >= 80.0 || escalations >= 3 {
            SystemPulse::Critical
        } else if avg_severity >= 50.0 || max_severity >= 60.0 {
            SystemPulse::Stressed
        } else if avg_severity >= 25.0 || escalations >= 1 {
            SystemPulse::Elevated
        } else {
            SystemPulse::Calm
        }
    }

    fn detect_escalation(&self, risk_signals: &[RiskSignal]) -> bool {
        if risk_signals
            .iter()
            .any(|s| s.projected_state.rank() > s.current_state.rank())
        {
            return true;
        }
        // Signal volume trending upward vs the previous cycle also counts.
        let brain = self.lock_brain();
        if let Some(previous) = brain.history.last() {
            if !risk_signals.is_empty() && risk_signals.len() > previous.risk_signal_count {
                return true;
            }
        }
        false
    }

    fn count_new_root_causes(&self, causal_links: &[CausalLink]) -> usize {
        let brain = self.lock_brain();
        causal_links
            .iter()
            .filter(|link| {
                !brain
                    .known_root_causes
                    .contains(&format!("{}:{}", link.cause, link.cause_entity))
            })
            .count()
    }

    /// Legacy solution-map recommendations: root-cause-first with escalation
    /// pairs, then anomaly-based, then policy-based, plus an emergency item
    /// when the composite is extreme.
    fn generate_legacy_recommendations(
        &self,
        cycle_id: &str,
        anomalies: &[Anomaly],
        policy_hits: &[PolicyHit],
        causal_links: &[CausalLink],
        severity_score: f64,
        pulse: SystemPulse,
    ) -> Result<Vec<Recommendation>, BlackboardError> {
        let mut recommendations = Vec::new();
        let mut seen_causes: HashSet<String> = HashSet::new();

        let boost = |urgency: Urgency| {
            if pulse == SystemPulse::Critical && urgency == Urgency::Medium {
                Urgency::High
            } else {
                urgency
            }
        };

        // Root-cause-first: causal chain origins get priority.
        for link in causal_links {
            let Some(solution) = solution_for(&link.cause) else {
                continue;
            };
            if !seen_causes.insert(link.cause.clone()) {
                continue;
            }
            let urgency =
                escalated_urgency(&link.cause, &link.effect).unwrap_or(solution.urgency);
            recommendations.push(self.board.add_recommendation(
                cycle_id,
                format!("RootCause:{} -> {}", link.cause, link.effect),
                solution.action,
                boost(urgency),
                format!(
                    "Causal chain: {} -> {}. {}",
                    link.cause, link.effect, solution.rationale
                ),
                vec![link.link_id.clone()],
            )?);
        }

        for anomaly in anomalies {
            let kind = anomaly.kind.to_string();
            let Some(solution) = solution_for(&kind) else {
                continue;
            };
            if !seen_causes.insert(kind.clone()) {
                continue;
            }
            let mut urgency = solution.urgency;
            if anomaly.confidence >= 0.9 && urgency == Urgency::Medium {
                urgency = Urgency::High;
            }
            recommendations.push(self.board.add_recommendation(
                cycle_id,
                kind,
                solution.action,
                boost(urgency),
                solution.rationale,
                vec![anomaly.anomaly_id.clone()],
            )?);
        }

        for hit in policy_hits {
            let violation = hit.violation_type.to_string();
            let Some(solution) = solution_for(&violation) else {
                continue;
            };
            if !seen_causes.insert(violation) {
                continue;
            }
            recommendations.push(self.board.add_recommendation(
                cycle_id,
                format!("Policy:{}", hit.policy_id),
                solution.action,
                solution.urgency,
                solution.rationale,
                vec![hit.hit_id.clone()],
            )?);
        }

        if severity_score >= EMERGENCY_SEVERITY && seen_causes.insert("EMERGENCY".to_string()) {
            // A composite this high only arises from committed findings, so
            // the sampled evidence set is never empty.
            let evidence: Vec<String> = anomalies
                .iter()
                .map(|a| a.anomaly_id.clone())
                .take(3)
                .chain(policy_hits.iter().map(|h| h.hit_id.clone()).take(3))
                .collect();
            recommendations.push(self.board.add_recommendation(
                cycle_id,
                "EMERGENCY_SEVERITY",
                "Initiate incident response: multiple cascading failures detected",
                Urgency::Critical,
                format!(
                    "System severity score {severity_score:.0}/100 exceeds the emergency \
                     threshold with multiple agents reporting concurrent issues"
                ),
                evidence,
            )?);
        }

        Ok(recommendations)
    }

    // ────────────────────────────────────────────────────────────────────
    // Mirroring (detached, best-effort)
    // ────────────────────────────────────────────────────────────────────

    fn mirror_to_graph(
        &self,
        anomalies: &[Anomaly],
        causal_links: &[CausalLink],
        recommendations: &[Recommendation],
    ) {
        let sink = self.graph_sink.clone();
        let timeout = self.config.mirror_timeout;
        let anomalies: Vec<Anomaly> = anomalies.iter().take(MIRROR_ANOMALIES).cloned().collect();
        let links: Vec<CausalLink> = causal_links.to_vec();
        let recommendations: Vec<Recommendation> = recommendations
            .iter()
            .take(MIRROR_RECOMMENDATIONS)
            .cloned()
            .collect();

        tokio::spawn(async move {
            let work = async {
                for anomaly in &anomalies {
                    if let Err(err) = sink.write_anomaly(anomaly).await {
                        debug!(error = %err, "graph sink anomaly write failed (ignored)");
                    }
                }
                for link in &links {
                    if let Err(err) = sink.write_causal_link(link).await {
                        debug!(error = %err, "graph sink causal write failed (ignored)");
                    }
                }
                for rec in &recommendations {
                    if let Err(err) = sink.write_recommendation(rec).await {
                        debug!(error = %err, "graph sink recommendation write failed (ignored)");
                    }
                }
            };
            if tokio::time::timeout(timeout, work).await.is_err() {
                debug!("graph mirror timed out (ignored)");
            }
        });
    }

    fn feed_alert_gate(&self, cycle: &crate::blackboard::ReasoningCycle, insight: Option<Insight>) {
        let gate = self.alert_gate.clone();
        let cycle = cycle.clone();
        let timeout = self.config.mirror_timeout;
        let max_risk = cycle
            .risk_signals
            .iter()
            .map(|s| s.projected_state)
            .max()
            .unwrap_or(RiskState::Normal);

        tokio::spawn(async move {
            let work = gate.offer(&cycle, insight.as_ref(), max_risk);
            if tokio::time::timeout(timeout, work).await.is_err() {
                debug!("alert gate timed out (ignored)");
            }
        });
    }

    // ────────────────────────────────────────────────────────────────────
    // Learning
    // ────────────────────────────────────────────────────────────────────

    fn update_brain(&self, diagnostics: CycleDiagnostics, causal_links: &[CausalLink]) {
        let mut brain = self.lock_brain();

        if diagnostics.severity_score >= STREAK_CRITICAL_SEVERITY {
            brain.consecutive_critical += 1;
            brain.consecutive_calm = 0;
        } else if diagnostics.severity_score <= STREAK_CALM_SEVERITY {
            brain.consecutive_calm += 1;
            brain.consecutive_critical = 0;
        } else {
            brain.consecutive_critical = 0;
            brain.consecutive_calm = 0;
        }

        for link in causal_links {
            brain
                .known_root_causes
                .insert(format!("{}:{}", link.cause, link.cause_entity));
        }

        brain.last_cycle_time = Some(diagnostics.timestamp);
        brain.total_cycles += 1;
        brain.history.push(diagnostics);
        let excess = brain.history.len().saturating_sub(BRAIN_HISTORY);
        if excess > 0 {
            brain.history.drain(..excess);
        }
    }

    /// The MCP's situational awareness, for operators and dashboards.
    pub fn brain_state(&self) -> BrainState {
        let brain = self.lock_brain();
        let recent: Vec<CycleDiagnostics> = {
            let skip = brain.history.len().saturating_sub(10);
            brain.history[skip..].to_vec()
        };

        let severity_trend = if recent.len() >= 3 {
            let half = recent.len() / 2;
            let first = recent[..half].iter().map(|d| d.severity_score).sum::<f64>()
                / half.max(1) as f64;
            let second = recent[half..].iter().map(|d| d.severity_score).sum::<f64>()
                / (recent.len() - half).max(1) as f64;
            if second > first + 5.0 {
                "escalating"
            } else if second < first - 5.0 {
                "recovering"
            } else {
                "stable"
            }
        } else {
            "insufficient_data"
        }
        .to_string();

        let pulse = brain.current_pulse;
        BrainState {
            system_pulse: pulse,
            total_cycles_completed: brain.total_cycles,
            severity_trend,
            consecutive_critical_cycles: brain.consecutive_critical,
            consecutive_calm_cycles: brain.consecutive_calm,
            known_root_causes: brain.known_root_causes.len(),
            last_cycle_time: brain.last_cycle_time,
            observation_window: pulse.observation_window(),
            worker_pool_size: pulse.worker_pool(),
            recent_diagnostics: recent.into_iter().rev().take(5).rev().collect(),
        }
    }

    fn lock_brain(&self) -> std::sync::MutexGuard<'_, BrainMemory> {
        match self.brain.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

// ============================================================================
// Composite severity — weighted, capped contributions
// ============================================================================

fn anomaly_weight(kind: AnomalyKind) -> f64 {
    match kind {
        AnomalyKind::MissingStep => 8.0,
        AnomalyKind::SustainedResourceCritical => 7.0,
        AnomalyKind::SequenceViolation => 5.0,
        AnomalyKind::WorkflowDelay => 4.0,
        AnomalyKind::SustainedResourceWarning => 3.0,
        AnomalyKind::ResourceDrift | AnomalyKind::BaselineDeviation => 2.0,
        _ => 1.0,
    }
}

/// Composite cycle severity on 0-100: four capped contributions summed and
/// clamped. Not a count — confidence and type both weigh in.
pub fn compute_severity_score(
    anomalies: &[Anomaly],
    policy_hits: &[PolicyHit],
    risk_signals: &[RiskSignal],
    causal_links: &[CausalLink],
) -> f64 {
    let anomaly_score: f64 = anomalies
        .iter()
        .map(|a| anomaly_weight(a.kind) * a.confidence)
        .sum();
    let mut score = anomaly_score.min(40.0);

    score += (policy_hits.len() as f64 * 6.0).min(30.0);

    let risk_score: f64 = risk_signals
        .iter()
        .map(|s| match s.projected_state {
            RiskState::Violation | RiskState::Incident => 10.0,
            RiskState::AtRisk => 5.0,
            RiskState::Degraded => 2.0,
            RiskState::Normal => 0.0,
        })
        .sum();
    score += risk_score.min(20.0);

    score += (causal_links.len() as f64 * 2.5).min(10.0);

    (score.min(100.0) * 100.0).round() / 100.0
}

/// Agent with the most findings; ties break deterministically by name.
fn find_dominant_agent(anomalies: &[Anomaly], policy_hits: &[PolicyHit]) -> Option<String> {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for anomaly in anomalies {
        *counts.entry(anomaly.agent.as_str()).or_insert(0) += 1;
    }
    for hit in policy_hits {
        *counts.entry(hit.agent.as_str()).or_insert(0) += 1;
    }
    counts
        .into_iter()
        .max_by(|a, b| a.1.cmp(&b.1).then(b.0.cmp(a.0)))
        .map(|(agent, _)| agent.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blackboard::{AnomalyDraft, EntityType, PolicyHitDraft, ViolationType};

    fn sample_anomaly(kind: AnomalyKind, agent: &str, confidence: f64) -> Anomaly {
        Anomaly {
            anomaly_id: "anom_x".to_string(),
            kind,
            agent: agent.to_string(),
            evidence: vec!["evt_1".to_string()],
            description: "test".to_string(),
            confidence,
            timestamp: Utc::now(),
        }
    }

    fn sample_hit() -> PolicyHit {
        PolicyHit {
            hit_id: "hit_x".to_string(),
            policy_id: "NO_AFTER_HOURS_WRITE".to_string(),
            event_id: "evt_1".to_string(),
            violation_type: ViolationType::Silent,
            agent: "ComplianceAgent".to_string(),
            description: "test".to_string(),
            timestamp: Utc::now(),
        }
    }

    fn sample_signal(projected: RiskState) -> RiskSignal {
        RiskSignal {
            signal_id: "risk_x".to_string(),
            entity: "vm_api_01".to_string(),
            entity_type: EntityType::Resource,
            current_state: RiskState::Normal,
            projected_state: projected,
            confidence: 0.7,
            time_horizon: "10-15 min".to_string(),
            reasoning: "test".to_string(),
            evidence_ids: vec!["anom_x".to_string()],
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn severity_contributions_are_capped() {
        let anomalies: Vec<Anomaly> = (0..20)
            .map(|_| sample_anomaly(AnomalyKind::MissingStep, "WorkflowAgent", 1.0))
            .collect();
        let hits: Vec<PolicyHit> = (0..20).map(|_| sample_hit()).collect();
        let signals: Vec<RiskSignal> = (0..10).map(|_| sample_signal(RiskState::Incident)).collect();

        // 40 + 30 + 20 + 0 = 90 without causal links.
        let score = compute_severity_score(&anomalies, &hits, &signals, &[]);
        assert_eq!(score, 90.0);
    }

    #[test]
    fn severity_clamps_at_one_hundred() {
        let anomalies: Vec<Anomaly> = (0..20)
            .map(|_| sample_anomaly(AnomalyKind::MissingStep, "WorkflowAgent", 1.0))
            .collect();
        let hits: Vec<PolicyHit> = (0..20).map(|_| sample_hit()).collect();
        let signals: Vec<RiskSignal> = (0..10).map(|_| sample_signal(RiskState::Incident)).collect();
        let links: Vec<CausalLink> = (0..10)
            .map(|i| CausalLink {
                link_id: format!("cause_{i}"),
                cause: "MISSING_STEP".to_string(),
                effect: "SILENT".to_string(),
                cause_entity: "wf_x".to_string(),
                effect_entity: "unknown".to_string(),
                confidence: 0.9,
                reasoning: "test".to_string(),
                evidence_ids: vec!["anom_x".to_string()],
                timestamp: Utc::now(),
            })
            .collect();

        let score = compute_severity_score(&anomalies, &hits, &signals, &links);
        assert_eq!(score, 100.0);
    }

    #[test]
    fn empty_cycle_scores_zero() {
        assert_eq!(compute_severity_score(&[], &[], &[], &[]), 0.0);
    }

    #[test]
    fn dominant_agent_breaks_ties_by_name() {
        let anomalies = vec![
            sample_anomaly(AnomalyKind::WorkflowDelay, "WorkflowAgent", 0.8),
            sample_anomaly(AnomalyKind::ResourceDrift, "ResourceAgent", 0.8),
        ];
        // Tie between the two; deterministic pick must be stable.
        let first = find_dominant_agent(&anomalies, &[]);
        let second = find_dominant_agent(&anomalies, &[]);
        assert_eq!(first, second);
        assert!(first.is_some());
    }

    #[tokio::test]
    async fn empty_cycle_is_well_formed() {
        let observation = Arc::new(ObservationLayer::in_memory(100));
        let board = Arc::new(Blackboard::in_memory());
        let mcp = MasterControl::new(observation, board);

        let result = mcp.run_cycle().await.unwrap();
        assert_eq!(result.anomaly_count, 0);
        assert_eq!(result.policy_hit_count, 0);
        assert_eq!(result.risk_signal_count, 0);
        assert_eq!(result.severity_score, 0.0);
        assert_eq!(result.pulse, SystemPulse::Calm);
        assert!(result.insight.is_none());
        assert!(!result.deadline_hit);
    }

    #[tokio::test]
    async fn cycles_are_strictly_serialized() {
        let observation = Arc::new(ObservationLayer::in_memory(100));
        let board = Arc::new(Blackboard::in_memory());
        let mcp = MasterControl::new(observation, board.clone());

        let first = mcp.run_cycle().await.unwrap();
        let second = mcp.run_cycle().await.unwrap();
        assert_ne!(first.cycle_id, second.cycle_id);
        assert_eq!(board.get_recent_cycles(10).len(), 2);
    }

    #[tokio::test]
    async fn pulse_escalates_to_critical_under_sustained_severity() {
        let observation = Arc::new(ObservationLayer::in_memory(100));
        let board = Arc::new(Blackboard::in_memory());
        let mcp = MasterControl::new(observation, board);

        // Seed brain memory with high-severity diagnostics directly.
        for i in 0..3 {
            mcp.update_brain(
                CycleDiagnostics {
                    cycle_id: format!("cycle_{i}"),
                    timestamp: Utc::now(),
                    pulse: SystemPulse::Calm,
                    anomaly_count: 10,
                    policy_hit_count: 5,
                    risk_signal_count: 3,
                    causal_link_count: 2,
                    recommendation_count: 4,
                    duration_ms: 10.0,
                    severity_score: 88.0,
                    dominant_agent: Some("ResourceAgent".to_string()),
                    escalation_detected: true,
                    new_root_causes: 1,
                },
                &[],
            );
        }

        let pulse = mcp.perceive_pulse();
        assert_eq!(pulse, SystemPulse::Critical);
        assert_eq!(pulse.worker_pool(), 8);
        assert_eq!(pulse.observation_window(), (500, 500));
    }

    #[tokio::test]
    async fn brain_state_reports_trend() {
        let observation = Arc::new(ObservationLayer::in_memory(100));
        let board = Arc::new(Blackboard::in_memory());
        let mcp = MasterControl::new(observation, board);

        for severity in [10.0, 12.0, 40.0, 60.0] {
            mcp.update_brain(
                CycleDiagnostics {
                    cycle_id: "cycle_x".to_string(),
                    timestamp: Utc::now(),
                    pulse: SystemPulse::Calm,
                    anomaly_count: 0,
                    policy_hit_count: 0,
                    risk_signal_count: 0,
                    causal_link_count: 0,
                    recommendation_count: 0,
                    duration_ms: 5.0,
                    severity_score: severity,
                    dominant_agent: None,
                    escalation_detected: false,
                    new_root_causes: 0,
                },
                &[],
            );
        }

        let state = mcp.brain_state();
        assert_eq!(state.severity_trend, "escalating");
        assert_eq!(state.total_cycles_completed, 4);
    }

    #[tokio::test]
    async fn legacy_recommendations_follow_solution_map() {
        let observation = Arc::new(ObservationLayer::in_memory(100));
        let board = Arc::new(Blackboard::in_memory());
        let mcp = MasterControl::new(observation, board.clone());

        let cycle_id = board.start_cycle().unwrap();
        let anomaly = board
            .add_anomaly(
                &cycle_id,
                AnomalyDraft {
                    kind: AnomalyKind::MissingStep,
                    agent: "WorkflowAgent".to_string(),
                    evidence: vec!["evt_1".to_string()],
                    description: "missing approval in wf_deploy_1".to_string(),
                    confidence: 0.95,
                    timestamp: Utc::now(),
                },
            )
            .unwrap();
        let hit = board
            .add_policy_hit(
                &cycle_id,
                PolicyHitDraft {
                    policy_id: "NO_SKIP_APPROVAL".to_string(),
                    event_id: "evt_2".to_string(),
                    violation_type: ViolationType::Silent,
                    agent: "ComplianceAgent".to_string(),
                    description: "approval skipped".to_string(),
                    timestamp: Utc::now(),
                },
            )
            .unwrap();

        let recs = mcp
            .generate_legacy_recommendations(
                &cycle_id,
                &[anomaly],
                &[hit],
                &[],
                90.0,
                SystemPulse::Calm,
            )
            .unwrap();

        assert!(recs.iter().any(|r| r.cause == "MISSING_STEP"));
        assert!(recs.iter().any(|r| r.cause == "Policy:NO_SKIP_APPROVAL"));
        // Severity 90 adds the emergency item.
        assert!(recs.iter().any(|r| r.cause == "EMERGENCY_SEVERITY"));
    }
}

//! What-If Simulator — deterministic counterfactuals
//!
//! Answers "what happens if X" against the latest closed cycle: normalize
//! scenario parameters into fixed ranges, read the baseline roll-up
//! (SLA-affecting anomalies, policy hits, max projected risk rank), apply
//! per-scenario deterministic deltas and context modifiers, and score the
//! impact on 0-100 as a weighted, clamped delta.
//!
//! Read-only by contract: never writes to the observation layer. Persisting
//! a [`ScenarioRun`] is optional and only happens when a cycle is open.

use serde_json::{json, Map, Value};
use tracing::debug;

use crate::blackboard::{
    AnomalyKind, Blackboard, RiskState, ScenarioRun, ScenarioRunDraft, SimMetrics,
};

use super::AgentError;

/// Risk-index contribution of each projected risk state.
fn risk_index_of(state: RiskState) -> f64 {
    match state {
        RiskState::Normal => 0.0,
        RiskState::Degraded => 25.0,
        RiskState::AtRisk => 55.0,
        RiskState::Violation => 80.0,
        RiskState::Incident => 95.0,
    }
}

/// Anomaly kinds that count as SLA-affecting for the baseline roll-up.
fn is_sla_affecting(kind: AnomalyKind) -> bool {
    matches!(
        kind,
        AnomalyKind::WorkflowDelay | AnomalyKind::MissingStep | AnomalyKind::SequenceViolation
    )
}

/// A computed counterfactual, before optional persistence.
#[derive(Debug, Clone)]
pub struct WhatIfResult {
    pub scenario_type: String,
    pub parameters: Map<String, Value>,
    pub baseline: SimMetrics,
    pub simulated: SimMetrics,
    pub impact_score: f64,
    pub assumptions: Vec<String>,
    pub confidence: f64,
    pub confidence_reason: String,
}

pub struct WhatIfSimulator;

impl WhatIfSimulator {
    pub const AGENT_NAME: &'static str = "WhatIfSimulatorAgent";

    pub fn new() -> Self {
        Self
    }

    /// Compute a counterfactual without persisting anything.
    pub fn compute(
        &self,
        scenario_type: &str,
        parameters: &Map<String, Value>,
        board: &Blackboard,
    ) -> WhatIfResult {
        let scenario = scenario_type.to_uppercase();
        let p = normalize_parameters(&scenario, parameters);
        let baseline = baseline_metrics(board);
        let mut simulated = baseline;
        let mut trace: Vec<String> = Vec::new();

        match scenario.as_str() {
            "LATENCY_SPIKE" => {
                let magnitude = num(&p, "magnitude", 0.5);
                simulated.sla_violations += (4.0 * magnitude).max(1.0);
                simulated.compliance_violations += (1.0 * magnitude).max(0.0);
                simulated.risk_index = (baseline.risk_index + 25.0 * magnitude).min(100.0);
                trace.push(format!(
                    "LATENCY_SPIKE magnitude {magnitude:.2} -> risk +{:.2}",
                    25.0 * magnitude
                ));
            }
            "WORKLOAD_SURGE" => {
                let mult = num(&p, "multiplier", 2.0);
                simulated.sla_violations += ((mult - 1.0) * 6.0).max(1.0);
                simulated.compliance_violations += ((mult - 1.0) * 1.5).max(0.0);
                simulated.risk_index = (baseline.risk_index + (mult - 1.0) * 18.0).min(100.0);
                trace.push(format!(
                    "WORKLOAD_SURGE multiplier {mult:.2} -> risk +{:.2}",
                    (mult - 1.0) * 18.0
                ));
            }
            "COMPLIANCE_RELAX" => {
                let ext = num(&p, "minutes_extension", 180.0);
                simulated.sla_violations += 0.5;
                simulated.compliance_violations += (ext / 90.0).min(6.0);
                simulated.risk_index = (baseline.risk_index + (ext / 18.0).min(20.0)).min(100.0);
                trace.push(format!(
                    "COMPLIANCE_RELAX extension {ext:.0}m -> risk +{:.2}",
                    (ext / 18.0).min(20.0)
                ));
            }
            _ => {
                simulated.sla_violations += 0.5;
                simulated.risk_index = (baseline.risk_index + 5.0).min(100.0);
                trace.push("UNKNOWN scenario fallback -> risk +5.00".to_string());
            }
        }

        apply_context_modifiers(&mut simulated, &p, &mut trace);

        let impact_score = impact_score(&baseline, &simulated);
        let (confidence, confidence_reason) = confidence_for(&scenario, &p);

        let mut assumptions = vec![
            "Read-only simulation: no writes to the observation layer".to_string(),
            "Uses deterministic rules; not probabilistic forecasting".to_string(),
            "Impact is delta vs latest observed baseline".to_string(),
        ];
        assumptions.extend(trace.into_iter().take(5));

        debug!(scenario = %scenario, impact = impact_score, "what-if computed");

        WhatIfResult {
            scenario_type: scenario,
            parameters: p,
            baseline,
            simulated,
            impact_score,
            assumptions,
            confidence,
            confidence_reason,
        }
    }

    /// Compute and, when a cycle is open, persist the run to the blackboard.
    pub fn run(
        &self,
        scenario_type: &str,
        parameters: &Map<String, Value>,
        board: &Blackboard,
    ) -> Result<(WhatIfResult, Option<ScenarioRun>), AgentError> {
        let result = self.compute(scenario_type, parameters, board);

        let Some(cycle_id) = board.current_cycle_id() else {
            return Ok((result, None));
        };
        let related_cycle_id = board.last_completed_cycle().map(|c| c.cycle_id);
        let run = board.add_scenario_run(
            &cycle_id,
            ScenarioRunDraft {
                scenario_type: result.scenario_type.clone(),
                parameters: result.parameters.clone(),
                baseline: result.baseline,
                simulated: result.simulated,
                impact_score: result.impact_score,
                assumptions: result.assumptions.clone(),
                confidence: result.confidence,
                confidence_reason: result.confidence_reason.clone(),
                related_cycle_id,
            },
        )?;
        Ok((result, Some(run)))
    }
}

impl Default for WhatIfSimulator {
    fn default() -> Self {
        Self::new()
    }
}

fn num(p: &Map<String, Value>, key: &str, default: f64) -> f64 {
    p.get(key).and_then(|v| v.as_f64()).unwrap_or(default)
}

/// Clamp parameters into their modeled operating ranges and fill defaults.
fn normalize_parameters(scenario: &str, parameters: &Map<String, Value>) -> Map<String, Value> {
    let mut p = parameters.clone();

    let defaults: &[(&str, f64)] = match scenario {
        "LATENCY_SPIKE" => &[("magnitude", 0.5), ("duration_minutes", 15.0)],
        "WORKLOAD_SURGE" => &[("multiplier", 2.0), ("duration_minutes", 15.0)],
        "COMPLIANCE_RELAX" => &[("minutes_extension", 180.0), ("duration_minutes", 30.0)],
        _ => &[],
    };
    for (key, value) in defaults {
        p.entry(key.to_string()).or_insert_with(|| json!(value));
    }

    let magnitude = num(&p, "magnitude", 0.5).clamp(0.0, 2.0);
    p.insert("magnitude".to_string(), json!(magnitude));
    let multiplier = num(&p, "multiplier", 2.0).clamp(1.0, 6.0);
    p.insert("multiplier".to_string(), json!(multiplier));
    let extension = num(&p, "minutes_extension", 180.0).clamp(0.0, 720.0);
    p.insert("minutes_extension".to_string(), json!(extension));

    for (key, default) in [
        ("time_window", "business_hours"),
        ("affected_module", "general"),
        ("actor_role", "service"),
    ] {
        let value = p
            .get(key)
            .and_then(|v| v.as_str())
            .unwrap_or(default)
            .to_lowercase();
        p.insert(key.to_string(), json!(value));
    }

    p
}

/// Baseline roll-up from the last closed cycle; quiet defaults otherwise.
fn baseline_metrics(board: &Blackboard) -> SimMetrics {
    let Some(latest) = board.last_completed_cycle() else {
        return SimMetrics {
            sla_violations: 0.0,
            compliance_violations: 0.0,
            risk_index: 10.0,
        };
    };

    let sla = latest
        .anomalies
        .iter()
        .filter(|a| is_sla_affecting(a.kind))
        .count() as f64;
    let compliance = latest.policy_hits.len() as f64;
    let risk_index = latest
        .risk_signals
        .iter()
        .map(|r| risk_index_of(r.projected_state))
        .fold(0.0, f64::max);

    SimMetrics {
        sla_violations: sla,
        compliance_violations: compliance,
        risk_index,
    }
}

fn apply_context_modifiers(simulated: &mut SimMetrics, p: &Map<String, Value>, trace: &mut Vec<String>) {
    let mut risk_boost = 0.0;

    let time_window = p.get("time_window").and_then(|v| v.as_str()).unwrap_or("");
    if matches!(time_window, "after_hours" | "weekend") {
        risk_boost += 4.0;
        trace.push("Context time_window after_hours/weekend -> risk +4.00".to_string());
    }

    let module = p
        .get("affected_module")
        .and_then(|v| v.as_str())
        .unwrap_or("general");
    if matches!(module, "auth" | "payment" | "approval" | "compliance") {
        risk_boost += 6.0;
        simulated.compliance_violations += 0.6;
        trace.push(format!("Context affected_module {module} -> risk +6.00"));
    }

    let role = p.get("actor_role").and_then(|v| v.as_str()).unwrap_or("service");
    if matches!(role, "admin" | "security") {
        risk_boost += 3.0;
        trace.push(format!("Context actor_role {role} -> risk +3.00"));
    }

    simulated.risk_index = (simulated.risk_index + risk_boost).min(100.0);
}

/// Weighted, clamped delta on 0-100.
fn impact_score(baseline: &SimMetrics, simulated: &SimMetrics) -> f64 {
    let d_sla = (simulated.sla_violations - baseline.sla_violations).max(0.0);
    let d_comp = (simulated.compliance_violations - baseline.compliance_violations).max(0.0);
    let d_risk = (simulated.risk_index - baseline.risk_index).max(0.0);

    let sla_norm = (d_sla / 10.0).min(1.0);
    let comp_norm = (d_comp / 6.0).min(1.0);
    let risk_norm = (d_risk / 100.0).min(1.0);
    let score = (0.35 * sla_norm + 0.35 * comp_norm + 0.30 * risk_norm) * 100.0;
    (score.clamp(0.0, 100.0) * 1000.0).round() / 1000.0
}

fn confidence_for(scenario: &str, p: &Map<String, Value>) -> (f64, String) {
    if scenario == "WORKLOAD_SURGE" && num(p, "multiplier", 2.0) > 4.0 {
        return (
            0.5,
            "Extrapolated surge beyond usual operating range".to_string(),
        );
    }
    if scenario == "LATENCY_SPIKE" && num(p, "magnitude", 0.5) > 1.0 {
        return (
            0.7,
            "High latency perturbation, medium model confidence".to_string(),
        );
    }
    (0.9, "Within modeled operating envelope".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blackboard::{
        AnomalyDraft, EntityType, RiskSignalDraft,
    };
    use chrono::Utc;

    /// Close one cycle holding 1 SLA anomaly, 0 hits, a DEGRADED projection.
    fn seed_baseline(board: &Blackboard) {
        let cycle_id = board.start_cycle().unwrap();
        board
            .add_anomaly(
                &cycle_id,
                AnomalyDraft {
                    kind: AnomalyKind::WorkflowDelay,
                    agent: "WorkflowAgent".to_string(),
                    evidence: vec!["evt_1".to_string()],
                    description: "wf_deploy_1 delayed".to_string(),
                    confidence: 0.8,
                    timestamp: Utc::now(),
                },
            )
            .unwrap();
        board
            .add_risk_signal(
                &cycle_id,
                RiskSignalDraft {
                    entity: "wf_deploy_1".to_string(),
                    entity_type: EntityType::Workflow,
                    current_state: RiskState::Normal,
                    projected_state: RiskState::Degraded,
                    confidence: 0.6,
                    time_horizon: "15-30 min".to_string(),
                    reasoning: "1 anomaly".to_string(),
                    evidence_ids: vec!["evt_1".to_string()],
                    timestamp: Utc::now(),
                },
            )
            .unwrap();
        board.complete_cycle().unwrap();
    }

    #[test]
    fn latency_spike_magnitude_point_eight() {
        let board = Blackboard::in_memory();
        seed_baseline(&board);

        let mut params = Map::new();
        params.insert("magnitude".to_string(), json!(0.8));
        let result = WhatIfSimulator::new().compute("LATENCY_SPIKE", &params, &board);

        assert_eq!(result.baseline.sla_violations, 1.0);
        assert_eq!(result.baseline.risk_index, 25.0);
        assert!(result.simulated.sla_violations >= 4.0);
        assert_eq!(result.simulated.risk_index, 45.0); // 25 + 25*0.8
        assert!(result.impact_score > 0.0);
        assert!(result
            .assumptions
            .iter()
            .any(|a| a.contains("LATENCY_SPIKE magnitude 0.80")));
    }

    #[test]
    fn parameters_clamp_to_modeled_ranges() {
        let board = Blackboard::in_memory();
        let mut params = Map::new();
        params.insert("magnitude".to_string(), json!(7.5));
        params.insert("multiplier".to_string(), json!(99.0));
        params.insert("minutes_extension".to_string(), json!(100_000.0));

        let result = WhatIfSimulator::new().compute("LATENCY_SPIKE", &params, &board);
        assert_eq!(num(&result.parameters, "magnitude", 0.0), 2.0);
        assert_eq!(num(&result.parameters, "multiplier", 0.0), 6.0);
        assert_eq!(num(&result.parameters, "minutes_extension", 0.0), 720.0);
    }

    #[test]
    fn empty_history_uses_quiet_baseline() {
        let board = Blackboard::in_memory();
        let result = WhatIfSimulator::new().compute("WORKLOAD_SURGE", &Map::new(), &board);
        assert_eq!(result.baseline.sla_violations, 0.0);
        assert_eq!(result.baseline.risk_index, 10.0);
        assert!(result.simulated.sla_violations >= 1.0);
    }

    #[test]
    fn unknown_scenario_falls_back() {
        let board = Blackboard::in_memory();
        let result = WhatIfSimulator::new().compute("ALIEN_INVASION", &Map::new(), &board);
        assert_eq!(result.simulated.risk_index, 15.0); // 10 + 5
        assert!(result
            .assumptions
            .iter()
            .any(|a| a.contains("UNKNOWN scenario fallback")));
    }

    #[test]
    fn context_modifiers_stack() {
        let board = Blackboard::in_memory();
        let mut params = Map::new();
        params.insert("time_window".to_string(), json!("after_hours"));
        params.insert("affected_module".to_string(), json!("payment"));
        params.insert("actor_role".to_string(), json!("admin"));

        let plain = WhatIfSimulator::new().compute("LATENCY_SPIKE", &Map::new(), &board);
        let loaded = WhatIfSimulator::new().compute("LATENCY_SPIKE", &params, &board);
        assert_eq!(
            loaded.simulated.risk_index,
            (plain.simulated.risk_index + 13.0).min(100.0)
        );
    }

    #[test]
    fn high_surge_lowers_confidence() {
        let board = Blackboard::in_memory();
        let mut params = Map::new();
        params.insert("multiplier".to_string(), json!(5.0));
        let result = WhatIfSimulator::new().compute("WORKLOAD_SURGE", &params, &board);
        assert_eq!(result.confidence, 0.5);
    }

    #[test]
    fn run_persists_only_with_open_cycle() {
        let board = Blackboard::in_memory();
        seed_baseline(&board);

        let (_, persisted) = WhatIfSimulator::new()
            .run("LATENCY_SPIKE", &Map::new(), &board)
            .unwrap();
        assert!(persisted.is_none());

        let cycle_id = board.start_cycle().unwrap();
        let (_, persisted) = WhatIfSimulator::new()
            .run("LATENCY_SPIKE", &Map::new(), &board)
            .unwrap();
        let run = persisted.unwrap();
        assert!(run.related_cycle_id.is_some());
        let cycle = board.current_cycle().unwrap();
        assert_eq!(cycle.cycle_id, cycle_id);
        assert_eq!(cycle.scenario_runs.len(), 1);
    }
}

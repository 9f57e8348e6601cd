//! Agent family
//!
//! Detection agents (parallel lane): workflow, resource, compliance,
//! adaptive-baseline, code-risk. Dependent agents (serial lane):
//! risk-forecast, causal. Synthesis: severity engine, recommendation engine.
//! Counterfactual + stress: what-if simulator, scenario injector.
//!
//! Agents never call each other. Coordination happens only through the
//! [`Blackboard`]; each agent writes its own section of the open cycle and
//! returns what it wrote.

pub mod baseline;
pub mod causal;
pub mod code_risk;
pub mod compliance;
pub mod recommendation;
pub mod resource;
pub mod risk_forecast;
pub mod scenario;
pub mod severity;
pub mod what_if;
pub mod workflow;

use thiserror::Error;

use crate::blackboard::{Anomaly, Blackboard, BlackboardError, PolicyHit};
use crate::observation::{ObservedEvent, ObservedMetric};

pub use baseline::AdaptiveBaselineAgent;
pub use causal::CausalAgent;
pub use code_risk::CodeRiskAgent;
pub use compliance::ComplianceAgent;
pub use recommendation::RecommendationEngine;
pub use resource::ResourceAgent;
pub use risk_forecast::RiskForecastAgent;
pub use scenario::ScenarioInjector;
pub use severity::SeverityEngine;
pub use what_if::WhatIfSimulator;
pub use workflow::WorkflowAgent;

// ============================================================================
// Shared agent contract
// ============================================================================

#[derive(Debug, Error)]
pub enum AgentError {
    /// Recoverable agent-internal failure. Caught and logged by the MCP;
    /// never aborts the cycle.
    #[error("transient agent failure: {0}")]
    Transient(String),

    /// Blackboard invariant violation (wrong cycle, immutable cycle,
    /// missing evidence). Visible to callers, never silently swallowed.
    #[error(transparent)]
    Blackboard(#[from] BlackboardError),
}

/// Immutable view of the observation tail a cycle reasons over.
#[derive(Debug, Clone, Default)]
pub struct ObservationSnapshot {
    pub events: Vec<ObservedEvent>,
    pub metrics: Vec<ObservedMetric>,
}

/// What a detection agent committed to the blackboard this cycle.
#[derive(Debug, Default)]
pub struct DetectionReport {
    pub anomalies: Vec<Anomaly>,
    pub policy_hits: Vec<PolicyHit>,
}

impl DetectionReport {
    pub fn finding_count(&self) -> usize {
        self.anomalies.len() + self.policy_hits.len()
    }
}

/// Contract shared by the parallel-lane detection agents.
///
/// `analyze` must be self-contained: read the snapshot, write findings via
/// the blackboard, return them. Agents are stateful only in narrow,
/// documented ways (baseline profiles, dedup sets) behind their own locks.
pub trait DetectionAgent: Send + Sync {
    fn name(&self) -> &'static str;

    fn analyze(
        &self,
        snapshot: &ObservationSnapshot,
        cycle_id: &str,
        board: &Blackboard,
    ) -> Result<DetectionReport, AgentError>;
}

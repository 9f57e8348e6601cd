//! VIGIL-OS: Cognitive Observability Engine
//!
//! Multi-agent architecture for IT operational intelligence: raw signal
//! ingestion, a blackboard of per-cycle reasoning records, and an adaptive
//! master control loop.
//!
//! ## Architecture
//!
//! - **Observation Layer**: append-only event/metric ingestion, pure facts
//! - **Blackboard**: per-cycle, append-only, immutable-on-completion record
//! - **Detection Agents**: workflow, resource, compliance, baseline, code risk
//! - **Dependent Agents**: risk forecast, causal linking
//! - **Synthesis**: severity engine, recommendation engine
//! - **MCP**: pulse-adaptive scheduler driving each reasoning cycle
//! - **Insight Materializer**: human-readable output per cycle

pub mod agents;
pub mod blackboard;
pub mod config;
pub mod guards;
pub mod ids;
pub mod insight;
pub mod mcp;
pub mod observation;
pub mod sinks;

// Re-export the observation surface
pub use observation::{
    EventEnvelope, EventKind, MetricEnvelope, ObservationError, ObservationLayer, ObservedEvent,
    ObservedMetric,
};

// Re-export the blackboard surface
pub use blackboard::{
    Anomaly, AnomalyKind, Blackboard, BlackboardError, CausalLink, PolicyHit, ReasoningCycle,
    Recommendation, RecommendationV2, RiskSignal, RiskState, SeverityScore, Urgency,
};

// Re-export the agent family
pub use agents::{
    AdaptiveBaselineAgent, CausalAgent, CodeRiskAgent, ComplianceAgent, DetectionAgent,
    RecommendationEngine, ResourceAgent, RiskForecastAgent, ScenarioInjector, SeverityEngine,
    WhatIfSimulator, WorkflowAgent,
};

// Re-export the control plane
pub use config::EngineConfig;
pub use insight::{Insight, InsightMaterializer};
pub use mcp::{CycleResult, MasterControl, SystemPulse};
pub use sinks::{AlertGate, AlertGateConfig, GraphSink, NoopGraphSink};

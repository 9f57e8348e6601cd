//! Scenario Injector — predefined synthetic disruption bursts
//!
//! Injects event/metric bursts for a named stress scenario straight into the
//! observation layer, then records what was injected and which agents are
//! expected to react. Execution records live in an in-memory history for
//! later inspection.
//!
//! The injector writes raw facts only — it knows nothing about policies or
//! detection thresholds beyond scenario design intent.

use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use thiserror::Error;
use tracing::info;

use crate::ids::new_id;
use crate::observation::{EventEnvelope, EventKind, MetricEnvelope, ObservationLayer};

#[derive(Debug, Error)]
pub enum ScenarioError {
    #[error("unknown scenario: {0}")]
    UnknownScenario(String),

    #[error("ingest rejected during injection: {0}")]
    Ingest(#[from] crate::observation::ObservationError),
}

/// The predefined stress scenarios.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ScenarioKind {
    LatencySpike,
    ComplianceBreach,
    WorkloadSurge,
    CascadingFailure,
    ResourceDrift,
}

impl ScenarioKind {
    pub fn parse(id: &str) -> Option<Self> {
        match id.to_uppercase().as_str() {
            "LATENCY_SPIKE" => Some(Self::LatencySpike),
            "COMPLIANCE_BREACH" => Some(Self::ComplianceBreach),
            "WORKLOAD_SURGE" => Some(Self::WorkloadSurge),
            "CASCADING_FAILURE" => Some(Self::CascadingFailure),
            "RESOURCE_DRIFT" => Some(Self::ResourceDrift),
            _ => None,
        }
    }
}

impl std::fmt::Display for ScenarioKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::LatencySpike => "LATENCY_SPIKE",
            Self::ComplianceBreach => "COMPLIANCE_BREACH",
            Self::WorkloadSurge => "WORKLOAD_SURGE",
            Self::CascadingFailure => "CASCADING_FAILURE",
            Self::ResourceDrift => "RESOURCE_DRIFT",
        };
        write!(f, "{s}")
    }
}

/// Static description of one scenario: what gets injected and what should
/// react to it.
#[derive(Debug, Clone, Serialize)]
pub struct ScenarioDefinition {
    pub kind: ScenarioKind,
    pub name: &'static str,
    pub description: &'static str,
    pub severity: &'static str,
    pub expected_agents: &'static [&'static str],
    pub events_to_inject: usize,
    pub metrics_to_inject: usize,
    pub estimated_detection: &'static str,
}

/// All shipped scenario definitions.
pub fn scenario_catalog() -> Vec<ScenarioDefinition> {
    vec![
        ScenarioDefinition {
            kind: ScenarioKind::LatencySpike,
            name: "Network Latency Spike",
            description: "Sustained network latency spike on vm_api_01 simulating network degradation.",
            severity: "high",
            expected_agents: &[
                "ResourceAgent",
                "WorkflowAgent",
                "RiskForecastAgent",
                "CausalAgent",
            ],
            events_to_inject: 0,
            metrics_to_inject: 8,
            estimated_detection: "1-2 cycles",
        },
        ScenarioDefinition {
            kind: ScenarioKind::ComplianceBreach,
            name: "Compliance Breach Pattern",
            description: "After-hours writes from untrusted locations plus a service-account write.",
            severity: "high",
            expected_agents: &["ComplianceAgent", "RiskForecastAgent"],
            events_to_inject: 5,
            metrics_to_inject: 0,
            estimated_detection: "1 cycle",
        },
        ScenarioDefinition {
            kind: ScenarioKind::WorkloadSurge,
            name: "Workload Surge",
            description: "Burst of concurrent workflow starts with a CPU spike from the load.",
            severity: "medium",
            expected_agents: &["WorkflowAgent", "ResourceAgent", "RiskForecastAgent"],
            events_to_inject: 8,
            metrics_to_inject: 8,
            estimated_detection: "1-2 cycles",
        },
        ScenarioDefinition {
            kind: ScenarioKind::CascadingFailure,
            name: "Cascading Failure",
            description: "Latency spike, CPU stress, workflow delay, approval skip, after-hours write.",
            severity: "critical",
            expected_agents: &[
                "ResourceAgent",
                "WorkflowAgent",
                "ComplianceAgent",
                "RiskForecastAgent",
                "CausalAgent",
                "AdaptiveBaselineAgent",
            ],
            events_to_inject: 5,
            metrics_to_inject: 10,
            estimated_detection: "2-3 cycles",
        },
        ScenarioDefinition {
            kind: ScenarioKind::ResourceDrift,
            name: "Gradual Resource Drift",
            description: "Slow CPU degradation testing trend detection over threshold detection.",
            severity: "medium",
            expected_agents: &["ResourceAgent", "AdaptiveBaselineAgent", "RiskForecastAgent"],
            events_to_inject: 0,
            metrics_to_inject: 15,
            estimated_detection: "3-5 cycles",
        },
    ]
}

/// Record of one injection run.
#[derive(Debug, Clone, Serialize)]
pub struct ScenarioExecution {
    pub execution_id: String,
    pub scenario: ScenarioKind,
    pub name: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub events_injected: usize,
    pub metrics_injected: usize,
    pub expected_agents: Vec<String>,
    pub summary: String,
}

// ============================================================================
// Scenario Injector
// ============================================================================

pub struct ScenarioInjector {
    executions: Mutex<Vec<ScenarioExecution>>,
}

impl ScenarioInjector {
    pub const AGENT_NAME: &'static str = "ScenarioInjectionAgent";

    pub fn new() -> Self {
        Self {
            executions: Mutex::new(Vec::new()),
        }
    }

    /// Inject a named scenario into the observation layer.
    pub fn inject(
        &self,
        scenario_id: &str,
        observation: &ObservationLayer,
    ) -> Result<ScenarioExecution, ScenarioError> {
        let kind = ScenarioKind::parse(scenario_id)
            .ok_or_else(|| ScenarioError::UnknownScenario(scenario_id.to_string()))?;
        let definition = scenario_catalog()
            .into_iter()
            .find(|d| d.kind == kind)
            .ok_or_else(|| ScenarioError::UnknownScenario(scenario_id.to_string()))?;

        let now = Utc::now();
        let mut execution = ScenarioExecution {
            execution_id: new_id("exec"),
            scenario: kind,
            name: definition.name.to_string(),
            started_at: now,
            completed_at: None,
            events_injected: 0,
            metrics_injected: 0,
            expected_agents: definition
                .expected_agents
                .iter()
                .map(|s| s.to_string())
                .collect(),
            summary: String::new(),
        };

        match kind {
            ScenarioKind::LatencySpike => self.inject_latency_spike(&mut execution, now, observation)?,
            ScenarioKind::ComplianceBreach => {
                self.inject_compliance_breach(&mut execution, now, observation)?
            }
            ScenarioKind::WorkloadSurge => self.inject_workload_surge(&mut execution, now, observation)?,
            ScenarioKind::CascadingFailure => {
                self.inject_cascading_failure(&mut execution, now, observation)?
            }
            ScenarioKind::ResourceDrift => self.inject_resource_drift(&mut execution, now, observation)?,
        }

        execution.completed_at = Some(Utc::now());
        info!(
            scenario = %kind,
            events = execution.events_injected,
            metrics = execution.metrics_injected,
            "scenario injected"
        );

        let mut history = self.lock();
        history.push(execution.clone());
        Ok(execution)
    }

    /// Recent injection history, newest last.
    pub fn executions(&self, limit: usize) -> Vec<ScenarioExecution> {
        let history = self.lock();
        let skip = history.len().saturating_sub(limit);
        history[skip..].to_vec()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<ScenarioExecution>> {
        match self.executions.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    // ────────────────────────────────────────────────────────────────────
    // Injectors
    // ────────────────────────────────────────────────────────────────────

    fn inject_metric(
        &self,
        execution: &mut ScenarioExecution,
        observation: &ObservationLayer,
        resource_id: &str,
        metric_name: &str,
        value: f64,
        timestamp: DateTime<Utc>,
    ) {
        observation.observe_metric(MetricEnvelope {
            resource_id: resource_id.to_string(),
            metric_name: metric_name.to_string(),
            value,
            timestamp,
        });
        execution.metrics_injected += 1;
    }

    #[allow(clippy::too_many_arguments)]
    fn inject_event(
        &self,
        execution: &mut ScenarioExecution,
        observation: &ObservationLayer,
        kind: EventKind,
        workflow_id: Option<&str>,
        actor: &str,
        resource: Option<&str>,
        timestamp: DateTime<Utc>,
        metadata: Map<String, Value>,
    ) -> Result<(), ScenarioError> {
        observation.observe_event(EventEnvelope {
            event_id: new_id("scenario_evt"),
            kind,
            workflow_id: workflow_id.map(String::from),
            actor: actor.to_string(),
            resource: resource.map(String::from),
            timestamp,
            metadata,
        })?;
        execution.events_injected += 1;
        Ok(())
    }

    /// Rising latency spike: 300ms -> 650ms on vm_api_01.
    fn inject_latency_spike(
        &self,
        execution: &mut ScenarioExecution,
        now: DateTime<Utc>,
        observation: &ObservationLayer,
    ) -> Result<(), ScenarioError> {
        for i in 0..8 {
            self.inject_metric(
                execution,
                observation,
                "vm_api_01",
                "network_latency_ms",
                300.0 + i as f64 * 50.0,
                now + Duration::seconds(i * 5),
            );
        }
        execution.summary = "Injected 8 latency metrics (300ms-650ms) on vm_api_01; expect \
            sustained-spike detection and risk escalation"
            .to_string();
        Ok(())
    }

    /// After-hours writes from untrusted locations at 02:15.
    fn inject_compliance_breach(
        &self,
        execution: &mut ScenarioExecution,
        now: DateTime<Utc>,
        observation: &ObservationLayer,
    ) -> Result<(), ScenarioError> {
        let breach_time = now
            .date_naive()
            .and_hms_opt(2, 15, 0)
            .map(|dt| dt.and_utc())
            .unwrap_or(now);

        for i in 0..3 {
            let mut metadata = Map::new();
            metadata.insert("location".to_string(), json!("unknown_vpn"));
            metadata.insert("resource_sensitivity".to_string(), json!("high"));
            self.inject_event(
                execution,
                observation,
                EventKind::AccessWrite,
                None,
                "user_bob",
                Some("sensitive_db"),
                breach_time + Duration::minutes(i * 2),
                metadata,
            )?;
        }

        let mut internal = Map::new();
        internal.insert("location".to_string(), json!("internal"));
        self.inject_event(
            execution,
            observation,
            EventKind::AccessWrite,
            None,
            "svc_account_01",
            Some("repo_main"),
            breach_time + Duration::minutes(8),
            internal,
        )?;

        let mut vpn = Map::new();
        vpn.insert("location".to_string(), json!("unknown_vpn"));
        self.inject_event(
            execution,
            observation,
            EventKind::CredentialAccess,
            None,
            "user_carol",
            Some("admin_credentials"),
            breach_time + Duration::minutes(12),
            vpn,
        )?;

        execution.summary = "Injected 5 events: 3 after-hours writes from unknown VPN, 1 service \
            account direct write, 1 credential access"
            .to_string();
        Ok(())
    }

    /// Burst of workflow starts plus a CPU spike from the load.
    fn inject_workload_surge(
        &self,
        execution: &mut ScenarioExecution,
        now: DateTime<Utc>,
        observation: &ObservationLayer,
    ) -> Result<(), ScenarioError> {
        for i in 0..8i64 {
            let wf_id = new_id("wf_surge");
            let mut metadata = Map::new();
            metadata.insert("workflow_name".to_string(), json!("Deploy Pipeline"));
            self.inject_event(
                execution,
                observation,
                EventKind::WorkflowStart,
                Some(&wf_id),
                if i % 2 == 0 { "user_alice" } else { "user_bob" },
                None,
                now + Duration::seconds(i * 2),
                metadata,
            )?;
        }

        for i in 0..4 {
            for resource in ["vm_web_01", "vm_api_01"] {
                self.inject_metric(
                    execution,
                    observation,
                    resource,
                    "cpu_usage",
                    75.0 + i as f64 * 8.0,
                    now + Duration::seconds(i * 5),
                );
            }
        }

        execution.summary =
            "Injected 8 concurrent workflow starts plus CPU spike (75%-99%) on two nodes"
                .to_string();
        Ok(())
    }

    /// Full chain: latency spike, CPU stress, delayed step, approval skip,
    /// after-hours write.
    fn inject_cascading_failure(
        &self,
        execution: &mut ScenarioExecution,
        now: DateTime<Utc>,
        observation: &ObservationLayer,
    ) -> Result<(), ScenarioError> {
        for i in 0..5 {
            self.inject_metric(
                execution,
                observation,
                "vm_api_01",
                "network_latency_ms",
                200.0 + i as f64 * 80.0,
                now + Duration::seconds(i * 5),
            );
        }
        for i in 0..5 {
            self.inject_metric(
                execution,
                observation,
                "vm_web_01",
                "cpu_usage",
                60.0 + i as f64 * 10.0,
                now + Duration::seconds(i * 5),
            );
        }

        let wf_id = new_id("wf_cascade");
        let mut start_md = Map::new();
        start_md.insert("workflow_name".to_string(), json!("Deploy Pipeline"));
        self.inject_event(
            execution,
            observation,
            EventKind::WorkflowStart,
            Some(&wf_id),
            "user_alice",
            None,
            now,
            start_md,
        )?;

        let mut step_start = Map::new();
        step_start.insert("step".to_string(), json!("build"));
        step_start.insert("expected_duration".to_string(), json!(60));
        self.inject_event(
            execution,
            observation,
            EventKind::WorkflowStepStart,
            Some(&wf_id),
            "system",
            None,
            now + Duration::seconds(5),
            step_start,
        )?;

        let mut step_complete = Map::new();
        step_complete.insert("step".to_string(), json!("build"));
        step_complete.insert("actual_duration".to_string(), json!(180));
        self.inject_event(
            execution,
            observation,
            EventKind::WorkflowStepComplete,
            Some(&wf_id),
            "system",
            None,
            now + Duration::seconds(185),
            step_complete,
        )?;

        let mut skip = Map::new();
        skip.insert("step".to_string(), json!("approval"));
        skip.insert("reason".to_string(), json!("SLA_PRESSURE"));
        self.inject_event(
            execution,
            observation,
            EventKind::WorkflowStepSkip,
            Some(&wf_id),
            "user_alice",
            None,
            now + Duration::seconds(200),
            skip,
        )?;

        let after_hours = now
            .date_naive()
            .and_hms_opt(2, 30, 0)
            .map(|dt| dt.and_utc())
            .unwrap_or(now);
        let mut write_md = Map::new();
        write_md.insert("location".to_string(), json!("internal"));
        write_md.insert("resource_sensitivity".to_string(), json!("high"));
        self.inject_event(
            execution,
            observation,
            EventKind::AccessWrite,
            None,
            "user_alice",
            Some("production_db"),
            after_hours,
            write_md,
        )?;

        execution.summary = "Injected full cascade: latency spike, CPU stress, workflow delay, \
            approval skip under SLA pressure, after-hours write"
            .to_string();
        Ok(())
    }

    /// Gradual CPU drift 40% -> 72% with mild oscillation.
    fn inject_resource_drift(
        &self,
        execution: &mut ScenarioExecution,
        now: DateTime<Utc>,
        observation: &ObservationLayer,
    ) -> Result<(), ScenarioError> {
        for i in 0..15 {
            let value = 40.0 + i as f64 * 2.2 + (i as f64 / 3.0).sin() * 3.0;
            self.inject_metric(
                execution,
                observation,
                "vm_db_01",
                "cpu_usage",
                (value * 10.0).round() / 10.0,
                now + Duration::seconds(i * 10),
            );
        }
        execution.summary =
            "Injected 15 CPU metrics showing gradual drift (40%-72%) on vm_db_01".to_string();
        Ok(())
    }
}

impl Default for ScenarioInjector {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observation::MetricWindow;

    #[test]
    fn catalog_covers_all_kinds() {
        let catalog = scenario_catalog();
        assert_eq!(catalog.len(), 5);
        for definition in &catalog {
            assert!(!definition.expected_agents.is_empty());
        }
    }

    #[test]
    fn unknown_scenario_rejected() {
        let injector = ScenarioInjector::new();
        let layer = ObservationLayer::in_memory(100);
        assert!(matches!(
            injector.inject("NOT_A_SCENARIO", &layer),
            Err(ScenarioError::UnknownScenario(_))
        ));
    }

    #[test]
    fn latency_spike_injects_rising_series() {
        let injector = ScenarioInjector::new();
        let layer = ObservationLayer::in_memory(100);

        let execution = injector.inject("LATENCY_SPIKE", &layer).unwrap();
        assert_eq!(execution.metrics_injected, 8);
        assert_eq!(execution.events_injected, 0);

        let series = layer.metric_window(&MetricWindow {
            resource_id: Some("vm_api_01".to_string()),
            metric_name: Some("network_latency_ms".to_string()),
            ..MetricWindow::default()
        });
        assert_eq!(series.len(), 8);
        let max = series.iter().map(|m| m.value).fold(f64::MIN, f64::max);
        assert_eq!(max, 650.0);
    }

    #[test]
    fn cascading_failure_injects_events_and_metrics() {
        let injector = ScenarioInjector::new();
        let layer = ObservationLayer::in_memory(100);

        let execution = injector.inject("CASCADING_FAILURE", &layer).unwrap();
        assert_eq!(execution.metrics_injected, 10);
        assert_eq!(execution.events_injected, 5);
        assert!(execution.expected_agents.contains(&"CausalAgent".to_string()));
    }

    #[test]
    fn execution_history_is_kept() {
        let injector = ScenarioInjector::new();
        let layer = ObservationLayer::in_memory(1000);
        injector.inject("RESOURCE_DRIFT", &layer).unwrap();
        injector.inject("COMPLIANCE_BREACH", &layer).unwrap();

        let history = injector.executions(10);
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].scenario, ScenarioKind::ResourceDrift);
        assert!(history.iter().all(|e| e.completed_at.is_some()));
    }
}

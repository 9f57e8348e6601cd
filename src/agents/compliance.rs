//! Compliance Agent — silent policy violation detection
//!
//! Evaluates every event in the window against a fixed policy set. Policies
//! are rules, not detectors: each one is a predicate over a single event.
//! A matched policy emits a SILENT [`PolicyHit`] — the event broke policy
//! without raising any alert of its own.
//!
//! Narrow state: a persistent `(policy_id, event_id)` seen-set. Observation
//! windows overlap across cycles, so without it every cycle would re-report
//! the same violations.

use std::collections::HashSet;
use std::sync::Mutex;

use chrono::Timelike;
use tracing::debug;

use crate::blackboard::{Blackboard, PolicyHit, PolicyHitDraft, ViolationType};
use crate::observation::{EventKind, ObservedEvent};

use super::{AgentError, DetectionAgent, DetectionReport, ObservationSnapshot};

/// Policy severity tag (drives severity scoring downstream).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicySeverity {
    Low,
    Medium,
    High,
    Critical,
}

/// A static policy definition: id, description, and the violation predicate.
pub struct Policy {
    pub policy_id: &'static str,
    pub name: &'static str,
    pub severity: PolicySeverity,
    pub rationale: &'static str,
    pub check: fn(&ObservedEvent) -> bool,
}

// ============================================================================
// Shipped policy set
// ============================================================================

/// WRITE operations outside business hours (9-18).
fn check_after_hours_write(event: &ObservedEvent) -> bool {
    if event.kind != EventKind::AccessWrite {
        return false;
    }
    let hour = event.timestamp.hour();
    !(9..=18).contains(&hour)
}

/// Access from a listed untrusted location tag.
fn check_unusual_location(event: &ObservedEvent) -> bool {
    if !matches!(
        event.kind,
        EventKind::AccessRead | EventKind::AccessWrite | EventKind::CredentialAccess
    ) {
        return false;
    }
    let location = event
        .metadata
        .get("location")
        .and_then(|v| v.as_str())
        .unwrap_or("");
    matches!(
        location,
        "external_unknown" | "vpn_foreign" | "tor_exit_node" | "unknown_vpn"
    )
}

/// Sensitive-resource access with no workflow id (no audit trail).
fn check_uncontrolled_sensitive_access(event: &ObservedEvent) -> bool {
    if !matches!(event.kind, EventKind::AccessRead | EventKind::AccessWrite) {
        return false;
    }
    if event.workflow_id.is_some() {
        return false;
    }
    let resource = event.resource.as_deref().unwrap_or("").to_lowercase();
    ["secrets", "production", "credentials", "config_secrets", "sensitive"]
        .iter()
        .any(|s| resource.contains(s))
}

/// Direct WRITE by a service account (`svc_` actor prefix).
fn check_service_account_write(event: &ObservedEvent) -> bool {
    event.kind == EventKind::AccessWrite && event.actor.starts_with("svc_")
}

/// Skip of a step whose name contains "approval".
fn check_skipped_approval(event: &ObservedEvent) -> bool {
    if event.kind != EventKind::WorkflowStepSkip {
        return false;
    }
    let skipped = event
        .metadata
        .get("skipped_step")
        .or_else(|| event.metadata.get("step"))
        .and_then(|v| v.as_str())
        .unwrap_or("");
    skipped.to_lowercase().contains("approval")
}

/// The default policy registry. Configurable, but this set defines the
/// baseline behavior.
pub fn default_policies() -> Vec<Policy> {
    vec![
        Policy {
            policy_id: "NO_AFTER_HOURS_WRITE",
            name: "No After-Hours Write Operations",
            severity: PolicySeverity::Medium,
            rationale: "Reduces audit and breach risk",
            check: check_after_hours_write,
        },
        Policy {
            policy_id: "NO_UNUSUAL_LOCATION",
            name: "No Access from Unusual Locations",
            severity: PolicySeverity::High,
            rationale: "Prevents unauthorized access from untrusted networks",
            check: check_unusual_location,
        },
        Policy {
            policy_id: "NO_UNCONTROLLED_SENSITIVE_ACCESS",
            name: "Sensitive Resources Require Workflow",
            severity: PolicySeverity::High,
            rationale: "Ensures audit trail for sensitive data access",
            check: check_uncontrolled_sensitive_access,
        },
        Policy {
            policy_id: "NO_SVC_ACCOUNT_WRITE",
            name: "Service Accounts Cannot Write Directly",
            severity: PolicySeverity::Medium,
            rationale: "Service accounts should use workflows for writes",
            check: check_service_account_write,
        },
        Policy {
            policy_id: "NO_SKIP_APPROVAL",
            name: "Approval Steps Cannot Be Skipped",
            severity: PolicySeverity::Critical,
            rationale: "Approvals are mandatory compliance checkpoints",
            check: check_skipped_approval,
        },
    ]
}

// ============================================================================
// Compliance Agent
// ============================================================================

pub struct ComplianceAgent {
    policies: Vec<Policy>,
    seen: Mutex<HashSet<(String, String)>>,
}

impl ComplianceAgent {
    pub const AGENT_NAME: &'static str = "ComplianceAgent";

    pub fn new() -> Self {
        Self::with_policies(default_policies())
    }

    pub fn with_policies(policies: Vec<Policy>) -> Self {
        Self {
            policies,
            seen: Mutex::new(HashSet::new()),
        }
    }

    pub fn policy(&self, policy_id: &str) -> Option<&Policy> {
        self.policies.iter().find(|p| p.policy_id == policy_id)
    }

    /// Total violations reported over the agent's lifetime.
    pub fn violation_count(&self) -> usize {
        match self.seen.lock() {
            Ok(guard) => guard.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }
}

impl Default for ComplianceAgent {
    fn default() -> Self {
        Self::new()
    }
}

impl DetectionAgent for ComplianceAgent {
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
        let mut hits: Vec<PolicyHit> = Vec::new();

        for event in &snapshot.events {
            for policy in &self.policies {
                if !(policy.check)(event) {
                    continue;
                }
                let key = (policy.policy_id.to_string(), event.event_id.clone());
                {
                    let mut seen = match self.seen.lock() {
                        Ok(guard) => guard,
                        Err(poisoned) => poisoned.into_inner(),
                    };
                    if !seen.insert(key) {
                        continue;
                    }
                }

                let hit = board.add_policy_hit(
                    cycle_id,
                    PolicyHitDraft {
                        policy_id: policy.policy_id.to_string(),
                        event_id: event.event_id.clone(),
                        violation_type: ViolationType::Silent,
                        agent: Self::AGENT_NAME.to_string(),
                        description: format!(
                            "Event {} by {} violated policy '{}': {}",
                            event.event_id, event.actor, policy.name, policy.rationale
                        ),
                        timestamp: event.timestamp,
                    },
                )?;
                hits.push(hit);
            }
        }

        if !hits.is_empty() {
            debug!(hits = hits.len(), "policy violations detected");
        }
        report.policy_hits = hits;
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, TimeZone, Utc};
    use serde_json::{json, Map};

    fn at_hour(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 3, hour, 15, 0).single().unwrap()
    }

    fn event(id: &str, kind: EventKind, actor: &str) -> ObservedEvent {
        ObservedEvent {
            event_id: id.to_string(),
            kind,
            workflow_id: None,
            actor: actor.to_string(),
            resource: None,
            timestamp: at_hour(11),
            metadata: Map::new(),
            observed_at: at_hour(11),
        }
    }

    fn run(agent: &ComplianceAgent, events: Vec<ObservedEvent>) -> Vec<PolicyHit> {
        let board = Blackboard::in_memory();
        let cycle_id = board.start_cycle().unwrap();
        let snapshot = ObservationSnapshot {
            events,
            metrics: Vec::new(),
        };
        agent
            .analyze(&snapshot, &cycle_id, &board)
            .unwrap()
            .policy_hits
    }

    #[test]
    fn after_hours_write_at_0215_hits_two_policies() {
        let mut e = event("evt_night", EventKind::AccessWrite, "user_bob");
        e.timestamp = at_hour(2);
        e.resource = Some("sensitive_db".to_string());

        let hits = run(&ComplianceAgent::new(), vec![e]);
        let ids: Vec<&str> = hits.iter().map(|h| h.policy_id.as_str()).collect();
        assert!(ids.contains(&"NO_AFTER_HOURS_WRITE"));
        assert!(ids.contains(&"NO_UNCONTROLLED_SENSITIVE_ACCESS"));
        assert!(hits.iter().all(|h| h.violation_type == ViolationType::Silent));
    }

    #[test]
    fn business_hours_write_is_clean() {
        let mut e = event("evt_day", EventKind::AccessWrite, "user_bob");
        e.resource = Some("repo_main".to_string());
        assert!(run(&ComplianceAgent::new(), vec![e]).is_empty());
    }

    #[test]
    fn untrusted_location_flagged() {
        let mut e = event("evt_vpn", EventKind::CredentialAccess, "user_carol");
        e.metadata.insert("location".to_string(), json!("unknown_vpn"));
        let hits = run(&ComplianceAgent::new(), vec![e]);
        assert!(hits.iter().any(|h| h.policy_id == "NO_UNUSUAL_LOCATION"));
    }

    #[test]
    fn service_account_write_flagged() {
        let e = event("evt_svc", EventKind::AccessWrite, "svc_account_01");
        let hits = run(&ComplianceAgent::new(), vec![e]);
        assert!(hits.iter().any(|h| h.policy_id == "NO_SVC_ACCOUNT_WRITE"));
    }

    #[test]
    fn approval_skip_flagged_from_step_metadata() {
        let mut e = event("evt_skip", EventKind::WorkflowStepSkip, "user_alice");
        e.workflow_id = Some("wf_deploy_1".to_string());
        e.metadata.insert("step".to_string(), json!("approval"));
        let hits = run(&ComplianceAgent::new(), vec![e]);
        assert!(hits.iter().any(|h| h.policy_id == "NO_SKIP_APPROVAL"));
    }

    #[test]
    fn repeated_windows_do_not_reemit() {
        let agent = ComplianceAgent::new();
        let e = event("evt_svc", EventKind::AccessWrite, "svc_account_01");

        let first = run(&agent, vec![e.clone()]);
        assert_eq!(first.len(), 1);
        // Same event re-observed in the next cycle's window: no new hit.
        let second = run(&agent, vec![e]);
        assert!(second.is_empty());
        assert_eq!(agent.violation_count(), 1);
    }

    #[test]
    fn workflow_bound_sensitive_access_is_allowed() {
        let mut e = event("evt_wf", EventKind::AccessWrite, "user_alice");
        e.timestamp = at_hour(10);
        e.workflow_id = Some("wf_deploy_1".to_string());
        e.resource = Some("production_db".to_string());
        let hits = run(&ComplianceAgent::new(), vec![e]);
        assert!(hits
            .iter()
            .all(|h| h.policy_id != "NO_UNCONTROLLED_SENSITIVE_ACCESS"));
    }
}

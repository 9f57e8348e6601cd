//! Architectural guards
//!
//! Safety checks that keep the reasoning honest:
//!
//! - Observations are pure facts: ingest rejects any event whose metadata
//!   already carries interpretation (severity, risk, anomaly, alert,
//!   priority). Detection derives those; producers never assert them.
//! - Every anomaly, every recommendation, and every insight must point at
//!   evidence.
//!
//! These are plain data validators invoked at the write boundaries, not
//! trait machinery.

use serde_json::{Map, Value};
use thiserror::Error;

/// Metadata keys that would smuggle interpretation into a raw observation.
pub const FORBIDDEN_METADATA_KEYS: [&str; 5] =
    ["severity", "risk", "anomaly", "alert", "priority"];

#[derive(Debug, Error)]
pub enum GuardError {
    #[error(
        "event metadata contains forbidden field '{0}': events must be pure facts with no interpretation"
    )]
    InterpretedEvent(String),

    #[error("{0} has no evidence: every claim must point to evidence")]
    MissingEvidence(&'static str),
}

/// Reject events whose metadata top-level keys intersect the forbidden set.
pub fn check_event_metadata(metadata: &Map<String, Value>) -> Result<(), GuardError> {
    for key in FORBIDDEN_METADATA_KEYS {
        if metadata.contains_key(key) {
            return Err(GuardError::InterpretedEvent(key.to_string()));
        }
    }
    Ok(())
}

/// Anomalies without evidence fail loudly at the blackboard boundary.
pub fn check_anomaly_evidence(evidence: &[String]) -> Result<(), GuardError> {
    if evidence.is_empty() {
        return Err(GuardError::MissingEvidence("anomaly"));
    }
    Ok(())
}

/// Recommendations without evidence fail loudly at the blackboard boundary.
pub fn check_recommendation_evidence(evidence_ids: &[String]) -> Result<(), GuardError> {
    if evidence_ids.is_empty() {
        return Err(GuardError::MissingEvidence("recommendation"));
    }
    Ok(())
}

/// Insights without evidence fail loudly at materialization.
pub fn check_insight_evidence(evidence_count: usize) -> Result<(), GuardError> {
    if evidence_count == 0 {
        return Err(GuardError::MissingEvidence("insight"));
    }
    Ok(())
}

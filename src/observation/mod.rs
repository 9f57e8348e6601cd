//! Observation Layer — raw facts only
//!
//! Ingests events and metrics, stores them append-only and time-ordered, and
//! serves windowed queries. Forbidden here: aggregation, interpretation,
//! reasoning. This layer is the bridge between producers and the reasoning
//! loop.
//!
//! ## Design
//!
//! - Hot path: bounded in-memory ring buffers (default 5000 per kind) serve
//!   the "last-N" reads the reasoning cycle is latency-bound on.
//! - Durable path: a JSONL append log (`store::ObservationLog`) exists for
//!   warm restart and out-of-band queries. Log writes are best-effort and
//!   independent of the in-memory insert: a log failure never drops the
//!   buffered record nor fails the call.
//! - Every event passes the no-interpretation guard before insertion.

pub mod store;

use std::collections::VecDeque;
use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, warn};

use crate::guards::{self, GuardError};

/// Default bound for each in-memory buffer (events and metrics separately).
pub const DEFAULT_BUFFER_CAPACITY: usize = 5000;

/// Default result cap for windowed queries.
pub const DEFAULT_WINDOW_LIMIT: usize = 1000;

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum ObservationError {
    /// The observation failed the no-interpretation guard. Nothing was written.
    #[error("ingest rejected: {0}")]
    IngestRejected(#[from] GuardError),
}

// ============================================================================
// Event / Metric Records
// ============================================================================

/// Fixed vocabulary of raw event kinds accepted at the ingest boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventKind {
    WorkflowStart,
    WorkflowStepStart,
    WorkflowStepComplete,
    WorkflowStepSkip,
    WorkflowComplete,
    AccessRead,
    AccessWrite,
    AccessDelete,
    ResourceAllocate,
    ResourceRelease,
    ConfigChange,
    CredentialAccess,
    Login,
    Logout,
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            EventKind::WorkflowStart => "WORKFLOW_START",
            EventKind::WorkflowStepStart => "WORKFLOW_STEP_START",
            EventKind::WorkflowStepComplete => "WORKFLOW_STEP_COMPLETE",
            EventKind::WorkflowStepSkip => "WORKFLOW_STEP_SKIP",
            EventKind::WorkflowComplete => "WORKFLOW_COMPLETE",
            EventKind::AccessRead => "ACCESS_READ",
            EventKind::AccessWrite => "ACCESS_WRITE",
            EventKind::AccessDelete => "ACCESS_DELETE",
            EventKind::ResourceAllocate => "RESOURCE_ALLOCATE",
            EventKind::ResourceRelease => "RESOURCE_RELEASE",
            EventKind::ConfigChange => "CONFIG_CHANGE",
            EventKind::CredentialAccess => "CREDENTIAL_ACCESS",
            EventKind::Login => "LOGIN",
            EventKind::Logout => "LOGOUT",
        };
        write!(f, "{s}")
    }
}

/// Producer-facing event envelope (what arrives at the ingest boundary).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub event_id: String,
    #[serde(rename = "type")]
    pub kind: EventKind,
    #[serde(default)]
    pub workflow_id: Option<String>,
    pub actor: String,
    #[serde(default)]
    pub resource: Option<String>,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

/// An observed event — a raw fact, stamped with ingest time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservedEvent {
    pub event_id: String,
    #[serde(rename = "type")]
    pub kind: EventKind,
    pub workflow_id: Option<String>,
    pub actor: String,
    pub resource: Option<String>,
    /// Event wall clock (producer-asserted).
    pub timestamp: DateTime<Utc>,
    pub metadata: Map<String, Value>,
    /// Ingest wall clock.
    pub observed_at: DateTime<Utc>,
}

/// Producer-facing metric envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricEnvelope {
    pub resource_id: String,
    pub metric_name: String,
    pub value: f64,
    pub timestamp: DateTime<Utc>,
}

/// An observed metric — a raw measurement, stamped with ingest time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservedMetric {
    pub resource_id: String,
    pub metric_name: String,
    pub value: f64,
    pub timestamp: DateTime<Utc>,
    pub observed_at: DateTime<Utc>,
}

// ============================================================================
// Window Queries
// ============================================================================

/// Filterable window query over buffered events.
#[derive(Debug, Clone, Default)]
pub struct EventWindow {
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    pub kind: Option<EventKind>,
    pub workflow_id: Option<String>,
    pub limit: Option<usize>,
}

/// Filterable window query over buffered metrics.
#[derive(Debug, Clone, Default)]
pub struct MetricWindow {
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    pub resource_id: Option<String>,
    pub metric_name: Option<String>,
    pub limit: Option<usize>,
}

// ============================================================================
// Observation Layer
// ============================================================================

struct Buffers {
    events: VecDeque<ObservedEvent>,
    metrics: VecDeque<ObservedMetric>,
}

/// The Observation Layer.
///
/// Rules: append-only, time-ordered, no aggregation. One per process,
/// constructed at startup and shared by reference.
pub struct ObservationLayer {
    buffers: Mutex<Buffers>,
    log: Option<store::ObservationLog>,
    capacity: usize,
}

impl ObservationLayer {
    /// In-memory only layer (tests, ephemeral deployments).
    pub fn in_memory(capacity: usize) -> Self {
        Self {
            buffers: Mutex::new(Buffers {
                events: VecDeque::with_capacity(capacity.min(1024)),
                metrics: VecDeque::with_capacity(capacity.min(1024)),
            }),
            log: None,
            capacity,
        }
    }

    /// Layer backed by a durable JSONL log at `path`.
    ///
    /// Existing records are replayed into the buffers (warm restart). A log
    /// that cannot be opened degrades to in-memory operation with a warning;
    /// durability is best-effort by contract.
    pub fn with_log(path: impl AsRef<Path>, capacity: usize) -> Self {
        let layer = Self::in_memory(capacity);
        match store::ObservationLog::open(path.as_ref()) {
            Ok(log) => {
                let (events, metrics) = log.replay();
                {
                    let mut buffers = lock_buffers(&layer.buffers);
                    for event in events {
                        push_bounded(&mut buffers.events, event, capacity);
                    }
                    for metric in metrics {
                        push_bounded(&mut buffers.metrics, metric, capacity);
                    }
                }
                Self { log: Some(log), ..layer }
            }
            Err(err) => {
                warn!(error = %err, path = %path.as_ref().display(),
                    "observation log unavailable, running in-memory only");
                layer
            }
        }
    }

    // ────────────────────────────────────────────────────────────────────
    // Ingest
    // ────────────────────────────────────────────────────────────────────

    /// Ingest a raw event. No interpretation.
    ///
    /// Fails with [`ObservationError::IngestRejected`] (and performs no
    /// write) when the envelope's metadata carries interpretation fields.
    pub fn observe_event(&self, envelope: EventEnvelope) -> Result<ObservedEvent, ObservationError> {
        guards::check_event_metadata(&envelope.metadata)?;

        let observed = ObservedEvent {
            event_id: envelope.event_id,
            kind: envelope.kind,
            workflow_id: envelope.workflow_id,
            actor: envelope.actor,
            resource: envelope.resource,
            timestamp: envelope.timestamp,
            metadata: envelope.metadata,
            observed_at: Utc::now(),
        };

        {
            let mut buffers = lock_buffers(&self.buffers);
            push_bounded(&mut buffers.events, observed.clone(), self.capacity);
        }

        if let Some(log) = &self.log {
            if let Err(err) = log.append_event(&observed) {
                debug!(error = %err, event_id = %observed.event_id,
                    "observation log append failed (event kept in memory)");
            }
        }

        Ok(observed)
    }

    /// Ingest a raw metric. No interpretation.
    pub fn observe_metric(&self, envelope: MetricEnvelope) -> ObservedMetric {
        let observed = ObservedMetric {
            resource_id: envelope.resource_id,
            metric_name: envelope.metric_name,
            value: envelope.value,
            timestamp: envelope.timestamp,
            observed_at: Utc::now(),
        };

        {
            let mut buffers = lock_buffers(&self.buffers);
            push_bounded(&mut buffers.metrics, observed.clone(), self.capacity);
        }

        if let Some(log) = &self.log {
            if let Err(err) = log.append_metric(&observed) {
                debug!(error = %err, resource_id = %observed.resource_id,
                    "observation log append failed (metric kept in memory)");
            }
        }

        observed
    }

    // ────────────────────────────────────────────────────────────────────
    // Queries
    // ────────────────────────────────────────────────────────────────────

    /// Most recent N events, newest first.
    pub fn get_recent_events(&self, count: usize) -> Vec<ObservedEvent> {
        let buffers = lock_buffers(&self.buffers);
        buffers.events.iter().rev().take(count).cloned().collect()
    }

    /// Most recent N metrics, newest first.
    pub fn get_recent_metrics(&self, count: usize) -> Vec<ObservedMetric> {
        let buffers = lock_buffers(&self.buffers);
        buffers.metrics.iter().rev().take(count).cloned().collect()
    }

    /// Query events in a time window, newest first. No aggregation.
    pub fn event_window(&self, window: &EventWindow) -> Vec<ObservedEvent> {
        let limit = window.limit.unwrap_or(DEFAULT_WINDOW_LIMIT);
        let buffers = lock_buffers(&self.buffers);
        buffers
            .events
            .iter()
            .rev()
            .filter(|e| window.start.is_none_or(|s| e.timestamp >= s))
            .filter(|e| window.end.is_none_or(|t| e.timestamp <= t))
            .filter(|e| window.kind.is_none_or(|k| e.kind == k))
            .filter(|e| {
                window
                    .workflow_id
                    .as_deref()
                    .is_none_or(|w| e.workflow_id.as_deref() == Some(w))
            })
            .take(limit)
            .cloned()
            .collect()
    }

    /// Query metrics in a time window, newest first. No aggregation.
    pub fn metric_window(&self, window: &MetricWindow) -> Vec<ObservedMetric> {
        let limit = window.limit.unwrap_or(DEFAULT_WINDOW_LIMIT);
        let buffers = lock_buffers(&self.buffers);
        buffers
            .metrics
            .iter()
            .rev()
            .filter(|m| window.start.is_none_or(|s| m.timestamp >= s))
            .filter(|m| window.end.is_none_or(|t| m.timestamp <= t))
            .filter(|m| {
                window
                    .resource_id
                    .as_deref()
                    .is_none_or(|r| m.resource_id == r)
            })
            .filter(|m| {
                window
                    .metric_name
                    .as_deref()
                    .is_none_or(|n| m.metric_name == n)
            })
            .take(limit)
            .cloned()
            .collect()
    }

    /// Buffered record counts `(events, metrics)`.
    pub fn buffered_counts(&self) -> (usize, usize) {
        let buffers = lock_buffers(&self.buffers);
        (buffers.events.len(), buffers.metrics.len())
    }

    /// Drop all buffered observations (tests only; the durable log is kept).
    pub fn clear(&self) {
        let mut buffers = lock_buffers(&self.buffers);
        buffers.events.clear();
        buffers.metrics.clear();
    }
}

fn lock_buffers(lock: &Mutex<Buffers>) -> std::sync::MutexGuard<'_, Buffers> {
    // A poisoned buffer lock means a panic mid-push; the buffers themselves
    // are always left structurally valid, so recover the guard.
    match lock.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

fn push_bounded<T>(buffer: &mut VecDeque<T>, item: T, capacity: usize) {
    buffer.push_back(item);
    while buffer.len() > capacity {
        buffer.pop_front();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn event(id: &str, kind: EventKind) -> EventEnvelope {
        EventEnvelope {
            event_id: id.to_string(),
            kind,
            workflow_id: None,
            actor: "user_alice".to_string(),
            resource: None,
            timestamp: Utc::now(),
            metadata: Map::new(),
        }
    }

    fn metric(resource: &str, name: &str, value: f64) -> MetricEnvelope {
        MetricEnvelope {
            resource_id: resource.to_string(),
            metric_name: name.to_string(),
            value,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn ingest_and_recent_order() {
        let layer = ObservationLayer::in_memory(100);
        for i in 0..5 {
            layer
                .observe_event(event(&format!("evt_{i}"), EventKind::Login))
                .unwrap();
        }
        let recent = layer.get_recent_events(3);
        assert_eq!(recent.len(), 3);
        assert_eq!(recent[0].event_id, "evt_4"); // newest first
        assert_eq!(recent[2].event_id, "evt_2");
    }

    #[test]
    fn buffer_trims_from_head() {
        let layer = ObservationLayer::in_memory(3);
        for i in 0..10 {
            layer.observe_metric(metric("vm_api_01", "cpu_usage", i as f64));
        }
        let (events, metrics) = layer.buffered_counts();
        assert_eq!(events, 0);
        assert_eq!(metrics, 3);
        let recent = layer.get_recent_metrics(10);
        assert_eq!(recent[0].value, 9.0);
        assert_eq!(recent[2].value, 7.0);
    }

    #[test]
    fn guard_rejects_interpreted_event_without_write() {
        let layer = ObservationLayer::in_memory(100);
        let mut envelope = event("evt_bad", EventKind::AccessWrite);
        envelope
            .metadata
            .insert("severity".to_string(), json!("high"));

        let result = layer.observe_event(envelope);
        assert!(matches!(result, Err(ObservationError::IngestRejected(_))));
        assert_eq!(layer.buffered_counts().0, 0);
    }

    #[test]
    fn window_filters_by_kind_and_workflow() {
        let layer = ObservationLayer::in_memory(100);
        let mut e1 = event("evt_1", EventKind::WorkflowStepComplete);
        e1.workflow_id = Some("wf_deploy_1".to_string());
        layer.observe_event(e1).unwrap();
        layer.observe_event(event("evt_2", EventKind::Login)).unwrap();

        let hits = layer.event_window(&EventWindow {
            kind: Some(EventKind::WorkflowStepComplete),
            workflow_id: Some("wf_deploy_1".to_string()),
            ..EventWindow::default()
        });
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].event_id, "evt_1");
    }

    #[test]
    fn metric_window_filters_by_resource_and_name() {
        let layer = ObservationLayer::in_memory(100);
        layer.observe_metric(metric("vm_api_01", "cpu_usage", 50.0));
        layer.observe_metric(metric("vm_api_01", "memory_usage", 60.0));
        layer.observe_metric(metric("vm_web_01", "cpu_usage", 70.0));

        let hits = layer.metric_window(&MetricWindow {
            resource_id: Some("vm_api_01".to_string()),
            metric_name: Some("cpu_usage".to_string()),
            ..MetricWindow::default()
        });
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].value, 50.0);
    }

    #[test]
    fn durable_log_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("observations.jsonl");

        {
            let layer = ObservationLayer::with_log(&path, 100);
            layer
                .observe_event(event("evt_persist", EventKind::ConfigChange))
                .unwrap();
            layer.observe_metric(metric("vm_db_01", "disk_usage", 81.0));
        }

        let restarted = ObservationLayer::with_log(&path, 100);
        let (events, metrics) = restarted.buffered_counts();
        assert_eq!(events, 1);
        assert_eq!(metrics, 1);
        assert_eq!(restarted.get_recent_events(1)[0].event_id, "evt_persist");
    }
}

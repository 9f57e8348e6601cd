//! Durable observation log — JSONL append file
//!
//! One record per line, discriminated by `record_type` ("event" | "metric").
//! The log is a warm-restart and audit artifact; the in-memory buffers stay
//! authoritative for the running process. Corrupt or partial lines are
//! skipped on replay.

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use super::{ObservedEvent, ObservedMetric};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Line format of the observation log.
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "record_type", rename_all = "snake_case")]
enum LogRecord {
    Event(ObservedEvent),
    Metric(ObservedMetric),
}

/// Append-only JSONL log of observations.
pub struct ObservationLog {
    path: PathBuf,
    file: Mutex<File>,
}

impl ObservationLog {
    /// Open (or create) the log at `path`, creating parent directories.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            file: Mutex::new(file),
        })
    }

    /// Append one event record.
    pub fn append_event(&self, event: &ObservedEvent) -> Result<(), StoreError> {
        self.append(&LogRecord::Event(event.clone()))
    }

    /// Append one metric record.
    pub fn append_metric(&self, metric: &ObservedMetric) -> Result<(), StoreError> {
        self.append(&LogRecord::Metric(metric.clone()))
    }

    fn append(&self, record: &LogRecord) -> Result<(), StoreError> {
        let mut line = serde_json::to_string(record)?;
        line.push('\n');
        let mut file = match self.file.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        file.write_all(line.as_bytes())?;
        Ok(())
    }

    /// Replay every parseable record in the log, in write order.
    ///
    /// Unparseable lines (partial writes, manual edits) are skipped with a
    /// debug note rather than failing the restart.
    pub fn replay(&self) -> (Vec<ObservedEvent>, Vec<ObservedMetric>) {
        let mut events = Vec::new();
        let mut metrics = Vec::new();

        let file = match File::open(&self.path) {
            Ok(f) => f,
            Err(_) => return (events, metrics),
        };

        for (line_no, line) in BufReader::new(file).lines().enumerate() {
            let Ok(line) = line else { break };
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<LogRecord>(&line) {
                Ok(LogRecord::Event(e)) => events.push(e),
                Ok(LogRecord::Metric(m)) => metrics.push(m),
                Err(err) => {
                    debug!(line = line_no + 1, error = %err, "skipping unparseable log line");
                }
            }
        }

        (events, metrics)
    }
}

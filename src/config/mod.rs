//! Engine configuration
//!
//! TOML-backed configuration with full defaults: a missing file or a missing
//! section falls back to defaults, so a bare `vigil-os` starts with sane
//! behavior and zero external features. Validation catches the obviously
//! broken knobs at startup rather than mid-cycle.

pub mod defaults;

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::blackboard::RiskState;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("cannot parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Top-level engine configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub observation: ObservationConfig,
    pub blackboard: BlackboardConfig,
    pub mcp: McpSection,
    pub alerts: AlertsConfig,
    pub features: FeatureFlags,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ObservationConfig {
    /// In-memory buffer bound per record kind.
    pub buffer_capacity: usize,
    /// JSONL observation log path; empty disables durability.
    pub log_path: String,
}

impl Default for ObservationConfig {
    fn default() -> Self {
        Self {
            buffer_capacity: defaults::OBSERVATION_BUFFER_CAPACITY,
            log_path: defaults::OBSERVATION_LOG_PATH.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BlackboardConfig {
    /// JSONL cycle log path; empty disables durability.
    pub cycle_log_path: String,
}

impl Default for BlackboardConfig {
    fn default() -> Self {
        Self {
            cycle_log_path: defaults::CYCLE_LOG_PATH.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct McpSection {
    /// Seconds between reasoning cycles.
    pub cycle_interval_secs: u64,
    /// Optional per-cycle detection deadline in milliseconds (0 = none).
    pub cycle_deadline_ms: u64,
    /// Timeout for each external mirror task, in seconds.
    pub mirror_timeout_secs: u64,
}

impl Default for McpSection {
    fn default() -> Self {
        Self {
            cycle_interval_secs: defaults::CYCLE_INTERVAL_SECS,
            cycle_deadline_ms: 0,
            mirror_timeout_secs: defaults::MIRROR_TIMEOUT_SECS,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertsConfig {
    pub min_severity: String,
    pub min_risk_state: RiskState,
    pub cooldown_seconds: i64,
}

impl Default for AlertsConfig {
    fn default() -> Self {
        Self {
            min_severity: "HIGH".to_string(),
            min_risk_state: RiskState::Violation,
            cooldown_seconds: defaults::ALERT_COOLDOWN_SECS,
        }
    }
}

/// Independent on/off switches for every external collaborator. Off means
/// the no-op provider; all core behavior must hold with everything off.
///
/// The last three flags exist so configs from wider deployments parse
/// cleanly; in this build they select no alternative behavior (generative
/// layers are rephrase-only and default off).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureFlags {
    pub graph_sink: bool,
    pub alert_gate: bool,
    pub llm_polish: bool,
    pub agent_graph_runtime: bool,
    pub crew_explanation: bool,
    pub crew_query: bool,
}

impl EngineConfig {
    /// Load from a TOML file; a missing file yields defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            info!(path = %path.display(), "no config file, using defaults");
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&raw)?;
        config.validate()?;
        info!(path = %path.display(), "configuration loaded");
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.observation.buffer_capacity == 0 {
            return Err(ConfigError::Invalid(
                "observation.buffer_capacity must be at least 1".to_string(),
            ));
        }
        if self.mcp.cycle_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "mcp.cycle_interval_secs must be at least 1".to_string(),
            ));
        }
        match self.alerts.min_severity.to_uppercase().as_str() {
            "LOW" | "MEDIUM" | "HIGH" | "CRITICAL" => {}
            other => {
                return Err(ConfigError::Invalid(format!(
                    "alerts.min_severity '{other}' is not one of LOW/MEDIUM/HIGH/CRITICAL"
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_are_valid() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(
            config.observation.buffer_capacity,
            defaults::OBSERVATION_BUFFER_CAPACITY
        );
        assert!(!config.features.graph_sink);
    }

    #[test]
    fn missing_file_yields_defaults() {
        let config = EngineConfig::load("/definitely/not/here.toml").unwrap();
        assert_eq!(config.mcp.cycle_interval_secs, defaults::CYCLE_INTERVAL_SECS);
    }

    #[test]
    fn partial_file_fills_from_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vigil.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "[mcp]\ncycle_interval_secs = 3").unwrap();
        writeln!(file, "[features]\nalert_gate = true").unwrap();

        let config = EngineConfig::load(&path).unwrap();
        assert_eq!(config.mcp.cycle_interval_secs, 3);
        assert!(config.features.alert_gate);
        assert_eq!(
            config.observation.buffer_capacity,
            defaults::OBSERVATION_BUFFER_CAPACITY
        );
    }

    #[test]
    fn invalid_values_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vigil.toml");
        std::fs::write(&path, "[observation]\nbuffer_capacity = 0\n").unwrap();
        assert!(matches!(
            EngineConfig::load(&path),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn alert_severity_names_validated() {
        let mut config = EngineConfig::default();
        config.alerts.min_severity = "PANIC".to_string();
        assert!(config.validate().is_err());
    }
}

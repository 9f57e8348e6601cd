//! Built-in configuration defaults

/// In-memory observation buffer bound, per record kind.
pub const OBSERVATION_BUFFER_CAPACITY: usize = 5000;

/// Default durable observation log location.
pub const OBSERVATION_LOG_PATH: &str = "data/observations.jsonl";

/// Default durable cycle log location.
pub const CYCLE_LOG_PATH: &str = "data/cycles.jsonl";

/// Seconds between reasoning cycles when running the service loop.
pub const CYCLE_INTERVAL_SECS: u64 = 10;

/// Timeout for each external mirror task (graph sink, alert gate).
pub const MIRROR_TIMEOUT_SECS: u64 = 5;

/// Cooldown between outbound alerts.
pub const ALERT_COOLDOWN_SECS: i64 = 300;

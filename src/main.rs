//! VIGIL-OS - Cognitive Observability Engine
//!
//! Runs the reasoning loop as a long-lived service: construct the
//! per-process singletons (observation layer, blackboard, MCP), then drive
//! `run_cycle` on the configured interval until shutdown.
//!
//! # Usage
//!
//! ```bash
//! # Run with defaults (in-process loop, durable logs under ./data)
//! cargo run --release
//!
//! # One-shot: run N cycles and exit (useful for smoke tests)
//! vigil-os --cycles 3
//!
//! # Inject a stress scenario at startup, then keep cycling
//! vigil-os --inject CASCADING_FAILURE
//! ```
//!
//! # Environment Variables
//!
//! - `RUST_LOG`: Logging filter (default: info)

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use vigil_os::agents::ScenarioInjector;
use vigil_os::config::EngineConfig;
use vigil_os::mcp::{MasterControl, McpConfig};
use vigil_os::sinks::{AlertGate, AlertGateConfig, NoopNotifier};
use vigil_os::{Blackboard, ObservationLayer};

// ============================================================================
// CLI Arguments
// ============================================================================

#[derive(Parser, Debug)]
#[command(name = "vigil-os")]
#[command(about = "VIGIL-OS Cognitive Observability Engine")]
#[command(version)]
struct CliArgs {
    /// Path to the TOML configuration file
    #[arg(short, long, default_value = "vigil.toml")]
    config: String,

    /// Override the cycle interval (seconds)
    #[arg(long)]
    interval: Option<u64>,

    /// Run exactly N cycles, then exit (0 = run forever)
    #[arg(long, default_value = "0")]
    cycles: u64,

    /// Inject a named stress scenario before the first cycle
    /// (LATENCY_SPIKE, COMPLIANCE_BREACH, WORKLOAD_SURGE,
    /// CASCADING_FAILURE, RESOURCE_DRIFT)
    #[arg(long)]
    inject: Option<String>,

    /// Disable durable logs (in-memory operation only)
    #[arg(long)]
    ephemeral: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = CliArgs::parse();
    let config = EngineConfig::load(&args.config).context("loading configuration")?;

    info!(version = env!("CARGO_PKG_VERSION"), "VIGIL-OS starting");

    // Per-process singletons, constructed once and shared by reference.
    let observation = Arc::new(if args.ephemeral || config.observation.log_path.is_empty() {
        ObservationLayer::in_memory(config.observation.buffer_capacity)
    } else {
        ObservationLayer::with_log(
            &config.observation.log_path,
            config.observation.buffer_capacity,
        )
    });
    let board = Arc::new(if args.ephemeral || config.blackboard.cycle_log_path.is_empty() {
        Blackboard::in_memory()
    } else {
        Blackboard::with_log(&config.blackboard.cycle_log_path)
    });

    let alert_gate = Arc::new(AlertGate::new(
        AlertGateConfig {
            enabled: config.features.alert_gate,
            min_severity: config.alerts.min_severity.clone(),
            min_risk_state: config.alerts.min_risk_state,
            cooldown_seconds: config.alerts.cooldown_seconds,
        },
        Box::new(NoopNotifier),
    ));

    let mcp = MasterControl::new(observation.clone(), board.clone())
        .with_alert_gate(alert_gate)
        .with_config(McpConfig {
            cycle_deadline: match config.mcp.cycle_deadline_ms {
                0 => None,
                ms => Some(Duration::from_millis(ms)),
            },
            mirror_timeout: Duration::from_secs(config.mcp.mirror_timeout_secs),
        });

    if let Some(scenario) = &args.inject {
        let injector = ScenarioInjector::new();
        let execution = injector
            .inject(scenario, &observation)
            .with_context(|| format!("injecting scenario {scenario}"))?;
        info!(
            scenario = %execution.scenario,
            events = execution.events_injected,
            metrics = execution.metrics_injected,
            "startup scenario injected"
        );
    }

    let interval_secs = args.interval.unwrap_or(config.mcp.cycle_interval_secs);
    let mut interval = tokio::time::interval(Duration::from_secs(interval_secs.max(1)));
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    let mut completed: u64 = 0;
    info!(interval_secs, "reasoning loop started");

    loop {
        tokio::select! {
            _ = interval.tick() => {
                match mcp.run_cycle().await {
                    Ok(result) => {
                        completed += 1;
                        if let Some(insight) = &result.insight {
                            info!(
                                cycle_id = %result.cycle_id,
                                severity = %insight.severity,
                                confidence = format!("{:.2}", insight.confidence),
                                "{}", insight.summary
                            );
                        }
                        if args.cycles > 0 && completed >= args.cycles {
                            info!(completed, "requested cycle count reached");
                            break;
                        }
                    }
                    Err(err) => {
                        warn!(error = %err, "cycle failed; loop continues");
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("shutdown signal received");
                break;
            }
        }
    }

    let state = mcp.brain_state();
    info!(
        cycles = state.total_cycles_completed,
        pulse = %state.system_pulse,
        "VIGIL-OS stopped"
    );
    Ok(())
}

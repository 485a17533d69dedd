//! Engine wiring and the final run report.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::Result;
use serde::Serialize;
use tracing::info;

use arpwarden_core::{ArpWardenConfig, HealthStatus};
use arpwarden_engine::{DetectionEngine, EngineStats};

use crate::context::ProcArpContextProvider;
use crate::replay::ReplaySummary;
use crate::rules::{self, DEFAULT_FLOOD_THRESHOLD, LoggingAlertSink};

/// A built engine together with the counter of alerts it has logged.
pub struct Daemon {
    pub engine: DetectionEngine,
    pub alerts: Arc<AtomicU64>,
}

impl Daemon {
    /// Build the engine from a validated config.
    ///
    /// The executor kind comes from `engine.executor`. The kernel ARP table
    /// backs the detection context.
    pub fn build(config: &ArpWardenConfig) -> Result<Self> {
        let sink = LoggingAlertSink::new();
        let alerts = sink.counter();

        let builder = DetectionEngine::builder()
            .config(config.engine.clone())
            .context_provider(ProcArpContextProvider::from_config(&config.context));
        let engine = rules::register_builtin_rules(builder, DEFAULT_FLOOD_THRESHOLD)
            .alert_sink(sink)
            .build()
            .map_err(|e| anyhow::anyhow!("failed to build detection engine: {}", e))?;

        info!(
            executor = %engine.executor_kind(),
            arp_table = %config.context.arp_table_path,
            "engine initialized"
        );
        Ok(Self { engine, alerts })
    }

    /// Snapshot the engine and replay outcome for printing.
    pub fn report(&self, replay: Option<ReplaySummary>, completed: bool) -> RunReport {
        RunReport {
            replay,
            completed,
            alerts_emitted: self.alerts.load(Ordering::Relaxed),
            health: self.engine.health(),
            engine: self.engine.stats(),
        }
    }
}

/// Report printed to stdout as JSON before shutdown.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    /// `None` when interrupted before the replay finished
    pub replay: Option<ReplaySummary>,
    /// Whether every submitted rule task finished before the wait timed out
    pub completed: bool,
    pub alerts_emitted: u64,
    pub health: HealthStatus,
    pub engine: EngineStats,
}

//! Episode maintenance: lifecycle sweep and prune

use crate::error::Result;
use crate::orchestrator::Orchestrator;
use crate::pulses::Pulse;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;

/// Maintenance configuration
#[derive(Debug, Clone)]
pub struct MaintenanceConfig {
    /// Mark expired active episodes dormant
    pub sweep_lifecycle: bool,
    /// Delete episodes expired past the prune grace
    pub prune: bool,
    /// Period of the background task
    pub interval: Duration,
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            sweep_lifecycle: true,
            prune: true,
            interval: Duration::from_secs(3600),
        }
    }
}

/// Maintenance report
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaintenanceReport {
    /// Episodes that became dormant
    pub dormant: usize,
    /// Episodes permanently deleted
    pub pruned: usize,
    pub duration_ms: u64,
}

/// Run one maintenance pass: sweep first, then prune
pub async fn run_maintenance(
    orchestrator: &Orchestrator,
    config: &MaintenanceConfig,
    now: DateTime<Utc>,
) -> Result<MaintenanceReport> {
    let started = Instant::now();
    let mut report = MaintenanceReport::default();

    if config.sweep_lifecycle {
        report.dormant = orchestrator.sweep_lifecycle(now).await?;
    }

    if config.prune {
        report.pruned = orchestrator.prune_expired(now).await?;
    }

    report.duration_ms = started.elapsed().as_millis() as u64;
    tracing::debug!(
        dormant = report.dormant,
        pruned = report.pruned,
        duration_ms = report.duration_ms,
        "maintenance pass finished"
    );

    orchestrator
        .pulses()
        .emit(Pulse::MaintenanceCompleted {
            dormant: report.dormant,
            pruned: report.pruned,
            duration_ms: report.duration_ms,
            timestamp: now,
        })
        .await;

    Ok(report)
}

/// Run maintenance on a fixed interval until the handle is aborted.
/// A failed pass is logged and the loop keeps going.
pub fn spawn_maintenance(
    orchestrator: Arc<Orchestrator>,
    config: MaintenanceConfig,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(config.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            if let Err(e) = run_maintenance(&orchestrator, &config, Utc::now()).await {
                tracing::error!(error = %e, "maintenance pass failed");
            }
        }
    })
}

/// Builder for maintenance config
pub struct MaintenanceConfigBuilder {
    config: MaintenanceConfig,
}

impl MaintenanceConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: MaintenanceConfig::default(),
        }
    }

    pub fn sweep_lifecycle(mut self, enable: bool) -> Self {
        self.config.sweep_lifecycle = enable;
        self
    }

    pub fn prune(mut self, enable: bool) -> Self {
        self.config.prune = enable;
        self
    }

    pub fn interval(mut self, interval: Duration) -> Self {
        self.config.interval = interval;
        self
    }

    pub fn build(self) -> MaintenanceConfig {
        self.config
    }
}

impl Default for MaintenanceConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

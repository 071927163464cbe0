//! Aggregated health reporting.
//!
//! The daemon has two moving parts: the frame engine and the capture
//! consumer task. [`DaemonHealth`] reports both plus the latest hook and
//! kernel counters. The overall status is the worst enabled component.
//!
//! # Aggregation Rule
//!
//! - All Healthy -> Healthy
//! - Any Degraded, none Unhealthy -> Degraded(reason)
//! - Any Unhealthy -> Unhealthy(reason)

use serde::Serialize;

use portwatch_core::pipeline::HealthStatus;
use portwatch_engine::StatsSnapshot;

/// Aggregated health report for the daemon.
#[derive(Debug, Clone, Serialize)]
pub struct DaemonHealth {
    /// Worst status among enabled components.
    pub status: HealthStatus,
    /// Seconds since the orchestrator was built.
    pub uptime_secs: u64,
    /// Per-component reports.
    pub components: Vec<ComponentHealth>,
    /// Userspace hook counters.
    pub hook_stats: StatsSnapshot,
    /// Last polled kernel counters, while attached.
    pub kernel_stats: Option<StatsSnapshot>,
}

/// Health of one component.
#[derive(Debug, Clone, Serialize)]
pub struct ComponentHealth {
    /// Component name ("frame-engine", "capture-consumer").
    pub name: String,
    /// Whether the component is enabled in configuration.
    pub enabled: bool,
    /// Current status.
    pub status: HealthStatus,
}

/// Return the worst status among enabled components.
///
/// Unhealthy > Degraded > Healthy. Reasons are joined as `name: reason`.
pub fn aggregate_status(components: &[ComponentHealth]) -> HealthStatus {
    let mut worst = HealthStatus::Healthy;
    let mut reasons = Vec::new();

    for component in components.iter().filter(|c| c.enabled) {
        match &component.status {
            HealthStatus::Healthy => {}
            HealthStatus::Degraded(reason) => {
                if !worst.is_unhealthy() {
                    reasons.push(format!("{}: {}", component.name, reason));
                    worst = HealthStatus::Degraded(String::new());
                }
            }
            HealthStatus::Unhealthy(reason) => {
                reasons.push(format!("{}: {}", component.name, reason));
                worst = HealthStatus::Unhealthy(String::new());
            }
        }
    }

    match worst {
        HealthStatus::Healthy => HealthStatus::Healthy,
        HealthStatus::Degraded(_) => HealthStatus::Degraded(reasons.join("; ")),
        HealthStatus::Unhealthy(_) => HealthStatus::Unhealthy(reasons.join("; ")),
    }
}

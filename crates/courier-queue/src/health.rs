//! Health evaluation.

use std::collections::BTreeMap;

use courier_config::QueueConfig;
use serde::{Deserialize, Serialize};

use crate::metrics::QueueMetrics;

/// Queue depth share of capacity at which a queue counts as degraded.
pub const DEPTH_DEGRADED_RATIO: f64 = 0.9;

/// Error rate (percent) above which the queue counts as degraded.
pub const ERROR_RATE_DEGRADED: f64 = 50.0;

/// Health status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

/// Result of one health check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub status: HealthStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl ComponentHealth {
    fn new(status: HealthStatus, details: impl Into<String>) -> Self {
        Self {
            status,
            details: Some(details.into()),
        }
    }
}

/// Overall health with the individual checks that produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub uptime_secs: u64,
    pub checks: BTreeMap<String, ComponentHealth>,
}

impl HealthReport {
    /// Evaluate health. `fullest_depth` is the depth of the fullest queue.
    pub fn evaluate(
        metrics: &QueueMetrics,
        fullest_depth: usize,
        config: &QueueConfig,
        running: bool,
    ) -> Self {
        let mut checks = BTreeMap::new();

        if !config.monitoring.health_checks {
            return Self {
                status: HealthStatus::Healthy,
                uptime_secs: metrics.uptime_secs,
                checks,
            };
        }

        checks.insert(
            "capacity".to_string(),
            capacity_check(fullest_depth, config.performance.max_queue_size),
        );

        let error_status = if metrics.error_rate > ERROR_RATE_DEGRADED {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        };
        checks.insert(
            "error_rate".to_string(),
            ComponentHealth::new(error_status, format!("{:.1}%", metrics.error_rate)),
        );

        let loop_status = if running {
            ComponentHealth::new(HealthStatus::Healthy, "running")
        } else {
            ComponentHealth::new(HealthStatus::Degraded, "stopped")
        };
        checks.insert("processing".to_string(), loop_status);

        let status = checks
            .values()
            .map(|c| c.status)
            .max()
            .unwrap_or(HealthStatus::Healthy);

        Self {
            status,
            uptime_secs: metrics.uptime_secs,
            checks,
        }
    }
}

fn capacity_check(depth: usize, capacity: usize) -> ComponentHealth {
    if capacity == 0 {
        return ComponentHealth::new(HealthStatus::Healthy, format!("{} (unbounded)", depth));
    }
    let details = format!("{}/{}", depth, capacity);
    if depth >= capacity {
        ComponentHealth::new(HealthStatus::Unhealthy, details)
    } else if depth as f64 >= capacity as f64 * DEPTH_DEGRADED_RATIO {
        ComponentHealth::new(HealthStatus::Degraded, details)
    } else {
        ComponentHealth::new(HealthStatus::Healthy, details)
    }
}

use crate::{CaptureCoordinator, PoolStats, QueueStats};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Duration;
use tokio::time::interval;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthLevel {
    Healthy,
    Warning,
    Critical,
}

#[derive(Debug, Clone)]
pub struct HealthThresholds {
    pub queue_warning: usize,
    pub queue_critical: usize,
}

impl Default for HealthThresholds {
    fn default() -> Self {
        Self {
            queue_warning: 100,
            queue_critical: 1000,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub status: HealthLevel,
    pub pool_health: HealthLevel,
    pub queue_health: HealthLevel,
    pub pool: PoolStats,
    pub queue: QueueStats,
    pub cache_entries: usize,
    pub timestamp: DateTime<Utc>,
}

pub struct HealthChecker {
    thresholds: HealthThresholds,
}

impl HealthChecker {
    pub fn new(thresholds: HealthThresholds) -> Self {
        Self { thresholds }
    }

    pub fn check(&self, coordinator: &CaptureCoordinator) -> HealthReport {
        let pool = coordinator.pool_stats();
        let queue = coordinator.queue_stats();

        let pool_health = self.pool_health(coordinator, &pool);
        let queue_health = self.queue_health(&queue);

        HealthReport {
            status: pool_health.max(queue_health),
            pool_health,
            queue_health,
            pool,
            queue,
            cache_entries: coordinator.cache_len(),
            timestamp: Utc::now(),
        }
    }

    fn pool_health(&self, coordinator: &CaptureCoordinator, stats: &PoolStats) -> HealthLevel {
        if coordinator.is_closed() || stats.total == 0 {
            return HealthLevel::Critical;
        }

        // Fewer workers than configured means some failed to launch
        if stats.total < coordinator.config().pool_size || stats.overflow_in_use > 0 {
            return HealthLevel::Warning;
        }

        HealthLevel::Healthy
    }

    fn queue_health(&self, stats: &QueueStats) -> HealthLevel {
        if stats.queued > self.thresholds.queue_critical {
            HealthLevel::Critical
        } else if stats.queued > self.thresholds.queue_warning {
            HealthLevel::Warning
        } else {
            HealthLevel::Healthy
        }
    }

    /// Log a health report every `every` until the task is aborted.
    pub async fn run_periodic(&self, coordinator: CaptureCoordinator, every: Duration) {
        let mut timer = interval(every);

        loop {
            timer.tick().await;
            let report = self.check(&coordinator);

            match report.status {
                HealthLevel::Healthy => info!(
                    "System health: OK ({} workers, {} queued)",
                    report.pool.total, report.queue.queued
                ),
                HealthLevel::Warning => warn!(
                    "System health: WARNING - pool: {:?}, queue: {:?}",
                    report.pool, report.queue
                ),
                HealthLevel::Critical => error!(
                    "System health: CRITICAL - pool: {:?}, queue: {:?}",
                    report.pool, report.queue
                ),
            }

            if coordinator.is_closed() {
                break;
            }
        }
    }
}

impl Default for HealthChecker {
    fn default() -> Self {
        Self::new(HealthThresholds::default())
    }
}

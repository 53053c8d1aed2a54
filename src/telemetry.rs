use crate::{CaptureError, PoolStats, QueueStats};
use metrics::{gauge, histogram, increment_counter};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::time::Duration;
use tracing::info;

/// Recording points for the capture pipeline.
///
/// Every call goes through the `metrics` facade, so nothing is collected until
/// a recorder is installed (see [`install_prometheus_recorder`]).
pub struct Metrics;

impl Metrics {
    pub fn record_cache_lookup(hit: bool) {
        if hit {
            increment_counter!("capture_cache_hits_total");
        } else {
            increment_counter!("capture_cache_misses_total");
        }
    }

    pub fn record_capture(duration: Duration, success: bool) {
        if success {
            increment_counter!("captures_succeeded_total");
        } else {
            increment_counter!("captures_failed_total");
        }
        histogram!("capture_duration_seconds", duration.as_secs_f64());
    }

    pub fn record_overflow_launch() {
        increment_counter!("worker_overflow_launches_total");
    }

    pub fn record_worker_relaunch() {
        increment_counter!("worker_relaunches_total");
    }

    pub fn record_enrichment(success: bool) {
        if success {
            increment_counter!("enrichments_succeeded_total");
        } else {
            increment_counter!("enrichments_failed_total");
        }
    }

    pub fn record_pool(stats: &PoolStats) {
        gauge!("worker_pool_total", stats.total as f64);
        gauge!("worker_pool_available", stats.available as f64);
        gauge!("worker_pool_in_use", stats.in_use as f64);
        gauge!("worker_pool_overflow_in_use", stats.overflow_in_use as f64);
    }

    pub fn record_queue(stats: &QueueStats) {
        gauge!("admission_queue_depth", stats.queued as f64);
        gauge!("admission_queue_running", stats.running as f64);
    }
}

/// Install the global Prometheus recorder and return a handle for rendering
/// the scrape output.
pub fn install_prometheus_recorder() -> Result<PrometheusHandle, CaptureError> {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| CaptureError::ConfigurationError(e.to_string()))?;

    info!("Prometheus recorder installed");
    Ok(handle)
}

//! Structured logging and Prometheus metrics.

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

use crate::models::job::ErrorKind;
use crate::models::options::Backend;

pub const JOBS_SUBMITTED: &str = "upscale_jobs_submitted_total";
pub const JOBS_COMPLETED: &str = "upscale_jobs_completed_total";
pub const JOBS_FAILED: &str = "upscale_jobs_failed_total";
pub const JOBS_EVICTED: &str = "upscale_jobs_evicted_total";
pub const PROCESSING_SECONDS: &str = "upscale_processing_seconds";
pub const QUEUE_DEPTH: &str = "upscale_queue_depth";

/// JSON log output, filtered by `RUST_LOG` (default `info`).
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();
}

/// Install the global Prometheus recorder and register metric descriptions.
pub fn init_metrics() -> Result<PrometheusHandle, metrics_exporter_prometheus::BuildError> {
    let handle = PrometheusBuilder::new().install_recorder()?;

    metrics::describe_counter!(JOBS_SUBMITTED, "Total upscale jobs accepted");
    metrics::describe_counter!(JOBS_COMPLETED, "Total upscale jobs completed");
    metrics::describe_counter!(JOBS_FAILED, "Total upscale jobs that ended in error");
    metrics::describe_counter!(JOBS_EVICTED, "Finished jobs removed by the TTL sweep");
    metrics::describe_histogram!(PROCESSING_SECONDS, "Time to process an upscale job");
    metrics::describe_gauge!(QUEUE_DEPTH, "Jobs waiting for a free worker");

    Ok(handle)
}

pub fn record_submitted(backend: Backend) {
    metrics::counter!(JOBS_SUBMITTED, "backend" => backend.to_string()).increment(1);
}

pub fn record_completed(backend: Backend, elapsed: Duration) {
    metrics::counter!(JOBS_COMPLETED, "backend" => backend.to_string()).increment(1);
    metrics::histogram!(PROCESSING_SECONDS, "backend" => backend.to_string())
        .record(elapsed.as_secs_f64());
}

pub fn record_failed(backend: Backend, kind: ErrorKind) {
    metrics::counter!(
        JOBS_FAILED,
        "backend" => backend.to_string(),
        "kind" => kind.to_string()
    )
    .increment(1);
}

pub fn record_evicted(count: usize) {
    metrics::counter!(JOBS_EVICTED).increment(count as u64);
}

pub fn set_queue_depth(depth: usize) {
    metrics::gauge!(QUEUE_DEPTH).set(depth as f64);
}

// Prometheus metrics for the execution scheduler

use std::sync::Once;

use lazy_static::lazy_static;
use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};

lazy_static! {
    // Global registry
    pub static ref REGISTRY: Registry = Registry::new();

    pub static ref JOBS_SUBMITTED: IntCounter = IntCounter::new(
        "marker_jobs_submitted_total",
        "Total number of jobs accepted into the queue"
    )
    .expect("metric can be created");

    // Jobs rejected at submit (validation)
    pub static ref JOBS_REJECTED: IntCounterVec = IntCounterVec::new(
        Opts::new("marker_jobs_rejected_total", "Total jobs rejected at submission"),
        &["reason"]
    )
    .expect("metric can be created");

    pub static ref JOBS_CANCELLED: IntCounter = IntCounter::new(
        "marker_jobs_cancelled_total",
        "Total queued jobs cancelled before dispatch"
    )
    .expect("metric can be created");

    // Jobs finished (outcome label: marked, infrastructure_error, timed_out)
    pub static ref JOBS_FINISHED: IntCounterVec = IntCounterVec::new(
        Opts::new("marker_jobs_finished_total", "Total jobs finished by outcome"),
        &["outcome"]
    )
    .expect("metric can be created");

    // Job execution time histogram (in milliseconds)
    pub static ref JOB_EXECUTION_TIME: Histogram = Histogram::with_opts(
        HistogramOpts::new(
            "marker_job_execution_time_ms",
            "Runner wall-clock time in milliseconds"
        )
        .buckets(vec![100.0, 250.0, 500.0, 1000.0, 2500.0, 5000.0, 10000.0, 30000.0, 120000.0])
    )
    .expect("metric can be created");

    pub static ref QUEUE_DEPTH: IntGauge = IntGauge::new(
        "marker_queue_depth",
        "Jobs currently waiting for a worker"
    )
    .expect("metric can be created");

    pub static ref RUNNING_JOBS: IntGauge = IntGauge::new(
        "marker_running_jobs",
        "Jobs currently leased to a worker"
    )
    .expect("metric can be created");

    pub static ref LIVE_WORKERS: IntGauge = IntGauge::new(
        "marker_live_workers",
        "Workers currently alive in the pool"
    )
    .expect("metric can be created");
}

static INIT: Once = Once::new();

/// Register all collectors; safe to call more than once
pub fn init_metrics() {
    INIT.call_once(|| {
        let collectors: Vec<Box<dyn prometheus::core::Collector>> = vec![
            Box::new(JOBS_SUBMITTED.clone()),
            Box::new(JOBS_REJECTED.clone()),
            Box::new(JOBS_CANCELLED.clone()),
            Box::new(JOBS_FINISHED.clone()),
            Box::new(JOB_EXECUTION_TIME.clone()),
            Box::new(QUEUE_DEPTH.clone()),
            Box::new(RUNNING_JOBS.clone()),
            Box::new(LIVE_WORKERS.clone()),
        ];
        for collector in collectors {
            if let Err(e) = REGISTRY.register(collector) {
                tracing::warn!(error = %e, "Failed to register metric collector");
            }
        }
    });
}

/// Render metrics in Prometheus text format
pub fn render_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::warn!(error = %e, "Failed to encode metrics");
    }
    String::from_utf8(buffer).unwrap_or_default()
}

pub fn record_submitted() {
    JOBS_SUBMITTED.inc();
}

pub fn record_rejected(reason: &str) {
    JOBS_REJECTED.with_label_values(&[reason]).inc();
}

pub fn record_cancelled() {
    JOBS_CANCELLED.inc();
}

pub fn record_finished(outcome: &str, execution_time_ms: f64) {
    JOBS_FINISHED.with_label_values(&[outcome]).inc();
    JOB_EXECUTION_TIME.observe(execution_time_ms);
}

/// Mirror the scheduler's counters into the gauges
pub fn update_pool_gauges(queued: usize, running: usize, live_workers: usize) {
    QUEUE_DEPTH.set(queued as i64);
    RUNNING_JOBS.set(running as i64);
    LIVE_WORKERS.set(live_workers as i64);
}

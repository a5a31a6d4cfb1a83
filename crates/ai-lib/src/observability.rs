//! Observability infrastructure for the prediction service
//!
//! Provides:
//! - Prometheus metrics (predictions by status, build/reuse paths, worker latency)
//! - Structured JSON logging of model lifecycle events with tracing

use crate::status::PredictionStatus;
use crate::worker::WorkerMode;
use prometheus::{
    register_histogram_vec, register_int_counter, register_int_counter_vec, Encoder,
    HistogramVec, IntCounter, IntCounterVec, TextEncoder,
};
use std::path::Path;
use std::sync::OnceLock;
use tracing::{info, warn};

/// Histogram buckets for worker runs (in seconds); builds can take minutes
const WORKER_LATENCY_BUCKETS: &[f64] = &[
    0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0, 600.0, 1200.0, 1800.0,
];

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<ServiceMetricsInner> = OnceLock::new();

struct ServiceMetricsInner {
    predictions_total: IntCounterVec,
    prediction_paths_total: IntCounterVec,
    prediction_errors_total: IntCounterVec,
    worker_latency_seconds: HistogramVec,
    worker_failures_total: IntCounterVec,
    model_insert_failures: IntCounter,
    usage_stamp_failures: IntCounter,
}

impl ServiceMetricsInner {
    fn new() -> Self {
        Self {
            predictions_total: register_int_counter_vec!(
                "ai_predictions_total",
                "Successful prediction responses by status",
                &["status"]
            )
            .expect("Failed to register predictions_total"),

            prediction_paths_total: register_int_counter_vec!(
                "ai_prediction_paths_total",
                "Prediction requests by path taken (build or reuse)",
                &["path"]
            )
            .expect("Failed to register prediction_paths_total"),

            prediction_errors_total: register_int_counter_vec!(
                "ai_prediction_errors_total",
                "Failed prediction requests by error kind",
                &["kind"]
            )
            .expect("Failed to register prediction_errors_total"),

            worker_latency_seconds: register_histogram_vec!(
                "ai_worker_latency_seconds",
                "Wall time of worker runs",
                &["mode"],
                WORKER_LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register worker_latency_seconds"),

            worker_failures_total: register_int_counter_vec!(
                "ai_worker_failures_total",
                "Worker runs that failed to produce a result",
                &["mode"]
            )
            .expect("Failed to register worker_failures_total"),

            model_insert_failures: register_int_counter!(
                "ai_model_insert_failures_total",
                "Built models that could not be recorded"
            )
            .expect("Failed to register model_insert_failures"),

            usage_stamp_failures: register_int_counter!(
                "ai_usage_stamp_failures_total",
                "Failed last-use updates of reused models"
            )
            .expect("Failed to register usage_stamp_failures"),
        }
    }
}

/// Which way a prediction request was served
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PredictionPath {
    Build,
    Reuse,
}

impl PredictionPath {
    pub fn as_str(&self) -> &'static str {
        match self {
            PredictionPath::Build => "build",
            PredictionPath::Reuse => "reuse",
        }
    }
}

/// Service metrics for Prometheus exposition
///
/// This is a lightweight handle to the global metrics instance.
/// Multiple clones share the same underlying metrics.
#[derive(Clone)]
pub struct ServiceMetrics {
    _private: (),
}

impl Default for ServiceMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl ServiceMetrics {
    /// Create a new metrics handle (initializes global metrics if needed)
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(ServiceMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &ServiceMetricsInner {
        GLOBAL_METRICS.get_or_init(ServiceMetricsInner::new)
    }

    pub fn inc_prediction(&self, status: PredictionStatus) {
        self.inner()
            .predictions_total
            .with_label_values(&[status.as_str()])
            .inc();
    }

    pub fn inc_path(&self, path: PredictionPath) {
        self.inner()
            .prediction_paths_total
            .with_label_values(&[path.as_str()])
            .inc();
    }

    pub fn inc_prediction_error(&self, kind: &str) {
        self.inner()
            .prediction_errors_total
            .with_label_values(&[kind])
            .inc();
    }

    pub fn observe_worker_latency(&self, mode: WorkerMode, duration_secs: f64) {
        self.inner()
            .worker_latency_seconds
            .with_label_values(&[mode.as_str()])
            .observe(duration_secs);
    }

    pub fn inc_worker_failure(&self, mode: WorkerMode) {
        self.inner()
            .worker_failures_total
            .with_label_values(&[mode.as_str()])
            .inc();
    }

    pub fn inc_insert_failure(&self) {
        self.inner().model_insert_failures.inc();
    }

    pub fn inc_usage_stamp_failure(&self) {
        self.inner().usage_stamp_failures.inc();
    }

    /// Render every registered metric in the Prometheus text format
    pub fn render(&self) -> Result<String, prometheus::Error> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&prometheus::gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

/// Values of the `event` field on structured log lines
pub mod events {
    pub const MODEL_BUILT: &str = "model_built";
    pub const BUILD_SKIPPED: &str = "build_skipped";
    pub const MODEL_REUSED: &str = "model_reused";
    pub const WORKER_FAILED: &str = "worker_failed";
    pub const ORPHANED_ARTIFACT: &str = "orphaned_artifact";
    pub const USAGE_STAMP_FAILED: &str = "usage_stamp_failed";
    pub const SERVICE_STARTED: &str = "service_started";
    pub const SERVICE_SHUTDOWN: &str = "service_shutdown";
}

/// Structured logger for model lifecycle events
#[derive(Clone)]
pub struct StructuredLogger {
    service_name: String,
}

impl StructuredLogger {
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
        }
    }

    /// Log a newly trained and recorded model
    pub fn log_model_built(
        &self,
        repo_id: &str,
        version: u32,
        model_id: i64,
        status: PredictionStatus,
        confidence: f32,
        duration_ms: u64,
    ) {
        info!(
            event = events::MODEL_BUILT,
            service = %self.service_name,
            repo_id = %repo_id,
            version = version,
            model_id = model_id,
            status = %status,
            confidence = confidence,
            duration_ms = duration_ms,
            "Built new model"
        );
    }

    /// Log a build that produced no model
    pub fn log_build_skipped(&self, repo_id: &str, version: u32, status: PredictionStatus) {
        info!(
            event = events::BUILD_SKIPPED,
            service = %self.service_name,
            repo_id = %repo_id,
            version = version,
            status = %status,
            "Worker did not build a model"
        );
    }

    /// Log a prediction served by a stored model
    pub fn log_model_reused(
        &self,
        repo_id: &str,
        version: u32,
        model_id: i64,
        predicted: bool,
        duration_ms: u64,
    ) {
        info!(
            event = events::MODEL_REUSED,
            service = %self.service_name,
            repo_id = %repo_id,
            version = version,
            model_id = model_id,
            predicted = predicted,
            duration_ms = duration_ms,
            "Reused stored model"
        );
    }

    /// Log a worker invocation failure
    pub fn log_worker_failed(&self, repo_id: &str, mode: WorkerMode, error: &str) {
        warn!(
            event = events::WORKER_FAILED,
            service = %self.service_name,
            repo_id = %repo_id,
            mode = %mode,
            error = %error,
            "Worker invocation failed"
        );
    }

    /// Log an artifact left behind by a build that was never recorded
    pub fn log_orphaned_artifact(&self, repo_id: &str, version: u32, path: &Path, error: &str) {
        warn!(
            event = events::ORPHANED_ARTIFACT,
            service = %self.service_name,
            repo_id = %repo_id,
            version = version,
            path = %path.display(),
            error = %error,
            "Built model could not be recorded; artifact left on disk"
        );
    }

    /// Log a failed last-use update
    pub fn log_usage_stamp_failed(&self, repo_id: &str, model_id: i64, error: &str) {
        warn!(
            event = events::USAGE_STAMP_FAILED,
            service = %self.service_name,
            repo_id = %repo_id,
            model_id = model_id,
            error = %error,
            "Failed to record model usage"
        );
    }

    /// Log service startup
    pub fn log_startup(&self, version: &str, listen_port: u16) {
        info!(
            event = events::SERVICE_STARTED,
            service = %self.service_name,
            version = %version,
            listen_port = listen_port,
            "AI service started"
        );
    }

    /// Log service shutdown
    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = events::SERVICE_SHUTDOWN,
            service = %self.service_name,
            reason = %reason,
            "AI service shutting down"
        );
    }
}

//! Prometheus metrics for Waystation stages.
//!
//! # Standard Metrics
//!
//! | Metric | Type | Labels | Description |
//! |--------|------|--------|-------------|
//! | `waystation_stage_requests_total` | Counter | `stage`, `status` | Stage invocations by outcome |
//! | `waystation_stage_duration_seconds` | Histogram | `stage` | Handler latency, flush included |
//! | `waystation_stage_in_flight` | Gauge | `stage` | Invocations currently running |
//! | `waystation_trace_flush_total` | Counter | `outcome` | Flush barrier results |
//!
//! Recording functions are safe to call before [`init_metrics`]; the
//! `metrics` facade drops samples when no recorder is installed.

use crate::error::TelemetryError;
use crate::TelemetryResult;
use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;
use std::sync::OnceLock;
use std::time::Duration;

/// Stage invocation counter.
pub const STAGE_REQUESTS_TOTAL: &str = "waystation_stage_requests_total";
/// Stage latency histogram.
pub const STAGE_DURATION_SECONDS: &str = "waystation_stage_duration_seconds";
/// Stage in-flight gauge.
pub const STAGE_IN_FLIGHT: &str = "waystation_stage_in_flight";
/// Flush barrier counter.
pub const TRACE_FLUSH_TOTAL: &str = "waystation_trace_flush_total";

/// Global metrics handle for rendering.
static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Metrics configuration.
#[derive(Debug, Clone)]
pub struct MetricsConfig {
    /// Whether metrics are recorded at all.
    pub enabled: bool,

    /// Optional dedicated listener (e.g., "0.0.0.0:9090"). Metrics are also
    /// rendered on the stage's own `/metrics` route.
    pub addr: Option<String>,

    /// Histogram buckets for stage duration, in seconds.
    pub duration_buckets: Vec<f64>,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            addr: None,
            // Stage latency is dominated by the configured delay, so the
            // buckets reach well past the 2s default.
            duration_buckets: vec![
                0.005, 0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.0, 2.5, 3.0, 5.0, 7.5, 10.0,
            ],
        }
    }
}

/// Initializes the metrics subsystem.
///
/// With an `addr`, this spawns the Prometheus HTTP listener and must run
/// inside a Tokio runtime.
///
/// # Errors
///
/// Returns `TelemetryError::InvalidAddress` for an unparseable listener
/// address, `TelemetryError::MetricsInit` if a recorder is already
/// installed or the exporter cannot be built.
pub fn init_metrics(config: &MetricsConfig) -> TelemetryResult<()> {
    if !config.enabled {
        return Ok(());
    }

    let builder = PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Full(STAGE_DURATION_SECONDS.to_string()),
            &config.duration_buckets,
        )
        .map_err(|e| TelemetryError::MetricsInit(e.to_string()))?;

    let handle = match &config.addr {
        Some(addr) => {
            let addr: SocketAddr = addr
                .parse()
                .map_err(|e| TelemetryError::InvalidAddress(format!("{addr}: {e}")))?;

            let (recorder, exporter) = builder
                .with_http_listener(addr)
                .build()
                .map_err(|e| TelemetryError::MetricsInit(e.to_string()))?;
            let handle = recorder.handle();

            metrics::set_global_recorder(recorder)
                .map_err(|e| TelemetryError::MetricsInit(e.to_string()))?;

            tokio::spawn(async move {
                if let Err(e) = exporter.await {
                    ::tracing::error!(error = ?e, "Prometheus listener stopped");
                }
            });

            handle
        }
        None => builder
            .install_recorder()
            .map_err(|e| TelemetryError::MetricsInit(e.to_string()))?,
    };

    let _ = METRICS_HANDLE.set(handle);

    register_metric_descriptions();

    Ok(())
}

/// Renders metrics in Prometheus format.
///
/// Returns `None` if metrics are not initialized.
#[must_use]
pub fn render_metrics() -> Option<String> {
    METRICS_HANDLE.get().map(PrometheusHandle::render)
}

fn register_metric_descriptions() {
    describe_counter!(STAGE_REQUESTS_TOTAL, "Total stage invocations by outcome");
    describe_histogram!(
        STAGE_DURATION_SECONDS,
        "Stage handler duration in seconds, including the trace flush"
    );
    describe_gauge!(STAGE_IN_FLIGHT, "Stage invocations currently running");
    describe_counter!(TRACE_FLUSH_TOTAL, "Trace flush barrier results by outcome");
}

/// Records a completed stage invocation.
///
/// # Arguments
///
/// * `stage` - Stage service name
/// * `status` - Outcome label (`ok`, `invalid`, `malformed`, `internal`)
/// * `duration` - Handler duration
pub fn record_stage_request(stage: &str, status: &str, duration: Duration) {
    counter!(
        STAGE_REQUESTS_TOTAL,
        "stage" => stage.to_string(),
        "status" => status.to_string()
    )
    .increment(1);

    histogram!(STAGE_DURATION_SECONDS, "stage" => stage.to_string())
        .record(duration.as_secs_f64());
}

/// Records a flush barrier result.
pub fn record_trace_flush(outcome: &str) {
    counter!(TRACE_FLUSH_TOTAL, "outcome" => outcome.to_string()).increment(1);
}

/// Guard that tracks one in-flight stage invocation.
///
/// The gauge is decremented on drop, so early returns are covered.
pub struct InFlightGuard {
    stage: String,
}

impl InFlightGuard {
    /// Creates a new guard and increments the in-flight gauge.
    #[must_use]
    pub fn new(stage: &str) -> Self {
        gauge!(STAGE_IN_FLIGHT, "stage" => stage.to_string()).increment(1.0);
        Self {
            stage: stage.to_string(),
        }
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        gauge!(STAGE_IN_FLIGHT, "stage" => self.stage.clone()).decrement(1.0);
    }
}

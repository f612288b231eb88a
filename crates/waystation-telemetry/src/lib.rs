//! Observability for Waystation stages.
//!
//! - **Tracing**: process-wide OpenTelemetry provider with Jaeger Thrift or
//!   OTLP export, W3C trace-context propagation, and the pre-return flush
//!   barrier ([`TraceFlusher`])
//! - **Logging**: structured JSON logging via `tracing-subscriber`
//! - **Metrics**: Prometheus-format stage and flush metrics
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                       Waystation stage                        │
//! │                                                               │
//! │   POST / ─► StageHandler ─► span ─► end ─► TraceFlusher ─► 200 │
//! │                              │                  │             │
//! │                     BatchSpanProcessor ◄────────┘             │
//! │                              │                                │
//! └──────────────────────────────┼────────────────────────────────┘
//!                                ▼
//!              ┌───────────────────────────────┐
//!              │ Jaeger collector / OTLP sink   │
//!              └───────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use waystation_telemetry::{init_telemetry, ExporterMode, TelemetryConfig, TracingConfig};
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = TelemetryConfig::builder()
//!         .service_name("validator")
//!         .tracing(TracingConfig {
//!             exporter: ExporterMode::Otlp,
//!             otlp_endpoint: "http://jaeger:4317".to_string(),
//!             ..TracingConfig::default()
//!         })
//!         .build();
//!
//!     let guard = init_telemetry(config).expect("Failed to init telemetry");
//!     let flusher = guard.flusher();
//!     // ...
//!     guard.shutdown().await;
//! }
//! ```

#![warn(missing_docs)]

pub mod client;
pub mod config;
pub mod error;
mod jaeger;
pub mod logging;
pub mod metrics;
pub mod tracing;

pub use client::TracedClient;
pub use config::{TelemetryConfig, TelemetryConfigBuilder};
pub use error::TelemetryError;
pub use jaeger::{JaegerExporter, THRIFT_CONTENT_TYPE};
pub use logging::{init_logging, LogConfig, LogFormat};
pub use metrics::{init_metrics, render_metrics, MetricsConfig};
pub use tracing::{
    init_tracing, select_exporter, stage_tracer, ExporterMode, ExporterTarget, FlushOutcome,
    HeaderExtractor, HeaderInjector, TraceFlusher, TracingConfig,
};

/// Result type for telemetry operations.
pub type TelemetryResult<T> = Result<T, TelemetryError>;

/// Guard that shuts down the tracer provider.
///
/// Keep it alive for the lifetime of the process and call
/// [`TelemetryGuard::shutdown`] on the way out; only that path waits for the
/// last spans to be exported. Dropping the guard inside a Tokio runtime hands
/// the flush to the blocking pool without waiting for it, and dropping it
/// outside one flushes on the dropping thread.
pub struct TelemetryGuard {
    tracer_provider: Option<opentelemetry_sdk::trace::TracerProvider>,
    flusher: TraceFlusher,
}

impl TelemetryGuard {
    /// Creates a new telemetry guard.
    #[must_use]
    pub fn new(
        tracer_provider: Option<opentelemetry_sdk::trace::TracerProvider>,
        flush_timeout: std::time::Duration,
    ) -> Self {
        let flusher = TraceFlusher::from_provider(tracer_provider.clone(), flush_timeout);
        Self {
            tracer_provider,
            flusher,
        }
    }

    /// The provider, when tracing is enabled.
    pub fn tracer_provider(&self) -> Option<&opentelemetry_sdk::trace::TracerProvider> {
        self.tracer_provider.as_ref()
    }

    /// A flush barrier bound to this process's provider.
    pub fn flusher(&self) -> TraceFlusher {
        self.flusher.clone()
    }

    /// Flushes remaining spans and shuts the provider down off the async
    /// worker threads.
    pub async fn shutdown(mut self) {
        let Some(provider) = self.tracer_provider.take() else {
            return;
        };

        self.flusher.flush().await;
        let result = tokio::task::spawn_blocking(move || provider.shutdown()).await;
        match result {
            Ok(Ok(())) => ::tracing::debug!("Tracer provider shut down"),
            Ok(Err(e)) => ::tracing::warn!(error = %e, "Error shutting down tracer provider"),
            Err(e) => ::tracing::warn!(error = %e, "Tracer provider shutdown task failed"),
        }
    }
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        let Some(provider) = self.tracer_provider.take() else {
            return;
        };
        // A runtime worker must not block on the batch processor it drives.
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn_blocking(move || shutdown_provider(&provider));
            }
            Err(_) => shutdown_provider(&provider),
        }
    }
}

fn shutdown_provider(provider: &opentelemetry_sdk::trace::TracerProvider) {
    for result in provider.force_flush() {
        if let Err(e) = result {
            eprintln!("Error flushing tracer provider: {e}");
        }
    }
    if let Err(e) = provider.shutdown() {
        eprintln!("Error shutting down tracer provider: {e}");
    }
}

/// Initializes all telemetry subsystems: logging, then metrics, then
/// tracing.
///
/// # Errors
///
/// Returns `TelemetryError` if any subsystem fails to initialize.
pub fn init_telemetry(config: TelemetryConfig) -> TelemetryResult<TelemetryGuard> {
    init_logging(&config.logging)?;

    init_metrics(&config.metrics)?;

    let tracer_provider = init_tracing(&config.tracing)?;

    Ok(TelemetryGuard::new(tracer_provider, config.flush_timeout))
}

//! Tracer bootstrap, exporter selection and the flush barrier.
//!
//! A stage process owns exactly one [`TracerProvider`]. It is built once by
//! [`init_tracing`], stored in process-scoped state, installed as the global
//! OpenTelemetry provider, and is only read afterwards. There is no
//! re-initialization path: a second call fails with
//! [`TelemetryError::AlreadyInitialized`].
//!
//! Spans are buffered by a batch processor and exported in the background.
//! The only synchronous point is [`TraceFlusher::flush`], which a stage
//! runs before it answers each request.
//!
//! # Exporter selection
//!
//! ```text
//! TRACE_EXPORTER=otlp ─┬─ port 4317 ──► OTLP/gRPC  http://host:4317
//!                      └─ otherwise ──► OTLP/HTTP  http://host:port/v1/traces
//! (default) ───────────────────────────► Jaeger Thrift over HTTP
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use waystation_telemetry::tracing::{TracingConfig, init_tracing, TraceFlusher};
//!
//! let provider = init_tracing(&TracingConfig::default())?;
//! let flusher = TraceFlusher::from_provider(provider, Duration::from_secs(5));
//! ```

use std::fmt;
use std::sync::OnceLock;
use std::time::Duration;

use crate::error::TelemetryError;
use crate::jaeger::JaegerExporter;
use crate::TelemetryResult;
use opentelemetry::propagation::TextMapCompositePropagator;
use opentelemetry::trace::TracerProvider as _;
use opentelemetry::{global, KeyValue};
use opentelemetry_otlp::{WithExportConfig, WithHttpConfig};
use opentelemetry_sdk::propagation::{BaggagePropagator, TraceContextPropagator};
use opentelemetry_sdk::trace::{RandomIdGenerator, Sampler, Tracer, TracerProvider};
use opentelemetry_sdk::Resource;
use serde::{Deserialize, Serialize};

/// Default OTLP endpoint.
pub const DEFAULT_OTLP_ENDPOINT: &str = "http://jaeger:4318";

/// Default Jaeger collector endpoint.
pub const DEFAULT_JAEGER_ENDPOINT: &str = "http://jaeger:14268/api/traces";

/// Default flush barrier timeout.
pub const DEFAULT_FLUSH_TIMEOUT: Duration = Duration::from_millis(5000);

/// Conventional OTLP/gRPC port.
pub const OTLP_GRPC_PORT: u16 = 4317;

/// Query parameter the Jaeger collector requires.
const JAEGER_FORMAT_PARAM: &str = "format=jaeger.thrift";

/// Process-scoped provider; written once by [`init_tracing`].
static TRACER_PROVIDER: OnceLock<TracerProvider> = OnceLock::new();

/// Which family of exporter to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExporterMode {
    /// Jaeger Thrift over HTTP.
    #[default]
    Jaeger,
    /// OTLP, gRPC or HTTP depending on the endpoint port.
    Otlp,
}

impl ExporterMode {
    /// Parses a selector value: `otlp` (any case) selects OTLP, anything
    /// else selects Jaeger.
    pub fn parse(value: &str) -> Self {
        if value.trim().eq_ignore_ascii_case("otlp") {
            Self::Otlp
        } else {
            Self::Jaeger
        }
    }
}

/// Tracing configuration.
#[derive(Debug, Clone)]
pub struct TracingConfig {
    /// Whether tracing is enabled.
    pub enabled: bool,

    /// Exporter family.
    pub exporter: ExporterMode,

    /// Raw OTLP endpoint (any scheme/path; normalized at bootstrap).
    pub otlp_endpoint: String,

    /// Raw Jaeger collector endpoint.
    pub jaeger_endpoint: String,

    /// Service name for spans.
    pub service_name: String,

    /// Service version.
    pub service_version: String,

    /// Deployment environment.
    pub environment: String,

    /// Sampling ratio (0.0 to 1.0).
    pub sample_ratio: f64,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            exporter: ExporterMode::Jaeger,
            otlp_endpoint: DEFAULT_OTLP_ENDPOINT.to_string(),
            jaeger_endpoint: DEFAULT_JAEGER_ENDPOINT.to_string(),
            service_name: "waystation".to_string(),
            service_version: env!("CARGO_PKG_VERSION").to_string(),
            environment: "development".to_string(),
            sample_ratio: 1.0,
        }
    }
}

/// Concrete exporter chosen at bootstrap.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExporterTarget {
    /// Jaeger collector URL, including the format query parameter.
    JaegerThrift {
        /// Collector URL.
        endpoint: String,
    },
    /// OTLP over gRPC.
    OtlpGrpc {
        /// `http://host:port`.
        endpoint: String,
    },
    /// OTLP over HTTP/protobuf.
    OtlpHttp {
        /// `http://host:port/v1/traces`.
        endpoint: String,
    },
}

impl ExporterTarget {
    /// Endpoint the exporter will talk to.
    pub fn endpoint(&self) -> &str {
        match self {
            Self::JaegerThrift { endpoint }
            | Self::OtlpGrpc { endpoint }
            | Self::OtlpHttp { endpoint } => endpoint,
        }
    }

    /// Short label for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::JaegerThrift { .. } => "jaeger-thrift",
            Self::OtlpGrpc { .. } => "otlp-grpc",
            Self::OtlpHttp { .. } => "otlp-http",
        }
    }
}

impl fmt::Display for ExporterTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.kind(), self.endpoint())
    }
}

/// Strips a trailing slash and appends `format=jaeger.thrift` unless a
/// `format=` parameter is already present.
///
/// ```
/// use waystation_telemetry::tracing::normalize_jaeger_endpoint;
///
/// assert_eq!(
///     normalize_jaeger_endpoint("http://jaeger:14268/api/traces/"),
///     "http://jaeger:14268/api/traces?format=jaeger.thrift",
/// );
/// ```
pub fn normalize_jaeger_endpoint(raw: &str) -> String {
    let trimmed = raw.trim().trim_end_matches('/');
    if trimmed.contains("format=") {
        trimmed.to_string()
    } else if trimmed.contains('?') {
        format!("{trimmed}&{JAEGER_FORMAT_PARAM}")
    } else {
        format!("{trimmed}?{JAEGER_FORMAT_PARAM}")
    }
}

/// Reduces an OTLP endpoint to `host[:port]`.
///
/// ```
/// use waystation_telemetry::tracing::normalize_otlp_endpoint;
///
/// assert_eq!(normalize_otlp_endpoint("https://collector:4317/v1/traces"), "collector:4317");
/// assert_eq!(normalize_otlp_endpoint("collector"), "collector");
/// ```
pub fn normalize_otlp_endpoint(raw: &str) -> String {
    let raw = raw.trim();
    let without_scheme = raw.split_once("://").map_or(raw, |(_, rest)| rest);
    let authority = without_scheme
        .split(['/', '?', '#'])
        .next()
        .unwrap_or_default();
    authority.to_string()
}

fn authority_port(authority: &str) -> Option<u16> {
    let (host, port) = authority.rsplit_once(':')?;
    // a bare IPv6 literal has colons but no port
    if host.contains(':') && !host.ends_with(']') {
        return None;
    }
    port.parse().ok()
}

/// Chooses the exporter for a configuration. Pure; performs no I/O.
pub fn select_exporter(config: &TracingConfig) -> ExporterTarget {
    match config.exporter {
        ExporterMode::Jaeger => ExporterTarget::JaegerThrift {
            endpoint: normalize_jaeger_endpoint(&config.jaeger_endpoint),
        },
        ExporterMode::Otlp => {
            let authority = normalize_otlp_endpoint(&config.otlp_endpoint);
            if authority_port(&authority) == Some(OTLP_GRPC_PORT) {
                ExporterTarget::OtlpGrpc {
                    endpoint: format!("http://{authority}"),
                }
            } else {
                ExporterTarget::OtlpHttp {
                    endpoint: format!("http://{authority}/v1/traces"),
                }
            }
        }
    }
}

fn build_resource(config: &TracingConfig) -> Resource {
    Resource::new([
        KeyValue::new(
            opentelemetry_semantic_conventions::attribute::SERVICE_NAME,
            config.service_name.clone(),
        ),
        KeyValue::new(
            opentelemetry_semantic_conventions::attribute::SERVICE_VERSION,
            config.service_version.clone(),
        ),
        KeyValue::new("deployment.environment", config.environment.clone()),
    ])
}

fn build_sampler(ratio: f64) -> Sampler {
    if ratio >= 1.0 {
        Sampler::AlwaysOn
    } else if ratio <= 0.0 {
        Sampler::AlwaysOff
    } else {
        Sampler::TraceIdRatioBased(ratio)
    }
}

/// Builds a provider with a batch processor around `target`'s exporter.
///
/// Must run inside a Tokio runtime. Does not touch global state.
///
/// # Errors
///
/// Returns `TelemetryError::TracingInit` if the OTLP exporter cannot be
/// built.
pub fn build_provider(
    config: &TracingConfig,
    target: &ExporterTarget,
) -> TelemetryResult<TracerProvider> {
    let builder = TracerProvider::builder()
        .with_sampler(build_sampler(config.sample_ratio))
        .with_id_generator(RandomIdGenerator::default())
        .with_resource(build_resource(config));

    let builder = match target {
        ExporterTarget::JaegerThrift { endpoint } => {
            let exporter = JaegerExporter::new(endpoint.clone(), config.service_name.clone());
            builder.with_batch_exporter(exporter, opentelemetry_sdk::runtime::Tokio)
        }
        ExporterTarget::OtlpGrpc { endpoint } => {
            let exporter = opentelemetry_otlp::SpanExporter::builder()
                .with_tonic()
                .with_endpoint(endpoint.clone())
                .build()
                .map_err(|e| TelemetryError::TracingInit(e.to_string()))?;
            builder.with_batch_exporter(exporter, opentelemetry_sdk::runtime::Tokio)
        }
        ExporterTarget::OtlpHttp { endpoint } => {
            let exporter = opentelemetry_otlp::SpanExporter::builder()
                .with_http()
                .with_http_client(reqwest::Client::new())
                .with_endpoint(endpoint.clone())
                .build()
                .map_err(|e| TelemetryError::TracingInit(e.to_string()))?;
            builder.with_batch_exporter(exporter, opentelemetry_sdk::runtime::Tokio)
        }
    };

    Ok(builder.build())
}

/// Initializes the process-wide tracer provider.
///
/// Selects the exporter, builds the provider, stores it in process-scoped
/// state and installs it (with a W3C TraceContext + Baggage propagator) as
/// the global OpenTelemetry provider.
///
/// Returns `Ok(None)` when tracing is disabled.
///
/// # Errors
///
/// Returns `TelemetryError::AlreadyInitialized` on a second successful
/// call in the same process, `TelemetryError::TracingInit` if the exporter
/// cannot be built.
pub fn init_tracing(config: &TracingConfig) -> TelemetryResult<Option<TracerProvider>> {
    if !config.enabled {
        ::tracing::info!("Tracing disabled");
        return Ok(None);
    }

    if TRACER_PROVIDER.get().is_some() {
        return Err(TelemetryError::AlreadyInitialized);
    }

    let target = select_exporter(config);
    let provider = build_provider(config, &target)?;

    TRACER_PROVIDER
        .set(provider.clone())
        .map_err(|_| TelemetryError::AlreadyInitialized)?;

    global::set_text_map_propagator(TextMapCompositePropagator::new(vec![
        Box::new(TraceContextPropagator::new()),
        Box::new(BaggagePropagator::new()),
    ]));
    global::set_tracer_provider(provider.clone());

    ::tracing::info!(
        exporter = target.kind(),
        endpoint = target.endpoint(),
        service = %config.service_name,
        "Tracing initialized"
    );

    Ok(Some(provider))
}

/// Returns a tracer from `provider`, or from a provider with no exporter
/// when tracing is disabled. Spans from the latter are created and
/// discarded.
pub fn stage_tracer(provider: Option<&TracerProvider>, name: &'static str) -> Tracer {
    match provider {
        Some(provider) => provider.tracer(name),
        None => TracerProvider::builder().build().tracer(name),
    }
}

/// Result of one flush barrier.
///
/// Reported for logs and metrics only; no variant ever fails a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlushOutcome {
    /// Buffered spans were handed to the exporter and acknowledged.
    Flushed,
    /// Tracing is disabled; nothing to flush.
    Disabled,
    /// The exporter did not answer within the timeout.
    TimedOut,
    /// The exporter reported an error.
    Failed(String),
}

impl FlushOutcome {
    /// Metric label.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Flushed => "flushed",
            Self::Disabled => "disabled",
            Self::TimedOut => "timed_out",
            Self::Failed(_) => "failed",
        }
    }

    /// Returns `true` unless spans may have been lost.
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Flushed | Self::Disabled)
    }
}

impl fmt::Display for FlushOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Failed(reason) => write!(f, "failed: {reason}"),
            other => f.write_str(other.label()),
        }
    }
}

/// The pre-return flush barrier.
///
/// Cheap to clone; every clone flushes the same provider.
#[derive(Debug, Clone)]
pub struct TraceFlusher {
    provider: Option<TracerProvider>,
    timeout: Duration,
}

impl TraceFlusher {
    /// Creates a flusher for `provider`.
    pub fn new(provider: TracerProvider, timeout: Duration) -> Self {
        Self {
            provider: Some(provider),
            timeout,
        }
    }

    /// Creates a flusher from the result of [`init_tracing`].
    pub fn from_provider(provider: Option<TracerProvider>, timeout: Duration) -> Self {
        Self { provider, timeout }
    }

    /// A flusher that always reports [`FlushOutcome::Disabled`].
    pub fn disabled() -> Self {
        Self {
            provider: None,
            timeout: DEFAULT_FLUSH_TIMEOUT,
        }
    }

    /// Upper bound on a single flush.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Returns `true` if there is a provider to flush.
    pub fn is_enabled(&self) -> bool {
        self.provider.is_some()
    }

    /// Pushes every buffered span to the exporter and waits up to the
    /// configured timeout for it to finish.
    ///
    /// Never fails. Errors and timeouts are logged at `warn`, counted in
    /// `waystation_trace_flush_total` and returned as the outcome. The
    /// provider's `force_flush` blocks, so it runs on the blocking pool;
    /// on timeout that thread is left to finish on its own.
    pub async fn flush(&self) -> FlushOutcome {
        let Some(provider) = self.provider.clone() else {
            crate::metrics::record_trace_flush(FlushOutcome::Disabled.label());
            return FlushOutcome::Disabled;
        };

        let task = tokio::task::spawn_blocking(move || provider.force_flush());

        let outcome = match tokio::time::timeout(self.timeout, task).await {
            Err(_) => FlushOutcome::TimedOut,
            Ok(Err(join_error)) => FlushOutcome::Failed(join_error.to_string()),
            Ok(Ok(results)) => match results.into_iter().find_map(Result::err) {
                Some(e) => FlushOutcome::Failed(e.to_string()),
                None => FlushOutcome::Flushed,
            },
        };

        if outcome.is_success() {
            ::tracing::debug!(flush = outcome.label(), "Trace flush completed");
        } else {
            let err = TelemetryError::ExportUnavailable(outcome.to_string());
            ::tracing::warn!(
                flush = outcome.label(),
                timeout_ms = u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX),
                error = %err,
                "Trace flush did not complete; spans may be lost"
            );
        }
        crate::metrics::record_trace_flush(outcome.label());

        outcome
    }
}

/// Extracts trace context from HTTP headers through the global propagator.
pub fn extract_context<T: opentelemetry::propagation::Extractor>(
    headers: &T,
) -> opentelemetry::Context {
    global::get_text_map_propagator(|propagator| propagator.extract(headers))
}

/// Injects trace context into HTTP headers through the global propagator.
pub fn inject_context<T: opentelemetry::propagation::Injector>(
    context: &opentelemetry::Context,
    headers: &mut T,
) {
    global::get_text_map_propagator(|propagator| {
        propagator.inject_context(context, headers);
    });
}

/// HTTP header extractor for `http::HeaderMap`.
pub struct HeaderExtractor<'a>(pub &'a http::HeaderMap);

impl opentelemetry::propagation::Extractor for HeaderExtractor<'_> {
    fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(|v| v.to_str().ok())
    }

    fn keys(&self) -> Vec<&str> {
        self.0.keys().map(http::HeaderName::as_str).collect()
    }
}

/// HTTP header injector for `http::HeaderMap`.
pub struct HeaderInjector<'a>(pub &'a mut http::HeaderMap);

impl opentelemetry::propagation::Injector for HeaderInjector<'_> {
    fn set(&mut self, key: &str, value: String) {
        if let (Ok(name), Ok(val)) = (
            http::header::HeaderName::try_from(key),
            http::header::HeaderValue::try_from(&value),
        ) {
            self.0.insert(name, val);
        }
    }
}

//! The stage handler: one `POST /` invocation from body bytes to response.
//!
//! Every invocation runs the same lifecycle:
//!
//! ```text
//! Received ─► Extracted ─► Processed ─► Ledgered ─► Flushed ─► Responded
//!                              │                       ▲
//!                              └──── Rejected ─────────┘
//! ```
//!
//! The handler owns the invocation's SERVER span and makes it the current
//! context while the stage runs, so outbound calls made from inside a stage
//! become its children. The span is ended before the flush barrier so it is
//! part of the batch that gets pushed, and the barrier runs on every path,
//! including rejections and internal failures.

use std::sync::Arc;
use std::time::{Duration, Instant};

use http::{Method, StatusCode};
use opentelemetry::trace::{
    FutureExt, Span as _, SpanKind, Status, TraceContextExt, Tracer as _,
};
use opentelemetry::{Context, KeyValue};
use opentelemetry_sdk::trace::Tracer;
use waystation_core::ledger::{truncate_chars, SPAN_PREVIEW_CHARS};
use waystation_core::{
    merge_envelope, resolve, ForwardResponse, PersistedResult, RequestBody, StageError,
    StageResponse, StageResult, StepRecord, StepStatus,
};
use waystation_telemetry::metrics::{record_stage_request, InFlightGuard};
use waystation_telemetry::{FlushOutcome, TraceFlusher};

use crate::stages::Stage;

/// Span attribute keys.
pub mod attributes {
    /// First 200 characters of the resolved input.
    pub const INPUT_TEXT: &str = "process.input.text";
    /// First 200 characters of the stage output.
    pub const OUTPUT_TEXT: &str = "process.output.text";
    /// `ok`, `invalid` or `error`.
    pub const STATUS: &str = "process.status";
    /// Service name of the stage.
    pub const STAGE_NAME: &str = "stage.name";
    /// Resolved payload type.
    pub const PAYLOAD_TYPE: &str = "payload.type";
    /// Length of the inbound ledger (persist only).
    pub const INPUT_STEPS_COUNT: &str = "process.input.steps_count";
    /// First 200 characters of the stored result (persist only).
    pub const OUTPUT_RESULT: &str = "process.output.result";
    /// Request method.
    pub const HTTP_METHOD: &str = "http.request.method";
    /// Matched route template.
    pub const HTTP_ROUTE: &str = "http.route";
    /// Request path.
    pub const URL_PATH: &str = "url.path";
    /// Response status code.
    pub const HTTP_STATUS_CODE: &str = "http.response.status_code";
}

/// Span status value for internal failures.
const STATUS_ERROR: &str = "error";

/// Runs one stage invocation end to end.
#[derive(Debug, Clone)]
pub struct StageHandler {
    stage: Arc<dyn Stage>,
    delay: Duration,
    tracer: Tracer,
    flusher: TraceFlusher,
}

impl StageHandler {
    /// Creates a handler with no processing delay.
    pub fn new(stage: Arc<dyn Stage>, tracer: Tracer, flusher: TraceFlusher) -> Self {
        Self {
            stage,
            delay: Duration::ZERO,
            tracer,
            flusher,
        }
    }

    /// Sets the artificial processing delay.
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// The stage this handler runs.
    pub fn stage(&self) -> &dyn Stage {
        self.stage.as_ref()
    }

    /// Processing delay.
    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Handles one request body.
    ///
    /// `parent` is the context extracted from the inbound headers. The
    /// returned future resolves only after the flush barrier has run.
    pub async fn handle(&self, parent: &Context, body: &[u8]) -> StageResult<StageResponse> {
        let started = Instant::now();
        let name = self.stage.name();
        let _in_flight = InFlightGuard::new(name);

        let span = self
            .tracer
            .span_builder(self.stage.kind().operation())
            .with_kind(SpanKind::Server)
            .with_attributes(vec![
                KeyValue::new(attributes::STAGE_NAME, name),
                KeyValue::new(attributes::HTTP_METHOD, Method::POST.to_string()),
                KeyValue::new(attributes::HTTP_ROUTE, "/"),
            ])
            .start_with_context(&self.tracer, parent);
        let cx = parent.with_span(span);

        let result = self.run(&cx, body).with_context(cx.clone()).await;

        let span = cx.span();
        match &result {
            Ok(_) => {
                span.set_attribute(KeyValue::new(attributes::STATUS, StepStatus::Ok.as_str()));
                span.set_attribute(status_code_attribute(StatusCode::OK));
                span.set_status(Status::Ok);
            }
            Err(e) if e.is_rejection() => {
                span.set_attribute(KeyValue::new(
                    attributes::STATUS,
                    StepStatus::Invalid.as_str(),
                ));
                span.set_attribute(status_code_attribute(e.status_code()));
                span.set_status(Status::error(e.to_string()));
            }
            Err(e) => {
                span.set_attribute(KeyValue::new(attributes::STATUS, STATUS_ERROR));
                span.set_attribute(status_code_attribute(e.status_code()));
                span.set_status(Status::error(e.to_string()));
            }
        }
        span.end();

        let flush = self.flusher.flush().await;
        self.record(&result, &flush, started.elapsed());

        result
    }

    /// Records the SERVER span of a request answered without running the
    /// stage: health checks, metrics scrapes, unknown routes and unreadable
    /// bodies.
    ///
    /// `route` is the matched route template, or `None` when nothing matched.
    /// The span goes out with the next batch; there is no flush barrier.
    pub fn record_request(
        &self,
        parent: &Context,
        method: &Method,
        route: Option<&'static str>,
        path: &str,
        status: StatusCode,
    ) {
        let name = match route {
            Some(route) => format!("{method} {route}"),
            None => method.to_string(),
        };
        let mut fields = vec![
            KeyValue::new(attributes::HTTP_METHOD, method.to_string()),
            KeyValue::new(attributes::URL_PATH, path.to_string()),
            status_code_attribute(status),
        ];
        if let Some(route) = route {
            fields.push(KeyValue::new(attributes::HTTP_ROUTE, route));
        }

        let mut span = self
            .tracer
            .span_builder(name)
            .with_kind(SpanKind::Server)
            .with_attributes(fields)
            .start_with_context(&self.tracer, parent);
        if status.is_server_error() {
            span.set_status(Status::error(status.to_string()));
        }
        span.end();
    }

    async fn run(&self, cx: &Context, body: &[u8]) -> StageResult<StageResponse> {
        let request = parse_body(body)?;

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let span = cx.span();
        let input = resolve(&request);
        span.set_attribute(KeyValue::new(
            attributes::INPUT_TEXT,
            truncate_chars(&input.data, SPAN_PREVIEW_CHARS).to_string(),
        ));
        span.set_attribute(KeyValue::new(
            attributes::PAYLOAD_TYPE,
            input.kind.as_str().to_string(),
        ));

        let output = self.stage.process(&input, &request)?;

        let payload = merge_envelope(
            request.payload.as_ref(),
            &input.kind,
            &output.data,
            &output.metadata,
        );

        let policy = self.stage.preview_policy();
        let mut record = StepRecord::new(
            self.stage.name(),
            policy.render(&input.data, &input.kind),
            policy.render(&output.data, &input.kind),
            StepStatus::Ok,
        );
        if output.record_metadata {
            record = record.with_metadata(output.metadata.clone());
        }
        let steps = request.steps.append(record);

        for attribute in self.stage.span_attributes(&request, &output) {
            span.set_attribute(attribute);
        }
        span.set_attribute(KeyValue::new(
            attributes::OUTPUT_TEXT,
            truncate_chars(&output.data, SPAN_PREVIEW_CHARS).to_string(),
        ));

        let response = if self.stage.is_terminal() {
            StageResponse::Terminal(PersistedResult {
                result: output.data,
                stored: true,
                payload,
                steps,
            })
        } else {
            StageResponse::Forward(ForwardResponse {
                payload,
                text: output.data,
                steps,
            })
        };

        Ok(response)
    }

    fn record(
        &self,
        result: &StageResult<StageResponse>,
        flush: &FlushOutcome,
        elapsed: Duration,
    ) {
        let name = self.stage.name();
        let duration_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);

        match result {
            Ok(response) => {
                record_stage_request(name, StepStatus::Ok.as_str(), elapsed);
                tracing::info!(
                    stage = name,
                    status = StepStatus::Ok.as_str(),
                    steps = response.steps().len(),
                    flush = flush.label(),
                    duration_ms = duration_ms,
                    "Stage invocation completed"
                );
            }
            Err(e) if e.is_rejection() => {
                record_stage_request(name, e.category(), elapsed);
                tracing::warn!(
                    stage = name,
                    status = e.category(),
                    flush = flush.label(),
                    duration_ms = duration_ms,
                    error = %e,
                    "Stage invocation rejected"
                );
            }
            Err(e) => {
                record_stage_request(name, e.category(), elapsed);
                tracing::error!(
                    stage = name,
                    status = e.category(),
                    flush = flush.label(),
                    duration_ms = duration_ms,
                    error = %e,
                    "Stage invocation failed"
                );
            }
        }
    }
}

fn status_code_attribute(status: StatusCode) -> KeyValue {
    KeyValue::new(attributes::HTTP_STATUS_CODE, i64::from(status.as_u16()))
}

/// Parses a request body. An empty body is read as `{}`.
pub fn parse_body(body: &[u8]) -> StageResult<RequestBody> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(RequestBody::default());
    }
    serde_json::from_slice(body).map_err(StageError::from)
}

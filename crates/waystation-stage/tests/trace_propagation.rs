//! Inbound W3C trace context and the pre-response flush, over HTTP.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::future::BoxFuture;
use opentelemetry::trace::{SpanId, SpanKind, TraceId};
use opentelemetry::Value;
use opentelemetry_sdk::export::trace::{ExportResult, SpanData, SpanExporter};
use opentelemetry_sdk::propagation::TraceContextPropagator;
use opentelemetry_sdk::runtime;
use opentelemetry_sdk::trace::TracerProvider;
use serde_json::json;
use tokio::net::TcpListener;
use waystation_stage::{stage_for, StageConfig, StageHandler, StageKind, StageServer};
use waystation_telemetry::{stage_tracer, TraceFlusher};

#[derive(Debug, Clone, Default)]
struct Capture(Arc<Mutex<Vec<SpanData>>>);

impl SpanExporter for Capture {
    fn export(&mut self, batch: Vec<SpanData>) -> BoxFuture<'static, ExportResult> {
        self.0.lock().unwrap().extend(batch);
        Box::pin(std::future::ready(Ok(())))
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn span_joins_caller_trace_and_is_exported_before_response() {
    opentelemetry::global::set_text_map_propagator(TraceContextPropagator::new());

    let capture = Capture::default();
    let provider = TracerProvider::builder()
        .with_batch_exporter(capture.clone(), runtime::Tokio)
        .build();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let handler = StageHandler::new(
        stage_for(StageKind::Transform),
        stage_tracer(Some(&provider), "waystation-propagation-test"),
        TraceFlusher::new(provider, Duration::from_secs(5)),
    );
    let server = StageServer::new(&StageConfig::for_stage(StageKind::Transform), handler).unwrap();
    tokio::spawn(server.serve(listener));

    let response = reqwest::Client::new()
        .post(format!("http://{addr}/"))
        .header(
            "traceparent",
            "00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01",
        )
        .json(&json!({"text": "flush me"}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 200);

    // No extra flush: the span must already be with the exporter.
    let spans = capture.0.lock().unwrap().clone();
    assert_eq!(spans.len(), 1);

    let span = &spans[0];
    assert_eq!(span.name, "transform");
    assert_eq!(span.span_kind, SpanKind::Server);
    assert_eq!(
        span.span_context.trace_id(),
        TraceId::from_hex("4bf92f3577b34da6a3ce929d0e0e4736").unwrap()
    );
    assert_eq!(
        span.parent_span_id,
        SpanId::from_hex("00f067aa0ba902b7").unwrap()
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn every_route_gets_a_server_span() {
    opentelemetry::global::set_text_map_propagator(TraceContextPropagator::new());

    let capture = Capture::default();
    let provider = TracerProvider::builder()
        .with_batch_exporter(capture.clone(), runtime::Tokio)
        .build();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let handler = StageHandler::new(
        stage_for(StageKind::Validate),
        stage_tracer(Some(&provider), "waystation-propagation-test"),
        TraceFlusher::new(provider.clone(), Duration::from_secs(5)),
    );
    let server = StageServer::new(&StageConfig::for_stage(StageKind::Validate), handler).unwrap();
    tokio::spawn(server.serve(listener));

    let client = reqwest::Client::new();
    let response = client
        .get(format!("http://{addr}/health"))
        .header(
            "traceparent",
            "00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01",
        )
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 200);
    let response = client
        .get(format!("http://{addr}/missing"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 404);
    let response = client.get(format!("http://{addr}/")).send().await.unwrap();
    assert_eq!(response.status().as_u16(), 405);

    tokio::task::spawn_blocking(move || provider.force_flush())
        .await
        .unwrap();

    let spans = capture.0.lock().unwrap().clone();
    let names: Vec<&str> = spans.iter().map(|s| &*s.name).collect();
    assert_eq!(names, vec!["GET /health", "GET", "GET /"]);
    assert!(spans.iter().all(|s| s.span_kind == SpanKind::Server));

    let health = &spans[0];
    assert_eq!(
        health.span_context.trace_id(),
        TraceId::from_hex("4bf92f3577b34da6a3ce929d0e0e4736").unwrap()
    );
    let status = |span: &SpanData| {
        span.attributes
            .iter()
            .find(|kv| kv.key.as_str() == "http.response.status_code")
            .map(|kv| kv.value.clone())
    };
    assert_eq!(status(health), Some(Value::I64(200)));
    assert_eq!(status(&spans[1]), Some(Value::I64(404)));
    assert_eq!(status(&spans[2]), Some(Value::I64(405)));
}

//! Jaeger Thrift-over-HTTP span exporter.
//!
//! Encodes each batch as a `jaeger.thrift` `Batch` with the binary protocol
//! and POSTs it to the collector's `/api/traces` endpoint. Export runs on
//! the batch span processor's background task; the request path never
//! waits on it except through the flush barrier.

mod model;
mod thrift;

use std::fmt;

use futures_util::future::BoxFuture;
use opentelemetry::trace::TraceError;
use opentelemetry_sdk::export::trace::{ExportResult, SpanData, SpanExporter};
use opentelemetry_sdk::Resource;

use model::{Batch, JaegerSpan, Process};

/// Content type the collector expects for binary Thrift.
pub const THRIFT_CONTENT_TYPE: &str = "application/x-thrift";

/// Span exporter for a Jaeger collector.
pub struct JaegerExporter {
    client: reqwest::Client,
    endpoint: String,
    fallback_service_name: String,
    process: Process,
}

impl fmt::Debug for JaegerExporter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JaegerExporter")
            .field("endpoint", &self.endpoint)
            .field("service_name", &self.process.service_name)
            .finish_non_exhaustive()
    }
}

impl JaegerExporter {
    /// Creates an exporter posting to an already-normalized collector URL.
    pub fn new(endpoint: impl Into<String>, service_name: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), endpoint, service_name)
    }

    /// Creates an exporter with a caller-supplied HTTP client.
    pub fn with_client(
        client: reqwest::Client,
        endpoint: impl Into<String>,
        service_name: impl Into<String>,
    ) -> Self {
        let service_name = service_name.into();
        Self {
            client,
            endpoint: endpoint.into(),
            process: Process::new(service_name.clone()),
            fallback_service_name: service_name,
        }
    }

    /// Collector URL this exporter posts to.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn encode(&self, batch: Vec<SpanData>) -> Vec<u8> {
        Batch {
            process: self.process.clone(),
            spans: batch.into_iter().map(JaegerSpan::from).collect(),
        }
        .encode()
    }
}

impl SpanExporter for JaegerExporter {
    fn export(&mut self, batch: Vec<SpanData>) -> BoxFuture<'static, ExportResult> {
        let span_count = batch.len();
        let body = self.encode(batch);
        let endpoint = self.endpoint.clone();
        let request = self
            .client
            .post(&self.endpoint)
            .header(reqwest::header::CONTENT_TYPE, THRIFT_CONTENT_TYPE)
            .body(body);

        Box::pin(async move {
            let response = request.send().await.map_err(|e| {
                TraceError::from(format!("jaeger collector {endpoint} unreachable: {e}"))
            })?;

            let status = response.status();
            if !status.is_success() {
                return Err(TraceError::from(format!(
                    "jaeger collector {endpoint} rejected {span_count} spans with {status}"
                )));
            }

            ::tracing::trace!(spans = span_count, "Exported span batch to Jaeger");
            Ok(())
        })
    }

    fn set_resource(&mut self, resource: &Resource) {
        self.process = Process::from_resource(resource, &self.fallback_service_name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use opentelemetry::KeyValue;

    #[test]
    fn test_set_resource_updates_process() {
        let mut exporter = JaegerExporter::new("http://jaeger:14268/api/traces", "fallback");
        assert_eq!(exporter.process.service_name, "fallback");

        exporter.set_resource(&Resource::new([KeyValue::new("service.name", "enricher")]));
        assert_eq!(exporter.process.service_name, "enricher");
    }

    #[test]
    fn test_encode_empty_batch() {
        let exporter = JaegerExporter::new("http://jaeger:14268/api/traces", "svc");
        let bytes = exporter.encode(Vec::new());

        // process struct header, then the service name
        assert_eq!(&bytes[..3], &[12, 0, 1]);
        assert_eq!(&bytes[3..13], &[11, 0, 1, 0, 0, 0, 3, b's', b'v', b'c']);
    }

    #[tokio::test]
    async fn test_export_to_unreachable_collector_fails() {
        let mut exporter = JaegerExporter::new("http://127.0.0.1:9/api/traces", "svc");
        let result = exporter.export(Vec::new()).await;
        assert!(result.is_err());
    }
}

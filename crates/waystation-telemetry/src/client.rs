//! Outbound HTTP client with trace context propagation.

use opentelemetry::trace::{FutureExt, SpanKind, Status, TraceContextExt, Tracer};
use opentelemetry::{global, Context, KeyValue};
use serde::Serialize;

use crate::tracing::{inject_context, HeaderInjector};

const TRACER_NAME: &str = "waystation-client";

/// A `reqwest::Client` that wraps every call in a CLIENT span and injects
/// `traceparent`/`tracestate` into the outgoing headers.
///
/// The span is a child of the caller's current OpenTelemetry context.
#[derive(Debug, Clone, Default)]
pub struct TracedClient {
    inner: reqwest::Client,
}

impl TracedClient {
    /// Creates a client with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// `POST`s `body` as JSON.
    ///
    /// # Errors
    ///
    /// Returns the transport error if the request cannot be built or sent.
    pub async fn post_json<T: Serialize + ?Sized>(
        &self,
        url: &str,
        body: &T,
    ) -> Result<reqwest::Response, reqwest::Error> {
        let request = self.inner.post(url).json(body).build()?;
        self.execute(request).await
    }

    /// Sends a `GET`.
    ///
    /// # Errors
    ///
    /// Returns the transport error if the request cannot be built or sent.
    pub async fn get(&self, url: &str) -> Result<reqwest::Response, reqwest::Error> {
        let request = self.inner.get(url).build()?;
        self.execute(request).await
    }

    /// Sends a prepared request inside a CLIENT span.
    ///
    /// # Errors
    ///
    /// Returns the transport error; HTTP error statuses are not errors.
    pub async fn execute(
        &self,
        mut request: reqwest::Request,
    ) -> Result<reqwest::Response, reqwest::Error> {
        let tracer = global::tracer(TRACER_NAME);
        let parent = Context::current();

        let span = tracer
            .span_builder(format!("{} {}", request.method(), request.url().path()))
            .with_kind(SpanKind::Client)
            .with_attributes(vec![
                KeyValue::new("http.request.method", request.method().to_string()),
                KeyValue::new("url.full", request.url().to_string()),
            ])
            .start_with_context(&tracer, &parent);
        let cx = parent.with_span(span);

        inject_context(&cx, &mut HeaderInjector(request.headers_mut()));

        let result = self
            .inner
            .execute(request)
            .with_context(cx.clone())
            .await;

        let span = cx.span();
        match &result {
            Ok(response) => {
                let status = response.status();
                span.set_attribute(KeyValue::new(
                    "http.status_code",
                    i64::from(status.as_u16()),
                ));
                if status.is_server_error() {
                    span.set_status(Status::error(status.to_string()));
                }
            }
            Err(e) => span.set_status(Status::error(e.to_string())),
        }
        span.end();

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_connection_error_is_returned() {
        let client = TracedClient::new();
        let result = client.get("http://127.0.0.1:9/health").await;
        assert!(result.is_err());
    }

    #[test]
    fn test_invalid_url_is_error() {
        let client = TracedClient::new();
        let result = tokio_test::block_on(client.get("not a url"));
        assert!(result.is_err());
    }
}

//! Stage HTTP server.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use http::header::{HeaderValue, CONTENT_TYPE};
use http::{Method, Request, Response, StatusCode};
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use opentelemetry::Context;
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn, Instrument};
use uuid::Uuid;
use waystation_core::ErrorResponse;
use waystation_telemetry::render_metrics;
use waystation_telemetry::tracing::extract_context;
use waystation_telemetry::HeaderExtractor;

use crate::config::StageConfig;
use crate::error::{ServerError, ServerResult};
use crate::handler::StageHandler;
use crate::health::HealthResponse;
use crate::shutdown::{ConnectionTracker, ShutdownSignal};

/// Request id header, propagated or generated.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Content type of the Prometheus text format.
const PROMETHEUS_CONTENT_TYPE: &str = "text/plain; version=0.0.4";

type HttpResponse = Response<Full<Bytes>>;

/// Serves one stage over HTTP/1.1.
#[derive(Debug)]
pub struct StageServer {
    handler: StageHandler,
    addr: SocketAddr,
    shutdown_timeout: Duration,
    metrics_enabled: bool,
    shutdown: ShutdownSignal,
}

impl StageServer {
    /// Creates a server for `handler` using the address and timeouts in
    /// `config`.
    pub fn new(config: &StageConfig, handler: StageHandler) -> ServerResult<Self> {
        Ok(Self {
            handler,
            addr: config.listen_addr()?,
            shutdown_timeout: config.shutdown_timeout(),
            metrics_enabled: config.telemetry.metrics_enabled,
            shutdown: ShutdownSignal::new(),
        })
    }

    /// Replaces the shutdown signal.
    #[must_use]
    pub fn with_shutdown(mut self, shutdown: ShutdownSignal) -> Self {
        self.shutdown = shutdown;
        self
    }

    /// A handle that stops the server when triggered.
    pub fn shutdown_signal(&self) -> ShutdownSignal {
        self.shutdown.clone()
    }

    /// Address the server binds in [`StageServer::run`].
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Binds the configured address and serves until shutdown.
    pub async fn run(self) -> ServerResult<()> {
        let listener = TcpListener::bind(self.addr)
            .await
            .map_err(|source| ServerError::Bind {
                addr: self.addr.to_string(),
                source,
            })?;
        self.serve(listener).await
    }

    /// Serves on an already bound listener until shutdown, then waits up to
    /// the shutdown timeout for open connections to finish.
    pub async fn serve(self, listener: TcpListener) -> ServerResult<()> {
        let local_addr = listener.local_addr()?;
        let name = self.handler.stage().name();
        info!(stage = name, addr = %local_addr, "Stage listening");

        let server = Arc::new(self);
        let shutdown = server.shutdown.clone();
        let tracker = ConnectionTracker::new();

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, peer)) => {
                            let server = Arc::clone(&server);
                            let token = tracker.acquire();
                            let shutdown = shutdown.clone();

                            tokio::spawn(async move {
                                server.handle_connection(stream, peer, shutdown).await;
                                drop(token);
                            });
                        }
                        Err(e) => {
                            error!(error = %e, "Failed to accept connection");
                        }
                    }
                }

                () = shutdown.recv() => {
                    info!(stage = name, "Shutdown signal received, stopping server");
                    break;
                }
            }
        }

        drop(listener);

        info!(
            active = tracker.active_connections(),
            timeout_ms = u64::try_from(server.shutdown_timeout.as_millis()).unwrap_or(u64::MAX),
            "Waiting for connections to close"
        );

        tokio::select! {
            () = tracker.wait_for_shutdown() => {
                info!("All connections closed");
            }
            () = tokio::time::sleep(server.shutdown_timeout) => {
                warn!(
                    active = tracker.active_connections(),
                    "Shutdown timeout reached with connections still open"
                );
            }
        }

        info!(stage = name, "Server stopped");
        Ok(())
    }

    async fn handle_connection(
        self: Arc<Self>,
        stream: tokio::net::TcpStream,
        peer: SocketAddr,
        shutdown: ShutdownSignal,
    ) {
        let io = TokioIo::new(stream);
        let server = Arc::clone(&self);

        let service = service_fn(move |req: Request<Incoming>| {
            let server = Arc::clone(&server);
            async move { server.handle_request(req, peer).await }
        });

        let conn = http1::Builder::new().serve_connection(io, service);
        tokio::pin!(conn);

        tokio::select! {
            result = conn.as_mut() => {
                if let Err(e) = result {
                    debug!(peer = %peer, error = %e, "Connection error");
                }
            }
            () = shutdown.recv() => {
                // Let the in-flight request finish, including its flush.
                conn.as_mut().graceful_shutdown();
                if let Err(e) = conn.await {
                    debug!(peer = %peer, error = %e, "Connection error during shutdown");
                }
            }
        }
    }

    async fn handle_request(
        &self,
        req: Request<Incoming>,
        peer: SocketAddr,
    ) -> Result<HttpResponse, Infallible> {
        let start = Instant::now();
        let request_id = req
            .headers()
            .get(REQUEST_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .filter(|v| !v.is_empty())
            .map_or_else(|| Uuid::now_v7().to_string(), ToString::to_string);

        let span = tracing::info_span!(
            "request",
            request_id = %request_id,
            method = %req.method(),
            path = %req.uri().path(),
            peer = %peer,
        );

        let parent = extract_context(&HeaderExtractor(req.headers()));
        let method = req.method().clone();
        let path = req.uri().path().to_string();

        let mut response = async move {
            let (response, traced) = self.route(req, &parent).await;
            if !traced {
                self.handler.record_request(
                    &parent,
                    &method,
                    route_template(&path),
                    &path,
                    response.status(),
                );
            }
            debug!(
                status = response.status().as_u16(),
                duration_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX),
                "request completed"
            );
            response
        }
        .instrument(span)
        .await;

        if let Ok(value) = HeaderValue::from_str(&request_id) {
            response.headers_mut().insert(REQUEST_ID_HEADER, value);
        }

        Ok(response)
    }

    /// Dispatches a request. The flag is `true` when the stage handler
    /// already recorded the request's span.
    async fn route(&self, req: Request<Incoming>, parent: &Context) -> (HttpResponse, bool) {
        match (req.method(), req.uri().path()) {
            (&Method::GET, "/health") => (
                json_response(
                    StatusCode::OK,
                    &HealthResponse::ok(self.handler.stage().name()),
                ),
                false,
            ),
            (&Method::GET, "/metrics") => (self.metrics(), false),
            (&Method::POST, "/") => self.invoke(req, parent).await,
            (_, "/" | "/health" | "/metrics") => (
                error_response(StatusCode::METHOD_NOT_ALLOWED, "Method Not Allowed"),
                false,
            ),
            _ => (error_response(StatusCode::NOT_FOUND, "Not Found"), false),
        }
    }

    async fn invoke(&self, req: Request<Incoming>, parent: &Context) -> (HttpResponse, bool) {
        let body = match req.into_body().collect().await {
            Ok(collected) => collected.to_bytes(),
            Err(e) => {
                warn!(error = %e, "Failed to read request body");
                return (
                    error_response(StatusCode::BAD_REQUEST, "failed to read request body"),
                    false,
                );
            }
        };

        let response = match self.handler.handle(parent, &body).await {
            Ok(response) => json_response(StatusCode::OK, &response),
            Err(e) => error_response(e.status_code(), &e.to_string()),
        };
        (response, true)
    }

    fn metrics(&self) -> HttpResponse {
        let rendered = if self.metrics_enabled {
            render_metrics()
        } else {
            None
        };

        match rendered {
            Some(text) => Response::builder()
                .status(StatusCode::OK)
                .header(CONTENT_TYPE, PROMETHEUS_CONTENT_TYPE)
                .body(Full::new(Bytes::from(text)))
                .unwrap_or_else(|_| fallback_response()),
            None => error_response(StatusCode::NOT_FOUND, "Not Found"),
        }
    }
}

/// Route template for a known path.
fn route_template(path: &str) -> Option<&'static str> {
    match path {
        "/" => Some("/"),
        "/health" => Some("/health"),
        "/metrics" => Some("/metrics"),
        _ => None,
    }
}

/// Create a JSON response.
fn json_response<T: serde::Serialize>(status: StatusCode, body: &T) -> HttpResponse {
    let json = serde_json::to_vec(body).unwrap_or_else(|_| b"{}".to_vec());

    Response::builder()
        .status(status)
        .header(CONTENT_TYPE, "application/json")
        .body(Full::new(Bytes::from(json)))
        .unwrap_or_else(|_| fallback_response())
}

/// Create a `{"detail": ...}` error response.
fn error_response(status: StatusCode, detail: &str) -> HttpResponse {
    json_response(status, &ErrorResponse::new(detail))
}

fn fallback_response() -> HttpResponse {
    let mut response = Response::new(Full::new(Bytes::from_static(b"{}")));
    *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
    response
}

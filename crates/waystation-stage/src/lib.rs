//! Waystation stage server.
//!
//! A stage is one hop of a four-step HTTP pipeline:
//!
//! ```text
//!  client ─► validator ─► transformer ─► enricher ─► persister
//!            :8001        :8002          :8003       :8004
//! ```
//!
//! Each hop receives a payload envelope and a step ledger, applies its
//! transform, appends one step record, and answers. Before any response
//! leaves the process, the stage's own span is pushed to the trace backend,
//! so a trace is complete as soon as the last hop answers.
//!
//! # Example Usage
//!
//! ```bash
//! # Run the transform stage on its default port
//! $ waystation-stage --stage transform
//!
//! # Export over OTLP/gRPC instead of Jaeger Thrift
//! $ STAGE=enrich TRACE_EXPORTER=otlp \
//!   OTEL_EXPORTER_OTLP_ENDPOINT=http://jaeger:4317 \
//!   waystation-stage
//! ```

#![doc(html_root_url = "https://docs.rs/waystation-stage/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod config;
pub mod error;
pub mod handler;
pub mod health;
pub mod server;
pub mod shutdown;
pub mod stages;

pub use config::{StageConfig, StageKind, TelemetrySettings};
pub use error::{ServerError, ServerResult};
pub use handler::{parse_body, StageHandler};
pub use health::HealthResponse;
pub use server::{StageServer, REQUEST_ID_HEADER};
pub use shutdown::{ConnectionTracker, ShutdownSignal};
pub use stages::{stage_for, Stage, StageOutput};

/// Stage server version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

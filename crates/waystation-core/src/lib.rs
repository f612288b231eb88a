//! # Waystation Core
//!
//! Request-scoped types shared by every Waystation stage.
//!
//! A unit of work travels through a chain of independently deployed stages.
//! Each hop receives a [`RequestBody`], resolves a canonical `(data, type)`
//! pair from it, runs its own transform, layers the result onto the inbound
//! [`PayloadEnvelope`] and appends one [`StepRecord`] to the [`StepLedger`].
//!
//! This crate holds the pure half of that contract:
//!
//! - [`PayloadEnvelope`] / [`RequestBody`] / [`StageResponse`] - wire shapes
//! - [`Metadata`] - ordered string-keyed map with shallow merge semantics
//! - [`resolve`] - the data extraction resolver
//! - [`merge_envelope`] - the envelope merger
//! - [`StepLedger`] - the append-only audit trail
//! - [`StageError`] - the stage error taxonomy
//!
//! Nothing here performs I/O; tracing and HTTP live in `waystation-telemetry`
//! and `waystation-stage`.
//!
//! ```
//! use waystation_core::{resolve, RequestBody, PayloadKind};
//!
//! let body: RequestBody = serde_json::from_str(r#"{"text": "  hello  "}"#).unwrap();
//! let input = resolve(&body);
//! assert_eq!(input.data, "hello");
//! assert_eq!(input.kind, PayloadKind::Text);
//! ```

#![doc(html_root_url = "https://docs.rs/waystation-core/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

mod envelope;
mod error;
mod extract;
pub mod ledger;
mod merge;
mod metadata;

pub use envelope::{
    ForwardResponse, PayloadEnvelope, PayloadKind, PersistedResult, RequestBody, RequestInput,
    StageResponse,
};
pub use error::{ErrorResponse, StageError, StageResult};
pub use extract::{resolve, Extracted};
pub use ledger::{PreviewPolicy, StepEntry, StepLedger, StepRecord, StepStatus};
pub use merge::merge_envelope;
pub use metadata::Metadata;

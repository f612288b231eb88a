//! The four stage variants.
//!
//! A [`Stage`] supplies only the transform step. Parsing, the delay,
//! resolution, merging, ledgering, span annotation and the flush barrier are
//! the same for every variant and live in [`crate::handler::StageHandler`].

mod enrich;
mod persist;
mod transform;
mod validate;

use std::fmt;
use std::sync::Arc;

use opentelemetry::KeyValue;
use waystation_core::{Extracted, Metadata, PreviewPolicy, RequestBody, StageResult};

use crate::config::StageKind;

pub use enrich::Enrich;
pub use persist::Persist;
pub use transform::Transform;
pub use validate::{Validate, MAX_TEXT_CHARS};

/// Result of a successful transform.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StageOutput {
    /// Outbound data.
    pub data: String,
    /// Metadata merged into the outbound envelope.
    pub metadata: Metadata,
    /// Whether `metadata` is also written to the step record.
    pub record_metadata: bool,
}

impl StageOutput {
    /// Output with no metadata.
    pub fn new(data: impl Into<String>) -> Self {
        Self {
            data: data.into(),
            ..Self::default()
        }
    }

    /// Attaches envelope metadata.
    #[must_use]
    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }

    /// Attaches metadata to both the envelope and the step record.
    #[must_use]
    pub fn with_recorded_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self.record_metadata = true;
        self
    }
}

/// Stage-specific behaviour.
pub trait Stage: Send + Sync + fmt::Debug {
    /// Which stage this is.
    fn kind(&self) -> StageKind;

    /// Name written to step records.
    fn name(&self) -> &'static str {
        self.kind().service_name()
    }

    /// How step record previews are rendered.
    fn preview_policy(&self) -> PreviewPolicy;

    /// Runs the transform on resolved input.
    ///
    /// An error here means no step record is written.
    fn process(&self, input: &Extracted, request: &RequestBody) -> StageResult<StageOutput>;

    /// Terminal stages answer with a stored result instead of a forward
    /// payload.
    fn is_terminal(&self) -> bool {
        false
    }

    /// Extra span attributes after a successful transform.
    fn span_attributes(&self, _request: &RequestBody, _output: &StageOutput) -> Vec<KeyValue> {
        Vec::new()
    }
}

/// Returns the implementation for `kind`.
pub fn stage_for(kind: StageKind) -> Arc<dyn Stage> {
    match kind {
        StageKind::Validate => Arc::new(Validate),
        StageKind::Transform => Arc::new(Transform),
        StageKind::Enrich => Arc::new(Enrich),
        StageKind::Persist => Arc::new(Persist),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_for_matches_kind() {
        for kind in StageKind::ALL {
            let stage = stage_for(kind);
            assert_eq!(stage.kind(), kind);
            assert_eq!(stage.name(), kind.service_name());
        }
    }

    #[test]
    fn test_only_persist_is_terminal() {
        let terminal: Vec<StageKind> = StageKind::ALL
            .into_iter()
            .filter(|k| stage_for(*k).is_terminal())
            .collect();
        assert_eq!(terminal, vec![StageKind::Persist]);
    }
}

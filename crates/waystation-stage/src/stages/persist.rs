use opentelemetry::KeyValue;
use waystation_core::ledger::{truncate_chars, SPAN_PREVIEW_CHARS};
use waystation_core::{Extracted, PreviewPolicy, RequestBody, StageResult};

use super::{Stage, StageOutput};
use crate::config::StageKind;
use crate::handler::attributes;

/// Terminal stage. Data passes through and the response reports it stored.
#[derive(Debug, Clone, Copy, Default)]
pub struct Persist;

impl Stage for Persist {
    fn kind(&self) -> StageKind {
        StageKind::Persist
    }

    fn preview_policy(&self) -> PreviewPolicy {
        PreviewPolicy::Full
    }

    fn process(&self, input: &Extracted, _request: &RequestBody) -> StageResult<StageOutput> {
        Ok(StageOutput::new(input.data.clone()))
    }

    fn is_terminal(&self) -> bool {
        true
    }

    fn span_attributes(&self, request: &RequestBody, output: &StageOutput) -> Vec<KeyValue> {
        let steps = i64::try_from(request.steps.len()).unwrap_or(i64::MAX);
        vec![
            KeyValue::new(attributes::INPUT_STEPS_COUNT, steps),
            KeyValue::new(
                attributes::OUTPUT_RESULT,
                truncate_chars(&output.data, SPAN_PREVIEW_CHARS).to_string(),
            ),
        ]
    }
}

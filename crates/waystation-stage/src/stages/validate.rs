use waystation_core::{Extracted, PreviewPolicy, RequestBody, StageError, StageResult};

use super::{Stage, StageOutput};
use crate::config::StageKind;

/// Longest accepted text payload, in characters.
pub const MAX_TEXT_CHARS: usize = 10_000;

/// Rejects empty input and text over [`MAX_TEXT_CHARS`]; passes everything
/// else through.
#[derive(Debug, Clone, Copy, Default)]
pub struct Validate;

impl Stage for Validate {
    fn kind(&self) -> StageKind {
        StageKind::Validate
    }

    fn preview_policy(&self) -> PreviewPolicy {
        PreviewPolicy::Bounded(500)
    }

    fn process(&self, input: &Extracted, _request: &RequestBody) -> StageResult<StageOutput> {
        if input.data.is_empty() {
            return Err(StageError::invalid_input("Input must be non-empty"));
        }

        if input.kind.is_text() && input.data.chars().count() > MAX_TEXT_CHARS {
            return Err(StageError::invalid_input(format!(
                "Text length must be <= {MAX_TEXT_CHARS}"
            )));
        }

        Ok(StageOutput::new(input.data.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use waystation_core::PayloadKind;

    fn run(data: String, kind: PayloadKind) -> StageResult<StageOutput> {
        Validate.process(&Extracted { data, kind }, &RequestBody::default())
    }

    #[test]
    fn test_rejects_empty() {
        let err = run(String::new(), PayloadKind::Text).unwrap_err();
        assert_eq!(err.to_string(), "Input must be non-empty");
    }

    #[test]
    fn test_empty_rejected_for_any_kind() {
        assert!(run(String::new(), PayloadKind::parse("image")).is_err());
    }

    #[test]
    fn test_length_bound_is_inclusive() {
        assert!(run("a".repeat(MAX_TEXT_CHARS), PayloadKind::Text).is_ok());

        let err = run("a".repeat(MAX_TEXT_CHARS + 1), PayloadKind::Text).unwrap_err();
        assert_eq!(err.to_string(), "Text length must be <= 10000");
    }

    #[test]
    fn test_length_counts_characters() {
        assert!(run("é".repeat(MAX_TEXT_CHARS), PayloadKind::Text).is_ok());
    }

    #[test]
    fn test_non_text_has_no_length_bound() {
        let out = run("x".repeat(MAX_TEXT_CHARS * 2), PayloadKind::parse("csv")).unwrap();
        assert_eq!(out.data.len(), MAX_TEXT_CHARS * 2);
    }

    proptest! {
        #[test]
        fn accepts_iff_non_empty_and_bounded(len in 0usize..=MAX_TEXT_CHARS + 50) {
            let result = run("v".repeat(len), PayloadKind::Text);
            prop_assert_eq!(result.is_ok(), len > 0 && len <= MAX_TEXT_CHARS);
        }

        #[test]
        fn output_equals_input(data in "[a-z ]{1,64}") {
            let out = run(data.clone(), PayloadKind::Text).unwrap();
            prop_assert_eq!(out.data, data);
            prop_assert!(out.metadata.is_empty());
        }
    }
}

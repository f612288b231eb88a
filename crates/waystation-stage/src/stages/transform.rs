use waystation_core::{Extracted, PreviewPolicy, RequestBody, StageResult};

use super::{Stage, StageOutput};
use crate::config::StageKind;

/// Upper-cases text payloads; other kinds pass through.
#[derive(Debug, Clone, Copy, Default)]
pub struct Transform;

impl Stage for Transform {
    fn kind(&self) -> StageKind {
        StageKind::Transform
    }

    fn preview_policy(&self) -> PreviewPolicy {
        PreviewPolicy::Full
    }

    fn process(&self, input: &Extracted, _request: &RequestBody) -> StageResult<StageOutput> {
        let data = if input.kind.is_text() {
            input.data.to_uppercase().trim().to_string()
        } else {
            input.data.clone()
        };
        Ok(StageOutput::new(data))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use waystation_core::PayloadKind;

    fn run(data: &str, kind: PayloadKind) -> String {
        Transform
            .process(
                &Extracted {
                    data: data.to_string(),
                    kind,
                },
                &RequestBody::default(),
            )
            .unwrap()
            .data
    }

    #[test]
    fn test_uppercases_text() {
        assert_eq!(run("abc", PayloadKind::Text), "ABC");
        assert_eq!(run("straße", PayloadKind::Text), "STRASSE");
    }

    #[test]
    fn test_non_text_passes_through() {
        assert_eq!(run("abc", PayloadKind::parse("csv")), "abc");
    }

    proptest! {
        #[test]
        fn text_output_is_upper_trimmed(data in "\\PC{0,64}") {
            prop_assert_eq!(
                run(&data, PayloadKind::Text),
                data.to_uppercase().trim().to_string()
            );
        }

        #[test]
        fn non_text_is_identity(data in "\\PC{0,64}", kind in "[a-z]{1,8}") {
            prop_assume!(kind != "text");
            prop_assert_eq!(run(&data, PayloadKind::parse(&kind)), data);
        }
    }
}

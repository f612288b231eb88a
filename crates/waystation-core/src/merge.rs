//! Envelope merger.

use crate::envelope::{PayloadEnvelope, PayloadKind};
use crate::metadata::Metadata;

/// Builds the outbound envelope for a stage.
///
/// Starts from every inbound field (unrecognised keys included), then sets
/// `type` to the resolved kind, `data` to the stage output, and `metadata`
/// to the inbound metadata merged with `stage_metadata`. The outbound
/// envelope always carries a `metadata` object, possibly empty.
///
/// ```
/// use waystation_core::{merge_envelope, Metadata, PayloadEnvelope, PayloadKind};
///
/// let inbound = PayloadEnvelope::with_data("abc").metadata(Metadata::new().with("a", 1));
/// let out = merge_envelope(
///     Some(&inbound),
///     &PayloadKind::Text,
///     "ABC",
///     &Metadata::new().with("b", 2),
/// );
///
/// assert_eq!(out.data_str(), Some("ABC"));
/// assert_eq!(out.metadata, Some(Metadata::new().with("a", 1).with("b", 2)));
/// ```
pub fn merge_envelope(
    inbound: Option<&PayloadEnvelope>,
    kind: &PayloadKind,
    output: &str,
    stage_metadata: &Metadata,
) -> PayloadEnvelope {
    let mut envelope = inbound.cloned().unwrap_or_default();

    let metadata = envelope
        .metadata
        .take()
        .unwrap_or_default()
        .merge(stage_metadata);

    envelope.kind = Some(kind.clone());
    envelope.data = Some(output.into());
    envelope.metadata = Some(metadata);
    envelope
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_merge_without_inbound() {
        let out = merge_envelope(None, &PayloadKind::Text, "hi", &Metadata::new());
        assert_eq!(
            serde_json::to_value(&out).unwrap(),
            json!({"type": "text", "data": "hi", "metadata": {}})
        );
    }

    #[test]
    fn test_merge_keeps_unknown_and_legacy_keys() {
        let inbound: PayloadEnvelope = serde_json::from_value(json!({
            "type": "csv",
            "text": "raw",
            "source": "upload",
            "metadata": {"origin": "gateway"}
        }))
        .unwrap();

        let out = merge_envelope(
            Some(&inbound),
            &PayloadKind::parse("csv"),
            "raw",
            &Metadata::new().with("id", "1"),
        );
        let value = serde_json::to_value(&out).unwrap();

        assert_eq!(value["source"], json!("upload"));
        assert_eq!(value["text"], json!("raw"));
        assert_eq!(value["data"], json!("raw"));
        assert_eq!(value["type"], json!("csv"));
        assert_eq!(value["metadata"], json!({"origin": "gateway", "id": "1"}));
    }

    #[test]
    fn test_stage_metadata_wins_on_collision() {
        let inbound = PayloadEnvelope::with_data("x")
            .metadata(Metadata::new().with("id", "old").with("a", 1));
        let out = merge_envelope(
            Some(&inbound),
            &PayloadKind::Text,
            "x",
            &Metadata::new().with("id", "new"),
        );

        let meta = out.metadata.unwrap();
        assert_eq!(meta.get("id"), Some(&json!("new")));
        assert_eq!(meta.get("a"), Some(&json!(1)));
    }

    #[test]
    fn test_merge_sets_resolved_type() {
        let inbound = PayloadEnvelope::with_data("x");
        let out = merge_envelope(Some(&inbound), &PayloadKind::Text, "x", &Metadata::new());
        assert_eq!(out.kind, Some(PayloadKind::Text));
    }
}

//! Data extraction resolver.

use serde_json::Value;

use crate::envelope::{PayloadKind, RequestBody, RequestInput};

/// Canonical input a stage works on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Extracted {
    /// Trimmed data.
    pub data: String,
    /// Declared payload type.
    pub kind: PayloadKind,
}

/// Resolves the `(data, type)` pair for a request.
///
/// Precedence, first match wins:
///
/// 1. non-empty envelope: `payload.data`, then `payload.text`, then the
///    top-level `text`, then `""`; type is `payload.type` or `"text"`
/// 2. otherwise: the top-level `text`; type `"text"`
///
/// Leading and trailing whitespace is trimmed. Non-string values are
/// rendered as compact JSON. Never fails; validity is the stage's concern.
pub fn resolve(body: &RequestBody) -> Extracted {
    match body.input() {
        RequestInput::Envelope {
            envelope,
            legacy_text,
        } => {
            let data = envelope
                .data
                .as_ref()
                .or(envelope.text.as_ref())
                .map_or_else(|| legacy_text.to_string(), render);

            Extracted {
                data: data.trim().to_string(),
                kind: envelope.kind.clone().unwrap_or_default(),
            }
        }
        RequestInput::Legacy { text } => Extracted {
            data: text.trim().to_string(),
            kind: PayloadKind::Text,
        },
    }
}

fn render(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

//! Wire shapes exchanged between stages.
//!
//! A stage receives a [`RequestBody`]. Callers written against the single
//! field protocol only send `text`; newer callers send a [`PayloadEnvelope`].
//! [`RequestBody::input`] collapses that ambiguity into a [`RequestInput`]
//! once, and everything downstream works from the resolved form.

use std::fmt;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ledger::StepLedger;
use crate::metadata::Metadata;

/// Classification of the payload carried in an envelope.
///
/// Only [`PayloadKind::Text`] is subject to text-specific transforms and
/// length bounds; every other value is opaque and passes through.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum PayloadKind {
    /// Plain text (`"text"` on the wire).
    #[default]
    Text,
    /// Any other declared type, kept verbatim.
    Other(String),
}

impl PayloadKind {
    /// Wire value for [`PayloadKind::Text`].
    pub const TEXT: &'static str = "text";

    /// Parses a wire value. Matching is exact.
    pub fn parse(value: &str) -> Self {
        if value == Self::TEXT {
            Self::Text
        } else {
            Self::Other(value.to_string())
        }
    }

    /// Returns the wire value.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Text => Self::TEXT,
            Self::Other(kind) => kind,
        }
    }

    /// Returns `true` for text payloads.
    pub fn is_text(&self) -> bool {
        matches!(self, Self::Text)
    }
}

impl From<String> for PayloadKind {
    fn from(value: String) -> Self {
        Self::parse(&value)
    }
}

impl From<PayloadKind> for String {
    fn from(kind: PayloadKind) -> Self {
        match kind {
            PayloadKind::Text => PayloadKind::TEXT.to_string(),
            PayloadKind::Other(kind) => kind,
        }
    }
}

impl fmt::Display for PayloadKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The canonical payload object threaded between stages.
///
/// `null` for `data` or `text` is treated the same as an absent key. Keys
/// this struct does not recognise are kept in [`PayloadEnvelope::extra`] and
/// written back out unchanged.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PayloadEnvelope {
    /// Declared payload type (`"text"` when absent).
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<PayloadKind>,

    /// Current value being processed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,

    /// Older spelling of `data`, consulted only when `data` is absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<Value>,

    /// Metadata accumulated by earlier stages.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Metadata>,

    /// Unrecognised keys, carried through untouched.
    #[serde(flatten)]
    pub extra: IndexMap<String, Value>,
}

impl PayloadEnvelope {
    /// Creates an envelope holding `data`.
    pub fn with_data(data: impl Into<Value>) -> Self {
        Self {
            data: Some(data.into()),
            ..Self::default()
        }
    }

    /// Sets the declared type.
    #[must_use]
    pub fn kind(mut self, kind: PayloadKind) -> Self {
        self.kind = Some(kind);
        self
    }

    /// Sets the metadata.
    #[must_use]
    pub fn metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = Some(metadata);
        self
    }

    /// Returns `true` if no key at all was supplied.
    ///
    /// An empty envelope is ignored by the resolver in favour of the
    /// legacy text field.
    pub fn is_empty(&self) -> bool {
        self.kind.is_none()
            && self.data.is_none()
            && self.text.is_none()
            && self.metadata.is_none()
            && self.extra.is_empty()
    }

    /// Returns the `data` value as a string, if present.
    pub fn data_str(&self) -> Option<&str> {
        self.data.as_ref().and_then(Value::as_str)
    }
}

/// Body accepted by `POST /` on every stage.
///
/// All fields are optional and default to empty values.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RequestBody {
    /// Structured payload.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<PayloadEnvelope>,

    /// Legacy single-field input.
    pub text: String,

    /// Audit trail so far.
    pub steps: StepLedger,
}

/// The two ways a request can carry its input.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RequestInput<'a> {
    /// A non-empty envelope, with the legacy field kept as last fallback.
    Envelope {
        /// The envelope.
        envelope: &'a PayloadEnvelope,
        /// The request's top-level `text` field.
        legacy_text: &'a str,
    },
    /// No usable envelope; only the legacy field.
    Legacy {
        /// The request's top-level `text` field.
        text: &'a str,
    },
}

impl RequestBody {
    /// Creates a legacy single-field request.
    pub fn from_text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Self::default()
        }
    }

    /// Classifies how this request carries its input.
    pub fn input(&self) -> RequestInput<'_> {
        match &self.payload {
            Some(envelope) if !envelope.is_empty() => RequestInput::Envelope {
                envelope,
                legacy_text: &self.text,
            },
            _ => RequestInput::Legacy { text: &self.text },
        }
    }
}

/// Response of a non-terminal stage; also a valid body for the next hop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForwardResponse {
    /// Outbound envelope.
    pub payload: PayloadEnvelope,
    /// Output data mirrored into the legacy field.
    pub text: String,
    /// Ledger including this stage's record.
    pub steps: StepLedger,
}

/// Response of the terminal (persist) stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedResult {
    /// The stored value.
    pub result: String,
    /// Always `true` on success.
    pub stored: bool,
    /// Outbound envelope.
    pub payload: PayloadEnvelope,
    /// Final ledger.
    pub steps: StepLedger,
}

/// Successful stage response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StageResponse {
    /// Terminal stage result.
    Terminal(PersistedResult),
    /// Payload to hand to the next stage.
    Forward(ForwardResponse),
}

impl StageResponse {
    /// Outbound envelope.
    pub fn payload(&self) -> &PayloadEnvelope {
        match self {
            Self::Terminal(result) => &result.payload,
            Self::Forward(forward) => &forward.payload,
        }
    }

    /// Ledger after this stage.
    pub fn steps(&self) -> &StepLedger {
        match self {
            Self::Terminal(result) => &result.steps,
            Self::Forward(forward) => &forward.steps,
        }
    }

    /// Returns `true` for a terminal result.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Terminal(_))
    }

    /// Converts the response into the request body for the next hop.
    pub fn into_request_body(self) -> RequestBody {
        match self {
            Self::Terminal(result) => RequestBody {
                payload: Some(result.payload),
                text: result.result,
                steps: result.steps,
            },
            Self::Forward(forward) => RequestBody {
                payload: Some(forward.payload),
                text: forward.text,
                steps: forward.steps,
            },
        }
    }
}

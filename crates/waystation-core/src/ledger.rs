//! The step ledger: an ordered, append-only audit trail.
//!
//! Every stage that completes successfully appends exactly one
//! [`StepRecord`] to the ledger it received. Records are never reordered or
//! edited once written. Appending is a pure operation that returns a new
//! ledger, so a rejected request leaves the inbound ledger as it was.
//!
//! Record `input`/`output` fields are previews. They may be truncated by
//! [`PreviewPolicy`]; the full value keeps flowing through the envelope.
//!
//! Entries written by other producers do not have to look like a
//! [`StepRecord`]. Anything that does not read back exactly as one is kept
//! as a [`StepEntry::Foreign`] value and written out unchanged.

use indexmap::IndexMap;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::envelope::PayloadKind;
use crate::metadata::Metadata;

/// Number of characters recorded on spans for input/output previews.
pub const SPAN_PREVIEW_CHARS: usize = 200;

/// Outcome recorded for a stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    /// The stage accepted and processed the payload.
    Ok,
    /// The stage rejected the payload.
    Invalid,
}

impl StepStatus {
    /// Wire value.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::Invalid => "invalid",
        }
    }
}

/// One stage's record of its work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepRecord {
    /// Name of the stage that wrote the record.
    pub service: String,

    /// Input preview.
    #[serde(default)]
    pub input: String,

    /// Output preview.
    #[serde(default)]
    pub output: String,

    /// Stage outcome.
    pub status: StepStatus,

    /// Metadata contributed by the stage, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Metadata>,

    /// Keys written by other producers, kept verbatim.
    #[serde(flatten)]
    pub extra: IndexMap<String, Value>,
}

impl StepRecord {
    /// Creates a record.
    pub fn new(
        service: impl Into<String>,
        input: impl Into<String>,
        output: impl Into<String>,
        status: StepStatus,
    ) -> Self {
        Self {
            service: service.into(),
            input: input.into(),
            output: output.into(),
            status,
            metadata: None,
            extra: IndexMap::new(),
        }
    }

    /// Attaches stage metadata. Empty metadata is not recorded.
    #[must_use]
    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = (!metadata.is_empty()).then_some(metadata);
        self
    }
}

/// One ledger entry.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum StepEntry {
    /// A record in this system's shape.
    Record(StepRecord),
    /// Anything else, kept verbatim.
    Foreign(Value),
}

impl StepEntry {
    /// Classifies an inbound entry.
    ///
    /// A value becomes a [`StepEntry::Record`] only if it serializes back to
    /// the same JSON, so no inbound entry is ever rewritten.
    pub fn from_value(value: Value) -> Self {
        match StepRecord::deserialize(&value) {
            Ok(record) if serde_json::to_value(&record).is_ok_and(|v| v == value) => {
                Self::Record(record)
            }
            _ => Self::Foreign(value),
        }
    }

    /// The record, if this entry is one.
    pub fn as_record(&self) -> Option<&StepRecord> {
        match self {
            Self::Record(record) => Some(record),
            Self::Foreign(_) => None,
        }
    }

    /// Name of the producing service, when the entry carries one.
    pub fn service(&self) -> Option<&str> {
        match self {
            Self::Record(record) => Some(&record.service),
            Self::Foreign(value) => value.get("service").and_then(Value::as_str),
        }
    }
}

impl From<StepRecord> for StepEntry {
    fn from(record: StepRecord) -> Self {
        Self::Record(record)
    }
}

impl<'de> Deserialize<'de> for StepEntry {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Value::deserialize(deserializer).map(Self::from_value)
    }
}

/// Ordered sequence of [`StepEntry`] values.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StepLedger(Vec<StepEntry>);

impl StepLedger {
    /// Creates an empty ledger.
    #[must_use]
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// Returns a new ledger equal to `self` with `record` as its last element.
    ///
    /// `self` is left untouched.
    ///
    /// ```
    /// use waystation_core::{StepLedger, StepRecord, StepStatus};
    ///
    /// let before = StepLedger::new();
    /// let after = before.append(StepRecord::new("validator", "hi", "hi", StepStatus::Ok));
    ///
    /// assert_eq!(before.len(), 0);
    /// assert_eq!(after.len(), 1);
    /// ```
    #[must_use]
    pub fn append(&self, record: StepRecord) -> StepLedger {
        let mut entries = Vec::with_capacity(self.0.len() + 1);
        entries.extend_from_slice(&self.0);
        entries.push(StepEntry::Record(record));
        StepLedger(entries)
    }

    /// Number of entries, foreign ones included.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns `true` if nothing has been recorded yet.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The entries in call order.
    pub fn entries(&self) -> &[StepEntry] {
        &self.0
    }

    /// The entries in this system's record shape, in call order.
    pub fn records(&self) -> Vec<&StepRecord> {
        self.0.iter().filter_map(StepEntry::as_record).collect()
    }

    /// The most recent entry.
    pub fn last(&self) -> Option<&StepEntry> {
        self.0.last()
    }

    /// Iterates over the entries in call order.
    pub fn iter(&self) -> std::slice::Iter<'_, StepEntry> {
        self.0.iter()
    }

    /// Service names in call order. Entries without one are skipped.
    pub fn services(&self) -> Vec<&str> {
        self.0.iter().filter_map(StepEntry::service).collect()
    }
}

impl From<Vec<StepRecord>> for StepLedger {
    fn from(records: Vec<StepRecord>) -> Self {
        Self(records.into_iter().map(StepEntry::Record).collect())
    }
}

impl From<Vec<StepEntry>> for StepLedger {
    fn from(entries: Vec<StepEntry>) -> Self {
        Self(entries)
    }
}

impl<'a> IntoIterator for &'a StepLedger {
    type Item = &'a StepEntry;
    type IntoIter = std::slice::Iter<'a, StepEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// How a stage renders input/output previews onto its [`StepRecord`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreviewPolicy {
    /// Record the complete value regardless of payload type.
    Full,
    /// Record at most `n` characters of text; non-text payloads are shown
    /// as a `[type]` placeholder.
    Bounded(usize),
}

impl PreviewPolicy {
    /// Renders a preview of `data`.
    pub fn render(self, data: &str, kind: &PayloadKind) -> String {
        match self {
            Self::Full => data.to_string(),
            Self::Bounded(max) if kind.is_text() => truncate_chars(data, max).to_string(),
            Self::Bounded(_) => format!("[{kind}]"),
        }
    }
}

/// Returns the first `max` characters of `s`.
///
/// Counts Unicode scalar values, never splitting a character.
pub fn truncate_chars(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

//! Envelope metadata.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// String-keyed metadata carried on a [`PayloadEnvelope`](crate::PayloadEnvelope)
/// and optionally on a [`StepRecord`](crate::StepRecord).
///
/// Keys keep insertion order so the serialized envelope reads in the order
/// stages contributed to it. Equality ignores order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Metadata(IndexMap<String, Value>);

impl Metadata {
    /// Creates an empty metadata map.
    #[must_use]
    pub fn new() -> Self {
        Self(IndexMap::new())
    }

    /// Inserts a value, returning the previous one for this key.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.0.insert(key.into(), value.into())
    }

    /// Builder-style insert.
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(key, value);
        self
    }

    /// Returns the value stored under `key`.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Returns `true` if `key` is present.
    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    /// Number of keys.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns `true` if there are no keys.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterates over entries in insertion order.
    pub fn iter(&self) -> indexmap::map::Iter<'_, String, Value> {
        self.0.iter()
    }

    /// Shallow key-wise union of `self` and `other`.
    ///
    /// Keys from `self` are never dropped. On collision the value from
    /// `other` wins but the key keeps its original position; keys only
    /// present in `other` are appended.
    ///
    /// ```
    /// use waystation_core::Metadata;
    ///
    /// let earlier = Metadata::new().with("a", 1);
    /// let stage = Metadata::new().with("b", 2);
    /// let merged = earlier.merge(&stage);
    ///
    /// assert_eq!(merged, Metadata::new().with("a", 1).with("b", 2));
    /// ```
    #[must_use]
    pub fn merge(&self, other: &Metadata) -> Metadata {
        let mut merged = self.0.clone();
        for (key, value) in &other.0 {
            merged.insert(key.clone(), value.clone());
        }
        Metadata(merged)
    }
}

impl FromIterator<(String, Value)> for Metadata {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl<'a> IntoIterator for &'a Metadata {
    type Item = (&'a String, &'a Value);
    type IntoIter = indexmap::map::Iter<'a, String, Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl From<IndexMap<String, Value>> for Metadata {
    fn from(map: IndexMap<String, Value>) -> Self {
        Self(map)
    }
}

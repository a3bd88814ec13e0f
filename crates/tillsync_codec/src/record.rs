//! Field map used for queued payloads and cached entities.

use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::collections::btree_map;
use std::collections::BTreeMap;

/// A flat record: text field names mapped to values.
///
/// Fields are kept sorted by name so that encoding a record twice yields
/// identical bytes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Record(BTreeMap<String, Value>);

impl Record {
    /// Creates an empty record.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets a field, returning the record for chaining.
    #[must_use]
    pub fn with(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(field, value);
        self
    }

    /// Sets a field, returning the previous value if any.
    pub fn insert(&mut self, field: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.0.insert(field.into(), value.into())
    }

    /// Returns the value of a field.
    #[must_use]
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    /// Removes a field, returning its value.
    pub fn remove(&mut self, field: &str) -> Option<Value> {
        self.0.remove(field)
    }

    /// Returns true if the field is present.
    #[must_use]
    pub fn contains(&self, field: &str) -> bool {
        self.0.contains_key(field)
    }

    /// Number of fields.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true if the record has no fields.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterates over fields in name order.
    pub fn iter(&self) -> btree_map::Iter<'_, String, Value> {
        self.0.iter()
    }

    /// Splits off the key field.
    ///
    /// Returns the key value and a record holding every other field, or
    /// `None` if the key field is missing or null.
    #[must_use]
    pub fn split_key(&self, key_field: &str) -> Option<(Value, Record)> {
        let key = self.0.get(key_field).filter(|v| !v.is_null())?.clone();
        let rest = self
            .0
            .iter()
            .filter(|(name, _)| name.as_str() != key_field)
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect();
        Some((key, Record(rest)))
    }

    /// Consumes the record and returns the underlying map.
    #[must_use]
    pub fn into_inner(self) -> BTreeMap<String, Value> {
        self.0
    }
}

impl From<BTreeMap<String, Value>> for Record {
    fn from(map: BTreeMap<String, Value>) -> Self {
        Self(map)
    }
}

impl From<Record> for Value {
    fn from(record: Record) -> Self {
        Value::Map(record.0)
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Record {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

impl IntoIterator for Record {
    type Item = (String, Value);
    type IntoIter = btree_map::IntoIter<String, Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'a> IntoIterator for &'a Record {
    type Item = (&'a String, &'a Value);
    type IntoIter = btree_map::Iter<'a, String, Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// Builds a [`Record`] from `field => value` pairs.
///
/// ```
/// use tillsync_codec::record;
///
/// let stock = record! { "id" => "S1", "quantity" => 3 };
/// assert_eq!(stock.len(), 2);
/// ```
#[macro_export]
macro_rules! record {
    () => {
        $crate::Record::new()
    };
    ($($field:expr => $value:expr),+ $(,)?) => {{
        let mut record = $crate::Record::new();
        $( record.insert($field, $value); )+
        record
    }};
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_key_separates_fields() {
        let payload = Record::new().with("id", "S1").with("quantity", 3);
        let (key, fields) = payload.split_key("id").unwrap();

        assert_eq!(key, Value::from("S1"));
        assert_eq!(fields.len(), 1);
        assert_eq!(fields.get("quantity"), Some(&Value::Integer(3)));
        assert!(!fields.contains("id"));
    }

    #[test]
    fn split_key_rejects_missing_or_null_key() {
        let payload = Record::new().with("quantity", 3);
        assert!(payload.split_key("id").is_none());

        let payload = Record::new().with("id", Value::Null);
        assert!(payload.split_key("id").is_none());
    }

    #[test]
    fn macro_builds_record() {
        let order = crate::record! { "entity_id" => "E1", "total" => 5000 };
        assert_eq!(order.get("total"), Some(&Value::Integer(5000)));
        assert_eq!(crate::record! {}, Record::new());
    }

    #[test]
    fn serializes_as_plain_map() {
        let record = Record::new().with("a", 1);
        assert_eq!(serde_json::to_string(&record).unwrap(), r#"{"a":1}"#);
    }
}

use crate::value::Value;
use derive_more::Display;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Name of the synthetic primary-key attribute present on every record kind.
pub const PRIMARY_KEY: &str = "id";

///
/// AttributeKind
///
/// Declared type of a record attribute. `LongText` and `Blob` are storable
/// but excluded from filtering, sorting and distinct queries.
///

#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum AttributeKind {
    Text,
    LongText,
    Blob,
    Bool,
    Timestamp,
    Int,
    Decimal { scale: u32, precision: u32 },
}

impl AttributeKind {
    #[must_use]
    pub const fn is_large_object(&self) -> bool {
        matches!(self, Self::LongText | Self::Blob)
    }

    /// Whether a value is admissible for this kind. `Null` always is.
    #[must_use]
    pub const fn admits(&self, value: &Value) -> bool {
        match (self, value) {
            (_, Value::Null)
            | (Self::Text, Value::Text(_))
            | (Self::LongText, Value::LongText(_))
            | (Self::Blob, Value::Blob(_))
            | (Self::Bool, Value::Bool(_))
            | (Self::Timestamp, Value::Timestamp(_))
            | (Self::Int, Value::Int(_))
            | (Self::Decimal { .. }, Value::Decimal(_) | Value::Int(_)) => true,
            _ => false,
        }
    }
}

///
/// Attribute
///
/// Named, typed attribute descriptor belonging to a record model.
///

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct Attribute {
    name: String,
    kind: AttributeKind,
}

impl Attribute {
    pub fn new(name: impl Into<String>, kind: AttributeKind) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub const fn kind(&self) -> &AttributeKind {
        &self.kind
    }

    #[must_use]
    pub fn is_primary_key(&self) -> bool {
        self.name == PRIMARY_KEY
    }

    pub(crate) fn primary_key() -> Self {
        Self::new(PRIMARY_KEY, AttributeKind::Text)
    }
}

///
/// RecordModel
///
/// A record kind: its name plus the ordered attribute list. The synthetic
/// `id` primary key is always attribute zero, whether or not the caller
/// declared it.
///

#[derive(Clone, Debug)]
pub struct RecordModel {
    kind: String,
    attributes: Vec<Attribute>,
}

impl RecordModel {
    pub fn new(kind: impl Into<String>, attributes: Vec<Attribute>) -> Self {
        let mut all = vec![Attribute::primary_key()];
        all.extend(attributes.into_iter().filter(|a| !a.is_primary_key()));

        Self {
            kind: kind.into(),
            attributes: all,
        }
    }

    #[must_use]
    pub fn kind(&self) -> &str {
        &self.kind
    }

    #[must_use]
    pub fn attributes(&self) -> &[Attribute] {
        &self.attributes
    }

    #[must_use]
    pub fn attribute(&self, name: &str) -> Option<&Attribute> {
        self.attributes.iter().find(|a| a.name() == name)
    }

    #[must_use]
    pub fn primary_key(&self) -> &Attribute {
        &self.attributes[0]
    }
}

///
/// RecordKey
///
/// Synthetic primary key: an opaque string URI.
///

#[derive(
    Clone, Debug, Deserialize, Display, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize,
)]
pub struct RecordKey(String);

impl RecordKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for RecordKey {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for RecordKey {
    fn from(s: String) -> Self {
        Self(s)
    }
}

///
/// Record
///
/// A single stored row: its key plus a sparse attribute map. An attribute
/// absent from the map reads as `Value::Null`.
///

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct Record {
    key: RecordKey,
    values: BTreeMap<String, Value>,
}

impl Record {
    pub fn new(key: impl Into<RecordKey>) -> Self {
        Self {
            key: key.into(),
            values: BTreeMap::new(),
        }
    }

    /// Builder-style attribute assignment.
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set(name, value);
        self
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        let value = value.into();
        if value.is_null() {
            return;
        }
        self.values.insert(name.into(), value);
    }

    #[must_use]
    pub const fn key(&self) -> &RecordKey {
        &self.key
    }

    /// Read an attribute by name. The primary key reads as text; anything
    /// not present reads as null.
    #[must_use]
    pub fn get(&self, name: &str) -> Value {
        if name == PRIMARY_KEY {
            return Value::Text(self.key.as_str().to_string());
        }

        self.values.get(name).cloned().unwrap_or(Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn model_always_carries_the_primary_key_first() {
        let model = RecordModel::new(
            "submission",
            vec![Attribute::new("age", AttributeKind::Int)],
        );
        assert_eq!(model.primary_key().name(), PRIMARY_KEY);
        assert_eq!(model.attributes().len(), 2);
        assert!(model.attribute("age").is_some());
        assert!(model.attribute("missing").is_none());
    }

    #[test]
    fn duplicate_primary_key_declaration_is_ignored() {
        let model = RecordModel::new(
            "submission",
            vec![
                Attribute::new(PRIMARY_KEY, AttributeKind::Text),
                Attribute::new("name", AttributeKind::Text),
            ],
        );
        assert_eq!(model.attributes().len(), 2);
    }

    #[test]
    fn record_reads_key_and_nulls() {
        let record = Record::new("uuid:1").with("age", 10i64);
        assert_eq!(record.get("age"), Value::Int(10));
        assert_eq!(record.get("missing"), Value::Null);
        assert_eq!(record.get(PRIMARY_KEY), Value::Text("uuid:1".to_string()));
    }

    #[test]
    fn setting_null_clears_nothing_and_stores_nothing() {
        let record = Record::new("uuid:2").with("note", Value::Null);
        assert_eq!(record.get("note"), Value::Null);
    }

    #[test]
    fn decimal_kind_admits_integers() {
        let kind = AttributeKind::Decimal {
            scale: 2,
            precision: 9,
        };
        assert!(kind.admits(&Value::Int(3)));
        assert!(kind.admits(&Value::Null));
        assert!(!kind.admits(&Value::Text("3".to_string())));
    }
}

mod compare;
mod wire;

pub use compare::{canonical_cmp, nulls_last_cmp, typed_cmp};
pub(crate) use wire::{decode_boundary, encode_boundary};

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

///
/// Value
///
/// Typed attribute value carried by records, filters, sorts, and cursor
/// boundaries. `Null` stands in both for an explicit null and for an
/// attribute absent from a record.
///
/// `LongText` and `Blob` are storable but excluded from filtering and
/// sorting; the trackers reject them up front.
///

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Decimal(Decimal),
    /// Milliseconds since the Unix epoch.
    Timestamp(i64),
    Text(String),
    LongText(String),
    Blob(Vec<u8>),
}

impl Value {
    #[must_use]
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Large-object values cannot participate in comparisons.
    #[must_use]
    pub const fn is_large_object(&self) -> bool {
        matches!(self, Self::LongText(_) | Self::Blob(_))
    }

    /// Canonical variant rank used for deterministic mixed-variant ordering.
    #[must_use]
    pub(crate) const fn canonical_rank(&self) -> u8 {
        match self {
            Self::Null => 0,
            Self::Bool(_) => 1,
            Self::Int(_) => 2,
            Self::Decimal(_) => 3,
            Self::Timestamp(_) => 4,
            Self::Text(_) => 5,
            Self::LongText(_) => 6,
            Self::Blob(_) => 7,
        }
    }

    #[must_use]
    pub const fn kind_label(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Decimal(_) => "decimal",
            Self::Timestamp(_) => "timestamp",
            Self::Text(_) => "text",
            Self::LongText(_) => "long_text",
            Self::Blob(_) => "blob",
        }
    }

    /// Round a decimal value to the given scale, half-up.
    ///
    /// Non-decimal values pass through unchanged; `Int` widens to a scaled
    /// decimal so integer literals compare consistently against decimal
    /// attributes.
    #[must_use]
    pub fn rescaled(self, scale: u32) -> Self {
        match self {
            Self::Decimal(d) => Self::Decimal(rescale(d, scale)),
            Self::Int(i) => Self::Decimal(rescale(Decimal::from(i), scale)),
            other => other,
        }
    }
}

/// Half-up rescaling shared by filter literals, cursor boundaries, and
/// distinct-value normalization.
#[must_use]
pub(crate) fn rescale(value: Decimal, scale: u32) -> Decimal {
    value.round_dp_with_strategy(scale, RoundingStrategy::MidpointAwayFromZero)
}

impl Ord for Value {
    fn cmp(&self, other: &Self) -> Ordering {
        canonical_cmp(self, other)
    }
}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Self::Int(i)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<Decimal> for Value {
    fn from(d: Decimal) -> Self {
        Self::Decimal(d)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn rescaled_rounds_half_up() {
        let v = Value::Decimal(Decimal::from_str("10.005").unwrap()).rescaled(2);
        assert_eq!(v, Value::Decimal(Decimal::from_str("10.01").unwrap()));

        let v = Value::Decimal(Decimal::from_str("10.001").unwrap()).rescaled(2);
        assert_eq!(v, Value::Decimal(Decimal::from_str("10.00").unwrap()));
    }

    #[test]
    fn rescaled_widens_integers() {
        let v = Value::Int(7).rescaled(2);
        assert_eq!(v, Value::Decimal(Decimal::from_str("7").unwrap()));
    }

    #[test]
    fn canonical_order_is_total() {
        let mut values = vec![
            Value::Text("b".to_string()),
            Value::Null,
            Value::Int(3),
            Value::Bool(true),
            Value::Text("a".to_string()),
        ];
        values.sort();
        assert_eq!(
            values,
            vec![
                Value::Null,
                Value::Bool(true),
                Value::Int(3),
                Value::Text("a".to_string()),
                Value::Text("b".to_string()),
            ]
        );
    }
}

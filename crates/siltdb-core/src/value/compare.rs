use crate::value::Value;
use std::cmp::Ordering;

/// Total canonical comparator used for deduplicated value sets and as the
/// deterministic fallback when record data disagrees with its declared kind.
///
/// Ordering rules:
/// 1. Canonical variant rank
/// 2. Variant-specific comparison for same-ranked values
#[must_use]
pub fn canonical_cmp(left: &Value, right: &Value) -> Ordering {
    let rank = left.canonical_rank().cmp(&right.canonical_rank());
    if rank != Ordering::Equal {
        return rank;
    }

    match (left, right) {
        (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
        (Value::Int(a), Value::Int(b)) | (Value::Timestamp(a), Value::Timestamp(b)) => a.cmp(b),
        (Value::Decimal(a), Value::Decimal(b)) => a.cmp(b),
        (Value::Text(a), Value::Text(b)) | (Value::LongText(a), Value::LongText(b)) => a.cmp(b),
        (Value::Blob(a), Value::Blob(b)) => a.cmp(b),
        _ => Ordering::Equal,
    }
}

/// Strict comparator for identical comparable variants.
///
/// Returns `None` for mismatched variants and for large-object values,
/// which are never comparable.
#[must_use]
pub fn typed_cmp(left: &Value, right: &Value) -> Option<Ordering> {
    match (left, right) {
        (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
        (Value::Int(a), Value::Int(b)) | (Value::Timestamp(a), Value::Timestamp(b)) => {
            Some(a.cmp(b))
        }
        (Value::Decimal(a), Value::Decimal(b)) => Some(a.cmp(b)),
        (Value::Text(a), Value::Text(b)) => Some(a.cmp(b)),
        _ => None,
    }
}

/// Comparator placing nulls after every non-null value, used by both filter
/// evaluation and sort trackers. Direction never applies here: callers flip
/// only the non-null ordering.
///
/// Mismatched non-null variants fall back to the canonical order so a
/// mistyped stored value degrades to a deterministic position instead of a
/// panic.
#[must_use]
pub fn nulls_last_cmp(left: &Value, right: &Value) -> Ordering {
    match (left.is_null(), right.is_null()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
        (false, false) => typed_cmp(left, right).unwrap_or_else(|| canonical_cmp(left, right)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;
    use std::str::FromStr;

    #[test]
    fn nulls_sort_after_everything() {
        assert_eq!(
            nulls_last_cmp(&Value::Null, &Value::Int(i64::MIN)),
            Ordering::Greater
        );
        assert_eq!(
            nulls_last_cmp(&Value::Text(String::new()), &Value::Null),
            Ordering::Less
        );
        assert_eq!(nulls_last_cmp(&Value::Null, &Value::Null), Ordering::Equal);
    }

    #[test]
    fn typed_cmp_rejects_mixed_variants() {
        assert_eq!(typed_cmp(&Value::Int(1), &Value::Text("1".to_string())), None);
        assert_eq!(
            typed_cmp(&Value::Int(1), &Value::Int(2)),
            Some(Ordering::Less)
        );
    }

    #[test]
    fn typed_cmp_rejects_large_objects() {
        let a = Value::LongText("a".to_string());
        let b = Value::LongText("b".to_string());
        assert_eq!(typed_cmp(&a, &b), None);
    }

    #[test]
    fn decimal_comparison_is_numeric() {
        let a = Value::Decimal(Decimal::from_str("10.00").unwrap());
        let b = Value::Decimal(Decimal::from_str("10").unwrap());
        assert_eq!(nulls_last_cmp(&a, &b), Ordering::Equal);
    }
}

use crate::{
    error::{EngineError, ErrorOrigin},
    model::AttributeKind,
    value::{Value, rescale},
};
use chrono::{DateTime, SecondsFormat};
use rust_decimal::Decimal;
use std::str::FromStr;

///
/// Cursor-boundary wire encoding.
///
/// Boundary values travel inside resume cursors as strings so the token
/// stays store-agnostic. Encoding is keyed by the attribute's declared kind;
/// decimals are rescaled to the declared scale on both directions so a
/// round-tripped boundary compares identically to the stored value.
///

/// Encode a dominant-attribute value as its cursor string form.
///
/// `None` stands for a null boundary value.
pub(crate) fn encode_boundary(
    value: &Value,
    kind: &AttributeKind,
) -> Result<Option<String>, EngineError> {
    if kind.is_large_object() {
        return Err(EngineError::precondition(
            ErrorOrigin::Cursor,
            "cannot use a long-text or blob attribute as a sort boundary",
        ));
    }

    let encoded = match (kind, value) {
        (_, Value::Null) => return Ok(None),
        (AttributeKind::Text, Value::Text(s)) => s.clone(),
        (AttributeKind::Int, Value::Int(i)) => i.to_string(),
        (AttributeKind::Decimal { scale, .. }, Value::Decimal(d)) => rescale(*d, *scale).to_string(),
        // Integer-typed data stored into a decimal attribute still encodes at scale.
        (AttributeKind::Decimal { scale, .. }, Value::Int(i)) => {
            rescale(Decimal::from(*i), *scale).to_string()
        }
        (AttributeKind::Bool, Value::Bool(b)) => b.to_string(),
        (AttributeKind::Timestamp, Value::Timestamp(millis)) => DateTime::from_timestamp_millis(
            *millis,
        )
        .ok_or_else(|| EngineError::query_internal("timestamp out of encodable range"))?
        .to_rfc3339_opts(SecondsFormat::Millis, true),
        (kind, value) => {
            return Err(EngineError::query_internal(format!(
                "boundary value {} does not match attribute kind {kind:?}",
                value.kind_label()
            )));
        }
    };

    Ok(Some(encoded))
}

/// Decode a cursor boundary string back into a typed value.
pub(crate) fn decode_boundary(
    raw: Option<&str>,
    kind: &AttributeKind,
) -> Result<Value, EngineError> {
    if kind.is_large_object() {
        return Err(EngineError::precondition(
            ErrorOrigin::Cursor,
            "cannot use a long-text or blob attribute as a sort boundary",
        ));
    }

    let Some(raw) = raw else {
        return Ok(Value::Null);
    };

    let value = match kind {
        AttributeKind::Text => Value::Text(raw.to_string()),
        AttributeKind::Int => Value::Int(raw.parse::<i64>().map_err(|_| malformed(raw, "int"))?),
        AttributeKind::Decimal { scale, .. } => {
            let d = Decimal::from_str(raw).map_err(|_| malformed(raw, "decimal"))?;
            Value::Decimal(rescale(d, *scale))
        }
        AttributeKind::Bool => match raw {
            "true" => Value::Bool(true),
            "false" => Value::Bool(false),
            _ => return Err(malformed(raw, "bool")),
        },
        AttributeKind::Timestamp => Value::Timestamp(
            DateTime::parse_from_rfc3339(raw)
                .map_err(|_| malformed(raw, "timestamp"))?
                .timestamp_millis(),
        ),
        AttributeKind::LongText | AttributeKind::Blob => unreachable!("rejected above"),
    };

    Ok(value)
}

fn malformed(raw: &str, expected: &str) -> EngineError {
    EngineError::cursor_precondition(format!(
        "malformed cursor boundary value '{raw}' (expected {expected})"
    ))
}

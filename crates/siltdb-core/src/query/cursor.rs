use crate::{error::EngineError, model::RecordKey};
use serde::{Deserialize, Serialize};

///
/// ResumeCursor
///
/// Opaque continuation token anchoring the next/previous page to a
/// (dominant value, primary key) boundary. Valid only against the exact
/// filter/sort specification that produced it; the executor rejects a
/// cursor whose attribute differs from the dominant sort attribute.
///

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct ResumeCursor {
    attribute: String,
    boundary: Option<String>,
    last_key: RecordKey,
    forward: bool,
}

impl ResumeCursor {
    pub(crate) fn new(
        attribute: impl Into<String>,
        boundary: Option<String>,
        last_key: RecordKey,
        forward: bool,
    ) -> Self {
        Self {
            attribute: attribute.into(),
            boundary,
            last_key,
            forward,
        }
    }

    #[must_use]
    pub fn attribute(&self) -> &str {
        &self.attribute
    }

    #[must_use]
    pub fn boundary(&self) -> Option<&str> {
        self.boundary.as_deref()
    }

    #[must_use]
    pub const fn last_key(&self) -> &RecordKey {
        &self.last_key
    }

    #[must_use]
    pub const fn is_forward(&self) -> bool {
        self.forward
    }

    /// Encode as an opaque transport token (CBOR, hex-armored).
    #[must_use]
    pub fn encode(&self) -> String {
        let bytes = serde_cbor::to_vec(self).unwrap_or_default();
        encode_token(&bytes)
    }

    /// Decode a transport token produced by [`Self::encode`].
    pub fn decode(token: &str) -> Result<Self, EngineError> {
        let bytes = decode_token(token).map_err(EngineError::cursor_precondition)?;
        serde_cbor::from_slice(&bytes)
            .map_err(|err| EngineError::cursor_precondition(format!("malformed cursor: {err}")))
    }
}

/// Encode raw cursor bytes as a lowercase hex token.
#[must_use]
fn encode_token(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        use std::fmt::Write as _;
        let _ = write!(out, "{byte:02x}");
    }
    out
}

/// Decode a hex cursor token into raw bytes.
///
/// The token may include surrounding whitespace, which is trimmed.
fn decode_token(token: &str) -> Result<Vec<u8>, String> {
    let token = token.trim();
    if token.is_empty() {
        return Err("cursor token is empty".to_string());
    }
    if token.len() % 2 != 0 {
        return Err("cursor token must have an even number of hex characters".to_string());
    }

    let mut out = Vec::with_capacity(token.len() / 2);
    let bytes = token.as_bytes();
    for idx in (0..bytes.len()).step_by(2) {
        let hi = decode_hex_nibble(bytes[idx])
            .ok_or_else(|| format!("invalid hex character at position {}", idx + 1))?;
        let lo = decode_hex_nibble(bytes[idx + 1])
            .ok_or_else(|| format!("invalid hex character at position {}", idx + 2))?;
        out.push((hi << 4) | lo);
    }

    Ok(out)
}

const fn decode_hex_nibble(byte: u8) -> Option<u8> {
    match byte {
        b'0'..=b'9' => Some(byte - b'0'),
        b'a'..=b'f' => Some(byte - b'a' + 10),
        b'A'..=b'F' => Some(byte - b'A' + 10),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cursor_round_trips_through_its_token() {
        let cursor = ResumeCursor::new("age", Some("15".to_string()), RecordKey::from("k4"), true);
        let token = cursor.encode();
        assert!(token.chars().all(|c| c.is_ascii_hexdigit()));

        let decoded = ResumeCursor::decode(&token).unwrap();
        assert_eq!(decoded, cursor);
    }

    #[test]
    fn null_boundary_round_trips() {
        let cursor = ResumeCursor::new("age", None, RecordKey::from("k1"), false);
        let decoded = ResumeCursor::decode(&cursor.encode()).unwrap();
        assert_eq!(decoded.boundary(), None);
        assert!(!decoded.is_forward());
    }

    #[test]
    fn token_decoding_trims_whitespace() {
        let cursor = ResumeCursor::new("age", Some("7".to_string()), RecordKey::from("k"), true);
        let token = format!("  {}\n", cursor.encode());
        assert_eq!(ResumeCursor::decode(&token).unwrap(), cursor);
    }

    #[test]
    fn malformed_tokens_are_rejected() {
        for token in ["", "abc", "zz", "not hex at all!"] {
            let err = ResumeCursor::decode(token).unwrap_err();
            assert_eq!(err.class, crate::error::ErrorClass::Precondition);
        }
    }
}

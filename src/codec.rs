//! Message codec: JSON text <-> binary (CBOR) conversion.
//!
//! The session layer dispatches on a canonical binary representation
//! regardless of what the client speaks on the wire. This module provides
//! the conversions between the two container formats, a cheap structural
//! sniff to auto-detect which format a message already uses, and the
//! `sessionId` tagging used when routing child session traffic.
//!
//! Conversion goes through [`serde_json::Value`] as the common structured
//! form, so a JSON -> CBOR -> JSON round trip preserves fields and values
//! even though byte-for-byte equality is not guaranteed.
//!
//! Callers in the session layer treat conversion failures as soft: they log
//! and continue with an empty payload rather than aborting the dispatch.

// ============================================================================
// Imports
// ============================================================================

use serde_json::Value;

use crate::error::{Error, Result};

// ============================================================================
// Format Detection
// ============================================================================

/// Returns `true` if `bytes` look like a binary (CBOR) protocol message.
///
/// The sniff is structural, not a full parse: protocol messages are
/// top-level CBOR maps (initial byte with major type 5), optionally wrapped
/// in a tagged envelope (initial byte `0xd8`). JSON text starts with `{`
/// (0x7b, major type 3 prefix territory) and never matches.
#[inline]
#[must_use]
pub fn is_binary_message(bytes: &[u8]) -> bool {
    match bytes.first() {
        Some(&b) => b == 0xd8 || (b >> 5) == 5,
        None => false,
    }
}

// ============================================================================
// Conversion
// ============================================================================

/// Converts a JSON text message to the binary container format.
///
/// # Errors
///
/// Returns [`Error::Json`] if `text` is not valid JSON, or [`Error::Codec`]
/// if the parsed value cannot be encoded.
pub fn convert_json_to_cbor(text: &str) -> Result<Vec<u8>> {
    let value: Value = serde_json::from_str(text)?;
    let mut out = Vec::with_capacity(text.len());
    ciborium::into_writer(&value, &mut out).map_err(|e| Error::codec(e.to_string()))?;
    Ok(out)
}

/// Converts a binary container message to JSON text.
///
/// # Errors
///
/// Returns [`Error::Codec`] if `bytes` are not a well-formed CBOR value
/// representable as JSON (for example, a map with non-string keys).
pub fn convert_cbor_to_json(bytes: &[u8]) -> Result<String> {
    let value: Value = ciborium::from_reader(bytes).map_err(|e| Error::codec(e.to_string()))?;
    Ok(serde_json::to_string(&value)?)
}

/// Decodes a binary container message into a structured value for dispatch.
///
/// # Errors
///
/// Returns [`Error::Codec`] if `bytes` are not well-formed CBOR.
pub fn parse_binary_message(bytes: &[u8]) -> Result<Value> {
    ciborium::from_reader(bytes).map_err(|e| Error::codec(e.to_string()))
}

/// Encodes a structured value into the binary container format.
///
/// # Errors
///
/// Returns [`Error::Codec`] if encoding fails.
pub fn encode_binary_message(value: &Value) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    ciborium::into_writer(value, &mut out).map_err(|e| Error::codec(e.to_string()))?;
    Ok(out)
}

// ============================================================================
// Session Id Tagging
// ============================================================================

/// Adds a `sessionId` string entry to an encoded binary map message.
///
/// Used when forwarding a child session's output through the root: the
/// message is re-encoded with the routing tag so the client can correlate
/// it with the child attachment.
///
/// # Errors
///
/// Returns [`Error::Codec`] if `bytes` are not well-formed CBOR, or
/// [`Error::InvalidEnvelope`] if the top-level value is not a map.
pub fn append_session_id(bytes: &[u8], session_id: &str) -> Result<Vec<u8>> {
    let mut value = parse_binary_message(bytes)?;
    match value.as_object_mut() {
        Some(map) => {
            map.insert(
                crate::protocol::SESSION_ID_FIELD.to_string(),
                Value::String(session_id.to_string()),
            );
        }
        None => {
            return Err(Error::invalid_envelope(
                "message is not a top-level map, cannot tag with sessionId",
            ));
        }
    }
    encode_binary_message(&value)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use proptest::prelude::*;
    use serde_json::json;

    #[test]
    fn test_is_binary_message() {
        // JSON text is not binary.
        assert!(!is_binary_message(br#"{"id":1,"method":"Runtime.evaluate"}"#));
        // An encoded map is binary.
        let cbor = convert_json_to_cbor(r#"{"id":1}"#).expect("convert");
        assert!(is_binary_message(&cbor));
        // Tagged envelope initial byte.
        assert!(is_binary_message(&[0xd8, 0x5a]));
        // Empty is neither.
        assert!(!is_binary_message(b""));
    }

    #[test]
    fn test_round_trip_preserves_fields() {
        let text = r#"{"id":7,"method":"Page.navigate","params":{"url":"https://example.com","deep":{"n":[1,2,3]}}}"#;
        let cbor = convert_json_to_cbor(text).expect("to cbor");
        let back = convert_cbor_to_json(&cbor).expect("to json");
        let a: serde_json::Value = serde_json::from_str(text).expect("parse a");
        let b: serde_json::Value = serde_json::from_str(&back).expect("parse b");
        assert_eq!(a, b);
    }

    #[test]
    fn test_convert_invalid_json() {
        let err = convert_json_to_cbor("{not json").unwrap_err();
        assert!(err.is_conversion_error());
    }

    #[test]
    fn test_convert_invalid_cbor() {
        let err = convert_cbor_to_json(&[0xff, 0xff, 0xff]).unwrap_err();
        assert!(err.is_conversion_error());
    }

    #[test]
    fn test_append_session_id() {
        let cbor = convert_json_to_cbor(r#"{"method":"Target.event"}"#).expect("convert");
        let tagged = append_session_id(&cbor, "AB12").expect("tag");
        let value = parse_binary_message(&tagged).expect("parse");
        assert_eq!(value["sessionId"], json!("AB12"));
        assert_eq!(value["method"], json!("Target.event"));
    }

    #[test]
    fn test_append_session_id_rejects_non_map() {
        let mut cbor = Vec::new();
        ciborium::into_writer(&json!([1, 2, 3]), &mut cbor).expect("encode");
        let err = append_session_id(&cbor, "AB12").unwrap_err();
        assert!(matches!(err, Error::InvalidEnvelope { .. }));
    }

    // Strategy for JSON-ish values a protocol message could carry.
    fn arb_json(depth: u32) -> impl Strategy<Value = serde_json::Value> {
        let leaf = prop_oneof![
            Just(serde_json::Value::Null),
            any::<bool>().prop_map(serde_json::Value::from),
            any::<i64>().prop_map(serde_json::Value::from),
            "[a-zA-Z0-9 ]{0,12}".prop_map(serde_json::Value::from),
        ];
        leaf.prop_recursive(depth, 32, 4, |inner| {
            prop_oneof![
                prop::collection::vec(inner.clone(), 0..4).prop_map(serde_json::Value::from),
                prop::collection::btree_map("[a-z]{1,8}", inner, 0..4)
                    .prop_map(|m| serde_json::Value::Object(m.into_iter().collect())),
            ]
        })
    }

    proptest! {
        #[test]
        fn prop_json_cbor_json_round_trip(value in arb_json(3)) {
            let text = serde_json::to_string(&value).expect("stringify");
            let cbor = convert_json_to_cbor(&text).expect("to cbor");
            let back = convert_cbor_to_json(&cbor).expect("to json");
            let reparsed: serde_json::Value = serde_json::from_str(&back).expect("parse");
            prop_assert_eq!(value, reparsed);
        }
    }
}

//! Tagged binary encoding for [`FieldValue`]
//!
//! Every encoded value starts with one tag byte followed by a tag-specific
//! payload:
//!
//! ```text
//! tag 0  null        (no payload)
//! tag 1  boolean     1 byte, 0 or 1
//! tag 2  number      8 bytes, IEEE-754 f64 little-endian
//! tag 3  string      u32 LE length + UTF-8 bytes
//! tag 4  structured  u32 LE length + canonical JSON text
//! tag 5  custom      u32 LE length + bytes produced by a field's own codec
//! ```
//!
//! Tag 5 never comes out of [`encode`]; it only frames the output of a
//! per-field codec so that a value slot inside a message stays
//! self-delimiting.

use crate::error::CodecError;
use crate::value::FieldValue;
use serde_json::Value as JsonValue;
use std::sync::Arc;

pub const TAG_NULL: u8 = 0;
pub const TAG_BOOL: u8 = 1;
pub const TAG_NUMBER: u8 = 2;
pub const TAG_STRING: u8 = 3;
pub const TAG_STRUCTURED: u8 = 4;
pub const TAG_CUSTOM: u8 = 5;

const LEN_PREFIX: usize = 4;

/// Encoder half of a per-field custom codec
pub type EncodeFn = Arc<dyn Fn(&FieldValue) -> Result<Vec<u8>, CodecError> + Send + Sync>;
/// Decoder half of a per-field custom codec
pub type DecodeFn = Arc<dyn Fn(&[u8]) -> Result<FieldValue, CodecError> + Send + Sync>;

/// Encodes a value with the default codec
pub fn encode(value: &FieldValue) -> Result<Vec<u8>, CodecError> {
    let mut out = Vec::with_capacity(9);
    encode_into(value, &mut out)?;
    Ok(out)
}

/// Appends the default encoding of `value` to `out`
pub fn encode_into(value: &FieldValue, out: &mut Vec<u8>) -> Result<(), CodecError> {
    match value {
        FieldValue::Null => out.push(TAG_NULL),
        FieldValue::Bool(b) => {
            out.push(TAG_BOOL);
            out.push(u8::from(*b));
        }
        FieldValue::Number(n) => {
            out.push(TAG_NUMBER);
            out.extend_from_slice(&n.to_le_bytes());
        }
        FieldValue::String(s) => write_prefixed(out, TAG_STRING, s.as_bytes())?,
        FieldValue::Structured(v) => {
            let text = serde_json::to_string(v).map_err(|e| CodecError::Json(e.to_string()))?;
            write_prefixed(out, TAG_STRUCTURED, text.as_bytes())?;
        }
    }
    Ok(())
}

/// Decodes exactly one default-encoded value; trailing bytes are an error
pub fn decode(bytes: &[u8]) -> Result<FieldValue, CodecError> {
    let (value, used) = decode_prefix(bytes)?;
    if used != bytes.len() {
        return Err(CodecError::TrailingBytes(bytes.len() - used));
    }
    Ok(value)
}

/// Decodes one default-encoded value from the front of `bytes`.
///
/// Returns the value and the number of bytes consumed.
pub fn decode_prefix(bytes: &[u8]) -> Result<(FieldValue, usize), CodecError> {
    let tag = *bytes.first().ok_or(CodecError::Empty)?;
    let payload = &bytes[1..];

    match tag {
        TAG_NULL => Ok((FieldValue::Null, 1)),
        TAG_BOOL => {
            let byte = *payload.first().ok_or(CodecError::Truncated {
                kind: "boolean",
                needed: 1,
                available: 0,
            })?;
            match byte {
                0 => Ok((FieldValue::Bool(false), 2)),
                1 => Ok((FieldValue::Bool(true), 2)),
                other => Err(CodecError::InvalidBool(other)),
            }
        }
        TAG_NUMBER => {
            let raw: [u8; 8] = payload
                .get(..8)
                .and_then(|b| b.try_into().ok())
                .ok_or(CodecError::Truncated {
                    kind: "number",
                    needed: 8,
                    available: payload.len(),
                })?;
            Ok((FieldValue::Number(f64::from_le_bytes(raw)), 9))
        }
        TAG_STRING => {
            let (body, used) = read_prefixed(payload, "string")?;
            let text = std::str::from_utf8(body).map_err(|_| CodecError::InvalidUtf8)?;
            Ok((FieldValue::String(text.to_string()), 1 + used))
        }
        TAG_STRUCTURED => {
            let (body, used) = read_prefixed(payload, "structured")?;
            let text = std::str::from_utf8(body).map_err(|_| CodecError::InvalidUtf8)?;
            let json: JsonValue =
                serde_json::from_str(text).map_err(|e| CodecError::Json(e.to_string()))?;
            Ok((FieldValue::Structured(json), 1 + used))
        }
        other => Err(CodecError::UnknownTag(other)),
    }
}

/// Frames bytes produced by a custom field codec under [`TAG_CUSTOM`]
pub fn frame_custom(payload: &[u8]) -> Result<Vec<u8>, CodecError> {
    let mut out = Vec::with_capacity(1 + LEN_PREFIX + payload.len());
    write_prefixed(&mut out, TAG_CUSTOM, payload)?;
    Ok(out)
}

/// Returns the custom codec bytes inside a [`TAG_CUSTOM`] slot
pub fn unframe_custom(slot: &[u8]) -> Result<&[u8], CodecError> {
    let tag = *slot.first().ok_or(CodecError::Empty)?;
    if tag != TAG_CUSTOM {
        return Err(CodecError::UnknownTag(tag));
    }
    let (body, used) = read_prefixed(&slot[1..], "custom")?;
    if 1 + used != slot.len() {
        return Err(CodecError::TrailingBytes(slot.len() - 1 - used));
    }
    Ok(body)
}

/// Length of the encoded value at the front of `bytes`, without decoding it.
///
/// Used by the message reader to split value slots. Tag 5 is accepted here
/// since custom payloads are opaque at this level.
pub fn slot_len(bytes: &[u8]) -> Result<usize, CodecError> {
    let tag = *bytes.first().ok_or(CodecError::Empty)?;
    let fixed = match tag {
        TAG_NULL => 1,
        TAG_BOOL => 2,
        TAG_NUMBER => 9,
        TAG_STRING | TAG_STRUCTURED | TAG_CUSTOM => {
            let (_, used) = read_prefixed(&bytes[1..], "slot")?;
            return Ok(1 + used);
        }
        other => return Err(CodecError::UnknownTag(other)),
    };
    if bytes.len() < fixed {
        return Err(CodecError::Truncated {
            kind: "slot",
            needed: fixed,
            available: bytes.len(),
        });
    }
    Ok(fixed)
}

fn write_prefixed(out: &mut Vec<u8>, tag: u8, body: &[u8]) -> Result<(), CodecError> {
    let len = u32::try_from(body.len()).map_err(|_| CodecError::TooLong(body.len()))?;
    out.push(tag);
    out.extend_from_slice(&len.to_le_bytes());
    out.extend_from_slice(body);
    Ok(())
}

// Returns the body and the bytes consumed including the length prefix
fn read_prefixed<'a>(bytes: &'a [u8], kind: &'static str) -> Result<(&'a [u8], usize), CodecError> {
    let raw: [u8; LEN_PREFIX] = bytes
        .get(..LEN_PREFIX)
        .and_then(|b| b.try_into().ok())
        .ok_or(CodecError::Truncated {
            kind,
            needed: LEN_PREFIX,
            available: bytes.len(),
        })?;
    let len = u32::from_le_bytes(raw) as usize;
    let body = bytes
        .get(LEN_PREFIX..LEN_PREFIX + len)
        .ok_or(CodecError::Truncated {
            kind,
            needed: LEN_PREFIX + len,
            available: bytes.len(),
        })?;
    Ok((body, LEN_PREFIX + len))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_null_layout() {
        assert_eq!(encode(&FieldValue::Null).unwrap(), vec![0]);
    }

    #[test]
    fn test_bool_layout() {
        assert_eq!(encode(&FieldValue::Bool(true)).unwrap(), vec![1, 1]);
        assert_eq!(encode(&FieldValue::Bool(false)).unwrap(), vec![1, 0]);
    }

    #[test]
    fn test_number_layout() {
        let bytes = encode(&FieldValue::Number(80.0)).unwrap();
        assert_eq!(bytes.len(), 9);
        assert_eq!(bytes[0], TAG_NUMBER);
        assert_eq!(&bytes[1..], &80.0f64.to_le_bytes());
    }

    #[test]
    fn test_string_layout() {
        let bytes = encode(&FieldValue::from("Hero")).unwrap();
        assert_eq!(bytes, vec![3, 4, 0, 0, 0, b'H', b'e', b'r', b'o']);
    }

    #[test]
    fn test_structured_uses_canonical_json() {
        let value = FieldValue::Structured(json!({"y": 2, "x": 1}));
        let bytes = encode(&value).unwrap();
        assert_eq!(bytes[0], TAG_STRUCTURED);
        assert_eq!(&bytes[5..], br#"{"x":1,"y":2}"#);
        assert_eq!(decode(&bytes).unwrap(), value);
    }

    #[test]
    fn test_multibyte_utf8_string() {
        let value = FieldValue::from("héros ✓");
        assert_eq!(decode(&encode(&value).unwrap()).unwrap(), value);
    }

    #[test]
    fn test_unknown_tag_is_rejected() {
        assert_eq!(decode(&[9, 1, 2]), Err(CodecError::UnknownTag(9)));
        assert_eq!(slot_len(&[42]), Err(CodecError::UnknownTag(42)));
    }

    #[test]
    fn test_truncated_payloads() {
        assert!(matches!(decode(&[2, 0, 0]), Err(CodecError::Truncated { .. })));
        assert!(matches!(decode(&[3, 10, 0, 0, 0, b'a']), Err(CodecError::Truncated { .. })));
        assert_eq!(decode(&[]), Err(CodecError::Empty));
    }

    #[test]
    fn test_invalid_bool_byte() {
        assert_eq!(decode(&[1, 7]), Err(CodecError::InvalidBool(7)));
    }

    #[test]
    fn test_invalid_utf8() {
        assert_eq!(decode(&[3, 2, 0, 0, 0, 0xff, 0xfe]), Err(CodecError::InvalidUtf8));
    }

    #[test]
    fn test_trailing_bytes() {
        assert_eq!(decode(&[0, 0]), Err(CodecError::TrailingBytes(1)));
    }

    #[test]
    fn test_decode_prefix_reports_consumed() {
        let mut bytes = encode(&FieldValue::from("ab")).unwrap();
        bytes.extend_from_slice(&[1, 1]);
        let (value, used) = decode_prefix(&bytes).unwrap();
        assert_eq!(value, FieldValue::from("ab"));
        assert_eq!(used, 7);
        assert_eq!(slot_len(&bytes[used..]).unwrap(), 2);
    }

    #[test]
    fn test_custom_framing() {
        let slot = frame_custom(&[7, 8, 9]).unwrap();
        assert_eq!(slot, vec![5, 3, 0, 0, 0, 7, 8, 9]);
        assert_eq!(slot_len(&slot).unwrap(), slot.len());
        assert_eq!(unframe_custom(&slot).unwrap(), &[7, 8, 9]);
        assert_eq!(decode(&slot), Err(CodecError::UnknownTag(TAG_CUSTOM)));
    }

    #[test]
    fn test_unframe_rejects_default_slot() {
        let slot = encode(&FieldValue::Bool(true)).unwrap();
        assert_eq!(unframe_custom(&slot), Err(CodecError::UnknownTag(TAG_BOOL)));
    }
}

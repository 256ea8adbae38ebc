//! Scalar encoding: `tag‖payload`.
//!
//! The typed `decode_*` helpers never fail on a tag mismatch: asking for a
//! string where an int is stored yields `None`, the same as an absent value.
//! Callers that must distinguish the two inspect the tag via [`split`].

use chrono::{DateTime, TimeZone, Utc};

use crate::error::{CodecError, CodecResult};
use crate::tag::Tag;
use crate::value::Value;

const TIME_VERSION: u8 = 1;
const TIME_LEN: usize = 15;

/// Encode a value as `tag‖payload`.
pub fn encode(value: &Value) -> Vec<u8> {
    let mut out = Vec::with_capacity(9);
    out.push(value.tag().as_byte());
    match value {
        Value::Nil => {}
        Value::Bool(b) => out.push(u8::from(*b)),
        Value::Int32(i) => out.extend_from_slice(&i.to_le_bytes()),
        Value::Int64(i) => out.extend_from_slice(&i.to_le_bytes()),
        Value::Float64(x) => out.extend_from_slice(&x.to_le_bytes()),
        Value::String(s) => out.extend_from_slice(s.as_bytes()),
        Value::Time(t) => out.extend_from_slice(&encode_time(t)),
    }
    out
}

/// Prefix an already-encoded payload with its tag.
pub fn encode_raw(tag: Tag, raw: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(raw.len() + 1);
    out.push(tag.as_byte());
    out.extend_from_slice(raw);
    out
}

/// Split encoded bytes into their tag and raw payload.
pub fn split(bytes: &[u8]) -> CodecResult<(Tag, &[u8])> {
    let (&first, rest) = bytes.split_first().ok_or(CodecError::Empty)?;
    let tag = Tag::from_byte(first).ok_or(CodecError::UnknownTag(first))?;
    if let Some(expected) = tag.fixed_width() {
        if rest.len() != expected {
            return Err(CodecError::BadLength {
                tag,
                expected,
                actual: rest.len(),
            });
        }
    }
    Ok((tag, rest))
}

/// Decode `tag‖payload` into a [`Value`].
pub fn decode(bytes: &[u8]) -> CodecResult<Value> {
    let (tag, raw) = split(bytes)?;
    Ok(match tag {
        Tag::Nil => Value::Nil,
        Tag::Bool => Value::Bool(raw[0] != 0),
        Tag::Int32 => Value::Int32(i32::from_le_bytes(fixed(tag, raw)?)),
        Tag::Int64 => Value::Int64(i64::from_le_bytes(fixed(tag, raw)?)),
        Tag::Float64 => Value::Float64(f64::from_le_bytes(fixed(tag, raw)?)),
        Tag::String => Value::String(
            String::from_utf8(raw.to_vec()).map_err(|_| CodecError::InvalidUtf8)?,
        ),
        Tag::Time => Value::Time(decode_time_payload(raw)?),
    })
}

fn fixed<const N: usize>(tag: Tag, raw: &[u8]) -> CodecResult<[u8; N]> {
    raw.try_into().map_err(|_| CodecError::BadLength {
        tag,
        expected: N,
        actual: raw.len(),
    })
}

fn encode_time(t: &DateTime<Utc>) -> [u8; TIME_LEN] {
    let mut out = [0u8; TIME_LEN];
    out[0] = TIME_VERSION;
    out[1..9].copy_from_slice(&t.timestamp().to_be_bytes());
    out[9..13].copy_from_slice(&t.timestamp_subsec_nanos().to_be_bytes());
    // Offset in minutes; values are always normalized to UTC.
    out[13..15].copy_from_slice(&0i16.to_be_bytes());
    out
}

fn decode_time_payload(raw: &[u8]) -> CodecResult<DateTime<Utc>> {
    if raw.len() != TIME_LEN {
        return Err(CodecError::BadLength {
            tag: Tag::Time,
            expected: TIME_LEN,
            actual: raw.len(),
        });
    }
    if raw[0] != TIME_VERSION {
        return Err(CodecError::InvalidTime(format!(
            "unsupported version {}",
            raw[0]
        )));
    }
    let secs = i64::from_be_bytes(fixed(Tag::Time, &raw[1..9])?);
    let nanos = u32::from_be_bytes(fixed(Tag::Time, &raw[9..13])?);
    Utc.timestamp_opt(secs, nanos)
        .single()
        .ok_or_else(|| CodecError::InvalidTime(format!("out of range: {secs}s {nanos}ns")))
}

fn decode_if(bytes: &[u8], want: Tag) -> Option<Value> {
    match split(bytes) {
        Ok((tag, _)) if tag == want => decode(bytes).ok(),
        _ => None,
    }
}

/// Decode a bool, or `None` for any other tag.
pub fn decode_bool(bytes: &[u8]) -> Option<bool> {
    decode_if(bytes, Tag::Bool)?.as_bool()
}

/// Decode an `Int32`, or `None` for any other tag.
pub fn decode_i32(bytes: &[u8]) -> Option<i32> {
    match decode_if(bytes, Tag::Int32)? {
        Value::Int32(i) => Some(i),
        _ => None,
    }
}

/// Decode an `Int64`, or `None` for any other tag.
pub fn decode_i64(bytes: &[u8]) -> Option<i64> {
    match decode_if(bytes, Tag::Int64)? {
        Value::Int64(i) => Some(i),
        _ => None,
    }
}

/// Decode a `Float64`, or `None` for any other tag.
pub fn decode_f64(bytes: &[u8]) -> Option<f64> {
    decode_if(bytes, Tag::Float64)?.as_f64()
}

/// Decode a string, or `None` for any other tag.
pub fn decode_string(bytes: &[u8]) -> Option<String> {
    match decode_if(bytes, Tag::String)? {
        Value::String(s) => Some(s),
        _ => None,
    }
}

/// Decode a timestamp, or `None` for any other tag.
pub fn decode_time(bytes: &[u8]) -> Option<DateTime<Utc>> {
    decode_if(bytes, Tag::Time)?.as_time()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn roundtrip(v: Value) {
        let bytes = encode(&v);
        assert_eq!(bytes[0], v.tag().as_byte());
        assert_eq!(decode(&bytes).unwrap(), v);
    }

    // -----------------------------------------------------------------------
    // Layout
    // -----------------------------------------------------------------------

    #[test]
    fn fixed_widths_are_little_endian() {
        assert_eq!(encode(&Value::Int32(1)), vec![2, 1, 0, 0, 0]);
        assert_eq!(encode(&Value::Int64(-1)), vec![3, 255, 255, 255, 255, 255, 255, 255, 255]);
        assert_eq!(encode(&Value::Bool(true)), vec![1, 1]);
        assert_eq!(encode(&Value::from("hi")), vec![5, b'h', b'i']);
    }

    #[test]
    fn nil_is_a_lone_tag() {
        assert_eq!(encode(&Value::Nil), vec![0]);
        assert_eq!(decode(&[0]).unwrap(), Value::Nil);
        assert_eq!(decode(&[]), Err(CodecError::Empty));
    }

    #[test]
    fn scalars_roundtrip() {
        roundtrip(Value::Nil);
        roundtrip(Value::Bool(false));
        roundtrip(Value::Int32(i32::MIN));
        roundtrip(Value::Int64(i64::MAX));
        roundtrip(Value::Float64(-0.5));
        roundtrip(Value::from(""));
        roundtrip(Value::from("Joe Hill"));
        roundtrip(Value::Time(Utc.timestamp_opt(1_700_000_000, 123_456_789).unwrap()));
    }

    #[test]
    fn time_payload_is_versioned() {
        let bytes = encode(&Value::Time(Utc.timestamp_opt(0, 0).unwrap()));
        assert_eq!(bytes.len(), 1 + TIME_LEN);
        assert_eq!(bytes[1], TIME_VERSION);

        let mut bad = bytes.clone();
        bad[1] = 9;
        assert!(matches!(decode(&bad), Err(CodecError::InvalidTime(_))));
    }

    // -----------------------------------------------------------------------
    // Malformed input
    // -----------------------------------------------------------------------

    #[test]
    fn malformed_payloads_are_errors() {
        assert_eq!(decode(&[42]), Err(CodecError::UnknownTag(42)));
        assert!(matches!(
            decode(&[2, 1, 2]),
            Err(CodecError::BadLength { tag: Tag::Int32, expected: 4, actual: 2 })
        ));
        assert_eq!(decode(&[5, 0xff, 0xfe]), Err(CodecError::InvalidUtf8));
    }

    // -----------------------------------------------------------------------
    // Typed accessors
    // -----------------------------------------------------------------------

    #[test]
    fn wrong_tag_reads_as_none() {
        let int = encode(&Value::Int32(7));
        assert_eq!(decode_i32(&int), Some(7));
        assert_eq!(decode_string(&int), None);
        assert_eq!(decode_i64(&int), None);
        assert_eq!(decode_bool(&[]), None);

        let s = encode(&Value::from("x"));
        assert_eq!(decode_string(&s).as_deref(), Some("x"));
        assert_eq!(decode_f64(&s), None);
    }

    #[test]
    fn split_exposes_raw_payload() {
        let bytes = encode_raw(Tag::String, b"abc");
        let (tag, raw) = split(&bytes).unwrap();
        assert_eq!(tag, Tag::String);
        assert_eq!(raw, b"abc");
    }

    proptest! {
        #[test]
        fn any_int64_roundtrips(i in any::<i64>()) {
            prop_assert_eq!(decode(&encode(&Value::Int64(i))).unwrap(), Value::Int64(i));
        }

        #[test]
        fn any_string_roundtrips(s in ".*") {
            let v = Value::String(s);
            prop_assert_eq!(decode(&encode(&v)).unwrap(), v);
        }

        #[test]
        fn any_time_roundtrips(secs in -10_000_000_000i64..10_000_000_000i64, nanos in 0u32..1_000_000_000) {
            let v = Value::Time(Utc.timestamp_opt(secs, nanos).unwrap());
            prop_assert_eq!(decode(&encode(&v)).unwrap(), v);
        }
    }
}

//! String-keyed maps stored as bucket trees.
//!
//! A nested map becomes a nested sub-bucket, never a serialized blob, so
//! every leaf stays addressable by its dotted path (`settings.theme.color`).

use std::collections::BTreeMap;

use nest_kv::{Bucket, EntryRef};

use crate::error::{CodecError, CodecResult};
use crate::scalar::{decode, encode};
use crate::value::Value;
use crate::MAX_KEY_COMPONENT;

/// A string-keyed tree of values.
pub type MapValue = BTreeMap<String, MapEntry>;

/// One entry of a [`MapValue`].
#[derive(Clone, Debug, PartialEq)]
pub enum MapEntry {
    Value(Value),
    Map(MapValue),
}

fn check_map_key(key: &str, max: usize) -> CodecResult<()> {
    if key.is_empty() {
        return Err(CodecError::UnsupportedMapValue {
            key: String::new(),
            kind: "empty key".into(),
        });
    }
    if key.len() > max {
        return Err(CodecError::KeyTooLarge { len: key.len(), max });
    }
    Ok(())
}

fn check_map_keys(map: &MapValue, max: usize) -> CodecResult<()> {
    for (key, entry) in map {
        check_map_key(key, max)?;
        if let MapEntry::Map(inner) = entry {
            check_map_keys(inner, max)?;
        }
    }
    Ok(())
}

/// Replace the contents of `bucket` with `map`.
pub fn write_map(bucket: &mut Bucket, map: &MapValue) -> CodecResult<()> {
    write_map_with(bucket, map, MAX_KEY_COMPONENT)
}

/// [`write_map`] with a key limit of `max` bytes at every depth. Keys are
/// validated before the bucket is touched.
pub fn write_map_with(bucket: &mut Bucket, map: &MapValue, max: usize) -> CodecResult<()> {
    check_map_keys(map, max.min(MAX_KEY_COMPONENT))?;
    fill_map(bucket, map)
}

fn fill_map(bucket: &mut Bucket, map: &MapValue) -> CodecResult<()> {
    bucket.clear();
    for (key, entry) in map {
        match entry {
            MapEntry::Value(v) => bucket.put(key.as_bytes(), encode(v))?,
            MapEntry::Map(inner) => {
                let child = bucket.create_bucket_if_missing(key.as_bytes())?;
                fill_map(child, inner)?;
            }
        }
    }
    Ok(())
}

/// Read `bucket` back into a [`MapValue`].
pub fn read_map(bucket: &Bucket) -> CodecResult<MapValue> {
    let mut out = MapValue::new();
    for (key, entry) in bucket.iter() {
        let key = String::from_utf8(key.to_vec()).map_err(|_| CodecError::InvalidUtf8)?;
        let entry = match entry {
            EntryRef::Value(bytes) => MapEntry::Value(decode(bytes)?),
            EntryRef::Bucket(inner) => MapEntry::Map(read_map(inner)?),
        };
        out.insert(key, entry);
    }
    Ok(out)
}

/// Convert a JSON object into a [`MapValue`].
///
/// Integers become `Int64`, other numbers `Float64`, `null` becomes `Nil`.
/// Arrays have no map encoding and are rejected.
pub fn map_from_json(json: &serde_json::Value) -> CodecResult<MapValue> {
    match json {
        serde_json::Value::Object(obj) => {
            let mut out = MapValue::new();
            for (key, v) in obj {
                out.insert(key.clone(), entry_from_json(key, v)?);
            }
            Ok(out)
        }
        other => Err(CodecError::UnsupportedMapValue {
            key: String::new(),
            kind: json_kind(other).into(),
        }),
    }
}

fn entry_from_json(key: &str, json: &serde_json::Value) -> CodecResult<MapEntry> {
    let value = match json {
        serde_json::Value::Null => Value::Nil,
        serde_json::Value::Bool(b) => Value::Bool(*b),
        serde_json::Value::Number(n) => match (n.as_i64(), n.as_f64()) {
            (Some(i), _) => Value::Int64(i),
            (None, Some(f)) => Value::Float64(f),
            (None, None) => {
                return Err(CodecError::UnsupportedMapValue {
                    key: key.into(),
                    kind: "number".into(),
                })
            }
        },
        serde_json::Value::String(s) => Value::String(s.clone()),
        serde_json::Value::Object(_) => return Ok(MapEntry::Map(map_from_json(json)?)),
        serde_json::Value::Array(_) => {
            return Err(CodecError::UnsupportedMapValue {
                key: key.into(),
                kind: json_kind(json).into(),
            })
        }
    };
    Ok(MapEntry::Value(value))
}

fn json_kind(json: &serde_json::Value) -> &'static str {
    match json {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "bool",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn nested_maps_become_sub_buckets() {
        let map = map_from_json(&json!({
            "theme": { "color": "blue", "size": 3 },
            "enabled": true,
            "ratio": 0.5,
            "note": null,
        }))
        .unwrap();

        let mut b = Bucket::new();
        write_map(&mut b, &map).unwrap();

        let theme = b.bucket(b"theme").unwrap();
        assert_eq!(decode(theme.get(b"color").unwrap()).unwrap(), Value::from("blue"));
        assert_eq!(decode(b.get(b"note").unwrap()).unwrap(), Value::Nil);
        assert_eq!(read_map(&b).unwrap(), map);
    }

    #[test]
    fn rewrite_replaces_previous_contents() {
        let mut b = Bucket::new();
        write_map(&mut b, &map_from_json(&json!({"a": 1, "b": {"c": 2}})).unwrap()).unwrap();
        write_map(&mut b, &map_from_json(&json!({"d": "x"})).unwrap()).unwrap();
        let back = read_map(&b).unwrap();
        assert_eq!(back.len(), 1);
        assert_eq!(back["d"], MapEntry::Value(Value::from("x")));
    }

    #[test]
    fn arrays_and_non_objects_are_rejected() {
        assert_eq!(
            map_from_json(&json!({"tags": [1, 2]})),
            Err(CodecError::UnsupportedMapValue {
                key: "tags".into(),
                kind: "array".into()
            })
        );
        assert!(matches!(
            map_from_json(&json!("flat")),
            Err(CodecError::UnsupportedMapValue { .. })
        ));
    }

    #[test]
    fn empty_key_is_rejected() {
        let mut map = MapValue::new();
        map.insert(String::new(), MapEntry::Value(Value::Int32(1)));
        assert!(write_map(&mut Bucket::new(), &map).is_err());
    }

    #[test]
    fn nested_keys_respect_the_caller_limit() {
        let map = map_from_json(&json!({"ok": {"much_too_long_key": 1}})).unwrap();
        let mut b = Bucket::new();
        write_map(&mut b, &map_from_json(&json!({"keep": 1})).unwrap()).unwrap();
        assert_eq!(
            write_map_with(&mut b, &map, 8),
            Err(CodecError::KeyTooLarge { len: 17, max: 8 })
        );
        assert!(b.get(b"keep").is_some());
        write_map_with(&mut b, &map, 17).unwrap();
        assert_eq!(read_map(&b).unwrap(), map);
    }
}

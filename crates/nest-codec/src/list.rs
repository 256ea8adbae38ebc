//! Lists stored as sub-buckets.
//!
//! Each member is a key (`tag‖payload`) with an empty value, so membership is
//! a key lookup and iteration yields members in key order. A list is a set:
//! writing duplicates collapses them.

use nest_kv::Bucket;

use crate::error::{CodecError, CodecResult};
use crate::scalar::{decode, encode};
use crate::value::Value;
use crate::MAX_KEY_COMPONENT;

/// The bucket key for one list member.
pub fn list_key(value: &Value) -> CodecResult<Vec<u8>> {
    list_key_with(value, MAX_KEY_COMPONENT)
}

/// Like [`list_key`], with a caller-chosen limit. `max` is clamped to
/// [`MAX_KEY_COMPONENT`].
pub fn list_key_with(value: &Value, max: usize) -> CodecResult<Vec<u8>> {
    let max = max.min(MAX_KEY_COMPONENT);
    let key = encode(value);
    if key.len() > max {
        return Err(CodecError::KeyTooLarge { len: key.len(), max });
    }
    Ok(key)
}

/// Replace the contents of `bucket` with `values`.
///
/// Every key is validated before the bucket is touched, so an oversized
/// member leaves the previous contents intact.
pub fn write_list(bucket: &mut Bucket, values: &[Value]) -> CodecResult<()> {
    write_list_with(bucket, values, MAX_KEY_COMPONENT)
}

/// [`write_list`] with a member key limit of `max` bytes.
pub fn write_list_with(bucket: &mut Bucket, values: &[Value], max: usize) -> CodecResult<()> {
    let keys = values
        .iter()
        .map(|v| list_key_with(v, max))
        .collect::<CodecResult<Vec<_>>>()?;
    bucket.clear();
    for key in keys {
        bucket.put(key, Vec::new())?;
    }
    Ok(())
}

/// Decode every member of `bucket` in key order.
pub fn read_list(bucket: &Bucket) -> CodecResult<Vec<Value>> {
    bucket.keys().map(decode).collect()
}

/// Returns `true` if `value` is a member.
pub fn list_contains(bucket: &Bucket, value: &Value) -> CodecResult<bool> {
    Ok(bucket.contains_key(&list_key(value)?))
}

/// Add `value`. Returns `true` if it was not already present.
pub fn add_to_list(bucket: &mut Bucket, value: &Value) -> CodecResult<bool> {
    let key = list_key(value)?;
    if bucket.contains_key(&key) {
        return Ok(false);
    }
    bucket.put(key, Vec::new())?;
    Ok(true)
}

/// Remove `value`. Returns `true` if it was present.
pub fn remove_from_list(bucket: &mut Bucket, value: &Value) -> CodecResult<bool> {
    Ok(bucket.delete(&list_key(value)?)?)
}

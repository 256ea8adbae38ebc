//! Typed value codec for nestdb.
//!
//! Every value stored by the object store is a `(tag, payload)` pair: one tag
//! byte followed by a fixed- or variable-length payload. Lists and maps are
//! not serialized blobs but sub-buckets, so their members stay addressable by
//! key.
//!
//! # Key Types
//!
//! - [`Tag`] -- the one-byte type discriminator
//! - [`Value`] -- a decoded scalar (`Nil`, `Bool`, `Int32`, `Int64`,
//!   `Float64`, `String`, `Time`)
//! - [`MapValue`] / [`MapEntry`] -- string-keyed trees of values
//!
//! # Encoding Rules
//!
//! - `Int32` is 4 bytes, `Int64` and `Float64` are 8 bytes, little-endian.
//! - `Bool` is one byte; `String` is its UTF-8 bytes with no length prefix.
//! - `Time` is a versioned 15-byte timestamp (seconds, nanos, offset).
//! - A lone `Nil` tag means "explicitly nil", distinct from an absent key.
//! - List member keys are `tag‖payload` and may not exceed
//!   [`MAX_KEY_COMPONENT`] bytes.

pub mod error;
pub mod list;
pub mod map;
pub mod scalar;
pub mod tag;
pub mod value;

pub use error::{CodecError, CodecResult};
pub use list::{
    add_to_list, list_contains, list_key, list_key_with, read_list, remove_from_list, write_list,
    write_list_with,
};
pub use map::{map_from_json, read_map, write_map, write_map_with, MapEntry, MapValue};
pub use scalar::{
    decode, decode_bool, decode_f64, decode_i32, decode_i64, decode_string, decode_time, encode,
    encode_raw, split,
};
pub use tag::Tag;
pub use value::Value;

/// Maximum size of one encoded list key or map key, in bytes.
pub const MAX_KEY_COMPONENT: usize = 4096;

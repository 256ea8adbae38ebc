use nest_kv::KvError;

use crate::tag::Tag;

/// Errors produced while encoding or decoding typed values.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CodecError {
    /// No bytes at all: not even a tag.
    #[error("empty encoded value")]
    Empty,

    #[error("unknown value tag: {0:#04x}")]
    UnknownTag(u8),

    /// A fixed-width payload had the wrong length.
    #[error("bad payload length for {tag}: expected {expected}, got {actual}")]
    BadLength {
        tag: Tag,
        expected: usize,
        actual: usize,
    },

    #[error("invalid UTF-8 in string payload")]
    InvalidUtf8,

    #[error("invalid time payload: {0}")]
    InvalidTime(String),

    /// A list or map key component exceeds the configured maximum.
    #[error("key component too large: {len} bytes (max {max})")]
    KeyTooLarge { len: usize, max: usize },

    /// A map held a value the codec cannot store.
    #[error("unsupported map value at {key:?}: {kind}")]
    UnsupportedMapValue { key: String, kind: String },

    #[error("key space error: {0}")]
    Kv(#[from] KvError),
}

/// Result alias for codec operations.
pub type CodecResult<T> = Result<T, CodecError>;

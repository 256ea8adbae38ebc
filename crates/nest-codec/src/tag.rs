use std::fmt;

use serde::{Deserialize, Serialize};

/// One-byte type discriminator leading every encoded value.
///
/// Byte values are part of the persisted format and must never be reused.
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Tag {
    Nil = 0,
    Bool = 1,
    Int32 = 2,
    Int64 = 3,
    Float64 = 4,
    String = 5,
    Time = 6,
}

impl Tag {
    /// Decode a tag byte.
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(Self::Nil),
            1 => Some(Self::Bool),
            2 => Some(Self::Int32),
            3 => Some(Self::Int64),
            4 => Some(Self::Float64),
            5 => Some(Self::String),
            6 => Some(Self::Time),
            _ => None,
        }
    }

    /// The persisted byte for this tag.
    pub fn as_byte(self) -> u8 {
        self as u8
    }

    /// Fixed payload width, or `None` for variable-length payloads.
    pub fn fixed_width(self) -> Option<usize> {
        match self {
            Self::Nil => Some(0),
            Self::Bool => Some(1),
            Self::Int32 => Some(4),
            Self::Int64 | Self::Float64 => Some(8),
            Self::String | Self::Time => None,
        }
    }

    /// Returns `true` for the integer and float tags.
    pub fn is_numeric(self) -> bool {
        matches!(self, Self::Int32 | Self::Int64 | Self::Float64)
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Nil => "nil",
            Self::Bool => "bool",
            Self::Int32 => "int32",
            Self::Int64 => "int64",
            Self::Float64 => "float64",
            Self::String => "string",
            Self::Time => "time",
        };
        write!(f, "{s}")
    }
}

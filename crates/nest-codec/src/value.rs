use std::cmp::Ordering;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::tag::Tag;

/// A decoded scalar value.
///
/// Equality is structural and type-strict (`Int32(1) != Int64(1)`); use
/// [`Value::compare`] for the numeric-widening comparison queries rely on.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Value {
    /// Explicitly nil.
    Nil,
    Bool(bool),
    Int32(i32),
    Int64(i64),
    Float64(f64),
    String(String),
    Time(DateTime<Utc>),
}

impl Value {
    /// The tag this value encodes under.
    pub fn tag(&self) -> Tag {
        match self {
            Self::Nil => Tag::Nil,
            Self::Bool(_) => Tag::Bool,
            Self::Int32(_) => Tag::Int32,
            Self::Int64(_) => Tag::Int64,
            Self::Float64(_) => Tag::Float64,
            Self::String(_) => Tag::String,
            Self::Time(_) => Tag::Time,
        }
    }

    pub fn is_nil(&self) -> bool {
        matches!(self, Self::Nil)
    }

    /// `Nil` or the empty string: the values an index treats as "no value".
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Nil => true,
            Self::String(s) => s.is_empty(),
            _ => false,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Integer value, widening `Int32`.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int32(i) => Some(i64::from(*i)),
            Self::Int64(i) => Some(*i),
            _ => None,
        }
    }

    /// Numeric value as `f64`, widening integers.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int32(i) => Some(f64::from(*i)),
            Self::Int64(i) => Some(*i as f64),
            Self::Float64(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_time(&self) -> Option<DateTime<Utc>> {
        match self {
            Self::Time(t) => Some(*t),
            _ => None,
        }
    }

    /// Compare two values of compatible types.
    ///
    /// Integers and floats compare numerically across widths. Values of
    /// incompatible types are unordered (`None`), as is `NaN`.
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Self::Nil, Self::Nil) => Some(Ordering::Equal),
            (Self::Bool(a), Self::Bool(b)) => Some(a.cmp(b)),
            (Self::String(a), Self::String(b)) => Some(a.cmp(b)),
            (Self::Time(a), Self::Time(b)) => Some(a.cmp(b)),
            (Self::Float64(_), _) | (_, Self::Float64(_)) => {
                self.as_f64()?.partial_cmp(&other.as_f64()?)
            }
            _ => Some(self.as_i64()?.cmp(&other.as_i64()?)),
        }
    }

    /// A total order over all values, for sorting.
    ///
    /// Compatible values use [`compare`](Self::compare); everything else
    /// falls back to tag order, and `NaN` sorts after every other float.
    pub fn sort_cmp(&self, other: &Value) -> Ordering {
        if let Some(ord) = self.compare(other) {
            return ord;
        }
        match (self, other) {
            (Self::Float64(a), Self::Float64(b)) => a.total_cmp(b),
            (a, b) if a.tag().is_numeric() && b.tag().is_numeric() => {
                let x = a.as_f64().unwrap_or(f64::NAN);
                let y = b.as_f64().unwrap_or(f64::NAN);
                x.total_cmp(&y)
            }
            _ => self.tag().cmp(&other.tag()),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Nil => write!(f, "nil"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int32(i) => write!(f, "{i}"),
            Self::Int64(i) => write!(f, "{i}"),
            Self::Float64(x) => write!(f, "{x}"),
            Self::String(s) => write!(f, "{s:?}"),
            Self::Time(t) => write!(f, "{}", t.to_rfc3339()),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Self::Int32(i)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Self::Int64(i)
    }
}

impl From<f64> for Value {
    fn from(x: f64) -> Self {
        Self::Float64(x)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(t: DateTime<Utc>) -> Self {
        Self::Time(t)
    }
}

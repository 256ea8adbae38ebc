use std::cmp::Ordering;

use nest_codec::Value;

use crate::traits::RowCursor;

/// Comparison operator of a predicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    /// Substring match on strings.
    Contains,
}

impl CmpOp {
    fn matches(self, value: &Value, literal: &Value) -> bool {
        match self {
            Self::Eq => equals(value, literal),
            Self::Ne => !equals(value, literal),
            Self::Lt => value.compare(literal) == Some(Ordering::Less),
            Self::Le => matches!(
                value.compare(literal),
                Some(Ordering::Less | Ordering::Equal)
            ),
            Self::Gt => value.compare(literal) == Some(Ordering::Greater),
            Self::Ge => matches!(
                value.compare(literal),
                Some(Ordering::Greater | Ordering::Equal)
            ),
            Self::Contains => match (value, literal) {
                (Value::String(hay), Value::String(needle)) => hay.contains(needle.as_str()),
                _ => false,
            },
        }
    }
}

/// Equality as queries see it: `null` and `""` both match an empty value.
fn equals(value: &Value, literal: &Value) -> bool {
    if literal.is_empty() {
        return value.is_empty();
    }
    value.compare(literal) == Some(Ordering::Equal)
}

/// A parsed filter expression. Literals are already coerced to the type of
/// the symbol they are compared against.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Not(Box<Expr>),
    Compare {
        symbol: String,
        is_set: bool,
        op: CmpOp,
        value: Value,
    },
    In {
        symbol: String,
        is_set: bool,
        values: Vec<Value>,
    },
    IsNull {
        symbol: String,
        is_set: bool,
        negated: bool,
    },
}

impl Expr {
    /// Evaluate against one row.
    ///
    /// On a set-valued symbol every predicate is existential, except `!=`
    /// which holds when no member equals the literal.
    pub fn eval<C: RowCursor + ?Sized>(&self, row: &mut C) -> Result<bool, C::Error> {
        match self {
            Self::And(a, b) => Ok(a.eval(row)? && b.eval(row)?),
            Self::Or(a, b) => Ok(a.eval(row)? || b.eval(row)?),
            Self::Not(e) => Ok(!e.eval(row)?),
            Self::Compare {
                symbol,
                is_set: true,
                op: CmpOp::Ne,
                value,
            } => Ok(!row.any(symbol, &mut |v| equals(v, value))?),
            Self::Compare {
                symbol,
                is_set: true,
                op,
                value,
            } => row.any(symbol, &mut |v| op.matches(v, value)),
            Self::Compare {
                symbol, op, value, ..
            } => {
                let current = row.scalar(symbol)?.unwrap_or(Value::Nil);
                Ok(op.matches(&current, value))
            }
            Self::In {
                symbol,
                is_set: true,
                values,
            } => row.any(symbol, &mut |v| values.iter().any(|lit| equals(v, lit))),
            Self::In { symbol, values, .. } => {
                let current = row.scalar(symbol)?.unwrap_or(Value::Nil);
                Ok(values.iter().any(|lit| equals(&current, lit)))
            }
            Self::IsNull {
                symbol,
                is_set: true,
                negated,
            } => Ok(row.any(symbol, &mut |_| true)? == *negated),
            Self::IsNull {
                symbol, negated, ..
            } => {
                let empty = row.scalar(symbol)?.map_or(true, |v| v.is_empty());
                Ok(empty != *negated)
            }
        }
    }

    /// Call `f` with every symbol name the expression references.
    pub fn visit_symbols(&self, f: &mut dyn FnMut(&str)) {
        match self {
            Self::And(a, b) | Self::Or(a, b) => {
                a.visit_symbols(f);
                b.visit_symbols(f);
            }
            Self::Not(e) => e.visit_symbols(f),
            Self::Compare { symbol, .. } | Self::In { symbol, .. } | Self::IsNull { symbol, .. } => {
                f(symbol)
            }
        }
    }
}

/// One `sort by` key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortField {
    pub symbol: String,
    pub ascending: bool,
}

use nest_codec::Tag;

/// Errors produced while parsing or validating a query.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum QueryError {
    /// Malformed query text. `pos` is a byte offset into the input.
    #[error("parse error at {pos}: {message}")]
    Parse { pos: usize, message: String },

    #[error("unknown symbol: {0}")]
    UnknownSymbol(String),

    /// The symbol exists but may not be referenced from untrusted queries.
    #[error("symbol is not public: {0}")]
    NotPublic(String),

    /// A literal cannot be coerced to the symbol's type.
    #[error("type mismatch for {symbol}: expected {expected}, got {found}")]
    TypeMismatch {
        symbol: String,
        expected: Tag,
        found: String,
    },

    #[error("cannot sort by set-valued symbol: {0}")]
    SortOnSet(String),
}

/// Result alias for query operations.
pub type QueryResult<T> = Result<T, QueryError>;

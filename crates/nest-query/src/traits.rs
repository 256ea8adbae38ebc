use nest_codec::{Tag, Value};

/// What the parser needs to know about a symbol name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SymbolInfo {
    /// Value type; literals are coerced to it.
    pub tag: Tag,
    /// Set-valued symbols evaluate with existential semantics.
    pub is_set: bool,
    /// Whether untrusted queries may reference the symbol.
    pub public: bool,
}

/// Resolves symbol names while a query is being parsed.
pub trait SymbolOracle {
    fn symbol_info(&self, name: &str) -> Option<SymbolInfo>;
}

/// The per-row evaluation context handed to [`Query::eval_bool`].
///
/// Implementations own whatever traversal state a multi-hop symbol needs;
/// it is never shared between rows or queries.
///
/// [`Query::eval_bool`]: crate::Query::eval_bool
pub trait RowCursor {
    type Error;

    /// Id of the row under evaluation.
    fn id(&self) -> &str;

    /// The single value of a scalar symbol, `None` when absent.
    fn scalar(&mut self, name: &str) -> Result<Option<Value>, Self::Error>;

    /// Returns `true` as soon as `predicate` accepts any value of a
    /// set-valued symbol.
    fn any(
        &mut self,
        name: &str,
        predicate: &mut dyn FnMut(&Value) -> bool,
    ) -> Result<bool, Self::Error>;
}

use crate::ast::{Expr, SortField};
use crate::error::QueryResult;
use crate::parser::Parser;
use crate::traits::{RowCursor, SymbolOracle};

/// A parsed query: optional filter, sort keys and a paging window.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Query {
    filter: Option<Expr>,
    sort: Vec<SortField>,
    skip: usize,
    limit: Option<usize>,
}

impl Query {
    pub fn new(
        filter: Option<Expr>,
        sort: Vec<SortField>,
        skip: usize,
        limit: Option<usize>,
    ) -> Self {
        Self {
            filter,
            sort,
            skip,
            limit,
        }
    }

    /// Parse `text`, validating every symbol name against `oracle`.
    ///
    /// Empty text yields a query matching every row.
    pub fn parse(text: &str, oracle: &dyn SymbolOracle) -> QueryResult<Self> {
        Parser::new(text, oracle)?.parse_query()
    }

    /// Evaluate the filter for the row under `row`.
    pub fn eval_bool<C: RowCursor + ?Sized>(&self, row: &mut C) -> Result<bool, C::Error> {
        match &self.filter {
            Some(expr) => expr.eval(row),
            None => Ok(true),
        }
    }

    pub fn filter(&self) -> Option<&Expr> {
        self.filter.as_ref()
    }

    pub fn sort_fields(&self) -> &[SortField] {
        &self.sort
    }

    pub fn skip(&self) -> usize {
        self.skip
    }

    /// Maximum page size, `None` for unbounded.
    pub fn limit(&self) -> Option<usize> {
        self.limit
    }

    /// True when the requested order is the id order, or no order at all.
    pub fn sorted_by_id_only(&self) -> bool {
        match self.sort.as_slice() {
            [] => true,
            [only] => only.symbol == "id",
            _ => false,
        }
    }

    /// Call `f` with every symbol name the filter and sort keys reference.
    pub fn visit_symbols(&self, mut f: impl FnMut(&str)) {
        if let Some(expr) = &self.filter {
            expr.visit_symbols(&mut f);
        }
        for field in &self.sort {
            f(&field.symbol);
        }
    }
}

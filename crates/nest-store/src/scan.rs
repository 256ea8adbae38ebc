//! Query execution: filter, order and page the rows of one store.
//!
//! Two scanners share the per-row evaluation in [`StoreRow`]:
//!
//! - the index scanner walks the container in key order and pages inline,
//!   used when the query is unordered or ordered by id alone;
//! - the sort scanner keeps the best `skip + limit` matches in a bounded
//!   ordered set, used for any other ordering.
//!
//! Both count every match, so [`QueryPage::total`] ignores the window.

use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap};

use nest_codec::Value;
use nest_kv::{EntryRef, KvRead};
use nest_query::{Query, QueryError, RowCursor, SortField};
use tracing::trace;

use crate::error::{StoreError, StoreResult};
use crate::schema::{Schema, StoreId};
use crate::symbol::{resolve, Symbol};

/// Key order for id scans.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Direction {
    #[default]
    Ascending,
    Descending,
}

/// One page of matching ids plus the number of matches overall.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct QueryPage {
    pub ids: Vec<String>,
    pub total: usize,
}

/// Per-row view handed to the query evaluator.
struct StoreRow<'a> {
    schema: &'a Schema,
    tx: &'a dyn KvRead,
    symbols: &'a HashMap<String, Symbol>,
    id: &'a str,
}

impl StoreRow<'_> {
    fn symbol(&self, name: &str) -> StoreResult<&Symbol> {
        self.symbols
            .get(name)
            .ok_or_else(|| StoreError::Query(QueryError::UnknownSymbol(name.to_string())))
    }
}

impl RowCursor for StoreRow<'_> {
    type Error = StoreError;

    fn id(&self) -> &str {
        self.id
    }

    fn scalar(&mut self, name: &str) -> StoreResult<Option<Value>> {
        self.symbol(name)?.scalar(self.schema, self.tx, self.id)
    }

    fn any(&mut self, name: &str, predicate: &mut dyn FnMut(&Value) -> bool) -> StoreResult<bool> {
        self.symbol(name)?.any(self.schema, self.tx, self.id, predicate)
    }
}

/// A parsed query bound to the symbols of one store.
pub(crate) struct Plan<'q> {
    store: StoreId,
    query: &'q Query,
    symbols: HashMap<String, Symbol>,
}

impl<'q> Plan<'q> {
    pub(crate) fn new(schema: &Schema, store: StoreId, query: &'q Query) -> StoreResult<Self> {
        let mut symbols = HashMap::new();
        let mut missing = None;
        query.visit_symbols(|name| {
            if symbols.contains_key(name) || missing.is_some() {
                return;
            }
            match resolve(schema, store, name) {
                Some(sym) => {
                    symbols.insert(name.to_string(), sym);
                }
                None => missing = Some(name.to_string()),
            }
        });
        if let Some(name) = missing {
            return Err(QueryError::UnknownSymbol(name).into());
        }
        Ok(Self {
            store,
            query,
            symbols,
        })
    }

    fn matches(&self, schema: &Schema, tx: &dyn KvRead, id: &str) -> StoreResult<bool> {
        let mut row = StoreRow {
            schema,
            tx,
            symbols: &self.symbols,
            id,
        };
        self.query.eval_bool(&mut row)
    }

    pub(crate) fn execute(&self, schema: &Schema, tx: &dyn KvRead) -> StoreResult<QueryPage> {
        if self.query.sorted_by_id_only() {
            let direction = match self.query.sort_fields() {
                [field] if !field.ascending => Direction::Descending,
                _ => Direction::Ascending,
            };
            self.index_scan(schema, tx, direction)
        } else {
            self.sort_scan(schema, tx)
        }
    }

    /// Walk every row of the store in id order, calling `visit` for each
    /// match until it returns `false`.
    pub(crate) fn for_each_match(
        &self,
        schema: &Schema,
        tx: &dyn KvRead,
        direction: Direction,
        mut visit: impl FnMut(&str) -> bool,
    ) -> StoreResult<()> {
        let root = schema.root_of(self.store);
        let Some(container) = tx.bucket(&schema.container_path(root)) else {
            return Ok(());
        };
        match direction {
            Direction::Ascending => self.walk(schema, tx, container.iter(), &mut visit),
            Direction::Descending => self.walk(schema, tx, container.iter().rev(), &mut visit),
        }
    }

    fn walk<'a>(
        &self,
        schema: &Schema,
        tx: &'a dyn KvRead,
        entries: impl Iterator<Item = (&'a [u8], EntryRef<'a>)>,
        visit: &mut dyn FnMut(&str) -> bool,
    ) -> StoreResult<()> {
        let root = schema.root_of(self.store);
        for (key, entry) in entries {
            if entry.bucket().is_none() {
                continue;
            }
            let Ok(id) = std::str::from_utf8(key) else {
                continue;
            };
            if root != self.store && !schema.row_exists(tx, self.store, id) {
                continue;
            }
            if self.matches(schema, tx, id)? && !visit(id) {
                break;
            }
        }
        Ok(())
    }

    fn index_scan(&self, schema: &Schema, tx: &dyn KvRead, direction: Direction) -> StoreResult<QueryPage> {
        let skip = self.query.skip();
        let limit = self.query.limit();
        let mut page = QueryPage::default();
        self.for_each_match(schema, tx, direction, |id| {
            page.total += 1;
            if page.total > skip && limit.map_or(true, |l| page.ids.len() < l) {
                page.ids.push(id.to_string());
            }
            true
        })?;
        trace!(matched = page.total, returned = page.ids.len(), "index scan finished");
        Ok(page)
    }

    fn sort_scan(&self, schema: &Schema, tx: &dyn KvRead) -> StoreResult<QueryPage> {
        let fields = self.query.sort_fields();
        let skip = self.query.skip();
        let cap = self.query.limit().map(|l| skip.saturating_add(l));
        let mut best: BTreeSet<SortKey<'_>> = BTreeSet::new();
        let mut total = 0;
        let mut failure = None;

        self.for_each_match(schema, tx, Direction::Ascending, |id| {
            total += 1;
            match self.sort_key(schema, tx, fields, id) {
                Ok(key) => {
                    best.insert(key);
                    if cap.is_some_and(|cap| best.len() > cap) {
                        best.pop_last();
                    }
                    true
                }
                Err(err) => {
                    failure = Some(err);
                    false
                }
            }
        })?;
        if let Some(err) = failure {
            return Err(err);
        }

        let ids = best
            .into_iter()
            .skip(skip)
            .take(self.query.limit().unwrap_or(usize::MAX))
            .map(|k| k.id)
            .collect::<Vec<_>>();
        trace!(matched = total, returned = ids.len(), "sort scan finished");
        Ok(QueryPage { ids, total })
    }

    fn sort_key<'f>(
        &self,
        schema: &Schema,
        tx: &dyn KvRead,
        fields: &'f [SortField],
        id: &str,
    ) -> StoreResult<SortKey<'f>> {
        let mut values = Vec::with_capacity(fields.len());
        for field in fields {
            let symbol = self
                .symbols
                .get(&field.symbol)
                .ok_or_else(|| StoreError::Query(QueryError::UnknownSymbol(field.symbol.clone())))?;
            values.push(symbol.scalar(schema, tx, id)?.unwrap_or(Value::Nil));
        }
        Ok(SortKey {
            values,
            fields,
            id: id.to_string(),
        })
    }
}

/// Row ordering for the sort scanner: the requested keys in order, then id
/// ascending so the order is total and pages are stable.
struct SortKey<'f> {
    values: Vec<Value>,
    fields: &'f [SortField],
    id: String,
}

impl Ord for SortKey<'_> {
    fn cmp(&self, other: &Self) -> Ordering {
        for ((a, b), field) in self.values.iter().zip(&other.values).zip(self.fields) {
            let order = a.sort_cmp(b);
            let order = if field.ascending { order } else { order.reverse() };
            if order != Ordering::Equal {
                return order;
            }
        }
        self.id.cmp(&other.id)
    }
}

impl PartialOrd for SortKey<'_> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for SortKey<'_> {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for SortKey<'_> {}

//! Symbols: named accessors for entity fields, possibly chained across
//! stores.
//!
//! A [`Symbol`] is a list of hops. A plain field is one hop; `manager.name`
//! is two (the link field on this store, then `name` on the linked store).
//! Set-valued hops fan out, so evaluating a chain is a nested-loop join,
//! driven here by [`any_value`] without recursion or materialization.

use nest_codec::{decode, read_list, Tag, Value};
use nest_kv::{Bucket, Cursor, KvRead};

use crate::error::StoreResult;
use crate::schema::{Schema, StoreId};

/// How a symbol's value is stored in a row bucket.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SymbolKind {
    /// The row key itself.
    Id,
    /// One encoded value under the field key.
    Scalar,
    /// A sub-bucket whose keys are encoded members.
    Set,
    /// A sub-bucket tree of string keys.
    Map,
}

/// One registered field of one store.
#[derive(Clone, Debug, PartialEq)]
pub struct EntitySymbol {
    pub(crate) name: String,
    pub(crate) store: StoreId,
    /// Key path inside the row bucket. More than one segment only for map
    /// leaves.
    pub(crate) path: Vec<String>,
    pub(crate) tag: Tag,
    pub(crate) kind: SymbolKind,
    /// Store whose ids this symbol holds.
    pub(crate) link: Option<StoreId>,
    pub(crate) public: bool,
    /// Written by an index or link collection, never by callers.
    pub(crate) managed: bool,
}

impl EntitySymbol {
    pub(crate) fn id(store: StoreId) -> Self {
        Self {
            name: "id".into(),
            store,
            path: Vec::new(),
            tag: Tag::String,
            kind: SymbolKind::Id,
            link: None,
            public: true,
            managed: true,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn tag(&self) -> Tag {
        self.tag
    }

    pub fn kind(&self) -> SymbolKind {
        self.kind
    }

    pub fn is_public(&self) -> bool {
        self.public
    }

    fn field_bucket<'a>(&self, schema: &Schema, tx: &'a dyn KvRead, id: &str) -> Option<&'a Bucket> {
        let mut bucket = tx.bucket(&schema.row_path(self.store, id))?;
        for segment in &self.path[..self.path.len().saturating_sub(1)] {
            bucket = bucket.bucket(segment.as_bytes())?;
        }
        Some(bucket)
    }

    /// The value of a scalar hop for row `id`.
    pub(crate) fn read_scalar(
        &self,
        schema: &Schema,
        tx: &dyn KvRead,
        id: &str,
    ) -> StoreResult<Option<Value>> {
        match self.kind {
            SymbolKind::Id => Ok(Some(Value::from(id))),
            SymbolKind::Scalar => {
                let Some(last) = self.path.last() else {
                    return Ok(None);
                };
                match self
                    .field_bucket(schema, tx, id)
                    .and_then(|b| b.get(last.as_bytes()))
                {
                    Some(bytes) => Ok(Some(decode(bytes)?)),
                    None => Ok(None),
                }
            }
            SymbolKind::Set | SymbolKind::Map => Ok(None),
        }
    }

    /// The member bucket of a set hop for row `id`.
    pub(crate) fn set_bucket<'a>(
        &self,
        schema: &Schema,
        tx: &'a dyn KvRead,
        id: &str,
    ) -> Option<&'a Bucket> {
        if self.kind != SymbolKind::Set {
            return None;
        }
        let last = self.path.last()?;
        self.field_bucket(schema, tx, id)?.bucket(last.as_bytes())
    }

    pub(crate) fn read_set(&self, schema: &Schema, tx: &dyn KvRead, id: &str) -> StoreResult<Vec<Value>> {
        match self.set_bucket(schema, tx, id) {
            Some(bucket) => Ok(read_list(bucket)?),
            None => Ok(Vec::new()),
        }
    }
}

/// A resolved, possibly multi-hop symbol.
#[derive(Clone, Debug, PartialEq)]
pub struct Symbol {
    name: String,
    hops: Vec<EntitySymbol>,
}

impl Symbol {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Type of the final hop.
    pub fn tag(&self) -> Tag {
        self.last().tag
    }

    /// Whether any hop fans out.
    pub fn is_set(&self) -> bool {
        self.hops.iter().any(|h| h.kind == SymbolKind::Set)
    }

    pub fn is_public(&self) -> bool {
        self.hops.iter().all(|h| h.public)
    }

    pub fn is_composite(&self) -> bool {
        self.hops.len() > 1
    }

    pub fn hops(&self) -> &[EntitySymbol] {
        &self.hops
    }

    fn last(&self) -> &EntitySymbol {
        // Resolution never produces an empty chain.
        &self.hops[self.hops.len() - 1]
    }

    /// Value of a chain with no set hops. `None` as soon as a link is empty.
    pub(crate) fn scalar(&self, schema: &Schema, tx: &dyn KvRead, id: &str) -> StoreResult<Option<Value>> {
        let mut current = id.to_string();
        for (i, hop) in self.hops.iter().enumerate() {
            let value = hop.read_scalar(schema, tx, &current)?;
            if i + 1 == self.hops.len() {
                return Ok(value);
            }
            match value.as_ref().and_then(Value::as_str) {
                Some(next) if !next.is_empty() => current = next.to_string(),
                _ => return Ok(None),
            }
        }
        Ok(None)
    }

    /// Returns `true` as soon as `predicate` accepts a value reachable from
    /// row `id`.
    pub(crate) fn any(
        &self,
        schema: &Schema,
        tx: &dyn KvRead,
        id: &str,
        predicate: &mut dyn FnMut(&Value) -> bool,
    ) -> StoreResult<bool> {
        any_value(schema, tx, &self.hops, id, predicate)
    }
}

/// Resolve `name` against `store`.
///
/// Exact field names win, searched on the store and then up its parent
/// chain. Otherwise `head.tail` resolves either into a map field's bucket
/// tree or, through a linking field, against the linked store.
pub(crate) fn resolve(schema: &Schema, store: StoreId, name: &str) -> Option<Symbol> {
    if let Some(sym) = schema.lookup_symbol(store, name) {
        return Some(Symbol {
            name: name.to_string(),
            hops: vec![sym.clone()],
        });
    }
    let (head, tail) = name.split_once('.')?;
    if tail.is_empty() {
        return None;
    }
    let head = schema.lookup_symbol(store, head)?;
    match (head.kind, head.link) {
        (SymbolKind::Map, _) => {
            let mut path = head.path.clone();
            path.extend(tail.split('.').map(str::to_string));
            if path.iter().any(String::is_empty) {
                return None;
            }
            Some(Symbol {
                name: name.to_string(),
                hops: vec![EntitySymbol {
                    name: name.to_string(),
                    store: head.store,
                    path,
                    tag: Tag::Nil,
                    kind: SymbolKind::Scalar,
                    link: None,
                    public: head.public,
                    managed: false,
                }],
            })
        }
        (SymbolKind::Scalar | SymbolKind::Set, Some(target)) => {
            let rest = resolve(schema, target, tail)?;
            let mut hops = Vec::with_capacity(rest.hops.len() + 1);
            hops.push(head.clone());
            hops.extend(rest.hops);
            // `manager.id` is just `manager`.
            if hops.last().is_some_and(|h| h.kind == SymbolKind::Id) {
                hops.pop();
            }
            Some(Symbol {
                name: name.to_string(),
                hops,
            })
        }
        _ => None,
    }
}

/// Per-hop traversal state.
enum Frame<'a> {
    /// A scalar hop yields at most one value.
    One(Option<Value>),
    /// A set hop walks its member bucket.
    Many { cursor: Cursor<'a>, started: bool },
    Empty,
}

impl Frame<'_> {
    fn advance(&mut self) -> StoreResult<Option<Value>> {
        match self {
            Frame::One(value) => Ok(value.take()),
            Frame::Many { cursor, started } => {
                let next = if *started {
                    cursor.next()
                } else {
                    *started = true;
                    cursor.first()
                };
                match next {
                    Some((key, _)) => Ok(Some(decode(key)?)),
                    None => Ok(None),
                }
            }
            Frame::Empty => Ok(None),
        }
    }
}

fn open_frame<'a>(
    schema: &Schema,
    tx: &'a dyn KvRead,
    hop: &EntitySymbol,
    id: &str,
) -> StoreResult<Frame<'a>> {
    match hop.kind {
        SymbolKind::Set => Ok(match hop.set_bucket(schema, tx, id) {
            Some(bucket) => Frame::Many {
                cursor: bucket.cursor(),
                started: false,
            },
            None => Frame::Empty,
        }),
        _ => Ok(Frame::One(hop.read_scalar(schema, tx, id)?)),
    }
}

/// Odometer over the cross product of all hops.
///
/// The stack holds one frame per hop entered so far. The innermost frame
/// advances first; when it runs dry it is popped and its parent advances.
/// Values at intermediate hops are ids into the next hop's store.
fn any_value(
    schema: &Schema,
    tx: &dyn KvRead,
    hops: &[EntitySymbol],
    id: &str,
    predicate: &mut dyn FnMut(&Value) -> bool,
) -> StoreResult<bool> {
    let Some(first) = hops.first() else {
        return Ok(false);
    };
    let mut stack = vec![open_frame(schema, tx, first, id)?];
    while let Some(frame) = stack.last_mut() {
        let Some(value) = frame.advance()? else {
            stack.pop();
            continue;
        };
        let depth = stack.len() - 1;
        if depth + 1 == hops.len() {
            if predicate(&value) {
                return Ok(true);
            }
            continue;
        }
        match value.as_str() {
            Some(next) if !next.is_empty() => {
                let frame = open_frame(schema, tx, &hops[depth + 1], next)?;
                stack.push(frame);
            }
            _ => {}
        }
    }
    Ok(false)
}

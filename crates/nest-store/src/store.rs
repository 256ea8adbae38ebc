//! The per-entity-type [`Store`] handle: CRUD, queries and link accessors.

use nest_codec::{encode, read_map, write_list_with, write_map_with, Tag, Value};
use nest_kv::KvRead;
use nest_query::{Query, QueryError, SymbolInfo, SymbolOracle};
use tracing::debug;

use crate::constraint::Captured;
use crate::context::MutateContext;
use crate::error::{StoreError, StoreResult};
use crate::events::{EntityEvent, EventKind, ListenerId};
use crate::integrity::IntegritySink;
use crate::link::{LinkCollection, LinkDiff};
use crate::record::{FieldValue, Record};
use crate::scan::{Direction, Plan, QueryPage};
use crate::schema::{Cascade, Schema, StoreDef, StoreId};
use crate::symbol::{resolve, EntitySymbol, Symbol, SymbolKind};

/// Handle for one store of a [`Schema`]. Cheap to copy.
#[derive(Clone, Copy)]
pub struct Store<'s> {
    schema: &'s Schema,
    id: StoreId,
}

impl<'s> Store<'s> {
    pub(crate) fn new(schema: &'s Schema, id: StoreId) -> Self {
        Self { schema, id }
    }

    fn def(&self) -> &'s StoreDef {
        self.schema.def(self.id)
    }

    pub fn entity_type(&self) -> &'s str {
        &self.def().entity_type
    }

    pub fn store_id(&self) -> StoreId {
        self.id
    }

    /// The store this one's rows nest inside, if any.
    pub fn parent(&self) -> Option<Store<'s>> {
        self.def().parent.map(|p| Store::new(self.schema, p))
    }

    pub fn is_root(&self) -> bool {
        self.def().parent.is_none()
    }

    // ── Symbols ─────────────────────────────────────────────────────────

    /// Resolve a field name, including `link.field` chains and map paths.
    pub fn resolve(&self, name: &str) -> Option<Symbol> {
        resolve(self.schema, self.id, name)
    }

    /// Names of every field visible on this store, inherited ones included.
    pub fn symbol_names(&self, public_only: bool) -> Vec<String> {
        let mut names: Vec<String> = self
            .schema
            .lineage(self.id)
            .into_iter()
            .flat_map(|s| self.schema.def(s).symbols.values())
            .filter(|s| !public_only || s.public)
            .map(|s| s.name.clone())
            .collect();
        names.sort();
        names.dedup();
        names
    }

    fn writable_symbol(&self, name: &str) -> StoreResult<&'s EntitySymbol> {
        let sym = self
            .schema
            .lookup_symbol(self.id, name)
            .ok_or_else(|| StoreError::UnknownField {
                entity_type: self.entity_type().to_string(),
                field: name.to_string(),
            })?;
        if sym.managed {
            return Err(StoreError::ReadOnlyField {
                entity_type: self.entity_type().to_string(),
                field: name.to_string(),
            });
        }
        Ok(sym)
    }

    fn link(&self, field: &str) -> StoreResult<&'s LinkCollection> {
        self.schema
            .lineage(self.id)
            .into_iter()
            .flat_map(|s| self.schema.def(s).links.iter())
            .find(|l| l.field == field)
            .ok_or_else(|| StoreError::UnknownField {
                entity_type: self.entity_type().to_string(),
                field: field.to_string(),
            })
    }

    // ── Mutations ───────────────────────────────────────────────────────

    /// Insert a new row. Fails if the id is blank or already present.
    pub fn create(&self, ctx: &mut MutateContext<'_>, record: &Record) -> StoreResult<()> {
        ctx.run(|ctx| self.create_row(ctx, record))
    }

    /// Write the fields of an existing row.
    ///
    /// With `fields` set, only those names are written; a listed name the
    /// record does not carry is cleared. Without it, every field the record
    /// carries is written and the rest are left alone.
    pub fn update(
        &self,
        ctx: &mut MutateContext<'_>,
        record: &Record,
        fields: Option<&[&str]>,
    ) -> StoreResult<()> {
        ctx.run(|ctx| self.update_row(ctx, record, fields))
    }

    /// Delete a row, its child rows, and its index and link entries.
    ///
    /// Deleting through a child store deletes the whole entity from the
    /// root store.
    pub fn delete_by_id(&self, ctx: &mut MutateContext<'_>, id: &str) -> StoreResult<()> {
        ctx.run(|ctx| self.delete_row(ctx, id))
    }

    /// Delete every row matching `query`. Stops at the first failure.
    pub fn delete_where(&self, ctx: &mut MutateContext<'_>, query: &str) -> StoreResult<usize> {
        let ids = ctx.run(|ctx| {
            let query = Query::parse(query, self)?;
            self.collect_ids(ctx.reader(), &query)
        })?;
        for id in &ids {
            self.delete_by_id(ctx, id)?;
        }
        debug!(entity_type = self.entity_type(), deleted = ids.len(), "delete where");
        Ok(ids.len())
    }

    fn capture(&self, ctx: &MutateContext<'_>, id: &str) -> StoreResult<Vec<(StoreId, Vec<Captured>)>> {
        let mut out = Vec::new();
        for store in self.schema.lineage(self.id) {
            let mut captured = Vec::new();
            for constraint in &self.schema.def(store).constraints {
                captured.push(constraint.before_update(self.schema, store, ctx.reader(), id)?);
            }
            out.push((store, captured));
        }
        Ok(out)
    }

    fn apply(
        &self,
        ctx: &mut MutateContext<'_>,
        id: &str,
        captured: Vec<(StoreId, Vec<Captured>)>,
        is_create: bool,
    ) -> StoreResult<()> {
        for (store, states) in captured {
            let constraints = &self.schema.def(store).constraints;
            for (constraint, state) in constraints.iter().zip(states) {
                let is_create = is_create && store == self.id;
                if let Err(err) = constraint.after_update(ctx, store, id, state, is_create) {
                    debug!(constraint = constraint.name(), id, error = %err, "constraint rejected mutation");
                    return Err(err);
                }
            }
        }
        Ok(())
    }

    fn create_row(&self, ctx: &mut MutateContext<'_>, record: &Record) -> StoreResult<()> {
        let id = record.id.as_str();
        if id.is_empty() {
            return Err(StoreError::MissingId {
                entity_type: self.entity_type().to_string(),
            });
        }
        let max = self.schema.config().max_key_component;
        if id.len() > max {
            return Err(StoreError::KeyTooLarge { len: id.len(), max });
        }
        if let Some(parent) = self.parent() {
            if !parent.exists(ctx.reader(), id) {
                return Err(StoreError::not_found(parent.entity_type(), id));
            }
        }
        if self.exists(ctx.reader(), id) {
            return Err(StoreError::AlreadyExists {
                entity_type: self.entity_type().to_string(),
                id: id.to_string(),
            });
        }

        let captured = self.capture(ctx, id)?;
        ctx.tx_mut()
            .create_bucket_all(&self.schema.row_path(self.id, id))?;
        for (name, value) in &record.fields {
            if name != "id" && !self.is_maintained_as(ctx.reader(), id, name, value)? {
                self.write_field(ctx, id, name, Some(value))?;
            }
        }
        self.apply(ctx, id, captured, true)?;
        ctx.queue(EntityEvent::new(EventKind::Created, self.entity_type(), id));
        debug!(entity_type = self.entity_type(), id, "created");
        Ok(())
    }

    fn update_row(
        &self,
        ctx: &mut MutateContext<'_>,
        record: &Record,
        fields: Option<&[&str]>,
    ) -> StoreResult<()> {
        let id = record.id.as_str();
        if !self.exists(ctx.reader(), id) {
            return Err(StoreError::not_found(self.entity_type(), id));
        }
        let captured = self.capture(ctx, id)?;
        match fields {
            Some(names) => {
                for name in names {
                    self.write_field(ctx, id, name, record.get(name))?;
                }
            }
            None => {
                for (name, value) in &record.fields {
                    if name != "id" && !self.is_maintained_as(ctx.reader(), id, name, value)? {
                        self.write_field(ctx, id, name, Some(value))?;
                    }
                }
            }
        }
        self.apply(ctx, id, captured, false)?;
        ctx.queue(EntityEvent::new(EventKind::Updated, self.entity_type(), id));
        debug!(entity_type = self.entity_type(), id, "updated");
        Ok(())
    }

    /// True when `name` is a field the store maintains and `value` matches
    /// what it holds, so a loaded record can be written back unchanged.
    fn is_maintained_as(&self, tx: &dyn KvRead, id: &str, name: &str, value: &FieldValue) -> StoreResult<bool> {
        let Some(sym) = self.schema.lookup_symbol(self.id, name) else {
            return Ok(false);
        };
        if !sym.managed {
            return Ok(false);
        }
        let FieldValue::Set(given) = value else {
            return Ok(false);
        };
        let mut held = sym.read_set(self.schema, tx, id)?;
        let mut given = given.clone();
        held.sort_by(Value::sort_cmp);
        given.sort_by(Value::sort_cmp);
        given.dedup();
        Ok(held == given)
    }

    /// Write one field into the row bucket; `None` clears it.
    fn write_field(
        &self,
        ctx: &mut MutateContext<'_>,
        id: &str,
        name: &str,
        value: Option<&FieldValue>,
    ) -> StoreResult<()> {
        let sym = self.writable_symbol(name)?;
        let row = self.schema.row_path(sym.store, id);
        let key = name.as_bytes();
        let mismatch = |found: &str| StoreError::FieldType {
            entity_type: self.entity_type().to_string(),
            field: name.to_string(),
            expected: match sym.kind {
                SymbolKind::Set => format!("set of {}", sym.tag),
                SymbolKind::Map => "map".to_string(),
                _ => sym.tag.to_string(),
            },
            found: found.to_string(),
        };

        let Some(value) = value else {
            let tx = ctx.tx_mut();
            match sym.kind {
                SymbolKind::Scalar => {
                    tx.delete(&row, key)?;
                }
                SymbolKind::Set | SymbolKind::Map => {
                    tx.delete_bucket(&row.child(key))?;
                }
                SymbolKind::Id => {}
            }
            return Ok(());
        };

        match (sym.kind, value) {
            (SymbolKind::Scalar, FieldValue::Scalar(v)) => {
                let v = coerce(sym.tag, v).ok_or_else(|| mismatch(&v.tag().to_string()))?;
                ctx.tx_mut().create_bucket_all(&row)?.put(key, encode(&v))?;
            }
            (SymbolKind::Set, FieldValue::Set(values)) => {
                let values = values
                    .iter()
                    .map(|v| match v {
                        Value::Nil => None,
                        v => coerce(sym.tag, v),
                    })
                    .collect::<Option<Vec<_>>>()
                    .ok_or_else(|| mismatch("set with mismatched members"))?;
                let max = self.schema.config().max_key_component;
                write_list_with(ctx.tx_mut().create_bucket_all(&row.child(key))?, &values, max)?;
            }
            (SymbolKind::Map, FieldValue::Map(map)) => {
                let max = self.schema.config().max_key_component;
                write_map_with(ctx.tx_mut().create_bucket_all(&row.child(key))?, map, max)?;
            }
            (_, other) => return Err(mismatch(other.kind_name())),
        }
        Ok(())
    }

    fn delete_row(&self, ctx: &mut MutateContext<'_>, id: &str) -> StoreResult<()> {
        let root = self.schema.root_of(self.id);
        if root != self.id {
            return Store::new(self.schema, root).delete_row(ctx, id);
        }
        if !self.exists(ctx.reader(), id) {
            return Err(StoreError::not_found(self.entity_type(), id));
        }
        let present: Vec<StoreId> = self
            .schema
            .subtree(root)
            .into_iter()
            .filter(|s| self.schema.row_exists(ctx.reader(), *s, id))
            .collect();

        for &store in &present {
            for cascade in &self.schema.def(store).cascades {
                self.run_cascade(ctx, store, cascade, id)?;
            }
        }
        for &store in &present {
            for constraint in &self.schema.def(store).constraints {
                constraint.check_delete(self.schema, store, ctx.reader(), id, ctx.is_system())?;
            }
        }
        for &store in present.iter().rev() {
            for constraint in &self.schema.def(store).constraints {
                constraint.process_delete(ctx, store, id)?;
            }
        }
        for &store in &present {
            for link in &self.schema.def(store).links {
                link.teardown(ctx, id)?;
            }
        }
        ctx.tx_mut()
            .delete_bucket(&self.schema.row_path(root, id))?;
        for &store in &present {
            ctx.queue(EntityEvent::new(
                EventKind::Deleted,
                &self.schema.def(store).entity_type,
                id,
            ));
        }
        debug!(entity_type = self.entity_type(), id, stores = present.len(), "deleted");
        Ok(())
    }

    fn run_cascade(
        &self,
        ctx: &mut MutateContext<'_>,
        store: StoreId,
        cascade: &Cascade,
        id: &str,
    ) -> StoreResult<()> {
        match cascade {
            Cascade::Custom(handler) => handler(ctx, id),
            Cascade::Nullify {
                referencing,
                field,
                inverse,
            } => {
                let inverse = self
                    .schema
                    .lookup_symbol(store, inverse)
                    .ok_or_else(|| StoreError::Schema(format!("missing inverse {inverse}")))?;
                let referencing_ids = inverse.read_set(self.schema, ctx.reader(), id)?;
                let target = Store::new(self.schema, *referencing);
                for value in referencing_ids {
                    let Some(rid) = value.as_str() else { continue };
                    if !target.exists(ctx.reader(), rid) {
                        continue;
                    }
                    let record = Record::new(rid).with(field.as_str(), Value::Nil);
                    let names = [field.as_str()];
                    target.update_row(ctx, &record, Some(&names[..]))?;
                }
                Ok(())
            }
        }
    }

    // ── Reads ───────────────────────────────────────────────────────────

    pub fn exists(&self, tx: &dyn KvRead, id: &str) -> bool {
        self.schema.row_exists(tx, self.id, id)
    }

    /// Read every field of row `id`, inherited and maintained ones included.
    pub fn load_one_by_id(&self, tx: &dyn KvRead, id: &str) -> StoreResult<Record> {
        if !self.exists(tx, id) {
            return Err(StoreError::not_found(self.entity_type(), id));
        }
        let mut record = Record::new(id);
        for store in self.schema.lineage(self.id) {
            for sym in self.schema.def(store).symbols.values() {
                let value = match sym.kind {
                    SymbolKind::Id => continue,
                    SymbolKind::Scalar => match sym.read_scalar(self.schema, tx, id)? {
                        Some(v) => FieldValue::Scalar(v),
                        None => continue,
                    },
                    SymbolKind::Set => FieldValue::Set(sym.read_set(self.schema, tx, id)?),
                    SymbolKind::Map => {
                        let path = self.schema.row_path(store, id).child(&sym.name);
                        match tx.bucket(&path) {
                            Some(bucket) => FieldValue::Map(read_map(bucket)?),
                            None => continue,
                        }
                    }
                };
                record.fields.insert(sym.name.clone(), value);
            }
        }
        Ok(record)
    }

    /// The first row, in query order, matching `query`.
    pub fn load_one_by_query(&self, tx: &dyn KvRead, query: &str) -> StoreResult<Record> {
        let page = self.query_ids_trusted(tx, query)?;
        match page.ids.first() {
            Some(id) => self.load_one_by_id(tx, id),
            None => Err(StoreError::not_found(self.entity_type(), query)),
        }
    }

    /// Run an untrusted query string. Only public fields may be referenced.
    pub fn query_ids(&self, tx: &dyn KvRead, query: &str) -> StoreResult<QueryPage> {
        let query = Query::parse(query, self)?;
        let mut hidden = None;
        query.visit_symbols(|name| {
            if hidden.is_none() && self.resolve(name).is_some_and(|s| !s.is_public()) {
                hidden = Some(name.to_string());
            }
        });
        if let Some(name) = hidden {
            return Err(QueryError::NotPublic(name).into());
        }
        self.query(tx, &query)
    }

    /// Run a query string from trusted code; private fields are allowed.
    pub fn query_ids_trusted(&self, tx: &dyn KvRead, query: &str) -> StoreResult<QueryPage> {
        let query = Query::parse(query, self)?;
        self.query(tx, &query)
    }

    /// Execute a parsed query.
    pub fn query(&self, tx: &dyn KvRead, query: &Query) -> StoreResult<QueryPage> {
        Plan::new(self.schema, self.id, query)?.execute(self.schema, tx)
    }

    fn collect_ids(&self, tx: &dyn KvRead, query: &Query) -> StoreResult<Vec<String>> {
        let mut ids = Vec::new();
        let plan = Plan::new(self.schema, self.id, query)?;
        plan.for_each_match(self.schema, tx, Direction::Ascending, |id| {
            ids.push(id.to_string());
            true
        })?;
        Ok(ids)
    }

    /// Every row id in key order.
    pub fn ids(&self, tx: &dyn KvRead, direction: Direction) -> Vec<String> {
        let mut ids = self.schema.row_ids(tx, self.id);
        if direction == Direction::Descending {
            ids.reverse();
        }
        ids
    }

    pub fn count(&self, tx: &dyn KvRead) -> usize {
        self.schema.row_ids(tx, self.id).len()
    }

    // ── Links ───────────────────────────────────────────────────────────

    pub fn get_links(&self, tx: &dyn KvRead, field: &str, id: &str) -> StoreResult<Vec<String>> {
        self.link(field)?.get_links(self.schema, tx, id)
    }

    pub fn is_linked(&self, tx: &dyn KvRead, field: &str, id: &str, other: &str) -> StoreResult<bool> {
        self.link(field)?.is_linked(self.schema, tx, id, other)
    }

    /// Make the links of `id` through `field` exactly `keys`.
    pub fn set_links<S: AsRef<str>>(
        &self,
        ctx: &mut MutateContext<'_>,
        field: &str,
        id: &str,
        keys: &[S],
    ) -> StoreResult<LinkDiff> {
        let link = self.link(field)?;
        ctx.run(|ctx| link.set_links(ctx, id, keys))
    }

    pub fn add_link(&self, ctx: &mut MutateContext<'_>, field: &str, id: &str, other: &str) -> StoreResult<bool> {
        let link = self.link(field)?;
        ctx.run(|ctx| link.add_link(ctx, id, other))
    }

    pub fn remove_link(&self, ctx: &mut MutateContext<'_>, field: &str, id: &str, other: &str) -> StoreResult<bool> {
        let link = self.link(field)?;
        ctx.run(|ctx| link.remove_link(ctx, id, other))
    }

    // ── Events and integrity ────────────────────────────────────────────

    /// Register a post-commit listener for this entity type.
    pub fn add_listener(
        &self,
        kind: EventKind,
        handler: impl Fn(&EntityEvent) + Send + Sync + 'static,
    ) -> ListenerId {
        self.schema
            .events()
            .add_listener(kind, Some(self.entity_type()), handler)
    }

    /// Verify this store's indexes and link collections, repairing what can
    /// be repaired when `fix` is set. Findings go to `sink`; only failed
    /// repair writes return an error.
    pub fn check_integrity(
        &self,
        ctx: &mut MutateContext<'_>,
        fix: bool,
        sink: &mut dyn IntegritySink,
    ) -> StoreResult<()> {
        ctx.run(|ctx| {
            let def = self.def();
            for constraint in &def.constraints {
                constraint.check_integrity(ctx, self.id, fix, sink)?;
            }
            for link in &def.links {
                link.check_integrity(ctx, fix, sink)?;
            }
            debug!(entity_type = self.entity_type(), fix, "integrity checked");
            Ok(())
        })
    }
}

impl SymbolOracle for Store<'_> {
    fn symbol_info(&self, name: &str) -> Option<SymbolInfo> {
        self.resolve(name).map(|s| SymbolInfo {
            tag: s.tag(),
            is_set: s.is_set(),
            public: s.is_public(),
        })
    }
}

impl std::fmt::Debug for Store<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("entity_type", &self.entity_type())
            .field("id", &self.id)
            .finish()
    }
}

/// Convert `value` to the declared type, widening integers where lossless.
fn coerce(tag: Tag, value: &Value) -> Option<Value> {
    match (tag, value) {
        (_, Value::Nil) => Some(Value::Nil),
        (Tag::Nil, v) => Some(v.clone()),
        (Tag::Int64, Value::Int32(v)) => Some(Value::Int64(i64::from(*v))),
        (Tag::Float64, Value::Int32(v)) => Some(Value::Float64(f64::from(*v))),
        (t, v) if v.tag() == t => Some(v.clone()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coerce_widens_and_rejects() {
        assert_eq!(coerce(Tag::Int64, &Value::Int32(7)), Some(Value::Int64(7)));
        assert_eq!(coerce(Tag::Float64, &Value::Int32(2)), Some(Value::Float64(2.0)));
        assert_eq!(coerce(Tag::String, &Value::Nil), Some(Value::Nil));
        assert_eq!(coerce(Tag::String, &Value::Int32(1)), None);
        assert_eq!(coerce(Tag::Bool, &Value::Bool(true)), Some(Value::Bool(true)));
    }
}

use std::collections::BTreeMap;

use nest_codec::{decode, list_key, Value};
use nest_kv::KvRead;

use super::{field_symbol, Captured, SetListener};
use crate::context::MutateContext;
use crate::error::StoreResult;
use crate::integrity::{IntegrityCheck, IntegritySink, Reporter};
use crate::schema::{Schema, StoreId};

/// Before/after members of one row's indexed set, handed to listeners.
#[derive(Clone, Debug, PartialEq)]
pub struct SetChange {
    pub entity_type: String,
    pub field: String,
    pub id: String,
    pub before: Vec<Value>,
    pub after: Vec<Value>,
}

/// Inverted index over a set field: one bucket per member value, holding
/// the ids of every row whose set contains it.
///
/// Layout: `{indexes}/{entity_type}/{symbol}/{tag‖value}/{id}`.
pub(crate) struct SetIndex {
    pub(crate) symbol: String,
    pub(crate) listeners: Vec<SetListener>,
}

impl SetIndex {
    fn current(&self, schema: &Schema, store: StoreId, tx: &dyn KvRead, id: &str) -> StoreResult<Vec<Value>> {
        field_symbol(schema, store, &self.symbol)?.read_set(schema, tx, id)
    }

    pub(crate) fn before_update(
        &self,
        schema: &Schema,
        store: StoreId,
        tx: &dyn KvRead,
        id: &str,
    ) -> StoreResult<Captured> {
        Ok(Captured::Set(self.current(schema, store, tx, id)?))
    }

    pub(crate) fn after_update(
        &self,
        ctx: &mut MutateContext<'_>,
        store: StoreId,
        id: &str,
        captured: Captured,
    ) -> StoreResult<()> {
        let schema = ctx.schema();
        let before = match captured {
            Captured::Set(values) => values,
            _ => Vec::new(),
        };
        let after = self.current(schema, store, ctx.reader(), id)?;
        if before == after {
            return Ok(());
        }

        {
            let old = keyed(&before)?;
            let new = keyed(&after)?;
            for key in old.keys().filter(|k| !new.contains_key(*k)) {
                self.unlink(ctx, store, key, id)?;
            }
            for key in new.keys().filter(|k| !old.contains_key(*k)) {
                self.link(ctx, store, key, id)?;
            }
        }

        if !self.listeners.is_empty() {
            let change = SetChange {
                entity_type: schema.def(store).entity_type.clone(),
                field: self.symbol.clone(),
                id: id.to_string(),
                before,
                after,
            };
            for listener in &self.listeners {
                listener(ctx, &change)?;
            }
        }
        Ok(())
    }

    pub(crate) fn process_delete(&self, ctx: &mut MutateContext<'_>, store: StoreId, id: &str) -> StoreResult<()> {
        let values = self.current(ctx.schema(), store, ctx.reader(), id)?;
        for key in keyed(&values)?.keys() {
            self.unlink(ctx, store, key, id)?;
        }
        Ok(())
    }

    fn link(&self, ctx: &mut MutateContext<'_>, store: StoreId, key: &[u8], id: &str) -> StoreResult<()> {
        let path = ctx.schema().index_path(store, &self.symbol).child(key);
        ctx.tx_mut().create_bucket_all(&path)?.put(id.as_bytes(), Vec::new())?;
        Ok(())
    }

    /// Drop `id` from the value bucket, and the bucket once it is empty.
    fn unlink(&self, ctx: &mut MutateContext<'_>, store: StoreId, key: &[u8], id: &str) -> StoreResult<()> {
        let path = ctx.schema().index_path(store, &self.symbol).child(key);
        ctx.tx_mut().delete(&path, id.as_bytes())?;
        if ctx.reader().bucket(&path).is_some_and(|b| b.is_empty()) {
            ctx.tx_mut().delete_bucket(&path)?;
        }
        Ok(())
    }

    pub(crate) fn check_integrity(
        &self,
        ctx: &mut MutateContext<'_>,
        store: StoreId,
        fix: bool,
        sink: &mut dyn IntegritySink,
    ) -> StoreResult<()> {
        let schema = ctx.schema();
        let reporter = Reporter {
            entity_type: &schema.def(store).entity_type,
            check: IntegrityCheck::SetIndex,
            field: &self.symbol,
            fix,
        };
        let root = schema.index_path(store, &self.symbol);

        // value key -> ids the index claims
        let claimed: BTreeMap<Vec<u8>, Vec<String>> = ctx
            .reader()
            .bucket(&root)
            .map(|b| {
                b.iter()
                    .filter_map(|(k, e)| e.bucket().map(|ids| (k, ids)))
                    .map(|(k, ids)| {
                        let ids = ids
                            .keys()
                            .map(|id| String::from_utf8_lossy(id).into_owned())
                            .collect();
                        (k.to_vec(), ids)
                    })
                    .collect()
            })
            .unwrap_or_default();

        for (key, ids) in &claimed {
            let value = match decode(key) {
                Ok(value) => value,
                Err(err) => {
                    reporter.emit(sink, "", format!("undecodable index key: {err}"), true);
                    if fix {
                        ctx.tx_mut().delete_bucket(&root.child(key))?;
                    }
                    continue;
                }
            };
            for id in ids {
                let detail = if !schema.row_exists(ctx.reader(), store, id) {
                    format!("entry {value} points at a missing row")
                } else if !self.current(schema, store, ctx.reader(), id)?.contains(&value) {
                    format!("row no longer holds {value}")
                } else {
                    continue;
                };
                reporter.emit(sink, id, detail, true);
                if fix {
                    self.unlink(ctx, store, key, id)?;
                }
            }
        }

        for id in schema.row_ids(ctx.reader(), store) {
            let values = self.current(schema, store, ctx.reader(), &id)?;
            for (key, value) in keyed(&values)? {
                let indexed = claimed
                    .get(&key)
                    .is_some_and(|ids| ids.iter().any(|i| *i == id));
                if !indexed {
                    reporter.emit(sink, &id, format!("member {value} is not indexed"), true);
                    if fix {
                        self.link(ctx, store, &key, &id)?;
                    }
                }
            }
        }
        Ok(())
    }
}

fn keyed(values: &[Value]) -> StoreResult<BTreeMap<Vec<u8>, &Value>> {
    let mut out = BTreeMap::new();
    for value in values {
        out.insert(list_key(value)?, value);
    }
    Ok(out)
}

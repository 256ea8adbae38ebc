use nest_codec::{decode, list_key, list_key_with, Value};
use nest_kv::KvRead;
use tracing::debug;

use super::{field_symbol, is_empty, Captured};
use crate::context::MutateContext;
use crate::error::{StoreError, StoreResult};
use crate::integrity::{IntegrityCheck, IntegritySink, Reporter};
use crate::schema::{Schema, StoreId};

/// Maps each non-empty value of a scalar field to the one row holding it.
///
/// Layout: `{indexes}/{entity_type}/{symbol}` with key `tag‖value` and the
/// owning id as value.
pub(crate) struct UniqueIndex {
    pub(crate) symbol: String,
    pub(crate) nullable: bool,
}

impl UniqueIndex {
    fn current(&self, schema: &Schema, store: StoreId, tx: &dyn KvRead, id: &str) -> StoreResult<Option<Value>> {
        field_symbol(schema, store, &self.symbol)?.read_scalar(schema, tx, id)
    }

    pub(crate) fn before_update(
        &self,
        schema: &Schema,
        store: StoreId,
        tx: &dyn KvRead,
        id: &str,
    ) -> StoreResult<Captured> {
        Ok(Captured::Scalar(self.current(schema, store, tx, id)?))
    }

    pub(crate) fn after_update(
        &self,
        ctx: &mut MutateContext<'_>,
        store: StoreId,
        id: &str,
        captured: Captured,
        is_create: bool,
    ) -> StoreResult<()> {
        let schema = ctx.schema();
        let old = match captured {
            Captured::Scalar(old) if !is_create => old,
            _ => None,
        };
        let new = self.current(schema, store, ctx.reader(), id)?;
        if !is_create && old == new {
            return Ok(());
        }

        let path = schema.index_path(store, &self.symbol);
        if let Some(old) = old.filter(|v| !v.is_empty()) {
            let key = list_key(&old)?;
            if ctx.reader().get(&path, &key) == Some(id.as_bytes()) {
                ctx.tx_mut().delete(&path, &key)?;
            }
        }

        let Some(new) = new.filter(|v| !v.is_empty()) else {
            if self.nullable {
                return Ok(());
            }
            return Err(StoreError::MissingField {
                entity_type: schema.def(store).entity_type.clone(),
                field: self.symbol.clone(),
            });
        };
        let key = list_key_with(&new, schema.config().max_key_component)?;
        if let Some(owner) = ctx.reader().get(&path, &key) {
            if owner != id.as_bytes() {
                return Err(StoreError::Duplicate {
                    entity_type: schema.def(store).entity_type.clone(),
                    field: self.symbol.clone(),
                    value: new.to_string(),
                    existing_id: String::from_utf8_lossy(owner).into_owned(),
                });
            }
            return Ok(());
        }
        ctx.tx_mut().create_bucket_all(&path)?.put(key, id.as_bytes())?;
        Ok(())
    }

    pub(crate) fn process_delete(&self, ctx: &mut MutateContext<'_>, store: StoreId, id: &str) -> StoreResult<()> {
        let schema = ctx.schema();
        let Some(value) = self.current(schema, store, ctx.reader(), id)? else {
            return Ok(());
        };
        if value.is_empty() {
            return Ok(());
        }
        let path = schema.index_path(store, &self.symbol);
        let key = list_key(&value)?;
        if ctx.reader().get(&path, &key) == Some(id.as_bytes()) {
            ctx.tx_mut().delete(&path, &key)?;
        }
        Ok(())
    }

    /// Forward: every entry names a live row that still holds the value.
    /// Backward: every row's value has an entry naming it.
    pub(crate) fn check_integrity(
        &self,
        ctx: &mut MutateContext<'_>,
        store: StoreId,
        fix: bool,
        sink: &mut dyn IntegritySink,
    ) -> StoreResult<()> {
        let schema = ctx.schema();
        let entity_type = &schema.def(store).entity_type;
        let reporter = Reporter {
            entity_type,
            check: IntegrityCheck::UniqueIndex,
            field: &self.symbol,
            fix,
        };
        let path = schema.index_path(store, &self.symbol);

        let entries: Vec<(Vec<u8>, String)> = ctx
            .reader()
            .bucket(&path)
            .map(|b| {
                b.iter()
                    .filter_map(|(k, e)| e.value().map(|v| (k.to_vec(), String::from_utf8_lossy(v).into_owned())))
                    .collect()
            })
            .unwrap_or_default();

        let mut stale = Vec::new();
        for (key, owner) in entries {
            let value = match decode(&key) {
                Ok(value) => value,
                Err(err) => {
                    reporter.emit(sink, &owner, format!("undecodable index key: {err}"), true);
                    stale.push(key);
                    continue;
                }
            };
            if !schema.row_exists(ctx.reader(), store, &owner) {
                reporter.emit(sink, &owner, format!("entry {value} points at a missing row"), true);
                stale.push(key);
                continue;
            }
            let held = self.current(schema, store, ctx.reader(), &owner)?;
            if held.as_ref() != Some(&value) {
                reporter.emit(
                    sink,
                    &owner,
                    format!("entry {value} does not match row value {}", display(held.as_ref())),
                    true,
                );
                stale.push(key);
            }
        }
        if fix {
            for key in &stale {
                ctx.tx_mut().delete(&path, key)?;
            }
        }

        for id in schema.row_ids(ctx.reader(), store) {
            let value = self.current(schema, store, ctx.reader(), &id)?;
            if is_empty(value.as_ref()) {
                if !self.nullable {
                    reporter.emit(sink, &id, "required value is empty".into(), false);
                }
                continue;
            }
            let Some(value) = value else { continue };
            let key = list_key(&value)?;
            let owner = ctx
                .reader()
                .get(&path, &key)
                .map(|o| String::from_utf8_lossy(o).into_owned());
            if owner.as_deref() == Some(id.as_str()) {
                continue;
            }
            if let Some(owner) = owner {
                let contested = schema.row_exists(ctx.reader(), store, &owner)
                    && self.current(schema, store, ctx.reader(), &owner)?.as_ref() == Some(&value);
                if contested {
                    // Two live rows claim the value; neither is canonical.
                    reporter.emit(sink, &id, format!("value {value} is also held by {owner}"), false);
                    continue;
                }
            }
            reporter.emit(sink, &id, format!("value {value} is not indexed"), true);
            if fix {
                ctx.tx_mut().create_bucket_all(&path)?.put(key, id.as_bytes())?;
            }
        }
        debug!(entity_type = %entity_type, field = %self.symbol, "unique index checked");
        Ok(())
    }
}

fn display(value: Option<&Value>) -> String {
    value.map_or_else(|| "<absent>".to_string(), Value::to_string)
}

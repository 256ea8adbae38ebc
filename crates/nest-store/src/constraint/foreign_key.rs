use nest_codec::{add_to_list, read_list, remove_from_list, Value};
use nest_kv::KvRead;
use tracing::debug;

use super::{field_symbol, Captured};
use crate::context::MutateContext;
use crate::error::{StoreError, StoreResult};
use crate::integrity::{IntegrityCheck, IntegritySink, Reporter};
use crate::schema::{Schema, StoreId};

/// Mirrors a scalar link field into an inverse set on the linked row, so the
/// rows referencing a target are found without a scan.
///
/// Layout: the referencing ids live in `{target row}/{inverse}`.
pub(crate) struct ForeignKeyIndex {
    pub(crate) symbol: String,
    pub(crate) target: StoreId,
    pub(crate) inverse: String,
    pub(crate) nullable: bool,
}

/// Target id held by a link value, if any.
fn target_id(value: Option<&Value>) -> Option<&str> {
    value.and_then(Value::as_str).filter(|s| !s.is_empty())
}

impl ForeignKeyIndex {
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

        if let Some(old) = target_id(old.as_ref()) {
            self.unmirror(ctx, old, id)?;
        }
        let Some(target) = target_id(new.as_ref()) else {
            if self.nullable {
                return Ok(());
            }
            return Err(StoreError::MissingField {
                entity_type: schema.def(store).entity_type.clone(),
                field: self.symbol.clone(),
            });
        };
        if !schema.row_exists(ctx.reader(), self.target, target) {
            return Err(StoreError::InvalidReference {
                entity_type: schema.def(store).entity_type.clone(),
                field: self.symbol.clone(),
                target_type: schema.def(self.target).entity_type.clone(),
                target_id: target.to_string(),
            });
        }
        self.mirror(ctx, target, id)
    }

    pub(crate) fn process_delete(&self, ctx: &mut MutateContext<'_>, store: StoreId, id: &str) -> StoreResult<()> {
        let value = self.current(ctx.schema(), store, ctx.reader(), id)?;
        if let Some(target) = target_id(value.as_ref()) {
            self.unmirror(ctx, target, id)?;
        }
        Ok(())
    }

    fn inverse_path(&self, schema: &Schema, target: &str) -> nest_kv::BucketPath {
        schema.row_path(self.target, target).child(&self.inverse)
    }

    fn mirror(&self, ctx: &mut MutateContext<'_>, target: &str, id: &str) -> StoreResult<()> {
        let path = self.inverse_path(ctx.schema(), target);
        add_to_list(ctx.tx_mut().create_bucket_all(&path)?, &Value::from(id))?;
        Ok(())
    }

    fn unmirror(&self, ctx: &mut MutateContext<'_>, target: &str, id: &str) -> StoreResult<()> {
        let path = self.inverse_path(ctx.schema(), target);
        if ctx.reader().bucket(&path).is_none() {
            return Ok(());
        }
        remove_from_list(ctx.tx_mut().bucket_mut(&path)?, &Value::from(id))?;
        Ok(())
    }

    /// Forward: each inverse entry names a live row whose link points back.
    /// Backward: each live link value lands in its target's inverse set.
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
            check: IntegrityCheck::ForeignKey,
            field: &self.symbol,
            fix,
        };

        for target in schema.row_ids(ctx.reader(), self.target) {
            let path = self.inverse_path(schema, &target);
            let referencing = match ctx.reader().bucket(&path) {
                Some(bucket) => read_list(bucket)?,
                None => continue,
            };
            for value in referencing {
                let Some(id) = value.as_str() else { continue };
                let points_back = schema.row_exists(ctx.reader(), store, id)
                    && target_id(self.current(schema, store, ctx.reader(), id)?.as_ref())
                        == Some(target.as_str());
                if points_back {
                    continue;
                }
                let detail = format!(
                    "{}.{} lists a row that does not reference {target}",
                    schema.def(self.target).entity_type,
                    self.inverse
                );
                reporter.emit(sink, id, detail, true);
                if fix {
                    self.unmirror(ctx, &target, id)?;
                }
            }
        }

        for id in schema.row_ids(ctx.reader(), store) {
            let value = self.current(schema, store, ctx.reader(), &id)?;
            let Some(target) = target_id(value.as_ref()).map(str::to_string) else {
                continue;
            };
            if !schema.row_exists(ctx.reader(), self.target, &target) {
                reporter.emit(sink, &id, format!("references missing row {target}"), self.nullable);
                if fix && self.nullable {
                    let row = schema.row_path(store, &id);
                    ctx.tx_mut().delete(&row, self.symbol.as_bytes())?;
                }
                continue;
            }
            let mirrored = ctx
                .reader()
                .bucket(&self.inverse_path(schema, &target))
                .map(read_list)
                .transpose()?
                .is_some_and(|ids| ids.contains(&Value::from(id.as_str())));
            if !mirrored {
                reporter.emit(sink, &id, format!("missing from {target}'s inverse set"), true);
                if fix {
                    self.mirror(ctx, &target, &id)?;
                }
            }
        }
        debug!(field = %self.symbol, "foreign key checked");
        Ok(())
    }
}

/// Refuses deletes of rows that a foreign key still points at.
pub(crate) struct FkDeleteGuard {
    pub(crate) referencing: StoreId,
    pub(crate) symbol: String,
    pub(crate) inverse: String,
}

impl FkDeleteGuard {
    pub(crate) fn check_delete(&self, schema: &Schema, store: StoreId, tx: &dyn KvRead, id: &str) -> StoreResult<()> {
        let path = schema.row_path(store, id).child(&self.inverse);
        let Some(bucket) = tx.bucket(&path) else {
            return Ok(());
        };
        let link = field_symbol(schema, self.referencing, &self.symbol)?;
        for value in read_list(bucket)? {
            let Some(referencing_id) = value.as_str() else { continue };
            if !schema.row_exists(tx, self.referencing, referencing_id) {
                continue;
            }
            if target_id(link.read_scalar(schema, tx, referencing_id)?.as_ref()) == Some(id) {
                return Err(StoreError::Referenced {
                    entity_type: schema.def(store).entity_type.clone(),
                    id: id.to_string(),
                    referencing_type: schema.def(self.referencing).entity_type.clone(),
                    referencing_id: referencing_id.to_string(),
                });
            }
        }
        Ok(())
    }
}

use nest_kv::KvRead;

use super::{field_symbol, Captured};
use crate::context::MutateContext;
use crate::error::{StoreError, StoreResult};
use crate::schema::{Schema, StoreId};

/// Gates mutations of rows whose boolean flag is set.
///
/// Outside a system context a row may not be created, changed or deleted
/// while the flag is true before or after the change. Flipping the flag
/// either way therefore also needs a system context.
pub(crate) struct SystemEntityGuard {
    pub(crate) symbol: String,
}

impl SystemEntityGuard {
    fn flagged(&self, schema: &Schema, store: StoreId, tx: &dyn KvRead, id: &str) -> StoreResult<bool> {
        let value = field_symbol(schema, store, &self.symbol)?.read_scalar(schema, tx, id)?;
        Ok(value.and_then(|v| v.as_bool()).unwrap_or(false))
    }

    fn reject(&self, schema: &Schema, store: StoreId, id: &str) -> StoreError {
        StoreError::SystemEntity {
            entity_type: schema.def(store).entity_type.clone(),
            id: id.to_string(),
        }
    }

    pub(crate) fn before_update(
        &self,
        schema: &Schema,
        store: StoreId,
        tx: &dyn KvRead,
        id: &str,
    ) -> StoreResult<Captured> {
        Ok(Captured::Flag(self.flagged(schema, store, tx, id)?))
    }

    pub(crate) fn after_update(
        &self,
        ctx: &mut MutateContext<'_>,
        store: StoreId,
        id: &str,
        captured: Captured,
    ) -> StoreResult<()> {
        if ctx.is_system() {
            return Ok(());
        }
        let was = matches!(captured, Captured::Flag(true));
        let now = self.flagged(ctx.schema(), store, ctx.reader(), id)?;
        if was || now {
            return Err(self.reject(ctx.schema(), store, id));
        }
        Ok(())
    }

    pub(crate) fn check_delete(
        &self,
        schema: &Schema,
        store: StoreId,
        tx: &dyn KvRead,
        id: &str,
        system: bool,
    ) -> StoreResult<()> {
        if !system && self.flagged(schema, store, tx, id)? {
            return Err(self.reject(schema, store, id));
        }
        Ok(())
    }
}

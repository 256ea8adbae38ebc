//! Secondary indexes and guards that run around every mutation.
//!
//! Each store owns an ordered list of [`Constraint`]s. A mutation drives
//! them through a two-phase protocol: [`Constraint::before_update`] captures
//! the pre-state before any field is written, [`Constraint::after_update`]
//! reads the post-state, diffs and applies. Deletes go through
//! [`Constraint::check_delete`] (veto) and then
//! [`Constraint::process_delete`] (cleanup).

mod foreign_key;
mod set;
mod system;
mod unique;

use std::sync::Arc;

use nest_codec::Value;
use nest_kv::{KvRead, WriteTx};

pub(crate) use foreign_key::{FkDeleteGuard, ForeignKeyIndex};
pub use set::SetChange;
pub(crate) use set::SetIndex;
pub(crate) use system::SystemEntityGuard;
pub(crate) use unique::UniqueIndex;

use crate::context::MutateContext;
use crate::error::{StoreError, StoreResult};
use crate::integrity::IntegritySink;
use crate::schema::{Schema, StoreId};
use crate::symbol::EntitySymbol;

/// Listener invoked with the before/after members of a set index.
pub type SetListener =
    Arc<dyn Fn(&mut MutateContext<'_>, &SetChange) -> StoreResult<()> + Send + Sync>;

pub(crate) enum Constraint {
    Unique(UniqueIndex),
    Set(SetIndex),
    ForeignKey(ForeignKeyIndex),
    FkDelete(FkDeleteGuard),
    SystemEntity(SystemEntityGuard),
}

/// Pre-mutation state captured by [`Constraint::before_update`].
#[derive(Debug)]
pub(crate) enum Captured {
    None,
    Scalar(Option<Value>),
    Set(Vec<Value>),
    Flag(bool),
}

impl Constraint {
    pub(crate) fn name(&self) -> &'static str {
        match self {
            Self::Unique(_) => "unique",
            Self::Set(_) => "set",
            Self::ForeignKey(_) => "foreign-key",
            Self::FkDelete(_) => "fk-delete",
            Self::SystemEntity(_) => "system-entity",
        }
    }

    pub(crate) fn before_update(
        &self,
        schema: &Schema,
        store: StoreId,
        tx: &dyn KvRead,
        id: &str,
    ) -> StoreResult<Captured> {
        match self {
            Self::Unique(c) => c.before_update(schema, store, tx, id),
            Self::Set(c) => c.before_update(schema, store, tx, id),
            Self::ForeignKey(c) => c.before_update(schema, store, tx, id),
            Self::SystemEntity(c) => c.before_update(schema, store, tx, id),
            Self::FkDelete(_) => Ok(Captured::None),
        }
    }

    pub(crate) fn after_update(
        &self,
        ctx: &mut MutateContext<'_>,
        store: StoreId,
        id: &str,
        captured: Captured,
        is_create: bool,
    ) -> StoreResult<()> {
        match self {
            Self::Unique(c) => c.after_update(ctx, store, id, captured, is_create),
            Self::Set(c) => c.after_update(ctx, store, id, captured),
            Self::ForeignKey(c) => c.after_update(ctx, store, id, captured, is_create),
            Self::SystemEntity(c) => c.after_update(ctx, store, id, captured),
            Self::FkDelete(_) => Ok(()),
        }
    }

    /// Refuse the delete of row `id` if this constraint forbids it.
    pub(crate) fn check_delete(
        &self,
        schema: &Schema,
        store: StoreId,
        tx: &dyn KvRead,
        id: &str,
        system: bool,
    ) -> StoreResult<()> {
        match self {
            Self::FkDelete(c) => c.check_delete(schema, store, tx, id),
            Self::SystemEntity(c) => c.check_delete(schema, store, tx, id, system),
            Self::Unique(_) | Self::Set(_) | Self::ForeignKey(_) => Ok(()),
        }
    }

    /// Remove every index entry owned by row `id`.
    pub(crate) fn process_delete(
        &self,
        ctx: &mut MutateContext<'_>,
        store: StoreId,
        id: &str,
    ) -> StoreResult<()> {
        match self {
            Self::Unique(c) => c.process_delete(ctx, store, id),
            Self::Set(c) => c.process_delete(ctx, store, id),
            Self::ForeignKey(c) => c.process_delete(ctx, store, id),
            Self::FkDelete(_) | Self::SystemEntity(_) => Ok(()),
        }
    }

    /// Ensure index storage exists.
    pub(crate) fn initialize(&self, schema: &Schema, store: StoreId, tx: &mut WriteTx<'_>) -> StoreResult<()> {
        let symbol = match self {
            Self::Unique(c) => &c.symbol,
            Self::Set(c) => &c.symbol,
            Self::ForeignKey(_) | Self::FkDelete(_) | Self::SystemEntity(_) => return Ok(()),
        };
        tx.create_bucket_all(&schema.index_path(store, symbol))?;
        Ok(())
    }

    pub(crate) fn check_integrity(
        &self,
        ctx: &mut MutateContext<'_>,
        store: StoreId,
        fix: bool,
        sink: &mut dyn IntegritySink,
    ) -> StoreResult<()> {
        match self {
            Self::Unique(c) => c.check_integrity(ctx, store, fix, sink),
            Self::Set(c) => c.check_integrity(ctx, store, fix, sink),
            Self::ForeignKey(c) => c.check_integrity(ctx, store, fix, sink),
            Self::FkDelete(_) | Self::SystemEntity(_) => Ok(()),
        }
    }
}

/// The declared symbol a constraint is attached to.
pub(crate) fn field_symbol<'s>(
    schema: &'s Schema,
    store: StoreId,
    name: &str,
) -> StoreResult<&'s EntitySymbol> {
    let def = schema.def(store);
    def.symbols
        .get(name)
        .ok_or_else(|| StoreError::UnknownField {
            entity_type: def.entity_type.clone(),
            field: name.to_string(),
        })
}

pub(crate) fn is_empty(value: Option<&Value>) -> bool {
    value.map_or(true, Value::is_empty)
}

//! The mutation context: one write transaction plus its queued events and
//! sticky error.

use nest_kv::{Database, KvRead, WriteTx};
use tracing::{debug, warn};

use crate::error::{StoreError, StoreResult};
use crate::events::EntityEvent;
use crate::schema::Schema;
use crate::store::Store;

/// State threaded through every mutation in one transaction.
///
/// The first error raised by a store operation is recorded here. Every
/// later operation on the same context fails fast with that error and
/// [`commit`](Self::commit) rolls the transaction back, so no partial
/// index state ever becomes durable.
pub struct MutateContext<'db> {
    schema: &'db Schema,
    tx: WriteTx<'db>,
    events: Vec<EntityEvent>,
    error: Option<StoreError>,
    system: bool,
}

impl<'db> MutateContext<'db> {
    pub(crate) fn new(schema: &'db Schema, db: &'db Database) -> Self {
        Self::open(schema, db, false)
    }

    pub(crate) fn new_system(schema: &'db Schema, db: &'db Database) -> Self {
        Self::open(schema, db, true)
    }

    fn open(schema: &'db Schema, db: &'db Database, system: bool) -> Self {
        let tx = db.begin_write();
        debug!(tx = tx.id(), system, "mutation started");
        Self {
            schema,
            tx,
            events: Vec::new(),
            error: None,
            system,
        }
    }

    pub fn schema(&self) -> &'db Schema {
        self.schema
    }

    /// Handle for a store of this context's schema.
    pub fn store(&self, entity_type: &str) -> StoreResult<Store<'db>> {
        self.schema.store(entity_type)
    }

    /// Read view including this transaction's uncommitted writes.
    pub fn tx(&self) -> &WriteTx<'db> {
        &self.tx
    }

    pub fn tx_mut(&mut self) -> &mut WriteTx<'db> {
        &mut self.tx
    }

    pub(crate) fn reader(&self) -> &dyn KvRead {
        &self.tx
    }

    /// Whether system-entity protection is lifted.
    pub fn is_system(&self) -> bool {
        self.system
    }

    /// The recorded failure, if any operation has failed.
    pub fn error(&self) -> Option<&StoreError> {
        self.error.as_ref()
    }

    pub(crate) fn queue(&mut self, event: EntityEvent) {
        self.events.push(event);
    }

    /// Run one store operation, short-circuiting if an earlier one failed
    /// and recording the first failure.
    pub(crate) fn run<T>(&mut self, op: impl FnOnce(&mut Self) -> StoreResult<T>) -> StoreResult<T> {
        if let Some(err) = &self.error {
            return Err(err.clone());
        }
        let result = op(self);
        if let Err(err) = &result {
            if self.error.is_none() {
                warn!(tx = self.tx.id(), error = %err, "mutation failed; transaction will roll back");
                self.error = Some(err.clone());
            }
        }
        result
    }

    /// Record the stored version of `component`.
    pub fn set_version(&mut self, component: &str, version: i64) -> StoreResult<()> {
        let path = self.schema.config().versions();
        self.tx.create_bucket_all(&path)?;
        self.tx
            .put(&path, component.as_bytes(), Schema::encode_version(version))?;
        Ok(())
    }

    /// Commit, then hand the queued events to the dispatcher.
    ///
    /// If any operation failed, rolls back and returns that failure instead.
    pub fn commit(mut self) -> StoreResult<()> {
        if let Some(err) = self.error.take() {
            self.tx.rollback();
            return Err(err);
        }
        let events = std::mem::take(&mut self.events);
        let count = events.len();
        if let Some(publisher) = self.schema.events().publisher() {
            if !events.is_empty() {
                self.tx.on_commit(move || publisher.publish(events));
            }
        }
        let id = self.tx.id();
        self.tx.commit()?;
        debug!(tx = id, events = count, "mutation committed");
        Ok(())
    }

    /// Discard every change made through this context.
    pub fn rollback(self) {
        self.tx.rollback();
    }
}

impl std::fmt::Debug for MutateContext<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MutateContext")
            .field("tx", &self.tx.id())
            .field("system", &self.system)
            .field("events", &self.events.len())
            .field("error", &self.error)
            .finish()
    }
}

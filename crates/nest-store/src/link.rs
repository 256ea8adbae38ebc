//! Bidirectional many-to-many link collections.
//!
//! A link collection is a set field holding ids of rows in another store,
//! mirrored by an inverse collection declared on that store. Both sides are
//! written in the same transaction, so a committed state is always
//! reciprocal.

use std::cmp::Ordering;

use nest_codec::{add_to_list, list_key, read_list, remove_from_list, Value};
use nest_kv::{BucketPath, KvRead};
use tracing::debug;

use crate::context::MutateContext;
use crate::error::{StoreError, StoreResult};
use crate::integrity::{IntegrityCheck, IntegritySink, Reporter};
use crate::schema::{Schema, StoreId};

/// What [`LinkCollection::set_links`] changed.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LinkDiff {
    pub added: Vec<String>,
    pub removed: Vec<String>,
}

impl LinkDiff {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct LinkCollection {
    pub(crate) store: StoreId,
    pub(crate) field: String,
    pub(crate) target: StoreId,
    /// Mirror field on `target`.
    pub(crate) inverse: String,
}

impl LinkCollection {
    fn path(&self, schema: &Schema, id: &str) -> BucketPath {
        schema.row_path(self.store, id).child(&self.field)
    }

    fn inverse_path(&self, schema: &Schema, other: &str) -> BucketPath {
        schema.row_path(self.target, other).child(&self.inverse)
    }

    /// Linked ids in key order.
    pub(crate) fn get_links(&self, schema: &Schema, tx: &dyn KvRead, id: &str) -> StoreResult<Vec<String>> {
        let Some(bucket) = tx.bucket(&self.path(schema, id)) else {
            return Ok(Vec::new());
        };
        Ok(read_list(bucket)?
            .into_iter()
            .filter_map(|v| match v {
                Value::String(s) => Some(s),
                _ => None,
            })
            .collect())
    }

    pub(crate) fn is_linked(&self, schema: &Schema, tx: &dyn KvRead, id: &str, other: &str) -> StoreResult<bool> {
        let Some(bucket) = tx.bucket(&self.path(schema, id)) else {
            return Ok(false);
        };
        let key = list_key(&Value::from(other))?;
        let mut cursor = bucket.cursor();
        Ok(cursor.seek(&key).is_some_and(|(k, _)| k == key.as_slice()))
    }

    /// Link `id` to `other` on both sides. Returns `true` if the link is new.
    pub(crate) fn add_link(&self, ctx: &mut MutateContext<'_>, id: &str, other: &str) -> StoreResult<bool> {
        let schema = ctx.schema();
        if !schema.row_exists(ctx.reader(), self.store, id) {
            return Err(StoreError::not_found(&schema.def(self.store).entity_type, id));
        }
        if !schema.row_exists(ctx.reader(), self.target, other) {
            return Err(StoreError::not_found(&schema.def(self.target).entity_type, other));
        }
        let local = self.path(schema, id);
        let added = add_to_list(ctx.tx_mut().create_bucket_all(&local)?, &Value::from(other))?;
        let remote = self.inverse_path(schema, other);
        add_to_list(ctx.tx_mut().create_bucket_all(&remote)?, &Value::from(id))?;
        Ok(added)
    }

    /// Unlink `id` from `other` on both sides. The other row need not exist.
    pub(crate) fn remove_link(&self, ctx: &mut MutateContext<'_>, id: &str, other: &str) -> StoreResult<bool> {
        let schema = ctx.schema();
        let local = self.path(schema, id);
        let removed = match ctx.reader().bucket(&local) {
            Some(_) => remove_from_list(ctx.tx_mut().bucket_mut(&local)?, &Value::from(other))?,
            None => false,
        };
        let remote = self.inverse_path(schema, other);
        if ctx.reader().bucket(&remote).is_some() {
            remove_from_list(ctx.tx_mut().bucket_mut(&remote)?, &Value::from(id))?;
        }
        Ok(removed)
    }

    /// Make the links of `id` exactly `keys`, touching only the difference.
    pub(crate) fn set_links<S: AsRef<str>>(
        &self,
        ctx: &mut MutateContext<'_>,
        id: &str,
        keys: &[S],
    ) -> StoreResult<LinkDiff> {
        let schema = ctx.schema();
        if !schema.row_exists(ctx.reader(), self.store, id) {
            return Err(StoreError::not_found(&schema.def(self.store).entity_type, id));
        }
        let mut wanted: Vec<&str> = keys.iter().map(AsRef::as_ref).filter(|k| !k.is_empty()).collect();
        wanted.sort_unstable();
        wanted.dedup();
        let current = self.get_links(schema, ctx.reader(), id)?;

        let diff = merge_diff(&current, &wanted);
        for other in &diff.removed {
            self.remove_link(ctx, id, other)?;
        }
        for other in &diff.added {
            self.add_link(ctx, id, other)?;
        }
        if !diff.is_empty() {
            debug!(
                field = %self.field,
                id,
                added = diff.added.len(),
                removed = diff.removed.len(),
                "links updated"
            );
        }
        Ok(diff)
    }

    /// Remove `id` from the inverse side of every row it links to.
    pub(crate) fn teardown(&self, ctx: &mut MutateContext<'_>, id: &str) -> StoreResult<()> {
        let schema = ctx.schema();
        for other in self.get_links(schema, ctx.reader(), id)? {
            let remote = self.inverse_path(schema, &other);
            if ctx.reader().bucket(&remote).is_some() {
                remove_from_list(ctx.tx_mut().bucket_mut(&remote)?, &Value::from(id))?;
            }
        }
        Ok(())
    }

    fn mirrored(&self, schema: &Schema) -> bool {
        schema.def(self.target).links.iter().any(|l| {
            l.field == self.inverse && l.target == self.store && l.inverse == self.field
        })
    }

    pub(crate) fn check_integrity(
        &self,
        ctx: &mut MutateContext<'_>,
        fix: bool,
        sink: &mut dyn IntegritySink,
    ) -> StoreResult<()> {
        let schema = ctx.schema();
        let entity_type = &schema.def(self.store).entity_type;
        let target_type = &schema.def(self.target).entity_type;
        if !self.mirrored(schema) {
            let config = Reporter {
                entity_type,
                check: IntegrityCheck::LinkConfig,
                field: &self.field,
                fix,
            };
            config.emit(
                sink,
                "",
                format!("{target_type} declares no inverse collection {}", self.inverse),
                false,
            );
        }

        let reporter = Reporter {
            entity_type,
            check: IntegrityCheck::Link,
            field: &self.field,
            fix,
        };
        for id in schema.row_ids(ctx.reader(), self.store) {
            for other in self.get_links(schema, ctx.reader(), &id)? {
                if !schema.row_exists(ctx.reader(), self.target, &other) {
                    reporter.emit(sink, &id, format!("links to missing {target_type} {other}"), true);
                    if fix {
                        self.remove_link(ctx, &id, &other)?;
                    }
                    continue;
                }
                let reciprocal = ctx
                    .reader()
                    .bucket(&self.inverse_path(schema, &other))
                    .map(|b| list_key(&Value::from(id.as_str())).map(|k| b.contains_key(&k)))
                    .transpose()?
                    .unwrap_or(false);
                if !reciprocal {
                    reporter.emit(
                        sink,
                        &id,
                        format!("{target_type} {other} does not link back through {}", self.inverse),
                        true,
                    );
                    if fix {
                        let remote = self.inverse_path(schema, &other);
                        add_to_list(ctx.tx_mut().create_bucket_all(&remote)?, &Value::from(id.as_str()))?;
                    }
                }
            }
        }
        Ok(())
    }
}

/// Single merge pass over two sorted, deduplicated lists.
fn merge_diff<S: AsRef<str>>(current: &[String], wanted: &[S]) -> LinkDiff {
    let mut diff = LinkDiff::default();
    let (mut i, mut j) = (0, 0);
    while i < current.len() || j < wanted.len() {
        let order = match (current.get(i), wanted.get(j)) {
            (Some(c), Some(w)) => c.as_str().cmp(w.as_ref()),
            (Some(_), None) => Ordering::Less,
            (None, _) => Ordering::Greater,
        };
        match order {
            Ordering::Less => {
                diff.removed.push(current[i].clone());
                i += 1;
            }
            Ordering::Greater => {
                diff.added.push(wanted[j].as_ref().to_string());
                j += 1;
            }
            Ordering::Equal => {
                i += 1;
                j += 1;
            }
        }
    }
    diff
}

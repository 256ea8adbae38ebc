//! In-memory transactional key space.
//!
//! [`Database`] keeps the committed tree behind an [`ArcSwap`]. Readers take a
//! snapshot of the current root without locking. The single writer holds a
//! `parking_lot` mutex for its whole lifetime, works on a copy-on-write clone
//! of the root, and publishes it with one atomic swap on commit.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwap;
use parking_lot::{Mutex, MutexGuard};
use tracing::debug;

use crate::bucket::Bucket;
use crate::error::{KvError, KvResult};
use crate::path::BucketPath;
use crate::traits::KvRead;

type CommitHook = Box<dyn FnOnce() + Send + 'static>;

/// The key-space handle. Cheap to share behind an `Arc`.
pub struct Database {
    committed: ArcSwap<Bucket>,
    writer: Mutex<()>,
    next_tx: AtomicU64,
}

impl Database {
    /// Create an empty database.
    pub fn new() -> Self {
        Self {
            committed: ArcSwap::from_pointee(Bucket::new()),
            writer: Mutex::new(()),
            next_tx: AtomicU64::new(1),
        }
    }

    /// Open a read transaction on the latest committed state.
    pub fn begin_read(&self) -> ReadTx {
        ReadTx {
            root: self.committed.load_full(),
        }
    }

    /// Open the write transaction, blocking while another writer is active.
    pub fn begin_write(&self) -> WriteTx<'_> {
        let guard = self.writer.lock();
        self.open_writer(guard)
    }

    /// Open the write transaction if no other writer is active.
    pub fn try_begin_write(&self) -> Option<WriteTx<'_>> {
        self.writer.try_lock().map(|guard| self.open_writer(guard))
    }

    fn open_writer<'a>(&'a self, guard: MutexGuard<'a, ()>) -> WriteTx<'a> {
        let id = self.next_tx.fetch_add(1, Ordering::Relaxed);
        let root = Bucket::clone(&self.committed.load());
        debug!(tx = id, "write transaction opened");
        WriteTx {
            db: self,
            guard: Some(guard),
            id,
            root,
            hooks: Vec::new(),
            finished: false,
        }
    }

    /// Run `f` inside a read transaction.
    pub fn view<T, E>(&self, f: impl FnOnce(&ReadTx) -> Result<T, E>) -> Result<T, E> {
        let tx = self.begin_read();
        f(&tx)
    }

    /// Run `f` inside a write transaction, committing if it returns `Ok`.
    pub fn update<T, E>(&self, f: impl FnOnce(&mut WriteTx<'_>) -> Result<T, E>) -> Result<T, E>
    where
        E: From<KvError>,
    {
        let mut tx = self.begin_write();
        let out = f(&mut tx)?;
        tx.commit()?;
        Ok(out)
    }
}

impl Default for Database {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Database {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Database")
            .field("top_level_entries", &self.committed.load().len())
            .field("next_tx", &self.next_tx.load(Ordering::Relaxed))
            .finish()
    }
}

// ---------------------------------------------------------------------------
// ReadTx
// ---------------------------------------------------------------------------

/// A read transaction: an immutable snapshot of one committed root.
#[derive(Clone)]
pub struct ReadTx {
    root: Arc<Bucket>,
}

impl KvRead for ReadTx {
    fn root(&self) -> &Bucket {
        &self.root
    }
}

impl fmt::Debug for ReadTx {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReadTx").finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// WriteTx
// ---------------------------------------------------------------------------

/// The single write transaction.
///
/// Changes are invisible to readers until [`commit`](Self::commit).
/// Dropping the transaction without committing rolls it back.
pub struct WriteTx<'db> {
    db: &'db Database,
    guard: Option<MutexGuard<'db, ()>>,
    id: u64,
    root: Bucket,
    hooks: Vec<CommitHook>,
    finished: bool,
}

impl<'db> WriteTx<'db> {
    /// Monotonic transaction number, for logging.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Mutable access to the root bucket.
    pub fn root_mut(&mut self) -> &mut Bucket {
        &mut self.root
    }

    /// Resolve an existing bucket for mutation.
    pub fn bucket_mut(&mut self, path: &BucketPath) -> KvResult<&mut Bucket> {
        self.root
            .descend_mut(path)
            .ok_or_else(|| KvError::BucketNotFound(path.to_string()))
    }

    /// Resolve the bucket at `path`, creating any missing buckets.
    pub fn create_bucket_all(&mut self, path: &BucketPath) -> KvResult<&mut Bucket> {
        self.root.create_all(path)
    }

    /// Delete the bucket at `path` and its subtree. Returns `true` if removed.
    pub fn delete_bucket(&mut self, path: &BucketPath) -> KvResult<bool> {
        let (parent, name) = path.split_last().ok_or(KvError::RootBucket)?;
        if !self
            .root
            .descend(&parent)
            .is_some_and(|b| b.is_bucket(name))
        {
            return Ok(false);
        }
        self.bucket_mut(&parent)?.delete_bucket(name)
    }

    /// Put a value into the existing bucket at `path`.
    pub fn put(
        &mut self,
        path: &BucketPath,
        key: impl Into<Vec<u8>>,
        value: impl Into<Vec<u8>>,
    ) -> KvResult<()> {
        self.bucket_mut(path)?.put(key, value)
    }

    /// Delete a value from the bucket at `path`. Returns `true` if removed.
    ///
    /// A missing bucket is treated as an absent key.
    pub fn delete(&mut self, path: &BucketPath, key: &[u8]) -> KvResult<bool> {
        if !self
            .root
            .descend(path)
            .is_some_and(|b| b.contains_key(key))
        {
            return Ok(false);
        }
        self.bucket_mut(path)?.delete(key)
    }

    /// Register a callback to run once after this transaction commits.
    ///
    /// Callbacks are dropped unrun if the transaction rolls back.
    pub fn on_commit(&mut self, hook: impl FnOnce() + Send + 'static) {
        self.hooks.push(Box::new(hook));
    }

    /// Publish all changes atomically, release the writer slot, then run
    /// the post-commit callbacks in registration order.
    pub fn commit(mut self) -> KvResult<()> {
        let root = std::mem::take(&mut self.root);
        self.db.committed.store(Arc::new(root));
        self.finished = true;

        let hooks = std::mem::take(&mut self.hooks);
        drop(self.guard.take());
        debug!(tx = self.id, hooks = hooks.len(), "write transaction committed");

        for hook in hooks {
            hook();
        }
        Ok(())
    }

    /// Discard all changes.
    pub fn rollback(mut self) {
        self.finished = true;
        debug!(tx = self.id, "write transaction rolled back");
    }
}

impl KvRead for WriteTx<'_> {
    fn root(&self) -> &Bucket {
        &self.root
    }
}

impl Drop for WriteTx<'_> {
    fn drop(&mut self) {
        if !self.finished {
            debug!(tx = self.id, "write transaction dropped without commit");
        }
    }
}

impl fmt::Debug for WriteTx<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WriteTx")
            .field("id", &self.id)
            .field("pending_hooks", &self.hooks.len())
            .finish()
    }
}

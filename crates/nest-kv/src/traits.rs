use crate::bucket::Bucket;
use crate::path::BucketPath;

/// Read access to a transaction's view of the key space.
///
/// Implemented by both [`ReadTx`](crate::ReadTx) and
/// [`WriteTx`](crate::WriteTx), so read-only code paths can be written once
/// and run inside either. The trait is object-safe.
pub trait KvRead {
    /// The root bucket of this transaction's view.
    fn root(&self) -> &Bucket;

    /// Resolve the bucket at `path`, if it exists.
    fn bucket(&self, path: &BucketPath) -> Option<&Bucket> {
        self.root().descend(path)
    }

    /// Get a value from the bucket at `path`.
    fn get(&self, path: &BucketPath, key: &[u8]) -> Option<&[u8]> {
        self.bucket(path)?.get(key)
    }

    /// Returns `true` if a bucket exists at `path`.
    fn contains_bucket(&self, path: &BucketPath) -> bool {
        self.bucket(path).is_some()
    }
}

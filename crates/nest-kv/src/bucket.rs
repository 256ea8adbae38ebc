//! The [`Bucket`] node: an ordered map of keys to values or sub-buckets.
//!
//! Sub-buckets are held behind `Arc` so a write transaction can clone the
//! committed tree cheaply and copy only the nodes it touches
//! (`Arc::make_mut` on the way down).

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::cursor::Cursor;
use crate::error::{KvError, KvResult};
use crate::path::BucketPath;

/// Maximum size of a single key, in bytes.
pub const MAX_KEY_SIZE: usize = 32 * 1024;

#[derive(Clone, Debug)]
pub(crate) enum Entry {
    Value(Vec<u8>),
    Bucket(Arc<Bucket>),
}

/// A borrowed view of one bucket entry.
#[derive(Clone, Copy, Debug)]
pub enum EntryRef<'a> {
    /// A plain value.
    Value(&'a [u8]),
    /// A nested bucket.
    Bucket(&'a Bucket),
}

impl<'a> EntryRef<'a> {
    pub(crate) fn from_entry(entry: &'a Entry) -> Self {
        match entry {
            Entry::Value(v) => Self::Value(v),
            Entry::Bucket(b) => Self::Bucket(b),
        }
    }

    /// The value bytes, if this entry is a value.
    pub fn value(&self) -> Option<&'a [u8]> {
        match self {
            Self::Value(v) => Some(v),
            Self::Bucket(_) => None,
        }
    }

    /// The nested bucket, if this entry is a bucket.
    pub fn bucket(&self) -> Option<&'a Bucket> {
        match self {
            Self::Bucket(b) => Some(b),
            Self::Value(_) => None,
        }
    }
}

/// An ordered collection of keys mapping to values or nested buckets.
#[derive(Clone, Debug, Default)]
pub struct Bucket {
    entries: BTreeMap<Vec<u8>, Entry>,
}

fn check_key(key: &[u8]) -> KvResult<()> {
    if key.is_empty() {
        return Err(KvError::KeyRequired);
    }
    if key.len() > MAX_KEY_SIZE {
        return Err(KvError::KeyTooLarge {
            len: key.len(),
            max: MAX_KEY_SIZE,
        });
    }
    Ok(())
}

fn key_label(key: &[u8]) -> String {
    String::from_utf8_lossy(key).into_owned()
}

impl Bucket {
    /// Create an empty bucket.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entries (values and sub-buckets).
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if the bucket has no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns `true` if any entry exists at `key`.
    pub fn contains_key(&self, key: &[u8]) -> bool {
        self.entries.contains_key(key)
    }

    // ---------------------------------------------------------------
    // Values
    // ---------------------------------------------------------------

    /// Get the value at `key`. Returns `None` if absent or if `key` is a bucket.
    pub fn get(&self, key: &[u8]) -> Option<&[u8]> {
        match self.entries.get(key)? {
            Entry::Value(v) => Some(v),
            Entry::Bucket(_) => None,
        }
    }

    /// Insert or replace the value at `key`.
    pub fn put(&mut self, key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) -> KvResult<()> {
        let key = key.into();
        check_key(&key)?;
        if let Some(Entry::Bucket(_)) = self.entries.get(&key) {
            return Err(KvError::IncompatibleValue(key_label(&key)));
        }
        self.entries.insert(key, Entry::Value(value.into()));
        Ok(())
    }

    /// Delete the value at `key`. Returns `true` if a value was removed.
    pub fn delete(&mut self, key: &[u8]) -> KvResult<bool> {
        match self.entries.get(key) {
            None => Ok(false),
            Some(Entry::Bucket(_)) => Err(KvError::IncompatibleValue(key_label(key))),
            Some(Entry::Value(_)) => {
                self.entries.remove(key);
                Ok(true)
            }
        }
    }

    /// Remove every entry.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    // ---------------------------------------------------------------
    // Sub-buckets
    // ---------------------------------------------------------------

    /// Get the sub-bucket at `name`.
    pub fn bucket(&self, name: &[u8]) -> Option<&Bucket> {
        match self.entries.get(name)? {
            Entry::Bucket(b) => Some(b),
            Entry::Value(_) => None,
        }
    }

    /// Get the sub-bucket at `name` for mutation, copying it if shared.
    pub fn bucket_mut(&mut self, name: &[u8]) -> Option<&mut Bucket> {
        match self.entries.get_mut(name)? {
            Entry::Bucket(b) => Some(Arc::make_mut(b)),
            Entry::Value(_) => None,
        }
    }

    /// Returns `true` if `name` holds a sub-bucket.
    pub fn is_bucket(&self, name: &[u8]) -> bool {
        matches!(self.entries.get(name), Some(Entry::Bucket(_)))
    }

    /// Create a new sub-bucket. Fails if anything already exists at `name`.
    pub fn create_bucket(&mut self, name: &[u8]) -> KvResult<&mut Bucket> {
        check_key(name)?;
        match self.entries.get(name) {
            Some(Entry::Bucket(_)) => return Err(KvError::BucketExists(key_label(name))),
            Some(Entry::Value(_)) => return Err(KvError::IncompatibleValue(key_label(name))),
            None => {}
        }
        self.create_bucket_if_missing(name)
    }

    /// Return the sub-bucket at `name`, creating it if absent.
    pub fn create_bucket_if_missing(&mut self, name: &[u8]) -> KvResult<&mut Bucket> {
        check_key(name)?;
        let entry = self
            .entries
            .entry(name.to_vec())
            .or_insert_with(|| Entry::Bucket(Arc::new(Bucket::new())));
        match entry {
            Entry::Bucket(b) => Ok(Arc::make_mut(b)),
            Entry::Value(_) => Err(KvError::IncompatibleValue(key_label(name))),
        }
    }

    /// Delete the sub-bucket at `name` and everything beneath it.
    ///
    /// Returns `true` if a bucket was removed.
    pub fn delete_bucket(&mut self, name: &[u8]) -> KvResult<bool> {
        match self.entries.get(name) {
            None => Ok(false),
            Some(Entry::Value(_)) => Err(KvError::IncompatibleValue(key_label(name))),
            Some(Entry::Bucket(_)) => {
                self.entries.remove(name);
                Ok(true)
            }
        }
    }

    // ---------------------------------------------------------------
    // Paths
    // ---------------------------------------------------------------

    /// Walk `path` downward from this bucket.
    pub fn descend(&self, path: &BucketPath) -> Option<&Bucket> {
        let mut current = self;
        for segment in path.segments() {
            current = current.bucket(segment)?;
        }
        Some(current)
    }

    /// Walk `path` downward for mutation. Missing buckets yield `None`.
    pub fn descend_mut(&mut self, path: &BucketPath) -> Option<&mut Bucket> {
        let mut current = self;
        for segment in path.segments() {
            current = current.bucket_mut(segment)?;
        }
        Some(current)
    }

    /// Walk `path` downward, creating every missing bucket on the way.
    pub fn create_all(&mut self, path: &BucketPath) -> KvResult<&mut Bucket> {
        let mut current = self;
        for segment in path.segments() {
            current = current.create_bucket_if_missing(segment)?;
        }
        Ok(current)
    }

    // ---------------------------------------------------------------
    // Iteration
    // ---------------------------------------------------------------

    /// A seekable cursor over this bucket's entries.
    pub fn cursor(&self) -> Cursor<'_> {
        Cursor::new(&self.entries)
    }

    /// All keys in ascending order (reverse with `.rev()`).
    pub fn keys(&self) -> impl DoubleEndedIterator<Item = &[u8]> {
        self.entries.keys().map(Vec::as_slice)
    }

    /// All entries in ascending key order (reverse with `.rev()`).
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = (&[u8], EntryRef<'_>)> {
        self.entries
            .iter()
            .map(|(k, e)| (k.as_slice(), EntryRef::from_entry(e)))
    }
}

use std::collections::BTreeMap;
use std::ops::Bound;

use crate::bucket::{Entry, EntryRef};

/// A bidirectional, seekable position within one bucket.
///
/// The cursor remembers the key it last returned, so `next`/`prev` are
/// `O(log n)` range lookups that stay correct even across sparse keys.
/// A cursor that has run off either end returns `None` until repositioned
/// with `first`, `last`, or `seek`.
#[derive(Clone, Debug)]
pub struct Cursor<'a> {
    entries: &'a BTreeMap<Vec<u8>, Entry>,
    position: Option<&'a [u8]>,
}

type Item<'a> = (&'a [u8], EntryRef<'a>);

impl<'a> Cursor<'a> {
    pub(crate) fn new(entries: &'a BTreeMap<Vec<u8>, Entry>) -> Self {
        Self {
            entries,
            position: None,
        }
    }

    fn settle(&mut self, found: Option<(&'a Vec<u8>, &'a Entry)>) -> Option<Item<'a>> {
        match found {
            Some((k, e)) => {
                self.position = Some(k.as_slice());
                Some((k.as_slice(), EntryRef::from_entry(e)))
            }
            None => {
                self.position = None;
                None
            }
        }
    }

    /// Move to the first entry.
    pub fn first(&mut self) -> Option<Item<'a>> {
        let entries = self.entries;
        let found = entries.iter().next();
        self.settle(found)
    }

    /// Move to the last entry.
    pub fn last(&mut self) -> Option<Item<'a>> {
        let entries = self.entries;
        let found = entries.iter().next_back();
        self.settle(found)
    }

    /// Move to the first entry whose key is `>= key`.
    pub fn seek(&mut self, key: &[u8]) -> Option<Item<'a>> {
        let entries = self.entries;
        let found = entries
            .range::<[u8], _>((Bound::Included(key), Bound::Unbounded))
            .next();
        self.settle(found)
    }

    /// Move to the entry after the current one.
    #[allow(clippy::should_implement_trait)]
    pub fn next(&mut self) -> Option<Item<'a>> {
        let current = self.position?;
        let entries = self.entries;
        let found = entries
            .range::<[u8], _>((Bound::Excluded(current), Bound::Unbounded))
            .next();
        self.settle(found)
    }

    /// Move to the entry before the current one.
    pub fn prev(&mut self) -> Option<Item<'a>> {
        let current = self.position?;
        let entries = self.entries;
        let found = entries
            .range::<[u8], _>((Bound::Unbounded, Bound::Excluded(current)))
            .next_back();
        self.settle(found)
    }

    /// The key the cursor currently rests on.
    pub fn key(&self) -> Option<&'a [u8]> {
        self.position
    }
}

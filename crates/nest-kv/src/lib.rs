//! Transactional nested-bucket key space for nestdb.
//!
//! This crate is the storage substrate the object store is layered on: a
//! single-writer / multi-reader key space of byte-string keys whose values are
//! either byte strings or nested sub-buckets, in the spirit of a B+tree page
//! store. This implementation keeps everything in memory.
//!
//! # Key Types
//!
//! - [`Database`] -- owns the committed root and hands out transactions
//! - [`ReadTx`] -- consistent snapshot of the committed root
//! - [`WriteTx`] -- the single writer; copy-on-write over the committed root
//! - [`Bucket`] -- ordered map of keys to values or sub-buckets
//! - [`BucketPath`] -- owned path of bucket names from the root
//! - [`Cursor`] -- bidirectional, seekable walk over a bucket's keys
//!
//! # Design Rules
//!
//! 1. At most one write transaction exists at a time; `begin_write` blocks.
//! 2. Readers never block and never observe uncommitted state.
//! 3. Commit publishes the new root atomically; dropping an uncommitted
//!    writer discards all of its changes.
//! 4. Post-commit callbacks run exactly once, after the root is published
//!    and the writer slot has been released.
//! 5. A key names either a value or a bucket, never both.

pub mod bucket;
pub mod cursor;
pub mod error;
pub mod memory;
pub mod path;
pub mod traits;

// Re-export primary types at crate root for ergonomic imports.
pub use bucket::{Bucket, EntryRef, MAX_KEY_SIZE};
pub use cursor::Cursor;
pub use error::{KvError, KvResult};
pub use memory::{Database, ReadTx, WriteTx};
pub use path::BucketPath;
pub use traits::KvRead;

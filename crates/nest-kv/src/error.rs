/// Errors from key-space operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum KvError {
    /// A bucket on the requested path does not exist.
    #[error("bucket not found: {0}")]
    BucketNotFound(String),

    /// Attempted to create a bucket that already exists.
    #[error("bucket already exists: {0}")]
    BucketExists(String),

    /// The key holds a value where a bucket was expected, or the reverse.
    #[error("incompatible entry at key {0:?}")]
    IncompatibleValue(String),

    /// Keys must be non-empty.
    #[error("key required")]
    KeyRequired,

    /// The key exceeds the maximum key size.
    #[error("key too large: {len} bytes (max {max})")]
    KeyTooLarge { len: usize, max: usize },

    /// The root itself cannot be deleted or replaced.
    #[error("operation not permitted on the root bucket")]
    RootBucket,
}

/// Result alias for key-space operations.
pub type KvResult<T> = Result<T, KvError>;

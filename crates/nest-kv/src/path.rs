use std::fmt;

/// An owned path of bucket names, starting below the root.
///
/// The empty path names the root bucket itself.
#[derive(Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BucketPath(Vec<Vec<u8>>);

impl BucketPath {
    /// The root path.
    pub fn root() -> Self {
        Self(Vec::new())
    }

    /// Build a path from any sequence of name segments.
    pub fn from_segments<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<[u8]>,
    {
        Self(segments.into_iter().map(|s| s.as_ref().to_vec()).collect())
    }

    /// Return a new path with `segment` appended.
    pub fn child(&self, segment: impl AsRef<[u8]>) -> Self {
        let mut next = self.clone();
        next.push(segment);
        next
    }

    /// Append a segment in place.
    pub fn push(&mut self, segment: impl AsRef<[u8]>) {
        self.0.push(segment.as_ref().to_vec());
    }

    /// Concatenate two paths.
    pub fn join(&self, other: &BucketPath) -> Self {
        let mut next = self.clone();
        next.0.extend(other.0.iter().cloned());
        next
    }

    /// Split into the parent path and the final segment.
    ///
    /// Returns `None` for the root path.
    pub fn split_last(&self) -> Option<(BucketPath, &[u8])> {
        let (last, rest) = self.0.split_last()?;
        Some((BucketPath(rest.to_vec()), last.as_slice()))
    }

    /// Iterate the segments from the root downward.
    pub fn segments(&self) -> impl Iterator<Item = &[u8]> {
        self.0.iter().map(Vec::as_slice)
    }

    /// Number of segments.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns `true` for the root path.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns `true` if `self` equals `prefix` or lies beneath it.
    pub fn starts_with(&self, prefix: &BucketPath) -> bool {
        self.0.starts_with(&prefix.0)
    }
}

impl fmt::Display for BucketPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return write!(f, "/");
        }
        for (i, segment) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, "/")?;
            }
            write!(f, "{}", String::from_utf8_lossy(segment))?;
        }
        Ok(())
    }
}

impl fmt::Debug for BucketPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BucketPath({self})")
    }
}

impl From<&str> for BucketPath {
    /// Parse a `/`-separated path. Empty segments are ignored.
    fn from(s: &str) -> Self {
        Self::from_segments(s.split('/').filter(|seg| !seg.is_empty()))
    }
}

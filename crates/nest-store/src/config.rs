use std::path::Path;

use nest_codec::MAX_KEY_COMPONENT;
use nest_kv::BucketPath;
use serde::{Deserialize, Serialize};

use crate::error::{StoreError, StoreResult};

/// Physical layout and runtime settings for a schema.
///
/// Missing keys in a TOML document take their default values.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Root of the entity containers: `{base_path}/{entity_type}/{id}`.
    pub base_path: Vec<String>,
    /// Root of the index tree.
    pub index_root: Vec<String>,
    /// Namespace under `index_root`: `{index_root}/{namespace}/{entity_type}/{symbol}`.
    pub indexes_namespace: String,
    /// Top-level bucket mapping component names to schema versions.
    pub versions_bucket: String,
    /// Largest id, set member, map key or unique-index key accepted, in
    /// bytes. Set members and index keys count their tag byte.
    pub max_key_component: usize,
    /// Pending post-commit batches. When the queue is full a new batch is
    /// dropped with a warning. 0 = unbounded.
    pub event_queue_capacity: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            base_path: vec!["data".into()],
            index_root: vec!["meta".into()],
            indexes_namespace: "indexes".into(),
            versions_bucket: "versions".into(),
            max_key_component: MAX_KEY_COMPONENT,
            event_queue_capacity: 0,
        }
    }
}

impl StoreConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml_str(text: &str) -> StoreResult<Self> {
        let config: Self = toml::from_str(text).map_err(|e| StoreError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| StoreError::Config(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&text)
    }

    pub fn validate(&self) -> StoreResult<()> {
        let blank = |segments: &[String]| segments.is_empty() || segments.iter().any(String::is_empty);
        if blank(&self.base_path) {
            return Err(StoreError::Config("base_path must be non-empty".into()));
        }
        if blank(&self.index_root) {
            return Err(StoreError::Config("index_root must be non-empty".into()));
        }
        if self.base_path == self.index_root {
            return Err(StoreError::Config(
                "base_path and index_root must differ".into(),
            ));
        }
        if self.indexes_namespace.is_empty() {
            return Err(StoreError::Config("indexes_namespace must be non-empty".into()));
        }
        if self.versions_bucket.is_empty() {
            return Err(StoreError::Config("versions_bucket must be non-empty".into()));
        }
        if self.max_key_component == 0 || self.max_key_component > MAX_KEY_COMPONENT {
            return Err(StoreError::Config(format!(
                "max_key_component must be in 1..={MAX_KEY_COMPONENT}"
            )));
        }
        Ok(())
    }

    pub(crate) fn base(&self) -> BucketPath {
        BucketPath::from_segments(&self.base_path)
    }

    pub(crate) fn indexes(&self) -> BucketPath {
        BucketPath::from_segments(&self.index_root).child(&self.indexes_namespace)
    }

    pub(crate) fn versions(&self) -> BucketPath {
        BucketPath::root().child(&self.versions_bucket)
    }
}

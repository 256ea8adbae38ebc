use nest_codec::CodecError;
use nest_kv::KvError;
use nest_query::QueryError;

/// Errors from object store operations.
///
/// Errors are `Clone` so the first failure inside a mutation can be recorded
/// on the context and handed back to every later call.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StoreError {
    /// No row with this id exists in the store.
    #[error("{entity_type} not found: {id}")]
    NotFound { entity_type: String, id: String },

    #[error("{entity_type} already exists: {id}")]
    AlreadyExists { entity_type: String, id: String },

    /// Blank id on create.
    #[error("{entity_type}: id is required")]
    MissingId { entity_type: String },

    /// A required (non-nullable) field was empty.
    #[error("{entity_type}.{field} is required")]
    MissingField { entity_type: String, field: String },

    #[error("unknown store: {0}")]
    UnknownStore(String),

    #[error("{entity_type} has no field {field}")]
    UnknownField { entity_type: String, field: String },

    /// The field is maintained by an index or link collection.
    #[error("{entity_type}.{field} is maintained by the store and cannot be written")]
    ReadOnlyField { entity_type: String, field: String },

    #[error("{entity_type}.{field}: expected {expected}, got {found}")]
    FieldType {
        entity_type: String,
        field: String,
        expected: String,
        found: String,
    },

    /// A unique index already maps the value to another row.
    #[error("duplicate value {value} for unique index {entity_type}.{field} (held by {existing_id})")]
    Duplicate {
        entity_type: String,
        field: String,
        value: String,
        existing_id: String,
    },

    /// Delete refused: another row still references this one.
    #[error("{entity_type} {id} is referenced by {referencing_type} {referencing_id}")]
    Referenced {
        entity_type: String,
        id: String,
        referencing_type: String,
        referencing_id: String,
    },

    /// A foreign-key value names a row that does not exist.
    #[error("{entity_type}.{field} references missing {target_type} {target_id}")]
    InvalidReference {
        entity_type: String,
        field: String,
        target_type: String,
        target_id: String,
    },

    /// Mutation of a system entity outside a system context.
    #[error("{entity_type} {id} is a system entity")]
    SystemEntity { entity_type: String, id: String },

    #[error("key component too large: {len} bytes (max {max})")]
    KeyTooLarge { len: usize, max: usize },

    /// Invalid schema declaration.
    #[error("schema error: {0}")]
    Schema(String),

    #[error("configuration error: {0}")]
    Config(String),

    /// The post-commit dispatcher could not be started.
    #[error("event dispatcher error: {0}")]
    Dispatcher(String),

    #[error("key space error: {0}")]
    Kv(#[from] KvError),

    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("query error: {0}")]
    Query(#[from] QueryError),
}

impl StoreError {
    pub fn not_found(entity_type: impl Into<String>, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity_type: entity_type.into(),
            id: id.into(),
        }
    }

    /// Returns `true` for a missing entity.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Returns `true` for a unique-index conflict.
    pub fn is_duplicate(&self) -> bool {
        matches!(self, Self::Duplicate { .. })
    }

    /// Returns `true` when a delete was blocked by referencing rows.
    pub fn is_referenced(&self) -> bool {
        matches!(self, Self::Referenced { .. })
    }

    /// Returns `true` for any error raised by a constraint or index.
    pub fn is_constraint_violation(&self) -> bool {
        matches!(
            self,
            Self::Duplicate { .. }
                | Self::Referenced { .. }
                | Self::MissingField { .. }
                | Self::InvalidReference { .. }
                | Self::SystemEntity { .. }
        )
    }
}

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

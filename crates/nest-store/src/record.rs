//! Records: the transport form between entities and stores.

use std::collections::BTreeMap;

use nest_codec::{MapValue, Value};

use crate::error::StoreResult;

/// The value of one field in a [`Record`].
#[derive(Clone, Debug, PartialEq)]
pub enum FieldValue {
    Scalar(Value),
    Set(Vec<Value>),
    Map(MapValue),
}

impl FieldValue {
    pub(crate) fn kind_name(&self) -> &'static str {
        match self {
            Self::Scalar(_) => "scalar",
            Self::Set(_) => "set",
            Self::Map(_) => "map",
        }
    }
}

/// An entity id plus its named field values.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Record {
    pub id: String,
    pub fields: BTreeMap<String, FieldValue>,
}

impl Record {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            fields: BTreeMap::new(),
        }
    }

    /// Builder-style scalar field.
    pub fn with(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set(field, value);
        self
    }

    /// Builder-style set field.
    pub fn with_set<V: Into<Value>>(
        mut self,
        field: impl Into<String>,
        values: impl IntoIterator<Item = V>,
    ) -> Self {
        let values = values.into_iter().map(Into::into).collect();
        self.fields.insert(field.into(), FieldValue::Set(values));
        self
    }

    /// Builder-style map field.
    pub fn with_map(mut self, field: impl Into<String>, map: MapValue) -> Self {
        self.fields.insert(field.into(), FieldValue::Map(map));
        self
    }

    pub fn set(&mut self, field: impl Into<String>, value: impl Into<Value>) {
        self.fields
            .insert(field.into(), FieldValue::Scalar(value.into()));
    }

    pub fn get(&self, field: &str) -> Option<&FieldValue> {
        self.fields.get(field)
    }

    pub fn scalar(&self, field: &str) -> Option<&Value> {
        match self.fields.get(field)? {
            FieldValue::Scalar(v) => Some(v),
            _ => None,
        }
    }

    pub fn str(&self, field: &str) -> Option<&str> {
        self.scalar(field)?.as_str()
    }

    pub fn values(&self, field: &str) -> Option<&[Value]> {
        match self.fields.get(field)? {
            FieldValue::Set(vs) => Some(vs),
            _ => None,
        }
    }

    pub fn map(&self, field: &str) -> Option<&MapValue> {
        match self.fields.get(field)? {
            FieldValue::Map(m) => Some(m),
            _ => None,
        }
    }
}

/// A typed entity that round-trips through a [`Record`].
///
/// Entities are transient views; the store is the source of truth.
pub trait Entity: Sized {
    /// Name of the store holding this entity type.
    fn entity_type() -> &'static str;

    fn id(&self) -> &str;

    fn to_record(&self) -> Record;

    fn from_record(record: Record) -> StoreResult<Self>;
}

/// A fresh time-ordered id (UUID v7) for entities without a natural key.
pub fn new_id() -> String {
    uuid::Uuid::now_v7().to_string()
}

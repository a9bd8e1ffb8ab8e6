//! Version payload codecs
//!
//! Every codec writes the same `{model, pk, fields}` document; only the
//! wire format differs. Codecs are looked up by the format tag stored on
//! each version.

mod json;
mod msgpack;

pub use json::JsonSerializer;
pub use msgpack::MsgpackSerializer;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::domain::{FieldMap, ModelInstance};
use crate::error::{ReversionError, Result};

/// Serializer port
pub trait Serializer: Send + Sync {
    /// Format tag stored on versions
    fn format(&self) -> &str;

    fn serialize(&self, instance: &ModelInstance) -> Result<Vec<u8>>;

    fn deserialize(&self, data: &[u8]) -> Result<ModelInstance>;
}

/// Stored document shape
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct SerializedObject {
    pub model: String,
    pub pk: String,
    pub fields: FieldMap,
}

impl From<&ModelInstance> for SerializedObject {
    fn from(instance: &ModelInstance) -> Self {
        Self {
            model: instance.object_type.clone(),
            pk: instance.pk.clone(),
            fields: instance.fields.clone(),
        }
    }
}

impl From<SerializedObject> for ModelInstance {
    fn from(doc: SerializedObject) -> Self {
        Self {
            object_type: doc.model,
            pk: doc.pk,
            fields: doc.fields,
        }
    }
}

/// Codecs keyed by format tag
#[derive(Clone)]
pub struct SerializerRegistry {
    serializers: IndexMap<String, Arc<dyn Serializer>>,
}

impl SerializerRegistry {
    /// Registry with the built-in `json` and `msgpack` codecs
    pub fn new() -> Self {
        Self::empty()
            .with(Arc::new(JsonSerializer))
            .with(Arc::new(MsgpackSerializer))
    }

    pub fn empty() -> Self {
        Self {
            serializers: IndexMap::new(),
        }
    }

    pub fn with(mut self, serializer: Arc<dyn Serializer>) -> Self {
        self.register(serializer);
        self
    }

    /// Add or replace the codec for its format tag
    pub fn register(&mut self, serializer: Arc<dyn Serializer>) {
        self.serializers
            .insert(serializer.format().to_string(), serializer);
    }

    pub fn get(&self, format: &str) -> Result<&dyn Serializer> {
        self.serializers
            .get(format)
            .map(|s| s.as_ref())
            .ok_or_else(|| {
                ReversionError::configuration(format!("Unknown serialization format '{}'", format))
            })
    }

    pub fn contains(&self, format: &str) -> bool {
        self.serializers.contains_key(format)
    }

    pub fn formats(&self) -> impl Iterator<Item = &str> {
        self.serializers.keys().map(String::as_str)
    }

    pub fn serialize(&self, format: &str, instance: &ModelInstance) -> Result<Vec<u8>> {
        self.get(format)?.serialize(instance)
    }

    pub fn deserialize(&self, format: &str, data: &[u8]) -> Result<ModelInstance> {
        self.get(format)?.deserialize(data)
    }
}

impl Default for SerializerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for SerializerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerializerRegistry")
            .field("formats", &self.serializers.keys().collect::<Vec<_>>())
            .finish()
    }
}

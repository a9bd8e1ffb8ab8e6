//! JSON codec (serde_json)

use super::{SerializedObject, Serializer};
use crate::domain::ModelInstance;
use crate::error::Result;

/// `json` format
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonSerializer;

impl Serializer for JsonSerializer {
    fn format(&self) -> &str {
        "json"
    }

    fn serialize(&self, instance: &ModelInstance) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(&SerializedObject::from(instance))?)
    }

    fn deserialize(&self, data: &[u8]) -> Result<ModelInstance> {
        let doc: SerializedObject = serde_json::from_slice(data)?;
        Ok(doc.into())
    }
}

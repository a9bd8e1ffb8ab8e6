//! MessagePack codec (rmp-serde, named fields)

use super::{SerializedObject, Serializer};
use crate::domain::ModelInstance;
use crate::error::Result;

/// `msgpack` format
#[derive(Debug, Clone, Copy, Default)]
pub struct MsgpackSerializer;

impl Serializer for MsgpackSerializer {
    fn format(&self) -> &str {
        "msgpack"
    }

    fn serialize(&self, instance: &ModelInstance) -> Result<Vec<u8>> {
        Ok(rmp_serde::to_vec_named(&SerializedObject::from(instance))?)
    }

    fn deserialize(&self, data: &[u8]) -> Result<ModelInstance> {
        let doc: SerializedObject = rmp_serde::from_slice(data)?;
        Ok(doc.into())
    }
}

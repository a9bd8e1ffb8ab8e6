//! Diff dispatcher
//!
//! Compares a live object (old side) with a stored snapshot (new side),
//! field by field. Each field's kind tag selects a strategy from a
//! `DiffRegistry`; unknown tags fall back to the registry's default.
//!
//! Registries are explicit values handed to the dispatcher. `DiffRegistry::shared()`
//! is the one process-wide instance, for callers that want a common table.

pub mod strategies;
pub mod text;

use indexmap::IndexMap;
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

use crate::api::SnapshotStore;
use crate::domain::{
    FieldDescriptor, FieldMap, FieldValue, MediaPreview, MediaStorage, ModelSchema, ObjectRef,
    ObjectStore, Version,
};
use crate::error::Result;

pub use strategies::{ManyDiff, MediaDiff, ReferenceDiff, ScalarDiff, ValueDiff};
pub use text::{EditOp, TextEdit};

/// Collaborators available to strategies
#[derive(Clone, Copy)]
pub struct DiffContext<'a> {
    pub objects: &'a dyn ObjectStore,
    pub media: Option<&'a dyn MediaStorage>,
}

/// Related object with its display string
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelatedObject {
    pub object: ObjectRef,
    pub repr: String,
}

/// Kind-specific rendering hint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RenderedDiff {
    /// Inline token diff
    Text { edits: Vec<TextEdit>, html: String },
    /// Choice labels, old vs new
    Labels {
        old: Option<String>,
        new: Option<String>,
    },
    /// Display strings of referenced objects
    Pair {
        old: Option<String>,
        new: Option<String>,
    },
    /// Unmodified values
    Values { old: FieldValue, new: FieldValue },
    /// Many-valued membership changes
    Members {
        removed: Vec<RelatedObject>,
        added: Vec<RelatedObject>,
    },
    Media {
        old: Option<MediaPreview>,
        new: Option<MediaPreview>,
    },
    Empty,
}

/// Result of diffing one field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDiff {
    pub field: String,
    pub changed: bool,
    pub rendered: RenderedDiff,
}

impl FieldDiff {
    pub fn new(field: &FieldDescriptor, changed: bool, rendered: RenderedDiff) -> Self {
        Self {
            field: field.name.clone(),
            changed,
            rendered,
        }
    }
}

/// Strategy for one field kind
pub trait DiffStrategy: Send + Sync {
    /// `old` is the live value, `new` the snapshot value
    fn diff(
        &self,
        field: &FieldDescriptor,
        old: &FieldValue,
        new: &FieldValue,
        ctx: &DiffContext<'_>,
    ) -> Result<FieldDiff>;
}

/// Field-kind tag → strategy table with a default
pub struct DiffRegistry {
    strategies: RwLock<HashMap<String, Arc<dyn DiffStrategy>>>,
    default: RwLock<Arc<dyn DiffStrategy>>,
}

static SHARED_REGISTRY: Lazy<Arc<DiffRegistry>> = Lazy::new(|| Arc::new(DiffRegistry::new()));

impl DiffRegistry {
    /// Registry with the built-in strategies
    pub fn new() -> Self {
        let registry = Self::empty();
        registry.register("scalar", Arc::new(ScalarDiff));
        for tag in ["boolean", "date", "datetime"] {
            registry.register(tag, Arc::new(ValueDiff));
        }
        for tag in ["reference", "parent"] {
            registry.register(tag, Arc::new(ReferenceDiff));
        }
        registry.register("many", Arc::new(ManyDiff));
        registry.register("media", Arc::new(MediaDiff));
        registry
    }

    /// No kind mappings; everything goes to the scalar default
    pub fn empty() -> Self {
        Self {
            strategies: RwLock::new(HashMap::new()),
            default: RwLock::new(Arc::new(ScalarDiff)),
        }
    }

    /// Process-wide registry
    pub fn shared() -> Arc<DiffRegistry> {
        Arc::clone(&SHARED_REGISTRY)
    }

    /// Add or replace the strategy for a kind tag
    pub fn register(&self, tag: impl Into<String>, strategy: Arc<dyn DiffStrategy>) {
        self.strategies.write().insert(tag.into(), strategy);
    }

    /// Replace every kind mapping at once (the default is kept)
    pub fn replace_all<I, S>(&self, strategies: I)
    where
        I: IntoIterator<Item = (S, Arc<dyn DiffStrategy>)>,
        S: Into<String>,
    {
        let table = strategies
            .into_iter()
            .map(|(tag, strategy)| (tag.into(), strategy))
            .collect();
        *self.strategies.write() = table;
    }

    pub fn set_default(&self, strategy: Arc<dyn DiffStrategy>) {
        *self.default.write() = strategy;
    }

    /// Strategy for a kind tag, or the default
    pub fn resolve(&self, tag: &str) -> Arc<dyn DiffStrategy> {
        self.strategies
            .read()
            .get(tag)
            .cloned()
            .unwrap_or_else(|| Arc::clone(&self.default.read()))
    }

    pub fn is_registered(&self, tag: &str) -> bool {
        self.strategies.read().contains_key(tag)
    }
}

impl Default for DiffRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Outcome of diffing a version against its live object
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ObjectDiff {
    /// Changed fields only, in field order; empty when nothing differs
    Changes { fields: IndexMap<String, FieldDiff> },
    /// The live object no longer exists
    ObjectMissing { object: ObjectRef, message: String },
}

impl ObjectDiff {
    pub fn is_missing(&self) -> bool {
        matches!(self, ObjectDiff::ObjectMissing { .. })
    }

    pub fn changes(&self) -> Option<&IndexMap<String, FieldDiff>> {
        match self {
            ObjectDiff::Changes { fields } => Some(fields),
            ObjectDiff::ObjectMissing { .. } => None,
        }
    }
}

/// Field diff dispatcher
#[derive(Clone)]
pub struct DiffDispatcher {
    registry: Arc<DiffRegistry>,
    media: Option<Arc<dyn MediaStorage>>,
}

impl DiffDispatcher {
    pub fn new(registry: Arc<DiffRegistry>) -> Self {
        Self {
            registry,
            media: None,
        }
    }

    pub fn with_media(mut self, media: Arc<dyn MediaStorage>) -> Self {
        self.media = Some(media);
        self
    }

    pub fn registry(&self) -> &DiffRegistry {
        &self.registry
    }

    fn context<'a>(&'a self, objects: &'a dyn ObjectStore) -> DiffContext<'a> {
        DiffContext {
            objects,
            media: self.media.as_deref(),
        }
    }

    /// Diff one field
    pub fn diff(
        &self,
        objects: &dyn ObjectStore,
        field: &FieldDescriptor,
        old: &FieldValue,
        new: &FieldValue,
    ) -> Result<FieldDiff> {
        self.registry
            .resolve(field.kind.tag())
            .diff(field, old, new, &self.context(objects))
    }

    /// Diff a version against its live object
    ///
    /// Compares the registered fields of the type and of its parent types.
    pub fn object_diff(&self, snapshots: &SnapshotStore, version: &Version) -> Result<ObjectDiff> {
        let objects = snapshots.backend().objects();
        let catalog = objects.catalog();
        let object = version.object_ref();

        let Some(live) = objects.get(&object)? else {
            return Ok(ObjectDiff::ObjectMissing {
                message: format!("{} no longer exists", version.object_repr),
                object,
            });
        };

        // Walk the inheritance chain: (schema, live fields) pairs, child first.
        let mut chain: Vec<(&ModelSchema, FieldMap)> = Vec::new();
        let mut current = Some(live);
        while let Some(instance) = current.take() {
            let schema = catalog.schema(&instance.object_type)?;
            if let Some(link) = &schema.parent {
                let parent_id = instance
                    .get(&link.field)
                    .as_reference()
                    .unwrap_or(instance.pk.as_str())
                    .to_string();
                current = objects.get(&ObjectRef::new(link.parent_type.clone(), parent_id))?;
            }
            chain.push((schema, instance.fields));
        }

        let stored = snapshots.field_dict(version)?;
        let ctx = self.context(objects);
        let mut fields = IndexMap::new();

        for (schema, live_fields) in &chain {
            let registration = snapshots.registry().registration(&schema.name)?;
            for name in &registration.fields {
                if fields.contains_key(name) {
                    continue;
                }
                let Some(descriptor) = schema.get_field(name) else {
                    continue;
                };
                let old = live_fields.get(name).unwrap_or(&FieldValue::Null);
                let new = stored.get(name).unwrap_or(&FieldValue::Null);
                let diff = self
                    .registry
                    .resolve(descriptor.kind.tag())
                    .diff(descriptor, old, new, &ctx)?;
                if diff.changed {
                    fields.insert(name.clone(), diff);
                }
            }
        }

        Ok(ObjectDiff::Changes { fields })
    }
}

impl Default for DiffDispatcher {
    fn default() -> Self {
        Self::new(DiffRegistry::shared())
    }
}

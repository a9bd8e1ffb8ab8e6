//! Infrastructure layer - Storage adapters and event sinks
//!
//! - `InMemoryBackend`: state cloning for savepoints, for tests and embedding
//! - `SqliteBackend`: rusqlite with native SAVEPOINT scopes
//!
//! Both adapters share the save/delete integrity rules below so that
//! revert behaves identically on either, and hand their savepoint stack
//! to one thread at a time through `scopes::ScopeOwner`.

pub mod memory_store;
mod scopes;
pub mod sinks;

#[cfg(feature = "sqlite")]
pub mod sqlite_store;

pub use memory_store::InMemoryBackend;
pub use sinks::{NoopSink, TracingSink};

#[cfg(feature = "sqlite")]
pub use sqlite_store::SqliteBackend;

use crate::domain::{ModelInstance, ModelSchema};

/// Row produced by an UPSERT restricted to `only`
///
/// Existing rows keep the fields outside `only`; new rows get just those fields.
pub(crate) fn merge_for_save(
    existing: Option<ModelInstance>,
    instance: &ModelInstance,
    only: Option<&[String]>,
) -> ModelInstance {
    let Some(only) = only else {
        return instance.clone();
    };
    let mut merged = existing.unwrap_or_else(|| {
        ModelInstance::new(instance.object_type.clone(), instance.pk.clone())
    });
    for name in only {
        if let Some(value) = instance.fields.get(name) {
            merged.fields.insert(name.clone(), value.clone());
        }
    }
    merged
}

/// Order live objects by primary key (numerically for integer keys)
pub(crate) fn sort_by_pk(schema: &ModelSchema, objects: &mut [ModelInstance]) {
    objects.sort_by(|a, b| {
        (schema.int_pk(&a.pk), &a.pk).cmp(&(schema.int_pk(&b.pk), &b.pk))
    });
}

//! Storage Ports (Trait Interfaces)
//!
//! Port/Adapter pattern for backend flexibility:
//! - Testing: InMemory (fast unit tests)
//! - Persistence: SQLite (zero-config, savepoint-capable)
//!
//! Every operation is synchronous. Nested scopes go through `atomic`,
//! which maps onto the backend's savepoints.

use std::collections::BTreeSet;

use super::models::{
    FieldMap, ModelInstance, ModerationStatus, NewRevision, NewVersion, ObjectRef, Revision,
    RevisionId, Version, VersionId, VersionQuery,
};
use super::schema::{FieldKind, ModelCatalog};
use crate::error::{ReversionError, Result};

/// Savepoint handle returned by `Transactional::begin`
pub type SavepointId = u64;

/// Live object store (the ORM boundary)
pub trait ObjectStore: Send + Sync {
    /// Schemas of every type this store holds
    fn catalog(&self) -> &ModelCatalog;

    /// Get a live object
    fn get(&self, object: &ObjectRef) -> Result<Option<ModelInstance>>;

    fn exists(&self, object: &ObjectRef) -> Result<bool> {
        Ok(self.get(object)?.is_some())
    }

    /// All live objects of a type, ordered by pk
    fn list(&self, object_type: &str) -> Result<Vec<ModelInstance>>;

    /// Save an object (UPSERT)
    ///
    /// - `only = Some(names)`: write just those fields, keep the others
    /// - Dangling or missing required references → IntegrityConflict
    fn save(&self, instance: &ModelInstance, only: Option<&[String]>) -> Result<()>;

    /// Update fields of an existing object
    ///
    /// Missing object → NotFound
    fn update_fields(&self, object: &ObjectRef, fields: &FieldMap) -> Result<()>;

    /// Delete an object
    ///
    /// - Missing object → NotFound
    /// - Still referenced by a live object → IntegrityConflict
    fn delete(&self, object: &ObjectRef) -> Result<()>;

    /// Objects reachable from `instance` through one relation
    ///
    /// `relation` is either a relation field on the instance's type or a
    /// declared reverse relation. Targets that no longer exist are skipped.
    fn related(&self, instance: &ModelInstance, relation: &str) -> Result<Vec<ObjectRef>> {
        let catalog = self.catalog();
        let schema = catalog.schema(&instance.object_type)?;

        if let Some(field) = schema.get_field(relation) {
            let Some(target) = field.kind.target() else {
                return Err(ReversionError::configuration(format!(
                    "{}.{} is not a relation",
                    schema.name, relation
                )));
            };
            let mut refs = Vec::new();
            for pk in instance.get(relation).referenced_pks() {
                let object = ObjectRef::new(target, pk);
                if self.exists(&object)? {
                    refs.push(object);
                }
            }
            return Ok(refs);
        }

        if let Some(reverse) = schema.reverse_relation(relation) {
            let source = catalog.schema(&reverse.source_type)?;
            let field = source.get_field(&reverse.field).ok_or_else(|| {
                ReversionError::configuration(format!(
                    "Reverse relation '{}' names unknown field {}.{}",
                    relation, reverse.source_type, reverse.field
                ))
            })?;
            let points_here = |candidate: &ModelInstance| match &field.kind {
                FieldKind::Many { .. } => candidate
                    .get(&field.name)
                    .referenced_pks()
                    .contains(&instance.pk.as_str()),
                _ => candidate.get(&field.name).as_reference() == Some(instance.pk.as_str()),
            };
            return Ok(self
                .list(&reverse.source_type)?
                .iter()
                .filter(|candidate| points_here(*candidate))
                .map(ModelInstance::object_ref)
                .collect());
        }

        Err(ReversionError::configuration(format!(
            "Unknown relation '{}' on '{}'",
            relation, schema.name
        )))
    }
}

/// Revision / Version persistence
pub trait VersionRepository: Send + Sync {
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // Revisions
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    /// Insert a revision (id assigned by the store)
    fn insert_revision(&self, revision: &NewRevision) -> Result<Revision>;

    /// Bump `date_updated`, optionally replacing the comment
    fn touch_revision(&self, revision_id: RevisionId, comment: Option<&str>) -> Result<Revision>;

    fn get_revision(&self, revision_id: RevisionId) -> Result<Option<Revision>>;

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // Versions
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    /// Insert a version (id assigned by the store)
    ///
    /// Missing revision → NotFound
    fn insert_version(&self, version: &NewVersion) -> Result<Version>;

    fn get_version(&self, version_id: VersionId) -> Result<Option<Version>>;

    /// Missing version → NotFound
    fn update_version_status(&self, version_id: VersionId, status: ModerationStatus)
        -> Result<()>;

    /// Delete a version; its revision goes too once it has no versions left
    ///
    /// Missing version → NotFound
    fn delete_version(&self, version_id: VersionId) -> Result<()>;

    /// Versions of a revision, ordered by id
    fn versions_for_revision(&self, revision_id: RevisionId) -> Result<Vec<Version>>;

    /// Filtered versions, ordered by revision date_created, date_updated, then id
    fn query_versions(&self, query: &VersionQuery) -> Result<Vec<Version>>;

    /// Distinct object ids with at least one version of the type under a manager
    fn versioned_object_ids(&self, object_type: &str, manager_slug: &str)
        -> Result<BTreeSet<String>> {
        Ok(self
            .query_versions(&VersionQuery::for_type(object_type).manager_slug(manager_slug))?
            .into_iter()
            .map(|v| v.object_id)
            .collect())
    }
}

/// Nested transactional scopes
pub trait Transactional: Send + Sync {
    /// Whether nested scopes are available; required by the revision manager
    fn supports_savepoints(&self) -> bool;

    fn begin(&self) -> Result<SavepointId>;

    fn commit(&self, savepoint: SavepointId) -> Result<()>;

    fn rollback(&self, savepoint: SavepointId) -> Result<()>;
}

/// Everything a revision manager needs from one store
pub trait Backend: ObjectStore + VersionRepository + Transactional {
    fn objects(&self) -> &dyn ObjectStore;

    fn versions(&self) -> &dyn VersionRepository;
}

impl<T: ObjectStore + VersionRepository + Transactional> Backend for T {
    fn objects(&self) -> &dyn ObjectStore {
        self
    }

    fn versions(&self) -> &dyn VersionRepository {
        self
    }
}

/// Run `f` inside a savepoint: commit on Ok, roll back on Err
///
/// The original error is returned even if the rollback itself fails.
pub fn atomic<T, B, F>(db: &B, f: F) -> Result<T>
where
    B: Transactional + ?Sized,
    F: FnOnce() -> Result<T>,
{
    let savepoint = db.begin()?;
    match f() {
        Ok(value) => {
            db.commit(savepoint)?;
            Ok(value)
        }
        Err(err) => {
            if let Err(rollback_err) = db.rollback(savepoint) {
                tracing::warn!(
                    savepoint,
                    error = %rollback_err,
                    "Rollback failed after error: {}",
                    err
                );
            }
            Err(err)
        }
    }
}

/// Preview of a stored media file
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct MediaPreview {
    pub name: String,
    pub url: String,
    pub thumbnail_url: Option<String>,
}

/// Media storage: resolves stored identifiers to previews
pub trait MediaStorage: Send + Sync {
    /// `None` when nothing is stored under `name`
    fn resolve(&self, name: &str) -> Option<MediaPreview>;
}

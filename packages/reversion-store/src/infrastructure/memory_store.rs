//! In-Memory Backend (for testing and embedding)
//!
//! BTreeMap-based implementation of every port. Savepoints snapshot the
//! whole state; rolling back restores the snapshot.
//! One thread at a time owns the savepoint stack; `begin` on another
//! thread waits until the owner's outermost scope closes.

use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use super::scopes::ScopeOwner;
use super::{merge_for_save, sort_by_pk};
use crate::domain::{
    FieldMap, HistoryOrder, ModelCatalog, ModelInstance, ModerationStatus, NewRevision,
    NewVersion, ObjectRef, ObjectStore, Revision, RevisionId, SavepointId, Transactional,
    Version, VersionId, VersionQuery, VersionRepository,
};
use crate::error::{ReversionError, Result};

#[derive(Debug, Clone, Default)]
struct MemoryState {
    objects: BTreeMap<ObjectRef, ModelInstance>,
    revisions: BTreeMap<RevisionId, Revision>,
    versions: BTreeMap<VersionId, Version>,
    last_revision_id: RevisionId,
    last_version_id: VersionId,
}

#[derive(Clone)]
pub struct InMemoryBackend {
    catalog: Arc<ModelCatalog>,
    state: Arc<RwLock<MemoryState>>,
    savepoints: Arc<Mutex<Vec<(SavepointId, MemoryState)>>>,
    scopes: Arc<ScopeOwner>,
    next_savepoint: Arc<AtomicU64>,
    savepoints_enabled: bool,
}

impl InMemoryBackend {
    pub fn new(catalog: ModelCatalog) -> Self {
        Self {
            catalog: Arc::new(catalog),
            state: Arc::new(RwLock::new(MemoryState::default())),
            savepoints: Arc::new(Mutex::new(Vec::new())),
            scopes: Arc::new(ScopeOwner::default()),
            next_savepoint: Arc::new(AtomicU64::new(1)),
            savepoints_enabled: true,
        }
    }

    /// Backend that reports no savepoint support (rejected by the revision manager)
    pub fn without_savepoints(catalog: ModelCatalog) -> Self {
        Self {
            savepoints_enabled: false,
            ..Self::new(catalog)
        }
    }

    /// Number of live objects of a type
    pub fn object_count(&self, object_type: &str) -> usize {
        self.state
            .read()
            .objects
            .keys()
            .filter(|r| r.object_type == object_type)
            .count()
    }

    /// Number of stored versions
    pub fn version_count(&self) -> usize {
        self.state.read().versions.len()
    }

    /// Number of stored revisions
    pub fn revision_count(&self) -> usize {
        self.state.read().revisions.len()
    }
}

impl ObjectStore for InMemoryBackend {
    fn catalog(&self) -> &ModelCatalog {
        &self.catalog
    }

    fn get(&self, object: &ObjectRef) -> Result<Option<ModelInstance>> {
        Ok(self.state.read().objects.get(object).cloned())
    }

    fn list(&self, object_type: &str) -> Result<Vec<ModelInstance>> {
        let schema = self.catalog.schema(object_type)?;
        let mut objects: Vec<_> = self
            .state
            .read()
            .objects
            .values()
            .filter(|o| o.object_type == object_type)
            .cloned()
            .collect();
        sort_by_pk(schema, &mut objects);
        Ok(objects)
    }

    fn save(&self, instance: &ModelInstance, only: Option<&[String]>) -> Result<()> {
        let mut state = self.state.write();
        let object = instance.object_ref();
        let merged = merge_for_save(state.objects.get(&object).cloned(), instance, only);
        self.catalog
            .check_references(&merged, |target| Ok(state.objects.contains_key(target)))?;
        state.objects.insert(object, merged);
        Ok(())
    }

    fn update_fields(&self, object: &ObjectRef, fields: &FieldMap) -> Result<()> {
        let mut state = self.state.write();
        let existing = state
            .objects
            .get_mut(object)
            .ok_or_else(|| ReversionError::object_not_found(object))?;
        for (name, value) in fields {
            existing.fields.insert(name.clone(), value.clone());
        }
        Ok(())
    }

    fn delete(&self, object: &ObjectRef) -> Result<()> {
        let mut state = self.state.write();
        if !state.objects.contains_key(object) {
            return Err(ReversionError::object_not_found(object));
        }
        let referrers = self
            .catalog
            .protected_referrers(object, state.objects.values());
        if let Some(referrer) = referrers.first() {
            return Err(ReversionError::integrity_conflict(format!(
                "Cannot delete {}: referenced by {}",
                object, referrer
            )));
        }
        state.objects.remove(object);
        for other in state.objects.values_mut() {
            self.catalog.prune_memberships(other, object);
        }
        Ok(())
    }
}

impl VersionRepository for InMemoryBackend {
    fn insert_revision(&self, revision: &NewRevision) -> Result<Revision> {
        let mut state = self.state.write();
        state.last_revision_id += 1;
        let stored = Revision {
            id: state.last_revision_id,
            manager_slug: revision.manager_slug.clone(),
            date_created: revision.date_created,
            date_updated: revision.date_created,
            user_id: revision.user_id.clone(),
            comment: revision.comment.clone(),
        };
        state.revisions.insert(stored.id, stored.clone());
        Ok(stored)
    }

    fn touch_revision(&self, revision_id: RevisionId, comment: Option<&str>) -> Result<Revision> {
        let mut state = self.state.write();
        let revision = state
            .revisions
            .get_mut(&revision_id)
            .ok_or_else(|| ReversionError::revision_not_found(revision_id))?;
        revision.date_updated = Utc::now().max(revision.date_created);
        if let Some(comment) = comment {
            revision.comment = comment.to_string();
        }
        Ok(revision.clone())
    }

    fn get_revision(&self, revision_id: RevisionId) -> Result<Option<Revision>> {
        Ok(self.state.read().revisions.get(&revision_id).cloned())
    }

    fn insert_version(&self, version: &NewVersion) -> Result<Version> {
        let mut state = self.state.write();
        if !state.revisions.contains_key(&version.revision_id) {
            return Err(ReversionError::revision_not_found(version.revision_id));
        }
        state.last_version_id += 1;
        let stored = Version {
            id: state.last_version_id,
            revision_id: version.revision_id,
            object_type: version.object_type.clone(),
            object_id: version.object_id.clone(),
            object_id_int: version.object_id_int,
            format: version.format.clone(),
            serialized_data: version.serialized_data.clone(),
            object_repr: version.object_repr.clone(),
            status: version.status,
        };
        state.versions.insert(stored.id, stored.clone());
        Ok(stored)
    }

    fn get_version(&self, version_id: VersionId) -> Result<Option<Version>> {
        Ok(self.state.read().versions.get(&version_id).cloned())
    }

    fn update_version_status(&self, version_id: VersionId, status: ModerationStatus) -> Result<()> {
        let mut state = self.state.write();
        let version = state
            .versions
            .get_mut(&version_id)
            .ok_or_else(|| ReversionError::version_not_found(version_id))?;
        version.status = status;
        Ok(())
    }

    fn delete_version(&self, version_id: VersionId) -> Result<()> {
        let mut state = self.state.write();
        let removed = state
            .versions
            .remove(&version_id)
            .ok_or_else(|| ReversionError::version_not_found(version_id))?;
        let orphaned = !state
            .versions
            .values()
            .any(|v| v.revision_id == removed.revision_id);
        if orphaned {
            state.revisions.remove(&removed.revision_id);
        }
        Ok(())
    }

    fn versions_for_revision(&self, revision_id: RevisionId) -> Result<Vec<Version>> {
        Ok(self
            .state
            .read()
            .versions
            .values()
            .filter(|v| v.revision_id == revision_id)
            .cloned()
            .collect())
    }

    fn query_versions(&self, query: &VersionQuery) -> Result<Vec<Version>> {
        let state = self.state.read();
        let mut rows: Vec<(&Revision, &Version)> = state
            .versions
            .values()
            .filter_map(|v| state.revisions.get(&v.revision_id).map(|r| (r, v)))
            .filter(|(r, v)| query.matches(v, r))
            .collect();
        rows.sort_by(|(ra, va), (rb, vb)| {
            (ra.date_created, ra.date_updated, va.id).cmp(&(rb.date_created, rb.date_updated, vb.id))
        });
        if query.order == HistoryOrder::Descending {
            rows.reverse();
        }
        Ok(rows.into_iter().map(|(_, v)| v.clone()).collect())
    }
}

impl Transactional for InMemoryBackend {
    fn supports_savepoints(&self) -> bool {
        self.savepoints_enabled
    }

    fn begin(&self) -> Result<SavepointId> {
        let id = self.next_savepoint.fetch_add(1, Ordering::SeqCst);
        self.scopes.enter(id, || {
            let snapshot = self.state.read().clone();
            self.savepoints.lock().push((id, snapshot));
            Ok(())
        })?;
        Ok(id)
    }

    /// Release `savepoint` and every savepoint opened after it
    fn commit(&self, savepoint: SavepointId) -> Result<()> {
        self.scopes.release(savepoint, || {
            let mut savepoints = self.savepoints.lock();
            let position = Self::position(&savepoints, savepoint)?;
            savepoints.truncate(position);
            Ok(())
        })
    }

    /// Restore the state captured by `savepoint` and release it
    fn rollback(&self, savepoint: SavepointId) -> Result<()> {
        self.scopes.release(savepoint, || {
            let mut savepoints = self.savepoints.lock();
            let position = Self::position(&savepoints, savepoint)?;
            savepoints.truncate(position + 1);
            if let Some((_, snapshot)) = savepoints.pop() {
                *self.state.write() = snapshot;
            }
            Ok(())
        })
    }
}

impl InMemoryBackend {
    fn position(savepoints: &[(SavepointId, MemoryState)], savepoint: SavepointId) -> Result<usize> {
        savepoints
            .iter()
            .rposition(|(id, _)| *id == savepoint)
            .ok_or_else(|| ReversionError::transaction(format!("Unknown savepoint {}", savepoint)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{atomic, FieldDescriptor, FieldValue, ModelSchema, PkKind};
    use crate::error::ErrorKind;

    fn backend() -> InMemoryBackend {
        InMemoryBackend::new(
            ModelCatalog::new()
                .with(
                    ModelSchema::new("author", PkKind::Integer)
                        .field(FieldDescriptor::scalar("name")),
                )
                .with(
                    ModelSchema::new("book", PkKind::Integer)
                        .field(FieldDescriptor::scalar("title"))
                        .field(FieldDescriptor::reference("author", "author"))
                        .field(FieldDescriptor::many("co_authors", "author")),
                ),
        )
    }

    fn revision(backend: &InMemoryBackend) -> Revision {
        backend.insert_revision(&NewRevision::new("default")).unwrap()
    }

    fn version(revision_id: RevisionId, object_id: &str) -> NewVersion {
        NewVersion {
            revision_id,
            object_type: "book".to_string(),
            object_id: object_id.to_string(),
            object_id_int: object_id.parse().ok(),
            format: "json".to_string(),
            serialized_data: b"{}".to_vec(),
            object_repr: format!("book {}", object_id),
            status: ModerationStatus::Pending,
        }
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Objects
    // ═══════════════════════════════════════════════════════════════════════

    #[test]
    fn test_save_requires_reference_targets() {
        let backend = backend();
        let book = ModelInstance::new("book", "1")
            .with("title", "Dune")
            .with("author", FieldValue::reference("1"));

        let err = backend.save(&book, None).unwrap_err();
        assert_eq!(err.kind, ErrorKind::IntegrityConflict);

        backend
            .save(&ModelInstance::new("author", "1").with("name", "Frank"), None)
            .unwrap();
        backend.save(&book, None).unwrap();
        assert!(backend.exists(&book.object_ref()).unwrap());
    }

    #[test]
    fn test_delete_is_protected_and_prunes_memberships() {
        let backend = backend();
        for pk in ["1", "2"] {
            backend
                .save(&ModelInstance::new("author", pk).with("name", pk), None)
                .unwrap();
        }
        let book = ModelInstance::new("book", "1")
            .with("author", FieldValue::reference("1"))
            .with("co_authors", FieldValue::references(["2"]));
        backend.save(&book, None).unwrap();

        let err = backend.delete(&ObjectRef::new("author", "1")).unwrap_err();
        assert_eq!(err.kind, ErrorKind::IntegrityConflict);

        backend.delete(&ObjectRef::new("author", "2")).unwrap();
        let stored = backend.get(&book.object_ref()).unwrap().unwrap();
        assert_eq!(stored.get("co_authors"), &FieldValue::references(Vec::<String>::new()));

        let err = backend.delete(&ObjectRef::new("author", "2")).unwrap_err();
        assert_eq!(err.kind, ErrorKind::NotFound);
    }

    #[test]
    fn test_update_fields_requires_existing_object() {
        let backend = backend();
        let mut fields = FieldMap::new();
        fields.insert("name".into(), FieldValue::text("x"));
        let err = backend
            .update_fields(&ObjectRef::new("author", "9"), &fields)
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::NotFound);
    }

    #[test]
    fn test_reverse_relation_following() {
        let backend = InMemoryBackend::new(
            ModelCatalog::new()
                .with(
                    ModelSchema::new("author", PkKind::Integer)
                        .field(FieldDescriptor::scalar("name"))
                        .reverse("books", "book", "author"),
                )
                .with(
                    ModelSchema::new("book", PkKind::Integer)
                        .field(FieldDescriptor::reference("author", "author")),
                ),
        );
        let author = ModelInstance::new("author", "1");
        backend.save(&author, None).unwrap();
        for pk in ["10", "2"] {
            backend
                .save(
                    &ModelInstance::new("book", pk).with("author", FieldValue::reference("1")),
                    None,
                )
                .unwrap();
        }

        let related = backend.related(&author, "books").unwrap();
        assert_eq!(
            related,
            vec![ObjectRef::new("book", "2"), ObjectRef::new("book", "10")]
        );
        assert!(backend.related(&author, "nope").is_err());
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Versions
    // ═══════════════════════════════════════════════════════════════════════

    #[test]
    fn test_delete_last_version_removes_revision() {
        let backend = backend();
        let rev = revision(&backend);
        let v1 = backend.insert_version(&version(rev.id, "1")).unwrap();
        let v2 = backend.insert_version(&version(rev.id, "2")).unwrap();

        backend.delete_version(v1.id).unwrap();
        assert!(backend.get_revision(rev.id).unwrap().is_some());
        backend.delete_version(v2.id).unwrap();
        assert!(backend.get_revision(rev.id).unwrap().is_none());

        assert_eq!(backend.delete_version(v2.id).unwrap_err().kind, ErrorKind::NotFound);
    }

    #[test]
    fn test_insert_version_requires_revision() {
        let backend = backend();
        let err = backend.insert_version(&version(99, "1")).unwrap_err();
        assert_eq!(err.kind, ErrorKind::NotFound);
    }

    #[test]
    fn test_query_order_and_filters() {
        let backend = backend();
        let first = revision(&backend);
        let second = revision(&backend);
        let a = backend.insert_version(&version(first.id, "1")).unwrap();
        let b = backend.insert_version(&version(second.id, "1")).unwrap();
        backend.insert_version(&version(second.id, "2")).unwrap();
        backend
            .update_version_status(b.id, ModerationStatus::Approved)
            .unwrap();

        let query = VersionQuery::for_type("book").object_id("1");
        let ids: Vec<_> = backend.query_versions(&query).unwrap().iter().map(|v| v.id).collect();
        assert_eq!(ids, vec![a.id, b.id]);

        let ids: Vec<_> = backend
            .query_versions(&query.clone().order(HistoryOrder::Descending))
            .unwrap()
            .iter()
            .map(|v| v.id)
            .collect();
        assert_eq!(ids, vec![b.id, a.id]);

        let approved = backend
            .query_versions(&query.statuses(&[ModerationStatus::Approved]))
            .unwrap();
        assert_eq!(approved.len(), 1);
        assert_eq!(approved[0].id, b.id);

        let other_manager = VersionQuery::for_type("book").manager_slug("other");
        assert!(backend.query_versions(&other_manager).unwrap().is_empty());
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Savepoints
    // ═══════════════════════════════════════════════════════════════════════

    #[test]
    fn test_nested_rollback_keeps_outer_changes() {
        let backend = backend();
        let outer = atomic(&backend, || {
            backend.save(&ModelInstance::new("author", "1"), None)?;
            let inner: Result<()> = atomic(&backend, || {
                backend.save(&ModelInstance::new("author", "2"), None)?;
                Err(ReversionError::integrity_conflict("boom"))
            });
            assert!(inner.is_err());
            Ok(())
        });
        assert!(outer.is_ok());
        assert_eq!(backend.object_count("author"), 1);
        assert!(backend.savepoints.lock().is_empty());
    }

    #[test]
    fn test_unknown_savepoint() {
        let backend = backend();
        assert_eq!(backend.commit(42).unwrap_err().kind, ErrorKind::Transaction);
        assert_eq!(backend.rollback(42).unwrap_err().kind, ErrorKind::Transaction);
    }
}

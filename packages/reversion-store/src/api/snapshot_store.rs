//! Snapshot Store
//!
//! Pure data access over revisions and versions: recording snapshots of
//! registered objects, reading them back, and the history queries the
//! moderation layer builds on. Writes never open their own commit
//! boundary except `RevisionBuilder::commit`, which wraps one revision in
//! a single savepoint.

use std::collections::{BTreeSet, VecDeque};
use std::sync::Arc;

use indexmap::IndexMap;

use crate::config::ReversionConfig;
use crate::domain::{
    atomic, notify, Backend, EventSink, FieldMap, HistoryOrder, ModelInstance, ModerationStatus,
    NewRevision, NewVersion, ObjectRef, Revision, RevisionId, Version, VersionId, VersionQuery,
    VersioningEvent,
};
use crate::error::{ReversionError, Result};
use crate::registry::{Registry, TypeRegistration};
use crate::serialization::SerializerRegistry;

/// Read/write access to revisions and versions of one manager
#[derive(Clone)]
pub struct SnapshotStore {
    backend: Arc<dyn Backend>,
    registry: Arc<Registry>,
    serializers: Arc<SerializerRegistry>,
    config: Arc<ReversionConfig>,
    sink: Arc<dyn EventSink>,
}

impl SnapshotStore {
    pub fn new(
        backend: Arc<dyn Backend>,
        registry: Arc<Registry>,
        serializers: Arc<SerializerRegistry>,
        config: Arc<ReversionConfig>,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            backend,
            registry,
            serializers,
            config,
            sink,
        }
    }

    pub fn backend(&self) -> &dyn Backend {
        self.backend.as_ref()
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn config(&self) -> &ReversionConfig {
        &self.config
    }

    pub fn serializers(&self) -> &SerializerRegistry {
        &self.serializers
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // Recording
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    /// Start a revision in the caller's transaction
    pub fn create_revision(
        &self,
        manager_slug: &str,
        user_id: Option<&str>,
        comment: &str,
    ) -> Result<Revision> {
        let mut revision = NewRevision::new(manager_slug);
        revision.user_id = user_id.map(str::to_string);
        revision.comment = comment.to_string();
        self.backend.insert_revision(&revision)
    }

    /// Append a PENDING snapshot of `instance` to `revision`
    ///
    /// Only the registration's trackable fields are stored. `format`
    /// overrides the registration's format.
    pub fn add_version(
        &self,
        revision: &Revision,
        instance: &ModelInstance,
        format: Option<&str>,
    ) -> Result<Version> {
        let registration = self.registry.registration(&instance.object_type)?;
        let format = format.unwrap_or(&registration.format);
        let new = self.new_version(revision.id, &registration, instance, format)?;
        let version = self.backend.insert_version(&new)?;
        self.backend.touch_revision(revision.id, None)?;
        Ok(version)
    }

    fn new_version(
        &self,
        revision_id: RevisionId,
        registration: &TypeRegistration,
        instance: &ModelInstance,
        format: &str,
    ) -> Result<NewVersion> {
        let schema = self.backend.catalog().schema(&instance.object_type)?;
        let tracked = instance.restricted_to(registration.fields.iter().map(String::as_str));
        Ok(NewVersion {
            revision_id,
            object_type: instance.object_type.clone(),
            object_id: instance.pk.clone(),
            object_id_int: schema.int_pk(&instance.pk),
            format: format.to_string(),
            serialized_data: self.serializers.serialize(format, &tracked)?,
            object_repr: schema.repr(instance),
            status: ModerationStatus::Pending,
        })
    }

    /// Builder for one tracked write
    pub fn revision(&self) -> RevisionBuilder<'_> {
        RevisionBuilder {
            store: self,
            user_id: None,
            comment: String::new(),
            ignore_duplicates: self.config.ignore_duplicates,
            objects: Vec::new(),
        }
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // Reading
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    /// Version by id; missing → NotFound
    pub fn get_version(&self, version_id: VersionId) -> Result<Version> {
        self.backend
            .get_version(version_id)?
            .ok_or_else(|| ReversionError::version_not_found(version_id))
    }

    /// Revision by id; missing → NotFound
    pub fn get_revision(&self, revision_id: RevisionId) -> Result<Revision> {
        self.backend
            .get_revision(revision_id)?
            .ok_or_else(|| ReversionError::revision_not_found(revision_id))
    }

    pub fn versions_for_revision(&self, revision_id: RevisionId) -> Result<Vec<Version>> {
        self.backend.versions_for_revision(revision_id)
    }

    /// History of one object under this manager, in the configured order
    pub fn get_latest_for_object(
        &self,
        object_type: &str,
        object_id: &str,
        statuses: Option<&[ModerationStatus]>,
    ) -> Result<Vec<Version>> {
        let mut query = VersionQuery::for_type(object_type)
            .object_id(object_id)
            .manager_slug(self.config.manager_slug.clone())
            .order(self.config.history_order);
        if let Some(statuses) = statuses {
            query = query.statuses(statuses);
        }
        self.backend.query_versions(&query)
    }

    /// Every version of one object, in the configured order
    pub fn get_versions_for_object(&self, object_type: &str, object_id: &str) -> Result<Vec<Version>> {
        self.get_latest_for_object(object_type, object_id, None)
    }

    /// Every version of one object with the given statuses, oldest first, across managers
    pub fn versions_with_status(
        &self,
        object: &ObjectRef,
        statuses: &[ModerationStatus],
    ) -> Result<Vec<Version>> {
        self.backend
            .query_versions(&VersionQuery::for_object(object).statuses(statuses))
    }

    /// Most recent version of every object whose live counterpart is gone
    ///
    /// Ordered by that version's revision creation time, per configuration.
    pub fn list_deleted(&self, object_type: &str) -> Result<Vec<Version>> {
        let query = VersionQuery::for_type(object_type)
            .manager_slug(self.config.manager_slug.clone())
            .order(HistoryOrder::Descending);

        let mut latest: IndexMap<String, Version> = IndexMap::new();
        for version in self.backend.query_versions(&query)? {
            latest.entry(version.object_id.clone()).or_insert(version);
        }

        let mut deleted = Vec::new();
        for (_, version) in latest {
            if !self.backend.exists(&version.object_ref())? {
                deleted.push(version);
            }
        }
        if self.config.history_order == HistoryOrder::Ascending {
            deleted.reverse();
        }
        Ok(deleted)
    }

    /// Versions display strings joined with ", "
    pub fn describe_revision(&self, revision_id: RevisionId) -> Result<String> {
        Ok(self
            .backend
            .versions_for_revision(revision_id)?
            .iter()
            .map(|v| v.object_repr.as_str())
            .collect::<Vec<_>>()
            .join(", "))
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // Payloads
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    /// Transient instance rebuilt from a version's payload
    pub fn deserialize(&self, version: &Version) -> Result<ModelInstance> {
        self.serializers
            .deserialize(&version.format, &version.serialized_data)
    }

    /// Stored field values, with parent versions of the same revision merged in
    ///
    /// Own fields win over parent fields of the same name.
    pub fn field_dict(&self, version: &Version) -> Result<FieldMap> {
        let instance = self.deserialize(version)?;
        let catalog = self.backend.catalog();
        let mut result = FieldMap::new();

        if let Some(link) = catalog
            .get(&version.object_type)
            .and_then(|schema| schema.parent.as_ref())
        {
            let parent_id = instance
                .get(&link.field)
                .as_reference()
                .unwrap_or(version.object_id.as_str())
                .to_string();
            let parent = ObjectRef::new(link.parent_type.clone(), parent_id);
            let sibling = self
                .backend
                .versions_for_revision(version.revision_id)?
                .into_iter()
                .find(|v| v.object_ref() == parent);
            if let Some(parent_version) = sibling {
                result.extend(self.field_dict(&parent_version)?);
            }
        }

        result.extend(instance.fields);
        Ok(result)
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // Relationships
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    /// `instances` plus every live object reachable through registered follow relations
    ///
    /// Each object appears once, in discovery order. Objects of unregistered
    /// types are included but not expanded.
    pub fn follow_relationships(&self, instances: Vec<ModelInstance>) -> Result<Vec<ModelInstance>> {
        let mut visited: BTreeSet<ObjectRef> = BTreeSet::new();
        let mut queue: VecDeque<ModelInstance> = instances.into();
        let mut result = Vec::new();

        while let Some(instance) = queue.pop_front() {
            if !visited.insert(instance.object_ref()) {
                continue;
            }
            if let Ok(registration) = self.registry.registration(&instance.object_type) {
                for relation in &registration.follow {
                    for related in self.backend.related(&instance, relation)? {
                        if visited.contains(&related) {
                            continue;
                        }
                        if let Some(live) = self.backend.get(&related)? {
                            queue.push_back(live);
                        }
                    }
                }
            }
            result.push(instance);
        }
        Ok(result)
    }
}

/// Lazy de-duplication of consecutive identical payloads
///
/// Pure function of its input: iterating the same sequence twice yields
/// the same result. Not resumable once exhausted.
pub struct UniqueVersions<I> {
    inner: I,
    last: Option<Vec<u8>>,
}

impl<I: Iterator<Item = Version>> Iterator for UniqueVersions<I> {
    type Item = Version;

    fn next(&mut self) -> Option<Version> {
        loop {
            let version = self.inner.next()?;
            if self.last.as_deref() == Some(version.serialized_data.as_slice()) {
                continue;
            }
            self.last = Some(version.serialized_data.clone());
            return Some(version);
        }
    }
}

/// Drop versions whose payload equals the immediately preceding one
pub fn get_unique<I>(versions: I) -> UniqueVersions<I::IntoIter>
where
    I: IntoIterator<Item = Version>,
{
    UniqueVersions {
        inner: versions.into_iter(),
        last: None,
    }
}

/// One tracked write: objects collected, then committed as one revision
pub struct RevisionBuilder<'a> {
    store: &'a SnapshotStore,
    user_id: Option<String>,
    comment: String,
    ignore_duplicates: bool,
    objects: Vec<ModelInstance>,
}

impl<'a> RevisionBuilder<'a> {
    pub fn user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = comment.into();
        self
    }

    pub fn ignore_duplicates(mut self, ignore: bool) -> Self {
        self.ignore_duplicates = ignore;
        self
    }

    /// Track an object in its current (possibly unsaved) state
    pub fn add(mut self, instance: ModelInstance) -> Self {
        self.objects.push(instance);
        self
    }

    /// Create the revision and one PENDING version per tracked object
    ///
    /// Followed objects are included. Returns `None` when duplicates are
    /// ignored and every payload matches that object's latest version.
    pub fn commit(self) -> Result<Option<(Revision, Vec<Version>)>> {
        let store = self.store;
        let objects = store.follow_relationships(self.objects)?;
        if objects.is_empty() {
            return Ok(None);
        }

        let committed = atomic(store.backend(), || {
            let mut pending = Vec::with_capacity(objects.len());
            for instance in &objects {
                let registration = store.registry.registration(&instance.object_type)?;
                pending.push(store.new_version(0, &registration, instance, &registration.format)?);
            }

            if self.ignore_duplicates && store.all_duplicates(&pending)? {
                tracing::debug!(
                    objects = pending.len(),
                    "Skipping revision: payloads unchanged"
                );
                return Ok(None);
            }

            let revision = store.create_revision(
                &store.config.manager_slug,
                self.user_id.as_deref(),
                &self.comment,
            )?;
            let mut versions = Vec::with_capacity(pending.len());
            for mut new in pending {
                new.revision_id = revision.id;
                versions.push(store.backend.insert_version(&new)?);
            }
            let revision = store.backend.touch_revision(revision.id, None)?;
            Ok(Some((revision, versions)))
        })?;

        if let Some((revision, versions)) = &committed {
            tracing::debug!(
                revision_id = revision.id,
                versions = versions.len(),
                "Revision committed"
            );
            notify(
                store.sink.as_ref(),
                &VersioningEvent::RevisionCommitted {
                    revision_id: revision.id,
                    manager_slug: revision.manager_slug.clone(),
                    versions: versions.clone(),
                },
            );
        }
        Ok(committed)
    }
}

impl SnapshotStore {
    fn all_duplicates(&self, pending: &[NewVersion]) -> Result<bool> {
        for new in pending {
            let latest = self
                .get_latest_for_object(&new.object_type, &new.object_id, None)?
                .into_iter()
                .max_by_key(|v| v.id);
            match latest {
                Some(latest) if latest.serialized_data == new.serialized_data => {}
                _ => return Ok(false),
            }
        }
        Ok(true)
    }
}

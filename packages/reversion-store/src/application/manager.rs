//! Revision manager
//!
//! One manager per grouping key (`manager_slug`). Several managers may
//! share a backend; each sees only its own revisions in history queries.
//!
//! ```text
//! RevisionManager
//!   ├── SnapshotStore   (record / read versions)
//!   ├── DiffDispatcher  (version vs live object)
//!   ├── RevertEngine    (safe revert, cascade delete)
//!   └── Moderator       (approve / reject)
//! ```

use std::sync::Arc;

use super::moderation::{ApprovalOutcome, Moderator, RejectionOutcome};
use super::revert::{RevertEngine, RevertReport};
use crate::api::{RevisionBuilder, SnapshotStore};
use crate::config::ReversionConfig;
use crate::diff::{DiffDispatcher, DiffRegistry, ObjectDiff};
use crate::domain::{
    Backend, EventSink, MediaStorage, ModelInstance, RevisionId, Version, VersionId,
};
use crate::error::{ReversionError, Result};
use crate::infrastructure::NoopSink;
use crate::registry::{Registry, RegistrationOptions, TypeRegistration};
use crate::serialization::SerializerRegistry;

/// Builder for `RevisionManager`
pub struct RevisionManagerBuilder {
    backend: Arc<dyn Backend>,
    config: ReversionConfig,
    serializers: SerializerRegistry,
    diff_registry: Option<Arc<DiffRegistry>>,
    media: Option<Arc<dyn MediaStorage>>,
    sink: Arc<dyn EventSink>,
}

impl RevisionManagerBuilder {
    pub fn config(mut self, config: ReversionConfig) -> Self {
        self.config = config;
        self
    }

    pub fn serializers(mut self, serializers: SerializerRegistry) -> Self {
        self.serializers = serializers;
        self
    }

    /// Strategy table for diffs; defaults to `DiffRegistry::shared()`
    pub fn diff_registry(mut self, registry: Arc<DiffRegistry>) -> Self {
        self.diff_registry = Some(registry);
        self
    }

    pub fn media(mut self, media: Arc<dyn MediaStorage>) -> Self {
        self.media = Some(media);
        self
    }

    pub fn sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Validate the configuration and wire the components
    ///
    /// Fails with a configuration error when the backend has no savepoints,
    /// the config is invalid, or the default format has no serializer.
    pub fn build(self) -> Result<RevisionManager> {
        if !self.backend.supports_savepoints() {
            return Err(ReversionError::configuration(
                "Backend does not support savepoints; nested transactions are required",
            ));
        }
        self.config.validate()?;
        if !self.serializers.contains(&self.config.default_format) {
            return Err(ReversionError::configuration(format!(
                "No serializer for default format '{}'",
                self.config.default_format
            )));
        }

        let config = Arc::new(self.config);
        let serializers = Arc::new(self.serializers);
        let registry = Arc::new(Registry::new());

        let snapshots = SnapshotStore::new(
            Arc::clone(&self.backend),
            Arc::clone(&registry),
            Arc::clone(&serializers),
            Arc::clone(&config),
            Arc::clone(&self.sink),
        );
        let engine = RevertEngine::new(snapshots.clone());
        let moderator = Moderator::new(snapshots.clone(), engine.clone(), Arc::clone(&self.sink));

        let mut dispatcher =
            DiffDispatcher::new(self.diff_registry.unwrap_or_else(DiffRegistry::shared));
        if let Some(media) = self.media {
            dispatcher = dispatcher.with_media(media);
        }

        tracing::info!(
            manager_slug = config.manager_slug.as_str(),
            default_format = config.default_format.as_str(),
            "Revision manager ready"
        );

        Ok(RevisionManager {
            backend: self.backend,
            config,
            serializers,
            registry,
            snapshots,
            dispatcher,
            engine,
            moderator,
        })
    }
}

/// Versioning and moderation facade over one backend
#[derive(Clone)]
pub struct RevisionManager {
    backend: Arc<dyn Backend>,
    config: Arc<ReversionConfig>,
    serializers: Arc<SerializerRegistry>,
    registry: Arc<Registry>,
    snapshots: SnapshotStore,
    dispatcher: DiffDispatcher,
    engine: RevertEngine,
    moderator: Moderator,
}

impl RevisionManager {
    pub fn builder(backend: Arc<dyn Backend>) -> RevisionManagerBuilder {
        RevisionManagerBuilder {
            backend,
            config: ReversionConfig::default(),
            serializers: SerializerRegistry::new(),
            diff_registry: None,
            media: None,
            sink: Arc::new(NoopSink),
        }
    }

    /// Manager with default configuration
    pub fn new(backend: Arc<dyn Backend>) -> Result<Self> {
        Self::builder(backend).build()
    }

    pub fn config(&self) -> &ReversionConfig {
        &self.config
    }

    pub fn backend(&self) -> &dyn Backend {
        self.backend.as_ref()
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // Registration
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    /// Register a type for versioning
    pub fn register(
        &self,
        object_type: &str,
        options: RegistrationOptions,
    ) -> Result<Arc<TypeRegistration>> {
        self.registry.register(
            self.backend.catalog(),
            &self.serializers,
            &self.config,
            object_type,
            options,
        )
    }

    pub fn is_registered(&self, object_type: &str) -> bool {
        self.registry.is_registered(object_type)
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // Snapshots
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    pub fn snapshots(&self) -> &SnapshotStore {
        &self.snapshots
    }

    /// Start a tracked write
    pub fn revision(&self) -> RevisionBuilder<'_> {
        self.snapshots.revision()
    }

    pub fn get_version(&self, version_id: VersionId) -> Result<Version> {
        self.snapshots.get_version(version_id)
    }

    pub fn get_versions_for_object(&self, object_type: &str, object_id: &str) -> Result<Vec<Version>> {
        self.snapshots.get_versions_for_object(object_type, object_id)
    }

    pub fn list_deleted(&self, object_type: &str) -> Result<Vec<Version>> {
        self.snapshots.list_deleted(object_type)
    }

    pub fn describe_revision(&self, revision_id: RevisionId) -> Result<String> {
        self.snapshots.describe_revision(revision_id)
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // Diff
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    /// Changed fields of a version relative to its live object
    pub fn compute_diff(&self, version_id: VersionId) -> Result<ObjectDiff> {
        let version = self.snapshots.get_version(version_id)?;
        self.dispatcher.object_diff(&self.snapshots, &version)
    }

    pub fn dispatcher(&self) -> &DiffDispatcher {
        &self.dispatcher
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // Revert
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    pub fn revert(&self, versions: &[Version], delete: bool) -> Result<RevertReport> {
        self.engine.revert(versions, delete)
    }

    pub fn revert_revision(&self, revision_id: RevisionId, delete: bool) -> Result<RevertReport> {
        self.engine.revert_revision(revision_id, delete)
    }

    pub fn revert_to_approved(&self, versions: &[Version]) -> Result<RevertReport> {
        self.moderator.revert_to_approved(versions)
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // Moderation
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    pub fn approve(&self, version_id: VersionId) -> Result<ApprovalOutcome> {
        self.moderator.approve(version_id)
    }

    pub fn reject(&self, version_id: VersionId) -> Result<RejectionOutcome> {
        self.moderator.reject(version_id)
    }

    pub fn list_approved(&self, object_type: &str) -> Result<Vec<ModelInstance>> {
        self.moderator.list_approved(object_type)
    }

    pub fn current_approved(&self, object_type: &str, object_id: &str) -> Result<Option<Version>> {
        self.moderator.current_approved(object_type, object_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{FieldDescriptor, ModelCatalog, ModelSchema, PkKind};
    use crate::error::ErrorKind;
    use crate::infrastructure::InMemoryBackend;

    fn catalog() -> ModelCatalog {
        ModelCatalog::new().with(
            ModelSchema::new("note", PkKind::Integer)
                .field(FieldDescriptor::scalar("body"))
                .field(FieldDescriptor::scalar("moderated_status").nullable()),
        )
    }

    #[test]
    fn test_build_requires_savepoints() {
        let backend = Arc::new(InMemoryBackend::without_savepoints(catalog()));
        let err = RevisionManager::new(backend).err().unwrap();
        assert_eq!(err.kind, ErrorKind::Configuration);
        assert!(err.message.contains("savepoints"));
    }

    #[test]
    fn test_build_rejects_unknown_default_format() {
        let backend = Arc::new(InMemoryBackend::new(catalog()));
        let err = RevisionManager::builder(backend)
            .config(ReversionConfig::default().with_default_format("xml"))
            .build()
            .err()
            .unwrap();
        assert_eq!(err.kind, ErrorKind::Configuration);
    }

    #[test]
    fn test_register_picks_up_status_field() {
        let manager = RevisionManager::new(Arc::new(InMemoryBackend::new(catalog()))).unwrap();
        let registration = manager
            .register("note", RegistrationOptions::new())
            .unwrap();
        assert_eq!(registration.status_field.as_deref(), Some("moderated_status"));
        assert_eq!(registration.fields, vec!["body".to_string()]);
        assert!(manager.is_registered("note"));
    }

    #[test]
    fn test_missing_version_is_not_found() {
        let manager = RevisionManager::new(Arc::new(InMemoryBackend::new(catalog()))).unwrap();
        assert_eq!(manager.approve(99).err().unwrap().kind, ErrorKind::NotFound);
        assert_eq!(manager.reject(99).err().unwrap().kind, ErrorKind::NotFound);
        assert_eq!(manager.compute_diff(99).err().unwrap().kind, ErrorKind::NotFound);
    }
}

//! reversion-store - Record versioning and moderation
//!
//! Snapshots object state into immutable versions grouped by revision,
//! restores object graphs to earlier snapshots, and runs a
//! PENDING → APPROVED / REJECTED moderation workflow over them.
//!
//! ## Layers
//!
//! - `domain`: models, schemas and the storage ports (`ObjectStore`,
//!   `VersionRepository`, `Transactional`)
//! - `api`: `SnapshotStore`, data access over revisions and versions
//! - `diff`: field-kind dispatched diffs between a version and its live object
//! - `application`: `RevertEngine`, `Moderator`, `RevisionManager`
//! - `infrastructure`: in-memory and SQLite backends, event sinks
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use reversion_store::{InMemoryBackend, ModelInstance, RegistrationOptions, RevisionManager};
//!
//! let backend = Arc::new(InMemoryBackend::new(catalog));
//! let manager = RevisionManager::new(backend.clone())?;
//! manager.register("article", RegistrationOptions::new())?;
//!
//! // Tracked write: one revision, one PENDING version per object
//! let (_, versions) = manager
//!     .revision()
//!     .comment("first draft")
//!     .add(ModelInstance::new("article", "1").with("title", "Hello"))
//!     .commit()?
//!     .expect("revision created");
//!
//! // Moderation: apply the version to the live object
//! let outcome = manager.approve(versions[0].id)?;
//! ```

pub mod api;
pub mod application;
pub mod config;
pub mod diff;
pub mod domain;
pub mod error;
pub mod infrastructure;
pub mod registry;
pub mod serialization;

pub use error::{ErrorKind, Result, ReversionError};

pub use api::{get_unique, RevisionBuilder, SnapshotStore, UniqueVersions};
pub use application::{
    defer, ApprovalOutcome, Moderator, RejectionOutcome, RevertEngine, RevertReport,
    RevisionManager, RevisionManagerBuilder,
};
pub use config::{ConfigError, ReversionConfig};
pub use diff::{
    DiffContext, DiffDispatcher, DiffRegistry, DiffStrategy, FieldDiff, ObjectDiff,
    RelatedObject, RenderedDiff,
};
pub use domain::{
    atomic, Backend, EventSink, FieldDescriptor, FieldKind, FieldMap, FieldValue, HistoryOrder,
    MediaPreview, MediaStorage, ModelCatalog, ModelInstance, ModelSchema, ModerationStatus,
    ObjectRef, ObjectStore, PkKind, Revision, RevisionId, Transactional, Version, VersionId,
    VersionQuery, VersionRepository, VersioningEvent,
};
pub use infrastructure::{InMemoryBackend, NoopSink, TracingSink};
pub use registry::{RegistrationOptions, Registry, TypeRegistration};
pub use serialization::{JsonSerializer, MsgpackSerializer, Serializer, SerializerRegistry};

#[cfg(feature = "sqlite")]
pub use infrastructure::SqliteBackend;

//! Domain layer
//!
//! # Models
//!
//! - `Revision`: atomic group of versions created together
//! - `Version`: immutable snapshot of one object with a moderation status
//! - `ModelInstance` / `FieldValue`: live object state
//!
//! # Schema
//!
//! - `ModelSchema`, `FieldDescriptor`, `FieldKind`: field introspection
//! - `ModelCatalog`: schema set plus referential-integrity helpers
//!
//! # Ports
//!
//! - `ObjectStore`: live objects (the ORM boundary)
//! - `VersionRepository`: revision/version persistence
//! - `Transactional`: savepoint scopes, driven through `atomic`
//! - `MediaStorage`, `EventSink`: optional collaborators

pub mod events;
pub mod models;
pub mod ports;
pub mod schema;

pub use events::{notify, EventSink, SinkError, VersioningEvent};
pub use models::{
    FieldMap, FieldValue, HistoryOrder, ModelInstance, ModerationStatus, NewRevision, NewVersion,
    ObjectRef, Revision, RevisionId, Version, VersionId, VersionQuery,
};
pub use ports::{
    atomic, Backend, MediaPreview, MediaStorage, ObjectStore, SavepointId, Transactional,
    VersionRepository,
};
pub use schema::{
    Choice, FieldDescriptor, FieldKind, ModelCatalog, ModelSchema, ParentLink, PkKind,
    ReverseRelation,
};

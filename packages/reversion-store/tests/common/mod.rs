//! Shared fixtures for integration tests
//!
//! Models:
//! - `author` ← `book` (reference, protected) and `book` → `tag` (many)
//! - `node.next` → `node`: dependency chains
//! - `egg` ⇄ `chicken`: unsatisfiable reference cycle
//! - `restaurant` extends `place` (multi-table inheritance)

#![allow(dead_code)]

use std::sync::Arc;

use parking_lot::Mutex;
use reversion_store::domain::SinkError;
use reversion_store::{
    Backend, EventSink, FieldDescriptor, FieldValue, InMemoryBackend, ModelCatalog, ModelInstance,
    ModelSchema, ObjectRef, PkKind, RegistrationOptions, RevisionManager, Version,
    VersioningEvent,
};

pub fn catalog() -> ModelCatalog {
    ModelCatalog::new()
        .with(
            ModelSchema::new("author", PkKind::Integer)
                .field(FieldDescriptor::scalar("name"))
                .field(FieldDescriptor::scalar("moderated_status").nullable())
                .display_field("name")
                .reverse("books", "book", "author"),
        )
        .with(
            ModelSchema::new("tag", PkKind::Text)
                .field(FieldDescriptor::scalar("label"))
                .display_field("label"),
        )
        .with(
            ModelSchema::new("book", PkKind::Integer)
                .field(FieldDescriptor::scalar("title"))
                .field(FieldDescriptor::reference("author", "author"))
                .field(FieldDescriptor::many("tags", "tag"))
                .field(FieldDescriptor::boolean("published"))
                .field(FieldDescriptor::scalar("moderated_status").nullable())
                .display_field("title"),
        )
        .with(
            ModelSchema::new("node", PkKind::Integer)
                .field(FieldDescriptor::scalar("label"))
                .field(FieldDescriptor::reference("next", "node").nullable()),
        )
        .with(
            ModelSchema::new("egg", PkKind::Integer)
                .field(FieldDescriptor::reference("chicken", "chicken")),
        )
        .with(
            ModelSchema::new("chicken", PkKind::Integer)
                .field(FieldDescriptor::reference("egg", "egg")),
        )
        .with(
            ModelSchema::new("place", PkKind::Integer)
                .field(FieldDescriptor::scalar("name"))
                .field(FieldDescriptor::scalar("address"))
                .display_field("name"),
        )
        .with(
            ModelSchema::new("restaurant", PkKind::Integer)
                .inherits("place", "place_ptr")
                .field(FieldDescriptor::boolean("serves_pizza")),
        )
}

/// Sink that records every event, optionally failing each delivery
#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<VersioningEvent>>,
    fail: bool,
}

impl RecordingSink {
    pub fn failing() -> Self {
        Self {
            events: Mutex::new(Vec::new()),
            fail: true,
        }
    }

    pub fn events(&self) -> Vec<VersioningEvent> {
        self.events.lock().clone()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.events.lock().iter().map(VersioningEvent::name).collect()
    }
}

impl EventSink for RecordingSink {
    fn emit(&self, event: &VersioningEvent) -> Result<(), SinkError> {
        self.events.lock().push(event.clone());
        if self.fail {
            return Err("sink unavailable".into());
        }
        Ok(())
    }
}

/// Manager over one backend with every fixture type registered
pub struct Fixture {
    pub backend: Arc<dyn Backend>,
    pub manager: RevisionManager,
    pub sink: Arc<RecordingSink>,
}

impl Fixture {
    pub fn new() -> Self {
        Self::with_sink(RecordingSink::default())
    }

    pub fn with_sink(sink: RecordingSink) -> Self {
        Self::over(Arc::new(InMemoryBackend::new(catalog())), sink)
    }

    pub fn over(backend: Arc<dyn Backend>, sink: RecordingSink) -> Self {
        let sink = Arc::new(sink);
        let manager = RevisionManager::builder(Arc::clone(&backend))
            .sink(sink.clone())
            .build()
            .unwrap();

        manager
            .register("author", RegistrationOptions::new().follow(["books"]))
            .unwrap();
        for object_type in ["tag", "book", "node", "egg", "chicken"] {
            manager
                .register(object_type, RegistrationOptions::new())
                .unwrap();
        }
        manager
            .register("restaurant", RegistrationOptions::new())
            .unwrap();

        Self {
            backend,
            manager,
            sink,
        }
    }

    /// Write an object straight to the live store, untracked
    pub fn save(&self, instance: &ModelInstance) {
        self.backend.save(instance, None).unwrap();
    }

    /// Snapshot objects as one revision
    pub fn track(&self, instances: Vec<ModelInstance>) -> Vec<Version> {
        let builder = instances
            .into_iter()
            .fold(self.manager.revision(), |builder, instance| builder.add(instance));
        let (_, versions) = builder.commit().unwrap().unwrap();
        versions
    }

    /// Save then snapshot one object; returns that object's version
    pub fn edit(&self, instance: ModelInstance) -> Version {
        self.save(&instance);
        let object = instance.object_ref();
        self.track(vec![instance])
            .into_iter()
            .find(|v| v.object_ref() == object)
            .unwrap()
    }

    pub fn live(&self, object_type: &str, object_id: &str) -> Option<ModelInstance> {
        self.backend
            .get(&ObjectRef::new(object_type, object_id))
            .unwrap()
    }

    pub fn live_field(&self, object_type: &str, object_id: &str, field: &str) -> FieldValue {
        self.live(object_type, object_id)
            .map(|instance| instance.get(field).clone())
            .unwrap_or_default()
    }
}

pub fn author(pk: &str, name: &str) -> ModelInstance {
    ModelInstance::new("author", pk).with("name", name)
}

pub fn book(pk: &str, title: &str, author_pk: &str) -> ModelInstance {
    ModelInstance::new("book", pk)
        .with("title", title)
        .with("author", FieldValue::reference(author_pk))
        .with("published", false)
}

pub fn tag(pk: &str) -> ModelInstance {
    ModelInstance::new("tag", pk).with("label", pk.to_uppercase())
}

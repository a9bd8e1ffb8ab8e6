//! Model schemas and field descriptors
//!
//! Every field carries an explicit `FieldKind` fixed when the schema is
//! declared. Diffing, relation following and integrity checks dispatch on
//! that tag, never on the runtime shape of a value.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::models::{FieldValue, ModelInstance, ObjectRef};
use crate::error::{ReversionError, Result};

/// Primary key flavour of a model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PkKind {
    Integer,
    Text,
}

/// Field kind tag.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    Scalar,
    Boolean,
    Date,
    DateTime,
    /// Single foreign reference
    Reference { target: String },
    /// Many-valued relation
    Many { target: String },
    /// Stored file / image identifier
    Media,
    /// Link to the parent row of a multi-table hierarchy
    Parent { target: String },
    /// Application-defined kind; diffed by whatever strategy is registered under the tag
    Custom(String),
}

impl FieldKind {
    /// Dispatch key used by the diff registry.
    pub fn tag(&self) -> &str {
        match self {
            FieldKind::Scalar => "scalar",
            FieldKind::Boolean => "boolean",
            FieldKind::Date => "date",
            FieldKind::DateTime => "datetime",
            FieldKind::Reference { .. } => "reference",
            FieldKind::Many { .. } => "many",
            FieldKind::Media => "media",
            FieldKind::Parent { .. } => "parent",
            FieldKind::Custom(tag) => tag.as_str(),
        }
    }

    /// Referenced model type for relation kinds.
    pub fn target(&self) -> Option<&str> {
        match self {
            FieldKind::Reference { target }
            | FieldKind::Many { target }
            | FieldKind::Parent { target } => Some(target.as_str()),
            _ => None,
        }
    }

    pub fn is_relation(&self) -> bool {
        self.target().is_some()
    }
}

/// One entry of an enumerated choice set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Choice {
    pub value: FieldValue,
    pub label: String,
}

/// Field introspection record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDescriptor {
    pub name: String,
    pub kind: FieldKind,
    pub nullable: bool,
    pub choices: Option<Vec<Choice>>,
}

impl FieldDescriptor {
    pub fn new(name: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            name: name.into(),
            kind,
            nullable: false,
            choices: None,
        }
    }

    pub fn scalar(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Scalar)
    }

    pub fn boolean(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Boolean)
    }

    pub fn date(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Date)
    }

    pub fn datetime(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::DateTime)
    }

    pub fn reference(name: impl Into<String>, target: impl Into<String>) -> Self {
        Self::new(
            name,
            FieldKind::Reference {
                target: target.into(),
            },
        )
    }

    /// Many-valued relations never block a save by being empty.
    pub fn many(name: impl Into<String>, target: impl Into<String>) -> Self {
        Self::new(
            name,
            FieldKind::Many {
                target: target.into(),
            },
        )
        .nullable()
    }

    pub fn media(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Media).nullable()
    }

    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    pub fn with_choices<I, S>(mut self, choices: I) -> Self
    where
        I: IntoIterator<Item = (FieldValue, S)>,
        S: Into<String>,
    {
        self.choices = Some(
            choices
                .into_iter()
                .map(|(value, label)| Choice {
                    value,
                    label: label.into(),
                })
                .collect(),
        );
        self
    }

    /// Display label for a value when this field declares a choice set.
    pub fn choice_label(&self, value: &FieldValue) -> Option<&str> {
        self.choices
            .as_ref()?
            .iter()
            .find(|choice| &choice.value == value)
            .map(|choice| choice.label.as_str())
    }
}

/// Multi-table inheritance link: this model's rows extend a parent row with the same pk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParentLink {
    pub parent_type: String,
    pub field: String,
}

/// Relation declared on another model pointing at this one, followable by name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReverseRelation {
    pub name: String,
    pub source_type: String,
    pub field: String,
}

/// Schema of one model type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelSchema {
    pub name: String,
    pub pk_kind: PkKind,
    pub fields: Vec<FieldDescriptor>,
    pub display_field: Option<String>,
    pub parent: Option<ParentLink>,
    pub reverse_relations: Vec<ReverseRelation>,
}

impl ModelSchema {
    pub fn new(name: impl Into<String>, pk_kind: PkKind) -> Self {
        Self {
            name: name.into(),
            pk_kind,
            fields: Vec::new(),
            display_field: None,
            parent: None,
            reverse_relations: Vec::new(),
        }
    }

    pub fn field(mut self, field: FieldDescriptor) -> Self {
        self.fields.push(field);
        self
    }

    pub fn display_field(mut self, name: impl Into<String>) -> Self {
        self.display_field = Some(name.into());
        self
    }

    /// Declare a parent table; adds the parent link field.
    pub fn inherits(mut self, parent_type: impl Into<String>, field: impl Into<String>) -> Self {
        let parent_type = parent_type.into();
        let field = field.into();
        self.fields.push(FieldDescriptor::new(
            field.clone(),
            FieldKind::Parent {
                target: parent_type.clone(),
            },
        ));
        self.parent = Some(ParentLink { parent_type, field });
        self
    }

    /// Declare a reverse relation `name` made of `source_type` rows whose `field` points here.
    pub fn reverse(
        mut self,
        name: impl Into<String>,
        source_type: impl Into<String>,
        field: impl Into<String>,
    ) -> Self {
        self.reverse_relations.push(ReverseRelation {
            name: name.into(),
            source_type: source_type.into(),
            field: field.into(),
        });
        self
    }

    pub fn get_field(&self, name: &str) -> Option<&FieldDescriptor> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|f| f.name.as_str())
    }

    pub fn reverse_relation(&self, name: &str) -> Option<&ReverseRelation> {
        self.reverse_relations.iter().find(|r| r.name == name)
    }

    /// Whether `name` is a followable relation (forward field or reverse relation).
    pub fn has_relation(&self, name: &str) -> bool {
        self.get_field(name).map_or(false, |f| f.kind.is_relation())
            || self.reverse_relation(name).is_some()
    }

    /// Integer shadow of a primary key.
    pub fn int_pk(&self, pk: &str) -> Option<i64> {
        match self.pk_kind {
            PkKind::Integer => pk.parse().ok(),
            PkKind::Text => None,
        }
    }

    /// Display string: the display field when set, else `"{type} object ({pk})"`.
    pub fn repr(&self, instance: &ModelInstance) -> String {
        self.display_field
            .as_deref()
            .map(|name| instance.get(name))
            .filter(|value| !value.is_absent())
            .map(FieldValue::display)
            .unwrap_or_else(|| format!("{} object ({})", self.name, instance.pk))
    }
}

/// Set of known model schemas.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelCatalog {
    schemas: BTreeMap<String, ModelSchema>,
}

impl ModelCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, schema: ModelSchema) -> Self {
        self.insert(schema);
        self
    }

    pub fn insert(&mut self, schema: ModelSchema) {
        self.schemas.insert(schema.name.clone(), schema);
    }

    pub fn get(&self, name: &str) -> Option<&ModelSchema> {
        self.schemas.get(name)
    }

    /// Schema lookup failing with a configuration error.
    pub fn schema(&self, name: &str) -> Result<&ModelSchema> {
        self.get(name)
            .ok_or_else(|| ReversionError::configuration(format!("Unknown model type '{}'", name)))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.schemas.keys().map(String::as_str)
    }

    pub fn schemas(&self) -> impl Iterator<Item = &ModelSchema> {
        self.schemas.values()
    }

    /// Objects referenced by `instance` through relation fields.
    pub fn outgoing_refs(&self, instance: &ModelInstance) -> Result<Vec<(String, ObjectRef)>> {
        let schema = self.schema(&instance.object_type)?;
        let mut refs = Vec::new();
        for field in &schema.fields {
            let Some(target) = field.kind.target() else {
                continue;
            };
            for pk in instance.get(&field.name).referenced_pks() {
                refs.push((field.name.clone(), ObjectRef::new(target, pk)));
            }
        }
        Ok(refs)
    }

    /// Check that every relation of `instance` points at a live object.
    ///
    /// A null non-nullable reference or a dangling target is an integrity conflict.
    pub fn check_references<F>(&self, instance: &ModelInstance, exists: F) -> Result<()>
    where
        F: Fn(&ObjectRef) -> Result<bool>,
    {
        let schema = self.schema(&instance.object_type)?;
        for field in &schema.fields {
            if !field.kind.is_relation() {
                continue;
            }
            let value = instance.get(&field.name);
            if value.is_null() && !field.nullable {
                return Err(ReversionError::integrity_conflict(format!(
                    "{}.{} may not be null ({})",
                    schema.name,
                    field.name,
                    instance.object_ref()
                )));
            }
        }
        for (field, target) in self.outgoing_refs(instance)? {
            // Self-references resolve once the row itself is written.
            if target == instance.object_ref() {
                continue;
            }
            if !exists(&target)? {
                return Err(ReversionError::integrity_conflict(format!(
                    "{}.{} references missing {}",
                    instance.object_ref(),
                    field,
                    target
                )));
            }
        }
        Ok(())
    }

    /// Live objects whose single reference (or parent link) points at `target`.
    ///
    /// These protect `target` from deletion. Many-valued memberships do not.
    pub fn protected_referrers<'a, I>(&self, target: &ObjectRef, candidates: I) -> Vec<ObjectRef>
    where
        I: IntoIterator<Item = &'a ModelInstance>,
    {
        candidates
            .into_iter()
            .filter(|candidate| candidate.object_ref() != *target)
            .filter(|candidate| {
                self.get(&candidate.object_type).map_or(false, |schema| {
                    schema.fields.iter().any(|field| match &field.kind {
                        FieldKind::Reference { target: t } | FieldKind::Parent { target: t } => {
                            t == &target.object_type
                                && candidate.get(&field.name).as_reference()
                                    == Some(target.object_id.as_str())
                        }
                        _ => false,
                    })
                })
            })
            .map(ModelInstance::object_ref)
            .collect()
    }

    /// Remove `target` from every many-valued relation of `instance`.
    ///
    /// Returns true when a membership was dropped.
    pub fn prune_memberships(&self, instance: &mut ModelInstance, target: &ObjectRef) -> bool {
        let Some(schema) = self.get(&instance.object_type) else {
            return false;
        };
        let mut pruned = false;
        for field in &schema.fields {
            if let FieldKind::Many { target: t } = &field.kind {
                if t != &target.object_type {
                    continue;
                }
                if let Some(FieldValue::References(pks)) = instance.fields.get_mut(&field.name) {
                    pruned |= pks.remove(&target.object_id);
                }
            }
        }
        pruned
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn catalog() -> ModelCatalog {
        ModelCatalog::new()
            .with(
                ModelSchema::new("author", PkKind::Integer)
                    .field(FieldDescriptor::scalar("name"))
                    .display_field("name")
                    .reverse("books", "book", "author"),
            )
            .with(
                ModelSchema::new("book", PkKind::Integer)
                    .field(FieldDescriptor::scalar("title"))
                    .field(FieldDescriptor::reference("author", "author"))
                    .field(FieldDescriptor::many("tags", "tag")),
            )
            .with(ModelSchema::new("tag", PkKind::Text).field(FieldDescriptor::scalar("label")))
    }

    #[test]
    fn test_kind_tags() {
        assert_eq!(FieldKind::Scalar.tag(), "scalar");
        assert_eq!(FieldKind::Many { target: "tag".into() }.tag(), "many");
        assert_eq!(FieldKind::Custom("money".into()).tag(), "money");
        assert_eq!(FieldKind::Reference { target: "a".into() }.target(), Some("a"));
        assert!(!FieldKind::Media.is_relation());
    }

    #[test]
    fn test_repr_falls_back_to_pk() {
        let catalog = catalog();
        let author = ModelInstance::new("author", "1").with("name", "Ursula");
        assert_eq!(catalog.schema("author").unwrap().repr(&author), "Ursula");

        let book = ModelInstance::new("book", "9");
        assert_eq!(catalog.schema("book").unwrap().repr(&book), "book object (9)");
    }

    #[test]
    fn test_int_pk() {
        let catalog = catalog();
        assert_eq!(catalog.schema("book").unwrap().int_pk("12"), Some(12));
        assert_eq!(catalog.schema("book").unwrap().int_pk("x"), None);
        assert_eq!(catalog.schema("tag").unwrap().int_pk("12"), None);
    }

    #[test]
    fn test_check_references() {
        let catalog = catalog();
        let book = ModelInstance::new("book", "1")
            .with("title", "Dune")
            .with("author", FieldValue::reference("7"));

        let err = catalog.check_references(&book, |_| Ok(false)).unwrap_err();
        assert!(err.is_recoverable());
        assert!(err.message.contains("author:7"));

        assert!(catalog.check_references(&book, |_| Ok(true)).is_ok());

        let orphan = ModelInstance::new("book", "2").with("title", "Nobody");
        assert!(catalog.check_references(&orphan, |_| Ok(true)).is_err());
    }

    #[test]
    fn test_protected_referrers_and_pruning() {
        let catalog = catalog();
        let author = ObjectRef::new("author", "7");
        let mut book = ModelInstance::new("book", "1")
            .with("author", FieldValue::reference("7"))
            .with("tags", FieldValue::references(["a", "b"]));

        let referrers = catalog.protected_referrers(&author, [&book]);
        assert_eq!(referrers, vec![ObjectRef::new("book", "1")]);

        let tag = ObjectRef::new("tag", "a");
        assert!(catalog.protected_referrers(&tag, [&book]).is_empty());
        assert!(catalog.prune_memberships(&mut book, &tag));
        assert_eq!(book.get("tags"), &FieldValue::references(["b"]));
    }

    #[test]
    fn test_has_relation() {
        let catalog = catalog();
        let author = catalog.schema("author").unwrap();
        assert!(author.has_relation("books"));
        assert!(!author.has_relation("name"));
        assert!(catalog.schema("book").unwrap().has_relation("tags"));
    }
}

//! Type registration
//!
//! A registration fixes, once, which fields of a type are tracked, which
//! relations are followed when recording and cascading, the payload format
//! and the denormalized moderation status field.

use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::config::ReversionConfig;
use crate::domain::ModelCatalog;
use crate::error::{ReversionError, Result};
use crate::serialization::SerializerRegistry;

/// Caller-supplied registration settings
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegistrationOptions {
    /// Explicit allow-list; `None` tracks every declared field
    pub fields: Option<Vec<String>>,
    pub exclude: Vec<String>,
    /// Relation names followed when recording and cascading
    pub follow: Vec<String>,
    /// Payload format; defaults to the manager's default format
    pub format: Option<String>,
    /// Status field override; defaults to the manager's status field
    pub status_field: Option<String>,
}

impl RegistrationOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.fields = Some(fields.into_iter().map(Into::into).collect());
        self
    }

    pub fn exclude<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.exclude = fields.into_iter().map(Into::into).collect();
        self
    }

    pub fn follow<I, S>(mut self, relations: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.follow = relations.into_iter().map(Into::into).collect();
        self
    }

    pub fn format(mut self, format: impl Into<String>) -> Self {
        self.format = Some(format.into());
        self
    }

    pub fn status_field(mut self, field: impl Into<String>) -> Self {
        self.status_field = Some(field.into());
        self
    }
}

/// Resolved registration of one type
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeRegistration {
    pub object_type: String,
    /// Trackable fields, in schema order; never contains the status field
    pub fields: Vec<String>,
    pub follow: Vec<String>,
    pub format: String,
    /// Present only when the type declares the field
    pub status_field: Option<String>,
}

impl TypeRegistration {
    pub fn tracks(&self, field: &str) -> bool {
        self.fields.iter().any(|f| f == field)
    }
}

/// Registered types
#[derive(Debug, Default)]
pub struct Registry {
    registrations: RwLock<BTreeMap<String, Arc<TypeRegistration>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a type, and its parent type when it has one
    ///
    /// Unknown type, field, relation or format → Configuration error.
    pub fn register(
        &self,
        catalog: &ModelCatalog,
        serializers: &SerializerRegistry,
        config: &ReversionConfig,
        object_type: &str,
        options: RegistrationOptions,
    ) -> Result<Arc<TypeRegistration>> {
        if self.is_registered(object_type) {
            return Err(ReversionError::configuration(format!(
                "Type '{}' is already registered",
                object_type
            )));
        }
        let schema = catalog.schema(object_type)?;

        let unknown = |name: &String| schema.get_field(name).is_none();
        if let Some(name) = options
            .fields
            .iter()
            .flatten()
            .chain(options.exclude.iter())
            .find(|name| unknown(*name))
        {
            return Err(ReversionError::configuration(format!(
                "Type '{}' has no field '{}'",
                object_type, name
            )));
        }

        let status_field = match &options.status_field {
            Some(name) if unknown(name) => {
                return Err(ReversionError::configuration(format!(
                    "Type '{}' has no status field '{}'",
                    object_type, name
                )))
            }
            Some(name) => Some(name.clone()),
            None => schema
                .get_field(&config.status_field)
                .map(|f| f.name.clone()),
        };

        let mut follow = options.follow.clone();
        if let Some(name) = follow.iter().find(|name| !schema.has_relation(name)) {
            return Err(ReversionError::configuration(format!(
                "Type '{}' has no relation '{}'",
                object_type, name
            )));
        }

        let format = options
            .format
            .clone()
            .unwrap_or_else(|| config.default_format.clone());
        if !serializers.contains(&format) {
            return Err(ReversionError::configuration(format!(
                "Unknown serialization format '{}' for type '{}'",
                format, object_type
            )));
        }

        if let Some(link) = &schema.parent {
            if !self.is_registered(&link.parent_type) {
                self.register(
                    catalog,
                    serializers,
                    config,
                    &link.parent_type,
                    RegistrationOptions::new(),
                )?;
            }
            if !follow.contains(&link.field) {
                follow.push(link.field.clone());
            }
        }

        let fields = schema
            .field_names()
            .filter(|name| {
                options
                    .fields
                    .as_ref()
                    .map_or(true, |allowed| allowed.iter().any(|a| a == name))
            })
            .filter(|name| !options.exclude.iter().any(|e| e == name))
            .filter(|name| status_field.as_deref() != Some(*name))
            .map(str::to_string)
            .collect();

        let registration = Arc::new(TypeRegistration {
            object_type: object_type.to_string(),
            fields,
            follow,
            format,
            status_field,
        });

        tracing::debug!(
            object_type,
            fields = ?registration.fields,
            follow = ?registration.follow,
            "Registered type for versioning"
        );

        self.registrations
            .write()
            .insert(object_type.to_string(), Arc::clone(&registration));
        Ok(registration)
    }

    pub fn is_registered(&self, object_type: &str) -> bool {
        self.registrations.read().contains_key(object_type)
    }

    /// Registration of a type; unregistered → Configuration error
    pub fn registration(&self, object_type: &str) -> Result<Arc<TypeRegistration>> {
        self.registrations
            .read()
            .get(object_type)
            .cloned()
            .ok_or_else(|| ReversionError::not_registered(object_type))
    }

    pub fn unregister(&self, object_type: &str) -> Result<()> {
        self.registrations
            .write()
            .remove(object_type)
            .map(|_| ())
            .ok_or_else(|| ReversionError::not_registered(object_type))
    }

    pub fn registered_types(&self) -> Vec<String> {
        self.registrations.read().keys().cloned().collect()
    }
}

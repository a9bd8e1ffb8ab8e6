//! Versioning Domain Models
//!
//! - `Revision`: atomic group of versions created by one tracked write
//! - `Version`: immutable snapshot of one object, carrying a moderation status
//! - `ModelInstance`: live object state as exposed by the object store
//! - `FieldValue`: tagged field value shared by live objects and snapshots

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use crate::error::{ReversionError, Result};

/// Revision ID (database primary key)
pub type RevisionId = i64;

/// Version ID (database primary key)
pub type VersionId = i64;

/// Field name → value
pub type FieldMap = BTreeMap<String, FieldValue>;

// ═══════════════════════════════════════════════════════════════════════════
// Moderation Status
// ═══════════════════════════════════════════════════════════════════════════

/// Moderation lifecycle of a version.
///
/// PENDING → {APPROVED, REJECTED}. Nothing re-enters PENDING.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModerationStatus {
    Rejected,
    Pending,
    Approved,
}

impl ModerationStatus {
    /// Stored integer code.
    pub fn code(&self) -> i64 {
        match self {
            ModerationStatus::Approved => 2,
            ModerationStatus::Pending => 1,
            ModerationStatus::Rejected => -1,
        }
    }

    pub fn from_code(code: i64) -> Result<Self> {
        match code {
            2 => Ok(ModerationStatus::Approved),
            1 => Ok(ModerationStatus::Pending),
            -1 => Ok(ModerationStatus::Rejected),
            other => Err(ReversionError::serialization(format!(
                "Unknown moderation status code: {}",
                other
            ))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ModerationStatus::Approved => "approved",
            ModerationStatus::Pending => "pending",
            ModerationStatus::Rejected => "rejected",
        }
    }

    /// Human-readable label.
    pub fn label(&self) -> &'static str {
        match self {
            ModerationStatus::Approved => "Approved",
            ModerationStatus::Pending => "Pending",
            ModerationStatus::Rejected => "Rejected",
        }
    }
}

impl fmt::Display for ModerationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// History ordering by revision creation time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HistoryOrder {
    #[default]
    Ascending,
    Descending,
}

// ═══════════════════════════════════════════════════════════════════════════
// Field Values
// ═══════════════════════════════════════════════════════════════════════════

/// A single field value.
///
/// References carry the target's stringified primary key; the target type
/// comes from the field descriptor.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldValue {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Date(NaiveDate),
    DateTime(DateTime<Utc>),
    Reference(String),
    References(BTreeSet<String>),
    Media(String),
}

impl FieldValue {
    pub fn text(value: impl Into<String>) -> Self {
        FieldValue::Text(value.into())
    }

    pub fn reference(pk: impl Into<String>) -> Self {
        FieldValue::Reference(pk.into())
    }

    pub fn references<I, S>(pks: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        FieldValue::References(pks.into_iter().map(Into::into).collect())
    }

    pub fn is_null(&self) -> bool {
        matches!(self, FieldValue::Null)
    }

    /// Null, empty text and empty media identifiers all count as absent.
    pub fn is_absent(&self) -> bool {
        match self {
            FieldValue::Null => true,
            FieldValue::Text(s) | FieldValue::Media(s) => s.is_empty(),
            _ => false,
        }
    }

    /// Single referenced pk, if this is a reference.
    pub fn as_reference(&self) -> Option<&str> {
        match self {
            FieldValue::Reference(pk) => Some(pk.as_str()),
            _ => None,
        }
    }

    /// Referenced pks of a single or many-valued reference.
    pub fn referenced_pks(&self) -> Vec<&str> {
        match self {
            FieldValue::Reference(pk) => vec![pk.as_str()],
            FieldValue::References(pks) => pks.iter().map(String::as_str).collect(),
            _ => Vec::new(),
        }
    }

    /// Plain-text rendering used by the text diff.
    pub fn display(&self) -> String {
        match self {
            FieldValue::Null => String::new(),
            FieldValue::Bool(b) => b.to_string(),
            FieldValue::Int(i) => i.to_string(),
            FieldValue::Float(f) => f.to_string(),
            FieldValue::Text(s) | FieldValue::Media(s) | FieldValue::Reference(s) => s.clone(),
            FieldValue::Date(d) => d.format("%Y-%m-%d").to_string(),
            FieldValue::DateTime(dt) => dt.to_rfc3339(),
            FieldValue::References(pks) => pks.iter().cloned().collect::<Vec<_>>().join(", "),
        }
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        FieldValue::Text(value.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        FieldValue::Text(value)
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        FieldValue::Int(value)
    }
}

impl From<bool> for FieldValue {
    fn from(value: bool) -> Self {
        FieldValue::Bool(value)
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Object Identity & State
// ═══════════════════════════════════════════════════════════════════════════

/// Object identity: type + stringified primary key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectRef {
    pub object_type: String,
    pub object_id: String,
}

impl ObjectRef {
    pub fn new(object_type: impl Into<String>, object_id: impl Into<String>) -> Self {
        Self {
            object_type: object_type.into(),
            object_id: object_id.into(),
        }
    }
}

impl fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.object_type, self.object_id)
    }
}

/// Live object state (or a transient instance rebuilt from a snapshot).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelInstance {
    pub object_type: String,
    pub pk: String,
    pub fields: FieldMap,
}

impl ModelInstance {
    pub fn new(object_type: impl Into<String>, pk: impl Into<String>) -> Self {
        Self {
            object_type: object_type.into(),
            pk: pk.into(),
            fields: FieldMap::new(),
        }
    }

    /// Builder-style field setter.
    pub fn with(mut self, name: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<FieldValue>) {
        self.fields.insert(name.into(), value.into());
    }

    /// Field value, `Null` when unset.
    pub fn get(&self, name: &str) -> &FieldValue {
        const NULL: FieldValue = FieldValue::Null;
        self.fields.get(name).unwrap_or(&NULL)
    }

    pub fn object_ref(&self) -> ObjectRef {
        ObjectRef::new(self.object_type.clone(), self.pk.clone())
    }

    /// Copy of this instance keeping only the named fields.
    pub fn restricted_to<'a, I>(&self, names: I) -> Self
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut fields = FieldMap::new();
        for name in names {
            if let Some(value) = self.fields.get(name) {
                fields.insert(name.to_string(), value.clone());
            }
        }
        Self {
            object_type: self.object_type.clone(),
            pk: self.pk.clone(),
            fields,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Revisions & Versions
// ═══════════════════════════════════════════════════════════════════════════

/// Atomic group of versions created together.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Revision {
    pub id: RevisionId,
    /// Grouping key of the manager that created this revision
    pub manager_slug: String,
    pub date_created: DateTime<Utc>,
    pub date_updated: DateTime<Utc>,
    /// Acting user, cleared when the user goes away
    pub user_id: Option<String>,
    pub comment: String,
}

/// Insert payload for a revision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewRevision {
    pub manager_slug: String,
    pub user_id: Option<String>,
    pub comment: String,
    pub date_created: DateTime<Utc>,
}

impl NewRevision {
    pub fn new(manager_slug: impl Into<String>) -> Self {
        Self {
            manager_slug: manager_slug.into(),
            user_id: None,
            comment: String::new(),
            date_created: Utc::now(),
        }
    }
}

/// Immutable snapshot of one object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Version {
    pub id: VersionId,
    pub revision_id: RevisionId,
    pub object_type: String,
    pub object_id: String,
    /// Integer shadow of `object_id` for numeric primary keys
    pub object_id_int: Option<i64>,
    pub format: String,
    pub serialized_data: Vec<u8>,
    /// Cached display string
    pub object_repr: String,
    pub status: ModerationStatus,
}

impl Version {
    pub fn object_ref(&self) -> ObjectRef {
        ObjectRef::new(self.object_type.clone(), self.object_id.clone())
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.object_repr)
    }
}

/// Insert payload for a version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewVersion {
    pub revision_id: RevisionId,
    pub object_type: String,
    pub object_id: String,
    pub object_id_int: Option<i64>,
    pub format: String,
    pub serialized_data: Vec<u8>,
    pub object_repr: String,
    pub status: ModerationStatus,
}

/// Version lookup filter.
///
/// Results are ordered by revision creation time, then revision update
/// time, then version id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionQuery {
    pub object_type: String,
    pub object_id: Option<String>,
    pub statuses: Option<Vec<ModerationStatus>>,
    pub manager_slug: Option<String>,
    pub order: HistoryOrder,
}

impl VersionQuery {
    /// All versions of one type.
    pub fn for_type(object_type: impl Into<String>) -> Self {
        Self {
            object_type: object_type.into(),
            object_id: None,
            statuses: None,
            manager_slug: None,
            order: HistoryOrder::Ascending,
        }
    }

    /// All versions of one object.
    pub fn for_object(object: &ObjectRef) -> Self {
        Self::for_type(object.object_type.clone()).object_id(object.object_id.clone())
    }

    pub fn object_id(mut self, object_id: impl Into<String>) -> Self {
        self.object_id = Some(object_id.into());
        self
    }

    pub fn statuses(mut self, statuses: &[ModerationStatus]) -> Self {
        self.statuses = Some(statuses.to_vec());
        self
    }

    pub fn manager_slug(mut self, slug: impl Into<String>) -> Self {
        self.manager_slug = Some(slug.into());
        self
    }

    pub fn order(mut self, order: HistoryOrder) -> Self {
        self.order = order;
        self
    }

    /// Whether a version row satisfies the filter (ordering aside).
    pub fn matches(&self, version: &Version, revision: &Revision) -> bool {
        version.object_type == self.object_type
            && self
                .object_id
                .as_ref()
                .map_or(true, |id| &version.object_id == id)
            && self
                .statuses
                .as_ref()
                .map_or(true, |statuses| statuses.contains(&version.status))
            && self
                .manager_slug
                .as_ref()
                .map_or(true, |slug| &revision.manager_slug == slug)
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════

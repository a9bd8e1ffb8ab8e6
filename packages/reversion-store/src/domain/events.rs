//! Audit events emitted by the revision manager
//!
//! Delivery is best-effort: a failing sink is logged and never rolls back
//! the operation that produced the event.

use serde::{Deserialize, Serialize};

use super::models::{FieldMap, ModelInstance, RevisionId, Version};

/// Event payloads
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum VersioningEvent {
    /// A tracked write produced a revision
    RevisionCommitted {
        revision_id: RevisionId,
        manager_slug: String,
        versions: Vec<Version>,
    },
    /// A version was promoted and applied
    Approved {
        version: Version,
        /// Field values of the previously approved version, if any
        before: Option<FieldMap>,
        /// Field values of the approved version
        after: FieldMap,
        /// Live object after the revert
        instance: Option<ModelInstance>,
    },
    /// A version was discarded
    Rejected {
        version: Version,
        before: Option<FieldMap>,
        /// Whether the live object was removed with it
        object_deleted: bool,
    },
}

impl VersioningEvent {
    pub fn name(&self) -> &'static str {
        match self {
            VersioningEvent::RevisionCommitted { .. } => "revision_committed",
            VersioningEvent::Approved { .. } => "approved",
            VersioningEvent::Rejected { .. } => "rejected",
        }
    }
}

/// Boxed sink failure
pub type SinkError = Box<dyn std::error::Error + Send + Sync>;

/// Notification sink port
pub trait EventSink: Send + Sync {
    fn emit(&self, event: &VersioningEvent) -> std::result::Result<(), SinkError>;
}

/// Deliver an event, logging and swallowing sink failures
pub fn notify(sink: &dyn EventSink, event: &VersioningEvent) {
    if let Err(err) = sink.emit(event) {
        tracing::warn!(event = event.name(), error = %err, "Event sink failed");
    }
}

//! Built-in event sinks

use crate::domain::{EventSink, SinkError, VersioningEvent};

/// Drops every event
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopSink;

impl EventSink for NoopSink {
    fn emit(&self, _event: &VersioningEvent) -> Result<(), SinkError> {
        Ok(())
    }
}

/// Logs every event at info level
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn emit(&self, event: &VersioningEvent) -> Result<(), SinkError> {
        match event {
            VersioningEvent::RevisionCommitted {
                revision_id,
                manager_slug,
                versions,
            } => tracing::info!(
                event = event.name(),
                revision_id,
                manager_slug = manager_slug.as_str(),
                versions = versions.len(),
                "Revision committed"
            ),
            VersioningEvent::Approved {
                version, before, ..
            } => tracing::info!(
                event = event.name(),
                version_id = version.id,
                object_type = version.object_type.as_str(),
                object_id = version.object_id.as_str(),
                had_previous = before.is_some(),
                "Version approved"
            ),
            VersioningEvent::Rejected {
                version,
                object_deleted,
                ..
            } => tracing::info!(
                event = event.name(),
                version_id = version.id,
                object_type = version.object_type.as_str(),
                object_id = version.object_id.as_str(),
                object_deleted,
                "Version rejected"
            ),
        }
        Ok(())
    }
}

//! Moderation State Machine
//!
//! ```text
//!            approve
//! PENDING ───────────→ APPROVED
//!    │
//!    │ reject
//!    ↓
//! REJECTED (row deleted)
//! ```
//!
//! Nothing re-enters PENDING. Each transition runs in one savepoint and
//! either completes fully or leaves the version untouched. Audit events
//! go out after the savepoint is released; a failing sink never undoes a
//! transition.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::revert::{RevertEngine, RevertReport};
use crate::api::SnapshotStore;
use crate::domain::{
    atomic, notify, EventSink, FieldMap, FieldValue, ModelInstance, ModerationStatus, ObjectRef,
    Version, VersionId, VersioningEvent,
};
use crate::error::{ReversionError, Result};

/// Result of `approve`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovalOutcome {
    /// The approved version, status updated
    pub version: Version,
    /// Field values of the previously approved version
    pub before: Option<FieldMap>,
    /// Field values of the approved version
    pub after: FieldMap,
    /// Live object after the revert
    pub instance: Option<ModelInstance>,
    /// Versions deleted by retention cleanup
    pub removed: Vec<VersionId>,
}

/// Result of `reject`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RejectionOutcome {
    pub version: Version,
    pub before: Option<FieldMap>,
    /// Whether the live object was deleted along with the version
    pub object_deleted: bool,
}

/// Approve/reject workflow over one snapshot store
#[derive(Clone)]
pub struct Moderator {
    snapshots: SnapshotStore,
    engine: RevertEngine,
    sink: Arc<dyn EventSink>,
}

impl Moderator {
    pub fn new(snapshots: SnapshotStore, engine: RevertEngine, sink: Arc<dyn EventSink>) -> Self {
        Self {
            snapshots,
            engine,
            sink,
        }
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // Transitions
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    /// Transition: PENDING → APPROVED
    ///
    /// Applies the version to the live object, then drops the object's
    /// other pending/rejected versions and, when more than one
    /// approved/rejected version remains, the oldest of those. Re-approving
    /// an APPROVED version re-applies it.
    pub fn approve(&self, version_id: VersionId) -> Result<ApprovalOutcome> {
        let mut version = self.snapshots.get_version(version_id)?;
        if version.status == ModerationStatus::Rejected {
            return Err(ReversionError::invalid_transition(
                version.status,
                ModerationStatus::Approved,
            ));
        }

        let object = version.object_ref();
        let before = self.approved_baseline(&object, Some(version.id))?;
        let after = self.snapshots.field_dict(&version)?;
        let backend = self.snapshots.backend();

        let (instance, removed) = atomic(backend, || {
            if version.status != ModerationStatus::Approved {
                backend.update_version_status(version.id, ModerationStatus::Approved)?;
            }
            let approved = Version {
                status: ModerationStatus::Approved,
                ..version.clone()
            };
            self.engine.revert(std::slice::from_ref(&approved), false)?;

            let mut removed = self.remove_old_pendings(&approved)?;
            removed.extend(self.remove_old_approves(&approved)?);
            Ok((backend.get(&object)?, removed))
        })?;
        version.status = ModerationStatus::Approved;

        tracing::info!(
            version_id,
            object = %object,
            removed = removed.len(),
            "Version approved"
        );

        notify(
            self.sink.as_ref(),
            &VersioningEvent::Approved {
                version: version.clone(),
                before: before.clone(),
                after: after.clone(),
                instance: instance.clone(),
            },
        );

        Ok(ApprovalOutcome {
            version,
            before,
            after,
            instance,
            removed,
        })
    }

    /// Transition: PENDING → REJECTED
    ///
    /// The version is deleted. When the object has no approved version the
    /// live object is deleted too, along with its parent rows. Only PENDING
    /// versions can be rejected.
    pub fn reject(&self, version_id: VersionId) -> Result<RejectionOutcome> {
        let version = self.snapshots.get_version(version_id)?;
        if version.status != ModerationStatus::Pending {
            return Err(ReversionError::invalid_transition(
                version.status,
                ModerationStatus::Rejected,
            ));
        }
        let object = version.object_ref();
        let before = self.approved_baseline(&object, None)?;
        let backend = self.snapshots.backend();

        let object_deleted = atomic(backend, || {
            let approved = self
                .snapshots
                .versions_with_status(&object, &[ModerationStatus::Approved])?
                .len();
            let mut deleted = false;
            if approved == 0 {
                if let Some(live) = backend.get(&object)? {
                    self.delete_with_parents(live)?;
                    deleted = true;
                }
            }
            backend.delete_version(version.id)?;
            Ok(deleted)
        })?;

        tracing::info!(
            version_id,
            object = %object,
            object_deleted,
            "Version rejected"
        );

        let version = Version {
            status: ModerationStatus::Rejected,
            ..version
        };
        notify(
            self.sink.as_ref(),
            &VersioningEvent::Rejected {
                version: version.clone(),
                before: before.clone(),
                object_deleted,
            },
        );

        Ok(RejectionOutcome {
            version,
            before,
            object_deleted,
        })
    }

    /// Delete a live object, then each parent row of its inheritance chain
    fn delete_with_parents(&self, live: ModelInstance) -> Result<()> {
        let backend = self.snapshots.backend();
        let mut current = Some(live);
        while let Some(instance) = current.take() {
            backend.delete(&instance.object_ref())?;
            let schema = backend.catalog().schema(&instance.object_type)?;
            if let Some(link) = &schema.parent {
                let parent_id = instance
                    .get(&link.field)
                    .as_reference()
                    .unwrap_or(instance.pk.as_str())
                    .to_string();
                current = backend.get(&ObjectRef::new(link.parent_type.clone(), parent_id))?;
            }
        }
        Ok(())
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // Retention
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    /// Delete the object's PENDING and REJECTED versions other than `keep`
    fn remove_old_pendings(&self, keep: &Version) -> Result<Vec<VersionId>> {
        let stale: Vec<VersionId> = self
            .snapshots
            .versions_with_status(
                &keep.object_ref(),
                &[ModerationStatus::Pending, ModerationStatus::Rejected],
            )?
            .into_iter()
            .map(|v| v.id)
            .filter(|id| *id != keep.id)
            .collect();
        for id in &stale {
            self.snapshots.backend().delete_version(*id)?;
        }
        Ok(stale)
    }

    /// With more than one APPROVED/REJECTED version left, delete the oldest other than `keep`
    fn remove_old_approves(&self, keep: &Version) -> Result<Option<VersionId>> {
        let settled = self.snapshots.versions_with_status(
            &keep.object_ref(),
            &[ModerationStatus::Approved, ModerationStatus::Rejected],
        )?;
        if settled.len() <= 1 {
            return Ok(None);
        }
        let Some(oldest) = settled.iter().find(|v| v.id != keep.id) else {
            return Ok(None);
        };
        self.snapshots.backend().delete_version(oldest.id)?;
        Ok(Some(oldest.id))
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // Reads
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    /// Field values of the newest approved version, skipping `exclude`
    fn approved_baseline(
        &self,
        object: &ObjectRef,
        exclude: Option<VersionId>,
    ) -> Result<Option<FieldMap>> {
        let current = self
            .snapshots
            .versions_with_status(object, &[ModerationStatus::Approved])?
            .into_iter()
            .rev()
            .find(|v| Some(v.id) != exclude);
        current
            .map(|version| self.snapshots.field_dict(&version))
            .transpose()
    }

    /// The approved version of an object, if any
    pub fn current_approved(&self, object_type: &str, object_id: &str) -> Result<Option<Version>> {
        let object = ObjectRef::new(object_type, object_id);
        Ok(self
            .snapshots
            .versions_with_status(&object, &[ModerationStatus::Approved])?
            .pop())
    }

    /// Live objects whose status field reads APPROVED
    ///
    /// Types registered without a status field have none.
    pub fn list_approved(&self, object_type: &str) -> Result<Vec<ModelInstance>> {
        let registration = self.snapshots.registry().registration(object_type)?;
        let Some(status_field) = &registration.status_field else {
            return Ok(Vec::new());
        };
        let approved = FieldValue::Int(ModerationStatus::Approved.code());
        Ok(self
            .snapshots
            .backend()
            .list(object_type)?
            .into_iter()
            .filter(|instance| instance.get(status_field) == &approved)
            .collect())
    }

    /// Revert each object to its newest approved version
    ///
    /// Objects with no approved version are skipped.
    pub fn revert_to_approved(&self, versions: &[Version]) -> Result<RevertReport> {
        let mut targets = Vec::new();
        for version in versions {
            if let Some(approved) =
                self.current_approved(&version.object_type, &version.object_id)?
            {
                if !targets.iter().any(|t: &Version| t.id == approved.id) {
                    targets.push(approved);
                }
            }
        }
        self.engine.revert(&targets, false)
    }
}

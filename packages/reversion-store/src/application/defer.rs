//! Denormalized moderation status
//!
//! After any revert, a live object with at least one APPROVED version gets
//! its own status field set to APPROVED, so read paths can filter live
//! objects without joining version history.

use crate::api::SnapshotStore;
use crate::domain::{FieldMap, FieldValue, ModerationStatus, Version};
use crate::error::Result;

/// Mark the live object of `version` APPROVED when it has an approved version
///
/// `approved_count` skips the count query when the caller already knows it.
/// Returns whether the status field was written. Types registered without a
/// status field are left alone.
pub fn defer(
    snapshots: &SnapshotStore,
    version: &Version,
    approved_count: Option<usize>,
) -> Result<bool> {
    let registration = snapshots.registry().registration(&version.object_type)?;
    let Some(status_field) = &registration.status_field else {
        return Ok(false);
    };

    let object = version.object_ref();
    let approved = match approved_count {
        Some(count) => count,
        None => snapshots
            .versions_with_status(&object, &[ModerationStatus::Approved])?
            .len(),
    };
    if approved == 0 {
        return Ok(false);
    }

    let mut fields = FieldMap::new();
    fields.insert(
        status_field.clone(),
        FieldValue::Int(ModerationStatus::Approved.code()),
    );
    snapshots.backend().update_fields(&object, &fields)?;

    tracing::debug!(
        object = %object,
        approved,
        "Marked live object approved"
    );
    Ok(true)
}

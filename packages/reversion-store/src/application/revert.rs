//! Revert Engine
//!
//! Restores live objects to the state stored in a set of versions.
//!
//! # Safe revert
//!
//! Inter-object references make apply order matter: a book cannot be
//! restored before its author exists. Rather than sorting by dependency,
//! every version is attempted inside its own savepoint and those that hit
//! a recoverable error (integrity conflict, vanished object) are retried in
//! the next round:
//!
//! ```text
//! round 1: [book, author]  → author ok, book conflict
//! round 2: [book]          → book ok
//! ```
//!
//! A round where nothing succeeds aborts with `ErrorKind::Revert`. Any
//! other error aborts immediately.
//!
//! # Cascade delete
//!
//! With `delete = true` the live graph reachable through registered follow
//! relations is captured before applying; afterwards every reachable
//! object absent from the versions is deleted, with the same retry rounds.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use super::defer::defer;
use crate::api::SnapshotStore;
use crate::domain::{atomic, ObjectRef, RevisionId, Transactional, Version};
use crate::error::{ErrorKind, ReversionError, Result};

/// Summary of one revert call
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevertReport {
    /// Retry rounds used by the apply phase
    pub rounds: usize,
    /// Versions applied
    pub reverted: usize,
    /// Objects removed by cascade delete
    pub deleted: Vec<ObjectRef>,
}

/// Outcome of a fixpoint run: rounds used and the value of every success
struct Fixpoint<R> {
    rounds: usize,
    results: Vec<R>,
}

/// Apply `apply` to every item, retrying recoverable failures until a round makes no progress
///
/// Each attempt runs in its own savepoint, so a failure rolls back only
/// that item.
fn until_fixpoint<B, T, R, F>(db: &B, items: Vec<T>, what: &str, mut apply: F) -> Result<Fixpoint<R>>
where
    B: Transactional + ?Sized,
    T: std::fmt::Display,
    F: FnMut(&T) -> Result<R>,
{
    let mut pending = items;
    let mut rounds = 0;
    let mut results = Vec::with_capacity(pending.len());

    while !pending.is_empty() {
        rounds += 1;
        let attempted = pending.len();
        let mut retry = Vec::new();
        let mut last_error = None;

        for item in pending {
            match atomic(db, || apply(&item)) {
                Ok(result) => results.push(result),
                Err(err) if err.is_recoverable() => {
                    tracing::debug!(round = rounds, item = %item, error = %err, "Deferred to next round");
                    last_error = Some(err);
                    retry.push(item);
                }
                Err(err) => return Err(err),
            }
        }

        if retry.len() == attempted {
            let cause = last_error
                .map(|err| err.message)
                .unwrap_or_default();
            return Err(ReversionError::revert(format!(
                "Could not {} {} object(s) after {} round(s), no progress: {}",
                what, attempted, rounds, cause
            )));
        }
        pending = retry;
    }

    Ok(Fixpoint { rounds, results })
}

/// Revert engine over one snapshot store
#[derive(Clone)]
pub struct RevertEngine {
    snapshots: SnapshotStore,
}

impl RevertEngine {
    pub fn new(snapshots: SnapshotStore) -> Self {
        Self { snapshots }
    }

    /// Restore the live objects of `versions`
    ///
    /// With `delete`, objects reachable from the targets through follow
    /// relations but absent from `versions` are deleted afterwards.
    pub fn revert(&self, versions: &[Version], delete: bool) -> Result<RevertReport> {
        if versions.is_empty() {
            return Ok(RevertReport::default());
        }

        let doomed = if delete {
            self.cascade_candidates(versions)?
        } else {
            Vec::new()
        };

        let db = self.snapshots.backend();
        let applied = until_fixpoint(db, versions.to_vec(), "revert", |version| {
            self.revert_version(version)
        })?;

        let mut report = RevertReport {
            rounds: applied.rounds,
            reverted: applied.results.len(),
            deleted: Vec::new(),
        };

        if !doomed.is_empty() {
            let removed = until_fixpoint(db, doomed, "delete", |object| {
                match db.delete(object) {
                    Ok(()) => Ok(Some(object.clone())),
                    // Already gone counts as deleted.
                    Err(err) if err.kind == ErrorKind::NotFound => Ok(None),
                    Err(err) => Err(err),
                }
            })?;
            report.deleted = removed.results.into_iter().flatten().collect();
        }

        tracing::debug!(
            versions = versions.len(),
            rounds = report.rounds,
            deleted = report.deleted.len(),
            "Revert complete"
        );
        Ok(report)
    }

    /// Revert every version of a revision
    pub fn revert_revision(&self, revision_id: RevisionId, delete: bool) -> Result<RevertReport> {
        self.snapshots.get_revision(revision_id)?;
        let versions = self.snapshots.versions_for_revision(revision_id)?;
        self.revert(&versions, delete)
    }

    /// Apply one version to its live object
    ///
    /// Saves the registration's trackable fields only, then refreshes the
    /// object's denormalized moderation status. Runs in the caller's scope.
    pub fn revert_version(&self, version: &Version) -> Result<()> {
        let registration = self.snapshots.registry().registration(&version.object_type)?;
        let instance = self.snapshots.deserialize(version)?;
        self.snapshots
            .backend()
            .save(&instance, Some(registration.fields.as_slice()))?;
        defer(&self.snapshots, version, None)?;
        Ok(())
    }

    /// Live objects reachable from the targets that the versions do not restore
    fn cascade_candidates(&self, versions: &[Version]) -> Result<Vec<ObjectRef>> {
        let objects = self.snapshots.backend();
        let targets: BTreeSet<ObjectRef> = versions.iter().map(Version::object_ref).collect();

        let mut roots = Vec::new();
        for target in &targets {
            if let Some(live) = objects.get(target)? {
                roots.push(live);
            }
        }

        Ok(self
            .snapshots
            .follow_relationships(roots)?
            .into_iter()
            .map(|instance| instance.object_ref())
            .filter(|object| !targets.contains(object))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    use crate::domain::SavepointId;

    #[derive(Default)]
    struct CountingTx {
        rollbacks: Mutex<usize>,
    }

    impl Transactional for CountingTx {
        fn supports_savepoints(&self) -> bool {
            true
        }

        fn begin(&self) -> Result<SavepointId> {
            Ok(1)
        }

        fn commit(&self, _savepoint: SavepointId) -> Result<()> {
            Ok(())
        }

        fn rollback(&self, _savepoint: SavepointId) -> Result<()> {
            *self.rollbacks.lock() += 1;
            Ok(())
        }
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Fixpoint Loop Tests
    // ═══════════════════════════════════════════════════════════════════════

    #[test]
    fn test_fixpoint_resolves_chain_in_order() {
        // Item n may only succeed once item n+1 has.
        let tx = CountingTx::default();
        let done = Mutex::new(BTreeSet::new());
        let result = until_fixpoint(&tx, vec![1, 2, 3, 4], "apply", |item| {
            let mut done = done.lock();
            if *item == 4 || done.contains(&(item + 1)) {
                done.insert(*item);
                Ok(*item)
            } else {
                Err(ReversionError::integrity_conflict("dependency missing"))
            }
        })
        .unwrap();

        assert_eq!(result.rounds, 4);
        assert_eq!(result.results, vec![4, 3, 2, 1]);
        assert_eq!(*tx.rollbacks.lock(), 3 + 2 + 1);
    }

    #[test]
    fn test_fixpoint_aborts_without_progress() {
        let tx = CountingTx::default();
        let mut calls = 0;
        let err = until_fixpoint(&tx, vec!["a", "b"], "revert", |_| -> Result<()> {
            calls += 1;
            Err(ReversionError::integrity_conflict("cycle"))
        })
        .err()
        .unwrap();

        assert_eq!(err.kind, ErrorKind::Revert);
        assert!(err.message.contains("after 1 round"));
        assert_eq!(calls, 2);
    }

    #[test]
    fn test_fixpoint_propagates_fatal_errors() {
        let tx = CountingTx::default();
        let err = until_fixpoint(&tx, vec![1, 2], "revert", |item| {
            if *item == 1 {
                Err(ReversionError::serialization("corrupt payload"))
            } else {
                Ok(())
            }
        })
        .err()
        .unwrap();

        assert_eq!(err.kind, ErrorKind::Serialization);
        assert_eq!(*tx.rollbacks.lock(), 1);
    }

    #[test]
    fn test_fixpoint_empty_input() {
        let tx = CountingTx::default();
        let result = until_fixpoint(&tx, Vec::<u8>::new(), "revert", |_| Ok(())).unwrap();
        assert_eq!(result.rounds, 0);
        assert!(result.results.is_empty());
    }
}

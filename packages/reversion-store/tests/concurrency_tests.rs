//! Scopes opened on different threads

mod common;

use std::sync::{mpsc, Arc};
use std::thread;
use std::time::Duration;

use common::{author, Fixture, RecordingSink};
use pretty_assertions::assert_eq;
use reversion_store::{Backend, InMemoryBackend, ModerationStatus};

/// Thread A holds a scope and rolls it back while thread B approves an
/// unrelated object; B's approval must survive A's rollback.
fn approval_survives_foreign_rollback(backend: Arc<dyn Backend>) {
    let fx = Fixture::over(backend, RecordingSink::default());
    let bystander = fx.edit(author("2", "Bystander"));

    let (opened_tx, opened_rx) = mpsc::channel();
    let (finish_tx, finish_rx) = mpsc::channel::<()>();
    let holder = {
        let backend = Arc::clone(&fx.backend);
        thread::spawn(move || {
            let savepoint = backend.begin().unwrap();
            backend.save(&author("1", "Scratch"), None).unwrap();
            opened_tx.send(()).unwrap();
            finish_rx.recv().unwrap();
            backend.rollback(savepoint).unwrap();
        })
    };
    opened_rx.recv().unwrap();

    let approver = {
        let manager = fx.manager.clone();
        let version_id = bystander.id;
        thread::spawn(move || manager.approve(version_id).unwrap())
    };

    // Give the approval every chance to run inside the open scope.
    thread::sleep(Duration::from_millis(50));
    finish_tx.send(()).unwrap();
    holder.join().unwrap();
    let outcome = approver.join().unwrap();

    assert_eq!(outcome.version.status, ModerationStatus::Approved);
    assert_eq!(
        fx.manager.get_version(bystander.id).unwrap().status,
        ModerationStatus::Approved
    );
    assert!(fx.live("author", "1").is_none());
    assert!(fx.live("author", "2").is_some());
}

#[test]
fn test_memory_scopes_are_isolated_across_threads() {
    approval_survives_foreign_rollback(Arc::new(InMemoryBackend::new(common::catalog())));
}

#[cfg(feature = "sqlite")]
#[test]
fn test_sqlite_scopes_are_isolated_across_threads() {
    let backend = reversion_store::SqliteBackend::in_memory(common::catalog()).unwrap();
    approval_survives_foreign_rollback(Arc::new(backend));
}

#[test]
fn test_concurrent_approvals_on_distinct_objects() {
    let fx = Fixture::new();
    let versions: Vec<_> = (1..=8)
        .map(|pk| fx.edit(author(&pk.to_string(), &format!("Author {}", pk))))
        .collect();

    let handles: Vec<_> = versions
        .iter()
        .map(|version| {
            let manager = fx.manager.clone();
            let version_id = version.id;
            thread::spawn(move || manager.approve(version_id).unwrap())
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    for version in &versions {
        assert_eq!(
            fx.manager.get_version(version.id).unwrap().status,
            ModerationStatus::Approved
        );
    }
    assert_eq!(fx.manager.list_approved("author").unwrap().len(), 8);
}

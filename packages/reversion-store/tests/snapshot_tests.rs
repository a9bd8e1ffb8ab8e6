//! Recording and reading history

mod common;

use std::sync::Arc;

use common::{author, Fixture};
use pretty_assertions::assert_eq;
use reversion_store::{
    FieldValue, HistoryOrder, ObjectRef, RegistrationOptions, ReversionConfig, RevisionManager,
};

fn manager_with(fx: &Fixture, config: ReversionConfig) -> RevisionManager {
    let manager = RevisionManager::builder(Arc::clone(&fx.backend))
        .config(config)
        .build()
        .unwrap();
    manager
        .register("author", RegistrationOptions::new())
        .unwrap();
    manager
}

#[test]
fn test_list_deleted_returns_latest_version_of_missing_objects() {
    let fx = Fixture::new();
    fx.edit(author("1", "Kept"));
    fx.edit(author("2", "First draft"));
    let latest = fx.edit(author("2", "Second draft"));
    fx.backend.delete(&ObjectRef::new("author", "2")).unwrap();

    let deleted = fx.manager.list_deleted("author").unwrap();
    assert_eq!(deleted.len(), 1);
    assert_eq!(deleted[0].id, latest.id);
}

#[test]
fn test_history_order_follows_configuration() {
    let fx = Fixture::new();
    let drafts = manager_with(
        &fx,
        ReversionConfig::default()
            .with_manager_slug("drafts")
            .with_history_order(HistoryOrder::Descending),
    );
    let mut ids = Vec::new();
    for name in ["a", "b", "c"] {
        fx.save(&author("1", name));
        let (_, versions) = drafts
            .revision()
            .add(author("1", name))
            .commit()
            .unwrap()
            .unwrap();
        ids.push(versions[0].id);
    }
    ids.reverse();

    let history: Vec<_> = drafts
        .get_versions_for_object("author", "1")
        .unwrap()
        .into_iter()
        .map(|v| v.id)
        .collect();
    assert_eq!(history, ids);

    // The default manager shares the backend but not the history.
    assert!(fx
        .manager
        .get_versions_for_object("author", "1")
        .unwrap()
        .is_empty());
}

#[test]
fn test_unchanged_payload_is_skipped_when_ignoring_duplicates() {
    let fx = Fixture::new();
    let manager = manager_with(
        &fx,
        ReversionConfig::default().with_ignore_duplicates(true),
    );
    fx.save(&author("1", "Same"));

    assert!(manager.revision().add(author("1", "Same")).commit().unwrap().is_some());
    assert!(manager.revision().add(author("1", "Same")).commit().unwrap().is_none());
    assert!(manager
        .revision()
        .add(author("1", "Changed"))
        .commit()
        .unwrap()
        .is_some());
}

#[test]
fn test_msgpack_versions_restore_like_json() {
    let fx = Fixture::new();
    let manager = manager_with(
        &fx,
        ReversionConfig::default()
            .with_manager_slug("packed")
            .with_default_format("msgpack"),
    );
    fx.save(&author("1", "Packed"));
    let (revision, versions) = manager
        .revision()
        .comment("initial import")
        .add(author("1", "Packed"))
        .commit()
        .unwrap()
        .unwrap();
    assert_eq!(versions[0].format, "msgpack");
    assert_eq!(revision.comment, "initial import");

    fx.save(&author("1", "Overwritten"));
    manager.revert(&versions, false).unwrap();
    assert_eq!(fx.live_field("author", "1", "name"), FieldValue::text("Packed"));
}

#[test]
fn test_add_version_with_format_override() {
    let fx = Fixture::new();
    let store = fx.manager.snapshots();
    let revision = store.create_revision("default", Some("editor"), "manual").unwrap();
    let version = store
        .add_version(&revision, &author("9", "Manual"), Some("msgpack"))
        .unwrap();

    assert_eq!(version.format, "msgpack");
    assert_eq!(version.object_id_int, Some(9));
    assert_eq!(version.object_repr, "Manual");
    assert_eq!(
        store.field_dict(&version).unwrap().get("name"),
        Some(&FieldValue::text("Manual"))
    );
    assert_eq!(
        fx.manager.describe_revision(revision.id).unwrap(),
        "Manual"
    );
}

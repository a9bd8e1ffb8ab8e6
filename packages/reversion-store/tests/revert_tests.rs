//! Safe revert and cascade delete

mod common;

use common::{author, book, Fixture};
use pretty_assertions::assert_eq;
use reversion_store::domain::NewVersion;
use reversion_store::{ErrorKind, FieldValue, ModelInstance, ModerationStatus, ObjectRef};

fn node(pk: &str, next: Option<&str>) -> ModelInstance {
    let instance = ModelInstance::new("node", pk).with("label", format!("node {}", pk));
    match next {
        Some(next) => instance.with("next", FieldValue::reference(next)),
        None => instance,
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Convergence
// ═══════════════════════════════════════════════════════════════════════════

#[test]
fn test_revert_resolves_dependency_order() {
    let fx = Fixture::new();
    fx.save(&author("1", "Frank"));
    fx.save(&book("1", "Dune", "1"));
    fx.save(&book("2", "Children of Dune", "1"));

    // book 1 is tracked ahead of its author; the author pulls in book 2.
    let versions = fx.track(vec![book("1", "Dune", "1"), author("1", "Frank")]);
    let order: Vec<String> = versions.iter().map(|v| v.object_ref().to_string()).collect();
    assert_eq!(order, vec!["book:1", "author:1", "book:2"]);

    for object in ["book:1", "book:2", "author:1"] {
        let (object_type, pk) = object.split_once(':').unwrap();
        fx.backend.delete(&ObjectRef::new(object_type, pk)).unwrap();
    }

    let report = fx.manager.revert(&versions, false).unwrap();
    assert_eq!(report.reverted, 3);
    assert_eq!(report.rounds, 2);
    assert!(report.deleted.is_empty());
    assert_eq!(fx.live_field("book", "2", "title"), FieldValue::text("Children of Dune"));
}

#[test]
fn test_chain_converges_within_n_rounds() {
    let fx = Fixture::new();
    // 1 → 2 → 3 → 4, tracked head first: each round restores one node.
    let versions = fx.track(vec![
        node("1", Some("2")),
        node("2", Some("3")),
        node("3", Some("4")),
        node("4", None),
    ]);

    let report = fx.manager.revert(&versions, false).unwrap();
    assert_eq!(report.rounds, 4);
    assert_eq!(report.reverted, 4);
    for pk in ["1", "2", "3", "4"] {
        assert!(fx.live("node", pk).is_some());
    }
}

#[test]
fn test_independent_versions_take_one_round() {
    let fx = Fixture::new();
    let versions = fx.track(vec![node("1", None), node("2", None), node("3", None)]);

    let report = fx.manager.revert(&versions, false).unwrap();
    assert_eq!(report.rounds, 1);
    assert_eq!(report.reverted, 3);
}

#[test]
fn test_empty_input_is_a_no_op() {
    let fx = Fixture::new();
    let report = fx.manager.revert(&[], true).unwrap();
    assert_eq!(report.rounds, 0);
    assert_eq!(report.reverted, 0);
}

// ═══════════════════════════════════════════════════════════════════════════
// Failure
// ═══════════════════════════════════════════════════════════════════════════

#[test]
fn test_reference_cycle_raises_revert_error() {
    let fx = Fixture::new();
    let versions = fx.track(vec![
        ModelInstance::new("egg", "1").with("chicken", FieldValue::reference("1")),
        ModelInstance::new("chicken", "1").with("egg", FieldValue::reference("1")),
    ]);
    assert_eq!(versions.len(), 2);

    let err = fx.manager.revert(&versions, false).unwrap_err();
    assert_eq!(err.kind, ErrorKind::Revert);
    assert!(err.message.contains("after 1 round"));
    assert!(fx.live("egg", "1").is_none());
    assert!(fx.live("chicken", "1").is_none());
}

#[test]
fn test_fatal_error_aborts_immediately() {
    let fx = Fixture::new();
    let good = fx.track(vec![node("1", None)]).remove(0);
    let corrupt = fx
        .backend
        .insert_version(&NewVersion {
            revision_id: good.revision_id,
            object_type: "node".into(),
            object_id: "2".into(),
            object_id_int: Some(2),
            format: "json".into(),
            serialized_data: b"{not json".to_vec(),
            object_repr: "node object (2)".into(),
            status: ModerationStatus::Pending,
        })
        .unwrap();

    let err = fx.manager.revert(&[corrupt, good], false).unwrap_err();
    assert_eq!(err.kind, ErrorKind::Serialization);
    assert!(fx.live("node", "1").is_none());
}

#[test]
fn test_unregistered_type_is_a_configuration_error() {
    let fx = Fixture::new();
    let version = fx.track(vec![node("1", None)]).remove(0);
    fx.manager.snapshots().registry().unregister("node").unwrap();

    let err = fx.manager.revert(&[version], false).unwrap_err();
    assert_eq!(err.kind, ErrorKind::Configuration);
}

// ═══════════════════════════════════════════════════════════════════════════
// Cascade delete
// ═══════════════════════════════════════════════════════════════════════════

#[test]
fn test_revision_revert_with_delete_removes_new_dependents() {
    let fx = Fixture::new();
    let v1 = fx.edit(author("1", "Gene"));
    fx.save(&author("1", "Gene Wolfe"));
    fx.save(&book("1", "Shadow of the Torturer", "1"));

    let report = fx.manager.revert_revision(v1.revision_id, true).unwrap();
    assert_eq!(report.reverted, 1);
    assert_eq!(report.deleted, vec![ObjectRef::new("book", "1")]);
    assert!(fx.live("book", "1").is_none());
    assert_eq!(fx.live_field("author", "1", "name"), FieldValue::text("Gene"));
}

#[test]
fn test_revision_revert_without_delete_keeps_dependents() {
    let fx = Fixture::new();
    let v1 = fx.edit(author("1", "Gene"));
    fx.save(&book("1", "Shadow of the Torturer", "1"));

    let report = fx.manager.revert_revision(v1.revision_id, false).unwrap();
    assert!(report.deleted.is_empty());
    assert!(fx.live("book", "1").is_some());
}

#[test]
fn test_cascade_keeps_objects_in_the_revision() {
    let fx = Fixture::new();
    fx.save(&author("1", "Le Guin"));
    let versions = fx.track(vec![
        author("1", "Le Guin"),
        book("1", "The Dispossessed", "1"),
    ]);
    fx.save(&book("1", "The Dispossessed", "1"));
    fx.save(&book("2", "Lavinia", "1"));

    let report = fx.manager.revert(&versions, true).unwrap();
    assert_eq!(report.deleted, vec![ObjectRef::new("book", "2")]);
    assert!(fx.live("book", "1").is_some());
}

#[test]
fn test_missing_revision_is_not_found() {
    let fx = Fixture::new();
    let err = fx.manager.revert_revision(404, true).unwrap_err();
    assert_eq!(err.kind, ErrorKind::NotFound);
}

// ═══════════════════════════════════════════════════════════════════════════
// Parents & approved history
// ═══════════════════════════════════════════════════════════════════════════

#[test]
fn test_revision_restores_parent_rows() {
    let fx = Fixture::new();
    let place = ModelInstance::new("place", "1")
        .with("name", "Pizzeria Uno")
        .with("address", "1 Main St");
    let restaurant = ModelInstance::new("restaurant", "1")
        .with("place_ptr", FieldValue::reference("1"))
        .with("serves_pizza", true);
    fx.save(&place);
    fx.save(&restaurant);

    let versions = fx.track(vec![restaurant.clone()]);
    assert_eq!(versions.len(), 2);

    fx.save(&place.clone().with("name", "Burger Barn"));
    fx.save(&restaurant.with("serves_pizza", false));

    let revision_id = versions[0].revision_id;
    fx.manager.revert_revision(revision_id, false).unwrap();
    assert_eq!(fx.live_field("place", "1", "name"), FieldValue::text("Pizzeria Uno"));
    assert_eq!(
        fx.live_field("restaurant", "1", "serves_pizza"),
        FieldValue::Bool(true)
    );
    assert_eq!(
        fx.manager.describe_revision(revision_id).unwrap(),
        "restaurant object (1), Pizzeria Uno"
    );
}

#[test]
fn test_revert_to_approved_discards_pending_edits() {
    let fx = Fixture::new();
    let v1 = fx.edit(author("1", "Approved"));
    fx.manager.approve(v1.id).unwrap();
    let v2 = fx.edit(author("1", "Pending edit"));
    let unmoderated = fx.edit(author("2", "Never approved"));

    let report = fx
        .manager
        .revert_to_approved(&[v2.clone(), unmoderated])
        .unwrap();
    assert_eq!(report.reverted, 1);
    assert_eq!(fx.live_field("author", "1", "name"), FieldValue::text("Approved"));
    assert_eq!(
        fx.manager.get_version(v2.id).unwrap().status,
        ModerationStatus::Pending
    );
    assert_eq!(
        fx.live_field("author", "2", "name"),
        FieldValue::text("Never approved")
    );
}

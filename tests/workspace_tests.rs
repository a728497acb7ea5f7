//! Manifest orchestration and state bookkeeping.

mod common;

use common::{key_schema, movable_schema, Call, MockTransport, Op};
use merka_reconcile::database::StateStore;
use merka_reconcile::manifest::{Manifest, ManifestError, ResourceDecl};
use merka_reconcile::reconcile::{ApplyOutcome, RetryPolicy};
use merka_reconcile::schema::{FieldValue, SchemaRegistry};
use merka_reconcile::workspace::{Workspace, WorkspaceError};
use merka_reconcile::{fields, FieldMap, ReconcileError};
use std::time::Duration;

fn workspace() -> Workspace {
    Workspace::new(
        SchemaRegistry::new().register(key_schema()),
        StateStore::in_memory().unwrap(),
        RetryPolicy::new(2, Duration::from_millis(1)),
    )
}

fn decl(address: &str, fields: FieldMap) -> ResourceDecl {
    ResourceDecl {
        address: address.to_string(),
        kind: "mock_key".to_string(),
        fields,
    }
}

fn manifest(resources: Vec<ResourceDecl>) -> Manifest {
    Manifest { resources }
}

#[tokio::test]
async fn test_apply_records_and_converges() {
    common::init_logging();
    let ws = workspace();
    let transport = MockTransport::new("path");
    let manifest = manifest(vec![
        decl("key.a", fields! { "path" => "a", "ttl" => "1m" }),
        decl("key.b", fields! { "path" => "b" }),
    ]);

    let outcomes = ws.apply_all(&manifest, |_: &str| Some(&transport)).await.unwrap();
    assert_eq!(
        outcomes,
        vec![
            ("key.a".to_string(), ApplyOutcome::Created { id: "a".to_string() }),
            ("key.b".to_string(), ApplyOutcome::Created { id: "b".to_string() }),
        ]
    );
    let record = ws.store().load("key.a").unwrap().unwrap();
    assert_eq!(record.remote_id, "a");
    assert_eq!(record.fields, fields! { "path" => "a", "ttl" => "1m" });

    // A second run reads but does not write.
    transport.clear_calls();
    let outcomes = ws.apply_all(&manifest, |_: &str| Some(&transport)).await.unwrap();
    assert!(outcomes.iter().all(|(_, o)| *o == ApplyOutcome::Unchanged));
    assert!(transport.mutations().is_empty());
    assert_eq!(transport.count(Op::Read), 2);
}

#[tokio::test]
async fn test_plan_does_not_write() {
    let ws = workspace();
    let transport = MockTransport::new("path");
    ws.apply_all(
        &manifest(vec![decl("key.a", fields! { "path" => "a" })]),
        |_: &str| Some(&transport),
    )
    .await
    .unwrap();
    transport.clear_calls();

    let changed = manifest(vec![decl("key.a", fields! { "path" => "a", "ttl" => 30 })]);
    let plans = ws.plan_all(&changed, |_: &str| Some(&transport)).await.unwrap();

    assert_eq!(plans.len(), 1);
    assert_eq!(plans[0].1.changed_fields(), vec!["ttl"]);
    assert_eq!(transport.calls(), vec![Call::Read("a".to_string())]);
}

#[tokio::test]
async fn test_replacement_updates_recorded_id() {
    let ws = workspace();
    let transport = MockTransport::new("path");
    ws.apply_all(
        &manifest(vec![decl("key.a", fields! { "path" => "a" })]),
        |_: &str| Some(&transport),
    )
    .await
    .unwrap();

    let moved = manifest(vec![decl("key.a", fields! { "path" => "a2" })]);
    ws.apply_all(&moved, |_: &str| Some(&transport)).await.unwrap();

    assert_eq!(ws.store().load("key.a").unwrap().unwrap().remote_id, "a2");
    assert!(transport.remote("a").is_none());
}

#[tokio::test]
async fn test_move_in_place_updates_recorded_id() {
    let ws = Workspace::new(
        SchemaRegistry::new().register(movable_schema()),
        StateStore::in_memory().unwrap(),
        RetryPolicy::none(),
    );
    let transport = MockTransport::new("path");
    ws.apply_all(
        &manifest(vec![decl("key.a", fields! { "path" => "a", "ttl" => 5 })]),
        |_: &str| Some(&transport),
    )
    .await
    .unwrap();
    transport.clear_calls();

    let moved = manifest(vec![decl("key.a", fields! { "path" => "a2", "ttl" => 5 })]);
    let outcomes = ws.apply_all(&moved, |_: &str| Some(&transport)).await.unwrap();

    assert_eq!(
        outcomes[0].1,
        ApplyOutcome::Updated {
            fields: vec!["path".to_string()],
            moved_to: Some("a2".to_string())
        }
    );
    assert_eq!(ws.store().load("key.a").unwrap().unwrap().remote_id, "a2");
    assert_eq!(
        transport.mutations(),
        vec![Call::Write("a".to_string(), fields! { "path" => "a2" })]
    );
    assert!(transport.remote("a").is_none());
    assert_eq!(
        transport.remote("a2").unwrap().get("ttl"),
        Some(&FieldValue::Int(5))
    );
}

#[tokio::test]
async fn test_plan_rejects_unknown_field_without_reading() {
    let ws = workspace();
    let transport = MockTransport::new("path");
    ws.apply_all(
        &manifest(vec![decl("key.a", fields! { "path" => "a" })]),
        |_: &str| Some(&transport),
    )
    .await
    .unwrap();
    transport.clear_calls();
    transport.fail_next(Op::Read, 3, true);

    let bad = manifest(vec![decl("key.a", fields! { "path" => "a", "colour" => "red" })]);
    let err = ws.plan_all(&bad, |_: &str| Some(&transport)).await.unwrap_err();

    assert!(matches!(
        err,
        WorkspaceError::Reconcile {
            source: ReconcileError::UnknownField { .. },
            ..
        }
    ));
    assert!(transport.calls().is_empty());
}

#[tokio::test]
async fn test_apply_stops_at_first_failure() {
    let ws = workspace();
    let transport = MockTransport::new("path");
    transport.fail_next(Op::Create, 1, false);
    let manifest = manifest(vec![
        decl("key.a", fields! { "path" => "a" }),
        decl("key.b", fields! { "path" => "b" }),
    ]);

    let err = ws
        .apply_all(&manifest, |_: &str| Some(&transport))
        .await
        .unwrap_err();

    assert!(matches!(err, WorkspaceError::Reconcile { ref address, .. } if address == "key.a"));
    assert_eq!(transport.count(Op::Create), 1);
    assert!(ws.store().list().unwrap().is_empty());
}

#[tokio::test]
async fn test_destroy_runs_in_reverse_and_forgets() {
    let ws = workspace();
    let transport = MockTransport::new("path");
    let manifest = manifest(vec![
        decl("key.a", fields! { "path" => "a" }),
        decl("key.b", fields! { "path" => "b" }),
        decl("key.never", fields! { "path" => "never" }),
    ]);
    ws.apply_all(&manifest, |_: &str| Some(&transport)).await.unwrap();
    ws.store().remove("key.never").unwrap();
    transport.clear_calls();

    let destroyed = ws
        .destroy_all(&manifest, |_: &str| Some(&transport))
        .await
        .unwrap();

    assert_eq!(destroyed, vec!["key.b".to_string(), "key.a".to_string()]);
    assert_eq!(
        transport.calls(),
        vec![Call::Delete("b".to_string()), Call::Delete("a".to_string())]
    );
    assert!(ws.store().list().unwrap().is_empty());
}

#[tokio::test]
async fn test_manifest_errors_are_reported_before_any_call() {
    let ws = workspace();
    let transport = MockTransport::new("path");

    let duplicate = manifest(vec![
        decl("key.a", fields! { "path" => "a" }),
        decl("key.a", fields! { "path" => "b" }),
    ]);
    let err = ws
        .apply_all(&duplicate, |_: &str| Some(&transport))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        WorkspaceError::Manifest(ManifestError::DuplicateAddress(_))
    ));

    let mut unknown = decl("policy.x", fields! {});
    unknown.kind = "vault_policy".to_string();
    let err = ws
        .apply_all(&manifest(vec![unknown]), |_: &str| Some(&transport))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        WorkspaceError::Manifest(ManifestError::UnknownKind { .. })
    ));
    assert!(transport.calls().is_empty());
}

#[tokio::test]
async fn test_missing_transport_is_an_error() {
    let ws = workspace();
    let err = ws
        .apply_all(
            &manifest(vec![decl("key.a", fields! { "path" => "a" })]),
            |_: &str| -> Option<&'static MockTransport> { None },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, WorkspaceError::NoTransport(kind) if kind == "mock_key"));
}

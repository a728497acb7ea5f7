//! Vault transports against a mock HTTP server.

mod common;

use merka_reconcile::error::ActionKind;
use merka_reconcile::reconcile::{ApplyOutcome, Reconciler, RetryPolicy};
use merka_reconcile::vault::{
    mount, transit, MountTransport, TransitKeyTransport, VaultClient, VaultConfig, VaultError,
};
use merka_reconcile::{fields, ReconcileError, Transport};
use serde_json::json;
use std::time::Duration;
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const TOKEN: &str = "root-token";

fn client(server: &MockServer) -> VaultClient {
    VaultClient::new(&server.uri(), TOKEN).unwrap()
}

fn fast_retry() -> RetryPolicy {
    RetryPolicy::new(3, Duration::from_millis(1))
}

// ============================================================================
// Mounts
// ============================================================================

#[tokio::test]
async fn test_mount_read_maps_missing_to_none() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/sys/mounts/gone"))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({"errors": []})))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/sys/mounts/legacy"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "errors": ["No secret engine mount at legacy/"]
        })))
        .mount(&server)
        .await;

    let transport = MountTransport::new(client(&server));
    assert_eq!(transport.read("gone").await.unwrap(), None);
    assert_eq!(transport.read("legacy").await.unwrap(), None);
}

#[tokio::test]
async fn test_mount_create_retries_transient_failure() {
    common::init_logging();
    let server = MockServer::start().await;
    let expected_body = json!({
        "type": "kv-v2",
        "description": "team secrets",
        "local": false,
        "external_entropy_access": false,
        "options": {},
        "config": {"max_lease_ttl": "3600s"}
    });
    Mock::given(method("POST"))
        .and(path("/v1/sys/mounts/team"))
        .respond_with(ResponseTemplate::new(503).set_body_json(json!({"errors": ["Vault is sealed"]})))
        .up_to_n_times(1)
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/sys/mounts/team"))
        .and(header("X-Vault-Token", TOKEN))
        .and(body_json(expected_body))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let schema = mount::schema();
    let transport = MountTransport::new(client(&server));
    let desired = fields! {
        "path" => "/team/",
        "type" => "kv-v2",
        "description" => "team secrets",
        "max_lease_ttl" => "1h",
    };

    let outcome = Reconciler::new(&schema, fast_retry())
        .reconcile(None, &desired, &transport)
        .await
        .unwrap();
    assert_eq!(
        outcome,
        ApplyOutcome::Created {
            id: "team".to_string()
        }
    );
}

#[tokio::test]
async fn test_mount_drift_is_tuned_in_place() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/sys/mounts/team"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": {
                "type": "kv",
                "description": "team secrets",
                "accessor": "kv_0f1e2d3c",
                "local": false,
                "seal_wrap": false,
                "external_entropy_access": false,
                "options": {"version": "2"},
                "config": {"default_lease_ttl": 0, "max_lease_ttl": 3600, "force_no_cache": false}
            }
        })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/sys/mounts/team/tune"))
        .and(body_json(json!({"max_lease_ttl": "7200s", "options": {}})))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let schema = mount::schema();
    let transport = MountTransport::new(client(&server));
    let desired = fields! {
        "path" => "team",
        "type" => "kv-v2",
        "description" => "team secrets",
        "max_lease_ttl" => "2h",
    };

    let outcome = Reconciler::new(&schema, fast_retry())
        .reconcile(Some("team"), &desired, &transport)
        .await
        .unwrap();
    assert_eq!(
        outcome,
        ApplyOutcome::Updated {
            fields: vec!["max_lease_ttl".to_string()],
            moved_to: None
        }
    );
}

fn team_mount() -> serde_json::Value {
    json!({
        "data": {
            "type": "kv",
            "description": "team secrets",
            "accessor": "kv_0f1e2d3c",
            "local": false,
            "seal_wrap": false,
            "external_entropy_access": false,
            "options": {"version": "2"},
            "config": {"default_lease_ttl": 0, "max_lease_ttl": 3600, "force_no_cache": false}
        }
    })
}

async fn mount_remount_start(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/v1/sys/mounts/team"))
        .respond_with(ResponseTemplate::new(200).set_body_json(team_mount()))
        .mount(server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/sys/mounts/team/tune"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/sys/remount"))
        .and(body_json(json!({"from": "team", "to": "platform"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": {"migration_id": "6b0d5c43"}
        })))
        .expect(1)
        .mount(server)
        .await;
}

fn moved_team() -> merka_reconcile::FieldMap {
    fields! {
        "path" => "platform/",
        "type" => "kv-v2",
        "description" => "team secrets",
        "max_lease_ttl" => "1h",
    }
}

#[tokio::test]
async fn test_mount_path_change_remounts_without_unmounting() {
    let server = MockServer::start().await;
    mount_remount_start(&server).await;
    Mock::given(method("GET"))
        .and(path("/v1/sys/remount/status/6b0d5c43"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": {
                "migration_id": "6b0d5c43",
                "migration_info": {
                    "source_mount": "team/",
                    "target_mount": "platform/",
                    "status": "success"
                }
            }
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .respond_with(ResponseTemplate::new(204))
        .expect(0)
        .mount(&server)
        .await;

    let schema = mount::schema();
    let transport = MountTransport::new(client(&server));
    let outcome = Reconciler::new(&schema, fast_retry())
        .reconcile(Some("team"), &moved_team(), &transport)
        .await
        .unwrap();

    assert_eq!(
        outcome,
        ApplyOutcome::Updated {
            fields: vec!["path".to_string()],
            moved_to: Some("platform".to_string())
        }
    );
    assert_eq!(outcome.new_id(), Some("platform"));
}

#[tokio::test]
async fn test_failed_remount_migration_is_an_update_error() {
    let server = MockServer::start().await;
    mount_remount_start(&server).await;
    Mock::given(method("GET"))
        .and(path("/v1/sys/remount/status/6b0d5c43"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": {"migration_info": {"status": "failure"}}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let schema = mount::schema();
    let transport = MountTransport::new(client(&server));
    let err = Reconciler::new(&schema, fast_retry())
        .reconcile(Some("team"), &moved_team(), &transport)
        .await
        .unwrap_err();

    match err {
        ReconcileError::Apply {
            action: ActionKind::Update,
            attempts,
            source,
        } => {
            assert_eq!(attempts, 1);
            assert!(source.to_string().contains("remount of team to platform failed"));
        }
        other => panic!("expected update error, got {:?}", other),
    }
}

#[tokio::test]
async fn test_permission_denied_is_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("DELETE"))
        .and(path("/v1/sys/mounts/team"))
        .respond_with(ResponseTemplate::new(403).set_body_json(json!({
            "errors": ["permission denied"]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let schema = mount::schema();
    let transport = MountTransport::new(client(&server));
    let err = Reconciler::new(&schema, fast_retry())
        .destroy("team", &transport)
        .await
        .unwrap_err();

    match err {
        ReconcileError::Apply {
            attempts, source, ..
        } => {
            assert_eq!(attempts, 1);
            assert!(source.to_string().contains("permission denied"));
        }
        other => panic!("expected apply error, got {:?}", other),
    }
}

// ============================================================================
// Transit keys
// ============================================================================

#[tokio::test]
async fn test_transit_create_writes_key_then_config() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/transit/keys/app"))
        .and(header("X-Vault-Namespace", "team-a"))
        .and(body_json(json!({
            "convergent_encryption": false,
            "derived": false,
            "type": "aes256-gcm96"
        })))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/transit/keys/app/config"))
        .and(header("X-Vault-Namespace", "team-a"))
        .and(body_json(json!({
            "deletion_allowed": true,
            "exportable": false,
            "allow_plaintext_backup": false,
            "min_decryption_version": 1,
            "min_encryption_version": 0
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": {}})))
        .expect(1)
        .mount(&server)
        .await;

    let config = VaultConfig::new(&server.uri())
        .with_token(TOKEN)
        .with_namespace("team-a");
    let transport = TransitKeyTransport::new(VaultClient::from_config(&config).unwrap());
    let schema = transit::schema();
    let desired = fields! { "backend" => "transit", "name" => "app", "deletion_allowed" => true };

    let outcome = Reconciler::new(&schema, fast_retry())
        .reconcile(None, &desired, &transport)
        .await
        .unwrap();
    assert_eq!(outcome.new_id(), Some("transit/keys/app"));
}

#[tokio::test]
async fn test_transit_read_and_delete_tolerate_missing_key() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/transit/keys/app"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/v1/transit/keys/app"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;

    let transport = TransitKeyTransport::new(client(&server));
    assert_eq!(transport.read("transit/keys/app").await.unwrap(), None);
    transport.delete("transit/keys/app").await.unwrap();
}

#[tokio::test]
async fn test_transit_rejects_malformed_id() {
    let server = MockServer::start().await;
    let transport = TransitKeyTransport::new(client(&server));

    let err = transport
        .write("transit/app", &fields! { "deletion_allowed" => true })
        .await
        .unwrap_err();
    assert!(matches!(err, VaultError::InvalidId(_)));
    assert!(!transport.is_retryable(&err));
}

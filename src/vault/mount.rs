//! Secrets engine mounts (`sys/mounts`).
//!
//! Creation goes through `POST sys/mounts/<path>`, in-place changes through
//! the tune endpoint. A changed `path` moves the mount with `sys/remount`,
//! which keeps the engine's data. Vault reports `kv-v2` back as `kv` with
//! `options.version = "2"`; the schema canonicalizer folds both spellings
//! together so that round trip is not seen as drift.

use crate::schema::normalize::{case_fold, duration_seconds, non_empty, trim_slashes, unordered};
use crate::schema::{Field, FieldMap, FieldSpec, FieldType, FieldValue, ResourceSchema};
use crate::transport::Transport;
use crate::vault::common::{read_fields, response_data, write_fields};
use crate::vault::{VaultClient, VaultError};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::time::Duration;

pub const KIND: &str = "vault_mount";

pub mod fields {
    use super::Field;
    use std::collections::BTreeMap;

    pub const PATH: Field<String> = Field::new("path");
    pub const TYPE: Field<String> = Field::new("type");
    pub const OPTIONS: Field<BTreeMap<String, String>> = Field::new("options");
    pub const DEFAULT_LEASE_TTL: Field<i64> = Field::new("default_lease_ttl");
    pub const MAX_LEASE_TTL: Field<i64> = Field::new("max_lease_ttl");
}

/// Top-level attributes of the mount object.
const TOP_LEVEL: &[&str] = &[
    "type",
    "description",
    "local",
    "seal_wrap",
    "external_entropy_access",
    "options",
    "accessor",
    "plugin_version",
];

/// Attributes nested under `config`.
const CONFIG: &[&str] = &[
    "default_lease_ttl",
    "max_lease_ttl",
    "force_no_cache",
    "audit_non_hmac_request_keys",
    "audit_non_hmac_response_keys",
    "listing_visibility",
    "passthrough_request_headers",
    "allowed_response_headers",
    "allowed_managed_keys",
    "delegated_auth_accessors",
    "identity_token_key",
];

/// Attributes accepted by the tune endpoint.
const TUNABLE: &[&str] = &[
    "description",
    "default_lease_ttl",
    "max_lease_ttl",
    "options",
    "audit_non_hmac_request_keys",
    "audit_non_hmac_response_keys",
    "listing_visibility",
    "passthrough_request_headers",
    "allowed_response_headers",
    "allowed_managed_keys",
    "delegated_auth_accessors",
    "plugin_version",
    "identity_token_key",
];

const DURATIONS: &[&str] = &["default_lease_ttl", "max_lease_ttl"];

const REMOUNT_POLL_INTERVAL: Duration = Duration::from_secs(1);
const REMOUNT_POLL_LIMIT: u32 = 60;

pub fn schema() -> ResourceSchema {
    ResourceSchema::new(
        KIND,
        vec![
            FieldSpec::mutable("path", FieldType::String)
                .normalized(trim_slashes)
                .validated(non_empty),
            FieldSpec::immutable("type", FieldType::String)
                .normalized(case_fold)
                .validated(non_empty),
            FieldSpec::mutable("description", FieldType::String),
            FieldSpec::mutable("default_lease_ttl", FieldType::Int)
                .normalized(duration_seconds)
                .always_send(),
            FieldSpec::mutable("max_lease_ttl", FieldType::Int)
                .normalized(duration_seconds)
                .always_send(),
            // Not accepted by the tune endpoint.
            FieldSpec::immutable("force_no_cache", FieldType::Bool),
            FieldSpec::mutable("audit_non_hmac_request_keys", FieldType::StringList),
            FieldSpec::mutable("audit_non_hmac_response_keys", FieldType::StringList),
            FieldSpec::mutable("listing_visibility", FieldType::String).normalized(case_fold),
            FieldSpec::mutable("passthrough_request_headers", FieldType::StringList),
            FieldSpec::mutable("allowed_response_headers", FieldType::StringList),
            FieldSpec::mutable("allowed_managed_keys", FieldType::StringList).normalized(unordered),
            FieldSpec::mutable("delegated_auth_accessors", FieldType::StringList),
            FieldSpec::mutable("plugin_version", FieldType::String),
            FieldSpec::mutable("identity_token_key", FieldType::String),
            FieldSpec::mutable("options", FieldType::StringMap)
                .with_default(BTreeMap::new())
                .always_send(),
            FieldSpec::immutable("seal_wrap", FieldType::Bool),
            FieldSpec::immutable("external_entropy_access", FieldType::Bool).with_default(false),
            FieldSpec::immutable("local", FieldType::Bool).with_default(false),
            FieldSpec::computed("accessor", FieldType::String),
        ],
    )
    .with_canonicalizer(canonicalize_kv_v2)
}

/// Folds `type = "kv"` with `options.version = "2"` into `type = "kv-v2"`
/// without the version option.
fn canonicalize_kv_v2(fields: &mut FieldMap) {
    let mount_type = fields.get_as(fields::TYPE);
    let mut options = fields.get_as(fields::OPTIONS).unwrap_or_default();
    let version = options.get("version").map(String::as_str);

    let is_kv_v2 = match mount_type.as_deref() {
        Some("kv") => version == Some("2"),
        Some("kv-v2") => version.is_none() || version == Some("2"),
        _ => false,
    };
    if is_kv_v2 {
        options.remove("version");
        fields.set(fields::TYPE, "kv-v2".to_string());
        if fields.contains(fields::OPTIONS.name()) {
            fields.set(fields::OPTIONS, options);
        }
    }
}

/// Transport for [`KIND`] resources. The resource id is the mount path.
#[derive(Debug, Clone)]
pub struct MountTransport {
    client: VaultClient,
}

impl MountTransport {
    pub fn new(client: VaultClient) -> Self {
        Self { client }
    }

    /// Body of `POST sys/mounts/<path>`.
    pub fn create_body(desired: &FieldMap) -> Value {
        let mut body = write_fields(
            desired,
            &[
                "type",
                "description",
                "local",
                "seal_wrap",
                "external_entropy_access",
                "options",
                "plugin_version",
            ],
            &[],
        );
        let config = write_fields(desired, CONFIG, DURATIONS);
        if !config.is_empty() {
            body.insert("config".to_string(), Value::Object(config));
        }
        Value::Object(body)
    }

    /// Body of `POST sys/mounts/<path>/tune`.
    pub fn tune_body(payload: &FieldMap) -> Value {
        Value::Object(write_fields(payload, TUNABLE, DURATIONS))
    }

    /// Flattens a `GET sys/mounts/<path>` response into mount fields.
    pub fn fields_from_response(path: &str, response: &Value) -> FieldMap {
        let mount = response_data(response);
        let mut fields = FieldMap::new();
        fields.set(self::fields::PATH, path.to_string());
        read_fields(mount, TOP_LEVEL, &mut fields);
        if let Some(config) = mount.get("config") {
            read_fields(config, CONFIG, &mut fields);
        }
        // Vault answers `options: null` for engines without options.
        if !fields.contains(self::fields::OPTIONS.name()) {
            fields.insert(self::fields::OPTIONS.name(), FieldValue::StringMap(BTreeMap::new()));
        }
        fields
    }

    /// Moves the mount at `from` to `to` and waits for the migration.
    ///
    /// Servers that remount synchronously return no migration id; there is
    /// nothing to wait for then.
    async fn remount(&self, from: &str, to: &str) -> Result<(), VaultError> {
        log::info!("Remounting {} to {} in Vault", from, to);
        let response = self
            .client
            .post_with_body("/v1/sys/remount", json!({"from": from, "to": to}))
            .await?;
        let Some(migration_id) = response_data(&response)
            .get("migration_id")
            .and_then(Value::as_str)
        else {
            return Ok(());
        };

        for _ in 0..REMOUNT_POLL_LIMIT {
            let status = self
                .client
                .get(&format!("/v1/sys/remount/status/{}", migration_id))
                .await?;
            match response_data(&status)
                .pointer("/migration_info/status")
                .and_then(Value::as_str)
            {
                Some("success") => {
                    log::debug!("Remount {} finished", migration_id);
                    return Ok(());
                }
                Some("failure") => {
                    return Err(VaultError::Api(format!(
                        "remount of {} to {} failed (migration {})",
                        from, to, migration_id
                    )))
                }
                _ => tokio::time::sleep(REMOUNT_POLL_INTERVAL).await,
            }
        }
        Err(VaultError::Api(format!(
            "remount of {} to {} still running after {} checks (migration {})",
            from, to, REMOUNT_POLL_LIMIT, migration_id
        )))
    }
}

fn mount_url(path: &str) -> String {
    format!("/v1/sys/mounts/{}", path.trim_matches('/'))
}

#[async_trait]
impl Transport for MountTransport {
    type Error = VaultError;

    async fn read(&self, id: &str) -> Result<Option<FieldMap>, VaultError> {
        log::debug!("Reading mount {} from Vault", id);
        match self.client.get_optional(&mount_url(id)).await {
            Ok(Some(response)) => Ok(Some(Self::fields_from_response(id, &response))),
            Ok(None) => Ok(None),
            // Older servers answer 400 rather than 404 for unknown mounts.
            Err(VaultError::HttpStatus(400, message)) if message.contains("No secret engine mount") => {
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Tunes the mount under its current path, then remounts it if `path`
    /// changed. A retried write repeats the tune, which is idempotent.
    async fn write(&self, id: &str, payload: &FieldMap) -> Result<Option<String>, VaultError> {
        let tune = Self::tune_body(payload);
        if tune.as_object().is_some_and(|body| !body.is_empty()) {
            log::debug!("Tuning mount {} in Vault", id);
            self.client
                .post_with_body(&format!("{}/tune", mount_url(id)), tune)
                .await?;
        }

        match payload.get_as(fields::PATH) {
            Some(new_path) if new_path != id.trim_matches('/') => {
                self.remount(id.trim_matches('/'), &new_path).await?;
                Ok(Some(new_path))
            }
            _ => Ok(None),
        }
    }

    async fn delete(&self, id: &str) -> Result<(), VaultError> {
        log::debug!("Unmounting {} from Vault", id);
        match self.client.delete(&mount_url(id)).await {
            Ok(_) => Ok(()),
            Err(e) if e.is_not_found() => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn create(&self, desired: &FieldMap) -> Result<String, VaultError> {
        let path = desired
            .get_as(fields::PATH)
            .ok_or(VaultError::MissingField("path"))?;
        log::debug!("Creating mount {} in Vault", path);
        self.client
            .post_with_body(&mount_url(&path), Self::create_body(desired))
            .await?;
        Ok(path)
    }

    fn is_retryable(&self, error: &VaultError) -> bool {
        error.is_retryable()
    }
}

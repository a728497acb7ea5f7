//! Transit secrets engine keys (`<backend>/keys/<name>`).
//!
//! A key is created in two writes: the key itself, which fixes its type and
//! derivation settings, then its `config`, which holds everything that may
//! change later. `exportable` and `allow_plaintext_backup` can be switched on
//! but never off again, so turning either off means a new key.

use crate::schema::normalize::{case_fold, duration_seconds, non_empty, non_negative, trim_slashes};
use crate::schema::{Field, FieldMap, FieldSpec, FieldType, FieldValue, ResourceSchema};
use crate::transport::Transport;
use crate::vault::common::{read_fields, response_data, write_fields};
use crate::vault::{VaultClient, VaultError};
use async_trait::async_trait;
use serde_json::Value;

pub const KIND: &str = "vault_transit_key";

pub const DEFAULT_KEY_TYPE: &str = "aes256-gcm96";

pub mod fields {
    use super::Field;

    pub const BACKEND: Field<String> = Field::new("backend");
    pub const NAME: Field<String> = Field::new("name");
    pub const TYPE: Field<String> = Field::new("type");
    pub const KEY_SIZE: Field<i64> = Field::new("key_size");
    pub const EXPORTABLE: Field<bool> = Field::new("exportable");
    pub const LATEST_VERSION: Field<i64> = Field::new("latest_version");
}

/// Attributes written at creation time only.
const KEY_PARAMS: &[&str] = &[
    "convergent_encryption",
    "derived",
    "type",
    "key_size",
    "auto_rotate_period",
];

/// Attributes of `<backend>/keys/<name>/config`.
const CONFIG: &[&str] = &[
    "min_decryption_version",
    "min_encryption_version",
    "deletion_allowed",
    "exportable",
    "allow_plaintext_backup",
    "auto_rotate_period",
];

/// Attributes reported by a key read.
const READABLE: &[&str] = &[
    "type",
    "convergent_encryption",
    "derived",
    "key_size",
    "deletion_allowed",
    "exportable",
    "allow_plaintext_backup",
    "auto_rotate_period",
    "min_decryption_version",
    "min_encryption_version",
    "latest_version",
    "min_available_version",
    "supports_encryption",
    "supports_decryption",
    "supports_derivation",
    "supports_signing",
];

const DURATIONS: &[&str] = &["auto_rotate_period"];

fn min_decryption_version(value: &FieldValue) -> Result<(), String> {
    match value {
        FieldValue::Int(v) if *v < 1 => Err(format!("must be equal to or greater than 1, got: {}", v)),
        _ => Ok(()),
    }
}

fn key_size(value: &FieldValue) -> Result<(), String> {
    match value {
        FieldValue::Int(v) if !(32..=512).contains(v) => {
            Err(format!("must be between 32 and 512, got: {}", v))
        }
        _ => Ok(()),
    }
}

pub fn schema() -> ResourceSchema {
    ResourceSchema::new(
        KIND,
        vec![
            FieldSpec::immutable("backend", FieldType::String)
                .normalized(trim_slashes)
                .validated(non_empty),
            FieldSpec::immutable("name", FieldType::String)
                .normalized(trim_slashes)
                .validated(non_empty),
            FieldSpec::immutable("type", FieldType::String)
                .with_default(DEFAULT_KEY_TYPE)
                .normalized(case_fold),
            FieldSpec::immutable("convergent_encryption", FieldType::Bool).with_default(false),
            FieldSpec::immutable("derived", FieldType::Bool).with_default(false),
            // No default: Vault picks and reports a size for HMAC keys.
            FieldSpec::immutable("key_size", FieldType::Int).validated(key_size),
            FieldSpec::mutable("deletion_allowed", FieldType::Bool)
                .with_default(false)
                .always_send(),
            FieldSpec::mutable("exportable", FieldType::Bool)
                .with_default(false)
                .latch()
                .always_send(),
            FieldSpec::mutable("allow_plaintext_backup", FieldType::Bool)
                .with_default(false)
                .latch()
                .always_send(),
            FieldSpec::mutable("auto_rotate_period", FieldType::Int)
                .normalized(duration_seconds)
                .validated(non_negative)
                .always_send(),
            FieldSpec::mutable("min_decryption_version", FieldType::Int)
                .with_default(1)
                .validated(min_decryption_version)
                .always_send(),
            FieldSpec::mutable("min_encryption_version", FieldType::Int)
                .with_default(0)
                .validated(non_negative)
                .always_send(),
            FieldSpec::computed("latest_version", FieldType::Int),
            FieldSpec::computed("min_available_version", FieldType::Int),
            FieldSpec::computed("supports_encryption", FieldType::Bool),
            FieldSpec::computed("supports_decryption", FieldType::Bool),
            FieldSpec::computed("supports_derivation", FieldType::Bool),
            FieldSpec::computed("supports_signing", FieldType::Bool),
        ],
    )
}

/// Builds the resource id `<backend>/keys/<name>`.
pub fn key_id(backend: &str, name: &str) -> String {
    format!("{}/keys/{}", backend.trim_matches('/'), name.trim_matches('/'))
}

/// Splits a resource id back into backend and key name.
pub fn parse_key_id(id: &str) -> Result<(&str, &str), VaultError> {
    match id.rsplit_once("/keys/") {
        Some((backend, name)) if !backend.is_empty() && !name.is_empty() => Ok((backend, name)),
        _ => Err(VaultError::InvalidId(id.to_string())),
    }
}

/// Transport for [`KIND`] resources.
#[derive(Debug, Clone)]
pub struct TransitKeyTransport {
    client: VaultClient,
}

impl TransitKeyTransport {
    pub fn new(client: VaultClient) -> Self {
        Self { client }
    }

    /// Body of the key creation write.
    pub fn create_body(desired: &FieldMap) -> Value {
        Value::Object(write_fields(desired, KEY_PARAMS, DURATIONS))
    }

    pub fn config_body(fields: &FieldMap) -> Value {
        Value::Object(write_fields(fields, CONFIG, DURATIONS))
    }

    /// Flattens a key read into transit key fields.
    pub fn fields_from_response(id: &str, response: &Value) -> Result<FieldMap, VaultError> {
        let (backend, name) = parse_key_id(id)?;
        let mut fields = FieldMap::new();
        fields.set(self::fields::BACKEND, backend.to_string());
        fields.set(self::fields::NAME, name.to_string());
        read_fields(response_data(response), READABLE, &mut fields);
        Ok(fields)
    }
}

#[async_trait]
impl Transport for TransitKeyTransport {
    type Error = VaultError;

    async fn read(&self, id: &str) -> Result<Option<FieldMap>, VaultError> {
        log::debug!("Reading transit key {}", id);
        match self.client.get_optional(&format!("/v1/{}", id)).await? {
            Some(response) => Self::fields_from_response(id, &response).map(Some),
            None => {
                log::warn!("Transit key {} not found", id);
                Ok(None)
            }
        }
    }

    async fn write(&self, id: &str, payload: &FieldMap) -> Result<Option<String>, VaultError> {
        parse_key_id(id)?;
        log::debug!("Updating transit key {}", id);
        self.client
            .post_with_body(&format!("/v1/{}/config", id), Self::config_body(payload))
            .await?;
        Ok(None)
    }

    async fn delete(&self, id: &str) -> Result<(), VaultError> {
        parse_key_id(id)?;
        log::debug!("Deleting transit key {}", id);
        match self.client.delete(&format!("/v1/{}", id)).await {
            Ok(_) => Ok(()),
            Err(e) if e.is_not_found() => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn create(&self, desired: &FieldMap) -> Result<String, VaultError> {
        let backend = desired
            .get_as(fields::BACKEND)
            .ok_or(VaultError::MissingField("backend"))?;
        let name = desired
            .get_as(fields::NAME)
            .ok_or(VaultError::MissingField("name"))?;
        let id = key_id(&backend, &name);

        log::debug!("Creating encryption key {} on transit backend {}", name, backend);
        self.client
            .post_with_body(&format!("/v1/{}", id), Self::create_body(desired))
            .await?;
        log::debug!("Setting configuration for encryption key {}", id);
        self.client
            .post_with_body(&format!("/v1/{}/config", id), Self::config_body(desired))
            .await?;
        log::info!("Created encryption key {} on transit backend {}", name, backend);
        Ok(id)
    }

    fn is_retryable(&self, error: &VaultError) -> bool {
        error.is_retryable()
    }
}

//! Desired-state manifests.
//!
//! A manifest is a JSON document listing resources in the order they should
//! be applied:
//!
//! ```json
//! {"resources": [
//!   {"address": "mount.secrets", "kind": "vault_mount",
//!    "fields": {"path": "secrets", "type": "kv-v2"}}
//! ]}
//! ```

use crate::schema::{FieldMap, SchemaRegistry};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

#[derive(Debug, thiserror::Error)]
pub enum ManifestError {
    #[error("Failed to read manifest {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid manifest: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Duplicate resource address '{0}'")]
    DuplicateAddress(String),

    #[error("Resource '{address}' has unknown kind '{kind}'")]
    UnknownKind { address: String, kind: String },

    #[error("Resource address must not be empty")]
    EmptyAddress,
}

/// One desired resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceDecl {
    pub address: String,
    pub kind: String,
    #[serde(default)]
    pub fields: FieldMap,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Manifest {
    #[serde(default)]
    pub resources: Vec<ResourceDecl>,
}

impl Manifest {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ManifestError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ManifestError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::parse(&text)
    }

    pub fn parse(text: &str) -> Result<Self, ManifestError> {
        Ok(serde_json::from_str(text)?)
    }

    /// Checks addresses are unique and every kind is registered. Field
    /// level checks happen when each resource is planned.
    pub fn validate(&self, registry: &SchemaRegistry) -> Result<(), ManifestError> {
        let mut seen = HashSet::new();
        for decl in &self.resources {
            if decl.address.trim().is_empty() {
                return Err(ManifestError::EmptyAddress);
            }
            if !seen.insert(decl.address.as_str()) {
                return Err(ManifestError::DuplicateAddress(decl.address.clone()));
            }
            if registry.get(&decl.kind).is_none() {
                return Err(ManifestError::UnknownKind {
                    address: decl.address.clone(),
                    kind: decl.kind.clone(),
                });
            }
        }
        Ok(())
    }
}

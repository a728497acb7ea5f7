//! Vault backends for the reconciler.
//!
//! Each submodule owns one resource kind: its [`ResourceSchema`] and the
//! [`Transport`] that speaks the matching HTTP endpoints.
//!
//! ## Testing strategy:
//! - Schema and payload shaping are unit tested inside each module
//! - Wire behaviour is tested against a mock server in `tests/`

pub mod client;
pub mod common;
pub mod error;
pub mod mount;
pub mod transit;

pub use client::VaultClient;
pub use error::VaultError;
pub use mount::MountTransport;
pub use transit::TransitKeyTransport;

use crate::schema::{ResourceSchema, SchemaRegistry};
use crate::transport::Transport;

/// Vault configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct VaultConfig {
    /// Vault API URL, e.g., "http://127.0.0.1:8200".
    pub url: String,
    /// API token. Every reconciler call needs one.
    pub token: Option<String>,
    /// Optional namespace for namespaced Vault instances (enterprise)
    pub namespace: Option<String>,
}

impl VaultConfig {
    pub fn new(url: &str) -> Self {
        Self {
            url: url.to_string(),
            ..Self::default()
        }
    }

    pub fn with_token(mut self, token: &str) -> Self {
        self.token = Some(token.to_string());
        self
    }

    pub fn with_namespace(mut self, namespace: &str) -> Self {
        self.namespace = Some(namespace.to_string());
        self
    }
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            url: "http://127.0.0.1:8200".to_string(),
            token: None,
            namespace: None,
        }
    }
}

/// Schemas of every Vault resource kind.
pub fn builtin_schemas() -> Vec<ResourceSchema> {
    vec![mount::schema(), transit::schema()]
}

/// Registry holding [`builtin_schemas`].
pub fn builtin_registry() -> SchemaRegistry {
    builtin_schemas()
        .into_iter()
        .fold(SchemaRegistry::new(), SchemaRegistry::register)
}

/// One transport per resource kind, sharing a client.
#[derive(Debug, Clone)]
pub struct VaultTransports {
    mount: MountTransport,
    transit: TransitKeyTransport,
}

impl VaultTransports {
    pub fn new(client: VaultClient) -> Self {
        Self {
            mount: MountTransport::new(client.clone()),
            transit: TransitKeyTransport::new(client),
        }
    }

    pub fn from_config(config: &VaultConfig) -> Result<Self, VaultError> {
        Ok(Self::new(VaultClient::from_config(config)?))
    }

    /// The transport for `kind`, if it is a Vault kind.
    pub fn for_kind(&self, kind: &str) -> Option<&dyn Transport<Error = VaultError>> {
        match kind {
            mount::KIND => Some(&self.mount),
            transit::KIND => Some(&self.transit),
            _ => None,
        }
    }
}

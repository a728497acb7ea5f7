//! Client implementation for Vault API interactions.
//!
//! This module provides a client for making HTTP requests to the Vault API
//! with appropriate authentication, namespace and error handling.

use crate::vault::common::error_message;
use crate::vault::{VaultConfig, VaultError};
use reqwest::{
    header::{HeaderMap, HeaderName, HeaderValue},
    Client, Method, StatusCode,
};
use serde_json::{json, Value};
use std::str::FromStr;
use std::time::Duration;
use tracing::debug;

/// Client for interacting with the Vault HTTP API.
#[derive(Clone)]
pub struct VaultClient {
    /// Base URL of the Vault server
    pub addr: String,
    /// Auth token for Vault API requests
    token: String,
    /// HTTP client for making requests
    client: Client,
    /// Custom headers to add to requests
    custom_headers: HeaderMap,
}

impl std::fmt::Debug for VaultClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VaultClient")
            .field("addr", &self.addr)
            .field("headers", &self.custom_headers.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

impl VaultClient {
    /// Creates a new VaultClient with the specified address and token.
    pub fn new(addr: &str, token: &str) -> Result<Self, VaultError> {
        let client = Client::builder().timeout(Duration::from_secs(30)).build()?;

        Ok(Self {
            addr: addr.trim_end_matches('/').to_string(),
            token: token.to_string(),
            client,
            custom_headers: HeaderMap::new(),
        })
    }

    /// Creates a client from a [`VaultConfig`], applying its namespace.
    pub fn from_config(config: &VaultConfig) -> Result<Self, VaultError> {
        let mut client = Self::new(&config.url, config.token.as_deref().unwrap_or_default())?;
        if let Some(namespace) = &config.namespace {
            client.add_header("X-Vault-Namespace", namespace);
        }
        Ok(client)
    }

    /// Adds a custom header to the client.
    ///
    /// # Arguments
    ///
    /// * `name` - The name of the header
    /// * `value` - The value of the header
    pub fn add_header(&mut self, name: &str, value: &str) -> &mut Self {
        if let (Ok(header_name), Ok(header_value)) =
            (HeaderName::from_str(name), HeaderValue::from_str(value))
        {
            self.custom_headers.insert(header_name, header_value);
        }
        self
    }

    /// Makes a GET request to the Vault API.
    pub async fn get(&self, path: &str) -> Result<Value, VaultError> {
        self.request(Method::GET, path, None).await
    }

    /// Makes a GET request, mapping 404 to `None`.
    pub async fn get_optional(&self, path: &str) -> Result<Option<Value>, VaultError> {
        match self.get(path).await {
            Ok(value) => Ok(Some(value)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Makes a POST request to the Vault API with a JSON body.
    pub async fn post_with_body(&self, path: &str, body: Value) -> Result<Value, VaultError> {
        self.request(Method::POST, path, Some(body)).await
    }

    /// Makes a DELETE request to the Vault API.
    pub async fn delete(&self, path: &str) -> Result<Value, VaultError> {
        self.request(Method::DELETE, path, None).await
    }

    /// Makes a request to the Vault API with the specified method and optional body.
    async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> Result<Value, VaultError> {
        let url = format!("{}{}", self.addr, path);
        debug!("{} {}", method, url);
        let mut request = self.client.request(method, &url);

        // Add token header for authentication
        request = request.header("X-Vault-Token", &self.token);

        // Add any custom headers
        for (name, value) in self.custom_headers.iter() {
            request = request.header(name, value);
        }

        // Add JSON body if provided
        if let Some(json_body) = body {
            request = request.json(&json_body);
        }

        // Keeps reqwest's error kind: only connect and timeout failures retry.
        let response = request.send().await?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(VaultError::HttpStatus(
                status.as_u16(),
                error_message(&error_text),
            ));
        }

        // Return an empty JSON object for 204 No Content responses
        if status == StatusCode::NO_CONTENT {
            return Ok(json!({}));
        }

        let text = response
            .text()
            .await
            .map_err(|e| VaultError::ParseError(format!("Failed to read response: {}", e)))?;
        if text.trim().is_empty() {
            return Ok(json!({}));
        }
        serde_json::from_str(&text)
            .map_err(|e| VaultError::ParseError(format!("Failed to parse response: {}", e)))
    }
}

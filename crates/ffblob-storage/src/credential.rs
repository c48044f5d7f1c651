//! Managed identity credentials.
//!
//! Tokens come from the hosting platform: the App Service / Functions
//! identity endpoint when `IDENTITY_ENDPOINT` and `IDENTITY_HEADER` are set,
//! otherwise the instance metadata service (IMDS).

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, info_span, Instrument};
use url::Url;

use crate::error::{StorageError, StorageResult};

/// Token audience for Azure Storage.
pub const STORAGE_RESOURCE: &str = "https://storage.azure.com/";

const IMDS_ENDPOINT: &str = "http://169.254.169.254/metadata/identity/oauth2/token";
const APP_SERVICE_API_VERSION: &str = "2019-08-01";
const IMDS_API_VERSION: &str = "2018-02-01";

/// A bearer token and, when known, its expiry.
#[derive(Clone)]
pub struct AccessToken {
    pub token: String,
    pub expires_at: Option<DateTime<Utc>>,
}

impl std::fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessToken")
            .field("token", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Source of bearer tokens for the store.
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    async fn get_token(&self, resource: &str) -> StorageResult<AccessToken>;
}

/// Where the managed identity endpoint lives.
#[derive(Debug, Clone)]
pub enum IdentitySource {
    /// App Service / Functions local identity endpoint
    AppService { endpoint: Url, header: String },
    /// Instance metadata service
    Imds { endpoint: Url },
}

/// Managed identity configuration.
#[derive(Debug, Clone)]
pub struct ManagedIdentityConfig {
    pub source: IdentitySource,
    /// Client id of a user-assigned identity
    pub client_id: Option<String>,
    pub timeout: Duration,
}

impl ManagedIdentityConfig {
    /// Create config from environment variables.
    pub fn from_env() -> StorageResult<Self> {
        let endpoint = std::env::var("IDENTITY_ENDPOINT").ok().filter(|s| !s.is_empty());
        let header = std::env::var("IDENTITY_HEADER").ok().filter(|s| !s.is_empty());

        let source = match (endpoint, header) {
            (Some(endpoint), Some(header)) => IdentitySource::AppService {
                endpoint: Url::parse(&endpoint).map_err(|e| {
                    StorageError::config_error(format!("IDENTITY_ENDPOINT is not a URL: {}", e))
                })?,
                header,
            },
            _ => IdentitySource::Imds {
                endpoint: Url::parse(IMDS_ENDPOINT)
                    .map_err(|e| StorageError::config_error(e.to_string()))?,
            },
        };

        Ok(Self {
            source,
            client_id: std::env::var("AZURE_CLIENT_ID").ok().filter(|s| !s.is_empty()),
            timeout: Duration::from_secs(10),
        })
    }
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_on: Option<serde_json::Value>,
    #[serde(default)]
    expires_in: Option<serde_json::Value>,
}

/// Credential backed by the platform's managed identity endpoint.
pub struct ManagedIdentityCredential {
    http: Client,
    config: ManagedIdentityConfig,
}

impl ManagedIdentityCredential {
    pub fn new(config: ManagedIdentityConfig) -> StorageResult<Self> {
        // The identity endpoints are link-local and must never go through a proxy.
        let http = Client::builder()
            .timeout(config.timeout)
            .no_proxy()
            .build()
            .map_err(StorageError::Network)?;

        Ok(Self { http, config })
    }

    pub fn from_env() -> StorageResult<Self> {
        Self::new(ManagedIdentityConfig::from_env()?)
    }

    async fn request_token(&self, resource: &str) -> StorageResult<AccessToken> {
        let mut request = match &self.config.source {
            IdentitySource::AppService { endpoint, header } => self
                .http
                .get(endpoint.clone())
                .query(&[("api-version", APP_SERVICE_API_VERSION), ("resource", resource)])
                .header("X-IDENTITY-HEADER", header),
            IdentitySource::Imds { endpoint } => self
                .http
                .get(endpoint.clone())
                .query(&[("api-version", IMDS_API_VERSION), ("resource", resource)])
                .header("Metadata", "true"),
        };

        if let Some(client_id) = &self.config.client_id {
            request = request.query(&[("client_id", client_id)]);
        }

        let response = request.send().await.map_err(|e| {
            StorageError::credential(format!("identity endpoint unreachable: {}", e))
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let excerpt: String = body.chars().take(200).collect();
            return Err(StorageError::credential(format!(
                "identity endpoint returned {}: {}",
                status, excerpt
            )));
        }

        let body: TokenResponse = response.json().await.map_err(|e| {
            StorageError::credential(format!("invalid identity endpoint response: {}", e))
        })?;

        let expires_at = body
            .expires_on
            .as_ref()
            .and_then(parse_epoch)
            .and_then(|secs| Utc.timestamp_opt(secs, 0).single())
            .or_else(|| {
                body.expires_in
                    .as_ref()
                    .and_then(parse_epoch)
                    .map(|secs| Utc::now() + chrono::Duration::seconds(secs))
            });

        debug!(expires_at = ?expires_at, "Acquired managed identity token");
        Ok(AccessToken {
            token: body.access_token,
            expires_at,
        })
    }
}

#[async_trait]
impl CredentialProvider for ManagedIdentityCredential {
    async fn get_token(&self, resource: &str) -> StorageResult<AccessToken> {
        let span = info_span!("managed_identity_token", resource = %resource);
        self.request_token(resource).instrument(span).await
    }
}

/// Endpoints return numbers either as JSON numbers or as strings.
fn parse_epoch(value: &serde_json::Value) -> Option<i64> {
    match value {
        serde_json::Value::Number(n) => n.as_i64(),
        serde_json::Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

//! Compute Engine instance client

use async_trait::async_trait;
use reaper_cluster_api::{CloudError, CloudProvider, CloudResult, InstanceRef};
use reqwest::header::AUTHORIZATION;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Compute Engine API root
pub const COMPUTE_API_URL: &str = "https://compute.googleapis.com/compute/v1";

/// Metadata server endpoint handing out the node service account's token
pub const METADATA_TOKEN_URL: &str =
    "http://metadata.google.internal/computeMetadata/v1/instance/service-accounts/default/token";

/// Tokens are refreshed this long before they expire
const TOKEN_REFRESH_MARGIN: Duration = Duration::from_secs(60);

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
}

#[derive(Debug)]
struct CachedToken {
    value: String,
    refresh_at: Instant,
}

/// Where access tokens come from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenSource {
    MetadataServer { url: String },
    Static(String),
}

impl Default for TokenSource {
    fn default() -> Self {
        Self::MetadataServer {
            url: METADATA_TOKEN_URL.to_string(),
        }
    }
}

/// [`CloudProvider`] deleting instances through the Compute Engine API
pub struct GceClient {
    http: Client,
    api_url: String,
    token_source: TokenSource,
    token: Mutex<Option<CachedToken>>,
}

impl GceClient {
    pub fn new(timeout: Duration) -> CloudResult<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| CloudError::Transport(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            http,
            api_url: COMPUTE_API_URL.to_string(),
            token_source: TokenSource::default(),
            token: Mutex::new(None),
        })
    }

    pub fn with_api_url(mut self, url: impl Into<String>) -> Self {
        self.api_url = url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_token_source(mut self, source: TokenSource) -> Self {
        self.token_source = source;
        self
    }

    fn instance_url(&self, instance: &InstanceRef) -> String {
        format!(
            "{}/projects/{}/zones/{}/instances/{}",
            self.api_url, instance.project, instance.zone, instance.name
        )
    }

    async fn access_token(&self) -> CloudResult<String> {
        let url = match &self.token_source {
            TokenSource::Static(token) => return Ok(token.clone()),
            TokenSource::MetadataServer { url } => url,
        };

        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref() {
            if Instant::now() < token.refresh_at {
                return Ok(token.value.clone());
            }
        }

        debug!("Fetching access token from metadata server");
        let response = self
            .http
            .get(url)
            .header("Metadata-Flavor", "Google")
            .send()
            .await
            .map_err(|e| CloudError::Auth(format!("Metadata server unreachable: {e}")))?;

        if !response.status().is_success() {
            return Err(CloudError::Auth(format!(
                "Metadata server returned {}",
                response.status()
            )));
        }

        let body: TokenResponse = response
            .json()
            .await
            .map_err(|e| CloudError::Auth(format!("Invalid token response: {e}")))?;

        let lifetime = Duration::from_secs(body.expires_in).saturating_sub(TOKEN_REFRESH_MARGIN);
        *cached = Some(CachedToken {
            value: body.access_token.clone(),
            refresh_at: Instant::now() + lifetime,
        });
        Ok(body.access_token)
    }
}

#[async_trait]
impl CloudProvider for GceClient {
    async fn delete_instance(&self, instance: &InstanceRef) -> CloudResult<()> {
        let token = self.access_token().await?;
        let url = self.instance_url(instance);
        debug!(url = %url, "Deleting instance");

        let response = self
            .http
            .delete(&url)
            .header(AUTHORIZATION, format!("Bearer {token}"))
            .send()
            .await
            .map_err(|e| CloudError::Transport(e.to_string()))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            info!(instance = %instance, "Instance already gone");
            return Ok(());
        }
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(CloudError::Api {
                status: status.as_u16(),
                message: message.trim().to_string(),
            });
        }

        info!(instance = %instance, "Instance deletion requested");
        Ok(())
    }
}

//! Anti-detect browser-profile provider seam.
//!
//! Profiles are fingerprint-isolated browser instances managed by an
//! external service. The engine only creates, starts, stops, and re-proxies
//! them; it never deletes a profile.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;
use tracing::info;

use crate::model::Proxy;

/// Provider-level errors.
#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("provider request failed: {0}")]
    Network(String),

    #[error("provider rejected request: {0}")]
    Rejected(String),

    #[error("invalid provider response: {0}")]
    InvalidResponse(String),
}

/// External profile provider interface.
#[async_trait]
pub trait ProfileProvider: Send + Sync {
    /// Create a profile carrying the given proxy configuration.
    async fn create_profile(&self, name: &str, proxy: &Proxy) -> Result<String, ProviderError>;

    /// Start the profile's browser; returns the CDP websocket endpoint.
    async fn start(&self, profile_id: &str) -> Result<String, ProviderError>;

    /// Stop the profile's browser. The profile itself is kept.
    async fn stop(&self, profile_id: &str) -> Result<(), ProviderError>;

    /// Swap the proxy configuration carried by an existing profile.
    async fn update_profile_proxy(
        &self,
        profile_id: &str,
        proxy: &Proxy,
    ) -> Result<(), ProviderError>;
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateProfileResponse {
    profile_id: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct StartProfileResponse {
    ws_endpoint: String,
}

/// HTTP client for a locally running anti-detect provider API.
pub struct HttpProfileProvider {
    base_url: String,
    client: Client,
}

impl HttpProfileProvider {
    pub fn new(base_url: &str) -> Result<Self, ProviderError> {
        let parsed = url::Url::parse(base_url)
            .map_err(|e| ProviderError::Rejected(format!("invalid base URL: {}", e)))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(ProviderError::Rejected(format!(
                "unsupported provider scheme: {}",
                parsed.scheme()
            )));
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| ProviderError::Network(e.to_string()))?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        })
    }

    async fn check(&self, response: reqwest::Response) -> Result<reqwest::Response, ProviderError> {
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::Rejected(format!(
                "HTTP {}: {}",
                status,
                &body[..body.len().min(200)]
            )));
        }
        Ok(response)
    }
}

#[async_trait]
impl ProfileProvider for HttpProfileProvider {
    async fn create_profile(&self, name: &str, proxy: &Proxy) -> Result<String, ProviderError> {
        let url = format!("{}/profiles", self.base_url);
        let body = serde_json::json!({
            "name": name,
            "proxy": proxy.url(),
        });

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;

        let parsed: CreateProfileResponse = self
            .check(response)
            .await?
            .json()
            .await
            .map_err(|e| ProviderError::InvalidResponse(e.to_string()))?;

        info!("Created profile {} for {}", parsed.profile_id, name);
        Ok(parsed.profile_id)
    }

    async fn start(&self, profile_id: &str) -> Result<String, ProviderError> {
        let url = format!("{}/profiles/{}/start", self.base_url, profile_id);

        let response = self
            .client
            .post(&url)
            .send()
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;

        let parsed: StartProfileResponse = self
            .check(response)
            .await?
            .json()
            .await
            .map_err(|e| ProviderError::InvalidResponse(e.to_string()))?;

        Ok(parsed.ws_endpoint)
    }

    async fn stop(&self, profile_id: &str) -> Result<(), ProviderError> {
        let url = format!("{}/profiles/{}/stop", self.base_url, profile_id);

        let response = self
            .client
            .post(&url)
            .send()
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;

        self.check(response).await?;
        Ok(())
    }

    async fn update_profile_proxy(
        &self,
        profile_id: &str,
        proxy: &Proxy,
    ) -> Result<(), ProviderError> {
        let url = format!("{}/profiles/{}/proxy", self.base_url, profile_id);
        let body = serde_json::json!({ "proxy": proxy.url() });

        let response = self
            .client
            .patch(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;

        self.check(response).await?;
        Ok(())
    }
}

//! HTTP client for fetching exchange metadata.
//!
//! Both requests are `POST {info_url}` with a `{"type": ...}` body:
//! - `allPerpMetas`: array with one meta object per perp venue
//! - `spotMeta`: object with `tokens` and `universe`

use crate::error::{RegistryError, RegistryResult};
use async_trait::async_trait;
use hlmd_core::{PerpMetas, SpotMeta};
use reqwest::Client;
use serde::Serialize;
use std::time::Duration;
use tracing::debug;

/// Default timeout for API requests.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Request type for info endpoint.
#[derive(Debug, Serialize)]
struct InfoRequest<'a> {
    #[serde(rename = "type")]
    request_type: &'a str,
}

/// Source of slow-changing market metadata.
#[async_trait]
pub trait MetaSource: Send + Sync {
    /// Perpetual market metadata, one entry per venue.
    async fn fetch_perp_metas(&self) -> RegistryResult<PerpMetas>;

    /// Spot market metadata.
    async fn fetch_spot_meta(&self) -> RegistryResult<SpotMeta>;
}

/// Client for the exchange `info` endpoint.
pub struct MetaClient {
    /// HTTP client.
    client: Client,
    /// Info endpoint URL.
    info_url: String,
}

impl MetaClient {
    /// Create a new meta client.
    ///
    /// # Arguments
    /// * `info_url` - URL of the info endpoint (e.g., "https://api.hyperliquid.xyz/info")
    pub fn new(info_url: impl Into<String>) -> RegistryResult<Self> {
        let client = Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .map_err(|e| RegistryError::HttpClient(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            info_url: info_url.into(),
        })
    }

    pub fn info_url(&self) -> &str {
        &self.info_url
    }

    async fn post_info(&self, request_type: &str) -> RegistryResult<serde_json::Value> {
        debug!(url = %self.info_url, request_type, "Fetching info");

        let response = self
            .client
            .post(&self.info_url)
            .json(&InfoRequest { request_type })
            .send()
            .await
            .map_err(|e| RegistryError::HttpClient(format!("HTTP request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RegistryError::HttpClient(format!("HTTP {status}: {body}")));
        }

        response
            .json()
            .await
            .map_err(|e| RegistryError::HttpClient(format!("Failed to parse response: {e}")))
    }
}

#[async_trait]
impl MetaSource for MetaClient {
    async fn fetch_perp_metas(&self) -> RegistryResult<PerpMetas> {
        parse_perp_metas(self.post_info("allPerpMetas").await?)
    }

    async fn fetch_spot_meta(&self) -> RegistryResult<SpotMeta> {
        parse_spot_meta(self.post_info("spotMeta").await?)
    }
}

fn parse_perp_metas(body: serde_json::Value) -> RegistryResult<PerpMetas> {
    match body {
        serde_json::Value::Array(metas) => Ok(metas),
        other => Err(RegistryError::UnexpectedShape(format!(
            "allPerpMetas response is not an array: {}",
            type_name(&other)
        ))),
    }
}

fn parse_spot_meta(body: serde_json::Value) -> RegistryResult<SpotMeta> {
    if body.is_object() {
        Ok(body)
    } else {
        Err(RegistryError::UnexpectedShape(format!(
            "spotMeta response is not an object: {}",
            type_name(&body)
        )))
    }
}

fn type_name(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "bool",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}

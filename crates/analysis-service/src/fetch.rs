//! Asset retrieval from an Immich-compatible asset store.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::{StatusCode, Url};
use serde::Deserialize;
use thiserror::Error;

use crate::config::AssetStoreConfig;

const USER_AGENT: &str = concat!("photo-triage/", env!("CARGO_PKG_VERSION"));
const API_KEY_HEADER: &str = "x-api-key";

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("asset {0} not found")]
    NotFound(String),

    #[error("asset store returned {status} for asset {asset_id}")]
    Status { asset_id: String, status: u16 },

    #[error("timed out fetching asset {0}")]
    Timeout(String),

    #[error("network error fetching asset {asset_id}: {message}")]
    Network { asset_id: String, message: String },

    #[error("unreadable metadata for asset {asset_id}: {message}")]
    Parse { asset_id: String, message: String },

    #[error("asset id {0:?} cannot be used as a path segment")]
    InvalidAssetId(String),

    #[error("failed to build HTTP client: {0}")]
    Client(String),
}

/// Where photo bytes come from.
#[async_trait]
pub trait AssetSource: Send + Sync {
    /// Original file bytes for an asset.
    async fn fetch_asset_bytes(&self, asset_id: &str) -> Result<Vec<u8>, FetchError>;

    /// Capture time recorded by the store, for assets whose bytes carry no
    /// EXIF timestamp.
    async fn fetch_capture_time(&self, _asset_id: &str) -> Result<Option<DateTime<Utc>>, FetchError> {
        Ok(None)
    }
}

/// The parts of an Immich asset response we use.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetMetadata {
    #[serde(default)]
    pub exif_info: Option<ExifInfo>,
    #[serde(default)]
    pub file_created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExifInfo {
    #[serde(default)]
    pub date_time_original: Option<DateTime<Utc>>,
}

impl AssetMetadata {
    /// `exifInfo.dateTimeOriginal`, falling back to `fileCreatedAt`.
    pub fn capture_time(&self) -> Option<DateTime<Utc>> {
        self.exif_info
            .as_ref()
            .and_then(|exif| exif.date_time_original)
            .or(self.file_created_at)
    }
}

/// HTTP client for the Immich asset API.
pub struct ImmichClient {
    http_client: reqwest::Client,
    base_url: Url,
}

impl ImmichClient {
    pub fn new(config: &AssetStoreConfig) -> Result<Self, FetchError> {
        let mut headers = HeaderMap::new();
        if let Some(key) = &config.api_key {
            let mut value = HeaderValue::from_str(key)
                .map_err(|e| FetchError::Client(format!("invalid API key: {e}")))?;
            value.set_sensitive(true);
            headers.insert(API_KEY_HEADER, value);
        }

        let http_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .default_headers(headers)
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| FetchError::Client(e.to_string()))?;

        let base_url = Url::parse(&config.base_url)
            .map_err(|e| FetchError::Client(format!("invalid base URL {}: {e}", config.base_url)))?;
        if base_url.cannot_be_a_base() {
            return Err(FetchError::Client(format!("base URL {} cannot hold a path", config.base_url)));
        }

        Ok(Self { http_client, base_url })
    }

    pub fn original_url(&self, asset_id: &str) -> Result<Url, FetchError> {
        self.asset_url(asset_id, &["original"])
    }

    pub fn metadata_url(&self, asset_id: &str) -> Result<Url, FetchError> {
        self.asset_url(asset_id, &[])
    }

    /// `<base>/api/assets/<asset_id>/<suffix..>` with the id percent-encoded
    /// as a single segment.
    fn asset_url(&self, asset_id: &str, suffix: &[&str]) -> Result<Url, FetchError> {
        if matches!(asset_id, "" | "." | "..") {
            return Err(FetchError::InvalidAssetId(asset_id.to_string()));
        }

        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| FetchError::Client(format!("base URL {} cannot hold a path", self.base_url)))?
            .pop_if_empty()
            .extend(["api", "assets", asset_id])
            .extend(suffix);
        Ok(url)
    }

    async fn get(&self, asset_id: &str, url: Url) -> Result<reqwest::Response, FetchError> {
        tracing::debug!(asset_id, %url, "requesting asset");

        let response = self
            .http_client
            .get(url)
            .send()
            .await
            .map_err(|e| request_error(asset_id, e))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(FetchError::NotFound(asset_id.to_string()));
        }
        if !status.is_success() {
            return Err(FetchError::Status {
                asset_id: asset_id.to_string(),
                status: status.as_u16(),
            });
        }
        Ok(response)
    }
}

#[async_trait]
impl AssetSource for ImmichClient {
    async fn fetch_asset_bytes(&self, asset_id: &str) -> Result<Vec<u8>, FetchError> {
        let response = self.get(asset_id, self.original_url(asset_id)?).await?;
        let bytes = response.bytes().await.map_err(|e| request_error(asset_id, e))?;
        Ok(bytes.to_vec())
    }

    async fn fetch_capture_time(&self, asset_id: &str) -> Result<Option<DateTime<Utc>>, FetchError> {
        let response = self.get(asset_id, self.metadata_url(asset_id)?).await?;
        let metadata: AssetMetadata = response.json().await.map_err(|e| FetchError::Parse {
            asset_id: asset_id.to_string(),
            message: e.to_string(),
        })?;
        Ok(metadata.capture_time())
    }
}

fn request_error(asset_id: &str, err: reqwest::Error) -> FetchError {
    if err.is_timeout() {
        FetchError::Timeout(asset_id.to_string())
    } else {
        FetchError::Network {
            asset_id: asset_id.to_string(),
            message: err.to_string(),
        }
    }
}

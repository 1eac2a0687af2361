//! Sync API Client - Google Drive appDataFolder blob store
//!
//! Handles all REST calls for the single well-known snapshot file:
//! - Locate the file in the hidden app-data folder
//! - Download its content
//! - Create or overwrite it (multipart upload)
//!
//! The client never caches credentials; every call takes the bearer token.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};

pub const DRIVE_API_BASE: &str = "https://www.googleapis.com";
pub const DRIVE_UPLOAD_BASE: &str = "https://www.googleapis.com";
pub const DEFAULT_SYNC_FILENAME: &str = "linguacontext_words.json";

const APP_DATA_FOLDER: &str = "appDataFolder";

/// Opaque reference to the remote snapshot file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotHandle {
    pub id: String,
    #[serde(rename = "modifiedTime", default, skip_serializing_if = "Option::is_none")]
    pub modified_time: Option<String>,
}

/// Remote blob store holding the snapshot document
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Find the well-known snapshot file
    async fn locate(&self, token: &str) -> Result<Option<SnapshotHandle>, DriveError>;

    /// Download the snapshot bytes
    async fn fetch(&self, token: &str, handle: &SnapshotHandle) -> Result<Vec<u8>, DriveError>;

    /// Create the file when `handle` is `None`, otherwise overwrite it in place
    async fn upload(
        &self,
        token: &str,
        bytes: Vec<u8>,
        handle: Option<&SnapshotHandle>,
    ) -> Result<SnapshotHandle, DriveError>;
}

/// Endpoint configuration (overridable for tests)
#[derive(Debug, Clone)]
pub struct DriveConfig {
    pub api_base: String,
    pub upload_base: String,
    pub file_name: String,
}

impl Default for DriveConfig {
    fn default() -> Self {
        Self {
            api_base: DRIVE_API_BASE.to_string(),
            upload_base: DRIVE_UPLOAD_BASE.to_string(),
            file_name: DEFAULT_SYNC_FILENAME.to_string(),
        }
    }
}

/// API client for the Google Drive v3 REST API
pub struct DriveClient {
    client: Client,
    config: DriveConfig,
}

impl DriveClient {
    /// Create new API client
    pub fn new(config: DriveConfig) -> Result<Self, DriveError> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()?;

        Ok(Self { client, config })
    }

    fn search_query(&self) -> String {
        format!(
            "name = '{}' and '{}' in parents and trashed = false",
            self.config.file_name.replace('\'', "\\'"),
            APP_DATA_FOLDER
        )
    }

    /// Build a multipart/related body: JSON metadata part, then the content
    fn multipart_body(&self, bytes: &[u8], create: bool) -> Result<(String, Vec<u8>), DriveError> {
        let metadata = FileMetadata {
            name: self.config.file_name.clone(),
            mime_type: "application/json".to_string(),
            // New files go into the hidden app-data folder; updates may not move them
            parents: create.then(|| vec![APP_DATA_FOLDER.to_string()]),
        };
        let metadata = serde_json::to_vec(&metadata).map_err(|_| DriveError::InvalidResponse)?;

        let boundary = format!("lingua-sync-{}", uuid::Uuid::new_v4().simple());
        let mut body = Vec::with_capacity(metadata.len() + bytes.len() + 256);
        body.extend_from_slice(format!("--{}\r\nContent-Type: application/json; charset=UTF-8\r\n\r\n", boundary).as_bytes());
        body.extend_from_slice(&metadata);
        body.extend_from_slice(format!("\r\n--{}\r\nContent-Type: application/json\r\n\r\n", boundary).as_bytes());
        body.extend_from_slice(bytes);
        body.extend_from_slice(format!("\r\n--{}--\r\n", boundary).as_bytes());

        Ok((format!("multipart/related; boundary={}", boundary), body))
    }
}

#[async_trait]
impl RemoteStore for DriveClient {
    async fn locate(&self, token: &str) -> Result<Option<SnapshotHandle>, DriveError> {
        let response = self.client
            .get(format!("{}/drive/v3/files", self.config.api_base))
            .query(&[
                ("q", self.search_query().as_str()),
                ("spaces", APP_DATA_FOLDER),
                ("fields", "files(id, modifiedTime)"),
            ])
            .bearer_auth(token)
            .send()
            .await?;

        let list: FileList = handle_response(response).await?;
        Ok(list.files.into_iter().next())
    }

    async fn fetch(&self, token: &str, handle: &SnapshotHandle) -> Result<Vec<u8>, DriveError> {
        let response = self.client
            .get(format!("{}/drive/v3/files/{}", self.config.api_base, handle.id))
            .query(&[("alt", "media")])
            .bearer_auth(token)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(handle_error(response).await);
        }

        Ok(response.bytes().await?.to_vec())
    }

    async fn upload(
        &self,
        token: &str,
        bytes: Vec<u8>,
        handle: Option<&SnapshotHandle>,
    ) -> Result<SnapshotHandle, DriveError> {
        let (content_type, body) = self.multipart_body(&bytes, handle.is_none())?;

        let request = match handle {
            Some(existing) => self.client.patch(format!(
                "{}/upload/drive/v3/files/{}",
                self.config.upload_base, existing.id
            )),
            None => self.client.post(format!("{}/upload/drive/v3/files", self.config.upload_base)),
        };

        let response = request
            .query(&[("uploadType", "multipart"), ("fields", "id, modifiedTime")])
            .bearer_auth(token)
            .header(reqwest::header::CONTENT_TYPE, content_type)
            .body(body)
            .send()
            .await?;

        handle_response(response).await
    }
}

// ============================================================================
// API Request/Response Types
// ============================================================================

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct FileMetadata {
    name: String,
    mime_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    parents: Option<Vec<String>>,
}

#[derive(Debug, Clone, Deserialize)]
struct FileList {
    #[serde(default)]
    files: Vec<SnapshotHandle>,
}

// ============================================================================
// Error Handling
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum DriveError {
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Unauthorized - sign-in required")]
    Unauthorized,

    #[error("Permission denied: {0}")]
    Forbidden(String),

    #[error("Google Drive API is not enabled for this project: {0}")]
    ApiDisabled(String),

    #[error("Drive storage quota exceeded")]
    QuotaExceeded,

    #[error("Rate limit exceeded")]
    RateLimitExceeded,

    #[error("Snapshot file not found")]
    NotFound,

    #[error("Server error: {0}")]
    ServerError(String),

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Invalid response from server")]
    InvalidResponse,
}

/// Handle successful JSON response
async fn handle_response<T: serde::de::DeserializeOwned>(
    response: reqwest::Response,
) -> Result<T, DriveError> {
    let status = response.status();

    if status.is_success() {
        response.json::<T>().await
            .map_err(|_| DriveError::InvalidResponse)
    } else {
        Err(handle_error(response).await)
    }
}

/// Convert error response to DriveError
async fn handle_error(response: reqwest::Response) -> DriveError {
    let status = response.status();
    let body = response.text().await.unwrap_or_else(|_| "Unknown error".to_string());

    log::error!("Google Drive API error ({}): {}", status, body);
    classify_error(status, body)
}

fn classify_error(status: StatusCode, body: String) -> DriveError {
    match status {
        StatusCode::UNAUTHORIZED => DriveError::Unauthorized,
        StatusCode::FORBIDDEN => {
            if body.contains("has not been used")
                || body.contains("accessNotConfigured")
                || body.contains("SERVICE_DISABLED")
            {
                DriveError::ApiDisabled(body)
            } else if body.contains("storageQuotaExceeded") {
                DriveError::QuotaExceeded
            } else if body.contains("rateLimitExceeded") || body.contains("userRateLimitExceeded") {
                DriveError::RateLimitExceeded
            } else {
                DriveError::Forbidden(body)
            }
        }
        StatusCode::NOT_FOUND => DriveError::NotFound,
        StatusCode::TOO_MANY_REQUESTS => DriveError::RateLimitExceeded,
        s if s.is_server_error() => DriveError::ServerError(body),
        _ => DriveError::NetworkError(format!("{}: {}", status, body)),
    }
}

// ============================================================================
// Tests
// ============================================================================

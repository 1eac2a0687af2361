//! Remote Access - credential-aware adapter over the blob store
//!
//! Maps blob-store failures onto the sync error taxonomy and invalidates
//! the credential whenever the remote rejects it. Rejected calls are not
//! retried within the same cycle.

use super::api::{DriveError, RemoteStore, SnapshotHandle};
use super::error::SyncError;
use crate::oauth::CredentialProvider;
use std::sync::Arc;

pub struct RemoteAccess {
    store: Arc<dyn RemoteStore>,
    credentials: Arc<dyn CredentialProvider>,
}

impl RemoteAccess {
    pub fn new(store: Arc<dyn RemoteStore>, credentials: Arc<dyn CredentialProvider>) -> Self {
        Self { store, credentials }
    }

    /// Find the well-known snapshot document
    pub async fn locate(&self, token: &str) -> Result<Option<SnapshotHandle>, SyncError> {
        match self.store.locate(token).await {
            Ok(handle) => Ok(handle),
            Err(e) => Err(self.map_error(token, e).await),
        }
    }

    /// Download the snapshot bytes
    pub async fn fetch(&self, token: &str, handle: &SnapshotHandle) -> Result<Vec<u8>, SyncError> {
        match self.store.fetch(token, handle).await {
            Ok(bytes) => Ok(bytes),
            Err(e) => Err(self.map_error(token, e).await),
        }
    }

    /// Create (no handle) or overwrite the snapshot document
    pub async fn write(
        &self,
        token: &str,
        bytes: Vec<u8>,
        handle: Option<&SnapshotHandle>,
    ) -> Result<SnapshotHandle, SyncError> {
        match self.store.upload(token, bytes, handle).await {
            Ok(handle) => Ok(handle),
            Err(e) => Err(self.map_error(token, e).await),
        }
    }

    async fn map_error(&self, token: &str, error: DriveError) -> SyncError {
        match error {
            DriveError::Unauthorized | DriveError::Forbidden(_) => {
                log::warn!("Token expired or permission denied, removing cached token");
                self.credentials.invalidate(token).await;
                SyncError::Auth(error.to_string())
            }
            // The token is fine; the project is not provisioned
            DriveError::ApiDisabled(_) => SyncError::api_disabled(error.to_string()),
            DriveError::QuotaExceeded | DriveError::RateLimitExceeded => {
                SyncError::quota(error.to_string())
            }
            DriveError::NotFound => SyncError::NotFound("remote snapshot".to_string()),
            DriveError::InvalidResponse => SyncError::Network(error.to_string()),
            DriveError::Request(_) | DriveError::ServerError(_) | DriveError::NetworkError(_) => {
                SyncError::Network(error.to_string())
            }
        }
    }
}

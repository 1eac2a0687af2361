//! Sync error taxonomy
//!
//! Every failed cycle ends in exactly one of these. None of them are
//! retried by the engine itself.

use super::codec::CodecError;
use crate::db::DbError;
use crate::oauth::AuthError;

const API_DISABLED_HINT: &str =
    "Enable the Google Drive API for this OAuth client in the Google Cloud Console, then sync again.";
const QUOTA_HINT: &str =
    "Google Drive refused the request for quota or rate-limit reasons. Free up Drive storage or try again later.";

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// Credential missing, denied or expired; the cached token was invalidated
    #[error("Authentication required: {0}")]
    Auth(String),

    /// Transient transport or server failure
    #[error("Network error: {0}")]
    Network(String),

    /// Remote API unavailable for this account (disabled, quota, rate limit)
    #[error("Remote storage unavailable: {reason}")]
    RemoteQuotaOrPolicy {
        reason: String,
        remediation: &'static str,
    },

    /// Remote document is malformed; local state was not touched
    #[error("Malformed remote snapshot: {0}")]
    Codec(#[from] CodecError),

    #[error("Local storage error: {0}")]
    Storage(#[from] DbError),

    #[error("Not found: {0}")]
    NotFound(String),
}

impl From<AuthError> for SyncError {
    fn from(e: AuthError) -> Self {
        match e {
            AuthError::Network(reason) => SyncError::Network(reason),
            AuthError::Storage(db) => SyncError::Storage(db),
            other => SyncError::Auth(other.to_string()),
        }
    }
}

impl SyncError {
    pub(crate) fn api_disabled(reason: String) -> Self {
        SyncError::RemoteQuotaOrPolicy { reason, remediation: API_DISABLED_HINT }
    }

    pub(crate) fn quota(reason: String) -> Self {
        SyncError::RemoteQuotaOrPolicy { reason, remediation: QUOTA_HINT }
    }

    /// Short tag for status reporting
    pub fn kind(&self) -> &'static str {
        match self {
            SyncError::Auth(_) => "auth",
            SyncError::Network(_) => "network",
            SyncError::RemoteQuotaOrPolicy { .. } => "remote_policy",
            SyncError::Codec(_) => "codec",
            SyncError::Storage(_) => "storage",
            SyncError::NotFound(_) => "not_found",
        }
    }

    /// Actionable hint for the user, when there is one
    pub fn remediation(&self) -> Option<&'static str> {
        match self {
            SyncError::RemoteQuotaOrPolicy { remediation, .. } => Some(remediation),
            SyncError::Auth(_) => Some("Sign in to Google again."),
            _ => None,
        }
    }

    /// Human-readable status line, hint appended when present
    pub fn user_message(&self) -> String {
        match self.remediation() {
            Some(hint) => format!("{} {}", self, hint),
            None => self.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_policy_error_carries_remediation() {
        let err = SyncError::api_disabled("Drive API has not been used".to_string());

        assert_eq!(err.kind(), "remote_policy");
        assert_eq!(err.remediation(), Some(API_DISABLED_HINT));
        assert!(err.user_message().contains("Google Cloud Console"));
    }

    #[test]
    fn test_auth_error_conversion() {
        let err: SyncError = AuthError::NotSignedIn.into();
        assert_eq!(err.kind(), "auth");
        assert!(err.to_string().contains("Not signed in"));
    }

    #[test]
    fn test_credential_transport_and_storage_failures_keep_their_kind() {
        let err: SyncError = AuthError::Network("connection refused".to_string()).into();
        assert_eq!(err.kind(), "network");
        assert!(err.remediation().is_none());

        let err: SyncError = AuthError::Storage(DbError::Serialization("bad row".to_string())).into();
        assert_eq!(err.kind(), "storage");

        let err: SyncError = AuthError::TokenExchange("invalid_client".to_string()).into();
        assert_eq!(err.kind(), "auth");
    }

    #[test]
    fn test_network_error_has_no_hint() {
        let err = SyncError::Network("timeout".to_string());
        assert!(err.remediation().is_none());
        assert_eq!(err.user_message(), "Network error: timeout");
    }
}

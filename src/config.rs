//! Application configuration, read from the environment
//!
//! `.env` is loaded first (see `run`), so every key may also live there.

use std::path::PathBuf;

use crate::oauth::{google_drive_config, OAuthConfig};
use crate::sync::api::{DriveConfig, DEFAULT_SYNC_FILENAME, DRIVE_API_BASE, DRIVE_UPLOAD_BASE};

const DEFAULT_REDIRECT_URI: &str = "http://127.0.0.1:8080/callback";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to determine the application data directory (is HOME set?)")]
    NoDataDir,

    #[error("Invalid value for {key}: {value}")]
    Invalid { key: &'static str, value: String },
}

/// Runtime configuration
#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub client_id: String,
    pub client_secret: Option<String>,
    pub redirect_uri: String,
    pub drive: DriveConfig,
    pub data_dir: PathBuf,
    /// Pull from remote on start when the local store has no active entries
    pub auto_restore: bool,
}

impl SyncConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let data_dir = match env("LINGUA_DATA_DIR") {
            Some(dir) => PathBuf::from(dir),
            None => directories::ProjectDirs::from("com", "linguasync", "lingua-sync")
                .ok_or(ConfigError::NoDataDir)?
                .data_dir()
                .to_path_buf(),
        };

        let auto_restore = match env("LINGUA_AUTO_RESTORE") {
            Some(value) => parse_bool("LINGUA_AUTO_RESTORE", &value)?,
            None => true,
        };

        Ok(Self {
            client_id: env("GOOGLE_CLIENT_ID").unwrap_or_else(|| "YOUR_GOOGLE_CLIENT_ID".to_string()),
            client_secret: env("GOOGLE_CLIENT_SECRET"),
            redirect_uri: env("LINGUA_OAUTH_REDIRECT").unwrap_or_else(|| DEFAULT_REDIRECT_URI.to_string()),
            drive: DriveConfig {
                api_base: env("LINGUA_DRIVE_API_BASE").unwrap_or_else(|| DRIVE_API_BASE.to_string()),
                upload_base: env("LINGUA_DRIVE_UPLOAD_BASE").unwrap_or_else(|| DRIVE_UPLOAD_BASE.to_string()),
                file_name: env("LINGUA_SYNC_FILENAME").unwrap_or_else(|| DEFAULT_SYNC_FILENAME.to_string()),
            },
            data_dir,
            auto_restore,
        })
    }

    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("lingua-sync.db")
    }

    pub fn oauth(&self) -> OAuthConfig {
        google_drive_config(
            self.client_id.clone(),
            self.client_secret.clone(),
            self.redirect_uri.clone(),
        )
    }
}

/// Non-empty environment variable
fn env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn parse_bool(key: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::Invalid { key, value: value.to_string() }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_bool() {
        assert!(parse_bool("K", "TRUE").unwrap());
        assert!(parse_bool("K", " on ").unwrap());
        assert!(!parse_bool("K", "0").unwrap());
        assert!(matches!(parse_bool("K", "maybe"), Err(ConfigError::Invalid { key: "K", .. })));
    }

    #[test]
    fn test_oauth_config_uses_appdata_scope() {
        let config = SyncConfig {
            client_id: "id".to_string(),
            client_secret: None,
            redirect_uri: DEFAULT_REDIRECT_URI.to_string(),
            drive: DriveConfig::default(),
            data_dir: PathBuf::from("/tmp/lingua"),
            auto_restore: true,
        };

        let oauth = config.oauth();
        assert_eq!(oauth.client_id, "id");
        assert_eq!(oauth.scopes, vec!["https://www.googleapis.com/auth/drive.appdata".to_string()]);
        assert_eq!(config.db_path(), PathBuf::from("/tmp/lingua/lingua-sync.db"));
    }
}

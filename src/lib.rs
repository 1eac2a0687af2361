//! LinguaSync - vocabulary notebook with Google Drive backup
//!
//! The library owns local persistence and synchronization; any front end
//! (the bundled CLI, a GUI) calls into `WordBook` and renders the results.

pub mod config;
pub mod db;
pub mod oauth;
pub mod sync;
pub mod words;

use std::sync::Arc;

use config::{ConfigError, SyncConfig};
use db::{Database, DbError};
use oauth::GoogleAuth;
use sync::{DriveClient, DriveError, MutationGate, SyncEngine};
use words::WordBook;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Failed to create data directory: {0}")]
    DataDir(#[from] std::io::Error),

    #[error("Database initialization failed: {0}")]
    Database(#[from] DbError),

    #[error("HTTP client initialization failed: {0}")]
    Http(#[from] DriveError),
}

/// Application state shared by every command
pub struct AppState {
    pub config: SyncConfig,
    pub db: Arc<Database>,
    pub book: WordBook,
}

impl AppState {
    /// Open the database and wire the sync engine to Google Drive
    pub fn open(config: SyncConfig) -> Result<Self, AppError> {
        std::fs::create_dir_all(&config.data_dir)?;

        let db_path = config.db_path();
        log::info!("Database path: {:?}", db_path);
        let db = Arc::new(Database::new(db_path)?);
        log::info!("Local store holds {} records (tombstones included)", db.record_count()?);

        let credentials = Arc::new(GoogleAuth::new(config.oauth(), db.clone()));
        let drive = Arc::new(DriveClient::new(config.drive.clone())?);
        let engine = SyncEngine::new(db.clone(), drive, credentials, MutationGate::new());

        Ok(Self {
            config,
            db,
            book: WordBook::new(engine),
        })
    }
}

/// Load `.env` and initialize the logger
pub fn init_logging() {
    dotenvy::dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
}

/// Application entry point: bootstrap, then the app-start auto-restore
pub async fn run() -> Result<AppState, AppError> {
    init_logging();

    let config = SyncConfig::from_env()?;
    let state = AppState::open(config)?;
    log::info!("LinguaSync initialized");

    if state.config.auto_restore {
        match state.book.startup_restore().await {
            Ok(Some(report)) => log::info!("Auto-restore finished ({} active words)", report.count),
            Ok(None) => {}
            // Passive: the next explicit sync surfaces the problem
            Err(e) => log::warn!("Auto-restore skipped: {}", e.user_message()),
        }
    }

    Ok(state)
}

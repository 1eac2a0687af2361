//! Word Book - local mutations triggered by the user
//!
//! Every read-decide-write sequence runs under the sync engine's gate.
//! Mutations schedule a best-effort background PUSH whose failure is only
//! logged; the mutation's own result never depends on it.

use serde_json::{Map, Value};
use std::sync::{Arc, Mutex as StdMutex};
use tokio::task::JoinHandle;

use crate::sync::models::{
    now_millis, ConflictChoice, RecordEntry, SettingsConflict, SettingsDocument, SyncMode,
    SyncReport, SyncRequest,
};
use crate::sync::{count_active, SyncEngine, SyncError, SyncStatus};

/// Trigger surface over the local store
#[derive(Clone)]
pub struct WordBook {
    engine: SyncEngine,
    /// Handles of detached background pushes, kept only for flushing
    background: Arc<StdMutex<Vec<JoinHandle<()>>>>,
}

impl WordBook {
    pub fn new(engine: SyncEngine) -> Self {
        Self {
            engine,
            background: Arc::new(StdMutex::new(Vec::new())),
        }
    }

    pub fn engine(&self) -> &SyncEngine {
        &self.engine
    }

    // ========================================================================
    // Records
    // ========================================================================

    /// Save a new entry; returns its id
    pub async fn save(&self, payload: Map<String, Value>) -> Result<String, SyncError> {
        let id = {
            let _guard = self.engine.gate().acquire().await;
            let store = self.engine.store();

            let mut records = store.get_records()?;
            let id = uuid::Uuid::new_v4().to_string();
            records.insert(id.clone(), RecordEntry::new(id.clone(), payload, now_millis()));
            store.put_records(&records)?;
            id
        };

        log::info!("Word saved: {}", id);
        self.schedule_push("save");
        Ok(id)
    }

    /// Soft-delete an active entry
    pub async fn remove(&self, id: &str) -> Result<(), SyncError> {
        {
            let _guard = self.engine.gate().acquire().await;
            let store = self.engine.store();

            let mut records = store.get_records()?;
            match records.get_mut(id) {
                Some(entry) if entry.is_active() => entry.mark_deleted(now_millis()),
                _ => return Err(SyncError::NotFound(format!("word {}", id))),
            }
            store.put_records(&records)?;
        }

        log::info!("Word removed: {}", id);
        self.schedule_push("remove");
        Ok(())
    }

    /// Id of the active entry saved for `word` (case-insensitive)
    ///
    /// Read-only, so it does not take the gate.
    pub fn check_active_by_content(&self, word: &str) -> Result<Option<String>, SyncError> {
        let needle = word.to_lowercase();
        let records = self.engine.store().get_records()?;

        Ok(records
            .values()
            .filter(|entry| entry.is_active())
            .find(|entry| entry.word().map(|w| w.to_lowercase() == needle).unwrap_or(false))
            .map(|entry| entry.id.clone()))
    }

    /// Active entries, newest first
    pub fn list_active(&self) -> Result<Vec<RecordEntry>, SyncError> {
        let mut active: Vec<RecordEntry> = self
            .engine
            .store()
            .get_records()?
            .into_values()
            .filter(RecordEntry::is_active)
            .collect();

        active.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(active)
    }

    // ========================================================================
    // Settings
    // ========================================================================

    /// Current settings, defaults when nothing was saved yet
    pub fn settings(&self) -> Result<SettingsDocument, SyncError> {
        Ok(self.engine.store().get_settings()?.unwrap_or_default())
    }

    /// Replace the settings document (stamped with the current time)
    pub async fn save_settings(&self, settings: SettingsDocument) -> Result<SettingsDocument, SyncError> {
        let saved = self.put_settings(settings.stamped(now_millis())).await?;
        self.schedule_push("settings save");
        Ok(saved)
    }

    /// Replace the settings document with defaults
    pub async fn reset_settings(&self) -> Result<SettingsDocument, SyncError> {
        let saved = self.put_settings(SettingsDocument::default().stamped(now_millis())).await?;
        self.schedule_push("settings reset");
        Ok(saved)
    }

    /// Apply the user's choice for a settings conflict, then push it
    ///
    /// Keeping the local document re-stamps it so it wins on every device.
    pub async fn resolve_settings_conflict(
        &self,
        conflict: SettingsConflict,
        choice: ConflictChoice,
    ) -> Result<SyncReport, SyncError> {
        let chosen = match choice {
            ConflictChoice::Local => conflict.local.stamped(now_millis()),
            ConflictChoice::Remote => conflict.remote,
        };

        self.put_settings(chosen).await?;
        log::info!("Settings conflict resolved ({:?}), pushing", choice);

        self.engine
            .sync(SyncRequest { interactive: true, mode: SyncMode::Push })
            .await
    }

    async fn put_settings(&self, settings: SettingsDocument) -> Result<SettingsDocument, SyncError> {
        let _guard = self.engine.gate().acquire().await;
        self.engine.store().put_settings(&settings)?;
        Ok(settings)
    }

    // ========================================================================
    // Sync triggers
    // ========================================================================

    /// Explicit sync request
    pub async fn sync(&self, interactive: bool, mode: SyncMode) -> Result<SyncReport, SyncError> {
        self.engine.sync(SyncRequest { interactive, mode }).await
    }

    /// App-start auto-restore: silent PULL only when no active entries exist
    pub async fn startup_restore(&self) -> Result<Option<SyncReport>, SyncError> {
        let active = count_active(&self.engine.store().get_records()?);
        if active > 0 {
            log::info!("Local store has {} active words, skipping auto-restore", active);
            return Ok(None);
        }

        log::info!("Local store effectively empty, restoring from remote");
        self.engine.sync(SyncRequest::silent_pull()).await.map(Some)
    }

    /// Passive indicator: outcome of the latest sync cycle
    pub async fn status(&self) -> SyncStatus {
        self.engine.status().await
    }

    pub async fn logout(&self) -> Result<(), SyncError> {
        self.engine.logout().await
    }

    // ========================================================================
    // Background backup
    // ========================================================================

    fn schedule_push(&self, reason: &'static str) {
        let engine = self.engine.clone();
        let mut tasks = self.background.lock().unwrap_or_else(|poisoned| {
            log::warn!("Background task list was poisoned, recovering");
            poisoned.into_inner()
        });

        // Forget finished tasks so the list does not grow without bound
        tasks.retain(|task| !task.is_finished());

        tasks.push(tokio::spawn(async move {
            if let Err(e) = engine.sync(SyncRequest::background_push()).await {
                log::warn!("Background backup after {} failed: {}", reason, e);
            }
        }));
    }

    /// Wait for every scheduled background backup to finish
    ///
    /// Pushes are detached: dropping the last `WordBook` does not cancel
    /// them, but a process that exits without flushing may cut them short.
    pub async fn flush_background(&self) {
        let tasks = {
            let mut guard = self.background.lock().unwrap_or_else(|p| p.into_inner());
            std::mem::take(&mut *guard)
        };

        for task in tasks {
            if let Err(e) = task.await {
                log::warn!("Background backup task did not complete: {}", e);
            }
        }
    }
}

//! Sync Engine - orchestrates one synchronization cycle
//!
//! Idle -> AcquiringCredential -> Locating -> {Pushing | Pulling} -> Reporting -> Idle
//!
//! Local reads and writes of a cycle happen inside one `MutationGate`
//! critical section; credential and network calls always happen outside it.

use super::api::{RemoteStore, SnapshotHandle};
use super::codec;
use super::error::SyncError;
use super::gate::MutationGate;
use super::merge::{count_active, merge_records, merge_settings};
use super::models::{
    now_millis, RemoteSnapshot, SettingsDocument, SyncMode, SyncPhase, SyncReport, SyncRequest,
    SyncStatus,
};
use super::remote::RemoteAccess;
use super::store::LocalStore;
use crate::oauth::CredentialProvider;
use chrono::Utc;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Sync engine - main orchestrator
#[derive(Clone)]
pub struct SyncEngine {
    store: Arc<dyn LocalStore>,
    remote: Arc<RemoteAccess>,
    credentials: Arc<dyn CredentialProvider>,
    gate: MutationGate,
    status: Arc<RwLock<StatusBoard>>,
    cycles: Arc<AtomicU64>,
}

/// Status plus the phase of every cycle still in flight
///
/// The reported phase follows the most recently started running cycle, so
/// a background push that finishes early does not mask a longer pull.
#[derive(Default)]
struct StatusBoard {
    status: SyncStatus,
    running: BTreeMap<u64, SyncPhase>,
}

impl StatusBoard {
    fn enter(&mut self, cycle: u64, phase: SyncPhase) {
        if phase == SyncPhase::Idle {
            self.running.remove(&cycle);
        } else {
            self.running.insert(cycle, phase);
        }

        self.status.phase = self
            .running
            .values()
            .next_back()
            .copied()
            .unwrap_or(SyncPhase::Idle);
    }
}

impl SyncEngine {
    pub fn new(
        store: Arc<dyn LocalStore>,
        remote_store: Arc<dyn RemoteStore>,
        credentials: Arc<dyn CredentialProvider>,
        gate: MutationGate,
    ) -> Self {
        Self {
            store,
            remote: Arc::new(RemoteAccess::new(remote_store, credentials.clone())),
            credentials,
            gate,
            status: Arc::new(RwLock::new(StatusBoard::default())),
            cycles: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Gate shared with every other local mutation
    pub fn gate(&self) -> &MutationGate {
        &self.gate
    }

    pub fn store(&self) -> &Arc<dyn LocalStore> {
        &self.store
    }

    /// Outcome of the latest cycle (passive indicator)
    pub async fn status(&self) -> SyncStatus {
        self.status.read().await.status.clone()
    }

    // ========================================================================
    // Cycle
    // ========================================================================

    /// Run one full sync cycle
    pub async fn sync(&self, request: SyncRequest) -> Result<SyncReport, SyncError> {
        let cycle = self.cycles.fetch_add(1, Ordering::Relaxed) + 1;
        log::info!(
            "Sync #{} starting ({}, interactive: {})",
            cycle,
            request.mode.as_str(),
            request.interactive
        );

        let result = self.run_cycle(cycle, request).await;

        self.set_phase(cycle, SyncPhase::Reporting).await;
        {
            let mut board = self.status.write().await;
            let status = &mut board.status;
            match &result {
                Ok(report) => {
                    log::info!(
                        "Sync #{} completed ({} active records{})",
                        cycle,
                        report.count,
                        if report.has_conflict() { ", settings conflict" } else { "" }
                    );
                    status.last_sync_at = Some(Utc::now());
                    status.last_mode = Some(report.mode);
                    status.active_count = Some(report.count);
                    status.conflict_pending = report.has_conflict();
                    status.last_error = None;
                    status.last_error_kind = None;
                }
                Err(e) => {
                    log::error!("Sync #{} failed: {}", cycle, e);
                    status.last_error = Some(e.user_message());
                    status.last_error_kind = Some(e.kind().to_string());
                }
            }
        }
        self.set_phase(cycle, SyncPhase::Idle).await;

        result
    }

    async fn run_cycle(&self, cycle: u64, request: SyncRequest) -> Result<SyncReport, SyncError> {
        self.set_phase(cycle, SyncPhase::AcquiringCredential).await;
        let token = self.credentials.acquire(request.interactive).await?;

        self.set_phase(cycle, SyncPhase::Locating).await;
        let handle = self.remote.locate(&token).await?;

        match request.mode {
            SyncMode::Push => {
                self.set_phase(cycle, SyncPhase::Pushing).await;
                self.push(&token, handle).await
            }
            SyncMode::Pull => {
                self.set_phase(cycle, SyncPhase::Pulling).await;
                self.pull(&token, handle, request.interactive).await
            }
        }
    }

    /// Overwrite the remote document with local state
    async fn push(&self, token: &str, handle: Option<SnapshotHandle>) -> Result<SyncReport, SyncError> {
        let snapshot = {
            let _guard = self.gate.acquire().await;
            RemoteSnapshot {
                records: self.store.get_records()?,
                settings: self.store.get_settings()?,
                written_at: now_millis(),
            }
        };

        let count = count_active(&snapshot.records);
        let bytes = codec::encode(&snapshot)?;

        log::info!(
            "Uploading backup ({} records, {} bytes, {})",
            snapshot.records.len(),
            bytes.len(),
            if handle.is_some() { "overwrite" } else { "create" }
        );
        self.remote.write(token, bytes, handle.as_ref()).await?;

        Ok(SyncReport {
            count,
            mode: SyncMode::Push,
            conflict: None,
        })
    }

    /// Merge the remote document into local state, then write it back
    async fn pull(
        &self,
        token: &str,
        handle: Option<SnapshotHandle>,
        interactive: bool,
    ) -> Result<SyncReport, SyncError> {
        let handle = match handle {
            Some(handle) => handle,
            None => {
                let records = {
                    let _guard = self.gate.acquire().await;
                    self.store.get_records()?
                };
                log::info!("No remote snapshot found, nothing to pull");
                return Ok(SyncReport {
                    count: count_active(&records),
                    mode: SyncMode::Pull,
                    conflict: None,
                });
            }
        };

        log::info!("Downloading remote snapshot...");
        let bytes = self.remote.fetch(token, &handle).await?;
        let remote = codec::decode(&bytes)?;

        let (outgoing, report) = {
            let _guard = self.gate.acquire().await;

            let local_records = self.store.get_records()?;
            let local_settings = self.store.get_settings()?;

            let records = merge_records(&local_records, &remote.records);
            let settings = merge_settings(local_settings.as_ref(), remote.settings.as_ref(), interactive);

            self.store.put_records(&records)?;
            if settings.merged != local_settings {
                if let Some(doc) = &settings.merged {
                    self.store.put_settings(doc)?;
                }
            }

            let report = SyncReport {
                count: count_active(&records),
                mode: SyncMode::Pull,
                conflict: settings.conflict,
            };
            let outgoing = RemoteSnapshot {
                settings: outgoing_settings(remote.settings, settings.merged),
                records,
                written_at: now_millis(),
            };
            (outgoing, report)
        };

        let bytes = codec::encode(&outgoing)?;
        log::info!("Uploading merged backup...");
        self.remote.write(token, bytes, Some(&handle)).await?;

        Ok(report)
    }

    /// Drop the cached credential and any persisted grant; stored data stays
    ///
    /// Never contacts the token endpoint.
    pub async fn logout(&self) -> Result<(), SyncError> {
        self.credentials.sign_out().await?;

        log::info!("Signed out of remote storage");
        Ok(())
    }

    async fn set_phase(&self, cycle: u64, phase: SyncPhase) {
        log::debug!("Sync #{} -> {}", cycle, phase.as_str());
        self.status.write().await.enter(cycle, phase);
    }
}

/// Settings written back on PULL: a strictly newer remote document is never
/// replaced by an older local one.
fn outgoing_settings(
    remote: Option<SettingsDocument>,
    merged: Option<SettingsDocument>,
) -> Option<SettingsDocument> {
    match (remote, merged) {
        (Some(remote), Some(merged)) if remote.timestamp() > merged.timestamp() => Some(remote),
        (remote, None) => remote,
        (_, merged) => merged,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(ts: i64) -> SettingsDocument {
        SettingsDocument::default().stamped(ts)
    }

    #[test]
    fn test_phase_follows_latest_running_cycle() {
        let mut board = StatusBoard::default();

        board.enter(1, SyncPhase::Pulling);
        board.enter(2, SyncPhase::Pushing);
        assert_eq!(board.status.phase, SyncPhase::Pushing);

        // The push finishes first; the pull is still running
        board.enter(2, SyncPhase::Idle);
        assert_eq!(board.status.phase, SyncPhase::Pulling);

        board.enter(1, SyncPhase::Reporting);
        assert_eq!(board.status.phase, SyncPhase::Reporting);
        board.enter(1, SyncPhase::Idle);
        assert_eq!(board.status.phase, SyncPhase::Idle);
        assert!(board.running.is_empty());
    }

    #[test]
    fn test_outgoing_settings_prefers_newer_remote() {
        assert_eq!(outgoing_settings(Some(doc(80)), Some(doc(50))), Some(doc(80)));
        assert_eq!(outgoing_settings(Some(doc(50)), Some(doc(80))), Some(doc(80)));
        assert_eq!(outgoing_settings(Some(doc(50)), Some(doc(50))), Some(doc(50)));
        assert_eq!(outgoing_settings(None, Some(doc(1))), Some(doc(1)));
        assert_eq!(outgoing_settings(Some(doc(1)), None), Some(doc(1)));
        assert_eq!(outgoing_settings(None, None), None);
    }
}

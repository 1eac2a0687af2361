//! Sync Module - Local/Remote Snapshot Synchronization
//!
//! Keeps the local word book and settings consistent with one JSON snapshot
//! stored in the Google Drive app-data folder.
//!
//! Architecture:
//! - MutationGate: one read-decide-write sequence at a time
//! - Merge: per-record last-writer-wins with tombstones, whole-document settings
//! - Modes: PUSH (overwrite remote) and PULL (merge, then write both sides)

pub mod api;
pub mod codec;
pub mod engine;
pub mod error;
pub mod gate;
pub mod merge;
pub mod models;
pub mod remote;
pub mod store;


// Re-export commonly used types
pub use api::{DriveClient, DriveConfig, DriveError, RemoteStore, SnapshotHandle};
pub use codec::CodecError;
pub use engine::SyncEngine;
pub use error::SyncError;
pub use gate::MutationGate;
pub use merge::{count_active, merge_records, merge_settings, SettingsMerge};
pub use models::{
    ConflictChoice, RecordEntry, RecordMap, RemoteSnapshot, SettingsConflict, SettingsDocument,
    SyncMode, SyncReport, SyncRequest, SyncStatus,
};
pub use store::LocalStore;

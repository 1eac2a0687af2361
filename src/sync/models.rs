//! Sync Data Models - Records, Settings and Snapshots
//!
//! Defines the data structures shared by the local store, the snapshot
//! codec and the merge resolver.
//!
//! Data Categories:
//! - RecordEntry: one saved vocabulary entry (soft-deleted via tombstone)
//! - SettingsDocument: the single per-store settings bundle
//! - RemoteSnapshot: the whole synchronized state as stored remotely
//! - SyncRequest / SyncReport / SyncStatus: engine inputs and outputs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Record map keyed by record id
pub type RecordMap = BTreeMap<String, RecordEntry>;

/// Payload keys owned by the engine; never stored inside `payload`
pub const RESERVED_KEYS: [&str; 4] = ["id", "createdAt", "updatedAt", "isDeleted"];

/// Current time as epoch milliseconds
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

// ============================================================================
// Records
// ============================================================================

/// One saved vocabulary entry
///
/// The payload (word, context, markdown, ...) belongs to the presentation
/// layer and is carried through verbatim as flattened JSON keys.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordEntry {
    pub id: String,

    /// Assignment time, immutable
    #[serde(default)]
    pub created_at: i64,

    /// Last mutation time (conflict resolution key)
    #[serde(default)]
    pub updated_at: i64,

    /// Tombstone flag
    #[serde(default)]
    pub is_deleted: bool,

    #[serde(flatten)]
    pub payload: Map<String, Value>,
}

impl RecordEntry {
    /// Create a new entry with both timestamps set to `now`
    pub fn new(id: String, mut payload: Map<String, Value>, now: i64) -> Self {
        for key in RESERVED_KEYS {
            payload.remove(key);
        }

        Self {
            id,
            created_at: now,
            updated_at: now,
            is_deleted: false,
            payload,
        }
    }

    pub fn is_active(&self) -> bool {
        !self.is_deleted
    }

    /// Flip the tombstone and bump `updated_at` (never moves backwards)
    pub fn mark_deleted(&mut self, now: i64) {
        self.is_deleted = true;
        self.updated_at = self.updated_at.max(now);
    }

    /// The looked-up text, if the presentation layer stored one
    pub fn word(&self) -> Option<&str> {
        self.payload.get("word").and_then(Value::as_str)
    }
}

// ============================================================================
// Settings
// ============================================================================

/// Keyboard shortcut bindings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShortcutSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Key that triggers an explanation
    #[serde(default = "default_explain_key")]
    pub explain: String,

    /// Key that plays audio
    #[serde(default = "default_play_key")]
    pub play: String,
}

impl Default for ShortcutSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            explain: default_explain_key(),
            play: default_play_key(),
        }
    }
}

/// The single per-store settings document
///
/// Replaced wholesale on every save or reset, never merged field by field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingsDocument {
    /// Overrides the default system prompt when set
    #[serde(default)]
    pub custom_prompt: Option<String>,

    #[serde(default)]
    pub shortcuts: ShortcutSettings,

    #[serde(default = "default_true")]
    pub show_buttons: bool,

    #[serde(default = "default_true", rename = "autoPlayTTS")]
    pub auto_play_tts: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<i64>,
}

impl Default for SettingsDocument {
    fn default() -> Self {
        Self {
            custom_prompt: None,
            shortcuts: ShortcutSettings::default(),
            show_buttons: true,
            auto_play_tts: true,
            updated_at: None,
        }
    }
}

impl SettingsDocument {
    /// Defaults carrying a legacy free-text prompt
    pub fn from_legacy_prompt(prompt: String) -> Self {
        Self {
            custom_prompt: Some(prompt),
            ..Self::default()
        }
    }

    /// Conflict-resolution timestamp; absent counts as epoch 0
    pub fn timestamp(&self) -> i64 {
        self.updated_at.unwrap_or(0)
    }

    /// Same document with `updated_at` set to `now`
    pub fn stamped(mut self, now: i64) -> Self {
        self.updated_at = Some(now);
        self
    }
}

fn default_true() -> bool {
    true
}

fn default_explain_key() -> String {
    "e".to_string()
}

fn default_play_key() -> String {
    "p".to_string()
}

// ============================================================================
// Snapshot
// ============================================================================

/// The whole synchronized state, as held by the remote document
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteSnapshot {
    pub records: RecordMap,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub settings: Option<SettingsDocument>,

    /// Informational only
    pub written_at: i64,
}

// ============================================================================
// Engine inputs / outputs
// ============================================================================

/// Sync direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SyncMode {
    /// Overwrite remote with local
    Push,
    /// Merge remote into local, then write back both sides
    Pull,
}

impl SyncMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncMode::Push => "PUSH",
            SyncMode::Pull => "PULL",
        }
    }
}

impl std::str::FromStr for SyncMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "PUSH" => Ok(SyncMode::Push),
            "PULL" => Ok(SyncMode::Pull),
            _ => Err(format!("Invalid sync mode: {}", s)),
        }
    }
}

/// Parameters of one sync cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncRequest {
    /// User is present: may prompt for credentials and settings conflicts
    pub interactive: bool,
    pub mode: SyncMode,
}

impl SyncRequest {
    /// Background push after a local mutation
    pub fn background_push() -> Self {
        Self { interactive: false, mode: SyncMode::Push }
    }

    /// App-start auto-restore
    pub fn silent_pull() -> Self {
        Self { interactive: false, mode: SyncMode::Pull }
    }
}

/// Settings conflict surfaced to the user in interactive mode
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SettingsConflict {
    pub local: SettingsDocument,
    pub remote: SettingsDocument,
}

/// Which side of a settings conflict the user kept
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConflictChoice {
    Local,
    Remote,
}

/// Successful sync outcome
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncReport {
    /// Active (non-tombstoned) records after the cycle
    pub count: usize,
    pub mode: SyncMode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conflict: Option<SettingsConflict>,
}

impl SyncReport {
    pub fn has_conflict(&self) -> bool {
        self.conflict.is_some()
    }
}

/// Sync cycle phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncPhase {
    Idle,
    AcquiringCredential,
    Locating,
    Pushing,
    Pulling,
    Reporting,
}

impl SyncPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncPhase::Idle => "idle",
            SyncPhase::AcquiringCredential => "acquiring_credential",
            SyncPhase::Locating => "locating",
            SyncPhase::Pushing => "pushing",
            SyncPhase::Pulling => "pulling",
            SyncPhase::Reporting => "reporting",
        }
    }
}

/// Passive status indicator for the latest cycle
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncStatus {
    pub phase: SyncPhase,
    pub last_sync_at: Option<DateTime<Utc>>,
    pub last_mode: Option<SyncMode>,
    pub active_count: Option<usize>,
    pub conflict_pending: bool,
    pub last_error: Option<String>,
    /// `SyncError::kind` of the last failure
    pub last_error_kind: Option<String>,
}

impl Default for SyncStatus {
    fn default() -> Self {
        Self {
            phase: SyncPhase::Idle,
            last_sync_at: None,
            last_mode: None,
            active_count: None,
            conflict_pending: false,
            last_error: None,
            last_error_kind: None,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_record_serializes_flat() {
        let payload = json!({"word": "serendipity", "context": "a happy accident"});
        let entry = RecordEntry::new("1".to_string(), payload.as_object().unwrap().clone(), 100);

        let value = serde_json::to_value(&entry).unwrap();
        assert_eq!(value["id"], "1");
        assert_eq!(value["word"], "serendipity");
        assert_eq!(value["createdAt"], 100);
        assert_eq!(value["updatedAt"], 100);
        assert_eq!(value["isDeleted"], false);
    }

    #[test]
    fn test_new_record_strips_reserved_payload_keys() {
        let payload = json!({"word": "x", "id": "spoofed", "isDeleted": true});
        let entry = RecordEntry::new("real".to_string(), payload.as_object().unwrap().clone(), 5);

        assert_eq!(entry.id, "real");
        assert!(entry.is_active());
        assert!(!entry.payload.contains_key("id"));
        assert!(!entry.payload.contains_key("isDeleted"));
    }

    #[test]
    fn test_mark_deleted_never_moves_timestamp_backwards() {
        let mut entry = RecordEntry::new("1".to_string(), Map::new(), 500);
        entry.mark_deleted(300);

        assert!(entry.is_deleted);
        assert_eq!(entry.updated_at, 500);

        entry.mark_deleted(900);
        assert_eq!(entry.updated_at, 900);
    }

    #[test]
    fn test_settings_defaults_from_empty_object() {
        let settings: SettingsDocument = serde_json::from_str("{}").unwrap();

        assert_eq!(settings, SettingsDocument::default());
        assert!(settings.shortcuts.enabled);
        assert_eq!(settings.shortcuts.explain, "e");
        assert_eq!(settings.shortcuts.play, "p");
        assert_eq!(settings.timestamp(), 0);
    }

    #[test]
    fn test_settings_wire_names() {
        let settings = SettingsDocument::default().stamped(42);
        let value = serde_json::to_value(&settings).unwrap();

        assert_eq!(value["autoPlayTTS"], true);
        assert_eq!(value["showButtons"], true);
        assert_eq!(value["updatedAt"], 42);
        assert!(value["customPrompt"].is_null());
    }

    #[test]
    fn test_sync_mode_parse() {
        assert_eq!("pull".parse::<SyncMode>().unwrap(), SyncMode::Pull);
        assert_eq!("PUSH".parse::<SyncMode>().unwrap(), SyncMode::Push);
        assert!("merge".parse::<SyncMode>().is_err());
    }
}

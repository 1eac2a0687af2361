//! Snapshot Codec - wire format of the remote document
//!
//! Three shapes exist in the wild:
//! - Current:      `{ records, settings, writtenAt }` (older writers used
//!                 `savedWords` / `userSettings` / `updatedAt`)
//! - LegacyPrompt: `{ customPrompt }` with no records and no settings
//! - BareRecords:  the record map itself is the whole document
//!
//! Decoding classifies the document first, then normalizes every shape into
//! a `RemoteSnapshot`, so merge logic never sees a legacy shape.

use super::models::{RecordEntry, RecordMap, RemoteSnapshot, SettingsDocument};
use serde::Deserialize;
use serde_json::{Map, Value};

const RECORDS_KEYS: [&str; 2] = ["records", "savedWords"];
const SETTINGS_KEYS: [&str; 2] = ["settings", "userSettings"];
const WRITTEN_AT_KEYS: [&str; 2] = ["writtenAt", "updatedAt"];
const LEGACY_PROMPT_KEY: &str = "customPrompt";

/// Codec errors (malformed bytes only)
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("Malformed snapshot JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Snapshot is not a JSON object")]
    NotAnObject,

    #[error("Malformed record '{id}': {reason}")]
    Record { id: String, reason: String },

    #[error("Malformed settings document: {0}")]
    Settings(String),
}

/// Classified document, before normalization
enum SnapshotShape {
    Current {
        records: Option<Value>,
        settings: Option<Value>,
        legacy_prompt: Option<Value>,
        written_at: Option<Value>,
    },
    LegacyPrompt(Value),
    BareRecords(Map<String, Value>),
}

impl SnapshotShape {
    fn classify(mut doc: Map<String, Value>) -> Self {
        let has_records = RECORDS_KEYS.iter().any(|k| doc.contains_key(*k));
        let has_settings = SETTINGS_KEYS.iter().any(|k| doc.contains_key(*k));

        if has_records || has_settings {
            return SnapshotShape::Current {
                records: take_first(&mut doc, &RECORDS_KEYS),
                settings: take_first(&mut doc, &SETTINGS_KEYS),
                legacy_prompt: doc.remove(LEGACY_PROMPT_KEY),
                written_at: take_first(&mut doc, &WRITTEN_AT_KEYS),
            };
        }

        match doc.remove(LEGACY_PROMPT_KEY) {
            Some(prompt) => SnapshotShape::LegacyPrompt(prompt),
            None => SnapshotShape::BareRecords(doc),
        }
    }
}

/// Remove the first present key of `keys`
fn take_first(doc: &mut Map<String, Value>, keys: &[&str]) -> Option<Value> {
    keys.iter().find_map(|k| doc.remove(*k)).filter(|v| !v.is_null())
}

/// Record as it may appear on the wire (current or legacy)
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireRecord {
    #[serde(default)]
    id: Option<Value>,
    #[serde(default)]
    created_at: Option<i64>,
    #[serde(default)]
    updated_at: Option<i64>,
    /// Legacy single timestamp
    #[serde(default)]
    timestamp: Option<i64>,
    #[serde(default)]
    is_deleted: Option<bool>,
    #[serde(flatten)]
    payload: Map<String, Value>,
}

impl WireRecord {
    fn into_entry(self, key: &str) -> RecordEntry {
        let updated_at = self.updated_at.or(self.timestamp).unwrap_or(0);
        let created_at = self.created_at.or(self.timestamp).unwrap_or(updated_at);

        RecordEntry {
            id: key.to_string(),
            created_at,
            updated_at,
            is_deleted: self.is_deleted.unwrap_or(false),
            payload: self.payload,
        }
    }
}

/// Decode raw snapshot bytes, normalizing legacy shapes
pub fn decode(bytes: &[u8]) -> Result<RemoteSnapshot, CodecError> {
    let doc = match serde_json::from_slice::<Value>(bytes)? {
        Value::Object(doc) => doc,
        _ => return Err(CodecError::NotAnObject),
    };

    match SnapshotShape::classify(doc) {
        SnapshotShape::Current { records, settings, legacy_prompt, written_at } => {
            let records = match records {
                Some(Value::Object(map)) => decode_records(map, true)?,
                Some(_) => return Err(CodecError::Record {
                    id: "*".to_string(),
                    reason: "records is not an object".to_string(),
                }),
                None => RecordMap::new(),
            };

            let settings = match settings {
                Some(value) => Some(
                    serde_json::from_value::<SettingsDocument>(value)
                        .map_err(|e| CodecError::Settings(e.to_string()))?,
                ),
                None => legacy_prompt.and_then(prompt_to_settings),
            };

            Ok(RemoteSnapshot {
                records,
                settings,
                written_at: written_at.and_then(|v| v.as_i64()).unwrap_or(0),
            })
        }
        SnapshotShape::LegacyPrompt(prompt) => {
            log::info!("Decoding legacy prompt-only snapshot");
            Ok(RemoteSnapshot {
                records: RecordMap::new(),
                settings: prompt_to_settings(prompt),
                written_at: 0,
            })
        }
        SnapshotShape::BareRecords(map) => {
            log::info!("Decoding legacy bare-records snapshot ({} entries)", map.len());
            Ok(RemoteSnapshot {
                records: decode_records(map, false)?,
                settings: None,
                written_at: 0,
            })
        }
    }
}

/// Encode a snapshot in the current shape
pub fn encode(snapshot: &RemoteSnapshot) -> Result<Vec<u8>, CodecError> {
    Ok(serde_json::to_vec(snapshot)?)
}

/// In a current-shape document every entry must be a record; in a bare
/// document non-object entries are stray keys and are skipped.
fn decode_records(map: Map<String, Value>, strict: bool) -> Result<RecordMap, CodecError> {
    let mut records = RecordMap::new();

    for (key, value) in map {
        if !value.is_object() {
            if strict {
                return Err(CodecError::Record { id: key, reason: "not an object".to_string() });
            }
            log::warn!("Skipping non-record key '{}' in legacy snapshot", key);
            continue;
        }

        let wire: WireRecord = serde_json::from_value(value)
            .map_err(|e| CodecError::Record { id: key.clone(), reason: e.to_string() })?;

        if let Some(Value::String(inner)) = &wire.id {
            if inner != &key {
                log::warn!("Record key '{}' disagrees with embedded id '{}', keeping key", key, inner);
            }
        }

        let entry = wire.into_entry(&key);
        records.insert(key, entry);
    }

    Ok(records)
}

fn prompt_to_settings(prompt: Value) -> Option<SettingsDocument> {
    match prompt {
        Value::String(s) if !s.is_empty() => Some(SettingsDocument::from_legacy_prompt(s)),
        _ => None,
    }
}

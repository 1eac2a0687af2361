//! Merge Resolver - pure conflict resolution for records and settings
//!
//! Records merge per id by last-writer-wins on `updated_at`, ties keeping
//! the local entry. Settings merge at whole-document granularity and never
//! silently replace an existing local document with a newer remote one.

use super::models::{RecordMap, SettingsConflict, SettingsDocument};

/// Number of records whose tombstone is unset
pub fn count_active(records: &RecordMap) -> usize {
    records.values().filter(|r| r.is_active()).count()
}

/// Merge `remote` into `local`.
///
/// Remote-only ids are adopted, local-only ids are kept, and ids present on
/// both sides keep the entry with the larger `updated_at`. Tombstones are
/// ordinary entries here, so a deletion propagates only by winning on time.
pub fn merge_records(local: &RecordMap, remote: &RecordMap) -> RecordMap {
    let mut merged = local.clone();

    for (id, remote_entry) in remote {
        match merged.get(id) {
            Some(local_entry) if local_entry.updated_at >= remote_entry.updated_at => {}
            _ => {
                merged.insert(id.clone(), remote_entry.clone());
            }
        }
    }

    merged
}

/// Result of merging two settings documents
#[derive(Debug, Clone, PartialEq)]
pub struct SettingsMerge {
    /// Document the local store should hold afterwards
    pub merged: Option<SettingsDocument>,
    /// Set only in interactive mode when the remote document is newer
    pub conflict: Option<SettingsConflict>,
}

impl SettingsMerge {
    fn keep(local: Option<&SettingsDocument>) -> Self {
        Self {
            merged: local.cloned(),
            conflict: None,
        }
    }
}

/// Merge settings documents.
///
/// - remote absent: keep local
/// - local absent: adopt remote (there is nothing local to overwrite)
/// - identical documents: keep local
/// - remote strictly newer: keep local; report a conflict when `interactive`
/// - otherwise: keep local
pub fn merge_settings(
    local: Option<&SettingsDocument>,
    remote: Option<&SettingsDocument>,
    interactive: bool,
) -> SettingsMerge {
    let remote = match remote {
        Some(remote) => remote,
        None => return SettingsMerge::keep(local),
    };

    let local = match local {
        Some(local) => local,
        None => {
            return SettingsMerge {
                merged: Some(remote.clone()),
                conflict: None,
            }
        }
    };

    if local == remote || local.timestamp() >= remote.timestamp() {
        return SettingsMerge::keep(Some(local));
    }

    if interactive {
        SettingsMerge {
            merged: Some(local.clone()),
            conflict: Some(SettingsConflict {
                local: local.clone(),
                remote: remote.clone(),
            }),
        }
    } else {
        log::info!(
            "Remote settings are newer ({} > {}); keeping local settings in silent sync",
            remote.timestamp(),
            local.timestamp()
        );
        SettingsMerge::keep(Some(local))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::models::RecordEntry;
    use serde_json::{json, Map};

    fn record(id: &str, updated_at: i64, deleted: bool) -> RecordEntry {
        RecordEntry {
            id: id.to_string(),
            created_at: 1,
            updated_at,
            is_deleted: deleted,
            payload: json!({ "word": format!("w{}", id) }).as_object().unwrap().clone(),
        }
    }

    fn map(entries: Vec<RecordEntry>) -> RecordMap {
        entries.into_iter().map(|e| (e.id.clone(), e)).collect()
    }

    fn settings(updated_at: Option<i64>, prompt: &str) -> SettingsDocument {
        SettingsDocument {
            custom_prompt: Some(prompt.to_string()),
            updated_at,
            ..SettingsDocument::default()
        }
    }

    // ========================================================================
    // Records
    // ========================================================================

    #[test]
    fn test_remote_only_adopted_and_local_only_kept() {
        let local = map(vec![record("a", 1, false)]);
        let remote = map(vec![record("b", 1, false)]);

        let merged = merge_records(&local, &remote);

        assert_eq!(merged.len(), 2);
        assert_eq!(merged["a"], local["a"]);
        assert_eq!(merged["b"], remote["b"]);
    }

    #[test]
    fn test_newer_side_wins() {
        let local = map(vec![record("a", 300, false), record("b", 100, false)]);
        let remote = map(vec![record("a", 200, true), record("b", 400, false)]);

        let merged = merge_records(&local, &remote);

        assert_eq!(merged["a"], local["a"]);
        assert_eq!(merged["b"], remote["b"]);
        for id in ["a", "b"] {
            assert_eq!(
                merged[id].updated_at,
                local[id].updated_at.max(remote[id].updated_at)
            );
        }
    }

    #[test]
    fn test_tie_keeps_local() {
        let mut local_entry = record("a", 100, false);
        local_entry.payload.insert("note".to_string(), json!("local"));
        let mut remote_entry = record("a", 100, true);
        remote_entry.payload.insert("note".to_string(), json!("remote"));

        let merged = merge_records(&map(vec![local_entry.clone()]), &map(vec![remote_entry]));

        assert_eq!(merged["a"], local_entry);
    }

    #[test]
    fn test_remote_tombstone_newer_wins() {
        let local = map(vec![record("1", 100, false)]);
        let remote = map(vec![record("1", 200, true)]);

        let merged = merge_records(&local, &remote);

        assert!(merged["1"].is_deleted);
        assert_eq!(merged["1"].updated_at, 200);
    }

    #[test]
    fn test_local_tombstone_survives_older_remote() {
        let local = map(vec![record("1", 200, true)]);
        let remote = map(vec![record("1", 100, false)]);

        let merged = merge_records(&local, &remote);

        assert!(merged["1"].is_deleted);
        assert_eq!(count_active(&merged), 0);
    }

    #[test]
    fn test_tombstone_cleared_only_by_strictly_newer_live_entry() {
        let local = map(vec![record("1", 200, true)]);

        let tie = merge_records(&local, &map(vec![record("1", 200, false)]));
        assert!(tie["1"].is_deleted);

        let newer = merge_records(&local, &map(vec![record("1", 201, false)]));
        assert!(!newer["1"].is_deleted);
    }

    #[test]
    fn test_merge_records_idempotent() {
        let local = map(vec![
            record("a", 5, false),
            record("b", 50, true),
            record("c", 7, false),
        ]);
        let remote = map(vec![
            record("a", 9, true),
            record("b", 10, false),
            record("d", 1, false),
        ]);

        let once = merge_records(&local, &remote);
        let twice = merge_records(&once, &remote);

        assert_eq!(once, twice);
    }

    #[test]
    fn test_merge_with_empty_sides() {
        let local = map(vec![record("a", 1, false)]);
        let empty = RecordMap::new();

        assert_eq!(merge_records(&local, &empty), local);
        assert_eq!(merge_records(&empty, &local), local);
    }

    #[test]
    fn test_count_active_excludes_tombstones() {
        let records = map(vec![
            record("a", 1, false),
            record("b", 1, true),
            record("c", 1, true),
            RecordEntry::new("d".to_string(), Map::new(), 3),
        ]);

        assert_eq!(count_active(&records), 2);
        assert_eq!(count_active(&RecordMap::new()), 0);
    }

    // ========================================================================
    // Settings
    // ========================================================================

    #[test]
    fn test_remote_absent_keeps_local() {
        let local = settings(Some(10), "mine");

        let result = merge_settings(Some(&local), None, true);

        assert_eq!(result.merged, Some(local));
        assert!(result.conflict.is_none());
    }

    #[test]
    fn test_both_absent() {
        let result = merge_settings(None, None, false);
        assert_eq!(result, SettingsMerge { merged: None, conflict: None });
    }

    #[test]
    fn test_local_absent_adopts_remote() {
        let remote = settings(Some(80), "cloud");

        for interactive in [false, true] {
            let result = merge_settings(None, Some(&remote), interactive);
            assert_eq!(result.merged.as_ref(), Some(&remote));
            assert!(result.conflict.is_none());
        }
    }

    #[test]
    fn test_identical_documents_no_conflict() {
        let doc = settings(Some(10), "same");

        let result = merge_settings(Some(&doc), Some(&doc.clone()), true);

        assert_eq!(result.merged, Some(doc));
        assert!(result.conflict.is_none());
    }

    #[test]
    fn test_silent_keeps_stale_local() {
        let local = settings(Some(50), "local");
        let remote = settings(Some(80), "remote");

        let result = merge_settings(Some(&local), Some(&remote), false);

        assert_eq!(result.merged, Some(local));
        assert!(result.conflict.is_none());
    }

    #[test]
    fn test_interactive_reports_conflict_with_both_documents() {
        let local = settings(Some(50), "local");
        let remote = settings(Some(80), "remote");

        let result = merge_settings(Some(&local), Some(&remote), true);

        assert_eq!(result.merged.as_ref(), Some(&local));
        let conflict = result.conflict.unwrap();
        assert_eq!(conflict.local, local);
        assert_eq!(conflict.remote, remote);
    }

    #[test]
    fn test_local_newer_or_equal_time_wins() {
        let local = settings(Some(80), "local");
        let older = settings(Some(50), "remote");
        let same_time = settings(Some(80), "remote");

        for remote in [older, same_time] {
            let result = merge_settings(Some(&local), Some(&remote), true);
            assert_eq!(result.merged.as_ref(), Some(&local));
            assert!(result.conflict.is_none());
        }
    }

    #[test]
    fn test_missing_timestamp_counts_as_epoch() {
        let local = settings(None, "untimed");
        let remote = settings(Some(1), "timed");

        let silent = merge_settings(Some(&local), Some(&remote), false);
        assert_eq!(silent.merged.as_ref(), Some(&local));

        let interactive = merge_settings(Some(&local), Some(&remote), true);
        assert!(interactive.conflict.is_some());
    }
}

//! Local Store - persistence contract for the record map and settings
//!
//! Each call is atomic on its own. Nothing here isolates one call from the
//! next; multi-step sequences must run under the `MutationGate`.

use super::models::{RecordMap, SettingsDocument};
use crate::db::DbResult;

/// Key-value persistence of the two synchronized documents
pub trait LocalStore: Send + Sync {
    /// Whole record map, tombstones included
    fn get_records(&self) -> DbResult<RecordMap>;

    /// Replace the whole record map
    fn put_records(&self, records: &RecordMap) -> DbResult<()>;

    /// Settings document, if one (or a legacy prompt) was ever stored
    fn get_settings(&self) -> DbResult<Option<SettingsDocument>>;

    /// Replace the settings document
    fn put_settings(&self, settings: &SettingsDocument) -> DbResult<()>;
}

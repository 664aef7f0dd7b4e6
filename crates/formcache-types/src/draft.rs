//! Draft records.

use serde::{Deserialize, Serialize};

/// Milliseconds since the Unix epoch.
pub type Millis = i64;

/// Current version of the persisted record layout.
pub const RECORD_VERSION: u32 = 1;

/// Lifecycle metadata stored alongside every draft.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageMetadata {
    /// Owner of the draft.
    pub user_id: String,
    /// Session during which the draft was last written.
    pub session_id: String,
    /// First save; carried forward across updates.
    pub created_at: Millis,
    /// Most recent save.
    pub last_modified: Millis,
    /// `last_modified + ttl` at the time of the most recent save.
    pub expires_at: Millis,
    pub version: u32,
}

impl StorageMetadata {
    /// Whether the draft is past its expiry at `now`.
    ///
    /// A draft expiring exactly at `now` is still live.
    pub fn is_expired(&self, now: Millis) -> bool {
        self.expires_at < now
    }
}

/// A persisted, not-yet-submitted form payload plus its metadata.
///
/// The payload type defaults to raw JSON; callers that know the shape of
/// their form can decode straight into it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredDraft<T = serde_json::Value> {
    pub metadata: StorageMetadata,
    pub form_data: T,
    pub entity_type: String,
    #[serde(default)]
    pub entity_id: String,
    #[serde(default)]
    pub is_dirty: bool,
    #[serde(default)]
    pub auto_save_enabled: bool,
}

//! Draft record codec.
//!
//! Turns draft records, indexes and the session id into the store's string
//! values and back. Everything is JSON; the record layout comes from
//! `formcache-types`.

use std::sync::Arc;

use formcache_types::{StorageMetadata, StoredDraft};
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::config::KeyLayout;
use crate::error::{Error, Result};
use crate::store::KeyValueStore;

/// Just the metadata of a draft record; the payload is skipped.
#[derive(Debug, serde::Deserialize)]
struct DraftEnvelope {
    metadata: StorageMetadata,
}

/// Typed access to the key/value store under a fixed key layout.
#[derive(Debug, Clone)]
pub struct DraftCodec {
    store: Arc<dyn KeyValueStore>,
    layout: KeyLayout,
}

impl DraftCodec {
    pub fn new(store: Arc<dyn KeyValueStore>, layout: KeyLayout) -> Self {
        Self { store, layout }
    }

    pub fn layout(&self) -> &KeyLayout {
        &self.layout
    }

    pub fn store(&self) -> &Arc<dyn KeyValueStore> {
        &self.store
    }

    /// Read and decode the value at `key`.
    pub fn read<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let Some(raw) = self.store.get(key)? else {
            return Ok(None);
        };
        serde_json::from_str(&raw)
            .map(Some)
            .map_err(|source| Error::Decode {
                key: key.to_string(),
                source,
            })
    }

    /// Encode and store `value` at `key`.
    pub fn write<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<()> {
        let raw = serde_json::to_string(value).map_err(|source| Error::Encode {
            key: key.to_string(),
            source,
        })?;
        self.store.set(key, &raw)?;
        Ok(())
    }

    pub fn remove(&self, key: &str) -> Result<()> {
        self.store.remove(key)?;
        Ok(())
    }

    pub fn read_draft<T: DeserializeOwned>(&self, key: &str) -> Result<Option<StoredDraft<T>>> {
        self.read(key)
    }

    pub fn write_draft<T: Serialize>(&self, key: &str, draft: &StoredDraft<T>) -> Result<()> {
        self.write(key, draft)
    }

    /// Decode only the metadata of the draft at `key`.
    pub fn read_metadata(&self, key: &str) -> Result<Option<StorageMetadata>> {
        Ok(self.read::<DraftEnvelope>(key)?.map(|e| e.metadata))
    }

    /// Read the persisted session id.
    ///
    /// The id is normally stored JSON-encoded; a bare string written by
    /// some other client is accepted as-is.
    pub fn read_session_id(&self) -> Result<Option<String>> {
        Ok(self
            .store
            .get(&self.layout.session_id_key)?
            .map(|raw| decode_session_value(&raw))
            .filter(|id| !id.is_empty()))
    }

    pub fn write_session_id(&self, session_id: &str) -> Result<()> {
        let key = self.layout.session_id_key.clone();
        self.write(&key, session_id)
    }

    pub fn remove_session_id(&self) -> Result<()> {
        self.remove(&self.layout.session_id_key)
    }
}

/// Interpret a raw value found under the session key.
pub(crate) fn decode_session_value(raw: &str) -> String {
    serde_json::from_str::<String>(raw).unwrap_or_else(|_| raw.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use formcache_types::RECORD_VERSION;
    use serde_json::json;

    fn codec() -> (Arc<MemoryStore>, DraftCodec) {
        let store = Arc::new(MemoryStore::new());
        let codec = DraftCodec::new(store.clone(), KeyLayout::default());
        (store, codec)
    }

    fn draft() -> StoredDraft {
        StoredDraft {
            metadata: StorageMetadata {
                user_id: "u1".to_string(),
                session_id: "s1".to_string(),
                created_at: 1,
                last_modified: 2,
                expires_at: 3,
                version: RECORD_VERSION,
            },
            form_data: json!({"street": "Main", "tags": ["a", "b"]}),
            entity_type: "client".to_string(),
            entity_id: "7".to_string(),
            is_dirty: true,
            auto_save_enabled: true,
        }
    }

    #[test]
    fn test_draft_roundtrip() {
        let (_, codec) = codec();
        codec.write_draft("fc_draft_u1_client_7", &draft()).unwrap();

        let loaded: StoredDraft = codec.read_draft("fc_draft_u1_client_7").unwrap().unwrap();
        assert_eq!(loaded, draft());

        let meta = codec.read_metadata("fc_draft_u1_client_7").unwrap().unwrap();
        assert_eq!(meta.expires_at, 3);
    }

    #[test]
    fn test_missing_key_is_none() {
        let (_, codec) = codec();
        assert!(codec.read_draft::<serde_json::Value>("nope").unwrap().is_none());
    }

    #[test]
    fn test_corrupt_value_is_decode_error() {
        let (store, codec) = codec();
        store.set("fc_draft_bad", "{not json").unwrap();

        let err = codec.read_metadata("fc_draft_bad").unwrap_err();
        assert!(matches!(err, Error::Decode { ref key, .. } if key == "fc_draft_bad"));
    }

    #[test]
    fn test_session_id_encoding() {
        let (store, codec) = codec();
        codec.write_session_id("123-abc").unwrap();
        assert_eq!(
            store.get("app_current_session_id").unwrap().as_deref(),
            Some("\"123-abc\"")
        );
        assert_eq!(codec.read_session_id().unwrap().as_deref(), Some("123-abc"));

        store.set("app_current_session_id", "raw-id").unwrap();
        assert_eq!(codec.read_session_id().unwrap().as_deref(), Some("raw-id"));

        codec.remove_session_id().unwrap();
        assert!(codec.read_session_id().unwrap().is_none());
    }

    #[test]
    fn test_store_failure_propagates() {
        let (store, codec) = codec();
        store.set_available(false);
        assert!(matches!(codec.write("k", &1), Err(Error::Store(_))));
    }
}

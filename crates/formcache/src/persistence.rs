//! Draft persistence facade.
//!
//! The public save/load/delete surface. Every draft mutation keeps the
//! user's index in step with the stored drafts.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use formcache_types::{RECORD_VERSION, StorageMetadata, StoredDraft};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, trace, warn};

use crate::autosave::{AutoSaveQueue, AutoSaveRequest, FormSource, SaveSink};
use crate::clock::Clock;
use crate::codec::DraftCodec;
use crate::config::CacheConfig;
use crate::index::OnMissing;
use crate::session::SessionManager;

/// Result of a save attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveOutcome {
    /// The draft and the index were written.
    Saved,
    /// No user identity is set.
    SkippedNoUser,
    /// No session is active.
    SkippedNoSession,
    /// Storage rejected the write; nothing changed.
    Failed,
}

impl SaveOutcome {
    pub fn is_saved(self) -> bool {
        self == Self::Saved
    }
}

#[derive(Debug)]
struct PersistenceInner {
    codec: DraftCodec,
    session: Arc<SessionManager>,
    clock: Arc<dyn Clock>,
    config: CacheConfig,
    user_id: RwLock<Option<String>>,
}

impl PersistenceInner {
    fn user_id(&self) -> Option<String> {
        self.user_id.read().clone()
    }

    fn draft_key(&self, user_id: &str, entity_type: &str, entity_id: &str) -> String {
        self.codec.layout().draft_key(user_id, entity_type, entity_id)
    }

    fn save_draft<T: Serialize + ?Sized>(
        &self,
        entity_type: &str,
        entity_id: &str,
        form_data: &T,
    ) -> SaveOutcome {
        let Some(user_id) = self.user_id() else {
            debug!(entity_type = %entity_type, entity_id = %entity_id, "No user set, draft not saved");
            return SaveOutcome::SkippedNoUser;
        };
        let Some(session_id) = self.session.session_id() else {
            debug!(entity_type = %entity_type, entity_id = %entity_id, "No active session, draft not saved");
            return SaveOutcome::SkippedNoSession;
        };

        let now = self.clock.now_millis();
        let key = self.draft_key(&user_id, entity_type, entity_id);
        let (created_at, existed) = match self.codec.read_metadata(&key) {
            Ok(Some(meta)) => (meta.created_at, true),
            Ok(None) => (now, false),
            Err(e) => {
                debug!(key = %key, error = %e, "Previous draft unreadable, creation time reset");
                (now, true)
            }
        };

        let draft = StoredDraft {
            metadata: StorageMetadata {
                user_id: user_id.clone(),
                session_id: session_id.clone(),
                created_at,
                last_modified: now,
                expires_at: now.saturating_add(self.config.ttl_millis()),
                version: RECORD_VERSION,
            },
            form_data,
            entity_type: entity_type.to_string(),
            entity_id: entity_id.to_string(),
            is_dirty: true,
            auto_save_enabled: true,
        };
        if let Err(e) = self.codec.write_draft(&key, &draft) {
            warn!(key = %key, error = %e, "Failed to save draft");
            return SaveOutcome::Failed;
        }

        let indexed = self.codec.update_index(
            &user_id,
            OnMissing::Create { session_id, now },
            |index| {
                index.insert_key(&key);
                index.touch(now);
                true
            },
        );
        if let Err(e) = indexed {
            warn!(key = %key, error = %e, "Failed to index draft");
            if !existed && let Err(e) = self.codec.remove(&key) {
                warn!(key = %key, error = %e, "Failed to roll back unindexed draft");
            }
            return SaveOutcome::Failed;
        }

        trace!(key = %key, "Draft saved");
        SaveOutcome::Saved
    }
}

/// Save, load and delete drafts for the current user.
#[derive(Debug)]
pub struct DraftPersistence {
    inner: Arc<PersistenceInner>,
    auto_save: Mutex<Option<AutoSaveQueue>>,
    closed: AtomicBool,
}

impl DraftPersistence {
    pub fn new(
        codec: DraftCodec,
        session: Arc<SessionManager>,
        clock: Arc<dyn Clock>,
        config: CacheConfig,
    ) -> Self {
        Self {
            inner: Arc::new(PersistenceInner {
                codec,
                session,
                clock,
                config,
                user_id: RwLock::new(None),
            }),
            auto_save: Mutex::new(None),
            closed: AtomicBool::new(false),
        }
    }

    /// Set the user all operations act for. An empty id clears it.
    pub fn set_user_id(&self, user_id: impl Into<String>) {
        let user_id = user_id.into();
        *self.inner.user_id.write() = (!user_id.is_empty()).then_some(user_id);
    }

    pub fn user_id(&self) -> Option<String> {
        self.inner.user_id()
    }

    /// Save `form_data` as the draft for `(entity_type, entity_id)`.
    ///
    /// Skipped without a user or an active session. Keeps the creation time
    /// of an existing draft and restarts its TTL.
    pub fn save_draft<T: Serialize + ?Sized>(
        &self,
        entity_type: &str,
        entity_id: &str,
        form_data: &T,
    ) -> SaveOutcome {
        self.inner.save_draft(entity_type, entity_id, form_data)
    }

    /// Load a draft. Expired drafts are returned until cleanup removes them.
    pub fn load_draft(&self, entity_type: &str, entity_id: &str) -> Option<StoredDraft> {
        self.load_draft_as(entity_type, entity_id)
    }

    /// Load a draft, decoding its form data as `T`.
    pub fn load_draft_as<T: DeserializeOwned>(
        &self,
        entity_type: &str,
        entity_id: &str,
    ) -> Option<StoredDraft<T>> {
        let user_id = self.inner.user_id()?;
        let key = self.inner.draft_key(&user_id, entity_type, entity_id);
        match self.inner.codec.read_draft(&key) {
            Ok(draft) => draft,
            Err(e) => {
                warn!(key = %key, error = %e, "Failed to load draft");
                None
            }
        }
    }

    pub fn has_draft(&self, entity_type: &str, entity_id: &str) -> bool {
        self.load_draft(entity_type, entity_id).is_some()
    }

    /// Delete a draft and drop it from the index.
    pub fn delete_draft(&self, entity_type: &str, entity_id: &str) {
        let Some(user_id) = self.inner.user_id() else {
            return;
        };
        let codec = &self.inner.codec;
        let key = self.inner.draft_key(&user_id, entity_type, entity_id);
        if let Err(e) = codec.remove(&key) {
            warn!(key = %key, error = %e, "Failed to delete draft");
            return;
        }

        let now = self.inner.clock.now_millis();
        let result = codec.update_index(&user_id, OnMissing::Skip, |index| {
            let removed = index.remove_key(&key);
            if removed {
                index.touch(now);
            }
            removed
        });
        if let Err(e) = result {
            warn!(key = %key, error = %e, "Failed to remove deleted draft from index");
        }
    }

    /// Delete every draft listed in the current user's index.
    ///
    /// The index is kept, listing only drafts that could not be removed.
    pub fn delete_all_drafts(&self) {
        let Some(user_id) = self.inner.user_id() else {
            return;
        };
        let codec = &self.inner.codec;
        let now = self.inner.clock.now_millis();
        let result = codec.update_index(&user_id, OnMissing::Skip, |index| {
            let mut kept = Vec::new();
            for key in index.draft_keys.drain(..) {
                if let Err(e) = codec.remove(&key) {
                    warn!(key = %key, error = %e, "Failed to delete draft");
                    kept.push(key);
                }
            }
            index.draft_keys = kept;
            index.touch(now);
            true
        });
        match result {
            Ok(Some(index)) => {
                debug!(user_id = %user_id, kept = index.draft_keys.len(), "Deleted all drafts")
            }
            Ok(None) => {}
            Err(e) => warn!(user_id = %user_id, error = %e, "Failed to delete all drafts"),
        }
    }

    /// Keys of the current user's drafts, in index order.
    pub fn list_drafts(&self) -> Vec<String> {
        let Some(user_id) = self.inner.user_id() else {
            return Vec::new();
        };
        match self.inner.codec.read_index(&user_id) {
            Ok(index) => index.map(|i| i.draft_keys).unwrap_or_default(),
            Err(e) => {
                warn!(user_id = %user_id, error = %e, "Failed to read draft index");
                Vec::new()
            }
        }
    }

    /// Queue a debounced save of `form`.
    ///
    /// With the default global scope only the last request inside one
    /// debounce window is saved, even across different entities. Without a
    /// tokio runtime the form is saved immediately.
    pub fn auto_save(
        &self,
        form: impl FormSource,
        entity_type: impl Into<String>,
        entity_id: impl Into<String>,
    ) {
        if self.closed.load(Ordering::SeqCst) {
            debug!("Auto-save requested after shutdown, ignored");
            return;
        }
        let request = AutoSaveRequest {
            form: Arc::new(form),
            entity_type: entity_type.into(),
            entity_id: entity_id.into(),
        };

        let mut queue = self.auto_save.lock();
        if queue.is_none() {
            let inner = Arc::clone(&self.inner);
            let sink: SaveSink = Arc::new(move |request: AutoSaveRequest| {
                let form_data: Value = request.form.raw_value();
                inner.save_draft(&request.entity_type, &request.entity_id, &form_data);
            });
            *queue = AutoSaveQueue::spawn(
                self.inner.config.auto_save_debounce,
                self.inner.config.auto_save_scope,
                sink,
            );
        }

        match queue.as_ref() {
            Some(queue) if queue.push(request.clone()) => {}
            _ => {
                debug!("No auto-save worker, saving immediately");
                let form_data = request.form.raw_value();
                self.inner
                    .save_draft(&request.entity_type, &request.entity_id, &form_data);
            }
        }
    }

    /// Stop auto-saving. Saves still waiting out the debounce are dropped.
    pub fn shutdown(&self) {
        self.closed.store(true, Ordering::SeqCst);
        if let Some(queue) = self.auto_save.lock().take() {
            queue.close();
            debug!("Auto-save queue shut down");
        }
    }
}

impl Drop for DraftPersistence {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::KeyLayout;
    use crate::store::testing::FailingRemoveStore;
    use crate::store::{KeyValueStore, MemoryStore};
    use serde::Deserialize;
    use serde_json::json;
    use std::time::Duration;

    struct Fixture {
        store: Arc<MemoryStore>,
        clock: Arc<ManualClock>,
        session: Arc<SessionManager>,
        drafts: DraftPersistence,
    }

    fn fixture_on(store: Arc<MemoryStore>) -> Fixture {
        let clock = Arc::new(ManualClock::new(1_000));
        let codec = DraftCodec::new(store.clone(), KeyLayout::default());
        let session = Arc::new(SessionManager::new(codec.clone(), clock.clone()));
        let config = CacheConfig::new().with_ttl(Duration::from_millis(500));
        let drafts = DraftPersistence::new(codec, session.clone(), clock.clone(), config);
        Fixture {
            store,
            clock,
            session,
            drafts,
        }
    }

    fn signed_in() -> Fixture {
        let fx = fixture_on(Arc::new(MemoryStore::new()));
        fx.drafts.set_user_id("u1");
        fx.session.start_session("u1");
        fx
    }

    fn index_keys(fx: &Fixture) -> Vec<String> {
        fx.drafts.list_drafts()
    }

    #[test]
    fn test_roundtrip() {
        let fx = signed_in();
        let form = json!({"name": "Ada", "tags": [1, 2]});
        assert_eq!(fx.drafts.save_draft("client", "7", &form), SaveOutcome::Saved);

        let draft = fx.drafts.load_draft("client", "7").unwrap();
        assert_eq!(draft.form_data, form);
        assert_eq!(draft.metadata.user_id, "u1");
        assert_eq!(draft.metadata.expires_at, 1_500);
        assert_eq!(draft.entity_type, "client");
        assert!(draft.is_dirty);
        assert!(fx.drafts.has_draft("client", "7"));
        assert_eq!(index_keys(&fx), vec!["fc_draft_u1_client_7"]);
    }

    #[test]
    fn test_typed_load() {
        #[derive(Debug, Serialize, Deserialize, PartialEq)]
        struct Address {
            street: String,
        }

        let fx = signed_in();
        let address = Address {
            street: "Main".to_string(),
        };
        fx.drafts.save_draft("address", "1", &address);
        let draft = fx.drafts.load_draft_as::<Address>("address", "1").unwrap();
        assert_eq!(draft.form_data, address);
    }

    #[test]
    fn test_resave_keeps_created_at_and_single_key() {
        let fx = signed_in();
        fx.drafts.save_draft("client", "7", &json!(1));
        fx.clock.advance(200);
        fx.drafts.save_draft("client", "7", &json!(2));

        let meta = fx.drafts.load_draft("client", "7").unwrap().metadata;
        assert_eq!(meta.created_at, 1_000);
        assert_eq!(meta.last_modified, 1_200);
        assert_eq!(meta.expires_at, 1_700);
        assert_eq!(index_keys(&fx).len(), 1);
    }

    #[test]
    fn test_skips_without_user_or_session() {
        let fx = fixture_on(Arc::new(MemoryStore::new()));
        assert_eq!(
            fx.drafts.save_draft("client", "7", &json!(1)),
            SaveOutcome::SkippedNoUser
        );

        fx.drafts.set_user_id("u1");
        assert_eq!(
            fx.drafts.save_draft("client", "7", &json!(1)),
            SaveOutcome::SkippedNoSession
        );
        assert!(fx.store.is_empty());

        fx.drafts.set_user_id("");
        assert!(fx.drafts.user_id().is_none());
        assert!(fx.drafts.load_draft("client", "7").is_none());
    }

    #[test]
    fn test_save_creates_missing_index() {
        let fx = fixture_on(Arc::new(MemoryStore::new()));
        fx.drafts.set_user_id("u1");
        fx.session.start_session("u1");
        fx.store.remove("fc_index_u1").unwrap();

        assert!(fx.drafts.save_draft("client", "7", &json!(1)).is_saved());
        assert_eq!(index_keys(&fx), vec!["fc_draft_u1_client_7"]);
    }

    #[test]
    fn test_expired_draft_still_loads() {
        let fx = signed_in();
        fx.drafts.save_draft("client", "7", &json!(1));
        fx.clock.advance(10_000);
        assert!(fx.drafts.load_draft("client", "7").is_some());
    }

    #[test]
    fn test_delete_draft() {
        let fx = signed_in();
        fx.drafts.save_draft("client", "7", &json!(1));
        fx.drafts.save_draft("client", "8", &json!(2));
        fx.clock.advance(50);

        fx.drafts.delete_draft("client", "7");
        assert!(!fx.drafts.has_draft("client", "7"));
        assert_eq!(index_keys(&fx), vec!["fc_draft_u1_client_8"]);
        let index = fx.drafts.inner.codec.read_index("u1").unwrap().unwrap();
        assert_eq!(index.last_activity, 1_050);

        // Deleting something absent is harmless.
        fx.drafts.delete_draft("client", "nope");
    }

    #[test]
    fn test_delete_all_drafts() {
        let fx = signed_in();
        for id in ["1", "2", "3"] {
            fx.drafts.save_draft("client", id, &json!(id));
        }
        fx.clock.advance(10);

        fx.drafts.delete_all_drafts();
        assert!(index_keys(&fx).is_empty());
        for id in ["1", "2", "3"] {
            assert!(!fx.drafts.has_draft("client", id));
        }
        let index = fx.drafts.inner.codec.read_index("u1").unwrap().unwrap();
        assert_eq!(index.last_activity, 1_010);
    }

    #[test]
    fn test_delete_all_keeps_unremovable_drafts() {
        let store = Arc::new(FailingRemoveStore::new());
        let clock = Arc::new(ManualClock::new(1_000));
        let codec = DraftCodec::new(store.clone(), KeyLayout::default());
        let session = Arc::new(SessionManager::new(codec.clone(), clock.clone()));
        let drafts = DraftPersistence::new(codec, session.clone(), clock, CacheConfig::new());
        drafts.set_user_id("u1");
        session.start_session("u1");
        for id in ["1", "2", "3"] {
            drafts.save_draft("client", id, &json!(id));
        }
        store.fail_remove("fc_draft_u1_client_2");

        drafts.delete_all_drafts();
        assert_eq!(drafts.list_drafts(), vec!["fc_draft_u1_client_2"]);
        assert!(!drafts.has_draft("client", "1"));
        assert!(drafts.has_draft("client", "2"));
        assert!(!drafts.has_draft("client", "3"));
    }

    #[test]
    fn test_unpersisted_session_skips_saves() {
        let fx = fixture_on(Arc::new(MemoryStore::new()));
        fx.drafts.set_user_id("u1");
        fx.store.set_available(false);
        fx.session.start_session("u1");
        fx.store.set_available(true);

        assert_eq!(
            fx.drafts.save_draft("client", "7", &json!(1)),
            SaveOutcome::SkippedNoSession
        );
        assert!(fx.store.is_empty());
    }

    #[test]
    fn test_failed_write_reports_failure() {
        let fx = signed_in();
        fx.store.set_available(false);
        assert_eq!(fx.drafts.save_draft("client", "7", &json!(1)), SaveOutcome::Failed);
        fx.store.set_available(true);
        assert!(!fx.drafts.has_draft("client", "7"));
    }

    #[test]
    fn test_unindexed_new_draft_is_rolled_back() {
        // Measure a full save on an unbounded medium first.
        let reference = signed_in();
        reference.drafts.save_draft("client", "7", &json!({"x": 1}));
        let full = reference.store.used_bytes();

        // One byte short: the draft fits but the grown index does not.
        let fx = fixture_on(Arc::new(MemoryStore::with_capacity(full - 1)));
        fx.drafts.set_user_id("u1");
        fx.session.start_session("u1");

        assert_eq!(
            fx.drafts.save_draft("client", "7", &json!({"x": 1})),
            SaveOutcome::Failed
        );
        assert!(fx.store.get("fc_draft_u1_client_7").unwrap().is_none());
        assert!(index_keys(&fx).is_empty());
    }

    #[test]
    fn test_auto_save_without_runtime_saves_now() {
        let fx = signed_in();
        fx.drafts.auto_save(json!({"a": 1}), "client", "7");
        assert!(fx.drafts.has_draft("client", "7"));

        fx.drafts.shutdown();
        fx.drafts.auto_save(json!({"a": 2}), "client", "8");
        assert!(!fx.drafts.has_draft("client", "8"));
    }
}

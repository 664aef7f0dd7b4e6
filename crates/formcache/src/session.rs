//! Session identity shared across tabs.
//!
//! A session is a single id stored under a well-known key. Every tab on the
//! same medium sees the same key; when another tab replaces or removes it,
//! the change feed updates this manager's cached copy.

use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use rand::Rng;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use crate::clock::Clock;
use crate::codec::{DraftCodec, decode_session_value};
use crate::index::OnMissing;
use crate::store::StorageEvent;

const SUFFIX_ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
const SUFFIX_LEN: usize = 7;

/// Issues, validates and ends sessions.
#[derive(Debug)]
pub struct SessionManager {
    codec: DraftCodec,
    clock: Arc<dyn Clock>,
    current: Arc<RwLock<Option<String>>>,
    listener: Mutex<Option<JoinHandle<()>>>,
}

impl SessionManager {
    pub fn new(codec: DraftCodec, clock: Arc<dyn Clock>) -> Self {
        Self {
            codec,
            clock,
            current: Arc::new(RwLock::new(None)),
            listener: Mutex::new(None),
        }
    }

    /// Start a fresh session for `user_id` and return its id.
    ///
    /// Creates the user's index if needed. If the id cannot be persisted the
    /// tab is left with no session, so dependent saves are skipped.
    pub fn start_session(&self, user_id: &str) -> String {
        let now = self.clock.now_millis();
        let session_id = generate_session_id(now);

        if let Err(e) = self.codec.write_session_id(&session_id) {
            warn!(user_id = %user_id, error = %e, "Failed to persist session id, no session active");
            *self.current.write() = None;
            return session_id;
        }
        *self.current.write() = Some(session_id.clone());

        let result = self.codec.update_index(
            user_id,
            OnMissing::Create {
                session_id: session_id.clone(),
                now,
            },
            |index| {
                index.session_id = session_id.clone();
                index.touch(now);
                true
            },
        );
        if let Err(e) = result {
            warn!(user_id = %user_id, error = %e, "Failed to bind session to draft index");
        }

        debug!(user_id = %user_id, session_id = %session_id, "Session started");
        session_id
    }

    /// End the current session. Drafts are kept.
    ///
    /// The session id is resolved like [`session_id`](Self::session_id), so
    /// after a reload the id recovered from storage is ended. The user's
    /// index is only unbound if it still points at that session; another
    /// tab may have started a newer one.
    pub fn end_session(&self, user_id: &str) {
        if let Some(session_id) = self.session_id() {
            let now = self.clock.now_millis();
            let result = self.codec.update_index(user_id, OnMissing::Skip, |index| {
                if index.session_id != session_id {
                    return false;
                }
                index.session_id.clear();
                index.touch(now);
                true
            });
            if let Err(e) = result {
                warn!(user_id = %user_id, error = %e, "Failed to unbind session from draft index");
            }
        }

        if let Err(e) = self.codec.remove_session_id() {
            warn!(error = %e, "Failed to remove persisted session id");
        }
        *self.current.write() = None;
        debug!(user_id = %user_id, "Session ended");
    }

    /// The active session id, recovered from storage if not cached.
    pub fn session_id(&self) -> Option<String> {
        if let Some(id) = self.current.read().clone() {
            return Some(id);
        }

        match self.codec.read_session_id() {
            Ok(Some(id)) => {
                trace!(session_id = %id, "Recovered session id from storage");
                *self.current.write() = Some(id.clone());
                Some(id)
            }
            Ok(None) => None,
            Err(e) => {
                warn!(error = %e, "Failed to read persisted session id");
                None
            }
        }
    }

    /// Whether `user_id`'s index is bound to the active session.
    pub fn is_session_valid(&self, user_id: &str) -> bool {
        let index = match self.codec.read_index(user_id) {
            Ok(Some(index)) => index,
            Ok(None) => return false,
            Err(e) => {
                debug!(user_id = %user_id, error = %e, "Draft index unreadable, session invalid");
                return false;
            }
        };
        self.session_id()
            .is_some_and(|id| !index.session_id.is_empty() && index.session_id == id)
    }

    /// Apply a change made by another tab.
    pub fn handle_storage_event(&self, event: &StorageEvent) {
        apply_storage_event(&self.current, &self.codec.layout().session_id_key, event);
    }

    /// Follow session changes made by other tabs.
    ///
    /// Spawns a listener on the current tokio runtime. Returns `false` when
    /// the store has no change feed or there is no runtime. Calling it again
    /// while a listener is running does nothing.
    pub fn listen_for_changes(&self) -> bool {
        let mut listener = self.listener.lock();
        if listener.as_ref().is_some_and(|task| !task.is_finished()) {
            return true;
        }

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            debug!("No async runtime, session change listener not started");
            return false;
        };
        let Some(mut subscription) = self.codec.store().subscribe() else {
            debug!("Store has no change feed, session change listener not started");
            return false;
        };

        let current = Arc::clone(&self.current);
        let session_key = self.codec.layout().session_id_key.clone();
        *listener = Some(runtime.spawn(async move {
            while let Some(event) = subscription.recv().await {
                apply_storage_event(&current, &session_key, &event);
            }
            debug!("Storage change feed closed, session listener stopping");
        }));
        true
    }

    /// Stop following changes from other tabs.
    pub fn stop_listening(&self) {
        if let Some(task) = self.listener.lock().take() {
            task.abort();
        }
    }
}

impl Drop for SessionManager {
    fn drop(&mut self) {
        self.stop_listening();
    }
}

fn apply_storage_event(current: &RwLock<Option<String>>, session_key: &str, event: &StorageEvent) {
    match event.key.as_deref() {
        // The whole medium was cleared.
        None => {
            *current.write() = None;
            debug!("Storage cleared by another tab, session dropped");
        }
        Some(key) if key == session_key => {
            let next = event
                .new_value
                .as_deref()
                .map(decode_session_value)
                .filter(|id| !id.is_empty());
            debug!(session_id = ?next, "Session changed by another tab");
            *current.write() = next;
        }
        Some(_) => {}
    }
}

/// `<millis>-<7 random base36 chars>`.
fn generate_session_id(now: formcache_types::Millis) -> String {
    let mut rng = rand::rng();
    let suffix: String = (0..SUFFIX_LEN)
        .map(|_| SUFFIX_ALPHABET[rng.random_range(0..SUFFIX_ALPHABET.len())] as char)
        .collect();
    format!("{}-{}", now, suffix)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::KeyLayout;
    use crate::store::{KeyValueStore, MemoryStore};

    fn manager_on(store: Arc<MemoryStore>, clock: Arc<ManualClock>) -> SessionManager {
        SessionManager::new(DraftCodec::new(store, KeyLayout::default()), clock)
    }

    fn manager() -> (Arc<MemoryStore>, Arc<ManualClock>, SessionManager) {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::new(1_000));
        let manager = manager_on(store.clone(), clock.clone());
        (store, clock, manager)
    }

    #[test]
    fn test_session_id_format() {
        let id = generate_session_id(1234);
        let (millis, suffix) = id.split_once('-').unwrap();
        assert_eq!(millis, "1234");
        assert_eq!(suffix.len(), SUFFIX_LEN);
        assert!(suffix.bytes().all(|b| SUFFIX_ALPHABET.contains(&b)));
        assert_ne!(generate_session_id(1234), generate_session_id(1234));
    }

    #[test]
    fn test_start_session_creates_index() {
        let (_, _, manager) = manager();
        let id = manager.start_session("u1");

        let codec = &manager.codec;
        let index = codec.read_index("u1").unwrap().unwrap();
        assert_eq!(index.session_id, id);
        assert_eq!(index.last_activity, 1_000);
        assert!(index.draft_keys.is_empty());
        assert_eq!(codec.read_session_id().unwrap(), Some(id.clone()));
        assert!(manager.is_session_valid("u1"));
    }

    #[test]
    fn test_start_session_keeps_existing_drafts() {
        let (_, clock, manager) = manager();
        manager.start_session("u1");
        let mut index = manager.codec.read_index("u1").unwrap().unwrap();
        index.insert_key("fc_draft_u1_a_1");
        manager.codec.write_index(&index).unwrap();

        clock.advance(50);
        let second = manager.start_session("u1");
        let index = manager.codec.read_index("u1").unwrap().unwrap();
        assert_eq!(index.session_id, second);
        assert_eq!(index.draft_keys, vec!["fc_draft_u1_a_1"]);
        assert_eq!(index.last_activity, 1_050);
    }

    #[test]
    fn test_end_session_invalidates() {
        let (store, _, manager) = manager();
        manager.start_session("u1");
        manager.end_session("u1");

        assert!(!manager.is_session_valid("u1"));
        assert!(manager.session_id().is_none());
        assert!(store.get("app_current_session_id").unwrap().is_none());
        // The index survives with no session bound.
        assert_eq!(manager.codec.read_index("u1").unwrap().unwrap().session_id, "");
    }

    #[test]
    fn test_end_session_leaves_foreign_binding() {
        let (store, clock, tab_a) = manager();
        let tab_b = manager_on(Arc::new(store.open_tab()), clock);

        tab_a.start_session("u1");
        let newer = tab_b.start_session("u1");
        // tab_a still caches its own, older id.
        tab_a.end_session("u1");

        let index = tab_a.codec.read_index("u1").unwrap().unwrap();
        assert_eq!(index.session_id, newer);
    }

    #[test]
    fn test_session_id_recovered_after_reload() {
        let (store, clock, manager) = manager();
        let id = manager.start_session("u1");
        drop(manager);

        let reloaded = manager_on(store, clock);
        assert_eq!(reloaded.session_id(), Some(id));
        assert!(reloaded.is_session_valid("u1"));
    }

    #[test]
    fn test_invalid_without_index() {
        let (_, _, manager) = manager();
        manager.codec.write_session_id("s").unwrap();
        assert!(!manager.is_session_valid("u1"));
    }

    #[test]
    fn test_storage_failure_degrades() {
        let (store, _, manager) = manager();
        store.set_available(false);

        let id = manager.start_session("u1");
        assert!(!id.is_empty());
        assert!(manager.session_id().is_none());
        assert!(!manager.is_session_valid("u1"));

        // Storage coming back does not resurrect the unpersisted session.
        store.set_available(true);
        assert!(manager.session_id().is_none());
        assert!(manager.codec.read_index("u1").unwrap().is_none());

        manager.end_session("u1");
        assert!(manager.session_id().is_none());
    }

    #[test]
    fn test_handle_storage_event() {
        let (_, _, manager) = manager();
        manager.start_session("u1");

        manager.handle_storage_event(&StorageEvent {
            key: Some("app_current_session_id".to_string()),
            old_value: None,
            new_value: Some("\"other\"".to_string()),
        });
        assert_eq!(manager.current.read().as_deref(), Some("other"));

        manager.handle_storage_event(&StorageEvent {
            key: Some("unrelated".to_string()),
            old_value: None,
            new_value: Some("x".to_string()),
        });
        assert_eq!(manager.current.read().as_deref(), Some("other"));

        manager.handle_storage_event(&StorageEvent {
            key: Some("app_current_session_id".to_string()),
            old_value: Some("\"other\"".to_string()),
            new_value: None,
        });
        assert!(manager.current.read().is_none());
    }

    #[test]
    fn test_listen_without_runtime() {
        let (_, _, manager) = manager();
        assert!(!manager.listen_for_changes());
    }

    #[tokio::test]
    async fn test_follows_other_tab() {
        let (store, clock, tab_a) = manager();
        let tab_b = manager_on(Arc::new(store.open_tab()), clock);
        assert!(tab_a.listen_for_changes());
        assert!(tab_a.listen_for_changes());

        let first = tab_a.start_session("u1");
        let second = tab_b.start_session("u1");
        assert_ne!(first, second);

        // Give the listener a chance to drain the feed.
        for _ in 0..10 {
            if tab_a.current.read().as_deref() == Some(second.as_str()) {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(tab_a.session_id(), Some(second.clone()));
        assert!(tab_a.is_session_valid("u1"));

        tab_b.end_session("u1");
        for _ in 0..10 {
            if tab_a.current.read().is_none() {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert!(tab_a.current.read().is_none());
        assert!(!tab_a.is_session_valid("u1"));

        tab_a.stop_listening();
    }
}

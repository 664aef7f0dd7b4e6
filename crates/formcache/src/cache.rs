//! Composition root wiring the components over one store.

use std::sync::Arc;

use tracing::info;

use crate::cleanup::{CleanupEngine, CleanupHandle};
use crate::clock::{Clock, SystemClock};
use crate::codec::DraftCodec;
use crate::config::CacheConfig;
use crate::persistence::DraftPersistence;
use crate::session::SessionManager;
use crate::store::KeyValueStore;

/// A draft cache: one session manager, one cleanup engine and one
/// persistence facade sharing a store, a clock and a key layout.
///
/// Several `FormCache`s over handles onto one medium behave like several
/// browser tabs.
#[derive(Debug)]
pub struct FormCache {
    config: CacheConfig,
    codec: DraftCodec,
    session: Arc<SessionManager>,
    cleanup: CleanupEngine,
    drafts: DraftPersistence,
}

impl FormCache {
    pub fn new(config: CacheConfig, store: Arc<dyn KeyValueStore>) -> Self {
        Self::with_clock(config, store, Arc::new(SystemClock))
    }

    pub fn with_clock(
        config: CacheConfig,
        store: Arc<dyn KeyValueStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let codec = DraftCodec::new(store, config.layout.clone());
        let session = Arc::new(SessionManager::new(codec.clone(), Arc::clone(&clock)));
        let cleanup = CleanupEngine::new(codec.clone(), Arc::clone(&clock), config.clone());
        let drafts = DraftPersistence::new(
            codec.clone(),
            Arc::clone(&session),
            clock,
            config.clone(),
        );
        Self {
            config,
            codec,
            session,
            cleanup,
            drafts,
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn codec(&self) -> &DraftCodec {
        &self.codec
    }

    pub fn session(&self) -> &SessionManager {
        &self.session
    }

    pub fn cleanup(&self) -> &CleanupEngine {
        &self.cleanup
    }

    pub fn drafts(&self) -> &DraftPersistence {
        &self.drafts
    }

    /// Set the current user and start a session for them.
    pub fn sign_in(&self, user_id: &str) -> String {
        self.drafts.set_user_id(user_id);
        let session_id = self.session.start_session(user_id);
        info!(user_id = %user_id, session_id = %session_id, "Signed in");
        session_id
    }

    /// End the current user's session and clear the identity.
    ///
    /// Drafts stay in storage until cleanup or an explicit delete.
    pub fn sign_out(&self) {
        if let Some(user_id) = self.drafts.user_id() {
            self.session.end_session(&user_id);
            info!(user_id = %user_id, "Signed out");
        }
        self.drafts.set_user_id("");
    }

    /// Start periodic cleanup. Stop it by dropping or stopping the handle.
    pub fn start_cleanup(&self) -> CleanupHandle {
        self.cleanup.start()
    }
}

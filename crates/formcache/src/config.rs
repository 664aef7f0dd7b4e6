//! Configuration for the draft cache.

use std::time::Duration;

use formcache_types::config_defaults as defaults;
use formcache_types::{
    AutoSaveScope, HasAutoSaveConfig, HasKeyLayout, HasPersistenceConfig, Millis,
};

/// Persisted key layout.
///
/// - Draft key: `<draft prefix><user id>_<entity type>_<entity id>`
/// - Index key: `<index prefix><user id>`
/// - Session key: one constant shared by every user of the medium
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyLayout {
    pub index_key_prefix: String,
    pub draft_key_prefix: String,
    pub session_id_key: String,
}

impl Default for KeyLayout {
    fn default() -> Self {
        Self {
            index_key_prefix: defaults::INDEX_KEY_PREFIX.to_string(),
            draft_key_prefix: defaults::DRAFT_KEY_PREFIX.to_string(),
            session_id_key: defaults::SESSION_ID_KEY.to_string(),
        }
    }
}

impl KeyLayout {
    /// Copy the layout out of any key layout provider.
    pub fn from_provider(provider: &impl HasKeyLayout) -> Self {
        Self {
            index_key_prefix: provider.index_key_prefix().to_string(),
            draft_key_prefix: provider.draft_key_prefix().to_string(),
            session_id_key: provider.session_id_key().to_string(),
        }
    }

    pub fn draft_key(&self, user_id: &str, entity_type: &str, entity_id: &str) -> String {
        format!(
            "{}{}_{}_{}",
            self.draft_key_prefix, user_id, entity_type, entity_id
        )
    }

    pub fn index_key(&self, user_id: &str) -> String {
        format!("{}{}", self.index_key_prefix, user_id)
    }

    pub fn is_draft_key(&self, key: &str) -> bool {
        key.starts_with(&self.draft_key_prefix)
    }

    pub fn is_index_key(&self, key: &str) -> bool {
        key.starts_with(&self.index_key_prefix)
    }
}

/// Configuration for the draft cache.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Storage key layout.
    pub layout: KeyLayout,

    /// Time-to-live applied on every save.
    pub ttl: Duration,

    /// Interval between periodic cleanup runs.
    pub cleanup_interval: Duration,

    /// Inactivity after which an index and all of its drafts are swept.
    pub stale_threshold: Duration,

    /// Total stored bytes above which the oldest drafts are evicted.
    pub storage_quota: u64,

    /// Quiet period before a queued auto-save is written.
    pub auto_save_debounce: Duration,

    /// How auto-save requests are coalesced.
    pub auto_save_scope: AutoSaveScope,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            layout: KeyLayout::default(),
            ttl: defaults::ttl(),
            cleanup_interval: defaults::cleanup_interval(),
            stale_threshold: defaults::stale_threshold(),
            storage_quota: defaults::STORAGE_QUOTA_BYTES,
            auto_save_debounce: defaults::auto_save_debounce(),
            auto_save_scope: AutoSaveScope::Global,
        }
    }
}

impl CacheConfig {
    /// Create a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a configuration from capability providers (e.g. a loaded config file).
    pub fn from_provider<P>(provider: &P) -> Self
    where
        P: HasKeyLayout + HasPersistenceConfig + HasAutoSaveConfig,
    {
        Self {
            layout: KeyLayout::from_provider(provider),
            ttl: provider.ttl(),
            cleanup_interval: provider.cleanup_interval(),
            stale_threshold: provider.stale_threshold(),
            storage_quota: provider.storage_quota(),
            auto_save_debounce: provider.auto_save_debounce(),
            auto_save_scope: provider.auto_save_scope(),
        }
    }

    /// Set the storage key layout.
    pub fn with_layout(mut self, layout: KeyLayout) -> Self {
        self.layout = layout;
        self
    }

    /// Set the draft time-to-live.
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Set the cleanup interval.
    pub fn with_cleanup_interval(mut self, interval: Duration) -> Self {
        self.cleanup_interval = interval;
        self
    }

    /// Set the stale-session threshold.
    pub fn with_stale_threshold(mut self, threshold: Duration) -> Self {
        self.stale_threshold = threshold;
        self
    }

    /// Set the storage quota in bytes.
    pub fn with_storage_quota(mut self, bytes: u64) -> Self {
        self.storage_quota = bytes;
        self
    }

    /// Set the auto-save debounce window.
    pub fn with_auto_save_debounce(mut self, debounce: Duration) -> Self {
        self.auto_save_debounce = debounce;
        self
    }

    /// Set how auto-save requests are coalesced.
    pub fn with_auto_save_scope(mut self, scope: AutoSaveScope) -> Self {
        self.auto_save_scope = scope;
        self
    }

    pub(crate) fn ttl_millis(&self) -> Millis {
        duration_millis(self.ttl)
    }

    pub(crate) fn stale_threshold_millis(&self) -> Millis {
        duration_millis(self.stale_threshold)
    }
}

fn duration_millis(duration: Duration) -> Millis {
    Millis::try_from(duration.as_millis()).unwrap_or(Millis::MAX)
}

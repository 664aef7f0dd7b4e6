//! Configuration types mapping to the TOML schema.
//!
//! ```toml
//! [cache]          # storage key layout and auto-save debounce
//! [persistence]    # draft lifecycle policy
//! ```

use std::time::Duration;

use formcache_types::config_defaults as defaults;
use formcache_types::{
    AutoSaveScope, ConfigProvider, HasAutoSaveConfig, HasKeyLayout, HasPersistenceConfig,
};
use serde::{Deserialize, Serialize};

use crate::{ConfigError, Result};

// ─────────────────────────────────────────────────────────────────────────────
// Top-level Config
// ─────────────────────────────────────────────────────────────────────────────

/// Root configuration structure.
///
/// All sections are optional so that partial configs (e.g. project-local
/// overrides) can be loaded and merged. Missing sections resolve to their
/// defaults through the capability trait impls.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FormCacheFileConfig {
    /// Key layout and auto-save settings.
    pub cache: Option<CacheSection>,

    /// Draft lifecycle policy.
    pub persistence: Option<PersistenceSection>,
}

impl FormCacheFileConfig {
    /// Create an empty config.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        Ok(toml::from_str(toml_str)?)
    }

    /// Serialize to a TOML string.
    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Merge another config on top of this one (other takes priority).
    pub fn merge(&mut self, other: FormCacheFileConfig) {
        if other.cache.is_some() {
            self.cache = other.cache;
        }

        if other.persistence.is_some() {
            self.persistence = other.persistence;
        }
    }

    /// The `[cache]` section, or its defaults.
    pub fn cache(&self) -> CacheSection {
        self.cache.clone().unwrap_or_default()
    }

    /// The `[persistence]` section, or its defaults.
    pub fn persistence(&self) -> PersistenceSection {
        self.persistence.clone().unwrap_or_default()
    }

    /// Check the resolved configuration for values the engine cannot work with.
    pub fn validate(&self) -> Result<()> {
        self.cache().validate()?;
        self.persistence().validate()
    }
}

impl ConfigProvider for FormCacheFileConfig {}

impl HasKeyLayout for FormCacheFileConfig {
    fn index_key_prefix(&self) -> &str {
        self.cache
            .as_ref()
            .map_or(defaults::INDEX_KEY_PREFIX, |c| c.index_key_prefix.as_str())
    }

    fn draft_key_prefix(&self) -> &str {
        self.cache
            .as_ref()
            .map_or(defaults::DRAFT_KEY_PREFIX, |c| c.draft_key_prefix.as_str())
    }

    fn session_id_key(&self) -> &str {
        self.cache
            .as_ref()
            .map_or(defaults::SESSION_ID_KEY, |c| c.session_id_key.as_str())
    }
}

impl HasPersistenceConfig for FormCacheFileConfig {
    fn ttl(&self) -> Duration {
        self.persistence().ttl()
    }

    fn cleanup_interval(&self) -> Duration {
        self.persistence().cleanup_interval()
    }

    fn stale_threshold(&self) -> Duration {
        self.persistence().stale_threshold()
    }

    fn storage_quota(&self) -> u64 {
        self.persistence().storage_quota()
    }
}

impl HasAutoSaveConfig for FormCacheFileConfig {
    fn auto_save_debounce(&self) -> Duration {
        self.cache().auto_save_debounce()
    }

    fn auto_save_scope(&self) -> AutoSaveScope {
        self.cache().auto_save_scope
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Cache Section
// ─────────────────────────────────────────────────────────────────────────────

/// Storage key layout and auto-save behaviour.
///
/// ```toml
/// [cache]
/// index_key_prefix = "fc_index_"
/// draft_key_prefix = "fc_draft_"
/// session_id_key = "app_current_session_id"
/// auto_save_debounce_ms = 1000
/// auto_save_scope = "global"
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSection {
    pub index_key_prefix: String,
    pub draft_key_prefix: String,
    pub session_id_key: String,
    /// Quiet period in milliseconds before a queued auto-save is written.
    pub auto_save_debounce_ms: u64,
    pub auto_save_scope: AutoSaveScope,
}

impl Default for CacheSection {
    fn default() -> Self {
        Self {
            index_key_prefix: defaults::INDEX_KEY_PREFIX.to_string(),
            draft_key_prefix: defaults::DRAFT_KEY_PREFIX.to_string(),
            session_id_key: defaults::SESSION_ID_KEY.to_string(),
            auto_save_debounce_ms: defaults::AUTO_SAVE_DEBOUNCE_MS,
            auto_save_scope: AutoSaveScope::Global,
        }
    }
}

impl CacheSection {
    fn validate(&self) -> Result<()> {
        for (field, value) in [
            ("cache.index_key_prefix", &self.index_key_prefix),
            ("cache.draft_key_prefix", &self.draft_key_prefix),
            ("cache.session_id_key", &self.session_id_key),
        ] {
            if value.is_empty() {
                return Err(invalid(field, "must not be empty"));
            }
        }

        // Overlapping prefixes would make the draft scan pick up index
        // entries and vice versa.
        if self.index_key_prefix.starts_with(&self.draft_key_prefix)
            || self.draft_key_prefix.starts_with(&self.index_key_prefix)
        {
            return Err(invalid(
                "cache.draft_key_prefix",
                "draft and index prefixes must not be prefixes of each other",
            ));
        }

        if self.session_id_key.starts_with(&self.draft_key_prefix)
            || self.session_id_key.starts_with(&self.index_key_prefix)
        {
            return Err(invalid(
                "cache.session_id_key",
                "must not start with the draft or index prefix",
            ));
        }

        Ok(())
    }
}

impl ConfigProvider for CacheSection {}

impl HasKeyLayout for CacheSection {
    fn index_key_prefix(&self) -> &str {
        &self.index_key_prefix
    }

    fn draft_key_prefix(&self) -> &str {
        &self.draft_key_prefix
    }

    fn session_id_key(&self) -> &str {
        &self.session_id_key
    }
}

impl HasAutoSaveConfig for CacheSection {
    fn auto_save_debounce(&self) -> Duration {
        Duration::from_millis(self.auto_save_debounce_ms)
    }

    fn auto_save_scope(&self) -> AutoSaveScope {
        self.auto_save_scope
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Persistence Section
// ─────────────────────────────────────────────────────────────────────────────

/// Draft lifecycle policy.
///
/// ```toml
/// [persistence]
/// ttl_ms = 3600000
/// cleanup_interval_ms = 60000
/// stale_threshold_ms = 1800000
/// storage_quota_bytes = 5242880
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistenceSection {
    /// Draft time-to-live in milliseconds, applied on every save.
    pub ttl_ms: u64,
    /// Milliseconds between periodic cleanup runs.
    pub cleanup_interval_ms: u64,
    /// Milliseconds of inactivity after which a user's drafts are swept.
    pub stale_threshold_ms: u64,
    /// Total stored bytes that triggers quota eviction.
    pub storage_quota_bytes: u64,
}

impl Default for PersistenceSection {
    fn default() -> Self {
        Self {
            ttl_ms: defaults::TTL_MS,
            cleanup_interval_ms: defaults::CLEANUP_INTERVAL_MS,
            stale_threshold_ms: defaults::STALE_THRESHOLD_MS,
            storage_quota_bytes: defaults::STORAGE_QUOTA_BYTES,
        }
    }
}

impl PersistenceSection {
    fn validate(&self) -> Result<()> {
        for (field, value) in [
            ("persistence.ttl_ms", self.ttl_ms),
            ("persistence.cleanup_interval_ms", self.cleanup_interval_ms),
            ("persistence.stale_threshold_ms", self.stale_threshold_ms),
        ] {
            if value == 0 {
                return Err(invalid(field, "must be greater than zero"));
            }
            if i64::try_from(value).is_err() {
                return Err(invalid(field, "does not fit a millisecond timestamp"));
            }
        }
        Ok(())
    }
}

impl ConfigProvider for PersistenceSection {}

impl HasPersistenceConfig for PersistenceSection {
    fn ttl(&self) -> Duration {
        Duration::from_millis(self.ttl_ms)
    }

    fn cleanup_interval(&self) -> Duration {
        Duration::from_millis(self.cleanup_interval_ms)
    }

    fn stale_threshold(&self) -> Duration {
        Duration::from_millis(self.stale_threshold_ms)
    }

    fn storage_quota(&self) -> u64 {
        self.storage_quota_bytes
    }
}

fn invalid(field: &str, reason: &str) -> ConfigError {
    ConfigError::Invalid {
        field: field.to_string(),
        reason: reason.to_string(),
    }
}

//! Configuration traits for decoupled config passing between crates.
//!
//! The engine never sees the TOML schema. It asks for capabilities (key
//! layout, persistence policy, auto-save behaviour) through these traits,
//! which the config crate and the standalone providers below implement.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Base trait for all configuration types.
///
/// Implementations should be cheaply cloneable and thread-safe.
pub trait ConfigProvider: Clone + Send + Sync + 'static {}

/// Storage key layout.
///
/// Draft keys are `<draft prefix><user>_<entity type>_<entity id>`, index keys
/// are `<index prefix><user>`, and the session id lives under one shared key.
pub trait HasKeyLayout: ConfigProvider {
    /// Prefix of every per-user draft index key.
    fn index_key_prefix(&self) -> &str;

    /// Prefix of every draft record key.
    fn draft_key_prefix(&self) -> &str;

    /// Well-known key holding the active session id.
    fn session_id_key(&self) -> &str;
}

/// Draft lifecycle policy.
pub trait HasPersistenceConfig: ConfigProvider {
    /// Time-to-live applied to a draft on every save.
    fn ttl(&self) -> Duration;

    /// Interval between periodic cleanup runs.
    fn cleanup_interval(&self) -> Duration;

    /// Inactivity after which a user's index and drafts are swept.
    fn stale_threshold(&self) -> Duration;

    /// Total stored bytes above which quota eviction kicks in.
    fn storage_quota(&self) -> u64;
}

/// Auto-save debouncing.
pub trait HasAutoSaveConfig: ConfigProvider {
    /// Quiet period before a queued auto-save is materialized.
    fn auto_save_debounce(&self) -> Duration;

    /// Whether the debounce window is shared or kept per entity.
    fn auto_save_scope(&self) -> AutoSaveScope {
        AutoSaveScope::Global
    }
}

/// How auto-save requests are coalesced.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AutoSaveScope {
    /// One window shared by every entity: only the latest request survives.
    #[default]
    Global,
    /// An independent window per `(entity type, entity id)`.
    PerEntity,
}

// ─────────────────────────────────────────────────────────────────────────────
// Default implementations for common types
// ─────────────────────────────────────────────────────────────────────────────

/// Default configuration values.
pub mod defaults {
    use std::time::Duration;

    pub const INDEX_KEY_PREFIX: &str = "fc_index_";
    pub const DRAFT_KEY_PREFIX: &str = "fc_draft_";
    pub const SESSION_ID_KEY: &str = "app_current_session_id";
    pub const AUTO_SAVE_DEBOUNCE_MS: u64 = 1000;
    /// One hour.
    pub const TTL_MS: u64 = 3_600_000;
    /// One minute.
    pub const CLEANUP_INTERVAL_MS: u64 = 60_000;
    /// Thirty minutes.
    pub const STALE_THRESHOLD_MS: u64 = 1_800_000;
    /// 5 MiB, the usual per-origin browser storage budget.
    pub const STORAGE_QUOTA_BYTES: u64 = 5_242_880;

    pub fn ttl() -> Duration {
        Duration::from_millis(TTL_MS)
    }

    pub fn cleanup_interval() -> Duration {
        Duration::from_millis(CLEANUP_INTERVAL_MS)
    }

    pub fn stale_threshold() -> Duration {
        Duration::from_millis(STALE_THRESHOLD_MS)
    }

    pub fn auto_save_debounce() -> Duration {
        Duration::from_millis(AUTO_SAVE_DEBOUNCE_MS)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Simple wrapper types for standalone config passing
// ─────────────────────────────────────────────────────────────────────────────

/// Standalone key layout.
#[derive(Debug, Clone)]
pub struct KeyLayoutProvider {
    pub index_key_prefix: String,
    pub draft_key_prefix: String,
    pub session_id_key: String,
}

impl Default for KeyLayoutProvider {
    fn default() -> Self {
        Self {
            index_key_prefix: defaults::INDEX_KEY_PREFIX.to_string(),
            draft_key_prefix: defaults::DRAFT_KEY_PREFIX.to_string(),
            session_id_key: defaults::SESSION_ID_KEY.to_string(),
        }
    }
}

impl ConfigProvider for KeyLayoutProvider {}

impl HasKeyLayout for KeyLayoutProvider {
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

/// Standalone persistence policy.
#[derive(Debug, Clone)]
pub struct PersistenceConfigProvider {
    pub ttl: Duration,
    pub cleanup_interval: Duration,
    pub stale_threshold: Duration,
    pub storage_quota: u64,
}

impl Default for PersistenceConfigProvider {
    fn default() -> Self {
        Self {
            ttl: defaults::ttl(),
            cleanup_interval: defaults::cleanup_interval(),
            stale_threshold: defaults::stale_threshold(),
            storage_quota: defaults::STORAGE_QUOTA_BYTES,
        }
    }
}

impl ConfigProvider for PersistenceConfigProvider {}

impl HasPersistenceConfig for PersistenceConfigProvider {
    fn ttl(&self) -> Duration {
        self.ttl
    }

    fn cleanup_interval(&self) -> Duration {
        self.cleanup_interval
    }

    fn stale_threshold(&self) -> Duration {
        self.stale_threshold
    }

    fn storage_quota(&self) -> u64 {
        self.storage_quota
    }
}

/// Standalone auto-save configuration.
#[derive(Debug, Clone)]
pub struct AutoSaveConfigProvider {
    pub debounce: Duration,
    pub scope: AutoSaveScope,
}

impl Default for AutoSaveConfigProvider {
    fn default() -> Self {
        Self {
            debounce: defaults::auto_save_debounce(),
            scope: AutoSaveScope::Global,
        }
    }
}

impl ConfigProvider for AutoSaveConfigProvider {}

impl HasAutoSaveConfig for AutoSaveConfigProvider {
    fn auto_save_debounce(&self) -> Duration {
        self.debounce
    }

    fn auto_save_scope(&self) -> AutoSaveScope {
        self.scope
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_layout_defaults() {
        let layout = KeyLayoutProvider::default();
        assert_eq!(layout.index_key_prefix(), "fc_index_");
        assert_eq!(layout.draft_key_prefix(), "fc_draft_");
        assert_eq!(layout.session_id_key(), "app_current_session_id");
    }

    #[test]
    fn test_persistence_defaults() {
        let config = PersistenceConfigProvider::default();
        assert_eq!(config.ttl(), Duration::from_secs(3600));
        assert_eq!(config.cleanup_interval(), Duration::from_secs(60));
        assert_eq!(config.stale_threshold(), Duration::from_secs(1800));
        assert_eq!(config.storage_quota(), 5 * 1024 * 1024);
    }

    #[test]
    fn test_auto_save_defaults() {
        let config = AutoSaveConfigProvider::default();
        assert_eq!(config.auto_save_debounce(), Duration::from_secs(1));
        assert_eq!(config.auto_save_scope(), AutoSaveScope::Global);
    }

    #[test]
    fn test_scope_serde_names() {
        let json = serde_json::to_string(&AutoSaveScope::PerEntity).unwrap();
        assert_eq!(json, "\"per_entity\"");
        let scope: AutoSaveScope = serde_json::from_str("\"global\"").unwrap();
        assert_eq!(scope, AutoSaveScope::Global);
    }
}

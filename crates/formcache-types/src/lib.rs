//! Shared types for the formcache draft cache.
//!
//! The record types here are the persisted wire format: they are what the
//! engine writes into the key/value store, so their serde layout is stable.

pub mod config;
pub mod draft;
pub mod index;

pub use config::{
    AutoSaveConfigProvider, AutoSaveScope, ConfigProvider, HasAutoSaveConfig, HasKeyLayout,
    HasPersistenceConfig, KeyLayoutProvider, PersistenceConfigProvider, defaults as config_defaults,
};
pub use draft::{Millis, RECORD_VERSION, StorageMetadata, StoredDraft};
pub use index::UserDraftIndex;

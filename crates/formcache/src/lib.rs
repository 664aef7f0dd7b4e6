//! Client-resident draft cache.
//!
//! This crate persists partially-filled form data per user and entity, and
//! manages its lifecycle:
//! - Sessions shared across tabs through one well-known storage key
//! - A per-user index listing every stored draft
//! - TTL expiry, stale-session sweeps and quota eviction on a timer
//! - Debounced auto-save
//!
//! Every component talks to storage through [`KeyValueStore`]; both
//! bundled backends support several handles ("tabs") on one medium.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use formcache::{CacheConfig, FormCache, MemoryStore};
//!
//! let cache = FormCache::new(CacheConfig::default(), Arc::new(MemoryStore::new()));
//! cache.sign_in("user-1");
//! cache.drafts().save_draft("client", "42", &serde_json::json!({"name": "Ada"}));
//! let _cleanup = cache.start_cleanup();
//! ```

mod autosave;
mod cache;
mod cleanup;
mod clock;
mod codec;
mod config;
mod error;
mod index;
mod persistence;
mod session;
pub mod store;

pub use autosave::{AutoSaveRequest, FormSource};
pub use cache::FormCache;
pub use cleanup::{CleanupEngine, CleanupHandle, CleanupReport};
pub use clock::{Clock, ManualClock, SystemClock};
pub use codec::DraftCodec;
pub use config::{CacheConfig, KeyLayout};
pub use error::{Error, Result};
pub use persistence::{DraftPersistence, SaveOutcome};
pub use session::SessionManager;
pub use store::{
    ChangeSubscription, KeyValueStore, MemoryStore, SqliteStore, StorageEvent, StoreEntry,
    StoreError, StoreResult,
};

pub use formcache_types::{
    AutoSaveScope, Millis, RECORD_VERSION, StorageMetadata, StoredDraft, UserDraftIndex,
};

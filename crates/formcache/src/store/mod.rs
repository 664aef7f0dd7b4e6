//! Key/value storage backends.
//!
//! The engine only ever talks to [`KeyValueStore`]: opaque string keys,
//! string values, enumeration of every key with its value length, and an
//! optional change feed. Swapping the medium (in-memory, SQLite, something
//! remote) never touches the cleanup or eviction logic.
//!
//! Several handles may share one medium, the way browser tabs share one
//! origin's storage. Each handle gets its own source identity; a
//! [`ChangeSubscription`] only yields changes made through *other* handles.

mod memory;
mod sqlite;

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::broadcast;
use tracing::warn;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

/// Capacity of the change broadcast channel.
const CHANGE_CHANNEL_CAPACITY: usize = 256;

/// Error type for storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The write would push the medium past its capacity.
    #[error("Storage quota exceeded writing '{key}': {needed} bytes needed, capacity {capacity}")]
    QuotaExceeded {
        key: String,
        needed: u64,
        capacity: u64,
    },

    /// The medium is disabled or otherwise unreachable.
    #[error("Storage unavailable: {0}")]
    Unavailable(String),

    /// SQLite backend failure.
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Any other backend failure.
    #[error("Storage backend error: {0}")]
    Backend(String),
}

/// Result type for storage operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// A stored key and the byte length of its value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreEntry {
    pub key: String,
    pub len: usize,
}

/// A change made to the shared medium by another handle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageEvent {
    /// Changed key; `None` when the whole medium was cleared.
    pub key: Option<String>,
    pub old_value: Option<String>,
    /// New value; `None` when the key was removed.
    pub new_value: Option<String>,
}

/// Contract every storage medium implements.
pub trait KeyValueStore: Send + Sync + fmt::Debug {
    fn get(&self, key: &str) -> StoreResult<Option<String>>;

    fn set(&self, key: &str, value: &str) -> StoreResult<()>;

    fn remove(&self, key: &str) -> StoreResult<()>;

    fn clear(&self) -> StoreResult<()>;

    /// Every stored key with its value length, in a stable order.
    fn entries(&self) -> StoreResult<Vec<StoreEntry>>;

    /// Every stored key starting with `prefix`, in the same order as [`entries`].
    ///
    /// [`entries`]: KeyValueStore::entries
    fn keys_with_prefix(&self, prefix: &str) -> StoreResult<Vec<String>> {
        Ok(self
            .entries()?
            .into_iter()
            .filter(|e| e.key.starts_with(prefix))
            .map(|e| e.key)
            .collect())
    }

    /// Subscribe to changes made through other handles on the same medium.
    ///
    /// Backends without a change feed return `None`.
    fn subscribe(&self) -> Option<ChangeSubscription> {
        None
    }
}

#[derive(Debug, Clone)]
struct Published {
    source: u64,
    event: StorageEvent,
}

/// Fan-out of storage changes to every handle on one medium.
#[derive(Debug)]
pub(crate) struct ChangeBus {
    tx: broadcast::Sender<Published>,
    next_source: AtomicU64,
}

impl ChangeBus {
    pub(crate) fn new() -> Self {
        let (tx, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            tx,
            next_source: AtomicU64::new(1),
        }
    }

    /// Allocate a source identity for a new handle.
    pub(crate) fn register(&self) -> u64 {
        self.next_source.fetch_add(1, Ordering::Relaxed)
    }

    pub(crate) fn publish(&self, source: u64, event: StorageEvent) {
        // No subscribers is the common case.
        let _ = self.tx.send(Published { source, event });
    }

    pub(crate) fn subscribe(&self, source: u64) -> ChangeSubscription {
        ChangeSubscription {
            rx: self.tx.subscribe(),
            source,
        }
    }
}

/// Receiving end of a medium's change feed, filtered to foreign changes.
#[derive(Debug)]
pub struct ChangeSubscription {
    rx: broadcast::Receiver<Published>,
    source: u64,
}

impl ChangeSubscription {
    /// Wait for the next change made by another handle.
    ///
    /// Returns `None` once every handle on the medium is gone.
    pub async fn recv(&mut self) -> Option<StorageEvent> {
        loop {
            match self.rx.recv().await {
                Ok(published) if published.source == self.source => continue,
                Ok(published) => return Some(published.event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped = skipped, "Storage change subscriber lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Take the next already-delivered foreign change, if any.
    pub fn try_recv(&mut self) -> Option<StorageEvent> {
        loop {
            match self.rx.try_recv() {
                Ok(published) if published.source == self.source => continue,
                Ok(published) => return Some(published.event),
                Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                    warn!(skipped = skipped, "Storage change subscriber lagged");
                }
                Err(_) => return None,
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::collections::HashSet;

    use parking_lot::RwLock;

    use super::*;

    /// Wraps a store and fails `remove` for chosen keys.
    #[derive(Debug, Default)]
    pub(crate) struct FailingRemoveStore {
        inner: MemoryStore,
        failing: RwLock<HashSet<String>>,
    }

    impl FailingRemoveStore {
        pub(crate) fn new() -> Self {
            Self::default()
        }

        pub(crate) fn fail_remove(&self, key: &str) {
            self.failing.write().insert(key.to_string());
        }
    }

    impl KeyValueStore for FailingRemoveStore {
        fn get(&self, key: &str) -> StoreResult<Option<String>> {
            self.inner.get(key)
        }

        fn set(&self, key: &str, value: &str) -> StoreResult<()> {
            self.inner.set(key, value)
        }

        fn remove(&self, key: &str) -> StoreResult<()> {
            if self.failing.read().contains(key) {
                return Err(StoreError::Backend(format!("remove of '{}' rejected", key)));
            }
            self.inner.remove(key)
        }

        fn clear(&self) -> StoreResult<()> {
            self.inner.clear()
        }

        fn entries(&self) -> StoreResult<Vec<StoreEntry>> {
            self.inner.entries()
        }
    }
}

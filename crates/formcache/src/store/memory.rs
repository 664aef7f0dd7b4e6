//! In-process storage medium.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::RwLock;
use tracing::trace;

use super::{
    ChangeBus, ChangeSubscription, KeyValueStore, StorageEvent, StoreEntry, StoreError,
    StoreResult,
};

#[derive(Debug)]
struct Medium {
    entries: RwLock<BTreeMap<String, String>>,
    capacity: Option<u64>,
    available: AtomicBool,
    bus: ChangeBus,
}

/// In-memory medium with an optional byte capacity.
///
/// Capacity is measured the same way quota eviction measures usage: the sum
/// of value lengths in bytes. A `set` that would exceed it fails and leaves
/// the previous value in place.
#[derive(Debug)]
pub struct MemoryStore {
    medium: Arc<Medium>,
    source: u64,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// Create an unbounded store.
    pub fn new() -> Self {
        Self::build(None)
    }

    /// Create a store that rejects writes beyond `bytes` of stored values.
    pub fn with_capacity(bytes: u64) -> Self {
        Self::build(Some(bytes))
    }

    fn build(capacity: Option<u64>) -> Self {
        let bus = ChangeBus::new();
        let source = bus.register();
        Self {
            medium: Arc::new(Medium {
                entries: RwLock::new(BTreeMap::new()),
                capacity,
                available: AtomicBool::new(true),
                bus,
            }),
            source,
        }
    }

    /// Open another handle onto the same medium, as a second tab would.
    pub fn open_tab(&self) -> Self {
        Self {
            medium: Arc::clone(&self.medium),
            source: self.medium.bus.register(),
        }
    }

    /// Enable or disable the medium. While disabled every operation fails.
    pub fn set_available(&self, available: bool) {
        self.medium.available.store(available, Ordering::SeqCst);
    }

    /// Sum of stored value lengths in bytes.
    pub fn used_bytes(&self) -> u64 {
        self.medium
            .entries
            .read()
            .values()
            .map(|v| v.len() as u64)
            .sum()
    }

    pub fn len(&self) -> usize {
        self.medium.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.medium.entries.read().is_empty()
    }

    fn ensure_available(&self) -> StoreResult<()> {
        if self.medium.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StoreError::Unavailable("storage is disabled".to_string()))
        }
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> StoreResult<Option<String>> {
        self.ensure_available()?;
        Ok(self.medium.entries.read().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> StoreResult<()> {
        self.ensure_available()?;
        let old_value = {
            let mut entries = self.medium.entries.write();
            if let Some(capacity) = self.medium.capacity {
                let used: u64 = entries.values().map(|v| v.len() as u64).sum();
                let replaced = entries.get(key).map_or(0, |v| v.len() as u64);
                let needed = used - replaced + value.len() as u64;
                if needed > capacity {
                    return Err(StoreError::QuotaExceeded {
                        key: key.to_string(),
                        needed,
                        capacity,
                    });
                }
            }
            entries.insert(key.to_string(), value.to_string())
        };

        trace!(key = %key, bytes = value.len(), "Stored value");
        if old_value.as_deref() != Some(value) {
            self.medium.bus.publish(
                self.source,
                StorageEvent {
                    key: Some(key.to_string()),
                    old_value,
                    new_value: Some(value.to_string()),
                },
            );
        }
        Ok(())
    }

    fn remove(&self, key: &str) -> StoreResult<()> {
        self.ensure_available()?;
        let old_value = self.medium.entries.write().remove(key);
        if old_value.is_some() {
            self.medium.bus.publish(
                self.source,
                StorageEvent {
                    key: Some(key.to_string()),
                    old_value,
                    new_value: None,
                },
            );
        }
        Ok(())
    }

    fn clear(&self) -> StoreResult<()> {
        self.ensure_available()?;
        let had_entries = {
            let mut entries = self.medium.entries.write();
            let had = !entries.is_empty();
            entries.clear();
            had
        };
        if had_entries {
            self.medium.bus.publish(
                self.source,
                StorageEvent {
                    key: None,
                    old_value: None,
                    new_value: None,
                },
            );
        }
        Ok(())
    }

    fn entries(&self) -> StoreResult<Vec<StoreEntry>> {
        self.ensure_available()?;
        Ok(self
            .medium
            .entries
            .read()
            .iter()
            .map(|(key, value)| StoreEntry {
                key: key.clone(),
                len: value.len(),
            })
            .collect())
    }

    fn subscribe(&self) -> Option<ChangeSubscription> {
        Some(self.medium.bus.subscribe(self.source))
    }
}

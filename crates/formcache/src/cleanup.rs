//! Lifecycle engine: TTL expiry, stale-session sweep and quota eviction.
//!
//! Each policy scans the key space by prefix on its own, so a policy never
//! depends on state gathered by an earlier one. Every removal also drops the
//! key from the owning user's index. A single undecodable entry is skipped
//! and never deleted.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use formcache_types::{Millis, StorageMetadata, UserDraftIndex};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, trace, warn};

use crate::clock::Clock;
use crate::codec::DraftCodec;
use crate::config::CacheConfig;

/// Percentage of collected drafts removed per quota eviction.
const EVICTION_PERCENT: usize = 20;

/// What a cleanup pass removed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanupReport {
    /// Drafts removed because their TTL elapsed.
    pub expired: usize,
    /// Indexes removed by the stale-session sweep.
    pub stale_indexes: usize,
    /// Drafts removed by the stale-session sweep.
    pub stale_drafts: usize,
    /// Drafts removed by quota eviction.
    pub evicted: usize,
    /// Stored bytes when the quota was checked.
    pub bytes_before: u64,
    /// Stored bytes after quota eviction.
    pub bytes_after: u64,
}

impl CleanupReport {
    /// Total drafts removed.
    pub fn drafts_removed(&self) -> usize {
        self.expired + self.stale_drafts + self.evicted
    }

    pub fn is_empty(&self) -> bool {
        self.drafts_removed() == 0 && self.stale_indexes == 0
    }
}

#[derive(Debug)]
struct Inner {
    codec: DraftCodec,
    clock: Arc<dyn Clock>,
    config: CacheConfig,
    generation: AtomicU64,
}

/// Runs the cleanup policies, on demand or on a timer.
#[derive(Debug, Clone)]
pub struct CleanupEngine {
    inner: Arc<Inner>,
}

impl CleanupEngine {
    pub fn new(codec: DraftCodec, clock: Arc<dyn Clock>, config: CacheConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                codec,
                clock,
                config,
                generation: AtomicU64::new(0),
            }),
        }
    }

    /// Run all three policies once, in order.
    pub fn run_cleanup(&self) -> CleanupReport {
        let now = self.inner.clock.now_millis();
        let mut report = CleanupReport {
            expired: self.expire_drafts(now),
            ..Default::default()
        };
        (report.stale_indexes, report.stale_drafts) = self.sweep_stale_sessions(now);
        (report.evicted, report.bytes_before, report.bytes_after) = self.enforce_quota();

        if report.is_empty() {
            trace!("Cleanup pass removed nothing");
        } else {
            debug!(
                expired = report.expired,
                stale_indexes = report.stale_indexes,
                stale_drafts = report.stale_drafts,
                evicted = report.evicted,
                "Cleanup pass complete"
            );
        }
        report
    }

    /// Run cleanup every `cleanup_interval`, starting one interval from now.
    ///
    /// Any timer started earlier by this engine stops at its next tick
    /// without running. Without a tokio runtime the returned handle is
    /// inert.
    pub fn start(&self) -> CleanupHandle {
        let generation = self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!("No async runtime, periodic cleanup not started");
            return CleanupHandle { task: None };
        };

        // A zero period would make the ticker panic.
        let period = self.inner.config.cleanup_interval.max(Duration::from_millis(1));
        let engine = self.clone();
        let task = runtime.spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if engine.inner.generation.load(Ordering::SeqCst) != generation {
                    debug!(generation = generation, "Cleanup timer superseded, stopping");
                    break;
                }
                engine.run_cleanup();
            }
        });

        debug!(interval_ms = period.as_millis() as u64, "Periodic cleanup started");
        CleanupHandle { task: Some(task) }
    }

    /// Stop the timer behind `handle`. Safe to call repeatedly.
    pub fn stop(&self, handle: &mut CleanupHandle) {
        handle.stop();
    }

    fn expire_drafts(&self, now: Millis) -> usize {
        let codec = &self.inner.codec;
        let keys = match codec.store().keys_with_prefix(&codec.layout().draft_key_prefix) {
            Ok(keys) => keys,
            Err(e) => {
                warn!(error = %e, "Failed to enumerate drafts for TTL expiry");
                return 0;
            }
        };

        let mut expired = 0;
        for key in keys {
            let meta = match codec.read_metadata(&key) {
                Ok(Some(meta)) => meta,
                Ok(None) => continue,
                Err(e) => {
                    debug!(key = %key, error = %e, "Skipping undecodable draft during TTL expiry");
                    continue;
                }
            };
            if !meta.is_expired(now) {
                continue;
            }
            if let Err(e) = codec.remove(&key) {
                warn!(key = %key, error = %e, "Failed to remove expired draft");
                continue;
            }
            codec.unlink_draft(&meta.user_id, &key);
            trace!(key = %key, expires_at = meta.expires_at, "Expired draft removed");
            expired += 1;
        }
        expired
    }

    /// Returns `(indexes removed, drafts removed)`.
    fn sweep_stale_sessions(&self, now: Millis) -> (usize, usize) {
        let codec = &self.inner.codec;
        let threshold = self.inner.config.stale_threshold_millis();
        let keys = match codec.store().keys_with_prefix(&codec.layout().index_key_prefix) {
            Ok(keys) => keys,
            Err(e) => {
                warn!(error = %e, "Failed to enumerate indexes for stale-session sweep");
                return (0, 0);
            }
        };

        let (mut indexes, mut drafts) = (0, 0);
        for key in keys {
            let mut index = match codec.read::<UserDraftIndex>(&key) {
                Ok(Some(index)) => index,
                Ok(None) => continue,
                Err(e) => {
                    debug!(key = %key, error = %e, "Skipping undecodable index during stale sweep");
                    continue;
                }
            };
            if !index.is_stale(now, threshold) {
                continue;
            }

            let mut remaining = Vec::new();
            for draft_key in index.draft_keys.drain(..) {
                match codec.remove(&draft_key) {
                    Ok(()) => drafts += 1,
                    Err(e) => {
                        warn!(key = %draft_key, error = %e, "Failed to remove draft of stale session");
                        remaining.push(draft_key);
                    }
                }
            }

            if remaining.is_empty() {
                match codec.remove(&key) {
                    Ok(()) => indexes += 1,
                    Err(e) => warn!(key = %key, error = %e, "Failed to remove stale index"),
                }
            } else {
                // Keep listing what is still stored; the next pass retries.
                index.draft_keys = remaining;
                if let Err(e) = codec.write(&key, &index) {
                    warn!(key = %key, error = %e, "Failed to rewrite partially swept index");
                }
            }
            debug!(user_id = %index.user_id, "Stale session swept");
        }
        (indexes, drafts)
    }

    /// Returns `(drafts evicted, bytes before, bytes after)`.
    fn enforce_quota(&self) -> (usize, u64, u64) {
        let codec = &self.inner.codec;
        let quota = self.inner.config.storage_quota;
        let entries = match codec.store().entries() {
            Ok(entries) => entries,
            Err(e) => {
                warn!(error = %e, "Failed to enumerate storage for quota check");
                return (0, 0, 0);
            }
        };

        let total: u64 = entries.iter().map(|e| e.len as u64).sum();
        if total <= quota {
            return (0, total, total);
        }

        let mut drafts: Vec<(String, StorageMetadata)> = entries
            .into_iter()
            .filter(|e| codec.layout().is_draft_key(&e.key))
            .filter_map(|e| match codec.read_metadata(&e.key) {
                Ok(Some(meta)) => Some((e.key, meta)),
                Ok(None) => None,
                Err(err) => {
                    debug!(key = %e.key, error = %err, "Skipping undecodable draft during quota eviction");
                    None
                }
            })
            .collect();
        // Stable: equal timestamps keep scan order.
        drafts.sort_by_key(|(_, meta)| meta.last_modified);

        let target = (drafts.len() * EVICTION_PERCENT).div_ceil(100);
        info!(
            total_bytes = total,
            quota_bytes = quota,
            candidates = drafts.len(),
            evicting = target,
            "Storage quota exceeded, evicting oldest drafts"
        );

        let mut evicted = 0;
        for (key, meta) in drafts.into_iter().take(target) {
            if let Err(e) = codec.remove(&key) {
                warn!(key = %key, error = %e, "Failed to evict draft");
                continue;
            }
            codec.unlink_draft(&meta.user_id, &key);
            evicted += 1;
        }

        let after = match codec.store().entries() {
            Ok(entries) => entries.iter().map(|e| e.len as u64).sum(),
            Err(e) => {
                warn!(error = %e, "Failed to measure storage after eviction");
                total
            }
        };
        (evicted, total, after)
    }
}

/// Owned handle to a running cleanup timer. Dropping it stops the timer.
#[derive(Debug)]
pub struct CleanupHandle {
    task: Option<JoinHandle<()>>,
}

impl CleanupHandle {
    /// Stop the timer. Safe to call repeatedly.
    pub fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            debug!("Periodic cleanup stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }
}

impl Drop for CleanupHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

//! Cache store keyed by [`ResolutionKey`].
//!
//! Entries are immutable and published whole. Readers clone the `Arc` out of
//! the map and never hold a shard lock across anything else.

use crate::hostdb::entry::{CacheEntry, Freshness, Source};
use crate::hostdb::key::{KeyTarget, ResolutionKey};
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Entries inspected when choosing an eviction victim.
const EVICTION_SAMPLE: usize = 16;

/// Classification of a key against the store.
#[derive(Debug, Clone)]
pub enum Classification {
    /// Present and within TTL.
    Fresh(Arc<CacheEntry>),
    /// Past TTL but inside the grace window.
    Stale(Arc<CacheEntry>),
    /// Absent or expired past grace.
    Miss,
}

impl Classification {
    pub fn is_miss(&self) -> bool {
        matches!(self, Classification::Miss)
    }

    pub fn entry(&self) -> Option<&Arc<CacheEntry>> {
        match self {
            Classification::Fresh(entry) | Classification::Stale(entry) => Some(entry),
            Classification::Miss => None,
        }
    }
}

/// Store counters.
#[derive(Debug, Default)]
pub struct CacheStats {
    hits: AtomicU64,
    stale_hits: AtomicU64,
    misses: AtomicU64,
    negative_hits: AtomicU64,
    resolutions: AtomicU64,
    evictions: AtomicU64,
}

impl CacheStats {
    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn stale_hits(&self) -> u64 {
        self.stale_hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    /// Fresh hits on negative entries.
    pub fn negative_hits(&self) -> u64 {
        self.negative_hits.load(Ordering::Relaxed)
    }

    /// Resolver calls started.
    pub fn resolutions(&self) -> u64 {
        self.resolutions.load(Ordering::Relaxed)
    }

    pub fn evictions(&self) -> u64 {
        self.evictions.load(Ordering::Relaxed)
    }

    pub(crate) fn record_resolution(&self) {
        self.resolutions.fetch_add(1, Ordering::Relaxed);
    }
}

pub struct CacheStore {
    entries: DashMap<ResolutionKey, Arc<CacheEntry>>,
    grace: Duration,
    max_entries: usize,
    stats: CacheStats,
}

impl CacheStore {
    /// Store serving stale entries for `grace` past expiry and holding at
    /// most `max_entries` entries.
    pub fn new(grace: Duration, max_entries: usize) -> Self {
        Self {
            entries: DashMap::new(),
            grace,
            max_entries: max_entries.max(1),
            stats: CacheStats::default(),
        }
    }

    pub fn grace(&self) -> Duration {
        self.grace
    }

    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }

    /// Classify `key` at `now`.
    ///
    /// Literal address keys always classify Fresh without touching the map.
    pub fn classify(&self, key: &ResolutionKey, now: Instant) -> Classification {
        if key.is_literal() {
            if let KeyTarget::Literal(addr) = key.target() {
                return Classification::Fresh(Arc::new(CacheEntry::fixed(
                    key.clone(),
                    *addr,
                    Source::Literal,
                )));
            }
        }

        let Some(entry) = self.get(key) else {
            self.stats.misses.fetch_add(1, Ordering::Relaxed);
            return Classification::Miss;
        };

        match entry.freshness(now, self.grace) {
            Freshness::Fresh => {
                if entry.is_negative() {
                    self.stats.negative_hits.fetch_add(1, Ordering::Relaxed);
                } else {
                    self.stats.hits.fetch_add(1, Ordering::Relaxed);
                }
                Classification::Fresh(entry)
            }
            Freshness::Stale => {
                self.stats.stale_hits.fetch_add(1, Ordering::Relaxed);
                Classification::Stale(entry)
            }
            Freshness::Expired => {
                self.stats.misses.fetch_add(1, Ordering::Relaxed);
                Classification::Miss
            }
        }
    }

    /// Raw entry for `key`, regardless of freshness.
    pub fn get(&self, key: &ResolutionKey) -> Option<Arc<CacheEntry>> {
        self.entries.get(key).map(|e| Arc::clone(e.value()))
    }

    /// Publish `entry` under `key`, replacing any previous entry.
    ///
    /// Returns the replaced entry. Evicts when the store is over capacity.
    pub fn publish(&self, key: ResolutionKey, entry: Arc<CacheEntry>) -> Option<Arc<CacheEntry>> {
        let previous = self.entries.insert(key.clone(), entry);
        if previous.is_none() && self.entries.len() > self.max_entries {
            self.evict(&key, Instant::now());
        }
        previous
    }

    /// Remove `key`. Returns whether an entry was present.
    pub fn invalidate(&self, key: &ResolutionKey) -> bool {
        self.entries.remove(key).is_some()
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop every entry that is past its grace window. Returns the count removed.
    pub fn purge_expired(&self, now: Instant) -> usize {
        let before = self.entries.len();
        self.entries
            .retain(|_, entry| entry.freshness(now, self.grace) != Freshness::Expired);
        let removed = before.saturating_sub(self.entries.len());
        if removed > 0 {
            self.stats
                .evictions
                .fetch_add(removed as u64, Ordering::Relaxed);
            tracing::debug!(removed, "purged expired host entries");
        }
        removed
    }

    /// Evict until back at capacity, never removing `keep`.
    ///
    /// Each victim is the best of a small sample: an expired entry if one is
    /// there, otherwise the earliest expiry. Full sweeps are left to
    /// [`purge_expired`](Self::purge_expired).
    fn evict(&self, keep: &ResolutionKey, now: Instant) {
        while self.entries.len() > self.max_entries {
            let Some(victim) = self.pick_victim(keep, now) else {
                break;
            };
            if self.entries.remove(&victim).is_some() {
                self.stats.evictions.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(key = %victim, "evicted host entry at capacity");
            }
        }
    }

    fn pick_victim(&self, keep: &ResolutionKey, now: Instant) -> Option<ResolutionKey> {
        // Collect first; removing while iterating would deadlock the shard
        let sample: Vec<_> = self
            .entries
            .iter()
            .filter(|e| e.key() != keep)
            .take(EVICTION_SAMPLE)
            .map(|e| {
                let expired = e.value().freshness(now, self.grace) == Freshness::Expired;
                (e.key().clone(), expired, e.value().expires_at())
            })
            .collect();

        sample
            .into_iter()
            .min_by_key(|(_, expired, at)| (!*expired, at.is_none(), *at))
            .map(|(key, _, _)| key)
    }
}

impl std::fmt::Debug for CacheStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheStore")
            .field("entries", &self.entries.len())
            .field("grace", &self.grace)
            .field("max_entries", &self.max_entries)
            .finish()
    }
}

//! Bounded in-memory tier: least-recently-used eviction, lazy TTL expiry.

use std::num::NonZeroUsize;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use lru::LruCache;
use tokio::time::Instant;

use super::CacheEntry;

struct Slot {
    entry: CacheEntry,
    inserted: Instant,
}

/// In-memory cache holding at most `capacity` entries for `ttl` each.
pub struct MemoryCache {
    ttl: Duration,
    // None when the capacity is zero.
    lru: Option<Mutex<LruCache<String, Slot>>>,
}

impl MemoryCache {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            ttl,
            lru: NonZeroUsize::new(capacity).map(|cap| Mutex::new(LruCache::new(cap))),
        }
    }

    fn lock(&self) -> Option<MutexGuard<'_, LruCache<String, Slot>>> {
        self.lru
            .as_ref()
            .map(|lru| lru.lock().unwrap_or_else(|poisoned| poisoned.into_inner()))
    }

    fn is_live(&self, slot: &Slot, now: Instant) -> bool {
        now.saturating_duration_since(slot.inserted) < self.ttl
    }

    /// Return a live entry, refreshing its recency. Expired entries are dropped.
    pub fn get(&self, key: &str) -> Option<CacheEntry> {
        let now = Instant::now();
        let mut lru = self.lock()?;

        let live = self.is_live(lru.peek(key)?, now);
        if !live {
            lru.pop(key);
            tracing::debug!(key = %key, "Memory cache entry expired");
            return None;
        }
        lru.get(key).map(|slot| slot.entry.clone())
    }

    /// Insert or replace an entry.
    ///
    /// Returns the key evicted to make room, if any. Expired entries are
    /// reclaimed before a live one is evicted.
    pub fn insert(&self, entry: CacheEntry) -> Option<String> {
        let now = Instant::now();
        let mut lru = self.lock()?;

        if !lru.contains(&entry.key) && lru.len() >= lru.cap().get() {
            self.drop_expired(&mut lru, now);
        }

        let key = entry.key.clone();
        let slot = Slot {
            entry,
            inserted: now,
        };
        // `push` also hands back the previous value of a replaced key.
        match lru.push(key.clone(), slot) {
            Some((evicted, _)) if evicted != key => Some(evicted),
            _ => None,
        }
    }

    /// Drop every expired entry, returning how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        match self.lock() {
            Some(mut lru) => self.drop_expired(&mut lru, now),
            None => 0,
        }
    }

    fn drop_expired(&self, lru: &mut LruCache<String, Slot>, now: Instant) -> usize {
        let expired: Vec<String> = lru
            .iter()
            .filter(|(_, slot)| !self.is_live(slot, now))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &expired {
            lru.pop(key);
        }
        expired.len()
    }

    pub fn len(&self) -> usize {
        self.lock().map_or(0, |lru| lru.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

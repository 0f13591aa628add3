//! In-process cache tier with TTL expiry and least-recently-used eviction
//!
//! The table is lossy by contract: a miss only means the caller takes the
//! slower path through the storage backends. The lock is never held across an
//! await point.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tracing::debug;

use crate::entities::CacheEntry;

/// What the cache ceiling is measured in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", tag = "unit", content = "limit")]
pub enum CacheCeiling {
    /// Maximum number of entries
    Entries(usize),
    /// Maximum sum of entry sizes in bytes
    Bytes(u64),
}

impl Default for CacheCeiling {
    fn default() -> Self {
        CacheCeiling::Entries(1000)
    }
}

/// Hit/miss counters and current occupancy
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheStats {
    pub entries: usize,
    pub bytes: u64,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

struct Slot {
    entry: CacheEntry,
    /// Monotonic recency stamp; breaks ties between equal timestamps
    tick: u64,
}

#[derive(Default)]
struct CacheState {
    slots: HashMap<String, Slot>,
    bytes: u64,
    clock: u64,
    hits: u64,
    misses: u64,
    evictions: u64,
}

impl CacheState {
    fn next_tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    fn remove(&mut self, key: &str) -> Option<CacheEntry> {
        let slot = self.slots.remove(key)?;
        self.bytes -= slot.entry.size;
        Some(slot.entry)
    }

    fn over(&self, ceiling: CacheCeiling) -> bool {
        match ceiling {
            CacheCeiling::Entries(max) => self.slots.len() > max,
            CacheCeiling::Bytes(max) => self.bytes > max,
        }
    }
}

/// Bounded, TTL-aware cache table
pub struct TieredCache {
    state: Mutex<CacheState>,
    ceiling: CacheCeiling,
    ttl: Duration,
}

impl TieredCache {
    pub fn new(ceiling: CacheCeiling, ttl: Duration) -> Self {
        Self {
            state: Mutex::new(CacheState::default()),
            ceiling,
            ttl,
        }
    }

    pub fn ceiling(&self) -> CacheCeiling {
        self.ceiling
    }

    /// Default TTL for new entries
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    fn lock(&self) -> MutexGuard<'_, CacheState> {
        // The state has no invariants a panicking holder could break halfway
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Look up a live entry, refreshing its access bookkeeping
    pub fn get(&self, key: &str) -> Option<CacheEntry> {
        self.get_at(key, OffsetDateTime::now_utc())
    }

    pub fn get_at(&self, key: &str, now: OffsetDateTime) -> Option<CacheEntry> {
        let mut state = self.lock();
        let expired = match state.slots.get(key) {
            Some(slot) => slot.entry.is_expired_at(now),
            None => {
                state.misses += 1;
                return None;
            }
        };

        if expired {
            state.remove(key);
            state.misses += 1;
            debug!(key, "cache entry expired");
            return None;
        }

        let tick = state.next_tick();
        state.hits += 1;
        let slot = state.slots.get_mut(key)?;
        slot.tick = tick;
        slot.entry.access_count += 1;
        slot.entry.last_accessed = now;
        Some(slot.entry.clone())
    }

    /// Build an entry with the default TTL and insert it
    pub fn put_data(&self, key: &str, data: Vec<u8>) -> Vec<String> {
        self.insert(CacheEntry::new(key, data, self.ttl))
    }

    /// Insert or overwrite an entry, then evict down to the ceiling.
    ///
    /// Returns the keys that were evicted.
    pub fn insert(&self, entry: CacheEntry) -> Vec<String> {
        let mut state = self.lock();
        let tick = state.next_tick();
        state.remove(&entry.key);
        state.bytes += entry.size;
        state.slots.insert(entry.key.clone(), Slot { entry, tick });
        self.evict_locked(&mut state)
    }

    pub fn remove(&self, key: &str) -> Option<CacheEntry> {
        self.lock().remove(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.lock().slots.contains_key(key)
    }

    /// Evict least-recently-accessed entries until the table fits its ceiling
    pub fn evict(&self) -> Vec<String> {
        let mut state = self.lock();
        self.evict_locked(&mut state)
    }

    fn evict_locked(&self, state: &mut CacheState) -> Vec<String> {
        if !state.over(self.ceiling) {
            return Vec::new();
        }

        let mut by_recency: Vec<(u64, String)> = state
            .slots
            .iter()
            .map(|(key, slot)| (slot.tick, key.clone()))
            .collect();
        by_recency.sort_unstable();

        let mut evicted = Vec::new();
        for (_, key) in by_recency {
            if !state.over(self.ceiling) {
                break;
            }
            state.remove(&key);
            state.evictions += 1;
            evicted.push(key);
        }

        if !evicted.is_empty() {
            debug!(count = evicted.len(), "evicted cache entries");
        }
        evicted
    }

    /// Drop every entry whose TTL has elapsed; returns the removed keys
    pub fn purge_expired(&self) -> Vec<String> {
        self.purge_expired_at(OffsetDateTime::now_utc())
    }

    pub fn purge_expired_at(&self, now: OffsetDateTime) -> Vec<String> {
        let mut state = self.lock();
        let expired: Vec<String> = state
            .slots
            .iter()
            .filter(|(_, slot)| slot.entry.is_expired_at(now))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &expired {
            state.remove(key);
        }
        expired
    }

    /// Remove everything; counters are kept
    pub fn clear(&self) -> usize {
        let mut state = self.lock();
        let count = state.slots.len();
        state.slots.clear();
        state.bytes = 0;
        count
    }

    pub fn keys(&self) -> Vec<String> {
        self.lock().slots.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lock().slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().slots.is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        let state = self.lock();
        CacheStats {
            entries: state.slots.len(),
            bytes: state.bytes,
            hits: state.hits,
            misses: state.misses,
            evictions: state.evictions,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cache(limit: usize) -> TieredCache {
        TieredCache::new(CacheCeiling::Entries(limit), Duration::from_secs(60))
    }

    #[test]
    fn test_get_refreshes_access() {
        let cache = cache(10);
        cache.put_data("a", b"one".to_vec());

        let first = cache.get("a").unwrap();
        assert_eq!(first.access_count, 1);
        let second = cache.get("a").unwrap();
        assert_eq!(second.access_count, 2);
        assert!(second.last_accessed >= first.last_accessed);

        let stats = cache.stats();
        assert_eq!(stats.hits, 2);
        assert_eq!(stats.misses, 0);
    }

    #[test]
    fn test_expired_entry_is_a_miss() {
        let cache = cache(10);
        let now = OffsetDateTime::now_utc();
        cache.insert(CacheEntry::new_at("a", b"x".to_vec(), Duration::from_secs(5), now));

        assert!(cache.get_at("a", now + time::Duration::seconds(4)).is_some());
        assert!(cache.get_at("a", now + time::Duration::seconds(5)).is_none());
        assert!(!cache.contains("a"));
        assert_eq!(cache.stats().misses, 1);
    }

    #[test]
    fn test_eviction_keeps_most_recently_used() {
        let cache = cache(3);
        cache.put_data("a", b"1".to_vec());
        cache.put_data("b", b"2".to_vec());
        cache.put_data("c", b"3".to_vec());

        // Touch "a" so "b" becomes the oldest
        cache.get("a");

        let evicted = cache.put_data("d", b"4".to_vec());
        assert_eq!(evicted, vec!["b".to_string()]);
        assert_eq!(cache.len(), 3);
        assert!(cache.contains("a"));
        assert!(cache.contains("c"));
        assert!(cache.contains("d"));
    }

    #[test]
    fn test_byte_ceiling() {
        let cache = TieredCache::new(CacheCeiling::Bytes(10), Duration::from_secs(60));
        cache.put_data("a", vec![0; 4]);
        cache.put_data("b", vec![0; 4]);
        let evicted = cache.put_data("c", vec![0; 4]);

        assert_eq!(evicted, vec!["a".to_string()]);
        assert!(cache.stats().bytes <= 10);
    }

    #[test]
    fn test_overwrite_does_not_double_count() {
        let cache = TieredCache::new(CacheCeiling::Bytes(100), Duration::from_secs(60));
        cache.put_data("a", vec![0; 40]);
        cache.put_data("a", vec![0; 30]);
        assert_eq!(cache.stats().bytes, 30);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_many_inserts_stay_under_ceiling() {
        let cache = cache(5);
        for i in 0..50 {
            cache.put_data(&format!("key-{}", i), vec![i as u8]);
            assert!(cache.len() <= 5);
        }
        for i in 45..50 {
            assert!(cache.contains(&format!("key-{}", i)));
        }
        assert_eq!(cache.stats().evictions, 45);
    }

    #[test]
    fn test_purge_expired() {
        let cache = cache(10);
        let now = OffsetDateTime::now_utc();
        cache.insert(CacheEntry::new_at("short", b"x".to_vec(), Duration::from_secs(1), now));
        cache.insert(CacheEntry::new_at("long", b"y".to_vec(), Duration::from_secs(100), now));

        let purged = cache.purge_expired_at(now + time::Duration::seconds(2));
        assert_eq!(purged, vec!["short".to_string()]);
        assert!(cache.contains("long"));
    }

    #[test]
    fn test_hit_rate() {
        let cache = cache(10);
        assert_eq!(cache.stats().hit_rate(), 0.0);
        cache.put_data("a", b"1".to_vec());
        cache.get("a");
        cache.get("missing");
        assert!((cache.stats().hit_rate() - 0.5).abs() < f64::EPSILON);
    }
}

// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Ticket caches
//!
//! A [`ResourceCache`] stores immutable payloads under short alphanumeric
//! stamps. Storing content that is already present returns the existing
//! stamp. Payloads are shared as `Arc`s; an entry whose payload is still
//! referenced outside the cache is never evicted. When the total size
//! exceeds the ceiling, least-recently-used unreferenced entries are
//! dropped until usage is at most half the ceiling.

pub mod state;

pub use state::{CursorCaches, IdSetCache, StateCache};

use crate::error::CacheError;
use parking_lot::Mutex;
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// Payloads a ticket cache can hold
pub trait Storable: Eq + Hash + Send + Sync + 'static {
    /// Approximate memory footprint in bytes
    fn size_bytes(&self) -> usize;
}

impl Storable for String {
    fn size_bytes(&self) -> usize {
        self.len()
    }
}

/// Short alphanumeric handle of a cached payload
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Stamp(String);

impl Stamp {
    /// Validate stamp text as found in a cursor (without the leading `@`)
    pub fn parse(text: &str) -> Option<Self> {
        if !text.is_empty()
            && !text.starts_with('x')
            && text.bytes().all(|b| b.is_ascii_alphanumeric())
        {
            Some(Stamp(text.to_string()))
        } else {
            None
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Stamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Outcome of storing a payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Ticket {
    Stamp(Stamp),
    /// The payload was too large; the caller must inline it
    Rejected,
}

/// Cache statistics
#[derive(Debug, Clone, Default)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub insertions: u64,
    pub duplicates: u64,
    pub rejections: u64,
    pub evictions: u64,
    pub pinned_skips: u64,
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

struct Record<T> {
    stamp: Stamp,
    payload: Arc<T>,
    hash: u64,
    size: usize,
    prev: Option<usize>,
    next: Option<usize>,
}

struct CacheInner<T> {
    slots: Vec<Option<Record<T>>>,
    free: Vec<usize>,
    buckets: HashMap<u64, Vec<usize>>,
    stamps: HashMap<Stamp, usize>,
    // LRU list: head is least recently used
    head: Option<usize>,
    tail: Option<usize>,
    total_bytes: usize,
    next_stamp: u64,
    stats: CacheStats,
}

impl<T> CacheInner<T> {
    fn new() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            buckets: HashMap::new(),
            stamps: HashMap::new(),
            head: None,
            tail: None,
            total_bytes: 0,
            next_stamp: 0,
            stats: CacheStats::default(),
        }
    }

    fn record(&self, slot: usize) -> Option<&Record<T>> {
        self.slots.get(slot).and_then(|r| r.as_ref())
    }

    fn record_mut(&mut self, slot: usize) -> Option<&mut Record<T>> {
        self.slots.get_mut(slot).and_then(|r| r.as_mut())
    }

    fn unlink(&mut self, slot: usize) {
        let (prev, next) = match self.record(slot) {
            Some(r) => (r.prev, r.next),
            None => return,
        };
        match prev {
            Some(p) => {
                if let Some(r) = self.record_mut(p) {
                    r.next = next;
                }
            }
            None => self.head = next,
        }
        match next {
            Some(n) => {
                if let Some(r) = self.record_mut(n) {
                    r.prev = prev;
                }
            }
            None => self.tail = prev,
        }
        if let Some(r) = self.record_mut(slot) {
            r.prev = None;
            r.next = None;
        }
    }

    fn push_back(&mut self, slot: usize) {
        let old_tail = self.tail;
        if let Some(r) = self.record_mut(slot) {
            r.prev = old_tail;
            r.next = None;
        }
        match old_tail {
            Some(t) => {
                if let Some(r) = self.record_mut(t) {
                    r.next = Some(slot);
                }
            }
            None => self.head = Some(slot),
        }
        self.tail = Some(slot);
    }

    fn touch(&mut self, slot: usize) {
        if self.tail != Some(slot) {
            self.unlink(slot);
            self.push_back(slot);
        }
    }

    fn fresh_stamp(&mut self) -> Stamp {
        self.next_stamp += 1;
        let mut text = base62(self.next_stamp);
        // `@x` introduces an inlined literal: jump over every `x...` stamp
        if text.starts_with('x') {
            let width = (text.len() - 1) as u32;
            self.next_stamp = (BASE62_X + 1) * 62u64.pow(width);
            text = base62(self.next_stamp);
        }
        Stamp(text)
    }

    fn remove(&mut self, slot: usize) -> Option<Record<T>> {
        self.unlink(slot);
        let record = self.slots.get_mut(slot)?.take()?;
        self.free.push(slot);
        self.stamps.remove(&record.stamp);
        if let Some(chain) = self.buckets.get_mut(&record.hash) {
            chain.retain(|s| *s != slot);
            if chain.is_empty() {
                self.buckets.remove(&record.hash);
            }
        }
        self.total_bytes -= record.size;
        Some(record)
    }
}

const BASE62_DIGITS: &[u8; 62] = b"0123456789abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ";

/// Digit value of `x`
const BASE62_X: u64 = 33;

fn base62(mut n: u64) -> String {
    let mut out = Vec::new();
    loop {
        out.push(BASE62_DIGITS[(n % 62) as usize]);
        n /= 62;
        if n == 0 {
            break;
        }
    }
    out.reverse();
    String::from_utf8_lossy(&out).into_owned()
}

fn content_hash<T: Hash>(payload: &T) -> u64 {
    let mut hasher = DefaultHasher::new();
    payload.hash(&mut hasher);
    hasher.finish()
}

/// Content-addressed LRU cache of shared payloads
pub struct ResourceCache<T: Storable> {
    name: &'static str,
    ceiling: usize,
    inner: Mutex<CacheInner<T>>,
}

impl<T: Storable> ResourceCache<T> {
    pub fn new(name: &'static str, ceiling: usize) -> Self {
        Self {
            name,
            ceiling,
            inner: Mutex::new(CacheInner::new()),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn ceiling(&self) -> usize {
        self.ceiling
    }

    /// Store a payload, returning a stamp for it
    pub fn store(&self, payload: T) -> Ticket {
        self.store_shared(Arc::new(payload))
    }

    /// Store a shared payload; identical content yields the existing stamp
    pub fn store_shared(&self, payload: Arc<T>) -> Ticket {
        let size = payload.size_bytes();
        let hash = content_hash(payload.as_ref());
        let mut inner = self.inner.lock();

        let existing = inner.buckets.get(&hash).and_then(|chain| {
            chain
                .iter()
                .copied()
                .find(|slot| matches!(inner.record(*slot), Some(r) if r.payload == payload))
        });
        if let Some(slot) = existing {
            inner.touch(slot);
            inner.stats.duplicates += 1;
            return match inner.record(slot) {
                Some(record) => Ticket::Stamp(record.stamp.clone()),
                None => Ticket::Rejected,
            };
        }

        if size > self.ceiling / 2 {
            inner.stats.rejections += 1;
            log::debug!(
                "{}",
                CacheError::TooLarge {
                    cache: self.name,
                    size,
                    ceiling: self.ceiling
                }
            );
            return Ticket::Rejected;
        }

        let stamp = inner.fresh_stamp();
        let record = Record {
            stamp: stamp.clone(),
            payload,
            hash,
            size,
            prev: None,
            next: None,
        };
        let slot = match inner.free.pop() {
            Some(slot) => {
                inner.slots[slot] = Some(record);
                slot
            }
            None => {
                inner.slots.push(Some(record));
                inner.slots.len() - 1
            }
        };
        inner.buckets.entry(hash).or_default().push(slot);
        inner.stamps.insert(stamp.clone(), slot);
        inner.push_back(slot);
        inner.total_bytes += size;
        inner.stats.insertions += 1;

        if inner.total_bytes > self.ceiling {
            self.evict(&mut inner, slot);
        }

        Ticket::Stamp(stamp)
    }

    /// Fetch a payload by stamp, taking an additional reference to it
    pub fn thaw(&self, stamp: &Stamp) -> Result<Arc<T>, CacheError> {
        let mut inner = self.inner.lock();
        match inner.stamps.get(stamp).copied() {
            Some(slot) => {
                inner.touch(slot);
                inner.stats.hits += 1;
                inner
                    .record(slot)
                    .map(|r| r.payload.clone())
                    .ok_or_else(|| CacheError::UnknownStamp(stamp.to_string()))
            }
            None => {
                inner.stats.misses += 1;
                Err(CacheError::UnknownStamp(stamp.to_string()))
            }
        }
    }

    pub fn contains(&self, stamp: &Stamp) -> bool {
        self.inner.lock().stamps.contains_key(stamp)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().stamps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn total_bytes(&self) -> usize {
        self.inner.lock().total_bytes
    }

    pub fn stats(&self) -> CacheStats {
        self.inner.lock().stats.clone()
    }

    fn evict(&self, inner: &mut CacheInner<T>, keep: usize) {
        let target = self.ceiling / 2;
        let mut cursor = inner.head;
        while let Some(slot) = cursor {
            if inner.total_bytes <= target {
                break;
            }
            let (next, pinned) = match inner.record(slot) {
                Some(r) => (r.next, Arc::strong_count(&r.payload) > 1),
                None => break,
            };
            if slot == keep || pinned {
                inner.stats.pinned_skips += 1;
            } else if inner.remove(slot).is_some() {
                inner.stats.evictions += 1;
            }
            cursor = next;
        }
        log::debug!(
            "Cache '{}' evicted down to {} bytes ({} entries)",
            self.name,
            inner.total_bytes,
            inner.stamps.len()
        );
    }
}

impl<T: Storable> fmt::Debug for ResourceCache<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("ResourceCache")
            .field("name", &self.name)
            .field("ceiling", &self.ceiling)
            .field("entries", &inner.stamps.len())
            .field("total_bytes", &inner.total_bytes)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn stamp_of(ticket: Ticket) -> Stamp {
        match ticket {
            Ticket::Stamp(stamp) => stamp,
            Ticket::Rejected => panic!("payload unexpectedly rejected"),
        }
    }

    #[test]
    fn test_identical_content_shares_a_stamp() {
        let cache: ResourceCache<String> = ResourceCache::new("test", 1024);
        let a = stamp_of(cache.store("hello".to_string()));
        let b = stamp_of(cache.store("hello".to_string()));
        let c = stamp_of(cache.store("world".to_string()));
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.stats().duplicates, 1);
    }

    #[test]
    fn test_thaw_returns_payload() {
        let cache: ResourceCache<String> = ResourceCache::new("test", 1024);
        let stamp = stamp_of(cache.store("payload".to_string()));
        assert_eq!(cache.thaw(&stamp).unwrap().as_str(), "payload");

        let missing = Stamp::parse("zz9").unwrap();
        assert_eq!(
            cache.thaw(&missing).unwrap_err(),
            CacheError::UnknownStamp("zz9".into())
        );
        assert_eq!(cache.stats().hits, 1);
        assert_eq!(cache.stats().misses, 1);
    }

    #[test]
    fn test_oversized_payload_rejected() {
        let cache: ResourceCache<String> = ResourceCache::new("test", 10);
        assert_eq!(cache.store("123456".to_string()), Ticket::Rejected);
        assert!(matches!(cache.store("12345".to_string()), Ticket::Stamp(_)));
    }

    #[test]
    fn test_eviction_drops_lru_to_half_ceiling() {
        let cache: ResourceCache<String> = ResourceCache::new("test", 40);
        let first = stamp_of(cache.store("a".repeat(10)));
        let second = stamp_of(cache.store("b".repeat(10)));
        let third = stamp_of(cache.store("c".repeat(10)));
        let fourth = stamp_of(cache.store("d".repeat(10)));
        assert_eq!(cache.total_bytes(), 40);

        // Refresh the first entry so the second becomes least recently used
        let _ = cache.thaw(&first).unwrap();

        let fifth = stamp_of(cache.store("e".repeat(10)));
        assert!(cache.total_bytes() <= 20);
        assert!(!cache.contains(&second));
        assert!(!cache.contains(&third));
        assert!(!cache.contains(&fourth));
        assert!(cache.contains(&first));
        assert!(cache.contains(&fifth));
        assert_eq!(cache.stats().evictions, 3);
    }

    #[test]
    fn test_referenced_payloads_survive_eviction() {
        let cache: ResourceCache<String> = ResourceCache::new("test", 20);
        let pinned_stamp = stamp_of(cache.store("p".repeat(8)));
        let pinned = cache.thaw(&pinned_stamp).unwrap();
        let loose = stamp_of(cache.store("l".repeat(8)));

        let _ = stamp_of(cache.store("n".repeat(8)));
        assert!(cache.contains(&pinned_stamp));
        assert!(!cache.contains(&loose));
        assert_eq!(pinned.len(), 8);
    }

    #[test]
    fn test_stamps_are_alphanumeric_and_never_x() {
        let cache: ResourceCache<String> = ResourceCache::new("test", 1 << 30);
        let mut seen = HashSet::new();
        for i in 0..2500 {
            let stamp = stamp_of(cache.store(format!("payload-{}", i)));
            assert!(Stamp::parse(stamp.as_str()).is_some(), "stamp {}", stamp);
            assert!(!stamp.as_str().starts_with('x'), "stamp {}", stamp);
            assert!(seen.insert(stamp));
        }
        assert!(Stamp::parse("a-b").is_none());
        assert!(Stamp::parse("").is_none());
        assert!(Stamp::parse("x0").is_none());
    }

    #[test]
    fn test_stamp_counter_skips_x_blocks() {
        let mut inner: CacheInner<String> = CacheInner::new();
        inner.next_stamp = BASE62_X - 1;
        assert_eq!(inner.fresh_stamp().as_str(), "y");

        // "wZ" is followed by the whole "x0".."xZ" block
        inner.next_stamp = 32 * 62 + 61 - 1;
        assert_eq!(inner.fresh_stamp().as_str(), "wZ");
        assert_eq!(inner.fresh_stamp().as_str(), "y0");

        inner.next_stamp = BASE62_X * 62 * 62 - 1;
        assert_eq!(inner.fresh_stamp().as_str(), "y00");
    }

    #[test]
    fn test_base62() {
        assert_eq!(base62(0), "0");
        assert_eq!(base62(61), "Z");
        assert_eq!(base62(62), "10");
        assert_eq!(base62(BASE62_X), "x");
    }
}

//! In-memory TTL cache with a capacity bound.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use super::pattern::KeyPattern;
use crate::error::CacheResult;

/// Size accounting for cached values.
pub trait Weigh {
    /// Approximate number of bytes held by the value.
    fn weight(&self) -> usize;
}

impl Weigh for String {
    fn weight(&self) -> usize {
        self.len()
    }
}

impl Weigh for Vec<u8> {
    fn weight(&self) -> usize {
        self.len()
    }
}

/// Which entry goes first when the store is over capacity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EvictionPolicy {
    /// Oldest insertion first.
    Fifo,
    /// Least recently read or written first.
    #[default]
    Lru,
}

impl std::fmt::Display for EvictionPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Fifo => write!(f, "fifo"),
            Self::Lru => write!(f, "lru"),
        }
    }
}

/// A stored value with its lifetime bookkeeping.
#[derive(Debug, Clone)]
pub struct CacheEntry<V> {
    pub value: V,
    pub created_at: Instant,
    pub expires_at: Instant,
    pub hit_count: u64,
    size: usize,
    seq: u64,
}

impl<V> CacheEntry<V> {
    pub fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

/// A successful lookup.
#[derive(Debug, Clone)]
pub struct CacheHit<V> {
    pub value: V,
    /// Time since the entry was stored.
    pub age: Duration,
    /// Hits including this one.
    pub hit_count: u64,
}

/// Filter and paging for [`CacheStore::entries`].
#[derive(Debug, Clone, Default)]
pub struct EntryQuery {
    pub limit: usize,
    pub offset: usize,
    pub pattern: Option<String>,
}

/// One row of the entry listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EntryInfo {
    pub key: String,
    pub size: usize,
    /// Milliseconds since the entry was stored.
    pub age: u64,
    pub hits: u64,
    /// Milliseconds until expiry.
    pub ttl_remaining: u64,
}

/// A page of entries, newest first.
#[derive(Debug, Clone, Serialize)]
pub struct EntryPage {
    pub entries: Vec<EntryInfo>,
    pub total: usize,
    pub limit: usize,
    pub offset: usize,
}

impl EntryPage {
    pub fn has_more(&self) -> bool {
        self.offset + self.entries.len() < self.total
    }
}

/// Cache statistics for monitoring.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    pub size: usize,
    pub capacity: usize,
    pub hits: u64,
    pub misses: u64,
    /// Hits as a percentage of lookups.
    pub hit_rate: f64,
    pub evictions: u64,
    pub expirations: u64,
    pub invalidations: u64,
    pub bytes: usize,
}

struct Inner<V> {
    entries: HashMap<String, CacheEntry<V>>,
    /// Eviction order: sequence number -> key. Lowest goes first.
    order: BTreeMap<u64, String>,
    next_seq: u64,
    bytes: usize,
    hits: u64,
    misses: u64,
    evictions: u64,
    expirations: u64,
    invalidations: u64,
}

impl<V> Inner<V> {
    fn new() -> Self {
        Self {
            entries: HashMap::new(),
            order: BTreeMap::new(),
            next_seq: 0,
            bytes: 0,
            hits: 0,
            misses: 0,
            evictions: 0,
            expirations: 0,
            invalidations: 0,
        }
    }

    fn bump_seq(&mut self) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        seq
    }

    fn remove(&mut self, key: &str) -> Option<CacheEntry<V>> {
        let entry = self.entries.remove(key)?;
        self.order.remove(&entry.seq);
        self.bytes = self.bytes.saturating_sub(entry.size);
        Some(entry)
    }

    fn remove_all(&mut self) -> usize {
        let removed = self.entries.len();
        self.entries.clear();
        self.order.clear();
        self.bytes = 0;
        removed
    }
}

/// Key/value store with per-entry TTL, FIFO or LRU capacity eviction and
/// glob invalidation.
///
/// All operations take one short lock and never await while holding it, so
/// the store can be shared freely across tasks behind an `Arc`.
pub struct CacheStore<V> {
    inner: Mutex<Inner<V>>,
    capacity: usize,
    policy: EvictionPolicy,
}

impl<V: Clone + Weigh> CacheStore<V> {
    pub fn new(capacity: usize, policy: EvictionPolicy) -> Self {
        Self {
            inner: Mutex::new(Inner::new()),
            capacity,
            policy,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn policy(&self) -> EvictionPolicy {
        self.policy
    }

    /// Look up a key.
    ///
    /// An expired entry counts as a miss and is removed on the spot.
    pub fn get(&self, key: &str) -> Option<CacheHit<V>> {
        let now = Instant::now();
        let mut inner = self.inner.lock();

        let expired = match inner.entries.get(key) {
            None => {
                inner.misses += 1;
                return None;
            }
            Some(entry) => entry.is_expired(now),
        };

        if expired {
            inner.remove(key);
            inner.expirations += 1;
            inner.misses += 1;
            tracing::trace!(key = %key, "cache entry expired on read");
            return None;
        }

        let new_seq = match self.policy {
            EvictionPolicy::Lru => Some(inner.bump_seq()),
            EvictionPolicy::Fifo => None,
        };
        inner.hits += 1;

        let entry = inner.entries.get_mut(key)?;
        entry.hit_count += 1;
        let old_seq = entry.seq;
        if let Some(seq) = new_seq {
            entry.seq = seq;
        }
        let hit = CacheHit {
            value: entry.value.clone(),
            age: now.saturating_duration_since(entry.created_at),
            hit_count: entry.hit_count,
        };

        if let Some(seq) = new_seq {
            inner.order.remove(&old_seq);
            inner.order.insert(seq, key.to_string());
        }

        Some(hit)
    }

    /// Whether a live entry exists. Does not touch statistics or recency.
    pub fn contains(&self, key: &str) -> bool {
        let now = Instant::now();
        self.inner
            .lock()
            .entries
            .get(key)
            .is_some_and(|e| !e.is_expired(now))
    }

    /// Store a value. A zero TTL stores nothing.
    pub fn set(&self, key: &str, value: V, ttl: Duration) {
        if ttl.is_zero() || self.capacity == 0 {
            return;
        }

        let now = Instant::now();
        let size = key.len() + value.weight();
        let mut inner = self.inner.lock();

        inner.remove(key);
        let seq = inner.bump_seq();
        inner.entries.insert(
            key.to_string(),
            CacheEntry {
                value,
                created_at: now,
                expires_at: now + ttl,
                hit_count: 0,
                size,
                seq,
            },
        );
        inner.order.insert(seq, key.to_string());
        inner.bytes += size;

        while inner.entries.len() > self.capacity {
            let Some((_, victim)) = inner.order.pop_first() else {
                break;
            };
            if let Some(entry) = inner.entries.remove(&victim) {
                inner.bytes = inner.bytes.saturating_sub(entry.size);
                inner.evictions += 1;
                tracing::debug!(key = %victim, policy = %self.policy, "cache entry evicted");
            }
        }
    }

    /// Remove every key matching a glob pattern and return how many went.
    pub fn invalidate_pattern(&self, pattern: &str) -> CacheResult<usize> {
        let pattern = KeyPattern::new(pattern)?;
        let mut inner = self.inner.lock();

        let removed = if pattern.matches_all() {
            inner.remove_all()
        } else {
            let keys: Vec<String> = inner
                .entries
                .keys()
                .filter(|k| pattern.matches(k))
                .cloned()
                .collect();
            for key in &keys {
                inner.remove(key);
            }
            keys.len()
        };

        inner.invalidations += removed as u64;
        tracing::debug!(pattern = %pattern.as_str(), removed, "cache pattern invalidated");
        Ok(removed)
    }

    /// Drop everything. Returns the number of entries removed.
    pub fn clear(&self) -> usize {
        let mut inner = self.inner.lock();
        let removed = inner.remove_all();
        inner.invalidations += removed as u64;
        removed
    }

    /// Remove expired entries. Returns the number removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut inner = self.inner.lock();

        let expired: Vec<String> = inner
            .entries
            .iter()
            .filter(|(_, e)| e.is_expired(now))
            .map(|(k, _)| k.clone())
            .collect();
        for key in &expired {
            inner.remove(key);
        }

        inner.expirations += expired.len() as u64;
        expired.len()
    }

    /// List live entries, newest first.
    pub fn entries(&self, query: &EntryQuery) -> CacheResult<EntryPage> {
        let pattern = query.pattern.as_deref().map(KeyPattern::new).transpose()?;
        let now = Instant::now();
        let inner = self.inner.lock();

        let mut total = 0;
        let mut page = Vec::new();
        for key in inner.order.values().rev() {
            let Some(entry) = inner.entries.get(key) else {
                continue;
            };
            if entry.is_expired(now) {
                continue;
            }
            if let Some(p) = &pattern
                && !p.matches(key)
            {
                continue;
            }

            if total >= query.offset && page.len() < query.limit {
                page.push(EntryInfo {
                    key: key.clone(),
                    size: entry.size,
                    age: now.saturating_duration_since(entry.created_at).as_millis() as u64,
                    hits: entry.hit_count,
                    ttl_remaining: entry.expires_at.saturating_duration_since(now).as_millis()
                        as u64,
                });
            }
            total += 1;
        }

        Ok(EntryPage {
            entries: page,
            total,
            limit: query.limit,
            offset: query.offset,
        })
    }

    /// Number of stored entries, including expired ones not yet swept.
    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        let inner = self.inner.lock();
        let lookups = inner.hits + inner.misses;
        CacheStats {
            size: inner.entries.len(),
            capacity: self.capacity,
            hits: inner.hits,
            misses: inner.misses,
            hit_rate: if lookups == 0 {
                0.0
            } else {
                (inner.hits as f64 * 100.0) / lookups as f64
            },
            evictions: inner.evictions,
            expirations: inner.expirations,
            invalidations: inner.invalidations,
            bytes: inner.bytes,
        }
    }
}

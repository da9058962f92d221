//! TTL caches for permission decisions and role resolutions
//!
//! Provides:
//! - In-memory cache with DashMap (thread-safe)
//! - Lazy TTL expiration checked on read
//! - Targeted invalidation by key predicate (per user, per role)
//! - A generation counter so a value computed before an invalidation is
//!   never stored after it
//! - BLAKE3 hashing of normalized request context for decision keys

use blake3::Hasher;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::collections::BTreeSet;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use crate::types::{Context, PermissionId, RoleId};

/// Cached entry with TTL and an optional hard deadline
#[derive(Debug, Clone)]
struct CachedEntry<V> {
    value: V,
    cached_at: Instant,
    deadline: Option<Instant>,
}

impl<V> CachedEntry<V> {
    fn new(value: V, deadline: Option<Instant>) -> Self {
        Self {
            value,
            cached_at: Instant::now(),
            deadline,
        }
    }

    fn is_expired(&self, ttl: Duration) -> bool {
        self.cached_at.elapsed() > ttl
            || self.deadline.map_or(false, |deadline| Instant::now() >= deadline)
    }
}

/// Monotonic instant at which a wall-clock time is reached
///
/// `None` when that time has already passed.
pub fn instant_at(at: DateTime<Utc>) -> Option<Instant> {
    let remaining = (at - Utc::now()).to_std().ok()?;
    Some(Instant::now() + remaining)
}

/// Cache statistics
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CacheStats {
    pub hits: usize,
    pub misses: usize,
    pub expirations: usize,
    pub invalidations: usize,
    pub entries: usize,
    pub max_entries: usize,
}

impl CacheStats {
    /// Calculate cache hit rate
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Generic TTL cache with generation-checked inserts
pub struct TtlCache<K, V> {
    entries: DashMap<K, CachedEntry<V>>,
    ttl: Duration,
    capacity: usize,
    generation: AtomicU64,
    stats: DashMap<&'static str, usize>,
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    /// Create a cache holding up to `capacity` entries for `ttl` each
    pub fn new(ttl: Duration, capacity: usize) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
            capacity: capacity.max(1),
            generation: AtomicU64::new(0),
            stats: DashMap::new(),
        }
    }

    /// Get a fresh value
    pub fn get(&self, key: &K) -> Option<V> {
        if let Some(entry) = self.entries.get(key) {
            if entry.is_expired(self.ttl) {
                drop(entry);
                self.entries.remove(key);
                self.increment_stat("expirations");
                self.increment_stat("misses");
                return None;
            }

            self.increment_stat("hits");
            return Some(entry.value.clone());
        }

        self.increment_stat("misses");
        None
    }

    /// Snapshot to pass to [`insert`](Self::insert) after computing a value
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Store a value computed at `generation`
    ///
    /// Returns false (and stores nothing) when an invalidation happened
    /// since the snapshot was taken.
    pub fn insert(&self, key: K, value: V, generation: u64) -> bool {
        self.store(key, value, generation, None)
    }

    /// Like [`insert`](Self::insert), but the entry also lapses at `deadline`
    /// even when the TTL has not run out
    pub fn insert_until(&self, key: K, value: V, generation: u64, deadline: Instant) -> bool {
        self.store(key, value, generation, Some(deadline))
    }

    fn store(&self, key: K, value: V, generation: u64, deadline: Option<Instant>) -> bool {
        if self.generation() != generation {
            return false;
        }

        if self.entries.len() >= self.capacity {
            self.evict();
        }
        self.entries.insert(key.clone(), CachedEntry::new(value, deadline));

        // An invalidation may have slipped in between the check and the insert
        if self.generation() != generation {
            self.entries.remove(&key);
            return false;
        }
        true
    }

    /// Remove every entry whose key matches; returns how many were removed
    pub fn invalidate_where<F>(&self, predicate: F) -> usize
    where
        F: Fn(&K) -> bool,
    {
        // Bump before removing so racing inserts see the change
        self.generation.fetch_add(1, Ordering::AcqRel);

        let before = self.entries.len();
        self.entries.retain(|key, _| !predicate(key));
        let removed = before.saturating_sub(self.entries.len());

        self.add_stat("invalidations", removed);
        removed
    }

    /// Clear the entire cache
    pub fn clear(&self) {
        self.generation.fetch_add(1, Ordering::AcqRel);
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Get cache statistics
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.get_stat("hits"),
            misses: self.get_stat("misses"),
            expirations: self.get_stat("expirations"),
            invalidations: self.get_stat("invalidations"),
            entries: self.entries.len(),
            max_entries: self.capacity,
        }
    }

    /// Drop expired entries, then 10% of the rest if still full
    fn evict(&self) {
        let ttl = self.ttl;
        self.entries.retain(|_, entry| !entry.is_expired(ttl));

        if self.entries.len() < self.capacity {
            return;
        }

        let to_remove = (self.capacity / 10).max(1);
        let mut removed = 0;
        self.entries.retain(|_, _| {
            if removed < to_remove {
                removed += 1;
                false
            } else {
                true
            }
        });
    }

    fn increment_stat(&self, key: &'static str) {
        self.add_stat(key, 1);
    }

    fn add_stat(&self, key: &'static str, amount: usize) {
        *self.stats.entry(key).or_insert(0) += amount;
    }

    fn get_stat(&self, key: &'static str) -> usize {
        self.stats.get(key).map(|v| *v).unwrap_or(0)
    }
}

/// Cache key for a permission decision
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DecisionKey {
    pub user_id: String,
    pub permission_id: PermissionId,
    context_hash: [u8; 32],
}

impl DecisionKey {
    pub fn new(user_id: &str, permission_id: &str, context: &Context) -> Self {
        Self {
            user_id: user_id.to_string(),
            permission_id: permission_id.to_string(),
            context_hash: Self::hash_context(context),
        }
    }

    /// Hash the context with keys in sorted order
    fn hash_context(context: &Context) -> [u8; 32] {
        let mut hasher = Hasher::new();

        let mut pairs: Vec<_> = context.iter().collect();
        pairs.sort_by_key(|(k, _)| *k);
        for (key, value) in pairs {
            hasher.update(key.as_bytes());
            hasher.update(&[0]);
            hasher.update(value.to_string().as_bytes());
            hasher.update(&[0]);
        }

        *hasher.finalize().as_bytes()
    }
}

/// Cached permission decisions
pub type DecisionCache = TtlCache<DecisionKey, bool>;

/// Cached inherited permission sets, keyed by role
pub type ResolutionCache = TtlCache<RoleId, BTreeSet<PermissionId>>;

impl DecisionCache {
    /// Drop every decision cached for a user
    pub fn invalidate_user(&self, user_id: &str) -> usize {
        self.invalidate_where(|key| key.user_id == user_id)
    }
}

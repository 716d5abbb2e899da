//! Bounded TTL + LRU cache
//!
//! Memoizes previously validated OIDC ID tokens for the password grant.
//! Entries are bounded by count (strict least-recently-used eviction) and by
//! age (checked lazily on [`TtlLruCache::get`]; there is no background sweep).
//!
//! All operations take a single mutex and are O(1): a hash map indexes into a
//! vector-backed doubly linked list ordered from most to least recently used.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

/// Thread-safe cache bounded by capacity and per-entry TTL
pub struct TtlLruCache<V> {
    inner: Mutex<LruList<V>>,
    capacity: usize,
    ttl: Duration,
    stats: CacheStats,
}

/// Cache statistics tracked atomically
#[derive(Debug, Default)]
struct CacheStats {
    hits: AtomicU64,
    misses: AtomicU64,
    expirations: AtomicU64,
    evictions: AtomicU64,
}

/// Snapshot of cache statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct CacheStatsSnapshot {
    /// Lookups served from the cache
    pub hits: u64,
    /// Lookups that found nothing or an expired entry
    pub misses: u64,
    /// Entries dropped on lookup because they outlived the TTL
    pub expirations: u64,
    /// Entries dropped to make room for a new key
    pub evictions: u64,
    /// Current number of entries
    pub size: usize,
}

struct Node<V> {
    key: String,
    value: V,
    inserted_at: Instant,
    prev: Option<usize>,
    next: Option<usize>,
}

/// Linked list over a `Vec`; `head` is most recently used, `tail` least.
struct LruList<V> {
    map: HashMap<String, usize>,
    nodes: Vec<Node<V>>,
    head: Option<usize>,
    tail: Option<usize>,
}

impl<V> LruList<V> {
    fn with_capacity(capacity: usize) -> Self {
        // Cap the up-front allocation; large configured capacities grow lazily.
        let initial = capacity.min(1024);
        Self {
            map: HashMap::with_capacity(initial),
            nodes: Vec::with_capacity(initial),
            head: None,
            tail: None,
        }
    }

    fn len(&self) -> usize {
        self.nodes.len()
    }

    fn unlink(&mut self, idx: usize) {
        let (prev, next) = (self.nodes[idx].prev, self.nodes[idx].next);
        match prev {
            Some(p) => self.nodes[p].next = next,
            None => self.head = next,
        }
        match next {
            Some(n) => self.nodes[n].prev = prev,
            None => self.tail = prev,
        }
        self.nodes[idx].prev = None;
        self.nodes[idx].next = None;
    }

    fn push_front(&mut self, idx: usize) {
        self.nodes[idx].prev = None;
        self.nodes[idx].next = self.head;
        if let Some(h) = self.head {
            self.nodes[h].prev = Some(idx);
        }
        self.head = Some(idx);
        if self.tail.is_none() {
            self.tail = Some(idx);
        }
    }

    fn touch(&mut self, idx: usize) {
        if self.head != Some(idx) {
            self.unlink(idx);
            self.push_front(idx);
        }
    }

    /// Unlink and drop the node at `idx`, keeping indices dense.
    fn remove_at(&mut self, idx: usize) -> Node<V> {
        self.unlink(idx);
        let node = self.nodes.swap_remove(idx);
        self.map.remove(&node.key);

        // The former last node now lives at `idx`; repoint its neighbours.
        if idx < self.nodes.len() {
            let (prev, next) = (self.nodes[idx].prev, self.nodes[idx].next);
            match prev {
                Some(p) => self.nodes[p].next = Some(idx),
                None => self.head = Some(idx),
            }
            match next {
                Some(n) => self.nodes[n].prev = Some(idx),
                None => self.tail = Some(idx),
            }
            if let Some(slot) = self.map.get_mut(&self.nodes[idx].key) {
                *slot = idx;
            }
        }

        node
    }
}

impl<V: Clone> TtlLruCache<V> {
    /// Create a cache holding at most `capacity` entries for at most `ttl` each.
    ///
    /// A capacity of zero disables caching: [`add`](Self::add) is a no-op.
    #[must_use]
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            inner: Mutex::new(LruList::with_capacity(capacity)),
            capacity,
            ttl,
            stats: CacheStats::default(),
        }
    }

    /// Look up `key`, marking it most recently used.
    ///
    /// An entry older than the TTL is removed and reported as a miss.
    pub fn get(&self, key: &str) -> Option<V> {
        self.get_at(key, Instant::now())
    }

    /// Insert or refresh `key`.
    ///
    /// Refreshing replaces the value, restarts its TTL and marks it most
    /// recently used. Inserting into a full cache evicts the least recently
    /// used entry.
    pub fn add(&self, key: impl Into<String>, value: V) {
        self.add_at(key.into(), value, Instant::now());
    }

    /// Remove `key`, returning its value if present.
    pub fn remove(&self, key: &str) -> Option<V> {
        let mut list = self.inner.lock();
        let idx = *list.map.get(key)?;
        Some(list.remove_at(idx).value)
    }

    /// Number of stored entries, including ones that expired but were not
    /// looked up since.
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    /// Whether the cache holds no entries
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Configured maximum number of entries
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Configured per-entry lifetime
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Get cache statistics
    pub fn stats(&self) -> CacheStatsSnapshot {
        CacheStatsSnapshot {
            hits: self.stats.hits.load(Ordering::Relaxed),
            misses: self.stats.misses.load(Ordering::Relaxed),
            expirations: self.stats.expirations.load(Ordering::Relaxed),
            evictions: self.stats.evictions.load(Ordering::Relaxed),
            size: self.len(),
        }
    }

    fn get_at(&self, key: &str, now: Instant) -> Option<V> {
        let mut list = self.inner.lock();
        let Some(&idx) = list.map.get(key) else {
            self.stats.misses.fetch_add(1, Ordering::Relaxed);
            return None;
        };

        if now.saturating_duration_since(list.nodes[idx].inserted_at) >= self.ttl {
            list.remove_at(idx);
            self.stats.expirations.fetch_add(1, Ordering::Relaxed);
            self.stats.misses.fetch_add(1, Ordering::Relaxed);
            return None;
        }

        list.touch(idx);
        self.stats.hits.fetch_add(1, Ordering::Relaxed);
        Some(list.nodes[idx].value.clone())
    }

    fn add_at(&self, key: String, value: V, now: Instant) {
        if self.capacity == 0 {
            return;
        }

        let mut list = self.inner.lock();
        if let Some(&idx) = list.map.get(&key) {
            let node = &mut list.nodes[idx];
            node.value = value;
            node.inserted_at = now;
            list.touch(idx);
            return;
        }

        if list.len() >= self.capacity {
            if let Some(lru) = list.tail {
                list.remove_at(lru);
                self.stats.evictions.fetch_add(1, Ordering::Relaxed);
            }
        }

        let idx = list.nodes.len();
        list.nodes.push(Node {
            key: key.clone(),
            value,
            inserted_at: now,
            prev: None,
            next: None,
        });
        list.map.insert(key, idx);
        list.push_front(idx);
    }
}

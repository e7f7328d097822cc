//! Bounded LRU cache
//!
//! Entry-count bounded key/value store with O(1) `get`, `set` and eviction.
//! Recency is tracked with a doubly-linked list whose nodes live in an arena
//! (`Vec` of slots plus a free list) and link to each other by index, so the
//! structure holds no raw pointers and no reference cycles.
//!
//! [`LruCache`] is the single-owner structure. [`SharedLruCache`] wraps it in
//! a mutex for the cases where cleanup callbacks and renderers touch the same
//! cache.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;

/// Sentinel index for "no node"
const NIL: usize = usize::MAX;

/// Statistics about cache usage
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Number of entries currently in cache
    pub entries: usize,

    /// Maximum number of entries allowed
    pub capacity: usize,

    /// Number of cache hits
    pub hits: u64,

    /// Number of cache misses
    pub misses: u64,

    /// Number of entries evicted to stay within capacity
    pub evictions: u64,
}

impl CacheStats {
    /// Calculate cache hit rate (0.0 to 1.0)
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

struct Node<K, V> {
    key: K,
    value: V,
    prev: usize,
    next: usize,
}

/// LRU cache bounded by entry count
///
/// `head` is the most recently used entry, `tail` the least recently used.
/// After any mutating call returns, `len() <= capacity()`.
///
/// # Example
///
/// ```
/// use docvault_cache::LruCache;
///
/// let mut cache = LruCache::new(2);
/// cache.set("a", 1);
/// cache.set("b", 2);
///
/// // Touch "a" so "b" becomes the eviction candidate
/// assert_eq!(cache.get(&"a"), Some(&1));
///
/// let evicted = cache.set("c", 3);
/// assert_eq!(evicted, Some(("b", 2)));
/// assert_eq!(cache.len(), 2);
/// ```
pub struct LruCache<K, V> {
    index: HashMap<K, usize>,
    slots: Vec<Option<Node<K, V>>>,
    free: Vec<usize>,
    head: usize,
    tail: usize,
    capacity: usize,
    hits: u64,
    misses: u64,
    evictions: u64,
}

impl<K, V> LruCache<K, V>
where
    K: Hash + Eq + Clone,
{
    /// Create a cache holding at most `capacity` entries
    pub fn new(capacity: usize) -> Self {
        Self {
            index: HashMap::with_capacity(capacity.min(1024)),
            slots: Vec::new(),
            free: Vec::new(),
            head: NIL,
            tail: NIL,
            capacity,
            hits: 0,
            misses: 0,
            evictions: 0,
        }
    }

    /// Number of entries in the cache
    pub fn len(&self) -> usize {
        self.index.len()
    }

    /// Check if the cache holds no entries
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Maximum number of entries
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Look up a value and mark it most recently used
    pub fn get(&mut self, key: &K) -> Option<&V> {
        match self.index.get(key).copied() {
            Some(idx) => {
                self.hits += 1;
                self.move_to_front(idx);
                self.slots[idx].as_ref().map(|node| &node.value)
            }
            None => {
                self.misses += 1;
                None
            }
        }
    }

    /// Look up a value without touching recency or statistics
    pub fn peek(&self, key: &K) -> Option<&V> {
        let idx = *self.index.get(key)?;
        self.slots[idx].as_ref().map(|node| &node.value)
    }

    /// Check if a key is present without touching recency
    pub fn contains(&self, key: &K) -> bool {
        self.index.contains_key(key)
    }

    /// Insert or update an entry and mark it most recently used
    ///
    /// Updating an existing key keeps `len()` unchanged. Inserting a new key
    /// into a full cache evicts exactly the least recently used entry, which
    /// is returned. With a capacity of zero nothing is stored and the given
    /// entry itself is handed back.
    pub fn set(&mut self, key: K, value: V) -> Option<(K, V)> {
        if let Some(&idx) = self.index.get(&key) {
            if let Some(node) = self.slots[idx].as_mut() {
                node.value = value;
            }
            self.move_to_front(idx);
            return None;
        }

        if self.capacity == 0 {
            return Some((key, value));
        }

        let evicted = if self.index.len() >= self.capacity {
            self.evict_one()
        } else {
            None
        };

        let idx = self.alloc(Node {
            key: key.clone(),
            value,
            prev: NIL,
            next: NIL,
        });
        self.attach_front(idx);
        self.index.insert(key, idx);

        evicted
    }

    /// Remove an entry, returning its value
    pub fn remove(&mut self, key: &K) -> Option<V> {
        let idx = self.index.remove(key)?;
        self.detach(idx);
        self.release(idx).map(|node| node.value)
    }

    /// Remove an entry, returning whether it was present
    pub fn delete(&mut self, key: &K) -> bool {
        self.remove(key).is_some()
    }

    /// Remove every entry matching `predicate`, returning how many were removed
    pub fn delete_if<F>(&mut self, mut predicate: F) -> usize
    where
        F: FnMut(&K, &V) -> bool,
    {
        let mut doomed = Vec::new();
        let mut cursor = self.tail;
        while cursor != NIL {
            let Some(node) = self.slots[cursor].as_ref() else {
                break;
            };
            if predicate(&node.key, &node.value) {
                doomed.push(cursor);
            }
            cursor = node.prev;
        }

        for idx in &doomed {
            self.detach(*idx);
            if let Some(node) = self.release(*idx) {
                self.index.remove(&node.key);
            }
        }
        doomed.len()
    }

    /// Remove and return the least recently used entry
    pub fn pop_lru(&mut self) -> Option<(K, V)> {
        if self.tail == NIL {
            return None;
        }
        let idx = self.tail;
        self.detach(idx);
        let node = self.release(idx)?;
        self.index.remove(&node.key);
        Some((node.key, node.value))
    }

    /// Change the capacity, evicting from the LRU end until `len() <= capacity`
    ///
    /// Returns the number of entries evicted.
    pub fn set_capacity(&mut self, capacity: usize) -> usize {
        self.capacity = capacity;
        let mut evicted = 0;
        while self.index.len() > self.capacity {
            if self.evict_one().is_none() {
                break;
            }
            evicted += 1;
        }
        evicted
    }

    /// Remove every entry
    pub fn clear(&mut self) {
        self.index.clear();
        self.slots.clear();
        self.free.clear();
        self.head = NIL;
        self.tail = NIL;
    }

    /// Keys from most to least recently used
    pub fn keys(&self) -> Vec<K> {
        let mut keys = Vec::with_capacity(self.index.len());
        let mut cursor = self.head;
        while cursor != NIL {
            let Some(node) = self.slots[cursor].as_ref() else {
                break;
            };
            keys.push(node.key.clone());
            cursor = node.next;
        }
        keys
    }

    /// Get current cache statistics
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.index.len(),
            capacity: self.capacity,
            hits: self.hits,
            misses: self.misses,
            evictions: self.evictions,
        }
    }

    fn evict_one(&mut self) -> Option<(K, V)> {
        let evicted = self.pop_lru();
        if evicted.is_some() {
            self.evictions += 1;
        }
        evicted
    }

    fn alloc(&mut self, node: Node<K, V>) -> usize {
        match self.free.pop() {
            Some(idx) => {
                self.slots[idx] = Some(node);
                idx
            }
            None => {
                self.slots.push(Some(node));
                self.slots.len() - 1
            }
        }
    }

    fn release(&mut self, idx: usize) -> Option<Node<K, V>> {
        let node = self.slots[idx].take();
        if node.is_some() {
            self.free.push(idx);
        }
        node
    }

    fn detach(&mut self, idx: usize) {
        let (prev, next) = match self.slots[idx].as_ref() {
            Some(node) => (node.prev, node.next),
            None => return,
        };

        if prev == NIL {
            self.head = next;
        } else if let Some(prev_node) = self.slots[prev].as_mut() {
            prev_node.next = next;
        }

        if next == NIL {
            self.tail = prev;
        } else if let Some(next_node) = self.slots[next].as_mut() {
            next_node.prev = prev;
        }

        if let Some(node) = self.slots[idx].as_mut() {
            node.prev = NIL;
            node.next = NIL;
        }
    }

    fn attach_front(&mut self, idx: usize) {
        let old_head = self.head;
        if let Some(node) = self.slots[idx].as_mut() {
            node.prev = NIL;
            node.next = old_head;
        }
        if old_head != NIL {
            if let Some(head_node) = self.slots[old_head].as_mut() {
                head_node.prev = idx;
            }
        } else {
            self.tail = idx;
        }
        self.head = idx;
    }

    fn move_to_front(&mut self, idx: usize) {
        if self.head != idx {
            self.detach(idx);
            self.attach_front(idx);
        }
    }
}

/// Thread-safe LRU cache handle
///
/// Cheap to clone; all clones share the same entries. Values are returned
/// by clone, so large payloads should be stored behind an `Arc`.
pub struct SharedLruCache<K, V> {
    inner: Arc<Mutex<LruCache<K, V>>>,
}

impl<K, V> Clone for SharedLruCache<K, V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<K, V> SharedLruCache<K, V>
where
    K: Hash + Eq + Clone,
    V: Clone,
{
    /// Create a shared cache holding at most `capacity` entries
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(LruCache::new(capacity))),
        }
    }

    /// Look up a value and mark it most recently used
    pub fn get(&self, key: &K) -> Option<V> {
        self.inner.lock().get(key).cloned()
    }

    /// Insert or update an entry, returning the evicted entry if any
    pub fn set(&self, key: K, value: V) -> Option<(K, V)> {
        self.inner.lock().set(key, value)
    }

    /// Check if a key is present
    pub fn contains(&self, key: &K) -> bool {
        self.inner.lock().contains(key)
    }

    /// Remove an entry, returning whether it was present
    pub fn delete(&self, key: &K) -> bool {
        self.inner.lock().delete(key)
    }

    /// Remove every entry matching `predicate`
    pub fn delete_if<F>(&self, predicate: F) -> usize
    where
        F: FnMut(&K, &V) -> bool,
    {
        self.inner.lock().delete_if(predicate)
    }

    /// Evict up to `count` least recently used entries
    pub fn trim_oldest(&self, count: usize) -> usize {
        let mut cache = self.inner.lock();
        let mut removed = 0;
        while removed < count && cache.pop_lru().is_some() {
            removed += 1;
        }
        removed
    }

    /// Change the capacity, evicting as needed before returning
    pub fn set_capacity(&self, capacity: usize) -> usize {
        self.inner.lock().set_capacity(capacity)
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    /// Check if the cache holds no entries
    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    /// Remove every entry
    pub fn clear(&self) {
        self.inner.lock().clear();
    }

    /// Get current cache statistics
    pub fn stats(&self) -> CacheStats {
        self.inner.lock().stats()
    }
}

//! Bounded least-recently-used cache.
//!
//! [`RecencyCache`] is the only structure mutated by both the ingestion path
//! and the read path. It holds at most `capacity` entries and evicts the
//! least recently used one when a new key would exceed that bound.
//!
//! # Locking
//!
//! A lookup reorders the recency list, so a read is a write. Every operation,
//! `get` included, runs under the same [`Mutex`]. A reader/writer lock would let
//! two concurrent `get`s relink the list at the same time.
//!
//! The lock is never held across an `.await`; callers in async code hold it
//! only for the duration of one call.
//!
//! # Layout
//!
//! Entries live in a `Vec` of nodes linked by index into a doubly-linked list
//! (head = most recent, tail = least recent). A `HashMap` maps each key to its
//! slot. Removal uses `swap_remove` and patches the moved node, so the node
//! vector stays dense and all operations are amortized O(1).
//!
//! # Example
//!
//! ```
//! use orderflow_core::RecencyCache;
//! use std::num::NonZeroUsize;
//!
//! let cache = RecencyCache::new(NonZeroUsize::new(2).unwrap());
//! cache.set("a", 1);
//! cache.set("b", 2);
//! assert_eq!(cache.get("a"), Some(1)); // "a" is now most recent
//! cache.set("c", 3);                   // evicts "b"
//! assert!(!cache.contains("b"));
//! assert_eq!(cache.keys_by_recency(), vec!["c", "a"]);
//! ```

use serde::Serialize;
use std::borrow::Borrow;
use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::num::NonZeroUsize;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Point-in-time counters for a [`RecencyCache`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    /// Lookups that found an entry.
    pub hits: u64,
    /// Lookups that found nothing.
    pub misses: u64,
    /// Entries dropped to make room for new keys.
    pub evictions: u64,
    /// Current number of entries.
    pub len: usize,
    /// Maximum number of entries.
    pub capacity: usize,
}

struct Node<K, V> {
    key: K,
    value: V,
    prev: Option<usize>,
    next: Option<usize>,
}

struct Inner<K, V> {
    nodes: Vec<Node<K, V>>,
    index: HashMap<K, usize>,
    head: Option<usize>,
    tail: Option<usize>,
    hits: u64,
    misses: u64,
    evictions: u64,
}

/// Capacity-bounded, thread-safe LRU cache.
///
/// Values are returned by clone; store `Arc<T>` for anything larger than a
/// handle so that cached aggregates are shared rather than copied.
pub struct RecencyCache<K, V> {
    capacity: NonZeroUsize,
    inner: Mutex<Inner<K, V>>,
}

impl<K, V> RecencyCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    /// Create an empty cache holding at most `capacity` entries.
    #[must_use]
    pub fn new(capacity: NonZeroUsize) -> Self {
        Self {
            capacity,
            inner: Mutex::new(Inner {
                nodes: Vec::with_capacity(capacity.get()),
                index: HashMap::with_capacity(capacity.get()),
                head: None,
                tail: None,
                hits: 0,
                misses: 0,
                evictions: 0,
            }),
        }
    }

    /// Insert or overwrite `key`, making it the most recently used entry.
    ///
    /// When `key` is new and the cache is full, the least recently used entry
    /// is evicted first. Always returns `true`.
    pub fn set(&self, key: K, value: V) -> bool {
        let mut inner = self.lock();

        if let Some(&slot) = inner.index.get(&key) {
            inner.nodes[slot].value = value;
            inner.promote(slot);
            return true;
        }

        if inner.nodes.len() >= self.capacity.get() {
            if let Some(tail) = inner.tail {
                inner.remove_slot(tail);
                inner.evictions += 1;
                tracing::trace!(capacity = self.capacity.get(), "Evicted least recently used entry");
            }
        }

        let slot = inner.nodes.len();
        inner.nodes.push(Node {
            key: key.clone(),
            value,
            prev: None,
            next: None,
        });
        inner.index.insert(key, slot);
        inner.push_front(slot);
        true
    }

    /// Look up `key`, promoting it to most recently used on a hit.
    ///
    /// A miss leaves the recency order untouched.
    pub fn get<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let mut inner = self.lock();

        let Some(&slot) = inner.index.get(key) else {
            inner.misses += 1;
            return None;
        };

        inner.hits += 1;
        inner.promote(slot);
        Some(inner.nodes[slot].value.clone())
    }

    /// Remove `key`. Returns whether it was present.
    pub fn remove<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let mut inner = self.lock();

        match inner.index.get(key) {
            Some(&slot) => {
                inner.remove_slot(slot);
                true
            }
            None => false,
        }
    }

    /// Whether `key` is cached. Does not affect recency.
    pub fn contains<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.lock().index.contains_key(key)
    }

    /// Number of cached entries.
    pub fn len(&self) -> usize {
        self.lock().nodes.len()
    }

    /// Whether the cache holds no entries.
    pub fn is_empty(&self) -> bool {
        self.lock().nodes.is_empty()
    }

    /// Maximum number of entries.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity.get()
    }

    /// Snapshot of the keys from most to least recently used.
    pub fn keys_by_recency(&self) -> Vec<K> {
        let inner = self.lock();
        let mut keys = Vec::with_capacity(inner.nodes.len());
        let mut cursor = inner.head;
        while let Some(slot) = cursor {
            let node = &inner.nodes[slot];
            keys.push(node.key.clone());
            cursor = node.next;
        }
        keys
    }

    /// Current hit/miss/eviction counters.
    pub fn stats(&self) -> CacheStats {
        let inner = self.lock();
        CacheStats {
            hits: inner.hits,
            misses: inner.misses,
            evictions: inner.evictions,
            len: inner.nodes.len(),
            capacity: self.capacity.get(),
        }
    }

    // A panic while the lock is held cannot leave the list half-linked in a
    // way later calls would observe: every mutation completes before unlock.
    fn lock(&self) -> MutexGuard<'_, Inner<K, V>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<K, V> Inner<K, V>
where
    K: Eq + Hash,
{
    fn promote(&mut self, slot: usize) {
        if self.head == Some(slot) {
            return;
        }
        self.unlink(slot);
        self.push_front(slot);
    }

    fn push_front(&mut self, slot: usize) {
        self.nodes[slot].prev = None;
        self.nodes[slot].next = self.head;
        match self.head {
            Some(old_head) => self.nodes[old_head].prev = Some(slot),
            None => self.tail = Some(slot),
        }
        self.head = Some(slot);
    }

    fn unlink(&mut self, slot: usize) {
        let (prev, next) = (self.nodes[slot].prev, self.nodes[slot].next);
        match prev {
            Some(p) => self.nodes[p].next = next,
            None => self.head = next,
        }
        match next {
            Some(n) => self.nodes[n].prev = prev,
            None => self.tail = prev,
        }
        self.nodes[slot].prev = None;
        self.nodes[slot].next = None;
    }

    fn remove_slot(&mut self, slot: usize) {
        self.unlink(slot);
        let removed = self.nodes.swap_remove(slot);
        self.index.remove(&removed.key);

        // The former last node now sits at `slot`; repoint everything that
        // referenced its old position.
        let moved_from = self.nodes.len();
        if slot == moved_from {
            return;
        }
        let (prev, next) = (self.nodes[slot].prev, self.nodes[slot].next);
        match prev {
            Some(p) => self.nodes[p].next = Some(slot),
            None => self.head = Some(slot),
        }
        match next {
            Some(n) => self.nodes[n].prev = Some(slot),
            None => self.tail = Some(slot),
        }
        if let Some(entry) = self.index.get_mut(&self.nodes[slot].key) {
            *entry = slot;
        }
    }
}

impl<K, V> fmt::Debug for RecencyCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecencyCache")
            .field("stats", &self.stats())
            .finish()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::VecDeque;
    use std::sync::Arc;
    use std::thread;

    fn cache<V: Clone>(capacity: usize) -> RecencyCache<String, V> {
        RecencyCache::new(NonZeroUsize::new(capacity).unwrap())
    }

    fn keys(cache: &RecencyCache<String, i32>) -> Vec<String> {
        cache.keys_by_recency()
    }

    #[test]
    fn set_new_key_into_partial_cache() {
        let lru = cache(3);
        lru.set("k1".to_string(), 8);
        lru.set("k2".to_string(), 3);

        assert_eq!(keys(&lru), vec!["k2", "k1"]);
        assert_eq!(lru.len(), 2);
    }

    #[test]
    fn overwrite_promotes_without_growing() {
        let lru = cache(3);
        lru.set("k1".to_string(), 8);
        lru.set("k2".to_string(), 23);
        lru.set("k3".to_string(), 0);

        assert!(lru.set("k1".to_string(), 10));

        assert_eq!(keys(&lru), vec!["k1", "k3", "k2"]);
        assert_eq!(lru.get("k1"), Some(10));
        assert_eq!(lru.len(), 3);
        assert_eq!(lru.stats().evictions, 0);
    }

    #[test]
    fn inserting_past_capacity_evicts_least_recent() {
        let lru = cache(3);
        for (i, key) in ["k1", "k2", "k3", "k4"].iter().enumerate() {
            lru.set((*key).to_string(), i32::try_from(i).unwrap());
        }

        assert_eq!(keys(&lru), vec!["k4", "k3", "k2"]);
        assert_eq!(lru.get("k1"), None);
        assert_eq!(lru.stats().evictions, 1);
    }

    #[test]
    fn get_promotes_entry() {
        let lru = cache(3);
        lru.set("a".to_string(), 1);
        lru.set("b".to_string(), 2);
        lru.set("c".to_string(), 3);

        assert_eq!(lru.get("a"), Some(1));
        lru.set("d".to_string(), 4);

        assert!(!lru.contains("b"));
        assert_eq!(keys(&lru), vec!["d", "a", "c"]);
    }

    #[test]
    fn miss_leaves_order_untouched() {
        let lru = cache(3);
        lru.set("k1".to_string(), 8);
        lru.set("k2".to_string(), 3);
        lru.set("k3".to_string(), 0);

        assert_eq!(lru.get("missing"), None);

        assert_eq!(keys(&lru), vec!["k3", "k2", "k1"]);
        let stats = lru.stats();
        assert_eq!((stats.hits, stats.misses), (0, 1));
    }

    #[test]
    fn remove_present_key() {
        let lru = cache(3);
        lru.set("k1".to_string(), 8);
        lru.set("k2".to_string(), 3);
        lru.set("k3".to_string(), 0);

        assert!(lru.remove("k2"));

        assert_eq!(lru.get("k2"), None);
        assert_eq!(keys(&lru), vec!["k3", "k1"]);
    }

    #[test]
    fn remove_absent_key_is_noop() {
        let lru = cache(3);
        lru.set("k1".to_string(), 8);
        lru.set("k2".to_string(), 3);

        assert!(!lru.remove("nope"));
        assert!(lru.remove("k1"));
        assert!(!lru.remove("k1"));

        assert_eq!(keys(&lru), vec!["k2"]);
    }

    #[test]
    fn remove_head_tail_and_middle_keeps_links_consistent() {
        let lru = cache(5);
        for (i, key) in ["a", "b", "c", "d", "e"].iter().enumerate() {
            lru.set((*key).to_string(), i32::try_from(i).unwrap());
        }

        assert!(lru.remove("e")); // head
        assert!(lru.remove("a")); // tail
        assert!(lru.remove("c")); // middle
        assert_eq!(keys(&lru), vec!["d", "b"]);

        lru.set("f".to_string(), 5);
        assert_eq!(lru.get("b"), Some(1));
        assert_eq!(keys(&lru), vec!["b", "f", "d"]);
    }

    #[test]
    fn capacity_one_always_holds_latest() {
        let lru = cache(1);
        lru.set("a".to_string(), 1);
        lru.set("b".to_string(), 2);

        assert_eq!(keys(&lru), vec!["b"]);
        assert_eq!(lru.get("a"), None);
        assert_eq!(lru.get("b"), Some(2));
    }

    #[test]
    fn concurrent_sets_with_distinct_keys() {
        let lru = Arc::new(cache::<usize>(64));
        let handles: Vec<_> = (0..64)
            .map(|i| {
                let lru = Arc::clone(&lru);
                thread::spawn(move || {
                    lru.set(format!("key-{i}"), i);
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(lru.len(), 64);
        for i in 0..64 {
            assert_eq!(lru.get(format!("key-{i}").as_str()), Some(i));
        }
    }

    #[test]
    fn concurrent_mixed_operations_respect_capacity() {
        let lru = Arc::new(cache::<usize>(8));
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let lru = Arc::clone(&lru);
                thread::spawn(move || {
                    for i in 0..500 {
                        let key = format!("key-{}", (t * 7 + i) % 20);
                        match i % 3 {
                            0 => {
                                lru.set(key, i);
                            }
                            1 => {
                                let _ = lru.get(key.as_str());
                            }
                            _ => {
                                lru.remove(key.as_str());
                            }
                        }
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert!(lru.len() <= 8);
        assert_eq!(lru.keys_by_recency().len(), lru.len());
    }

    #[derive(Clone, Debug)]
    enum Op {
        Set(u8, i32),
        Get(u8),
        Remove(u8),
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            (0u8..12, any::<i32>()).prop_map(|(k, v)| Op::Set(k, v)),
            (0u8..12).prop_map(Op::Get),
            (0u8..12).prop_map(Op::Remove),
        ]
    }

    proptest! {
        /// The cache agrees with a naive recency list after any operation sequence.
        #[test]
        fn matches_reference_model(capacity in 1usize..6, ops in prop::collection::vec(op(), 0..200)) {
            let lru: RecencyCache<u8, i32> = RecencyCache::new(NonZeroUsize::new(capacity).unwrap());
            let mut model: VecDeque<(u8, i32)> = VecDeque::new();

            for op in ops {
                match op {
                    Op::Set(k, v) => {
                        lru.set(k, v);
                        if let Some(pos) = model.iter().position(|(mk, _)| *mk == k) {
                            model.remove(pos);
                        } else if model.len() == capacity {
                            model.pop_back();
                        }
                        model.push_front((k, v));
                    }
                    Op::Get(k) => {
                        let expected = model.iter().position(|(mk, _)| *mk == k).map(|pos| {
                            let entry = model.remove(pos).unwrap();
                            model.push_front(entry);
                            entry.1
                        });
                        prop_assert_eq!(lru.get(&k), expected);
                    }
                    Op::Remove(k) => {
                        let pos = model.iter().position(|(mk, _)| *mk == k);
                        if let Some(pos) = pos {
                            model.remove(pos);
                        }
                        prop_assert_eq!(lru.remove(&k), pos.is_some());
                    }
                }

                let expected: Vec<u8> = model.iter().map(|(k, _)| *k).collect();
                prop_assert_eq!(lru.keys_by_recency(), expected);
                prop_assert!(lru.len() <= capacity);
            }
        }

        /// Inserting C+1 distinct keys leaves exactly the C most recent.
        #[test]
        fn evicts_exactly_one_when_overfilled(capacity in 1usize..32) {
            let lru: RecencyCache<usize, usize> = RecencyCache::new(NonZeroUsize::new(capacity).unwrap());
            for k in 0..=capacity {
                lru.set(k, k);
            }

            let expected: Vec<usize> = (1..=capacity).rev().collect();
            prop_assert_eq!(lru.keys_by_recency(), expected);
            prop_assert!(!lru.contains(&0));
            prop_assert_eq!(lru.stats().evictions, 1);
        }
    }
}

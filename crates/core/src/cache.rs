//! Bounded TTL cache with insertion-order eviction.

use std::collections::VecDeque;
use std::hash::Hash;
use std::time::{Duration, Instant};

use rustc_hash::FxHashMap;

/// Map of values that expire `ttl` after insertion. When full, the oldest
/// inserted key is evicted. Re-inserting a key counts as a fresh insertion.
pub struct TtlCache<K, V> {
    map: FxHashMap<K, (Instant, V)>,
    order: VecDeque<K>,
    cap: usize,
    ttl: Duration,
    evicted: u64,
}

impl<K: Eq + Hash + Clone, V: Clone> TtlCache<K, V> {
    pub fn new(cap: usize, ttl: Duration) -> Self {
        Self { map: FxHashMap::default(), order: VecDeque::new(), cap: cap.max(1), ttl, evicted: 0 }
    }

    pub fn len(&self) -> usize { self.map.len() }
    pub fn is_empty(&self) -> bool { self.map.is_empty() }
    pub fn evicted(&self) -> u64 { self.evicted }
    pub fn ttl(&self) -> Duration { self.ttl }

    pub fn clear(&mut self) {
        self.map.clear();
        self.order.clear();
    }

    pub fn insert(&mut self, key: K, value: V) { self.insert_at(key, value, Instant::now()) }

    pub fn insert_at(&mut self, key: K, value: V, now: Instant) {
        if self.map.contains_key(&key) {
            self.order.retain(|k| k != &key);
        } else if self.order.len() >= self.cap {
            if let Some(old) = self.order.pop_front() {
                self.map.remove(&old);
                self.evicted += 1;
            }
        }
        self.order.push_back(key.clone());
        self.map.insert(key, (now, value));
    }

    pub fn get(&mut self, key: &K) -> Option<V> { self.get_at(key, Instant::now()) }

    /// Lookup as of `now`. An entry is still valid at exactly `ttl` of age.
    pub fn get_at(&mut self, key: &K, now: Instant) -> Option<V> {
        let expired = match self.map.get(key) {
            None => return None,
            Some((at, _)) => now.saturating_duration_since(*at) > self.ttl,
        };
        if expired {
            self.map.remove(key);
            self.order.retain(|k| k != key);
            return None;
        }
        self.map.get(key).map(|(_, v)| v.clone())
    }
}

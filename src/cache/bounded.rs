//! Strong/weak retention store.
//!
//! Semantics:
//! - At most `max_strong` entries are owned by the store, kept in most-recently-touched order.
//! - Inserting beyond the limit demotes the least-recently-touched owned entries to `Weak`
//!   references; they stay reachable for as long as some caller still holds the object.
//! - `get` on a live weak entry promotes it back to strong (it counts as a touch).
//! - Weak entries whose object has been dropped are removed lazily when touched, in bulk when the
//!   weak table grows past its purge mark, and on explicit [`CacheStore::sweep`].

use super::{CacheStore, Retention, StoreStats};
use lru::LruCache;
use std::collections::HashMap;
use std::hash::Hash;
use std::num::NonZeroUsize;
use std::sync::{Arc, Weak};

const MIN_PURGE_MARK: usize = 32;

/// Store that owns only its `max_strong` most recently touched entries.
pub struct BoundedStore<K: Hash + Eq, V> {
    max_strong: NonZeroUsize,
    strong: LruCache<K, Arc<V>>,
    weak: HashMap<K, Weak<V>>,
    purge_mark: usize,
}

impl<K: Hash + Eq, V> std::fmt::Debug for BoundedStore<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoundedStore")
            .field("max_strong", &self.max_strong)
            .field("strong", &self.strong.len())
            .field("weak", &self.weak.len())
            .finish()
    }
}

impl<K: Hash + Eq + Clone, V> BoundedStore<K, V> {
    pub fn new(max_strong: NonZeroUsize) -> Self {
        Self {
            max_strong,
            strong: LruCache::unbounded(),
            weak: HashMap::new(),
            purge_mark: MIN_PURGE_MARK,
        }
    }

    pub fn max_strong(&self) -> NonZeroUsize {
        self.max_strong
    }

    /// Entries currently owned by the store.
    pub fn strong_len(&self) -> usize {
        self.strong.len()
    }

    /// Weak entries, including reclaimed ones not purged yet.
    pub fn weak_len(&self) -> usize {
        self.weak.len()
    }

    fn demote_overflow(&mut self) {
        while self.strong.len() > self.max_strong.get() {
            let Some((key, value)) = self.strong.pop_lru() else { break };
            self.weak.insert(key, Arc::downgrade(&value));
        }
        if self.weak.len() >= self.purge_mark {
            self.purge_reclaimed();
            self.purge_mark = (self.weak.len() * 2).max(MIN_PURGE_MARK);
        }
    }

    fn purge_reclaimed(&mut self) -> usize {
        let before = self.weak.len();
        self.weak.retain(|_, value| value.strong_count() > 0);
        before - self.weak.len()
    }
}

impl<K, V> CacheStore<K, V> for BoundedStore<K, V>
where
    K: Hash + Eq + Clone + Send,
    V: Send + Sync,
{
    fn get(&mut self, key: &K) -> Option<Arc<V>> {
        if let Some(value) = self.strong.get(key) {
            return Some(Arc::clone(value));
        }
        let value = self.weak.remove(key)?.upgrade()?;
        self.strong.push(key.clone(), Arc::clone(&value));
        self.demote_overflow();
        Some(value)
    }

    fn peek(&mut self, key: &K) -> Option<Arc<V>> {
        if let Some(value) = self.strong.peek(key) {
            return Some(Arc::clone(value));
        }
        match self.weak.get(key).map(Weak::upgrade) {
            Some(Some(value)) => Some(value),
            Some(None) => {
                self.weak.remove(key);
                None
            }
            None => None,
        }
    }

    fn put(&mut self, key: K, value: Arc<V>) {
        self.weak.remove(&key);
        self.strong.push(key, value);
        self.demote_overflow();
    }

    fn remove(&mut self, key: &K) -> Option<Arc<V>> {
        let weak = self.weak.remove(key).and_then(|value| value.upgrade());
        self.strong.pop(key).or(weak)
    }

    fn clear(&mut self) {
        self.strong.clear();
        self.weak.clear();
        self.purge_mark = MIN_PURGE_MARK;
    }

    fn len(&self) -> usize {
        let stats = self.stats();
        stats.strong + stats.weak
    }

    fn retention(&self, key: &K) -> Option<Retention> {
        if self.strong.contains(key) {
            return Some(Retention::Strong);
        }
        self.weak.get(key).filter(|value| value.strong_count() > 0).map(|_| Retention::Weak)
    }

    fn sweep(&mut self) -> usize {
        self.purge_reclaimed()
    }

    fn stats(&self) -> StoreStats {
        StoreStats {
            strong: self.strong.len(),
            weak: self.weak.values().filter(|value| value.strong_count() > 0).count(),
        }
    }
}

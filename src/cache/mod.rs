//! Keyed caches with per-key write locks.
//!
//! Protocol used by every resolver:
//! 1. [`KeyedCache::get`] is the fast path. It never waits on a per-key lock.
//! 2. On a miss, [`KeyedCache::lock`] awaits the write lock for *that key only*; callers of other
//!    keys are never blocked.
//! 3. Holding the [`KeySlot`], re-check with [`KeySlot::peek`] (another caller may have finished
//!    while we waited) and only then compute and [`KeySlot::put`] the value.
//!
//! Storage is pluggable through [`CacheStore`]: [`StrongStore`] keeps everything,
//! [`BoundedStore`] keeps at most N entries strongly and demotes the rest to weak references.

mod bounded;
mod key;

pub use bounded::BoundedStore;
pub use key::CacheKey;

use crate::lock_unpoisoned;
use std::collections::HashMap;
use std::hash::Hash;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// How a cached value is currently retained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Retention {
    /// Owned by the cache.
    Strong,
    /// Reachable only while some caller still holds the value.
    Weak,
}

/// Entry counts by retention mode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreStats {
    /// Entries owned by the store.
    pub strong: usize,
    /// Live entries held through weak references.
    pub weak: usize,
}

/// Storage backend of a [`KeyedCache`]. Always accessed under the cache's own mutex.
pub trait CacheStore<K, V>: Send {
    /// Look up and touch `key`.
    fn get(&mut self, key: &K) -> Option<Arc<V>>;
    /// Look up `key` without touching it.
    fn peek(&mut self, key: &K) -> Option<Arc<V>>;
    /// Insert or replace; the entry becomes the most recently touched.
    fn put(&mut self, key: K, value: Arc<V>);
    /// Remove `key`, returning the value if it was still alive.
    fn remove(&mut self, key: &K) -> Option<Arc<V>>;
    /// Drop every entry.
    fn clear(&mut self);
    /// Number of live entries.
    fn len(&self) -> usize;
    /// Retention mode of `key`, if present and alive.
    fn retention(&self, key: &K) -> Option<Retention>;
    /// Drop entries whose value has been reclaimed; returns how many were dropped.
    fn sweep(&mut self) -> usize {
        0
    }
    /// Entry counts by retention mode.
    fn stats(&self) -> StoreStats {
        StoreStats { strong: self.len(), weak: 0 }
    }
}

/// Store that retains every entry strongly.
#[derive(Debug)]
pub struct StrongStore<K, V> {
    entries: HashMap<K, Arc<V>>,
}

impl<K, V> Default for StrongStore<K, V> {
    fn default() -> Self {
        Self { entries: HashMap::new() }
    }
}

impl<K, V> CacheStore<K, V> for StrongStore<K, V>
where
    K: Hash + Eq + Send,
    V: Send + Sync,
{
    fn get(&mut self, key: &K) -> Option<Arc<V>> {
        self.entries.get(key).cloned()
    }

    fn peek(&mut self, key: &K) -> Option<Arc<V>> {
        self.entries.get(key).cloned()
    }

    fn put(&mut self, key: K, value: Arc<V>) {
        self.entries.insert(key, value);
    }

    fn remove(&mut self, key: &K) -> Option<Arc<V>> {
        self.entries.remove(key)
    }

    fn clear(&mut self) {
        self.entries.clear();
    }

    fn len(&self) -> usize {
        self.entries.len()
    }

    fn retention(&self, key: &K) -> Option<Retention> {
        self.entries.get(key).map(|_| Retention::Strong)
    }
}

/// Mapping from key to shared value with single-writer-per-key locking.
pub struct KeyedCache<K, V> {
    store: Mutex<Box<dyn CacheStore<K, V>>>,
    locks: Mutex<HashMap<K, Arc<AsyncMutex<()>>>>,
}

impl<K, V> std::fmt::Debug for KeyedCache<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let stats = lock_unpoisoned(&self.store).stats();
        f.debug_struct("KeyedCache")
            .field("strong", &stats.strong)
            .field("weak", &stats.weak)
            .field("locked_keys", &lock_unpoisoned(&self.locks).len())
            .finish()
    }
}

impl<K, V> KeyedCache<K, V>
where
    K: Hash + Eq + Clone + Send + 'static,
    V: Send + Sync + 'static,
{
    /// Cache retaining every entry.
    pub fn unbounded() -> Self {
        Self::with_store(StrongStore::default())
    }

    /// Cache retaining at most `max_strong` entries strongly.
    pub fn bounded(max_strong: NonZeroUsize) -> Self {
        Self::with_store(BoundedStore::new(max_strong))
    }

    /// Bounded when `max_strong` is set, unbounded otherwise.
    pub fn with_capacity(max_strong: Option<NonZeroUsize>) -> Self {
        match max_strong {
            Some(max) => Self::bounded(max),
            None => Self::unbounded(),
        }
    }

    /// Cache over a custom store.
    pub fn with_store(store: impl CacheStore<K, V> + 'static) -> Self {
        Self { store: Mutex::new(Box::new(store)), locks: Mutex::new(HashMap::new()) }
    }

    /// Non-waiting lookup. Touches the entry.
    pub fn get(&self, key: &K) -> Option<Arc<V>> {
        lock_unpoisoned(&self.store).get(key)
    }

    /// Await the write lock for `key`. Other keys are unaffected.
    pub async fn lock(&self, key: &K) -> KeySlot<'_, K, V> {
        let mutex = {
            let mut locks = lock_unpoisoned(&self.locks);
            Arc::clone(locks.entry(key.clone()).or_default())
        };
        let guard = mutex.lock_owned().await;
        KeySlot { cache: self, key: key.clone(), guard: Some(guard) }
    }

    /// Remove `key` regardless of locks.
    pub fn remove(&self, key: &K) -> Option<Arc<V>> {
        lock_unpoisoned(&self.store).remove(key)
    }

    /// Drop every entry. Slots currently held stay valid; their later `put` repopulates.
    pub fn clear(&self) {
        lock_unpoisoned(&self.store).clear();
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        lock_unpoisoned(&self.store).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop reclaimed weak entries.
    pub fn sweep(&self) -> usize {
        lock_unpoisoned(&self.store).sweep()
    }

    /// Retention mode of `key`.
    pub fn retention(&self, key: &K) -> Option<Retention> {
        lock_unpoisoned(&self.store).retention(key)
    }

    pub fn stats(&self) -> StoreStats {
        lock_unpoisoned(&self.store).stats()
    }

    /// Keys whose write lock is currently held or awaited.
    pub fn locked_keys(&self) -> usize {
        lock_unpoisoned(&self.locks).len()
    }
}

/// Exclusive access to one key of a [`KeyedCache`]; the lock is released on drop.
pub struct KeySlot<'a, K, V>
where
    K: Hash + Eq,
{
    cache: &'a KeyedCache<K, V>,
    key: K,
    guard: Option<OwnedMutexGuard<()>>,
}

impl<K, V> KeySlot<'_, K, V>
where
    K: Hash + Eq,
{
    pub fn key(&self) -> &K {
        &self.key
    }

    /// Look up the locked key without touching it.
    pub fn peek(&self) -> Option<Arc<V>> {
        lock_unpoisoned(&self.cache.store).peek(&self.key)
    }

    /// Store the value for the locked key.
    pub fn put(&self, value: Arc<V>)
    where
        K: Clone,
    {
        lock_unpoisoned(&self.cache.store).put(self.key.clone(), value);
    }
}

impl<K, V> Drop for KeySlot<'_, K, V>
where
    K: Hash + Eq,
{
    fn drop(&mut self) {
        let Some(guard) = self.guard.take() else { return };
        let mut locks = lock_unpoisoned(&self.cache.locks);
        // The table and this guard hold one reference each; anything above means waiters.
        let mutex = OwnedMutexGuard::mutex(&guard);
        if Arc::strong_count(mutex) <= 2
            && locks.get(&self.key).is_some_and(|current| Arc::ptr_eq(current, mutex))
        {
            locks.remove(&self.key);
        }
        drop(guard);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn get_misses_then_hits_after_put() {
        let cache: KeyedCache<String, u32> = KeyedCache::unbounded();
        assert!(cache.get(&"a".into()).is_none());
        {
            let slot = cache.lock(&"a".into()).await;
            assert!(slot.peek().is_none());
            slot.put(Arc::new(7));
        }
        assert_eq!(cache.get(&"a".into()).as_deref(), Some(&7));
        assert_eq!(cache.locked_keys(), 0);
    }

    #[tokio::test]
    async fn lock_serializes_same_key() {
        let cache: Arc<KeyedCache<&'static str, u32>> = Arc::new(KeyedCache::unbounded());
        let computed = Arc::new(AtomicUsize::new(0));
        let mut handles = vec![];
        for _ in 0..8 {
            let cache = cache.clone();
            let computed = computed.clone();
            handles.push(tokio::spawn(async move {
                if let Some(hit) = cache.get(&"k") {
                    return hit;
                }
                let slot = cache.lock(&"k").await;
                if let Some(hit) = slot.peek() {
                    return hit;
                }
                computed.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(20)).await;
                let value = Arc::new(42);
                slot.put(Arc::clone(&value));
                value
            }));
        }
        let results = futures::future::join_all(handles).await;
        assert_eq!(computed.load(Ordering::SeqCst), 1);
        let first = results[0].as_ref().unwrap();
        assert!(results.iter().all(|r| Arc::ptr_eq(r.as_ref().unwrap(), first)));
        assert_eq!(cache.locked_keys(), 0);
    }

    #[tokio::test]
    async fn different_keys_do_not_block_each_other() {
        let cache: KeyedCache<&'static str, u32> = KeyedCache::unbounded();
        let _a = cache.lock(&"a").await;
        let b = tokio::time::timeout(Duration::from_millis(100), cache.lock(&"b")).await;
        assert!(b.is_ok(), "lock on another key must not wait");
    }

    #[tokio::test]
    async fn bounded_cache_reports_retention() {
        let cache: KeyedCache<&'static str, u32> = KeyedCache::bounded(NonZeroUsize::new(1).unwrap());
        let held = Arc::new(1);
        cache.lock(&"a").await.put(Arc::clone(&held));
        cache.lock(&"b").await.put(Arc::new(2));
        assert_eq!(cache.retention(&"a"), Some(Retention::Weak));
        assert_eq!(cache.retention(&"b"), Some(Retention::Strong));
        assert_eq!(cache.stats(), StoreStats { strong: 1, weak: 1 });
        drop(held);
        assert_eq!(cache.sweep(), 1);
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn clear_empties_the_store() {
        let cache: KeyedCache<&'static str, u32> = KeyedCache::unbounded();
        cache.lock(&"a").await.put(Arc::new(1));
        cache.clear();
        assert!(cache.is_empty());
        assert!(cache.remove(&"a").is_none());
    }
}

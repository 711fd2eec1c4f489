//! Sharded two-tier LRU store.
//!
//! The keyspace is partitioned across independently locked shards, each
//! owning a small probationary tier (L1) and a larger protected tier
//! (L2). New entries are admitted into L1 only; an entry is promoted to
//! L2 the first time it is read back while still in L1. One-time scans
//! therefore never displace the protected working set.
//!
//! Reads are writes here: a `get` updates recency order and may promote,
//! so every shard operation takes that shard's exclusive lock.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use ahash::RandomState;
use parking_lot::{Condvar, Mutex};
use tracing::debug;

use crate::clock;
use crate::lru::LruList;

/// Invoked with the key and value of every live entry reclaimed through
/// capacity pressure, explicit deletion, or the expiry sweep.
///
/// Runs while the owning shard is locked, so it must not call back into
/// the store.
pub type EvictionCallback<V> = Arc<dyn Fn(&str, &V) + Send + Sync>;

/// Expiry timestamp for entries that never expire.
///
/// Zero is reserved for tombstones, so "unbounded" must be a positive
/// sentinel that no clock reading ever reaches.
pub(crate) const NEVER_EXPIRES: i64 = i64::MAX;

/// Construction parameters for [`TieredStore`].
///
/// Zero values fall back to the defaults, mirroring [`Default`].
pub struct StoreOptions<V> {
    /// Number of shards; rounded up to the next power of two.
    pub shards: u16,
    /// Probationary (L1) capacity per shard, in entries.
    pub l1_capacity: u16,
    /// Protected (L2) capacity per shard, in entries.
    pub l2_capacity: u16,
    /// Interval between background expiry sweeps.
    pub sweep_interval: Duration,
    /// Callback fired when a live entry is reclaimed.
    pub on_evicted: Option<EvictionCallback<V>>,
}

impl<V> Default for StoreOptions<V> {
    fn default() -> Self {
        Self {
            shards: 16,
            l1_capacity: 1024,
            l2_capacity: 1024,
            sweep_interval: Duration::from_secs(60),
            on_evicted: None,
        }
    }
}

/// Both tiers of one shard, guarded together by the shard lock.
struct Tiers<V> {
    l1: LruList<V>,
    l2: LruList<V>,
}

struct Shard<V> {
    tiers: Mutex<Tiers<V>>,
}

struct Inner<V> {
    shards: Vec<Shard<V>>,
    mask: u64,
    hasher: RandomState,
    on_evicted: Option<EvictionCallback<V>>,
    /// True once `close` ran; the sweeper exits when it observes this.
    stop: Mutex<bool>,
    stop_cv: Condvar,
}

/// Sharded two-tier LRU key/value store with expiration.
///
/// Capacity is fixed at construction and counted in entries per tier per
/// shard. A background thread sweeps expired entries on a fixed interval;
/// [`close`](TieredStore::close) (or drop) stops it.
pub struct TieredStore<V> {
    inner: Arc<Inner<V>>,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl<V: Clone + Send + 'static> TieredStore<V> {
    /// Create a store from `opts`, spawning the sweep thread.
    pub fn new(opts: StoreOptions<V>) -> Self {
        let defaults = StoreOptions::<V>::default();
        let shards = if opts.shards == 0 { defaults.shards } else { opts.shards };
        let l1_capacity = if opts.l1_capacity == 0 {
            defaults.l1_capacity
        } else {
            opts.l1_capacity
        };
        let l2_capacity = if opts.l2_capacity == 0 {
            defaults.l2_capacity
        } else {
            opts.l2_capacity
        };
        let sweep_interval = if opts.sweep_interval.is_zero() {
            defaults.sweep_interval
        } else {
            opts.sweep_interval
        };

        let shard_count = (shards as usize).next_power_of_two();
        let shards: Vec<Shard<V>> = (0..shard_count)
            .map(|_| Shard {
                tiers: Mutex::new(Tiers {
                    l1: LruList::new(l1_capacity),
                    l2: LruList::new(l2_capacity),
                }),
            })
            .collect();

        let inner = Arc::new(Inner {
            shards,
            mask: shard_count as u64 - 1,
            hasher: RandomState::new(),
            on_evicted: opts.on_evicted,
            stop: Mutex::new(false),
            stop_cv: Condvar::new(),
        });

        debug!(
            shards = shard_count,
            l1 = l1_capacity,
            l2 = l2_capacity,
            "tiered store created"
        );

        let sweeper = spawn_sweeper(Arc::clone(&inner), sweep_interval);

        Self {
            inner,
            sweeper: Mutex::new(sweeper),
        }
    }

    /// Look up `key`, refreshing recency and promoting an L1 hit to L2.
    ///
    /// Expired entries are removed on the spot and reported as a miss.
    pub fn get(&self, key: &str) -> Option<V> {
        let shard = &self.inner.shards[self.inner.shard_index(key)];
        let mut tiers = shard.tiers.lock();
        let now = clock::now();

        // L1 hit: the del both fetches the entry and tombstones it, so a
        // live hit moves straight into the protected tier.
        if let Some((value, expire_at)) = tiers.l1.del(key) {
            if now >= expire_at {
                // Expired while probationary: reclaim both slots now
                // instead of waiting for tombstone reuse.
                tiers.l1.remove(key);
                if let Some(node) = tiers.l2.remove(key) {
                    if node.expire_at > 0 {
                        if let Some(cb) = self.inner.on_evicted.as_deref() {
                            cb(key, &node.value);
                        }
                    }
                }
                return None;
            }

            tiers
                .l2
                .put(key, value.clone(), expire_at, self.inner.on_evicted.as_deref());
            return Some(value);
        }

        let hit = tiers.l2.get(key).map(|(v, e)| (v.clone(), e));
        match hit {
            Some((value, expire_at)) if expire_at > 0 && now < expire_at => Some(value),
            Some((_, expire_at)) if expire_at > 0 => {
                // Live in L2 but past its deadline.
                self.inner.delete_locked(key, &mut tiers);
                None
            }
            // Absent, or a tombstone whose slot has not been reused yet.
            _ => None,
        }
    }

    /// Insert `key` with no expiry. The entry lands in L1 only; it earns
    /// its L2 slot by being read back.
    pub fn set(&self, key: &str, value: V) {
        self.set_with_ttl(key, value, None);
    }

    /// Insert `key`, expiring `ttl` from now. `None` or a zero duration
    /// means the entry never expires.
    pub fn set_with_ttl(&self, key: &str, value: V, ttl: Option<Duration>) {
        let expire_at = match ttl {
            Some(ttl) if !ttl.is_zero() => {
                let nanos = i64::try_from(ttl.as_nanos()).unwrap_or(i64::MAX);
                clock::now().saturating_add(nanos)
            }
            _ => NEVER_EXPIRES,
        };

        let shard = &self.inner.shards[self.inner.shard_index(key)];
        let mut tiers = shard.tiers.lock();
        tiers
            .l1
            .put(key, value, expire_at, self.inner.on_evicted.as_deref());
    }

    /// Tombstone `key` in both tiers. Returns true if it was live in
    /// either; the eviction callback fires once, preferring the L1 copy.
    pub fn delete(&self, key: &str) -> bool {
        let shard = &self.inner.shards[self.inner.shard_index(key)];
        let mut tiers = shard.tiers.lock();
        self.inner.delete_locked(key, &mut tiers)
    }

    /// Delete every live entry.
    ///
    /// Keys are collected shard by shard, then deleted one at a time with
    /// the shard lock re-acquired per key; there is no global freeze.
    pub fn clear(&self) {
        let mut keys = Vec::new();

        for shard in &self.inner.shards {
            let tiers = shard.tiers.lock();
            let start = keys.len();

            tiers.l1.walk(|key, _, _| {
                keys.push(key.to_string());
                true
            });
            tiers.l2.walk(|key, _, _| {
                if !keys[start..].iter().any(|k| k == key) {
                    keys.push(key.to_string());
                }
                true
            });
        }

        for key in keys {
            self.delete(&key);
        }
    }

    /// Count live entries across both tiers of every shard.
    ///
    /// O(total capacity); a key re-set after promotion counts in each
    /// tier holding a live copy.
    pub fn len(&self) -> usize {
        let mut count = 0;

        for shard in &self.inner.shards {
            let tiers = shard.tiers.lock();
            tiers.l1.walk(|_, _, _| {
                count += 1;
                true
            });
            tiers.l2.walk(|_, _, _| {
                count += 1;
                true
            });
        }

        count
    }

    /// True if no live entry exists in any shard.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<V> TieredStore<V> {
    /// Stop the sweep thread. Idempotent; entries remain readable, they
    /// just stop being swept.
    pub fn close(&self) {
        {
            let mut stopped = self.inner.stop.lock();
            if *stopped {
                return;
            }
            *stopped = true;
        }
        self.inner.stop_cv.notify_all();

        if let Some(handle) = self.sweeper.lock().take() {
            let _ = handle.join();
        }
    }
}

impl<V> Drop for TieredStore<V> {
    fn drop(&mut self) {
        self.close();
    }
}

impl<V: Clone> Inner<V> {
    fn shard_index(&self, key: &str) -> usize {
        (self.hasher.hash_one(key) & self.mask) as usize
    }

    /// Tombstone `key` in both tiers of an already locked shard, firing
    /// the eviction callback for at most one live copy.
    fn delete_locked(&self, key: &str, tiers: &mut Tiers<V>) -> bool {
        let l1 = tiers.l1.del(key);
        let l2 = tiers.l2.del(key);
        let deleted = l1.is_some() || l2.is_some();

        if deleted {
            if let Some(cb) = self.on_evicted.as_deref() {
                if let Some((value, _)) = l1.as_ref().or(l2.as_ref()) {
                    cb(key, value);
                }
            }
        }

        deleted
    }

    /// One pass over all shards, deleting entries whose deadline passed.
    /// Locks are taken and released per shard, never across shards.
    fn sweep_expired(&self) {
        let now = clock::now();

        for shard in &self.shards {
            let mut tiers = shard.tiers.lock();
            let mut expired = Vec::new();

            tiers.l1.walk(|key, _, expire_at| {
                if now >= expire_at {
                    expired.push(key.to_string());
                }
                true
            });
            tiers.l2.walk(|key, _, expire_at| {
                if now >= expire_at && !expired.iter().any(|k| k == key) {
                    expired.push(key.to_string());
                }
                true
            });

            if !expired.is_empty() {
                debug!(count = expired.len(), "sweeping expired entries");
            }
            for key in &expired {
                self.delete_locked(key, &mut tiers);
            }
        }
    }
}

fn spawn_sweeper<V: Clone + Send + 'static>(
    inner: Arc<Inner<V>>,
    interval: Duration,
) -> Option<JoinHandle<()>> {
    thread::Builder::new()
        .name("herdcache-sweep".into())
        .spawn(move || loop {
            {
                let mut stopped = inner.stop.lock();
                if *stopped {
                    return;
                }
                let _ = inner.stop_cv.wait_for(&mut stopped, interval);
                if *stopped {
                    return;
                }
            }
            inner.sweep_expired();
        })
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex as StdMutex;

    fn recording_store(
        opts: StoreOptions<i32>,
    ) -> (TieredStore<i32>, Arc<StdMutex<Vec<String>>>) {
        let evicted = Arc::new(StdMutex::new(Vec::new()));
        let sink = Arc::clone(&evicted);
        let store = TieredStore::new(StoreOptions {
            on_evicted: Some(Arc::new(move |key: &str, _: &i32| {
                sink.lock().unwrap().push(key.to_string());
            })),
            ..opts
        });
        (store, evicted)
    }

    fn no_sweep() -> StoreOptions<i32> {
        StoreOptions {
            shards: 2,
            l1_capacity: 8,
            l2_capacity: 8,
            sweep_interval: Duration::from_secs(3600),
            on_evicted: None,
        }
    }

    #[test]
    fn test_set_get_round_trip() {
        let store = TieredStore::new(no_sweep());

        store.set("a", 1);
        assert_eq!(store.get("a"), Some(1));
        assert_eq!(store.get("missing"), None);

        store.close();
    }

    #[test]
    fn test_single_access_promotion() {
        // L1 of one slot: after set(a) + get(a), a lives in L2, so
        // churning L1 with other keys never touches it.
        let (store, evicted) = recording_store(StoreOptions {
            shards: 1,
            l1_capacity: 1,
            l2_capacity: 8,
            sweep_interval: Duration::from_secs(3600),
            on_evicted: None,
        });

        store.set("a", 1);
        assert_eq!(store.get("a"), Some(1));

        store.set("b", 2);
        store.set("c", 3); // evicts b from L1, a is untouched in L2

        assert_eq!(store.get("a"), Some(1));
        assert_eq!(*evicted.lock().unwrap(), vec!["b".to_string()]);

        store.close();
    }

    #[test]
    fn test_two_tier_scenario() {
        // L1 = L2 = 1: set(a); get(a) promotes; set(b) takes L1;
        // get(a) hits L2; get(b) promotes and evicts a with a callback.
        let (store, evicted) = recording_store(StoreOptions {
            shards: 1,
            l1_capacity: 1,
            l2_capacity: 1,
            sweep_interval: Duration::from_secs(3600),
            on_evicted: None,
        });

        store.set("a", 1);
        assert_eq!(store.get("a"), Some(1));
        assert!(evicted.lock().unwrap().is_empty());

        store.set("b", 2);
        assert!(evicted.lock().unwrap().is_empty());

        assert_eq!(store.get("a"), Some(1));
        assert_eq!(store.get("b"), Some(2));

        assert_eq!(*evicted.lock().unwrap(), vec!["a".to_string()]);

        store.close();
    }

    #[test]
    fn test_expired_get_is_miss_without_sweep() {
        let (store, evicted) = recording_store(no_sweep());

        store.set_with_ttl("a", 1, Some(Duration::from_millis(50)));
        // The internal clock advances in 100 ms steps; give it a few.
        std::thread::sleep(Duration::from_millis(500));

        assert_eq!(store.get("a"), None);
        assert_eq!(store.get("a"), None);

        // Expired in L1 without a protected copy: no callback fires.
        assert!(evicted.lock().unwrap().is_empty());
        assert_eq!(store.len(), 0);

        store.close();
    }

    #[test]
    fn test_expired_promoted_entry_fires_callback_once() {
        let (store, evicted) = recording_store(no_sweep());

        store.set_with_ttl("a", 1, Some(Duration::from_millis(50)));
        assert_eq!(store.get("a"), Some(1)); // promoted to L2

        std::thread::sleep(Duration::from_millis(500));

        assert_eq!(store.get("a"), None);
        assert_eq!(store.get("a"), None);
        assert_eq!(*evicted.lock().unwrap(), vec!["a".to_string()]);

        store.close();
    }

    #[test]
    fn test_sweep_removes_expired() {
        let (store, evicted) = recording_store(StoreOptions {
            shards: 2,
            l1_capacity: 8,
            l2_capacity: 8,
            sweep_interval: Duration::from_millis(50),
            on_evicted: None,
        });

        store.set_with_ttl("a", 1, Some(Duration::from_millis(50)));
        store.set("keep", 2);
        assert_eq!(store.len(), 2);

        // Several clock ticks plus several sweep intervals.
        std::thread::sleep(Duration::from_millis(600));

        assert_eq!(store.len(), 1);
        assert_eq!(store.get("keep"), Some(2));
        assert_eq!(*evicted.lock().unwrap(), vec!["a".to_string()]);

        store.close();
    }

    #[test]
    fn test_delete_semantics() {
        let (store, evicted) = recording_store(no_sweep());

        assert!(!store.delete("a"));
        assert!(evicted.lock().unwrap().is_empty());

        store.set("a", 1);
        assert!(store.delete("a"));
        assert!(!store.delete("a"));
        assert_eq!(store.get("a"), None);

        assert_eq!(*evicted.lock().unwrap(), vec!["a".to_string()]);

        store.close();
    }

    #[test]
    fn test_delete_covers_both_tiers() {
        let (store, evicted) = recording_store(no_sweep());

        store.set("a", 1);
        assert_eq!(store.get("a"), Some(1)); // now in L2
        store.set("a", 9); // fresh L1 copy alongside the promoted one
        assert_eq!(store.len(), 2);

        assert!(store.delete("a"));
        assert_eq!(store.get("a"), None);
        assert_eq!(store.len(), 0);

        // One callback, with the L1 copy preferred.
        assert_eq!(evicted.lock().unwrap().len(), 1);

        store.close();
    }

    #[test]
    fn test_clear_and_len() {
        // Tier capacity comfortably exceeds the key count, so even a
        // skewed hash distribution cannot evict anything here.
        let store = TieredStore::new(StoreOptions {
            shards: 4,
            l1_capacity: 64,
            l2_capacity: 64,
            ..no_sweep()
        });

        for i in 0..20 {
            store.set(&format!("k{i}"), i);
        }
        store.get("k3");
        store.get("k7");

        assert_eq!(store.len(), 20);
        store.clear();
        assert_eq!(store.len(), 0);
        assert_eq!(store.get("k3"), None);

        store.close();
    }

    #[test]
    fn test_close_is_idempotent() {
        let store: TieredStore<i32> = TieredStore::new(no_sweep());
        store.close();
        store.close();
    }

    #[test]
    fn test_concurrent_shards() {
        // Capacities exceed the total key count so a freshly set key can
        // never be evicted before its own read-back.
        let store = Arc::new(TieredStore::new(StoreOptions {
            shards: 8,
            l1_capacity: 1024,
            l2_capacity: 1024,
            sweep_interval: Duration::from_secs(3600),
            on_evicted: None,
        }));

        let written = Arc::new(AtomicUsize::new(0));
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let store = Arc::clone(&store);
                let written = Arc::clone(&written);
                std::thread::spawn(move || {
                    for i in 0..100 {
                        let key = format!("t{t}-k{i}");
                        store.set(&key, i);
                        assert_eq!(store.get(&key), Some(i));
                        written.fetch_add(1, Ordering::Relaxed);
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(written.load(Ordering::Relaxed), 800);

        store.close();
    }
}

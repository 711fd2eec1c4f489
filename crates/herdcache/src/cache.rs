//! Closeable cache façade over [`TieredStore`].
//!
//! Adds the operational conveniences the core store stays out of: lazy
//! one-time construction, an open/closed flag checked before every call,
//! and hit/miss accounting.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tracing::{debug, warn};

use crate::stats::CacheStats;
use crate::store::{EvictionCallback, StoreOptions, TieredStore};

/// Configuration for [`Cache`].
pub struct CacheOptions<V> {
    /// Number of store shards.
    pub shards: u16,
    /// Probationary tier capacity per shard, in entries.
    pub l1_capacity: u16,
    /// Protected tier capacity per shard, in entries.
    pub l2_capacity: u16,
    /// Memory budget carried through configuration. Capacity accounting
    /// is per entry, not per byte, so this is informational only.
    pub max_bytes: i64,
    /// Interval between background expiry sweeps.
    pub sweep_interval: Duration,
    /// Callback fired when a live entry is reclaimed.
    pub on_evicted: Option<EvictionCallback<V>>,
}

impl<V> Default for CacheOptions<V> {
    fn default() -> Self {
        Self {
            shards: 16,
            l1_capacity: 512,
            l2_capacity: 256,
            max_bytes: 8 * 1024 * 1024,
            sweep_interval: Duration::from_secs(60),
            on_evicted: None,
        }
    }
}

/// Thread-safe cache handle with lazy construction and graceful close.
///
/// The underlying store is built on the first write. After
/// [`close`](Cache::close), every operation is a no-op returning its
/// default.
pub struct Cache<V> {
    opts: CacheOptions<V>,
    store: RwLock<Option<TieredStore<V>>>,
    stats: Arc<CacheStats>,
    initialized: AtomicBool,
    closed: AtomicBool,
}

impl<V: Clone + Send + 'static> Cache<V> {
    /// Create a cache that will build its store on first use.
    pub fn new(opts: CacheOptions<V>) -> Self {
        Self {
            opts,
            store: RwLock::new(None),
            stats: Arc::new(CacheStats::new()),
            initialized: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        }
    }

    fn ensure_initialized(&self) {
        // Fast path without the lock.
        if self.initialized.load(Ordering::Acquire) {
            return;
        }

        let mut store = self.store.write();
        if store.is_none() {
            *store = Some(TieredStore::new(StoreOptions {
                shards: self.opts.shards,
                l1_capacity: self.opts.l1_capacity,
                l2_capacity: self.opts.l2_capacity,
                sweep_interval: self.opts.sweep_interval,
                on_evicted: Some(self.eviction_hook()),
            }));
            self.initialized.store(true, Ordering::Release);
            debug!(
                shards = self.opts.shards,
                max_bytes = self.opts.max_bytes,
                "cache initialized"
            );
        }
    }

    /// Store callback that counts evictions before forwarding to the
    /// user's callback, if any.
    fn eviction_hook(&self) -> EvictionCallback<V> {
        let stats = Arc::clone(&self.stats);
        let user = self.opts.on_evicted.clone();
        Arc::new(move |key, value| {
            stats.record_eviction();
            if let Some(cb) = &user {
                cb(key, value);
            }
        })
    }

    /// Insert a key/value pair with no expiry.
    pub fn insert(&self, key: &str, value: V) {
        if self.closed.load(Ordering::Acquire) {
            warn!(key, "insert on closed cache");
            return;
        }
        self.ensure_initialized();

        if let Some(store) = self.store.read().as_ref() {
            store.set(key, value);
            self.stats.record_insert();
        }
    }

    /// Insert a key/value pair that expires `ttl` from now.
    ///
    /// A zero `ttl` is already elapsed and is skipped outright.
    pub fn insert_with_ttl(&self, key: &str, value: V, ttl: Duration) {
        if self.closed.load(Ordering::Acquire) {
            warn!(key, "insert on closed cache");
            return;
        }
        if ttl.is_zero() {
            warn!(key, "zero ttl, entry not cached");
            return;
        }
        self.ensure_initialized();

        if let Some(store) = self.store.read().as_ref() {
            store.set_with_ttl(key, value, Some(ttl));
            self.stats.record_insert();
        }
    }

    /// Look up a key, recording a hit or miss.
    pub fn get(&self, key: &str) -> Option<V> {
        if self.closed.load(Ordering::Acquire) {
            return None;
        }
        if !self.initialized.load(Ordering::Acquire) {
            self.stats.record_miss();
            return None;
        }

        match self.store.read().as_ref().and_then(|store| store.get(key)) {
            Some(value) => {
                self.stats.record_hit();
                Some(value)
            }
            None => {
                self.stats.record_miss();
                None
            }
        }
    }

    /// Remove a key; true if it was live.
    pub fn remove(&self, key: &str) -> bool {
        if self.closed.load(Ordering::Acquire) || !self.initialized.load(Ordering::Acquire) {
            return false;
        }

        self.store
            .read()
            .as_ref()
            .map(|store| store.delete(key))
            .unwrap_or(false)
    }

    /// Delete every entry and reset the counters.
    pub fn clear(&self) {
        if self.closed.load(Ordering::Acquire) || !self.initialized.load(Ordering::Acquire) {
            return;
        }

        if let Some(store) = self.store.read().as_ref() {
            store.clear();
        }
        self.stats.reset();
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        if self.closed.load(Ordering::Acquire) || !self.initialized.load(Ordering::Acquire) {
            return 0;
        }

        self.store
            .read()
            .as_ref()
            .map(|store| store.len())
            .unwrap_or(0)
    }

    /// True when no live entry is cached.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Traffic counters for this handle.
    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }

    /// Stop the sweeper and drop the store. Idempotent; later calls on
    /// the handle are no-ops.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        if let Some(store) = self.store.write().take() {
            store.close();
        }
        self.initialized.store(false, Ordering::Release);

        debug!(
            hits = self.stats.hits(),
            misses = self.stats.misses(),
            "cache closed"
        );
    }
}

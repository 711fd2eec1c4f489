//! # herdcache
//!
//! In-process caching engine combining a sharded two-tier LRU store with
//! single-flight request deduplication — the classic "cache + fill
//! deduplication" pattern that keeps duplicate and thundering-herd work
//! off a backing resource.
//!
//! ## Architecture
//! - **Node-indexed LRU list**: fixed-capacity, array-backed, O(1)
//!   insert/touch/delete with tombstoned slots reclaimed lazily
//! - **Tiered store**: per-shard locking, probationary (L1) and
//!   protected (L2) tiers, promotion on re-access, background expiry
//!   sweep
//! - **Approximate clock**: one shared timestamp advanced by a
//!   background thread, so expiry checks never hit the system clock
//! - **Single-flight group**: concurrent lookups for one key collapse
//!   into a single computation
//!
//! ## Example
//!
//! ```
//! use herdcache::{Cache, CacheOptions, Group};
//!
//! let cache: Cache<String> = Cache::new(CacheOptions::default());
//! let group: Group<String, String> = Group::new();
//!
//! let value = group.run("user:42", || {
//!     if let Some(hit) = cache.get("user:42") {
//!         return Ok(hit);
//!     }
//!     let fresh = "loaded from backend".to_string();
//!     cache.insert("user:42", fresh.clone());
//!     Ok(fresh)
//! });
//!
//! assert_eq!(value.as_deref(), Ok("loaded from backend"));
//! cache.close();
//! ```

#![warn(missing_docs)]

mod cache;
mod clock;
mod lru;
mod singleflight;
mod stats;
mod store;

pub use cache::{Cache, CacheOptions};
pub use singleflight::Group;
pub use stats::{CacheStats, StatsSnapshot};
pub use store::{EvictionCallback, StoreOptions, TieredStore};

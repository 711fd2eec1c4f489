//! Node-indexed LRU list.
//!
//! A fixed-capacity doubly linked list threaded through a pre-allocated
//! slot array, with links stored as index pairs instead of pointers.
//! Index 0 is the sentinel: `links[0][NEXT]` is the head (most recent),
//! `links[0][PREV]` the tail (eviction candidate). Slots are 1-based.
//!
//! Deletion tombstones a node (`expire_at = 0`) and moves it to the tail
//! so the slot is reclaimed by the next insert that needs one; this keeps
//! `del` O(1) without shifting other entries. The list does no locking of
//! its own — callers provide exclusion.

use ahash::RandomState;
use std::collections::HashMap;

const PREV: usize = 0;
const NEXT: usize = 1;

/// One slot of the list.
pub(crate) struct Node<V> {
    pub(crate) key: String,
    pub(crate) value: V,
    /// Strictly positive for live entries, zero for tombstones.
    pub(crate) expire_at: i64,
}

/// Outcome of a `put`.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum PutStatus {
    /// A new node was linked (possibly reclaiming the tail).
    Inserted,
    /// An existing node was overwritten in place.
    Updated,
}

pub(crate) struct LruList<V> {
    /// `[PREV, NEXT]` index pairs, length capacity + 1; entry 0 is the sentinel.
    links: Vec<[u16; 2]>,
    /// Node storage, length capacity; slot `i` backs index `i + 1`.
    slots: Vec<Option<Node<V>>>,
    /// Key to 1-based slot index.
    map: HashMap<String, u16, RandomState>,
    /// Indices released by `remove`, reused before fresh allocation.
    free: Vec<u16>,
    /// High-water mark of allocated slots.
    last: u16,
    capacity: u16,
}

impl<V: Clone> LruList<V> {
    pub(crate) fn new(capacity: u16) -> Self {
        assert!(capacity > 0, "capacity must be greater than 0");

        Self {
            links: vec![[0, 0]; capacity as usize + 1],
            slots: (0..capacity).map(|_| None).collect(),
            map: HashMap::with_capacity_and_hasher(capacity as usize, RandomState::new()),
            free: Vec::new(),
            last: 0,
            capacity,
        }
    }

    /// Insert or overwrite `key`, making it the most recently used entry.
    ///
    /// When every slot is taken the tail node is reclaimed for the new
    /// entry; `on_evicted` fires only if that tail was still live.
    pub(crate) fn put(
        &mut self,
        key: &str,
        value: V,
        expire_at: i64,
        on_evicted: Option<&(dyn Fn(&str, &V) + Send + Sync)>,
    ) -> PutStatus {
        if let Some(&idx) = self.map.get(key) {
            if let Some(node) = self.slots[idx as usize - 1].as_mut() {
                node.value = value;
                node.expire_at = expire_at;
            }
            self.move_to_front(idx);
            return PutStatus::Updated;
        }

        match self.alloc() {
            Some(idx) => {
                self.slots[idx as usize - 1] = Some(Node {
                    key: key.to_string(),
                    value,
                    expire_at,
                });
                self.map.insert(key.to_string(), idx);
                self.link_front(idx);
            }
            None => {
                // All slots in use: reuse the least recently used one.
                let tail = self.links[0][PREV];
                let old = self.slots[tail as usize - 1].replace(Node {
                    key: key.to_string(),
                    value,
                    expire_at,
                });

                if let Some(old) = old {
                    if old.expire_at > 0 {
                        if let Some(cb) = on_evicted {
                            cb(&old.key, &old.value);
                        }
                    }
                    self.map.remove(&old.key);
                }

                self.map.insert(key.to_string(), tail);
                self.move_to_front(tail);
            }
        }

        PutStatus::Inserted
    }

    /// Look up `key`, marking it most recently used.
    ///
    /// Tombstoned nodes are returned as well (`expire_at == 0`); filtering
    /// on liveness is the caller's responsibility.
    pub(crate) fn get(&mut self, key: &str) -> Option<(&V, i64)> {
        let idx = *self.map.get(key)?;
        self.move_to_front(idx);
        self.slots[idx as usize - 1]
            .as_ref()
            .map(|node| (&node.value, node.expire_at))
    }

    /// Tombstone a live entry, moving it to the tail so its slot is the
    /// next reclaimed. Returns the value and its prior expiry.
    ///
    /// The key stays in the index until the slot is physically reused.
    pub(crate) fn del(&mut self, key: &str) -> Option<(V, i64)> {
        let idx = *self.map.get(key)?;
        let node = self.slots[idx as usize - 1].as_mut()?;
        if node.expire_at <= 0 {
            return None;
        }

        let prior = node.expire_at;
        node.expire_at = 0;
        let value = node.value.clone();
        self.move_to_back(idx);

        Some((value, prior))
    }

    /// Physically remove `key` — live or tombstoned — releasing its slot
    /// for reuse. Returns the node as it was stored.
    pub(crate) fn remove(&mut self, key: &str) -> Option<Node<V>> {
        let idx = self.map.remove(key)?;
        self.unlink(idx);
        self.free.push(idx);
        self.slots[idx as usize - 1].take()
    }

    /// Visit live entries from most to least recently used. The visitor
    /// returns `false` to stop early. Tombstones are skipped.
    pub(crate) fn walk<F>(&self, mut visitor: F)
    where
        F: FnMut(&str, &V, i64) -> bool,
    {
        let mut idx = self.links[0][NEXT];
        while idx != 0 {
            if let Some(node) = self.slots[idx as usize - 1].as_ref() {
                if node.expire_at > 0 && !visitor(&node.key, &node.value, node.expire_at) {
                    return;
                }
            }
            idx = self.links[idx as usize][NEXT];
        }
    }

    fn alloc(&mut self) -> Option<u16> {
        if let Some(idx) = self.free.pop() {
            return Some(idx);
        }
        if self.last < self.capacity {
            self.last += 1;
            return Some(self.last);
        }
        None
    }

    /// Splice `idx` in as the new head. Also correct for an empty list:
    /// the sentinel's own links end up pointing at `idx` from both sides.
    fn link_front(&mut self, idx: u16) {
        let head = self.links[0][NEXT];
        self.links[idx as usize] = [0, head];
        self.links[head as usize][PREV] = idx;
        self.links[0][NEXT] = idx;
    }

    fn link_back(&mut self, idx: u16) {
        let tail = self.links[0][PREV];
        self.links[idx as usize] = [tail, 0];
        self.links[tail as usize][NEXT] = idx;
        self.links[0][PREV] = idx;
    }

    fn unlink(&mut self, idx: u16) {
        let [prev, next] = self.links[idx as usize];
        self.links[prev as usize][NEXT] = next;
        self.links[next as usize][PREV] = prev;
    }

    fn move_to_front(&mut self, idx: u16) {
        if self.links[0][NEXT] == idx {
            return;
        }
        self.unlink(idx);
        self.link_front(idx);
    }

    fn move_to_back(&mut self, idx: u16) {
        if self.links[0][PREV] == idx {
            return;
        }
        self.unlink(idx);
        self.link_back(idx);
    }
}

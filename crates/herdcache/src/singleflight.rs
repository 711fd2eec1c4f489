//! Single-flight request deduplication.
//!
//! Concurrent callers that share a key observe exactly one execution of
//! the compute closure and all receive its result, success or error.
//! The membership check and the registration are one critical section on
//! the group's table; a check followed by a separate insert would let two
//! first-arrivals both become executors.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::Arc;

use ahash::RandomState;
use parking_lot::{Condvar, Mutex};

/// One in-flight computation. Shared by the executor and every waiter
/// for the same key; dropped from the table as soon as it completes.
struct Call<T, E> {
    result: Mutex<Option<Result<T, E>>>,
    done: Condvar,
}

impl<T: Clone, E: Clone> Call<T, E> {
    fn new() -> Self {
        Self {
            result: Mutex::new(None),
            done: Condvar::new(),
        }
    }

    /// Block until the executor publishes, then clone its result.
    fn wait(&self) -> Result<T, E> {
        let mut result = self.result.lock();
        loop {
            if let Some(outcome) = result.as_ref() {
                return outcome.clone();
            }
            self.done.wait(&mut result);
        }
    }

    fn complete(&self, outcome: Result<T, E>) {
        *self.result.lock() = Some(outcome);
        self.done.notify_all();
    }
}

/// Keyed table of in-flight computations.
///
/// Callers for different keys never block each other. A waiter blocks
/// until the owning computation finishes; there is no built-in timeout,
/// so a caller needing a bounded wait must put the deadline inside its
/// own compute closure.
///
/// # Example
///
/// ```
/// use herdcache::Group;
///
/// let group: Group<String, String> = Group::new();
/// let value = group.run("user:1", || Ok("alice".to_string()));
/// assert_eq!(value, Ok("alice".to_string()));
/// ```
pub struct Group<T, E> {
    calls: Mutex<HashMap<String, Arc<Call<T, E>>, RandomState>>,
}

impl<T: Clone, E: Clone> Group<T, E> {
    /// Create a group with an empty in-flight table.
    pub fn new() -> Self {
        Self {
            calls: Mutex::new(HashMap::default()),
        }
    }

    /// Execute `compute` for `key`, unless a call for the same key is
    /// already in flight — then wait for it and return its result
    /// verbatim, errors included.
    ///
    /// The key is unregistered once the computation settles (a guard
    /// covers the panicking case too), so a later call re-executes
    /// rather than replaying a stale result.
    pub fn run<F>(&self, key: &str, compute: F) -> Result<T, E>
    where
        F: FnOnce() -> Result<T, E>,
    {
        let (call, leader) = {
            let mut calls = self.calls.lock();
            match calls.entry(key.to_string()) {
                Entry::Occupied(entry) => (Arc::clone(entry.get()), false),
                Entry::Vacant(entry) => {
                    let call = Arc::new(Call::new());
                    entry.insert(Arc::clone(&call));
                    (call, true)
                }
            }
        };

        if !leader {
            return call.wait();
        }

        let unregister = Unregister { group: self, key };
        let outcome = compute();
        drop(unregister);

        call.complete(outcome.clone());
        outcome
    }
}

impl<T: Clone, E: Clone> Default for Group<T, E> {
    fn default() -> Self {
        Self::new()
    }
}

/// Removes the key from the table on drop, so the entry is cleared even
/// if `compute` unwinds.
struct Unregister<'a, T, E> {
    group: &'a Group<T, E>,
    key: &'a str,
}

impl<T, E> Drop for Unregister<'_, T, E> {
    fn drop(&mut self) {
        self.group.calls.lock().remove(self.key);
    }
}

//! The owned, refcounted cache slot.
//!
//! The design note in `spec.md` §9 asks for cyclic ownership to be modeled as
//! a sum of states (`Indexed | Floating | Destroyed`) rather than raw pointer
//! manipulation. `Arc<Entry<T>>` gives us exactly that for free: "indexed"
//! means the hash index (and, while unexpired, the queue) hold a clone of the
//! `Arc`; "floating" means those containers no longer do, but at least one
//! `CacheRef` still does; "destroyed" is the moment the last clone drops and
//! [`Entry::drop`] fires. No manual refcount or flag is load-bearing for
//! memory safety — `Arc` already serializes the "exactly once" destructor
//! guarantee of invariant 5 in `spec.md` §3.
//!
//! The `floating` field that remains is diagnostic only: it lets tests and
//! callers observe which of the two destruction paths an entry took, mirroring
//! the `FLOATING` bit of the original data model.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crate::delegate::CacheDelegate;

/// One cached object plus its housekeeping.
///
/// Dropping the last `Arc<Entry<T>>` runs the delegate's destructor exactly
/// once, regardless of whether that drop happens on the pruner thread (entry
/// had no outstanding readers at eviction) or on a reader's thread (entry was
/// still held when it expired).
pub struct Entry<T> {
    pub(crate) key: Box<[u8]>,
    payload: Option<T>,
    /// Absolute deadline after which the entry is eligible for eviction.
    /// Monotonic (`Instant`), per the clock design note in `spec.md` §9.
    pub(crate) time_to_die: Instant,
    /// Diagnostic mirror of the `FLOATING` bit; not required for correctness.
    floating: AtomicBool,
    delegate: Arc<dyn CacheDelegate<T>>,
}

impl<T> Entry<T> {
    pub(crate) fn new(
        key: Box<[u8]>,
        payload: T,
        time_to_die: Instant,
        delegate: Arc<dyn CacheDelegate<T>>,
    ) -> Self {
        Entry {
            key,
            payload: Some(payload),
            time_to_die,
            floating: AtomicBool::new(false),
            delegate,
        }
    }

    /// Shared access to the cached payload.
    ///
    /// Always `Some` for any `Entry` reachable through a live `Arc` — the
    /// payload is only ever taken in `Drop`.
    pub fn payload(&self) -> &T {
        self.payload
            .as_ref()
            .expect("payload observed after destruction")
    }

    pub fn key(&self) -> &[u8] {
        &self.key
    }

    /// Marks the entry as no longer reachable from the index.
    ///
    /// Called by the pruner (when it evicts an entry still held by a reader)
    /// and by the deduplicated-insert path (when `add_unique` fails for a
    /// reason other than "key exists"). Purely observational: the entry is
    /// destroyed when the last `Arc` clone drops either way.
    pub(crate) fn mark_floating(&self) {
        self.floating.store(true, Ordering::Release);
    }

    pub fn is_floating(&self) -> bool {
        self.floating.load(Ordering::Acquire)
    }
}

impl<T> Drop for Entry<T> {
    fn drop(&mut self) {
        if let Some(payload) = self.payload.take() {
            self.delegate.destroy(&self.key, payload);
        }
    }
}

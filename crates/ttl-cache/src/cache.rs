//! The keyed, TTL-bounded, deduplicating cache.
//!
//! Grounded on `lwan-cache.c`'s `cache_create`/`cache_get_and_ref_entry`/
//! `cache_entry_unref`/`cache_destroy`, translated onto `Arc<Entry<T>>` so the
//! "destructor runs exactly once" invariant (§3.5 of `spec.md`) is enforced by
//! the compiler rather than by hand-rolled atomics (see `entry.rs`).

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool as AtomicFlag, AtomicU64, Ordering};
use std::sync::{Arc, RwLock, TryLockError};
use std::time::{Duration, Instant};

use crate::delegate::CacheDelegate;
use crate::entry::Entry;
use crate::error::GetError;
use crate::runner::{Job, JobHandle, JobRunner};

/// Snapshot of a cache's monotonically non-decreasing counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStatsSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub evicted: u64,
}

#[derive(Default)]
struct CacheStats {
    hits: AtomicU64,
    misses: AtomicU64,
    evicted: AtomicU64,
}

/// An RAII handle to a referenced cache entry.
///
/// The Rust expression of `cache_entry_unref`: dropping a `CacheRef` performs
/// the unref. If the drop is the last reference to the underlying entry, the
/// delegate's destructor runs as part of this drop (see `entry.rs`).
pub struct CacheRef<T> {
    entry: Arc<Entry<T>>,
}

impl<T> CacheRef<T> {
    fn new(entry: Arc<Entry<T>>) -> Self {
        CacheRef { entry }
    }

    pub fn key(&self) -> &[u8] {
        self.entry.key()
    }
}

impl<T> std::ops::Deref for CacheRef<T> {
    type Target = T;

    fn deref(&self) -> &T {
        self.entry.payload()
    }
}

impl<T> Clone for CacheRef<T> {
    fn clone(&self) -> Self {
        CacheRef {
            entry: Arc::clone(&self.entry),
        }
    }
}

/// A keyed TTL cache backed by a shared [`JobRunner`].
///
/// `index` and `queue` are guarded by independent `RwLock`s, acquired in the
/// single global order documented in `spec.md` §5: `queue_lock` before
/// `hash_lock`. The pruner is the only code path that ever holds both.
pub struct Cache<T> {
    index: RwLock<HashMap<Box<[u8]>, Arc<Entry<T>>>>,
    queue: RwLock<VecDeque<Arc<Entry<T>>>>,
    delegate: Arc<dyn CacheDelegate<T>>,
    ttl: Duration,
    stats: CacheStats,
    shutting_down: AtomicFlag,
    runner: Arc<JobRunner>,
    pruner_handle: std::sync::Mutex<Option<JobHandle>>,
}

impl<T: Send + Sync + 'static> Cache<T> {
    /// Creates a cache and registers its pruner with `runner`.
    ///
    /// Mirrors `cache_create`: the pruner job is added before the handle is
    /// returned, so every cache is pruned by whatever shared worker `runner`
    /// drives. Call [`JobRunner::start`] yourself once it is convenient —
    /// a `Cache` never starts the runner implicitly, since several caches
    /// typically share one.
    pub fn new(
        delegate: impl CacheDelegate<T> + 'static,
        ttl: Duration,
        runner: Arc<JobRunner>,
    ) -> Arc<Self> {
        let cache = Arc::new(Cache {
            index: RwLock::new(HashMap::new()),
            queue: RwLock::new(VecDeque::new()),
            delegate: Arc::new(delegate),
            ttl,
            stats: CacheStats::default(),
            shutting_down: AtomicFlag::new(false),
            runner: Arc::clone(&runner),
            pruner_handle: std::sync::Mutex::new(None),
        });

        let pruner = Arc::new(Pruner {
            cache: Arc::downgrade(&cache),
        });
        let handle = runner.add(pruner);
        *cache.pruner_handle.lock().unwrap_or_else(|e| e.into_inner()) = Some(handle);

        cache
    }

    /// Deregisters the pruner, marks the cache as shutting down, then runs
    /// the pruner once synchronously to drain every entry regardless of its
    /// remaining TTL — matching `cache_destroy`.
    pub fn shutdown(self: &Arc<Self>) {
        if let Some(handle) = self
            .pruner_handle
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
        {
            self.runner.remove(&handle);
        }
        self.shutting_down.store(true, Ordering::SeqCst);
        self.prune_once();
    }

    /// Returns a referenced entry for `key`, constructing one on miss.
    ///
    /// See `spec.md` §4.2 for the full deduplicated-construction protocol;
    /// this is a direct translation, with `Ok(None)` standing in for a null
    /// constructor result and [`GetError::WouldBlock`] standing in for the
    /// `EWOULDBLOCK` non-blocking contract. Unlike the source's
    /// `try_adding_again` loop, the insert below holds `hash_lock` for write
    /// across both the re-check and the insert, so there is no window in
    /// which a concurrent winner can "vanish" between the two — nothing here
    /// needs retrying.
    pub fn get_and_ref(&self, key: &[u8]) -> Result<Option<CacheRef<T>>, GetError> {
        match self.try_hit(key) {
            Ok(Some(hit)) => return Ok(Some(hit)),
            Ok(None) => {}
            Err(e) => return Err(e),
        }

        self.stats.misses.fetch_add(1, Ordering::Relaxed);
        let Some(payload) = self.delegate.create(key) else {
            return Ok(None);
        };

        let owned_key: Box<[u8]> = key.into();

        // Holding hash_lock for write across both the re-check and the
        // insert closes the window the source's try_adding_again loop papers
        // over: nobody else can land a winner between our lookup and our
        // insert, so there is nothing to retry. A loser here is only ever
        // this call's own just-built candidate, never an entry that "was
        // there and vanished".
        let mut index = self.index.write().unwrap_or_else(|e| e.into_inner());

        if let Some(winner) = index.get(owned_key.as_ref()) {
            // Someone else's construction landed first while we were
            // building ours. Adopt it; our candidate (and its payload) is
            // dropped when this function returns. Still a miss, not a hit:
            // the fast read-only path above is the only hit source.
            let winner = Arc::clone(winner);
            drop(index);
            return Ok(Some(CacheRef::new(winner)));
        }

        let candidate = Arc::new(Entry::new(
            owned_key.clone(),
            payload,
            Instant::now() + self.ttl,
            Arc::clone(&self.delegate),
        ));
        index.insert(owned_key, Arc::clone(&candidate));
        drop(index);

        let mut queue = self.queue.write().unwrap_or_else(|e| e.into_inner());
        queue.push_back(Arc::clone(&candidate));
        drop(queue);

        Ok(Some(CacheRef::new(candidate)))
    }

    /// The read-only hit path, split out so [`Cache::get_and_ref`] reads
    /// cleanly as "try a hit, then fall back to construction".
    fn try_hit(&self, key: &[u8]) -> Result<Option<CacheRef<T>>, GetError> {
        let index = match self.index.try_read() {
            Ok(index) => index,
            Err(TryLockError::WouldBlock) => return Err(GetError::WouldBlock),
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
        };

        match index.get(key) {
            Some(entry) => {
                let entry = Arc::clone(entry);
                drop(index);
                self.stats.hits.fetch_add(1, Ordering::Relaxed);
                Ok(Some(CacheRef::new(entry)))
            }
            None => Ok(None),
        }
    }

    /// Point-in-time snapshot of hit/miss/eviction counters.
    pub fn stats(&self) -> CacheStatsSnapshot {
        CacheStatsSnapshot {
            hits: self.stats.hits.load(Ordering::Relaxed),
            misses: self.stats.misses.load(Ordering::Relaxed),
            evicted: self.stats.evicted.load(Ordering::Relaxed),
        }
    }

    /// Runs the pruner protocol once, synchronously, on the calling thread.
    ///
    /// Used by [`Cache::shutdown`] to force full drainage; also what the
    /// registered [`Pruner`] job calls on every background tick. Returns
    /// whether any entry was evicted, the signal the job runner uses to
    /// decide whether to reset its backoff.
    fn prune_once(&self) -> bool {
        let mut queue = match self.queue.try_write() {
            Ok(queue) => queue,
            Err(TryLockError::WouldBlock) => {
                tracing::debug!("pruner: queue_lock contended, no work this tick");
                return false;
            }
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
        };

        let mut index = match self.index.try_write() {
            Ok(index) => index,
            Err(TryLockError::WouldBlock) => {
                tracing::debug!("pruner: hash_lock contended, no work this tick");
                return false;
            }
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
        };

        let now = Instant::now();
        let shutting_down = self.shutting_down.load(Ordering::SeqCst);
        let mut evicted = 0u64;

        while let Some(front) = queue.front() {
            if !shutting_down && now <= front.time_to_die {
                break;
            }

            let entry = queue.pop_front().expect("front() just confirmed Some");
            entry.mark_floating();
            index.remove(entry.key());
            evicted += 1;
            // `entry`'s Arc clone drops here. If no `CacheRef` still holds
            // one, this is the moment the delegate's destructor runs;
            // otherwise it runs later, on whichever thread drops the last
            // outstanding `CacheRef`.
        }

        drop(index);
        drop(queue);

        if evicted > 0 {
            self.stats.evicted.fetch_add(evicted, Ordering::Relaxed);
            tracing::debug!(evicted, "pruner evicted entries");
        }

        evicted > 0
    }
}

/// The periodic job that drains expired entries from a [`Cache`].
///
/// Holds only a `Weak` reference so a cache can be dropped without the
/// runner's job list keeping it alive.
struct Pruner<T> {
    cache: std::sync::Weak<Cache<T>>,
}

impl<T: Send + Sync + 'static> Job for Pruner<T> {
    fn run(&self) -> bool {
        match self.cache.upgrade() {
            Some(cache) => cache.prune_once(),
            None => false,
        }
    }

    fn name(&self) -> &str {
        "ttl-cache-pruner"
    }
}

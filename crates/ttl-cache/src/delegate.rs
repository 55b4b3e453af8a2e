//! Constructor/destructor-plus-context polymorphism for [`crate::cache::Cache`].
//!
//! The original design passes a `(create_entry_cb, destroy_entry_cb, context)`
//! triple into `cache_create`. A trait is the idiomatic Rust equivalent: the
//! implementor's own fields stand in for the opaque `context` pointer, and the
//! two methods stand in for the function pointers.

/// Builds and tears down the payload a [`crate::cache::Cache`] stores under a
/// key.
///
/// # Contract
///
/// - `create` is called on cache miss, with no cache lock held. It may be
///   called more than once for the same key under contention (§4.2 of the
///   design); every call whose result is not adopted into the index is
///   guaranteed exactly one matching `destroy` call.
/// - `create` returning `None` is a construction failure: the miss is still
///   charged to `stats.misses`, but nothing is cached and `get_and_ref`
///   returns `Ok(None)`.
/// - `destroy` must be idempotent only in the sense that it is never called
///   twice for the same constructed payload — the cache itself guarantees
///   single-call semantics, so implementors need no internal guards.
pub trait CacheDelegate<T>: Send + Sync {
    /// Construct a fresh payload for `key`, or `None` on construction failure.
    fn create(&self, key: &[u8]) -> Option<T>;

    /// Tear down a payload that will never be observed again.
    ///
    /// The default implementation simply drops `payload`; override for
    /// payloads that need explicit cleanup (closing a file descriptor,
    /// releasing a pooled resource, etc).
    #[allow(unused_variables)]
    fn destroy(&self, key: &[u8], payload: T) {}
}

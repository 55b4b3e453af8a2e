//! Error types for the cache's non-blocking contract.
//!
//! The cache never blocks the caller on the hot path; the one failure mode
//! that would otherwise require suspension is surfaced as a `GetError`
//! variant instead, matching the `0 | EWOULDBLOCK` error channel of the
//! original design.

use thiserror::Error;

/// Failure modes of [`crate::cache::Cache::get_and_ref`].
///
/// Not fatal to the process; the caller's to recover from (retry
/// immediately, back off, or yield cooperatively via
/// [`crate::coro::get_and_ref_cooperative`]).
#[derive(Debug, Error, PartialEq, Eq)]
pub enum GetError {
    /// The read side of `hash_lock` could not be taken immediately.
    ///
    /// No construction was attempted and no statistics were charged; the
    /// caller should retry.
    #[error("cache lock contended, retry later")]
    WouldBlock,
}

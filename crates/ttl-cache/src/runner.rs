//! Single low-priority background worker shared by every cache.
//!
//! Grounded on `common/lwan-job.c`: one dedicated thread, a mutex-guarded job
//! list, and a condvar-based wait loop that replaces the original's plain
//! `sleep()` — the C source's own comments note that `sleep()` delayed
//! process exit by up to the full backoff interval, which is exactly the
//! defect `pthread_cond_timedwait` (here, `Condvar::wait_timeout`) fixes.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const DEFAULT_MAX_BACKOFF_SECS: u64 = 15;

/// A periodic callback registered with a [`JobRunner`].
///
/// Stands in for the C `(callback, data)` pair: implementors close over
/// whatever context they need instead of receiving an opaque `void *`.
pub trait Job: Send + Sync {
    /// Run one iteration. Returns `true` if the job did meaningful work this
    /// tick (resets the runner's backoff) or `false` if it found nothing to
    /// do (lets the backoff grow).
    fn run(&self) -> bool;

    /// Name used in diagnostic log lines. Defaults to a generic label.
    fn name(&self) -> &str {
        "job"
    }
}

/// A registration returned by [`JobRunner::add`].
///
/// Identity is the `Arc` pointer itself, the Rust equivalent of matching on
/// `(callback, data)` pointer equality in `lwan_job_del`.
#[derive(Clone)]
pub struct JobHandle(Arc<dyn Job>);

impl JobHandle {
    fn matches(&self, other: &Arc<dyn Job>) -> bool {
        Arc::ptr_eq(&self.0, other)
    }
}

struct RunnerState {
    jobs: Mutex<Vec<Arc<dyn Job>>>,
    running: AtomicBool,
    wait_lock: Mutex<()>,
    wait_cond: Condvar,
    max_backoff: Duration,
}

/// The process-wide (or, for tests, locally scoped) low-priority worker.
///
/// Exactly one background thread per `JobRunner`. `spec.md` models this as a
/// singleton service; this crate leaves instantiation to the caller (typical
/// usage is one `JobRunner` per process, shared by every [`crate::cache::Cache`]
/// via a clone of the `Arc` returned from [`JobRunner::new`]) rather than
/// baking in a global, since Rust has no implicit-global convention to lean
/// on the way the C source does.
pub struct JobRunner {
    state: Arc<RunnerState>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl JobRunner {
    /// Creates a runner. Does not spawn the worker thread yet — call
    /// [`JobRunner::start`] once the cache(s) it will service are ready.
    ///
    /// The maximum backoff (default 15s, matching `lwan-job.c`'s hardcoded
    /// cap) is read once from `TTL_CACHE_RUNNER_MAX_BACKOFF_SECS`, the same
    /// one-shot-env-read pattern the teacher crate uses for its pool and
    /// cache sizing.
    pub fn new() -> Self {
        let max_backoff = std::env::var("TTL_CACHE_RUNNER_MAX_BACKOFF_SECS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .map(|secs| secs.max(1))
            .unwrap_or(DEFAULT_MAX_BACKOFF_SECS);

        JobRunner {
            state: Arc::new(RunnerState {
                jobs: Mutex::new(Vec::new()),
                running: AtomicBool::new(false),
                wait_lock: Mutex::new(()),
                wait_cond: Condvar::new(),
                max_backoff: Duration::from_secs(max_backoff),
            }),
            worker: Mutex::new(None),
        }
    }

    /// Spawns the background worker thread. Idempotent: a second call while
    /// the worker is already running is a no-op.
    pub fn start(&self) {
        let mut worker = self.worker.lock().unwrap_or_else(|e| e.into_inner());
        if worker.is_some() {
            return;
        }

        self.state.running.store(true, Ordering::SeqCst);
        lower_thread_priority_best_effort();

        let state = Arc::clone(&self.state);
        let handle = std::thread::Builder::new()
            .name("ttl-cache-runner".to_string())
            .spawn(move || run_loop(state))
            .expect("failed to spawn ttl-cache background worker thread");

        tracing::debug!("ttl-cache background worker started");
        *worker = Some(handle);
    }

    /// Registers `job`, returning a handle usable with [`JobRunner::remove`].
    pub fn add(&self, job: Arc<dyn Job>) -> JobHandle {
        match self.state.jobs.lock() {
            Ok(mut jobs) => jobs.push(Arc::clone(&job)),
            Err(_) => {
                tracing::warn!("couldn't lock job list; dropping add() for a new job");
            }
        }
        JobHandle(job)
    }

    /// Removes every registration matching `handle` (in practice at most one,
    /// but duplicates — if ever introduced — are tolerated and all removed).
    pub fn remove(&self, handle: &JobHandle) {
        if let Ok(mut jobs) = self.state.jobs.lock() {
            jobs.retain(|j| !handle.matches(j));
        }
    }

    /// The five-step shutdown protocol of `spec.md` §4.1, plus a final join.
    ///
    /// Jobs already running when shutdown begins complete their current tick
    /// before the worker re-checks `running`.
    pub fn shutdown(&self) {
        tracing::debug!("shutting down ttl-cache background worker");
        {
            let mut jobs = self.state.jobs.lock().unwrap_or_else(|e| e.into_inner());
            jobs.clear();
            self.state.running.store(false, Ordering::SeqCst);
            let _guard = self.state.wait_lock.lock().unwrap_or_else(|e| e.into_inner());
            self.state.wait_cond.notify_all();
        }

        let handle = self.worker.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(handle) = handle {
            let _ = handle.join();
        }
    }
}

impl Default for JobRunner {
    fn default() -> Self {
        Self::new()
    }
}

fn run_loop(state: Arc<RunnerState>) {
    let mut backoff = INITIAL_BACKOFF;

    while state.running.load(Ordering::SeqCst) {
        let had_work = match state.jobs.lock() {
            Ok(jobs) => jobs.iter().fold(false, |acc, job| {
                let ran = job.run();
                if ran {
                    tracing::debug!(job = job.name(), "job reported work");
                }
                acc || ran
            }),
            Err(_) => {
                tracing::warn!("job list mutex poisoned; skipping this tick");
                false
            }
        };

        backoff = if had_work {
            INITIAL_BACKOFF
        } else {
            (backoff + Duration::from_secs(1)).min(state.max_backoff)
        };

        let guard = state.wait_lock.lock().unwrap_or_else(|e| e.into_inner());
        if !state.running.load(Ordering::SeqCst) {
            break;
        }
        let _ = state
            .wait_cond
            .wait_timeout_while(guard, backoff, |_| state.running.load(Ordering::SeqCst))
            .unwrap_or_else(|e| e.into_inner());
    }

    tracing::debug!("ttl-cache background worker exiting");
}

#[cfg(unix)]
fn lower_thread_priority_best_effort() {
    // Mirrors lwan_job_thread_init's `#ifdef SCHED_IDLE` block: best-effort,
    // failure is logged and never fatal. SCHED_IDLE is Linux-specific; on
    // other Unix targets `sched_setscheduler` simply isn't available at this
    // constant, so this is a no-op there too.
    #[cfg(target_os = "linux")]
    {
        let param = libc::sched_param { sched_priority: 0 };
        let rc = unsafe {
            libc::pthread_setschedparam(
                libc::pthread_self(),
                libc::SCHED_IDLE,
                &param as *const _,
            )
        };
        if rc != 0 {
            tracing::warn!(errno = rc, "failed to lower ttl-cache worker scheduling priority");
        }
    }
    #[cfg(not(target_os = "linux"))]
    {
        tracing::debug!("scheduling-priority lowering not supported on this platform");
    }
}

#[cfg(not(unix))]
fn lower_thread_priority_best_effort() {
    tracing::debug!("scheduling-priority lowering not supported on this platform");
}

//! Cleanup coordinator
//!
//! Stateless helpers shared by the worker entrypoint and the periodic
//! monitor. Everything here is fast, bounded, and idempotent; the
//! guaranteed reclamation in this subsystem is worker-process exit, and
//! these passes only shrink what the long-lived process retains in the
//! meantime.

use crate::logging::MetricsCollector;
use crate::model::ModelCache;

/// Reclamation passes for the soft-threshold path
pub const SOFT_RECLAIM_PASSES: usize = 2;

/// Reclamation passes for the critical-threshold path
pub const CRITICAL_RECLAIM_PASSES: usize = 4;

/// Reclamation passes a worker runs before exiting
pub const EXIT_RECLAIM_PASSES: usize = 2;

/// Metrics history entries kept after a critical cleanup
const CRITICAL_HISTORY_KEEP: usize = 0;

/// What one cleanup invocation did
#[derive(Debug, Clone, Copy, Default)]
pub struct CleanupOutcome {
    /// Models removed from the cache
    pub models_evicted: usize,

    /// Metrics history entries dropped
    pub history_dropped: usize,

    /// Allocator reclamation passes performed
    pub reclaim_passes: usize,
}

/// Ask the allocator to return freed pages to the operating system.
///
/// `N` is picked by caller urgency. Only glibc exposes this; elsewhere the
/// call is a no-op and reclamation waits for process exit.
pub fn reclaim_passes(n: usize) -> usize {
    for _ in 0..n {
        allocator_trim();
    }
    n
}

#[cfg(all(target_os = "linux", target_env = "gnu"))]
fn allocator_trim() {
    // SAFETY: malloc_trim touches only allocator bookkeeping.
    unsafe {
        libc::malloc_trim(0);
    }
}

#[cfg(not(all(target_os = "linux", target_env = "gnu")))]
fn allocator_trim() {}

/// Light cleanup for the soft threshold: evict idle models, then trim.
pub fn soft_cleanup(cache: &ModelCache, _metrics: &MetricsCollector) -> CleanupOutcome {
    let models_evicted = cache.evict_idle();
    let reclaim = reclaim_passes(SOFT_RECLAIM_PASSES);

    CleanupOutcome {
        models_evicted,
        history_dropped: 0,
        reclaim_passes: reclaim,
    }
}

/// Aggressive cleanup for the critical threshold: evict everything the
/// process retains that can be rebuilt, then trim harder.
pub fn critical_cleanup(cache: &ModelCache, metrics: &MetricsCollector) -> CleanupOutcome {
    reclaim_passes(1);
    let models_evicted = cache.evict_all();
    let history_dropped = metrics.trim_history(CRITICAL_HISTORY_KEEP);
    let reclaim = 1 + reclaim_passes(CRITICAL_RECLAIM_PASSES);

    CleanupOutcome {
        models_evicted,
        history_dropped,
        reclaim_passes: reclaim,
    }
}

/// Cleanup a worker runs right before exiting: evict its local cache and
/// trim. Process exit reclaims the rest unconditionally.
pub fn worker_exit_cleanup(cache: &ModelCache) -> CleanupOutcome {
    let models_evicted = cache.evict_all();
    let reclaim = reclaim_passes(EXIT_RECLAIM_PASSES);

    CleanupOutcome {
        models_evicted,
        history_dropped: 0,
        reclaim_passes: reclaim,
    }
}

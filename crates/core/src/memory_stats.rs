//! Cross-thread runtime statistics registry
//!
//! A single global set of lock-free counters covering the allocator, the
//! collector, and the coroutine/thread layers. Mutator threads update them
//! with relaxed atomic increments on their hot paths; the diagnostics dump
//! and the end-of-run report read them from whatever thread asks.
//!
//! Peak tracking uses the usual CAS loop so concurrent updates never lose a
//! high-water mark.

use std::sync::atomic::{AtomicU64, Ordering};

/// Global runtime counters. All updates are relaxed; these are diagnostics,
/// not synchronization.
#[derive(Debug)]
pub struct RuntimeStats {
    /// Cells handed out by the allocator over the process lifetime.
    pub cells_allocated: AtomicU64,
    /// Cells returned to the free lists by sweeps.
    pub cells_freed: AtomicU64,
    /// Completed collection cycles.
    pub collections: AtomicU64,
    /// Heap blocks currently mapped.
    pub heap_blocks: AtomicU64,
    /// Fibers ever created (main fibers included).
    pub fibers_spawned: AtomicU64,
    /// OS threads ever registered with the runtime.
    pub threads_spawned: AtomicU64,
    /// High-water mark of live threads.
    pub peak_threads: AtomicU64,
}

static STATS: RuntimeStats = RuntimeStats {
    cells_allocated: AtomicU64::new(0),
    cells_freed: AtomicU64::new(0),
    collections: AtomicU64::new(0),
    heap_blocks: AtomicU64::new(0),
    fibers_spawned: AtomicU64::new(0),
    threads_spawned: AtomicU64::new(0),
    peak_threads: AtomicU64::new(0),
};

/// The process-wide statistics registry.
pub fn stats() -> &'static RuntimeStats {
    &STATS
}

impl RuntimeStats {
    #[inline]
    pub fn count_allocation(&self) {
        self.cells_allocated.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn count_freed(&self, n: u64) {
        self.cells_freed.fetch_add(n, Ordering::Relaxed);
    }

    #[inline]
    pub fn count_collection(&self) {
        self.collections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn set_heap_blocks(&self, n: u64) {
        self.heap_blocks.store(n, Ordering::Relaxed);
    }

    #[inline]
    pub fn count_fiber(&self) {
        self.fibers_spawned.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a new thread and fold the live count into the peak.
    pub fn count_thread(&self, live_now: u64) {
        self.threads_spawned.fetch_add(1, Ordering::Relaxed);
        let mut peak = self.peak_threads.load(Ordering::Relaxed);
        while live_now > peak {
            match self.peak_threads.compare_exchange_weak(
                peak,
                live_now,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(current) => peak = current,
            }
        }
    }

    /// Point-in-time snapshot for reporting.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            cells_allocated: self.cells_allocated.load(Ordering::Relaxed),
            cells_freed: self.cells_freed.load(Ordering::Relaxed),
            collections: self.collections.load(Ordering::Relaxed),
            heap_blocks: self.heap_blocks.load(Ordering::Relaxed),
            fibers_spawned: self.fibers_spawned.load(Ordering::Relaxed),
            threads_spawned: self.threads_spawned.load(Ordering::Relaxed),
            peak_threads: self.peak_threads.load(Ordering::Relaxed),
        }
    }
}

/// Plain-data copy of the counters at one instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub cells_allocated: u64,
    pub cells_freed: u64,
    pub collections: u64,
    pub heap_blocks: u64,
    pub fibers_spawned: u64,
    pub threads_spawned: u64,
    pub peak_threads: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate() {
        let before = stats().snapshot();
        stats().count_allocation();
        stats().count_freed(3);
        stats().count_collection();
        let after = stats().snapshot();
        assert!(after.cells_allocated >= before.cells_allocated + 1);
        assert!(after.cells_freed >= before.cells_freed + 3);
        assert!(after.collections >= before.collections + 1);
    }

    #[test]
    fn peak_threads_never_decreases() {
        stats().count_thread(5);
        let peak_at_five = stats().snapshot().peak_threads;
        stats().count_thread(1);
        assert!(stats().snapshot().peak_threads >= peak_at_five);
    }
}

//! The collection driver.
//!
//! One cycle walks the state machine Idle → Marking(Roots) →
//! Marking(Closure) → Sweeping → Idle, entirely stop-the-world: the mutator
//! holds the heap mutably for the duration, so allocation and collection
//! never interleave. The terminal step of every cycle flips the white
//! generation, reinterpreting every survivor as white for the next cycle
//! without rewriting any state byte.

pub(crate) mod marker;
pub(crate) mod sweep;
pub(crate) mod worklist;

use std::time::{Duration, Instant};

use crate::heap::Heap;

/// Where the collector is inside a cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Phase {
    Idle,
    MarkingRoots,
    MarkingClosure,
    Sweeping,
}

/// Numbers from one collection cycle.
#[derive(Debug, Clone, Copy, Default)]
pub struct GcStats {
    /// Root slots examined.
    pub roots: usize,
    /// Cells grayed and scanned during marking.
    pub objects_marked: usize,
    /// Allocated cells inspected by the sweep (large objects included).
    pub cells_visited: usize,
    /// Cells found white and reclaimed (large objects included).
    pub cells_reclaimed: usize,
    /// Large object store entries inspected.
    pub large_seen: usize,
    /// Large objects released back to the OS.
    pub large_released: usize,
    /// Pages returned to their arena's free pool.
    pub pages_retired: usize,
    /// Time spent marking.
    pub mark_duration: Duration,
    /// Time spent sweeping.
    pub sweep_duration: Duration,
    /// Whole-cycle time.
    pub duration: Duration,
}

impl Heap {
    /// Runs a full synchronous collection. A no-op when re-entered from a
    /// finalizer or scan hook.
    pub fn collect(&mut self) {
        if self.phase != Phase::Idle {
            return;
        }
        self.collect_inner(false);
    }

    pub(crate) fn collect_inner(&mut self, shutting_down: bool) {
        let _span = crate::tracing::cycle_span(self.collections);
        let start = Instant::now();
        let mut stats = GcStats::default();

        if !shutting_down {
            let mark_start = Instant::now();
            let mut worklist = self.take_worklist();
            self.phase = Phase::MarkingRoots;
            marker::mark_roots(self, &mut worklist, &mut stats);
            self.phase = Phase::MarkingClosure;
            marker::process_worklist(self, &mut worklist, &mut stats);
            self.put_worklist(worklist);
            self.oneshot_ranges.clear();
            stats.mark_duration = mark_start.elapsed();
        }

        self.phase = Phase::Sweeping;
        let sweep_start = Instant::now();
        sweep::sweep(self, &mut stats);
        stats.sweep_duration = sweep_start.elapsed();

        // Black becomes white for the next cycle; only this flag changes.
        self.flip_white_gen();
        self.phase = Phase::Idle;
        self.reset_pressure();
        self.collections += 1;
        stats.duration = start.elapsed();
        self.last_gc = stats;
        crate::tracing::cycle_end(&stats);

        if shutting_down {
            let null_word = self.value_model().null_word;
            for slot in self.roots.iter() {
                // SAFETY: registered slots outlive their registration; the
                // shutdown contract nulls them before discarding the
                // registry.
                unsafe { slot.as_ptr().write(null_word) };
            }
            self.roots.clear();
            self.modules.clear();
            self.ranges.clear();
            self.oneshot_ranges.clear();
        }
    }

    /// Tears the heap down: a final rootless collection reclaims and
    /// finalizes every remaining cell, every registered root slot is
    /// overwritten with the value model's null word, and cumulative
    /// allocation counters are reported as diagnostic text.
    pub fn shutdown(mut self) {
        self.collect_inner(true);
        crate::tracing::shutdown_report(&self.allocation_stats());
    }
}

/// Runs a full collection on this thread's heap. See [`Heap::collect`].
pub fn collect() {
    crate::heap::with_heap(Heap::collect);
}

/// Numbers from this thread's heap's most recent collection.
#[must_use]
pub fn last_gc_stats() -> GcStats {
    crate::heap::with_heap(|heap| heap.last_gc_stats())
}

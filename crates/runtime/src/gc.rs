//! Mark and sweep
//!
//! Stop-the-world collection: park every cooperating thread, reset mark
//! state, gather roots (the global environment, the symbol table, every
//! thread's conservative stack range, every suspended fiber's saved
//! stack), trace with a worklist, then sweep unmarked cells back onto the
//! free lists.
//!
//! Marking is tri-state. `Unmarked` cells become `Marked` when discovered
//! and enter the worklist; they become `MarkedAndVisited` once their
//! children have been enumerated, which makes marking idempotent and keeps
//! cycles (class ⇄ metaclass ⇄ Class) finite.
//!
//! The collector never takes the global recursive lock: a mutator holding
//! it parks at its next safepoint, and with the world stopped there is
//! nothing left to race with.

use std::sync::atomic::{AtomicBool, Ordering};

use garnet_core::arch::spill_registers_and_call;
use garnet_core::memory_stats::stats;

use crate::global_env::GlobalEnv;
use crate::heap::{Cell, CellState, Heap};
use crate::safepoint;
use crate::symbol;
use crate::thread;
use crate::value::Value;

/// Tracer handed to `visit_children`. Carries the heap block snapshot for
/// conservative candidate tests and the mark worklist.
pub struct Visitor {
    ranges: Vec<(usize, usize)>,
    worklist: Vec<*mut Cell>,
}

impl Visitor {
    fn new(ranges: Vec<(usize, usize)>) -> Visitor {
        Visitor { ranges, worklist: Vec::new() }
    }

    /// Mark an exact reference. Null and immediate handles are ignored.
    pub fn visit(&mut self, value: Value) {
        if !value.is_pointer() {
            return;
        }
        self.visit_candidate(value.raw() as usize);
    }

    /// Mark a word that might be a cell pointer: it must land inside a
    /// known block, on a cell boundary, in a cell currently in use.
    pub fn visit_candidate(&mut self, candidate: usize) {
        if let Some(cell) = Heap::cell_from_candidate(&self.ranges, candidate) {
            let state = unsafe { (*cell).state() };
            if state == CellState::Unmarked {
                unsafe { (*cell).set_state(CellState::Marked) };
                self.worklist.push(cell);
            }
        }
    }

    /// Conservatively scan the words in `[low, high)`.
    pub fn visit_conservative_range(&mut self, low: usize, high: usize) {
        debug_assert!(low <= high, "stack range inverted");
        let mut addr = low;
        while addr + size_of::<usize>() <= high {
            let word = unsafe { *(addr as *const usize) };
            self.visit_candidate(word);
            addr += size_of::<usize>();
        }
    }

    fn trace(&mut self) {
        while let Some(cell) = self.worklist.pop() {
            unsafe {
                (*cell).set_state(CellState::MarkedAndVisited);
                (*(*cell).object_ptr()).visit_children(self);
            }
        }
    }
}

static COLLECTING: AtomicBool = AtomicBool::new(false);

/// Run a full collection, or record a pending one while the GC is
/// disabled.
pub fn collect() {
    let heap = Heap::the();
    if !heap.is_gc_enabled() {
        heap.note_pending_collection();
        return;
    }
    if COLLECTING.swap(true, Ordering::Acquire) {
        // Another thread owns this cycle; fall in at the safepoint.
        safepoint::check();
        return;
    }

    let _world = safepoint::stop_the_world();
    heap.unmark_all();

    // The collector's own registers and stack are roots too: the whole
    // mark phase runs under a register spill with our end-of-stack
    // recorded, exactly like a parked mutator.
    spill_registers_and_call(|sp| {
        thread::record_end_of_stack(sp as usize);
        let mut visitor = Visitor::new(heap.block_ranges());
        if GlobalEnv::is_booted() {
            GlobalEnv::the().visit_roots(&mut visitor);
        }
        symbol::visit_all(&mut visitor);
        thread::visit_threads(&mut visitor);
        visitor.trace();
    });

    heap.sweep();
    heap.ensure_headroom();
    stats().count_collection();
    COLLECTING.store(false, Ordering::Release);
}

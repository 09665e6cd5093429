//! The cell heap
//!
//! A linked list of blocks, each holding a fixed number of equally-sized
//! cells with a free list threaded through the unused ones. A cell is the
//! [`Object`] storage itself plus a state byte; a `Value` pointing at an
//! object is the cell address, which is what makes conservative candidate
//! tests cheap (block containment + cell alignment + in-use state).
//!
//! Newly allocated cells start `Marked`, not `Unmarked`: a mutator can
//! allocate mid-collection, after the collector has already walked the
//! stack slot that holds the only reference, and a fresh `Unmarked` cell
//! would be swept before initialization finished. The cost is that every
//! cell survives at least one cycle.

use std::alloc::{Layout, alloc, dealloc};
use std::cell::UnsafeCell;
use std::mem::MaybeUninit;
use std::sync::OnceLock;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU32, AtomicUsize, Ordering};

use garnet_core::memory_stats::stats;
use parking_lot::Mutex;

use crate::config;
use crate::object::Object;
use crate::safepoint;
use crate::value::Value;

pub const CELLS_PER_BLOCK: usize = 400;
const MIN_AVAIL_RATIO: f64 = 0.1;
const MIN_AVAIL_AFTER_COLLECTION_RATIO: f64 = 0.2;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[repr(u8)]
pub enum CellState {
    Unused = 0,
    Unmarked = 1,
    Marked = 2,
    MarkedAndVisited = 3,
}

impl CellState {
    fn from_u8(raw: u8) -> CellState {
        match raw {
            0 => CellState::Unused,
            1 => CellState::Unmarked,
            2 => CellState::Marked,
            3 => CellState::MarkedAndVisited,
            _ => unreachable!("corrupt cell state"),
        }
    }
}

#[repr(C)]
pub struct Cell {
    // Object storage first: the cell address IS the object address. While
    // the cell is unused, the first word of this area threads the free
    // list.
    data: UnsafeCell<MaybeUninit<Object>>,
    state: AtomicU8,
    collectible: AtomicBool,
}

impl Cell {
    pub fn state(&self) -> CellState {
        CellState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn set_state(&self, state: CellState) {
        self.state.store(state as u8, Ordering::Release);
    }

    pub fn is_collectible(&self) -> bool {
        self.collectible.load(Ordering::Relaxed)
    }

    pub fn object_ptr(&self) -> *mut Object {
        self.data.get() as *mut Object
    }

    fn free_link(&self) -> *mut *mut Cell {
        self.data.get() as *mut *mut Cell
    }
}

#[repr(C)]
struct HeapBlock {
    next: *mut HeapBlock,
    free_list: *mut Cell,
    free_count: usize,
    cells: [Cell; CELLS_PER_BLOCK],
}

impl HeapBlock {
    /// Map a fresh block with every cell on its free list.
    fn create() -> *mut HeapBlock {
        let layout = Layout::new::<HeapBlock>();
        let block = unsafe { alloc(layout) } as *mut HeapBlock;
        if block.is_null() {
            eprintln!("garnet: out of memory allocating a heap block");
            std::process::abort();
        }
        unsafe {
            (*block).next = std::ptr::null_mut();
            (*block).free_list = std::ptr::null_mut();
            (*block).free_count = CELLS_PER_BLOCK;
            for i in 0..CELLS_PER_BLOCK {
                let cell = &raw mut (*block).cells[i];
                (*cell).state = AtomicU8::new(CellState::Unused as u8);
                (*cell).collectible = AtomicBool::new(false);
                *(*cell).free_link() = (*block).free_list;
                (*block).free_list = cell;
            }
        }
        block
    }

    fn cells_base(&self) -> usize {
        self.cells.as_ptr() as usize
    }
}

struct HeapInner {
    first_block: *mut HeapBlock,
    block_count: usize,
    total_cells: usize,
    free_cells: usize,
}

unsafe impl Send for HeapInner {}

pub struct Heap {
    inner: Mutex<HeapInner>,
    disable_count: AtomicU32,
    pending_collection: AtomicBool,
    start_of_stack: AtomicUsize,
}

unsafe impl Sync for Heap {}

static THE_HEAP: OnceLock<Heap> = OnceLock::new();

impl Heap {
    /// Build the process heap. `start_of_stack` is the top of the booting
    /// thread's stack, used by the collector and the fiber direction
    /// assert. Idempotent.
    pub fn init(start_of_stack: usize) {
        THE_HEAP.get_or_init(|| {
            let block = HeapBlock::create();
            stats().set_heap_blocks(1);
            Heap {
                inner: Mutex::new(HeapInner {
                    first_block: block,
                    block_count: 1,
                    total_cells: CELLS_PER_BLOCK,
                    free_cells: CELLS_PER_BLOCK,
                }),
                disable_count: AtomicU32::new(0),
                pending_collection: AtomicBool::new(false),
                start_of_stack: AtomicUsize::new(start_of_stack),
            }
        });
    }

    pub fn the() -> &'static Heap {
        THE_HEAP.get().expect("heap used before Heap::init")
    }

    pub fn is_initialized() -> bool {
        THE_HEAP.get().is_some()
    }

    pub fn start_of_stack(&self) -> usize {
        self.start_of_stack.load(Ordering::Relaxed)
    }

    /// Allocate a collectible cell. This is a safepoint and may trigger a
    /// collection first.
    pub fn allocate(&self, object: Object) -> Value {
        self.allocate_with(object, true)
    }

    /// Allocate a durable cell (nil/true/false, interned symbols): never
    /// swept, skipped by the collector's free pass.
    pub fn allocate_durable(&self, object: Object) -> Value {
        self.allocate_with(object, false)
    }

    fn allocate_with(&self, object: Object, collectible: bool) -> Value {
        safepoint::check();
        if self.is_gc_enabled() && (config::the().gc_stress || self.free_ratio() < MIN_AVAIL_RATIO) {
            crate::gc::collect();
        }

        let mut inner = self.inner.lock();
        let cell = match self.pop_free_cell(&mut inner) {
            Some(cell) => cell,
            None => {
                self.append_block(&mut inner);
                self.pop_free_cell(&mut inner).expect("fresh block had no free cell")
            }
        };
        inner.free_cells -= 1;
        drop(inner);

        unsafe {
            let cell_ref = &*cell;
            cell_ref.object_ptr().write(object);
            cell_ref.collectible.store(collectible, Ordering::Relaxed);
            // Marked, not Unmarked; see module docs.
            cell_ref.set_state(CellState::Marked);
            stats().count_allocation();
            Value::from_obj_ptr(cell_ref.object_ptr())
        }
    }

    fn pop_free_cell(&self, inner: &mut HeapInner) -> Option<*mut Cell> {
        let mut block = inner.first_block;
        while !block.is_null() {
            unsafe {
                if !(*block).free_list.is_null() {
                    let cell = (*block).free_list;
                    (*block).free_list = *(*cell).free_link();
                    (*block).free_count -= 1;
                    return Some(cell);
                }
                block = (*block).next;
            }
        }
        None
    }

    fn append_block(&self, inner: &mut HeapInner) {
        let block = HeapBlock::create();
        unsafe {
            (*block).next = inner.first_block;
        }
        inner.first_block = block;
        inner.block_count += 1;
        inner.total_cells += CELLS_PER_BLOCK;
        inner.free_cells += CELLS_PER_BLOCK;
        stats().set_heap_blocks(inner.block_count as u64);
    }

    pub fn free_ratio(&self) -> f64 {
        let inner = self.inner.lock();
        if inner.total_cells == 0 { 1.0 } else { inner.free_cells as f64 / inner.total_cells as f64 }
    }

    /// Snapshot of every block's cell range, for conservative candidate
    /// tests while the world is stopped.
    pub(crate) fn block_ranges(&self) -> Vec<(usize, usize)> {
        let inner = self.inner.lock();
        let mut ranges = Vec::with_capacity(inner.block_count);
        let mut block = inner.first_block;
        while !block.is_null() {
            unsafe {
                let base = (*block).cells_base();
                ranges.push((base, base + CELLS_PER_BLOCK * size_of::<Cell>()));
                block = (*block).next;
            }
        }
        ranges
    }

    /// Map a conservative candidate word to an in-use cell, or None.
    pub fn cell_from_candidate(ranges: &[(usize, usize)], candidate: usize) -> Option<*mut Cell> {
        for &(base, end) in ranges {
            if candidate >= base && candidate < end && (candidate - base) % size_of::<Cell>() == 0 {
                let cell = candidate as *mut Cell;
                if unsafe { (*cell).state() } != CellState::Unused {
                    return Some(cell);
                }
                return None;
            }
        }
        None
    }

    /// Reset every in-use cell to `Unmarked`. Durable cells are unmarked
    /// too (they are all rooted and re-marked during trace); only sweep
    /// consults the collectible flag.
    pub(crate) fn unmark_all(&self) {
        self.for_each_used_cell(|cell| cell.set_state(CellState::Unmarked));
    }

    /// Free every cell still `Unmarked`: run its destructor (closing fds,
    /// unmapping fiber stacks, releasing VoidP cleanups) and thread it back
    /// onto its block's free list. Returns the number of cells freed.
    pub(crate) fn sweep(&self) -> usize {
        let mut inner = self.inner.lock();
        let mut freed = 0;
        let mut block = inner.first_block;
        while !block.is_null() {
            unsafe {
                for i in 0..CELLS_PER_BLOCK {
                    let cell = &(*block).cells[i];
                    if cell.state() == CellState::Unmarked && cell.is_collectible() {
                        std::ptr::drop_in_place(cell.object_ptr());
                        cell.set_state(CellState::Unused);
                        let cell_ptr = cell as *const Cell as *mut Cell;
                        *(*cell_ptr).free_link() = (*block).free_list;
                        (*block).free_list = cell_ptr;
                        (*block).free_count += 1;
                        freed += 1;
                    }
                }
                block = (*block).next;
            }
        }
        inner.free_cells += freed;
        stats().count_freed(freed as u64);
        freed
    }

    /// Post-collection headroom rule: if availability is still poor, grow
    /// by a block before mutators resume.
    pub(crate) fn ensure_headroom(&self) {
        let mut inner = self.inner.lock();
        let ratio = if inner.total_cells == 0 {
            1.0
        } else {
            inner.free_cells as f64 / inner.total_cells as f64
        };
        if ratio < MIN_AVAIL_AFTER_COLLECTION_RATIO {
            self.append_block(&mut inner);
        }
    }

    fn for_each_used_cell<F: FnMut(&Cell)>(&self, mut f: F) {
        let inner = self.inner.lock();
        let mut block = inner.first_block;
        while !block.is_null() {
            unsafe {
                for i in 0..CELLS_PER_BLOCK {
                    let cell = &(*block).cells[i];
                    if cell.state() != CellState::Unused {
                        f(cell);
                    }
                }
                block = (*block).next;
            }
        }
    }

    // Enable/disable. Disable nests; a collection requested while disabled
    // runs as soon as the counter returns to zero.

    pub fn is_gc_enabled(&self) -> bool {
        self.disable_count.load(Ordering::Relaxed) == 0
    }

    pub fn gc_disable(&self) {
        self.disable_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn gc_enable(&self) {
        let previous = self.disable_count.fetch_sub(1, Ordering::Relaxed);
        assert!(previous > 0, "gc_enable without matching gc_disable");
        if previous == 1 && self.pending_collection.swap(false, Ordering::Relaxed) {
            crate::gc::collect();
        }
    }

    pub(crate) fn note_pending_collection(&self) {
        self.pending_collection.store(true, Ordering::Relaxed);
    }

    pub fn heap_stats(&self) -> HeapStats {
        let inner = self.inner.lock();
        HeapStats {
            blocks: inner.block_count,
            total_cells: inner.total_cells,
            free_cells: inner.free_cells,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeapStats {
    pub blocks: usize,
    pub total_cells: usize,
    pub free_cells: usize,
}

impl Drop for HeapInner {
    fn drop(&mut self) {
        // Process teardown; blocks are returned wholesale without running
        // per-cell destructors.
        let mut block = self.first_block;
        while !block.is_null() {
            let next = unsafe { (*block).next };
            unsafe { dealloc(block as *mut u8, Layout::new::<HeapBlock>()) };
            block = next;
        }
    }
}

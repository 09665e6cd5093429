//! Safepoints and the stop-the-world protocol
//!
//! The collector may only run while every other cooperating thread is
//! either *parked* (it noticed the stop flag at a safepoint) or *safe*
//! (it entered a blocking region: registers spilled, end-of-stack
//! recorded, sitting in a syscall with a frozen stack). Mutators hit
//! safepoints at allocation, on fiber switches, and wherever they call
//! [`check`] explicitly.
//!
//! All state transitions go through one mutex so the collector's count is
//! never torn; the fast path in [`check`] is a single relaxed load.

use std::sync::atomic::{AtomicBool, Ordering};

use garnet_core::arch::spill_registers_and_call;
use parking_lot::{Condvar, Mutex};

use crate::thread;

static STOP_WORLD: AtomicBool = AtomicBool::new(false);

struct ParkState {
    registered: usize,
    parked: usize,
    safe: usize,
}

static PARK: Mutex<ParkState> = Mutex::new(ParkState { registered: 0, parked: 0, safe: 0 });
static PARK_CV: Condvar = Condvar::new();

/// A thread joins the cooperating set (bootstrap and `Thread.new`).
pub fn register_thread() {
    PARK.lock().registered += 1;
}

/// A thread leaves the cooperating set on death. Must not be called while
/// the thread still allocates.
pub fn unregister_thread() {
    let mut state = PARK.lock();
    state.registered -= 1;
    PARK_CV.notify_all();
}

/// The safepoint: cheap when the world is running, parks when a collection
/// is pending. Registers are spilled to the stack before parking so the
/// collector's conservative scan sees them.
#[inline]
pub fn check() {
    if STOP_WORLD.load(Ordering::Acquire) {
        park_current();
    }
}

fn park_current() {
    spill_registers_and_call(|sp| {
        thread::record_end_of_stack(sp as usize);
        let mut state = PARK.lock();
        state.parked += 1;
        PARK_CV.notify_all();
        while STOP_WORLD.load(Ordering::Acquire) {
            PARK_CV.wait(&mut state);
        }
        state.parked -= 1;
    });
}

/// Run `f` (a blocking syscall or long wait) as a GC-safe region. The
/// thread's registers are spilled and its end-of-stack recorded first, so
/// the collector can scan it while `f` blocks. `f` must not touch the
/// heap.
pub fn blocking_region<R>(f: impl FnOnce() -> R) -> R {
    let mut result = None;
    spill_registers_and_call(|sp| {
        thread::record_end_of_stack(sp as usize);
        {
            let mut state = PARK.lock();
            state.safe += 1;
            PARK_CV.notify_all();
        }
        let value = f();
        let mut state = PARK.lock();
        state.safe -= 1;
        // If a collection started while we were blocked, wait it out
        // before touching the runtime again.
        while STOP_WORLD.load(Ordering::Acquire) {
            state.parked += 1;
            PARK_CV.notify_all();
            while STOP_WORLD.load(Ordering::Acquire) {
                PARK_CV.wait(&mut state);
            }
            state.parked -= 1;
        }
        drop(state);
        result = Some(value);
    });
    result.expect("blocking region did not run")
}

/// Collector side: raise the stop flag and wait until every other
/// cooperating thread is parked or safe. The guard resumes the world on
/// drop.
pub(crate) fn stop_the_world() -> WorldStopGuard {
    let mut state = PARK.lock();
    STOP_WORLD.store(true, Ordering::Release);
    while state.parked + state.safe + 1 < state.registered {
        PARK_CV.wait(&mut state);
    }
    WorldStopGuard
}

pub(crate) struct WorldStopGuard;

impl Drop for WorldStopGuard {
    fn drop(&mut self) {
        let _state = PARK.lock();
        STOP_WORLD.store(false, Ordering::Release);
        PARK_CV.notify_all();
    }
}

/// True while a collection owns the world; used by asserts.
pub fn world_is_stopped() -> bool {
    STOP_WORLD.load(Ordering::Acquire)
}

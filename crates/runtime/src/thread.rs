//! Threads
//!
//! OS threads wrapped in Thread cells. Each thread records its pthread id
//! and stack bounds, runs on an implicit main fiber, and carries: a
//! pending-exception slot filled by cross-thread `raise`, an interrupt
//! pipe watched by every blocking `select`, a sleep mutex/condvar pair,
//! and the set of Thread::Mutex cells it currently owns (released on
//! death, before the thread leaves the list).
//!
//! The thread list is a GC root and lives behind its own non-recursive
//! lock, as does each thread's mutex set.

use std::sync::Once;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use garnet_core::memory_stats::stats;
use parking_lot::{Condvar, Mutex};

use crate::args::Args;
use crate::block::Block;
use crate::env::Env;
use crate::exception::{self, Location};
use crate::fiber;
use crate::gc::Visitor;
use crate::global_env::GlobalEnv;
use crate::hash;
use crate::heap::Heap;
use crate::object::{Object, Payload};
use crate::safepoint;
use crate::symbol::intern;
use crate::time_obj;
use crate::value::Value;
use crate::{Result, Unwind};

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[repr(u8)]
pub enum ThreadStatus {
    Created = 0,
    Active = 1,
    Dead = 2,
}

pub struct ThreadPayload {
    join_handle: Mutex<Option<std::thread::JoinHandle<()>>>,
    pthread: AtomicU64,
    status: AtomicU8,
    sleeping: AtomicBool,
    joined: AtomicBool,
    killed: AtomicBool,
    pub start_of_stack: AtomicUsize,
    pub end_of_stack: AtomicUsize,
    pub block: Option<Block>,
    pub value: Value,
    pub exception: Value,
    pending_exception: Mutex<Value>,
    /// Fiber-local storage hash, created on first write.
    pub storage: Value,
    owned_mutexes: Mutex<Vec<Value>>,
    interrupt_read: i32,
    interrupt_write: i32,
    sleep_lock: Mutex<()>,
    sleep_cv: Condvar,
    wake_generation: AtomicU64,
    pub current_fiber: Value,
    pub main_fiber: Value,
    pub group: Value,
    pub is_main: bool,
}

impl ThreadPayload {
    fn new(block: Option<Block>, is_main: bool) -> ThreadPayload {
        let (read_fd, write_fd) = make_interrupt_pipe();
        ThreadPayload {
            join_handle: Mutex::new(None),
            pthread: AtomicU64::new(0),
            status: AtomicU8::new(ThreadStatus::Created as u8),
            sleeping: AtomicBool::new(false),
            joined: AtomicBool::new(false),
            killed: AtomicBool::new(false),
            start_of_stack: AtomicUsize::new(0),
            end_of_stack: AtomicUsize::new(0),
            block,
            value: Value::NULL,
            exception: Value::NULL,
            pending_exception: Mutex::new(Value::NULL),
            storage: Value::NULL,
            owned_mutexes: Mutex::new(Vec::new()),
            interrupt_read: read_fd,
            interrupt_write: write_fd,
            sleep_lock: Mutex::new(()),
            sleep_cv: Condvar::new(),
            wake_generation: AtomicU64::new(0),
            current_fiber: Value::NULL,
            main_fiber: Value::NULL,
            group: Value::NULL,
            is_main,
        }
    }

    pub fn status(&self) -> ThreadStatus {
        match self.status.load(Ordering::Acquire) {
            0 => ThreadStatus::Created,
            1 => ThreadStatus::Active,
            2 => ThreadStatus::Dead,
            _ => unreachable!("corrupt thread status"),
        }
    }

    pub fn set_status(&self, status: ThreadStatus) {
        self.status.store(status as u8, Ordering::Release);
    }

    pub fn is_sleeping(&self) -> bool {
        self.sleeping.load(Ordering::Relaxed)
    }

    pub fn pthread_id(&self) -> libc::pthread_t {
        self.pthread.load(Ordering::Acquire) as libc::pthread_t
    }

    pub fn visit(&self, visitor: &mut Visitor) {
        if let Some(block) = &self.block {
            block.visit(visitor);
        }
        visitor.visit(self.value);
        visitor.visit(self.exception);
        visitor.visit(*self.pending_exception.lock());
        visitor.visit(self.storage);
        for mutex in self.owned_mutexes.lock().iter() {
            visitor.visit(*mutex);
        }
        visitor.visit(self.current_fiber);
        visitor.visit(self.main_fiber);
        visitor.visit(self.group);
        // The running fiber's frames live between the recorded
        // end-of-stack and the current fiber's stack top.
        if self.status() == ThreadStatus::Active {
            let low = self.end_of_stack.load(Ordering::Acquire);
            let high = self.start_of_stack.load(Ordering::Acquire);
            if low != 0 && low < high {
                visitor.visit_conservative_range(low, high);
            }
        }
    }
}

impl Drop for ThreadPayload {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.interrupt_read);
            libc::close(self.interrupt_write);
        }
    }
}

fn make_interrupt_pipe() -> (i32, i32) {
    let mut fds = [0i32; 2];
    let rc = unsafe { libc::pipe(fds.as_mut_ptr()) };
    if rc != 0 {
        eprintln!("garnet: cannot create thread interrupt pipe");
        std::process::abort();
    }
    for fd in fds {
        unsafe {
            let flags = libc::fcntl(fd, libc::F_GETFL);
            libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK);
        }
    }
    (fds[0], fds[1])
}

// The wake signal: an empty SIGINT handler installed without SA_RESTART,
// so pthread_kill(SIGINT) makes a blocking syscall in the target return
// EINTR and re-check its pending-exception slot.

static WAKE_HANDLER: Once = Once::new();

extern "C" fn wake_handler(_sig: libc::c_int) {}

pub(crate) fn install_wake_handler() {
    WAKE_HANDLER.call_once(|| unsafe {
        let mut action: libc::sigaction = std::mem::zeroed();
        action.sa_sigaction = wake_handler as usize;
        action.sa_flags = 0;
        libc::sigemptyset(&mut action.sa_mask);
        libc::sigaction(libc::SIGINT, &action, std::ptr::null_mut());
    });
}

// Registry.

static THREAD_LIST: Mutex<Vec<Value>> = Mutex::new(Vec::new());

thread_local! {
    static CURRENT: std::cell::Cell<Value> = const { std::cell::Cell::new(Value::NULL) };
}

pub fn current_thread() -> Value {
    let current = CURRENT.with(|c| c.get());
    assert!(!current.is_null(), "no runtime thread on this OS thread");
    current
}

pub fn current_thread_opt() -> Option<Value> {
    let current = CURRENT.with(|c| c.get());
    if current.is_null() { None } else { Some(current) }
}

pub fn main_thread() -> Value {
    GlobalEnv::the().main_thread()
}

/// Live threads, main first.
pub fn list() -> Vec<Value> {
    THREAD_LIST
        .lock()
        .iter()
        .copied()
        .filter(|t| t.object().thread().status() != ThreadStatus::Dead)
        .collect()
}

pub(crate) fn visit_threads(visitor: &mut Visitor) {
    for thread in THREAD_LIST.lock().iter() {
        visitor.visit(*thread);
    }
}

fn remove_from_list(thread: Value) {
    THREAD_LIST.lock().retain(|t| *t != thread);
}

/// Record where the current thread's stack ends (its deepest scanned
/// word). Called with registers already spilled. A no-op before the
/// runtime thread exists.
pub(crate) fn record_end_of_stack(sp: usize) {
    if let Some(thread) = current_thread_opt() {
        thread.object().thread().end_of_stack.store(sp, Ordering::Release);
    }
}

/// Fiber switches move the thread's bounds with control.
pub(crate) fn set_current_fiber(fiber_value: Value, stack_top: usize) {
    let thread = current_thread();
    let mut obj = thread.object();
    let payload = obj.thread_mut();
    payload.current_fiber = fiber_value;
    payload.start_of_stack.store(stack_top, Ordering::Release);
}

pub fn current_interrupt_fd() -> Option<i32> {
    current_thread_opt().map(|t| t.object().thread().interrupt_read)
}

pub(crate) fn drain_interrupt(fd: i32) {
    let mut buf = [0u8; 64];
    loop {
        let n = unsafe { libc::read(fd, buf.as_mut_ptr() as *mut libc::c_void, buf.len()) };
        if n <= 0 {
            break;
        }
    }
}

/// Poke every live thread's interrupt pipe (IO close does this).
pub fn interrupt_all() {
    for thread in list() {
        poke(thread);
    }
}

fn poke(thread: Value) {
    let payload = thread.object();
    let t = payload.thread();
    let byte = [1u8];
    unsafe { libc::write(t.interrupt_write, byte.as_ptr() as *const libc::c_void, 1) };
    t.wake_generation.fetch_add(1, Ordering::Release);
    t.sleep_cv.notify_all();
}

/// Raise the current thread's pending exception, if one arrived. Checked
/// at every suspension point.
pub fn check_pending(env: &mut Env) -> Result<(), Unwind> {
    let Some(thread) = current_thread_opt() else { return Ok(()) };
    let pending = {
        let obj = thread.object();
        std::mem::replace(&mut *obj.thread().pending_exception.lock(), Value::NULL)
    };
    if pending.is_null() {
        return Ok(());
    }
    Err(env.raise_exception(pending))
}

// Stack bounds (Linux).

pub(crate) fn current_stack_bounds() -> (usize, usize) {
    unsafe {
        let mut attr: libc::pthread_attr_t = std::mem::zeroed();
        let rc = libc::pthread_getattr_np(libc::pthread_self(), &mut attr);
        assert_eq!(rc, 0, "pthread_getattr_np failed");
        let mut addr: *mut libc::c_void = std::ptr::null_mut();
        let mut size: libc::size_t = 0;
        libc::pthread_attr_getstack(&attr, &mut addr, &mut size);
        libc::pthread_attr_destroy(&mut attr);
        let low = addr as usize;
        (low + size, low)
    }
}

// Lifecycle.

/// Build the main thread cell during bootstrap: records this OS thread's
/// bounds, builds its main fiber, and registers it with the safepoint
/// protocol.
pub(crate) fn build_main_thread(thread_class: Value) -> Value {
    install_wake_handler();
    let (top, low) = current_stack_bounds();
    let mut payload = ThreadPayload::new(None, true);
    payload.pthread = AtomicU64::new(unsafe { libc::pthread_self() } as u64);
    payload.start_of_stack = AtomicUsize::new(top);
    payload.end_of_stack = AtomicUsize::new(low);
    payload.set_status(ThreadStatus::Active);

    let thread = Heap::the().allocate_durable(Object::new(thread_class, Payload::Thread(Box::new(payload))));
    THREAD_LIST.lock().push(thread);
    CURRENT.with(|c| c.set(thread));
    safepoint::register_thread();
    stats().count_thread(1);

    let main_fiber = fiber::make_main_fiber(top);
    {
        let mut obj = thread.object();
        let t = obj.thread_mut();
        t.main_fiber = main_fiber;
        t.current_fiber = main_fiber;
    }
    thread
}

/// Re-home the main thread cell onto the calling OS thread if this thread
/// has no runtime identity yet. Embedders (and the test harness) may drive
/// the runtime from successive host threads; only one such unregistered
/// thread may be active at a time, and the previous one must have left the
/// runtime quiescent.
pub(crate) fn adopt_main_thread_if_needed(main: Value) {
    if main.is_null() || current_thread_opt().is_some() {
        return;
    }
    let (top, low) = current_stack_bounds();
    {
        let obj = main.object();
        let t = obj.thread();
        t.pthread.store(unsafe { libc::pthread_self() } as u64, Ordering::Release);
        t.start_of_stack.store(top, Ordering::Release);
        t.end_of_stack.store(low, Ordering::Release);
    }
    {
        let mut obj = main.object();
        let t = obj.thread_mut();
        t.current_fiber = t.main_fiber;
    }
    let main_fiber = main.object().thread().main_fiber;
    if !main_fiber.is_null() {
        main_fiber.object().fiber_mut().start_of_stack = top;
    }
    CURRENT.with(|c| c.set(main));
}

/// `Thread.new(&block)`.
pub fn thread_new(env: &mut Env, block: Block) -> Result {
    let klass = GlobalEnv::the().thread_class();
    let payload = ThreadPayload::new(Some(block), false);
    let thread = Heap::the().allocate(Object::new(klass, Payload::Thread(Box::new(payload))));
    thread.object().thread_mut().group = GlobalEnv::the().default_thread_group();

    // On the list before the OS thread exists: the cell must be a GC root
    // from the moment the child can run.
    THREAD_LIST.lock().push(thread);
    stats().count_thread(list().len() as u64);

    let raw = thread.raw();
    let handle = match std::thread::Builder::new().spawn(move || thread_bootstrap(Value::from_raw(raw))) {
        Ok(handle) => handle,
        Err(_) => {
            remove_from_list(thread);
            return Err(env.raise("ThreadError", "can't create Thread"));
        }
    };
    *thread.object().thread().join_handle.lock() = Some(handle);
    Ok(thread)
}

fn thread_bootstrap(thread: Value) {
    CURRENT.with(|c| c.set(thread));
    safepoint::register_thread();

    let (top, low) = current_stack_bounds();
    {
        let obj = thread.object();
        let t = obj.thread();
        t.pthread.store(unsafe { libc::pthread_self() } as u64, Ordering::Release);
        t.start_of_stack.store(top, Ordering::Release);
        t.end_of_stack.store(low, Ordering::Release);
    }

    let main_fiber = fiber::make_main_fiber(top);
    {
        let mut obj = thread.object();
        let t = obj.thread_mut();
        t.main_fiber = main_fiber;
        t.current_fiber = main_fiber;
        t.set_status(ThreadStatus::Active);
    }

    let block = thread.object().thread().block.clone().expect("thread without a block");
    let mut env = Env::new();
    let result = block.run(&mut env, &[], None);

    {
        let mut obj = thread.object();
        let t = obj.thread_mut();
        match result {
            Ok(value) => t.value = value,
            Err(Unwind(exc)) => {
                // A kill unwind is a clean death; anything else is stored
                // and re-raised by join/value.
                if exc.object().exception().exit_status.is_some() || t.killed.load(Ordering::Acquire) {
                    t.value = Value::NULL;
                } else {
                    t.exception = exc;
                }
            }
        }
    }

    finish_thread(thread);
}

/// Death bookkeeping: release owned mutexes, flip to Dead, leave the list
/// and the safepoint set.
fn finish_thread(thread: Value) {
    unlock_owned_mutexes(thread);
    thread.object().thread().set_status(ThreadStatus::Dead);
    remove_from_list(thread);
    safepoint::unregister_thread();
}

fn unlock_owned_mutexes(thread: Value) {
    let owned: Vec<Value> = {
        let obj = thread.object();
        let mut set = obj.thread().owned_mutexes.lock();
        std::mem::take(&mut *set)
    };
    for mutex in owned {
        crate::mutex::force_unlock(mutex);
    }
}

pub(crate) fn add_owned_mutex(thread: Value, mutex: Value) {
    thread.object().thread().owned_mutexes.lock().push(mutex);
}

pub(crate) fn remove_owned_mutex(thread: Value, mutex: Value) {
    thread.object().thread().owned_mutexes.lock().retain(|m| *m != mutex);
}

pub fn owns_mutex(thread: Value, mutex: Value) -> bool {
    thread.object().thread().owned_mutexes.lock().contains(&mutex)
}

// If the thread status is still Created we may race its bootstrap; give
// it a chance to come up before joining or signaling. The spin is a
// safepoint: the target may be parked for a collection we must not stall.
fn wait_until_running(thread: Value) {
    while thread.object().thread().status() == ThreadStatus::Created {
        safepoint::check();
        std::thread::yield_now();
    }
}

/// `Thread#join`.
pub fn join(env: &mut Env, thread: Value) -> Result {
    if Some(thread) == current_thread_opt() {
        return Err(env.raise("ThreadError", "Target thread must not be current thread"));
    }
    if thread.object().thread().is_main {
        return Err(env.raise("ThreadError", "Target thread must not be main thread"));
    }
    wait_until_running(thread);

    let handle = thread.object().thread().join_handle.lock().take();
    if let Some(handle) = handle {
        let _ = safepoint::blocking_region(|| handle.join());
        thread.object().thread().joined.store(true, Ordering::Release);
    }
    check_pending(env)?;
    Ok(thread)
}

/// `Thread#value`: join, then the block's result, or the stored
/// exception, re-raised here.
pub fn thread_value(env: &mut Env, thread: Value) -> Result {
    join(env, thread)?;
    let (value, exc) = {
        let obj = thread.object();
        let t = obj.thread();
        (t.value, t.exception)
    };
    if !exc.is_null() {
        return Err(env.raise_exception(exc));
    }
    Ok(if value.is_null() { GlobalEnv::the().nil_obj() } else { value })
}

/// Cross-thread `raise`: store the pending exception and deliver an
/// interrupt so the target observes it at its next suspension point.
pub fn thread_raise(env: &mut Env, thread: Value, klass: Option<Value>, message: String) -> Result {
    let exc_class = klass.unwrap_or_else(|| exception::exception_class("RuntimeError"));
    let exc = exception::new_exception(exc_class, crate::string::new_string(&message));

    if Some(thread) == current_thread_opt() {
        return Err(env.raise_exception(exc));
    }

    wait_until_running(thread);
    {
        let obj = thread.object();
        *obj.thread().pending_exception.lock() = exc;
    }
    poke(thread);
    let target = thread.object().thread().pthread_id();
    if target != 0 {
        unsafe { libc::pthread_kill(target, libc::SIGINT) };
    }
    Ok(GlobalEnv::the().nil_obj())
}

/// `Thread#kill`: a kill unwind that reads as a clean death.
pub fn kill(env: &mut Env, thread: Value) -> Result {
    if thread.object().thread().is_main {
        return Err(exception::system_exit(env, 0));
    }
    thread.object().thread().killed.store(true, Ordering::Release);
    let exc_class = exception::exception_class("SystemExit");
    thread_raise(env, thread, Some(exc_class), "killed".to_string())?;
    Ok(thread)
}

/// `Kernel#sleep`. Returns the number of whole seconds actually slept.
/// Negative timeouts sleep until `wakeup` or interrupt.
pub fn sleep(env: &mut Env, seconds: f64) -> Result {
    let thread = current_thread();
    let started = time_obj::monotonic_seconds();
    let deadline = if seconds < 0.0 { None } else { Some(started + seconds) };

    let obj = thread.object();
    let t = obj.thread();
    t.sleeping.store(true, Ordering::Relaxed);
    let start_generation = t.wake_generation.load(Ordering::Acquire);

    let result = loop {
        if t.wake_generation.load(Ordering::Acquire) != start_generation {
            break Ok(());
        }
        if let Some(deadline) = deadline {
            let now = time_obj::monotonic_seconds();
            if now >= deadline {
                break Ok(());
            }
            let remaining = Duration::from_secs_f64(deadline - now);
            safepoint::blocking_region(|| {
                let mut guard = t.sleep_lock.lock();
                let _ = t.sleep_cv.wait_for(&mut guard, remaining);
            });
        } else {
            safepoint::blocking_region(|| {
                let mut guard = t.sleep_lock.lock();
                t.sleep_cv.wait(&mut guard);
            });
        }
        if let Err(unwind) = check_pending(env) {
            break Err(unwind);
        }
    };
    t.sleeping.store(false, Ordering::Relaxed);
    result?;
    // A wakeup and a pending exception can arrive together; the exception
    // wins.
    check_pending(env)?;

    let elapsed = time_obj::monotonic_seconds() - started;
    Ok(Value::integer(elapsed as i64))
}

/// `Thread#wakeup`.
pub fn wakeup(env: &mut Env, thread: Value) -> Result {
    if thread.object().thread().status() == ThreadStatus::Dead {
        return Err(env.raise("ThreadError", "killed thread"));
    }
    wait_until_running(thread);
    poke(thread);
    Ok(thread)
}

/// `Thread.pass`: yield the scheduler; also a cancellation point.
pub fn pass(env: &mut Env) -> Result {
    check_pending(env)?;
    safepoint::check();
    std::thread::yield_now();
    Ok(GlobalEnv::the().nil_obj())
}

// Fiber-local storage.

pub fn storage_get(env: &mut Env, thread: Value, key: Value) -> Result {
    key.expect_symbol(env)?;
    let storage = thread.object().thread().storage;
    if storage.is_null() {
        return Ok(GlobalEnv::the().nil_obj());
    }
    hash::hash_get(env, storage, key)
}

pub fn storage_set(env: &mut Env, thread: Value, key: Value, value: Value) -> Result {
    key.expect_symbol(env)?;
    let storage = {
        let existing = thread.object().thread().storage;
        if existing.is_null() {
            let fresh = hash::new_hash();
            thread.object().thread_mut().storage = fresh;
            fresh
        } else {
            existing
        }
    };
    hash::hash_set(env, storage, key, value)
}

/// `Thread#status`: `"run"`, `"sleep"`, `false` for a clean death, `nil`
/// for death by exception.
pub fn status_value(thread: Value) -> Value {
    let obj = thread.object();
    let t = obj.thread();
    match t.status() {
        ThreadStatus::Created => crate::string::new_string("run"),
        ThreadStatus::Active => {
            crate::string::new_string(if t.is_sleeping() { "sleep" } else { "run" })
        }
        ThreadStatus::Dead => {
            if t.exception.is_null() {
                Value::from_bool(false)
            } else {
                GlobalEnv::the().nil_obj()
            }
        }
    }
}

// ThreadGroup and Thread::Backtrace::Location payloads.

pub struct ThreadGroupPayload {
    pub enclosed: bool,
}

pub fn new_thread_group() -> Value {
    let klass = GlobalEnv::the().thread_group_class();
    Heap::the().allocate(Object::new(klass, Payload::ThreadGroup(ThreadGroupPayload { enclosed: false })))
}

pub fn group_members(group: Value) -> Vec<Value> {
    list().into_iter().filter(|t| t.object().thread().group == group).collect()
}

pub struct LocationPayload {
    pub location: Location,
}

pub fn new_backtrace_location(location: Location) -> Value {
    let klass = GlobalEnv::the().backtrace_location_class();
    Heap::the().allocate(Object::new(klass, Payload::BacktraceLocation(Box::new(LocationPayload { location }))))
}

// Native methods.

fn thread_s_new(env: &mut Env, _self: Value, _args: Args, block: Option<&Block>) -> Result {
    let Some(block) = block else {
        return Err(env.raise("ThreadError", "must be called with a block"));
    };
    thread_new(env, block.clone())
}

fn thread_s_current(_env: &mut Env, _self: Value, _args: Args, _block: Option<&Block>) -> Result {
    Ok(current_thread())
}

fn thread_s_main(_env: &mut Env, _self: Value, _args: Args, _block: Option<&Block>) -> Result {
    Ok(main_thread())
}

fn thread_s_list(_env: &mut Env, _self: Value, _args: Args, _block: Option<&Block>) -> Result {
    Ok(crate::array::new_array(list()))
}

fn thread_s_pass(env: &mut Env, _self: Value, _args: Args, _block: Option<&Block>) -> Result {
    pass(env)
}

fn thread_s_stop(env: &mut Env, _self: Value, _args: Args, _block: Option<&Block>) -> Result {
    sleep(env, -1.0)?;
    Ok(GlobalEnv::the().nil_obj())
}

fn thread_join(env: &mut Env, self_: Value, _args: Args, _block: Option<&Block>) -> Result {
    join(env, self_)
}

fn thread_value_m(env: &mut Env, self_: Value, _args: Args, _block: Option<&Block>) -> Result {
    thread_value(env, self_)
}

fn thread_status(_env: &mut Env, self_: Value, _args: Args, _block: Option<&Block>) -> Result {
    Ok(status_value(self_))
}

fn thread_alive(_env: &mut Env, self_: Value, _args: Args, _block: Option<&Block>) -> Result {
    Ok(Value::from_bool(self_.object().thread().status() != ThreadStatus::Dead))
}

fn thread_stop_p(_env: &mut Env, self_: Value, _args: Args, _block: Option<&Block>) -> Result {
    let obj = self_.object();
    let t = obj.thread();
    Ok(Value::from_bool(t.is_sleeping() || t.status() == ThreadStatus::Dead))
}

fn thread_raise_m(env: &mut Env, self_: Value, args: Args, _block: Option<&Block>) -> Result {
    let (klass, message) = match (args.at(0), args.at(1)) {
        (None, _) => (None, "unhandled exception".to_string()),
        (Some(first), second) => {
            if first.is_string() {
                (None, first.object().string().to_rust_string())
            } else if first.is_class() {
                let message = match second {
                    Some(m) if m.is_string() => m.object().string().to_rust_string(),
                    _ => crate::kernel::class_name(first),
                };
                (Some(first), message)
            } else {
                return Err(env.raise("TypeError", "exception class/object expected"));
            }
        }
    };
    thread_raise(env, self_, klass, message)
}

fn thread_wakeup(env: &mut Env, self_: Value, _args: Args, _block: Option<&Block>) -> Result {
    wakeup(env, self_)
}

fn thread_kill_m(env: &mut Env, self_: Value, _args: Args, _block: Option<&Block>) -> Result {
    kill(env, self_)
}

fn thread_ref(env: &mut Env, self_: Value, args: Args, _block: Option<&Block>) -> Result {
    storage_get(env, self_, args.at_or_nil(0))
}

fn thread_refeq(env: &mut Env, self_: Value, args: Args, _block: Option<&Block>) -> Result {
    storage_set(env, self_, args.at_or_nil(0), args.at_or_nil(1))
}

fn thread_group_m(_env: &mut Env, self_: Value, _args: Args, _block: Option<&Block>) -> Result {
    let group = self_.object().thread().group;
    Ok(if group.is_null() { GlobalEnv::the().nil_obj() } else { group })
}

fn group_list(_env: &mut Env, self_: Value, _args: Args, _block: Option<&Block>) -> Result {
    Ok(crate::array::new_array(group_members(self_)))
}

fn kernel_sleep(env: &mut Env, _self: Value, args: Args, _block: Option<&Block>) -> Result {
    let seconds = match args.at(0) {
        None => -1.0,
        Some(v) if v.is_integer() => v.integer_value() as f64,
        Some(v) => match &v.object().payload {
            Payload::Float(f) => *f,
            _ => return Err(env.raise("TypeError", "can't convert into time interval")),
        },
    };
    sleep(env, seconds)
}

pub fn install(env: &mut Env) -> Result<(), Unwind> {
    let genv = GlobalEnv::the();
    let thread_class = genv.thread_class();
    let group_class = genv.thread_group_class();
    let object = genv.object_class();

    crate::klass::define_singleton_method(env, thread_class, intern("new"), thread_s_new, -1)?;
    crate::klass::define_singleton_method(env, thread_class, intern("current"), thread_s_current, 0)?;
    crate::klass::define_singleton_method(env, thread_class, intern("main"), thread_s_main, 0)?;
    crate::klass::define_singleton_method(env, thread_class, intern("list"), thread_s_list, 0)?;
    crate::klass::define_singleton_method(env, thread_class, intern("pass"), thread_s_pass, 0)?;
    crate::klass::define_singleton_method(env, thread_class, intern("stop"), thread_s_stop, 0)?;

    crate::klass::define_method(env, thread_class, intern("join"), thread_join, 0)?;
    crate::klass::define_method(env, thread_class, intern("value"), thread_value_m, 0)?;
    crate::klass::define_method(env, thread_class, intern("status"), thread_status, 0)?;
    crate::klass::define_method(env, thread_class, intern("alive?"), thread_alive, 0)?;
    crate::klass::define_method(env, thread_class, intern("stop?"), thread_stop_p, 0)?;
    crate::klass::define_method(env, thread_class, intern("raise"), thread_raise_m, -1)?;
    crate::klass::define_method(env, thread_class, intern("wakeup"), thread_wakeup, 0)?;
    crate::klass::define_method(env, thread_class, intern("run"), thread_wakeup, 0)?;
    crate::klass::define_method(env, thread_class, intern("kill"), thread_kill_m, 0)?;
    crate::klass::define_method(env, thread_class, intern("[]"), thread_ref, 1)?;
    crate::klass::define_method(env, thread_class, intern("[]="), thread_refeq, 2)?;
    crate::klass::define_method(env, thread_class, intern("group"), thread_group_m, 0)?;

    crate::klass::define_method(env, group_class, intern("list"), group_list, 0)?;

    crate::klass::define_method(env, object, intern("sleep"), kernel_sleep, -1)?;

    Ok(())
}

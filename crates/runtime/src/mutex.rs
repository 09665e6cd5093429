//! Thread::Mutex and Thread::ConditionVariable
//!
//! A mutex cell wraps a raw lock plus the recorded owner (thread and
//! fiber). Double-lock by the owner and unlock by a non-owner both raise
//! `ThreadError`. Owned mutexes are tracked on the owning thread so death
//! releases them before the thread leaves the list.

use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::lock_api::RawMutex as RawMutexApi;
use parking_lot::{Condvar, Mutex, RawMutex};

use crate::args::Args;
use crate::block::{Block, run_block_with_break};
use crate::env::Env;
use crate::gc::Visitor;
use crate::global_env::GlobalEnv;
use crate::heap::Heap;
use crate::object::{Object, Payload};
use crate::safepoint;
use crate::symbol::intern;
use crate::thread;
use crate::value::Value;
use crate::{Result, Unwind};

pub struct MutexPayload {
    raw: RawMutex,
    owner_thread: AtomicU64,
    owner_fiber: AtomicU64,
}

impl MutexPayload {
    fn new() -> MutexPayload {
        MutexPayload {
            raw: <RawMutex as RawMutexApi>::INIT,
            owner_thread: AtomicU64::new(0),
            owner_fiber: AtomicU64::new(0),
        }
    }

    pub fn is_locked(&self) -> bool {
        self.raw.is_locked()
    }

    fn owner(&self) -> Value {
        Value::from_raw(self.owner_thread.load(Ordering::Acquire))
    }

    fn set_owner(&self, thread_value: Value, fiber_value: Value) {
        self.owner_thread.store(thread_value.raw(), Ordering::Release);
        self.owner_fiber.store(fiber_value.raw(), Ordering::Release);
    }

    fn clear_owner(&self) {
        self.owner_thread.store(0, Ordering::Release);
        self.owner_fiber.store(0, Ordering::Release);
    }

    pub fn visit(&self, visitor: &mut Visitor) {
        visitor.visit(self.owner());
        visitor.visit(Value::from_raw(self.owner_fiber.load(Ordering::Acquire)));
    }
}

fn payload(mutex: Value) -> &'static MutexPayload {
    let obj = mutex.object();
    match &obj.payload {
        Payload::ThreadMutex(m) => unsafe { &*(m.as_ref() as *const MutexPayload) },
        _ => panic!("expected a Thread::Mutex cell"),
    }
}

pub fn new_mutex() -> Value {
    let klass = GlobalEnv::the().mutex_class();
    Heap::the().allocate(Object::new(klass, Payload::ThreadMutex(Box::new(MutexPayload::new()))))
}

/// `Mutex#lock`: blocking; re-locking by the owning thread raises.
pub fn lock(env: &mut Env, mutex: Value) -> Result {
    let current = thread::current_thread();
    let m = payload(mutex);
    if m.owner() == current {
        return Err(env.raise("ThreadError", "deadlock; recursive locking"));
    }
    safepoint::blocking_region(|| m.raw.lock());
    m.set_owner(current, crate::fiber::current_fiber());
    thread::add_owned_mutex(current, mutex);
    thread::check_pending(env)?;
    Ok(mutex)
}

/// `Mutex#try_lock`.
pub fn try_lock(_env: &mut Env, mutex: Value) -> Result<bool, Unwind> {
    let current = thread::current_thread();
    let m = payload(mutex);
    if m.raw.try_lock() {
        m.set_owner(current, crate::fiber::current_fiber());
        thread::add_owned_mutex(current, mutex);
        Ok(true)
    } else {
        Ok(false)
    }
}

/// `Mutex#unlock`: only the owner may release.
pub fn unlock(env: &mut Env, mutex: Value) -> Result {
    let current = thread::current_thread();
    let m = payload(mutex);
    if !m.is_locked() {
        return Err(env.raise("ThreadError", "Attempt to unlock a mutex which is not locked"));
    }
    if m.owner() != current {
        return Err(env.raise(
            "ThreadError",
            "Attempt to unlock a mutex which is locked by another thread/fiber",
        ));
    }
    m.clear_owner();
    thread::remove_owned_mutex(current, mutex);
    unsafe { m.raw.unlock() };
    Ok(mutex)
}

/// Release without ownership checks; the dying-thread path.
pub(crate) fn force_unlock(mutex: Value) {
    let m = payload(mutex);
    if m.is_locked() {
        m.clear_owner();
        unsafe { m.raw.unlock() };
    }
}

/// `Mutex#synchronize`: acquire, run the block, release on every exit
/// path.
pub fn synchronize(env: &mut Env, mutex: Value, block: &Block) -> Result {
    lock(env, mutex)?;
    let result = run_block_with_break(env, block, &[]);
    let unlock_result = unlock(env, mutex);
    match (result, unlock_result) {
        (Err(unwind), _) => Err(unwind),
        (Ok(_), Err(unwind)) => Err(unwind),
        (Ok(value), Ok(_)) => Ok(value),
    }
}

pub fn is_owned(mutex: Value) -> bool {
    match thread::current_thread_opt() {
        Some(current) => payload(mutex).owner() == current,
        None => false,
    }
}

// Condition variables: an internal lock/condvar pair plus a generation
// counter, so `signal` before `wait` re-checks cannot be lost to a stale
// wakeup.

pub struct CondVarPayload {
    lock: Mutex<()>,
    cv: Condvar,
    generation: AtomicU64,
}

impl CondVarPayload {
    fn new() -> CondVarPayload {
        CondVarPayload { lock: Mutex::new(()), cv: Condvar::new(), generation: AtomicU64::new(0) }
    }
}

fn condvar_payload(condvar: Value) -> &'static CondVarPayload {
    let obj = condvar.object();
    match &obj.payload {
        Payload::ThreadCondVar(c) => unsafe { &*(c.as_ref() as *const CondVarPayload) },
        _ => panic!("expected a Thread::ConditionVariable cell"),
    }
}

pub fn new_condvar() -> Value {
    let klass = GlobalEnv::the().condvar_class();
    Heap::the().allocate(Object::new(klass, Payload::ThreadCondVar(Box::new(CondVarPayload::new()))))
}

/// `ConditionVariable#wait(mutex)`: atomically release the caller's mutex,
/// wait for a signal (or timeout), and re-acquire.
pub fn condvar_wait(env: &mut Env, condvar: Value, mutex: Value, timeout: Option<f64>) -> Result {
    let c = condvar_payload(condvar);
    let start_generation = c.generation.load(Ordering::Acquire);
    unlock(env, mutex)?;

    safepoint::blocking_region(|| {
        let mut guard = c.lock.lock();
        while c.generation.load(Ordering::Acquire) == start_generation {
            match timeout {
                Some(seconds) => {
                    let timed_out = c
                        .cv
                        .wait_for(&mut guard, std::time::Duration::from_secs_f64(seconds))
                        .timed_out();
                    if timed_out {
                        break;
                    }
                }
                None => c.cv.wait(&mut guard),
            }
        }
    });

    lock(env, mutex)?;
    thread::check_pending(env)?;
    Ok(condvar)
}

pub fn condvar_signal(condvar: Value) {
    let c = condvar_payload(condvar);
    c.generation.fetch_add(1, Ordering::Release);
    let _guard = c.lock.lock();
    c.cv.notify_one();
}

pub fn condvar_broadcast(condvar: Value) {
    let c = condvar_payload(condvar);
    c.generation.fetch_add(1, Ordering::Release);
    let _guard = c.lock.lock();
    c.cv.notify_all();
}

// Native methods.

fn mutex_s_new(_env: &mut Env, _self: Value, _args: Args, _block: Option<&Block>) -> Result {
    Ok(new_mutex())
}

fn mutex_lock(env: &mut Env, self_: Value, _args: Args, _block: Option<&Block>) -> Result {
    lock(env, self_)
}

fn mutex_unlock(env: &mut Env, self_: Value, _args: Args, _block: Option<&Block>) -> Result {
    unlock(env, self_)
}

fn mutex_try_lock(env: &mut Env, self_: Value, _args: Args, _block: Option<&Block>) -> Result {
    Ok(Value::from_bool(try_lock(env, self_)?))
}

fn mutex_locked(_env: &mut Env, self_: Value, _args: Args, _block: Option<&Block>) -> Result {
    Ok(Value::from_bool(payload(self_).is_locked()))
}

fn mutex_owned(_env: &mut Env, self_: Value, _args: Args, _block: Option<&Block>) -> Result {
    Ok(Value::from_bool(is_owned(self_)))
}

fn mutex_synchronize(env: &mut Env, self_: Value, _args: Args, block: Option<&Block>) -> Result {
    let Some(block) = block else {
        return Err(env.raise("ThreadError", "must be called with a block"));
    };
    synchronize(env, self_, block)
}

fn condvar_s_new(_env: &mut Env, _self: Value, _args: Args, _block: Option<&Block>) -> Result {
    Ok(new_condvar())
}

fn condvar_wait_m(env: &mut Env, self_: Value, args: Args, _block: Option<&Block>) -> Result {
    args.ensure_argc_between(env, 1, 2)?;
    let mutex = args.at_or_nil(0);
    let timeout = match args.at(1) {
        None => None,
        Some(v) if v.is_nil() => None,
        Some(v) if v.is_integer() => Some(v.integer_value() as f64),
        Some(v) => match &v.object().payload {
            Payload::Float(f) => Some(*f),
            _ => return Err(env.raise("TypeError", "timeout must be numeric")),
        },
    };
    condvar_wait(env, self_, mutex, timeout)
}

fn condvar_signal_m(_env: &mut Env, self_: Value, _args: Args, _block: Option<&Block>) -> Result {
    condvar_signal(self_);
    Ok(self_)
}

fn condvar_broadcast_m(_env: &mut Env, self_: Value, _args: Args, _block: Option<&Block>) -> Result {
    condvar_broadcast(self_);
    Ok(self_)
}

pub fn install(env: &mut Env) -> Result<(), Unwind> {
    let genv = GlobalEnv::the();
    let mutex_class = genv.mutex_class();
    let condvar_class = genv.condvar_class();

    crate::klass::define_singleton_method(env, mutex_class, intern("new"), mutex_s_new, 0)?;
    crate::klass::define_method(env, mutex_class, intern("lock"), mutex_lock, 0)?;
    crate::klass::define_method(env, mutex_class, intern("unlock"), mutex_unlock, 0)?;
    crate::klass::define_method(env, mutex_class, intern("try_lock"), mutex_try_lock, 0)?;
    crate::klass::define_method(env, mutex_class, intern("locked?"), mutex_locked, 0)?;
    crate::klass::define_method(env, mutex_class, intern("owned?"), mutex_owned, 0)?;
    crate::klass::define_method(env, mutex_class, intern("synchronize"), mutex_synchronize, 0)?;

    crate::klass::define_singleton_method(env, condvar_class, intern("new"), condvar_s_new, 0)?;
    crate::klass::define_method(env, condvar_class, intern("wait"), condvar_wait_m, -2)?;
    crate::klass::define_method(env, condvar_class, intern("signal"), condvar_signal_m, 0)?;
    crate::klass::define_method(env, condvar_class, intern("broadcast"), condvar_broadcast_m, 0)?;

    Ok(())
}

//! Fibers
//!
//! Stackful coroutines: each fiber owns an mmap'd stack seeded with a
//! trampoline frame, and switching exchanges callee-saved registers and
//! stack pointers through the arch layer. On every switch the owning
//! thread's current-fiber slot and recorded stack bounds move with
//! control, so the collector always walks the stack that is actually
//! running and the saved region of everything suspended.
//!
//! Values are delivered through each fiber's `args` slot: `resume` writes
//! the target's slot, `yield` writes the parent's, and whichever side
//! wakes up reads its own.

use std::sync::atomic::{AtomicU8, Ordering};

use garnet_core::arch::{Context, seed_switch_frame, stack_switch};
use garnet_core::memory_stats::stats;
use garnet_core::stack::CoroutineStack;

use crate::args::Args;
use crate::block::Block;
use crate::config;
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

pub const DEFAULT_STACK_SIZE: usize = 1024 * 1024;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[repr(u8)]
pub enum FiberStatus {
    Created = 0,
    Active = 1,
    Suspended = 2,
    Terminated = 3,
}

pub struct FiberPayload {
    pub stack: Option<CoroutineStack>,
    pub context: Context,
    /// High bound of this fiber's stack; the thread's bounds while it
    /// runs.
    pub start_of_stack: usize,
    status: AtomicU8,
    pub block: Option<Block>,
    pub args: Vec<Value>,
    /// The fiber that resumed us; control returns there on yield or
    /// termination.
    pub previous: Value,
    pub error: Value,
    pub is_main: bool,
}

impl FiberPayload {
    pub fn status(&self) -> FiberStatus {
        match self.status.load(Ordering::Acquire) {
            0 => FiberStatus::Created,
            1 => FiberStatus::Active,
            2 => FiberStatus::Suspended,
            3 => FiberStatus::Terminated,
            _ => unreachable!("corrupt fiber status"),
        }
    }

    pub fn set_status(&self, status: FiberStatus) {
        self.status.store(status as u8, Ordering::Release);
    }

    pub fn is_alive(&self) -> bool {
        self.status() != FiberStatus::Terminated
    }

    pub fn take_args(&mut self) -> Vec<Value> {
        std::mem::take(&mut self.args)
    }

    pub fn visit(&self, visitor: &mut Visitor) {
        if let Some(block) = &self.block {
            block.visit(visitor);
        }
        for arg in &self.args {
            visitor.visit(*arg);
        }
        visitor.visit(self.previous);
        visitor.visit(self.error);
        // A suspended fiber's frames live only in its saved stack region;
        // walk [saved SP, start_of_stack). The active fiber is covered by
        // its thread's bounds instead.
        if self.status() == FiberStatus::Suspended && !self.context.sp.is_null() {
            visitor.visit_conservative_range(self.context.sp as usize, self.start_of_stack);
        }
    }
}

/// Create a fiber cell around a block. The stack is mapped immediately; an
/// explicit size of zero is rejected.
pub fn new_fiber(env: &mut Env, block: Block, stack_size: Option<usize>) -> Result {
    if stack_size == Some(0) {
        return Err(env.raise("ArgumentError", "fiber stack size must be positive"));
    }
    let size = stack_size.unwrap_or_else(|| config::the().fiber_stack_size);
    // CoroutineStack asserts the down-growing stack direction this runtime
    // requires.
    let stack = CoroutineStack::new(size).map_err(|_| env.raise_errno())?;

    let context = unsafe { seed_switch_frame(stack.top(), fiber_entry) };
    let start_of_stack = stack.top() as usize;
    let payload = FiberPayload {
        stack: Some(stack),
        context,
        start_of_stack,
        status: AtomicU8::new(FiberStatus::Created as u8),
        block: Some(block),
        args: Vec::new(),
        previous: Value::NULL,
        error: Value::NULL,
        is_main: false,
    };
    stats().count_fiber();
    let klass = GlobalEnv::the().fiber_class();
    Ok(Heap::the().allocate(Object::new(klass, Payload::Fiber(Box::new(payload)))))
}

/// The implicit fiber a thread starts on; its stack is the thread's.
pub(crate) fn make_main_fiber(thread_stack_top: usize) -> Value {
    let payload = FiberPayload {
        stack: None,
        context: Context::empty(),
        start_of_stack: thread_stack_top,
        status: AtomicU8::new(FiberStatus::Active as u8),
        block: None,
        args: Vec::new(),
        previous: Value::NULL,
        error: Value::NULL,
        is_main: true,
    };
    stats().count_fiber();
    let klass = GlobalEnv::the().fiber_class();
    Heap::the().allocate_durable(Object::new(klass, Payload::Fiber(Box::new(payload))))
}

pub fn current_fiber() -> Value {
    thread::current_thread().object().thread().current_fiber
}

fn pack_args(values: Vec<Value>) -> Value {
    match values.len() {
        0 => GlobalEnv::the().nil_obj(),
        1 => values[0],
        _ => crate::array::new_array(values),
    }
}

/// `Fiber#resume`: transfer control into the fiber, delivering `args` at
/// its suspension point (or as block arguments on first entry).
pub fn resume(env: &mut Env, fiber: Value, args: &[Value]) -> Result {
    let current = current_fiber();
    {
        let mut obj = fiber.object();
        let payload = obj.fiber_mut();
        match payload.status() {
            FiberStatus::Terminated => return Err(env.raise("FiberError", "dead fiber called")),
            FiberStatus::Active => return Err(env.raise("FiberError", "double resume")),
            FiberStatus::Created | FiberStatus::Suspended => {}
        }
        payload.previous = current;
        payload.args = args.to_vec();
    }

    switch_to(current, fiber);

    // Control is back: something yielded to us or the fiber terminated.
    let delivered = current.object().fiber_mut().take_args();
    let error = {
        let mut obj = fiber.object();
        let payload = obj.fiber_mut();
        let error = payload.error;
        payload.error = Value::NULL;
        error
    };
    if !error.is_null() {
        return Err(env.raise_exception(error));
    }
    Ok(pack_args(delivered))
}

/// `Fiber.yield`: transfer control back to the parent, delivering `args`
/// as the parent's `resume` result.
pub fn fiber_yield(env: &mut Env, args: &[Value]) -> Result {
    let current = current_fiber();
    let previous = {
        let obj = current.object();
        let payload = obj.fiber();
        if payload.is_main {
            return Err(env.raise("FiberError", "can't yield from root fiber"));
        }
        payload.previous
    };
    previous.object().fiber_mut().args = args.to_vec();

    switch_to(current, previous);

    // Resumed again; read what resume delivered.
    let delivered = current.object().fiber_mut().take_args();
    Ok(pack_args(delivered))
}

/// Swap register state and stack pointers, updating the thread's
/// current-fiber slot and stack bounds first so the collector walks the
/// right stack. A fiber switch is a safepoint.
fn switch_to(from: Value, to: Value) {
    safepoint::check();

    {
        let from_payload = from.object();
        if from_payload.fiber().status() != FiberStatus::Terminated {
            from_payload.fiber().set_status(FiberStatus::Suspended);
        }
        to.object().fiber().set_status(FiberStatus::Active);
    }

    let to_top = to.object().fiber().start_of_stack;
    thread::set_current_fiber(to, to_top);

    let save: *mut Context;
    let load: *const Context;
    {
        let mut from_obj = from.object();
        save = &mut from_obj.fiber_mut().context as *mut Context;
        let to_obj = to.object();
        load = &to_obj.fiber().context as *const Context;
    }
    unsafe { stack_switch(save, load) };
}

/// First frame of every non-main fiber. Runs the block, records the
/// outcome, marks the fiber terminated, and yields control back to the
/// resumer. Never returns; the seeded guard aborts if it somehow does.
extern "C" fn fiber_entry() -> ! {
    let mut env = Env::new();
    let fiber = current_fiber();

    let (block, args) = {
        let mut obj = fiber.object();
        let payload = obj.fiber_mut();
        let block = payload.block.clone().expect("fiber entered without a block");
        let args = payload.take_args();
        (block, args)
    };

    let result = block.run(&mut env, &args, None);

    let previous = fiber.object().fiber().previous;
    {
        let mut obj = fiber.object();
        let payload = obj.fiber_mut();
        match result {
            Ok(value) => {
                previous.object().fiber_mut().args = vec![value];
            }
            Err(Unwind(exc)) => {
                payload.error = exc;
            }
        }
        payload.set_status(FiberStatus::Terminated);
    }

    switch_to(fiber, previous);
    unreachable!("terminated fiber resumed");
}

pub fn status_symbol(fiber: Value) -> Value {
    match fiber.object().fiber().status() {
        FiberStatus::Created => intern("created"),
        FiberStatus::Active => intern("active"),
        FiberStatus::Suspended => intern("suspended"),
        FiberStatus::Terminated => intern("terminated"),
    }
}

// Native methods.

fn fiber_s_new(env: &mut Env, _self: Value, args: Args, block: Option<&Block>) -> Result {
    let Some(block) = block else {
        return Err(env.raise("ArgumentError", "tried to create a Fiber without a block"));
    };
    let stack_size = match args.at(0) {
        None => None,
        Some(v) if v.is_integer() => {
            let n = v.integer_value();
            if n < 0 {
                return Err(env.raise("ArgumentError", "fiber stack size must be positive"));
            }
            Some(n as usize)
        }
        Some(_) => return Err(env.raise("TypeError", "stack size must be an Integer")),
    };
    new_fiber(env, block.clone(), stack_size)
}

fn fiber_s_yield(env: &mut Env, _self: Value, args: Args, _block: Option<&Block>) -> Result {
    fiber_yield(env, args.slice())
}

fn fiber_s_current(_env: &mut Env, _self: Value, _args: Args, _block: Option<&Block>) -> Result {
    Ok(current_fiber())
}

fn fiber_resume(env: &mut Env, self_: Value, args: Args, _block: Option<&Block>) -> Result {
    resume(env, self_, args.slice())
}

fn fiber_alive(_env: &mut Env, self_: Value, _args: Args, _block: Option<&Block>) -> Result {
    Ok(Value::from_bool(self_.object().fiber().is_alive()))
}

fn fiber_status(_env: &mut Env, self_: Value, _args: Args, _block: Option<&Block>) -> Result {
    Ok(status_symbol(self_))
}

pub fn install(env: &mut Env) -> Result<(), Unwind> {
    let fiber_class = GlobalEnv::the().fiber_class();
    crate::klass::define_singleton_method(env, fiber_class, intern("new"), fiber_s_new, -1)?;
    crate::klass::define_singleton_method(env, fiber_class, intern("yield"), fiber_s_yield, -1)?;
    crate::klass::define_singleton_method(env, fiber_class, intern("current"), fiber_s_current, 0)?;
    crate::klass::define_method(env, fiber_class, intern("resume"), fiber_resume, -1)?;
    crate::klass::define_method(env, fiber_class, intern("alive?"), fiber_alive, 0)?;
    crate::klass::define_method(env, fiber_class, intern("status"), fiber_status, 0)?;
    Ok(())
}

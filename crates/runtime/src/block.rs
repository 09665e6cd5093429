//! Blocks and Procs
//!
//! A `Block` is a function pointer plus the scope it closed over, the
//! `self` it runs with, a lambda flag, and an optional break-point id. A
//! `Proc` cell is just a block promoted to the heap.
//!
//! Break routing: every block invocation that can be a `break` target
//! pushes a fresh break-point id; `break` raises a local-jump exception
//! tagged with the innermost id, and the matching invoker converts it back
//! into an ordinary return value. Anything unmatched keeps unwinding.

use std::cell::RefCell;
use std::sync::atomic::{AtomicI64, Ordering};

use crate::args::Args;
use crate::env::Env;
use crate::exception::{self, LocalJumpKind};
use crate::gc::Visitor;
use crate::global_env::GlobalEnv;
use crate::heap::Heap;
use crate::object::{Object, ObjectType, Payload};
use crate::value::Value;
use crate::{Result, Unwind};

pub type BlockFn = fn(&mut Env, Value, Args, Option<&Block>) -> Result;

#[derive(Clone)]
pub struct Block {
    fn_: BlockFn,
    env: Env,
    self_: Value,
    pub arity: i32,
    pub is_lambda: bool,
    from_method: bool,
}

static NEXT_BREAK_POINT: AtomicI64 = AtomicI64::new(1);

thread_local! {
    static BREAK_STACK: RefCell<Vec<i64>> = const { RefCell::new(Vec::new()) };
}

pub fn next_break_point() -> i64 {
    NEXT_BREAK_POINT.fetch_add(1, Ordering::Relaxed)
}

/// The innermost active break target on this thread, if any.
pub fn current_break_point() -> Option<i64> {
    BREAK_STACK.with(|s| s.borrow().last().copied())
}

struct BreakScope;

impl BreakScope {
    fn push(bp: i64) -> BreakScope {
        BREAK_STACK.with(|s| s.borrow_mut().push(bp));
        BreakScope
    }
}

impl Drop for BreakScope {
    fn drop(&mut self) {
        BREAK_STACK.with(|s| {
            s.borrow_mut().pop();
        });
    }
}

impl Block {
    /// Capture a block in `env`. The captured scope shares local slots with
    /// the original, so the closure observes later mutation.
    pub fn new(env: &Env, self_: Value, arity: i32, fn_: BlockFn) -> Block {
        let mut captured = env.clone();
        captured.set_block(None);
        Block { fn_, env: captured, self_, arity, is_lambda: false, from_method: false }
    }

    pub fn lambda(env: &Env, self_: Value, arity: i32, fn_: BlockFn) -> Block {
        let mut block = Block::new(env, self_, arity, fn_);
        block.is_lambda = true;
        block
    }

    /// Mark a block lifted off a Method object (`Method#to_proc`); such
    /// blocks keep the method's bound `self` when re-installed.
    pub fn mark_from_method(&mut self) {
        self.from_method = true;
    }

    pub fn is_from_method(&self) -> bool {
        self.from_method
    }

    pub fn self_(&self) -> Value {
        self.self_
    }

    pub fn set_self(&mut self, self_: Value) {
        self.self_ = self_;
    }

    pub fn env(&self) -> &Env {
        &self.env
    }

    /// The raw function pointer; `define_method(&block)` copies it into the
    /// method record.
    pub fn fn_ptr(&self) -> BlockFn {
        self.fn_
    }

    /// Invoke with proc semantics: excess arguments dropped, missing ones
    /// nil, a single array auto-splatted. Lambdas check strictly instead.
    /// Lambdas also absorb their own `break`/`return` unwinds.
    pub fn run(&self, env: &mut Env, args: &[Value], passed_block: Option<&Block>) -> Result {
        let mut scope = Env::with_outer(&self.env);
        scope.set_block(passed_block);
        scope.set_location(env.file(), env.line());

        if self.is_lambda {
            self.check_lambda_arity(&mut scope, args)?;
            let bp = next_break_point();
            let _guard = BreakScope::push(bp);
            let result = (self.fn_)(&mut scope, self.self_, Args::new(args), passed_block);
            return match result {
                Err(unwind) => match exception::local_jump_of(unwind.0) {
                    Some((LocalJumpKind::Break, point)) if point == bp => {
                        Ok(exception::jump_value_of(unwind.0))
                    }
                    Some((LocalJumpKind::Return, _)) => Ok(exception::jump_value_of(unwind.0)),
                    _ => Err(unwind),
                },
                ok => ok,
            };
        }

        let adjusted = self.adjust_proc_args(args);
        let point = next_break_point();
        let _next = exception::NextScope::push(point);
        match (self.fn_)(&mut scope, self.self_, Args::new(&adjusted), passed_block) {
            Err(unwind) => match exception::local_jump_of(unwind.0) {
                Some((LocalJumpKind::Next, p)) if p == point => {
                    Ok(exception::jump_value_of(unwind.0))
                }
                _ => Err(unwind),
            },
            ok => ok,
        }
    }

    fn check_lambda_arity(&self, env: &mut Env, args: &[Value]) -> Result<(), Unwind> {
        if self.arity >= 0 {
            Args::new(args).ensure_argc_is(env, self.arity as usize)
        } else {
            Args::new(args).ensure_argc_at_least(env, (-self.arity - 1) as usize)
        }
    }

    fn adjust_proc_args(&self, args: &[Value]) -> Vec<Value> {
        let nil = GlobalEnv::the().nil_obj();
        if self.arity < 0 {
            // Splat-carrying block: pass through, padding the required part.
            let required = (-self.arity - 1) as usize;
            let mut out = args.to_vec();
            while out.len() < required {
                out.push(nil);
            }
            return out;
        }
        let wanted = self.arity as usize;
        let mut out: Vec<Value> =
            if args.len() == 1 && wanted > 1 && args[0].object_type() == ObjectType::Array {
                args[0].object().array().to_vec()
            } else {
                args.to_vec()
            };
        out.truncate(wanted);
        while out.len() < wanted {
            out.push(nil);
        }
        out
    }

    pub(crate) fn visit(&self, visitor: &mut Visitor) {
        self.env.visit(visitor);
        visitor.visit(self.self_);
    }
}

/// Run a block as a `break` target: a `break` raised inside it (and not
/// swallowed by a nested target) returns here as a normal value.
pub fn run_block_with_break(env: &mut Env, block: &Block, args: &[Value]) -> Result {
    let bp = next_break_point();
    let _guard = BreakScope::push(bp);
    match block.run(env, args, None) {
        Err(unwind) => match exception::local_jump_of(unwind.0) {
            Some((LocalJumpKind::Break, point)) if point == bp => {
                Ok(exception::jump_value_of(unwind.0))
            }
            _ => Err(unwind),
        },
        ok => ok,
    }
}

/// `Proc` payload: a heap-promoted block.
pub struct ProcPayload {
    pub block: Block,
}

impl ProcPayload {
    pub fn visit(&self, visitor: &mut Visitor) {
        self.block.visit(visitor);
    }
}

/// Promote a block to a Proc cell.
pub fn new_proc(block: Block) -> Value {
    let klass = GlobalEnv::the().proc_class();
    Heap::the().allocate(Object::new(klass, Payload::Proc(Box::new(ProcPayload { block }))))
}

/// Call a Proc cell.
pub fn proc_call(env: &mut Env, proc_value: Value, args: &[Value], block: Option<&Block>) -> Result {
    let obj = proc_value.object();
    let owned = obj.proc_payload().block.clone();
    owned.run(env, args, block)
}

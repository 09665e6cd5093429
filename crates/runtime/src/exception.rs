//! Exceptions and unwinding
//!
//! Exceptions are ordinary cells: class, message, the backtrace captured at
//! raise time, and a cause chain. Raising produces an [`Unwind`] carrier
//! that every fallible operation threads through `Result`; `rescue`,
//! `ensure`, and `retry` are helpers over that shape.
//!
//! `break`/`next`/`return` ride the same carrier, tagged with a target id
//! that the matching invoker recognizes and converts back into a value.
//! Tagged jump carriers are invisible to `rescue`.

use std::cell::RefCell;

use crate::block;
use crate::dispatch;
use crate::env::Env;
use crate::gc::Visitor;
use crate::global_env::GlobalEnv;
use crate::heap::Heap;
use crate::kernel;
use crate::klass;
use crate::object::{Object, Payload};
use crate::string;
use crate::symbol::intern;
use crate::value::Value;
use crate::Result;

/// The unwind carrier: a raised exception cell in flight.
pub struct Unwind(pub Value);

impl std::fmt::Debug for Unwind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Unwind({:?})", self.0)
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum LocalJumpKind {
    Break,
    Next,
    Return,
}

/// One backtrace frame: `file:line:in 'label'`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Location {
    pub file: String,
    pub line: u32,
    pub label: String,
}

impl std::fmt::Display for Location {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}:in '{}'", self.file, self.line, self.label)
    }
}

pub struct ExceptionPayload {
    pub message: Value,
    pub backtrace: Vec<Location>,
    pub cause: Value,
    pub local_jump: Option<(LocalJumpKind, i64)>,
    pub jump_value: Value,
    pub exit_status: Option<i32>,
}

impl ExceptionPayload {
    pub fn new(message: Value) -> ExceptionPayload {
        ExceptionPayload {
            message,
            backtrace: Vec::new(),
            cause: Value::NULL,
            local_jump: None,
            jump_value: Value::NULL,
            exit_status: None,
        }
    }

    pub fn visit(&self, visitor: &mut Visitor) {
        visitor.visit(self.message);
        visitor.visit(self.cause);
        visitor.visit(self.jump_value);
    }
}

thread_local! {
    // Exceptions currently being handled by a rescue on this thread; the
    // top becomes the cause of the next raise.
    static HANDLING: RefCell<Vec<Value>> = const { RefCell::new(Vec::new()) };

    // Active `next` targets (innermost block invocation).
    static NEXT_TARGETS: RefCell<Vec<i64>> = const { RefCell::new(Vec::new()) };

    // Active `return` targets (innermost method body).
    static RETURN_TARGETS: RefCell<Vec<i64>> = const { RefCell::new(Vec::new()) };
}

/// Allocate an exception cell without raising it.
pub fn new_exception(klass: Value, message: Value) -> Value {
    Heap::the().allocate(Object::new(klass, Payload::Exception(Box::new(ExceptionPayload::new(message)))))
}

/// Find an exception class by name in the root namespace. Unknown names are
/// a bootstrap bug, not a language error.
pub fn exception_class(name: &str) -> Value {
    let object = GlobalEnv::the().object_class();
    klass::const_fetch(object, intern(name))
        .unwrap_or_else(|| panic!("exception class {name} not bootstrapped"))
}

pub fn raise_by_name(env: &mut Env, name: &str, message: String) -> Unwind {
    let klass = exception_class(name);
    raise_with_class(env, klass, message)
}

pub fn raise_with_class(env: &mut Env, klass: Value, message: String) -> Unwind {
    let message = string::new_string(&message);
    let exc = new_exception(klass, message);
    raise_value(env, exc)
}

/// Raise (or re-raise) an exception cell: stamp the backtrace if it has
/// none, link the cause, and publish `$!`.
pub fn raise_value(env: &mut Env, exc: Value) -> Unwind {
    let mut obj = exc.object();
    {
        let payload = obj.exception_mut();
        if payload.backtrace.is_empty() {
            payload.backtrace = dispatch::capture_backtrace(env);
        }
        if payload.cause.is_null() {
            if let Some(handling) = HANDLING.with(|h| h.borrow().last().copied()) {
                if handling != exc {
                    payload.cause = handling;
                }
            }
        }
    }
    GlobalEnv::the().set_last_exception(exc);
    Unwind(exc)
}

/// `SystemCallError` parameterized by errno.
pub fn raise_errno(env: &mut Env, errno: i32, message: String) -> Unwind {
    let klass = exception_class("SystemCallError");
    let unwind = raise_with_class(env, klass, message);
    let mut obj = unwind.0.object();
    obj.ivar_set(intern("@errno").symbol_id(), Value::integer(errno as i64));
    Unwind(unwind.0)
}

// Local jumps.

fn local_jump_unwind(env: &mut Env, kind: LocalJumpKind, value: Value, point: i64) -> Unwind {
    let klass = exception_class("LocalJumpError");
    let reason = match kind {
        LocalJumpKind::Break => "break",
        LocalJumpKind::Next => "next",
        LocalJumpKind::Return => "return",
    };
    let message = string::new_string(&format!("unexpected {reason}"));
    let exc = new_exception(klass, message);
    {
        let mut obj = exc.object();
        obj.set_break_flag(true);
        let payload = obj.exception_mut();
        payload.local_jump = Some((kind, point));
        payload.jump_value = value;
        payload.backtrace = dispatch::capture_backtrace(env);
    }
    Unwind(exc)
}

/// `break value`: targets the innermost break target (the call the block
/// was passed to). With no target in scope this is a real `LocalJumpError`.
pub fn raise_break(env: &mut Env, value: Value) -> Unwind {
    match block::current_break_point() {
        Some(point) => local_jump_unwind(env, LocalJumpKind::Break, value, point),
        None => env.raise("LocalJumpError", "break from proc-closure"),
    }
}

/// `next value`: targets the innermost running block.
pub fn raise_next(env: &mut Env, value: Value) -> Unwind {
    match NEXT_TARGETS.with(|t| t.borrow().last().copied()) {
        Some(point) => local_jump_unwind(env, LocalJumpKind::Next, value, point),
        None => env.raise("LocalJumpError", "unexpected next"),
    }
}

/// `return value`: targets the innermost method body established with
/// [`with_return_target`] (lambdas absorb their own).
pub fn raise_return(env: &mut Env, value: Value) -> Unwind {
    match RETURN_TARGETS.with(|t| t.borrow().last().copied()) {
        Some(point) => local_jump_unwind(env, LocalJumpKind::Return, value, point),
        None => env.raise("LocalJumpError", "unexpected return"),
    }
}

pub(crate) struct NextScope;

impl NextScope {
    pub(crate) fn push(point: i64) -> NextScope {
        NEXT_TARGETS.with(|t| t.borrow_mut().push(point));
        NextScope
    }
}

impl Drop for NextScope {
    fn drop(&mut self) {
        NEXT_TARGETS.with(|t| {
            t.borrow_mut().pop();
        });
    }
}

/// Establish a `return` target around a method body.
pub fn with_return_target<F>(env: &mut Env, body: F) -> Result
where
    F: FnOnce(&mut Env) -> Result,
{
    let point = block::next_break_point();
    RETURN_TARGETS.with(|t| t.borrow_mut().push(point));
    let result = body(env);
    RETURN_TARGETS.with(|t| {
        t.borrow_mut().pop();
    });
    match result {
        Err(unwind) => match local_jump_of(unwind.0) {
            Some((LocalJumpKind::Return, p)) if p == point => Ok(jump_value_of(unwind.0)),
            _ => Err(unwind),
        },
        ok => ok,
    }
}

/// The jump metadata of an exception cell, if it is a tagged local jump.
pub fn local_jump_of(exc: Value) -> Option<(LocalJumpKind, i64)> {
    let obj = exc.object();
    if obj.object_type() != crate::object::ObjectType::Exception {
        return None;
    }
    obj.exception().local_jump
}

pub fn jump_value_of(exc: Value) -> Value {
    let value = exc.object().exception().jump_value;
    if value.is_null() { GlobalEnv::the().nil_obj() } else { value }
}

/// The exception message as a host string.
pub fn message_of(exc: Value) -> String {
    let message = exc.object().exception().message;
    if message.is_string() { message.object().string().to_rust_string() } else { String::new() }
}

// Rescue / ensure / retry.

pub enum RescueOutcome {
    Done(Value),
    Retry,
}

fn rescuable(exc: Value, classes: &[Value]) -> bool {
    // Tagged jump carriers are control flow, not errors.
    if local_jump_of(exc).is_some_and(|(_, point)| point != 0) {
        return false;
    }
    classes.iter().any(|c| exc.is_a(*c))
}

/// The `begin/rescue/retry` shape. `classes` is the rescue list, evaluated
/// in order via class ancestry. The handler may finish with a value or ask
/// for a retry of the protected body.
pub fn rescue<B, H>(env: &mut Env, mut body: B, classes: &[Value], mut handler: H) -> Result
where
    B: FnMut(&mut Env) -> Result,
    H: FnMut(&mut Env, Value) -> Result<RescueOutcome>,
{
    loop {
        match body(env) {
            Ok(value) => return Ok(value),
            Err(Unwind(exc)) => {
                if !rescuable(exc, classes) {
                    return Err(Unwind(exc));
                }
                GlobalEnv::the().set_last_exception(exc);
                HANDLING.with(|h| h.borrow_mut().push(exc));
                let outcome = handler(env, exc);
                HANDLING.with(|h| {
                    h.borrow_mut().pop();
                });
                match outcome? {
                    RescueOutcome::Done(value) => return Ok(value),
                    RescueOutcome::Retry => continue,
                }
            }
        }
    }
}

/// `ensure` semantics: the ensure path runs on every exit, and an exception
/// from it replaces the in-flight one.
pub fn ensure<B, E>(env: &mut Env, body: B, ensure_fn: E) -> Result
where
    B: FnOnce(&mut Env) -> Result,
    E: FnOnce(&mut Env) -> Result<(), Unwind>,
{
    let result = body(env);
    match ensure_fn(env) {
        Ok(()) => result,
        Err(replacement) => Err(replacement),
    }
}

// Process exit.

/// `exit(n)`: a `SystemExit` flow-control exception that unwinds to the
/// top-level handler.
pub fn system_exit(env: &mut Env, status: i32) -> Unwind {
    let klass = exception_class("SystemExit");
    let unwind = raise_with_class(env, klass, "exit".to_string());
    unwind.0.object().exception_mut().exit_status = Some(status);
    unwind
}

/// Register an `at_exit` proc; handlers run in reverse registration order.
pub fn at_exit(proc_value: Value) {
    GlobalEnv::the().push_at_exit(proc_value);
}

pub fn run_at_exit_handlers(env: &mut Env) {
    while let Some(handler) = GlobalEnv::the().pop_at_exit() {
        if let Err(Unwind(exc)) = block::proc_call(env, handler, &[], None) {
            print_exception(exc);
        }
    }
}

/// Top-level exception processing: run `at_exit` handlers in reverse,
/// report anything unhandled, and produce the process exit status clamped
/// to 0..255.
pub fn finalize_process(env: &mut Env, outcome: Result) -> i32 {
    let status = match outcome {
        Ok(_) => 0,
        Err(Unwind(exc)) => handle_top_level_exception(exc),
    };
    run_at_exit_handlers(env);
    status.clamp(0, 255)
}

pub fn handle_top_level_exception(exc: Value) -> i32 {
    if let Some(status) = exc.object().exception().exit_status {
        return status;
    }
    print_exception(exc);
    1
}

fn print_exception(exc: Value) {
    let class_name = kernel::class_name(exc.klass());
    let message = message_of(exc);
    eprintln!("{message} ({class_name})");
    for frame in &exc.object().exception().backtrace {
        eprintln!("\tfrom {frame}");
    }
    let cause = exc.object().exception().cause;
    if !cause.is_null() {
        eprintln!("caused by: {} ({})", message_of(cause), kernel::class_name(cause.klass()));
    }
}

//! Method dispatch
//!
//! The entry point every operation rides on. Resolution starts at the
//! receiver's singleton class when it has one, walks the ancestor chain
//! (prepended modules, the class, included modules, then the superclass,
//! recursively), honors explicit `undef_method` markers, enforces
//! visibility, and falls back to `method_missing`.
//!
//! Dispatch also maintains the per-thread frame stack that raise snapshots
//! into backtraces.

use std::cell::RefCell;
use std::sync::Arc;

use crate::block::Block;
use crate::env::Env;
use crate::exception::Location;
use crate::global_env::GlobalEnv;
use crate::kernel;
use crate::klass::{self, MethodEntry};
use crate::method::{Method, Visibility};
use crate::symbol::{SymbolId, intern};
use crate::value::Value;
use crate::Result;

pub struct MethodInfo {
    pub method: Arc<Method>,
    pub owner: Value,
    pub visibility: Visibility,
}

pub enum Lookup {
    Found(MethodInfo),
    /// Lookup hit an `undef_method` marker; resolution stops hard.
    Undefined(Value),
    NotFound,
}

/// Where resolution starts for a receiver: its singleton class when one
/// exists, otherwise its direct class.
fn starting_class(receiver: Value) -> Value {
    if receiver.is_integer() {
        return GlobalEnv::the().integer_class();
    }
    let obj = receiver.object();
    let singleton = obj.singleton_class();
    if singleton.is_null() { obj.klass() } else { singleton }
}

pub fn find_method(receiver: Value, name: SymbolId) -> Lookup {
    find_in_ancestors(starting_class(receiver), name)
}

/// Walk the resolution order from `start_class` and return the first entry
/// for `name`.
pub fn find_in_ancestors(start_class: Value, name: SymbolId) -> Lookup {
    for module in klass::ancestors(start_class) {
        let obj = module.object();
        let Some(payload) = obj.try_module() else { continue };
        match payload.methods.get(&name) {
            Some(MethodEntry::Defined { visibility, method }) => {
                return Lookup::Found(MethodInfo {
                    method: Arc::clone(method),
                    owner: module,
                    visibility: *visibility,
                });
            }
            Some(MethodEntry::Undefined) => return Lookup::Undefined(module),
            None => {}
        }
    }
    Lookup::NotFound
}

/// Full dispatch. `visibility` is the access the call site has: `Private`
/// for implicit-receiver calls (everything is reachable), `Public` for
/// `public_send`. `sent_from` is the caller's `self`, used for protected
/// checks.
pub fn send(
    env: &mut Env,
    receiver: Value,
    name: Value,
    args: &[Value],
    block: Option<&Block>,
    visibility: Visibility,
    sent_from: Option<Value>,
) -> Result {
    let name_id = name.expect_symbol(env)?;
    match find_method(receiver, name_id) {
        Lookup::Found(info) => {
            check_visibility(env, receiver, &info, name_id, visibility, sent_from)?;
            call_found(env, &info, receiver, args, block)
        }
        Lookup::Undefined(_) => Err(no_method_error(env, receiver, name_id, "undefined")),
        Lookup::NotFound => method_missing_send(env, receiver, name_id, args, block),
    }
}

fn check_visibility(
    env: &mut Env,
    _receiver: Value,
    info: &MethodInfo,
    name: SymbolId,
    filter: Visibility,
    sent_from: Option<Value>,
) -> Result<(), crate::Unwind> {
    match info.visibility {
        Visibility::Public => Ok(()),
        Visibility::Private => {
            if filter == Visibility::Private {
                Ok(())
            } else {
                Err(no_method_error(env, _receiver, name, "private"))
            }
        }
        Visibility::Protected => {
            if filter == Visibility::Private {
                return Ok(());
            }
            if let Some(sender) = sent_from {
                if sender.is_a(info.owner) {
                    return Ok(());
                }
            }
            Err(no_method_error(env, _receiver, name, "protected"))
        }
    }
}

fn call_found(
    env: &mut Env,
    info: &MethodInfo,
    receiver: Value,
    args: &[Value],
    block: Option<&Block>,
) -> Result {
    let _frame = FrameGuard::push(frame_label(info), env.file(), env.line());
    info.method.call(env, receiver, args, block)
}

/// Resolution fell off `BasicObject`: re-dispatch through `method_missing`
/// with the name prepended, or raise `NoMethodError` if even that is
/// missing.
fn method_missing_send(
    env: &mut Env,
    receiver: Value,
    name: SymbolId,
    args: &[Value],
    block: Option<&Block>,
) -> Result {
    let mm = intern("method_missing").symbol_id();
    if name == mm {
        return Err(no_method_error(env, receiver, name, "undefined"));
    }
    match find_method(receiver, mm) {
        Lookup::Found(info) => {
            let mut full_args = Vec::with_capacity(args.len() + 1);
            full_args.push(name.to_value());
            full_args.extend_from_slice(args);
            call_found(env, &info, receiver, &full_args, block)
        }
        _ => Err(no_method_error(env, receiver, name, "undefined")),
    }
}

fn no_method_error(env: &mut Env, receiver: Value, name: SymbolId, reason: &str) -> crate::Unwind {
    let class_name = kernel::class_name(receiver.klass());
    env.raise(
        "NoMethodError",
        format!("{} method '{}' for an instance of {}", reason, name.name(), class_name),
    )
}

/// True if resolution finds a public or protected method. Private methods
/// do not respond.
pub fn respond_to(receiver: Value, name: Value) -> bool {
    if !name.is_symbol() {
        return false;
    }
    matches!(
        find_method(receiver, name.symbol_id()),
        Lookup::Found(MethodInfo { visibility: Visibility::Public | Visibility::Protected, .. })
    )
}

fn frame_label(info: &MethodInfo) -> String {
    let owner_name = kernel::class_name_or_blank(info.owner);
    if owner_name.is_empty() {
        info.method.name().to_string()
    } else {
        format!("{}#{}", owner_name, info.method.name())
    }
}

// Per-thread call frames for backtraces.

#[derive(Clone)]
struct Frame {
    label: String,
    file: &'static str,
    line: u32,
}

thread_local! {
    static CALL_STACK: RefCell<Vec<Frame>> = const { RefCell::new(Vec::new()) };
}

struct FrameGuard;

impl FrameGuard {
    fn push(label: String, file: &'static str, line: u32) -> FrameGuard {
        CALL_STACK.with(|s| s.borrow_mut().push(Frame { label, file, line }));
        FrameGuard
    }
}

impl Drop for FrameGuard {
    fn drop(&mut self) {
        CALL_STACK.with(|s| {
            s.borrow_mut().pop();
        });
    }
}

/// Snapshot the frame stack, innermost first, closing with a synthetic
/// `<main>` frame.
pub fn capture_backtrace(env: &Env) -> Vec<Location> {
    CALL_STACK.with(|s| {
        let stack = s.borrow();
        let mut trace = Vec::with_capacity(stack.len() + 1);
        for frame in stack.iter().rev() {
            trace.push(Location {
                file: frame.file.to_string(),
                line: frame.line,
                label: frame.label.clone(),
            });
        }
        trace.push(Location { file: env.file().to_string(), line: env.line(), label: "<main>".to_string() });
        trace
    })
}

/// Depth of the current call stack; diagnostics only.
pub fn call_depth() -> usize {
    CALL_STACK.with(|s| s.borrow().len())
}

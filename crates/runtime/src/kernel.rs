//! Object lifecycle and the core method set
//!
//! `new`/`allocate`, dup/clone, freeze, inspection, and the native methods
//! every object answers (`class`, `object_id`, `respond_to?`, `send`,
//! ivar reflection, `raise`, `exit`). Class/Module reflection methods and
//! the GC module live here too; the concurrency classes install their own.

use crate::args::Args;
use crate::array::ArrayPayload;
use crate::block::{self, Block};
use crate::dispatch::{self, Lookup};
use crate::env::Env;
use crate::exception::{self, ExceptionPayload};
use crate::global_env::GlobalEnv;
use crate::hash::HashPayload;
use crate::heap::Heap;
use crate::klass::{self, ConstLookupFailureMode, ConstLookupSearchMode, ModulePayload};
use crate::method::{MethodObjPayload, Visibility};
use crate::object::{Object, ObjectType, Payload};
use crate::range::RangePayload;
use crate::string::{self, StringPayload};
use crate::symbol::{self, SymbolId, intern};
use crate::value::Value;
use crate::{Result, Unwind};

// Naming helpers used by error messages and backtraces.

/// Human name of a class/module cell: its recorded name, or an address
/// form for anonymous and singleton classes.
pub fn class_name(klass: Value) -> String {
    if klass.is_null() {
        return "(uninitialized)".to_string();
    }
    if !klass.is_pointer() {
        return "Integer".to_string();
    }
    match klass.object().try_module() {
        Some(payload) => match &payload.name {
            Some(name) => name.clone(),
            None => format!("#<Class:{:#x}>", klass.raw()),
        },
        None => format!("#<{:?}>", klass.object_type()),
    }
}

pub fn class_name_or_blank(module: Value) -> String {
    if module.is_pointer() {
        if let Some(payload) = module.object().try_module() {
            return payload.name.clone().unwrap_or_default();
        }
    }
    String::new()
}

// Allocation.

/// `allocate`: a bare instance with the payload kind the class remembers.
/// Classes whose payloads need construction data have no allocator.
pub fn allocate(env: &mut Env, class: Value) -> Result {
    if !class.is_class() {
        return Err(env.raise("TypeError", "allocator requires a Class"));
    }
    let object_type = class.object().module().object_type;
    let nil = GlobalEnv::the().nil_obj();
    let payload = match object_type {
        ObjectType::Object | ObjectType::MainObject => Payload::Object,
        ObjectType::Array => Payload::Array(ArrayPayload::new()),
        ObjectType::Hash => Payload::Hash(Box::new(HashPayload::new())),
        ObjectType::String => Payload::String(StringPayload::new()),
        ObjectType::Exception => Payload::Exception(Box::new(ExceptionPayload::new(nil))),
        ObjectType::Range => Payload::Range(RangePayload { begin: nil, end: nil, exclude_end: false }),
        ObjectType::Class => Payload::Class(Box::new(ModulePayload::new_class(
            GlobalEnv::the().object_class(),
            None,
            ObjectType::Object,
        ))),
        ObjectType::Module => Payload::Module(Box::new(ModulePayload::new_module(None))),
        _ => {
            return Err(env.raise("TypeError", format!("allocator undefined for {}", class_name(class))));
        }
    };
    Ok(Heap::the().allocate(Object::new(class, payload)))
}

/// `new`: allocate, then send `initialize` with implicit-receiver
/// visibility.
pub fn obj_new(env: &mut Env, class: Value, args: &[Value], block: Option<&Block>) -> Result {
    let obj = allocate(env, class)?;
    obj.send(env, intern("initialize"), args, block)?;
    Ok(obj)
}

// Copying.

fn copy_payload(env: &mut Env, value: Value) -> Result<Payload, Unwind> {
    let obj = value.object();
    let payload = match &obj.payload {
        Payload::Object => Payload::Object,
        Payload::Float(f) => Payload::Float(*f),
        Payload::BigInteger(b) => Payload::BigInteger(b.clone()),
        Payload::Array(a) => Payload::Array(ArrayPayload::from_vec(a.to_vec())),
        Payload::Hash(h) => Payload::Hash(Box::new(h.duplicate())),
        Payload::String(s) => Payload::String(s.duplicate()),
        Payload::Range(r) => Payload::Range(*r),
        Payload::Rational(r) => Payload::Rational(*r),
        Payload::Complex(c) => Payload::Complex(*c),
        Payload::Time(t) => Payload::Time(*t),
        Payload::Exception(e) => Payload::Exception(Box::new(ExceptionPayload {
            message: e.message,
            backtrace: e.backtrace.clone(),
            cause: e.cause,
            local_jump: e.local_jump,
            jump_value: e.jump_value,
            exit_status: e.exit_status,
        })),
        Payload::Class(m) => Payload::Class(Box::new(duplicate_module(m))),
        Payload::Module(m) => Payload::Module(Box::new(duplicate_module(m))),
        Payload::Proc(p) => Payload::Proc(Box::new(crate::block::ProcPayload { block: p.block.clone() })),
        _ => {
            return Err(env.raise(
                "TypeError",
                format!("can't copy instance of {}", class_name(value.klass())),
            ));
        }
    };
    Ok(payload)
}

fn duplicate_module(payload: &ModulePayload) -> ModulePayload {
    ModulePayload {
        constants: payload.constants.clone(),
        methods: payload.methods.clone(),
        cvars: payload.cvars.clone(),
        superclass: payload.superclass,
        included: payload.included.clone(),
        prepended: payload.prepended.clone(),
        name: payload.name.clone(),
        lexical_parent: payload.lexical_parent,
        object_type: payload.object_type,
        is_singleton: payload.is_singleton,
        default_visibility: payload.default_visibility,
    }
}

/// `dup`: payload + ivars; no singleton class, no frozen state.
pub fn duplicate(env: &mut Env, value: Value) -> Result {
    if value.is_integer() {
        return Ok(value);
    }
    let payload = copy_payload(env, value)?;
    let copy = Heap::the().allocate(Object::new(value.klass(), payload));
    copy.object().copy_ivars_from(&value.object());
    Ok(copy)
}

/// `clone`: dup plus the singleton class and (by default) the frozen
/// state.
pub fn clone_obj(env: &mut Env, value: Value, freeze: Option<bool>) -> Result {
    if value.is_integer() {
        return Ok(value);
    }
    let copy = duplicate(env, value)?;
    let source = value.object();
    let singleton = source.singleton_class();
    if !singleton.is_null() {
        let singleton_copy = duplicate(env, singleton)?;
        copy.object().set_singleton_class(singleton_copy);
    }
    let frozen = freeze.unwrap_or_else(|| source.is_frozen());
    if frozen {
        copy.freeze();
    }
    Ok(copy)
}

// Inspection.

pub fn inspect(env: &mut Env, value: Value) -> String {
    inspect_depth(env, value, 0)
}

fn inspect_depth(env: &mut Env, value: Value, depth: usize) -> String {
    if depth > 8 {
        return "...".to_string();
    }
    if value.is_null() {
        return "(null)".to_string();
    }
    if value.is_integer() {
        return value.integer_value().to_string();
    }
    let obj = value.object();
    match &obj.payload {
        Payload::Nil => "nil".to_string(),
        Payload::True => "true".to_string(),
        Payload::False => "false".to_string(),
        Payload::Float(f) => {
            if f.fract() == 0.0 && f.is_finite() { format!("{f:.1}") } else { f.to_string() }
        }
        Payload::BigInteger(b) => b.to_string(),
        Payload::Symbol(name) => format!(":{name}"),
        Payload::String(s) => s.inspect(),
        Payload::Array(a) => {
            let items: Vec<String> =
                a.iter().map(|item| inspect_depth(env, item, depth + 1)).collect();
            format!("[{}]", items.join(", "))
        }
        Payload::Hash(h) => {
            let pairs: Vec<String> = h
                .pairs()
                .into_iter()
                .map(|(k, v)| {
                    format!("{} => {}", inspect_depth(env, k, depth + 1), inspect_depth(env, v, depth + 1))
                })
                .collect();
            format!("{{{}}}", pairs.join(", "))
        }
        Payload::Class(_) | Payload::Module(_) => class_name(value),
        Payload::Range(r) => {
            let sep = if r.exclude_end { "..." } else { ".." };
            format!(
                "{}{}{}",
                inspect_depth(env, r.begin, depth + 1),
                sep,
                inspect_depth(env, r.end, depth + 1)
            )
        }
        Payload::Rational(r) => format!("({}/{})", inspect_depth(env, r.numerator, depth + 1), inspect_depth(env, r.denominator, depth + 1)),
        Payload::Complex(c) => format!(
            "({}+{}i)",
            inspect_depth(env, c.real, depth + 1),
            inspect_depth(env, c.imaginary, depth + 1)
        ),
        Payload::Exception(e) => {
            let message = if e.message.is_string() {
                e.message.object().string().to_rust_string()
            } else {
                String::new()
            };
            format!("#<{}: {}>", class_name(value.klass()), message)
        }
        Payload::Object if obj.is_main() => "main".to_string(),
        _ => format!("#<{}:{:#x}>", class_name(value.klass()), value.raw()),
    }
}

// Ivar name validation shared by the reflection methods.

pub fn to_instance_variable_name(env: &mut Env, name: Value) -> Result<SymbolId, Unwind> {
    let id = name.expect_symbol(env)?;
    if symbol::is_ivar_name(id.name()) {
        Ok(id)
    } else {
        Err(env.raise(
            "NameError",
            format!("'{}' is not allowed as an instance variable name", id.name()),
        ))
    }
}

// Native methods. Bootstrap calls `install` once the root classes exist.

fn obj_initialize(_env: &mut Env, _self: Value, _args: Args, _block: Option<&Block>) -> Result {
    Ok(GlobalEnv::the().nil_obj())
}

fn obj_class(_env: &mut Env, self_: Value, _args: Args, _block: Option<&Block>) -> Result {
    Ok(self_.klass())
}

fn obj_object_id(_env: &mut Env, self_: Value, _args: Args, _block: Option<&Block>) -> Result {
    Ok(Value::integer(self_.object_id()))
}

fn obj_respond_to(_env: &mut Env, self_: Value, args: Args, _block: Option<&Block>) -> Result {
    Ok(Value::from_bool(self_.respond_to(args.at_or_nil(0))))
}

fn obj_eq(_env: &mut Env, self_: Value, args: Args, _block: Option<&Block>) -> Result {
    Ok(Value::from_bool(self_ == args.at_or_nil(0)))
}

fn obj_neq(env: &mut Env, self_: Value, args: Args, _block: Option<&Block>) -> Result {
    let eq = self_.send(env, intern("=="), args.slice(), None)?;
    Ok(Value::from_bool(!eq.is_truthy()))
}

fn obj_inspect(env: &mut Env, self_: Value, _args: Args, _block: Option<&Block>) -> Result {
    Ok(string::new_string(&inspect(env, self_)))
}

fn obj_freeze(_env: &mut Env, self_: Value, _args: Args, _block: Option<&Block>) -> Result {
    self_.freeze();
    Ok(self_)
}

fn obj_frozen(_env: &mut Env, self_: Value, _args: Args, _block: Option<&Block>) -> Result {
    Ok(Value::from_bool(self_.is_frozen()))
}

fn obj_dup(env: &mut Env, self_: Value, _args: Args, _block: Option<&Block>) -> Result {
    duplicate(env, self_)
}

fn obj_clone(env: &mut Env, self_: Value, _args: Args, _block: Option<&Block>) -> Result {
    clone_obj(env, self_, None)
}

fn obj_is_a(_env: &mut Env, self_: Value, args: Args, _block: Option<&Block>) -> Result {
    Ok(Value::from_bool(self_.is_a(args.at_or_nil(0))))
}

fn obj_instance_of(_env: &mut Env, self_: Value, args: Args, _block: Option<&Block>) -> Result {
    Ok(Value::from_bool(self_.klass() == args.at_or_nil(0)))
}

fn obj_nil_p(_env: &mut Env, self_: Value, _args: Args, _block: Option<&Block>) -> Result {
    Ok(Value::from_bool(self_.is_nil()))
}

fn obj_hash(_env: &mut Env, self_: Value, _args: Args, _block: Option<&Block>) -> Result {
    Ok(Value::integer(self_.object_id()))
}

fn obj_send(env: &mut Env, self_: Value, args: Args, block: Option<&Block>) -> Result {
    args.ensure_argc_at_least(env, 1)?;
    let name = args.at_or_nil(0);
    self_.send(env, name, &args.slice()[1..], block)
}

fn obj_public_send(env: &mut Env, self_: Value, args: Args, block: Option<&Block>) -> Result {
    args.ensure_argc_at_least(env, 1)?;
    let name = args.at_or_nil(0);
    self_.public_send(env, name, &args.slice()[1..], block)
}

fn obj_ivar_get(env: &mut Env, self_: Value, args: Args, _block: Option<&Block>) -> Result {
    let name = to_instance_variable_name(env, args.at_or_nil(0))?;
    Ok(self_.object().ivar_get(name).unwrap_or_else(|| GlobalEnv::the().nil_obj()))
}

fn obj_ivar_set(env: &mut Env, self_: Value, args: Args, _block: Option<&Block>) -> Result {
    let name = to_instance_variable_name(env, args.at_or_nil(0))?;
    self_.assert_not_frozen(env)?;
    let value = args.at_or_nil(1);
    self_.object().ivar_set(name, value);
    Ok(value)
}

fn obj_ivar_defined(env: &mut Env, self_: Value, args: Args, _block: Option<&Block>) -> Result {
    let name = to_instance_variable_name(env, args.at_or_nil(0))?;
    Ok(Value::from_bool(self_.object().ivar_defined(name)))
}

fn obj_instance_variables(_env: &mut Env, self_: Value, _args: Args, _block: Option<&Block>) -> Result {
    let names: Vec<Value> = self_.object().ivar_names().into_iter().map(|id| id.to_value()).collect();
    Ok(crate::array::new_array(names))
}

fn obj_extend(env: &mut Env, self_: Value, args: Args, _block: Option<&Block>) -> Result {
    args.ensure_argc_at_least(env, 1)?;
    for module in args.iter() {
        klass::extend_once(env, self_, *module)?;
    }
    Ok(self_)
}

fn obj_singleton_class(env: &mut Env, self_: Value, _args: Args, _block: Option<&Block>) -> Result {
    klass::singleton_class_of(env, self_)
}

fn obj_define_singleton_method(env: &mut Env, self_: Value, args: Args, block: Option<&Block>) -> Result {
    args.ensure_argc_is(env, 1)?;
    let Some(block) = block else {
        return Err(env.raise("ArgumentError", "tried to create Proc object without a block"));
    };
    klass::define_singleton_method_with_block(env, self_, args.at_or_nil(0), block)
}

fn obj_itself(_env: &mut Env, self_: Value, _args: Args, _block: Option<&Block>) -> Result {
    Ok(self_)
}

/// `Object#method(name)`: a Method cell bound to the receiver.
fn obj_method(env: &mut Env, self_: Value, args: Args, _block: Option<&Block>) -> Result {
    let name = args.at_or_nil(0).expect_symbol(env)?;
    match dispatch::find_method(self_, name) {
        Lookup::Found(info) => {
            let klass = GlobalEnv::the().method_class();
            let payload = MethodObjPayload { method: info.method, receiver: self_ };
            Ok(Heap::the().allocate(Object::new(klass, Payload::Method(Box::new(payload)))))
        }
        _ => Err(env.raise(
            "NameError",
            format!("undefined method '{}' for an instance of {}", name.name(), class_name(self_.klass())),
        )),
    }
}

/// `Module#instance_method(name)`: an UnboundMethod cell.
fn module_instance_method(env: &mut Env, self_: Value, args: Args, _block: Option<&Block>) -> Result {
    let name = args.at_or_nil(0).expect_symbol(env)?;
    match dispatch::find_in_ancestors(self_, name) {
        Lookup::Found(info) => {
            let klass = GlobalEnv::the().unbound_method_class();
            let payload = MethodObjPayload { method: info.method, receiver: Value::NULL };
            Ok(Heap::the().allocate(Object::new(klass, Payload::UnboundMethod(Box::new(payload)))))
        }
        _ => Err(env.raise(
            "NameError",
            format!("undefined method '{}' for class '{}'", name.name(), class_name(self_)),
        )),
    }
}

fn method_payload_of(value: Value) -> &'static MethodObjPayload {
    let obj = value.object();
    match &obj.payload {
        Payload::Method(m) | Payload::UnboundMethod(m) => unsafe {
            &*(m.as_ref() as *const MethodObjPayload)
        },
        _ => panic!("expected a Method cell"),
    }
}

fn method_call(env: &mut Env, self_: Value, args: Args, block: Option<&Block>) -> Result {
    let payload = method_payload_of(self_);
    if payload.receiver.is_null() {
        return Err(env.raise("TypeError", "can't call unbound method; bind first"));
    }
    payload.method.call(env, payload.receiver, args.slice(), block)
}

fn method_name(_env: &mut Env, self_: Value, _args: Args, _block: Option<&Block>) -> Result {
    Ok(intern(method_payload_of(self_).method.name()))
}

fn method_arity(_env: &mut Env, self_: Value, _args: Args, _block: Option<&Block>) -> Result {
    Ok(Value::integer(method_payload_of(self_).method.arity() as i64))
}

fn method_owner(_env: &mut Env, self_: Value, _args: Args, _block: Option<&Block>) -> Result {
    Ok(method_payload_of(self_).method.owner())
}

fn obj_raise(env: &mut Env, _self: Value, args: Args, _block: Option<&Block>) -> Result {
    match args.len() {
        0 => {
            let last = GlobalEnv::the().last_exception();
            if last.is_null() || last.is_nil() {
                Err(env.raise("RuntimeError", "unhandled exception"))
            } else {
                Err(env.raise_exception(last))
            }
        }
        _ => {
            let first = args.at_or_nil(0);
            if first.is_string() {
                let message = first.object().string().to_rust_string();
                Err(env.raise("RuntimeError", message))
            } else if first.is_exception() {
                Err(env.raise_exception(first))
            } else if first.is_class() {
                let message = match args.at(1) {
                    Some(m) if m.is_string() => m.object().string().to_rust_string(),
                    _ => class_name(first),
                };
                Err(env.raise_class(first, message))
            } else {
                Err(env.raise("TypeError", "exception class/object expected"))
            }
        }
    }
}

fn obj_exit(env: &mut Env, _self: Value, args: Args, _block: Option<&Block>) -> Result {
    let status = match args.at(0) {
        Some(v) if v.is_integer() => v.integer_value() as i32,
        Some(v) if v.is_truthy() => 0,
        Some(_) => 1,
        None => 0,
    };
    Err(exception::system_exit(env, status))
}

fn obj_at_exit(env: &mut Env, self_: Value, _args: Args, block: Option<&Block>) -> Result {
    let Some(block) = block else {
        return Err(env.raise("ArgumentError", "called without a block"));
    };
    let mut captured = block.clone();
    captured.set_self(self_);
    let proc_value = block::new_proc(captured);
    exception::at_exit(proc_value);
    Ok(proc_value)
}

// Exception instance methods.

fn exc_initialize(_env: &mut Env, self_: Value, args: Args, _block: Option<&Block>) -> Result {
    let message = match args.at(0) {
        Some(m) => m,
        None => string::new_string(&class_name(self_.klass())),
    };
    self_.object().exception_mut().message = message;
    Ok(self_)
}

fn exc_message(_env: &mut Env, self_: Value, _args: Args, _block: Option<&Block>) -> Result {
    let message = self_.object().exception().message;
    Ok(if message.is_null() { GlobalEnv::the().nil_obj() } else { message })
}

fn exc_backtrace(_env: &mut Env, self_: Value, _args: Args, _block: Option<&Block>) -> Result {
    let frames: Vec<Value> = self_
        .object()
        .exception()
        .backtrace
        .iter()
        .map(|loc| string::new_string(&loc.to_string()))
        .collect();
    Ok(crate::array::new_array(frames))
}

fn exc_cause(_env: &mut Env, self_: Value, _args: Args, _block: Option<&Block>) -> Result {
    let cause = self_.object().exception().cause;
    Ok(if cause.is_null() { GlobalEnv::the().nil_obj() } else { cause })
}

// Class methods.

fn class_new(env: &mut Env, self_: Value, args: Args, block: Option<&Block>) -> Result {
    obj_new(env, self_, args.slice(), block)
}

fn class_allocate(env: &mut Env, self_: Value, _args: Args, _block: Option<&Block>) -> Result {
    allocate(env, self_)
}

fn class_superclass(_env: &mut Env, self_: Value, _args: Args, _block: Option<&Block>) -> Result {
    let superclass = self_.object().module().superclass;
    Ok(if superclass.is_null() { GlobalEnv::the().nil_obj() } else { superclass })
}

fn module_name(_env: &mut Env, self_: Value, _args: Args, _block: Option<&Block>) -> Result {
    match &self_.object().module().name {
        Some(name) => Ok(string::new_string(name)),
        None => Ok(GlobalEnv::the().nil_obj()),
    }
}

fn module_ancestors(_env: &mut Env, self_: Value, _args: Args, _block: Option<&Block>) -> Result {
    Ok(crate::array::new_array(klass::ancestors(self_)))
}

fn module_include(env: &mut Env, self_: Value, args: Args, _block: Option<&Block>) -> Result {
    args.ensure_argc_at_least(env, 1)?;
    // Ruby applies right-to-left so the leftmost argument wins.
    for module in args.slice().iter().rev() {
        klass::include_once(env, self_, *module)?;
    }
    Ok(self_)
}

fn module_prepend(env: &mut Env, self_: Value, args: Args, _block: Option<&Block>) -> Result {
    args.ensure_argc_at_least(env, 1)?;
    for module in args.slice().iter().rev() {
        klass::prepend_once(env, self_, *module)?;
    }
    Ok(self_)
}

fn module_include_p(env: &mut Env, self_: Value, args: Args, _block: Option<&Block>) -> Result {
    args.ensure_argc_is(env, 1)?;
    let module = args.at_or_nil(0);
    Ok(Value::from_bool(self_ != module && klass::does_include_module(self_, module)))
}

fn module_method_defined(env: &mut Env, self_: Value, args: Args, _block: Option<&Block>) -> Result {
    let name = args.at_or_nil(0).expect_symbol(env)?;
    Ok(Value::from_bool(klass::is_method_defined(self_, name)))
}

fn module_instance_methods(_env: &mut Env, self_: Value, _args: Args, _block: Option<&Block>) -> Result {
    Ok(crate::array::new_array(klass::instance_methods(self_)))
}

fn module_attr_reader(env: &mut Env, self_: Value, args: Args, _block: Option<&Block>) -> Result {
    klass::attr_reader(env, self_, args.slice())?;
    Ok(GlobalEnv::the().nil_obj())
}

fn module_attr_writer(env: &mut Env, self_: Value, args: Args, _block: Option<&Block>) -> Result {
    klass::attr_writer(env, self_, args.slice())?;
    Ok(GlobalEnv::the().nil_obj())
}

fn module_attr_accessor(env: &mut Env, self_: Value, args: Args, _block: Option<&Block>) -> Result {
    klass::attr_accessor(env, self_, args.slice())?;
    Ok(GlobalEnv::the().nil_obj())
}

fn module_define_method(env: &mut Env, self_: Value, args: Args, block: Option<&Block>) -> Result {
    args.ensure_argc_is(env, 1)?;
    let Some(block) = block else {
        return Err(env.raise("ArgumentError", "tried to create Proc object without a block"));
    };
    klass::define_method_with_block(env, self_, args.at_or_nil(0), block)
}

fn module_alias_method(env: &mut Env, self_: Value, args: Args, _block: Option<&Block>) -> Result {
    args.ensure_argc_is(env, 2)?;
    klass::alias_method(env, self_, args.at_or_nil(0), args.at_or_nil(1))?;
    Ok(self_)
}

fn module_undef_method(env: &mut Env, self_: Value, args: Args, _block: Option<&Block>) -> Result {
    for name in args.iter() {
        klass::undefine_method(env, self_, *name)?;
    }
    Ok(self_)
}

fn module_private(env: &mut Env, self_: Value, args: Args, _block: Option<&Block>) -> Result {
    module_visibility(env, self_, args, Visibility::Private)
}

fn module_protected(env: &mut Env, self_: Value, args: Args, _block: Option<&Block>) -> Result {
    module_visibility(env, self_, args, Visibility::Protected)
}

fn module_public(env: &mut Env, self_: Value, args: Args, _block: Option<&Block>) -> Result {
    module_visibility(env, self_, args, Visibility::Public)
}

fn module_visibility(env: &mut Env, self_: Value, args: Args, visibility: Visibility) -> Result {
    if args.is_empty() {
        klass::set_default_visibility(self_, visibility);
        return Ok(GlobalEnv::the().nil_obj());
    }
    for name in args.iter() {
        klass::set_method_visibility(env, self_, *name, visibility)?;
    }
    Ok(args.at_or_nil(0))
}

fn module_const_get(env: &mut Env, self_: Value, args: Args, _block: Option<&Block>) -> Result {
    let found = klass::const_find(
        env,
        self_,
        args.at_or_nil(0),
        ConstLookupSearchMode::NotStrict,
        ConstLookupFailureMode::Raise,
    )?;
    Ok(found.expect("Raise mode returned without a value"))
}

fn module_const_set(env: &mut Env, self_: Value, args: Args, _block: Option<&Block>) -> Result {
    klass::const_set(env, self_, args.at_or_nil(0), args.at_or_nil(1))
}

fn module_const_missing(env: &mut Env, self_: Value, args: Args, _block: Option<&Block>) -> Result {
    let name = args.at_or_nil(0).expect_symbol(env)?;
    Err(env.raise(
        "NameError",
        format!("uninitialized constant {}::{}", class_name(self_), name.name()),
    ))
}

// GC module functions.

fn gc_start(_env: &mut Env, _self: Value, _args: Args, _block: Option<&Block>) -> Result {
    crate::gc::collect();
    Ok(GlobalEnv::the().nil_obj())
}

fn gc_enable(_env: &mut Env, _self: Value, _args: Args, _block: Option<&Block>) -> Result {
    let was_disabled = !Heap::the().is_gc_enabled();
    Heap::the().gc_enable();
    Ok(Value::from_bool(was_disabled))
}

fn gc_disable(_env: &mut Env, _self: Value, _args: Args, _block: Option<&Block>) -> Result {
    let was_disabled = !Heap::the().is_gc_enabled();
    Heap::the().gc_disable();
    Ok(Value::from_bool(was_disabled))
}

/// Install the core method set. Called once from bootstrap, after the root
/// classes and the symbol table exist.
pub fn install(env: &mut Env) -> Result<(), Unwind> {
    let genv = GlobalEnv::the();
    let object = genv.object_class();
    let class = genv.class_class();
    let module = genv.module_class();
    let exception = exception::exception_class("Exception");

    klass::define_method(env, object, intern("initialize"), obj_initialize, -1)?;
    klass::set_method_visibility(env, object, intern("initialize"), Visibility::Private)?;
    klass::define_method(env, object, intern("class"), obj_class, 0)?;
    klass::define_method(env, object, intern("object_id"), obj_object_id, 0)?;
    klass::define_method(env, object, intern("respond_to?"), obj_respond_to, 1)?;
    klass::define_method(env, object, intern("=="), obj_eq, 1)?;
    klass::define_method(env, object, intern("equal?"), obj_eq, 1)?;
    klass::define_method(env, object, intern("!="), obj_neq, 1)?;
    klass::define_method(env, object, intern("eql?"), obj_eq, 1)?;
    klass::define_method(env, object, intern("inspect"), obj_inspect, 0)?;
    klass::define_method(env, object, intern("freeze"), obj_freeze, 0)?;
    klass::define_method(env, object, intern("frozen?"), obj_frozen, 0)?;
    klass::define_method(env, object, intern("dup"), obj_dup, 0)?;
    klass::define_method(env, object, intern("clone"), obj_clone, 0)?;
    klass::define_method(env, object, intern("is_a?"), obj_is_a, 1)?;
    klass::define_method(env, object, intern("kind_of?"), obj_is_a, 1)?;
    klass::define_method(env, object, intern("instance_of?"), obj_instance_of, 1)?;
    klass::define_method(env, object, intern("nil?"), obj_nil_p, 0)?;
    klass::define_method(env, object, intern("hash"), obj_hash, 0)?;
    klass::define_method(env, object, intern("itself"), obj_itself, 0)?;
    klass::define_method(env, object, intern("send"), obj_send, -2)?;
    klass::define_method(env, object, intern("__send__"), obj_send, -2)?;
    klass::define_method(env, object, intern("public_send"), obj_public_send, -2)?;
    klass::define_method(env, object, intern("instance_variable_get"), obj_ivar_get, 1)?;
    klass::define_method(env, object, intern("instance_variable_set"), obj_ivar_set, 2)?;
    klass::define_method(env, object, intern("instance_variable_defined?"), obj_ivar_defined, 1)?;
    klass::define_method(env, object, intern("instance_variables"), obj_instance_variables, 0)?;
    klass::define_method(env, object, intern("extend"), obj_extend, -2)?;
    klass::define_method(env, object, intern("singleton_class"), obj_singleton_class, 0)?;
    klass::define_method(env, object, intern("define_singleton_method"), obj_define_singleton_method, 1)?;
    klass::define_method(env, object, intern("method"), obj_method, 1)?;
    klass::define_method(env, object, intern("raise"), obj_raise, -1)?;
    klass::define_method(env, object, intern("exit"), obj_exit, -1)?;
    klass::define_method(env, object, intern("at_exit"), obj_at_exit, 0)?;

    klass::define_method(env, exception, intern("initialize"), exc_initialize, -1)?;
    klass::define_method(env, exception, intern("message"), exc_message, 0)?;
    klass::define_method(env, exception, intern("backtrace"), exc_backtrace, 0)?;
    klass::define_method(env, exception, intern("cause"), exc_cause, 0)?;

    klass::define_method(env, class, intern("new"), class_new, -1)?;
    klass::define_method(env, class, intern("allocate"), class_allocate, 0)?;
    klass::define_method(env, class, intern("superclass"), class_superclass, 0)?;

    klass::define_method(env, module, intern("name"), module_name, 0)?;
    klass::define_method(env, module, intern("ancestors"), module_ancestors, 0)?;
    klass::define_method(env, module, intern("include"), module_include, -2)?;
    klass::define_method(env, module, intern("prepend"), module_prepend, -2)?;
    klass::define_method(env, module, intern("include?"), module_include_p, 1)?;
    klass::define_method(env, module, intern("method_defined?"), module_method_defined, 1)?;
    klass::define_method(env, module, intern("instance_methods"), module_instance_methods, 0)?;
    klass::define_method(env, module, intern("attr_reader"), module_attr_reader, -2)?;
    klass::define_method(env, module, intern("attr_writer"), module_attr_writer, -2)?;
    klass::define_method(env, module, intern("attr_accessor"), module_attr_accessor, -2)?;
    klass::define_method(env, module, intern("define_method"), module_define_method, 1)?;
    klass::define_method(env, module, intern("alias_method"), module_alias_method, 2)?;
    klass::define_method(env, module, intern("undef_method"), module_undef_method, -2)?;
    klass::define_method(env, module, intern("private"), module_private, -1)?;
    klass::define_method(env, module, intern("protected"), module_protected, -1)?;
    klass::define_method(env, module, intern("public"), module_public, -1)?;
    klass::define_method(env, module, intern("instance_method"), module_instance_method, 1)?;
    klass::define_method(env, module, intern("const_get"), module_const_get, 1)?;
    klass::define_method(env, module, intern("const_set"), module_const_set, 2)?;
    klass::define_method(env, module, intern("const_missing"), module_const_missing, 1)?;

    let method_class = genv.method_class();
    let unbound_class = genv.unbound_method_class();
    klass::define_method(env, method_class, intern("call"), method_call, -1)?;
    klass::define_method(env, method_class, intern("name"), method_name, 0)?;
    klass::define_method(env, method_class, intern("arity"), method_arity, 0)?;
    klass::define_method(env, method_class, intern("owner"), method_owner, 0)?;
    klass::define_method(env, unbound_class, intern("name"), method_name, 0)?;
    klass::define_method(env, unbound_class, intern("arity"), method_arity, 0)?;
    klass::define_method(env, unbound_class, intern("owner"), method_owner, 0)?;

    // The GC module: start/enable/disable as module functions.
    let gc_module = klass::new_module(Some("GC"));
    klass::const_set(env, object, intern("GC"), gc_module)?;
    klass::define_singleton_method(env, gc_module, intern("start"), gc_start, 0)?;
    klass::define_singleton_method(env, gc_module, intern("enable"), gc_enable, 0)?;
    klass::define_singleton_method(env, gc_module, intern("disable"), gc_disable, 0)?;

    Ok(())
}

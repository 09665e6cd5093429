//! Classes and modules
//!
//! The class/module payload carries the method table, the constants table,
//! class variables, the superclass link, and the ordered include/prepend
//! lists that define the resolution order. Classes additionally remember
//! the concrete payload kind their `new` must allocate.
//!
//! Structural mutation (method tables, constants, inclusion lists) happens
//! under the global lock.

use std::collections::HashMap;
use std::sync::Arc;

use crate::block::Block;
use crate::dispatch::{self, Lookup};
use crate::env::Env;
use crate::gc::Visitor;
use crate::global_env::GlobalEnv;
use crate::heap::Heap;
use crate::kernel;
use crate::method::{Method, MethodFn, Visibility};
use crate::object::{Object, ObjectType, Payload};
use crate::symbol::{SymbolId, intern};
use crate::value::Value;
use crate::{Args, Result, Unwind};

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ConstLookupSearchMode {
    /// The module itself and its lexical enclosure.
    Strict,
    /// Walk the superclass chain too.
    NotStrict,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ConstLookupFailureMode {
    None,
    Raise,
    ConstMissing,
}

/// A constants-table slot. Private constants are unreadable from outside
/// the module; deprecated ones warn on read.
#[derive(Clone, Copy)]
pub struct Constant {
    pub value: Value,
    pub private: bool,
    pub deprecated: bool,
}

#[derive(Clone)]
pub enum MethodEntry {
    Defined { visibility: Visibility, method: Arc<Method> },
    /// Installed by `undef_method`; shadows inherited definitions and
    /// terminates lookup.
    Undefined,
}

pub struct ModulePayload {
    pub constants: HashMap<SymbolId, Constant>,
    pub methods: HashMap<SymbolId, MethodEntry>,
    pub cvars: HashMap<SymbolId, Value>,
    pub superclass: Value,
    pub included: Vec<Value>,
    pub prepended: Vec<Value>,
    pub name: Option<String>,
    pub lexical_parent: Value,
    /// What payload kind instances of this class get.
    pub object_type: ObjectType,
    pub is_singleton: bool,
    pub default_visibility: Visibility,
}

impl ModulePayload {
    pub fn new_module(name: Option<String>) -> ModulePayload {
        ModulePayload {
            constants: HashMap::new(),
            methods: HashMap::new(),
            cvars: HashMap::new(),
            superclass: Value::NULL,
            included: Vec::new(),
            prepended: Vec::new(),
            name,
            lexical_parent: Value::NULL,
            object_type: ObjectType::Object,
            is_singleton: false,
            default_visibility: Visibility::Public,
        }
    }

    pub fn new_class(superclass: Value, name: Option<String>, object_type: ObjectType) -> ModulePayload {
        let mut payload = ModulePayload::new_module(name);
        payload.superclass = superclass;
        payload.object_type = object_type;
        payload
    }

    pub fn visit(&self, visitor: &mut Visitor) {
        for constant in self.constants.values() {
            visitor.visit(constant.value);
        }
        for entry in self.methods.values() {
            if let MethodEntry::Defined { method, .. } = entry {
                method.visit(visitor);
            }
        }
        for value in self.cvars.values() {
            visitor.visit(*value);
        }
        visitor.visit(self.superclass);
        visitor.visit(self.lexical_parent);
        for module in &self.included {
            visitor.visit(*module);
        }
        for module in &self.prepended {
            visitor.visit(*module);
        }
    }
}

// Construction.

/// Allocate a bare module cell.
pub fn new_module(name: Option<&str>) -> Value {
    let klass = GlobalEnv::the().module_class();
    let payload = ModulePayload::new_module(name.map(str::to_string));
    Heap::the().allocate(Object::new(klass, Payload::Module(Box::new(payload))))
}

/// Allocate a class cell without linking anything; bootstrap and
/// `subclass` share it.
pub(crate) fn new_class_cell(
    metaclass: Value,
    superclass: Value,
    name: Option<&str>,
    object_type: ObjectType,
) -> Value {
    let payload = ModulePayload::new_class(superclass, name.map(str::to_string), object_type);
    Heap::the().allocate(Object::new(metaclass, Payload::Class(Box::new(payload))))
}

/// `subclass(parent, name, object_type)`: allocate a class, link its
/// superclass, mirror the parent's singleton-class chain, and stamp the
/// payload kind its `new` will allocate.
pub fn subclass(env: &mut Env, superclass: Value, name: Option<&str>, object_type: ObjectType) -> Result {
    if !superclass.is_class() {
        return Err(env.raise(
            "TypeError",
            format!("superclass must be a Class ({} given)", kernel::class_name(superclass.klass())),
        ));
    }
    let _lock = GlobalEnv::the().lock();
    let inherited_type = if object_type == ObjectType::Object {
        superclass.object().module().object_type
    } else {
        object_type
    };
    let class_class = GlobalEnv::the().class_class();
    let new_class = new_class_cell(class_class, superclass, name, inherited_type);

    // Keep the metaclass chain parallel to the class chain.
    let parent_singleton = superclass.object().singleton_class();
    if !parent_singleton.is_null() {
        let singleton = new_class_cell(class_class, parent_singleton, None, ObjectType::Object);
        singleton.object().module_mut().is_singleton = true;
        new_class.object().set_singleton_class(singleton);
    }
    Ok(new_class)
}

/// The per-object class, created on first request. Immediates cannot carry
/// one.
pub fn singleton_class_of(env: &mut Env, value: Value) -> Result {
    if value.is_integer() {
        return Err(env.raise("TypeError", "can't define singleton"));
    }
    let mut obj = value.object();
    let existing = obj.singleton_class();
    if !existing.is_null() {
        return Ok(existing);
    }
    let _lock = GlobalEnv::the().lock();
    // Singleton classes of classes chain through the parent's singleton
    // class so class methods inherit; for ordinary objects the singleton
    // sits directly above the object's class.
    let superclass = if value.is_class() {
        let parent = obj.module().superclass;
        if parent.is_null() { obj.klass() } else { singleton_class_of(env, parent)? }
    } else {
        obj.klass()
    };
    let class_class = GlobalEnv::the().class_class();
    let singleton = new_class_cell(class_class, superclass, None, ObjectType::Object);
    singleton.object().module_mut().is_singleton = true;
    obj.set_singleton_class(singleton);
    Ok(singleton)
}

// Inclusion.

fn expect_module(env: &mut Env, value: Value) -> Result<(), Unwind> {
    if value.object_type() != ObjectType::Module {
        return Err(env.raise(
            "TypeError",
            format!("wrong argument type {} (expected Module)", kernel::class_name(value.klass())),
        ));
    }
    Ok(())
}

/// `include`: most recent include wins; repeated inclusion is a no-op.
pub fn include_once(env: &mut Env, module: Value, to_include: Value) -> Result<(), Unwind> {
    expect_module(env, to_include)?;
    let _lock = GlobalEnv::the().lock();
    let mut obj = module.object();
    let payload = obj.module_mut();
    if !payload.included.contains(&to_include) {
        payload.included.push(to_include);
    }
    Ok(())
}

/// `prepend`: inserts before the class itself in the resolution order.
pub fn prepend_once(env: &mut Env, module: Value, to_prepend: Value) -> Result<(), Unwind> {
    expect_module(env, to_prepend)?;
    let _lock = GlobalEnv::the().lock();
    let mut obj = module.object();
    let payload = obj.module_mut();
    if !payload.prepended.contains(&to_prepend) {
        payload.prepended.push(to_prepend);
    }
    Ok(())
}

/// `extend`: include into the receiver's singleton class.
pub fn extend_once(env: &mut Env, value: Value, module: Value) -> Result<(), Unwind> {
    expect_module(env, module)?;
    let singleton = singleton_class_of(env, value)?;
    include_once(env, singleton, module)
}

/// The resolution order: prepended modules (last prepended first), the
/// module itself, included modules (last included first), then the
/// superclass chain. Duplicates collapse to their first appearance.
pub fn ancestors(klass: Value) -> Vec<Value> {
    let mut out = Vec::new();
    append_ancestors(klass, &mut out);
    out
}

fn append_ancestors(module: Value, out: &mut Vec<Value>) {
    if module.is_null() {
        return;
    }
    let obj = module.object();
    let Some(payload) = obj.try_module() else { return };
    for m in payload.prepended.iter().rev() {
        if !out.contains(m) {
            append_module_only(*m, out);
        }
    }
    if !out.contains(&module) {
        out.push(module);
    }
    for m in payload.included.iter().rev() {
        if !out.contains(m) {
            append_module_only(*m, out);
        }
    }
    append_ancestors(payload.superclass, out);
}

// A module contributes itself plus its own includes, but no superclass.
fn append_module_only(module: Value, out: &mut Vec<Value>) {
    let obj = module.object();
    let Some(payload) = obj.try_module() else { return };
    for m in payload.prepended.iter().rev() {
        if !out.contains(m) {
            append_module_only(*m, out);
        }
    }
    if !out.contains(&module) {
        out.push(module);
    }
    for m in payload.included.iter().rev() {
        if !out.contains(m) {
            append_module_only(*m, out);
        }
    }
}

pub fn does_include_module(klass: Value, module: Value) -> bool {
    ancestors(klass).contains(&module)
}

pub fn included_modules(klass: Value) -> Vec<Value> {
    ancestors(klass)
        .into_iter()
        .filter(|m| m.object_type() == ObjectType::Module)
        .collect()
}

// Method definition.

fn expect_module_owner(env: &mut Env, owner: Value) -> Result<(), Unwind> {
    if !owner.is_module() {
        return Err(env.raise("TypeError", "method owner must be a class or module"));
    }
    owner.assert_not_frozen(env)
}

/// Install a native method record; returns the name symbol.
pub fn define_method(env: &mut Env, owner: Value, name: Value, fn_: MethodFn, arity: i32) -> Result {
    expect_module_owner(env, owner)?;
    let name_id = name.expect_symbol(env)?;
    let _lock = GlobalEnv::the().lock();
    let mut obj = owner.object();
    let payload = obj.module_mut();
    let method = Method::new_native(name_id.name(), owner, fn_, arity);
    payload.methods.insert(
        name_id,
        MethodEntry::Defined { visibility: payload.default_visibility, method: Arc::new(method) },
    );
    Ok(name)
}

/// `define_method` with a block: the record captures the block's scope and
/// copies its function pointer.
pub fn define_method_with_block(env: &mut Env, owner: Value, name: Value, block: &Block) -> Result {
    expect_module_owner(env, owner)?;
    let name_id = name.expect_symbol(env)?;
    let _lock = GlobalEnv::the().lock();
    let mut obj = owner.object();
    let payload = obj.module_mut();
    let method = Method::from_block(name_id.name(), owner, block);
    payload.methods.insert(
        name_id,
        MethodEntry::Defined { visibility: payload.default_visibility, method: Arc::new(method) },
    );
    Ok(name)
}

pub fn define_singleton_method(env: &mut Env, value: Value, name: Value, fn_: MethodFn, arity: i32) -> Result {
    let singleton = singleton_class_of(env, value)?;
    define_method(env, singleton, name, fn_, arity)
}

pub fn define_singleton_method_with_block(env: &mut Env, value: Value, name: Value, block: &Block) -> Result {
    let singleton = singleton_class_of(env, value)?;
    define_method_with_block(env, singleton, name, block)
}

/// Install an undefined marker that shadows inherited definitions.
pub fn undefine_method(env: &mut Env, owner: Value, name: Value) -> Result {
    expect_module_owner(env, owner)?;
    let name_id = name.expect_symbol(env)?;
    let _lock = GlobalEnv::the().lock();
    owner.object().module_mut().methods.insert(name_id, MethodEntry::Undefined);
    Ok(name)
}

pub fn undefine_singleton_method(env: &mut Env, value: Value, name: Value) -> Result {
    let singleton = singleton_class_of(env, value)?;
    undefine_method(env, singleton, name)
}

/// `alias_method(new, old)`: duplicate the resolved record under the new
/// name; behavior is shared, the alias records its own name.
pub fn alias_method(env: &mut Env, owner: Value, new_name: Value, old_name: Value) -> Result<(), Unwind> {
    expect_module_owner(env, owner)?;
    let new_id = new_name.expect_symbol(env)?;
    let old_id = old_name.expect_symbol(env)?;
    let _lock = GlobalEnv::the().lock();
    match dispatch::find_in_ancestors(owner, old_id) {
        Lookup::Found(info) => {
            let aliased = info.method.aliased_as(new_id.name());
            owner.object().module_mut().methods.insert(
                new_id,
                MethodEntry::Defined { visibility: info.visibility, method: Arc::new(aliased) },
            );
            Ok(())
        }
        _ => Err(env.raise(
            "NameError",
            format!("undefined method '{}' for class '{}'", old_id.name(), kernel::class_name(owner)),
        )),
    }
}

pub fn singleton_method_alias(env: &mut Env, value: Value, new_name: Value, old_name: Value) -> Result<(), Unwind> {
    let singleton = singleton_class_of(env, value)?;
    alias_method(env, singleton, new_name, old_name)
}

/// Change the visibility of an existing method in this module; resolves
/// through ancestors and pins a copy locally when inherited.
pub fn set_method_visibility(env: &mut Env, owner: Value, name: Value, visibility: Visibility) -> Result<(), Unwind> {
    expect_module_owner(env, owner)?;
    let name_id = name.expect_symbol(env)?;
    let _lock = GlobalEnv::the().lock();
    let mut obj = owner.object();
    if let Some(MethodEntry::Defined { visibility: slot, .. }) = obj.module_mut().methods.get_mut(&name_id) {
        *slot = visibility;
        return Ok(());
    }
    match dispatch::find_in_ancestors(owner, name_id) {
        Lookup::Found(info) => {
            obj.module_mut()
                .methods
                .insert(name_id, MethodEntry::Defined { visibility, method: info.method });
            Ok(())
        }
        _ => Err(env.raise(
            "NameError",
            format!("undefined method '{}' for class '{}'", name_id.name(), kernel::class_name(owner)),
        )),
    }
}

/// The visibility newly defined methods get (`private` with no arguments).
pub fn set_default_visibility(owner: Value, visibility: Visibility) {
    let _lock = GlobalEnv::the().lock();
    owner.object().module_mut().default_visibility = visibility;
}

pub fn is_method_defined(klass: Value, name: SymbolId) -> bool {
    matches!(dispatch::find_in_ancestors(klass, name), Lookup::Found(_))
}

/// Defined public/protected instance methods, own and inherited.
pub fn instance_methods(klass: Value) -> Vec<Value> {
    let mut seen = Vec::new();
    let mut out = Vec::new();
    for module in ancestors(klass) {
        let obj = module.object();
        let Some(payload) = obj.try_module() else { continue };
        for (name, entry) in &payload.methods {
            if seen.contains(name) {
                continue;
            }
            seen.push(*name);
            if let MethodEntry::Defined { visibility, .. } = entry {
                if *visibility != Visibility::Private {
                    out.push(name.to_value());
                }
            }
        }
    }
    out
}

// attr_reader / attr_writer / attr_accessor install closure methods whose
// captured scope carries the ivar name.

fn attr_reader_fn(env: &mut Env, self_: Value, _args: Args, _block: Option<&Block>) -> Result {
    let ivar = env.var_get(1, 0);
    let value = self_.object().ivar_get(ivar.symbol_id());
    Ok(value.unwrap_or_else(|| GlobalEnv::the().nil_obj()))
}

fn attr_writer_fn(env: &mut Env, self_: Value, args: Args, _block: Option<&Block>) -> Result {
    let ivar = env.var_get(1, 0);
    let value = args.at_or_nil(0);
    self_.assert_not_frozen(env)?;
    self_.object().ivar_set(ivar.symbol_id(), value);
    Ok(value)
}

fn attr_name(env: &mut Env, name: Value) -> Result<&'static str, Unwind> {
    Ok(name.expect_symbol(env)?.name())
}

pub fn attr_reader(env: &mut Env, owner: Value, names: &[Value]) -> Result<(), Unwind> {
    for name in names {
        let plain = attr_name(env, *name)?;
        let ivar = intern(&format!("@{plain}"));
        let mut captured = Env::new();
        captured.init_vars(1);
        captured.var_set(0, 0, ivar);
        let block = Block::new(&captured, owner, 0, attr_reader_fn);
        define_method_with_block(env, owner, *name, &block)?;
    }
    Ok(())
}

pub fn attr_writer(env: &mut Env, owner: Value, names: &[Value]) -> Result<(), Unwind> {
    for name in names {
        let plain = attr_name(env, *name)?;
        let ivar = intern(&format!("@{plain}"));
        let setter = intern(&format!("{plain}="));
        let mut captured = Env::new();
        captured.init_vars(1);
        captured.var_set(0, 0, ivar);
        let block = Block::new(&captured, owner, 1, attr_writer_fn);
        define_method_with_block(env, owner, setter, &block)?;
    }
    Ok(())
}

pub fn attr_accessor(env: &mut Env, owner: Value, names: &[Value]) -> Result<(), Unwind> {
    attr_reader(env, owner, names)?;
    attr_writer(env, owner, names)
}

// Constants.

/// Raw fetch from one module's own table; bootstrap and internal lookups.
pub fn const_fetch(module: Value, name: Value) -> Option<Value> {
    let name_id = SymbolId::from_value(name);
    module.object().try_module().and_then(|m| m.constants.get(&name_id)).map(|c| c.value)
}

/// Full constant lookup.
pub fn const_find(
    env: &mut Env,
    module: Value,
    name: Value,
    search_mode: ConstLookupSearchMode,
    failure_mode: ConstLookupFailureMode,
) -> Result<Option<Value>> {
    let name_id = name.expect_symbol(env)?;
    let root = GlobalEnv::the().object_class();

    let found = match search_mode {
        ConstLookupSearchMode::Strict => {
            // The module itself, its lexical enclosure, then the root
            // namespace.
            let mut current = module;
            let mut hit = None;
            while !current.is_null() {
                if let Some(constant) = lookup_own_const(current, name_id) {
                    hit = Some((current, constant));
                    break;
                }
                current = current.object().module().lexical_parent;
            }
            if hit.is_none() && module != root {
                hit = lookup_own_const(root, name_id).map(|c| (root, c));
            }
            hit
        }
        ConstLookupSearchMode::NotStrict => {
            let mut current = module;
            let mut hit = None;
            while !current.is_null() {
                if let Some(constant) = lookup_own_const(current, name_id) {
                    hit = Some((current, constant));
                    break;
                }
                current = current.object().try_module().map(|m| m.superclass).unwrap_or(Value::NULL);
            }
            if hit.is_none() && module != root {
                hit = lookup_own_const(root, name_id).map(|c| (root, c));
            }
            hit
        }
    };

    if let Some((holder, constant)) = found {
        if constant.private && holder != module {
            return Err(env.raise(
                "NameError",
                format!("private constant {}::{} referenced", kernel::class_name(holder), name_id.name()),
            ));
        }
        if constant.deprecated {
            eprintln!(
                "warning: constant {}::{} is deprecated",
                kernel::class_name(holder),
                name_id.name()
            );
        }
        return Ok(Some(constant.value));
    }

    match failure_mode {
        ConstLookupFailureMode::None => Ok(None),
        ConstLookupFailureMode::Raise => Err(env.raise(
            "NameError",
            format!("uninitialized constant {}::{}", kernel::class_name(module), name_id.name()),
        )),
        ConstLookupFailureMode::ConstMissing => {
            module.send(env, intern("const_missing"), &[name], None).map(Some)
        }
    }
}

fn lookup_own_const(module: Value, name: SymbolId) -> Option<Constant> {
    module.object().try_module().and_then(|m| m.constants.get(&name)).copied()
}

/// Assignment always succeeds; redefining warns. Modules assigned to a
/// constant learn their lexical parent (and a name, if anonymous).
pub fn const_set(env: &mut Env, module: Value, name: Value, value: Value) -> Result {
    let name_id = name.expect_symbol(env)?;
    let _lock = GlobalEnv::the().lock();
    {
        let mut obj = module.object();
        let payload = obj.module_mut();
        if payload.constants.contains_key(&name_id) {
            eprintln!("warning: already initialized constant {}", name_id.name());
        }
        payload.constants.insert(name_id, Constant { value, private: false, deprecated: false });
    }
    if value.is_module() {
        let mut obj = value.object();
        let payload = obj.module_mut();
        if payload.lexical_parent.is_null() {
            payload.lexical_parent = module;
        }
        if payload.name.is_none() {
            payload.name = Some(name_id.name().to_string());
        }
    }
    Ok(value)
}

pub fn set_constant_private(module: Value, name: Value, private: bool) {
    let _lock = GlobalEnv::the().lock();
    if let Some(constant) = module.object().module_mut().constants.get_mut(&SymbolId::from_value(name)) {
        constant.private = private;
    }
}

pub fn set_constant_deprecated(module: Value, name: Value, deprecated: bool) {
    let _lock = GlobalEnv::the().lock();
    if let Some(constant) = module.object().module_mut().constants.get_mut(&SymbolId::from_value(name)) {
        constant.deprecated = deprecated;
    }
}

pub fn const_defined(module: Value, name: SymbolId) -> bool {
    let mut current = module;
    while !current.is_null() {
        if let Some(payload) = current.object().try_module() {
            if payload.constants.contains_key(&name) {
                return true;
            }
            current = payload.superclass;
        } else {
            break;
        }
    }
    false
}

pub fn constants(module: Value) -> Vec<Value> {
    module
        .object()
        .try_module()
        .map(|m| m.constants.keys().map(|k| k.to_value()).collect())
        .unwrap_or_default()
}

// Class variables walk the superclass chain; assignment binds to the
// topmost ancestor already defining the name.

pub fn cvar_get(module: Value, name: SymbolId) -> Option<Value> {
    let mut current = module;
    while !current.is_null() {
        let obj = current.object();
        let payload = obj.try_module()?;
        if let Some(value) = payload.cvars.get(&name) {
            return Some(*value);
        }
        current = payload.superclass;
    }
    None
}

pub fn cvar_get_or_raise(env: &mut Env, module: Value, name: SymbolId) -> Result {
    cvar_get(module, name).ok_or_else(|| {
        env.raise(
            "NameError",
            format!("uninitialized class variable {} in {}", name.name(), kernel::class_name(module)),
        )
    })
}

pub fn cvar_set(module: Value, name: SymbolId, value: Value) {
    let _lock = GlobalEnv::the().lock();
    let mut owner = module;
    let mut current = module.object().module().superclass;
    while !current.is_null() {
        if current.object().try_module().is_some_and(|m| m.cvars.contains_key(&name)) {
            owner = current;
        }
        current = current.object().module().superclass;
    }
    owner.object().module_mut().cvars.insert(name, value);
}

//! Heap objects
//!
//! Every heap value is one fixed-size [`Object`] cell: a class pointer, an
//! optional singleton class, a flags byte, a lazily allocated ivar map, and
//! a tagged-union payload whose variants mirror the closed type-tag set.
//! The collector traces cells through [`Object::visit_children`].
//!
//! Operations that must be atomic against other threads without holding the
//! global lock (hash insertion, method-table mutation) take a striped lock
//! keyed by cell address instead of a per-cell mutex field.

use std::collections::HashMap;
use std::ffi::c_void;
use std::ops::{Deref, DerefMut};
use std::ptr::NonNull;

use parking_lot::Mutex;

use crate::array::ArrayPayload;
use crate::block::ProcPayload;
use crate::env::BindingPayload;
use crate::exception::ExceptionPayload;
use crate::fiber::FiberPayload;
use crate::gc::Visitor;
use crate::hash::HashPayload;
use crate::io::IoPayload;
use crate::klass::ModulePayload;
use crate::method::MethodObjPayload;
use crate::mutex::{CondVarPayload, MutexPayload};
use crate::random::RandomPayload;
use crate::range::RangePayload;
use crate::rational::{ComplexPayload, RationalPayload};
use crate::regexp::{MatchDataPayload, RegexpPayload};
use crate::string::StringPayload;
use crate::symbol::SymbolId;
use crate::thread::{LocationPayload, ThreadGroupPayload, ThreadPayload};
use crate::time_obj::TimePayload;
use crate::value::Value;
use num_bigint::BigInt;

/// The closed set of concrete object kinds. Classes remember one of these
/// so `new` knows which payload to allocate.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum ObjectType {
    Array,
    Binding,
    Class,
    Complex,
    Exception,
    False,
    Fiber,
    File,
    FileStat,
    Float,
    Hash,
    Integer,
    Io,
    MainObject,
    MatchData,
    Method,
    Module,
    Nil,
    Object,
    Proc,
    Random,
    Range,
    Rational,
    Regexp,
    String,
    Symbol,
    Thread,
    ThreadBacktraceLocation,
    ThreadConditionVariable,
    ThreadGroup,
    ThreadMutex,
    Time,
    True,
    UnboundMethod,
    VoidP,
    Collected,
}

/// Tag-specific payload. Variants bigger than a few words are boxed so the
/// uniform cell stays lean.
pub enum Payload {
    Object,
    Nil,
    True,
    False,
    Float(f64),
    BigInteger(BigInt),
    Array(ArrayPayload),
    Hash(Box<HashPayload>),
    String(StringPayload),
    Symbol(&'static str),
    Class(Box<ModulePayload>),
    Module(Box<ModulePayload>),
    Proc(Box<ProcPayload>),
    Method(Box<MethodObjPayload>),
    UnboundMethod(Box<MethodObjPayload>),
    Binding(BindingPayload),
    Range(RangePayload),
    Rational(RationalPayload),
    Complex(ComplexPayload),
    Regexp(Box<RegexpPayload>),
    MatchData(Box<MatchDataPayload>),
    Io(Box<IoPayload>),
    File(Box<IoPayload>),
    FileStat(Box<libc::stat>),
    Fiber(Box<FiberPayload>),
    Thread(Box<ThreadPayload>),
    ThreadMutex(Box<MutexPayload>),
    ThreadCondVar(Box<CondVarPayload>),
    ThreadGroup(ThreadGroupPayload),
    BacktraceLocation(Box<LocationPayload>),
    Random(Box<RandomPayload>),
    Exception(Box<ExceptionPayload>),
    Time(TimePayload),
    VoidP(VoidPPayload),
    Collected,
}

/// Opaque pointer payload with an optional cleanup function run exactly
/// once when the cell is swept.
pub struct VoidPPayload {
    pub ptr: *mut c_void,
    pub cleanup: Option<extern "C" fn(*mut c_void)>,
}

impl Drop for VoidPPayload {
    fn drop(&mut self) {
        if let Some(cleanup) = self.cleanup.take() {
            cleanup(self.ptr);
        }
    }
}

/// Wrap an opaque pointer in a VoidP cell; `cleanup` runs exactly once
/// when the cell is swept. The cleanup must not allocate.
pub fn new_void_p(ptr: *mut c_void, cleanup: Option<extern "C" fn(*mut c_void)>) -> Value {
    let klass = crate::global_env::GlobalEnv::the().object_class();
    crate::heap::Heap::the().allocate(Object::new(klass, Payload::VoidP(VoidPPayload { ptr, cleanup })))
}

const FLAG_FROZEN: u8 = 1 << 0;
const FLAG_MAIN: u8 = 1 << 1;
/// Set on exceptions that carry a `break`/`next`/`return` unwind.
const FLAG_BREAK: u8 = 1 << 2;

pub struct Object {
    klass: Value,
    singleton_class: Value,
    flags: u8,
    ivars: Option<Box<HashMap<SymbolId, Value>>>,
    pub payload: Payload,
}

impl Object {
    pub fn new(klass: Value, payload: Payload) -> Object {
        Object { klass, singleton_class: Value::NULL, flags: 0, ivars: None, payload }
    }

    pub fn object_type(&self) -> ObjectType {
        match &self.payload {
            Payload::Object => {
                if self.flags & FLAG_MAIN != 0 { ObjectType::MainObject } else { ObjectType::Object }
            }
            Payload::Nil => ObjectType::Nil,
            Payload::True => ObjectType::True,
            Payload::False => ObjectType::False,
            Payload::Float(_) => ObjectType::Float,
            Payload::BigInteger(_) => ObjectType::Integer,
            Payload::Array(_) => ObjectType::Array,
            Payload::Hash(_) => ObjectType::Hash,
            Payload::String(_) => ObjectType::String,
            Payload::Symbol(_) => ObjectType::Symbol,
            Payload::Class(_) => ObjectType::Class,
            Payload::Module(_) => ObjectType::Module,
            Payload::Proc(_) => ObjectType::Proc,
            Payload::Method(_) => ObjectType::Method,
            Payload::UnboundMethod(_) => ObjectType::UnboundMethod,
            Payload::Binding(_) => ObjectType::Binding,
            Payload::Range(_) => ObjectType::Range,
            Payload::Rational(_) => ObjectType::Rational,
            Payload::Complex(_) => ObjectType::Complex,
            Payload::Regexp(_) => ObjectType::Regexp,
            Payload::MatchData(_) => ObjectType::MatchData,
            Payload::Io(_) => ObjectType::Io,
            Payload::File(_) => ObjectType::File,
            Payload::FileStat(_) => ObjectType::FileStat,
            Payload::Fiber(_) => ObjectType::Fiber,
            Payload::Thread(_) => ObjectType::Thread,
            Payload::ThreadMutex(_) => ObjectType::ThreadMutex,
            Payload::ThreadCondVar(_) => ObjectType::ThreadConditionVariable,
            Payload::ThreadGroup(_) => ObjectType::ThreadGroup,
            Payload::BacktraceLocation(_) => ObjectType::ThreadBacktraceLocation,
            Payload::Random(_) => ObjectType::Random,
            Payload::Exception(_) => ObjectType::Exception,
            Payload::Time(_) => ObjectType::Time,
            Payload::VoidP(_) => ObjectType::VoidP,
            Payload::Collected => ObjectType::Collected,
        }
    }

    pub fn klass(&self) -> Value {
        self.klass
    }

    pub fn set_klass(&mut self, klass: Value) {
        self.klass = klass;
    }

    /// The singleton class, or null if none has been created.
    pub fn singleton_class(&self) -> Value {
        self.singleton_class
    }

    pub fn set_singleton_class(&mut self, singleton: Value) {
        self.singleton_class = singleton;
    }

    pub fn is_frozen(&self) -> bool {
        self.flags & FLAG_FROZEN != 0 || matches!(self.payload, Payload::Float(_))
    }

    pub fn freeze(&mut self) {
        self.flags |= FLAG_FROZEN;
    }

    pub fn is_main(&self) -> bool {
        self.flags & FLAG_MAIN != 0
    }

    pub fn set_main(&mut self) {
        self.flags |= FLAG_MAIN;
    }

    pub fn has_break_flag(&self) -> bool {
        self.flags & FLAG_BREAK != 0
    }

    pub fn set_break_flag(&mut self, on: bool) {
        if on { self.flags |= FLAG_BREAK } else { self.flags &= !FLAG_BREAK }
    }

    // Instance variables. The map is allocated on first write.

    pub fn ivar_get(&self, name: SymbolId) -> Option<Value> {
        self.ivars.as_ref().and_then(|map| map.get(&name).copied())
    }

    pub fn ivar_set(&mut self, name: SymbolId, value: Value) {
        self.ivars.get_or_insert_with(Default::default).insert(name, value);
    }

    pub fn ivar_remove(&mut self, name: SymbolId) -> Option<Value> {
        self.ivars.as_mut().and_then(|map| map.remove(&name))
    }

    pub fn ivar_defined(&self, name: SymbolId) -> bool {
        self.ivars.as_ref().is_some_and(|map| map.contains_key(&name))
    }

    pub fn ivar_names(&self) -> Vec<SymbolId> {
        self.ivars.as_ref().map(|map| map.keys().copied().collect()).unwrap_or_default()
    }

    /// Copy another object's ivars wholesale (`dup`/`clone`).
    pub fn copy_ivars_from(&mut self, other: &Object) {
        self.ivars = other.ivars.clone();
    }

    // Typed payload accessors. Panicking variants are for call sites where
    // the tag was already checked; mismatches there are runtime bugs.

    pub fn try_module(&self) -> Option<&ModulePayload> {
        match &self.payload {
            Payload::Class(m) | Payload::Module(m) => Some(m),
            _ => None,
        }
    }

    pub fn try_module_mut(&mut self) -> Option<&mut ModulePayload> {
        match &mut self.payload {
            Payload::Class(m) | Payload::Module(m) => Some(m),
            _ => None,
        }
    }

    pub fn module(&self) -> &ModulePayload {
        self.try_module().expect("expected a class or module cell")
    }

    pub fn module_mut(&mut self) -> &mut ModulePayload {
        self.try_module_mut().expect("expected a class or module cell")
    }

    pub fn array(&self) -> &ArrayPayload {
        match &self.payload {
            Payload::Array(a) => a,
            _ => panic!("expected an array cell"),
        }
    }

    pub fn array_mut(&mut self) -> &mut ArrayPayload {
        match &mut self.payload {
            Payload::Array(a) => a,
            _ => panic!("expected an array cell"),
        }
    }

    pub fn hash(&self) -> &HashPayload {
        match &self.payload {
            Payload::Hash(h) => h,
            _ => panic!("expected a hash cell"),
        }
    }

    pub fn hash_mut(&mut self) -> &mut HashPayload {
        match &mut self.payload {
            Payload::Hash(h) => h,
            _ => panic!("expected a hash cell"),
        }
    }

    pub fn string(&self) -> &StringPayload {
        match &self.payload {
            Payload::String(s) => s,
            _ => panic!("expected a string cell"),
        }
    }

    pub fn string_mut(&mut self) -> &mut StringPayload {
        match &mut self.payload {
            Payload::String(s) => s,
            _ => panic!("expected a string cell"),
        }
    }

    pub fn symbol_name(&self) -> &'static str {
        match &self.payload {
            Payload::Symbol(name) => name,
            _ => panic!("expected a symbol cell"),
        }
    }

    pub fn proc_payload(&self) -> &ProcPayload {
        match &self.payload {
            Payload::Proc(p) => p,
            _ => panic!("expected a proc cell"),
        }
    }

    pub fn exception(&self) -> &ExceptionPayload {
        match &self.payload {
            Payload::Exception(e) => e,
            _ => panic!("expected an exception cell"),
        }
    }

    pub fn exception_mut(&mut self) -> &mut ExceptionPayload {
        match &mut self.payload {
            Payload::Exception(e) => e,
            _ => panic!("expected an exception cell"),
        }
    }

    pub fn fiber(&self) -> &FiberPayload {
        match &self.payload {
            Payload::Fiber(f) => f,
            _ => panic!("expected a fiber cell"),
        }
    }

    pub fn fiber_mut(&mut self) -> &mut FiberPayload {
        match &mut self.payload {
            Payload::Fiber(f) => f,
            _ => panic!("expected a fiber cell"),
        }
    }

    pub fn thread(&self) -> &ThreadPayload {
        match &self.payload {
            Payload::Thread(t) => t,
            _ => panic!("expected a thread cell"),
        }
    }

    pub fn thread_mut(&mut self) -> &mut ThreadPayload {
        match &mut self.payload {
            Payload::Thread(t) => t,
            _ => panic!("expected a thread cell"),
        }
    }

    pub fn io(&self) -> &IoPayload {
        match &self.payload {
            Payload::Io(io) | Payload::File(io) => io,
            _ => panic!("expected an IO cell"),
        }
    }

    pub fn io_mut(&mut self) -> &mut IoPayload {
        match &mut self.payload {
            Payload::Io(io) | Payload::File(io) => io,
            _ => panic!("expected an IO cell"),
        }
    }

    /// Enumerate every Value this cell owns: class pointers, ivars, and the
    /// payload's references. Fiber and thread payloads additionally scan
    /// their stacks conservatively.
    pub fn visit_children(&self, visitor: &mut Visitor) {
        visitor.visit(self.klass);
        visitor.visit(self.singleton_class);
        if let Some(ivars) = &self.ivars {
            for value in ivars.values() {
                visitor.visit(*value);
            }
        }
        match &self.payload {
            Payload::Object
            | Payload::Nil
            | Payload::True
            | Payload::False
            | Payload::Float(_)
            | Payload::BigInteger(_)
            | Payload::String(_)
            | Payload::Symbol(_)
            | Payload::FileStat(_)
            | Payload::ThreadGroup(_)
            | Payload::Time(_)
            | Payload::VoidP(_)
            | Payload::Collected => {}
            Payload::Array(a) => a.visit(visitor),
            Payload::Hash(h) => h.visit(visitor),
            Payload::Class(m) | Payload::Module(m) => m.visit(visitor),
            Payload::Proc(p) => p.visit(visitor),
            Payload::Method(m) | Payload::UnboundMethod(m) => m.visit(visitor),
            Payload::Binding(b) => b.visit(visitor),
            Payload::Range(r) => r.visit(visitor),
            Payload::Rational(r) => r.visit(visitor),
            Payload::Complex(c) => c.visit(visitor),
            Payload::Regexp(_) => {}
            Payload::MatchData(m) => m.visit(visitor),
            Payload::Io(_) | Payload::File(_) => {}
            Payload::Fiber(f) => f.visit(visitor),
            Payload::Thread(t) => t.visit(visitor),
            Payload::ThreadMutex(m) => m.visit(visitor),
            Payload::ThreadCondVar(_) => {}
            Payload::BacktraceLocation(_) => {}
            Payload::Random(_) => {}
            Payload::Exception(e) => e.visit(visitor),
        }
    }
}

/// A checked, copyable reference to a heap object. Dereferencing is raw
/// pointer access under the hood; the runtime's locking discipline (global
/// lock for structural mutation, striped locks for the few lock-free
/// paths) is what keeps it coherent.
#[derive(Clone, Copy)]
pub struct ObjRef(NonNull<Object>);

impl ObjRef {
    pub(crate) fn from_ptr(ptr: *mut Object) -> ObjRef {
        ObjRef(NonNull::new(ptr).expect("null object pointer"))
    }

    pub fn as_ptr(self) -> *mut Object {
        self.0.as_ptr()
    }

    pub fn as_value(self) -> Value {
        Value::from_obj_ptr(self.0.as_ptr())
    }
}

impl Deref for ObjRef {
    type Target = Object;

    fn deref(&self) -> &Object {
        unsafe { self.0.as_ref() }
    }
}

impl DerefMut for ObjRef {
    fn deref_mut(&mut self) -> &mut Object {
        unsafe { self.0.as_mut() }
    }
}

const LOCK_STRIPES: usize = 64;

static OBJECT_LOCKS: [Mutex<()>; LOCK_STRIPES] = [const { Mutex::new(()) }; LOCK_STRIPES];

/// The striped lock covering this cell. Guards the handful of operations
/// that must be atomic without the global lock.
pub fn object_lock(value: Value) -> &'static Mutex<()> {
    let addr = value.raw() as usize;
    &OBJECT_LOCKS[(addr >> 4) % LOCK_STRIPES]
}

/// Acquire a cell's striped lock, waiting GC-safely when contended: the
/// holder may be parked at a safepoint, and a blocked acquirer must not
/// stall the collector.
pub fn lock_object(value: Value) -> parking_lot::MutexGuard<'static, ()> {
    let lock = object_lock(value);
    if let Some(guard) = lock.try_lock() {
        return guard;
    }
    crate::safepoint::blocking_region(|| lock.lock())
}

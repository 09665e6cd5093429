//! The global environment and bootstrap
//!
//! A process-wide singleton holding the root classes, the canonical
//! nil/true/false cells, the main object, the globals map, the last
//! raised exception, the default thread group, the `at_exit` stack, and
//! the global recursive lock.
//!
//! Bootstrap builds the cyclic core (`Class` is self-typed, `BasicObject`
//! has no superclass) with a two-step that patches class pointers after
//! allocation, publishes the singleton, and only then interns names,
//! registers constants, and installs the native method sets. The GC is
//! disabled for the duration: until the singleton is published the roots
//! are invisible to the collector.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Once, OnceLock};

use parking_lot::{Mutex, ReentrantMutex, ReentrantMutexGuard};

use crate::diagnostics;
use crate::env::Env;
use crate::fiber;
use crate::heap::Heap;
use crate::kernel;
use crate::klass::{self, ModulePayload};
use crate::mutex;
use crate::object::{Object, ObjectType, Payload};
use crate::random;
use crate::rational;
use crate::regexp;
use crate::safepoint;
use crate::symbol::{SymbolId, intern};
use crate::thread;
use crate::time_obj;
use crate::value::Value;

pub struct GlobalEnv {
    // Root classes; fixed at boot.
    basic_object: Value,
    object: Value,
    module_class: Value,
    class_class: Value,
    integer: Value,
    float: Value,
    string: Value,
    symbol: Value,
    array: Value,
    hash: Value,
    regexp: Value,
    match_data: Value,
    range: Value,
    rational: Value,
    complex: Value,
    proc_class: Value,
    method_class: Value,
    unbound_method: Value,
    binding: Value,
    io: Value,
    file: Value,
    file_stat: Value,
    fiber: Value,
    thread_class: Value,
    thread_mutex: Value,
    thread_condvar: Value,
    thread_group: Value,
    backtrace_location: Value,
    random: Value,
    time: Value,
    nil_class: Value,
    true_class: Value,
    false_class: Value,

    nil_obj: Value,
    true_obj: Value,
    false_obj: Value,
    main_obj: Value,

    // Filled in after publication.
    main_thread: AtomicU64,
    default_thread_group: AtomicU64,

    globals: Mutex<std::collections::HashMap<SymbolId, Value>>,
    last_exception: Mutex<Value>,
    at_exit: Mutex<Vec<Value>>,

    global_lock: ReentrantMutex<()>,
}

unsafe impl Sync for GlobalEnv {}
unsafe impl Send for GlobalEnv {}

static THE: OnceLock<GlobalEnv> = OnceLock::new();
static BOOT: Once = Once::new();

impl GlobalEnv {
    pub fn the() -> &'static GlobalEnv {
        THE.get().expect("global environment used before boot")
    }

    pub fn is_booted() -> bool {
        THE.get().is_some()
    }

    // Class accessors.

    pub fn basic_object_class(&self) -> Value { self.basic_object }
    pub fn object_class(&self) -> Value { self.object }
    pub fn module_class(&self) -> Value { self.module_class }
    pub fn class_class(&self) -> Value { self.class_class }
    pub fn integer_class(&self) -> Value { self.integer }
    pub fn float_class(&self) -> Value { self.float }
    pub fn string_class(&self) -> Value { self.string }
    pub fn symbol_class(&self) -> Value { self.symbol }
    pub fn array_class(&self) -> Value { self.array }
    pub fn hash_class(&self) -> Value { self.hash }
    pub fn regexp_class(&self) -> Value { self.regexp }
    pub fn match_data_class(&self) -> Value { self.match_data }
    pub fn range_class(&self) -> Value { self.range }
    pub fn rational_class(&self) -> Value { self.rational }
    pub fn complex_class(&self) -> Value { self.complex }
    pub fn proc_class(&self) -> Value { self.proc_class }
    pub fn method_class(&self) -> Value { self.method_class }
    pub fn unbound_method_class(&self) -> Value { self.unbound_method }
    pub fn binding_class(&self) -> Value { self.binding }
    pub fn io_class(&self) -> Value { self.io }
    pub fn file_class(&self) -> Value { self.file }
    pub fn file_stat_class(&self) -> Value { self.file_stat }
    pub fn fiber_class(&self) -> Value { self.fiber }
    pub fn thread_class(&self) -> Value { self.thread_class }
    pub fn mutex_class(&self) -> Value { self.thread_mutex }
    pub fn condvar_class(&self) -> Value { self.thread_condvar }
    pub fn thread_group_class(&self) -> Value { self.thread_group }
    pub fn backtrace_location_class(&self) -> Value { self.backtrace_location }
    pub fn random_class(&self) -> Value { self.random }
    pub fn time_class(&self) -> Value { self.time }
    pub fn nil_class(&self) -> Value { self.nil_class }
    pub fn true_class(&self) -> Value { self.true_class }
    pub fn false_class(&self) -> Value { self.false_class }

    pub fn nil_obj(&self) -> Value { self.nil_obj }
    pub fn true_obj(&self) -> Value { self.true_obj }
    pub fn false_obj(&self) -> Value { self.false_obj }
    pub fn main_obj(&self) -> Value { self.main_obj }

    pub fn main_thread(&self) -> Value {
        Value::from_raw(self.main_thread.load(Ordering::Acquire))
    }

    pub fn default_thread_group(&self) -> Value {
        Value::from_raw(self.default_thread_group.load(Ordering::Acquire))
    }

    /// Acquire the global recursive lock, parking GC-safely if it is
    /// contended.
    pub fn lock(&self) -> ReentrantMutexGuard<'_, ()> {
        if let Some(guard) = self.global_lock.try_lock() {
            return guard;
        }
        safepoint::blocking_region(|| self.global_lock.lock())
    }

    // Globals ($foo).

    pub fn global_get(&self, name: SymbolId) -> Value {
        self.globals.lock().get(&name).copied().unwrap_or(self.nil_obj)
    }

    pub fn global_set(&self, name: SymbolId, value: Value) {
        self.globals.lock().insert(name, value);
    }

    pub fn last_exception(&self) -> Value {
        *self.last_exception.lock()
    }

    pub fn set_last_exception(&self, exception: Value) {
        *self.last_exception.lock() = exception;
        self.global_set(intern("$!").symbol_id(), exception);
    }

    pub fn push_at_exit(&self, handler: Value) {
        self.at_exit.lock().push(handler);
    }

    pub fn pop_at_exit(&self) -> Option<Value> {
        self.at_exit.lock().pop()
    }

    pub fn visit_roots(&self, visitor: &mut crate::gc::Visitor) {
        for class in [
            self.basic_object, self.object, self.module_class, self.class_class,
            self.integer, self.float, self.string, self.symbol, self.array, self.hash,
            self.regexp, self.match_data, self.range, self.rational, self.complex,
            self.proc_class, self.method_class, self.unbound_method, self.binding,
            self.io, self.file, self.file_stat, self.fiber, self.thread_class,
            self.thread_mutex, self.thread_condvar, self.thread_group,
            self.backtrace_location, self.random, self.time, self.nil_class,
            self.true_class, self.false_class,
        ] {
            visitor.visit(class);
        }
        visitor.visit(self.nil_obj);
        visitor.visit(self.true_obj);
        visitor.visit(self.false_obj);
        visitor.visit(self.main_obj);
        visitor.visit(self.main_thread());
        visitor.visit(self.default_thread_group());
        for value in self.globals.lock().values() {
            visitor.visit(*value);
        }
        visitor.visit(self.last_exception());
        for handler in self.at_exit.lock().iter() {
            visitor.visit(*handler);
        }
    }
}

/// Allocate a Float cell.
pub fn new_float(value: f64) -> Value {
    let klass = GlobalEnv::the().float_class();
    Heap::the().allocate(Object::new(klass, Payload::Float(value)))
}

// Bootstrap.

fn raw_class(metaclass: Value, superclass: Value, name: &str, object_type: ObjectType) -> Value {
    let payload = ModulePayload::new_class(superclass, Some(name.to_string()), object_type);
    Heap::the().allocate(Object::new(metaclass, Payload::Class(Box::new(payload))))
}

/// Bring the runtime up. Idempotent; every entry point that needs a live
/// runtime funnels through here.
pub fn boot() -> &'static GlobalEnv {
    BOOT.call_once(|| {
        let (stack_top, _low) = thread::current_stack_bounds();
        Heap::init(stack_top);
        let heap = Heap::the();
        // Nothing is a root until the singleton is published.
        heap.gc_disable();

        // The cyclic core. Class's class pointer is itself; the pointer is
        // patched after allocation.
        let class_class = raw_class(Value::NULL, Value::NULL, "Class", ObjectType::Class);
        class_class.object().set_klass(class_class);

        let basic_object = raw_class(class_class, Value::NULL, "BasicObject", ObjectType::Object);
        let object = raw_class(class_class, basic_object, "Object", ObjectType::Object);
        let module_class = raw_class(class_class, object, "Module", ObjectType::Module);
        class_class.object().module_mut().superclass = module_class;

        let root = |name: &str, object_type: ObjectType| raw_class(class_class, object, name, object_type);

        let integer = root("Integer", ObjectType::Integer);
        let float = root("Float", ObjectType::Float);
        let string = root("String", ObjectType::String);
        let symbol = root("Symbol", ObjectType::Symbol);
        let array = root("Array", ObjectType::Array);
        let hash = root("Hash", ObjectType::Hash);
        let regexp = root("Regexp", ObjectType::Regexp);
        let match_data = root("MatchData", ObjectType::MatchData);
        let range = root("Range", ObjectType::Range);
        let rational = root("Rational", ObjectType::Rational);
        let complex = root("Complex", ObjectType::Complex);
        let proc_class = root("Proc", ObjectType::Proc);
        let method_class = root("Method", ObjectType::Method);
        let unbound_method = root("UnboundMethod", ObjectType::UnboundMethod);
        let binding = root("Binding", ObjectType::Binding);
        let io = root("IO", ObjectType::Io);
        let file = raw_class(class_class, io, "File", ObjectType::File);
        let file_stat = root("Stat", ObjectType::FileStat);
        let fiber = root("Fiber", ObjectType::Fiber);
        let thread_class = root("Thread", ObjectType::Thread);
        let thread_mutex = root("Mutex", ObjectType::ThreadMutex);
        let thread_condvar = root("ConditionVariable", ObjectType::ThreadConditionVariable);
        let thread_group = root("ThreadGroup", ObjectType::ThreadGroup);
        let backtrace_location = root("Location", ObjectType::ThreadBacktraceLocation);
        let random = root("Random", ObjectType::Random);
        let time = root("Time", ObjectType::Time);
        let nil_class = root("NilClass", ObjectType::Nil);
        let true_class = root("TrueClass", ObjectType::True);
        let false_class = root("FalseClass", ObjectType::False);

        // Exception taxonomy.
        let exception = root("Exception", ObjectType::Exception);
        let exc = |name: &str, superclass: Value| {
            raw_class(class_class, superclass, name, ObjectType::Exception)
        };
        let script_error = exc("ScriptError", exception);
        let syntax_error = exc("SyntaxError", script_error);
        let standard_error = exc("StandardError", exception);
        let argument_error = exc("ArgumentError", standard_error);
        let type_error = exc("TypeError", standard_error);
        let runtime_error = exc("RuntimeError", standard_error);
        let frozen_error = exc("FrozenError", runtime_error);
        let name_error = exc("NameError", standard_error);
        let no_method_error = exc("NoMethodError", name_error);
        let arithmetic_error = exc("ArithmeticError", standard_error);
        let zero_division_error = exc("ZeroDivisionError", arithmetic_error);
        let index_error = exc("IndexError", standard_error);
        let io_error = exc("IOError", standard_error);
        let eof_error = exc("EOFError", io_error);
        let system_call_error = exc("SystemCallError", standard_error);
        let thread_error = exc("ThreadError", standard_error);
        let fiber_error = exc("FiberError", standard_error);
        let local_jump_error = exc("LocalJumpError", standard_error);
        let regexp_error = exc("RegexpError", standard_error);
        let system_exit = exc("SystemExit", exception);

        // Canonical singletons and the main object.
        let nil_obj = heap.allocate_durable(Object::new(nil_class, Payload::Nil));
        let true_obj = heap.allocate_durable(Object::new(true_class, Payload::True));
        let false_obj = heap.allocate_durable(Object::new(false_class, Payload::False));
        let main_obj = heap.allocate(Object::new(object, Payload::Object));
        main_obj.object().set_main();

        let genv = GlobalEnv {
            basic_object,
            object,
            module_class,
            class_class,
            integer,
            float,
            string,
            symbol,
            array,
            hash,
            regexp,
            match_data,
            range,
            rational,
            complex,
            proc_class,
            method_class,
            unbound_method,
            binding,
            io,
            file,
            file_stat,
            fiber,
            thread_class,
            thread_mutex,
            thread_condvar,
            thread_group,
            backtrace_location,
            random,
            time,
            nil_class,
            true_class,
            false_class,
            nil_obj,
            true_obj,
            false_obj,
            main_obj,
            main_thread: AtomicU64::new(0),
            default_thread_group: AtomicU64::new(0),
            globals: Mutex::new(std::collections::HashMap::new()),
            last_exception: Mutex::new(Value::NULL),
            at_exit: Mutex::new(Vec::new()),
            global_lock: ReentrantMutex::new(()),
        };
        THE.set(genv).ok().expect("boot raced itself");
        let genv = GlobalEnv::the();

        // Interning works now; register constants so lookup by name does.
        let mut env = Env::new();
        let named = [
            ("BasicObject", basic_object),
            ("Object", object),
            ("Module", module_class),
            ("Class", class_class),
            ("Integer", integer),
            ("Float", float),
            ("String", string),
            ("Symbol", symbol),
            ("Array", array),
            ("Hash", hash),
            ("Regexp", regexp),
            ("MatchData", match_data),
            ("Range", range),
            ("Rational", rational),
            ("Complex", complex),
            ("Proc", proc_class),
            ("Method", method_class),
            ("UnboundMethod", unbound_method),
            ("Binding", binding),
            ("IO", io),
            ("File", file),
            ("Fiber", fiber),
            ("Thread", thread_class),
            ("ThreadGroup", thread_group),
            ("Random", random),
            ("Time", time),
            ("NilClass", nil_class),
            ("TrueClass", true_class),
            ("FalseClass", false_class),
            ("Exception", exception),
            ("ScriptError", script_error),
            ("SyntaxError", syntax_error),
            ("StandardError", standard_error),
            ("ArgumentError", argument_error),
            ("TypeError", type_error),
            ("RuntimeError", runtime_error),
            ("FrozenError", frozen_error),
            ("NameError", name_error),
            ("NoMethodError", no_method_error),
            ("ArithmeticError", arithmetic_error),
            ("ZeroDivisionError", zero_division_error),
            ("IndexError", index_error),
            ("IOError", io_error),
            ("EOFError", eof_error),
            ("SystemCallError", system_call_error),
            ("ThreadError", thread_error),
            ("FiberError", fiber_error),
            ("LocalJumpError", local_jump_error),
            ("RegexpError", regexp_error),
            ("SystemExit", system_exit),
        ];
        for (name, class) in named {
            klass::const_set(&mut env, object, intern(name), class).expect("bootstrap const_set");
        }
        // Nested namespaces.
        klass::const_set(&mut env, thread_class, intern("Mutex"), thread_mutex).expect("bootstrap const_set");
        klass::const_set(&mut env, thread_class, intern("ConditionVariable"), thread_condvar)
            .expect("bootstrap const_set");
        let backtrace_mod = klass::new_module(Some("Backtrace"));
        klass::const_set(&mut env, thread_class, intern("Backtrace"), backtrace_mod)
            .expect("bootstrap const_set");
        klass::const_set(&mut env, backtrace_mod, intern("Location"), backtrace_location)
            .expect("bootstrap const_set");
        klass::const_set(&mut env, file, intern("Stat"), file_stat).expect("bootstrap const_set");

        // The main thread, its main fiber, and the default group.
        let main_thread = thread::build_main_thread(thread_class);
        genv.main_thread.store(main_thread.raw(), Ordering::Release);
        let default_group = thread::new_thread_group();
        genv.default_thread_group.store(default_group.raw(), Ordering::Release);
        main_thread.object().thread_mut().group = default_group;

        // Native method sets.
        kernel::install(&mut env).expect("bootstrap kernel install");
        fiber::install(&mut env).expect("bootstrap fiber install");
        thread::install(&mut env).expect("bootstrap thread install");
        mutex::install(&mut env).expect("bootstrap mutex install");
        regexp::install(&mut env).expect("bootstrap regexp install");
        random::install(&mut env).expect("bootstrap random install");
        time_obj::install(&mut env).expect("bootstrap time install");
        rational::install(&mut env).expect("bootstrap rational install");

        diagnostics::install_signal_handler();
        heap.gc_enable();
    });
    let genv = GlobalEnv::the();
    // The runtime may be driven from a host thread other than the one that
    // booted it (successive embedder threads, the test harness); give such
    // a thread the main-thread identity before it touches the heap.
    thread::adopt_main_thread_if_needed(genv.main_thread());
    genv
}

//! Lexical environments
//!
//! An `Env` is one lexical scope: a slot array for locals, an optional
//! outer scope (the defining scope of a block), the block passed to the
//! current invocation, and a source location for error reporting.
//!
//! Local slots live in an Array *cell*, not a Rust vector, so that an env
//! sitting in a stack frame makes its locals visible to the conservative
//! scanner, and an env captured inside a Proc cell shares the same slots;
//! closures observe mutation of captured locals.

use std::ptr::NonNull;

use crate::array::ArrayPayload;
use crate::block::Block;
use crate::exception;
use crate::gc::Visitor;
use crate::global_env::GlobalEnv;
use crate::heap::Heap;
use crate::object::{Object, Payload};
use crate::value::Value;
use crate::{Result, Unwind};

#[derive(Clone)]
pub struct Env {
    vars: Value,
    outer: Option<Box<Env>>,
    // Borrowed from the invoking frame; never survives the call it was
    // passed to. Captured and binding scopes are stored with this cleared.
    block: Option<NonNull<Block>>,
    file: Option<&'static str>,
    line: u32,
}

impl Env {
    pub fn new() -> Env {
        Env { vars: Value::NULL, outer: None, block: None, file: None, line: 0 }
    }

    /// A scope nested inside `outer` (shares `outer`'s slot cells through
    /// the clone).
    pub fn with_outer(outer: &Env) -> Env {
        Env { vars: Value::NULL, outer: Some(Box::new(outer.clone())), block: None, file: None, line: 0 }
    }

    pub fn set_location(&mut self, file: &'static str, line: u32) {
        self.file = Some(file);
        self.line = line;
    }

    pub fn file(&self) -> &'static str {
        self.file.unwrap_or("(unknown)")
    }

    pub fn line(&self) -> u32 {
        self.line
    }

    /// Allocate `count` local slots, all nil. Idempotent per scope.
    pub fn init_vars(&mut self, count: usize) {
        let nil = GlobalEnv::the().nil_obj();
        let payload = ArrayPayload::from_vec(vec![nil; count]);
        let klass = GlobalEnv::the().array_class();
        self.vars = Heap::the().allocate(Object::new(klass, Payload::Array(payload)));
    }

    pub fn vars_value(&self) -> Value {
        self.vars
    }

    /// Read local `index` at lexical `depth` (0 = this scope). Out-of-range
    /// access is a compiler/embedder bug, not a language error.
    pub fn var_get(&self, depth: usize, index: usize) -> Value {
        let scope = self.scope_at(depth);
        assert!(!scope.vars.is_null(), "local read before init_vars");
        scope.vars.object().array().get(index).unwrap_or_else(|| GlobalEnv::the().nil_obj())
    }

    pub fn var_set(&self, depth: usize, index: usize, value: Value) {
        let scope = self.scope_at(depth);
        assert!(!scope.vars.is_null(), "local write before init_vars");
        let nil = GlobalEnv::the().nil_obj();
        let mut obj = scope.vars.object();
        obj.array_mut().set_growing(index, value, nil);
    }

    fn scope_at(&self, depth: usize) -> &Env {
        let mut scope = self;
        for _ in 0..depth {
            scope = scope.outer.as_deref().expect("lexical depth exceeds scope chain");
        }
        scope
    }

    pub fn outer(&self) -> Option<&Env> {
        self.outer.as_deref()
    }

    /// Clone this scope for storage beyond the current call (Binding
    /// cells). The borrowed block slot does not survive the capture.
    pub fn capture(&self) -> Env {
        let mut captured = self.clone();
        captured.block = None;
        captured
    }

    pub fn set_block(&mut self, block: Option<&Block>) {
        self.block = block.map(NonNull::from);
    }

    /// The block passed to the current invocation, if any. The reference is
    /// into the invoking frame; it is valid for the duration of the call,
    /// which is the only place the runtime reads it.
    pub fn block(&self) -> Option<&'static Block> {
        self.block.map(|ptr| unsafe { &*ptr.as_ptr() })
    }

    /// The block, or `LocalJumpError` if none was given (`yield` with no
    /// block).
    pub fn ensure_block(&mut self) -> Result<&'static Block> {
        match self.block() {
            Some(block) => Ok(block),
            None => Err(self.raise("LocalJumpError", "no block given (yield)")),
        }
    }

    // Raising. These build the exception cell, stamp the backtrace and
    // cause, and hand back the unwind carrier for `return Err(...)`.

    pub fn raise(&mut self, class_name: &str, message: impl Into<String>) -> Unwind {
        exception::raise_by_name(self, class_name, message.into())
    }

    pub fn raise_class(&mut self, klass: Value, message: impl Into<String>) -> Unwind {
        exception::raise_with_class(self, klass, message.into())
    }

    pub fn raise_exception(&mut self, exception: Value) -> Unwind {
        exception::raise_value(self, exception)
    }

    /// A `SystemCallError` parameterized by the current `errno`.
    pub fn raise_errno(&mut self) -> Unwind {
        let err = std::io::Error::last_os_error();
        let errno = err.raw_os_error().unwrap_or(0);
        exception::raise_errno(self, errno, err.to_string())
    }

    pub(crate) fn visit(&self, visitor: &mut Visitor) {
        // The borrowed block slot is not visited: it lives in an active
        // frame the conservative scan already covers, and captured scopes
        // carry it cleared.
        visitor.visit(self.vars);
        if let Some(outer) = &self.outer {
            outer.visit(visitor);
        }
    }
}

impl Default for Env {
    fn default() -> Env {
        Env::new()
    }
}

/// `Binding` payload: a captured scope.
pub struct BindingPayload {
    pub env: Env,
}

impl BindingPayload {
    pub fn visit(&self, visitor: &mut Visitor) {
        self.env.visit(visitor);
    }
}

/// Capture the current scope as a Binding cell.
pub fn new_binding(env: &Env) -> Value {
    let klass = GlobalEnv::the().binding_class();
    let payload = BindingPayload { env: env.capture() };
    Heap::the().allocate(Object::new(klass, Payload::Binding(payload)))
}

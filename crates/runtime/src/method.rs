//! Method records
//!
//! A method is either a native function pointer or a closure captured from
//! a block (`define_method` with a block copies the block's function
//! pointer and scope into the record). Records remember their owner, their
//! arity, their original name across aliasing, and an informational
//! `optimized` flag.

use std::sync::Arc;

use crate::args::Args;
use crate::block::{Block, BlockFn};
use crate::env::Env;
use crate::gc::Visitor;
use crate::value::Value;
use crate::{Result, Unwind};

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Visibility {
    Public,
    Protected,
    Private,
}

pub type MethodFn = fn(&mut Env, Value, Args, Option<&Block>) -> Result;

enum MethodImp {
    Native(MethodFn),
    Closure { fn_: BlockFn, env: Env, self_: Option<Value> },
}

pub struct Method {
    name: String,
    original_name: String,
    owner: Value,
    imp: MethodImp,
    arity: i32,
    file: Option<&'static str>,
    line: u32,
    optimized: bool,
}

impl Method {
    pub fn new_native(name: &str, owner: Value, fn_: MethodFn, arity: i32) -> Method {
        Method {
            name: name.to_string(),
            original_name: name.to_string(),
            owner,
            imp: MethodImp::Native(fn_),
            arity,
            file: None,
            line: 0,
            optimized: false,
        }
    }

    pub fn with_location(mut self, file: &'static str, line: u32) -> Method {
        self.file = Some(file);
        self.line = line;
        self
    }

    /// Build a record from a block: same function pointer, captured scope
    /// as the outer env, arity from the block. A block lifted off another
    /// method keeps that method's `self`.
    pub fn from_block(name: &str, owner: Value, block: &Block) -> Method {
        let self_ = if block.is_from_method() { Some(block.self_()) } else { None };
        Method {
            name: name.to_string(),
            original_name: name.to_string(),
            owner,
            imp: MethodImp::Closure { fn_: block.fn_ptr(), env: block.env().capture(), self_ },
            arity: block.arity,
            file: Some(block.env().file()),
            line: block.env().line(),
            optimized: false,
        }
    }

    /// The record installed by `alias_method`: shared behavior, new name,
    /// original name preserved through alias chains.
    pub fn aliased_as(&self, new_name: &str) -> Method {
        Method {
            name: new_name.to_string(),
            original_name: self.original_name.clone(),
            owner: self.owner,
            imp: match &self.imp {
                MethodImp::Native(f) => MethodImp::Native(*f),
                MethodImp::Closure { fn_, env, self_ } => {
                    MethodImp::Closure { fn_: *fn_, env: env.clone(), self_: *self_ }
                }
            },
            arity: self.arity,
            file: self.file,
            line: self.line,
            optimized: self.optimized,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn original_name(&self) -> &str {
        &self.original_name
    }

    pub fn owner(&self) -> Value {
        self.owner
    }

    pub fn arity(&self) -> i32 {
        self.arity
    }

    pub fn is_optimized(&self) -> bool {
        self.optimized
    }

    pub fn set_optimized(&mut self, optimized: bool) {
        self.optimized = optimized;
    }

    pub fn source_location(&self) -> Option<(&'static str, u32)> {
        self.file.map(|f| (f, self.line))
    }

    pub fn call(&self, env: &mut Env, self_: Value, args: &[Value], block: Option<&Block>) -> Result {
        self.check_arity(env, args.len())?;
        match &self.imp {
            MethodImp::Native(fn_) => {
                let mut scope = Env::new();
                scope.set_location(env.file(), env.line());
                scope.set_block(block);
                fn_(&mut scope, self_, Args::new(args), block)
            }
            MethodImp::Closure { fn_, env: captured, self_: bound_self } => {
                let mut scope = Env::with_outer(captured);
                scope.set_location(env.file(), env.line());
                scope.set_block(block);
                let receiver = bound_self.unwrap_or(self_);
                fn_(&mut scope, receiver, Args::new(args), block)
            }
        }
    }

    /// Methods check arity strictly: exact for non-negative arities, a
    /// minimum for negative ("at least n") encodings.
    fn check_arity(&self, env: &mut Env, given: usize) -> Result<(), Unwind> {
        if self.arity >= 0 {
            if given != self.arity as usize {
                return Err(crate::args::wrong_number(env, given, &self.arity.to_string()));
            }
        } else {
            let required = (-self.arity - 1) as usize;
            if given < required {
                return Err(crate::args::wrong_number(env, given, &format!("{required}+")));
            }
        }
        Ok(())
    }

    pub(crate) fn visit(&self, visitor: &mut Visitor) {
        visitor.visit(self.owner);
        if let MethodImp::Closure { env, self_, .. } = &self.imp {
            env.visit(visitor);
            if let Some(self_) = self_ {
                visitor.visit(*self_);
            }
        }
    }
}

/// Payload of `Method` / `UnboundMethod` cells: the record plus the bound
/// receiver (null for unbound).
pub struct MethodObjPayload {
    pub method: Arc<Method>,
    pub receiver: Value,
}

impl MethodObjPayload {
    pub fn visit(&self, visitor: &mut Visitor) {
        self.method.visit(visitor);
        visitor.visit(self.receiver);
    }
}

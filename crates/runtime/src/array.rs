//! Array payload
//!
//! A growable vector of Values with a grow factor of 2 and an "iterating"
//! flag that rejects structural mutation from inside an iteration on the
//! same thread. Cross-thread races on one array are the caller's problem,
//! as they are for ivars.

use std::sync::atomic::{AtomicBool, Ordering};

use crate::env::Env;
use crate::gc::Visitor;
use crate::global_env::GlobalEnv;
use crate::heap::Heap;
use crate::object::{Object, Payload};
use crate::value::Value;
use crate::{Result, Unwind};

pub struct ArrayPayload {
    items: Vec<Value>,
    iterating: AtomicBool,
}

impl ArrayPayload {
    pub fn new() -> ArrayPayload {
        ArrayPayload { items: Vec::new(), iterating: AtomicBool::new(false) }
    }

    pub fn from_vec(items: Vec<Value>) -> ArrayPayload {
        ArrayPayload { items, iterating: AtomicBool::new(false) }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<Value> {
        self.items.get(index).copied()
    }

    pub fn to_vec(&self) -> Vec<Value> {
        self.items.clone()
    }

    pub fn iter(&self) -> impl Iterator<Item = Value> + '_ {
        self.items.iter().copied()
    }

    /// Append with capacity doubling.
    pub fn push(&mut self, value: Value) {
        if self.items.len() == self.items.capacity() {
            let grown = if self.items.capacity() == 0 { 4 } else { self.items.capacity() * 2 };
            self.items.reserve_exact(grown - self.items.len());
        }
        self.items.push(value);
    }

    pub fn pop(&mut self) -> Option<Value> {
        self.items.pop()
    }

    pub fn set(&mut self, index: usize, value: Value) {
        self.items[index] = value;
    }

    /// Write `index`, extending with `fill` as needed.
    pub fn set_growing(&mut self, index: usize, value: Value, fill: Value) {
        while self.items.len() <= index {
            self.push(fill);
        }
        self.items[index] = value;
    }

    pub fn is_iterating(&self) -> bool {
        self.iterating.load(Ordering::Relaxed)
    }

    pub(crate) fn set_iterating(&self, on: bool) {
        self.iterating.store(on, Ordering::Relaxed);
    }

    pub fn visit(&self, visitor: &mut Visitor) {
        for item in &self.items {
            visitor.visit(*item);
        }
    }
}

impl Default for ArrayPayload {
    fn default() -> Self {
        Self::new()
    }
}

/// Allocate an Array cell.
pub fn new_array(items: Vec<Value>) -> Value {
    let klass = GlobalEnv::the().array_class();
    Heap::the().allocate(Object::new(klass, Payload::Array(ArrayPayload::from_vec(items))))
}

fn check_mutable(env: &mut Env, array: Value) -> Result<(), Unwind> {
    array.assert_not_frozen(env)?;
    if array.object().array().is_iterating() {
        return Err(env.raise("RuntimeError", "can't modify array during iteration"));
    }
    Ok(())
}

pub fn array_push(env: &mut Env, array: Value, value: Value) -> Result {
    check_mutable(env, array)?;
    array.object().array_mut().push(value);
    Ok(array)
}

pub fn array_pop(env: &mut Env, array: Value) -> Result {
    check_mutable(env, array)?;
    Ok(array.object().array_mut().pop().unwrap_or_else(|| GlobalEnv::the().nil_obj()))
}

/// Iterate with the mutation guard held.
pub fn array_each<F>(env: &mut Env, array: Value, mut f: F) -> Result<(), Unwind>
where
    F: FnMut(&mut Env, Value) -> Result<(), Unwind>,
{
    let payload = array.object();
    payload.array().set_iterating(true);
    let mut index = 0;
    let result = loop {
        let Some(item) = payload.array().get(index) else { break Ok(()) };
        if let Err(unwind) = f(env, item) {
            break Err(unwind);
        }
        index += 1;
    };
    payload.array().set_iterating(false);
    result
}

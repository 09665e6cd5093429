//! Hash payload
//!
//! Insertion-ordered hashing: entries sit in a slot arena threaded onto a
//! doubly-linked order list, and a bucket index maps each key's `#hash`
//! code to candidate slots compared with `#eql?`. Core key types hash
//! structurally without dispatch; receivers with user-defined `hash`/`eql?`
//! go through send, everything else falls back to identity.
//!
//! An "iterating" flag rejects structural mutation from inside an
//! iteration on the same thread.

use std::collections::HashMap;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicBool, Ordering};

use crate::dispatch::{self, Lookup};
use crate::env::Env;
use crate::gc::Visitor;
use crate::global_env::GlobalEnv;
use crate::heap::Heap;
use crate::object::{Object, Payload, lock_object};
use crate::symbol::intern;
use crate::value::Value;
use crate::{Result, Unwind};

const NONE: i32 = -1;

#[derive(Clone)]
struct Entry {
    key: Value,
    value: Value,
    hash: u64,
    prev: i32,
    next: i32,
}

pub struct HashPayload {
    entries: Vec<Option<Entry>>,
    free: Vec<usize>,
    head: i32,
    tail: i32,
    buckets: HashMap<u64, Vec<u32>>,
    iterating: AtomicBool,
}

impl HashPayload {
    pub fn new() -> HashPayload {
        HashPayload {
            entries: Vec::new(),
            free: Vec::new(),
            head: NONE,
            tail: NONE,
            buckets: HashMap::new(),
            iterating: AtomicBool::new(false),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len() - self.free.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn find_slot(&self, env: &mut Env, key: Value, hash: u64) -> Result<Option<usize>, Unwind> {
        let Some(candidates) = self.buckets.get(&hash) else { return Ok(None) };
        for &slot in candidates {
            let entry = self.entries[slot as usize].as_ref().expect("bucket points at a free slot");
            if value_eql(env, entry.key, key)? {
                return Ok(Some(slot as usize));
            }
        }
        Ok(None)
    }

    pub fn get(&self, env: &mut Env, key: Value) -> Result<Option<Value>, Unwind> {
        let hash = value_hash(env, key)?;
        Ok(self.find_slot(env, key, hash)?.map(|slot| self.entries[slot].as_ref().unwrap().value))
    }

    /// Insert or update. Updating an existing key keeps its position in
    /// the order list.
    pub fn insert(&mut self, env: &mut Env, key: Value, value: Value) -> Result<(), Unwind> {
        let hash = value_hash(env, key)?;
        if let Some(slot) = self.find_slot(env, key, hash)? {
            self.entries[slot].as_mut().unwrap().value = value;
            return Ok(());
        }
        if self.iterating.load(Ordering::Relaxed) {
            return Err(env.raise("RuntimeError", "can't add a new key into hash during iteration"));
        }
        let slot = match self.free.pop() {
            Some(slot) => {
                self.entries[slot] = Some(Entry { key, value, hash, prev: self.tail, next: NONE });
                slot
            }
            None => {
                self.entries.push(Some(Entry { key, value, hash, prev: self.tail, next: NONE }));
                self.entries.len() - 1
            }
        };
        if self.tail != NONE {
            self.entries[self.tail as usize].as_mut().unwrap().next = slot as i32;
        } else {
            self.head = slot as i32;
        }
        self.tail = slot as i32;
        self.buckets.entry(hash).or_default().push(slot as u32);
        Ok(())
    }

    pub fn remove(&mut self, env: &mut Env, key: Value) -> Result<Option<Value>, Unwind> {
        let hash = value_hash(env, key)?;
        let Some(slot) = self.find_slot(env, key, hash)? else { return Ok(None) };
        if self.iterating.load(Ordering::Relaxed) {
            return Err(env.raise("RuntimeError", "can't delete from hash during iteration"));
        }
        let entry = self.entries[slot].take().expect("slot already free");
        if entry.prev != NONE {
            self.entries[entry.prev as usize].as_mut().unwrap().next = entry.next;
        } else {
            self.head = entry.next;
        }
        if entry.next != NONE {
            self.entries[entry.next as usize].as_mut().unwrap().prev = entry.prev;
        } else {
            self.tail = entry.prev;
        }
        if let Some(candidates) = self.buckets.get_mut(&hash) {
            candidates.retain(|&s| s as usize != slot);
            if candidates.is_empty() {
                self.buckets.remove(&hash);
            }
        }
        self.free.push(slot);
        Ok(Some(entry.value))
    }

    /// Key/value pairs in insertion order.
    pub fn pairs(&self) -> Vec<(Value, Value)> {
        let mut out = Vec::with_capacity(self.len());
        let mut slot = self.head;
        while slot != NONE {
            let entry = self.entries[slot as usize].as_ref().expect("order list hit a free slot");
            out.push((entry.key, entry.value));
            slot = entry.next;
        }
        out
    }

    pub fn keys(&self) -> Vec<Value> {
        self.pairs().into_iter().map(|(k, _)| k).collect()
    }

    pub fn values(&self) -> Vec<Value> {
        self.pairs().into_iter().map(|(_, v)| v).collect()
    }

    pub fn is_iterating(&self) -> bool {
        self.iterating.load(Ordering::Relaxed)
    }

    pub(crate) fn set_iterating(&self, on: bool) {
        self.iterating.store(on, Ordering::Relaxed);
    }

    pub fn duplicate(&self) -> HashPayload {
        HashPayload {
            entries: self.entries.clone(),
            free: self.free.clone(),
            head: self.head,
            tail: self.tail,
            buckets: self.buckets.clone(),
            iterating: AtomicBool::new(false),
        }
    }

    pub fn visit(&self, visitor: &mut Visitor) {
        for entry in self.entries.iter().flatten() {
            visitor.visit(entry.key);
            visitor.visit(entry.value);
        }
    }
}

impl Default for HashPayload {
    fn default() -> Self {
        Self::new()
    }
}

/// Allocate a Hash cell.
pub fn new_hash() -> Value {
    let klass = GlobalEnv::the().hash_class();
    Heap::the().allocate(Object::new(klass, Payload::Hash(Box::new(HashPayload::new()))))
}

/// Insert under the cell's striped lock; atomic against other threads
/// without the global lock.
pub fn hash_set(env: &mut Env, hash: Value, key: Value, value: Value) -> Result {
    hash.assert_not_frozen(env)?;
    let _guard = lock_object(hash);
    hash.object().hash_mut().insert(env, key, value)?;
    Ok(value)
}

pub fn hash_get(env: &mut Env, hash: Value, key: Value) -> Result {
    let found = hash.object().hash().get(env, key)?;
    Ok(found.unwrap_or_else(|| GlobalEnv::the().nil_obj()))
}

pub fn hash_delete(env: &mut Env, hash: Value, key: Value) -> Result {
    hash.assert_not_frozen(env)?;
    let _guard = lock_object(hash);
    let removed = hash.object().hash_mut().remove(env, key)?;
    Ok(removed.unwrap_or_else(|| GlobalEnv::the().nil_obj()))
}

/// Iterate pairs with the mutation guard held.
pub fn hash_each<F>(env: &mut Env, hash: Value, mut f: F) -> Result<(), Unwind>
where
    F: FnMut(&mut Env, Value, Value) -> Result<(), Unwind>,
{
    let obj = hash.object();
    obj.hash().set_iterating(true);
    let mut result = Ok(());
    for (key, value) in obj.hash().pairs() {
        if let Err(unwind) = f(env, key, value) {
            result = Err(unwind);
            break;
        }
    }
    obj.hash().set_iterating(false);
    result
}

// Key hashing and equality.

/// True if the receiver's class chain defines its own version of `name`
/// (anything below the root Object default).
fn has_custom(receiver: Value, name: &str) -> bool {
    let object = GlobalEnv::the().object_class();
    match dispatch::find_method(receiver, intern(name).symbol_id()) {
        Lookup::Found(info) => info.owner != object,
        _ => false,
    }
}

pub fn value_hash(env: &mut Env, value: Value) -> Result<u64, Unwind> {
    let mut hasher = DefaultHasher::new();
    if value.is_integer() {
        value.integer_value().hash(&mut hasher);
        return Ok(hasher.finish());
    }
    let obj = value.object();
    match &obj.payload {
        Payload::Nil => 0u8.hash(&mut hasher),
        Payload::True => 1u8.hash(&mut hasher),
        Payload::False => 2u8.hash(&mut hasher),
        Payload::Symbol(name) => name.hash(&mut hasher),
        Payload::String(s) => s.bytes().hash(&mut hasher),
        Payload::Float(f) => f.to_bits().hash(&mut hasher),
        Payload::BigInteger(b) => {
            // A boxed integer must hash like the equal immediate.
            use num_traits::ToPrimitive;
            match b.to_i64() {
                Some(n) => n.hash(&mut hasher),
                None => b.hash(&mut hasher),
            }
        }
        _ => {
            if has_custom(value, "hash") {
                let hashed = value.send(env, intern("hash"), &[], None)?;
                if hashed.is_integer() {
                    return Ok(hashed.integer_value() as u64);
                }
            }
            value.object_id().hash(&mut hasher);
        }
    }
    Ok(hasher.finish())
}

pub fn value_eql(env: &mut Env, a: Value, b: Value) -> Result<bool, Unwind> {
    if a == b {
        return Ok(true);
    }
    if a.is_integer() || b.is_integer() {
        return Ok(integer_eql(a, b));
    }
    let (ao, bo) = (a.object(), b.object());
    match (&ao.payload, &bo.payload) {
        (Payload::String(x), Payload::String(y)) => Ok(x.bytes() == y.bytes()),
        (Payload::Float(x), Payload::Float(y)) => Ok(x.to_bits() == y.to_bits()),
        (Payload::BigInteger(x), Payload::BigInteger(y)) => Ok(x == y),
        _ => {
            if has_custom(a, "eql?") {
                let eq = a.send(env, intern("eql?"), &[b], None)?;
                return Ok(eq.is_truthy());
            }
            Ok(false)
        }
    }
}

fn integer_eql(a: Value, b: Value) -> bool {
    // Mixed fixnum/bignum comparisons; same-fixnum was identity above.
    match (a.is_integer(), b.is_integer()) {
        (true, false) => match &b.object().payload {
            Payload::BigInteger(big) => big == &num_bigint::BigInt::from(a.integer_value()),
            _ => false,
        },
        (false, true) => match &a.object().payload {
            Payload::BigInteger(big) => big == &num_bigint::BigInt::from(b.integer_value()),
            _ => false,
        },
        _ => false,
    }
}

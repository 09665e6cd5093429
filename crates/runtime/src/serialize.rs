//! Marshal-equivalent serialization
//!
//! Core values dump to a typed mirror enum and ride bincode on the wire.
//! Identity-bearing objects (IO, Thread, Fiber, Proc, classes) do not
//! dump; asking is a `TypeError`, as Marshal has it.

use serde::{Deserialize, Serialize};

use crate::env::Env;
use crate::global_env::GlobalEnv;
use crate::hash;
use crate::kernel;
use crate::object::Payload;
use crate::rational;
use crate::string;
use crate::symbol::intern;
use crate::value::Value;
use crate::{Result, Unwind};

/// Wire mirror of the dumpable core values.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub enum TypedValue {
    Nil,
    True,
    False,
    Integer(i64),
    BigInteger(String),
    Float(f64),
    String(Vec<u8>),
    Symbol(String),
    Array(Vec<TypedValue>),
    Hash(Vec<(TypedValue, TypedValue)>),
    Rational { numerator: i64, denominator: i64 },
    Range { begin: Box<TypedValue>, end: Box<TypedValue>, exclude_end: bool },
}

fn undumpable(env: &mut Env, value: Value) -> Unwind {
    env.raise("TypeError", format!("can't dump {}", kernel::class_name(value.klass())))
}

fn to_typed(env: &mut Env, value: Value) -> Result<TypedValue, Unwind> {
    if value.is_integer() {
        return Ok(TypedValue::Integer(value.integer_value()));
    }
    let obj = value.object();
    let typed = match &obj.payload {
        Payload::Nil => TypedValue::Nil,
        Payload::True => TypedValue::True,
        Payload::False => TypedValue::False,
        Payload::BigInteger(big) => TypedValue::BigInteger(big.to_string()),
        Payload::Float(f) => TypedValue::Float(*f),
        Payload::String(s) => TypedValue::String(s.bytes().to_vec()),
        Payload::Symbol(name) => TypedValue::Symbol((*name).to_string()),
        Payload::Array(a) => {
            let mut items = Vec::with_capacity(a.len());
            for item in a.to_vec() {
                items.push(to_typed(env, item)?);
            }
            TypedValue::Array(items)
        }
        Payload::Hash(h) => {
            let mut pairs = Vec::with_capacity(h.len());
            for (key, val) in h.pairs() {
                pairs.push((to_typed(env, key)?, to_typed(env, val)?));
            }
            TypedValue::Hash(pairs)
        }
        Payload::Rational(_) => {
            let (numerator, denominator) = rational::rational_parts(value);
            TypedValue::Rational { numerator, denominator }
        }
        Payload::Range(r) => TypedValue::Range {
            begin: Box::new(to_typed(env, r.begin)?),
            end: Box::new(to_typed(env, r.end)?),
            exclude_end: r.exclude_end,
        },
        _ => return Err(undumpable(env, value)),
    };
    Ok(typed)
}

fn from_typed(env: &mut Env, typed: &TypedValue) -> Result {
    let genv = GlobalEnv::the();
    let value = match typed {
        TypedValue::Nil => genv.nil_obj(),
        TypedValue::True => genv.true_obj(),
        TypedValue::False => genv.false_obj(),
        TypedValue::Integer(n) => Value::integer(*n),
        TypedValue::BigInteger(digits) => crate::integer::parse(env, digits)?,
        TypedValue::Float(f) => crate::global_env::new_float(*f),
        TypedValue::String(bytes) => string::new_string_from_bytes(bytes.clone()),
        TypedValue::Symbol(name) => intern(name),
        TypedValue::Array(items) => {
            let mut values = Vec::with_capacity(items.len());
            for item in items {
                values.push(from_typed(env, item)?);
            }
            crate::array::new_array(values)
        }
        TypedValue::Hash(pairs) => {
            let cell = hash::new_hash();
            for (key, val) in pairs {
                let key = from_typed(env, key)?;
                let val = from_typed(env, val)?;
                hash::hash_set(env, cell, key, val)?;
            }
            cell
        }
        TypedValue::Rational { numerator, denominator } => {
            rational::new_rational(env, *numerator, *denominator)?
        }
        TypedValue::Range { begin, end, exclude_end } => {
            let begin = from_typed(env, begin)?;
            let end = from_typed(env, end)?;
            crate::range::new_range(begin, end, *exclude_end)
        }
    };
    Ok(value)
}

/// Dump one value to bytes.
pub fn dump(env: &mut Env, value: Value) -> Result<Vec<u8>, Unwind> {
    let typed = to_typed(env, value)?;
    bincode::serialize(&typed).map_err(|err| env.raise("RuntimeError", format!("dump failed: {err}")))
}

/// Load one value from bytes.
pub fn load(env: &mut Env, bytes: &[u8]) -> Result {
    let typed: TypedValue = bincode::deserialize(bytes)
        .map_err(|err| env.raise("ArgumentError", format!("marshal data too short or corrupt: {err}")))?;
    from_typed(env, &typed)
}

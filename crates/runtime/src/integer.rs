//! Integer arithmetic
//!
//! Immediates cover ±2^62; anything past that lives in a boxed cell
//! holding a big integer. Arithmetic runs on the immediate fast path and
//! auto-promotes on overflow; big results that shrink back into the
//! immediate range re-normalize, so a given mathematical integer has one
//! canonical representation.

use num_bigint::BigInt;
use num_traits::ToPrimitive;

use garnet_core::tagged::Tagged;

use crate::env::Env;
use crate::global_env::GlobalEnv;
use crate::heap::Heap;
use crate::object::{Object, ObjectType, Payload};
use crate::value::Value;
use crate::Result;

/// Box an i64 into a big-integer cell, regardless of magnitude. Used by
/// `Value::integer` for out-of-range values and by `object()` hydration of
/// immediates.
pub fn boxed_from_i64(n: i64) -> Value {
    boxed_from_bigint(BigInt::from(n))
}

fn boxed_from_bigint(big: BigInt) -> Value {
    let klass = GlobalEnv::the().integer_class();
    Heap::the().allocate(Object::new(klass, Payload::BigInteger(big)))
}

/// The canonical Value for a big integer: immediate when it fits.
pub fn normalized(big: BigInt) -> Value {
    match big.to_i64() {
        Some(n) if Tagged::fits_fixnum(n) => Value::fixnum(n),
        _ => boxed_from_bigint(big),
    }
}

/// True for immediates and boxed integers alike.
pub fn is_any_integer(value: Value) -> bool {
    value.is_integer() || value.object_type() == ObjectType::Integer
}

/// Read any integer value as a BigInt.
pub fn to_bigint(env: &mut Env, value: Value) -> Result<BigInt> {
    if value.is_integer() {
        return Ok(BigInt::from(value.integer_value()));
    }
    match &value.object().payload {
        Payload::BigInteger(big) => Ok(big.clone()),
        _ => Err(env.raise(
            "TypeError",
            format!("can't convert {} into Integer", crate::kernel::class_name(value.klass())),
        )),
    }
}

pub fn add(env: &mut Env, a: Value, b: Value) -> Result {
    if a.is_integer() && b.is_integer() {
        if let Some(sum) = a.integer_value().checked_add(b.integer_value()) {
            if Tagged::fits_fixnum(sum) {
                return Ok(Value::fixnum(sum));
            }
        }
    }
    let (x, y) = (to_bigint(env, a)?, to_bigint(env, b)?);
    Ok(normalized(x + y))
}

pub fn sub(env: &mut Env, a: Value, b: Value) -> Result {
    if a.is_integer() && b.is_integer() {
        if let Some(diff) = a.integer_value().checked_sub(b.integer_value()) {
            if Tagged::fits_fixnum(diff) {
                return Ok(Value::fixnum(diff));
            }
        }
    }
    let (x, y) = (to_bigint(env, a)?, to_bigint(env, b)?);
    Ok(normalized(x - y))
}

pub fn mul(env: &mut Env, a: Value, b: Value) -> Result {
    if a.is_integer() && b.is_integer() {
        if let Some(product) = a.integer_value().checked_mul(b.integer_value()) {
            if Tagged::fits_fixnum(product) {
                return Ok(Value::fixnum(product));
            }
        }
    }
    let (x, y) = (to_bigint(env, a)?, to_bigint(env, b)?);
    Ok(normalized(x * y))
}

/// Floored division (Ruby `/` on integers).
pub fn div(env: &mut Env, a: Value, b: Value) -> Result {
    if a.is_integer() && b.is_integer() {
        let (x, y) = (a.integer_value(), b.integer_value());
        if y == 0 {
            return Err(env.raise("ZeroDivisionError", "divided by 0"));
        }
        let mut quotient = x / y;
        if x % y != 0 && (x < 0) != (y < 0) {
            quotient -= 1;
        }
        return Ok(Value::integer(quotient));
    }
    let (x, y) = (to_bigint(env, a)?, to_bigint(env, b)?);
    let zero = BigInt::from(0);
    if y == zero {
        return Err(env.raise("ZeroDivisionError", "divided by 0"));
    }
    let mut quotient = &x / &y;
    let remainder = &x - &quotient * &y;
    if remainder != zero && (remainder < zero) != (y < zero) {
        quotient -= 1;
    }
    Ok(normalized(quotient))
}

pub fn compare(env: &mut Env, a: Value, b: Value) -> Result<std::cmp::Ordering> {
    if a.is_integer() && b.is_integer() {
        return Ok(a.integer_value().cmp(&b.integer_value()));
    }
    let (x, y) = (to_bigint(env, a)?, to_bigint(env, b)?);
    Ok(x.cmp(&y))
}

pub fn eq(env: &mut Env, a: Value, b: Value) -> Result<bool> {
    Ok(compare(env, a, b)? == std::cmp::Ordering::Equal)
}

/// Decimal rendering; round-trips through [`parse`].
pub fn to_s(value: Value) -> String {
    if value.is_integer() {
        return value.integer_value().to_string();
    }
    match &value.object().payload {
        Payload::BigInteger(big) => big.to_string(),
        _ => panic!("to_s on a non-integer cell"),
    }
}

/// `Integer(String)`: strict decimal parse with optional sign and
/// surrounding whitespace.
pub fn parse(env: &mut Env, text: &str) -> Result {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(env.raise("ArgumentError", format!("invalid value for Integer(): {text:?}")));
    }
    match trimmed.parse::<BigInt>() {
        Ok(big) => Ok(normalized(big)),
        Err(_) => Err(env.raise("ArgumentError", format!("invalid value for Integer(): {text:?}"))),
    }
}

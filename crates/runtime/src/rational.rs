//! Rational and Complex payloads
//!
//! Both are frozen on construction. Rationals are stored normalized: the
//! denominator is positive and the pair is reduced by its gcd.

use crate::args::Args;
use crate::block::Block;
use crate::env::Env;
use crate::gc::Visitor;
use crate::global_env::GlobalEnv;
use crate::heap::Heap;
use crate::klass;
use crate::object::{Object, Payload};
use crate::symbol::intern;
use crate::value::Value;
use crate::{Result, Unwind};

#[derive(Clone, Copy)]
pub struct RationalPayload {
    pub numerator: Value,
    pub denominator: Value,
}

impl RationalPayload {
    pub fn visit(&self, visitor: &mut Visitor) {
        visitor.visit(self.numerator);
        visitor.visit(self.denominator);
    }
}

#[derive(Clone, Copy)]
pub struct ComplexPayload {
    pub real: Value,
    pub imaginary: Value,
}

impl ComplexPayload {
    pub fn visit(&self, visitor: &mut Visitor) {
        visitor.visit(self.real);
        visitor.visit(self.imaginary);
    }
}

fn gcd(mut a: i64, mut b: i64) -> i64 {
    while b != 0 {
        let t = b;
        b = a % b;
        a = t;
    }
    a.abs().max(1)
}

/// Build a normalized, frozen Rational from fixnum parts.
pub fn new_rational(env: &mut Env, numerator: i64, denominator: i64) -> Result {
    if denominator == 0 {
        return Err(env.raise("ZeroDivisionError", "divided by 0"));
    }
    let sign = if denominator < 0 { -1 } else { 1 };
    let divisor = gcd(numerator, denominator);
    let numerator = sign * numerator / divisor;
    let denominator = sign * denominator / divisor;

    let klass = GlobalEnv::the().rational_class();
    let payload = RationalPayload {
        numerator: Value::integer(numerator),
        denominator: Value::integer(denominator),
    };
    let cell = Heap::the().allocate(Object::new(klass, Payload::Rational(payload)));
    cell.freeze();
    Ok(cell)
}

/// Build a frozen Complex.
pub fn new_complex(real: Value, imaginary: Value) -> Value {
    let klass = GlobalEnv::the().complex_class();
    let payload = ComplexPayload { real, imaginary };
    let cell = Heap::the().allocate(Object::new(klass, Payload::Complex(payload)));
    cell.freeze();
    cell
}

pub fn rational_parts(rational: Value) -> (i64, i64) {
    let obj = rational.object();
    match &obj.payload {
        Payload::Rational(r) => (r.numerator.integer_value(), r.denominator.integer_value()),
        _ => panic!("expected a rational cell"),
    }
}

fn complex_parts(complex: Value) -> (Value, Value) {
    let obj = complex.object();
    match &obj.payload {
        Payload::Complex(c) => (c.real, c.imaginary),
        _ => panic!("expected a complex cell"),
    }
}

// Native methods.

fn rational_s_new(env: &mut Env, _self: Value, args: Args, _block: Option<&Block>) -> Result {
    let (numerator, denominator) = (args.at_or_nil(0), args.at_or_nil(1));
    if !numerator.is_integer() || !denominator.is_integer() {
        return Err(env.raise("TypeError", "no implicit conversion into Integer"));
    }
    new_rational(env, numerator.integer_value(), denominator.integer_value())
}

fn rational_numerator(_env: &mut Env, self_: Value, _args: Args, _block: Option<&Block>) -> Result {
    Ok(Value::integer(rational_parts(self_).0))
}

fn rational_denominator(_env: &mut Env, self_: Value, _args: Args, _block: Option<&Block>) -> Result {
    Ok(Value::integer(rational_parts(self_).1))
}

fn complex_s_rectangular(_env: &mut Env, _self: Value, args: Args, _block: Option<&Block>) -> Result {
    Ok(new_complex(args.at_or_nil(0), args.at_or_nil(1)))
}

fn complex_real(_env: &mut Env, self_: Value, _args: Args, _block: Option<&Block>) -> Result {
    Ok(complex_parts(self_).0)
}

fn complex_imaginary(_env: &mut Env, self_: Value, _args: Args, _block: Option<&Block>) -> Result {
    Ok(complex_parts(self_).1)
}

pub fn install(env: &mut Env) -> Result<(), Unwind> {
    let genv = GlobalEnv::the();
    let rational_class = genv.rational_class();
    let complex_class = genv.complex_class();

    klass::define_singleton_method(env, rational_class, intern("new"), rational_s_new, 2)?;
    klass::define_method(env, rational_class, intern("numerator"), rational_numerator, 0)?;
    klass::define_method(env, rational_class, intern("denominator"), rational_denominator, 0)?;

    klass::define_singleton_method(env, complex_class, intern("rectangular"), complex_s_rectangular, 2)?;
    klass::define_method(env, complex_class, intern("real"), complex_real, 0)?;
    klass::define_method(env, complex_class, intern("imaginary"), complex_imaginary, 0)?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::gcd;

    #[test]
    fn gcd_basics() {
        assert_eq!(gcd(12, 8), 4);
        assert_eq!(gcd(-12, 8), 4);
        assert_eq!(gcd(7, 0), 7);
        assert_eq!(gcd(0, 0), 1);
    }
}

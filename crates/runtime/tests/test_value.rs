//! Value handle behavior: immediates, boxing boundaries, truthiness,
//! object identity, and integer arithmetic round-trips.

use garnet_runtime::{Env, Value, boot, integer, intern};
use garnet_runtime::object::ObjectType;
use serial_test::serial;

const FIXNUM_MAX: i64 = (1 << 62) - 1;
const FIXNUM_MIN: i64 = -(1 << 62);

#[test]
#[serial]
fn fixnum_boundary_boxes() {
    boot();
    let max = Value::integer(FIXNUM_MAX);
    assert!(max.is_integer());
    assert_eq!(max.integer_value(), FIXNUM_MAX);

    let min = Value::integer(FIXNUM_MIN);
    assert!(min.is_integer());
    assert_eq!(min.integer_value(), FIXNUM_MIN);

    let boxed = Value::integer(FIXNUM_MAX + 1);
    assert!(!boxed.is_integer());
    assert_eq!(boxed.object_type(), ObjectType::Integer);
}

#[test]
#[serial]
fn arithmetic_promotes_on_overflow() {
    boot();
    let mut env = Env::new();
    let max = Value::integer(FIXNUM_MAX);
    let one = Value::integer(1);

    let sum = integer::add(&mut env, max, one).unwrap();
    assert!(!sum.is_integer());
    assert_eq!(integer::to_s(sum), (FIXNUM_MAX as i128 + 1).to_string());

    // Shrinking back down re-normalizes to an immediate.
    let back = integer::sub(&mut env, sum, one).unwrap();
    assert!(back.is_integer());
    assert_eq!(back.integer_value(), FIXNUM_MAX);
}

#[test]
#[serial]
fn to_s_parse_round_trip() {
    boot();
    let mut env = Env::new();
    for n in [0i64, 1, -1, 42, FIXNUM_MAX, FIXNUM_MIN, i64::MAX, i64::MIN] {
        let value = Value::integer(n);
        let text = integer::to_s(value);
        let parsed = integer::parse(&mut env, &text).unwrap();
        assert!(integer::eq(&mut env, value, parsed).unwrap(), "round trip failed for {n}");
    }
}

#[test]
#[serial]
fn division_by_zero_raises() {
    boot();
    let mut env = Env::new();
    let err = integer::div(&mut env, Value::integer(1), Value::integer(0)).unwrap_err();
    assert!(err.0.is_a(garnet_runtime::exception::exception_class("ZeroDivisionError")));
}

#[test]
#[serial]
fn floored_division() {
    boot();
    let mut env = Env::new();
    let div = |a: i64, b: i64, env: &mut Env| {
        integer::div(env, Value::integer(a), Value::integer(b)).unwrap().integer_value()
    };
    assert_eq!(div(7, 2, &mut env), 3);
    assert_eq!(div(-7, 2, &mut env), -4);
    assert_eq!(div(7, -2, &mut env), -4);
    assert_eq!(div(-7, -2, &mut env), 3);
}

#[test]
#[serial]
fn truthiness() {
    let genv = boot();
    assert!(!genv.nil_obj().is_truthy());
    assert!(!genv.false_obj().is_truthy());
    assert!(genv.true_obj().is_truthy());
    assert!(Value::integer(0).is_truthy());
    assert!(intern("sym").is_truthy());
}

#[test]
#[serial]
fn object_id_stability() {
    boot();
    let a = Value::integer(41);
    let b = Value::integer(41);
    assert_eq!(a.object_id(), a.object_id());
    assert_eq!(a.object_id(), b.object_id());

    let mut env = Env::new();
    let genv = garnet_runtime::GlobalEnv::the();
    let x = garnet_runtime::kernel::obj_new(&mut env, genv.object_class(), &[], None).unwrap();
    let y = garnet_runtime::kernel::obj_new(&mut env, genv.object_class(), &[], None).unwrap();
    assert_ne!(x.object_id(), y.object_id());
    assert_eq!(x.object_id(), x.object_id());
}

#[test]
#[serial]
fn symbols_are_interned_by_identity() {
    boot();
    let a = intern("shared_name");
    let b = intern("shared_name");
    assert_eq!(a.raw(), b.raw());
    assert_ne!(intern("shared_name").raw(), intern("other_name").raw());
}

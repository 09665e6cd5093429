//! The remaining payload families through dispatch: Regexp/MatchData,
//! Random, Time, and the frozen numerics (Rational, Complex).

use garnet_runtime::object::ObjectType;
use garnet_runtime::{Env, GlobalEnv, Value, boot, exception, intern, string};
use serial_test::serial;

#[test]
#[serial]
fn regexp_compiles_and_matches() {
    boot();
    let mut env = Env::new();
    let regexp_class = GlobalEnv::the().regexp_class();

    let pattern = string::new_string("a(b+)c");
    let re = regexp_class.send(&mut env, intern("new"), &[pattern], None).unwrap();
    assert_eq!(re.object_type(), ObjectType::Regexp);
    assert_eq!(
        re.send(&mut env, intern("source"), &[], None).unwrap().object().string().to_rust_string(),
        "a(b+)c"
    );

    let subject = string::new_string("xxabbbcyy");
    let md = re.send(&mut env, intern("match"), &[subject], None).unwrap();
    assert_eq!(md.object_type(), ObjectType::MatchData);

    let whole = md.send(&mut env, intern("[]"), &[Value::integer(0)], None).unwrap();
    assert_eq!(whole.object().string().to_rust_string(), "abbbc");
    let group = md.send(&mut env, intern("[]"), &[Value::integer(1)], None).unwrap();
    assert_eq!(group.object().string().to_rust_string(), "bbb");
    // Out-of-range groups read as nil.
    assert!(md.send(&mut env, intern("[]"), &[Value::integer(5)], None).unwrap().is_nil());

    let miss = re.send(&mut env, intern("match"), &[string::new_string("zzz")], None).unwrap();
    assert!(miss.is_nil());
}

#[test]
#[serial]
fn invalid_patterns_raise() {
    boot();
    let mut env = Env::new();
    let regexp_class = GlobalEnv::the().regexp_class();
    let err = regexp_class.send(&mut env, intern("new"), &[string::new_string("(")], None).unwrap_err();
    assert!(err.0.is_a(exception::exception_class("RegexpError")));
}

#[test]
#[serial]
fn random_is_reproducible_from_its_seed() {
    boot();
    let mut env = Env::new();
    let random_class = GlobalEnv::the().random_class();

    let r1 = random_class.send(&mut env, intern("new"), &[Value::integer(42)], None).unwrap();
    let r2 = random_class.send(&mut env, intern("new"), &[Value::integer(42)], None).unwrap();
    assert_eq!(r1.send(&mut env, intern("seed"), &[], None).unwrap(), Value::integer(42));

    let max = Value::integer(1_000_000);
    for _ in 0..4 {
        let a = r1.send(&mut env, intern("rand"), &[max], None).unwrap();
        let b = r2.send(&mut env, intern("rand"), &[max], None).unwrap();
        assert_eq!(a, b);
        assert!(a.integer_value() >= 0 && a.integer_value() < 1_000_000);
    }

    // Unseeded generators draw their seed from the OS.
    let r3 = random_class.send(&mut env, intern("new"), &[], None).unwrap();
    let n = r3.send(&mut env, intern("rand"), &[Value::integer(10)], None).unwrap();
    assert!(n.integer_value() >= 0 && n.integer_value() < 10);

    let err = r3.send(&mut env, intern("rand"), &[Value::integer(0)], None).unwrap_err();
    assert!(err.0.is_a(exception::exception_class("ArgumentError")));
}

#[test]
#[serial]
fn time_carries_seconds_and_nanoseconds() {
    boot();
    let mut env = Env::new();
    let time_class = GlobalEnv::the().time_class();

    let at = time_class.send(&mut env, intern("at"), &[Value::integer(1_234_567)], None).unwrap();
    assert_eq!(at.object_type(), ObjectType::Time);
    assert_eq!(at.send(&mut env, intern("to_i"), &[], None).unwrap(), Value::integer(1_234_567));
    assert_eq!(at.send(&mut env, intern("nsec"), &[], None).unwrap(), Value::integer(0));

    let now = time_class.send(&mut env, intern("now"), &[], None).unwrap();
    let seconds = now.send(&mut env, intern("to_i"), &[], None).unwrap();
    assert!(seconds.integer_value() > 1_000_000_000);
}

#[test]
#[serial]
fn rational_and_complex_are_normalized_and_frozen() {
    boot();
    let mut env = Env::new();
    let genv = GlobalEnv::the();

    let rational = genv
        .rational_class()
        .send(&mut env, intern("new"), &[Value::integer(6), Value::integer(-8)], None)
        .unwrap();
    assert_eq!(rational.send(&mut env, intern("numerator"), &[], None).unwrap(), Value::integer(-3));
    assert_eq!(rational.send(&mut env, intern("denominator"), &[], None).unwrap(), Value::integer(4));
    assert!(rational.is_frozen());

    let complex = genv
        .complex_class()
        .send(&mut env, intern("rectangular"), &[Value::integer(3), Value::integer(4)], None)
        .unwrap();
    assert_eq!(complex.object_type(), ObjectType::Complex);
    assert_eq!(complex.send(&mut env, intern("real"), &[], None).unwrap(), Value::integer(3));
    assert_eq!(complex.send(&mut env, intern("imaginary"), &[], None).unwrap(), Value::integer(4));
    assert!(complex.is_frozen());
}

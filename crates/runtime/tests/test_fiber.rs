//! Fiber contract: resume/yield round-trips, argument delivery, status
//! transitions, error propagation, and stack-size validation.

use garnet_runtime::{Args, Block, Env, Value, boot, exception, fiber, intern};
use serial_test::serial;

fn round_trip_body(env: &mut Env, _self: Value, args: Args, _block: Option<&Block>) -> garnet_runtime::Result {
    let x = args.at_or_nil(0).integer_value();
    let y = fiber::fiber_yield(env, &[Value::integer(x + 1)])?;
    fiber::fiber_yield(env, &[Value::integer(y.integer_value() + 1)])?;
    Ok(intern("done"))
}

#[test]
#[serial]
fn resume_and_yield_round_trip() {
    boot();
    let mut env = Env::new();
    let block = Block::new(&env, Value::NULL, 1, round_trip_body);
    let f = fiber::new_fiber(&mut env, block, None).unwrap();

    let first = f.send(&mut env, intern("resume"), &[Value::integer(10)], None).unwrap();
    let second = f.send(&mut env, intern("resume"), &[Value::integer(20)], None).unwrap();
    let third = f.send(&mut env, intern("resume"), &[Value::integer(0)], None).unwrap();

    assert_eq!(first, Value::integer(11));
    assert_eq!(second, Value::integer(21));
    assert_eq!(third, intern("done"));
}

#[test]
#[serial]
fn status_follows_the_lifecycle() {
    boot();
    let mut env = Env::new();

    fn yield_once(env: &mut Env, _self: Value, _args: Args, _block: Option<&Block>) -> garnet_runtime::Result {
        fiber::fiber_yield(env, &[])?;
        Ok(Value::integer(0))
    }
    let block = Block::new(&env, Value::NULL, 0, yield_once);
    let f = fiber::new_fiber(&mut env, block, None).unwrap();

    assert_eq!(fiber::status_symbol(f), intern("created"));
    assert!(f.object().fiber().is_alive());

    fiber::resume(&mut env, f, &[]).unwrap();
    assert_eq!(fiber::status_symbol(f), intern("suspended"));
    assert!(f.object().fiber().is_alive());

    fiber::resume(&mut env, f, &[]).unwrap();
    assert_eq!(fiber::status_symbol(f), intern("terminated"));
    assert!(!f.object().fiber().is_alive());
}

#[test]
#[serial]
fn resuming_a_dead_fiber_raises() {
    boot();
    let mut env = Env::new();

    fn immediate(_env: &mut Env, _self: Value, _args: Args, _block: Option<&Block>) -> garnet_runtime::Result {
        Ok(Value::integer(1))
    }
    let block = Block::new(&env, Value::NULL, 0, immediate);
    let f = fiber::new_fiber(&mut env, block, None).unwrap();
    fiber::resume(&mut env, f, &[]).unwrap();

    let err = fiber::resume(&mut env, f, &[]).unwrap_err();
    assert!(err.0.is_a(exception::exception_class("FiberError")));
}

#[test]
#[serial]
fn yield_from_the_root_fiber_raises() {
    boot();
    let mut env = Env::new();
    let err = fiber::fiber_yield(&mut env, &[]).unwrap_err();
    assert!(err.0.is_a(exception::exception_class("FiberError")));
}

#[test]
#[serial]
fn errors_inside_a_fiber_surface_in_the_resumer() {
    boot();
    let mut env = Env::new();

    fn explode(env: &mut Env, _self: Value, _args: Args, _block: Option<&Block>) -> garnet_runtime::Result {
        Err(env.raise("RuntimeError", "inside fiber"))
    }
    let block = Block::new(&env, Value::NULL, 0, explode);
    let f = fiber::new_fiber(&mut env, block, None).unwrap();

    let err = fiber::resume(&mut env, f, &[]).unwrap_err();
    assert!(err.0.is_a(exception::exception_class("RuntimeError")));
    assert_eq!(exception::message_of(err.0), "inside fiber");
    assert_eq!(fiber::status_symbol(f), intern("terminated"));
}

#[test]
#[serial]
fn zero_byte_stack_is_rejected() {
    boot();
    let mut env = Env::new();

    fn unused(_env: &mut Env, _self: Value, _args: Args, _block: Option<&Block>) -> garnet_runtime::Result {
        Ok(Value::integer(0))
    }
    let block = Block::new(&env, Value::NULL, 0, unused);
    let err = fiber::new_fiber(&mut env, block, Some(0)).unwrap_err();
    assert!(err.0.is_a(exception::exception_class("ArgumentError")));
}

#[test]
#[serial]
fn multiple_values_yield_as_an_array() {
    boot();
    let mut env = Env::new();

    fn pair(env: &mut Env, _self: Value, _args: Args, _block: Option<&Block>) -> garnet_runtime::Result {
        fiber::fiber_yield(env, &[Value::integer(1), Value::integer(2)])?;
        Ok(Value::integer(0))
    }
    let block = Block::new(&env, Value::NULL, 0, pair);
    let f = fiber::new_fiber(&mut env, block, None).unwrap();

    let yielded = fiber::resume(&mut env, f, &[]).unwrap();
    let items = yielded.object().array().to_vec();
    assert_eq!(items, vec![Value::integer(1), Value::integer(2)]);
}

#[test]
#[serial]
fn suspended_fiber_stack_is_a_gc_root() {
    boot();
    let mut env = Env::new();

    // The fiber parks holding a live object only on its own stack.
    fn hold_and_yield(env: &mut Env, _self: Value, _args: Args, _block: Option<&Block>) -> garnet_runtime::Result {
        let held = garnet_runtime::kernel::obj_new(
            env,
            garnet_runtime::GlobalEnv::the().object_class(),
            &[],
            None,
        )?;
        held.object().ivar_set(intern("@mark").symbol_id(), Value::integer(77));
        fiber::fiber_yield(env, &[])?;
        Ok(held.object().ivar_get(intern("@mark").symbol_id()).unwrap())
    }
    let block = Block::new(&env, Value::NULL, 0, hold_and_yield);
    let f = fiber::new_fiber(&mut env, block, None).unwrap();
    fiber::resume(&mut env, f, &[]).unwrap();

    garnet_runtime::gc::collect();
    garnet_runtime::gc::collect();

    let result = fiber::resume(&mut env, f, &[]).unwrap();
    assert_eq!(result, Value::integer(77));
}

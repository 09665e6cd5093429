//! Exception semantics: rescue matching by ancestry, ensure on every
//! path, retry, cause chains, backtraces, and local jumps.

use garnet_runtime::exception::{self, RescueOutcome};
use garnet_runtime::{Args, Block, Env, Value, block, boot, intern};
use serial_test::serial;

#[test]
#[serial]
fn rescue_matches_by_ancestry() {
    boot();
    let mut env = Env::new();
    let standard_error = exception::exception_class("StandardError");

    // ZeroDivisionError < ArithmeticError < StandardError.
    let result = exception::rescue(
        &mut env,
        |env| Err(env.raise("ZeroDivisionError", "divided by 0")),
        &[standard_error],
        |_env, caught| {
            assert!(caught.is_a(exception::exception_class("ArithmeticError")));
            Ok(RescueOutcome::Done(intern("rescued")))
        },
    )
    .unwrap();
    assert_eq!(result, intern("rescued"));
}

#[test]
#[serial]
fn unmatched_exceptions_keep_unwinding() {
    boot();
    let mut env = Env::new();
    let io_error = exception::exception_class("IOError");

    let err = exception::rescue(
        &mut env,
        |env| Err(env.raise("TypeError", "not io")),
        &[io_error],
        |_env, _caught| Ok(RescueOutcome::Done(intern("nope"))),
    )
    .unwrap_err();
    assert!(err.0.is_a(exception::exception_class("TypeError")));
}

#[test]
#[serial]
fn system_exit_is_not_a_standard_error() {
    boot();
    let mut env = Env::new();
    let standard_error = exception::exception_class("StandardError");

    let err = exception::rescue(
        &mut env,
        |env| Err(exception::system_exit(env, 3)),
        &[standard_error],
        |_env, _caught| Ok(RescueOutcome::Done(intern("caught"))),
    )
    .unwrap_err();
    assert_eq!(err.0.object().exception().exit_status, Some(3));
}

#[test]
#[serial]
fn ensure_runs_on_both_paths() {
    boot();
    let mut env = Env::new();
    let mut ran = 0;

    let ok = exception::ensure(
        &mut env,
        |_env| Ok(Value::integer(1)),
        |_env| {
            ran += 1;
            Ok(())
        },
    );
    assert!(ok.is_ok());

    let mut ran_on_raise = false;
    let err = exception::ensure(
        &mut env,
        |env| Err(env.raise("RuntimeError", "body failed")),
        |_env| {
            ran_on_raise = true;
            Ok(())
        },
    );
    assert!(err.is_err());
    assert_eq!(ran, 1);
    assert!(ran_on_raise);
}

#[test]
#[serial]
fn retry_reenters_the_protected_block() {
    boot();
    let mut env = Env::new();
    let standard_error = exception::exception_class("StandardError");
    let mut attempts = 0;

    let result = exception::rescue(
        &mut env,
        |env| {
            attempts += 1;
            if attempts < 3 { Err(env.raise("RuntimeError", "again")) } else { Ok(Value::integer(attempts)) }
        },
        &[standard_error],
        |_env, _caught| Ok(RescueOutcome::Retry),
    )
    .unwrap();
    assert_eq!(result, Value::integer(3));
    assert_eq!(attempts, 3);
}

#[test]
#[serial]
fn cause_links_to_the_exception_being_handled() {
    boot();
    let mut env = Env::new();
    let standard_error = exception::exception_class("StandardError");

    let err = exception::rescue(
        &mut env,
        |env| Err(env.raise("TypeError", "original")),
        &[standard_error],
        |env, _caught| -> garnet_runtime::Result<RescueOutcome> {
            Err(env.raise("RuntimeError", "secondary"))
        },
    )
    .unwrap_err();

    assert!(err.0.is_a(exception::exception_class("RuntimeError")));
    let cause = err.0.object().exception().cause;
    assert!(cause.is_a(exception::exception_class("TypeError")));
    assert_eq!(exception::message_of(cause), "original");
}

#[test]
#[serial]
fn backtraces_carry_frame_labels() {
    boot();
    let mut env = Env::new();
    let genv = garnet_runtime::GlobalEnv::the();
    let object = genv.object_class();

    fn raiser(env: &mut Env, _self: Value, _args: Args, _block: Option<&Block>) -> garnet_runtime::Result {
        Err(env.raise("RuntimeError", "with trace"))
    }
    garnet_runtime::klass::define_method(&mut env, object, intern("trace_me"), raiser, 0).unwrap();

    let obj = garnet_runtime::kernel::obj_new(&mut env, object, &[], None).unwrap();
    let err = obj.send(&mut env, intern("trace_me"), &[], None).unwrap_err();

    let err_object = err.0.object();
    let trace = &err_object.exception().backtrace;
    assert!(!trace.is_empty());
    assert!(trace[0].to_string().contains("in 'Object#trace_me'"), "got {}", trace[0]);
    assert_eq!(trace.last().unwrap().label, "<main>");
}

#[test]
#[serial]
fn break_routes_to_its_invoker() {
    boot();
    let mut env = Env::new();

    fn breaks(env: &mut Env, _self: Value, _args: Args, _block: Option<&Block>) -> garnet_runtime::Result {
        Err(exception::raise_break(env, Value::integer(5)))
    }
    let b = Block::new(&env, Value::NULL, 0, breaks);
    let result = block::run_block_with_break(&mut env, &b, &[]).unwrap();
    assert_eq!(result, Value::integer(5));
}

#[test]
#[serial]
fn orphaned_break_is_a_local_jump_error() {
    boot();
    let mut env = Env::new();
    let err = exception::raise_break(&mut env, Value::integer(1));
    assert!(err.0.is_a(exception::exception_class("LocalJumpError")));
}

#[test]
#[serial]
fn lambda_absorbs_its_own_return() {
    boot();
    let mut env = Env::new();

    fn returns_early(env: &mut Env, _self: Value, _args: Args, _block: Option<&Block>) -> garnet_runtime::Result {
        Err(exception::raise_return(env, Value::integer(42)))
    }
    let l = Block::lambda(&env, Value::NULL, 0, returns_early);
    let result = l.run(&mut env, &[], None).unwrap();
    assert_eq!(result, Value::integer(42));
}

#[test]
#[serial]
fn jump_carriers_are_invisible_to_rescue() {
    boot();
    let mut env = Env::new();

    // A rescue inside the block invocation must not swallow the break on
    // its way to the invoker.
    fn breaks_through_rescue(
        env: &mut Env,
        _self: Value,
        _args: Args,
        _block: Option<&Block>,
    ) -> garnet_runtime::Result {
        let standard_error = exception::exception_class("StandardError");
        exception::rescue(
            env,
            |env| Err(exception::raise_break(env, Value::integer(9))),
            &[standard_error],
            |_env, _caught| Ok(RescueOutcome::Done(intern("swallowed"))),
        )
    }
    let b = Block::new(&env, Value::NULL, 0, breaks_through_rescue);
    let result = block::run_block_with_break(&mut env, &b, &[]).unwrap();
    assert_eq!(result, Value::integer(9));
}

//! Thread runtime: spawning, join/value, cross-thread raise, sleep and
//! wakeup, fiber-local storage, mutexes, and the death discipline.

use std::time::Duration;

use garnet_runtime::{
    Args, Block, Env, GlobalEnv, Value, boot, exception, intern, mutex, thread,
};
use serial_test::serial;

fn spawn(env: &mut Env, body: garnet_runtime::BlockFn) -> Value {
    let block = Block::new(env, Value::NULL, 0, body);
    thread::thread_new(env, block).unwrap()
}

#[test]
#[serial]
fn join_delivers_value_and_exception() {
    boot();
    let mut env = Env::new();

    fn returns_42(_env: &mut Env, _self: Value, _args: Args, _block: Option<&Block>) -> garnet_runtime::Result {
        Ok(Value::integer(42))
    }
    fn booms(env: &mut Env, _self: Value, _args: Args, _block: Option<&Block>) -> garnet_runtime::Result {
        Err(env.raise("RuntimeError", "boom"))
    }

    let t1 = spawn(&mut env, returns_42);
    let t2 = spawn(&mut env, booms);

    assert_eq!(thread::thread_value(&mut env, t1).unwrap(), Value::integer(42));

    let err = thread::thread_value(&mut env, t2).unwrap_err();
    assert!(err.0.is_a(exception::exception_class("RuntimeError")));
    assert_eq!(exception::message_of(err.0), "boom");
}

#[test]
#[serial]
fn join_rejects_self_and_main() {
    boot();
    let mut env = Env::new();

    let current = thread::current_thread();
    let err = thread::join(&mut env, current).unwrap_err();
    assert!(err.0.is_a(exception::exception_class("ThreadError")));

    let err = thread::join(&mut env, thread::main_thread()).unwrap_err();
    assert!(err.0.is_a(exception::exception_class("ThreadError")));
}

#[test]
#[serial]
fn thread_status_transitions() {
    boot();
    let mut env = Env::new();

    fn naps(env: &mut Env, _self: Value, _args: Args, _block: Option<&Block>) -> garnet_runtime::Result {
        thread::sleep(env, 10.0)
    }
    let t = spawn(&mut env, naps);
    // Give it time to fall asleep.
    std::thread::sleep(Duration::from_millis(100));
    let status = thread::status_value(t);
    assert_eq!(status.object().string().to_rust_string(), "sleep");

    thread::wakeup(&mut env, t).unwrap();
    thread::join(&mut env, t).unwrap();
    // Clean death reads as false.
    assert!(thread::status_value(t).is_falsey());
}

#[test]
#[serial]
fn sleep_returns_whole_seconds_and_wakeup_cuts_it_short() {
    boot();
    let mut env = Env::new();

    fn long_nap(env: &mut Env, _self: Value, _args: Args, _block: Option<&Block>) -> garnet_runtime::Result {
        // Negative means "until wakeup".
        thread::sleep(env, -1.0)
    }
    let t = spawn(&mut env, long_nap);
    std::thread::sleep(Duration::from_millis(100));
    thread::wakeup(&mut env, t).unwrap();
    let slept = thread::thread_value(&mut env, t).unwrap();
    assert!(slept.is_integer());
    assert!(slept.integer_value() <= 1);
}

#[test]
#[serial]
fn cross_thread_raise_interrupts_sleep() {
    boot();
    let mut env = Env::new();

    fn sleeper(env: &mut Env, _self: Value, _args: Args, _block: Option<&Block>) -> garnet_runtime::Result {
        thread::sleep(env, -1.0)
    }
    let t = spawn(&mut env, sleeper);
    std::thread::sleep(Duration::from_millis(100));

    let argument_error = exception::exception_class("ArgumentError");
    thread::thread_raise(&mut env, t, Some(argument_error), "delivered".to_string()).unwrap();

    let err = thread::thread_value(&mut env, t).unwrap_err();
    assert!(err.0.is_a(argument_error));
    assert_eq!(exception::message_of(err.0), "delivered");
}

#[test]
#[serial]
fn fiber_local_storage_is_symbol_keyed() {
    boot();
    let mut env = Env::new();
    let current = thread::current_thread();

    thread::storage_set(&mut env, current, intern("request_id"), Value::integer(7)).unwrap();
    assert_eq!(
        thread::storage_get(&mut env, current, intern("request_id")).unwrap(),
        Value::integer(7)
    );
    assert!(thread::storage_get(&mut env, current, intern("absent")).unwrap().is_nil());

    let err = thread::storage_set(&mut env, current, Value::integer(3), Value::integer(1));
    assert!(err.is_err());
}

#[test]
#[serial]
fn mutex_ownership_rules() {
    boot();
    let mut env = Env::new();
    let m = mutex::new_mutex();

    mutex::lock(&mut env, m).unwrap();
    assert!(mutex::is_owned(m));

    // Recursive lock raises.
    let err = mutex::lock(&mut env, m).unwrap_err();
    assert!(err.0.is_a(exception::exception_class("ThreadError")));

    mutex::unlock(&mut env, m).unwrap();
    assert!(!mutex::is_owned(m));

    // Unlocking an unlocked mutex raises.
    let err = mutex::unlock(&mut env, m).unwrap_err();
    assert!(err.0.is_a(exception::exception_class("ThreadError")));
}

#[test]
#[serial]
fn synchronize_releases_on_raise() {
    boot();
    let mut env = Env::new();
    let m = mutex::new_mutex();

    fn raises(env: &mut Env, _self: Value, _args: Args, _block: Option<&Block>) -> garnet_runtime::Result {
        Err(env.raise("RuntimeError", "inside synchronize"))
    }
    let block = Block::new(&env, Value::NULL, 0, raises);
    let err = mutex::synchronize(&mut env, m, &block).unwrap_err();
    assert!(err.0.is_a(exception::exception_class("RuntimeError")));
    assert!(!mutex::is_owned(m));
    assert!(!payload_locked(m));
}

fn payload_locked(m: Value) -> bool {
    // Re-lock succeeds iff synchronize released properly.
    let mut env = Env::new();
    if mutex::try_lock(&mut env, m).unwrap() {
        mutex::unlock(&mut env, m).unwrap();
        false
    } else {
        true
    }
}

#[test]
#[serial]
fn dead_threads_own_no_mutexes() {
    boot();
    let mut env = Env::new();

    // The thread dies while holding a lock; death must release it.
    fn locks_and_dies(env: &mut Env, _self: Value, _args: Args, _block: Option<&Block>) -> garnet_runtime::Result {
        let m = mutex::new_mutex();
        let current = thread::current_thread();
        current.object().ivar_set(intern("@held").symbol_id(), m);
        mutex::lock(env, m)?;
        Err(env.raise("RuntimeError", "dying with a lock"))
    }
    let t = spawn(&mut env, locks_and_dies);
    let _ = thread::thread_value(&mut env, t);

    let m = t.object().ivar_get(intern("@held").symbol_id()).unwrap();
    assert!(!thread::owns_mutex(t, m));
    assert!(!payload_locked(m));
}

#[test]
#[serial]
fn condvar_signal_wakes_waiter() {
    boot();
    let mut env = Env::new();

    // Waiter publishes its mutex+condvar through its own thread cell.
    fn waiter(env: &mut Env, _self: Value, _args: Args, _block: Option<&Block>) -> garnet_runtime::Result {
        let m = mutex::new_mutex();
        let cv = mutex::new_condvar();
        let current = thread::current_thread();
        current.object().ivar_set(intern("@m").symbol_id(), m);
        current.object().ivar_set(intern("@cv").symbol_id(), cv);
        mutex::lock(env, m)?;
        mutex::condvar_wait(env, cv, m, None)?;
        mutex::unlock(env, m)?;
        Ok(Value::integer(99))
    }
    let t = spawn(&mut env, waiter);
    std::thread::sleep(Duration::from_millis(100));

    let cv = t.object().ivar_get(intern("@cv").symbol_id()).unwrap();
    mutex::condvar_signal(cv);

    assert_eq!(thread::thread_value(&mut env, t).unwrap(), Value::integer(99));
}

#[test]
#[serial]
fn thread_list_includes_live_threads() {
    boot();
    let mut env = Env::new();

    fn waits(env: &mut Env, _self: Value, _args: Args, _block: Option<&Block>) -> garnet_runtime::Result {
        thread::sleep(env, -1.0)
    }
    let t = spawn(&mut env, waits);
    std::thread::sleep(Duration::from_millis(50));

    let listed = thread::list();
    assert!(listed.contains(&thread::main_thread()));
    assert!(listed.contains(&t));

    thread::wakeup(&mut env, t).unwrap();
    thread::join(&mut env, t).unwrap();
    assert!(!thread::list().contains(&t));

    // Default group membership.
    assert_eq!(
        thread::main_thread().object().thread().group,
        GlobalEnv::the().default_thread_group()
    );
}

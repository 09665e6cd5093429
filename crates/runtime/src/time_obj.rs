//! Time payload

use crate::args::Args;
use crate::block::Block;
use crate::env::Env;
use crate::global_env::GlobalEnv;
use crate::heap::Heap;
use crate::klass;
use crate::object::{Object, Payload};
use crate::symbol::intern;
use crate::value::Value;
use crate::{Result, Unwind};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TimePayload {
    pub seconds: i64,
    pub nanoseconds: u32,
    pub utc: bool,
}

/// Wall-clock now.
pub fn now() -> Value {
    let mut ts = libc::timespec { tv_sec: 0, tv_nsec: 0 };
    let rc = unsafe { libc::clock_gettime(libc::CLOCK_REALTIME, &mut ts) };
    assert_eq!(rc, 0, "clock_gettime(CLOCK_REALTIME) failed");
    at(ts.tv_sec, ts.tv_nsec as u32)
}

pub fn at(seconds: i64, nanoseconds: u32) -> Value {
    let klass = GlobalEnv::the().time_class();
    let payload = TimePayload { seconds, nanoseconds, utc: false };
    Heap::the().allocate(Object::new(klass, Payload::Time(payload)))
}

pub fn to_parts(time: Value) -> TimePayload {
    match &time.object().payload {
        Payload::Time(t) => *t,
        _ => panic!("expected a Time cell"),
    }
}

/// Monotonic clock for interval measurement (sleep bookkeeping).
pub fn monotonic_seconds() -> f64 {
    let mut ts = libc::timespec { tv_sec: 0, tv_nsec: 0 };
    let rc = unsafe { libc::clock_gettime(libc::CLOCK_MONOTONIC, &mut ts) };
    assert_eq!(rc, 0, "clock_gettime(CLOCK_MONOTONIC) failed");
    ts.tv_sec as f64 + ts.tv_nsec as f64 / 1e9
}

// Native methods.

fn time_s_now(_env: &mut Env, _self: Value, _args: Args, _block: Option<&Block>) -> Result {
    Ok(now())
}

fn time_s_at(env: &mut Env, _self: Value, args: Args, _block: Option<&Block>) -> Result {
    let seconds = args.at_or_nil(0);
    if !seconds.is_integer() {
        return Err(env.raise("TypeError", "no implicit conversion into Integer"));
    }
    Ok(at(seconds.integer_value(), 0))
}

fn time_to_i(_env: &mut Env, self_: Value, _args: Args, _block: Option<&Block>) -> Result {
    Ok(Value::integer(to_parts(self_).seconds))
}

fn time_nsec(_env: &mut Env, self_: Value, _args: Args, _block: Option<&Block>) -> Result {
    Ok(Value::integer(to_parts(self_).nanoseconds as i64))
}

pub fn install(env: &mut Env) -> Result<(), Unwind> {
    let time_class = GlobalEnv::the().time_class();
    klass::define_singleton_method(env, time_class, intern("now"), time_s_now, 0)?;
    klass::define_singleton_method(env, time_class, intern("at"), time_s_at, 1)?;
    klass::define_method(env, time_class, intern("to_i"), time_to_i, 0)?;
    klass::define_method(env, time_class, intern("nsec"), time_nsec, 0)?;
    Ok(())
}

//! Random payload
//!
//! A seeded, reproducible generator per Random cell. Two cells built from
//! the same seed produce the same sequence.

use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};

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

pub struct RandomPayload {
    pub seed: u64,
    rng: StdRng,
}

impl RandomPayload {
    pub fn new(seed: u64) -> RandomPayload {
        RandomPayload { seed, rng: StdRng::seed_from_u64(seed) }
    }

    pub fn next_u64(&mut self) -> u64 {
        self.rng.next_u64()
    }

    /// Uniform in `[0, 1)`.
    pub fn next_float(&mut self) -> f64 {
        (self.rng.next_u64() >> 11) as f64 / (1u64 << 53) as f64
    }
}

/// Allocate a Random cell. Without an explicit seed, one is drawn from the
/// OS entropy source.
pub fn new_random(seed: Option<u64>) -> Value {
    let seed = seed.unwrap_or_else(|| {
        let mut entropy = rand::rngs::OsRng;
        entropy.next_u64()
    });
    let klass = GlobalEnv::the().random_class();
    Heap::the().allocate(Object::new(klass, Payload::Random(Box::new(RandomPayload::new(seed)))))
}

/// `rand(max)`: a non-negative integer below `max`, which must be
/// positive.
pub fn random_int(env: &mut Env, random: Value, max: i64) -> Result {
    let mut obj = random.object();
    let payload = match &mut obj.payload {
        Payload::Random(r) => r,
        _ => return Err(env.raise("TypeError", "wrong argument type (expected Random)")),
    };
    if max <= 0 {
        return Err(env.raise("ArgumentError", format!("invalid argument - {max}")));
    }
    Ok(Value::integer((payload.next_u64() % max as u64) as i64))
}

pub fn random_seed(random: Value) -> u64 {
    match &random.object().payload {
        Payload::Random(r) => r.seed,
        _ => panic!("expected a Random cell"),
    }
}

// Native methods.

fn random_s_new(env: &mut Env, _self: Value, args: Args, _block: Option<&Block>) -> Result {
    args.ensure_argc_between(env, 0, 1)?;
    let seed = match args.at(0) {
        None => None,
        Some(v) if v.is_nil() => None,
        Some(v) if v.is_integer() => Some(v.integer_value() as u64),
        Some(_) => return Err(env.raise("TypeError", "seed must be an Integer")),
    };
    Ok(new_random(seed))
}

fn random_seed_m(_env: &mut Env, self_: Value, _args: Args, _block: Option<&Block>) -> Result {
    Ok(Value::integer(random_seed(self_) as i64))
}

fn random_rand(env: &mut Env, self_: Value, args: Args, _block: Option<&Block>) -> Result {
    let max = args.at_or_nil(0);
    if !max.is_integer() {
        return Err(env.raise("TypeError", "no implicit conversion into Integer"));
    }
    random_int(env, self_, max.integer_value())
}

pub fn install(env: &mut Env) -> Result<(), Unwind> {
    let random_class = GlobalEnv::the().random_class();
    klass::define_singleton_method(env, random_class, intern("new"), random_s_new, -1)?;
    klass::define_method(env, random_class, intern("seed"), random_seed_m, 0)?;
    klass::define_method(env, random_class, intern("rand"), random_rand, 1)?;
    Ok(())
}

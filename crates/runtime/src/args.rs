//! Argument lists
//!
//! A borrowed slice of Values with the argc assertions every native method
//! leans on.

use crate::env::Env;
use crate::global_env::GlobalEnv;
use crate::value::Value;
use crate::{Result, Unwind};

#[derive(Clone, Copy)]
pub struct Args<'a> {
    values: &'a [Value],
}

impl<'a> Args<'a> {
    pub fn new(values: &'a [Value]) -> Args<'a> {
        Args { values }
    }

    pub fn empty() -> Args<'static> {
        Args { values: &[] }
    }

    pub fn len(self) -> usize {
        self.values.len()
    }

    pub fn is_empty(self) -> bool {
        self.values.is_empty()
    }

    pub fn at(self, index: usize) -> Option<Value> {
        self.values.get(index).copied()
    }

    /// Missing positions read as nil, the block-argument convention.
    pub fn at_or_nil(self, index: usize) -> Value {
        self.at(index).unwrap_or_else(|| GlobalEnv::the().nil_obj())
    }

    pub fn slice(self) -> &'a [Value] {
        self.values
    }

    pub fn iter(self) -> std::slice::Iter<'a, Value> {
        self.values.iter()
    }

    pub fn ensure_argc_is(self, env: &mut Env, expected: usize) -> Result<(), Unwind> {
        if self.len() != expected {
            return Err(wrong_number(env, self.len(), &expected.to_string()));
        }
        Ok(())
    }

    pub fn ensure_argc_at_least(self, env: &mut Env, expected: usize) -> Result<(), Unwind> {
        if self.len() < expected {
            return Err(wrong_number(env, self.len(), &format!("{expected}+")));
        }
        Ok(())
    }

    pub fn ensure_argc_between(self, env: &mut Env, low: usize, high: usize) -> Result<(), Unwind> {
        if self.len() < low || self.len() > high {
            return Err(wrong_number(env, self.len(), &format!("{low}..{high}")));
        }
        Ok(())
    }
}

pub fn wrong_number(env: &mut Env, given: usize, expected: &str) -> Unwind {
    env.raise("ArgumentError", format!("wrong number of arguments (given {given}, expected {expected})"))
}

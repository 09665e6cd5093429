//! Regexp and MatchData payloads
//!
//! The compiled-regex backend is an external collaborator; the payload
//! holds a compiled handle plus the pattern's source text, and MatchData
//! keeps the subject string and the capture regions.

use regex::bytes::Regex;

use crate::args::Args;
use crate::block::Block;
use crate::env::Env;
use crate::gc::Visitor;
use crate::global_env::GlobalEnv;
use crate::heap::Heap;
use crate::klass;
use crate::object::{Object, Payload};
use crate::string;
use crate::symbol::intern;
use crate::value::Value;
use crate::{Result, Unwind};

pub struct RegexpPayload {
    pub regex: Regex,
    pub source: String,
}

pub struct MatchDataPayload {
    pub string: Value,
    /// Byte ranges per capture group; index 0 is the whole match.
    pub regions: Vec<Option<(usize, usize)>>,
}

impl MatchDataPayload {
    pub fn visit(&self, visitor: &mut Visitor) {
        visitor.visit(self.string);
    }
}

/// Compile a pattern into a Regexp cell.
pub fn new_regexp(env: &mut Env, source: &str) -> Result {
    let regex = Regex::new(source)
        .map_err(|err| env.raise("RegexpError", format!("invalid pattern: {err}")))?;
    let klass = GlobalEnv::the().regexp_class();
    let payload = RegexpPayload { regex, source: source.to_string() };
    Ok(Heap::the().allocate(Object::new(klass, Payload::Regexp(Box::new(payload)))))
}

pub fn regexp_source(regexp: Value) -> String {
    match &regexp.object().payload {
        Payload::Regexp(r) => r.source.clone(),
        _ => panic!("expected a regexp cell"),
    }
}

/// Match against a String cell; nil when there is no match, a MatchData
/// cell otherwise.
pub fn match_string(env: &mut Env, regexp: Value, string: Value) -> Result {
    if !string.is_string() {
        return Err(env.raise("TypeError", "wrong argument type (expected String)"));
    }
    let obj = regexp.object();
    let payload = match &obj.payload {
        Payload::Regexp(r) => r,
        _ => return Err(env.raise("TypeError", "wrong argument type (expected Regexp)")),
    };
    let subject = string.object();
    let captures = payload.regex.captures(subject.string().bytes());
    match captures {
        None => Ok(GlobalEnv::the().nil_obj()),
        Some(captures) => {
            let regions = captures
                .iter()
                .map(|group| group.map(|m| (m.start(), m.end())))
                .collect();
            let klass = GlobalEnv::the().match_data_class();
            let payload = MatchDataPayload { string, regions };
            Ok(Heap::the().allocate(Object::new(klass, Payload::MatchData(Box::new(payload)))))
        }
    }
}

/// The text of capture group `index`, or nil.
pub fn match_group(match_data: Value, index: usize) -> Value {
    let obj = match_data.object();
    let payload = match &obj.payload {
        Payload::MatchData(m) => m,
        _ => panic!("expected a MatchData cell"),
    };
    match payload.regions.get(index).copied().flatten() {
        None => GlobalEnv::the().nil_obj(),
        Some((start, end)) => {
            let bytes = payload.string.object().string().bytes()[start..end].to_vec();
            string::new_string_from_bytes(bytes)
        }
    }
}

// Native methods.

fn regexp_s_new(env: &mut Env, _self: Value, args: Args, _block: Option<&Block>) -> Result {
    let pattern = args.at_or_nil(0);
    if !pattern.is_string() {
        return Err(env.raise("TypeError", "no implicit conversion into String"));
    }
    let source = pattern.object().string().to_rust_string();
    new_regexp(env, &source)
}

fn regexp_source_m(_env: &mut Env, self_: Value, _args: Args, _block: Option<&Block>) -> Result {
    Ok(string::new_string(&regexp_source(self_)))
}

fn regexp_match_m(env: &mut Env, self_: Value, args: Args, _block: Option<&Block>) -> Result {
    match_string(env, self_, args.at_or_nil(0))
}

fn match_data_ref(env: &mut Env, self_: Value, args: Args, _block: Option<&Block>) -> Result {
    let index = args.at_or_nil(0);
    if !index.is_integer() || index.integer_value() < 0 {
        return Err(env.raise("TypeError", "no implicit conversion into group index"));
    }
    Ok(match_group(self_, index.integer_value() as usize))
}

pub fn install(env: &mut Env) -> Result<(), Unwind> {
    let genv = GlobalEnv::the();
    let regexp_class = genv.regexp_class();
    let match_data_class = genv.match_data_class();

    klass::define_singleton_method(env, regexp_class, intern("new"), regexp_s_new, 1)?;
    klass::define_method(env, regexp_class, intern("source"), regexp_source_m, 0)?;
    klass::define_method(env, regexp_class, intern("match"), regexp_match_m, 1)?;

    klass::define_method(env, match_data_class, intern("[]"), match_data_ref, 1)?;

    Ok(())
}

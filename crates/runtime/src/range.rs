//! Range payload

use crate::gc::Visitor;
use crate::global_env::GlobalEnv;
use crate::heap::Heap;
use crate::object::{Object, Payload};
use crate::value::Value;

#[derive(Clone, Copy)]
pub struct RangePayload {
    pub begin: Value,
    pub end: Value,
    pub exclude_end: bool,
}

impl RangePayload {
    pub fn visit(&self, visitor: &mut Visitor) {
        visitor.visit(self.begin);
        visitor.visit(self.end);
    }
}

pub fn new_range(begin: Value, end: Value, exclude_end: bool) -> Value {
    let klass = GlobalEnv::the().range_class();
    Heap::the().allocate(Object::new(klass, Payload::Range(RangePayload { begin, end, exclude_end })))
}

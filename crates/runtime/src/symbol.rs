//! Symbol interning
//!
//! One canonical cell per distinct name for the lifetime of the process.
//! Names live in the core name arena; cells are durable (never swept), so
//! symbol identity is pointer identity and `SymbolId` keys are stable.

use std::collections::HashMap;
use std::sync::OnceLock;

use garnet_core::arena::NameArena;
use parking_lot::Mutex;

use crate::gc::Visitor;
use crate::global_env::GlobalEnv;
use crate::heap::Heap;
use crate::object::{Object, Payload};
use crate::value::Value;

/// Hash/equality key for interned symbols: the raw word of the canonical
/// cell. Used for ivar maps, method tables, and constant tables.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct SymbolId(u64);

impl SymbolId {
    pub fn from_value(value: Value) -> SymbolId {
        SymbolId(value.raw())
    }

    pub fn to_value(self) -> Value {
        Value::from_raw(self.0)
    }

    pub fn name(self) -> &'static str {
        self.to_value().object().symbol_name()
    }
}

struct SymbolTable {
    arena: NameArena,
    map: HashMap<&'static str, Value>,
}

static SYMBOLS: OnceLock<Mutex<SymbolTable>> = OnceLock::new();

fn table() -> &'static Mutex<SymbolTable> {
    SYMBOLS.get_or_init(|| Mutex::new(SymbolTable { arena: NameArena::new(), map: HashMap::new() }))
}

/// Intern `name`, returning the canonical symbol cell. Requires the Symbol
/// class to exist; bootstrap orders class creation before the first intern.
///
/// The table lock is not held across allocation: allocation is a
/// safepoint, and the collector needs this table to visit roots.
pub fn intern(name: &str) -> Value {
    if let Some(existing) = table().lock().map.get(name) {
        return *existing;
    }
    let klass = GlobalEnv::the().symbol_class();
    let cell = Heap::the().allocate_durable(Object::new(klass, Payload::Symbol("")));

    let mut t = table().lock();
    if let Some(existing) = t.map.get(name) {
        // Lost the race; the spare durable cell is never reachable and
        // never swept, but symbols are few and interning is rare.
        return *existing;
    }
    let stored = t.arena.intern(name);
    let mut obj = cell.object();
    obj.payload = Payload::Symbol(stored);
    t.map.insert(stored, cell);
    cell
}

/// The symbol table is a GC root: symbol cells are durable, but their class
/// pointers still need to be seen.
pub fn visit_all(visitor: &mut Visitor) {
    let t = table().lock();
    for value in t.map.values() {
        visitor.visit(*value);
    }
}

pub fn symbol_count() -> usize {
    table().lock().map.len()
}

// Surface-syntax conventions carried by symbol names.

pub fn is_ivar_name(name: &str) -> bool {
    name.starts_with('@') && !name.starts_with("@@") && name.len() > 1
}

pub fn is_cvar_name(name: &str) -> bool {
    name.starts_with("@@") && name.len() > 2
}

pub fn is_global_name(name: &str) -> bool {
    name.starts_with('$') && name.len() > 1
}

pub fn is_constant_name(name: &str) -> bool {
    name.chars().next().is_some_and(|c| c.is_ascii_uppercase())
}

pub fn is_setter_name(name: &str) -> bool {
    name.ends_with('=') && !matches!(name, "==" | "===" | "<=" | ">=" | "!=")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn name_conventions() {
        assert!(is_ivar_name("@foo"));
        assert!(!is_ivar_name("@@foo"));
        assert!(is_cvar_name("@@foo"));
        assert!(is_global_name("$stdout"));
        assert!(is_constant_name("Foo"));
        assert!(!is_constant_name("foo"));
        assert!(is_setter_name("name="));
        assert!(!is_setter_name("=="));
        assert!(!is_setter_name("<="));
    }
}

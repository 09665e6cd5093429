//! Process-lifetime name arena
//!
//! Interned symbol names never die, so they live in a bump arena and are
//! handed out as `&'static str`. The arena is append-only; the `'static`
//! promotion is sound because nothing is ever freed and the arena itself is
//! stored in a process-global.

use bumpalo::Bump;

/// Append-only string arena. Not internally synchronized; callers wrap it
/// in their own lock (the symbol table does).
pub struct NameArena {
    bump: Bump,
}

// The arena is only ever used behind the symbol table's lock.
unsafe impl Send for NameArena {}

impl NameArena {
    pub fn new() -> NameArena {
        NameArena { bump: Bump::new() }
    }

    /// Copy `name` into the arena and return a reference that lives for the
    /// rest of the process.
    pub fn intern(&self, name: &str) -> &'static str {
        let stored = self.bump.alloc_str(name);
        // Sound: the arena is never dropped or reset; see module docs.
        unsafe { std::mem::transmute::<&str, &'static str>(stored) }
    }

    pub fn allocated_bytes(&self) -> usize {
        self.bump.allocated_bytes()
    }
}

impl Default for NameArena {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interned_names_are_stable() {
        let arena = NameArena::new();
        let a = arena.intern("foo");
        let b = arena.intern("bar");
        // Force a few more allocations; earlier references stay valid.
        for i in 0..1000 {
            arena.intern(&format!("name{i}"));
        }
        assert_eq!(a, "foo");
        assert_eq!(b, "bar");
    }
}

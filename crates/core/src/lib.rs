//! Garnet Core: runtime primitives shared by the Garnet object runtime
//!
//! This crate holds the pieces of the runtime that know nothing about the
//! object model: the 64-bit tagged word every value rides in, the
//! architecture-specific context switch and register spill used by fibers
//! and the conservative collector, mmap'd coroutine stacks, the interned
//! name arena, and the cross-thread statistics registry.
//!
//! # Modules
//!
//! - `tagged`: 64-bit tagged word layout (immediate fixnum vs. cell pointer)
//! - `arch`: context switching and register spilling (x86-64, aarch64)
//! - `stack`: mmap'd down-growing coroutine stacks
//! - `arena`: process-lifetime arena for interned names
//! - `memory_stats`: lock-free runtime statistics registry

pub mod arch;
pub mod arena;
pub mod memory_stats;
pub mod stack;
pub mod tagged;

pub use arch::{Context, seed_switch_frame, spill_registers_and_call, stack_switch};
pub use arena::NameArena;
pub use memory_stats::{RuntimeStats, stats};
pub use stack::CoroutineStack;
pub use tagged::{FIXNUM_MAX, FIXNUM_MIN, Tagged};

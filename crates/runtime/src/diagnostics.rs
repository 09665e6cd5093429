//! Runtime diagnostics
//!
//! A SIGQUIT (kill -3) handler that dumps runtime state to stderr without
//! stopping the process, plus the `GARNET_REPORT` end-of-run report.

use std::sync::Once;

use garnet_core::memory_stats::stats;

use crate::config::{self, ReportMode};
use crate::heap::Heap;
use crate::symbol;
use crate::thread;

static SIGNAL_HANDLER_INIT: Once = Once::new();

/// Install the SIGQUIT diagnostics handler. Called from bootstrap; safe to
/// call repeatedly.
pub fn install_signal_handler() {
    SIGNAL_HANDLER_INIT.call_once(|| {
        #[cfg(unix)]
        unsafe {
            let _ = signal_hook::low_level::register(signal_hook::consts::SIGQUIT, dump_diagnostics);
        }
    });
}

/// Dump runtime diagnostics to stderr. Callable directly or via SIGQUIT.
pub fn dump_diagnostics() {
    use std::io::Write;

    let mut out = std::io::stderr().lock();
    let snapshot = stats().snapshot();

    let _ = writeln!(out, "\n=== Garnet Runtime Diagnostics ===");

    let _ = writeln!(out, "\n[Heap]");
    if Heap::is_initialized() {
        let heap = Heap::the().heap_stats();
        let _ = writeln!(out, "  Blocks: {}", heap.blocks);
        let _ = writeln!(out, "  Cells: {} total, {} free", heap.total_cells, heap.free_cells);
    } else {
        let _ = writeln!(out, "  (not initialized)");
    }
    let _ = writeln!(out, "  Allocated: {}", snapshot.cells_allocated);
    let _ = writeln!(out, "  Freed: {}", snapshot.cells_freed);
    let _ = writeln!(out, "  Collections: {}", snapshot.collections);

    let _ = writeln!(out, "\n[Threads]");
    let live = thread::list();
    let _ = writeln!(out, "  Live: {}", live.len());
    let _ = writeln!(out, "  Spawned: {}", snapshot.threads_spawned);
    let _ = writeln!(out, "  Peak: {}", snapshot.peak_threads);

    let _ = writeln!(out, "\n[Fibers]");
    let _ = writeln!(out, "  Spawned: {}", snapshot.fibers_spawned);

    let _ = writeln!(out, "\n[Symbols]");
    let _ = writeln!(out, "  Interned: {}", symbol::symbol_count());

    let _ = writeln!(out, "\n=== End Diagnostics ===\n");
}

/// Emit the end-of-run report if `GARNET_REPORT` asked for one.
pub fn report_at_exit() {
    match config::the().report {
        ReportMode::Off => {}
        ReportMode::Human => dump_diagnostics(),
        ReportMode::Json => {
            let snapshot = stats().snapshot();
            let json = serde_json::json!({
                "cells_allocated": snapshot.cells_allocated,
                "cells_freed": snapshot.cells_freed,
                "collections": snapshot.collections,
                "heap_blocks": snapshot.heap_blocks,
                "fibers_spawned": snapshot.fibers_spawned,
                "threads_spawned": snapshot.threads_spawned,
                "peak_threads": snapshot.peak_threads,
                "symbols": symbol::symbol_count(),
            });
            eprintln!("{json}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn install_signal_handler_is_idempotent() {
        install_signal_handler();
        install_signal_handler();
    }
}

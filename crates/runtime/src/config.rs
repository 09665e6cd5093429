//! Runtime configuration
//!
//! A snapshot of the `GARNET_*` environment variables, read once on first
//! use:
//!
//! - `GARNET_REPORT=human|json`: end-of-run statistics report
//! - `GARNET_GC_STRESS=1`: collect before every allocation
//! - `GARNET_FIBER_STACK_SIZE=<bytes>`: default fiber stack size

use std::sync::OnceLock;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ReportMode {
    Off,
    Human,
    Json,
}

#[derive(Debug)]
pub struct Config {
    pub report: ReportMode,
    pub gc_stress: bool,
    pub fiber_stack_size: usize,
}

static CONFIG: OnceLock<Config> = OnceLock::new();

pub fn the() -> &'static Config {
    CONFIG.get_or_init(|| Config {
        report: match std::env::var("GARNET_REPORT").as_deref() {
            Ok("human") => ReportMode::Human,
            Ok("json") => ReportMode::Json,
            _ => ReportMode::Off,
        },
        gc_stress: std::env::var("GARNET_GC_STRESS").is_ok_and(|v| v == "1" || v == "true"),
        fiber_stack_size: std::env::var("GARNET_FIBER_STACK_SIZE")
            .ok()
            .and_then(|v| v.parse().ok())
            .filter(|&n: &usize| n > 0)
            .unwrap_or(crate::fiber::DEFAULT_STACK_SIZE),
    })
}

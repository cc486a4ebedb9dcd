//! Structured logging for collection cycles.
//!
//! With the `tracing` feature enabled, cycles carry a span and phase
//! boundaries emit events; without it only the shutdown report remains,
//! printed to stderr.

use crate::gc::GcStats;
use crate::metrics::AllocStats;

#[cfg(feature = "tracing")]
pub(crate) fn cycle_span(cycle: u64) -> tracing::span::EnteredSpan {
    tracing::span!(tracing::Level::DEBUG, "gc_cycle", cycle).entered()
}

#[cfg(not(feature = "tracing"))]
pub(crate) struct CycleSpan;

#[cfg(not(feature = "tracing"))]
pub(crate) const fn cycle_span(_cycle: u64) -> CycleSpan {
    CycleSpan
}

#[cfg(feature = "tracing")]
pub(crate) fn cycle_end(stats: &GcStats) {
    tracing::debug!(
        roots = stats.roots,
        marked = stats.objects_marked,
        visited = stats.cells_visited,
        reclaimed = stats.cells_reclaimed,
        pages_retired = stats.pages_retired,
        large_released = stats.large_released,
        mark_us = stats.mark_duration.as_micros() as u64,
        sweep_us = stats.sweep_duration.as_micros() as u64,
        "cycle_end"
    );
}

#[cfg(not(feature = "tracing"))]
pub(crate) fn cycle_end(_stats: &GcStats) {}

#[cfg(feature = "tracing")]
pub(crate) fn alloc_pressure(what: &str) {
    tracing::debug!(what, "allocation failed, collecting before retry");
}

#[cfg(not(feature = "tracing"))]
pub(crate) fn alloc_pressure(_what: &str) {}

#[cfg(feature = "tracing")]
pub(crate) fn arena_pool_short(mapped: usize) {
    tracing::warn!(mapped, "initial arena pool only partially mapped");
}

#[cfg(not(feature = "tracing"))]
pub(crate) fn arena_pool_short(_mapped: usize) {}

/// The shutdown counter report. Diagnostic text, always emitted.
pub(crate) fn shutdown_report(stats: &AllocStats) {
    #[cfg(feature = "tracing")]
    tracing::info!(
        total = stats.total,
        objects = stats.objects,
        closure_envs = stats.closure_envs,
        strings = stats.strings,
        symbols = stats.symbols,
        "heap shutdown"
    );
    eprintln!("gc allocation stats (shutdown):");
    eprintln!("  total: {}", stats.total);
    eprintln!("  objects: {}", stats.objects);
    eprintln!("  closureenv: {}", stats.closure_envs);
    eprintln!("  primstr: {}", stats.strings);
    eprintln!("  primsym: {}", stats.symbols);
}

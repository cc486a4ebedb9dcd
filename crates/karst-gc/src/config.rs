//! Heap configuration and environment knobs.

use std::num::NonZeroUsize;

/// Allocations since the last cycle that force a collection.
pub const DEFAULT_ALLOC_TRIGGER: usize = 400_000;

/// Bytes allocated since the last cycle that force a collection.
pub const DEFAULT_BYTES_TRIGGER: usize = 60 * 1024 * 1024;

/// Arenas reserved up front by [`crate::Heap::new`].
pub const DEFAULT_INITIAL_ARENAS: usize = 10;

/// Disables automatic collection when set (manual [`crate::Heap::collect`]
/// only). Read once at heap construction.
pub const ENV_DISABLE: &str = "KARST_GC_DISABLE";

/// Forces a collection every N allocations when set to a positive integer,
/// overriding the default thresholds. Intended for fault-injection testing.
/// Read once at heap construction.
pub const ENV_EVERY_N_ALLOC: &str = "KARST_GC_EVERY_N_ALLOC";

/// Tunables fixed for the lifetime of a heap.
#[derive(Debug, Clone)]
pub struct HeapConfig {
    /// Never collect automatically; only explicit `collect` calls run.
    pub disable_auto: bool,
    /// Collect after every N allocations, overriding the byte/count
    /// heuristics.
    pub collect_every_n: Option<NonZeroUsize>,
    /// Allocation-count trigger.
    pub alloc_trigger: usize,
    /// Allocated-bytes trigger.
    pub bytes_trigger: usize,
    /// Arenas mapped eagerly at construction.
    pub initial_arenas: usize,
}

impl Default for HeapConfig {
    fn default() -> Self {
        Self {
            disable_auto: false,
            collect_every_n: None,
            alloc_trigger: DEFAULT_ALLOC_TRIGGER,
            bytes_trigger: DEFAULT_BYTES_TRIGGER,
            initial_arenas: DEFAULT_INITIAL_ARENAS,
        }
    }
}

impl HeapConfig {
    /// Defaults overridden by the `KARST_GC_DISABLE` and
    /// `KARST_GC_EVERY_N_ALLOC` environment variables.
    ///
    /// Unparseable values are ignored rather than reported; the knobs are
    /// debugging aids, not configuration surface.
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if std::env::var_os(ENV_DISABLE).is_some() {
            config.disable_auto = true;
        }
        if let Ok(n) = std::env::var(ENV_EVERY_N_ALLOC) {
            config.collect_every_n = n.trim().parse::<usize>().ok().and_then(NonZeroUsize::new);
        }
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_thresholds() {
        let config = HeapConfig::default();
        assert_eq!(config.alloc_trigger, 400_000);
        assert_eq!(config.bytes_trigger, 60 * 1024 * 1024);
        assert!(!config.disable_auto);
        assert!(config.collect_every_n.is_none());
    }
}

//! The scan/finalize capability interface between the heap and object types.
//!
//! The collector never interprets object bodies. At heap construction the
//! runtime registers one [`KindHooks`] per [`ScanKind`]; during marking the
//! worklist loop dispatches a popped cell to its kind's `scan` hook, which
//! reports the cell's outgoing references back through the [`Tracer`] it is
//! handed. During sweeping, the `finalize` hook runs once for each reclaimed
//! cell before its storage is poisoned.
//!
//! Hooks are plain function pointers resolved once when the table is built;
//! they must not allocate from or otherwise re-enter the heap, and finalize
//! hooks cannot fail (a failing finalizer is a defect in the object type,
//! not a condition the collector reports).

use crate::cell::ScanKind;
use crate::gc::marker;
use crate::gc::worklist::Worklist;
use crate::heap::Heap;

/// Scan callback: report every outgoing reference of `cell` to the tracer.
///
/// # Safety
///
/// Called only with a cell of the hook's registered kind, allocated from the
/// heap that owns the table.
pub type ScanFn = unsafe fn(cell: *mut u8, tracer: &mut Tracer<'_>);

/// Finalize callback: release resources owned outside the heap (for
/// example an out-of-line string buffer).
///
/// # Safety
///
/// Called exactly once per reclaimed cell, before its storage is poisoned.
pub type FinalizeFn = unsafe fn(cell: *mut u8);

unsafe fn noop_scan(_cell: *mut u8, _tracer: &mut Tracer<'_>) {}

unsafe fn noop_finalize(_cell: *mut u8) {}

/// The capability pair registered for one scan kind.
#[derive(Debug, Clone, Copy)]
pub struct KindHooks {
    /// Enumerates the cell's traceable children.
    pub scan: ScanFn,
    /// Releases out-of-heap resources on reclamation.
    pub finalize: FinalizeFn,
}

impl KindHooks {
    /// Hooks for a kind with no traceable children and nothing to release.
    pub const NOOP: Self = Self {
        scan: noop_scan,
        finalize: noop_finalize,
    };

    /// Builds a hook pair.
    #[must_use]
    pub const fn new(scan: ScanFn, finalize: FinalizeFn) -> Self {
        Self { scan, finalize }
    }
}

/// The per-kind capability table, fixed at heap construction.
#[derive(Debug, Clone, Copy)]
pub struct KindTable {
    hooks: [KindHooks; ScanKind::COUNT],
}

impl KindTable {
    /// A table of no-op hooks; kinds the runtime cares about are overridden
    /// with [`Self::with`].
    #[must_use]
    pub const fn new() -> Self {
        Self {
            hooks: [KindHooks::NOOP; ScanKind::COUNT],
        }
    }

    /// Returns the table with `kind`'s hooks replaced.
    #[must_use]
    pub const fn with(mut self, kind: ScanKind, hooks: KindHooks) -> Self {
        self.hooks[kind as usize] = hooks;
        self
    }

    /// Replaces `kind`'s hooks in place.
    pub const fn set(&mut self, kind: ScanKind, hooks: KindHooks) {
        self.hooks[kind as usize] = hooks;
    }

    /// The hooks registered for `kind`.
    #[must_use]
    pub const fn get(&self, kind: ScanKind) -> KindHooks {
        self.hooks[kind as usize]
    }
}

impl Default for KindTable {
    fn default() -> Self {
        Self::new()
    }
}

/// The visitor handed to scan hooks during marking.
///
/// Every child the hook reports is classified; children that resolve to
/// allocated, still-white cells are grayed and queued. Everything else is
/// ignored, so hooks may report candidate words freely.
pub struct Tracer<'a> {
    heap: &'a Heap,
    worklist: &'a mut Worklist,
}

impl<'a> Tracer<'a> {
    pub(crate) fn new(heap: &'a Heap, worklist: &'a mut Worklist) -> Self {
        Self { heap, worklist }
    }

    /// Visit an encoded value word (an object slot, a symbol description).
    ///
    /// The word is decoded through the heap's [`crate::ValueModel`]; words
    /// that do not encode heap references are skipped.
    pub fn visit_value(&mut self, word: usize) {
        let model = self.heap.value_model();
        if !(model.is_heap_ref)(word) {
            return;
        }
        self.visit_ptr((model.heap_ptr)(word));
    }

    /// Visit a direct cell pointer (a rope child, a dependent-string base).
    pub fn visit_ptr(&mut self, ptr: *const u8) {
        marker::gray_candidate(self.heap, self.worklist, ptr as usize);
    }

    /// Conservatively visit every word in `[low, high)`.
    pub fn visit_words(&mut self, low: usize, high: usize) {
        marker::scan_words(self.heap, self.worklist, low, high);
    }
}

//! Root discovery and the worklist closure.
//!
//! Every root source feeds the same pipeline: classify the candidate
//! address, and gray-and-queue the cell only when it resolves to an
//! allocated, still-white cell. Words that classify to nothing are dropped
//! silently; conservative scanning exists precisely to see non-pointers.

use std::ptr::NonNull;

use crate::cell::{CellHeader, Color};
use crate::gc::worklist::Worklist;
use crate::gc::GcStats;
use crate::heap::Heap;
use crate::trace::Tracer;

/// Grays and queues `addr` if it denotes an allocated white cell.
pub(crate) fn gray_candidate(heap: &Heap, worklist: &mut Worklist, addr: usize) {
    let Some(cell) = heap.classify(addr) else {
        return;
    };
    let state = cell.state();
    if state.is_free() || state.color(heap.white_gen()) != Color::White {
        return;
    }
    cell.set_gray();
    if let Some(ptr) = NonNull::new(cell.cell_ptr()) {
        worklist.push(ptr);
    }
}

/// Conservatively treats every aligned word in `[low, high)` as a candidate
/// cell address.
pub(crate) fn scan_words(heap: &Heap, worklist: &mut Worklist, low: usize, high: usize) {
    let word = std::mem::size_of::<usize>();
    let mut current = (low + word - 1) & !(word - 1);
    while current.checked_add(word).is_some_and(|end| end <= high) {
        // SAFETY: callers only expose readable ranges (the native stack, a
        // register spill slot, a registered coroutine stack).
        let candidate = unsafe { (current as *const usize).read() };
        gray_candidate(heap, worklist, candidate);
        current += word;
    }
}

/// Discovers roots in order: explicit slots, the module table, registered
/// conservative ranges, spilled registers, then the native stack.
pub(crate) fn mark_roots(heap: &Heap, worklist: &mut Worklist, stats: &mut GcStats) {
    let model = *heap.value_model();
    for slot in heap.roots.iter() {
        stats.roots += 1;
        // SAFETY: registered slots stay valid until removed; that is the
        // registration contract.
        let word = unsafe { slot.as_ptr().read() };
        if !(model.is_heap_ref)(word) {
            continue;
        }
        gray_candidate(heap, worklist, (model.heap_ptr)(word) as usize);
    }

    for object in heap.modules.iter() {
        gray_candidate(heap, worklist, object.as_ptr() as usize);
    }

    // Saved stacks of suspended coroutines and any other memory the native
    // stack sweep cannot see.
    for (low, high) in heap.ranges.iter() {
        scan_words(heap, worklist, low, high);
    }
    for (low, high) in heap.oneshot_ranges.iter() {
        scan_words(heap, worklist, low, high);
    }

    if let Some(bottom) = heap.stack_bottom() {
        // SAFETY: the embedder guaranteed `bottom` bounds this thread's
        // stack when recording it.
        unsafe {
            crate::stack::spill_registers_and_scan(bottom, |candidate| {
                gray_candidate(heap, worklist, candidate);
            });
        }
    }
}

/// Drains the worklist: pop a gray cell, blacken it, and let its kind's
/// scan hook report children, which re-enter through [`Tracer`].
///
/// Terminates because a cell is grayed at most once per cycle; gray and
/// black cells are never re-queued.
pub(crate) fn process_worklist(heap: &Heap, worklist: &mut Worklist, stats: &mut GcStats) {
    while let Some(ptr) = worklist.pop() {
        let Some(cell) = heap.classify(ptr.as_ptr() as usize) else {
            debug_assert!(false, "worklist entry failed to classify");
            continue;
        };
        cell.set_black(heap.white_gen());
        stats.objects_marked += 1;

        // SAFETY: the cell was allocated when grayed and headers are
        // stamped at allocation time.
        let header = unsafe { CellHeader::read(ptr.as_ptr()) };
        let hooks = heap.kind_table().get(header.kind());
        let mut tracer = Tracer::new(heap, worklist);
        // SAFETY: dispatching to the hook registered for the cell's own
        // kind, on a cell owned by this heap.
        unsafe { (hooks.scan)(ptr.as_ptr(), &mut tracer) };
    }
}

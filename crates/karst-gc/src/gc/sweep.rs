//! The sweeper.
//!
//! Walks every carved page of every arena, finalizing and poisoning white
//! cells, and returns pages that end the walk fully empty to their arena's
//! free pool for reuse by any size class. Large objects are swept by
//! releasing their whole mapping.
//!
//! Finalize hooks are infallible by contract; nothing here has an error
//! path.

use std::ptr::NonNull;

use crate::arena::PageInfo;
use crate::cell::CellHeader;
use crate::gc::GcStats;
use crate::heap::{Heap, POISON_BYTE};
use crate::los::LargeObjectInfo;
use crate::trace::KindTable;

/// Finalizes one white cell and marks it free.
///
/// # Safety
///
/// `cell` must index an allocated cell of `page`.
unsafe fn finalize_cell(kinds: &KindTable, page: NonNull<PageInfo>, cell: usize) {
    let info = page.as_ptr();
    // SAFETY: caller guarantees the cell is allocated, so its header is
    // stamped and its storage valid.
    unsafe {
        let ptr = (*info).cell_ptr(cell);
        let kind = CellHeader::read(ptr).kind();
        (kinds.get(kind).finalize)(ptr);
        std::ptr::write_bytes(ptr, POISON_BYTE, (*info).cell_size());
        (*info).state_mut(cell).set_free();
        (*info).free_cells += 1;
    }
}

pub(crate) fn sweep(heap: &mut Heap, stats: &mut GcStats) {
    let white_gen = heap.white_gen();
    let kinds = *heap.kind_table();

    for arena in &mut heap.arenas {
        let mut emptied: Vec<NonNull<PageInfo>> = Vec::new();
        for &page in arena.pages() {
            // SAFETY: page metadata lives until its arena drops; nothing
            // else touches it during the stop-the-world sweep.
            unsafe {
                if (*page.as_ptr()).is_unused() {
                    continue;
                }
                for cell in 0..(*page.as_ptr()).num_cells() {
                    let state = (*page.as_ptr()).state(cell);
                    if state.is_free() {
                        continue;
                    }
                    stats.cells_visited += 1;
                    if state.is_white(white_gen) {
                        stats.cells_reclaimed += 1;
                        finalize_cell(&kinds, page, cell);
                    }
                }
                if (*page.as_ptr()).is_unused() {
                    emptied.push(page);
                }
            }
        }
        for page in emptied {
            let class = unsafe { (*page.as_ptr()).class_index() };
            heap.class_lists[class].retain(|&p| p != page);
            arena.retire(page);
            stats.pages_retired += 1;
        }
    }

    heap.los.retain(|&lo| {
        stats.large_seen += 1;
        let page = LargeObjectInfo::page_ptr(lo);
        // SAFETY: the entry is live until this retain pass drops it.
        let state = unsafe { (*page.as_ptr()).state(0) };
        stats.cells_visited += 1;
        if !state.is_white(white_gen) {
            return true;
        }
        stats.cells_reclaimed += 1;
        stats.large_released += 1;
        unsafe {
            let payload = (*lo.as_ptr()).payload_addr() as *mut u8;
            let kind = CellHeader::read(payload).kind();
            (kinds.get(kind).finalize)(payload);
            // Dropping the box releases the backing mapping.
            drop(Box::from_raw(lo.as_ptr()));
        }
        false
    });
}

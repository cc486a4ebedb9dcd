//! Emptied pages return to their arena's free pool and get reused across
//! size classes, verifiable by address.

mod common;

use common::test_heap;
use karst_gc::arena::PAGE_SIZE;
use karst_gc::ScanKind;

#[test]
fn empty_page_is_reused_by_a_different_size_class() {
    let mut heap = test_heap();

    // Fill one 2048-byte page (two cells) and let both die.
    let a = heap.allocate(2048, ScanKind::Object).expect("a");
    let _b = heap.allocate(2048, ScanKind::Object).expect("b");
    let page_base = (a.as_ptr() as usize) & !(PAGE_SIZE - 1);

    heap.collect();
    assert!(heap.last_gc_stats().pages_retired >= 1);
    assert_eq!(heap.live_cells(), 0);

    // The next 16-byte request must land in the retired page's memory.
    let small = heap.allocate(16, ScanKind::PrimSymbol).expect("small");
    let small_addr = small.as_ptr() as usize;
    assert!(
        (page_base..page_base + PAGE_SIZE).contains(&small_addr),
        "expected {small_addr:#x} inside recycled page {page_base:#x}"
    );
    assert_eq!(heap.cell_kind(small_addr), Some(ScanKind::PrimSymbol));
}

#[test]
fn partially_free_pages_keep_serving_their_class() {
    let finalized = std::sync::atomic::AtomicUsize::new(0);
    let mut heap = test_heap();

    // Two nodes on the same 32-byte page; one dies, one is rooted.
    let keep = common::alloc_node(&mut heap, &finalized);
    let _die = common::alloc_node(&mut heap, &finalized);
    let mut slot = common::addr_of_node(keep);
    heap.add_root(std::ptr::NonNull::from(&mut slot));

    heap.collect();
    assert_eq!(finalized.load(std::sync::atomic::Ordering::SeqCst), 1);
    assert_eq!(heap.last_gc_stats().pages_retired, 0);

    // The half-empty page stays on its class list and serves the next
    // allocation of the same class.
    let again = common::alloc_node(&mut heap, &finalized);
    let same_page = (common::addr_of_node(again) & !(PAGE_SIZE - 1))
        == (common::addr_of_node(keep) & !(PAGE_SIZE - 1));
    assert!(same_page, "replacement allocation left a half-empty page");

    heap.remove_root(std::ptr::NonNull::from(&mut slot));
}

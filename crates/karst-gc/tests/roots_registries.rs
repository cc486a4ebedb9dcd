//! The module table and registered conservative ranges as root sources.

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};

use common::{addr_of_node, alloc_node, link, test_heap};
use karst_gc::Color;

#[test]
fn registered_modules_anchor_their_graph() {
    let finalized = AtomicUsize::new(0);
    let mut heap = test_heap();

    let module = alloc_node(&mut heap, &finalized);
    let export = alloc_node(&mut heap, &finalized);
    link(module, export);
    heap.register_module(module.cast());

    heap.collect();
    heap.collect();

    // The module and everything reachable from it survive every cycle.
    assert_eq!(finalized.load(Ordering::SeqCst), 0);
    assert_eq!(heap.cell_color(addr_of_node(module)), Some(Color::White));
    assert_eq!(heap.cell_color(addr_of_node(export)), Some(Color::White));
}

#[test]
fn persistent_range_acts_like_a_coroutine_stack() {
    let finalized = AtomicUsize::new(0);
    let mut heap = test_heap();

    let node = alloc_node(&mut heap, &finalized);

    // A suspended coroutine's saved stack: arbitrary words, one of which
    // happens to be a live cell address.
    let saved_stack: Vec<usize> = vec![0, 0xFEED, addr_of_node(node), 13, 1];
    let low = saved_stack.as_ptr() as usize;
    let high = low + saved_stack.len() * std::mem::size_of::<usize>();
    heap.add_conservative_range(low, high);

    heap.collect();
    assert_eq!(finalized.load(Ordering::SeqCst), 0);
    assert_eq!(heap.cell_color(addr_of_node(node)), Some(Color::White));

    // The coroutine completes; its stack is no longer a root source.
    heap.remove_conservative_range(low, high);
    heap.collect();
    assert_eq!(finalized.load(Ordering::SeqCst), 1);
    assert!(heap.cell_color(addr_of_node(node)).is_none());
}

#[test]
fn scan_hooks_see_children_through_the_tracer() {
    let finalized = AtomicUsize::new(0);
    let mut heap = test_heap();

    // root -> a -> b -> c, entirely via the Object scan hook.
    let a = alloc_node(&mut heap, &finalized);
    let b = alloc_node(&mut heap, &finalized);
    let c = alloc_node(&mut heap, &finalized);
    link(a, b);
    link(b, c);

    let mut slot = addr_of_node(a);
    heap.add_root(std::ptr::NonNull::from(&mut slot));
    heap.collect();

    assert_eq!(finalized.load(Ordering::SeqCst), 0);
    assert_eq!(heap.last_gc_stats().objects_marked, 3);

    // Cut the chain in the middle: c is now unreachable.
    link(b, b);
    heap.collect();
    assert_eq!(finalized.load(Ordering::SeqCst), 1);
    assert!(heap.cell_color(addr_of_node(c)).is_none());
    assert_eq!(heap.cell_color(addr_of_node(b)), Some(Color::White));

    heap.remove_root(std::ptr::NonNull::from(&mut slot));
}

//! Shared fixtures: a linked test object and hooks that count finalizations
//! into a per-test atomic, so parallel tests never observe each other.
#![allow(dead_code)]

use std::ptr::NonNull;
use std::sync::atomic::{AtomicUsize, Ordering};

use karst_gc::{Heap, HeapConfig, KindHooks, KindTable, ScanKind, Tracer, ValueModel};

/// A minimal runtime object: header word, one encoded child reference, and
/// a pointer to the test's finalization counter.
#[repr(C)]
pub struct Node {
    pub header: usize,
    pub next: usize,
    pub counter: usize,
}

pub unsafe fn scan_node(cell: *mut u8, tracer: &mut Tracer<'_>) {
    let node = cell.cast::<Node>();
    // SAFETY: the collector only dispatches this hook on live Object cells.
    tracer.visit_value(unsafe { (*node).next });
}

pub unsafe fn finalize_node(cell: *mut u8) {
    let node = cell.cast::<Node>();
    // SAFETY: finalize runs before the cell is poisoned, so the fields are
    // still the ones the test wrote.
    let counter = unsafe { (*node).counter } as *const AtomicUsize;
    if !counter.is_null() {
        // SAFETY: tests keep their counter alive past every collection.
        unsafe { &*counter }.fetch_add(1, Ordering::SeqCst);
    }
}

/// The kind table every fixture heap uses: real hooks for objects, no-ops
/// for the other kinds.
pub fn node_kinds() -> KindTable {
    KindTable::new().with(
        ScanKind::Object,
        KindHooks::new(scan_node, finalize_node),
    )
}

pub fn test_heap() -> Heap {
    Heap::new(
        HeapConfig::default(),
        ValueModel::pointer_identity(),
        node_kinds(),
    )
}

pub fn test_heap_with(config: HeapConfig) -> Heap {
    Heap::new(config, ValueModel::pointer_identity(), node_kinds())
}

/// Allocates a node whose finalizer bumps `counter` (pass null for none).
pub fn alloc_node(heap: &mut Heap, counter: *const AtomicUsize) -> NonNull<Node> {
    let cell = heap
        .allocate(std::mem::size_of::<Node>(), ScanKind::Object)
        .expect("node allocation failed");
    let node = cell.cast::<Node>();
    unsafe { (*node.as_ptr()).counter = counter as usize };
    node
}

pub fn link(parent: NonNull<Node>, child: NonNull<Node>) {
    unsafe { (*parent.as_ptr()).next = child.as_ptr() as usize };
}

pub fn addr_of_node(node: NonNull<Node>) -> usize {
    node.as_ptr() as usize
}

//! The karst runtime's heap: a non-moving, stop-the-world mark-and-sweep
//! collector with conservative root discovery.
//!
//! Memory is organized **BiBOP**-style: 8 MiB aligned arenas carved into
//! 4 KiB pages, each page serving one power-of-two size class (16 to 2048
//! bytes) at a time. Oversized requests get dedicated mappings in the large
//! object store. Because any machine word can be masked to an arena base and
//! checked against cell boundaries, the collector discovers roots
//! *conservatively*: it sweeps the native stack and spilled registers and
//! lets the pointer classifier reject everything that is not exactly an
//! allocated cell address.
//!
//! # What the collector does not know
//!
//! Value tagging and object layouts belong to the embedding runtime. The
//! heap is handed two capabilities at construction:
//!
//! - a [`ValueModel`] that decides whether a slot's word refers to a heap
//!   cell and extracts the pointer, and
//! - a [`KindTable`] mapping each of the four [`ScanKind`]s to its
//!   `scan`/`finalize` hooks.
//!
//! # Quick start
//!
//! ```
//! use karst_gc::{Heap, HeapConfig, KindTable, ScanKind, ValueModel};
//! use std::ptr::NonNull;
//!
//! let mut heap = Heap::new(
//!     HeapConfig::default(),
//!     ValueModel::pointer_identity(),
//!     KindTable::new(),
//! );
//!
//! let cell = heap.allocate(64, ScanKind::Object)?;
//!
//! // Root it through a slot, survive a collection, then let it go.
//! let mut slot: usize = cell.as_ptr() as usize;
//! heap.add_root(NonNull::from(&mut slot));
//! heap.collect();
//! assert!(heap.cell_color(cell.as_ptr() as usize).is_some());
//!
//! heap.remove_root(NonNull::from(&mut slot));
//! heap.collect();
//! # Ok::<(), karst_gc::AllocError>(())
//! ```
//!
//! # Threading
//!
//! A [`Heap`] is a single-threaded, stop-the-world collector: collection
//! runs to completion inside [`Heap::collect`] while the caller holds the
//! heap exclusively, and the conservative stack sweep assumes exactly one
//! stopped mutator. The free functions ([`init`], [`allocate`],
//! [`collect`], ...) operate on a heap installed per thread.

#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod arena;
mod cell;
pub mod config;
mod gc;
mod heap;
mod los;
mod metrics;
mod roots;
pub mod stack;
mod trace;
mod tracing;
mod value;

pub use cell::{CellHeader, CellState, Color, ScanKind};
pub use config::HeapConfig;
pub use gc::{collect, last_gc_stats, GcStats};
pub use heap::{
    add_conservative_range, add_root, allocate, init, init_with, mark_conservative_range,
    mark_thread_stack_bottom, register_module, remove_conservative_range, remove_root, shutdown,
    with_heap, AllocError, Heap,
};
pub use metrics::{allocation_stats, dump_heap_stats, dump_live_objects, AllocStats};
pub use trace::{FinalizeFn, KindHooks, KindTable, ScanFn, Tracer};
pub use value::ValueModel;

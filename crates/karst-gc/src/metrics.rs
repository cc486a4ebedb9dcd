//! Allocation counters and human-readable heap diagnostics.
//!
//! The dump formats are debugging text for humans, not a stable interface;
//! nothing should parse them.

use std::fmt::Write as _;

use crate::arena::MIN_CELL_BITS;
use crate::cell::{CellHeader, ScanKind};
use crate::heap::Heap;
use crate::los::LargeObjectInfo;

/// Cumulative allocation counters since a heap was built.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllocStats {
    /// All allocations.
    pub total: u64,
    /// All bytes requested (before size-class rounding).
    pub bytes: u64,
    /// Object allocations.
    pub objects: u64,
    /// Closure environment allocations.
    pub closure_envs: u64,
    /// Primitive string allocations.
    pub strings: u64,
    /// Primitive symbol allocations.
    pub symbols: u64,
}

impl AllocStats {
    pub(crate) const fn record(&mut self, kind: ScanKind, size: usize) {
        self.total += 1;
        self.bytes += size as u64;
        match kind {
            ScanKind::Object => self.objects += 1,
            ScanKind::ClosureEnv => self.closure_envs += 1,
            ScanKind::PrimString => self.strings += 1,
            ScanKind::PrimSymbol => self.symbols += 1,
        }
    }

    /// Counter for one kind.
    #[must_use]
    pub const fn for_kind(&self, kind: ScanKind) -> u64 {
        match kind {
            ScanKind::Object => self.objects,
            ScanKind::ClosureEnv => self.closure_envs,
            ScanKind::PrimString => self.strings,
            ScanKind::PrimSymbol => self.symbols,
        }
    }
}

impl Heap {
    /// Human-readable summary of the heap's shape: the arena table, page
    /// counts per size class, and the large object store.
    #[must_use]
    pub fn dump_heap_stats(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "arenas:");
        for (i, arena) in self.arenas.iter().enumerate() {
            let _ = writeln!(
                out,
                "  [{i}] {:#x} - {:#x}  ({} pages carved)",
                arena.base(),
                arena.end(),
                arena.page_count()
            );
        }
        for (class, list) in self.class_lists.iter().enumerate() {
            let _ = writeln!(
                out,
                "size class {:>4}: {} pages",
                1usize << (class as u32 + MIN_CELL_BITS),
                list.len()
            );
        }
        let _ = writeln!(out, "large objects: {}", self.los.len());
        for &lo in &self.los {
            let info = unsafe { lo.as_ref() };
            let _ = writeln!(
                out,
                "  {:#x}  {} bytes",
                info.payload_addr(),
                info.alloc_size()
            );
        }
        out
    }

    /// Human-readable enumeration of live cells, one tag letter per cell
    /// (`O` object, `C` closure environment, `S` string, `X` symbol), one
    /// line per page.
    #[must_use]
    pub fn dump_live_objects(&self) -> String {
        let mut out = String::new();
        for list in &self.class_lists {
            for &page in list {
                let info = unsafe { page.as_ref() };
                if info.is_unused() {
                    continue;
                }
                let _ = write!(out, "page {:#x} ({:>4}): ", info.start_addr(), info.cell_size());
                for cell in 0..info.num_cells() {
                    if info.state(cell).is_free() {
                        continue;
                    }
                    // SAFETY: allocated cells carry a stamped header.
                    let header = unsafe { CellHeader::read(info.cell_ptr(cell)) };
                    out.push(header.kind().letter());
                }
                out.push('\n');
            }
        }
        for &lo in &self.los {
            let page = LargeObjectInfo::page_ptr(lo);
            let info = unsafe { page.as_ref() };
            // SAFETY: live large objects carry a stamped header.
            let header = unsafe { CellHeader::read(info.cell_ptr(0)) };
            let _ = writeln!(
                out,
                "large {:#x} ({} bytes): {}",
                info.start_addr(),
                info.cell_size(),
                header.kind().letter()
            );
        }
        out
    }
}

/// Cumulative allocation counters for this thread's heap.
#[must_use]
pub fn allocation_stats() -> AllocStats {
    crate::heap::with_heap(|heap| heap.allocation_stats())
}

/// Heap-shape dump for this thread's heap. See [`Heap::dump_heap_stats`].
#[must_use]
pub fn dump_heap_stats() -> String {
    crate::heap::with_heap(|heap| heap.dump_heap_stats())
}

/// Live-cell dump for this thread's heap. See [`Heap::dump_live_objects`].
#[must_use]
pub fn dump_live_objects() -> String {
    crate::heap::with_heap(|heap| heap.dump_live_objects())
}

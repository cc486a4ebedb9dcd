//! The heap context: arena table, size-class page sets, large object store,
//! root registries, and the allocation front end.
//!
//! All collector state is owned by a [`Heap`] value; nothing in the crate is
//! process-global, so isolated heaps coexist (one per interpreter, many per
//! test binary). A thread-local convenience layer at the bottom of this
//! module serves embedders that want the classic `init`/`allocate`/
//! `shutdown` entry points without threading a heap handle around.

use std::cell::RefCell;
use std::fmt;
use std::ptr::NonNull;

use crate::arena::{
    cell_size_for, size_class_index, Arena, PageInfo, ARENA_MASK, ARENA_SIZE, MAX_ARENAS,
    MAX_CELL_SIZE, PAGE_SIZE, SIZE_CLASS_COUNT,
};
use crate::cell::{CellHeader, CellState, Color, ScanKind};
use crate::config::HeapConfig;
use crate::gc::worklist::Worklist;
use crate::gc::{GcStats, Phase};
use crate::los::LargeObjectInfo;
use crate::metrics::AllocStats;
use crate::roots::{ConservativeRanges, ModuleTable, RootSet};
use crate::trace::KindTable;
use crate::value::ValueModel;

use std::collections::VecDeque;

/// Byte pattern written over reclaimed cells.
pub(crate) const POISON_BYTE: u8 = 0xAF;

/// Allocation failure that survived the collect-and-retry path.
///
/// Raised only when a request fails immediately after a collection that had
/// nothing left to free; the language layer surfaces it as a catchable
/// runtime error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocError {
    /// No page could be obtained for a size-class request: every arena is
    /// full and the arena table has reached its address-space ceiling (or
    /// the OS refused a new arena).
    PageExhausted,
    /// No mapping could be obtained for a large object request.
    LargeObjectExhausted,
}

impl fmt::Display for AllocError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PageExhausted => write!(f, "page allocation failed"),
            Self::LargeObjectExhausted => write!(f, "large object allocation failed"),
        }
    }
}

impl std::error::Error for AllocError {}

/// A classified cell: its owning page metadata and index within the page.
#[derive(Clone, Copy, PartialEq, Eq)]
pub(crate) struct CellRef {
    pub(crate) page: NonNull<PageInfo>,
    pub(crate) cell: usize,
}

impl CellRef {
    pub(crate) fn state(self) -> CellState {
        unsafe { (*self.page.as_ptr()).state(self.cell) }
    }

    pub(crate) fn set_gray(self) {
        unsafe { (*self.page.as_ptr()).state_mut(self.cell).set_gray() };
    }

    pub(crate) fn set_black(self, white_gen: u8) {
        unsafe { (*self.page.as_ptr()).state_mut(self.cell).set_black(white_gen) };
    }

    pub(crate) fn cell_ptr(self) -> *mut u8 {
        unsafe { (*self.page.as_ptr()).cell_ptr(self.cell) }
    }
}

/// The heap: one collector instance and every byte it manages.
pub struct Heap {
    config: HeapConfig,
    values: ValueModel,
    kinds: KindTable,

    /// Arenas sorted by base address for binary search.
    pub(crate) arenas: Vec<Box<Arena>>,
    /// Per size class, the pages currently serving it. The front page is
    /// the allocation target; pages that fill up rotate to the back.
    pub(crate) class_lists: [VecDeque<NonNull<PageInfo>>; SIZE_CLASS_COUNT],
    /// Live large objects.
    pub(crate) los: Vec<NonNull<LargeObjectInfo>>,

    pub(crate) roots: RootSet,
    pub(crate) modules: ModuleTable,
    pub(crate) ranges: ConservativeRanges,
    /// Ranges exposed for exactly one upcoming collection, discarded after
    /// their root scan.
    pub(crate) oneshot_ranges: ConservativeRanges,
    worklist: Worklist,
    stack_bottom: Option<usize>,

    /// The mark-bit generation currently meaning "white"; xor-flipped after
    /// every sweep.
    white_gen: u8,
    pub(crate) phase: Phase,

    stats: AllocStats,
    allocs_since_gc: usize,
    bytes_since_gc: usize,
    pub(crate) collections: u64,
    pub(crate) last_gc: GcStats,
}

impl Heap {
    /// Builds a heap and eagerly maps its initial arena pool.
    ///
    /// The capability arguments are fixed for the heap's lifetime: `values`
    /// decodes root slots and object fields, `kinds` carries the per-kind
    /// scan/finalize hooks.
    #[must_use]
    pub fn new(config: HeapConfig, values: ValueModel, kinds: KindTable) -> Self {
        let mut heap = Self {
            config,
            values,
            kinds,
            arenas: Vec::new(),
            class_lists: std::array::from_fn(|_| VecDeque::new()),
            los: Vec::new(),
            roots: RootSet::new(),
            modules: ModuleTable::new(),
            ranges: ConservativeRanges::new(),
            oneshot_ranges: ConservativeRanges::new(),
            worklist: Worklist::new(),
            stack_bottom: None,
            white_gen: 0,
            phase: Phase::Idle,
            stats: AllocStats::default(),
            allocs_since_gc: 0,
            bytes_since_gc: 0,
            collections: 0,
            last_gc: GcStats::default(),
        };
        for _ in 0..heap.config.initial_arenas {
            if heap.new_arena().is_none() {
                crate::tracing::arena_pool_short(heap.arenas.len());
                break;
            }
        }
        heap
    }

    // ------------------------------------------------------------------
    // Allocation front end
    // ------------------------------------------------------------------

    /// Allocates `size` bytes of zeroed memory tagged with `kind`.
    ///
    /// The first word of the returned cell is its [`CellHeader`]; the
    /// embedder's layout starts there and must keep the header word intact.
    /// Requests above the largest size class are served by the large object
    /// store.
    ///
    /// # Errors
    ///
    /// [`AllocError`] when memory cannot be obtained even directly after a
    /// collection.
    pub fn allocate(&mut self, size: usize, kind: ScanKind) -> Result<NonNull<u8>, AllocError> {
        self.stats.record(kind, size);
        self.allocs_since_gc += 1;
        self.bytes_since_gc += size;
        self.maybe_collect();

        if size > MAX_CELL_SIZE {
            self.allocate_large(size, kind)
        } else {
            self.allocate_small(cell_size_for(size), kind)
        }
    }

    fn maybe_collect(&mut self) {
        if self.config.disable_auto || self.phase != Phase::Idle {
            return;
        }
        let due = self.config.collect_every_n.map_or_else(
            || {
                self.allocs_since_gc >= self.config.alloc_trigger
                    || self.bytes_since_gc >= self.config.bytes_trigger
            },
            |n| self.allocs_since_gc >= n.get(),
        );
        if due {
            self.collect();
        }
    }

    fn allocate_small(&mut self, cell_size: usize, kind: ScanKind) -> Result<NonNull<u8>, AllocError> {
        let class = size_class_index(cell_size);
        let mut collected = false;
        loop {
            if let Some(page) = self.page_with_space(class, cell_size) {
                return Ok(self.carve_cell(page, class, kind));
            }
            // Retry exactly once, and only if a collection has a chance of
            // freeing something.
            if collected || self.allocs_since_gc == 0 {
                return Err(AllocError::PageExhausted);
            }
            crate::tracing::alloc_pressure("page");
            self.collect();
            collected = true;
        }
    }

    fn allocate_large(&mut self, size: usize, kind: ScanKind) -> Result<NonNull<u8>, AllocError> {
        let mut collected = false;
        loop {
            match LargeObjectInfo::new(size, kind, self.white_gen) {
                Ok(info) => {
                    let info = Box::into_raw(info);
                    // SAFETY: Box::into_raw never returns null.
                    let info = unsafe { NonNull::new_unchecked(info) };
                    self.los.push(info);
                    let payload = unsafe { info.as_ref() }.payload_addr() as *mut u8;
                    // SAFETY: a mapped region base is non-null.
                    return Ok(unsafe { NonNull::new_unchecked(payload) });
                }
                Err(_) if !collected && self.allocs_since_gc > 0 => {
                    crate::tracing::alloc_pressure("large object");
                    self.collect();
                    collected = true;
                }
                Err(_) => return Err(AllocError::LargeObjectExhausted),
            }
        }
    }

    /// The page the next `class` allocation carves from: the front of the
    /// class list when it still has free cells, otherwise a page obtained
    /// from the arenas.
    fn page_with_space(&mut self, class: usize, cell_size: usize) -> Option<NonNull<PageInfo>> {
        if let Some(&front) = self.class_lists[class].front() {
            if unsafe { front.as_ref() }.free_cells() > 0 {
                return Some(front);
            }
        }
        let page = self.alloc_page(cell_size)?;
        self.class_lists[class].push_front(page);
        Some(page)
    }

    /// Obtains a page for `cell_size`, trying every existing arena in
    /// address order before mapping a new one.
    fn alloc_page(&mut self, cell_size: usize) -> Option<NonNull<PageInfo>> {
        for arena in &mut self.arenas {
            if let Some(page) = arena.alloc_page(cell_size) {
                return Some(page);
            }
        }
        let index = self.new_arena()?;
        self.arenas[index].alloc_page(cell_size)
    }

    /// Maps a new arena and inserts it into the table preserving address
    /// order. `None` when the table is full or the OS refuses.
    fn new_arena(&mut self) -> Option<usize> {
        if self.arenas.len() >= MAX_ARENAS {
            return None;
        }
        let arena = Arena::new().ok()?;
        let index = self
            .arenas
            .partition_point(|existing| existing.base() < arena.base());
        self.arenas.insert(index, arena);
        Some(index)
    }

    fn carve_cell(&mut self, page: NonNull<PageInfo>, class: usize, kind: ScanKind) -> NonNull<u8> {
        let info = page.as_ptr();
        // SAFETY: `page` came from the class lists or a fresh arena carve;
        // nothing else aliases it while the heap is borrowed mutably.
        unsafe {
            let (ptr, cell) = (*info).carve().expect("page selected with free cells");
            let cell_size = (*info).cell_size();
            std::ptr::write_bytes(ptr.as_ptr(), 0, cell_size);
            CellHeader::new(kind).write(ptr.as_ptr());
            *(*info).state_mut(cell) = CellState::allocated_white(self.white_gen);
            (*info).free_cells -= 1;

            if (*info).free_cells == 0 && self.class_lists[class].len() > 1 {
                // Full pages rotate to the back so partially free pages are
                // preferred next time.
                if self.class_lists[class].front() == Some(&page) {
                    self.class_lists[class].pop_front();
                    self.class_lists[class].push_back(page);
                }
            }
            ptr
        }
    }

    // ------------------------------------------------------------------
    // Pointer classification
    // ------------------------------------------------------------------

    /// Decides whether `addr` is the base address of an allocated or free
    /// cell this heap owns.
    ///
    /// Total and side-effect free for arbitrary word inputs: the only
    /// addresses accepted are exact cell boundaries of carved pages (or
    /// exact large-object payload bases), which is the sole defense against
    /// conservative-scan words corrupting collector state.
    pub(crate) fn classify(&self, addr: usize) -> Option<CellRef> {
        if addr == 0 {
            return None;
        }
        let base = addr & ARENA_MASK;
        if let Ok(index) = self
            .arenas
            .binary_search_by(|arena| arena.base().cmp(&base))
        {
            let arena = &self.arenas[index];
            let page = arena.page_at((addr - base) / PAGE_SIZE)?;
            let info = unsafe { page.as_ref() };
            // Reject anything that is not an exact cell boundary.
            if (addr & (info.cell_size() - 1)) != 0 {
                return None;
            }
            let cell = (addr - info.start_addr()) / info.cell_size();
            if cell >= info.num_cells() {
                return None;
            }
            return Some(CellRef { page, cell });
        }

        // Not arena memory; try the large object store on exact base match.
        for &lo in &self.los {
            if unsafe { lo.as_ref() }.payload_addr() == addr {
                return Some(CellRef {
                    page: LargeObjectInfo::page_ptr(lo),
                    cell: 0,
                });
            }
        }
        None
    }

    /// Diagnostic: the color of the cell at `addr`, or `None` when `addr`
    /// is not an allocated cell of this heap.
    #[must_use]
    pub fn cell_color(&self, addr: usize) -> Option<Color> {
        let cell = self.classify(addr)?;
        let state = cell.state();
        if state.is_free() {
            return None;
        }
        Some(state.color(self.white_gen))
    }

    /// Diagnostic: the scan kind stamped on the cell at `addr`.
    #[must_use]
    pub fn cell_kind(&self, addr: usize) -> Option<ScanKind> {
        let cell = self.classify(addr)?;
        if cell.state().is_free() {
            return None;
        }
        Some(unsafe { CellHeader::read(cell.cell_ptr()) }.kind())
    }

    // ------------------------------------------------------------------
    // Roots and scan configuration
    // ------------------------------------------------------------------

    /// Registers an external value slot as a root. The slot's current word
    /// is decoded through the heap's value model at every collection.
    pub fn add_root(&mut self, slot: NonNull<usize>) {
        self.roots.add(slot);
    }

    /// Unregisters a root slot.
    pub fn remove_root(&mut self, slot: NonNull<usize>) {
        self.roots.remove(slot);
    }

    /// Registers a module object; it and everything it references survive
    /// every collection.
    pub fn register_module(&mut self, object: NonNull<u8>) {
        self.modules.add(object);
    }

    /// Registers a persistent word range (for example a suspended
    /// coroutine's saved stack) scanned conservatively at the start of every
    /// collection.
    pub fn add_conservative_range(&mut self, low: usize, high: usize) {
        self.ranges.add(low, high);
    }

    /// Unregisters a range previously passed to
    /// [`Self::add_conservative_range`].
    pub fn remove_conservative_range(&mut self, low: usize, high: usize) {
        self.ranges.remove(low, high);
    }

    /// Records the lower bound of the native stack for conservative
    /// scanning. Until this is called, collections skip the stack and
    /// register sweep and only explicit roots keep objects alive.
    pub fn mark_thread_stack_bottom(&mut self, address: usize) {
        self.stack_bottom = Some(address);
    }

    /// Exposes an arbitrary word range to the *next* collection's
    /// conservative root scan, after which the exposure lapses.
    ///
    /// The range must stay readable until that collection completes. A scan
    /// hook that wants to expose a range mid-mark uses
    /// [`crate::Tracer::visit_words`] instead; a range that should be
    /// scanned every cycle is registered with
    /// [`Self::add_conservative_range`].
    pub fn mark_conservative_range(&mut self, low: usize, high: usize) {
        self.oneshot_ranges.add(low, high);
    }

    // ------------------------------------------------------------------
    // Accessors for the marker, sweeper, and diagnostics
    // ------------------------------------------------------------------

    pub(crate) const fn white_gen(&self) -> u8 {
        self.white_gen
    }

    pub(crate) const fn flip_white_gen(&mut self) {
        self.white_gen ^= 1;
    }

    pub(crate) const fn value_model(&self) -> &ValueModel {
        &self.values
    }

    pub(crate) const fn kind_table(&self) -> &KindTable {
        &self.kinds
    }

    pub(crate) const fn stack_bottom(&self) -> Option<usize> {
        self.stack_bottom
    }

    pub(crate) fn take_worklist(&mut self) -> Worklist {
        std::mem::take(&mut self.worklist)
    }

    pub(crate) fn put_worklist(&mut self, worklist: Worklist) {
        debug_assert!(worklist.is_empty());
        self.worklist = worklist;
    }

    pub(crate) fn reset_pressure(&mut self) {
        self.allocs_since_gc = 0;
        self.bytes_since_gc = 0;
    }

    /// Cumulative allocation counters since the heap was built.
    #[must_use]
    pub const fn allocation_stats(&self) -> AllocStats {
        self.stats
    }

    /// Numbers from the most recent collection.
    #[must_use]
    pub const fn last_gc_stats(&self) -> GcStats {
        self.last_gc
    }

    /// Collections run since the heap was built.
    #[must_use]
    pub const fn collections(&self) -> u64 {
        self.collections
    }

    /// Number of live entries in the large object store.
    #[must_use]
    pub fn large_object_count(&self) -> usize {
        self.los.len()
    }

    /// Number of currently allocated cells, large objects included.
    #[must_use]
    pub fn live_cells(&self) -> usize {
        let mut live = 0;
        for arena in &self.arenas {
            for &page in arena.pages() {
                let info = unsafe { page.as_ref() };
                live += info.num_cells() - info.free_cells();
            }
        }
        live + self.los.len()
    }
}

impl Default for Heap {
    fn default() -> Self {
        Self::new(
            HeapConfig::default(),
            ValueModel::pointer_identity(),
            KindTable::new(),
        )
    }
}

impl Drop for Heap {
    fn drop(&mut self) {
        // Arenas release their pages and mappings themselves; large objects
        // are individually boxed and need explicit teardown.
        for lo in self.los.drain(..) {
            drop(unsafe { Box::from_raw(lo.as_ptr()) });
        }
    }
}

impl fmt::Debug for Heap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Heap")
            .field("arenas", &self.arenas.len())
            .field("large_objects", &self.los.len())
            .field("live_cells", &self.live_cells())
            .field("roots", &self.roots.len())
            .field("collections", &self.collections)
            .field("phase", &self.phase)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Thread-local heap access
// ============================================================================

thread_local! {
    static HEAP: RefCell<Option<Heap>> = const { RefCell::new(None) };
}

/// Installs this thread's heap with configuration taken from the
/// environment and identity value decoding. Runtimes with a real value
/// representation use [`init_with`].
pub fn init() {
    init_with(
        HeapConfig::from_env(),
        ValueModel::pointer_identity(),
        KindTable::new(),
    );
}

/// Installs this thread's heap. Replaces (and drops, without running
/// finalizers) any heap previously installed on the thread.
pub fn init_with(config: HeapConfig, values: ValueModel, kinds: KindTable) {
    HEAP.with(|slot| {
        *slot.borrow_mut() = Some(Heap::new(config, values, kinds));
    });
}

/// Runs `f` with this thread's heap.
///
/// # Panics
///
/// Panics when [`init`] has not been called on this thread.
pub fn with_heap<F, R>(f: F) -> R
where
    F: FnOnce(&mut Heap) -> R,
{
    HEAP.with(|slot| {
        f(slot
            .borrow_mut()
            .as_mut()
            .expect("karst heap is not initialized on this thread"))
    })
}

/// Tears down this thread's heap: runs the final collection, nulls every
/// registered root slot, and reports cumulative allocation counters.
/// A no-op when no heap is installed.
pub fn shutdown() {
    HEAP.with(|slot| {
        if let Some(heap) = slot.borrow_mut().take() {
            heap.shutdown();
        }
    });
}

/// Allocates from this thread's heap. See [`Heap::allocate`].
///
/// # Errors
///
/// Propagates [`AllocError`] from the heap.
pub fn allocate(size: usize, kind: ScanKind) -> Result<NonNull<u8>, AllocError> {
    with_heap(|heap| heap.allocate(size, kind))
}

/// Registers a root slot with this thread's heap.
pub fn add_root(slot: NonNull<usize>) {
    with_heap(|heap| heap.add_root(slot));
}

/// Unregisters a root slot from this thread's heap.
pub fn remove_root(slot: NonNull<usize>) {
    with_heap(|heap| heap.remove_root(slot));
}

/// Registers a module object with this thread's heap.
pub fn register_module(object: NonNull<u8>) {
    with_heap(|heap| heap.register_module(object));
}

/// Registers a persistent conservative range with this thread's heap.
pub fn add_conservative_range(low: usize, high: usize) {
    with_heap(|heap| heap.add_conservative_range(low, high));
}

/// Unregisters a persistent conservative range from this thread's heap.
pub fn remove_conservative_range(low: usize, high: usize) {
    with_heap(|heap| heap.remove_conservative_range(low, high));
}

/// Exposes a word range to this thread's heap's next collection. See
/// [`Heap::mark_conservative_range`].
pub fn mark_conservative_range(low: usize, high: usize) {
    with_heap(|heap| heap.mark_conservative_range(low, high));
}

/// Records the native stack bottom on this thread's heap.
pub fn mark_thread_stack_bottom(address: usize) {
    with_heap(|heap| heap.mark_thread_stack_bottom(address));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifier_rejects_garbage_words() {
        let heap = Heap::default();
        assert!(heap.classify(0).is_none());
        assert!(heap.classify(1).is_none());
        assert!(heap.classify(usize::MAX & !0xF).is_none());
        // A stack address is not heap memory.
        let local = 0usize;
        assert!(heap.classify(std::ptr::addr_of!(local) as usize).is_none());
    }

    #[test]
    fn classifier_accepts_only_exact_cell_boundaries() {
        let mut heap = Heap::default();
        let ptr = heap.allocate(64, ScanKind::Object).expect("alloc");
        let addr = ptr.as_ptr() as usize;
        assert!(heap.classify(addr).is_some());
        assert!(heap.classify(addr + 8).is_none());
        assert!(heap.classify(addr + 63).is_none());
    }

    #[test]
    fn allocation_is_zeroed_and_tagged() {
        let mut heap = Heap::default();
        let ptr = heap.allocate(48, ScanKind::PrimString).expect("alloc");
        let addr = ptr.as_ptr() as usize;
        assert_eq!(heap.cell_kind(addr), Some(ScanKind::PrimString));
        assert_eq!(heap.cell_color(addr), Some(Color::White));
        // Everything past the header word is zero.
        let body = unsafe { std::slice::from_raw_parts(ptr.as_ptr().add(8), 64 - 8) };
        assert!(body.iter().all(|&b| b == 0));
    }

    #[test]
    fn full_page_rotates_to_back_of_class_list() {
        let mut heap = Heap::default();
        let class = size_class_index(2048);
        // Two cells per 2048-byte page; filling one page plus one cell
        // leaves the full page behind the fresh one.
        let a = heap.allocate(2048, ScanKind::Object).expect("a");
        let _b = heap.allocate(2048, ScanKind::Object).expect("b");
        let _c = heap.allocate(2048, ScanKind::Object).expect("c");
        assert_eq!(heap.class_lists[class].len(), 2);
        let front = *heap.class_lists[class].front().unwrap();
        let front_info = unsafe { front.as_ref() };
        assert!(front_info.free_cells() > 0, "front page must have space");
        let full = *heap.class_lists[class].back().unwrap();
        assert_eq!(
            unsafe { full.as_ref() }.start_addr(),
            (a.as_ptr() as usize) & !(PAGE_SIZE - 1)
        );
    }

    #[test]
    fn size_class_boundary_routes_to_los() {
        let mut heap = Heap::default();
        let in_page = heap.allocate(2048, ScanKind::Object).expect("page alloc");
        assert!(heap.los.is_empty());
        let large = heap.allocate(2049, ScanKind::Object).expect("los alloc");
        assert_eq!(heap.los.len(), 1);
        assert!(heap.classify(in_page.as_ptr() as usize).is_some());
        assert!(heap.classify(large.as_ptr() as usize).is_some());
        // Interior large-object addresses never classify.
        assert!(heap.classify(large.as_ptr() as usize + 8).is_none());
    }

    #[test]
    fn arena_table_stays_sorted() {
        let mut heap = Heap::default();
        while heap.arenas.len() < 12 {
            if heap.new_arena().is_none() {
                break;
            }
        }
        assert!(heap
            .arenas
            .windows(2)
            .all(|pair| pair[0].base() < pair[1].base()));
        assert!(heap.arenas.len() <= MAX_ARENAS);
        // ARENA_SIZE alignment holds for every arena in the table.
        assert!(heap.arenas.iter().all(|a| a.base() % ARENA_SIZE == 0));
    }
}

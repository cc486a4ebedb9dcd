//! The large object store.
//!
//! Requests bigger than the largest page size class bypass the arenas
//! entirely: each one gets its own direct [`sys_vm`] mapping wrapped in a
//! [`LargeObjectInfo`], which embeds a single-cell [`PageInfo`] so the
//! classifier, marker, and sweeper can treat large objects uniformly with
//! page cells. The sweeper releases the whole mapping when the entry's one
//! cell is still white after marking.

use std::io;
use std::ptr::NonNull;

use crate::arena::PageInfo;
use crate::cell::{CellHeader, CellState, ScanKind};

/// One large allocation and its backing mapping.
pub struct LargeObjectInfo {
    region: sys_vm::VmRegion,
    /// Size the caller asked for; the mapping may be page-rounded above it.
    pub(crate) alloc_size: usize,
    /// Single-cell page view of the payload.
    pub(crate) page: PageInfo,
}

impl LargeObjectInfo {
    /// Maps a new large object, zeroes nothing (fresh anonymous mappings are
    /// already zero-filled), stamps the header, and marks the cell
    /// allocated and white.
    ///
    /// # Errors
    ///
    /// Propagates mapping failure from [`sys_vm::acquire`].
    pub(crate) fn new(size: usize, kind: ScanKind, white_gen: u8) -> io::Result<Box<Self>> {
        let region = sys_vm::acquire(size, 0)?;
        let start = region.ptr();
        let mut page = PageInfo::new_large(start, size);
        *page.state_mut(0) = CellState::allocated_white(white_gen);
        // SAFETY: the mapping is at least `size` >= one word long.
        unsafe { CellHeader::new(kind).write(start) };
        Ok(Box::new(Self {
            region,
            alloc_size: size,
            page,
        }))
    }

    /// Base address of the payload cell.
    #[must_use]
    pub fn payload_addr(&self) -> usize {
        self.region.addr()
    }

    /// Size the caller requested.
    #[must_use]
    pub const fn alloc_size(&self) -> usize {
        self.alloc_size
    }

    /// Raw pointer to the embedded page metadata.
    ///
    /// Derived from the box allocation rather than a shared borrow so the
    /// marker may flip state bytes through it.
    pub(crate) fn page_ptr(this: NonNull<Self>) -> NonNull<PageInfo> {
        let page = unsafe { std::ptr::addr_of_mut!((*this.as_ptr()).page) };
        // SAFETY: a field projection of a non-null box is non-null.
        unsafe { NonNull::new_unchecked(page) }
    }
}

//! Virtual memory source for the karst heap.
//!
//! This crate is the only place the collector talks to the operating
//! system's mapping primitives. It hands out large regions of anonymous
//! read/write memory with a caller-chosen alignment and unmaps them when the
//! owning [`VmRegion`] is dropped.
//!
//! Alignment beyond the system page size is achieved by over-mapping twice
//! the requested size and trimming the unaligned slack off both ends, rather
//! than relying on a platform aligned-allocation primitive.

use std::io;

#[cfg(unix)]
mod unix;
#[cfg(unix)]
use unix as os;

#[cfg(windows)]
mod windows;
#[cfg(windows)]
use windows as os;

pub use os::page_size;

/// Returns the system allocation granularity.
///
/// On Windows, region base addresses are aligned to this value (typically
/// 64KB). On Unix, this is the system page size.
#[must_use]
pub fn allocation_granularity() -> usize {
    #[cfg(windows)]
    {
        os::allocation_granularity()
    }
    #[cfg(unix)]
    {
        os::page_size()
    }
}

/// An owned region of anonymous virtual memory.
///
/// The region is released back to the operating system when dropped.
pub struct VmRegion {
    inner: os::RegionInner,
}

impl VmRegion {
    /// Base address of the region.
    #[must_use]
    pub fn ptr(&self) -> *mut u8 {
        self.inner.ptr()
    }

    /// Base address of the region as an integer.
    #[must_use]
    pub fn addr(&self) -> usize {
        self.inner.ptr() as usize
    }

    /// Length of the region in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// Whether the region is zero length. Never true for a mapped region.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.len() == 0
    }
}

// SAFETY: the region is a plain slab of process memory; ownership of the
// mapping can move between threads freely.
unsafe impl Send for VmRegion {}
unsafe impl Sync for VmRegion {}

/// Acquires a region of at least `size` bytes whose base address is a
/// multiple of `align`.
///
/// `align == 0` requests any page-aligned address; `size` is then rounded up
/// to one page. Otherwise `align` must be a power of two no smaller than the
/// system page size, and `size` must be a multiple of the page size.
///
/// Failure is returned to the caller; this function never panics on
/// exhaustion.
///
/// # Errors
///
/// Any error reported by the OS mapping primitive, most commonly address
/// space exhaustion.
pub fn acquire(size: usize, align: usize) -> io::Result<VmRegion> {
    if size == 0 {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "region size must be greater than 0",
        ));
    }
    if align == 0 {
        let size = size.max(page_size());
        let inner = os::map_anon(size)?;
        return Ok(VmRegion { inner });
    }
    if !align.is_power_of_two() || align < page_size() {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "alignment must be a power of two and at least one page",
        ));
    }
    let inner = os::map_anon_aligned(size, align)?;
    Ok(VmRegion { inner })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ptr;

    #[test]
    fn page_size_is_power_of_two() {
        let ps = page_size();
        assert!(ps > 0);
        assert_eq!(ps & (ps - 1), 0, "page size should be a power of 2");
    }

    #[test]
    fn granularity_covers_page_size() {
        let ag = allocation_granularity();
        assert!(ag >= page_size());
        assert_eq!(ag & (ag - 1), 0);
    }

    #[test]
    fn unaligned_acquire_is_page_aligned() {
        let region = acquire(1, 0).expect("failed to map");
        assert!(region.len() >= page_size());
        assert_eq!(region.addr() % page_size(), 0);

        // Verification: the memory is readable and writable.
        unsafe {
            ptr::write_volatile(region.ptr(), 42);
            assert_eq!(ptr::read_volatile(region.ptr()), 42);
        }
    }

    #[test]
    fn aligned_acquire_honors_alignment() {
        // 8 MiB region at an 8 MiB boundary, the shape the arena allocator
        // requests.
        let size = 8 * 1024 * 1024;
        let region = acquire(size, size).expect("failed to map aligned region");
        assert_eq!(region.addr() % size, 0);
        assert_eq!(region.len(), size);

        unsafe {
            ptr::write_volatile(region.ptr(), 0xA5);
            ptr::write_volatile(region.ptr().add(size - 1), 0x5A);
            assert_eq!(ptr::read_volatile(region.ptr()), 0xA5);
            assert_eq!(ptr::read_volatile(region.ptr().add(size - 1)), 0x5A);
        }
    }

    #[test]
    fn zero_size_is_rejected() {
        assert!(acquire(0, 0).is_err());
    }

    #[test]
    fn regions_release_on_drop() {
        // Map and drop a batch of regions; failure to unmap would exhaust
        // the address space limits long before this loop ends.
        for _ in 0..64 {
            let region = acquire(4 * 1024 * 1024, 4 * 1024 * 1024).expect("failed to map");
            drop(region);
        }
    }
}

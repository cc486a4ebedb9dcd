use std::io::{self, Error};
use std::ptr;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Returns the system page size, cached atomically.
pub fn page_size() -> usize {
    static PAGE_SIZE: AtomicUsize = AtomicUsize::new(0);

    match PAGE_SIZE.load(Ordering::Relaxed) {
        0 => {
            let page_size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) as usize };
            PAGE_SIZE.store(page_size, Ordering::Relaxed);
            page_size
        }
        page_size => page_size,
    }
}

pub struct RegionInner {
    ptr: *mut libc::c_void,
    len: usize,
}

fn mmap_anon(len: usize) -> io::Result<*mut libc::c_void> {
    let flags = libc::MAP_PRIVATE | libc::MAP_ANON;
    let prot = libc::PROT_READ | libc::PROT_WRITE;

    let ptr = unsafe { libc::mmap(ptr::null_mut(), len, prot, flags, -1, 0) };
    if ptr == libc::MAP_FAILED {
        return Err(Error::last_os_error());
    }
    Ok(ptr)
}

/// Maps `len` bytes of anonymous memory at any page-aligned address.
pub fn map_anon(len: usize) -> io::Result<RegionInner> {
    let ptr = mmap_anon(len)?;
    Ok(RegionInner { ptr, len })
}

/// Maps `len` bytes at an address that is a multiple of `align`.
///
/// Over-maps `2 * len`, then unmaps the slack before and after the aligned
/// window so only the aligned `len`-byte region stays resident.
pub fn map_anon_aligned(len: usize, align: usize) -> io::Result<RegionInner> {
    let raw = mmap_anon(len * 2)?;
    let addr = raw as usize;

    if addr % align == 0 {
        // Already aligned; drop the second half of the mapping.
        unsafe {
            libc::munmap(raw.cast::<u8>().add(len).cast(), len);
        }
        return Ok(RegionInner { ptr: raw, len });
    }

    let aligned = (addr + align - 1) & !(align - 1);
    let lead = aligned - addr;
    let tail = addr + len * 2 - (aligned + len);
    unsafe {
        libc::munmap(raw, lead);
        if tail > 0 {
            libc::munmap((aligned + len) as *mut libc::c_void, tail);
        }
    }
    Ok(RegionInner {
        ptr: aligned as *mut libc::c_void,
        len,
    })
}

impl RegionInner {
    pub fn ptr(&self) -> *mut u8 {
        self.ptr.cast::<u8>()
    }

    pub fn len(&self) -> usize {
        self.len
    }
}

impl Drop for RegionInner {
    fn drop(&mut self) {
        if self.len > 0 {
            unsafe {
                libc::munmap(self.ptr, self.len);
            }
        }
    }
}

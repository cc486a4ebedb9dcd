use std::io::{self, Error};
use std::mem;
use std::ptr;

use windows_sys::Win32::System::Memory::{
    VirtualAlloc, VirtualFree, MEM_COMMIT, MEM_RELEASE, MEM_RESERVE, PAGE_READWRITE,
};
use windows_sys::Win32::System::SystemInformation::{GetSystemInfo, SYSTEM_INFO};

/// Returns the system allocation granularity.
///
/// `VirtualAlloc` base addresses are multiples of this value (typically
/// 64KB), which is larger than the page size (typically 4KB).
pub fn allocation_granularity() -> usize {
    unsafe {
        let mut info: SYSTEM_INFO = mem::zeroed();
        GetSystemInfo(&mut info);
        let gran = info.dwAllocationGranularity as usize;
        if gran == 0 {
            65536
        } else {
            gran
        }
    }
}

pub fn page_size() -> usize {
    unsafe {
        let mut info: SYSTEM_INFO = mem::zeroed();
        GetSystemInfo(&mut info);
        let size = info.dwPageSize as usize;
        if size == 0 {
            4096
        } else {
            size
        }
    }
}

pub struct RegionInner {
    ptr: *mut std::ffi::c_void,
    len: usize,
}

pub fn map_anon(len: usize) -> io::Result<RegionInner> {
    let ptr = unsafe { VirtualAlloc(ptr::null(), len, MEM_COMMIT | MEM_RESERVE, PAGE_READWRITE) };
    if ptr.is_null() {
        return Err(Error::last_os_error());
    }
    Ok(RegionInner { ptr, len })
}

/// Maps `len` bytes at an address that is a multiple of `align`.
///
/// `VirtualFree` cannot trim a reservation, so the over-map-and-trim scheme
/// becomes probe-and-retry here: reserve `2 * len` to discover an address
/// window containing an aligned base, release it, then commit exactly `len`
/// bytes at the computed aligned address. Another thread can steal the
/// window between the two calls, so a handful of attempts are made.
pub fn map_anon_aligned(len: usize, align: usize) -> io::Result<RegionInner> {
    for _ in 0..8 {
        let probe = unsafe { VirtualAlloc(ptr::null(), len * 2, MEM_RESERVE, PAGE_READWRITE) };
        if probe.is_null() {
            return Err(Error::last_os_error());
        }
        let aligned = (probe as usize + align - 1) & !(align - 1);
        unsafe {
            VirtualFree(probe, 0, MEM_RELEASE);
        }

        let ptr = unsafe {
            VirtualAlloc(
                aligned as *const std::ffi::c_void,
                len,
                MEM_COMMIT | MEM_RESERVE,
                PAGE_READWRITE,
            )
        };
        if !ptr.is_null() {
            return Ok(RegionInner { ptr, len });
        }
    }
    Err(Error::last_os_error())
}

impl RegionInner {
    pub const fn ptr(&self) -> *mut u8 {
        self.ptr.cast::<u8>()
    }

    pub const fn len(&self) -> usize {
        self.len
    }
}

impl Drop for RegionInner {
    fn drop(&mut self) {
        if self.len > 0 {
            unsafe {
                // MEM_RELEASE requires dwSize to be 0.
                VirtualFree(self.ptr, 0, MEM_RELEASE);
            }
        }
    }
}

//! Native stack and register discovery for conservative root scanning.
//!
//! Live references can exist only in machine registers at the moment a
//! collection starts, so the stack sweep is preceded by spilling the
//! callee-saved registers into a stack slot that the sweep then covers. The
//! spill is the single architecture-specific function in the crate; other
//! targets fall back to an optimization barrier over a dummy spill area.

/// Best-effort discovery of the current thread's stack bottom (its highest
/// address; stacks grow downward).
///
/// Embedders on platforms without a known discovery mechanism register the
/// address of a local in `main` via
/// [`crate::Heap::mark_thread_stack_bottom`] instead.
#[cfg(target_os = "linux")]
#[must_use]
pub fn native_stack_bottom() -> Option<usize> {
    use libc::{
        pthread_attr_destroy, pthread_attr_getstack, pthread_attr_t, pthread_getattr_np,
        pthread_self,
    };

    unsafe {
        let mut attr: pthread_attr_t = std::mem::zeroed();
        if pthread_getattr_np(pthread_self(), &raw mut attr) != 0 {
            return None;
        }

        let mut stack_addr: *mut libc::c_void = std::ptr::null_mut();
        let mut stack_size: libc::size_t = 0;
        let ret = pthread_attr_getstack(&raw const attr, &raw mut stack_addr, &raw mut stack_size);
        pthread_attr_destroy(&raw mut attr);
        if ret != 0 {
            return None;
        }

        Some(stack_addr as usize + stack_size)
    }
}

/// Best-effort discovery of the current thread's stack bottom.
#[cfg(not(target_os = "linux"))]
#[must_use]
pub fn native_stack_bottom() -> Option<usize> {
    None
}

/// Spills callee-saved registers to the stack, feeds each spilled word to
/// `scan_word`, then feeds every word between (approximately) the current
/// stack pointer and `stack_bottom`.
///
/// `#[inline(never)]` so the caller's own frame, which may hold the last
/// copy of a reference, lies above the scanned range.
///
/// # Safety
///
/// `stack_bottom` must be within the current thread's stack and at or above
/// the caller's frame; every word in `[sp, stack_bottom)` must be readable.
#[inline(never)]
pub unsafe fn spill_registers_and_scan<F>(stack_bottom: usize, mut scan_word: F)
where
    F: FnMut(usize),
{
    #[cfg(target_arch = "x86_64")]
    let regs = {
        let mut regs = [0usize; 6];
        // SAFETY: reading callee-saved registers into locals has no side
        // effects.
        unsafe {
            std::arch::asm!(
                "mov {0}, rbx",
                "mov {1}, rbp",
                "mov {2}, r12",
                "mov {3}, r13",
                "mov {4}, r14",
                "mov {5}, r15",
                out(reg) regs[0],
                out(reg) regs[1],
                out(reg) regs[2],
                out(reg) regs[3],
                out(reg) regs[4],
                out(reg) regs[5],
            );
        }
        regs
    };

    #[cfg(target_arch = "aarch64")]
    let regs = {
        let mut regs = [0usize; 11];
        // SAFETY: reading callee-saved registers into locals has no side
        // effects.
        unsafe {
            std::arch::asm!(
                "mov {0}, x19",
                "mov {1}, x20",
                "mov {2}, x21",
                "mov {3}, x22",
                "mov {4}, x23",
                "mov {5}, x24",
                "mov {6}, x25",
                "mov {7}, x26",
                "mov {8}, x27",
                "mov {9}, x28",
                "mov {10}, x29",
                out(reg) regs[0],
                out(reg) regs[1],
                out(reg) regs[2],
                out(reg) regs[3],
                out(reg) regs[4],
                out(reg) regs[5],
                out(reg) regs[6],
                out(reg) regs[7],
                out(reg) regs[8],
                out(reg) regs[9],
                out(reg) regs[10],
            );
        }
        regs
    };

    // Unknown architectures: no register file access; the dummy spill area
    // still forces anything the compiler kept alive into memory the stack
    // sweep below covers.
    #[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
    let regs = [0usize; 32];

    std::hint::black_box(&regs);

    for &reg in &regs {
        scan_word(reg);
    }

    // The address of a local approximates the stack pointer closely enough:
    // anything below it belongs to this function and cannot hold embedder
    // references.
    let anchor = 0usize;
    let sp = std::ptr::addr_of!(anchor) as usize;

    let word = std::mem::size_of::<usize>();
    let mut current = (sp + word - 1) & !(word - 1);
    while current + word <= stack_bottom {
        // SAFETY: the caller guarantees [sp, stack_bottom) is this thread's
        // readable stack range.
        let candidate = unsafe { std::ptr::read_volatile(current as *const usize) };
        scan_word(candidate);
        current += word;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spill_covers_a_stack_local() {
        // Plant a recognizable word in the caller's frame and check the
        // sweep reports it.
        let sentinel: usize = 0x5A5A_1234_usize
            .wrapping_shl(32)
            .wrapping_add(0x5678_9A0F);
        let planted = std::hint::black_box(sentinel);
        let bottom = std::ptr::addr_of!(planted) as usize + std::mem::size_of::<usize>();

        let mut found = false;
        unsafe {
            spill_registers_and_scan(bottom, |word| {
                if word == sentinel {
                    found = true;
                }
            });
        }
        assert!(found, "stack sweep missed a word planted in a live frame");
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn stack_bottom_is_above_locals() {
        let local = 0u8;
        let bottom = native_stack_bottom().expect("stack bounds on linux");
        assert!(bottom > std::ptr::addr_of!(local) as usize);
    }
}

//! mmap'd coroutine stacks
//!
//! Fiber stacks are anonymous private mappings, read+write, `MAP_STACK`
//! where the platform has it. Stacks grow toward lower addresses; the
//! runtime asserts this at creation time rather than carrying an untested
//! up-growing configuration.

use std::io;
use std::ptr;

/// Owned mmap'd stack memory for one coroutine. Unmapped on drop.
#[derive(Debug)]
pub struct CoroutineStack {
    base: *mut u8,
    size: usize,
}

unsafe impl Send for CoroutineStack {}
unsafe impl Sync for CoroutineStack {}

impl CoroutineStack {
    /// Map a stack of at least `size` bytes, rounded up to the page size.
    /// `size` must be non-zero; the caller is expected to have rejected a
    /// zero request with its own argument error.
    pub fn new(size: usize) -> io::Result<CoroutineStack> {
        assert!(size > 0, "zero-byte coroutine stack");
        let page = page_size();
        let size = size.div_ceil(page) * page;

        let flags = libc::MAP_PRIVATE | libc::MAP_ANONYMOUS | libc::MAP_STACK;
        let base = unsafe {
            libc::mmap(
                ptr::null_mut(),
                size,
                libc::PROT_READ | libc::PROT_WRITE,
                flags,
                -1,
                0,
            )
        };
        if base == libc::MAP_FAILED {
            return Err(io::Error::last_os_error());
        }

        // Fiber seeding and the GC stack walk both assume down-growing
        // stacks.
        assert!(stack_grows_down(), "coroutine stacks require a down-growing call stack");

        Ok(CoroutineStack { base: base as *mut u8, size })
    }

    /// Low end of the mapping.
    pub fn base(&self) -> *mut u8 {
        self.base
    }

    /// High end of the mapping; the initial stack pointer region. Always
    /// page-aligned, which satisfies the 16-byte alignment the switch frame
    /// needs.
    pub fn top(&self) -> *mut u8 {
        unsafe { self.base.add(self.size) }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// True if `addr` falls inside this mapping.
    pub fn contains(&self, addr: usize) -> bool {
        addr >= self.base as usize && addr < self.top() as usize
    }
}

impl Drop for CoroutineStack {
    fn drop(&mut self) {
        let err = unsafe { libc::munmap(self.base as *mut libc::c_void, self.size) };
        if err != 0 {
            // Leaking the mapping is survivable; a corrupted mapping is not.
            eprintln!(
                "garnet: munmap of coroutine stack failed (errno={})",
                io::Error::last_os_error().raw_os_error().unwrap_or(0)
            );
        }
    }
}

pub fn page_size() -> usize {
    let sz = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if sz <= 0 { 4096 } else { sz as usize }
}

/// Probe the call-stack growth direction by comparing a callee's frame
/// address with the caller's.
pub fn stack_grows_down() -> bool {
    let here = 0u8;
    callee_frame_addr() < (&here as *const u8 as usize)
}

#[inline(never)]
fn callee_frame_addr() -> usize {
    let probe = 0u8;
    &probe as *const u8 as usize
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_and_rounds_to_page_size() {
        let stack = CoroutineStack::new(1).unwrap();
        assert_eq!(stack.size() % page_size(), 0);
        assert!(stack.size() >= page_size());
        assert_eq!(stack.top() as usize - stack.base() as usize, stack.size());
    }

    #[test]
    fn memory_is_writable() {
        let stack = CoroutineStack::new(64 * 1024).unwrap();
        unsafe {
            *stack.base() = 0xAB;
            *stack.top().sub(1) = 0xCD;
            assert_eq!(*stack.base(), 0xAB);
            assert_eq!(*stack.top().sub(1), 0xCD);
        }
    }

    #[test]
    fn contains_checks_bounds() {
        let stack = CoroutineStack::new(4096).unwrap();
        assert!(stack.contains(stack.base() as usize));
        assert!(stack.contains(stack.top() as usize - 8));
        assert!(!stack.contains(stack.top() as usize));
    }

    #[test]
    #[should_panic]
    fn zero_size_is_a_caller_bug() {
        let _ = CoroutineStack::new(0);
    }
}

//! §4.A Arena allocator.
//!
//! One contiguous byte buffer, reserved up-front as a virtual range and
//! committed page-by-page as `brk` grows. Grounded directly on the
//! distilled original's `include/arena.h`: below `ARENA_THRESHOLD` the
//! arena doubles on demand; above it, growth is a fixed increment. The
//! platform backend is `mmap`/`mprotect` (via `libc`, the teacher crate's
//! existing `cfg(unix)` dependency) or `VirtualAlloc` (via `windows-sys`,
//! the teacher's `cfg(windows)` dependency) — the same two crates the
//! teacher pulls in under its `os` feature, now driving page reservation
//! instead of OS process introspection.

use crate::error::JSError;

pub const ARENA_MIN: usize = 32 * 1024;
pub const ARENA_MAX_DEFAULT: usize = 256 * 1024 * 1024 * 1024;
pub const ARENA_THRESHOLD: usize = 256 * 1024 * 1024;
pub const ARENA_GROW_INCREMENT: usize = 8 * 1024 * 1024;

/// A 32-bit offset into the arena. 48 bits is the theoretical payload
/// width of a heap [`super::value::Value`]; in practice no arena will ever
/// grow past `u32::MAX` bytes (4 GiB) before the NaN-boxing 48-bit check
/// saturates long before that, so offsets are tracked as `u32` to keep the
/// forwarding table and header-decode code cheap.
pub type Offset = u32;

mod backend {
    //! Platform-specific reserve/commit/decommit. Falls back to a plain
    //! `Vec<u8>`-backed implementation when the `os` feature is disabled,
    //! matching the teacher's `default = ["os", "std"]` feature split.

    #[cfg(all(feature = "os", unix))]
    pub(super) mod imp {
        use crate::error::JSError;

        pub fn reserve(max: usize) -> Result<*mut u8, JSError> {
            unsafe {
                let p = libc::mmap(std::ptr::null_mut(), max, libc::PROT_NONE, libc::MAP_PRIVATE | libc::MAP_ANON, -1, 0);
                if p == libc::MAP_FAILED {
                    return Err(JSError::OutOfMemory { message: "mmap reservation failed".into() });
                }
                mantissa_check(p as usize)?;
                Ok(p as *mut u8)
            }
        }

        pub fn commit(base: *mut u8, old_size: usize, new_size: usize) -> Result<(), JSError> {
            if new_size <= old_size {
                return Ok(());
            }
            let page = page_size();
            let old_pages = round_up(old_size, page);
            let new_pages = round_up(new_size, page);
            if new_pages <= old_pages {
                return Ok(());
            }
            unsafe {
                let addr = base.add(old_pages);
                let rc = libc::mprotect(addr as *mut libc::c_void, new_pages - old_pages, libc::PROT_READ | libc::PROT_WRITE);
                if rc != 0 {
                    return Err(JSError::OutOfMemory { message: "mprotect commit failed".into() });
                }
            }
            Ok(())
        }

        pub fn decommit(base: *mut u8, old_size: usize, new_size: usize) {
            if new_size >= old_size {
                return;
            }
            let page = page_size();
            let new_pages = round_up(new_size, page);
            let old_pages = round_up(old_size, page);
            if new_pages >= old_pages {
                return;
            }
            unsafe {
                let addr = base.add(new_pages);
                let len = old_pages - new_pages;
                libc::mprotect(addr as *mut libc::c_void, len, libc::PROT_NONE);
                libc::madvise(addr as *mut libc::c_void, len, libc::MADV_DONTNEED);
            }
        }

        pub fn free(base: *mut u8, reserved: usize) {
            unsafe {
                libc::munmap(base as *mut libc::c_void, reserved);
            }
        }

        fn page_size() -> usize {
            unsafe { libc::sysconf(libc::_SC_PAGESIZE).max(4096) as usize }
        }

        fn round_up(n: usize, align: usize) -> usize {
            n.div_ceil(align) * align
        }

        fn mantissa_check(addr: usize) -> Result<(), JSError> {
            if (addr >> 48) != 0 {
                return Err(JSError::OutOfMemory {
                    message: "allocator returned a pointer outside the 48-bit NaN-boxing range".into(),
                });
            }
            Ok(())
        }
    }

    #[cfg(all(feature = "os", windows))]
    pub(super) mod imp {
        use crate::error::JSError;
        use windows_sys::Win32::System::Memory::{MEM_COMMIT, MEM_DECOMMIT, MEM_RELEASE, MEM_RESERVE, PAGE_NOACCESS, PAGE_READWRITE, VirtualAlloc, VirtualFree};

        pub fn reserve(max: usize) -> Result<*mut u8, JSError> {
            unsafe {
                let p = VirtualAlloc(std::ptr::null(), max, MEM_RESERVE, PAGE_NOACCESS);
                if p.is_null() {
                    return Err(JSError::OutOfMemory { message: "VirtualAlloc reservation failed".into() });
                }
                if (p as usize >> 48) != 0 {
                    return Err(JSError::OutOfMemory {
                        message: "allocator returned a pointer outside the 48-bit NaN-boxing range".into(),
                    });
                }
                Ok(p as *mut u8)
            }
        }

        pub fn commit(base: *mut u8, old_size: usize, new_size: usize) -> Result<(), JSError> {
            if new_size <= old_size {
                return Ok(());
            }
            unsafe {
                let addr = base.add(old_size);
                let p = VirtualAlloc(addr as *const _, new_size - old_size, MEM_COMMIT, PAGE_READWRITE);
                if p.is_null() {
                    return Err(JSError::OutOfMemory { message: "VirtualAlloc commit failed".into() });
                }
            }
            Ok(())
        }

        pub fn decommit(base: *mut u8, old_size: usize, new_size: usize) {
            if new_size >= old_size {
                return;
            }
            unsafe {
                let addr = base.add(new_size);
                VirtualFree(addr as *mut _, old_size - new_size, MEM_DECOMMIT);
            }
        }

        pub fn free(base: *mut u8, _reserved: usize) {
            unsafe {
                VirtualFree(base as *mut _, 0, MEM_RELEASE);
            }
        }
    }

    #[cfg(not(feature = "os"))]
    pub(super) mod imp {
        //! Pure-Rust fallback: a single heap allocation sized to `max`
        //! up-front. No page-level decommit, but the same external
        //! contract (reserve once, "commit" is a no-op, "decommit" is a
        //! no-op) so `Arena` doesn't need a second code path.
        use crate::error::JSError;
        use std::alloc::{Layout, alloc_zeroed, dealloc};

        pub fn reserve(max: usize) -> Result<*mut u8, JSError> {
            let layout = Layout::from_size_align(max.max(1), 8).map_err(|e| JSError::OutOfMemory { message: e.to_string() })?;
            let p = unsafe { alloc_zeroed(layout) };
            if p.is_null() {
                return Err(JSError::OutOfMemory { message: "global allocator exhausted".into() });
            }
            Ok(p)
        }

        pub fn commit(_base: *mut u8, _old_size: usize, _new_size: usize) -> Result<(), JSError> {
            Ok(())
        }

        pub fn decommit(_base: *mut u8, _old_size: usize, _new_size: usize) {}

        pub fn free(base: *mut u8, reserved: usize) {
            if let Ok(layout) = Layout::from_size_align(reserved.max(1), 8) {
                unsafe { dealloc(base, layout) };
            }
        }
    }

    pub use imp::*;
}

/// The single contiguous byte buffer backing all heap objects.
pub struct Arena {
    base: *mut u8,
    /// Bytes currently committed (readable/writable).
    committed: usize,
    /// The bump pointer: `brk <= committed <= max`.
    brk: usize,
    max: usize,
}

unsafe impl Send for Arena {}

impl Arena {
    /// `create_dynamic(initial, max)` — §6.
    pub fn new(initial: usize, max: usize) -> Result<Arena, JSError> {
        let max = max.max(ARENA_MIN);
        let initial = initial.clamp(ARENA_MIN, max);
        let base = backend::reserve(max)?;
        backend::commit(base, 0, initial)?;
        Ok(Arena { base, committed: initial, brk: 0, max })
    }

    pub fn brk(&self) -> usize {
        self.brk
    }

    pub fn max(&self) -> usize {
        self.max
    }

    pub fn as_slice(&self) -> &[u8] {
        unsafe { std::slice::from_raw_parts(self.base, self.brk) }
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        unsafe { std::slice::from_raw_parts_mut(self.base, self.brk) }
    }

    /// Bump-allocate `size` bytes (rounded to 8-byte alignment per the §3
    /// invariant), growing the committed region if needed. Returns the
    /// offset of the new allocation.
    pub fn alloc(&mut self, size: usize) -> Result<Offset, JSError> {
        let size = size.div_ceil(8) * 8;
        let new_brk = self.brk + size;
        if new_brk > self.max {
            return Err(JSError::OutOfMemory {
                message: format!("arena would exceed configured maximum of {} bytes", self.max),
            });
        }
        if new_brk > self.committed {
            self.grow_to(new_brk)?;
        }
        let off = self.brk as Offset;
        self.brk = new_brk;
        Ok(off)
    }

    fn grow_to(&mut self, needed: usize) -> Result<(), JSError> {
        let mut target = self.committed;
        while target < needed {
            target = if target < ARENA_THRESHOLD { (target * 2).max(ARENA_MIN) } else { target + ARENA_GROW_INCREMENT };
        }
        let target = target.min(self.max).max(needed);
        if target > self.max {
            return Err(JSError::OutOfMemory { message: "cannot grow arena past configured maximum".into() });
        }
        backend::commit(self.base, self.committed, target)?;
        log::debug!("arena grown: {} -> {} bytes (brk={})", self.committed, target, self.brk);
        self.committed = target;
        Ok(())
    }

    /// Called after a successful GC compaction: decommit surplus pages if
    /// live size fell under three-quarters of committed size, rounding
    /// down to a multiple of `ARENA_GROW_INCREMENT` (never below one
    /// increment, never below `brk`).
    pub fn maybe_decommit(&mut self) {
        if self.brk >= self.committed / 4 * 3 {
            return;
        }
        let mut target = ((self.brk / ARENA_GROW_INCREMENT) + 1) * ARENA_GROW_INCREMENT;
        target = target.max(ARENA_GROW_INCREMENT).max(self.brk);
        if target >= self.committed {
            return;
        }
        backend::decommit(self.base, self.committed, target);
        log::debug!("arena decommitted: {} -> {} bytes (brk={})", self.committed, target, self.brk);
        self.committed = target;
    }

    /// Directly set `brk` after a GC copy-phase has relocated live data
    /// into the front of this same buffer (used by [`super::gc`]).
    ///
    /// # Safety
    /// Caller must have already written valid, self-consistent heap data
    /// into `[0, new_brk)`.
    pub unsafe fn set_brk(&mut self, new_brk: usize) {
        debug_assert!(new_brk <= self.committed);
        self.brk = new_brk;
    }
}

impl Drop for Arena {
    fn drop(&mut self) {
        backend::free(self.base, self.max);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bump_allocation_is_monotonic_and_aligned() {
        let mut a = Arena::new(ARENA_MIN, 16 * 1024 * 1024).unwrap();
        let o1 = a.alloc(3).unwrap();
        let o2 = a.alloc(5).unwrap();
        assert_eq!(o1 % 8, 0);
        assert_eq!(o2 % 8, 0);
        assert!(o2 > o1);
        assert_eq!(a.brk() as u64, o2 as u64 + 8);
    }

    #[test]
    fn allocation_failure_surfaces_as_out_of_memory() {
        let mut a = Arena::new(ARENA_MIN, ARENA_MIN).unwrap();
        let err = a.alloc(ARENA_MIN * 2).unwrap_err();
        assert!(matches!(err, JSError::OutOfMemory { .. }));
    }

    #[test]
    fn writes_and_reads_round_trip_across_growth() {
        let mut a = Arena::new(ARENA_MIN, 32 * 1024 * 1024).unwrap();
        let mut offsets = Vec::new();
        for i in 0..2000u32 {
            let off = a.alloc(8).unwrap();
            a.as_mut_slice()[off as usize..off as usize + 4].copy_from_slice(&i.to_le_bytes());
            offsets.push(off);
        }
        for (i, off) in offsets.iter().enumerate() {
            let bytes = &a.as_slice()[*off as usize..*off as usize + 4];
            assert_eq!(u32::from_le_bytes(bytes.try_into().unwrap()), i as u32);
        }
    }

    #[test]
    fn decommit_keeps_at_least_brk_and_one_increment() {
        let mut a = Arena::new(ARENA_MIN, 64 * 1024 * 1024).unwrap();
        a.alloc(1024).unwrap();
        a.maybe_decommit();
        assert!(a.committed >= a.brk());
        assert!(a.committed >= ARENA_GROW_INCREMENT.min(a.max));
    }
}

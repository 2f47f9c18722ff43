//! Page protection toggling for a shared-memory region.
//!
//! Grounded in `original_source/xprotect.h`: `startProtection`/
//! `stopProtection` flip the whole region between `PROT_NONE` and
//! `PROT_READ|PROT_WRITE` via `mprotect`, and `removePageProtect` lifts
//! protection on a single faulting page once its owner has been
//! established. The original's constructor also handles copying a
//! pre-existing static/global data segment into a freshly-remapped shared
//! region (`memcpy` through a private scratch buffer, then
//! `MAP_SHARED|MAP_FIXED`); that step has no counterpart here because our
//! regions are carved fresh out of [`crate::arena::Arena`], which is
//! `MAP_SHARED` from the moment it is created.

use crate::config::PAGE_SIZE;
use crate::error::RuntimeError;

#[derive(Clone, Copy)]
pub struct ProtectedRegion {
    base: usize,
    size: usize,
}

impl ProtectedRegion {
    pub fn new(base: usize, size: usize) -> Self {
        ProtectedRegion { base, size }
    }

    pub fn base(&self) -> usize {
        self.base
    }

    pub fn total_pages(&self) -> usize {
        self.size.div_ceil(PAGE_SIZE)
    }

    pub fn in_range(&self, addr: usize) -> bool {
        addr >= self.base && addr < self.base + self.size
    }

    /// Page index of `addr` within this region. Panics if `addr` is not
    /// `in_range`; callers (the SIGSEGV handler) must check first.
    pub fn page_index(&self, addr: usize) -> usize {
        debug_assert!(self.in_range(addr));
        (addr - self.base) / PAGE_SIZE
    }

    pub fn page_addr(&self, page: usize) -> usize {
        self.base + page * PAGE_SIZE
    }

    fn mprotect(&self, addr: usize, len: usize, prot: libc::c_int) -> Result<(), RuntimeError> {
        let rc = unsafe { libc::mprotect(addr as *mut libc::c_void, len, prot) };
        if rc != 0 {
            return Err(RuntimeError::os("mprotect"));
        }
        Ok(())
    }

    /// Denies all access to the whole region. Threads touching any page of
    /// it will take a `SIGSEGV` that the migration handler interprets as
    /// "this page needs an owner".
    pub fn start_protection(&self) -> Result<(), RuntimeError> {
        self.mprotect(self.base, self.size, libc::PROT_NONE)
    }

    /// Restores full access to the whole region (used at shutdown).
    pub fn stop_protection(&self) -> Result<(), RuntimeError> {
        self.mprotect(self.base, self.size, libc::PROT_READ | libc::PROT_WRITE)
    }

    /// Lifts protection on exactly one page, e.g. once the faulting core
    /// has acquired ownership of it.
    pub fn unprotect_page(&self, page: usize) -> Result<(), RuntimeError> {
        self.mprotect(self.page_addr(page), PAGE_SIZE, libc::PROT_READ | libc::PROT_WRITE)
    }

    /// Re-imposes `PROT_NONE` on one page, e.g. after its owner changes and
    /// the previous owner must re-fault before touching it again.
    pub fn protect_page(&self, page: usize) -> Result<(), RuntimeError> {
        self.mprotect(self.page_addr(page), PAGE_SIZE, libc::PROT_NONE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_index_arithmetic() {
        let region = ProtectedRegion::new(0x1000_0000, PAGE_SIZE * 10);
        assert!(region.in_range(0x1000_0000));
        assert!(region.in_range(0x1000_0000 + PAGE_SIZE * 9));
        assert!(!region.in_range(0x1000_0000 + PAGE_SIZE * 10));
        assert_eq!(region.page_index(0x1000_0000 + PAGE_SIZE * 3 + 42), 3);
        assert_eq!(region.total_pages(), 10);
    }
}

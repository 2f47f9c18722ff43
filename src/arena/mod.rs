//! The shared arena: one `MAP_SHARED|MAP_ANONYMOUS` region every worker in
//! the cohort maps at the same fixed virtual address before forking, so
//! that an [`Offset<T>`] computed in one worker resolves to the same logical
//! object in every other worker.
//!
//! Grounded in `original_source/include/xmemory.h`, which maps the pheap and
//! globals regions at fixed addresses for exactly this reason (pointer
//! values must keep meaning across a forked cohort). We keep pointers out of
//! any struct that crosses the arena boundary and instead hand out
//! [`Offset<T>`] -- a byte offset plus a phantom type -- so that a cross-
//! process data structure can't silently smuggle in a process-local
//! `*mut T` or a Rust reference with the wrong provenance.

use std::marker::PhantomData;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::error::RuntimeError;

/// A byte offset into an [`Arena`], tagged with the type stored there.
///
/// `Offset<T>` is `Copy`, contains no pointer, and is valid in any worker
/// that has mapped the same arena at the same base address.
pub struct Offset<T> {
    raw: usize,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Offset<T> {
    pub const NULL: Offset<T> = Offset { raw: 0, _marker: PhantomData };

    pub fn is_null(&self) -> bool {
        self.raw == 0
    }

    pub fn raw(&self) -> usize {
        self.raw
    }

    /// # Safety
    /// `raw` must be a byte offset previously produced by [`Arena::offset_of`]
    /// (or 0 for null) against an arena with a compatible layout for `T`.
    pub unsafe fn from_raw(raw: usize) -> Self {
        Offset { raw, _marker: PhantomData }
    }
}

impl<T> Clone for Offset<T> {
    fn clone(&self) -> Self {
        *self
    }
}
impl<T> Copy for Offset<T> {}
impl<T> PartialEq for Offset<T> {
    fn eq(&self, other: &Self) -> bool {
        self.raw == other.raw
    }
}
impl<T> Eq for Offset<T> {}
impl<T> std::fmt::Debug for Offset<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Offset(0x{:x})", self.raw)
    }
}

unsafe impl<T> Send for Offset<T> {}
unsafe impl<T> Sync for Offset<T> {}

/// A `MAP_SHARED` anonymous region visible, at the same address, in every
/// worker of the cohort.
pub struct Arena {
    base: NonNull<u8>,
    size: usize,
    owns_mapping: bool,
}

unsafe impl Send for Arena {}
unsafe impl Sync for Arena {}

impl Arena {
    /// Creates a new arena at an address the kernel chooses.
    pub fn new(size: usize) -> Result<Arena, RuntimeError> {
        Self::map(std::ptr::null_mut(), size, false)
    }

    /// Creates a new arena at a fixed virtual address, so every cohort
    /// member that maps the same `addr`/`size` after forking resolves the
    /// same [`Offset<T>`] to the same bytes. Must be called before `fork`;
    /// the mapping is then inherited by children, it is not expected to be
    /// re-established by each worker.
    pub fn new_fixed(addr: usize, size: usize) -> Result<Arena, RuntimeError> {
        Self::map(addr as *mut libc::c_void, size, true)
    }

    fn map(addr: *mut libc::c_void, size: usize, fixed: bool) -> Result<Arena, RuntimeError> {
        let flags = libc::MAP_SHARED
            | libc::MAP_ANONYMOUS
            | if fixed { libc::MAP_FIXED } else { 0 };
        let ptr = unsafe {
            libc::mmap(addr, size, libc::PROT_READ | libc::PROT_WRITE, flags, -1, 0)
        };
        if ptr == libc::MAP_FAILED {
            return Err(RuntimeError::os("mmap shared arena"));
        }
        if fixed && ptr != addr {
            unsafe { libc::munmap(ptr, size) };
            return Err(RuntimeError::InvalidArgument("kernel ignored MAP_FIXED address"));
        }
        Ok(Arena {
            base: NonNull::new(ptr as *mut u8).expect("mmap returned null on success"),
            size,
            owns_mapping: true,
        })
    }

    pub fn base_addr(&self) -> usize {
        self.base.as_ptr() as usize
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Resolves an offset to a raw pointer within this arena.
    ///
    /// # Safety
    /// The caller must ensure `off` stays within bounds and that aliasing
    /// rules for `T` are respected -- the arena itself does no bounds or
    /// type checking, matching the original's raw-pointer arithmetic into
    /// `MAP_SHARED` memory.
    pub unsafe fn resolve<T>(&self, off: Offset<T>) -> *mut T {
        debug_assert!(off.raw + std::mem::size_of::<T>() <= self.size || off.is_null());
        self.base.as_ptr().add(off.raw) as *mut T
    }

    /// Computes the [`Offset<T>`] of a pointer previously obtained from
    /// this same arena (e.g. via [`Arena::resolve`] or [`Arena::alloc`]).
    pub fn offset_of<T>(&self, ptr: *const T) -> Offset<T> {
        let raw = ptr as usize - self.base.as_ptr() as usize;
        unsafe { Offset::from_raw(raw) }
    }

    /// Bump-allocates `count` `T`s from the tail of the arena, zero-
    /// initialized. Intended for one-time setup of fixed tables (owner
    /// table, thread table, ready queues) during bootstrap, before any
    /// worker is forked -- not a general allocator (see the `heap` module
    /// for the per-core segregated allocator used after bootstrap).
    pub fn bump_alloc<T>(&self, cursor: &mut usize, count: usize) -> Result<Offset<T>, RuntimeError> {
        let align = std::mem::align_of::<T>();
        let start = (*cursor + align - 1) & !(align - 1);
        let bytes = std::mem::size_of::<T>()
            .checked_mul(count)
            .ok_or(RuntimeError::ResourceExhausted("bump_alloc size overflow"))?;
        let end = start.checked_add(bytes).ok_or(RuntimeError::ResourceExhausted("bump_alloc overflow"))?;
        if end > self.size {
            return Err(RuntimeError::ResourceExhausted("arena exhausted"));
        }
        unsafe {
            std::ptr::write_bytes(self.base.as_ptr().add(start), 0, bytes);
        }
        *cursor = end;
        Ok(unsafe { Offset::from_raw(start) })
    }

    /// Like [`Arena::bump_alloc`], but the cursor itself lives in the arena
    /// (an `AtomicUsize` every worker resolves the same way) and is
    /// advanced with a CAS loop instead of a `&mut` borrow, so concurrent
    /// callers on different cores never race over the same bytes. Used
    /// after bootstrap, when allocation can no longer be serialized through
    /// a single process holding `&mut usize` (unlike the one-time setup
    /// `bump_alloc` is for -- see that method's docs).
    pub fn bump_alloc_atomic<T>(&self, cursor: &AtomicUsize, count: usize) -> Result<Offset<T>, RuntimeError> {
        let align = std::mem::align_of::<T>();
        let bytes = std::mem::size_of::<T>()
            .checked_mul(count)
            .ok_or(RuntimeError::ResourceExhausted("bump_alloc size overflow"))?;
        let mut current = cursor.load(Ordering::Relaxed);
        loop {
            let start = (current + align - 1) & !(align - 1);
            let end = start.checked_add(bytes).ok_or(RuntimeError::ResourceExhausted("bump_alloc overflow"))?;
            if end > self.size {
                return Err(RuntimeError::ResourceExhausted("arena exhausted"));
            }
            match cursor.compare_exchange_weak(current, end, Ordering::AcqRel, Ordering::Relaxed) {
                Ok(_) => {
                    unsafe { std::ptr::write_bytes(self.base.as_ptr().add(start), 0, bytes) };
                    return Ok(unsafe { Offset::from_raw(start) });
                }
                Err(actual) => current = actual,
            }
        }
    }
}

impl Drop for Arena {
    fn drop(&mut self) {
        if self.owns_mapping {
            unsafe {
                libc::munmap(self.base.as_ptr() as *mut libc::c_void, self.size);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[repr(C)]
    struct Point {
        x: i64,
        y: i64,
    }

    #[test]
    fn bump_alloc_roundtrips_through_offset() {
        let arena = Arena::new(4096).unwrap();
        let mut cursor = 0;
        let off: Offset<Point> = arena.bump_alloc(&mut cursor, 1).unwrap();
        unsafe {
            let p = arena.resolve(off);
            (*p).x = 11;
            (*p).y = 22;
            assert_eq!(arena.offset_of(p), off);
            assert_eq!((*p).x, 11);
        }
    }

    #[test]
    fn exhausted_arena_errors() {
        let arena = Arena::new(4096).unwrap();
        let mut cursor = 0;
        let res: Result<Offset<[u8; 8192]>, _> = arena.bump_alloc(&mut cursor, 1);
        assert!(res.is_err());
    }

    #[test]
    fn bump_alloc_atomic_never_hands_out_overlapping_ranges() {
        let arena = std::sync::Arc::new(Arena::new(1 << 20).unwrap());
        let cursor = std::sync::Arc::new(AtomicUsize::new(0));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let arena = std::sync::Arc::clone(&arena);
                let cursor = std::sync::Arc::clone(&cursor);
                std::thread::spawn(move || {
                    let mut offsets = Vec::new();
                    for _ in 0..500 {
                        let off: Offset<[u8; 64]> = arena.bump_alloc_atomic(&cursor, 1).unwrap();
                        offsets.push(off.raw());
                    }
                    offsets
                })
            })
            .collect();
        let mut all: Vec<usize> = handles.into_iter().flat_map(|h| h.join().unwrap()).collect();
        all.sort_unstable();
        for pair in all.windows(2) {
            assert!(pair[1] - pair[0] >= 64, "allocations must not overlap");
        }
    }
}

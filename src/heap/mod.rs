//! Per-core segregated-bin shared heap.
//!
//! Grounded in `original_source/include/xpheap.h`, `xheap.h`, and
//! `objectheader.h`: a "Kingsley-style" heap keeps one free list per size
//! class, wraps every live object in an `objectHeader` carrying its size
//! class so `free` can recover it without a side table, and is itself
//! backed by `MAP_SHARED` memory so every worker sees the same bins.
//!
//! `xpheap.h`'s own `malloc` has no `return` statement -- it computes the
//! inner heap's result and discards it. We implement the evidently
//! intended behavior (return the allocated pointer) rather than the bug;
//! see DESIGN.md, Open Question 2. Newly handed-out pages are assigned to
//! the allocating core unconditionally (`OwnerTable::set_pages_owner`, no
//! CAS needed): allocation is already serialized under each core's own
//! heap lock, so there is no concurrent claimant to race.

use std::cell::UnsafeCell;
use std::mem::size_of;

use crate::arena::{Arena, Offset};
use crate::config::RuntimeConfig;
use crate::error::RuntimeError;
use crate::page::ProtectedRegion;
use crate::sync::spinlock::RawSpinlock;
use crate::types::CoreId;

const OBJECT_MAGIC: u32 = 0xC0FFEE;

/// Size classes, matching the coarse Kingsley-style doubling the original
/// heap uses. `memalign`-grade alignment requests are unsupported (spec
/// §6); every class here is already a power of two and naturally aligned.
pub const SIZE_CLASSES: [usize; 10] = [16, 32, 64, 128, 256, 512, 1024, 2048, 4096, 8192];

fn size_class_for(size: usize) -> Result<usize, RuntimeError> {
    SIZE_CLASSES
        .iter()
        .position(|&class| class >= size)
        .ok_or(RuntimeError::ResourceExhausted("allocation too large for any size class"))
}

#[repr(C)]
struct ObjectHeader {
    magic: u32,
    class_idx: u32,
}

#[repr(C)]
struct FreeNode {
    next: usize,
}

#[repr(C)]
struct PerCoreHeap {
    lock: RawSpinlock,
    free_lists: UnsafeCell<[usize; SIZE_CLASSES.len()]>,
    bump_next: UnsafeCell<usize>,
}

unsafe impl Send for PerCoreHeap {}
unsafe impl Sync for PerCoreHeap {}

impl PerCoreHeap {
    fn init(&mut self) {
        self.lock = RawSpinlock::new();
        self.free_lists = UnsafeCell::new([0; SIZE_CLASSES.len()]);
        self.bump_next = UnsafeCell::new(0);
    }
}

pub struct HeapTable {
    per_core: Offset<PerCoreHeap>,
    cores: usize,
    region_base: usize,
    per_core_capacity: usize,
}

impl HeapTable {
    /// Carves one [`PerCoreHeap`] control block per core out of `arena`
    /// (runtime metadata, not the protected heap region itself) and
    /// assigns each core an equal contiguous slice of `heap_owner`'s
    /// region to bump-allocate from.
    pub fn init(
        arena: &Arena,
        cursor: &mut usize,
        config: &RuntimeConfig,
        heap_region: &ProtectedRegion,
    ) -> Result<HeapTable, RuntimeError> {
        let per_core: Offset<PerCoreHeap> = arena.bump_alloc(cursor, config.cores)?;
        for core in 0..config.cores {
            unsafe { (&mut *arena.resolve(per_core).add(core)).init() };
        }
        Ok(HeapTable {
            per_core,
            cores: config.cores,
            region_base: heap_region.base(),
            per_core_capacity: heap_region.total_pages() * crate::config::PAGE_SIZE / config.cores,
        })
    }

    fn heap_of<'a>(&self, arena: &'a Arena, core: CoreId) -> &'a PerCoreHeap {
        debug_assert!(core < self.cores);
        unsafe { &*arena.resolve(self.per_core).add(core) }
    }

    /// Allocates `size` bytes from `core`'s slice of the heap, claiming
    /// ownership of every page the new block spans for `core` and
    /// lifting their protection so the allocating thread can use the
    /// memory immediately.
    pub fn malloc(
        &self,
        rt: &crate::runtime::Runtime,
        core: CoreId,
        size: usize,
    ) -> Result<usize, RuntimeError> {
        let idx = size_class_for(size)?;
        let class_size = SIZE_CLASSES[idx];
        let total = class_size + size_of::<ObjectHeader>();
        let heap = self.heap_of(&rt.arena, core);

        heap.lock.lock();
        let addr = unsafe {
            let lists = &mut *heap.free_lists.get();
            if lists[idx] != 0 {
                let head = lists[idx];
                lists[idx] = (*(head as *const FreeNode)).next;
                head
            } else {
                let bump = &mut *heap.bump_next.get();
                if *bump + total > self.per_core_capacity {
                    heap.lock.unlock();
                    return Err(RuntimeError::ResourceExhausted("per-core heap slice exhausted"));
                }
                let addr = self.region_base + core * self.per_core_capacity + *bump;
                *bump += total;
                addr
            }
        };
        unsafe { heap.lock.unlock() };

        unsafe {
            let header = addr as *mut ObjectHeader;
            (*header).magic = OBJECT_MAGIC;
            (*header).class_idx = idx as u32;
        }

        let first_page = rt.heap_region.page_index(addr);
        let last_page = rt.heap_region.page_index(addr + total - 1);
        rt.heap_owner.set_pages_owner(&rt.arena, first_page, last_page - first_page + 1, core as u32);
        for page in first_page..=last_page {
            rt.heap_region.unprotect_page(page)?;
        }

        Ok(addr + size_of::<ObjectHeader>())
    }

    /// Returns `ptr` (as previously returned by [`HeapTable::malloc`]) to
    /// its owning core's free list for that size class.
    ///
    /// # Safety
    /// `ptr` must be a still-live pointer previously returned by
    /// [`HeapTable::malloc`] on this same `HeapTable`.
    pub unsafe fn free(&self, rt: &crate::runtime::Runtime, core: CoreId, ptr: usize) {
        let header_addr = ptr - size_of::<ObjectHeader>();
        let header = &*(header_addr as *const ObjectHeader);
        debug_assert_eq!(header.magic, OBJECT_MAGIC, "free() on a non-heap or corrupted pointer");
        let idx = header.class_idx as usize;
        let heap = self.heap_of(&rt.arena, core);
        heap.lock.lock();
        let lists = &mut *heap.free_lists.get();
        (*(header_addr as *mut FreeNode)).next = lists[idx];
        lists[idx] = header_addr;
        heap.lock.unlock();
    }

    /// Recovers the usable size of a live allocation, from its header --
    /// mirrors `xpheap.h`'s size-tracking via `objectHeader`.
    ///
    /// # Safety
    /// Same as [`HeapTable::free`].
    pub unsafe fn usable_size(&self, ptr: usize) -> usize {
        let header = &*((ptr - size_of::<ObjectHeader>()) as *const ObjectHeader);
        SIZE_CLASSES[header.class_idx as usize]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn size_class_rounds_up() {
        assert_eq!(size_class_for(1).unwrap(), 0);
        assert_eq!(size_class_for(16).unwrap(), 0);
        assert_eq!(size_class_for(17).unwrap(), 1);
        assert_eq!(size_class_for(8192).unwrap(), SIZE_CLASSES.len() - 1);
        assert!(size_class_for(8193).is_err());
    }
}

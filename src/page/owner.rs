//! Per-page owner table.
//!
//! Grounded in `original_source/include/pageowner.h`: one `unsigned long`
//! (here `AtomicU32`) per page, `OWNER_NONE` sentinel, and a single
//! compare-and-swap in `acquireOwnership`. The header's own comment
//! describes a four-step notify-based ownership-transfer protocol, but the
//! function it documents does not implement that protocol -- it is a bare
//! CAS. We implement the function's actual behavior (see DESIGN.md, Open
//! Question 3).

use std::sync::atomic::{AtomicU32, Ordering};

use crate::arena::{Arena, Offset};
use crate::error::RuntimeError;
use crate::types::CORE_NONE;

pub struct OwnerTable {
    base: Offset<AtomicU32>,
    total_pages: usize,
}

impl OwnerTable {
    /// Carves `total_pages` owner entries out of `arena`, each initialized
    /// to [`CORE_NONE`] (unowned).
    pub fn init(arena: &Arena, cursor: &mut usize, total_pages: usize) -> Result<OwnerTable, RuntimeError> {
        let base: Offset<AtomicU32> = arena.bump_alloc(cursor, total_pages)?;
        let table = OwnerTable { base, total_pages };
        for i in 0..total_pages {
            table.entry(arena, i).store(CORE_NONE, Ordering::Relaxed);
        }
        Ok(table)
    }

    fn entry<'a>(&self, arena: &'a Arena, page: usize) -> &'a AtomicU32 {
        debug_assert!(page < self.total_pages);
        unsafe { &*arena.resolve(self.base).add(page) }
    }

    pub fn total_pages(&self) -> usize {
        self.total_pages
    }

    pub fn get_owner(&self, arena: &Arena, page: usize) -> u32 {
        self.entry(arena, page).load(Ordering::Acquire)
    }

    pub fn is_owned(&self, arena: &Arena, page: usize) -> bool {
        self.get_owner(arena, page) != CORE_NONE
    }

    /// Unconditionally assigns `page` to `core`. Used by the heap allocator
    /// when handing out fresh pages -- serialized under the heap's own
    /// lock, so no CAS is needed (matches `xpheap.h`'s allocation path,
    /// which calls `setPagesOwner` directly after `malloc`).
    pub fn set_owner(&self, arena: &Arena, page: usize, core: u32) {
        self.entry(arena, page).store(core, Ordering::Release);
    }

    pub fn set_pages_owner(&self, arena: &Arena, first_page: usize, count: usize, core: u32) {
        for page in first_page..first_page + count {
            self.set_owner(arena, page, core);
        }
    }

    pub fn set_unowned(&self, arena: &Arena, page: usize) {
        self.entry(arena, page).store(CORE_NONE, Ordering::Release);
    }

    /// Attempts to claim `page` for `core` via CAS against [`CORE_NONE`].
    /// Returns `true` if this call won the race.
    pub fn acquire_ownership(&self, arena: &Arena, page: usize, core: u32) -> bool {
        self.entry(arena, page)
            .compare_exchange(CORE_NONE, core, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn fresh_pages_are_unowned() {
        let arena = Arena::new(4096 * 4).unwrap();
        let mut cursor = 0;
        let table = OwnerTable::init(&arena, &mut cursor, 16).unwrap();
        for p in 0..16 {
            assert!(!table.is_owned(&arena, p));
            assert_eq!(table.get_owner(&arena, p), CORE_NONE);
        }
    }

    #[test]
    fn only_one_core_wins_the_race() {
        let arena = Arc::new(Arena::new(4096 * 4).unwrap());
        let mut cursor = 0;
        let table = Arc::new(OwnerTable::init(&arena, &mut cursor, 1).unwrap());
        let mut handles = Vec::new();
        for core in 0..8u32 {
            let arena = Arc::clone(&arena);
            let table = Arc::clone(&table);
            handles.push(std::thread::spawn(move || table.acquire_ownership(&arena, 0, core)));
        }
        let wins: usize = handles.into_iter().map(|h| h.join().unwrap()).filter(|w| *w).count();
        assert_eq!(wins, 1);
        assert_ne!(table.get_owner(&arena, 0), CORE_NONE);
    }

    #[test]
    fn set_pages_owner_covers_range() {
        let arena = Arena::new(4096 * 8).unwrap();
        let mut cursor = 0;
        let table = OwnerTable::init(&arena, &mut cursor, 8).unwrap();
        table.set_pages_owner(&arena, 2, 3, 5);
        assert_eq!(table.get_owner(&arena, 1), CORE_NONE);
        assert_eq!(table.get_owner(&arena, 2), 5);
        assert_eq!(table.get_owner(&arena, 3), 5);
        assert_eq!(table.get_owner(&arena, 4), 5);
        assert_eq!(table.get_owner(&arena, 5), CORE_NONE);
    }
}

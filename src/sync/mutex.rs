//! User-space mutex.
//!
//! Grounded in `original_source/include/xmutex.h`: a spinlock (`lck`)
//! guards a `status`/`owner`/waitlist triple. The header's `mutexLock` has
//! a `goto checkagain` that always takes the pure-spin branch and never
//! reaches the waitlist-enqueue code below it (guarded by a dead `#if 0`).
//! We implement the live waitlist-handoff path instead -- see DESIGN.md,
//! Open Question 1 -- because the Testable Properties require FIFO-ish
//! handoff fairness that pure spinning cannot provide. `unlock` hands the
//! lock directly to the next waiter (if any) rather than simply clearing
//! `locked`, matching the original's own handoff-on-unlock shape: it
//! avoids a thundering herd of spinners all re-racing for a lock that one
//! particular waiter was already selected to receive.

use std::cell::UnsafeCell;

use crate::list::RawList;
use crate::runtime::{self, Runtime};
use crate::sched;
use crate::sync::spinlock::RawSpinlock;
use crate::thread::table;
use crate::thread::tcb::Tcb;
use crate::types::{Tid, TID_NONE};

#[repr(C)]
pub struct Mutex {
    guard: RawSpinlock,
    locked: UnsafeCell<bool>,
    owner: UnsafeCell<Tid>,
    waiters: UnsafeCell<RawList<Tcb>>,
}

unsafe impl Send for Mutex {}
unsafe impl Sync for Mutex {}

impl Mutex {
    /// Initializes a freshly bump-allocated, zeroed mutex in place. Note
    /// that zero-initialized fields (`locked = false`, empty waitlist) are
    /// already a valid unlocked mutex, since `MAP_SHARED|MAP_ANONYMOUS`
    /// pages come back zero-filled from the kernel -- `init` exists for
    /// readability and parity with the original's explicit constructor,
    /// not because zeroed memory would otherwise be unsafe to use.
    pub fn init(&mut self) {
        self.guard = RawSpinlock::new();
        unsafe {
            *self.locked.get() = false;
            *self.owner.get() = TID_NONE;
            *self.waiters.get() = RawList::default();
        }
    }

    fn current_tid(rt: &Runtime) -> Tid {
        unsafe { (*rt.arena.resolve(table::current(rt))).tid }
    }

    pub fn try_lock(&self) -> bool {
        self.guard.lock();
        let acquired = unsafe {
            if !*self.locked.get() {
                *self.locked.get() = true;
                *self.owner.get() = Self::current_tid(runtime::active());
                true
            } else {
                false
            }
        };
        unsafe { self.guard.unlock() };
        acquired
    }

    /// Acquires the lock, blocking cooperatively if it is held.
    pub fn lock(&self) {
        let rt = runtime::active();
        let me_tid = Self::current_tid(rt);
        loop {
            self.guard.lock();
            unsafe {
                // `unlock` hands the lock directly to a chosen waiter by
                // setting `owner` to that waiter's tid without ever
                // clearing `locked` -- so a thread waking back up here
                // already owns the lock and must return immediately rather
                // than fall into the `!locked` check below, which would
                // never be true again and would re-enqueue it forever.
                if *self.locked.get() && *self.owner.get() == me_tid {
                    self.guard.unlock();
                    return;
                }
                if !*self.locked.get() {
                    *self.locked.get() = true;
                    *self.owner.get() = me_tid;
                    self.guard.unlock();
                    return;
                }
                let me = table::current(rt);
                (*self.waiters.get()).push_back(&rt.arena, me);
            }
            let lock_off = rt.arena.offset_of(&self.guard as *const RawSpinlock);
            unsafe { sched::current().yield_holding_lock(rt, lock_off) };
            // Woken (directly handed the lock by `unlock`, or spuriously);
            // loop around and re-check.
        }
    }

    /// Releases the lock, handing it directly to the oldest waiter if one
    /// is queued. `locked` stays `true` across a handoff -- the lock never
    /// becomes free, ownership just moves to the waiter `unlock` selects --
    /// see `lock`'s `owner == me_tid` check for the other half of this.
    pub fn unlock(&self) {
        let rt = runtime::active();
        self.guard.lock();
        unsafe {
            match (*self.waiters.get()).pop_front(&rt.arena) {
                Some(waiter) => {
                    *self.owner.get() = (*rt.arena.resolve(waiter)).tid;
                    let core = sched::current().core();
                    rt.private_queue(core).enqueue(&rt.arena, waiter);
                }
                None => {
                    *self.locked.get() = false;
                    *self.owner.get() = TID_NONE;
                }
            }
        }
        self.guard.unlock();
    }

    pub fn owner(&self) -> Tid {
        self.guard.lock();
        let owner = unsafe { *self.owner.get() };
        unsafe { self.guard.unlock() };
        owner
    }
}

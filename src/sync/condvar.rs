//! Condition variable.
//!
//! Grounded in `original_source/include/xcondvar.h`: `wait` links the
//! caller onto the condvar's own waitlist, releases the associated mutex,
//! then yields holding the condvar's internal lock
//! (`threadYieldHoldingLock`) so a concurrent `signal`/`broadcast` cannot
//! pop a waiter off the list and enqueue it for running before that
//! waiter's context has actually been captured.

use std::cell::UnsafeCell;

use crate::list::RawList;
use crate::runtime;
use crate::sched;
use crate::sync::mutex::Mutex;
use crate::sync::spinlock::RawSpinlock;
use crate::thread::table;
use crate::thread::tcb::Tcb;

#[repr(C)]
pub struct Condvar {
    guard: RawSpinlock,
    waiters: UnsafeCell<RawList<Tcb>>,
}

unsafe impl Send for Condvar {}
unsafe impl Sync for Condvar {}

impl Condvar {
    pub fn init(&mut self) {
        self.guard = RawSpinlock::new();
        unsafe { *self.waiters.get() = RawList::default() };
    }

    /// Atomically releases `mutex` and blocks until woken, then
    /// reacquires `mutex` before returning -- the usual condvar contract.
    pub fn wait(&self, mutex: &Mutex) {
        let rt = runtime::active();
        self.guard.lock();
        let me = unsafe { table::current(rt) };
        unsafe { (*self.waiters.get()).push_back(&rt.arena, me) };
        mutex.unlock();
        let lock_off = rt.arena.offset_of(&self.guard as *const RawSpinlock);
        unsafe { sched::current().yield_holding_lock(rt, lock_off) };
        mutex.lock();
    }

    /// Wakes one waiter, if any.
    pub fn signal(&self) {
        let rt = runtime::active();
        self.guard.lock();
        let woken = unsafe { (*self.waiters.get()).pop_front(&rt.arena) };
        self.guard.unlock();
        if let Some(w) = woken {
            let core = unsafe { sched::current() }.core();
            rt.private_queue(core).enqueue(&rt.arena, w);
        }
    }

    /// Wakes every waiter, splicing the whole waitlist onto the shared
    /// ready queue at once (spec.md §4.6: "splice the detached list onto
    /// the shared ready queue via `enqueue_all`" -- unlike `signal`'s
    /// single-waiter handoff, a broadcast's waiters are not all bound to
    /// the caller's core, so they go where any core can pick them up).
    pub fn broadcast(&self) {
        let rt = runtime::active();
        self.guard.lock();
        let mut all = std::mem::take(unsafe { &mut *self.waiters.get() });
        self.guard.unlock();
        if all.is_empty() {
            return;
        }
        rt.shared_queue().enqueue_all(&rt.arena, &mut all);
    }
}

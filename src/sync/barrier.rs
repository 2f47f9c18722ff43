//! Barrier.
//!
//! Grounded in `original_source/xbarr.h`: arriving threads increment a
//! counter under the barrier's lock; the thread that reaches the
//! configured threshold releases every waiter by splicing the whole
//! waitlist onto a ready queue, then resets the counter so the barrier can
//! be reused.

use std::cell::UnsafeCell;

use crate::list::RawList;
use crate::runtime;
use crate::sched;
use crate::sync::spinlock::RawSpinlock;
use crate::thread::table;
use crate::thread::tcb::Tcb;

#[repr(C)]
pub struct Barrier {
    guard: RawSpinlock,
    threshold: UnsafeCell<u32>,
    count: UnsafeCell<u32>,
    waiters: UnsafeCell<RawList<Tcb>>,
}

unsafe impl Send for Barrier {}
unsafe impl Sync for Barrier {}

impl Barrier {
    pub fn init(&mut self, threshold: u32) {
        self.guard = RawSpinlock::new();
        unsafe {
            *self.threshold.get() = threshold;
            *self.count.get() = 0;
            *self.waiters.get() = RawList::default();
        }
    }

    /// Blocks until `threshold` threads have called `wait`. The arrival
    /// that reaches the threshold does not block: it releases every other
    /// waiter and returns immediately, matching `xbarr.h`.
    pub fn wait(&self) {
        let rt = runtime::active();
        self.guard.lock();
        let reached = unsafe {
            *self.count.get() += 1;
            *self.count.get() >= *self.threshold.get()
        };
        if reached {
            let mut all = std::mem::take(unsafe { &mut *self.waiters.get() });
            unsafe { *self.count.get() = 0 };
            self.guard.unlock();
            if !all.is_empty() {
                rt.shared_queue().enqueue_all(&rt.arena, &mut all);
            }
            return;
        }
        let me = unsafe { table::current(rt) };
        unsafe { (*self.waiters.get()).push_back(&rt.arena, me) };
        let lock_off = rt.arena.offset_of(&self.guard as *const RawSpinlock);
        unsafe { sched::current().yield_holding_lock(rt, lock_off) };
    }
}

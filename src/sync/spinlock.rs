//! Raw test-and-set spinlock with explicit, guard-free `lock`/`unlock`.
//!
//! Grounded in `original_source/include/xmutex.h`'s `lck` field: a bare
//! spinlock, not RAII, because its critical section sometimes has to
//! outlive the calling thread's own suspension (`threadYieldHoldingLock`
//! posts an event asking the scheduler to call `unlock()` only once the
//! holder's context has actually been parked -- see `sched::scheduler`).
//! A `std`-style guard type whose `Drop` runs the unlock can't express
//! that, which is why `sync::mutex`/`condvar`/`barrier` use this instead of
//! `spin::Mutex` for their own internal critical sections, even though
//! `spin::Mutex` is used elsewhere (ready queues) where no such deferral is
//! needed.

use std::sync::atomic::{AtomicBool, Ordering};

#[repr(C)]
pub struct RawSpinlock {
    locked: AtomicBool,
}

impl Default for RawSpinlock {
    fn default() -> Self {
        RawSpinlock { locked: AtomicBool::new(false) }
    }
}

impl RawSpinlock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lock(&self) {
        while self
            .locked
            .compare_exchange_weak(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            while self.locked.load(Ordering::Relaxed) {
                std::hint::spin_loop();
            }
        }
    }

    pub fn try_lock(&self) -> bool {
        self.locked.compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed).is_ok()
    }

    /// # Safety
    /// Caller must currently hold the lock.
    pub unsafe fn unlock(&self) {
        self.locked.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn mutual_exclusion_under_contention() {
        let lock = Arc::new(RawSpinlock::new());
        let counter = Arc::new(std::sync::atomic::AtomicU64::new(0));
        let mut handles = Vec::new();
        for _ in 0..8 {
            let lock = Arc::clone(&lock);
            let counter = Arc::clone(&counter);
            handles.push(std::thread::spawn(move || {
                for _ in 0..1000 {
                    lock.lock();
                    let v = counter.load(Ordering::Relaxed);
                    counter.store(v + 1, Ordering::Relaxed);
                    unsafe { lock.unlock() };
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(counter.load(Ordering::Relaxed), 8000);
    }
}

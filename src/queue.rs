//! Ready queues: a [`RawList`] behind a [`spin::Mutex`], living in shared
//! memory so every worker can enqueue/dequeue threads on any core's queue.
//!
//! Grounded in `original_source/xqueue.h`, whose `xqueue` is exactly this --
//! a spinlock-guarded intrusive list with `enqueue`, `dequeue`,
//! `enqueueAllList`, and `hasWork`. The 128-byte cache-line padding the
//! original adds to avoid false sharing between adjacent cores' queues is
//! out of scope here (Non-goal: no performance tuning beyond correctness).

use spin::Mutex;

use crate::arena::{Arena, Offset};
use crate::list::{Linked, RawList};

pub struct ReadyQueue<T> {
    list: Mutex<RawList<T>>,
}

impl<T> Default for ReadyQueue<T> {
    fn default() -> Self {
        ReadyQueue { list: Mutex::new(RawList::default()) }
    }
}

impl<T: Linked> ReadyQueue<T> {
    pub fn enqueue(&self, arena: &Arena, node: Offset<T>) {
        let mut list = self.list.lock();
        unsafe { list.push_back(arena, node) };
        debug_assert!(!list.is_empty());
    }

    pub fn dequeue(&self, arena: &Arena) -> Option<Offset<T>> {
        unsafe { self.list.lock().pop_front(arena) }
    }

    pub fn remove(&self, arena: &Arena, node: Offset<T>) {
        unsafe { self.list.lock().remove(arena, node) };
    }

    /// Moves every node from `other` onto this queue's tail, atomically
    /// with respect to both queues' locks. Used to release a whole
    /// condvar/barrier waitlist onto a ready queue at once.
    pub fn enqueue_all(&self, arena: &Arena, other: &mut RawList<T>) {
        if other.is_empty() {
            return;
        }
        let mut list = self.list.lock();
        unsafe { list.append_all(arena, other) };
    }

    pub fn has_work(&self) -> bool {
        !self.list.lock().is_empty()
    }

    pub fn len(&self) -> usize {
        self.list.lock().len()
    }
}

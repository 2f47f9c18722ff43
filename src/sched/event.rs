//! Scheduler event queue.
//!
//! Grounded in `original_source/xscheduler.cpp`'s `insertSchedulerEventQueue`
//! and `handleThreadEvents`: every yield primitive posts one event to the
//! *scheduler's* event list (not a shared queue) describing what should
//! happen after the just-suspended thread's context has actually been
//! saved, and the scheduler drains that list before picking its next
//! thread to run. The two event kinds the original needs are a plain
//! "put this thread back on a queue" and "release this lock, now that it's
//! safe because the holder has fully suspended" -- the latter is what makes
//! `YieldHoldingLock` race-free (see `sync::mutex` and `sync::condvar`).
//!
//! The design notes call for representing this as a plain sum type rather
//! than dynamic dispatch across a process boundary (a vtable pointer would
//! only be meaningful in the process that built it); `SchedEvent` is that
//! sum type, matching the teacher's own `scheduler::events::SchedEvent`
//! enum shape (tagged variants plus a `name()` helper for logging) adapted
//! to the two events this design actually needs.

use crate::arena::Offset;
use crate::sync::spinlock::RawSpinlock;
use crate::thread::tcb::Tcb;
use crate::types::CoreId;

/// Which ready queue a yielding thread should land on.
#[derive(Clone, Copy)]
pub enum QueueTarget {
    /// The single cohort-wide shared ready queue.
    Shared,
    /// A specific core's private ready queue (used for lock-handoff
    /// locality and for re-homing a bound thread).
    Private(CoreId),
}

/// What a yield primitive asks the scheduler to do once the yielding
/// thread's context is safely parked.
#[derive(Clone, Copy)]
pub enum SchedEvent {
    /// Put `thread` onto `target` once it is fully suspended.
    YieldToQueue { thread: Offset<Tcb>, target: QueueTarget },

    /// Release `lock` once its holder is fully suspended. Used by
    /// `YieldHoldingLock`: the lock must stay held until the holder's
    /// context switch has completed, or a waiter woken early could run
    /// before there is anywhere safe to resume it.
    ReleaseLock { lock: Offset<RawSpinlock> },
}

impl SchedEvent {
    pub fn name(&self) -> &'static str {
        match self {
            SchedEvent::YieldToQueue { .. } => "YieldToQueue",
            SchedEvent::ReleaseLock { .. } => "ReleaseLock",
        }
    }
}

/// Per-core, process-local queue of pending events. Not shared memory --
/// only the scheduler thread on this core ever touches its own event
/// queue, and events are posted to it from threads that run (briefly)
/// *on this core* right before they yield, so no cross-process access is
/// needed.
#[derive(Default)]
pub struct EventQueue {
    events: std::cell::RefCell<Vec<SchedEvent>>,
}

impl EventQueue {
    pub fn post(&self, event: SchedEvent) {
        self.events.borrow_mut().push(event);
    }

    pub fn drain(&self) -> Vec<SchedEvent> {
        std::mem::take(&mut *self.events.borrow_mut())
    }
}

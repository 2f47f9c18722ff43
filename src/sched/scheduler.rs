//! The per-core scheduler loop and the three yield primitives.
//!
//! Grounded directly in `original_source/xscheduler.cpp`: `schedulerThread`
//! dequeues from the private queue then the shared queue (re-homing any
//! thread bound to a different core), switches to it, and on return drains
//! the event list the just-run thread posted before it suspended. The
//! three yield primitives (`threadYieldToRunQueue`, `threadYieldHoldingLock`,
//! `threadYieldInitially`) all boil down to "post an event, then
//! `THREAD_SWITCH` back to the scheduler" -- `YieldHoldingLock` is the one
//! that matters for correctness: the lock is released from inside
//! `handleThreadEvents`, i.e. only after the holder's context has been
//! fully parked, so a woken waiter can never run before there is a context
//! to resume it into.

use std::cell::Cell;

use crate::arena::Offset;
use crate::runtime::Runtime;
use crate::sched::context::Context;
use crate::sched::event::{EventQueue, QueueTarget, SchedEvent};
use crate::sync::spinlock::RawSpinlock;
use crate::thread::tcb::{Tcb, ThreadStatus};
use crate::types::CoreId;

thread_local! {
    static CURRENT: Cell<*mut Scheduler> = Cell::new(std::ptr::null_mut());
}

/// Returns the calling core's scheduler. Every worker calls
/// [`Scheduler::run`] exactly once on its single native thread, which sets
/// this before entering the loop; every sync primitive that needs to yield
/// goes through this accessor rather than threading a `&mut Scheduler`
/// through every call site, mirroring the C++ runtime's `process::scheduler`
/// singleton access.
///
/// # Safety
/// Must only be called from a thread that has called
/// [`Scheduler::install_current`].
pub unsafe fn current<'a>() -> &'a mut Scheduler {
    let ptr = CURRENT.with(|c| c.get());
    debug_assert!(!ptr.is_null(), "no scheduler installed on this thread");
    &mut *ptr
}

/// Like [`current`], but returns `None` instead of dereferencing a null
/// pointer when no scheduler has been installed on the calling OS thread
/// yet -- the one caller that needs this is `thread::table::spawn`,
/// reachable from `process::bootstrap` before core 0's own scheduler is
/// installed.
pub unsafe fn try_current<'a>() -> Option<&'a mut Scheduler> {
    let ptr = CURRENT.with(|c| c.get());
    if ptr.is_null() { None } else { Some(&mut *ptr) }
}

pub struct Scheduler {
    core: CoreId,
    events: EventQueue,
    self_ctx: Context,
    current_thread: Option<Offset<Tcb>>,
}

impl Scheduler {
    pub fn new(core: CoreId) -> Self {
        Scheduler { core, events: EventQueue::default(), self_ctx: Context::new(), current_thread: None }
    }

    pub fn core(&self) -> CoreId {
        self.core
    }

    pub fn current_thread(&self) -> Option<Offset<Tcb>> {
        self.current_thread
    }

    /// Raw pointer to this core's own scheduler context, for the SIGSEGV
    /// migration path (`signal` module), which resumes the scheduler by
    /// overwriting the kernel's signal-return context in place instead of
    /// going through [`Context::swap`].
    ///
    /// # Safety
    /// Must only be dereferenced from the same OS thread this `Scheduler`
    /// belongs to.
    pub unsafe fn self_ctx_raw(&self) -> *const libc::ucontext_t {
        self.self_ctx.as_raw()
    }

    /// Installs `self` as this OS thread's scheduler for [`current`].
    ///
    /// # Safety
    /// `self` must outlive every call to [`current`] made on this thread --
    /// in practice it is a value owned by the call stack of
    /// [`Scheduler::run`], which never returns.
    pub unsafe fn install_current(&mut self) {
        CURRENT.with(|c| c.set(self as *mut Scheduler));
    }

    /// The main per-core dispatch loop. Never returns: workers exit the
    /// cohort by having every user thread finish, at which point the loop
    /// keeps idling (`original_source` has no cohort-wide shutdown path
    /// either -- see spec Non-goals).
    pub fn run(&mut self, rt: &Runtime) -> ! {
        unsafe {
            self.install_current();
            self.self_ctx.capture();
        }
        log::info!("scheduler online on core {}", self.core);
        loop {
            self.handle_events(rt);
            match self.pick_next(rt) {
                Some(tid) => unsafe {
                    let tcb = &mut *rt.arena.resolve(tid);
                    tcb.set_status(ThreadStatus::Running);
                    self.current_thread = Some(tid);
                    Context::swap(&mut self.self_ctx as *mut _, &mut tcb.context as *mut _);
                    self.current_thread = None;
                },
                None => std::hint::spin_loop(),
            }
        }
    }

    /// Chooses the next thread to run: private queue first, then the
    /// shared queue, skipping (and re-homing) any dequeued thread bound to
    /// a different core. Mirrors `xscheduler.cpp`'s `isRunnableThread`.
    fn pick_next(&self, rt: &Runtime) -> Option<Offset<Tcb>> {
        loop {
            if let Some(t) = rt.private_queue(self.core).dequeue(&rt.arena) {
                if self.runnable_here(rt, t) {
                    return Some(t);
                }
                continue;
            }
            if let Some(t) = rt.shared_queue().dequeue(&rt.arena) {
                if self.runnable_here(rt, t) {
                    return Some(t);
                }
                continue;
            }
            return None;
        }
    }

    fn runnable_here(&self, rt: &Runtime, t: Offset<Tcb>) -> bool {
        let tcb = unsafe { &*rt.arena.resolve(t) };
        match tcb.bound_core() {
            Some(c) if c != self.core => {
                rt.private_queue(c).enqueue(&rt.arena, t);
                false
            }
            _ => true,
        }
    }

    fn handle_events(&self, rt: &Runtime) {
        for event in self.events.drain() {
            log::debug!("core {}: handling event {}", self.core, event.name());
            match event {
                SchedEvent::YieldToQueue { thread, target } => match target {
                    QueueTarget::Shared => rt.shared_queue().enqueue(&rt.arena, thread),
                    QueueTarget::Private(core) => rt.private_queue(core).enqueue(&rt.arena, thread),
                },
                SchedEvent::ReleaseLock { lock } => {
                    let lock: &RawSpinlock = unsafe { &*rt.arena.resolve(lock) };
                    unsafe { lock.unlock() };
                }
            }
        }
    }

    /// Suspends the calling thread and enqueues it onto `target`, only
    /// after the suspension completes. Grounded in
    /// `threadYieldToRunQueue`/`threadYieldHoldingLock`: both post an event
    /// and then switch, the difference being which event they post.
    ///
    /// # Safety
    /// Must be called from the stack of the TCB identified by
    /// `self.current_thread`.
    pub unsafe fn yield_to_queue(&mut self, rt: &Runtime, target: QueueTarget) {
        let me = self.current_thread.expect("yield_to_queue called with no current thread");
        self.events.post(SchedEvent::YieldToQueue { thread: me, target });
        let tcb = &mut *rt.arena.resolve(me);
        tcb.set_status(ThreadStatus::Ready);
        Context::swap(&mut tcb.context as *mut _, &mut self.self_ctx as *mut _);
    }

    /// Suspends the calling thread *without* releasing `lock` first; the
    /// lock is released by the scheduler's event handler once this
    /// thread's context has actually been parked. This is what makes lock
    /// handoff race-free: a waiter the unlock wakes can never be scheduled
    /// before the holder has somewhere safe to resume from.
    ///
    /// # Safety
    /// Same as [`Scheduler::yield_to_queue`]. `lock` must currently be held
    /// by the calling thread.
    pub unsafe fn yield_holding_lock(&mut self, rt: &Runtime, lock: Offset<RawSpinlock>) {
        let me = self.current_thread.expect("yield_holding_lock called with no current thread");
        self.events.post(SchedEvent::ReleaseLock { lock });
        let tcb = &mut *rt.arena.resolve(me);
        tcb.set_status(ThreadStatus::Blocked);
        Context::swap(&mut tcb.context as *mut _, &mut self.self_ctx as *mut _);
    }

    /// Suspends the calling thread permanently: switches back to the
    /// scheduler without posting any event, so nothing ever re-enqueues
    /// this TCB. Not used by `exit_current` itself (see
    /// [`Scheduler::vanish_holding_lock`]) -- kept as the primitive a
    /// terminated thread with no lock of its own to release would use.
    ///
    /// # Safety
    /// Same as [`Scheduler::yield_to_queue`].
    pub unsafe fn vanish(&mut self, rt: &Runtime) -> ! {
        let me = self.current_thread.expect("vanish called with no current thread");
        let tcb = &mut *rt.arena.resolve(me);
        Context::swap(&mut tcb.context as *mut _, &mut self.self_ctx as *mut _);
        unreachable!("a terminated thread's context must never be resumed");
    }

    /// Like [`Scheduler::vanish`], but posts a `ReleaseLock` event for
    /// `lock` first, so the scheduler releases it only once this thread's
    /// context has actually been parked -- never resumed, so unlike
    /// [`Scheduler::yield_holding_lock`] the status is left exactly as the
    /// caller set it (`ThreadStatus::Exited`), not overwritten to
    /// `Blocked`. Grounded in spec's Exit operation: "... then
    /// YieldHoldingLock(self-lock) -- never to return." Used by
    /// `thread::table::exit_current` to release its own TCB's guard
    /// without a concurrent joiner observing `Exited` while this thread
    /// still physically holds that guard.
    ///
    /// # Safety
    /// Same as [`Scheduler::vanish`]; `lock` must currently be held by the
    /// calling thread.
    pub unsafe fn vanish_holding_lock(&mut self, rt: &Runtime, lock: Offset<RawSpinlock>) -> ! {
        let me = self.current_thread.expect("vanish_holding_lock called with no current thread");
        self.events.post(SchedEvent::ReleaseLock { lock });
        let tcb = &mut *rt.arena.resolve(me);
        Context::swap(&mut tcb.context as *mut _, &mut self.self_ctx as *mut _);
        unreachable!("a terminated thread's context must never be resumed");
    }

    /// Enqueues a brand-new TCB with no prior running context to suspend
    /// from -- used for every `thread_create` (there is no "current
    /// context" belonging to the new thread yet to save) and, once, to
    /// hand `process::bootstrap`'s initial thread to core 0's scheduler
    /// before that scheduler has even been installed on core 0's OS
    /// thread. Grounded in `original_source/xscheduler.cpp`'s
    /// `threadYieldInitially`: a free function rather than a method on
    /// `Scheduler`, since -- as spec.md §4.1 notes -- it is only ever
    /// safe to call before the calling OS thread's own scheduler is
    /// necessarily running yet, so it must not route through
    /// [`current`].
    pub fn yield_initially(rt: &Runtime, thread: Offset<Tcb>, target: QueueTarget) {
        match target {
            QueueTarget::Shared => rt.shared_queue().enqueue(&rt.arena, thread),
            QueueTarget::Private(core) => rt.private_queue(core).enqueue(&rt.arena, thread),
        }
    }
}

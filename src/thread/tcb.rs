//! Thread Control Block.
//!
//! Grounded in `original_source/include/xthread.h`: a TCB lives in shared
//! memory, carries its own spinlock, a saved `ucontext_t`, a join waitlist,
//! and a single intrusive link (`lnode toqueue`) since a thread is always on
//! at most one list at a time -- the cohort's single ready/wait queue of the
//! moment. Because every worker maps the arena at the same address, a
//! `ucontext_t` captured on one core is directly resumable by `setcontext`
//! on whichever core next dequeues this TCB: the thread's stack is itself
//! carved out of the shared arena (see `thread::table::spawn`), so its
//! contents, not just its saved registers, are visible to every worker.
//!
//! The per-TCB lock is a [`RawSpinlock`], not `spin::Mutex`, for the same
//! reason `sync::mutex` uses one: `thread::table::join` has to enqueue the
//! calling thread onto this TCB's join waitlist and then yield while still
//! holding the lock, releasing it only once the calling thread's own
//! context has been captured (`Scheduler::yield_holding_lock`). An RAII
//! guard whose `Drop` fires before that capture would reopen the lost-
//! wakeup race the lock exists to close.

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicI32, AtomicU32, Ordering};

use crate::arena::Offset;
use crate::list::{Link, Linked, RawList};
use crate::sched::context::Context;
use crate::sync::spinlock::RawSpinlock;
use crate::types::{CoreId, Tid, CORE_NONE, TID_NONE};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum ThreadStatus {
    Ready = 0,
    Running = 1,
    Blocked = 2,
    Exited = 3,
}

impl ThreadStatus {
    fn from_u32(v: u32) -> ThreadStatus {
        match v {
            0 => ThreadStatus::Ready,
            1 => ThreadStatus::Running,
            2 => ThreadStatus::Blocked,
            _ => ThreadStatus::Exited,
        }
    }
}

#[repr(C)]
pub struct Tcb {
    pub tid: Tid,
    /// `CORE_NONE` if this thread may run on any core; otherwise the core
    /// it is pinned to (spec's "bound-core flag").
    pub bound_core: AtomicU32,
    status: AtomicU32,
    pub context: Context,
    pub stack_base: usize,
    pub stack_size: usize,
    exit_code: AtomicI32,
    link: Link<Tcb>,
    /// Guards `join_waiters`. See module docs for why this is a raw
    /// spinlock rather than `spin::Mutex`.
    guard: RawSpinlock,
    join_waiters: UnsafeCell<RawList<Tcb>>,
}

impl Linked for Tcb {
    fn link(&self) -> &Link<Self> {
        &self.link
    }
    fn link_mut(&mut self) -> &mut Link<Self> {
        &mut self.link
    }
}

impl Tcb {
    /// Initializes a freshly bump-allocated, zeroed TCB slot in place.
    pub fn init(&mut self, tid: Tid, bound_core: Option<CoreId>, stack_base: usize, stack_size: usize) {
        self.tid = tid;
        self.bound_core = AtomicU32::new(bound_core.map(|c| c as u32).unwrap_or(CORE_NONE));
        self.status = AtomicU32::new(ThreadStatus::Ready as u32);
        self.context = Context::new();
        self.stack_base = stack_base;
        self.stack_size = stack_size;
        self.exit_code = AtomicI32::new(0);
        self.link = Link::default();
        self.guard = RawSpinlock::new();
        self.join_waiters = UnsafeCell::new(RawList::default());
    }

    pub fn status(&self) -> ThreadStatus {
        ThreadStatus::from_u32(self.status.load(Ordering::Acquire))
    }

    pub fn set_status(&self, status: ThreadStatus) {
        self.status.store(status as u32, Ordering::Release);
    }

    pub fn is_bound(&self) -> bool {
        self.bound_core.load(Ordering::Relaxed) != CORE_NONE
    }

    pub fn bound_core(&self) -> Option<CoreId> {
        let v = self.bound_core.load(Ordering::Relaxed);
        if v == CORE_NONE { None } else { Some(v as CoreId) }
    }

    /// Clears the bound-core flag. Spec.md §4.4: "Mark the parent (current
    /// thread) non-bound -- once it has spawned a child it must no longer
    /// be pinned to its birth core."
    pub fn unbind(&self) {
        self.bound_core.store(CORE_NONE, Ordering::Relaxed);
    }

    /// Re-pins the thread to `core`. Used by `thread::table::join` (spec.md
    /// §4.4: "Mark the current thread *bound* ... so that after join
    /// completes it returns to the same core").
    pub fn bind_to(&self, core: CoreId) {
        self.bound_core.store(core as u32, Ordering::Relaxed);
    }

    pub fn exit_code(&self) -> i32 {
        self.exit_code.load(Ordering::Acquire)
    }

    /// Raw offset of this TCB's own lock, for passing to
    /// [`crate::sched::Scheduler::yield_holding_lock`].
    pub fn guard_offset(&self, arena: &crate::arena::Arena) -> Offset<RawSpinlock> {
        arena.offset_of(&self.guard as *const RawSpinlock)
    }

    pub fn lock_guard(&self) {
        self.guard.lock();
    }

    /// # Safety
    /// Caller must hold the guard (via [`Tcb::lock_guard`]).
    pub unsafe fn unlock_guard(&self) {
        self.guard.unlock();
    }

    /// # Safety
    /// Caller must hold the guard.
    pub unsafe fn join_waiters(&self) -> &mut RawList<Tcb> {
        &mut *self.join_waiters.get()
    }

    /// Marks the thread exited, recording its return value. Caller must
    /// hold the guard; does not wake joiners -- that is
    /// `thread::table::exit_current`'s job, since it needs the arena to
    /// move the waitlist onto ready queues.
    pub fn mark_exited(&self, code: i32) {
        self.exit_code.store(code, Ordering::Release);
        self.set_status(ThreadStatus::Exited);
    }
}

pub const NO_TID: Tid = TID_NONE;
pub type TcbOffset = Offset<Tcb>;

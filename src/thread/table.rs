//! The cohort's thread table (`xmap` in `original_source`) plus the
//! spawn/join/exit/current operations built on top of it.

use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

use crate::arena::{Arena, Offset};
use crate::error::RuntimeError;
use crate::queue::ReadyQueue;
use crate::runtime::Runtime;
use crate::sched::context::ThreadEntry;
use crate::sched::{self, QueueTarget};
use crate::types::{CoreId, Tid};

use super::tcb::{Tcb, ThreadStatus};

/// tid -> TCB registry, backed by a fixed-capacity arena array plus a
/// reused-slot free list. Grounded in `original_source/include/process.h`'s
/// `xmap`, which maps tids to TCB pointers for the lifetime of the cohort.
pub struct ThreadTable {
    slots: Offset<Tcb>,
    capacity: usize,
    next_tid: Offset<AtomicU32>,
    next_free_slot: Offset<AtomicUsize>,
    free_list: Offset<ReadyQueue<Tcb>>,
}

impl ThreadTable {
    pub fn init(arena: &Arena, cursor: &mut usize, capacity: usize) -> Result<ThreadTable, RuntimeError> {
        let slots: Offset<Tcb> = arena.bump_alloc(cursor, capacity)?;
        let next_tid: Offset<AtomicU32> = arena.bump_alloc(cursor, 1)?;
        unsafe { std::ptr::write(arena.resolve(next_tid), AtomicU32::new(1)) };
        let next_free_slot: Offset<AtomicUsize> = arena.bump_alloc(cursor, 1)?;
        unsafe { std::ptr::write(arena.resolve(next_free_slot), AtomicUsize::new(0)) };
        let free_list: Offset<ReadyQueue<Tcb>> = arena.bump_alloc(cursor, 1)?;
        unsafe { std::ptr::write(arena.resolve(free_list), ReadyQueue::default()) };
        Ok(ThreadTable { slots, capacity, next_tid, next_free_slot, free_list })
    }

    fn free_list<'a>(&self, arena: &'a Arena) -> &'a ReadyQueue<Tcb> {
        unsafe { &*arena.resolve(self.free_list) }
    }

    /// Allocates a TCB slot: reuses one from a previously exited and
    /// reclaimed thread if available, otherwise bumps into fresh capacity.
    pub fn alloc_tcb(&self, arena: &Arena) -> Result<Offset<Tcb>, RuntimeError> {
        if let Some(reused) = self.free_list(arena).dequeue(arena) {
            return Ok(reused);
        }
        let counter = unsafe { &*arena.resolve(self.next_free_slot) };
        let idx = counter.fetch_add(1, Ordering::Relaxed);
        if idx >= self.capacity {
            return Err(RuntimeError::ResourceExhausted("thread table exhausted"));
        }
        let base = unsafe { arena.resolve(self.slots) };
        Ok(arena.offset_of(unsafe { base.add(idx) }))
    }

    pub fn reclaim(&self, arena: &Arena, tcb: Offset<Tcb>) {
        self.free_list(arena).enqueue(arena, tcb);
    }

    pub fn alloc_tid(&self, arena: &Arena) -> Tid {
        unsafe { &*arena.resolve(self.next_tid) }.fetch_add(1, Ordering::Relaxed)
    }

    /// Linear scan for the TCB slot currently holding `tid`. The ABI's
    /// `thread_join`/`thread_kill`/`thread_cancel` entry points take a bare
    /// `tid`, not an `Offset<Tcb>`, so they need this to recover one;
    /// internal callers that already hold the offset (e.g. a freshly
    /// spawned thread's own caller) never need it. `original_source`'s
    /// `xmap` is a real tid -> pointer hash table (spec.md §5: "a
    /// cross-process mutex (pshared) because it is written both during
    /// spawn and during teardown"); a full hash map is out of proportion
    /// for this crate's thread counts, so a scan over the bump-allocated
    /// range stands in for it.
    pub fn find_by_tid(&self, arena: &Arena, tid: Tid) -> Option<Offset<Tcb>> {
        let allocated = unsafe { &*arena.resolve(self.next_free_slot) }.load(Ordering::Acquire);
        let base = unsafe { arena.resolve(self.slots) };
        for idx in 0..allocated.min(self.capacity) {
            let tcb = unsafe { &*base.add(idx) };
            if tcb.tid == tid {
                return Some(arena.offset_of(unsafe { base.add(idx) }));
            }
        }
        None
    }
}

/// Returns the TCB offset of the thread currently running on this core.
///
/// # Safety
/// Must be called from a thread running under [`Scheduler::run`].
pub unsafe fn current(_rt: &Runtime) -> Offset<Tcb> {
    sched::current().current_thread().expect("current() called with no running thread")
}

/// Creates a new thread, allocating its stack out of the shared arena (so
/// the stack's contents, like its saved `ucontext_t`, are visible to
/// whichever core next runs it) and placing it on a ready queue. Does not
/// suspend the calling thread -- grounded in `xthread.cpp`'s `spawn`,
/// which enqueues the new TCB and returns immediately.
pub fn spawn(rt: &Runtime, bound_core: Option<CoreId>, entry: ThreadEntry) -> Result<Tid, RuntimeError> {
    let tcb_off = rt.thread_table.alloc_tcb(&rt.arena)?;
    let tid = rt.thread_table.alloc_tid(&rt.arena);

    let stack_size = rt.config.thread_stack_size;
    let stack_off: Offset<u8> = rt.alloc_stack(stack_size)?;
    let stack_base = unsafe { rt.arena.resolve(stack_off) as usize };

    unsafe {
        let tcb = &mut *rt.arena.resolve(tcb_off);
        tcb.init(tid, bound_core, stack_base, stack_size);
        let stack_slice = std::slice::from_raw_parts_mut(stack_base as *mut u8, stack_size);
        tcb.context.make(stack_slice, None, entry);
    }

    rt.live_threads().fetch_add(1, Ordering::AcqRel);

    let target = match bound_core {
        Some(core) => QueueTarget::Private(core),
        None => QueueTarget::Shared,
    };
    sched::Scheduler::yield_initially(rt, tcb_off, target);

    // spec.md §4.4: "Mark the parent (current thread) non-bound -- once it
    // has spawned a child it must no longer be pinned to its birth core."
    // No-op during `process::bootstrap`'s very first spawn, which has no
    // parent thread at all (no scheduler is installed on that OS thread
    // yet).
    if let Some(parent) = unsafe { sched::try_current() }.and_then(|s| s.current_thread()) {
        unsafe { &*rt.arena.resolve(parent) }.unbind();
    }

    log::debug!("spawned thread {tid}");
    Ok(tid)
}

/// Blocks the calling thread until `target` exits, returning its exit
/// code. Grounded in `xthread.cpp`'s join: enqueues onto the joinee's
/// waitlist under its lock, then yields holding that lock so a concurrent
/// exit can't race the enqueue (closes the lost-wakeup window the TCB's
/// own spinlock exists for -- see `thread::tcb` module docs). Once the
/// joinee is observed dead, removes it from the dead queue and reclaims
/// its TCB slot (spec §"dead queue": a joinee is reaped by its joiner,
/// not by itself).
pub fn join(rt: &Runtime, target: Offset<Tcb>) -> Result<i32, RuntimeError> {
    let me_off = unsafe { current(rt) };
    if target == me_off {
        // spec.md §6: join-of-self is a fatal invariant violation.
        crate::error::fatal("thread attempted to join itself");
    }

    // spec.md §4.4: "Mark the current thread bound (to its birth core) so
    // that after join completes it returns to the same core" -- bind to
    // whatever core is actually running this call, so `exit_current`'s
    // wake-up places us back here instead of on the shared queue.
    let my_core = unsafe { sched::current() }.core();
    unsafe { &*rt.arena.resolve(me_off) }.bind_to(my_core);

    loop {
        let tcb = unsafe { &*rt.arena.resolve(target) };
        tcb.lock_guard();
        if tcb.status() == ThreadStatus::Exited {
            let code = tcb.exit_code();
            unsafe { tcb.unlock_guard() };
            rt.dead_queue().remove(&rt.arena, target);
            rt.thread_table.reclaim(&rt.arena, target);

            // spec.md §4.4: "If after join only one user thread remains,
            // unprotect all managed memory and, if not currently on the
            // bound core, YieldToQueue(bound-core's private queue)." A
            // cohort down to one live thread no longer benefits from
            // per-page fault isolation, so lifting PROT_NONE cohort-wide
            // avoids further migration faults until the next thread spawns.
            if rt.live_threads().load(Ordering::Acquire) == 1 {
                rt.heap_region.stop_protection()?;
                rt.globals_region.stop_protection()?;
                if unsafe { sched::current() }.core() != my_core {
                    unsafe { sched::current().yield_to_queue(rt, QueueTarget::Private(my_core)) };
                }
            }

            return Ok(code);
        }
        let me = unsafe { current(rt) };
        unsafe { tcb.join_waiters().push_back(&rt.arena, me) };
        let lock_off = tcb.guard_offset(&rt.arena);
        unsafe { sched::current().yield_holding_lock(rt, lock_off) };
        // Woken because the joinee exited (or, defensively, spuriously);
        // loop around and re-check under the lock.
    }
}

/// Terminates the calling thread: records `code`, wakes every joiner, and
/// never returns. Grounded in `xthread.cpp`'s `finish`: the exiting
/// thread places itself on the dead queue rather than a ready queue, since
/// it must never be resumed again -- only a joiner's `reclaim` takes it
/// back off that queue. `xthread.cpp` wakes a single waiter; this TCB's
/// `join_waiters` generalizes to a list (DESIGN.md, multi-joiner support),
/// so every waiter is released here, each routed to its own bound-core
/// queue if it has one (spec.md §4.4: "mark it running, enqueue it on its
/// bound-core private queue (if bound) else on the shared queue") -- every
/// waiter reaches this point already bound to the core `join` was called
/// from, so in practice each goes back to exactly where it blocked.
///
/// Ends with `YieldHoldingLock(self-lock) -- never to return` (spec.md
/// §4.4's Exit): the self-lock must stay held across the context switch,
/// released by the scheduler only after this thread's context has been
/// fully parked, or a joiner could re-acquire the guard, observe
/// `Exited`, and reclaim this TCB slot (letting a concurrent `spawn` reuse
/// and overwrite `tcb.context`) while `Context::swap` is still writing
/// this thread's outgoing registers into that same `tcb.context`.
pub fn exit_current(code: i32) -> ! {
    let rt = crate::runtime::active();
    let me_off = unsafe { current(rt) };
    let tcb = unsafe { &*rt.arena.resolve(me_off) };

    tcb.lock_guard();
    tcb.mark_exited(code);
    rt.live_threads().fetch_sub(1, Ordering::AcqRel);
    let waiters = unsafe { tcb.join_waiters() };
    while let Some(w) = unsafe { waiters.pop_front(&rt.arena) } {
        let waiter = unsafe { &*rt.arena.resolve(w) };
        waiter.set_status(ThreadStatus::Ready);
        match waiter.bound_core() {
            Some(core) => rt.private_queue(core).enqueue(&rt.arena, w),
            None => rt.shared_queue().enqueue(&rt.arena, w),
        }
    }
    rt.dead_queue().enqueue(&rt.arena, me_off);

    log::debug!("thread {} exited with code {code}", tcb.tid);
    let lock_off = tcb.guard_offset(&rt.arena);
    unsafe { sched::current().vanish_holding_lock(rt, lock_off) }
}

//! The cohort-wide shared state: everything every worker needs to find at
//! the same fixed address after `fork`.
//!
//! There is no single struct like this in `original_source` -- the C++
//! runtime reaches its shared tables through several independent global
//! singletons (`process::getInstance()`, `xmemory::getInstance()`, ...).
//! We group them into one `Runtime` value instead, which is the more
//! idiomatic Rust shape for "one thing every worker resolves the same way".
//!
//! `Runtime` itself is an ordinary, process-local Rust value (built once by
//! the bootstrap process, then duplicated by `fork` into every worker along
//! with the rest of that process's memory). Only its *payload* -- the
//! ready queues, owner tables, and thread table entries that must stay
//! coherent across the whole cohort -- lives inside the shared [`Arena`],
//! reached through [`Offset`] handles. A field holding cross-process state
//! directly by value here (rather than through an `Offset`) would silently
//! diverge the moment any worker wrote to its own copy.

use std::sync::atomic::{AtomicU32, AtomicUsize};

use once_cell::sync::OnceCell;

use crate::arena::{Arena, Offset};
use crate::config::RuntimeConfig;
use crate::error::RuntimeError;
use crate::heap::HeapTable;
use crate::page::{OwnerTable, ProtectedRegion};
use crate::queue::ReadyQueue;
use crate::thread::table::ThreadTable;
use crate::thread::tcb::Tcb;
use crate::types::CoreId;

pub struct Runtime {
    pub arena: Arena,
    pub config: RuntimeConfig,
    pub heap_region: ProtectedRegion,
    pub globals_region: ProtectedRegion,
    pub heap_owner: OwnerTable,
    pub globals_owner: OwnerTable,
    shared_queue: Offset<ReadyQueue<Tcb>>,
    private_queues: Offset<ReadyQueue<Tcb>>,
    dead_queue: Offset<ReadyQueue<Tcb>>,
    pub thread_table: ThreadTable,
    pub heap: HeapTable,
    /// Bump cursor for thread stacks, carved out of the same arena as every
    /// other fixed table. Lives as an `AtomicUsize` *inside* the arena
    /// (rather than a plain field on this process-local struct) because
    /// `thread::table::spawn` can run concurrently on several cores, unlike
    /// the rest of this constructor's one-time, single-threaded setup.
    stack_cursor: Offset<AtomicUsize>,
    /// Count of spawned-but-not-yet-exited user threads across the whole
    /// cohort. Spec.md §4.4's join step ("if after join only one user
    /// thread remains, unprotect all managed memory ...") needs this to
    /// decide when a cohort has quiesced down to a single thread; nothing
    /// else in this design otherwise tracks live-thread count.
    live_threads: Offset<AtomicU32>,
}

impl Runtime {
    /// Builds the cohort's shared state inside `arena`. Must run once,
    /// before any worker is forked (see `process::bootstrap`).
    pub fn build(
        arena: Arena,
        config: RuntimeConfig,
        heap_region: ProtectedRegion,
        globals_region: ProtectedRegion,
    ) -> Result<Runtime, RuntimeError> {
        let mut cursor = 0usize;
        let heap_owner = OwnerTable::init(&arena, &mut cursor, config.total_pages(config.heap_size))?;
        let globals_owner = OwnerTable::init(&arena, &mut cursor, config.total_pages(config.globals_size))?;

        let shared_queue: Offset<ReadyQueue<Tcb>> = arena.bump_alloc(&mut cursor, 1)?;
        unsafe { std::ptr::write(arena.resolve(shared_queue), ReadyQueue::default()) };

        let dead_queue: Offset<ReadyQueue<Tcb>> = arena.bump_alloc(&mut cursor, 1)?;
        unsafe { std::ptr::write(arena.resolve(dead_queue), ReadyQueue::default()) };

        let private_queues: Offset<ReadyQueue<Tcb>> = arena.bump_alloc(&mut cursor, config.cores)?;
        for core in 0..config.cores {
            unsafe {
                std::ptr::write(arena.resolve(private_queues).add(core), ReadyQueue::default());
            }
        }

        let thread_table = ThreadTable::init(&arena, &mut cursor, config.max_threads)?;
        let heap = HeapTable::init(&arena, &mut cursor, &config, &heap_region)?;

        let stack_cursor: Offset<AtomicUsize> = arena.bump_alloc(&mut cursor, 1)?;
        unsafe { std::ptr::write(arena.resolve(stack_cursor), AtomicUsize::new(cursor)) };

        let live_threads: Offset<AtomicU32> = arena.bump_alloc(&mut cursor, 1)?;
        unsafe { std::ptr::write(arena.resolve(live_threads), AtomicU32::new(0)) };

        Ok(Runtime {
            arena,
            config,
            heap_region,
            globals_region,
            heap_owner,
            globals_owner,
            shared_queue,
            private_queues,
            dead_queue,
            thread_table,
            heap,
            stack_cursor,
            live_threads,
        })
    }

    pub fn live_threads(&self) -> &AtomicU32 {
        unsafe { &*self.arena.resolve(self.live_threads) }
    }

    /// Bump-allocates a fresh thread stack out of the shared arena. Every
    /// spawned thread needs its own range -- unlike the fixed tables
    /// `build` sets up once, this runs for the life of the cohort and from
    /// any core, so it goes through the atomic cursor rather than
    /// `Arena::bump_alloc`'s `&mut usize` (see `thread::table::spawn`).
    pub fn alloc_stack(&self, size: usize) -> Result<Offset<u8>, RuntimeError> {
        let cursor = unsafe { &*self.arena.resolve(self.stack_cursor) };
        self.arena.bump_alloc_atomic(cursor, size)
    }

    pub fn shared_queue(&self) -> &ReadyQueue<Tcb> {
        unsafe { &*self.arena.resolve(self.shared_queue) }
    }

    pub fn dead_queue(&self) -> &ReadyQueue<Tcb> {
        unsafe { &*self.arena.resolve(self.dead_queue) }
    }

    pub fn private_queue(&self, core: CoreId) -> &ReadyQueue<Tcb> {
        debug_assert!(core < self.config.cores);
        unsafe { &*self.arena.resolve(self.private_queues).add(core) }
    }
}

static ACTIVE: OnceCell<Runtime> = OnceCell::new();

/// Installs the cohort's `Runtime` as this process's singleton. Called
/// once, by the bootstrap process before `fork`, so every worker inherits
/// an already-populated `ACTIVE` for free.
pub fn install(rt: Runtime) {
    ACTIVE.set(rt).unwrap_or_else(|_| panic!("runtime already installed"));
}

/// Returns the cohort's shared state. Panics if called before
/// [`install`], which every worker's entry point does before entering its
/// scheduler loop.
pub fn active() -> &'static Runtime {
    ACTIVE.get().expect("runtime not installed")
}

//! Worker-cohort bootstrap: the sequence (spec.md §4.8) that turns one
//! process into a pinned cohort of cooperating workers sharing one arena.
//!
//! Grounded in `original_source/include/process.h` and `src/process.cpp`:
//! `create()` maps the shared heap/globals at fixed addresses, forks `N-1`
//! additional workers sharing FS/files, pins each to a core via
//! `sched_setaffinity`, and has every worker (including the parent) enter
//! its own scheduler loop. We do not reproduce `process.cpp`'s raw-asm
//! relocation of the *original* process's call stack onto a scratch stack
//! and back (its steps 6 and 9): that trick exists purely so the host
//! program's already-running call frames can keep executing, unmodified,
//! after the cohort is created underneath them. This runtime's entry point
//! has no such pre-existing call stack to preserve -- its whole workload is
//! handed to the scheduler as an ordinary spawned thread -- so core 0
//! simply enters `Scheduler::run` directly once bootstrap finishes. See
//! DESIGN.md.

use crate::arena::Arena;
use crate::config::RuntimeConfig;
use crate::error::RuntimeError;
use crate::page::ProtectedRegion;
use crate::runtime::{self, Runtime};
use crate::sched::context::ThreadEntry;
use crate::sched::Scheduler;
use crate::signal;
use crate::thread::table;

/// Fixed virtual addresses every worker maps its regions at, chosen well
/// away from the ordinary stack/mmap/heap areas so `MAP_FIXED` never
/// collides with something the loader already placed there.
const META_BASE: usize = 0x0000_2000_0000_0000;
const HEAP_BASE: usize = 0x0000_2100_0000_0000;
const GLOBALS_BASE: usize = 0x0000_2200_0000_0000;

/// Stands up the cohort and runs `entry` as the first user thread, bound to
/// core 0. Never returns: the calling process becomes core 0's scheduler.
pub fn bootstrap(config: RuntimeConfig, entry: ThreadEntry) -> Result<(), RuntimeError> {
    // Step 1: install the page-fault handler before anything can fault.
    signal::install()?;

    // Steps 2-3: map the shared control-structure arena and the two
    // protected regions (heap, globals) at fixed addresses, PROT_NONE.
    let meta_size = 64 * 1024 * 1024;
    let arena = Arena::new_fixed(META_BASE, meta_size)?;

    let heap_map = Arena::new_fixed(HEAP_BASE, config.heap_size)?;
    std::mem::forget(heap_map); // kept mapped for the cohort's lifetime
    let heap_region = ProtectedRegion::new(HEAP_BASE, config.heap_size);
    heap_region.start_protection()?;

    let globals_map = Arena::new_fixed(GLOBALS_BASE, config.globals_size)?;
    std::mem::forget(globals_map);
    let globals_region = ProtectedRegion::new(GLOBALS_BASE, config.globals_size);
    globals_region.start_protection()?;

    // Step 4: ready queues, owner tables, thread table, heap control blocks.
    let rt = Runtime::build(arena, config.clone(), heap_region, globals_region)?;
    runtime::install(rt);
    let rt = runtime::active();

    // Step 8: fork the remaining N-1 workers before touching any managed
    // page, so every child inherits the same PROT_NONE mappings and the
    // already-installed signal handler.
    for core in 1..rt.config.cores {
        match unsafe { libc::fork() } {
            -1 => return Err(RuntimeError::os("fork")),
            0 => enter_worker(rt, core),
            _child_pid => {}
        }
    }

    // Steps 5/7: core 0's own TCB and its entry into its scheduler.
    pin_to_core(0)?;
    let tid0 = table::spawn(rt, Some(0), entry)?;
    log::info!("cohort of {} cores bootstrapped, initial thread {tid0}", rt.config.cores);
    Scheduler::new(0).run(rt)
}

/// A forked child's path from `fork()` returning to entering its scheduler
/// loop. Never returns.
fn enter_worker(rt: &Runtime, core: usize) -> ! {
    if let Err(e) = pin_to_core(core) {
        crate::error::fatal(&format!("worker {core}: sched_setaffinity failed: {e}"));
    }
    log::info!("worker {core} online");
    Scheduler::new(core).run(rt)
}

fn pin_to_core(core: usize) -> Result<(), RuntimeError> {
    unsafe {
        let mut set: libc::cpu_set_t = std::mem::zeroed();
        libc::CPU_SET(core, &mut set);
        if libc::sched_setaffinity(0, std::mem::size_of::<libc::cpu_set_t>(), &set) != 0 {
            return Err(RuntimeError::os("sched_setaffinity"));
        }
    }
    Ok(())
}

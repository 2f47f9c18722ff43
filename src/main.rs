//! Demo harness: stands up a worker cohort and scripts a workload that
//! exercises the scheduler, cross-core page-ownership migration, and every
//! synchronization primitive end to end (spec.md §2 overview).

use std::mem::size_of;

use clap::Parser;

use mnthread_runtime::config::RuntimeConfig;
use mnthread_runtime::error::fatal;
use mnthread_runtime::process;
use mnthread_runtime::runtime;
use mnthread_runtime::sched::context::ThreadEntry;
use mnthread_runtime::sync::{Barrier, Condvar, Mutex};
use mnthread_runtime::thread::table;

/// One shared block, allocated out of the cohort's heap once the cohort is
/// up, used by every phase of the demo below. Living in the heap rather
/// than the control-structure arena means every touch of it goes through
/// the real owner-acquire/migration path (spec.md §4.3), not just the
/// scheduler's own bookkeeping.
#[repr(C)]
struct Shared {
    counter_lock: Mutex,
    counter: u64,
    start: Barrier,
    pingpong_lock: Mutex,
    pingpong_cond: Condvar,
    flag: u32,
}

const WORKERS: usize = 8;
const INCREMENTS_PER_WORKER: u64 = 1000;
const PINGPONG_ITERATIONS: u32 = 10_000;

fn main() {
    env_logger::init();
    let config = RuntimeConfig::parse();
    log::info!("starting cohort with config: {config:?}");

    let entry: ThreadEntry = Box::new(run_demo);
    if let Err(e) = process::bootstrap(config, entry) {
        log::error!("cohort bootstrap failed: {e}");
        std::process::exit(1);
    }
}

fn run_demo() {
    let rt = runtime::active();
    let shared_addr = rt
        .heap
        .malloc(rt, 0, size_of::<Shared>())
        .unwrap_or_else(|e| fatal(&format!("demo block allocation failed: {e}")));
    let shared = shared_addr as *mut Shared;
    unsafe {
        (*shared).counter_lock.init();
        (*shared).counter = 0;
        (*shared).start.init((WORKERS + 1) as u32);
        (*shared).pingpong_lock.init();
        (*shared).pingpong_cond.init();
        (*shared).flag = 0;
    }

    mutex_phase(rt, shared);
    barrier_phase(rt, shared);
    pingpong_phase(rt, shared);

    log::info!("demo complete");
}

/// `WORKERS` threads each increment a mutex-protected counter
/// `INCREMENTS_PER_WORKER` times; the final total must be exact (spec.md §8
/// mutex mutual-exclusion property).
fn mutex_phase(rt: &runtime::Runtime, shared: *mut Shared) {
    let addr = shared as usize;
    let tids: Vec<_> = (0..WORKERS)
        .map(|_| {
            let body: ThreadEntry = Box::new(move || {
                let shared = addr as *mut Shared;
                for _ in 0..INCREMENTS_PER_WORKER {
                    unsafe {
                        (*shared).counter_lock.lock();
                        (*shared).counter += 1;
                        (*shared).counter_lock.unlock();
                    }
                }
            });
            table::spawn(rt, None, body).expect("spawn mutex-phase worker")
        })
        .collect();

    join_all(rt, &tids);

    let total = unsafe { (*shared).counter };
    let expected = WORKERS as u64 * INCREMENTS_PER_WORKER;
    log::info!("mutex phase: counter = {total} (expected {expected})");
    assert_eq!(total, expected, "lost update under the mutex");
}

/// `WORKERS` threads rendezvous at a barrier alongside this thread; none
/// may proceed past it until all `WORKERS + 1` arrivals are counted
/// (spec.md §4.7/§8 barrier release property).
fn barrier_phase(rt: &runtime::Runtime, shared: *mut Shared) {
    let addr = shared as usize;
    let tids: Vec<_> = (0..WORKERS)
        .map(|i| {
            let body: ThreadEntry = Box::new(move || {
                let shared = addr as *mut Shared;
                unsafe { (*shared).start.wait() };
                log::debug!("barrier-phase worker {i} released");
            });
            table::spawn(rt, None, body).expect("spawn barrier-phase worker")
        })
        .collect();

    unsafe { (*shared).start.wait() };
    log::info!("barrier phase: all {} arrivals released", WORKERS + 1);
    join_all(rt, &tids);
}

/// Two threads hand a flag back and forth over a condvar for
/// `PINGPONG_ITERATIONS` round trips (spec.md §8's ping-pong property).
fn pingpong_phase(rt: &runtime::Runtime, shared: *mut Shared) {
    let addr = shared as usize;

    let responder: ThreadEntry = Box::new(move || {
        let shared = addr as *mut Shared;
        unsafe {
            (*shared).pingpong_lock.lock();
            for _ in 0..PINGPONG_ITERATIONS {
                while (*shared).flag != 1 {
                    (*shared).pingpong_cond.wait(&(*shared).pingpong_lock);
                }
                (*shared).flag = 2;
                (*shared).pingpong_cond.broadcast();
            }
            (*shared).pingpong_lock.unlock();
        }
    });
    let tid = table::spawn(rt, None, responder).expect("spawn pingpong responder");

    unsafe {
        (*shared).pingpong_lock.lock();
        for _ in 0..PINGPONG_ITERATIONS {
            (*shared).flag = 1;
            (*shared).pingpong_cond.broadcast();
            while (*shared).flag != 2 {
                (*shared).pingpong_cond.wait(&(*shared).pingpong_lock);
            }
        }
        (*shared).pingpong_lock.unlock();
    }

    join_all(rt, &[tid]);
    log::info!("ping-pong phase: {PINGPONG_ITERATIONS} round trips completed");
}

fn join_all(rt: &runtime::Runtime, tids: &[mnthread_runtime::types::Tid]) {
    for &tid in tids {
        let tcb_off = rt
            .thread_table
            .find_by_tid(&rt.arena, tid)
            .unwrap_or_else(|| fatal(&format!("demo thread {tid} vanished before join")));
        table::join(rt, tcb_off).unwrap_or_else(|e| fatal(&format!("join failed: {e}")));
    }
}

//! C-style ABI surface (spec.md §6): the "ingest" interface a linked-in
//! program calls instead of pthreads/libc for threading and allocation.
//! Grounded in `original_source`'s own public headers -- the names and
//! signatures below mirror `xmutex.h`/`xcondvar.h`/`xbarr.h`/`xthread.h`'s
//! entry points.
//!
//! The allocation family is exported as `rt_malloc`/`rt_free`/... rather
//! than bare `malloc`/`free`: this binary already links against libc's own
//! allocator, so reusing those names would be a duplicate-symbol error at
//! link time. Actually replacing the process's libc symbol table (real
//! dynamic interposition, `LD_PRELOAD`-style) is an external-collaborator
//! concern excluded by spec.md §1's Non-goals, same as the `fopen`/`mmap`
//! stubs below; this module is the *target* such an interposition layer
//! would forward into, not the interposition mechanism itself.

use std::os::raw::{c_int, c_void};

use crate::error::fatal;
use crate::runtime;
use crate::sched;
use crate::sched::context::ThreadEntry;
use crate::sync::{Barrier, Condvar, Mutex};
use crate::thread::table;
use crate::types::Tid;

fn current_core() -> usize {
    unsafe { sched::current() }.core()
}

// ---- mutex (xmutex.h) ----

#[no_mangle]
pub unsafe extern "C" fn mutex_init(m: *mut Mutex) {
    (*m).init();
}

#[no_mangle]
pub unsafe extern "C" fn mutex_lock(m: *const Mutex) {
    (*m).lock();
}

/// Stub: `trylock` is explicitly not supported (spec.md §5) -- returns
/// success without side effects rather than actually attempting the lock,
/// matching that contract exactly rather than approximating it with
/// `Mutex::try_lock`.
#[no_mangle]
pub unsafe extern "C" fn mutex_trylock(_m: *const Mutex) -> c_int {
    0
}

#[no_mangle]
pub unsafe extern "C" fn mutex_unlock(m: *const Mutex) {
    (*m).unlock();
}

#[no_mangle]
pub unsafe extern "C" fn mutex_destroy(_m: *mut Mutex) {}

// ---- condition variable (xcondvar.h) ----

#[no_mangle]
pub unsafe extern "C" fn cond_init(c: *mut Condvar) {
    (*c).init();
}

#[no_mangle]
pub unsafe extern "C" fn cond_wait(c: *const Condvar, m: *const Mutex) {
    (*c).wait(&*m);
}

#[no_mangle]
pub unsafe extern "C" fn cond_signal(c: *const Condvar) {
    (*c).signal();
}

#[no_mangle]
pub unsafe extern "C" fn cond_broadcast(c: *const Condvar) {
    (*c).broadcast();
}

#[no_mangle]
pub unsafe extern "C" fn cond_destroy(_c: *mut Condvar) {}

// ---- barrier (xbarr.h) ----

#[no_mangle]
pub unsafe extern "C" fn barrier_init(b: *mut Barrier, count: u32) {
    (*b).init(count);
}

#[no_mangle]
pub unsafe extern "C" fn barrier_wait(b: *const Barrier) {
    (*b).wait();
}

#[no_mangle]
pub unsafe extern "C" fn barrier_destroy(_b: *mut Barrier) {}

// ---- threads (xthread.h) ----

/// `bound_core < 0` spawns an unbound thread (free to migrate); otherwise
/// the thread starts pinned to that core.
#[no_mangle]
pub extern "C" fn thread_create(
    bound_core: c_int,
    entry: extern "C" fn(*mut c_void) -> *mut c_void,
    arg: *mut c_void,
) -> Tid {
    let rt = runtime::active();
    let arg_addr = arg as usize;
    let bound = if bound_core < 0 { None } else { Some(bound_core as usize) };
    let body: ThreadEntry = Box::new(move || {
        entry(arg_addr as *mut c_void);
    });
    table::spawn(rt, bound, body).unwrap_or_else(|e| fatal(&format!("thread_create: {e}")))
}

#[no_mangle]
pub extern "C" fn thread_join(tid: Tid) -> c_int {
    let rt = runtime::active();
    let target = rt
        .thread_table
        .find_by_tid(&rt.arena, tid)
        .unwrap_or_else(|| fatal("join of unknown or missing thread"));
    table::join(rt, target).unwrap_or_else(|e| fatal(&format!("join: {e}")))
}

#[no_mangle]
pub extern "C" fn thread_exit(code: c_int) -> ! {
    table::exit_current(code)
}

#[no_mangle]
pub extern "C" fn thread_self() -> Tid {
    let rt = runtime::active();
    let tcb_off = unsafe { table::current(rt) };
    unsafe { (*rt.arena.resolve(tcb_off)).tid }
}

/// Stub: signal delivery to a specific user thread is not supported.
#[no_mangle]
pub extern "C" fn thread_kill(_tid: Tid, _sig: c_int) -> c_int {
    -1
}

/// Stub: cancellation is not supported (spec.md §5).
#[no_mangle]
pub extern "C" fn thread_cancel(_tid: Tid) -> c_int {
    -1
}

// ---- allocation (xpheap.h / xheap.h) ----

#[no_mangle]
pub unsafe extern "C" fn rt_malloc(size: usize) -> *mut c_void {
    let rt = runtime::active();
    match rt.heap.malloc(rt, current_core(), size) {
        Ok(addr) => addr as *mut c_void,
        Err(e) => {
            log::error!("rt_malloc({size}) failed: {e}");
            std::ptr::null_mut()
        }
    }
}

#[no_mangle]
pub unsafe extern "C" fn rt_calloc(nmemb: usize, size: usize) -> *mut c_void {
    let total = nmemb.saturating_mul(size);
    let ptr = rt_malloc(total);
    if !ptr.is_null() {
        std::ptr::write_bytes(ptr as *mut u8, 0, total);
    }
    ptr
}

#[no_mangle]
pub unsafe extern "C" fn rt_realloc(ptr: *mut c_void, size: usize) -> *mut c_void {
    if ptr.is_null() {
        return rt_malloc(size);
    }
    let rt = runtime::active();
    let old_size = rt.heap.usable_size(ptr as usize);
    let new_ptr = rt_malloc(size);
    if !new_ptr.is_null() {
        std::ptr::copy_nonoverlapping(ptr as *const u8, new_ptr as *mut u8, old_size.min(size));
        rt.heap.free(rt, current_core(), ptr as usize);
    }
    new_ptr
}

#[no_mangle]
pub unsafe extern "C" fn rt_free(ptr: *mut c_void) {
    if ptr.is_null() {
        return;
    }
    let rt = runtime::active();
    rt.heap.free(rt, current_core(), ptr as usize);
}

#[no_mangle]
pub unsafe extern "C" fn rt_usable_size(ptr: *mut c_void) -> usize {
    if ptr.is_null() {
        return 0;
    }
    runtime::active().heap.usable_size(ptr as usize)
}

/// `memalign` is unsupported, per spec.md §6 -- aborts the process.
#[no_mangle]
pub extern "C" fn rt_memalign(_alignment: usize, _size: usize) -> *mut c_void {
    fatal("memalign is not supported")
}

// ---- misc (spec.md §6) ----

#[no_mangle]
pub extern "C" fn rt_getpid() -> libc::pid_t {
    current_core() as libc::pid_t
}

/// Stub: there is no preemption beyond the explicit yield primitives
/// (spec.md §5) -- returns success without side effects.
#[no_mangle]
pub extern "C" fn rt_sched_yield() -> c_int {
    0
}

#[repr(C)]
pub struct ThreadAttr {
    _private: [u8; 0],
}

#[no_mangle]
pub extern "C" fn pthread_attr_init(_attr: *mut ThreadAttr) -> c_int {
    0
}

#[no_mangle]
pub extern "C" fn pthread_attr_destroy(_attr: *mut ThreadAttr) -> c_int {
    0
}

#[no_mangle]
pub extern "C" fn pthread_attr_setstacksize(_attr: *mut ThreadAttr, _size: usize) -> c_int {
    0
}

/// Declared for ABI completeness; relocating the stream buffer into shared
/// memory is an external-collaborator concern per spec.md §1 Non-goals.
#[no_mangle]
pub extern "C" fn rt_fopen(_path: *const i8, _mode: *const i8) -> *mut c_void {
    fatal("fopen interposition is not implemented (see spec Non-goals)")
}

#[no_mangle]
pub extern "C" fn rt_fclose(_stream: *mut c_void) -> c_int {
    fatal("fclose interposition is not implemented (see spec Non-goals)")
}

/// Declared for ABI completeness; rewriting `MAP_PRIVATE` to `MAP_SHARED`
/// (and widening the backing fd's mode) is an external-collaborator
/// concern per spec.md §1 Non-goals.
#[no_mangle]
pub extern "C" fn rt_mmap(
    _addr: *mut c_void,
    _len: usize,
    _prot: c_int,
    _flags: c_int,
    _fd: c_int,
    _offset: i64,
) -> *mut c_void {
    fatal("mmap MAP_PRIVATE rewriting is not implemented (see spec Non-goals)")
}
